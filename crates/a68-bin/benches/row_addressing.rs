use core_heap::Heap;
use core_model::ValueCell;
use core_rows::{RowArena, Tuple};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_element_get(c: &mut Criterion) {
    let mut heap = Heap::new(None);
    let mut rows = RowArena::default();
    let header = rows.make(&mut heap, None, vec![Tuple::new(1, 1000, 1)], false).unwrap();
    for i in 1..=1000i64 {
        rows.set(&mut heap, header, &[i], ValueCell::int(i)).unwrap();
    }

    c.bench_function("row_get_middle_element", |bencher| {
        bencher.iter(|| rows.get(&heap, black_box(header), black_box(&[500])).unwrap());
    });
}

criterion_group!(benches, bench_element_get);
criterion_main!(benches);
