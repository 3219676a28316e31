use core_mp::MpNumber;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_mul(c: &mut Criterion) {
    let d = core_mp::digits_for_precision(30);
    let a = MpNumber::from_i64(123_456_789, d);
    let b = MpNumber::from_i64(987_654_321, d);
    c.bench_function("mp_mul_long_long", |bencher| {
        bencher.iter(|| black_box(&a).mul(black_box(&b), d));
    });
}

fn bench_div(c: &mut Criterion) {
    let d = core_mp::digits_for_precision(30);
    let a = MpNumber::from_i64(999_999_999, d);
    let b = MpNumber::from_i64(7, d);
    c.bench_function("mp_div_long_long", |bencher| {
        bencher.iter(|| black_box(&a).div(black_box(&b), d).unwrap());
    });
}

criterion_group!(benches, bench_mul, bench_div);
criterion_main!(benches);
