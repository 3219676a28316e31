use core_heap::Heap;
use core_model::{HandleId, ValueCell};

use crate::descriptor::Tuple;
use crate::ops::RowArena;
use crate::RowError;

/// `STRING ≡ FLEX [] CHAR`: allocate a `[1:n] CHAR` row
/// from a native string.
pub fn string_to_row(rows: &mut RowArena, heap: &mut Heap, s: &str) -> Result<HandleId, RowError> {
    let chars: Vec<char> = s.chars().collect();
    let header = rows.make(heap, None, vec![Tuple::new(1, chars.len() as i64, 1)], true)?;
    let elements = rows.descriptor(header)?.elements;
    for (i, ch) in chars.into_iter().enumerate() {
        heap.write(elements, i, ValueCell::char(ch))?;
    }
    Ok(header)
}

/// The reverse conversion: scan `lower_bound..=upper_bound` of a 1-d CHAR
/// row back into a native string.
pub fn row_to_string(rows: &RowArena, heap: &Heap, header: HandleId) -> Result<String, RowError> {
    let desc = rows.descriptor(header)?;
    if desc.dims() != 1 {
        return Err(RowError::DimensionMismatch);
    }
    let tuple = desc.tuples[0];
    let mut out = String::with_capacity(tuple.len().max(0) as usize);
    for i in tuple.lower..=tuple.upper {
        if tuple.len() == 0 {
            break;
        }
        let cell = rows.get(heap, header, &[i])?;
        if let core_model::ValueData::Char(c) = cell.data {
            out.push(c);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_char_row() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let header = string_to_row(&mut rows, &mut heap, "hi").unwrap();
        assert_eq!(row_to_string(&rows, &heap, header).unwrap(), "hi");
    }

    #[test]
    fn empty_string_has_zero_row_size_and_rejects_any_subscript() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let header = string_to_row(&mut rows, &mut heap, "").unwrap();
        let desc = rows.descriptor(header).unwrap();
        assert_eq!(desc.tuples[0].len(), 0);
        assert!(rows.get(&heap, header, &[1]).is_err());
    }
}
