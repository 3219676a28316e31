//! Row (array) engine: multi-dimensional descriptors
//! with bounds/stride/shift, trims and slices, FLEX semantics, deep
//! copy/assign, concatenation, and `STRING`<->`CHAR` row conversion.

mod descriptor;
mod ops;
mod strings;

pub use descriptor::{RowDescriptor, RowIter, Tuple};
pub use ops::{handle_to_ref, ref_handle, RowArena};
pub use strings::{row_to_string, string_to_row};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("subscript {index} outside bounds [{lower}:{upper}]")]
    OutOfBounds { index: i64, lower: i64, upper: i64 },
    #[error("array assignment with non-matching shape")]
    DifferentBounds,
    #[error("wrong number of dimensions for this descriptor")]
    DimensionMismatch,
    #[error("unknown row header handle")]
    UnknownHeader,
    #[error(transparent)]
    Heap(#[from] core_heap::HeapError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_heap::Heap;

    #[test]
    fn slice_out_of_bounds_is_rejected() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let header = rows.make(&mut heap, None, vec![Tuple::new(1, 3, 1)], false).unwrap();
        assert_eq!(
            rows.get(&heap, header, &[5]),
            Err(RowError::OutOfBounds { index: 5, lower: 1, upper: 3 })
        );
    }

    #[test]
    fn trim_shares_backing_storage_with_its_source() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let header = rows.make(&mut heap, None, vec![Tuple::new(1, 5, 1)], false).unwrap();
        for i in 1..=5 {
            rows.set(&mut heap, header, &[i], core_model::ValueCell::int(i * 10)).unwrap();
        }
        let trimmed = rows.trim(&mut heap, header, &[(2, 4)]).unwrap();
        assert_eq!(rows.get(&heap, trimmed, &[2]).unwrap().as_int(), Some(20));
        assert_eq!(rows.get(&heap, trimmed, &[4]).unwrap().as_int(), Some(40));
        assert!(rows.get(&heap, trimmed, &[5]).is_err());
    }

    #[test]
    fn empty_collateral_yields_a_vacuum_row() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let header = rows.concatenate(&mut heap, &[]).unwrap();
        let desc = rows.descriptor(header).unwrap();
        assert_eq!(desc.tuples[0].lower, 1);
        assert_eq!(desc.tuples[0].upper, 0);
    }

    #[test]
    fn concatenate_rejects_mismatched_inner_shapes() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let a = rows.make(&mut heap, None, vec![Tuple::new(1, 2, 1)], false).unwrap();
        let b = rows.make(&mut heap, None, vec![Tuple::new(1, 3, 1)], false).unwrap();
        assert_eq!(rows.concatenate(&mut heap, &[a, b]), Err(RowError::DifferentBounds));
    }

    #[test]
    fn deep_copy_is_independent_of_the_original() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let header = rows.make(&mut heap, None, vec![Tuple::new(1, 2, 1)], false).unwrap();
        rows.set(&mut heap, header, &[1], core_model::ValueCell::int(1)).unwrap();
        let copy = rows.deep_copy(&mut heap, header).unwrap();
        rows.set(&mut heap, header, &[1], core_model::ValueCell::int(99)).unwrap();
        assert_eq!(rows.get(&heap, copy, &[1]).unwrap().as_int(), Some(1));
    }

    #[test]
    fn deep_assign_into_non_flex_destination_requires_matching_bounds() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let dst = rows.make(&mut heap, None, vec![Tuple::new(1, 2, 1)], false).unwrap();
        let src = rows.make(&mut heap, None, vec![Tuple::new(1, 3, 1)], false).unwrap();
        assert_eq!(rows.deep_assign(&mut heap, dst, src, false), Err(RowError::DifferentBounds));
    }

    #[test]
    fn deep_assign_into_flex_destination_reallocates_to_source_extent() {
        let mut heap = Heap::default();
        let mut rows = RowArena::default();
        let dst = rows.make(&mut heap, None, vec![Tuple::new(1, 2, 1)], true).unwrap();
        let src = rows.make(&mut heap, None, vec![Tuple::new(1, 5, 1)], false).unwrap();
        rows.set(&mut heap, src, &[3], core_model::ValueCell::int(30)).unwrap();
        rows.deep_assign(&mut heap, dst, src, true).unwrap();
        assert_eq!(rows.descriptor(dst).unwrap().tuples[0].upper, 5);
        assert_eq!(rows.get(&heap, dst, &[3]).unwrap().as_int(), Some(30));
    }
}
