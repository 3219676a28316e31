//! Heap encoding for multi-precision numbers.
//!
//! `core-mp` has no notion of a heap — `MpNumber` is a plain value type.
//! `core-model::ValueData::Mp` carries only a `HandleId`, so this is the
//! seam that turns one into the other: a heap block of
//! `2 + digit-count` cells, `[sign, exponent, digit_0 .. digit_{n-1}]`,
//! each stored as a plain `Int` cell. Storing re-allocates rather than
//! mutating in place, so a stack slot only ever holds the handle, never
//! the digits.

use core_heap::{Heap, HeapError};
use core_model::{HandleId, ValueCell};
use core_mp::MpNumber;

pub fn store_mp(heap: &mut Heap, value: &MpNumber) -> Result<HandleId, HeapError> {
    let digits = value.digits();
    let handle = heap.allocate(None, digits.len() + 2)?;
    heap.write(handle, 0, ValueCell::int(value.sign() as i64))?;
    heap.write(handle, 1, ValueCell::int(value.exponent()))?;
    for (i, &d) in digits.iter().enumerate() {
        heap.write(handle, i + 2, ValueCell::int(d as i64))?;
    }
    Ok(handle)
}

pub fn load_mp(heap: &Heap, handle: HandleId) -> Result<MpNumber, HeapError> {
    let cells = heap.cells(handle)?;
    let sign = cells[0].as_int().unwrap_or(0) as i8;
    let exponent = cells[1].as_int().unwrap_or(0);
    let digits: Vec<u32> = cells[2..].iter().map(|c| c.as_int().unwrap_or(0) as u32).collect();
    Ok(MpNumber::from_parts(sign, exponent, digits))
}
