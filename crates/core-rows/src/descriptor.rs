use core_model::{HandleId, ModeId};

/// One dimension's bookkeeping: bounds, stride, and the lower-bound bias
/// used to normalize an applied index into the flattened index space.
/// The iteration cursor `k` a descriptor walk needs is deliberately
/// *not* stored here — embedding it in the tuple would make it shared,
/// mutable state; `RowIter` (below) carries it instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuple {
    pub lower: i64,
    pub upper: i64,
    pub span: i64,
    pub shift: i64,
}

impl Tuple {
    pub fn new(lower: i64, upper: i64, span: i64) -> Self {
        Self { lower, upper, span, shift: lower }
    }

    pub fn len(&self) -> i64 {
        if self.upper < self.lower { 0 } else { self.upper - self.lower + 1 }
    }

    pub fn contains(&self, index: i64) -> bool {
        index >= self.lower && index <= self.upper
    }
}

/// The array header plus its tuples. `header` is the
/// handle by which a `REF ROW M` or `REF FLEX ROW M` value names this
/// row; `elements` is the backing block the tuples address into, which
/// need not be contiguous with the header or densely packed after a trim.
#[derive(Debug, Clone)]
pub struct RowDescriptor {
    pub elem_mode: Option<ModeId>,
    pub slice_offset: i64,
    pub field_offset: usize,
    pub elements: HandleId,
    pub tuples: Vec<Tuple>,
    /// True iff this row refers to a `FLEX` array — storing it into a
    /// name whose scope outlives the owning frame is a runtime error
    /// (rowing/slicing a `FLEX` array produces one of these).
    pub transient: bool,
}

impl RowDescriptor {
    pub fn dims(&self) -> usize {
        self.tuples.len()
    }

    /// `get_row_size`: product of `upper-lower+1` per dimension, zero if
    /// any dimension is empty.
    pub fn row_size(tuples: &[Tuple]) -> i64 {
        if tuples.iter().any(|t| t.len() == 0) {
            return 0;
        }
        tuples.iter().map(|t| t.len()).product()
    }

    /// Address formula:
    /// `base + ((Σ span_k·(i_k−shift_k)) + slice_offset)·elem_size + field_offset`.
    /// Returns the element index within `elements` (the `elem_size`
    /// multiplication/`base`/`field_offset` addition is left to the
    /// caller, which indexes `ValueCell`s rather than raw bytes).
    pub fn index_of(&self, indices: &[i64]) -> Result<i64, super::RowError> {
        if indices.len() != self.tuples.len() {
            return Err(super::RowError::DimensionMismatch);
        }
        let mut acc: i64 = 0;
        for (tuple, &i) in self.tuples.iter().zip(indices) {
            if !tuple.contains(i) {
                return Err(super::RowError::OutOfBounds { index: i, lower: tuple.lower, upper: tuple.upper });
            }
            acc += tuple.span * (i - tuple.shift);
        }
        Ok(acc + self.slice_offset)
    }
}

/// A distinct iteration-state object over a descriptor's index space, so
/// two walks over the same descriptor never share cursor state
/// (kept out of the descriptor itself, see the comment above).
#[derive(Debug, Clone)]
pub struct RowIter<'a> {
    tuples: &'a [Tuple],
    cursor: Option<Vec<i64>>,
}

impl<'a> RowIter<'a> {
    pub fn new(tuples: &'a [Tuple]) -> Self {
        let start = if tuples.iter().any(|t| t.len() == 0) {
            None
        } else {
            Some(tuples.iter().map(|t| t.lower).collect())
        };
        Self { tuples, cursor: start }
    }
}

impl<'a> Iterator for RowIter<'a> {
    type Item = Vec<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor.clone()?;
        // Increment from the innermost dimension, wrapping to the lower
        // bound on carry.
        let mut carry = true;
        if let Some(cursor) = &mut self.cursor {
            for (k, tuple) in self.tuples.iter().enumerate().rev() {
                if !carry {
                    break;
                }
                cursor[k] += 1;
                if cursor[k] > tuple.upper {
                    cursor[k] = tuple.lower;
                } else {
                    carry = false;
                }
            }
        }
        if carry {
            self.cursor = None;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_size_is_product_of_extents() {
        let tuples = vec![Tuple::new(1, 3, 1), Tuple::new(1, 2, 3)];
        assert_eq!(RowDescriptor::row_size(&tuples), 6);
    }

    #[test]
    fn row_size_zero_when_any_dimension_empty() {
        let tuples = vec![Tuple::new(1, 0, 1), Tuple::new(1, 2, 1)];
        assert_eq!(RowDescriptor::row_size(&tuples), 0);
    }

    #[test]
    fn iteration_visits_every_multi_index_in_order() {
        let tuples = vec![Tuple::new(1, 2, 2), Tuple::new(1, 2, 1)];
        let all: Vec<_> = RowIter::new(&tuples).collect();
        assert_eq!(all, vec![vec![1, 1], vec![1, 2], vec![2, 1], vec![2, 2]]);
    }
}
