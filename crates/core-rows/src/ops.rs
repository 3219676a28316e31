use std::collections::HashMap;

use core_heap::Heap;
use core_model::{HandleId, ModeId, ValueCell, ValueData};

use crate::descriptor::{RowDescriptor, Tuple};
use crate::RowError;

/// Owns the `HandleId -> RowDescriptor` side table. A row's `header`
/// handle is a zero-length heap allocation that exists purely to give the
/// row a stable identity a `REF ROW M` can name; its element storage is a
/// second, independently sized heap allocation the descriptor points at.
/// Splitting header identity from element storage is what lets a trim or
/// slice share another row's backing block without copying it.
#[derive(Debug, Default)]
pub struct RowArena {
    descriptors: HashMap<HandleId, RowDescriptor>,
}

impl RowArena {
    pub fn descriptor(&self, header: HandleId) -> Result<&RowDescriptor, RowError> {
        self.descriptors.get(&header).ok_or(RowError::UnknownHeader)
    }

    /// Extra reachability edges a header handle contributes beyond its own
    /// (empty) cell block: the backing `elements` block it points at. Fed
    /// into `Heap::sweep` so a reachable header keeps its element storage
    /// alive even though the link between them lives in this side table,
    /// not in any heap slot's own cells.
    pub fn heap_edges(&self, handle: HandleId) -> Vec<HandleId> {
        match self.descriptors.get(&handle) {
            Some(desc) => vec![desc.elements],
            None => Vec::new(),
        }
    }

    fn descriptor_mut(&mut self, header: HandleId) -> Result<&mut RowDescriptor, RowError> {
        self.descriptors.get_mut(&header).ok_or(RowError::UnknownHeader)
    }

    /// Allocate a new row: a header handle plus a freshly sized backing
    /// block, filled with uninitialised cells.
    pub fn make(
        &mut self,
        heap: &mut Heap,
        elem_mode: Option<ModeId>,
        tuples: Vec<Tuple>,
        transient: bool,
    ) -> Result<HandleId, RowError> {
        let size = RowDescriptor::row_size(&tuples).max(0) as usize;
        let elements = heap.allocate(elem_mode, size)?;
        let header = heap.allocate(elem_mode, 0)?;
        self.descriptors.insert(
            header,
            RowDescriptor { elem_mode, slice_offset: 0, field_offset: 0, elements, tuples, transient },
        );
        Ok(header)
    }

    pub fn get(&self, heap: &Heap, header: HandleId, indices: &[i64]) -> Result<ValueCell, RowError> {
        let desc = self.descriptor(header)?;
        let idx = desc.index_of(indices)?;
        Ok(heap.read(desc.elements, idx as usize)?)
    }

    pub fn set(&self, heap: &mut Heap, header: HandleId, indices: &[i64], value: ValueCell) -> Result<(), RowError> {
        let desc = self.descriptor(header)?;
        let idx = desc.index_of(indices)?;
        heap.write(desc.elements, idx as usize, value)?;
        Ok(())
    }

    /// Slice/trim: bounds-check each trimmer against the source tuples and
    /// produce a new descriptor sharing the source's element block with
    /// adjusted `shift`/`span`/bounds.
    pub fn trim(&mut self, heap: &mut Heap, source: HandleId, trims: &[(i64, i64)]) -> Result<HandleId, RowError> {
        let src = self.descriptor(source)?.clone();
        if trims.len() != src.tuples.len() {
            return Err(RowError::DimensionMismatch);
        }
        let mut new_tuples = Vec::with_capacity(trims.len());
        let mut extra_offset = 0i64;
        for (tuple, &(lo, hi)) in src.tuples.iter().zip(trims) {
            if lo < tuple.lower || hi > tuple.upper {
                return Err(RowError::OutOfBounds { index: lo.min(hi), lower: tuple.lower, upper: tuple.upper });
            }
            extra_offset += tuple.span * (lo - tuple.shift);
            new_tuples.push(Tuple { lower: lo, upper: hi, span: tuple.span, shift: lo });
        }
        self.view(
            heap,
            src.elem_mode,
            src.elements,
            src.slice_offset + extra_offset,
            src.field_offset,
            new_tuples,
            src.transient,
        )
    }

    /// Register a descriptor that aliases existing element storage
    /// (used by `trim` and single-dim `slice-name` propagators), under a
    /// freshly allocated header identity.
    pub fn view(
        &mut self,
        heap: &mut Heap,
        elem_mode: Option<ModeId>,
        elements: HandleId,
        slice_offset: i64,
        field_offset: usize,
        tuples: Vec<Tuple>,
        transient: bool,
    ) -> Result<HandleId, RowError> {
        let header = heap.allocate(elem_mode, 0)?;
        self.descriptors.insert(
            header,
            RowDescriptor { elem_mode, slice_offset, field_offset, elements, tuples, transient },
        );
        Ok(header)
    }

    /// Rowing coercion `A -> [] A`: wrap a single stack value as a
    /// 1-element descriptor (`ROW_OF_ROW`).
    pub fn row_of(&mut self, heap: &mut Heap, elem_mode: Option<ModeId>, value: ValueCell) -> Result<HandleId, RowError> {
        let header = self.make(heap, elem_mode, vec![Tuple::new(1, 1, 1)], false)?;
        let elements = self.descriptor(header)?.elements;
        heap.write(elements, 0, value)?;
        Ok(header)
    }

    /// Concatenation for collateral displays: `n` same-shaped rows (equal
    /// in every non-outermost dimension) become one descriptor with outer
    /// bound `[1:n]`. `n = 0` yields a vacuum `[1:0]` row.
    pub fn concatenate(&mut self, heap: &mut Heap, items: &[HandleId]) -> Result<HandleId, RowError> {
        if items.is_empty() {
            return self.make(heap, None, vec![Tuple::new(1, 0, 1)], false);
        }
        let first = self.descriptor(items[0])?.clone();
        for &item in &items[1..] {
            let other = self.descriptor(item)?;
            if other.tuples.len() != first.tuples.len()
                || other.tuples.iter().zip(&first.tuples).any(|(a, b)| a.len() != b.len())
            {
                return Err(RowError::DifferentBounds);
            }
        }
        let inner_size = RowDescriptor::row_size(&first.tuples).max(0) as usize;
        let n = items.len();
        let mut tuples = vec![Tuple::new(1, n as i64, inner_size.max(1) as i64)];
        tuples.extend(first.tuples.iter().map(|t| Tuple::new(t.lower, t.upper, t.span)));
        let header = self.make(heap, first.elem_mode, tuples, false)?;
        let dest_elements = self.descriptor(header)?.elements;
        for (slot, &item) in items.iter().enumerate() {
            let desc = self.descriptor(item)?.clone();
            for k in 0..inner_size {
                let v = heap.read(desc.elements, k)?;
                heap.write(dest_elements, slot * inner_size + k, v)?;
            }
        }
        Ok(header)
    }

    /// Deep copy a row: allocate new element storage the same extent as
    /// the source and copy element-by-element. Structured elements are
    /// not recursed into here (`core-eval`'s `genie_copy_stowed` walks
    /// `Mode` to decide when to recurse); this copies the flat cell
    /// sequence, which is correct for primitive element modes and is the
    /// base case recursive copy bottoms out on.
    pub fn deep_copy(&mut self, heap: &mut Heap, source: HandleId) -> Result<HandleId, RowError> {
        let mut heap = heap.inhibit_sweeps();
        let src = self.descriptor(source)?.clone();
        let size = RowDescriptor::row_size(&src.tuples).max(0) as usize;
        let new_elements = heap.allocate(src.elem_mode, size)?;
        for k in 0..size {
            let v = heap.read(src.elements, k)?;
            heap.write(new_elements, k, v)?;
        }
        let header = heap.allocate(src.elem_mode, 0)?;
        self.descriptors.insert(
            header,
            RowDescriptor { elem_mode: src.elem_mode, slice_offset: 0, field_offset: 0, elements: new_elements, tuples: src.tuples, transient: false },
        );
        Ok(header)
    }

    /// Deep assign `dst := src`: for a `FLEX` destination, reallocate the
    /// element block to the source's extent; for non-FLEX, the shapes
    /// must already match (`DifferentBounds` otherwise).
    pub fn deep_assign(&mut self, heap: &mut Heap, dst: HandleId, src: HandleId, dst_is_flex: bool) -> Result<(), RowError> {
        let mut heap = heap.inhibit_sweeps();
        let src_desc = self.descriptor(src)?.clone();
        let size = RowDescriptor::row_size(&src_desc.tuples).max(0) as usize;
        if dst_is_flex {
            let new_elements = heap.allocate(src_desc.elem_mode, size)?;
            for k in 0..size {
                let v = heap.read(src_desc.elements, k)?;
                heap.write(new_elements, k, v)?;
            }
            let dst_desc = self.descriptor_mut(dst)?;
            dst_desc.elements = new_elements;
            dst_desc.tuples = src_desc.tuples;
            dst_desc.slice_offset = 0;
        } else {
            let dst_desc = self.descriptor(dst)?.clone();
            if dst_desc.tuples.len() != src_desc.tuples.len()
                || dst_desc.tuples.iter().zip(&src_desc.tuples).any(|(a, b)| a.len() != b.len())
            {
                return Err(RowError::DifferentBounds);
            }
            for src_idx in crate::descriptor::RowIter::new(&src_desc.tuples) {
                let v = self.get(&heap, src, &src_idx)?;
                let dst_idx: Vec<i64> = src_idx
                    .iter()
                    .zip(src_desc.tuples.iter().zip(dst_desc.tuples.iter()))
                    .map(|(&i, (s, d))| d.lower + (i - s.lower))
                    .collect();
                self.set(&mut heap, dst, &dst_idx, v)?;
            }
        }
        Ok(())
    }
}

pub fn handle_to_ref(handle: HandleId) -> ValueCell {
    ValueCell::reference(core_model::RefValue::heap(handle, 0))
}

pub fn ref_handle(cell: &ValueCell) -> Option<HandleId> {
    match cell.data {
        ValueData::Ref(r) => r.handle,
        _ => None,
    }
}
