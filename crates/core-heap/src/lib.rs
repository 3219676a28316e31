//! Heap & handle pool.
//!
//! Objects are addressed by a generational `HandleId`, never by raw
//! pointer: `base(handle)` is looked up fresh on every dereference, so a
//! relocating/compacting collector (or, here, simple slot reuse) never
//! invalidates a reference held across an allocation point. A slot's
//! generation bumps on reclaim, so a `HandleId` captured before a sweep
//! that reused its slot is detected as stale rather than silently
//! aliasing the new occupant.

use std::collections::HashSet;

use core_model::{HandleId, ModeId, ValueCell, ValueData};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeapError {
    #[error("heap exhausted after sweep")]
    OutOfCore,
    #[error("handle is stale or was already reclaimed")]
    StaleHandle,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    live: bool,
    mode: Option<ModeId>,
    cells: Vec<ValueCell>,
}

/// Allocate, track, and reclaim arbitrary-sized objects behind stable
/// handles, with mark-sweep reclamation gated by a caller-supplied root
/// set.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    protect: HashSet<HandleId>,
    /// `garbage_sema`: >0 suppresses sweeps during critical sections where
    /// a half-built composite would otherwise be swept out from under its
    /// builder (row construction, deep copy).
    garbage_sema: u32,
    /// Soft cap on total live `ValueCell` slots across the heap, simulating
    /// the fixed arena a real allocator would exhaust. `None` = unbounded.
    budget_cells: Option<usize>,
}

impl Heap {
    pub fn new(budget_cells: Option<usize>) -> Self {
        Self { budget_cells, ..Default::default() }
    }

    pub fn up_garbage_sema(&mut self) {
        self.garbage_sema += 1;
    }

    pub fn down_garbage_sema(&mut self) {
        self.garbage_sema = self.garbage_sema.saturating_sub(1);
    }

    pub fn sweeps_inhibited(&self) -> bool {
        self.garbage_sema > 0
    }

    fn live_cell_count(&self) -> usize {
        self.slots.iter().filter(|s| s.live).map(|s| s.cells.len()).sum()
    }

    /// Reserve `len` value-cell slots, recording `mode` for diagnostics
    /// and sweep bookkeeping. The block's cells start uninitialised.
    ///
    /// This is the low-level primitive: it does not itself retry after a
    /// sweep. `Heap` has no notion of GC roots (those live in the
    /// evaluation stack and frame locals, owned above this crate), so a
    /// caller that wants "attempt a sweep, then retry once" on
    /// `OutOfCore` has to drive that itself with its own root set — see
    /// `core-eval`'s allocation wrapper.
    pub fn allocate(&mut self, mode: Option<ModeId>, len: usize) -> Result<HandleId, HeapError> {
        if let Some(budget) = self.budget_cells {
            if self.live_cell_count() + len > budget {
                return Err(HeapError::OutOfCore);
            }
        }
        let cells = vec![ValueCell::uninitialised(ValueData::Void); len];
        if let Some(slot_idx) = self.free.pop() {
            let slot = &mut self.slots[slot_idx as usize];
            slot.generation += 1;
            slot.live = true;
            slot.mode = mode;
            slot.cells = cells;
            Ok(HandleId { slot: slot_idx, generation: slot.generation })
        } else {
            let slot_idx = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, live: true, mode, cells });
            Ok(HandleId { slot: slot_idx, generation: 0 })
        }
    }

    fn resolve(&self, handle: HandleId) -> Result<&Slot, HeapError> {
        let slot = self.slots.get(handle.slot as usize).ok_or(HeapError::StaleHandle)?;
        if !slot.live || slot.generation != handle.generation {
            return Err(HeapError::StaleHandle);
        }
        Ok(slot)
    }

    fn resolve_mut(&mut self, handle: HandleId) -> Result<&mut Slot, HeapError> {
        let generation = handle.generation;
        let slot = self.slots.get_mut(handle.slot as usize).ok_or(HeapError::StaleHandle)?;
        if !slot.live || slot.generation != generation {
            return Err(HeapError::StaleHandle);
        }
        Ok(slot)
    }

    pub fn read(&self, handle: HandleId, offset: usize) -> Result<ValueCell, HeapError> {
        let slot = self.resolve(handle)?;
        slot.cells.get(offset).copied().ok_or(HeapError::StaleHandle)
    }

    pub fn write(&mut self, handle: HandleId, offset: usize, value: ValueCell) -> Result<(), HeapError> {
        let slot = self.resolve_mut(handle)?;
        let cell = slot.cells.get_mut(offset).ok_or(HeapError::StaleHandle)?;
        *cell = value;
        Ok(())
    }

    pub fn cells(&self, handle: HandleId) -> Result<&[ValueCell], HeapError> {
        Ok(&self.resolve(handle)?.cells)
    }

    pub fn cells_mut(&mut self, handle: HandleId) -> Result<&mut Vec<ValueCell>, HeapError> {
        Ok(&mut self.resolve_mut(handle)?.cells)
    }

    pub fn mode_of(&self, handle: HandleId) -> Result<Option<ModeId>, HeapError> {
        Ok(self.resolve(handle)?.mode)
    }

    pub fn protect(&mut self, handle: HandleId) {
        self.protect.insert(handle);
    }

    pub fn unprotect(&mut self, handle: HandleId) {
        self.protect.remove(&handle);
    }

    /// Raise `garbage_sema` for the lifetime of the returned guard,
    /// lowering it again on drop even if the critical section returns
    /// early through `?`.
    pub fn inhibit_sweeps(&mut self) -> GarbageSemaGuard<'_> {
        self.up_garbage_sema();
        GarbageSemaGuard { heap: self }
    }

    /// Mark from `roots` (plus the protect set) and reclaim unmarked
    /// slots, returning how many were reclaimed. A no-op while
    /// `garbage_sema` is raised.
    ///
    /// `extra_edges(h)` is consulted for every marked handle and lets a
    /// caller-owned side table (a row header's element block, say) widen
    /// reachability past what a slot's own `cells` can express.
    pub fn sweep<'a>(
        &mut self,
        roots: impl IntoIterator<Item = &'a ValueCell>,
        mut extra_edges: impl FnMut(HandleId) -> Vec<HandleId>,
    ) -> usize {
        if self.sweeps_inhibited() {
            tracing::trace!("sweep skipped: garbage_sema raised");
            return 0;
        }
        let mut marked = vec![false; self.slots.len()];
        let mut worklist: Vec<HandleId> = self.protect.iter().copied().collect();
        for cell in roots {
            if let Some(h) = handle_of(cell) {
                worklist.push(h);
            }
        }
        while let Some(h) = worklist.pop() {
            if h.slot as usize >= marked.len() || marked[h.slot as usize] {
                continue;
            }
            let Ok(slot) = self.resolve(h) else { continue };
            marked[h.slot as usize] = true;
            for cell in &slot.cells {
                if let Some(child) = handle_of(cell) {
                    worklist.push(child);
                }
            }
            worklist.extend(extra_edges(h));
        }
        let mut reclaimed = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.live && !marked[idx] {
                slot.live = false;
                slot.cells.clear();
                self.free.push(idx as u32);
                reclaimed += 1;
            }
        }
        tracing::debug!(reclaimed, "heap sweep complete");
        reclaimed
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }
}

/// RAII handle returned by [`Heap::inhibit_sweeps`]; derefs to the
/// underlying heap so callers can keep allocating/reading/writing through
/// it without re-borrowing.
pub struct GarbageSemaGuard<'a> {
    heap: &'a mut Heap,
}

impl std::ops::Deref for GarbageSemaGuard<'_> {
    type Target = Heap;

    fn deref(&self) -> &Heap {
        self.heap
    }
}

impl std::ops::DerefMut for GarbageSemaGuard<'_> {
    fn deref_mut(&mut self) -> &mut Heap {
        self.heap
    }
}

impl Drop for GarbageSemaGuard<'_> {
    fn drop(&mut self) {
        self.heap.down_garbage_sema();
    }
}

fn handle_of(cell: &ValueCell) -> Option<HandleId> {
    match cell.data {
        ValueData::Ref(r) if r.handle.is_some() => r.handle,
        ValueData::Mp(h) => Some(h),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::{RefValue, Segment};

    #[test]
    fn sweep_reclaims_unreachable_blocks() {
        let mut heap = Heap::default();
        let a = heap.allocate(None, 1).unwrap();
        let _b = heap.allocate(None, 1).unwrap();
        let root = ValueCell::reference(RefValue::heap(a, 0));
        let reclaimed = heap.sweep(std::iter::once(&root), |_| Vec::new());
        assert_eq!(reclaimed, 1);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn protect_keeps_a_block_alive_without_a_root() {
        let mut heap = Heap::default();
        let a = heap.allocate(None, 1).unwrap();
        heap.protect(a);
        let reclaimed = heap.sweep(std::iter::empty(), |_| Vec::new());
        assert_eq!(reclaimed, 0);
        heap.unprotect(a);
        let reclaimed = heap.sweep(std::iter::empty(), |_| Vec::new());
        assert_eq!(reclaimed, 1);
    }

    #[test]
    fn garbage_sema_inhibits_sweep() {
        let mut heap = Heap::default();
        let _a = heap.allocate(None, 1).unwrap();
        heap.up_garbage_sema();
        assert_eq!(heap.sweep(std::iter::empty(), |_| Vec::new()), 0);
        heap.down_garbage_sema();
        assert_eq!(heap.sweep(std::iter::empty(), |_| Vec::new()), 1);
    }

    #[test]
    fn stale_handle_after_reclaim_and_reuse_is_detected() {
        let mut heap = Heap::default();
        let a = heap.allocate(None, 1).unwrap();
        heap.sweep(std::iter::empty(), |_| Vec::new());
        let b = heap.allocate(None, 1).unwrap();
        assert_eq!(a.slot, b.slot);
        assert_ne!(a.generation, b.generation);
        assert_eq!(heap.read(a, 0), Err(HeapError::StaleHandle));
        assert!(heap.read(b, 0).is_ok());
    }

    #[test]
    fn allocate_fails_when_budget_exhausted() {
        let mut heap = Heap::new(Some(4));
        heap.allocate(None, 3).unwrap();
        assert_eq!(heap.allocate(None, 2), Err(HeapError::OutOfCore));
    }

    #[test]
    fn sweep_follows_nested_heap_references() {
        let mut heap = Heap::default();
        let inner = heap.allocate(None, 1).unwrap();
        let outer = heap.allocate(None, 1).unwrap();
        heap.write(outer, 0, ValueCell::reference(RefValue::heap(inner, 0))).unwrap();
        let root = ValueCell::reference(RefValue::heap(outer, 0));
        let reclaimed = heap.sweep(std::iter::once(&root), |_| Vec::new());
        assert_eq!(reclaimed, 0);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn sweep_follows_extra_edges_into_a_side_table() {
        let mut heap = Heap::default();
        let header = heap.allocate(None, 0).unwrap();
        let elements = heap.allocate(None, 1).unwrap();
        let root = ValueCell::reference(RefValue::heap(header, 0));
        let reclaimed = heap.sweep(std::iter::once(&root), |h| if h == header { vec![elements] } else { Vec::new() });
        assert_eq!(reclaimed, 0);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn inhibit_sweeps_guard_lowers_sema_even_on_early_return() {
        let mut heap = Heap::default();
        fn fallible(heap: &mut Heap) -> Result<(), HeapError> {
            let mut guard = heap.inhibit_sweeps();
            let _ = guard.allocate(None, 1)?;
            Err(HeapError::StaleHandle)
        }
        assert!(fallible(&mut heap).is_err());
        assert!(!heap.sweeps_inhibited());
    }
}
