//! Arena-index id newtypes.
//!
//! Every cross-reference in the model (child/sibling links, mode
//! references, frame addresses, heap references) is an index into some
//! `Vec`, never a raw pointer. That's the concrete form the "no cached raw
//! pointers across allocation points" rule takes in a systems language
//! (see the heap/frame re-architecture notes).

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                $name(v as u32)
            }
        }
    };
}

arena_id!(NodeId);
arena_id!(ModeId);
arena_id!(TagId);
arena_id!(SymbolTableId);
/// Index into a `core-heap` `Heap`'s slot table. Carries a generation so a
/// stale reference into a reclaimed-and-reused slot is detected instead of
/// silently aliasing unrelated memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    pub slot: u32,
    pub generation: u32,
}

/// Index into a `core-runtime` frame stack.
arena_id!(FrameId);

/// Index into a `core-natives` procedure registry.
arena_id!(NativeId);
