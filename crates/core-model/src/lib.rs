//! Shared data model consumed by the execution core: the syntax tree
//! (`Node`), the type system (`Mode`), declared-name bookkeeping (`Tag`,
//! `SymbolTable`), and the id newtypes every other crate in the workspace
//! addresses storage by.
//!
//! Nothing here owns a heap or a stack. `core-heap` and `core-runtime` own
//! the arrays that `HandleId` / `FrameId` index into; this crate only
//! defines the id types and the value shapes that flow between them, so
//! that the dependency graph stays acyclic (model -> {heap, runtime, ...}).

mod ids;
mod mode;
mod node;
mod tag;
mod value;

pub use ids::{FrameId, HandleId, ModeId, NativeId, NodeId, SymbolTableId, TagId};
pub use mode::{Mode, ModeArena, ModeKind};
pub use node::{Attribute, ConstantCacheSlot, Literal, Node, NodeArena};
pub use tag::{AllocClass, ScopeBinding, SymbolTable, SymbolTableArena, Tag, TagClass};
pub use value::{FormatValue, ProcValue, RefValue, Segment, Status, ValueCell, ValueData};

/// Everything a parser/mode-checker collaborator hands the core: an arena
/// of nodes, an arena of modes, and the symbol-table/tag forest binding
/// declared names to storage.
#[derive(Debug, Default)]
pub struct NodeTree {
    pub nodes: NodeArena,
    pub modes: ModeArena,
    pub symbols: SymbolTableArena,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }
}
