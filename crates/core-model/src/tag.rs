use std::cell::Cell;

use crate::ids::{ModeId, NativeId, NodeId, SymbolTableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Identifier,
    Operator,
    Priority,
    Indicant,
    Label,
    AnonymousRoutineText,
    AnonymousFormatText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocClass {
    Local,
    Heap,
}

/// The scope level bound to a tag by the static scope checker
/// (`core-scope`), plus whether that binding has stabilized in the
/// fixed-point loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeBinding {
    pub level: Option<u32>,
    pub transient: bool,
    pub assigned: bool,
}

/// A declared identifier/operator/label binding.
#[derive(Debug)]
pub struct Tag {
    pub name: String,
    pub class: TagClass,
    pub symbol_table: SymbolTableId,
    pub mode: ModeId,
    pub defining_node: Option<NodeId>,
    pub offset: usize,
    pub alloc_class: AllocClass,
    pub scope: Cell<ScopeBinding>,
    pub priority: Option<u8>,
    /// Set for stand-environ (prelude) procedures/operators: an index into
    /// `core-natives`'s registry rather than a routine-text node.
    pub native: Option<NativeId>,
}

impl Tag {
    pub fn new(
        name: impl Into<String>,
        class: TagClass,
        symbol_table: SymbolTableId,
        mode: ModeId,
    ) -> Self {
        Self {
            name: name.into(),
            class,
            symbol_table,
            mode,
            defining_node: None,
            offset: 0,
            alloc_class: AllocClass::Local,
            scope: Cell::new(ScopeBinding::default()),
            priority: None,
            native: None,
        }
    }
}

/// One lexical level's ordered tag chain, by class.
#[derive(Debug)]
pub struct SymbolTable {
    pub id: SymbolTableId,
    pub parent: Option<SymbolTableId>,
    pub level: u32,
    pub identifiers: Vec<crate::ids::TagId>,
    pub operators: Vec<crate::ids::TagId>,
    pub priorities: Vec<crate::ids::TagId>,
    pub indicants: Vec<crate::ids::TagId>,
    pub labels: Vec<crate::ids::TagId>,
    pub anonymous: Vec<crate::ids::TagId>,
    /// Cumulative local allocation size for this level, grown as
    /// declarations are bound; frames are sized from this.
    pub ap_increment: Cell<usize>,
}

impl SymbolTable {
    fn new(id: SymbolTableId, parent: Option<SymbolTableId>, level: u32) -> Self {
        Self {
            id,
            parent,
            level,
            identifiers: Vec::new(),
            operators: Vec::new(),
            priorities: Vec::new(),
            indicants: Vec::new(),
            labels: Vec::new(),
            anonymous: Vec::new(),
            ap_increment: Cell::new(0),
        }
    }

    pub fn bucket_mut(&mut self, class: TagClass) -> &mut Vec<crate::ids::TagId> {
        match class {
            TagClass::Identifier => &mut self.identifiers,
            TagClass::Operator => &mut self.operators,
            TagClass::Priority => &mut self.priorities,
            TagClass::Indicant => &mut self.indicants,
            TagClass::Label => &mut self.labels,
            TagClass::AnonymousRoutineText | TagClass::AnonymousFormatText => &mut self.anonymous,
        }
    }
}

/// Owning arena of symbol tables and the tags declared in them.
#[derive(Debug, Default)]
pub struct SymbolTableArena {
    tables: Vec<SymbolTable>,
    tags: Vec<Tag>,
}

impl SymbolTableArena {
    pub fn new_table(&mut self, parent: Option<SymbolTableId>) -> SymbolTableId {
        let level = parent.map(|p| self.tables[p.index()].level + 1).unwrap_or(0);
        let id = SymbolTableId(self.tables.len() as u32);
        self.tables.push(SymbolTable::new(id, parent, level));
        id
    }

    pub fn table(&self, id: SymbolTableId) -> &SymbolTable {
        &self.tables[id.index()]
    }

    pub fn table_mut(&mut self, id: SymbolTableId) -> &mut SymbolTable {
        &mut self.tables[id.index()]
    }

    pub fn declare(&mut self, table: SymbolTableId, mut tag: Tag) -> crate::ids::TagId {
        tag.symbol_table = table;
        let id = crate::ids::TagId(self.tags.len() as u32);
        self.tags.push(tag);
        self.tables[table.index()].bucket_mut(self.tags[id.index()].class).push(id);
        id
    }

    pub fn tag(&self, id: crate::ids::TagId) -> &Tag {
        &self.tags[id.index()]
    }

    pub fn tag_mut(&mut self, id: crate::ids::TagId) -> &mut Tag {
        &mut self.tags[id.index()]
    }

    pub fn len_tables(&self) -> usize {
        self.tables.len()
    }

    /// Walk a table's parent chain looking for a declared tag by name and
    /// class — the compile-time analogue of frame descent used by the
    /// scope checker and by identifier-node specialization.
    pub fn lookup(&self, from: SymbolTableId, class: TagClass, name: &str) -> Option<crate::ids::TagId> {
        let mut cur = Some(from);
        while let Some(t) = cur {
            let table = &self.tables[t.index()];
            let bucket = match class {
                TagClass::Identifier => &table.identifiers,
                TagClass::Operator => &table.operators,
                TagClass::Priority => &table.priorities,
                TagClass::Indicant => &table.indicants,
                TagClass::Label => &table.labels,
                TagClass::AnonymousRoutineText | TagClass::AnonymousFormatText => &table.anonymous,
            };
            if let Some(found) = bucket.iter().find(|id| self.tags[id.index()].name == name) {
                return Some(*found);
            }
            cur = table.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ModeId;

    #[test]
    fn declare_and_lookup_through_parent() {
        let mut arena = SymbolTableArena::default();
        let outer = arena.new_table(None);
        let inner = arena.new_table(Some(outer));
        let tag = Tag::new("x", TagClass::Identifier, outer, ModeId(0));
        let tag_id = arena.declare(outer, tag);
        assert_eq!(arena.lookup(inner, TagClass::Identifier, "x"), Some(tag_id));
        assert_eq!(arena.lookup(inner, TagClass::Identifier, "y"), None);
    }

    #[test]
    fn levels_increase_with_nesting() {
        let mut arena = SymbolTableArena::default();
        let outer = arena.new_table(None);
        let inner = arena.new_table(Some(outer));
        assert_eq!(arena.table(outer).level, 0);
        assert_eq!(arena.table(inner).level, 1);
    }
}
