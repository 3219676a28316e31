use crate::ids::ModeId;

/// The tagged shape of a mode, mirroring the source language's type
/// grammar. `Row`/`FlexRow` carry a dimension count rather than `dims`
/// nested `Row`s of dimension 1, matching how the descriptor in
/// `core-rows` addresses a single header with `d` tuples.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeKind {
    Int,
    Real,
    Bool,
    Char,
    Bits,
    Bytes,
    String,
    Format,
    File,
    Channel,
    Sema,
    Complex,
    Void,
    Ref(ModeId),
    Proc { params: Vec<ModeId>, result: ModeId },
    Struct(Vec<(String, ModeId)>),
    Union(Vec<ModeId>),
    Row { elem: ModeId, dims: usize },
    FlexRow { elem: ModeId, dims: usize },
    Long(ModeId),
    LongLong(ModeId),
}

/// A mode node plus the facts about it the evaluator/row-engine/scope
/// checker repeatedly need, precomputed once when the mode is interned.
#[derive(Debug, Clone)]
pub struct Mode {
    pub kind: ModeKind,
    pub dimensions: usize,
    pub size_bytes: usize,
    pub has_rows: bool,
    pub has_ref: bool,
    pub has_flex: bool,
    /// `ROW`/`FLEX ROW` equivalent one would get by slicing off `dims`
    /// subscripts less than `dimensions`; `None` for non-row modes.
    pub slice_mode: Option<ModeId>,
    /// The non-`FLEX` equivalent of a `FLEX ROW` mode (identity otherwise).
    pub deflexed_mode: Option<ModeId>,
    /// `REF` of this mode's slice mode — the mode a `name` of this row has.
    pub name_mode: Option<ModeId>,
    /// Canonical mode after mode equivalencing (identity unless this mode
    /// was found structurally equal to an earlier-interned one).
    pub equivalent: ModeId,
}

/// Owning arena of interned modes.
#[derive(Debug, Default)]
pub struct ModeArena {
    modes: Vec<Mode>,
}

impl ModeArena {
    pub fn get(&self, id: ModeId) -> &Mode {
        &self.modes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Intern a mode, computing its derived facts. Does not attempt real
    /// structural mode-equivalencing (a collaborator's job); `equivalent`
    /// defaults to the mode's own id unless set via `unify`.
    pub fn intern(&mut self, kind: ModeKind) -> ModeId {
        let size_bytes = self.size_of(&kind);
        let dimensions = match &kind {
            ModeKind::Row { dims, .. } | ModeKind::FlexRow { dims, .. } => *dims,
            _ => 0,
        };
        let has_ref = matches!(kind, ModeKind::Ref(_))
            || matches!(&kind, ModeKind::Struct(fields) if fields.iter().any(|(_, m)| self.get(*m).has_ref))
            || matches!(&kind, ModeKind::Union(alts) if alts.iter().any(|m| self.get(*m).has_ref));
        let has_rows = matches!(kind, ModeKind::Row { .. } | ModeKind::FlexRow { .. } | ModeKind::String)
            || matches!(&kind, ModeKind::Struct(fields) if fields.iter().any(|(_, m)| self.get(*m).has_rows))
            || matches!(&kind, ModeKind::Union(alts) if alts.iter().any(|m| self.get(*m).has_rows));
        let has_flex = matches!(kind, ModeKind::FlexRow { .. } | ModeKind::String)
            || matches!(&kind, ModeKind::Ref(m) if self.get(*m).has_flex);

        let id = ModeId(self.modes.len() as u32);
        self.modes.push(Mode {
            kind,
            dimensions,
            size_bytes,
            has_rows,
            has_ref,
            has_flex,
            slice_mode: None,
            deflexed_mode: None,
            name_mode: None,
            equivalent: id,
        });
        id
    }

    fn size_of(&self, kind: &ModeKind) -> usize {
        match kind {
            ModeKind::Int | ModeKind::Bits | ModeKind::Real => 8,
            ModeKind::Bool | ModeKind::Char => 1,
            ModeKind::Complex => 16,
            ModeKind::Sema => 8,
            ModeKind::Void => 0,
            ModeKind::Ref(_) | ModeKind::Proc { .. } | ModeKind::Format => 8,
            ModeKind::Bytes => 32,
            ModeKind::String | ModeKind::Row { .. } | ModeKind::FlexRow { .. } => 8, // header is a REF
            ModeKind::File | ModeKind::Channel => 16,
            ModeKind::Struct(fields) => fields.iter().map(|(_, m)| self.get(*m).size_bytes).sum(),
            ModeKind::Union(alts) => {
                8 + alts.iter().map(|m| self.get(*m).size_bytes).max().unwrap_or(0)
            }
            ModeKind::Long(m) | ModeKind::LongLong(m) => self.get(*m).size_bytes.max(8),
        }
    }

    /// Link a row mode to its slice/deflexed/name equivalents once those
    /// are known (they are themselves produced by `intern`, so this is a
    /// second pass rather than something `intern` can self-compute).
    pub fn link_row(&mut self, row: ModeId, slice: ModeId, deflexed: ModeId, name: ModeId) {
        let m = &mut self.modes[row.index()];
        m.slice_mode = Some(slice);
        m.deflexed_mode = Some(deflexed);
        m.name_mode = Some(name);
    }

    pub fn unify(&mut self, mode: ModeId, canonical: ModeId) {
        self.modes[mode.index()].equivalent = canonical;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_sizes_and_flags() {
        let mut arena = ModeArena::default();
        let int_m = arena.intern(ModeKind::Int);
        assert_eq!(arena.get(int_m).size_bytes, 8);
        assert!(!arena.get(int_m).has_rows);
    }

    #[test]
    fn row_of_struct_with_ref_propagates_flags() {
        let mut arena = ModeArena::default();
        let int_m = arena.intern(ModeKind::Int);
        let ref_int = arena.intern(ModeKind::Ref(int_m));
        let st = arena.intern(ModeKind::Struct(vec![("x".into(), ref_int)]));
        assert!(arena.get(st).has_ref);
        let row = arena.intern(ModeKind::Row { elem: st, dims: 1 });
        assert!(arena.get(row).has_rows);
    }

    #[test]
    fn flex_row_has_flex_flag() {
        let mut arena = ModeArena::default();
        let ch = arena.intern(ModeKind::Char);
        let flex = arena.intern(ModeKind::FlexRow { elem: ch, dims: 1 });
        assert!(arena.get(flex).has_flex);
    }
}
