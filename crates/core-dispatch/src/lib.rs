//! Propagator specialization / dispatch cache.
//!
//! A node's `propagator.unit` is not a function pointer stored on the
//! node (that would mean mutating shared, possibly-aliased tree storage
//! on every first execution); instead it is a side table from `NodeId` to
//! `PropagatorId`, installed lazily the first time a node is dispatched
//! and consulted directly thereafter. `core-eval` owns translating a
//! `PropagatorId` into the actual evaluation step; this crate only
//! decides, from static facts about the node and its current lexical
//! context, which specialization applies.

use std::collections::HashMap;

use core_model::{Attribute, NodeArena, NodeId, SymbolTableArena};

/// The generic (unspecialized) dispatch, one per `Attribute` shape. Every
/// node starts here; `specialize` may upgrade it to a faster variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericKind {
    Identifier,
    Denotation,
    Nihil,
    Skip,
    Formula,
    MonadicFormula,
    Call,
    Slice,
    Selection,
    Assignation,
    IdentityDeclaration,
    VariableDeclaration,
    RoutineText,
    FormatText,
    Generator,
    ClosedClause,
    CollateralClause,
    Conditional,
    IntegerCase,
    UnitedCase,
    Loop,
    Jump,
    LabeledUnit,
    Assert,
    Dereferencing,
    Deproceduring,
    Uniting,
    Widening,
    Rowing,
    Voiding,
    Proceduring,
}

fn classify(attribute: &Attribute) -> GenericKind {
    match attribute {
        Attribute::Identifier(_) => GenericKind::Identifier,
        Attribute::Denotation(_) => GenericKind::Denotation,
        Attribute::Nihil => GenericKind::Nihil,
        Attribute::Skip => GenericKind::Skip,
        Attribute::Formula { .. } => GenericKind::Formula,
        Attribute::MonadicFormula { .. } => GenericKind::MonadicFormula,
        Attribute::Call { .. } => GenericKind::Call,
        Attribute::Slice { .. } => GenericKind::Slice,
        Attribute::Selection { .. } => GenericKind::Selection,
        Attribute::Assignation { .. } => GenericKind::Assignation,
        Attribute::IdentityDeclaration { .. } => GenericKind::IdentityDeclaration,
        Attribute::VariableDeclaration { .. } => GenericKind::VariableDeclaration,
        Attribute::RoutineText { .. } => GenericKind::RoutineText,
        Attribute::FormatText { .. } => GenericKind::FormatText,
        Attribute::Generator { .. } => GenericKind::Generator,
        Attribute::ClosedClause { .. } => GenericKind::ClosedClause,
        Attribute::CollateralClause { .. } => GenericKind::CollateralClause,
        Attribute::Conditional { .. } => GenericKind::Conditional,
        Attribute::IntegerCase { .. } => GenericKind::IntegerCase,
        Attribute::UnitedCase { .. } => GenericKind::UnitedCase,
        Attribute::Loop { .. } => GenericKind::Loop,
        Attribute::Jump { .. } => GenericKind::Jump,
        Attribute::LabeledUnit { .. } => GenericKind::LabeledUnit,
        Attribute::Assert { .. } => GenericKind::Assert,
        Attribute::Dereferencing(_) => GenericKind::Dereferencing,
        Attribute::Deproceduring(_) => GenericKind::Deproceduring,
        Attribute::Uniting(_) => GenericKind::Uniting,
        Attribute::Widening(_) => GenericKind::Widening,
        Attribute::Rowing(_) => GenericKind::Rowing,
        Attribute::Voiding(_) => GenericKind::Voiding,
        Attribute::Proceduring(_) => GenericKind::Proceduring,
    }
}

/// The named propagator specializations, plus the generic fallback.
/// Every specialized variant is required to be observationally equivalent
/// to dispatching the generic one for the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropagatorId {
    Generic(GenericKind),
    DereferenceQuick,
    LocalIdentifier,
    CallStandEnvQuick,
    FormulaStandEnvQuick,
    SliceNameQuick,
    Constant,
    WideningIntToReal,
    VoidingLocAssignation,
}

/// The `NodeId -> PropagatorId` side table.
#[derive(Debug, Default)]
pub struct DispatchCache {
    table: HashMap<NodeId, PropagatorId>,
}

impl DispatchCache {
    /// Return the installed propagator for `node`, specializing and
    /// caching it on first dispatch.
    pub fn dispatch(&mut self, nodes: &NodeArena, tags: &SymbolTableArena, current_level: u32, node: NodeId) -> PropagatorId {
        if let Some(&id) = self.table.get(&node) {
            return id;
        }
        let id = specialize(nodes, tags, current_level, node);
        tracing::trace!(?node, ?id, "propagator installed");
        self.table.insert(node, id);
        id
    }

    /// Drop a cached dispatch so the next call to `dispatch` re-derives
    /// it — used when a precondition a specialization depended on has
    /// since changed (e.g. a node re-entered at a different lexical
    /// level after being hoisted into a shared routine body).
    pub fn invalidate(&mut self, node: NodeId) {
        self.table.remove(&node);
    }

    pub fn installed(&self, node: NodeId) -> Option<PropagatorId> {
        self.table.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn specialize(nodes: &NodeArena, tags: &SymbolTableArena, current_level: u32, node: NodeId) -> PropagatorId {
    let attribute = &nodes.get(node).attribute;
    let generic = classify(attribute);
    match attribute {
        Attribute::Identifier(tag) => {
            let t = tags.tag(*tag);
            if t.native.is_none() && tags.table(t.symbol_table).level == current_level {
                PropagatorId::LocalIdentifier
            } else {
                PropagatorId::Generic(generic)
            }
        }
        Attribute::Denotation(_) => PropagatorId::Constant,
        Attribute::Dereferencing(_) => PropagatorId::DereferenceQuick,
        Attribute::Widening(_) => PropagatorId::WideningIntToReal,
        Attribute::Call { procedure, .. } => {
            if is_native_identifier(nodes, tags, *procedure) {
                PropagatorId::CallStandEnvQuick
            } else {
                PropagatorId::Generic(generic)
            }
        }
        Attribute::Formula { operator, .. } => {
            if tags.tag(*operator).native.is_some() {
                PropagatorId::FormulaStandEnvQuick
            } else {
                PropagatorId::Generic(generic)
            }
        }
        Attribute::Slice { subscripts, .. } if subscripts.len() == 1 => PropagatorId::SliceNameQuick,
        Attribute::Voiding(inner) if matches!(nodes.get(*inner).attribute, Attribute::Assignation { .. }) => {
            PropagatorId::VoidingLocAssignation
        }
        _ => PropagatorId::Generic(generic),
    }
}

fn is_native_identifier(nodes: &NodeArena, tags: &SymbolTableArena, node: NodeId) -> bool {
    match &nodes.get(node).attribute {
        Attribute::Identifier(tag) => tags.tag(*tag).native.is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::{Literal, ModeId, Node, NativeId, Tag, TagClass};

    fn fresh() -> (NodeArena, SymbolTableArena) {
        (NodeArena::default(), SymbolTableArena::default())
    }

    #[test]
    fn local_identifier_at_current_level_specializes() {
        let (mut nodes, mut tags) = fresh();
        let table = tags.new_table(None);
        let tag = tags.declare(table, Tag::new("x", TagClass::Identifier, table, ModeId(0)));
        let node = nodes.push(Node::new(Attribute::Identifier(tag), 1));

        let mut cache = DispatchCache::default();
        let id = cache.dispatch(&nodes, &tags, 0, node);
        assert_eq!(id, PropagatorId::LocalIdentifier);
    }

    #[test]
    fn non_local_identifier_stays_generic() {
        let (mut nodes, mut tags) = fresh();
        let outer = tags.new_table(None);
        let inner = tags.new_table(Some(outer));
        let tag = tags.declare(outer, Tag::new("x", TagClass::Identifier, outer, ModeId(0)));
        let node = nodes.push(Node::new(Attribute::Identifier(tag), 1));

        let mut cache = DispatchCache::default();
        let level = tags.table(inner).level;
        let id = cache.dispatch(&nodes, &tags, level, node);
        assert_eq!(id, PropagatorId::Generic(GenericKind::Identifier));
    }

    #[test]
    fn native_operator_formula_specializes_to_stand_env_quick() {
        let (mut nodes, mut tags) = fresh();
        let table = tags.new_table(None);
        let mut plus = Tag::new("+", TagClass::Operator, table, ModeId(0));
        plus.native = Some(NativeId(0));
        let op = tags.declare(table, plus);
        let lhs = nodes.push(Node::new(Attribute::Denotation(Literal::Int(1)), 1));
        let rhs = nodes.push(Node::new(Attribute::Denotation(Literal::Int(2)), 1));
        let node = nodes.push(Node::new(Attribute::Formula { operator: op, lhs, rhs }, 1));

        let mut cache = DispatchCache::default();
        let id = cache.dispatch(&nodes, &tags, 0, node);
        assert_eq!(id, PropagatorId::FormulaStandEnvQuick);
    }

    #[test]
    fn dispatch_is_memoized_across_calls() {
        let (mut nodes, tags) = fresh();
        let node = nodes.push(Node::new(Attribute::Denotation(Literal::Int(7)), 1));
        let mut cache = DispatchCache::default();
        assert!(cache.installed(node).is_none());
        let first = cache.dispatch(&nodes, &tags, 0, node);
        assert_eq!(first, PropagatorId::Constant);
        assert_eq!(cache.installed(node), Some(PropagatorId::Constant));
        assert_eq!(cache.len(), 1);
        let second = cache.dispatch(&nodes, &tags, 0, node);
        assert_eq!(second, first);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_forces_respecialization() {
        let (mut nodes, tags) = fresh();
        let node = nodes.push(Node::new(Attribute::Denotation(Literal::Int(1)), 1));
        let mut cache = DispatchCache::default();
        cache.dispatch(&nodes, &tags, 0, node);
        cache.invalidate(node);
        assert!(cache.installed(node).is_none());
        assert!(cache.is_empty());
    }
}
