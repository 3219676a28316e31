//! Static scope checker.
//!
//! Runs once after mode-checking and before execution: infers a scope
//! (lexical level + transient flag) for every unit that may appear at the
//! right of an assignation or as the source of a stored reference, and
//! binds the youngest such scope to every identity/variable/routine/format
//! tag it touches. Tag bindings are read back by `core-eval` at runtime to
//! decide `ScopeViolationDynamic` for paths this static pass judged
//! ambiguous.

use core_diagnostics::{DiagArg, Kind, Severity, Sink};
use core_model::{Attribute, ModeArena, NodeArena, NodeId, ScopeBinding, SymbolTableArena, SymbolTableId, TagId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("static scope violations were reported")]
    Violations,
    #[error("scope fixed-point inference did not converge")]
    DidNotConverge,
}

/// `(level, transient?)`. Level `0` is primal
/// (outermost); scopes combine by keeping the largest (youngest) level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub level: u32,
    pub transient: bool,
}

impl Scope {
    pub const PRIMAL: Scope = Scope { level: 0, transient: false };

    pub fn combine(scopes: impl IntoIterator<Item = Scope>) -> Scope {
        scopes.into_iter().fold(Scope::PRIMAL, |acc, s| match s.level.cmp(&acc.level) {
            std::cmp::Ordering::Greater => s,
            std::cmp::Ordering::Equal => Scope { level: acc.level, transient: acc.transient || s.transient },
            std::cmp::Ordering::Less => acc,
        })
    }
}

/// Dyadic operators whose result is always primal even though their
/// operands are scope-checked at the current level: identity relations
/// and the short-circuit boolean connectives.
const PRIMAL_RESULT_OPERATORS: &[&str] = &["IS", "ISNT", "ANDF", "OREL"];

pub struct ScopeChecker<'a> {
    nodes: &'a NodeArena,
    modes: &'a ModeArena,
    tags: &'a SymbolTableArena,
    sink: &'a mut Sink,
    changed: bool,
}

impl<'a> ScopeChecker<'a> {
    pub fn new(nodes: &'a NodeArena, modes: &'a ModeArena, tags: &'a SymbolTableArena, sink: &'a mut Sink) -> Self {
        Self { nodes, modes, tags, sink, changed: false }
    }

    /// Run the fixed-point loop to convergence, reporting every strict
    /// violation encountered along the way.
    pub fn run(&mut self, root: NodeId, root_level: SymbolTableId) -> Result<(), ScopeError> {
        let cap = self.tags.len_tables().saturating_mul(4).max(8);
        let top = self.tags.table(root_level).level;
        for _ in 0..cap {
            self.changed = false;
            self.infer(root, top);
            if !self.changed {
                return if self.sink.has_fatal() { Err(ScopeError::Violations) } else { Ok(()) };
            }
        }
        tracing::warn!("scope fixed-point did not converge within iteration cap");
        Err(ScopeError::DidNotConverge)
    }

    fn infer(&mut self, node: NodeId, level: u32) -> Scope {
        let attribute = self.nodes.get(node).attribute.clone_shape();
        match attribute {
            NodeShape::Identifier(tag) => self.tag_scope(tag, level),
            NodeShape::Leaf => Scope::PRIMAL,
            NodeShape::Formula { operator, lhs, rhs } => {
                let l = self.infer(lhs, level);
                let r = self.infer(rhs, level);
                let name = &self.tags.tag(operator).name;
                if PRIMAL_RESULT_OPERATORS.contains(&name.as_str()) { Scope::PRIMAL } else { Scope::combine([l, r]) }
            }
            NodeShape::Monadic { operand, .. } => self.infer(operand, level),
            NodeShape::Call { procedure, args } => {
                let mut scopes = vec![self.infer(procedure, level)];
                scopes.extend(args.into_iter().map(|a| self.infer(a, level)));
                Scope::combine(scopes)
            }
            NodeShape::Slice { primary, subscripts } => {
                for s in subscripts {
                    self.infer(s, level);
                }
                let mut scope = self.infer(primary, level);
                if self.mode_has_flex(node) {
                    scope.transient = true;
                }
                scope
            }
            NodeShape::Selection { primary } => {
                let mut scope = self.infer(primary, level);
                if self.mode_has_flex(node) {
                    scope.transient = true;
                }
                scope
            }
            NodeShape::Assignation { dst, src } => {
                let d = self.infer(dst, level);
                let s = self.infer(src, level);
                self.check_assignation(node, level, d, s);
                d
            }
            NodeShape::IdentityDeclaration { tag, expr } => {
                let s = self.infer(expr, level);
                let decl_level = self.tags.table(self.tags.tag(tag).symbol_table).level;
                self.check_declaration(node, decl_level, s);
                self.bind_tag_scope(tag, s);
                Scope::PRIMAL
            }
            NodeShape::VariableDeclaration { tag, expr } => {
                let decl_level = self.tags.table(self.tags.tag(tag).symbol_table).level;
                let s = expr.map(|e| self.infer(e, level)).unwrap_or(Scope::PRIMAL);
                self.check_declaration(node, decl_level, s);
                self.bind_tag_scope(tag, Scope { level: decl_level, transient: false });
                Scope::PRIMAL
            }
            NodeShape::RoutineText { tag, body } => {
                let body_level = self.body_level(body, level);
                let s = self.free_capture_scope(body, body_level);
                self.infer(body, body_level);
                if let Some(t) = tag {
                    self.bind_tag_scope(t, s);
                }
                s
            }
            NodeShape::FormatText { tag } => {
                if let Some(t) = tag {
                    self.bind_tag_scope(t, Scope::PRIMAL);
                }
                Scope::PRIMAL
            }
            NodeShape::Generator { on_heap } => {
                if on_heap { Scope::PRIMAL } else { Scope { level, transient: false } }
            }
            NodeShape::ClosedClause { table, items } => {
                let inner = self.tags.table(table).level;
                let mut last = Scope::PRIMAL;
                for item in items {
                    last = self.infer(item, inner);
                }
                last
            }
            NodeShape::CollateralClause { items } => {
                let scopes: Vec<_> = items.into_iter().map(|i| self.infer(i, level)).collect();
                Scope::combine(scopes)
            }
            NodeShape::Conditional { arms, otherwise } => {
                let mut scopes = Vec::new();
                for (cond, body) in arms {
                    self.infer(cond, level);
                    scopes.push(self.infer(body, level));
                }
                if let Some(o) = otherwise {
                    scopes.push(self.infer(o, level));
                }
                Scope::combine(scopes)
            }
            NodeShape::Case { selector, arms, otherwise } => {
                self.infer(selector, level);
                let mut scopes: Vec<_> = arms.into_iter().map(|b| self.infer(b, level)).collect();
                if let Some(o) = otherwise {
                    scopes.push(self.infer(o, level));
                }
                Scope::combine(scopes)
            }
            NodeShape::Loop { table, from, by, to, while_clause, body } => {
                let inner = self.tags.table(table).level;
                for n in [from, by, to, while_clause].into_iter().flatten() {
                    self.infer(n, level);
                }
                self.infer(body, inner);
                Scope::PRIMAL
            }
            NodeShape::Unit(n) => self.infer(n, level),
        }
    }

    fn tag_scope(&self, tag: TagId, _level: u32) -> Scope {
        let t = self.tags.tag(tag);
        let binding = t.scope.get();
        let decl_level = self.tags.table(t.symbol_table).level;
        Scope { level: binding.level.unwrap_or(decl_level), transient: binding.transient }
    }

    fn bind_tag_scope(&mut self, tag: TagId, new: Scope) {
        let t = self.tags.tag(tag);
        let old = t.scope.get();
        let changed = old.level != Some(new.level) || old.transient != new.transient;
        if changed {
            t.scope.set(ScopeBinding { level: Some(new.level), transient: new.transient, assigned: true });
            self.changed = true;
        }
    }

    fn check_declaration(&mut self, node: NodeId, decl_level: u32, s: Scope) {
        if s.level > decl_level {
            let line = self.nodes.get(node).source_line;
            self.sink.report(Severity::Error, Some(node), line, Kind::ScopeViolationStatic, vec![DiagArg::Node(node)]);
        }
    }

    fn check_assignation(&mut self, node: NodeId, level: u32, dst: Scope, src: Scope) {
        let line = self.nodes.get(node).source_line;
        if src.level > dst.level {
            self.sink.report(Severity::Error, Some(node), line, Kind::ScopeViolationStatic, vec![DiagArg::Node(node)]);
        }
        if src.transient && dst.level < level {
            self.sink.report(Severity::Error, Some(node), line, Kind::TransientStored, vec![DiagArg::Node(node)]);
        }
    }

    fn mode_has_flex(&self, node: NodeId) -> bool {
        self.nodes.get(node).mode.is_some_and(|m| self.modes.get(m).has_flex)
    }

    fn body_level(&self, body: NodeId, outer_level: u32) -> u32 {
        match &self.nodes.get(body).attribute {
            Attribute::ClosedClause { level, .. } | Attribute::Loop { level, .. } => self.tags.table(*level).level,
            _ => outer_level + 1,
        }
    }

    /// A routine text's own scope binding — the scope bound to a routine's
    /// defining identifier is the youngest scope among identifiers it
    /// references that are declared *outside* its own body — free
    /// identifiers it captures into its closure environ, not whatever
    /// value its body happens to compute.
    fn free_capture_scope(&self, body: NodeId, body_level: u32) -> Scope {
        let mut seen = Vec::new();
        collect_identifiers(self.nodes, body, &mut seen);
        let scopes = seen.into_iter().filter_map(|tag| {
            let t = self.tags.tag(tag);
            let decl_level = self.tags.table(t.symbol_table).level;
            if decl_level < body_level {
                let binding = t.scope.get();
                Some(Scope { level: binding.level.unwrap_or(decl_level), transient: binding.transient })
            } else {
                None
            }
        });
        Scope::combine(scopes)
    }
}

fn collect_identifiers(nodes: &NodeArena, node: NodeId, out: &mut Vec<TagId>) {
    let n = nodes.get(node);
    if let Attribute::Identifier(tag) = &n.attribute {
        out.push(*tag);
    }
    for child in children_of(&n.attribute) {
        collect_identifiers(nodes, child, out);
    }
}

/// Enumerate every `NodeId` directly reachable from an attribute's typed
/// fields, for generic tree walks (`free_capture_scope`'s closure scan).
fn children_of(attribute: &Attribute) -> Vec<NodeId> {
    match attribute {
        Attribute::Identifier(_)
        | Attribute::Denotation(_)
        | Attribute::Nihil
        | Attribute::Skip
        | Attribute::Generator { .. }
        | Attribute::FormatText { .. }
        | Attribute::Jump { .. } => vec![],
        Attribute::Formula { lhs, rhs, .. } => vec![*lhs, *rhs],
        Attribute::MonadicFormula { operand, .. } => vec![*operand],
        Attribute::Call { procedure, args } => {
            let mut v = vec![*procedure];
            v.extend(args.iter().copied());
            v
        }
        Attribute::Slice { primary, subscripts } => {
            let mut v = vec![*primary];
            v.extend(subscripts.iter().copied());
            v
        }
        Attribute::Selection { primary, .. } => vec![*primary],
        Attribute::Assignation { dst, src } => vec![*dst, *src],
        Attribute::IdentityDeclaration { expr, .. } => vec![*expr],
        Attribute::VariableDeclaration { expr, .. } => expr.iter().copied().collect(),
        Attribute::RoutineText { body, .. } => vec![*body],
        Attribute::ClosedClause { items, .. } | Attribute::CollateralClause { items } => items.clone(),
        Attribute::Conditional { arms, otherwise } => {
            let mut v: Vec<_> = arms.iter().flat_map(|(c, b)| [*c, *b]).collect();
            v.extend(otherwise.iter().copied());
            v
        }
        Attribute::IntegerCase { selector, arms, otherwise } => {
            let mut v = vec![*selector];
            v.extend(arms.iter().map(|(_, b)| *b));
            v.extend(otherwise.iter().copied());
            v
        }
        Attribute::UnitedCase { selector, arms, otherwise } => {
            let mut v = vec![*selector];
            v.extend(arms.iter().map(|(_, b)| *b));
            v.extend(otherwise.iter().copied());
            v
        }
        Attribute::Loop { from, by, to, while_clause, body, .. } => {
            let mut v: Vec<_> = [from, by, to, while_clause].into_iter().flatten().copied().collect();
            v.push(*body);
            v
        }
        Attribute::LabeledUnit { unit, .. } | Attribute::Assert { unit } => vec![*unit],
        Attribute::Dereferencing(n)
        | Attribute::Deproceduring(n)
        | Attribute::Uniting(n)
        | Attribute::Widening(n)
        | Attribute::Rowing(n)
        | Attribute::Voiding(n)
        | Attribute::Proceduring(n) => vec![*n],
    }
}

/// A shape-only view of `Attribute` that owns its `NodeId`/`TagId`
/// payloads, so `infer`'s big match can move values out instead of
/// re-borrowing `self.nodes` across the recursive calls it dispatches to.
enum NodeShape {
    Identifier(TagId),
    Leaf,
    Formula { operator: TagId, lhs: NodeId, rhs: NodeId },
    Monadic { operator: TagId, operand: NodeId },
    Call { procedure: NodeId, args: Vec<NodeId> },
    Slice { primary: NodeId, subscripts: Vec<NodeId> },
    Selection { primary: NodeId },
    Assignation { dst: NodeId, src: NodeId },
    IdentityDeclaration { tag: TagId, expr: NodeId },
    VariableDeclaration { tag: TagId, expr: Option<NodeId> },
    RoutineText { tag: Option<TagId>, body: NodeId },
    FormatText { tag: Option<TagId> },
    Generator { on_heap: bool },
    ClosedClause { table: SymbolTableId, items: Vec<NodeId> },
    CollateralClause { items: Vec<NodeId> },
    Conditional { arms: Vec<(NodeId, NodeId)>, otherwise: Option<NodeId> },
    Case { selector: NodeId, arms: Vec<NodeId>, otherwise: Option<NodeId> },
    Loop { table: SymbolTableId, from: Option<NodeId>, by: Option<NodeId>, to: Option<NodeId>, while_clause: Option<NodeId>, body: NodeId },
    Unit(NodeId),
}

trait CloneShape {
    fn clone_shape(&self) -> NodeShape;
}

impl CloneShape for Attribute {
    fn clone_shape(&self) -> NodeShape {
        match self {
            Attribute::Identifier(tag) => NodeShape::Identifier(*tag),
            Attribute::Denotation(_) | Attribute::Nihil | Attribute::Skip | Attribute::Jump { .. } => NodeShape::Leaf,
            Attribute::Formula { operator, lhs, rhs } => NodeShape::Formula { operator: *operator, lhs: *lhs, rhs: *rhs },
            Attribute::MonadicFormula { operator, operand } => NodeShape::Monadic { operator: *operator, operand: *operand },
            Attribute::Call { procedure, args } => NodeShape::Call { procedure: *procedure, args: args.clone() },
            Attribute::Slice { primary, subscripts } => NodeShape::Slice { primary: *primary, subscripts: subscripts.clone() },
            Attribute::Selection { primary, .. } => NodeShape::Selection { primary: *primary },
            Attribute::Assignation { dst, src } => NodeShape::Assignation { dst: *dst, src: *src },
            Attribute::IdentityDeclaration { tag, expr } => NodeShape::IdentityDeclaration { tag: *tag, expr: *expr },
            Attribute::VariableDeclaration { tag, expr } => NodeShape::VariableDeclaration { tag: *tag, expr: *expr },
            Attribute::RoutineText { tag, body } => NodeShape::RoutineText { tag: *tag, body: *body },
            Attribute::FormatText { tag } => NodeShape::FormatText { tag: *tag },
            Attribute::Generator { on_heap } => NodeShape::Generator { on_heap: *on_heap },
            Attribute::ClosedClause { level, items } => NodeShape::ClosedClause { table: *level, items: items.clone() },
            Attribute::CollateralClause { items } => NodeShape::CollateralClause { items: items.clone() },
            Attribute::Conditional { arms, otherwise } => NodeShape::Conditional { arms: arms.clone(), otherwise: *otherwise },
            Attribute::IntegerCase { selector, arms, otherwise } => {
                NodeShape::Case { selector: *selector, arms: arms.iter().map(|(_, b)| *b).collect(), otherwise: *otherwise }
            }
            Attribute::UnitedCase { selector, arms, otherwise } => {
                NodeShape::Case { selector: *selector, arms: arms.iter().map(|(_, b)| *b).collect(), otherwise: *otherwise }
            }
            Attribute::Loop { level, from, by, to, while_clause, body, .. } => {
                NodeShape::Loop { table: *level, from: *from, by: *by, to: *to, while_clause: *while_clause, body: *body }
            }
            Attribute::LabeledUnit { unit, .. } | Attribute::Assert { unit } => NodeShape::Unit(*unit),
            Attribute::Dereferencing(n)
            | Attribute::Deproceduring(n)
            | Attribute::Uniting(n)
            | Attribute::Widening(n)
            | Attribute::Rowing(n)
            | Attribute::Voiding(n)
            | Attribute::Proceduring(n) => NodeShape::Unit(*n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::{ModeKind, Node, Tag, TagClass};

    struct Fixture {
        nodes: NodeArena,
        modes: ModeArena,
        tags: SymbolTableArena,
        sink: Sink,
        outer: SymbolTableId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut tags = SymbolTableArena::default();
            let outer = tags.new_table(None);
            Self { nodes: NodeArena::default(), modes: ModeArena::default(), tags, sink: Sink::default(), outer }
        }

        fn checker(&mut self) -> ScopeChecker<'_> {
            ScopeChecker::new(&self.nodes, &self.modes, &self.tags, &mut self.sink)
        }
    }

    #[test]
    fn combine_picks_the_youngest_level_and_ors_ties() {
        let a = Scope { level: 1, transient: false };
        let b = Scope { level: 3, transient: true };
        let c = Scope { level: 3, transient: false };
        assert_eq!(Scope::combine([a, b]), b);
        assert_eq!(Scope::combine([b, c]), Scope { level: 3, transient: true });
        assert_eq!(Scope::combine([]), Scope::PRIMAL);
    }

    #[test]
    fn identity_declaration_rejects_a_younger_initializer() {
        let mut fx = Fixture::new();
        let int_m = fx.modes.intern(ModeKind::Int);
        let inner = fx.tags.new_table(Some(fx.outer));

        // inner-level variable `y`
        let y_tag = fx.tags.declare(inner, Tag::new("y", TagClass::Identifier, inner, int_m));
        let y_decl = fx.nodes.push(Node::new(Attribute::VariableDeclaration { tag: y_tag, expr: None }, 1));

        // outer-level `x = y` — y's scope (level 1) exceeds x's declaration level (0)
        let x_tag = fx.tags.declare(fx.outer, Tag::new("x", TagClass::Identifier, fx.outer, int_m));
        let y_ref = fx.nodes.push(Node::new(Attribute::Identifier(y_tag), 2));
        let x_decl = fx.nodes.push(Node::new(Attribute::IdentityDeclaration { tag: x_tag, expr: y_ref }, 2));

        fx.tags.tag(y_tag).scope.set(ScopeBinding { level: Some(1), transient: false, assigned: true });

        let root = fx.nodes.push(Node::new(
            Attribute::ClosedClause { level: inner, items: vec![y_decl, x_decl] },
            1,
        ));

        let outer = fx.outer;
        let mut checker = fx.checker();
        let result = checker.run(root, outer);
        assert!(matches!(result, Err(ScopeError::Violations)));
        drop(checker);
        assert_eq!(fx.sink.diagnostics().len(), 1);
        assert_eq!(fx.sink.diagnostics()[0].kind, Kind::ScopeViolationStatic);
    }

    #[test]
    fn assignation_through_a_non_local_name_rejects_a_transient_source() {
        let mut fx = Fixture::new();
        let ch_m = fx.modes.intern(ModeKind::Char);
        let flex = fx.modes.intern(ModeKind::FlexRow { elem: ch_m, dims: 1 });

        let dst_tag = fx.tags.declare(fx.outer, Tag::new("s", TagClass::Identifier, fx.outer, flex));
        let dst = fx.nodes.push(Node::new(Attribute::Identifier(dst_tag), 1));
        fx.tags.tag(dst_tag).scope.set(ScopeBinding { level: Some(0), transient: false, assigned: true });

        let src_tag = fx.tags.declare(fx.outer, Tag::new("t", TagClass::Identifier, fx.outer, flex));
        let src = fx.nodes.push(Node::new(Attribute::Identifier(src_tag), 1));
        fx.tags.tag(src_tag).scope.set(ScopeBinding { level: Some(1), transient: true, assigned: true });

        let root = fx.nodes.push(Node::new(Attribute::Assignation { dst, src }, 1));
        let outer = fx.outer;
        let mut checker = fx.checker();
        let _ = checker.run(root, outer);
        drop(checker);
        assert!(fx.sink.diagnostics().iter().any(|d| d.kind == Kind::ScopeViolationStatic));
    }

    #[test]
    fn routine_text_scope_is_the_youngest_free_identifier_it_captures() {
        let mut fx = Fixture::new();
        let int_m = fx.modes.intern(ModeKind::Int);
        let inner = fx.tags.new_table(Some(fx.outer));

        // outer-level free variable `n`, scope already bound to level 0
        let n_tag = fx.tags.declare(fx.outer, Tag::new("n", TagClass::Identifier, fx.outer, int_m));
        fx.tags.tag(n_tag).scope.set(ScopeBinding { level: Some(0), transient: false, assigned: true });

        // body: a single reference to `n` plus a local declaration that
        // must NOT pollute the routine's captured scope
        let n_ref = fx.nodes.push(Node::new(Attribute::Identifier(n_tag), 3));
        let local_tag = fx.tags.declare(inner, Tag::new("local", TagClass::Identifier, inner, int_m));
        let local_decl = fx.nodes.push(Node::new(
            Attribute::IdentityDeclaration { tag: local_tag, expr: n_ref },
            3,
        ));
        let body = fx.nodes.push(Node::new(
            Attribute::ClosedClause { level: inner, items: vec![local_decl] },
            3,
        ));
        let routine_tag = fx.tags.declare(fx.outer, Tag::new("f", TagClass::Identifier, fx.outer, int_m));
        let routine = fx.nodes.push(Node::new(
            Attribute::RoutineText { tag: Some(routine_tag), body },
            3,
        ));

        let outer = fx.outer;
        let mut checker = fx.checker();
        let _ = checker.run(routine, outer);
        drop(checker);
        let bound = fx.tags.tag(routine_tag).scope.get();
        assert_eq!(bound.level, Some(0));
    }
}
