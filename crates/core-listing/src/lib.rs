//! Listing/xref support.
//!
//! Computes, for every source line touched by the tree, the range of
//! lexical levels and procedure levels reached by any node anchored to
//! that line. Runs after scope binding, over the same `NodeArena` /
//! `SymbolTableArena` the evaluator executes, and is consumed by an
//! external listing formatter this core does not implement.
//!
//! Procedure levels are numbered monotonically in depth-first order: the
//! outermost program text is procedure level 0, and each `RoutineText`
//! body encountered during the walk gets the next number.

use std::collections::BTreeMap;

use core_model::{Attribute, NodeArena, NodeId, SymbolTableArena, SymbolTableId};

/// Level bookkeeping for a single source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineLevels {
    pub min_level: u32,
    pub max_level: u32,
    pub min_procedure: u32,
    pub max_procedure: u32,
}

impl LineLevels {
    fn seed(level: u32, procedure: u32) -> Self {
        Self { min_level: level, max_level: level, min_procedure: procedure, max_procedure: procedure }
    }

    fn widen(&mut self, level: u32, procedure: u32) {
        self.min_level = self.min_level.min(level);
        self.max_level = self.max_level.max(level);
        self.min_procedure = self.min_procedure.min(procedure);
        self.max_procedure = self.max_procedure.max(procedure);
    }
}

/// Per-line level table for one tree, keyed by source line number.
#[derive(Debug, Default)]
pub struct Listing {
    lines: BTreeMap<u32, LineLevels>,
    procedure_count: u32,
}

impl Listing {
    /// Walk `root` (at `root_level`'s own lexical level) and build the
    /// per-line table.
    pub fn compute(nodes: &NodeArena, tags: &SymbolTableArena, root: NodeId, root_level: SymbolTableId) -> Self {
        let mut listing = Self::default();
        let top = tags.table(root_level).level;
        listing.walk(nodes, tags, root, top, 0);
        tracing::debug!(lines = listing.lines.len(), procedures = listing.procedure_count + 1, "listing computed");
        listing
    }

    fn touch(&mut self, line: u32, level: u32, procedure: u32) {
        self.lines.entry(line).and_modify(|e| e.widen(level, procedure)).or_insert_with(|| LineLevels::seed(level, procedure));
    }

    fn walk(&mut self, nodes: &NodeArena, tags: &SymbolTableArena, node: NodeId, level: u32, procedure: u32) {
        let n = nodes.get(node);
        self.touch(n.source_line, level, procedure);

        match &n.attribute {
            Attribute::RoutineText { body, .. } => {
                self.procedure_count += 1;
                self.walk(nodes, tags, *body, level, self.procedure_count);
            }
            Attribute::ClosedClause { level: table, items } => {
                let inner = tags.table(*table).level;
                for item in items {
                    self.walk(nodes, tags, *item, inner, procedure);
                }
            }
            Attribute::Loop { level: table, from, by, to, while_clause, body, .. } => {
                let inner = tags.table(*table).level;
                for n in [from, by, to, while_clause].into_iter().flatten() {
                    self.walk(nodes, tags, *n, level, procedure);
                }
                self.walk(nodes, tags, *body, inner, procedure);
            }
            other => {
                for child in children_of(other) {
                    self.walk(nodes, tags, child, level, procedure);
                }
            }
        }
    }

    /// Level range for a single line, if the tree anchored any node there.
    pub fn line(&self, line: u32) -> Option<LineLevels> {
        self.lines.get(&line).copied()
    }

    /// All recorded lines in ascending order.
    pub fn lines(&self) -> impl Iterator<Item = (u32, LineLevels)> + '_ {
        self.lines.iter().map(|(&line, &levels)| (line, levels))
    }

    /// Highest procedure number assigned (0 if the tree declared none).
    pub fn procedure_count(&self) -> u32 {
        self.procedure_count
    }
}

/// Enumerate every `NodeId` directly reachable from an attribute's typed
/// fields, for the variants `walk` does not special-case itself.
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
        Attribute::CollateralClause { items } => items.clone(),
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
        Attribute::LabeledUnit { unit, .. } | Attribute::Assert { unit } => vec![*unit],
        Attribute::Dereferencing(n)
        | Attribute::Deproceduring(n)
        | Attribute::Uniting(n)
        | Attribute::Widening(n)
        | Attribute::Rowing(n)
        | Attribute::Voiding(n)
        | Attribute::Proceduring(n) => vec![*n],
        Attribute::RoutineText { .. } | Attribute::ClosedClause { .. } | Attribute::Loop { .. } => {
            unreachable!("walk special-cases these before calling children_of")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::{Literal, Node};

    struct Fixture {
        nodes: NodeArena,
        tags: SymbolTableArena,
        outer: SymbolTableId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut tags = SymbolTableArena::default();
            let outer = tags.new_table(None);
            Self { nodes: NodeArena::default(), tags, outer }
        }

        fn push(&mut self, attr: Attribute, line: u32) -> NodeId {
            self.nodes.push(Node::new(attr, line))
        }
    }

    #[test]
    fn a_flat_line_sees_only_its_own_level() {
        let mut fx = Fixture::new();
        let lit = fx.push(Attribute::Denotation(Literal::Int(1)), 3);
        let listing = Listing::compute(&fx.nodes, &fx.tags, lit, fx.outer);
        let levels = listing.line(3).unwrap();
        assert_eq!(levels, LineLevels { min_level: 0, max_level: 0, min_procedure: 0, max_procedure: 0 });
        assert_eq!(listing.line(4), None);
    }

    #[test]
    fn a_closed_clause_widens_its_own_line_but_runs_its_body_one_level_deeper() {
        let mut fx = Fixture::new();
        let inner = fx.tags.new_table(Some(fx.outer));
        let item = fx.push(Attribute::Denotation(Literal::Int(1)), 5);
        let clause = fx.push(Attribute::ClosedClause { level: inner, items: vec![item] }, 4);

        let listing = Listing::compute(&fx.nodes, &fx.tags, clause, fx.outer);
        assert_eq!(listing.line(4).unwrap().min_level, 0);
        assert_eq!(listing.line(5).unwrap().min_level, 1);
    }

    #[test]
    fn nested_routine_texts_number_procedures_in_dfs_order() {
        let mut fx = Fixture::new();
        let inner_table = fx.tags.new_table(Some(fx.outer));
        let innermost_body = fx.push(Attribute::Denotation(Literal::Int(0)), 10);
        let inner_routine = fx.push(Attribute::RoutineText { tag: None, body: innermost_body }, 9);
        let outer_body = fx.push(Attribute::ClosedClause { level: inner_table, items: vec![inner_routine] }, 8);
        let outer_routine = fx.push(Attribute::RoutineText { tag: None, body: outer_body }, 7);

        let listing = Listing::compute(&fx.nodes, &fx.tags, outer_routine, fx.outer);
        assert_eq!(listing.line(7).unwrap().max_procedure, 0);
        assert_eq!(listing.line(8).unwrap().max_procedure, 1);
        // line 9 is where the nested routine text itself is anchored — that
        // declaration site still belongs to its enclosing procedure (1);
        // only its body (line 10) runs inside the newly numbered one (2).
        assert_eq!(listing.line(9).unwrap().max_procedure, 1);
        assert_eq!(listing.line(10).unwrap().max_procedure, 2);
        assert_eq!(listing.procedure_count(), 2);
    }

    #[test]
    fn a_line_with_nodes_at_two_levels_reports_both_bounds() {
        let mut fx = Fixture::new();
        let inner = fx.tags.new_table(Some(fx.outer));
        // A sibling on the same source line as the clause that opens the
        // inner level: both the clause (level 0) and its single item
        // (level 1, same line) are anchored to line 6.
        let item = fx.push(Attribute::Denotation(Literal::Int(2)), 6);
        let clause = fx.push(Attribute::ClosedClause { level: inner, items: vec![item] }, 6);

        let listing = Listing::compute(&fx.nodes, &fx.tags, clause, fx.outer);
        let levels = listing.line(6).unwrap();
        assert_eq!(levels.min_level, 0);
        assert_eq!(levels.max_level, 1);
    }

    #[test]
    fn loop_bounds_run_at_the_outer_level_but_the_body_runs_one_deeper() {
        let mut fx = Fixture::new();
        let loop_table = fx.tags.new_table(Some(fx.outer));
        let from = fx.push(Attribute::Denotation(Literal::Int(1)), 1);
        let to = fx.push(Attribute::Denotation(Literal::Int(3)), 1);
        let body_item = fx.push(Attribute::Denotation(Literal::Int(0)), 2);
        let body = fx.push(Attribute::ClosedClause { level: loop_table, items: vec![body_item] }, 2);
        let loop_node = fx.push(
            Attribute::Loop { level: loop_table, from: Some(from), by: None, to: Some(to), while_clause: None, body, counter: None },
            1,
        );

        let listing = Listing::compute(&fx.nodes, &fx.tags, loop_node, fx.outer);
        assert_eq!(listing.line(1).unwrap().max_level, 0);
        assert_eq!(listing.line(2).unwrap().min_level, 1);
    }
}
