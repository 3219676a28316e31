//! Canned demonstration trees.
//!
//! Parsing a source text into a `NodeTree` is out of scope for this core
//! (see the component table), so the driver ships a small library of
//! fixture trees built directly through `core_model`'s node/tag
//! constructors, the same way `core-eval`'s own unit tests build theirs.

use core_model::{Attribute, Literal, ModeKind, NodeId, NodeTree, SymbolTableId, Tag, TagClass};
use core_natives::{install_baseline, NativeRegistry};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum Fixture {
    /// `sum := 0; FOR i FROM 1 TO 10 DO sum +:= i OD`
    SumLoop,
    /// `5 OVER 0` — a native runtime error surfacing as `Step::Fatal`.
    DivideByZero,
}

pub struct Built {
    pub root: NodeId,
    pub root_level: SymbolTableId,
    pub natives: NativeRegistry,
}

fn declare(tree: &mut NodeTree, table: SymbolTableId, name: &str, mode: core_model::ModeId) -> core_model::TagId {
    let mut tag = Tag::new(name, TagClass::Identifier, table, mode);
    let offset = tree.symbols.table(table).ap_increment.get();
    tag.offset = offset;
    tree.symbols.table(table).ap_increment.set(offset + 1);
    tree.symbols.declare(table, tag)
}

fn push(tree: &mut NodeTree, attr: Attribute, mode: Option<core_model::ModeId>, line: u32) -> NodeId {
    let mut n = core_model::Node::new(attr, line);
    if let Some(m) = mode {
        n = n.with_mode(m);
    }
    tree.nodes.push(n)
}

pub fn build(fixture: Fixture, tree: &mut NodeTree) -> Built {
    let (stand_environ, natives) = install_baseline(&mut tree.modes, &mut tree.symbols);
    match fixture {
        Fixture::SumLoop => sum_loop(tree, stand_environ, natives),
        Fixture::DivideByZero => divide_by_zero(tree, stand_environ, natives),
    }
}

fn sum_loop(tree: &mut NodeTree, stand_environ: SymbolTableId, natives: NativeRegistry) -> Built {
    let int_m = tree.modes.intern(ModeKind::Int);
    let ref_int_m = tree.modes.intern(ModeKind::Ref(int_m));
    let prog_level = tree.symbols.new_table(Some(stand_environ));
    let sum = declare(tree, prog_level, "sum", int_m);
    let loop_level = tree.symbols.new_table(Some(prog_level));
    let i = declare(tree, loop_level, "i", int_m);
    let plus = tree.symbols.lookup(stand_environ, TagClass::Operator, "+").expect("native + declared");

    let zero = push(tree, Attribute::Denotation(Literal::Int(0)), Some(int_m), 1);
    let sum_decl = push(tree, Attribute::VariableDeclaration { tag: sum, expr: Some(zero) }, None, 1);

    let sum_name = push(tree, Attribute::Identifier(sum), Some(ref_int_m), 2);
    let sum_val = push(tree, Attribute::Identifier(sum), Some(int_m), 2);
    let i_val = push(tree, Attribute::Identifier(i), Some(int_m), 2);
    let sum_plus_i = push(tree, Attribute::Formula { operator: plus, lhs: sum_val, rhs: i_val }, Some(int_m), 2);
    let assign_sum = push(tree, Attribute::Assignation { dst: sum_name, src: sum_plus_i }, Some(ref_int_m), 2);
    let body = push(tree, Attribute::ClosedClause { level: loop_level, items: vec![assign_sum] }, None, 2);

    let from = push(tree, Attribute::Denotation(Literal::Int(1)), Some(int_m), 2);
    let to = push(tree, Attribute::Denotation(Literal::Int(10)), Some(int_m), 2);
    let loop_node = push(
        tree,
        Attribute::Loop { level: loop_level, from: Some(from), by: None, to: Some(to), while_clause: None, body, counter: Some(i) },
        None,
        2,
    );
    let root = push(tree, Attribute::ClosedClause { level: prog_level, items: vec![sum_decl, loop_node] }, None, 1);

    Built { root, root_level: prog_level, natives }
}

fn divide_by_zero(tree: &mut NodeTree, stand_environ: SymbolTableId, natives: NativeRegistry) -> Built {
    let int_m = tree.modes.intern(ModeKind::Int);
    let prog_level = tree.symbols.new_table(Some(stand_environ));
    let over = tree.symbols.lookup(stand_environ, TagClass::Operator, "OVER").expect("native OVER declared");

    let lhs = push(tree, Attribute::Denotation(Literal::Int(5)), Some(int_m), 1);
    let rhs = push(tree, Attribute::Denotation(Literal::Int(0)), Some(int_m), 1);
    let formula = push(tree, Attribute::Formula { operator: over, lhs, rhs }, Some(int_m), 1);
    let root = push(tree, Attribute::ClosedClause { level: prog_level, items: vec![formula] }, None, 1);

    Built { root, root_level: prog_level, natives }
}
