//! Stand-environ native procedure registry.
//!
//! `core-eval` never matches on operator/procedure names: every
//! stand-environ identifier or operator declared here carries a `NativeId`
//! on its `Tag`, and a call/formula node whose bound tag has one is
//! dispatched by index through `NativeRegistry::call` instead of walking a
//! routine-text body. `NativeContext` is the pop/push seam, kept
//! trait-object-safe so this crate never depends on `core-eval`'s
//! concrete `Evaluator` type — the dependency points the other way.

use core_model::{
    AllocClass, ModeId, NativeId, RefValue, SymbolTableArena, SymbolTableId, Tag, TagClass,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum NativeError {
    #[error("native call underflowed the evaluation stack")]
    StackUnderflow,
    #[error("operand had the wrong runtime shape for this native")]
    TypeMismatch,
    #[error("division by zero")]
    DivideByZero,
    #[error("integer overflow in native arithmetic")]
    IntegerOverflow,
}

/// Pop/push seam a native procedure uses to read its operands and leave
/// its result, implemented by `core-eval`'s evaluation stack.
pub trait NativeContext {
    fn pop_int(&mut self) -> Result<i64, NativeError>;
    fn push_int(&mut self, v: i64);
    fn pop_real(&mut self) -> Result<f64, NativeError>;
    fn push_real(&mut self, v: f64);
    fn pop_bool(&mut self) -> Result<bool, NativeError>;
    fn push_bool(&mut self, v: bool);
    fn pop_char(&mut self) -> Result<char, NativeError>;
    fn push_char(&mut self, v: char);
    fn pop_bits(&mut self) -> Result<u64, NativeError>;
    fn push_bits(&mut self, v: u64);
    fn pop_complex(&mut self) -> Result<(f64, f64), NativeError>;
    fn push_complex(&mut self, re: f64, im: f64);
    fn pop_ref(&mut self) -> Result<RefValue, NativeError>;
    fn push_ref(&mut self, v: RefValue);
}

pub type NativeFn = fn(&mut dyn NativeContext) -> Result<(), NativeError>;

struct NativeEntry {
    name: &'static str,
    class: TagClass,
    priority: Option<u8>,
    mode: ModeId,
    func: NativeFn,
}

/// Discovers and declares the stand-environ: the fixed set of built-in
/// operators and procedures every program sees without declaring them.
/// Breadth-first in the same sense the prior plugin scaffold was —
/// `register` only covers primitive INT/REAL/BOOL arithmetic and a
/// handful of monadic operators; widening the prelude (transput,
/// `LONG` arithmetic via `core-mp`, row-returning procedures) extends
/// this table without touching the dispatch mechanism.
#[derive(Default)]
pub struct NativeRegistry {
    entries: Vec<NativeEntry>,
    installed: bool,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, name: &'static str, class: TagClass, priority: Option<u8>, mode: ModeId, func: NativeFn) -> NativeId {
        let id = NativeId(self.entries.len() as u32);
        self.entries.push(NativeEntry { name, class, priority, mode, func });
        id
    }

    /// Declare every registered native into `table`, idempotently:
    /// repeated calls are a no-op so a REPL-style host can call this once
    /// per session without duplicating tags.
    pub fn declare_into(&mut self, tags: &mut SymbolTableArena, table: SymbolTableId) {
        if self.installed {
            return;
        }
        for (idx, entry) in self.entries.iter().enumerate() {
            let mut tag = Tag::new(entry.name, entry.class, table, entry.mode);
            tag.alloc_class = AllocClass::Local;
            tag.priority = entry.priority;
            tag.native = Some(NativeId(idx as u32));
            tags.declare(table, tag);
        }
        tracing::debug!(count = self.entries.len(), "stand-environ declared");
        self.installed = true;
    }

    pub fn call(&self, id: NativeId, ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
        let entry = self.entries.get(id.index()).ok_or(NativeError::TypeMismatch)?;
        (entry.func)(ctx)
    }
}

/// Build the baseline INT/REAL/BOOL stand-environ described in the
/// arithmetic/boolean pack-unpack list, and declare it into a fresh
/// top-level symbol table. Returns the table plus the registry the
/// `Identifier`/`Formula` nodes bound to it dispatch through.
pub fn install_baseline(modes: &mut core_model::ModeArena, tags: &mut SymbolTableArena) -> (SymbolTableId, NativeRegistry) {
    let int_m = modes.intern(core_model::ModeKind::Int);
    let real_m = modes.intern(core_model::ModeKind::Real);
    let bool_m = modes.intern(core_model::ModeKind::Bool);

    let mut reg = NativeRegistry::new();
    reg.add("+", TagClass::Operator, Some(6), int_m, native_int_add);
    reg.add("-", TagClass::Operator, Some(6), int_m, native_int_sub);
    reg.add("*", TagClass::Operator, Some(7), int_m, native_int_mul);
    reg.add("OVER", TagClass::Operator, Some(7), int_m, native_int_div);
    reg.add("MOD", TagClass::Operator, Some(7), int_m, native_int_mod);
    reg.add("+", TagClass::Operator, Some(6), real_m, native_real_add);
    reg.add("-", TagClass::Operator, Some(6), real_m, native_real_sub);
    reg.add("*", TagClass::Operator, Some(7), real_m, native_real_mul);
    reg.add("/", TagClass::Operator, Some(7), real_m, native_real_div);
    reg.add("ABS", TagClass::Operator, None, int_m, native_int_abs);
    reg.add("SIGN", TagClass::Operator, None, int_m, native_int_sign);
    reg.add("ODD", TagClass::Operator, None, bool_m, native_int_odd);
    reg.add("ANDF", TagClass::Operator, Some(2), bool_m, native_bool_andf);
    reg.add("OREL", TagClass::Operator, Some(1), bool_m, native_bool_orel);

    let table = tags.new_table(None);
    reg.declare_into(tags, table);
    (table, reg)
}

fn native_int_add(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_int()?;
    let a = ctx.pop_int()?;
    ctx.push_int(a.checked_add(b).ok_or(NativeError::IntegerOverflow)?);
    Ok(())
}

fn native_int_sub(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_int()?;
    let a = ctx.pop_int()?;
    ctx.push_int(a.checked_sub(b).ok_or(NativeError::IntegerOverflow)?);
    Ok(())
}

fn native_int_mul(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_int()?;
    let a = ctx.pop_int()?;
    ctx.push_int(a.checked_mul(b).ok_or(NativeError::IntegerOverflow)?);
    Ok(())
}

fn native_int_div(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_int()?;
    let a = ctx.pop_int()?;
    if b == 0 {
        return Err(NativeError::DivideByZero);
    }
    ctx.push_int(a / b);
    Ok(())
}

fn native_int_mod(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_int()?;
    let a = ctx.pop_int()?;
    if b == 0 {
        return Err(NativeError::DivideByZero);
    }
    ctx.push_int(a.rem_euclid(b));
    Ok(())
}

fn native_int_abs(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let a = ctx.pop_int()?;
    ctx.push_int(a.checked_abs().ok_or(NativeError::IntegerOverflow)?);
    Ok(())
}

fn native_int_sign(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let a = ctx.pop_int()?;
    ctx.push_int(a.signum());
    Ok(())
}

fn native_int_odd(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let a = ctx.pop_int()?;
    ctx.push_bool(a % 2 != 0);
    Ok(())
}

fn native_real_add(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_real()?;
    let a = ctx.pop_real()?;
    ctx.push_real(a + b);
    Ok(())
}

fn native_real_sub(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_real()?;
    let a = ctx.pop_real()?;
    ctx.push_real(a - b);
    Ok(())
}

fn native_real_mul(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_real()?;
    let a = ctx.pop_real()?;
    ctx.push_real(a * b);
    Ok(())
}

fn native_real_div(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_real()?;
    let a = ctx.pop_real()?;
    if b == 0.0 {
        return Err(NativeError::DivideByZero);
    }
    ctx.push_real(a / b);
    Ok(())
}

fn native_bool_andf(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_bool()?;
    let a = ctx.pop_bool()?;
    ctx.push_bool(a && b);
    Ok(())
}

fn native_bool_orel(ctx: &mut dyn NativeContext) -> Result<(), NativeError> {
    let b = ctx.pop_bool()?;
    let a = ctx.pop_bool()?;
    ctx.push_bool(a || b);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StackContext {
        ints: Vec<i64>,
        bools: Vec<bool>,
        reals: Vec<f64>,
    }

    impl NativeContext for StackContext {
        fn pop_int(&mut self) -> Result<i64, NativeError> {
            self.ints.pop().ok_or(NativeError::StackUnderflow)
        }
        fn push_int(&mut self, v: i64) {
            self.ints.push(v);
        }
        fn pop_real(&mut self) -> Result<f64, NativeError> {
            self.reals.pop().ok_or(NativeError::StackUnderflow)
        }
        fn push_real(&mut self, v: f64) {
            self.reals.push(v);
        }
        fn pop_bool(&mut self) -> Result<bool, NativeError> {
            self.bools.pop().ok_or(NativeError::StackUnderflow)
        }
        fn push_bool(&mut self, v: bool) {
            self.bools.push(v);
        }
        fn pop_char(&mut self) -> Result<char, NativeError> {
            Err(NativeError::TypeMismatch)
        }
        fn push_char(&mut self, _v: char) {}
        fn pop_bits(&mut self) -> Result<u64, NativeError> {
            Err(NativeError::TypeMismatch)
        }
        fn push_bits(&mut self, _v: u64) {}
        fn pop_complex(&mut self) -> Result<(f64, f64), NativeError> {
            Err(NativeError::TypeMismatch)
        }
        fn push_complex(&mut self, _re: f64, _im: f64) {}
        fn pop_ref(&mut self) -> Result<RefValue, NativeError> {
            Err(NativeError::TypeMismatch)
        }
        fn push_ref(&mut self, _v: RefValue) {}
    }

    #[test]
    fn baseline_install_declares_every_entry_exactly_once() {
        let mut modes = core_model::ModeArena::default();
        let mut tags = SymbolTableArena::default();
        let (table, _reg) = install_baseline(&mut modes, &mut tags);
        assert_eq!(tags.table(table).operators.len(), 13);
    }

    #[test]
    fn int_division_by_zero_is_rejected() {
        let mut modes = core_model::ModeArena::default();
        let mut tags = SymbolTableArena::default();
        let (_table, reg) = install_baseline(&mut modes, &mut tags);
        let mut ctx = StackContext { ints: vec![5, 0], ..Default::default() };
        let divide_id = NativeId(3); // "OVER" on INT, per registration order
        assert_eq!(reg.call(divide_id, &mut ctx), Err(NativeError::DivideByZero));
    }

    #[test]
    fn int_add_pops_in_operand_order() {
        let mut modes = core_model::ModeArena::default();
        let mut tags = SymbolTableArena::default();
        let (_table, reg) = install_baseline(&mut modes, &mut tags);
        let mut ctx = StackContext { ints: vec![10, 3], ..Default::default() };
        reg.call(NativeId(0), &mut ctx).unwrap();
        assert_eq!(ctx.ints, vec![13]);
    }

    #[test]
    fn declare_into_is_idempotent() {
        let mut modes = core_model::ModeArena::default();
        let mut tags = SymbolTableArena::default();
        let int_m = modes.intern(core_model::ModeKind::Int);
        let mut reg = NativeRegistry::new();
        reg.add("+", TagClass::Operator, Some(6), int_m, native_int_add);
        let table = tags.new_table(None);
        reg.declare_into(&mut tags, table);
        reg.declare_into(&mut tags, table);
        assert_eq!(tags.table(table).operators.len(), 1);
    }
}
