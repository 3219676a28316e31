//! Tree-walk evaluator and propagators.
//!
//! `Evaluator` gathers every piece of previously-global mutable state
//! (heap, stacks, dispatch cache, native registry, row arena, the `mp_pi`
//! cache) into one context object threaded through every propagator —
//! one place instead of a scatter of statics. Nothing here is a singleton;
//! a second `Evaluator` over the same tree would simply be a second,
//! independent run.

use core_diagnostics::Sink;
use core_dispatch::{DispatchCache, PropagatorId};
use core_heap::Heap;
use core_model::{
    AllocClass, Attribute, FrameId, Literal, ModeArena, ModeId, ModeKind, NodeArena, NodeId,
    ProcValue, RefValue, Segment, SymbolTableArena, SymbolTableId, TagId, ValueCell, ValueData,
};
use core_natives::{NativeContext, NativeError, NativeRegistry};
use core_rows::{ref_handle, RowArena, Tuple};
use core_runtime::Stacks;

use crate::error::EvalError;
use crate::step::{propagate, Step};

/// Tunables a host configures at startup (`core-config`'s province);
/// `Evaluator` only consumes the resolved numbers.
#[derive(Debug, Clone, Copy)]
pub struct EvalConfig {
    pub eval_stack_budget: Option<usize>,
    pub frame_stack_budget: Option<usize>,
    pub heap_budget_cells: Option<usize>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self { eval_stack_budget: None, frame_stack_budget: None, heap_budget_cells: None }
    }
}

pub struct Evaluator<'a> {
    nodes: &'a NodeArena,
    modes: &'a ModeArena,
    tags: &'a SymbolTableArena,
    sink: &'a mut Sink,
    heap: Heap,
    stacks: Stacks,
    dispatch: DispatchCache,
    natives: NativeRegistry,
    rows: RowArena,
    pi: core_mp::PiCache,
    /// Polled between units; an external signal shim is
    /// the only thing that ever sets this.
    sys_request: bool,
}

impl<'a> Evaluator<'a> {
    /// Builds the evaluator with its root frame already open at level 0
    /// (the stand-environ's own level) so that the program's outermost
    /// closed clause has a static link to descend to.
    pub fn new(
        nodes: &'a NodeArena,
        modes: &'a ModeArena,
        tags: &'a SymbolTableArena,
        natives: NativeRegistry,
        sink: &'a mut Sink,
        config: EvalConfig,
    ) -> Self {
        let mut stacks = Stacks::new(config.eval_stack_budget, config.frame_stack_budget);
        stacks
            .open_frame(None, None, NodeId(0), 0, 0)
            .expect("opening the root frame against a fresh stack cannot fail");
        Self {
            nodes,
            modes,
            tags,
            sink,
            heap: Heap::new(config.heap_budget_cells),
            stacks,
            dispatch: DispatchCache::default(),
            natives,
            rows: RowArena::default(),
            pi: core_mp::PiCache::new(),
            sys_request: false,
        }
    }

    pub fn request_monitor(&mut self) {
        self.sys_request = true;
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn rows(&self) -> &RowArena {
        &self.rows
    }

    /// The value left on top of the evaluation stack by the last
    /// `execute` call that returned `Step::Normal`, if any.
    pub fn last_value(&self) -> Option<&ValueCell> {
        self.stacks.peek()
    }

    /// Mark from every cell currently reachable as a root (the evaluation
    /// stack and every open frame's locals) and reclaim everything else,
    /// following row headers into their backing element blocks via
    /// `self.rows`. Returns the number of blocks reclaimed.
    pub fn gc(&mut self) -> usize {
        let rows = &self.rows;
        self.heap.sweep(self.stacks.root_cells(), |h| rows.heap_edges(h))
    }

    /// Allocate `len` cells, attempting one sweep-and-retry before giving
    /// up with `OutOfCore` — the heap itself has no roots to sweep from,
    /// so that retry has to happen here.
    fn alloc_cells(&mut self, mode: Option<ModeId>, len: usize) -> Result<core_model::HandleId, EvalError> {
        match self.heap.allocate(mode, len) {
            Ok(h) => Ok(h),
            Err(core_heap::HeapError::OutOfCore) => {
                self.gc();
                Ok(self.heap.allocate(mode, len)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// As `alloc_cells`, but for a row's two-part allocation
    /// (header + element block) via `self.rows.make`.
    fn make_row(&mut self, elem_mode: Option<ModeId>, tuples: Vec<Tuple>, transient: bool) -> Result<core_model::HandleId, EvalError> {
        match self.rows.make(&mut self.heap, elem_mode, tuples.clone(), transient) {
            Ok(h) => Ok(h),
            Err(core_rows::RowError::Heap(core_heap::HeapError::OutOfCore)) => {
                self.gc();
                Ok(self.rows.make(&mut self.heap, elem_mode, tuples, transient)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn current_frame(&self) -> FrameId {
        self.stacks.current_frame_id().expect("evaluator always runs inside at least one frame")
    }

    // ---- the central dispatch ------------------------------------------------

    /// Drive evaluation of `node`, leaving its value (if any) on top of
    /// the evaluation stack. This is the single contract every
    /// propagator below must honor.
    pub fn execute(&mut self, node: NodeId) -> Step {
        if self.sys_request {
            tracing::debug!(?node, "sys-request observed between units");
            self.sys_request = false;
        }
        let level = self.current_level();
        let propagator = self.dispatch.dispatch(self.nodes, self.tags, level, node);
        let attribute = self.nodes.get(node).attribute.clone();
        match propagator {
            PropagatorId::LocalIdentifier => {
                let Attribute::Identifier(tag) = attribute else {
                    unreachable!("dispatch only installs LocalIdentifier on Identifier nodes")
                };
                return self.exec_identifier(node, tag);
            }
            PropagatorId::Constant => {
                let Attribute::Denotation(lit) = &attribute else {
                    unreachable!("dispatch only installs Constant on Denotation nodes")
                };
                return self.exec_denotation(node, lit);
            }
            PropagatorId::DereferenceQuick => {
                let Attribute::Dereferencing(inner) = attribute else {
                    unreachable!("dispatch only installs DereferenceQuick on Dereferencing nodes")
                };
                return self.exec_dereference(inner);
            }
            PropagatorId::FormulaStandEnvQuick => {
                let Attribute::Formula { operator, lhs, rhs } = attribute else {
                    unreachable!("dispatch only installs FormulaStandEnvQuick on Formula nodes")
                };
                return self.exec_formula(operator, lhs, rhs);
            }
            PropagatorId::CallStandEnvQuick => {
                let Attribute::Call { procedure, args } = attribute else {
                    unreachable!("dispatch only installs CallStandEnvQuick on Call nodes")
                };
                return self.exec_call(procedure, &args);
            }
            PropagatorId::SliceNameQuick => {
                let Attribute::Slice { primary, subscripts } = attribute else {
                    unreachable!("dispatch only installs SliceNameQuick on Slice nodes")
                };
                return self.exec_slice(primary, &subscripts);
            }
            PropagatorId::WideningIntToReal => {
                let Attribute::Widening(inner) = attribute else {
                    unreachable!("dispatch only installs WideningIntToReal on Widening nodes")
                };
                return self.exec_widening(inner);
            }
            PropagatorId::VoidingLocAssignation => {
                let Attribute::Voiding(inner) = attribute else {
                    unreachable!("dispatch only installs VoidingLocAssignation on Voiding nodes")
                };
                return self.exec_voiding(inner);
            }
            PropagatorId::Generic(_) => {}
        }
        match attribute {
            Attribute::Identifier(tag) => self.exec_identifier(node, tag),
            Attribute::Denotation(lit) => self.exec_denotation(node, &lit),
            Attribute::Nihil => {
                self.push_checked(ValueCell::reference(RefValue::NIL))
            }
            Attribute::Skip => {
                let v = self.default_value(self.nodes.get(node).mode);
                self.push_checked(v)
            }
            Attribute::Formula { operator, lhs, rhs } => self.exec_formula(operator, lhs, rhs),
            Attribute::MonadicFormula { operator, operand } => self.exec_monadic(operator, operand),
            Attribute::Call { procedure, args } => self.exec_call(procedure, &args),
            Attribute::Slice { primary, subscripts } => self.exec_slice(primary, &subscripts),
            Attribute::Selection { field, primary } => self.exec_selection(field, primary),
            Attribute::Assignation { dst, src } => self.exec_assignation(node, dst, src),
            Attribute::IdentityDeclaration { tag, expr } => self.exec_identity_decl(tag, expr),
            Attribute::VariableDeclaration { tag, expr } => self.exec_variable_decl(tag, expr),
            Attribute::RoutineText { .. } => {
                self.push_checked(ValueCell::procedure(ProcValue::Routine { node, environ: self.current_frame() }))
            }
            Attribute::FormatText { .. } => {
                self.push_checked(ValueCell::format(core_model::FormatValue { node, environ: self.current_frame() }))
            }
            Attribute::Generator { on_heap } => self.exec_generator(node, on_heap),
            Attribute::ClosedClause { level, items } => self.exec_closed_clause(node, level, &items),
            Attribute::CollateralClause { items } => self.exec_collateral(node, &items),
            Attribute::Conditional { arms, otherwise } => self.exec_conditional(node, &arms, otherwise),
            Attribute::IntegerCase { selector, arms, otherwise } => {
                self.exec_integer_case(node, selector, &arms, otherwise)
            }
            Attribute::UnitedCase { selector, arms, otherwise } => {
                self.exec_united_case(node, selector, &arms, otherwise)
            }
            Attribute::Loop { level, from, by, to, while_clause, body, counter } => {
                self.exec_loop(node, level, from, by, to, while_clause, body, counter)
            }
            Attribute::Jump { label } => self.exec_jump(label),
            Attribute::LabeledUnit { unit, .. } => self.execute(unit),
            Attribute::Assert { unit } => self.exec_assert(unit),
            Attribute::Dereferencing(inner) => self.exec_dereference(inner),
            Attribute::Deproceduring(inner) => self.exec_deproceduring(inner),
            Attribute::Uniting(inner) => self.exec_uniting(inner),
            Attribute::Widening(inner) => self.exec_widening(inner),
            Attribute::Rowing(inner) => self.exec_rowing(node, inner),
            Attribute::Voiding(inner) => self.exec_voiding(inner),
            Attribute::Proceduring(inner) => {
                self.push_checked(ValueCell::procedure(ProcValue::Routine { node: inner, environ: self.current_frame() }))
            }
        }
    }

    fn current_level(&self) -> u32 {
        self.stacks.frame(self.current_frame()).level
    }

    fn push_checked(&mut self, value: ValueCell) -> Step {
        match self.stacks.push(value) {
            Ok(()) => Step::Normal,
            Err(e) => Step::Fatal(e.into()),
        }
    }

    /// Execute `node` for its value: drives it to completion and pops
    /// the result, rejecting an uninitialised read. Any non-`Normal`
    /// step is handed back as `Err` so the caller can return it as-is.
    fn eval_value(&mut self, node: NodeId) -> Result<ValueCell, Step> {
        match self.execute(node) {
            Step::Normal => {}
            other => return Err(other),
        }
        match self.stacks.pop() {
            Some(v) if v.is_initialised() => Ok(v),
            Some(_) => Err(Step::Fatal(EvalError::Uninitialized)),
            None => Err(Step::Fatal(EvalError::from(core_runtime::RuntimeError::EvalStackExhausted))),
        }
    }

    fn as_int(&self, v: ValueCell) -> Result<i64, Step> {
        v.as_int().ok_or(Step::Fatal(EvalError::TypeMismatch))
    }

    fn as_bool(&self, v: ValueCell) -> Result<bool, Step> {
        v.as_bool().ok_or(Step::Fatal(EvalError::TypeMismatch))
    }

    fn as_ref(&self, v: ValueCell) -> Result<RefValue, Step> {
        v.as_ref().ok_or(Step::Fatal(EvalError::TypeMismatch))
    }

    fn default_value(&self, mode: Option<ModeId>) -> ValueCell {
        let Some(mode) = mode else { return ValueCell::uninitialised(ValueData::Void) };
        let data = match self.modes.get(mode).kind {
            ModeKind::Int | ModeKind::Bits => ValueData::Int(0),
            ModeKind::Real => ValueData::Real(0.0),
            ModeKind::Bool => ValueData::Bool(false),
            ModeKind::Char => ValueData::Char('\0'),
            ModeKind::Complex => ValueData::Complex(0.0, 0.0),
            ModeKind::Ref(_) => ValueData::Ref(RefValue::NIL),
            _ => ValueData::Void,
        };
        ValueCell::uninitialised(data)
    }

    // ---- identifiers / denotations --------------------------------------------

    fn exec_identifier(&mut self, node: NodeId, tag: TagId) -> Step {
        let t = self.tags.tag(tag);
        let level = self.tags.table(t.symbol_table).level;
        let frame_id = match self.stacks.descend(self.current_frame(), level) {
            Ok(f) => f,
            Err(e) => return Step::Fatal(e.into()),
        };
        let offset = t.offset;
        let cell = if t.alloc_class == AllocClass::Heap {
            self.stacks.frame(frame_id).locals[offset]
        } else {
            let is_name = self.nodes.get(node).mode.is_some_and(|m| matches!(self.modes.get(m).kind, ModeKind::Ref(_)));
            if is_name {
                ValueCell::reference(RefValue::frame(frame_id, offset))
            } else {
                self.stacks.frame(frame_id).locals[offset]
            }
        };
        self.push_checked(cell)
    }

    fn exec_denotation(&mut self, node: NodeId, lit: &Literal) -> Step {
        if let Literal::Str(s) = lit {
            let header = match core_rows::string_to_row(&mut self.rows, &mut self.heap, s) {
                Ok(h) => h,
                Err(e) => return Step::Fatal(e.into()),
            };
            return self.push_checked(ValueCell::reference(RefValue::heap(header, 0)));
        }
        if let Some(cached) = self.nodes.get(node).constant_cache.get() {
            return self.push_checked(cached.into_value());
        }
        let value = match lit {
            Literal::Int(v) => ValueCell::int(*v),
            Literal::Real(v) => ValueCell::real(*v),
            Literal::Bool(v) => ValueCell::boolean(*v),
            Literal::Char(v) => ValueCell::char(*v),
            Literal::Bits(v) => ValueCell::bits(*v),
            Literal::Str(_) => unreachable!("handled above"),
        };
        let slot = match lit {
            Literal::Int(v) => Some(core_model::ConstantCacheSlot::Int(*v)),
            Literal::Real(v) => Some(core_model::ConstantCacheSlot::Real(*v)),
            Literal::Bool(v) => Some(core_model::ConstantCacheSlot::Bool(*v)),
            Literal::Char(v) => Some(core_model::ConstantCacheSlot::Char(*v)),
            Literal::Bits(v) => Some(core_model::ConstantCacheSlot::Bits(*v)),
            Literal::Str(_) => None,
        };
        self.nodes.get(node).constant_cache.set(slot);
        self.push_checked(value)
    }

    // ---- formulas / calls ------------------------------------------------------

    fn exec_formula(&mut self, operator: TagId, lhs: NodeId, rhs: NodeId) -> Step {
        let name = self.tags.tag(operator).name.clone();
        if name == "ANDF" || name == "OREL" {
            let l = match self.eval_value(lhs) {
                Ok(v) => v,
                Err(s) => return s,
            };
            let lb = match self.as_bool(l) {
                Ok(b) => b,
                Err(s) => return s,
            };
            if (name == "ANDF" && !lb) || (name == "OREL" && lb) {
                return self.push_checked(ValueCell::boolean(lb));
            }
            return self.execute(rhs);
        }
        let l = match self.eval_value(lhs) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let r = match self.eval_value(rhs) {
            Ok(v) => v,
            Err(s) => return s,
        };
        self.dispatch_operator(operator, &[l, r])
    }

    fn exec_monadic(&mut self, operator: TagId, operand: NodeId) -> Step {
        let v = match self.eval_value(operand) {
            Ok(v) => v,
            Err(s) => return s,
        };
        self.dispatch_operator(operator, &[v])
    }

    /// `NativeRegistry::call` takes `&mut dyn NativeContext`, and
    /// `Evaluator` itself is the `NativeContext` — calling through
    /// `self.natives` while also handing it `self` would borrow the
    /// struct twice, so the registry is swapped out for the duration
    /// of the call and swapped back after.
    fn call_native(&mut self, id: core_model::NativeId) -> Result<(), NativeError> {
        let natives = std::mem::take(&mut self.natives);
        let result = natives.call(id, self);
        self.natives = natives;
        result
    }

    fn dispatch_operator(&mut self, operator: TagId, operands: &[ValueCell]) -> Step {
        let native = self.tags.tag(operator).native;
        match native {
            Some(id) => {
                for &operand in operands {
                    if let Err(e) = self.stacks.push(operand) {
                        return Step::Fatal(e.into());
                    }
                }
                match self.call_native(id) {
                    Ok(()) => Step::Normal,
                    Err(e) => Step::Fatal(e.into()),
                }
            }
            None => {
                let defining = self.tags.tag(operator).defining_node;
                match defining {
                    Some(routine_node) => self.call_routine(routine_node, operands),
                    None => Step::Fatal(EvalError::TypeMismatch),
                }
            }
        }
    }

    fn exec_call(&mut self, procedure: NodeId, args: &[NodeId]) -> Step {
        let proc_value = match self.eval_value(procedure) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let proc = match proc_value.data {
            ValueData::Procedure(p) => p,
            _ => return Step::Fatal(EvalError::TypeMismatch),
        };
        let mut values = Vec::with_capacity(args.len());
        for &arg in args {
            match self.eval_value(arg) {
                Ok(v) => values.push(v),
                Err(s) => return s,
            }
        }
        match proc {
            ProcValue::Native(id) => {
                for &v in &values {
                    if let Err(e) = self.stacks.push(v) {
                        return Step::Fatal(e.into());
                    }
                }
                match self.call_native(id) {
                    Ok(()) => Step::Normal,
                    Err(e) => Step::Fatal(e.into()),
                }
            }
            ProcValue::Routine { node, environ } => self.call_routine_with_environ(node, environ, &values),
        }
    }

    /// Calls a routine captured with the current frame as its environ
    /// (operator bodies defined at the point of use); most call sites go
    /// through [`Self::call_routine_with_environ`] instead, which honors
    /// the environ a `RoutineText` closed over.
    fn call_routine(&mut self, routine_node: NodeId, args: &[ValueCell]) -> Step {
        self.call_routine_with_environ(routine_node, self.current_frame(), args)
    }

    /// **Dispatch category: Call.** Open a frame whose static link is the
    /// captured environ, bind `args` positionally against the routine's
    /// own parameter table (its first `n` declared identifiers, `n` =
    /// the procedure mode's parameter count), execute the body, close
    /// the frame.
    fn call_routine_with_environ(&mut self, routine_node: NodeId, environ: FrameId, args: &[ValueCell]) -> Step {
        let Attribute::RoutineText { body, .. } = self.nodes.get(routine_node).attribute.clone() else {
            return Step::Fatal(EvalError::TypeMismatch);
        };
        let Some(param_table) = self.nodes.get(routine_node).symbol_table else {
            return Step::Fatal(EvalError::TypeMismatch);
        };
        let level = self.tags.table(param_table).level;
        let static_link = match self.stacks.static_link_for(environ, level) {
            Ok(link) => link,
            Err(e) => return Step::Fatal(e.into()),
        };
        let local_count = self.tags.table(param_table).ap_increment.get().max(args.len());
        let frame_id = match self.stacks.open_frame(static_link, Some(self.current_frame()), routine_node, level, local_count) {
            Ok(f) => f,
            Err(e) => return Step::Fatal(e.into()),
        };
        let param_tags: Vec<TagId> = self.tags.table(param_table).identifiers.iter().take(args.len()).copied().collect();
        for (tag, &value) in param_tags.iter().zip(args) {
            let offset = self.tags.tag(*tag).offset;
            self.stacks.frame_mut(frame_id).locals[offset] = value;
        }
        let step = self.execute_body_in_frame(body, param_table, frame_id);
        match step {
            Step::Normal => {
                self.stacks.close_frame();
                Step::Normal
            }
            other => other,
        }
    }

    // ---- slices / selections ----------------------------------------------------

    /// **Dispatch category: Slice.** Always produces a name (a `REF` to
    /// the addressed element), matching the "slice-name-quick"
    /// specialization's observable result for the single-dimension case.
    fn exec_slice(&mut self, primary: NodeId, subscripts: &[NodeId]) -> Step {
        let p = match self.eval_value(primary) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let Some(header) = ref_handle(&p) else { return Step::Fatal(EvalError::TypeMismatch) };
        let mut indices = Vec::with_capacity(subscripts.len());
        for &s in subscripts {
            match self.eval_value(s) {
                Ok(v) => match self.as_int(v) {
                    Ok(i) => indices.push(i),
                    Err(s) => return s,
                },
                Err(s) => return s,
            }
        }
        let desc = match self.rows.descriptor(header) {
            Ok(d) => d,
            Err(e) => return Step::Fatal(e.into()),
        };
        let idx = match desc.index_of(&indices) {
            Ok(i) => i,
            Err(e) => return Step::Fatal(e.into()),
        };
        let elements = desc.elements;
        self.push_checked(ValueCell::reference(RefValue::heap(elements, idx as usize)))
    }

    fn exec_selection(&mut self, field: TagId, primary: NodeId) -> Step {
        let p = match self.eval_value(primary) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let r = match self.as_ref(p) {
            Ok(r) => r,
            Err(s) => return s,
        };
        if r.is_nil() {
            return Step::Fatal(EvalError::AccessingNil);
        }
        let field_offset = self.tags.tag(field).offset;
        let mut out = r;
        out.offset += field_offset;
        self.push_checked(ValueCell::reference(out))
    }

    // ---- assignation / declarations --------------------------------------------

    fn exec_assignation(&mut self, node: NodeId, dst: NodeId, src: NodeId) -> Step {
        let d = match self.eval_value(dst) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let dst_ref = match self.as_ref(d) {
            Ok(r) => r,
            Err(s) => return s,
        };
        let s = match self.eval_value(src) {
            Ok(v) => v,
            Err(s) => return s,
        };
        if s.is_transient() && dst_ref.segment != Segment::Frame {
            let line = self.nodes.get(node).source_line;
            self.sink.report(
                core_diagnostics::Severity::RuntimeError,
                Some(node),
                line,
                core_diagnostics::Kind::TransientStored,
                vec![],
            );
            return Step::Fatal(EvalError::ScopeViolationDynamic);
        }
        if let Err(e) = self.write_name(dst_ref, s) {
            return Step::Fatal(e);
        }
        self.push_checked(ValueCell::reference(dst_ref))
    }

    fn write_name(&mut self, r: RefValue, value: ValueCell) -> Result<(), EvalError> {
        match r.segment {
            Segment::Heap => {
                let handle = r.handle.ok_or(EvalError::AccessingNil)?;
                self.heap.write(handle, r.offset, value)?;
                Ok(())
            }
            Segment::Frame => {
                let frame = r.frame.ok_or(EvalError::AccessingNil)?;
                self.stacks.frame_mut(frame).locals[r.offset] = value;
                Ok(())
            }
            Segment::Stack => Err(EvalError::TypeMismatch),
            Segment::Nil => Err(EvalError::AccessingNil),
        }
    }

    fn read_name(&self, r: RefValue) -> Result<ValueCell, EvalError> {
        match r.segment {
            Segment::Heap => {
                let handle = r.handle.ok_or(EvalError::AccessingNil)?;
                Ok(self.heap.read(handle, r.offset)?)
            }
            Segment::Frame => {
                let frame = r.frame.ok_or(EvalError::AccessingNil)?;
                Ok(self.stacks.frame(frame).locals[r.offset])
            }
            Segment::Stack => Err(EvalError::TypeMismatch),
            Segment::Nil => Err(EvalError::AccessingNil),
        }
    }

    fn exec_identity_decl(&mut self, tag: TagId, expr: NodeId) -> Step {
        let value = match self.eval_value(expr) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let offset = self.tags.tag(tag).offset;
        self.stacks.frame_mut(self.current_frame()).locals[offset] = value;
        Step::Normal
    }

    fn exec_variable_decl(&mut self, tag: TagId, expr: Option<NodeId>) -> Step {
        let t_mode = self.tags.tag(tag).mode;
        let value = match expr {
            Some(e) => match self.eval_value(e) {
                Ok(v) => v,
                Err(s) => return s,
            },
            None => self.default_value(Some(t_mode)),
        };
        let heap_allocated = self.tags.tag(tag).alloc_class == AllocClass::Heap;
        let offset = self.tags.tag(tag).offset;
        let frame_id = self.current_frame();
        if heap_allocated {
            let handle = match self.alloc_cells(Some(t_mode), 1) {
                Ok(h) => h,
                Err(e) => return Step::Fatal(e),
            };
            if let Err(e) = self.heap.write(handle, 0, value) {
                return Step::Fatal(e.into());
            }
            self.stacks.frame_mut(frame_id).locals[offset] = ValueCell::reference(RefValue::heap(handle, 0));
        } else {
            self.stacks.frame_mut(frame_id).locals[offset] = value;
        }
        Step::Normal
    }

    fn exec_generator(&mut self, node: NodeId, on_heap: bool) -> Step {
        let inner_mode = match self.nodes.get(node).mode.map(|m| &self.modes.get(m).kind) {
            Some(ModeKind::Ref(inner)) => Some(*inner),
            _ => None,
        };
        let handle = match self.alloc_cells(inner_mode, 1) {
            Ok(h) => h,
            Err(e) => return Step::Fatal(e),
        };
        let uninit = self.default_value(inner_mode);
        if let Err(e) = self.heap.write(handle, 0, uninit) {
            return Step::Fatal(e.into());
        }
        let mut cell = ValueCell::reference(RefValue::heap(handle, 0));
        if !on_heap {
            cell = cell.mark_transient();
        }
        self.push_checked(cell)
    }

    // ---- clauses -----------------------------------------------------------------

    /// **Dispatch category: Closed clause.** Opens the clause's own
    /// frame, runs its items in source order, and catches a `Jump`
    /// targeting this very frame by resuming at the matching
    /// `LabeledUnit`.
    fn exec_closed_clause(&mut self, node: NodeId, level: SymbolTableId, items: &[NodeId]) -> Step {
        let frame_id = match self.open_level_frame(node, level) {
            Ok(f) => f,
            Err(e) => return Step::Fatal(e.into()),
        };
        let step = self.run_catching(frame_id, items);
        match step {
            Step::Normal => {
                self.stacks.close_frame();
                Step::Normal
            }
            other => other,
        }
    }

    fn open_level_frame(&mut self, node: NodeId, level: SymbolTableId) -> Result<FrameId, core_runtime::RuntimeError> {
        let target_level = self.tags.table(level).level;
        let current = self.current_frame();
        let static_link = self.stacks.static_link_for(current, target_level)?;
        let local_count = self.tags.table(level).ap_increment.get();
        self.stacks.open_frame(static_link, Some(current), node, target_level, local_count)
    }

    /// Execute `items` in source order inside `frame_id`, catching a
    /// `Jump` that targets `frame_id` by resuming from the labeled item.
    fn run_catching(&mut self, frame_id: FrameId, items: &[NodeId]) -> Step {
        let mut index = 0usize;
        loop {
            if index >= items.len() {
                return Step::Normal;
            }
            let mark = self.stacks.eval_mark();
            match self.execute(items[index]) {
                Step::Normal => {
                    if index + 1 < items.len() {
                        self.stacks.eval_reset_to(mark);
                    }
                    index += 1;
                }
                Step::Jump(target, label) if target == frame_id => {
                    self.stacks.unwind_to(frame_id);
                    match self.find_label(items, label) {
                        Some(found) => index = found,
                        None => return Step::Fatal(EvalError::DanglingJump),
                    }
                }
                other => return other,
            }
        }
    }

    fn find_label(&self, items: &[NodeId], label: TagId) -> Option<usize> {
        items.iter().position(|&n| matches!(self.nodes.get(n).attribute, Attribute::LabeledUnit { label: l, .. } if l == label))
    }

    fn exec_jump(&mut self, label: TagId) -> Step {
        let t = self.tags.tag(label);
        let level = self.tags.table(t.symbol_table).level;
        let target = match self.stacks.descend(self.current_frame(), level) {
            Ok(f) => f,
            Err(e) => return Step::Fatal(e.into()),
        };
        Step::Jump(target, label)
    }

    fn exec_collateral(&mut self, node: NodeId, items: &[NodeId]) -> Step {
        let mut values = Vec::with_capacity(items.len());
        for &item in items {
            match self.eval_value(item) {
                Ok(v) => values.push(v),
                Err(s) => return s,
            }
        }
        let elem_mode = match self.nodes.get(node).mode.map(|m| &self.modes.get(m).kind) {
            Some(ModeKind::Row { elem, .. }) | Some(ModeKind::FlexRow { elem, .. }) => Some(*elem),
            _ => None,
        };
        let n = values.len();
        let header = match self.make_row(elem_mode, vec![Tuple::new(1, n.max(0) as i64, 1)], false) {
            Ok(h) => h,
            Err(e) => return Step::Fatal(e),
        };
        for (i, value) in values.into_iter().enumerate() {
            if let Err(e) = self.rows.set(&mut self.heap, header, &[(i + 1) as i64], value) {
                return Step::Fatal(e.into());
            }
        }
        self.push_checked(ValueCell::reference(RefValue::heap(header, 0)).mark_transient())
    }

    fn exec_conditional(&mut self, node: NodeId, arms: &[(NodeId, NodeId)], otherwise: Option<NodeId>) -> Step {
        for &(cond, body) in arms {
            let c = match self.eval_value(cond) {
                Ok(v) => v,
                Err(s) => return s,
            };
            let taken = match self.as_bool(c) {
                Ok(b) => b,
                Err(s) => return s,
            };
            if taken {
                return self.execute(body);
            }
        }
        if let Some(o) = otherwise {
            return self.execute(o);
        }
        self.push_void_result(node)
    }

    fn push_void_result(&mut self, node: NodeId) -> Step {
        match self.nodes.get(node).mode {
            Some(m) if !matches!(self.modes.get(m).kind, ModeKind::Void) => {
                let v = self.default_value(Some(m));
                self.push_checked(v)
            }
            _ => Step::Normal,
        }
    }

    fn exec_integer_case(&mut self, node: NodeId, selector: NodeId, arms: &[(i64, NodeId)], otherwise: Option<NodeId>) -> Step {
        let s = match self.eval_value(selector) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let key = match self.as_int(s) {
            Ok(i) => i,
            Err(s) => return s,
        };
        for &(label, body) in arms {
            if label == key {
                return self.execute(body);
            }
        }
        if let Some(o) = otherwise {
            return self.execute(o);
        }
        self.push_void_result(node)
    }

    /// **Dispatch category: United case.** The active member's mode is
    /// not a distinct `ValueData` shape in this model, so a `UNITING`
    /// coercion heap-boxes `[mode-id, value]` and this reads the
    /// discriminant back to match against arm guards. A conformity
    /// clause's own bound identifier (`(INT i): ...`) is not threaded
    /// through here — see `DESIGN.md`.
    fn exec_united_case(&mut self, node: NodeId, selector: NodeId, arms: &[(ModeId, NodeId)], otherwise: Option<NodeId>) -> Step {
        let s = match self.eval_value(selector) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let Some(handle) = ref_handle(&s) else { return Step::Fatal(EvalError::TypeMismatch) };
        let discriminant = match self.heap.read(handle, 0) {
            Ok(c) => c,
            Err(e) => return Step::Fatal(e.into()),
        };
        let active = match self.as_int(discriminant) {
            Ok(i) => ModeId(i as u32),
            Err(s) => return s,
        };
        let active_equiv = self.modes.get(active).equivalent;
        for &(guard, body) in arms {
            if self.modes.get(guard).equivalent == active_equiv {
                return self.execute(body);
            }
        }
        if let Some(o) = otherwise {
            return self.execute(o);
        }
        self.push_void_result(node)
    }

    /// **Dispatch category: Loop.** Evaluate-once-then-iterate algorithm:
    /// evaluate bounds once, open the body's frame once, reset the
    /// evaluation stack and re-check the bound/`WHILE` guard each
    /// iteration, then advance with an overflow-checked increment.
    #[allow(clippy::too_many_arguments)]
    fn exec_loop(
        &mut self,
        node: NodeId,
        level: SymbolTableId,
        from: Option<NodeId>,
        by: Option<NodeId>,
        to: Option<NodeId>,
        while_clause: Option<NodeId>,
        body: NodeId,
        counter: Option<TagId>,
    ) -> Step {
        let from_v = match from {
            Some(n) => match self.eval_value(n).and_then(|v| self.as_int(v).map_err(|_| Step::Fatal(EvalError::TypeMismatch))) {
                Ok(v) => v,
                Err(s) => return s,
            },
            None => 1,
        };
        let by_v = match by {
            Some(n) => match self.eval_value(n).and_then(|v| self.as_int(v).map_err(|_| Step::Fatal(EvalError::TypeMismatch))) {
                Ok(v) => v,
                Err(s) => return s,
            },
            None => 1,
        };
        let to_v = match to {
            Some(n) => match self.eval_value(n).and_then(|v| self.as_int(v).map_err(|_| Step::Fatal(EvalError::TypeMismatch))) {
                Ok(v) => v,
                Err(s) => return s,
            },
            None => {
                if by_v >= 0 {
                    i64::MAX
                } else {
                    i64::MIN
                }
            }
        };

        let frame_id = match self.open_level_frame(node, level) {
            Ok(f) => f,
            Err(e) => return Step::Fatal(e.into()),
        };
        let mark = self.stacks.eval_mark();
        let mut i = from_v;
        loop {
            self.stacks.eval_reset_to(mark);
            let cont = (by_v > 0 && i <= to_v) || (by_v < 0 && i >= to_v) || by_v == 0;
            if !cont {
                break;
            }
            if let Some(w) = while_clause {
                let wv = match self.eval_value(w) {
                    Ok(v) => v,
                    Err(s) => {
                        self.stacks.close_frame();
                        return s;
                    }
                };
                let keep_going = match self.as_bool(wv) {
                    Ok(b) => b,
                    Err(s) => {
                        self.stacks.close_frame();
                        return s;
                    }
                };
                if !keep_going {
                    break;
                }
            }
            if let Some(counter_tag) = counter {
                let offset = self.tags.tag(counter_tag).offset;
                self.stacks.frame_mut(frame_id).locals[offset] = ValueCell::int(i);
            }
            let step = self.execute_body_in_frame(body, level, frame_id);
            match step {
                Step::Normal => {}
                other => {
                    self.stacks.close_frame();
                    return other;
                }
            }
            if by_v == 0 {
                // A `BY 0` loop with no bounding `WHILE`/`TO` runs forever
                // by the letter of the loop algorithm; left uncapped
                // deliberately rather than guessing at an intended bound.
                continue;
            }
            let Some(next) = i.checked_add(by_v) else {
                self.stacks.close_frame();
                return Step::Fatal(EvalError::IntegerOverflow);
            };
            i = next;
        }
        self.stacks.close_frame();
        Step::Normal
    }

    /// Run a `Call`/`Loop` body inside an already-opened frame: if the
    /// body is itself the `ClosedClause` for `frame_level`, execute its
    /// items directly in `frame_id` rather than opening a second,
    /// redundant frame for the same lexical level.
    fn execute_body_in_frame(&mut self, body: NodeId, frame_level: SymbolTableId, frame_id: FrameId) -> Step {
        if let Attribute::ClosedClause { level, items } = &self.nodes.get(body).attribute {
            if *level == frame_level {
                let items = items.clone();
                return self.run_catching(frame_id, &items);
            }
        }
        self.execute(body)
    }

    fn exec_assert(&mut self, unit: NodeId) -> Step {
        let v = match self.eval_value(unit) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let ok = match self.as_bool(v) {
            Ok(b) => b,
            Err(s) => return s,
        };
        if ok {
            Step::Normal
        } else {
            Step::Fatal(EvalError::AssertionFailed)
        }
    }

    // ---- coercions -----------------------------------------------------------------

    fn exec_dereference(&mut self, inner: NodeId) -> Step {
        let v = match self.eval_value(inner) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let r = match self.as_ref(v) {
            Ok(r) => r,
            Err(s) => return s,
        };
        if r.is_nil() {
            return Step::Fatal(EvalError::AccessingNil);
        }
        let cell = match self.read_name(r) {
            Ok(c) => c,
            Err(e) => return Step::Fatal(e),
        };
        if !cell.is_initialised() {
            return Step::Fatal(EvalError::Uninitialized);
        }
        self.push_checked(cell)
    }

    fn exec_deproceduring(&mut self, inner: NodeId) -> Step {
        let v = match self.eval_value(inner) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let proc = match v.data {
            ValueData::Procedure(p) => p,
            _ => return Step::Fatal(EvalError::TypeMismatch),
        };
        match proc {
            ProcValue::Native(id) => match self.call_native(id) {
                Ok(()) => Step::Normal,
                Err(e) => Step::Fatal(e.into()),
            },
            ProcValue::Routine { node, environ } => self.call_routine_with_environ(node, environ, &[]),
        }
    }

    /// **Dispatch category: Uniting.** Boxes the coerced value together
    /// with its statically-known mode so a later `UnitedCase` can read
    /// the discriminant back.
    fn exec_uniting(&mut self, inner: NodeId) -> Step {
        let value = match self.eval_value(inner) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let inner_mode = self.nodes.get(inner).mode.unwrap_or(ModeId(0));
        let handle = match self.alloc_cells(None, 2) {
            Ok(h) => h,
            Err(e) => return Step::Fatal(e),
        };
        if let Err(e) = self.heap.write(handle, 0, ValueCell::int(inner_mode.0 as i64)) {
            return Step::Fatal(e.into());
        }
        if let Err(e) = self.heap.write(handle, 1, value) {
            return Step::Fatal(e.into());
        }
        self.push_checked(ValueCell::reference(RefValue::heap(handle, 0)))
    }

    fn exec_widening(&mut self, inner: NodeId) -> Step {
        let v = match self.eval_value(inner) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let widened = match v.data {
            ValueData::Int(i) => ValueCell::real(i as f64),
            _ => v,
        };
        self.push_checked(widened)
    }

    fn exec_rowing(&mut self, node: NodeId, inner: NodeId) -> Step {
        let v = match self.eval_value(inner) {
            Ok(v) => v,
            Err(s) => return s,
        };
        let elem_mode = self.nodes.get(node).mode.and_then(|m| match &self.modes.get(m).kind {
            ModeKind::Row { elem, .. } | ModeKind::FlexRow { elem, .. } => Some(*elem),
            _ => None,
        });
        let header = match self.rows.row_of(&mut self.heap, elem_mode, v) {
            Ok(h) => h,
            Err(e) => return Step::Fatal(e.into()),
        };
        self.push_checked(ValueCell::reference(RefValue::heap(header, 0)).mark_transient())
    }

    fn exec_voiding(&mut self, inner: NodeId) -> Step {
        let inner_mode_is_void = self.nodes.get(inner).mode.is_some_and(|m| matches!(self.modes.get(m).kind, ModeKind::Void));
        propagate!(self.execute(inner));
        if !inner_mode_is_void {
            self.stacks.pop();
        }
        Step::Normal
    }
}

// ---- native pop/push seam ------------------------------------------------------

impl<'a> NativeContext for Evaluator<'a> {
    fn pop_int(&mut self) -> Result<i64, NativeError> {
        match self.stacks.pop() {
            Some(v) => v.as_int().ok_or(NativeError::TypeMismatch),
            None => Err(NativeError::StackUnderflow),
        }
    }
    fn push_int(&mut self, v: i64) {
        let _ = self.stacks.push(ValueCell::int(v));
    }
    fn pop_real(&mut self) -> Result<f64, NativeError> {
        match self.stacks.pop() {
            Some(v) => v.as_real().ok_or(NativeError::TypeMismatch),
            None => Err(NativeError::StackUnderflow),
        }
    }
    fn push_real(&mut self, v: f64) {
        let _ = self.stacks.push(ValueCell::real(v));
    }
    fn pop_bool(&mut self) -> Result<bool, NativeError> {
        match self.stacks.pop() {
            Some(v) => v.as_bool().ok_or(NativeError::TypeMismatch),
            None => Err(NativeError::StackUnderflow),
        }
    }
    fn push_bool(&mut self, v: bool) {
        let _ = self.stacks.push(ValueCell::boolean(v));
    }
    fn pop_char(&mut self) -> Result<char, NativeError> {
        match self.stacks.pop() {
            Some(ValueCell { data: ValueData::Char(c), .. }) => Ok(c),
            Some(_) => Err(NativeError::TypeMismatch),
            None => Err(NativeError::StackUnderflow),
        }
    }
    fn push_char(&mut self, v: char) {
        let _ = self.stacks.push(ValueCell::char(v));
    }
    fn pop_bits(&mut self) -> Result<u64, NativeError> {
        match self.stacks.pop() {
            Some(ValueCell { data: ValueData::Bits(b), .. }) => Ok(b),
            Some(_) => Err(NativeError::TypeMismatch),
            None => Err(NativeError::StackUnderflow),
        }
    }
    fn push_bits(&mut self, v: u64) {
        let _ = self.stacks.push(ValueCell::bits(v));
    }
    fn pop_complex(&mut self) -> Result<(f64, f64), NativeError> {
        match self.stacks.pop() {
            Some(ValueCell { data: ValueData::Complex(re, im), .. }) => Ok((re, im)),
            Some(_) => Err(NativeError::TypeMismatch),
            None => Err(NativeError::StackUnderflow),
        }
    }
    fn push_complex(&mut self, re: f64, im: f64) {
        let _ = self.stacks.push(ValueCell::complex(re, im));
    }
    fn pop_ref(&mut self) -> Result<RefValue, NativeError> {
        match self.stacks.pop() {
            Some(v) => v.as_ref().ok_or(NativeError::TypeMismatch),
            None => Err(NativeError::StackUnderflow),
        }
    }
    fn push_ref(&mut self, v: RefValue) {
        let _ = self.stacks.push(ValueCell::reference(v));
    }
}
