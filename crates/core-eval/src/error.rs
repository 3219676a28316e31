//! Runtime error taxonomy: the faults a running program can hit once it
//! has passed static checking, from an uninitialised read to integer
//! overflow to a dangling jump target.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("reading a value whose INITIALISED bit is unset")]
    Uninitialized,
    #[error("dereferencing the nil reference")]
    AccessingNil,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("dynamic scope violation: a name outlived the frame it was bound to")]
    ScopeViolationDynamic,
    #[error("ASSERT unit evaluated to false")]
    AssertionFailed,
    #[error("operand had the wrong runtime shape for this operation")]
    TypeMismatch,
    #[error("no such label is active in an enclosing frame")]
    DanglingJump,
    #[error(transparent)]
    Runtime(#[from] core_runtime::RuntimeError),
    #[error(transparent)]
    Heap(#[from] core_heap::HeapError),
    #[error(transparent)]
    Row(#[from] core_rows::RowError),
    #[error(transparent)]
    Native(#[from] core_natives::NativeError),
    #[error(transparent)]
    Mp(#[from] core_mp::MpError),
    #[error(transparent)]
    Bits(#[from] core_mp::BitsError),
}
