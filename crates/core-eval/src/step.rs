//! The control effect every propagator returns, replacing the
//! longjmp-based non-local exit the tree-walker used to rely on for
//! `GOTO` and runtime faults.
//!
//! Call sites that only continue on normal completion use the
//! `propagate!` macro below instead of threading a `Result`:
//! `Jump`/`Fatal` are not errors from the callee's perspective, they are
//! control transfers that must reach the frame that can handle them
//! before any further code downstream of the call runs.

use core_model::{FrameId, TagId};

use crate::error::EvalError;

#[derive(Debug, PartialEq)]
pub enum Step {
    /// Execution fell through normally; any produced value is already on
    /// the evaluation stack.
    Normal,
    /// A label jump in flight: `target_frame_id` names the frame whose
    /// enclosing clause defines the destination label, `label` is which
    /// one. Must propagate, frame by frame, until a clause opened at
    /// that frame catches it and resumes at the matching `LabeledUnit`.
    Jump(FrameId, TagId),
    /// An unrecoverable runtime error; propagates to the process
    /// boundary if no catcher unwinds first.
    Fatal(EvalError),
}

/// Continue past a step that completed normally; otherwise return the
/// control effect to the caller unchanged.
macro_rules! propagate {
    ($step:expr) => {
        match $step {
            $crate::step::Step::Normal => {}
            other => return other,
        }
    };
}

pub(crate) use propagate;
