//! Stack manager, frames, and static links.
//!
//! Two linear arenas: the evaluation stack (intermediate value cells) and
//! the frame stack (activation records). Both are plain growable `Vec`s
//! with a configured soft budget standing in for the fixed-size arenas a
//! native implementation would preallocate; exceeding the budget is an
//! overflow error rather than an unbounded grow, so the "Stack
//! exhausted" taxonomy entry is reachable without a real memory limit.

mod frame;

pub use frame::{relation, Frame, LevelRelation};

use core_model::{FrameId, ValueCell};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("evaluation stack exhausted")]
    EvalStackExhausted,
    #[error("frame stack exhausted")]
    FrameStackExhausted,
    #[error("no frame at the requested lexical level")]
    NoSuchLevel,
    #[error("accessing nil reference")]
    AccessingNil,
}

#[derive(Debug)]
pub struct Stacks {
    eval: Vec<ValueCell>,
    frames: Vec<Frame>,
    eval_budget: Option<usize>,
    frame_budget: Option<usize>,
}

impl Default for Stacks {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl Stacks {
    pub fn new(eval_budget: Option<usize>, frame_budget: Option<usize>) -> Self {
        Self { eval: Vec::new(), frames: Vec::new(), eval_budget, frame_budget }
    }

    // ---- evaluation stack -------------------------------------------------

    pub fn push(&mut self, value: ValueCell) -> Result<(), RuntimeError> {
        if let Some(budget) = self.eval_budget {
            if self.eval.len() >= budget {
                return Err(RuntimeError::EvalStackExhausted);
            }
        }
        self.eval.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<ValueCell> {
        self.eval.pop()
    }

    pub fn peek(&self) -> Option<&ValueCell> {
        self.eval.last()
    }

    /// Current evaluation-stack height, used by loop bodies to snapshot
    /// and reset the stack between iterations.
    pub fn eval_mark(&self) -> usize {
        self.eval.len()
    }

    pub fn eval_reset_to(&mut self, mark: usize) {
        self.eval.truncate(mark);
    }

    pub fn eval_values(&self) -> &[ValueCell] {
        &self.eval
    }

    /// Every `ValueCell` currently reachable as a GC root: the whole
    /// evaluation stack plus every open frame's locals. Fed to
    /// `Heap::sweep` — a cell shaped like a heap reference from any of
    /// these positions keeps the block it names alive.
    pub fn root_cells(&self) -> impl Iterator<Item = &ValueCell> {
        self.eval.iter().chain(self.frames.iter().flat_map(|f| f.locals.iter()))
    }

    // ---- frame stack -------------------------------------------------

    pub fn current_frame_id(&self) -> Option<FrameId> {
        if self.frames.is_empty() {
            None
        } else {
            Some(FrameId((self.frames.len() - 1) as u32))
        }
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.index()]
    }

    pub fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.index()]
    }

    /// Compute the static link for a level `new_level` being entered from
    /// `current`, per the peer/child/ancestor-ward rule.
    pub fn static_link_for(&self, current: FrameId, new_level: u32) -> Result<Option<FrameId>, RuntimeError> {
        let cur = self.frame(current);
        match relation(cur.level, new_level) {
            LevelRelation::Peer => Ok(cur.static_link),
            LevelRelation::Child => Ok(Some(current)),
            LevelRelation::AncestorWard => {
                let mut walk = current;
                loop {
                    if self.frame(walk).level >= new_level {
                        return Ok(Some(walk));
                    }
                    match self.frame(walk).static_link {
                        Some(next) => walk = next,
                        None => return Err(RuntimeError::NoSuchLevel),
                    }
                }
            }
        }
    }

    /// Descend from `from` along static links to the frame at lexical
    /// level `level`.
    pub fn descend(&self, from: FrameId, level: u32) -> Result<FrameId, RuntimeError> {
        let mut walk = from;
        loop {
            let f = self.frame(walk);
            if f.level == level {
                return Ok(walk);
            }
            match f.static_link {
                Some(next) => walk = next,
                None => return Err(RuntimeError::NoSuchLevel),
            }
        }
    }

    pub fn open_frame(
        &mut self,
        static_link: Option<FrameId>,
        dynamic_link: Option<FrameId>,
        node: core_model::NodeId,
        level: u32,
        local_count: usize,
    ) -> Result<FrameId, RuntimeError> {
        if let Some(budget) = self.frame_budget {
            if self.frames.len() >= budget {
                return Err(RuntimeError::FrameStackExhausted);
            }
        }
        self.frames.push(Frame::new(static_link, dynamic_link, node, level, local_count));
        tracing::trace!(level, "frame opened");
        Ok(FrameId((self.frames.len() - 1) as u32))
    }

    /// Close the most recently opened frame (normal exit).
    pub fn close_frame(&mut self) {
        self.frames.pop();
        tracing::trace!("frame closed");
    }

    /// Abandon every frame above `keep` (non-local exit / longjmp
    /// replacement): those frames' local `REF`s remain sweepable via the
    /// heap, matching cooperative cancellation semantics.
    pub fn unwind_to(&mut self, keep: FrameId) {
        self.frames.truncate(keep.index() + 1);
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}
