//! Tree-walk evaluator: the execution core that turns a checked syntax
//! tree plus its symbol tables into running side effects, threading a
//! heap, twin stacks, a dispatch cache, and the stand-environ native
//! registry through every propagator.

mod error;
mod evaluator;
mod mp_bridge;
mod step;

pub use error::EvalError;
pub use evaluator::{EvalConfig, Evaluator};
pub use mp_bridge::{load_mp, store_mp};
pub use step::Step;
