//! Turn runtime: the tiered dispatcher, per-session concurrency control,
//! cancellation, and end-of-turn persistence.

pub mod cancel;
pub mod dispatcher;
pub mod persist;
pub mod session_lock;

pub use dispatcher::{run_turn, ChatRequest, TurnInput};
