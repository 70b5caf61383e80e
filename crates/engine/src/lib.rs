//! The agent workflow engine: an event-driven scheduler that drives a
//! coordinator-rooted team of role-bound agents through tool calls and
//! produces an ordered step log — plus the query classifier that routes
//! questions into workflow tiers.

pub mod agent;
pub mod cancel;
pub mod classifier;
pub mod events;
pub mod steps;
pub mod workflow;

pub use agent::{AgentSpec, Team, DELEGATE_PREFIX};
pub use cancel::CancelToken;
pub use classifier::{classify, Classification};
pub use events::ExecutionEvent;
pub use steps::StepTracker;
pub use workflow::{WorkflowEngine, WorkflowHandle, WorkflowInput, WorkflowOutcome, WorkflowResult};
