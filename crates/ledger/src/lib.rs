//! The LLM call ledger: a structured, trace-linked record of every outbound
//! model invocation, visible and hidden alike.

mod call;
mod ledger;

pub use call::{CallContext, CallStatus, CallType, CallUpdate, LlmCall, ResponseMessage};
pub use ledger::{CallLedger, CallScope, CallStart, LedgerStore};
