//! Store capabilities: the relational and vector store traits the runtime
//! is injected with, SQL identifier scoping, and the in-memory reference
//! implementation backing tests and dev mode.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::MemoryStore;
pub use sql::{owner_prefix, validate_scoped_sql};
pub use traits::{
    CommittedTurn, DatasetInfo, RelationalStore, SearchHit, StepDraft, TurnWrite, VectorEntry,
    VectorStore,
};
