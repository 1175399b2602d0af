mod base;

pub use base::{EventBus, ExecutionEvent, ExecutionId, LogEntry, LogKind, RunLogger};
