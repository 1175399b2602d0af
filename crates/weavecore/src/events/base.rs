use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: ExecutionId,
        trigger_count: usize,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        execution_id: ExecutionId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node_id: String,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: String,
        output: Value,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node_id: String,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    NodeRetrying {
        execution_id: ExecutionId,
        node_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Log {
        execution_id: ExecutionId,
        entry: LogEntry,
    },
}

/// Severity of a log entry shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

/// Entry for the external log sink: `{type, nodeId, nodeName, message, data?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub node_id: String,
    pub node_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Per-node logger handed to executors through their context
#[derive(Clone, Debug)]
pub struct RunLogger {
    execution_id: ExecutionId,
    node_id: String,
    node_name: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl RunLogger {
    pub fn new(
        execution_id: ExecutionId,
        node_id: impl Into<String>,
        node_name: impl Into<String>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            node_id: node_id.into(),
            node_name: node_name.into(),
            sender,
        }
    }

    pub fn log(&self, kind: LogKind, message: impl Into<String>, data: Option<Value>) {
        let message = message.into();
        tracing::debug!("[{}] {:?}: {}", self.node_id, kind, message);
        let _ = self.sender.send(ExecutionEvent::Log {
            execution_id: self.execution_id,
            entry: LogEntry {
                kind,
                node_id: self.node_id.clone(),
                node_name: self.node_name.clone(),
                message,
                data,
                timestamp: Utc::now(),
            },
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogKind::Info, message, None);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogKind::Success, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogKind::Warning, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogKind::Error, message, None);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogKind::Debug, message, None);
    }

    /// Log with an attached payload
    pub fn data(&self, message: impl Into<String>, data: Value) {
        self.log(LogKind::Info, message, Some(data));
    }
}

/// Broadcast bus shared by the engine and its subscribers
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_logger(
        &self,
        execution_id: ExecutionId,
        node_id: &str,
        node_name: &str,
    ) -> RunLogger {
        RunLogger::new(execution_id, node_id, node_name, self.sender.clone())
    }
}
