use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of a scheduled node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Error,
    Skipped,
    Timeout,
}

impl NodeStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, NodeStatus::Error | NodeStatus::Timeout)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Success => write!(f, "success"),
            NodeStatus::Error => write!(f, "error"),
            NodeStatus::Skipped => write!(f, "skipped"),
            NodeStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// The committed outcome of one node. Created by the invoker (or the
/// scheduler, for skipped nodes), appended to the trace, read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub node_id: usize,
    pub inputs_resolved: Value,
    pub output: Value,
    pub status: NodeStatus,
    pub attempts: u32,
    pub start_ts: f64,
    pub end_ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    pub fn duration(&self) -> f64 {
        (self.end_ts - self.start_ts).max(0.0)
    }
}

/// Append-only sequence of execution records in commit order.
pub type Trace = Vec<ExecutionRecord>;
