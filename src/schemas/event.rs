use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::NodeStatus;

/// Ordered event stream surfaced to the embedding CLI/API layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    Planning,
    PlanComplete {
        num_nodes: usize,
        tools: Vec<String>,
    },
    ToolStart {
        node_id: usize,
        tool: String,
    },
    ToolComplete {
        node_id: usize,
        status: NodeStatus,
        duration: f64,
    },
    FinalAnswer {
        response: String,
    },
    Error {
        message: String,
        details: String,
    },
}

pub type EventSender = UnboundedSender<EngineEvent>;

/// Best-effort send; a dropped receiver never disturbs the run.
pub fn emit(sender: &Option<EventSender>, event: EngineEvent) {
    if let Some(tx) = sender {
        let _ = tx.send(event);
    }
}
