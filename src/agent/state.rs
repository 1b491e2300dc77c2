use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::agent::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
}

/// One agent in the delegation tree. A sub-agent's depth is its parent's
/// plus one; roots sit at depth 0.
#[derive(Debug, Clone)]
pub struct AgentNode {
    pub agent_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub depth: u32,
    pub task: String,
    pub status: AgentStatus,
    pub result: Option<String>,
}

/// Process-wide accounting of running and finished agents. The tree is the
/// authority that refuses delegation past the configured depth.
pub struct AgentTree {
    max_depth: u32,
    nodes: Mutex<HashMap<Uuid, AgentNode>>,
}

impl AgentTree {
    pub fn new(max_depth: u32) -> Self {
        AgentTree {
            max_depth,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_root(&self, task: &str) -> Uuid {
        let agent_id = Uuid::new_v4();
        let node = AgentNode {
            agent_id,
            parent_id: None,
            depth: 0,
            task: task.to_string(),
            status: AgentStatus::Running,
            result: None,
        };
        self.nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agent_id, node);
        agent_id
    }

    /// Registers a child under `parent_id`, refusing once the child would
    /// sit at `max_depth`.
    pub fn spawn_child(&self, parent_id: Uuid, task: &str) -> Result<Uuid, AgentError> {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let parent_depth = nodes.get(&parent_id).map(|n| n.depth).unwrap_or(0);
        let depth = parent_depth + 1;
        if depth >= self.max_depth {
            log::warn!("refusing sub-agent spawn at depth {depth} (bound {})", self.max_depth);
            return Err(AgentError::DepthExceeded { depth });
        }

        let agent_id = Uuid::new_v4();
        nodes.insert(
            agent_id,
            AgentNode {
                agent_id,
                parent_id: Some(parent_id),
                depth,
                task: task.to_string(),
                status: AgentStatus::Running,
                result: None,
            },
        );
        Ok(agent_id)
    }

    pub fn complete(&self, agent_id: Uuid, success: bool, result: Option<String>) {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(node) = nodes.get_mut(&agent_id) {
            node.status = if success {
                AgentStatus::Completed
            } else {
                AgentStatus::Failed
            };
            node.result = result;
        }
    }

    pub fn get(&self, agent_id: Uuid) -> Option<AgentNode> {
        self.nodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&agent_id)
            .cloned()
    }

    pub fn depth(&self, agent_id: Uuid) -> u32 {
        self.get(agent_id).map(|n| n.depth).unwrap_or(0)
    }
}
