use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Disposition of the run when a node terminates in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFail {
    Halt,
    Continue,
}

impl Default for OnFail {
    fn default() -> Self {
        Self::Halt
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default)]
    pub purpose: String,
}

/// One scheduled tool invocation within a plan.
///
/// `retry` and `timeout` may be omitted on the wire; the planner's validation
/// pass fills them in from the tool descriptor and the engine configuration,
/// so a validated node always carries concrete values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: usize,
    pub tool: String,
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub on_fail: OnFail,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl DagNode {
    pub fn new(id: usize, tool: impl Into<String>) -> Self {
        DagNode {
            id,
            tool: tool.into(),
            function: String::new(),
            inputs: Map::new(),
            depends_on: Vec::new(),
            retry: None,
            timeout: None,
            on_fail: OnFail::default(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_depends_on(mut self, deps: impl IntoIterator<Item = usize>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: f64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_on_fail(mut self, on_fail: OnFail) -> Self {
        self.on_fail = on_fail;
        self
    }
}

/// A validated execution plan: tool invocations wired by dependency edges,
/// plus the node whose output answers the original request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub nodes: Vec<DagNode>,
    pub final_output_node: usize,
}

impl Dag {
    pub fn get(&self, id: usize) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
