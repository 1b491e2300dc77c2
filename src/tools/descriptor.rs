use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ToolError, ToolParameters};

/// Static description of one tool: identity, callable handle, input schema,
/// and safety/resource flags. Built at startup, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub function_id: String,
    #[serde(default)]
    pub dangerous: bool,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub output_type: String,
    #[serde(default)]
    pub parameters: ToolParameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_rate_interval: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Unknown descriptor-file fields, preserved for forward compatibility.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, function_id: impl Into<String>) -> Self {
        ToolDescriptor {
            name: name.into(),
            description: String::new(),
            function_id: function_id.into(),
            dangerous: false,
            domain: String::new(),
            output_type: String::new(),
            parameters: ToolParameters::default(),
            resources: Vec::new(),
            default_timeout: None,
            default_rate_interval: None,
            notes: None,
            extra: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_parameters(mut self, parameters: ToolParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_resources(mut self, resources: impl IntoIterator<Item = String>) -> Self {
        self.resources = resources.into_iter().collect();
        self
    }

    pub fn with_dangerous(mut self, dangerous: bool) -> Self {
        self.dangerous = dangerous;
        self
    }

    pub fn with_default_timeout(mut self, seconds: f64) -> Self {
        self.default_timeout = Some(seconds);
        self
    }

    pub fn with_default_rate_interval(mut self, seconds: f64) -> Self {
        self.default_rate_interval = Some(seconds);
        self
    }

    /// Synthesis tools close narrative plans; the planner's validator keys
    /// off this flag.
    pub fn is_synthesis(&self) -> bool {
        self.domain == "synthesis"
    }

    /// Plain-text rendering embedded into planner prompts.
    pub fn to_plain_description(&self) -> String {
        let mut description = format!("> {}: {}", self.name, self.description);
        if self.dangerous {
            description.push_str(" [dangerous: requires approval]");
        }
        if !self.resources.is_empty() {
            description.push_str(&format!(" [resources: {}]", self.resources.join(", ")));
        }
        description.push('\n');
        description.push_str(&self.parameters.properties_description());
        description
    }
}

/// Parses the persisted descriptor file: a JSON map keyed by tool name.
/// Each entry repeats its name; a key/name mismatch is rejected.
pub fn load_descriptors(json: &str) -> Result<Vec<ToolDescriptor>, ToolError> {
    let entries: BTreeMap<String, ToolDescriptor> = serde_json::from_str(json)?;
    let mut descriptors = Vec::with_capacity(entries.len());
    for (key, descriptor) in entries {
        if key != descriptor.name {
            return Err(ToolError::NameMismatch {
                key,
                name: descriptor.name,
            });
        }
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}
