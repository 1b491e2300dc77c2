use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::helper::whole_reference;

/// Declared type of a single tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    /// Type conformance with the permitted coercion (integer↔number) and
    /// `null` tolerated everywhere, so a dependency substituted under
    /// `continue` never fails schema checks on its own.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number | FieldType::Integer, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        FieldSpec {
            field_type,
            description: None,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

fn object_type() -> String {
    "object".to_string()
}

/// JSON-schema-shaped parameter map carried by a tool descriptor:
/// `{"type": "object", "properties": {...}, "required": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ToolParameters {
    fn default() -> Self {
        ToolParameters {
            schema_type: object_type(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

impl ToolParameters {
    pub fn builder() -> ToolParametersBuilder {
        ToolParametersBuilder::default()
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Checks an input map against the schema: no unknown keys, all required
    /// keys present, values conforming to their declared types.
    ///
    /// With `allow_references`, strings of the form `$<id>` pass the type
    /// check unexamined; the planner resolves their real type only at
    /// dispatch, after substitution.
    pub fn validate(
        &self,
        inputs: &Map<String, Value>,
        allow_references: bool,
    ) -> Result<(), String> {
        for key in inputs.keys() {
            if !self.properties.contains_key(key) {
                return Err(format!("unknown input key \"{key}\""));
            }
        }

        for required in &self.required {
            if !inputs.contains_key(required) {
                return Err(format!("missing required input \"{required}\""));
            }
        }

        for (key, value) in inputs {
            let spec = match self.properties.get(key) {
                Some(spec) => spec,
                None => continue,
            };
            if allow_references {
                if let Value::String(s) = value {
                    if whole_reference(s).is_some() {
                        continue;
                    }
                }
            }
            if !spec.field_type.accepts(value) {
                return Err(format!(
                    "input \"{key}\" expects type {}, got {}",
                    spec.field_type.as_str(),
                    type_name(value)
                ));
            }
        }

        Ok(())
    }

    /// Fills absent optional keys that declare a default value.
    pub fn apply_defaults(&self, inputs: &mut Map<String, Value>) {
        for (key, spec) in &self.properties {
            if let Some(default) = &spec.default {
                if !inputs.contains_key(key) {
                    inputs.insert(key.clone(), default.clone());
                }
            }
        }
    }

    /// Plain-text rendering of the property map for prompt embedding.
    pub fn properties_description(&self) -> String {
        if self.properties.is_empty() {
            return "    (no parameters)".to_string();
        }
        self.properties
            .iter()
            .map(|(name, spec)| {
                let requirement = if self.is_required(name) {
                    "required"
                } else {
                    "optional"
                };
                let description = spec.description.as_deref().unwrap_or("");
                format!(
                    "    - {name} ({}, {requirement}){}{description}",
                    spec.field_type.as_str(),
                    if description.is_empty() { "" } else { ": " },
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Default)]
pub struct ToolParametersBuilder {
    properties: BTreeMap<String, FieldSpec>,
    required: Vec<String>,
}

impl ToolParametersBuilder {
    pub fn property(mut self, name: impl Into<String>, spec: FieldSpec, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, spec);
        self
    }

    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema_type: object_type(),
            properties: self.properties,
            required: self.required,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
