use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{load_descriptors, Tool, ToolDescriptor, ToolError};
use crate::utils::helper::normalize_tool_name;

/// A descriptor paired with its resolved callable.
#[derive(Clone)]
pub struct RegistryEntry {
    pub descriptor: ToolDescriptor,
    pub callable: Arc<dyn Tool>,
}

/// In-memory catalog of tools: the sole source of truth the planner renders
/// into prompts and the sole authority the orchestrator resolves callables
/// through. Built once at startup, immutable thereafter; reads are
/// shared-reference only and therefore thread-safe.
pub struct ToolRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Result<&RegistryEntry, ToolError> {
        let name = normalize_tool_name(name);
        self.entries
            .get(&name)
            .ok_or(ToolError::ToolNotFound(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize_tool_name(name))
    }

    /// All descriptors in stable (name) order.
    pub fn list_all(&self) -> Vec<&ToolDescriptor> {
        self.entries.values().map(|e| &e.descriptor).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A copy of this registry without the named tool. Used to hand
    /// restricted catalogs to nested planners.
    pub fn without(&self, name: &str) -> ToolRegistry {
        let name = normalize_tool_name(name);
        let entries = self
            .entries
            .iter()
            .filter(|(key, _)| **key != name)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        ToolRegistry { entries }
    }

    /// A copy of this registry extended with one more entry.
    pub fn with_entry(
        &self,
        descriptor: ToolDescriptor,
        callable: Arc<dyn Tool>,
    ) -> Result<ToolRegistry, ToolError> {
        let name = normalize_tool_name(&descriptor.name);
        if self.entries.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        let mut entries = self.entries.clone();
        entries.insert(
            name,
            RegistryEntry {
                descriptor,
                callable,
            },
        );
        Ok(ToolRegistry { entries })
    }

    /// Catalog rendering embedded into planner and fleet prompts.
    pub fn catalog_description(&self) -> String {
        self.entries
            .values()
            .map(|entry| entry.descriptor.to_plain_description())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Two-phase construction: descriptors from the static file, callables bound
/// by `function_id`. `build` fails on duplicate names or unresolved handles.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    descriptors: Vec<ToolDescriptor>,
    functions: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistryBuilder {
    pub fn descriptors_from_json(mut self, json: &str) -> Result<Self, ToolError> {
        self.descriptors.extend(load_descriptors(json)?);
        Ok(self)
    }

    pub fn descriptor(mut self, descriptor: ToolDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn function(mut self, function_id: impl Into<String>, tool: impl Tool + 'static) -> Self {
        self.functions.insert(function_id.into(), Arc::new(tool));
        self
    }

    pub fn build(self) -> Result<ToolRegistry, ToolError> {
        let mut entries = BTreeMap::new();
        for descriptor in self.descriptors {
            let name = normalize_tool_name(&descriptor.name);
            let callable = self
                .functions
                .get(&descriptor.function_id)
                .cloned()
                .ok_or_else(|| ToolError::UnresolvedFunction(descriptor.function_id.clone()))?;
            let entry = RegistryEntry {
                descriptor,
                callable,
            };
            if entries.insert(name.clone(), entry).is_some() {
                return Err(ToolError::DuplicateTool(name));
            }
        }
        Ok(ToolRegistry { entries })
    }
}
