//! Shared fixtures for the crate's unit tests.

use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{LLMError, LLM};
use crate::schemas::Message;
use crate::tools::{
    FieldSpec, FieldType, FunctionTool, Tool, ToolDescriptor, ToolParameters, ToolRegistry,
};

/// An `LLM` that replays canned responses in order and records every prompt
/// it was asked.
#[derive(Clone)]
pub(crate) struct ScriptedLLM {
    responses: Arc<Mutex<VecDeque<String>>>,
    pub calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl ScriptedLLM {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ScriptedLLM {
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(Into::into).collect(),
            )),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn prompt_of_call(&self, index: usize) -> String {
        let calls = self.calls.lock().unwrap();
        calls[index]
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl LLM for ScriptedLLM {
    async fn generate(&self, messages: Vec<Message>) -> Result<String, LLMError> {
        self.calls.lock().unwrap().push(messages);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LLMError::OtherError("scripted responses exhausted".to_string()))
    }
}

/// An `LLM` that picks its response by prompt content: the first rule whose
/// marker occurs in the rendered prompt wins. Deterministic under
/// concurrent callers, unlike an ordered script.
#[derive(Clone)]
pub(crate) struct RouterLLM {
    rules: Arc<Vec<(String, String)>>,
}

impl RouterLLM {
    pub fn new(rules: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        RouterLLM {
            rules: Arc::new(
                rules
                    .into_iter()
                    .map(|(marker, response)| (marker.into(), response.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl LLM for RouterLLM {
    async fn generate(&self, messages: Vec<Message>) -> Result<String, LLMError> {
        let prompt: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| LLMError::OtherError("no routing rule matched".to_string()))
    }
}

/// A tool that sleeps for a fixed duration, then returns its canned output.
pub(crate) struct SleepTool {
    pub delay: Duration,
    pub output: Value,
}

impl SleepTool {
    pub fn new(delay_secs: f64, output: Value) -> Self {
        SleepTool {
            delay: Duration::from_secs_f64(delay_secs),
            output,
        }
    }
}

#[async_trait]
impl Tool for SleepTool {
    async fn call(&self, _inputs: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

/// A tool that fails its first `fail_times` calls, then succeeds.
pub(crate) struct FlakyTool {
    remaining_failures: AtomicU32,
    pub output: Value,
}

impl FlakyTool {
    pub fn new(fail_times: u32, output: Value) -> Self {
        FlakyTool {
            remaining_failures: AtomicU32::new(fail_times),
            output,
        }
    }
}

#[async_trait]
impl Tool for FlakyTool {
    async fn call(&self, _inputs: Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err("transient backend failure".into());
        }
        Ok(self.output.clone())
    }
}

fn string_param(name: &str) -> ToolParameters {
    ToolParameters::builder()
        .property(name, FieldSpec::new(FieldType::String), true)
        .build()
}

/// A small catalog shared by planner, engine, and agent tests: two plain
/// tools and one synthesis tool.
pub(crate) fn test_registry() -> ToolRegistry {
    ToolRegistry::builder()
        .descriptor(
            ToolDescriptor::new("web_search", "search.query")
                .with_description("Searches the web")
                .with_parameters(string_param("query")),
        )
        .descriptor(
            ToolDescriptor::new("get_weather", "weather.lookup")
                .with_description("Current weather for a city")
                .with_parameters(string_param("city")),
        )
        .descriptor(
            ToolDescriptor::new("llm_synthesize", "llm.synthesize")
                .with_description("Writes a narrative from gathered material")
                .with_domain("synthesis")
                .with_parameters(string_param("prompt")),
        )
        .function(
            "search.query",
            FunctionTool::new(|inputs| Ok(json!(format!("results for {}", inputs["query"])))),
        )
        .function("weather.lookup", FunctionTool::new(|_| Ok(json!("sunny"))))
        .function(
            "llm.synthesize",
            FunctionTool::new(|inputs| Ok(json!(format!("narrative: {}", inputs["prompt"])))),
        )
        .build()
        .unwrap()
}
