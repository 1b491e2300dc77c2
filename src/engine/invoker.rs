use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::SmithConfig;
use crate::engine::{ApprovalHandler, RateLimiter, ResourceLockManager};
use crate::schemas::{DagNode, ExecutionRecord, NodeStatus};
use crate::tools::ToolRegistry;
use crate::utils::helper::{truncate_for_log, unix_ts};

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Backoff before retry `attempt + 1`: 500ms · 2^(attempt−1), capped at 8s.
fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(1u32 << (attempt - 1).min(16))
        .min(BACKOFF_CAP)
}

/// Identity and cancellation scope a node invocation runs under.
#[derive(Clone)]
pub struct InvokeContext {
    pub agent_id: String,
    pub cancel: CancellationToken,
}

/// Executes one tool call: approval gate, one rate token per invocation,
/// resource acquisition, then attempts under the node deadline with capped
/// exponential backoff between retries. Always produces a record; failures
/// are encoded in its status, never panicked or thrown.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    rate: Arc<RateLimiter>,
    locks: Arc<ResourceLockManager>,
    approval: Option<Arc<dyn ApprovalHandler>>,
    require_approval: bool,
    default_timeout: f64,
    default_retries: u32,
}

impl ToolInvoker {
    pub fn new(
        registry: Arc<ToolRegistry>,
        rate: Arc<RateLimiter>,
        locks: Arc<ResourceLockManager>,
        config: &SmithConfig,
    ) -> Self {
        ToolInvoker {
            registry,
            rate,
            locks,
            approval: None,
            require_approval: config.require_approval,
            default_timeout: config.default_timeout,
            default_retries: config.max_retries,
        }
    }

    pub fn with_approval(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Some(handler);
        self
    }

    pub async fn invoke(
        &self,
        node: &DagNode,
        resolved_inputs: Value,
        ctx: &InvokeContext,
    ) -> ExecutionRecord {
        let start_ts = unix_ts();
        let outcome = self.run(node, &resolved_inputs, ctx).await;

        ExecutionRecord {
            node_id: node.id,
            inputs_resolved: resolved_inputs,
            output: outcome.output,
            status: outcome.status,
            attempts: outcome.attempts,
            start_ts,
            end_ts: unix_ts(),
            error_message: outcome.error_message,
        }
    }

    async fn run(&self, node: &DagNode, inputs: &Value, ctx: &InvokeContext) -> Outcome {
        let entry = match self.registry.lookup(&node.tool) {
            Ok(entry) => entry,
            Err(err) => return Outcome::error(0, err.to_string()),
        };
        let descriptor = &entry.descriptor;

        if self.require_approval && descriptor.dangerous {
            let approved = match &self.approval {
                Some(handler) => handler.approve(descriptor, node).await,
                None => false,
            };
            if !approved {
                log::warn!("approval denied for dangerous tool {}", descriptor.name);
                return Outcome::error(
                    0,
                    format!("approval denied for dangerous tool {}", descriptor.name),
                );
            }
        }

        if let Value::Object(map) = inputs {
            if let Err(reason) = descriptor.parameters.validate(map, false) {
                return Outcome::error(0, format!("invalid inputs at dispatch: {reason}"));
            }
        }

        // One token per invocation; retries below share it.
        if self.rate.acquire(&node.tool, &ctx.cancel).await.is_err() {
            return Outcome::error(0, "canceled while waiting for rate token".to_string());
        }

        let _guard = match self
            .locks
            .acquire_all(&ctx.agent_id, &descriptor.resources, &ctx.cancel)
            .await
        {
            Ok(guard) => guard,
            Err(_) => {
                return Outcome::error(0, "canceled while waiting for resources".to_string())
            }
        };

        let timeout_secs = node.timeout.unwrap_or(self.default_timeout);
        let retries = node.retry.unwrap_or(self.default_retries);
        let deadline = Instant::now() + Duration::from_secs_f64(timeout_secs);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let now = Instant::now();
            if now >= deadline {
                return Outcome::timeout(attempts - 1, timeout_secs);
            }

            let call = entry.callable.call(inputs.clone());
            let result = tokio::select! {
                result = timeout(deadline - now, call) => result,
                _ = ctx.cancel.cancelled() => {
                    return Outcome::error(attempts, "canceled mid-call".to_string());
                }
            };

            match result {
                Ok(Ok(output)) => {
                    log::debug!("tool {} succeeded on attempt {attempts}", node.tool);
                    return Outcome::success(attempts, output);
                }
                Ok(Err(err)) => {
                    let message = err.to_string();
                    if attempts > retries {
                        return Outcome::error(attempts, message);
                    }
                    let delay = backoff_delay(attempts);
                    if Instant::now() + delay >= deadline {
                        // No room left to retry before the node deadline.
                        return Outcome::error(attempts, message);
                    }
                    log::debug!(
                        "tool {} failed on attempt {attempts} ({}), retrying in {delay:?}",
                        node.tool,
                        truncate_for_log(&message, 120)
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = ctx.cancel.cancelled() => {
                            return Outcome::error(attempts, "canceled during backoff".to_string());
                        }
                    }
                }
                Err(_elapsed) => {
                    return Outcome::timeout(attempts, timeout_secs);
                }
            }
        }
    }
}

struct Outcome {
    status: NodeStatus,
    output: Value,
    attempts: u32,
    error_message: Option<String>,
}

impl Outcome {
    fn success(attempts: u32, output: Value) -> Self {
        Outcome {
            status: NodeStatus::Success,
            output,
            attempts,
            error_message: None,
        }
    }

    fn error(attempts: u32, message: String) -> Self {
        Outcome {
            status: NodeStatus::Error,
            output: Value::Null,
            attempts,
            error_message: Some(message),
        }
    }

    fn timeout(attempts: u32, timeout_secs: f64) -> Self {
        Outcome {
            status: NodeStatus::Timeout,
            output: Value::Null,
            attempts: attempts.max(1),
            error_message: Some(format!("timed out after {timeout_secs}s")),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::engine::ApprovalHandler;
    use crate::schemas::DagNode;
    use crate::testing::{FlakyTool, SleepTool};
    use crate::tools::{ToolDescriptor, ToolRegistry};

    fn invoker_for(registry: ToolRegistry, config: &SmithConfig) -> ToolInvoker {
        let registry = Arc::new(registry);
        let rate = Arc::new(RateLimiter::from_registry(&registry, config));
        ToolInvoker::new(registry, rate, Arc::new(ResourceLockManager::new()), config)
    }

    fn ctx() -> InvokeContext {
        InvokeContext {
            agent_id: "test-agent".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    fn node(tool: &str) -> DagNode {
        DagNode::new(0, tool).with_timeout(5.0).with_retry(0)
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("echo", "echo.fn"))
            .function("echo.fn", FlakyTool::new(0, json!("ok")))
            .build()
            .unwrap();
        let invoker = invoker_for(registry, &SmithConfig::default());

        let record = invoker.invoke(&node("echo"), json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Success);
        assert_eq!(record.output, json!("ok"));
        assert_eq!(record.attempts, 1);
        assert!(record.error_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_recover_from_transient_failures() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("flaky", "flaky.fn"))
            .function("flaky.fn", FlakyTool::new(2, json!("recovered")))
            .build()
            .unwrap();
        let invoker = invoker_for(registry, &SmithConfig::default());

        let node = node("flaky").with_retry(3).with_timeout(60.0);
        let record = invoker.invoke(&node, json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Success);
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted_is_error() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("flaky", "flaky.fn"))
            .function("flaky.fn", FlakyTool::new(10, json!(null)))
            .build()
            .unwrap();
        let invoker = invoker_for(registry, &SmithConfig::default());

        let node = node("flaky").with_retry(2).with_timeout(60.0);
        let record = invoker.invoke(&node, json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Error);
        assert_eq!(record.attempts, 3);
        assert!(record
            .error_message
            .unwrap()
            .contains("transient backend failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_timeout_without_retry() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("slow", "slow.fn"))
            .function("slow.fn", SleepTool::new(5.0, json!("late")))
            .build()
            .unwrap();
        let invoker = invoker_for(registry, &SmithConfig::default());

        let node = node("slow").with_timeout(1.0).with_retry(5);
        let record = invoker.invoke(&node, json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Timeout);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_never_outlives_deadline() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("flaky", "flaky.fn"))
            .function("flaky.fn", FlakyTool::new(10, json!(null)))
            .build()
            .unwrap();
        let invoker = invoker_for(registry, &SmithConfig::default());

        // Deadline leaves no room for the first 500ms backoff.
        let node = node("flaky").with_retry(5).with_timeout(0.4);
        let record = invoker.invoke(&node, json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Error);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_record() {
        let registry = ToolRegistry::builder().build().unwrap();
        let invoker = invoker_for(registry, &SmithConfig::default());

        let record = invoker.invoke(&node("ghost"), json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Error);
        assert_eq!(record.attempts, 0);
        assert!(record.error_message.unwrap().contains("not found"));
    }

    struct DenyAll;

    #[async_trait]
    impl ApprovalHandler for DenyAll {
        async fn approve(&self, _descriptor: &ToolDescriptor, _node: &DagNode) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_dangerous_tool_denied_without_handler() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("wipe", "wipe.fn").with_dangerous(true))
            .function("wipe.fn", FlakyTool::new(0, json!("done")))
            .build()
            .unwrap();
        let config = SmithConfig::default().with_require_approval(true);
        let invoker = invoker_for(registry, &config);

        let record = invoker.invoke(&node("wipe"), json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Error);
        assert!(record.error_message.unwrap().contains("approval denied"));
    }

    #[tokio::test]
    async fn test_dangerous_tool_denied_by_handler() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("wipe", "wipe.fn").with_dangerous(true))
            .function("wipe.fn", FlakyTool::new(0, json!("done")))
            .build()
            .unwrap();
        let config = SmithConfig::default().with_require_approval(true);
        let invoker = invoker_for(registry, &config).with_approval(Arc::new(DenyAll));

        let record = invoker.invoke(&node("wipe"), json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Error);
    }

    #[tokio::test]
    async fn test_dangerous_tool_runs_once_approved() {
        use crate::engine::ApproveAll;

        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("wipe", "wipe.fn").with_dangerous(true))
            .function("wipe.fn", FlakyTool::new(0, json!("done")))
            .build()
            .unwrap();
        let config = SmithConfig::default().with_require_approval(true);
        let invoker = invoker_for(registry, &config).with_approval(Arc::new(ApproveAll));

        let record = invoker.invoke(&node("wipe"), json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Success);
        assert_eq!(record.output, json!("done"));
    }

    #[tokio::test]
    async fn test_dangerous_tool_runs_when_approval_not_required() {
        let registry = ToolRegistry::builder()
            .descriptor(ToolDescriptor::new("wipe", "wipe.fn").with_dangerous(true))
            .function("wipe.fn", FlakyTool::new(0, json!("done")))
            .build()
            .unwrap();
        let invoker = invoker_for(registry, &SmithConfig::default());

        let record = invoker.invoke(&node("wipe"), json!({}), &ctx()).await;
        assert_eq!(record.status, NodeStatus::Success);
    }

    #[tokio::test]
    async fn test_dispatch_validation_failure_is_error() {
        use crate::tools::{FieldSpec, FieldType, ToolParameters};

        let registry = ToolRegistry::builder()
            .descriptor(
                ToolDescriptor::new("typed", "typed.fn").with_parameters(
                    ToolParameters::builder()
                        .property("count", FieldSpec::new(FieldType::Integer), true)
                        .build(),
                ),
            )
            .function("typed.fn", FlakyTool::new(0, json!("never")))
            .build()
            .unwrap();
        let invoker = invoker_for(registry, &SmithConfig::default());

        let record = invoker
            .invoke(&node("typed"), json!({"count": "three"}), &ctx())
            .await;
        assert_eq!(record.status, NodeStatus::Error);
        assert!(record.error_message.unwrap().contains("dispatch"));

        let record = invoker
            .invoke(&node("typed"), json!({"count": null}), &ctx())
            .await;
        assert_eq!(record.status, NodeStatus::Success);
    }
}
