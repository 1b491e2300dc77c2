use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::SmithConfig;
use crate::engine::Canceled;
use crate::tools::ToolRegistry;
use crate::utils::helper::normalize_tool_name;

struct Gate {
    interval: Duration,
    next_allowed: Mutex<Option<Instant>>,
}

/// Per-tool minimum-interval gate.
///
/// `acquire` blocks the caller until the tool's next permitted instant and
/// then reserves the following slot. Waiters are not served FIFO; whoever
/// reacquires the gate mutex first after a sleep wins the slot. Tools
/// without a configured interval are never gated.
pub struct RateLimiter {
    gates: HashMap<String, Gate>,
}

impl RateLimiter {
    /// Builds the gate table once at startup: per-tool config overrides
    /// layered over each descriptor's `default_rate_interval`. A disabled
    /// limiter gates nothing.
    pub fn from_registry(registry: &ToolRegistry, config: &SmithConfig) -> Self {
        let mut gates = HashMap::new();
        if !config.enable_rate_limiting {
            return RateLimiter { gates };
        }

        for descriptor in registry.list_all() {
            let name = normalize_tool_name(&descriptor.name);
            let interval = config
                .rate_intervals
                .get(&name)
                .copied()
                .or(descriptor.default_rate_interval);
            if let Some(seconds) = interval {
                if seconds > 0.0 {
                    gates.insert(
                        name,
                        Gate {
                            interval: Duration::from_secs_f64(seconds),
                            next_allowed: Mutex::new(None),
                        },
                    );
                }
            }
        }
        RateLimiter { gates }
    }

    pub fn is_gated(&self, tool: &str) -> bool {
        self.gates.contains_key(&normalize_tool_name(tool))
    }

    pub async fn acquire(&self, tool: &str, cancel: &CancellationToken) -> Result<(), Canceled> {
        let Some(gate) = self.gates.get(&normalize_tool_name(tool)) else {
            return Ok(());
        };

        loop {
            let wait = {
                let mut next_allowed = gate.next_allowed.lock().await;
                let now = Instant::now();
                match *next_allowed {
                    Some(next) if next > now => next - now,
                    _ => {
                        *next_allowed = Some(now + gate.interval);
                        log::debug!("rate token granted for {tool}");
                        return Ok(());
                    }
                }
            };

            tokio::select! {
                _ = sleep(wait) => {}
                _ = cancel.cancelled() => return Err(Canceled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tools::{FunctionTool, ToolDescriptor, ToolRegistry};

    fn limited_registry(interval: f64) -> ToolRegistry {
        ToolRegistry::builder()
            .descriptor(
                ToolDescriptor::new("web_search", "search.query")
                    .with_default_rate_interval(interval),
            )
            .descriptor(ToolDescriptor::new("free_tool", "free.fn"))
            .function("search.query", FunctionTool::new(|_| Ok(json!(null))))
            .function("free.fn", FunctionTool::new(|_| Ok(json!(null))))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_acquisitions_respect_floor() {
        let limiter =
            RateLimiter::from_registry(&limited_registry(1.0), &SmithConfig::default());
        let cancel = CancellationToken::new();

        let started = Instant::now();
        limiter.acquire("web_search", &cancel).await.unwrap();
        limiter.acquire("web_search", &cancel).await.unwrap();
        limiter.acquire("web_search", &cancel).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unconfigured_tool_is_not_gated() {
        let limiter =
            RateLimiter::from_registry(&limited_registry(1.0), &SmithConfig::default());
        assert!(!limiter.is_gated("free_tool"));
        limiter
            .acquire("free_tool", &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_master_switch_disables_all_gates() {
        let config = SmithConfig::default().with_rate_limiting(false);
        let limiter = RateLimiter::from_registry(&limited_registry(10.0), &config);
        assert!(!limiter.is_gated("web_search"));
    }

    #[tokio::test]
    async fn test_config_override_takes_precedence() {
        let config = SmithConfig::default().with_rate_interval("web_search", 0.0);
        let limiter = RateLimiter::from_registry(&limited_registry(10.0), &config);
        assert!(!limiter.is_gated("web_search"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let limiter =
            RateLimiter::from_registry(&limited_registry(60.0), &SmithConfig::default());
        let cancel = CancellationToken::new();
        limiter.acquire("web_search", &cancel).await.unwrap();

        cancel.cancel();
        let err = limiter.acquire("web_search", &cancel).await.unwrap_err();
        assert_eq!(err, Canceled);
    }
}
