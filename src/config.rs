use std::collections::HashMap;

/// Engine configuration. Every option is recognized by exactly one
/// component; defaults are chosen so an empty config runs safely.
#[derive(Debug, Clone)]
pub struct SmithConfig {
    /// Gate tools flagged `dangerous` on an external approval callback.
    pub require_approval: bool,
    /// Retry budget applied when a node omits `retry`.
    pub max_retries: u32,
    /// Deadline in seconds applied when a node omits `timeout`.
    pub default_timeout: f64,
    /// Maximum depth of the sub-agent tree.
    pub max_subagent_depth: u32,
    /// Maximum peers in a fleet.
    pub max_fleet_size: usize,
    /// Worker-pool bound; 1 selects the sequential fallback.
    pub max_concurrent_tools: usize,
    /// Master switch for the rate limiter.
    pub enable_rate_limiting: bool,
    /// Per-tool overrides of `default_rate_interval`, in seconds.
    pub rate_intervals: HashMap<String, f64>,
}

impl Default for SmithConfig {
    fn default() -> Self {
        SmithConfig {
            require_approval: false,
            max_retries: 2,
            default_timeout: 30.0,
            max_subagent_depth: 3,
            max_fleet_size: 5,
            max_concurrent_tools: 4,
            enable_rate_limiting: true,
            rate_intervals: HashMap::new(),
        }
    }
}

impl SmithConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_require_approval(mut self, require_approval: bool) -> Self {
        self.require_approval = require_approval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_default_timeout(mut self, seconds: f64) -> Self {
        self.default_timeout = seconds;
        self
    }

    pub fn with_max_subagent_depth(mut self, depth: u32) -> Self {
        self.max_subagent_depth = depth;
        self
    }

    pub fn with_max_fleet_size(mut self, size: usize) -> Self {
        self.max_fleet_size = size;
        self
    }

    pub fn with_max_concurrent_tools(mut self, bound: usize) -> Self {
        self.max_concurrent_tools = bound.max(1);
        self
    }

    pub fn with_rate_limiting(mut self, enabled: bool) -> Self {
        self.enable_rate_limiting = enabled;
        self
    }

    pub fn with_rate_interval(mut self, tool: impl Into<String>, seconds: f64) -> Self {
        self.rate_intervals.insert(tool.into(), seconds);
        self
    }
}
