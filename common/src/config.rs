use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DebounceConfig {
    pub bounce_window_ms: u64,
    pub event_queue_depth: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            bounce_window_ms: 50,
            event_queue_depth: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub host: String,
    pub path: String,
    /// Delay before the very first report after boot.
    pub startup_delay_ms: u64,
    /// Unconditional resend interval; guarantees liveness without input activity.
    pub periodic_interval_ms: u64,
    /// Deadline armed after an accepted input transition.
    pub activity_delay_ms: u64,
    /// Wake granularity of the delivery worker.
    pub tick_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            host: "pantry-io-api.herokuapp.com".to_string(),
            path: "/db".to_string(),
            startup_delay_ms: 30_000,
            periodic_interval_ms: 3_600_000,
            activity_delay_ms: 5_000,
            tick_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub poll_interval_ms: u64,
    /// Poll ticks before the session gives up.
    pub max_attempts: u32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_attempts: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Bit mask of input pins, one bit per GPIO in the 0..=39 range.
    pub button_mask: u64,
    pub debounce: DebounceConfig,
    pub report: ReportConfig,
    pub provisioning: ProvisioningConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            button_mask: (1 << 17) | (1 << 5),
            debounce: DebounceConfig::default(),
            report: ReportConfig::default(),
            provisioning: ProvisioningConfig::default(),
        }
    }
}
