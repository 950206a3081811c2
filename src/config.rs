//! Server configuration parameters
//!
//! All tunable parameters for the PinLink board.
//! Values can be overridden via NVS (non-volatile storage).

use serde::{Deserialize, Serialize};

/// Default TCP port the command server listens on.
pub const DEFAULT_PORT: u16 = 12345;

/// Core server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    // --- Network ---
    /// TCP port for the command server
    pub port: u16,

    // --- Timing ---
    /// Idle delay between main-loop iterations (milliseconds).
    /// Bounds how late a fail-safe revert can fire.
    pub poll_interval_ms: u32,
    /// Delay before a requested reset/sleep/update restart runs, so the
    /// response reaches the client first (milliseconds)
    pub system_action_delay_ms: u32,

    // --- Update ---
    /// Boot attempts a trial image gets before it is rolled back
    pub max_trial_boots: u8,

    // --- Identity ---
    /// Board name reported by `get_resource_info`
    pub board: heapless::String<32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut board = heapless::String::new();
        let _ = board.push_str("esp32s3");
        Self {
            port: DEFAULT_PORT,

            poll_interval_ms: 10,         // 100 Hz
            system_action_delay_ms: 1000, // 1 s

            max_trial_boots: 3,

            board,
        }
    }
}

impl ServerConfig {
    /// Range-check every field.  Returns the offending field description.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.port == 0 {
            return Err("port must be non-zero");
        }
        if !(1..=1000).contains(&self.poll_interval_ms) {
            return Err("poll_interval_ms must be 1–1000");
        }
        if self.system_action_delay_ms > 10_000 {
            return Err("system_action_delay_ms must be 0–10000");
        }
        if !(1..=10).contains(&self.max_trial_boots) {
            return Err("max_trial_boots must be 1–10");
        }
        Ok(())
    }
}
