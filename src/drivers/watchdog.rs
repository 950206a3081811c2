//! Task Watchdog Timer (TWDT) driver.
//!
//! Subscribes the main task to the ESP-IDF TWDT so a wedged poll loop
//! resets the board.  Fail-safe reverts only fire from that loop.
//!
//! The main loop must call `feed()` on every iteration.

#[cfg(target_os = "espidf")]
use esp_idf_sys::*;

use log::{info, warn};

/// Default stall budget for the main loop.
pub const DEFAULT_TIMEOUT_MS: u32 = 10_000;

pub struct Watchdog {
    timeout_ms: u32,
    subscribed: bool,
    #[cfg(not(target_os = "espidf"))]
    feeds: core::cell::Cell<u64>,
}

impl Watchdog {
    /// Initialise and subscribe the current task to the TWDT.
    #[cfg(target_os = "espidf")]
    pub fn new(timeout_ms: u32) -> Self {
        // SAFETY: reconfigure + add for the calling task, once during init.
        let subscribed = unsafe {
            let cfg = esp_task_wdt_config_t {
                timeout_ms,
                idle_core_mask: 0,
                trigger_panic: true,
            };
            let ret = esp_task_wdt_reconfigure(&cfg);
            if ret != ESP_OK {
                warn!("TWDT reconfigure returned {} (may already be configured)", ret);
            }
            esp_task_wdt_add(core::ptr::null_mut()) == ESP_OK
        };

        if subscribed {
            info!("Watchdog: main task subscribed ({}ms, panic on trigger)", timeout_ms);
        } else {
            warn!("Watchdog: failed to subscribe, loop stalls go undetected");
        }
        Self {
            timeout_ms,
            subscribed,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(timeout_ms: u32) -> Self {
        info!("Watchdog(sim): {}ms budget, not enforced", timeout_ms);
        if timeout_ms == 0 {
            warn!("Watchdog(sim): zero timeout");
        }
        Self {
            timeout_ms,
            subscribed: true,
            feeds: core::cell::Cell::new(0),
        }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Feed the watchdog.  Must be called at least once per timeout.
    #[cfg(target_os = "espidf")]
    pub fn feed(&self) {
        if self.subscribed {
            // SAFETY: resets the TWDT entry of the subscribed calling task.
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn feed(&self) {
        self.feeds.set(self.feeds.get() + 1);
    }

    /// Feeds since construction (simulation only).
    #[cfg(not(target_os = "espidf"))]
    pub fn feeds(&self) -> u64 {
        self.feeds.get()
    }
}
