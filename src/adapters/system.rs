//! Chip control adapter: restart and sleep.
//!
//! - **`target_os = "espidf"`**: `esp_restart`, timer-wakeup light sleep
//!   and deep sleep through `esp_idf_sys`.
//! - **`not(target_os = "espidf")`**: simulation: light sleep blocks the
//!   thread, restart and deep sleep are logged and counted.

use log::{info, warn};

use crate::app::ports::SystemPort;

#[derive(Default)]
pub struct EspSystem {
    #[cfg(not(target_os = "espidf"))]
    restarts: u32,
    #[cfg(not(target_os = "espidf"))]
    deep_sleeps: u32,
}

impl EspSystem {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn deep_sleeps(&self) -> u32 {
        self.deep_sleeps
    }
}

#[cfg(target_os = "espidf")]
impl SystemPort for EspSystem {
    fn restart(&mut self) {
        warn!("System: restarting");
        // SAFETY: does not return.
        unsafe { esp_idf_sys::esp_restart() };
    }

    fn light_sleep(&mut self, ms: u64) {
        use esp_idf_sys::*;
        // SAFETY: timer wakeup source plus light sleep from the main task;
        // RAM and GPIO state are retained.
        unsafe {
            let ret = esp_sleep_enable_timer_wakeup(ms.saturating_mul(1_000));
            if ret != ESP_OK {
                warn!("System: timer wakeup rejected ({}), skipping light sleep", ret);
                return;
            }
            let ret = esp_light_sleep_start();
            if ret != ESP_OK {
                warn!("System: light sleep failed ({})", ret);
            }
        }
    }

    fn deep_sleep(&mut self, ms: u64) {
        info!("System: deep sleep {}ms", ms);
        // SAFETY: does not return; the chip resets on wake.
        unsafe { esp_idf_sys::esp_deep_sleep(ms.saturating_mul(1_000)) };
    }
}

#[cfg(not(target_os = "espidf"))]
impl SystemPort for EspSystem {
    fn restart(&mut self) {
        warn!("System(sim): restart requested (not performed)");
        self.restarts += 1;
    }

    fn light_sleep(&mut self, ms: u64) {
        info!("System(sim): light sleep {}ms", ms);
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }

    fn deep_sleep(&mut self, ms: u64) {
        info!("System(sim): deep sleep {}ms (not performed)", ms);
        self.deep_sleeps += 1;
    }
}
