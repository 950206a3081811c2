//! Runtime diagnostics and panic capture.
//!
//! [`RuntimeMetrics`] is the payload of `get_resource_info`: heap usage,
//! uptime, registry and fail-safe counters, and the running image.  It is
//! also the side channel through which failed fail-safe reverts become
//! visible to the controller.
//!
//! The panic hook persists the panic reason to NVS under the "diag"
//! namespace; the next boot reports it once as `last_panic`.

use serde::Serialize;

use crate::app::ports::StoragePort;

const DIAG_NAMESPACE: &str = "diag";
const LAST_PANIC_KEY: &str = "last_panic";

pub type Reason = heapless::String<64>;

/// Copy `text` into a bounded string, truncating at a char boundary.
pub fn bounded<const N: usize>(text: &str) -> heapless::String<N> {
    let mut s = heapless::String::new();
    for c in text.chars() {
        if s.push(c).is_err() {
            break;
        }
    }
    s
}

// ───────────────────────────────────────────────────────────────
// Fail-safe counters
// ───────────────────────────────────────────────────────────────

/// Most recent fail-safe restore the hardware rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevertFailure {
    pub pin: u8,
    pub uptime_ms: u64,
    pub error: heapless::String<48>,
}

/// Counters kept by the service across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailsafeStats {
    pub armed: usize,
    pub fired: u32,
    pub failed: u32,
    pub last_failure: Option<RevertFailure>,
}

// ───────────────────────────────────────────────────────────────
// Runtime metrics
// ───────────────────────────────────────────────────────────────

/// Runtime diagnostics snapshot collected on-demand.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeMetrics {
    pub board: heapless::String<32>,
    pub version: &'static str,
    pub uptime_ms: u64,
    pub mem_free: u32,
    pub mem_alloc: u32,
    pub mem_min_free: u32,
    pub pins_configured: usize,
    pub commands_handled: u32,
    pub failsafe: FailsafeStats,
    pub last_panic: Option<Reason>,
}

/// Inputs the service supplies; the heap figures come from the platform.
pub struct MetricsInput<'a> {
    pub board: &'a str,
    pub uptime_ms: u64,
    pub pins_configured: usize,
    pub commands_handled: u32,
    pub failsafe: FailsafeStats,
    pub last_panic: Option<Reason>,
}

impl RuntimeMetrics {
    #[cfg(target_os = "espidf")]
    pub fn collect(input: MetricsInput<'_>) -> Self {
        use esp_idf_sys::*;
        // SAFETY: heap statistics getters are thread-safe reads.
        let mem_free = unsafe { esp_get_free_heap_size() };
        let mem_min_free = unsafe { esp_get_minimum_free_heap_size() };
        let total = unsafe { heap_caps_get_total_size(MALLOC_CAP_DEFAULT) } as u32;

        Self::assemble(input, mem_free, total.saturating_sub(mem_free), mem_min_free)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn collect(input: MetricsInput<'_>) -> Self {
        // Synthetic heap that "decays" with uptime so simulation paths
        // exercise the same fields as hardware.
        let total: u32 = 327_680; // 320 KB
        let base_free: u32 = 307_200;
        let decay = (input.uptime_ms / 60_000) as u32 * 512;
        let mem_free = base_free.saturating_sub(decay);
        let mem_min_free = (mem_free as f32 * 0.85) as u32;

        Self::assemble(input, mem_free, total - mem_free, mem_min_free)
    }

    fn assemble(input: MetricsInput<'_>, mem_free: u32, mem_alloc: u32, mem_min_free: u32) -> Self {
        Self {
            board: bounded(input.board),
            version: env!("CARGO_PKG_VERSION"),
            uptime_ms: input.uptime_ms,
            mem_free,
            mem_alloc,
            mem_min_free,
            pins_configured: input.pins_configured,
            commands_handled: input.commands_handled,
            failsafe: input.failsafe,
            last_panic: input.last_panic,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Panic capture
// ───────────────────────────────────────────────────────────────

/// Read and clear the panic reason left by the previous boot.
pub fn take_last_panic(storage: &mut dyn StoragePort) -> Option<Reason> {
    let mut buf = [0u8; 64];
    let len = storage.read(DIAG_NAMESPACE, LAST_PANIC_KEY, &mut buf).ok()?;
    let _ = storage.delete(DIAG_NAMESPACE, LAST_PANIC_KEY);
    let reason = bounded(&String::from_utf8_lossy(&buf[..len]));
    log::warn!("Previous boot panicked: {}", reason);
    Some(reason)
}

/// Persist a panic reason for [`take_last_panic`].
pub fn record_panic(storage: &mut dyn StoragePort, reason: &str) {
    let reason: Reason = bounded(reason);
    let _ = storage.write(DIAG_NAMESPACE, LAST_PANIC_KEY, reason.as_bytes());
}

/// Install a panic hook that persists the reason to NVS.
///
/// Must be called once during init, after NVS is ready.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };

        log::error!("PANIC: {}", reason);

        #[cfg(target_os = "espidf")]
        {
            // nvs_flash_init is a no-op once main() has run it.
            match crate::adapters::nvs::NvsAdapter::new() {
                Ok(mut nvs) => record_panic(&mut nvs, reason),
                Err(_) => log::error!("Panic handler: NVS unavailable, reason not persisted"),
            }
        }
    }));
}
