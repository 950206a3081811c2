//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ GpioService (domain)
//! ```
//!
//! Driven adapters (GPIO, system control, event sinks, storage) implement
//! these traits.  The [`GpioService`](super::service::GpioService) consumes
//! them via generics, so the domain core never touches hardware directly.

use core::fmt;

use embedded_hal::digital::PinState;

use crate::config::ServerConfig;
use crate::scheduler::{PendingRevert, SystemAction};

use super::commands::PinMode;

// ───────────────────────────────────────────────────────────────
// GPIO port (driven adapter: domain ↔ pins)
// ───────────────────────────────────────────────────────────────

/// Pin-level hardware access, addressed by GPIO number.
///
/// Pin numbers reaching this port have already been checked against
/// [`pins::is_usable_gpio`](crate::pins::is_usable_gpio).
pub trait GpioPort {
    /// Configure direction.  Outputs are configured as input-output so
    /// their level can be read back.
    fn configure(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError>;

    /// Drive an output pin.
    fn write(&mut self, pin: u8, level: PinState) -> Result<(), GpioError>;

    /// Sample a pin's current level.
    fn read(&mut self, pin: u8) -> Result<PinState, GpioError>;
}

// ───────────────────────────────────────────────────────────────
// System port (driven adapter: domain → chip control)
// ───────────────────────────────────────────────────────────────

/// Chip-level control.  Heap figures come from
/// [`RuntimeMetrics`](crate::diagnostics::RuntimeMetrics) instead.
pub trait SystemPort {
    /// Hard restart.  On hardware this does not return.
    fn restart(&mut self);

    /// Light sleep for `ms`; RAM and pin state survive, execution resumes.
    fn light_sleep(&mut self, ms: u64);

    /// Deep sleep for `ms`; the chip resets on wake.
    fn deep_sleep(&mut self, ms: u64);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock since boot.
pub trait ClockPort {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists server configuration.
///
/// Implementations MUST validate before persisting; invalid values are
/// rejected with [`ConfigError::ValidationFailed`], never clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`ServerConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<ServerConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &ServerConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage (boot marker, config).
///
/// Write operations MUST be atomic: no partial writes on power loss.
/// The ESP-IDF NVS API guarantees this natively.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from hardware)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the [`Scheduler`](crate::scheduler::Scheduler)
/// invokes when a deadline elapses.
///
/// The scheduler only keeps time; whoever implements this trait owns the
/// registry and the ports and performs the actual restore or chip action.
pub trait SchedulerDelegate {
    /// A fail-safe deadline elapsed.  The entry is already removed.
    fn on_revert_due(&mut self, revert: PendingRevert);

    /// A deferred restart / sleep is due.
    fn on_system_action_due(&mut self, action: SystemAction);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`GpioPort`] operations.  Carries the driver return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioError {
    Configure(i32),
    Read(i32),
    Write(i32),
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configure(rc) => write!(f, "GPIO configure failed (rc={rc})"),
            Self::Read(rc) => write!(f, "GPIO read failed (rc={rc})"),
            Self::Write(rc) => write!(f, "GPIO write failed (rc={rc})"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
