//! Outbound application events.
//!
//! The [`GpioService`](super::service::GpioService) and the connection
//! server emit these through the [`EventSink`](super::ports::EventSink)
//! port.  Adapters on the other side decide what to do with them.

use embedded_hal::digital::PinState;

use super::commands::PinMode;
use super::ports::GpioError;

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A pin was (re)configured.
    PinConfigured { pin: u8, mode: PinMode },

    /// A client drove an output.
    PinWritten { pin: u8, value: PinState },

    /// A fail-safe revert was armed (or re-armed with a new deadline).
    RevertArmed {
        pin: u8,
        revert_to: PinState,
        deadline_ms: u64,
    },

    /// An armed revert was dropped because the pin was reconfigured.
    RevertCancelled { pin: u8 },

    /// A deadline elapsed and the pin was restored.
    RevertFired { pin: u8, value: PinState },

    /// A deadline elapsed but the hardware rejected the restore.
    RevertFailed { pin: u8, error: GpioError },

    /// A reset / sleep / update restart was queued.
    SystemActionScheduled { action: &'static str, due_ms: u64 },

    /// A client connected to the command server.
    ClientConnected,

    /// The session ended (`commands` answered during it).
    ClientDisconnected { commands: u32 },
}
