//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::{info, warn};

use crate::app::commands::level_to_u8;
use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::PinConfigured { pin, mode } => {
                info!("GPIO  | pin {} configured as {}", pin, mode.as_str());
            }
            AppEvent::PinWritten { pin, value } => {
                info!("GPIO  | pin {} <- {}", pin, level_to_u8(*value));
            }
            AppEvent::RevertArmed {
                pin,
                revert_to,
                deadline_ms,
            } => {
                info!(
                    "REVERT| pin {} armed: -> {} at t={}ms",
                    pin,
                    level_to_u8(*revert_to),
                    deadline_ms
                );
            }
            AppEvent::RevertCancelled { pin } => {
                info!("REVERT| pin {} cancelled by setup_pin", pin);
            }
            AppEvent::RevertFired { pin, value } => {
                info!("REVERT| pin {} restored to {}", pin, level_to_u8(*value));
            }
            AppEvent::RevertFailed { pin, error } => {
                warn!("REVERT| pin {} restore FAILED: {}", pin, error);
            }
            AppEvent::SystemActionScheduled { action, due_ms } => {
                info!("SYSTEM| {} at t={}ms", action, due_ms);
            }
            AppEvent::ClientConnected => {
                info!("CONN  | client connected");
            }
            AppEvent::ClientDisconnected { commands } => {
                info!("CONN  | client gone after {} commands", commands);
            }
        }
    }
}
