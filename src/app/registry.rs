//! Pin registry: the board's view of every pin a client has configured.
//!
//! Bounded, owned by the service, and mutated only by the dispatcher and
//! by fail-safe reverts.  A pin is usable for read/write only after
//! `setup_pin`.

use embedded_hal::digital::PinState;
use heapless::FnvIndexMap;

use crate::error::PreconditionError;
use crate::pins::MAX_CONFIGURED_PINS;

use super::commands::PinMode;

/// State of one configured pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEntry {
    pub pin: u8,
    pub mode: PinMode,
    /// Last level written (outputs) or sampled (inputs).
    pub value: PinState,
    pub configured: bool,
}

#[derive(Default)]
pub struct PinRegistry {
    entries: FnvIndexMap<u8, PinEntry, MAX_CONFIGURED_PINS>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite the entry for `pin`.
    pub fn configure(
        &mut self,
        pin: u8,
        mode: PinMode,
        value: PinState,
    ) -> Result<&PinEntry, PreconditionError> {
        let entry = PinEntry {
            pin,
            mode,
            value,
            configured: true,
        };
        if let Some(existing) = self.entries.get_mut(&pin) {
            *existing = entry;
        } else {
            self.entries
                .insert(pin, entry)
                .map_err(|_| PreconditionError::RegistryFull)?;
        }
        self.entries.get(&pin).ok_or(PreconditionError::RegistryFull)
    }

    /// Entry for a configured pin.
    pub fn get(&self, pin: u8) -> Result<&PinEntry, PreconditionError> {
        self.entries
            .get(&pin)
            .filter(|e| e.configured)
            .ok_or(PreconditionError::PinNotSetup(pin))
    }

    /// Entry for a configured output pin.
    pub fn output(&self, pin: u8) -> Result<&PinEntry, PreconditionError> {
        let entry = self.get(pin)?;
        if entry.mode != PinMode::Output {
            return Err(PreconditionError::NotOutput(pin));
        }
        Ok(entry)
    }

    /// Record a level observed on or driven onto `pin`.
    pub fn set_value(&mut self, pin: u8, value: PinState) -> Result<(), PreconditionError> {
        match self.entries.get_mut(&pin) {
            Some(e) if e.configured => {
                e.value = value;
                Ok(())
            }
            _ => Err(PreconditionError::PinNotSetup(pin)),
        }
    }

    /// Whether `configure(pin, ..)` would succeed.
    pub fn has_room_for(&self, pin: u8) -> bool {
        self.entries.contains_key(&pin) || self.entries.len() < MAX_CONFIGURED_PINS
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PinEntry> {
        self.entries.values()
    }
}
