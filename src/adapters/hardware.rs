//! Hardware adapter: bridges the board's GPIO pads to [`GpioPort`].
//!
//! This is the only module in the system that touches pin registers.  On
//! ESP-IDF it forwards to the raw driver calls in
//! [`hw_init`](crate::drivers::hw_init).  On other targets it simulates
//! the pads in memory so the full command path runs on the host.

use embedded_hal::digital::PinState;

use crate::app::commands::PinMode;
use crate::app::ports::{GpioError, GpioPort};

#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;

#[cfg(not(target_os = "espidf"))]
use crate::pins::GPIO_COUNT;

/// `ESP_ERR_INVALID_STATE`, reported by the simulation for misuse the
/// real driver would also reject.
#[cfg(not(target_os = "espidf"))]
const SIM_ERR_INVALID_STATE: i32 = 0x103;

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Copy)]
struct SimPad {
    mode: PinMode,
    level: PinState,
}

/// GPIO port backed by the ESP32-S3 pads.
pub struct BoardGpio {
    #[cfg(not(target_os = "espidf"))]
    pads: [Option<SimPad>; GPIO_COUNT as usize],
}

impl Default for BoardGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardGpio {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            pads: [None; GPIO_COUNT as usize],
        }
    }

    /// Drive the external level seen by a simulated input pad.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_input_level(&mut self, pin: u8, level: PinState) {
        if let Some(Some(pad)) = self.pads.get_mut(pin as usize) {
            pad.level = level;
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn pad(&mut self, pin: u8) -> Option<&mut SimPad> {
        self.pads.get_mut(pin as usize).and_then(Option::as_mut)
    }
}

#[cfg(target_os = "espidf")]
impl GpioPort for BoardGpio {
    fn configure(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
        hw_init::gpio_configure(pin, mode).map_err(GpioError::Configure)
    }

    fn write(&mut self, pin: u8, level: PinState) -> Result<(), GpioError> {
        hw_init::gpio_write(pin, level == PinState::High).map_err(GpioError::Write)
    }

    fn read(&mut self, pin: u8) -> Result<PinState, GpioError> {
        hw_init::gpio_read(pin)
            .map(PinState::from)
            .map_err(GpioError::Read)
    }
}

#[cfg(not(target_os = "espidf"))]
impl GpioPort for BoardGpio {
    fn configure(&mut self, pin: u8, mode: PinMode) -> Result<(), GpioError> {
        let slot = self
            .pads
            .get_mut(pin as usize)
            .ok_or(GpioError::Configure(SIM_ERR_INVALID_STATE))?;
        let level = slot.map_or(PinState::Low, |p| p.level);
        *slot = Some(SimPad { mode, level });
        Ok(())
    }

    fn write(&mut self, pin: u8, level: PinState) -> Result<(), GpioError> {
        match self.pad(pin) {
            Some(pad) if pad.mode == PinMode::Output => {
                pad.level = level;
                Ok(())
            }
            _ => Err(GpioError::Write(SIM_ERR_INVALID_STATE)),
        }
    }

    fn read(&mut self, pin: u8) -> Result<PinState, GpioError> {
        self.pad(pin)
            .map(|pad| pad.level)
            .ok_or(GpioError::Read(SIM_ERR_INVALID_STATE))
    }
}
