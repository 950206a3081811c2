//! One-shot peripheral initialization and raw GPIO access.
//!
//! Pin direction, level reads and level writes go through raw ESP-IDF sys
//! calls.  Every call returns the driver's `esp_err_t` on failure so the
//! caller can surface it as a hardware error.  The pin functions exist
//! only on ESP-IDF; the host simulation lives in
//! [`BoardGpio`](crate::adapters::hardware::BoardGpio).

#[cfg(target_os = "espidf")]
use esp_idf_sys::*;

#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
use crate::app::commands::PinMode;
#[cfg(target_os = "espidf")]
use crate::pins;

// ── Error type ────────────────────────────────────────────────

/// Errors during one-shot peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    GpioConfigFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
        }
    }
}

// ── Init ──────────────────────────────────────────────────────

/// Park the firmware-owned status LED low.  Client pins are left
/// untouched until `setup_pin`.
#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    gpio_configure(pins::STATUS_LED_GPIO, PinMode::Output).map_err(HwInitError::GpioConfigFailed)?;
    gpio_write(pins::STATUS_LED_GPIO, false).map_err(HwInitError::GpioConfigFailed)?;
    info!("hw_init: status LED parked on GPIO{}", pins::STATUS_LED_GPIO);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── GPIO ──────────────────────────────────────────────────────

/// Set direction.  Outputs are input-output so the level reads back.
#[cfg(target_os = "espidf")]
pub fn gpio_configure(pin: u8, mode: PinMode) -> Result<(), i32> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pin,
        mode: match mode {
            PinMode::Input => gpio_mode_t_GPIO_MODE_INPUT,
            PinMode::Output => gpio_mode_t_GPIO_MODE_INPUT_OUTPUT,
        },
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    // SAFETY: pin was range-checked by pins::is_usable_gpio (or is the
    // firmware's own LED); main-task only.
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 {
        return Err(ret);
    }
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: u8) -> Result<bool, i32> {
    // SAFETY: gpio_get_level is a read-only register access on a
    // configured pin; safe to call from main context.
    Ok((unsafe { gpio_get_level(i32::from(pin)) }) != 0)
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: u8, high: bool) -> Result<(), i32> {
    // SAFETY: gpio_set_level writes to a configured output pin.
    // Main-loop only.
    let ret = unsafe { gpio_set_level(i32::from(pin), u32::from(high)) };
    if ret != ESP_OK as i32 {
        return Err(ret);
    }
    Ok(())
}
