//! GPIO assignments and the usable-pin map for the ESP32-S3 board.
//!
//! Single source of truth: the GPIO adapter and the dispatcher both ask
//! this module whether a pin number may be handed to a client.

// ---------------------------------------------------------------------------
// Board limits
// ---------------------------------------------------------------------------

/// Number of GPIO pads on the ESP32-S3 (GPIO0 – GPIO48).
pub const GPIO_COUNT: u8 = 49;

/// Capacity of the pin registry.  Power of two (heapless index map).
pub const MAX_CONFIGURED_PINS: usize = 64;

// ---------------------------------------------------------------------------
// Reserved pins
// ---------------------------------------------------------------------------

/// On-board status LED (kept for the firmware itself).
pub const STATUS_LED_GPIO: u8 = 48;

/// USB-Serial-JTAG D- / D+.
pub const USB_DM_GPIO: u8 = 19;
pub const USB_DP_GPIO: u8 = 20;

/// UART0 console TX / RX.
pub const UART_TX_GPIO: u8 = 43;
pub const UART_RX_GPIO: u8 = 44;

/// Not bonded out on the ESP32-S3.
const MISSING_GPIO: core::ops::RangeInclusive<u8> = 22..=25;

/// Octal SPI flash / PSRAM bus.
const FLASH_GPIO: core::ops::RangeInclusive<u8> = 26..=32;

/// Whether `pin` exists on the board and is free for client use.
pub fn is_usable_gpio(pin: i64) -> bool {
    let Ok(pin) = u8::try_from(pin) else {
        return false;
    };
    pin < GPIO_COUNT
        && !MISSING_GPIO.contains(&pin)
        && !FLASH_GPIO.contains(&pin)
        && !matches!(
            pin,
            STATUS_LED_GPIO | USB_DM_GPIO | USB_DP_GPIO | UART_TX_GPIO | UART_RX_GPIO
        )
}
