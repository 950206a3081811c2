//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements         | Connects to                 |
//! |-----------------|--------------------|-----------------------------|
//! | `hardware`      | GpioPort           | ESP32-S3 GPIO pads          |
//! | `log_sink`      | EventSink          | Serial log output           |
//! | `nvs`           | ConfigPort         | NVS / in-memory store       |
//! |                 | StoragePort        |                             |
//! | `system`        | SystemPort         | Restart, light/deep sleep   |
//! | `tcp_transport` | Transport          | Non-blocking TCP listener   |
//! | `time`          | ClockPort          | ESP32 system timer          |

pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod system;
pub mod tcp_transport;
pub mod time;
