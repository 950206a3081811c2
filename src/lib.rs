//! PinLink firmware library.
//!
//! Exposes the command-protocol engine, the domain core and the adapters
//! for the binary and for host-side integration testing.  All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod pins;
pub mod rpc;
pub mod scheduler;
pub mod update;

pub mod adapters;
pub mod drivers;
