//! Transport-agnostic command protocol.
//!
//! Newline-delimited JSON over a single-client byte stream.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Protocol stack                          │
//! │                                                            │
//! │  ┌───────────┐   ┌───────────┐   ┌──────────────────────┐ │
//! │  │ Transport │──▶│   Codec   │──▶│  Engine (dispatcher) │ │
//! │  │ (trait)   │   │ (framing) │   │  → GpioService       │ │
//! │  └───────────┘   └───────────┘   └──────────────────────┘ │
//! │        ▲                                    │             │
//! │        └──────────── response line ─────────┘             │
//! │                                                            │
//! │  Server: owns transport + session, polled by the main loop │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod engine;
pub mod server;
pub mod transport;
