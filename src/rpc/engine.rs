//! RPC engine: turns one framed line into one response line.
//!
//! **Transport-decoupled**: the engine does not own a socket.  The
//! connection server feeds it complete lines from the
//! [`LineFramer`](super::codec::LineFramer) and writes back whatever it
//! returns.
//!
//! Every line passes through a three-step pipeline:
//!
//! 1. **Decode**: `serde_json`; anything but a JSON object is a
//!    `ParseError` answered with only `error` / `exception`.
//! 2. **Validate**: [`Command::parse`] checks the action and its fields.
//! 3. **Execute**: [`GpioService::execute`] against registry, scheduler
//!    and ports.
//!
//! Successful responses echo the request and add `time_received` plus the
//! action's result fields.  Failures echo the request and add `error` and
//! `exception`.  No failure closes the connection.

use embedded_hal::digital::PinState;
use log::{debug, warn};
use serde_json::{Map, Value, json};

use crate::app::commands::{Command, level_to_u8};
use crate::app::service::{GpioService, Ports, Reply};
use crate::error::{CommandError, ValidationError};

use super::codec::encode_line;

/// Stateless apart from the rejection counter; one engine serves every
/// session.  Executed commands are counted by the service
/// (`commands_handled` in `get_resource_info`).
#[derive(Default)]
pub struct RpcEngine {
    failed: u32,
}

impl RpcEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one complete line.  Returns the response, `\n` terminated.
    pub fn handle_line(
        &mut self,
        line: &[u8],
        now_ms: u64,
        service: &mut GpioService,
        ports: &mut Ports<'_>,
    ) -> Vec<u8> {
        let request = match decode(line) {
            Ok(request) => request,
            Err(e) => return self.reject(None, &e),
        };

        let result = Command::parse(&request)
            .and_then(|cmd| service.execute(cmd, now_ms, ports).map(|reply| (cmd, reply)));

        match result {
            Ok((cmd, reply)) => {
                debug!("RPC: {} ok", cmd.action());
                render(success(request, now_ms, reply))
            }
            Err(e) => self.reject(Some(request), &e),
        }
    }

    /// Response for a line the framer had to drop.
    pub fn handle_oversized(&mut self, len: usize) -> Vec<u8> {
        self.reject(None, &ValidationError::Oversized { len }.into())
    }

    /// Lines answered with an error since boot.
    pub fn failed(&self) -> u32 {
        self.failed
    }

    fn reject(&mut self, request: Option<Map<String, Value>>, error: &CommandError) -> Vec<u8> {
        self.failed = self.failed.wrapping_add(1);
        warn!("RPC: {}: {}", error.exception(), error);
        render(failure(request, error))
    }
}

// ── Response assembly ─────────────────────────────────────────

fn decode(line: &[u8]) -> Result<Map<String, Value>, CommandError> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::NotAnObject.into()),
        Err(e) => Err(ValidationError::InvalidJson(e.to_string()).into()),
    }
}

/// Echo of `request` with `time_received` and the reply's fields.
pub fn success(mut request: Map<String, Value>, now_ms: u64, reply: Reply) -> Map<String, Value> {
    request.insert("time_received".into(), now_ms.into());
    match reply {
        Reply::Ack => {}
        Reply::Value(level) => {
            request.insert("value".into(), level_json(level));
        }
        Reply::Info(metrics) => {
            let info = serde_json::to_value(&*metrics).unwrap_or_else(|e| json!({ "error": e.to_string() }));
            request.insert("info".into(), info);
        }
        Reply::Version(version) => {
            request.insert("version".into(), version.into());
        }
        Reply::Actions(actions) => {
            let names: Vec<Value> = actions.iter().map(|a| a.as_str().into()).collect();
            request.insert("actions".into(), Value::Array(names));
        }
    }
    request
}

/// Echo of `request` (if it decoded) with `error` and `exception`.
pub fn failure(request: Option<Map<String, Value>>, error: &CommandError) -> Map<String, Value> {
    let mut response = request.unwrap_or_default();
    response.insert("error".into(), error.to_string().into());
    response.insert("exception".into(), error.exception().into());
    response
}

fn level_json(level: PinState) -> Value {
    level_to_u8(level).into()
}

fn render(response: Map<String, Value>) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    match serde_json::to_vec(&Value::Object(response)) {
        Ok(bytes) => encode_line(&bytes, &mut out),
        // Serializing a Value tree cannot fail; keep the line well-formed anyway.
        Err(_) => encode_line(br#"{"error":"encode failed","exception":"ParseError"}"#, &mut out),
    }
    out
}
