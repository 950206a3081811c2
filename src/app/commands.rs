//! Inbound commands accepted by the application core.
//!
//! A [`Command`] is a closed set of actions with typed fields, built from
//! the JSON object the client sent.  Unknown actions and malformed fields
//! are rejected here, before anything touches the registry or hardware.

use core::fmt;

use embedded_hal::digital::PinState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CommandError, MAX_REPORTED_FIELDS, PreconditionError, ValidationError};

// ───────────────────────────────────────────────────────────────
// Actions
// ───────────────────────────────────────────────────────────────

/// Every action the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SetupPin,
    WritePin,
    ReadPin,
    Ping,
    Reset,
    Sleep,
    GetResourceInfo,
    GetVersion,
    ListActions,
    Update,
}

impl Action {
    /// Supported actions in the order `list_actions` reports them.
    pub const ALL: [Action; 10] = [
        Action::SetupPin,
        Action::WritePin,
        Action::ReadPin,
        Action::Ping,
        Action::Reset,
        Action::Sleep,
        Action::GetResourceInfo,
        Action::GetVersion,
        Action::ListActions,
        Action::Update,
    ];

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetupPin => "setup_pin",
            Self::WritePin => "write_pin",
            Self::ReadPin => "read_pin",
            Self::Ping => "ping",
            Self::Reset => "reset",
            Self::Sleep => "sleep",
            Self::GetResourceInfo => "get_resource_info",
            Self::GetVersion => "get_version",
            Self::ListActions => "list_actions",
            Self::Update => "update",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }

    /// Fields that must be present for this action.
    const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::SetupPin => &["pin", "mode"],
            Self::WritePin => &["pin", "value"],
            Self::ReadPin => &["pin"],
            Self::Sleep => &["time_ms", "deep"],
            _ => &[],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ───────────────────────────────────────────────────────────────
// Pin mode
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    Input,
    Output,
}

impl PinMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Commands
// ───────────────────────────────────────────────────────────────

/// A validated command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// (Re)configure a pin, optionally driving an initial level.
    SetupPin {
        pin: u8,
        mode: PinMode,
        value: Option<PinState>,
    },
    /// Drive an output.  With `timeout_ms` the previous level is restored
    /// when the timeout elapses.
    WritePin {
        pin: u8,
        value: PinState,
        timeout_ms: Option<u64>,
    },
    ReadPin {
        pin: u8,
    },
    Ping,
    Reset,
    Sleep {
        time_ms: u64,
        deep: bool,
    },
    GetResourceInfo,
    GetVersion,
    ListActions,
    Update,
}

impl Command {
    /// Build a command from a decoded JSON object.
    pub fn parse(fields: &Map<String, Value>) -> Result<Self, CommandError> {
        let action = match fields.get("action") {
            None => return Err(missing(&["action"]).into()),
            Some(Value::String(name)) => Action::from_name(name)
                .ok_or_else(|| ValidationError::UnknownAction(name.clone()))?,
            Some(_) => return Err(invalid("action", "string").into()),
        };

        let absent: heapless::Vec<&'static str, MAX_REPORTED_FIELDS> = action
            .required_fields()
            .iter()
            .copied()
            .filter(|f| fields.get(*f).is_none_or(Value::is_null))
            .collect();
        if !absent.is_empty() {
            return Err(ValidationError::MissingFields(absent).into());
        }

        let cmd = match action {
            Action::SetupPin => Self::SetupPin {
                pin: pin_field(fields)?,
                mode: mode_field(fields)?,
                value: optional(fields, "value").map(level).transpose()?,
            },
            Action::WritePin => Self::WritePin {
                pin: pin_field(fields)?,
                value: level(&fields["value"])?,
                timeout_ms: optional(fields, "timeout").map(timeout).transpose()?,
            },
            Action::ReadPin => Self::ReadPin {
                pin: pin_field(fields)?,
            },
            Action::Ping => Self::Ping,
            Action::Reset => Self::Reset,
            Action::Sleep => Self::Sleep {
                time_ms: fields["time_ms"]
                    .as_u64()
                    .ok_or(invalid("time_ms", "non-negative integer"))?,
                deep: flag(&fields["deep"], "deep")?,
            },
            Action::GetResourceInfo => Self::GetResourceInfo,
            Action::GetVersion => Self::GetVersion,
            Action::ListActions => Self::ListActions,
            Action::Update => Self::Update,
        };
        Ok(cmd)
    }

    pub fn action(&self) -> Action {
        match self {
            Self::SetupPin { .. } => Action::SetupPin,
            Self::WritePin { .. } => Action::WritePin,
            Self::ReadPin { .. } => Action::ReadPin,
            Self::Ping => Action::Ping,
            Self::Reset => Action::Reset,
            Self::Sleep { .. } => Action::Sleep,
            Self::GetResourceInfo => Action::GetResourceInfo,
            Self::GetVersion => Action::GetVersion,
            Self::ListActions => Action::ListActions,
            Self::Update => Action::Update,
        }
    }
}

// ── Field helpers ─────────────────────────────────────────────

fn missing(names: &[&'static str]) -> ValidationError {
    let mut fields = heapless::Vec::new();
    for name in names.iter().take(MAX_REPORTED_FIELDS) {
        let _ = fields.push(*name);
    }
    ValidationError::MissingFields(fields)
}

fn invalid(field: &'static str, expected: &'static str) -> ValidationError {
    ValidationError::InvalidField { field, expected }
}

/// A present, non-null field.
fn optional<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|v| !v.is_null())
}

fn pin_field(fields: &Map<String, Value>) -> Result<u8, CommandError> {
    let raw = fields["pin"].as_i64().ok_or(invalid("pin", "integer"))?;
    u8::try_from(raw).map_err(|_| PreconditionError::InvalidPin(raw).into())
}

fn mode_field(fields: &Map<String, Value>) -> Result<PinMode, ValidationError> {
    match fields["mode"].as_str() {
        Some("input") => Ok(PinMode::Input),
        Some("output") => Ok(PinMode::Output),
        _ => Err(invalid("mode", "\"input\" or \"output\"")),
    }
}

/// Pin level: `0`/`1` or `false`/`true`.
fn level(value: &Value) -> Result<PinState, CommandError> {
    match value {
        Value::Bool(b) => Ok(PinState::from(*b)),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Ok(PinState::Low),
            Some(1) => Ok(PinState::High),
            _ => Err(invalid("value", "0 or 1").into()),
        },
        _ => Err(invalid("value", "0 or 1").into()),
    }
}

/// Timeout in seconds (float), converted to whole milliseconds rounding up
/// so a revert never fires before the requested time.
fn timeout(value: &Value) -> Result<u64, CommandError> {
    let secs = value
        .as_f64()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .ok_or(invalid("timeout", "non-negative number of seconds"))?;
    Ok((secs * 1000.0).ceil() as u64)
}

fn flag(value: &Value, field: &'static str) -> Result<bool, ValidationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid(field, "boolean")),
        },
        _ => Err(invalid(field, "boolean")),
    }
}

/// Encode a pin level as the wire integer.
pub fn level_to_u8(level: PinState) -> u8 {
    match level {
        PinState::Low => 0,
        PinState::High => 1,
    }
}
