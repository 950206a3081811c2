//! Per-command error taxonomy for the PinLink command protocol.
//!
//! Every failure a single command can hit funnels into [`CommandError`].
//! The engine turns it into a failure response (`error` + `exception`)
//! and keeps the connection open, so nothing here is fatal.

use core::fmt;

use crate::app::ports::GpioError;
use crate::update::UpdateError;

// ---------------------------------------------------------------------------
// Top-level command error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Malformed payload, unknown action, or a missing / mistyped field.
    Validation(ValidationError),
    /// The command is well-formed but the device state forbids it.
    Precondition(PreconditionError),
    /// The GPIO driver rejected the operation.
    Hardware(GpioError),
}

impl CommandError {
    /// Error class name reported in the `exception` response field.
    pub fn exception(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::InvalidJson(_) | ValidationError::NotAnObject) => {
                "ParseError"
            }
            Self::Validation(_) => "ValidationError",
            Self::Precondition(_) => "PreconditionError",
            Self::Hardware(_) => "HardwareError",
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{e}"),
            Self::Precondition(e) => write!(f, "{e}"),
            Self::Hardware(e) => write!(f, "hardware: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Maximum number of missing fields listed in one error.
pub const MAX_REPORTED_FIELDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Payload is not valid JSON (carries the parser message).
    InvalidJson(String),
    /// Payload is valid JSON but not an object.
    NotAnObject,
    /// `action` is not one of the supported actions.
    UnknownAction(String),
    /// Required fields are absent.
    MissingFields(heapless::Vec<&'static str, MAX_REPORTED_FIELDS>),
    /// A field is present but has the wrong type or an out-of-range value.
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
    /// A single line exceeded the framer's buffer.
    Oversized { len: usize },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(msg) => write!(f, "invalid JSON: {msg}"),
            Self::NotAnObject => write!(f, "command must be a JSON object"),
            Self::UnknownAction(action) => write!(
                f,
                "unknown action \"{action}\", use \"list_actions\" to list available actions"
            ),
            Self::MissingFields(fields) => {
                write!(f, "incomplete command, missing fields: ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                Ok(())
            }
            Self::InvalidField { field, expected } => {
                write!(f, "invalid field \"{field}\": expected {expected}")
            }
            Self::Oversized { len } => write!(f, "command too long ({len} bytes)"),
        }
    }
}

impl From<ValidationError> for CommandError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

// ---------------------------------------------------------------------------
// Precondition errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    /// `read_pin` / `write_pin` before `setup_pin`.
    PinNotSetup(u8),
    /// `write_pin` on a pin configured as input.
    NotOutput(u8),
    /// Pin number is outside the board's GPIO range or reserved.
    InvalidPin(i64),
    /// Initial `value` passed to `setup_pin` for an input pin.
    ValueOnInput(u8),
    /// No room left in the pin registry.
    RegistryFull,
    /// Deep sleep would drop armed fail-safe timers.
    FailsafeArmed(usize),
    /// The update subsystem refused the request.
    Update(UpdateError),
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PinNotSetup(pin) => write!(f, "pin {pin} not setup"),
            Self::NotOutput(pin) => write!(f, "pin {pin} is configured as input"),
            Self::InvalidPin(pin) => write!(f, "pin {pin} is not a usable GPIO"),
            Self::ValueOnInput(pin) => {
                write!(f, "pin {pin}: initial value requires mode \"output\"")
            }
            Self::RegistryFull => write!(f, "pin registry full"),
            Self::FailsafeArmed(n) => {
                write!(f, "deep sleep refused: {n} fail-safe timer(s) armed")
            }
            Self::Update(e) => write!(f, "update: {e}"),
        }
    }
}

impl From<PreconditionError> for CommandError {
    fn from(e: PreconditionError) -> Self {
        Self::Precondition(e)
    }
}

impl From<GpioError> for CommandError {
    fn from(e: GpioError) -> Self {
        Self::Hardware(e)
    }
}

impl From<UpdateError> for CommandError {
    fn from(e: UpdateError) -> Self {
        Self::Precondition(PreconditionError::Update(e))
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Command-level `Result` alias.
pub type Result<T> = core::result::Result<T, CommandError>;
