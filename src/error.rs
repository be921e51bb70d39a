//! # Error Handling for the Chaos VM
//!
//! This module defines the error type used throughout the payload parser,
//! the host-object shim, and the bytecode virtual machine.
//!
//! ## Design
//! - [`VmError`] is a single enum covering every failure the runtime can
//!   produce, from unparseable payloads to in-flight type errors.
//! - The VM's unwind machinery only ever traps the *catchable* variants
//!   (`Type`, `Attribute`, `Js`); everything else escapes to the caller
//!   unchanged. `is_catchable` is the single source of truth for that
//!   distinction.
//! - `Js` carries the raw value raised by the payload's `throw` opcode;
//!   `Rethrown` carries an already-boxed exception object that a
//!   `check_err` re-raised, which must *not* be trapped a second time.
//!
//! ## Display
//! - Implements [`fmt::Display`] with JavaScript-flavoured messages, since
//!   the payload inspects `err.message` strings produced from these.
//! - Implements [`std::error::Error`] so `VmError` integrates with Rust's
//!   standard error handling ecosystem.

use std::fmt;

use crate::value::Value;

/// Errors that can occur while parsing or executing a payload.
#[derive(Debug)]
pub enum VmError {
    /// Payload does not match the expected two-part structure, or a handler
    /// fingerprint is not in the canonical table.
    Parse(String),
    /// Operation was applied to an inappropriate value (catchable).
    Type(String),
    /// A named member was missing where one was required (catchable).
    Attribute(String),
    /// Value raised by the payload's own `throw` opcode (catchable).
    Js(Value),
    /// A pending caught exception re-raised by `check_err`; escapes every
    /// frame without being trapped again.
    Rethrown(Value),
    /// Internal invariant violation: stack underflow, unmapped opcode,
    /// malformed cell. Represents a bug or an unsupported payload revision.
    Invariant(String),
}

impl VmError {
    /// Whether the VM's `stepin`/`stepout` unwind machinery may trap this
    /// error. Mirrors the reference behaviour of catching only
    /// TypeError-class, AttributeError-class, and JsError-class failures.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            VmError::Type(_) | VmError::Attribute(_) | VmError::Js(_)
        )
    }

    /// The message value the boxed exception object exposes as `err.message`.
    ///
    /// For `Js` errors this is the raw thrown value (which may itself be an
    /// object); for everything else it is the formatted message string.
    pub fn message_value(&self) -> Value {
        match self {
            VmError::Js(v) | VmError::Rethrown(v) => v.clone(),
            VmError::Type(m)
            | VmError::Attribute(m)
            | VmError::Parse(m)
            | VmError::Invariant(m) => Value::Str(m.clone()),
        }
    }

    /// JS-style error class name used when formatting stack traces.
    pub fn class_name(&self) -> &'static str {
        match self {
            VmError::Parse(_) => "SyntaxError",
            VmError::Type(_) => "TypeError",
            VmError::Attribute(_) => "ReferenceError",
            VmError::Js(_) | VmError::Rethrown(_) => "Error",
            VmError::Invariant(_) => "InternalError",
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Parse(msg) => {
                write!(f, "SyntaxError: {}", msg)
            }
            VmError::Type(msg) => {
                write!(f, "TypeError: {}", msg)
            }
            VmError::Attribute(msg) => {
                write!(f, "ReferenceError: {}", msg)
            }
            VmError::Js(value) => {
                write!(f, "Error: {}", value.to_display())
            }
            VmError::Rethrown(value) => {
                write!(f, "Error: {}", value.to_display())
            }
            VmError::Invariant(msg) => {
                write!(f, "InternalError: {}", msg)
            }
        }
    }
}

/// Integrates `VmError` with the standard `Error` trait so it can be used in
/// `Result<T, VmError>` and interoperate with the wider ecosystem.
impl std::error::Error for VmError {}
