//! Error types and diagnostic sinks.

use crate::ir::Location;
use std::ops::{BitOr, BitOrAssign};

/// Outcome of a step that keeps going after a failure. Combining two
/// statuses with `|` yields `Error` if either one is `Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
    pub fn is_error(self) -> bool {
        self == Status::Error
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Ok
    }
}

impl BitOr for Status {
    type Output = Status;
    fn bitor(self, rhs: Status) -> Status {
        if self.is_error() || rhs.is_error() {
            Status::Error
        } else {
            Status::Ok
        }
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        *self = *self | rhs;
    }
}

/// One human-readable problem report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub loc: Location,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.loc.offset {
            Some(offset) => write!(f, "{:#010x}: error: {}", offset, self.message),
            None => write!(f, "error: {}", self.message),
        }
    }
}

pub type Errors = Vec<Diagnostic>;

/// A sink for diagnostics. Returning `false` asks the producer to
/// stop as soon as it can.
pub trait ErrorHandler {
    fn on_error(&mut self, loc: Location, message: &str) -> bool;
}

impl ErrorHandler for Errors {
    fn on_error(&mut self, loc: Location, message: &str) -> bool {
        self.push(Diagnostic {
            loc,
            message: message.to_owned(),
        });
        true
    }
}

/// Keeps the first diagnostic and asks to stop.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct StopAfterFirst(pub Errors);

#[cfg(test)]
impl ErrorHandler for StopAfterFirst {
    fn on_error(&mut self, loc: Location, message: &str) -> bool {
        self.0.on_error(loc, message);
        false
    }
}

fn fmt_errors(f: &mut std::fmt::Formatter, what: &str, errors: &Errors) -> std::fmt::Result {
    write!(f, "{} ({} error(s))", what, errors.len())?;
    for e in errors {
        write!(f, "\n  {}", e)?;
    }
    Ok(())
}

/// An error that occurs when translating Wasm to IR.
#[derive(Clone, Debug)]
pub enum FrontendError {
    /// The given WebAssembly feature is not supported.
    UnsupportedFeature(String),
    /// Some dimension of the WebAssembly module is too large to be
    /// supported by this library.
    TooLarge(String),
    /// The module decoded, but the IR builder reported structural
    /// problems along the way.
    Invalid(Errors),
}

impl std::fmt::Display for FrontendError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrontendError::Invalid(errors) => fmt_errors(f, "invalid module", errors),
            _ => std::fmt::Debug::fmt(self, f),
        }
    }
}

impl std::error::Error for FrontendError {}

/// An error that occurs when writing IR back out as Wasm.
#[derive(Clone, Debug)]
pub enum BackendError {
    /// The writer produced bytes but recorded diagnostics, e.g. for
    /// names that were never resolved to indices.
    Invalid(Errors),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BackendError::Invalid(errors) => fmt_errors(f, "cannot encode module", errors),
        }
    }
}

impl std::error::Error for BackendError {}
