//! Abends: the error escape protocol
//!
//! An abend is a non-local escape to the interpreter boundary. Inside the
//! dispatch loop it is an `Err` threaded up through `?`; before one
//! escapes, the loop consults the executing unit's error-extension map
//! and, when a user handler is registered for the failing opcode, calls
//! it and resumes at the next instruction instead.
//!
//! The kinds mirror the runtime's failure taxonomy: type, domain,
//! overflow, undefined lookup, class, resource, scheduler.

use sett_core::{CoreError, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbendKind {
    #[error("type error")]
    Type,
    #[error("domain error")]
    Domain,
    #[error("overflow")]
    Overflow,
    #[error("om where a value is required")]
    Undefined,
    #[error("class error")]
    Class,
    #[error("resource exhausted")]
    Resource,
    #[error("scheduler error")]
    Scheduler,
}

/// A failed operation on its way out of the interpreter.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct Abend {
    pub kind: AbendKind,
    pub message: String,
    /// Printable form of the offending operand, when one exists.
    pub operand: Option<String>,
}

impl Abend {
    pub fn new(kind: AbendKind, message: impl Into<String>) -> Self {
        Abend { kind, message: message.into(), operand: None }
    }

    pub fn with_operand(mut self, operand: &Value) -> Self {
        self.operand = Some(operand.printable());
        self
    }

    /// The one-line diagnostic the interpreter prints on escape.
    pub fn diagnostic(&self) -> String {
        match &self.operand {
            Some(op) => format!("*** abend: {self} (operand: {op})"),
            None => format!("*** abend: {self}"),
        }
    }
}

impl From<CoreError> for Abend {
    fn from(e: CoreError) -> Self {
        let kind = match &e {
            CoreError::WrongForm { .. } => AbendKind::Type,
            CoreError::ZeroDivide
            | CoreError::NegativeExponent
            | CoreError::BadIndex(_)
            | CoreError::BadSlice(_, _)
            | CoreError::NotAPair
            | CoreError::IterExhausted => AbendKind::Domain,
            CoreError::RealOverflow => AbendKind::Overflow,
            CoreError::OmValue => AbendKind::Undefined,
        };
        Abend::new(kind, e.to_string())
    }
}

pub(crate) fn type_error(message: impl Into<String>) -> Abend {
    Abend::new(AbendKind::Type, message)
}

pub(crate) fn domain_error(message: impl Into<String>) -> Abend {
    Abend::new(AbendKind::Domain, message)
}

pub(crate) fn class_error(message: impl Into<String>) -> Abend {
    Abend::new(AbendKind::Class, message)
}
