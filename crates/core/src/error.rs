//! Error taxonomy for value-model operations
//!
//! Core operations report failures through `CoreError`; the runtime wraps
//! these into abends with the executing instruction's context attached.
//! The variants mirror the failure classes the interpreter distinguishes:
//! wrong operand form, domain violations (bad index, bad slice, zero
//! divide), and numeric overflow into NaN/Inf territory.

use crate::value::Form;
use thiserror::Error;

/// Failures raised by value-model operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An operand had the wrong form for the operation.
    #[error("expected {expected}, found {found}")]
    WrongForm {
        /// Description of what the operation accepts.
        expected: &'static str,
        /// Form actually supplied.
        found: Form,
    },

    /// Division or modulus with a zero divisor.
    #[error("division by zero")]
    ZeroDivide,

    /// A real operation produced NaN or infinity.
    #[error("real overflow or undefined result")]
    RealOverflow,

    /// Integer exponentiation with a negative exponent that cannot be
    /// redone in reals.
    #[error("negative exponent")]
    NegativeExponent,

    /// Index outside the aggregate (after normalization).
    #[error("index {0} out of range")]
    BadIndex(i64),

    /// Slice bounds that violate `start <= end + 1`.
    #[error("invalid slice bounds {0}..{1}")]
    BadSlice(i64, i64),

    /// Omega used where a value is required.
    #[error("om used where a value is required")]
    OmValue,

    /// A set element could not be read as a [domain, range] pair during
    /// map coercion.
    #[error("set element is not a pair; cannot treat as map")]
    NotAPair,

    /// An exhausted or never-started iterator was advanced.
    #[error("iterator is exhausted")]
    IterExhausted,
}

impl CoreError {
    /// Helper for the common wrong-form case.
    pub fn wrong_form(expected: &'static str, found: Form) -> Self {
        CoreError::WrongForm { expected, found }
    }
}
