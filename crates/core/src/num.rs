//! Integer and real arithmetic
//!
//! Short integers ride `i64` with `checked_*` operations; overflow redoes
//! the operation in `BigInt` and the result demotes back when it fits, so
//! integers stay canonical (a `Big` payload never fits `i64`). Real
//! results are screened for NaN/Inf, which the language treats as errors
//! rather than values.
//!
//! Policy corners:
//! - `/` on integers is truncating integer division.
//! - `mod` takes the divisor's sign (`[0, m)` for positive `m`).
//! - `**` with a negative exponent converts to the real path when both
//!   operands convert to reals.
//! - `0 ** 0` is `1`.

use crate::error::CoreError;
use crate::value::{Form, Value};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::rc::Rc;

/// Wrap a big result, demoting to a short integer when it fits.
pub fn big_value(b: BigInt) -> Value {
    match b.to_i64() {
        Some(i) => Value::Int(i),
        None => Value::Big(Rc::new(b)),
    }
}

/// Screen a real result for NaN/Inf.
pub fn real_value(f: f64) -> Result<Value, CoreError> {
    if f.is_finite() {
        Ok(Value::Real(f))
    } else {
        Err(CoreError::RealOverflow)
    }
}

/// Real view of a numeric value, if it has one.
pub fn to_real(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Big(b) => {
            let f = b.to_f64()?;
            f.is_finite().then_some(f)
        }
        Value::Real(f) => Some(*f),
        _ => None,
    }
}

fn big_of(v: &Value) -> Option<BigInt> {
    match v {
        Value::Int(i) => Some(BigInt::from(*i)),
        Value::Big(b) => Some((**b).clone()),
        _ => None,
    }
}

fn wrong_form(found: &Value) -> CoreError {
    CoreError::wrong_form("a number", found.form())
}

pub fn neg(a: &Value) -> Result<Value, CoreError> {
    match a {
        Value::Int(i) => match i.checked_neg() {
            Some(n) => Ok(Value::Int(n)),
            None => Ok(big_value(-BigInt::from(*i))),
        },
        Value::Big(b) => Ok(big_value(-(**b).clone())),
        Value::Real(f) => Ok(Value::Real(-f)),
        other => Err(wrong_form(other)),
    }
}

pub fn abs(a: &Value) -> Result<Value, CoreError> {
    match a {
        Value::Int(i) => match i.checked_abs() {
            Some(n) => Ok(Value::Int(n)),
            None => Ok(big_value(BigInt::from(*i).abs())),
        },
        Value::Big(b) => Ok(big_value(b.abs())),
        Value::Real(f) => Ok(Value::Real(f.abs())),
        other => Err(wrong_form(other)),
    }
}

pub fn add(a: &Value, b: &Value) -> Result<Value, CoreError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_add(*y) {
            Some(r) => Ok(Value::Int(r)),
            None => Ok(big_value(BigInt::from(*x) + BigInt::from(*y))),
        },
        (Value::Real(_), _) | (_, Value::Real(_)) => {
            let (x, y) = real_pair(a, b)?;
            real_value(x + y)
        }
        _ => {
            let (x, y) = big_pair(a, b)?;
            Ok(big_value(x + y))
        }
    }
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, CoreError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_sub(*y) {
            Some(r) => Ok(Value::Int(r)),
            None => Ok(big_value(BigInt::from(*x) - BigInt::from(*y))),
        },
        (Value::Real(_), _) | (_, Value::Real(_)) => {
            let (x, y) = real_pair(a, b)?;
            real_value(x - y)
        }
        _ => {
            let (x, y) = big_pair(a, b)?;
            Ok(big_value(x - y))
        }
    }
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, CoreError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match x.checked_mul(*y) {
            Some(r) => Ok(Value::Int(r)),
            None => Ok(big_value(BigInt::from(*x) * BigInt::from(*y))),
        },
        (Value::Real(_), _) | (_, Value::Real(_)) => {
            let (x, y) = real_pair(a, b)?;
            real_value(x * y)
        }
        _ => {
            let (x, y) = big_pair(a, b)?;
            Ok(big_value(x * y))
        }
    }
}

pub fn div(a: &Value, b: &Value) -> Result<Value, CoreError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return Err(CoreError::ZeroDivide);
            }
            match x.checked_div(*y) {
                Some(r) => Ok(Value::Int(r)),
                None => Ok(big_value(BigInt::from(*x) / BigInt::from(*y))),
            }
        }
        (Value::Real(_), _) | (_, Value::Real(_)) => {
            let (x, y) = real_pair(a, b)?;
            if y == 0.0 {
                return Err(CoreError::ZeroDivide);
            }
            real_value(x / y)
        }
        _ => {
            let (x, y) = big_pair(a, b)?;
            if y.is_zero() {
                return Err(CoreError::ZeroDivide);
            }
            Ok(big_value(x / y))
        }
    }
}

/// `a mod b`, result carrying the divisor's sign.
pub fn rem(a: &Value, b: &Value) -> Result<Value, CoreError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return Err(CoreError::ZeroDivide);
            }
            if *x == i64::MIN && *y == -1 {
                return Ok(Value::Int(0));
            }
            // fold the truncating remainder onto the divisor's sign; the
            // add cannot overflow because |x % y| < |y|
            let r = x % y;
            let r = if r != 0 && (r < 0) != (*y < 0) { r + y } else { r };
            Ok(Value::Int(r))
        }
        (Value::Real(_), _) | (_, Value::Real(_)) => {
            let (x, y) = real_pair(a, b)?;
            if y == 0.0 {
                return Err(CoreError::ZeroDivide);
            }
            let r = x % y;
            let r = if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r };
            real_value(r)
        }
        _ => {
            let (x, y) = big_pair(a, b)?;
            if y.is_zero() {
                return Err(CoreError::ZeroDivide);
            }
            let r = &x % &y;
            let r = if !r.is_zero() && (r.is_negative() != y.is_negative()) { r + y } else { r };
            Ok(big_value(r))
        }
    }
}

/// `a ** b`.
pub fn exp(a: &Value, b: &Value) -> Result<Value, CoreError> {
    match (a, b) {
        (Value::Real(_), _) | (_, Value::Real(_)) => {
            let (x, y) = real_pair(a, b)?;
            real_value(x.powf(y))
        }
        _ => {
            let (x, y) = big_pair(a, b)?;
            if y.is_negative() {
                // redo in reals when both sides convert
                let (x, y) = real_pair(a, b).map_err(|_| CoreError::NegativeExponent)?;
                return real_value(x.powf(y));
            }
            let e = y.to_u32().ok_or(CoreError::RealOverflow)?;
            if x.is_zero() && e == 0 {
                return Ok(Value::Int(1));
            }
            Ok(big_value(x.pow(e)))
        }
    }
}

pub fn min(a: &Value, b: &Value) -> Result<Value, CoreError> {
    Ok(if num_cmp(a, b)? == Ordering::Greater { b.clone() } else { a.clone() })
}

pub fn max(a: &Value, b: &Value) -> Result<Value, CoreError> {
    Ok(if num_cmp(a, b)? == Ordering::Less { b.clone() } else { a.clone() })
}

/// Numeric comparison across the short/big/real mixtures.
pub fn num_cmp(a: &Value, b: &Value) -> Result<Ordering, CoreError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Real(x), Value::Real(y)) => {
            x.partial_cmp(y).ok_or(CoreError::RealOverflow)
        }
        (Value::Real(_), _) | (_, Value::Real(_)) => {
            let (x, y) = real_pair(a, b)?;
            x.partial_cmp(&y).ok_or(CoreError::RealOverflow)
        }
        _ => {
            let (x, y) = big_pair(a, b)?;
            Ok(x.cmp(&y))
        }
    }
}

/// True when the form is one of the numeric forms.
pub fn is_numeric(v: &Value) -> bool {
    matches!(v.form(), Form::Int | Form::Big | Form::Real)
}

fn real_pair(a: &Value, b: &Value) -> Result<(f64, f64), CoreError> {
    let x = to_real(a).ok_or_else(|| wrong_form(a))?;
    let y = to_real(b).ok_or_else(|| wrong_form(b))?;
    Ok((x, y))
}

fn big_pair(a: &Value, b: &Value) -> Result<(BigInt, BigInt), CoreError> {
    let x = big_of(a).ok_or_else(|| wrong_form(a))?;
    let y = big_of(b).ok_or_else(|| wrong_form(b))?;
    Ok((x, y))
}
