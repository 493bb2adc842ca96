//! Operator semantics
//!
//! Form-dispatched implementations of the overloaded operators,
//! extraction and slicing, sinister assignment, and the iterator
//! instructions. Dispatch is by left-operand form, then right; when
//! either operand is an object, the class's operator slot (or the right
//! operand's mirror slot) takes over through the method-call path, with
//! the frame's extra-code recording how to fold the returned value back
//! into the interrupted operation.
//!
//! Mutation protocol: the target specifier's value is taken out of its
//! slot, made unique (`Rc::make_mut` clones when shared), mutated, and
//! put back. Everything the copy-on-write discipline promises follows
//! from that order.

use crate::abend::{domain_error, type_error, Abend, AbendKind};
use crate::class::OpMethod;
use crate::frame::ExtraCode;
use crate::instruction::{Operand, SpecRef};
use crate::interp::{Exit, Vm};
use crate::opcode::Opcode;
use sett_core::{num, CoreError, Form, IterKind, IterState, IterStep, Map, Set, Str, Tuple, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Requested traversal shape, resolved against the source form once the
/// source is known (which, for objects, is only at `iterator_start`
/// return).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterMode {
    Single,
    Pair,
    AltPair,
    Multi,
    Domain,
    Pow,
    Npow,
}

impl IterMode {
    pub fn from_literal(n: i64) -> Result<IterMode, Abend> {
        Ok(match n {
            1 => IterMode::Single,
            2 => IterMode::Pair,
            3 => IterMode::Multi,
            4 => IterMode::Domain,
            5 => IterMode::Pow,
            6 => IterMode::Npow,
            7 => IterMode::AltPair,
            other => {
                return Err(Abend::new(
                    AbendKind::Resource,
                    format!("unknown iteration mode {other}"),
                ))
            }
        })
    }
}

fn wrong_binary(op: Opcode, left: &Value, right: &Value) -> Abend {
    type_error(format!(
        "{:?} undefined between {} and {}",
        op,
        left.form(),
        right.form()
    ))
    .with_operand(left)
    .map_second(right)
}

impl Abend {
    fn map_second(mut self, right: &Value) -> Abend {
        if let Some(op) = &mut self.operand {
            op.push_str(", ");
            op.push_str(&right.printable());
        }
        self
    }
}

/// Set view of a set-or-map operand.
fn as_set(v: &Value) -> Option<Set> {
    match v {
        Value::Set(s) => Some((**s).clone()),
        Value::Map(m) => Some(m.to_set()),
        _ => None,
    }
}

/// Map view of a set-or-map operand.
fn as_map(v: &Value) -> Result<Map, CoreError> {
    match v {
        Value::Map(m) => Ok((**m).clone()),
        Value::Set(s) => Map::from_set(s),
        other => Err(CoreError::wrong_form("a map", other.form())),
    }
}

fn index_of(v: &Value) -> Result<i64, Abend> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Om => Err(Abend::from(CoreError::OmValue)),
        other => Err(type_error("index is not an integer").with_operand(other)),
    }
}

/// Normalize a 1-based index against `len`; negatives count back from
/// the end. Zero and below (after normalization) is a domain error.
fn norm_index(i: i64, len: usize) -> Result<i64, Abend> {
    let i = if i < 0 { len as i64 + i + 1 } else { i };
    if i <= 0 {
        return Err(Abend::from(CoreError::BadIndex(i)));
    }
    Ok(i)
}

/// Normalize inclusive slice bounds; `start <= end + 1` must hold and
/// `end` may not pass the length.
fn norm_slice(start: i64, end: i64, len: usize) -> Result<(usize, usize), Abend> {
    let s = norm_index(start, len)?;
    let e = if end < 0 { len as i64 + end + 1 } else { end };
    if e < 0 || s > e + 1 || e as usize > len {
        return Err(Abend::from(CoreError::BadSlice(s, e)));
    }
    Ok((s as usize - 1, e as usize))
}

impl Vm {
    // --- binary operators ------------------------------------------------

    pub(crate) fn op_binary(
        &mut self,
        op: Opcode,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let left = self.operand_val(b);
        let right = self.operand_val(c);

        if left.form() == Form::Object || right.form() == Form::Object {
            let m = binary_method(op);
            if self
                .overload_binary(m, result, &left, &right, ExtraCode::None)?
            {
                return Ok(());
            }
            return Err(wrong_binary(op, &left, &right));
        }

        // `x := x with v` mutates through the slot: in place when the
        // payload is unowned elsewhere, a spine clone when it is shared
        if let Operand::Spec(ls) = b {
            if ls == result && matches!(op, Opcode::With | Opcode::Less | Opcode::Lessf) {
                drop(left);
                let mut v = self.take_spec(ls);
                let handled = mutate_in_slot(op, &mut v, &right);
                self.set_spec(ls, v);
                match handled {
                    Ok(true) => return Ok(()),
                    Ok(false) => {}
                    Err(e) => return Err(e),
                }
                let left = self.operand_val(b);
                let value = self.eval_binary(op, &left, &right)?;
                self.set_spec(result, value);
                return Ok(());
            }
        }

        let value = self.eval_binary(op, &left, &right)?;
        self.set_spec(result, value);
        Ok(())
    }

    fn eval_binary(&mut self, op: Opcode, left: &Value, right: &Value) -> Result<Value, Abend> {
        match op {
            Opcode::Add => match (left, right) {
                _ if num::is_numeric(left) && num::is_numeric(right) => {
                    Ok(num::add(left, right)?)
                }
                (Value::Str(x), Value::Str(y)) => {
                    let mut s = (**x).clone();
                    s.concat(y);
                    Ok(Value::Str(Rc::new(s)))
                }
                (Value::Tuple(x), Value::Tuple(y)) => {
                    let mut t = (**x).clone();
                    t.concat(y);
                    Ok(Value::tuple(t))
                }
                _ => match (as_set(left), as_set(right)) {
                    (Some(mut x), Some(y)) => {
                        x.union_with(&y);
                        Ok(Value::set(x))
                    }
                    _ => Err(wrong_binary(op, left, right)),
                },
            },
            Opcode::Sub => {
                if num::is_numeric(left) && num::is_numeric(right) {
                    return Ok(num::sub(left, right)?);
                }
                match (as_set(left), as_set(right)) {
                    (Some(mut x), Some(y)) => {
                        x.difference_with(&y);
                        Ok(Value::set(x))
                    }
                    _ => Err(wrong_binary(op, left, right)),
                }
            }
            Opcode::Mult => match (left, right) {
                _ if num::is_numeric(left) && num::is_numeric(right) => {
                    Ok(num::mul(left, right)?)
                }
                (Value::Int(n), Value::Str(s)) | (Value::Str(s), Value::Int(n)) => {
                    if *n < 0 {
                        return Err(domain_error("repeat count is negative"));
                    }
                    Ok(Value::Str(Rc::new(s.repeat(*n as usize))))
                }
                (Value::Int(n), Value::Tuple(t)) | (Value::Tuple(t), Value::Int(n)) => {
                    if *n < 0 {
                        return Err(domain_error("repeat count is negative"));
                    }
                    Ok(Value::tuple(t.repeat(*n as usize)))
                }
                _ => match (as_set(left), as_set(right)) {
                    (Some(x), Some(y)) => Ok(Value::set(x.intersect(&y))),
                    _ => Err(wrong_binary(op, left, right)),
                },
            },
            Opcode::Div => {
                if num::is_numeric(left) && num::is_numeric(right) {
                    Ok(num::div(left, right)?)
                } else {
                    Err(wrong_binary(op, left, right))
                }
            }
            Opcode::Exp => {
                if num::is_numeric(left) && num::is_numeric(right) {
                    Ok(num::exp(left, right)?)
                } else {
                    Err(wrong_binary(op, left, right))
                }
            }
            Opcode::Mod => {
                if num::is_numeric(left) && num::is_numeric(right) {
                    return Ok(num::rem(left, right)?);
                }
                // symmetric difference on sets
                match (as_set(left), as_set(right)) {
                    (Some(mut x), Some(y)) => {
                        x.sym_difference_with(&y);
                        Ok(Value::set(x))
                    }
                    _ => Err(wrong_binary(op, left, right)),
                }
            }
            Opcode::Min | Opcode::Max => match (left, right) {
                (Value::Str(x), Value::Str(y)) => {
                    let take_right = (x.compare(y) == std::cmp::Ordering::Greater)
                        == (op == Opcode::Min);
                    Ok(if take_right { right.clone() } else { left.clone() })
                }
                _ if num::is_numeric(left) && num::is_numeric(right) => Ok(if op == Opcode::Min {
                    num::min(left, right)?
                } else {
                    num::max(left, right)?
                }),
                _ => Err(wrong_binary(op, left, right)),
            },
            Opcode::With => self.eval_with(left, right),
            Opcode::Less => match as_set(left) {
                Some(mut s) => {
                    if right.is_om() {
                        return Err(Abend::from(CoreError::OmValue));
                    }
                    s.remove(right);
                    Ok(Value::set(s))
                }
                None => Err(wrong_binary(op, left, right)),
            },
            Opcode::Lessf => {
                let mut m = as_map(left)?;
                if right.is_om() {
                    return Err(Abend::from(CoreError::OmValue));
                }
                m.remove_domain(right);
                Ok(Value::map(m))
            }
            Opcode::Npow => {
                // either order: set npow n, n npow set
                let (set, n) = match (as_set(left), as_set(right)) {
                    (Some(s), None) => (s, index_of(right)?),
                    (None, Some(s)) => (s, index_of(left)?),
                    _ => return Err(wrong_binary(op, left, right)),
                };
                if n < 0 {
                    return Err(domain_error("subset cardinality is negative"));
                }
                Ok(Value::set(set.npow_set(n as usize)))
            }
            other => unreachable!("not a binary operator: {other:?}"),
        }
    }

    fn eval_with(&mut self, left: &Value, right: &Value) -> Result<Value, Abend> {
        match left {
            Value::Set(s) => {
                if right.is_om() {
                    return Err(Abend::from(CoreError::OmValue));
                }
                let mut s = (**s).clone();
                s.insert(right.clone());
                Ok(Value::set(s))
            }
            Value::Tuple(t) => {
                let mut t = (**t).clone();
                t.push(right.clone());
                Ok(Value::tuple(t))
            }
            Value::Map(m) => {
                // a 2-tuple inserts as a pair; anything else coerces the
                // map to a set first
                if let Value::Tuple(pair) = right {
                    if pair.len() == 2 {
                        let d = pair.get(0).cloned().unwrap_or(Value::Om);
                        let r = pair.get(1).cloned().unwrap_or(Value::Om);
                        if d.is_om() || r.is_om() {
                            return Err(Abend::from(CoreError::OmValue));
                        }
                        let mut m = (**m).clone();
                        m.insert_pair(d, r);
                        return Ok(Value::map(m));
                    }
                }
                if right.is_om() {
                    return Err(Abend::from(CoreError::OmValue));
                }
                let mut s = m.to_set();
                s.insert(right.clone());
                Ok(Value::set(s))
            }
            Value::Mailbox(mb) => {
                mb.borrow_mut().push(right.clone());
                Ok(left.clone())
            }
            _ => Err(wrong_binary(Opcode::With, left, right)),
        }
    }

    // --- unary operators -------------------------------------------------

    pub(crate) fn op_unary(&mut self, op: Opcode, a: Operand, b: Operand) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let operand = self.operand_val(b);

        if operand.form() == Form::Object {
            if let Some(m) = unary_method(op) {
                if self.overload_unary(m, result, &operand)? {
                    return Ok(());
                }
            }
            return Err(type_error(format!("{op:?} undefined for objects"))
                .with_operand(&operand));
        }

        let value = match op {
            Opcode::Uminus => num::neg(&operand)?,
            Opcode::Not => match operand.as_bool() {
                Some(b) => Value::bool_atom(!b),
                None => {
                    return Err(type_error("not of a non-boolean").with_operand(&operand))
                }
            },
            Opcode::Domain => Value::set(as_map(&operand)?.domain_set()),
            Opcode::Range => Value::set(as_map(&operand)?.range_set()),
            Opcode::Pow => match as_set(&operand) {
                Some(s) => Value::set(s.pow_set()),
                None => {
                    return Err(type_error("pow of a non-set").with_operand(&operand))
                }
            },
            Opcode::Arb => match &operand {
                Value::Set(s) => s.arb().unwrap_or(Value::Om),
                Value::Map(m) => match m.to_set().arb() {
                    Some(v) => v,
                    None => Value::Om,
                },
                other => {
                    return Err(type_error("arb of a non-set").with_operand(other))
                }
            },
            Opcode::Nelt => match operand.card() {
                Some(n) => Value::Int(n as i64),
                None => {
                    return Err(type_error("# of a non-aggregate").with_operand(&operand))
                }
            },
            other => unreachable!("not a unary operator: {other:?}"),
        };
        self.set_spec(result, value);
        Ok(())
    }

    // --- remove-and-yield ------------------------------------------------

    pub(crate) fn op_from(&mut self, op: Opcode, a: Operand, b: Operand) -> Result<(), Abend> {
        let target = self.operand_spec(a)?;
        let source = self.operand_spec(b)?;
        let mut v = self.take_spec(source);
        let mut replacement = None;
        let mut empty_mailbox = None;
        let taken: Result<Value, Abend> = match (&mut v, op) {
            (Value::Set(s), Opcode::From) => Ok(Rc::make_mut(s).take().unwrap_or(Value::Om)),
            (Value::Map(m), Opcode::From) => {
                let mut s = m.to_set();
                let taken = s.take().unwrap_or(Value::Om);
                replacement = Some(Value::set(s));
                Ok(taken)
            }
            (Value::Tuple(t), _) => {
                let t = Rc::make_mut(t);
                if t.is_empty() {
                    Ok(Value::Om)
                } else if op == Opcode::Fromb {
                    let first = t.get(0).cloned().unwrap_or(Value::Om);
                    t.splice(0, 1, &Tuple::new());
                    Ok(first)
                } else {
                    let last = t.get(t.len() - 1).cloned().unwrap_or(Value::Om);
                    t.set(t.len() - 1, Value::Om);
                    Ok(last)
                }
            }
            (Value::Str(s), Opcode::Fromb | Opcode::Frome) => {
                let s = Rc::make_mut(s);
                if s.is_empty() {
                    Ok(Value::Om)
                } else if op == Opcode::Fromb {
                    let ch = s.substring(0, 1);
                    s.splice(0, 1, &Str::new())?;
                    Ok(Value::Str(Rc::new(ch)))
                } else {
                    let ch = s.substring(s.len() - 1, s.len());
                    let end = s.len();
                    s.splice(end - 1, end, &Str::new())?;
                    Ok(Value::Str(Rc::new(ch)))
                }
            }
            (Value::Mailbox(mb), Opcode::From | Opcode::Fromb) => {
                let popped = mb.borrow_mut().pop();
                match popped {
                    Some(inner) => Ok(inner),
                    None => {
                        empty_mailbox = Some(Rc::clone(mb));
                        Ok(Value::Om)
                    }
                }
            }
            (other, _) => Err(type_error("from of a non-aggregate").with_operand(other)),
        };
        if let Some(r) = replacement {
            v = r;
        }
        self.set_spec(source, v);
        if let Some(mb) = empty_mailbox {
            // park until a delivery arrives
            let cond = Box::new(move |_vm: &mut Vm| mb.borrow_mut().pop());
            self.block_current(cond, false, Some(target));
            self.schedule()?;
            return Ok(());
        }
        self.set_spec(target, taken?);
        Ok(())
    }

    // --- conditions ------------------------------------------------------

    pub(crate) fn op_condition(
        &mut self,
        op: Opcode,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let left = self.operand_val(b);
        let right = self.operand_val(c);

        match op {
            Opcode::Eq | Opcode::Ne => {
                let negate = op == Opcode::Ne;
                if left.form() == Form::Object || right.form() == Form::Object {
                    if self.overload_binary(
                        OpMethod::Eq,
                        result,
                        &left,
                        &right,
                        ExtraCode::CmpResult { negate },
                    )? {
                        return Ok(());
                    }
                }
                self.set_spec(result, Value::bool_atom((left == right) != negate));
                Ok(())
            }
            Opcode::Lt | Opcode::Le => {
                if left.form() == Form::Object || right.form() == Form::Object {
                    // a <= b runs as not (b < a)
                    let (x, y, negate) = if op == Opcode::Le {
                        (&right, &left, true)
                    } else {
                        (&left, &right, false)
                    };
                    if self.overload_binary(
                        OpMethod::Lt,
                        result,
                        x,
                        y,
                        ExtraCode::CmpResult { negate },
                    )? {
                        return Ok(());
                    }
                    return Err(wrong_binary(op, &left, &right));
                }
                let ord = match (&left, &right) {
                    (Value::Str(x), Value::Str(y)) => x.compare(y),
                    _ => num::num_cmp(&left, &right)?,
                };
                let b = if op == Opcode::Lt {
                    ord == std::cmp::Ordering::Less
                } else {
                    ord != std::cmp::Ordering::Greater
                };
                self.set_spec(result, Value::bool_atom(b));
                Ok(())
            }
            Opcode::In | Opcode::Notin => {
                let negate = op == Opcode::Notin;
                if right.form() == Form::Object {
                    if self.overload_unary_with_arg(
                        OpMethod::In,
                        result,
                        &right,
                        left.clone(),
                        ExtraCode::CmpResult { negate },
                    )? {
                        return Ok(());
                    }
                }
                let found = match &right {
                    Value::Set(s) => s.contains(&left),
                    Value::Map(m) => m.to_set().contains(&left),
                    Value::Tuple(t) => (0..t.len()).any(|i| t.get(i) == Some(&left)),
                    Value::Str(hay) => match &left {
                        Value::Str(needle) => {
                            let h = hay.to_bytes();
                            let n = needle.to_bytes();
                            n.is_empty()
                                || h.windows(n.len().max(1)).any(|w| w == n.as_slice())
                        }
                        other => {
                            return Err(type_error("in of a non-string needle")
                                .with_operand(other))
                        }
                    },
                    other => {
                        return Err(type_error("in of a non-aggregate").with_operand(other))
                    }
                };
                self.set_spec(result, Value::bool_atom(found != negate));
                Ok(())
            }
            Opcode::Incs => match (as_set(&left), as_set(&right)) {
                (Some(x), Some(y)) => {
                    self.set_spec(result, Value::bool_atom(y.is_subset_of(&x)));
                    Ok(())
                }
                _ => Err(wrong_binary(op, &left, &right)),
            },
            other => unreachable!("not a condition: {other:?}"),
        }
    }

    // --- extraction ------------------------------------------------------

    pub(crate) fn op_of(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let result = self.operand_spec(a)?;
        let callable = self.operand_val(b);
        let arg = self.operand_val(c);

        match &callable {
            Value::Str(s) => {
                let i = norm_index(index_of(&arg)?, s.len())?;
                let v = s
                    .byte_at(i as usize - 1)
                    .map(|ch| Value::Str(Rc::new(Str::from_bytes(&[ch]))))
                    .unwrap_or(Value::Om);
                self.set_spec(result, v);
                Ok(None)
            }
            Value::Tuple(t) => {
                let i = norm_index(index_of(&arg)?, t.len())?;
                let v = t.get(i as usize - 1).cloned().unwrap_or(Value::Om);
                self.set_spec(result, v);
                Ok(None)
            }
            Value::Map(m) => {
                if arg.is_om() {
                    return Err(Abend::from(CoreError::OmValue));
                }
                let v = m.image(&arg);
                self.set_spec(result, v);
                Ok(None)
            }
            Value::Set(_) => {
                let m = as_map(&callable)?;
                if arg.is_om() {
                    return Err(Abend::from(CoreError::OmValue));
                }
                let v = m.image(&arg);
                self.set_spec(result, v);
                Ok(None)
            }
            Value::Proc(_) => {
                self.push_val(arg)?;
                self.call_value(callable, 1, Some(result), false, ExtraCode::None, None, false)?;
                Ok(None)
            }
            Value::Object(_) => {
                if self.overload_unary_with_arg(
                    OpMethod::Of,
                    result,
                    &callable,
                    arg,
                    ExtraCode::None,
                )? {
                    Ok(None)
                } else {
                    Err(crate::abend::class_error("class defines no of method")
                        .with_operand(&callable))
                }
            }
            other => Err(type_error("value cannot be applied").with_operand(other)),
        }
    }

    pub(crate) fn op_ofa(&mut self, a: Operand, b: Operand, c: Operand) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let source = self.operand_val(b);
        let arg = self.operand_val(c);
        match &source {
            Value::Map(m) => {
                self.set_spec(result, Value::set(m.image_set(&arg)));
                Ok(())
            }
            Value::Set(_) => {
                let m = as_map(&source)?;
                self.set_spec(result, Value::set(m.image_set(&arg)));
                Ok(())
            }
            Value::Object(_) => {
                if self.overload_unary_with_arg(
                    OpMethod::Ofa,
                    result,
                    &source,
                    arg,
                    ExtraCode::None,
                )? {
                    Ok(())
                } else {
                    Err(crate::abend::class_error("class defines no ofa method")
                        .with_operand(&source))
                }
            }
            other => Err(type_error("f{{x}} of a non-map").with_operand(other)),
        }
    }

    /// Extraction that also deletes the referenced element.
    pub(crate) fn op_kof(&mut self, a: Operand, b: Operand, c: Operand) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let source = self.operand_spec(b)?;
        let arg = self.operand_val(c);
        let mut v = self.take_spec(source);
        let out = (|| -> Result<Value, Abend> {
            match &mut v {
                Value::Str(s) => {
                    let len = s.len();
                    let i = norm_index(index_of(&arg)?, len)?;
                    if i as usize > len {
                        return Ok(Value::Om);
                    }
                    let s = Rc::make_mut(s);
                    let ch = s.substring(i as usize - 1, i as usize);
                    s.splice(i as usize - 1, i as usize, &Str::new())?;
                    Ok(Value::Str(Rc::new(ch)))
                }
                Value::Tuple(t) => {
                    let i = norm_index(index_of(&arg)?, t.len())?;
                    let t = Rc::make_mut(t);
                    let out = t.get(i as usize - 1).cloned().unwrap_or(Value::Om);
                    if (i as usize) <= t.len() {
                        t.set(i as usize - 1, Value::Om);
                    }
                    Ok(out)
                }
                Value::Map(m) => {
                    let m = Rc::make_mut(m);
                    let out = m.image(&arg);
                    m.remove_domain(&arg);
                    Ok(out)
                }
                Value::Set(_) => {
                    let mut m = as_map(&v)?;
                    let out = m.image(&arg);
                    m.remove_domain(&arg);
                    v = Value::map(m);
                    Ok(out)
                }
                other => Err(type_error("value cannot be applied").with_operand(other)),
            }
        })();
        self.set_spec(source, v);
        let out = out?;
        self.set_spec(result, out);
        Ok(())
    }

    pub(crate) fn op_slice(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let extra = self.fetch_extra()?;
        let result = self.operand_spec(a)?;
        let source = self.operand_val(b);
        let start = index_of(&self.operand_val(c))?;
        let end = index_of(&self.operand_val(extra.a))?;
        match &source {
            Value::Str(s) => {
                let (lo, hi) = norm_slice(start, end, s.len())?;
                self.set_spec(result, Value::Str(Rc::new(s.substring(lo, hi))));
                Ok(None)
            }
            Value::Tuple(t) => {
                let (lo, hi) = norm_slice(start, end, t.len())?;
                self.set_spec(result, Value::tuple(t.slice(lo, hi)));
                Ok(None)
            }
            Value::Object(_) => {
                if self.overload_with_args(
                    OpMethod::Slice,
                    Some(result),
                    &source,
                    vec![Value::Int(start), Value::Int(end)],
                    ExtraCode::None,
                )? {
                    Ok(None)
                } else {
                    Err(crate::abend::class_error("class defines no slice method")
                        .with_operand(&source))
                }
            }
            other => Err(type_error("slice of a non-sequence").with_operand(other)),
        }
    }

    pub(crate) fn op_end(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let result = self.operand_spec(a)?;
        let source = self.operand_val(b);
        let start = index_of(&self.operand_val(c))?;
        match &source {
            Value::Str(s) => {
                let (lo, hi) = norm_slice(start, s.len() as i64, s.len())?;
                self.set_spec(result, Value::Str(Rc::new(s.substring(lo, hi))));
                Ok(None)
            }
            Value::Tuple(t) => {
                let (lo, hi) = norm_slice(start, t.len() as i64, t.len())?;
                self.set_spec(result, Value::tuple(t.slice(lo, hi)));
                Ok(None)
            }
            Value::Object(_) => {
                if self.overload_with_args(
                    OpMethod::End,
                    Some(result),
                    &source,
                    vec![Value::Int(start)],
                    ExtraCode::None,
                )? {
                    Ok(None)
                } else {
                    Err(crate::abend::class_error("class defines no end method")
                        .with_operand(&source))
                }
            }
            other => Err(type_error("slice of a non-sequence").with_operand(other)),
        }
    }

    // --- sinister assignment ---------------------------------------------

    pub(crate) fn op_sof(
        &mut self,
        op: Opcode,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let target = self.operand_spec(a)?;
        let index = self.operand_val(b);
        let value = self.operand_val(c);

        let current = self.spec(target);
        if current.form() == Form::Object {
            let obj = current.clone();
            if self.overload_with_args(
                OpMethod::Sof,
                None,
                &obj,
                vec![index, value],
                ExtraCode::None,
            )? {
                return Ok(None);
            }
            return Err(crate::abend::class_error("class defines no sof method")
                .with_operand(&obj));
        }

        let mut v = self.take_spec(target);
        let res = (|| -> Result<(), Abend> {
            match &mut v {
                Value::Map(m) => {
                    if index.is_om() {
                        return Err(Abend::from(CoreError::OmValue));
                    }
                    Rc::make_mut(m).set_image(&index, value.clone());
                    Ok(())
                }
                Value::Set(_) => {
                    if index.is_om() {
                        return Err(Abend::from(CoreError::OmValue));
                    }
                    let mut m = as_map(&v)?;
                    m.set_image(&index, value.clone());
                    v = Value::map(m);
                    Ok(())
                }
                Value::Tuple(t) => {
                    let i = norm_index(index_of(&index)?, t.len())?;
                    Rc::make_mut(t).set(i as usize - 1, value.clone());
                    Ok(())
                }
                Value::Str(s) => {
                    // erase keeps strings untouched
                    if op == Opcode::Erase {
                        return Ok(());
                    }
                    let Value::Str(repl) = &value else {
                        return Err(type_error("string element assignment needs a string")
                            .with_operand(&value));
                    };
                    let len = s.len();
                    let i = norm_index(index_of(&index)?, len)?;
                    if i as usize > len {
                        return Err(Abend::from(CoreError::BadIndex(i)));
                    }
                    Rc::make_mut(s).splice(i as usize - 1, i as usize, repl)?;
                    Ok(())
                }
                other => Err(type_error("element assignment on a non-aggregate")
                    .with_operand(other)),
            }
        })();
        self.set_spec(target, v);
        res?;
        Ok(None)
    }

    pub(crate) fn op_sofa(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let target = self.operand_spec(a)?;
        let dom = self.operand_val(b);
        let value = self.operand_val(c);

        let current = self.spec(target);
        if current.form() == Form::Object {
            let obj = current.clone();
            if self.overload_with_args(
                OpMethod::Sofa,
                None,
                &obj,
                vec![dom, value],
                ExtraCode::None,
            )? {
                return Ok(None);
            }
            return Err(crate::abend::class_error("class defines no sofa method")
                .with_operand(&obj));
        }

        let Value::Set(vs) = &value else {
            return Err(type_error("f{{x}} assignment needs a set").with_operand(&value));
        };
        if dom.is_om() {
            return Err(Abend::from(CoreError::OmValue));
        }
        let vs = (**vs).clone();
        let mut v = self.take_spec(target);
        let res = (|| -> Result<(), Abend> {
            match &mut v {
                Value::Map(m) => {
                    Rc::make_mut(m).set_image_set(&dom, &vs);
                    Ok(())
                }
                Value::Set(_) => {
                    let mut m = as_map(&v)?;
                    m.set_image_set(&dom, &vs);
                    v = Value::map(m);
                    Ok(())
                }
                other => Err(type_error("f{{x}} assignment on a non-map").with_operand(other)),
            }
        })();
        self.set_spec(target, v);
        res?;
        Ok(None)
    }

    pub(crate) fn op_sslice(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let extra = self.fetch_extra()?;
        let target = self.operand_spec(a)?;
        let start = index_of(&self.operand_val(b))?;
        let end = index_of(&self.operand_val(c))?;
        let value = self.operand_val(extra.a);

        let current = self.spec(target);
        if current.form() == Form::Object {
            let obj = current.clone();
            if self.overload_with_args(
                OpMethod::Sslice,
                None,
                &obj,
                vec![Value::Int(start), Value::Int(end), value],
                ExtraCode::None,
            )? {
                return Ok(None);
            }
            return Err(crate::abend::class_error("class defines no sslice method")
                .with_operand(&obj));
        }

        let mut v = self.take_spec(target);
        let res = (|| -> Result<(), Abend> {
            match (&mut v, &value) {
                (Value::Str(s), Value::Str(repl)) => {
                    let (lo, hi) = norm_slice(start, end, s.len())?;
                    Rc::make_mut(s).splice(lo, hi, repl)?;
                    Ok(())
                }
                (Value::Tuple(t), Value::Tuple(repl)) => {
                    let (lo, hi) = norm_slice(start, end, t.len())?;
                    Rc::make_mut(t).splice(lo, hi, repl);
                    Ok(())
                }
                (other, _) => Err(type_error("slice assignment form mismatch")
                    .with_operand(other)),
            }
        })();
        self.set_spec(target, v);
        res?;
        Ok(None)
    }

    pub(crate) fn op_send(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let target = self.operand_spec(a)?;
        let start = index_of(&self.operand_val(b))?;
        let value = self.operand_val(c);

        let current = self.spec(target);
        if current.form() == Form::Object {
            let obj = current.clone();
            if self.overload_with_args(
                OpMethod::Send,
                None,
                &obj,
                vec![Value::Int(start), value],
                ExtraCode::None,
            )? {
                return Ok(None);
            }
            return Err(crate::abend::class_error("class defines no send method")
                .with_operand(&obj));
        }

        let mut v = self.take_spec(target);
        let res = (|| -> Result<(), Abend> {
            match (&mut v, &value) {
                (Value::Str(s), Value::Str(repl)) => {
                    let (lo, hi) = norm_slice(start, s.len() as i64, s.len())?;
                    Rc::make_mut(s).splice(lo, hi, repl)?;
                    Ok(())
                }
                (Value::Tuple(t), Value::Tuple(repl)) => {
                    let (lo, hi) = norm_slice(start, t.len() as i64, t.len())?;
                    Rc::make_mut(t).splice(lo, hi, repl);
                    Ok(())
                }
                (other, _) => {
                    Err(type_error("tail assignment form mismatch").with_operand(other))
                }
            }
        })();
        self.set_spec(target, v);
        res?;
        Ok(None)
    }

    // --- iteration -------------------------------------------------------

    pub(crate) fn op_iter(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let result = self.operand_spec(a)?;
        let source = self.operand_val(b);
        let mode = IterMode::from_literal(self.operand_int(c)?)?;

        if matches!(source.form(), Form::Object | Form::Process) {
            if let Value::Process(obj) = &source {
                if obj.process_id() != Some(self.current_pid()) {
                    return Err(type_error("cannot iterate another process"));
                }
            }
            // the object supplies the aggregate to iterate
            if self.overload_with_args(
                OpMethod::IterStart,
                Some(result),
                &source,
                Vec::new(),
                ExtraCode::StartIter { mode },
            )? {
                return Ok(None);
            }
            return Err(crate::abend::class_error("class defines no iterator_start method")
                .with_operand(&source));
        }

        let iter = self.iter_from_mode(mode, source)?;
        self.set_spec(result, iter);
        Ok(None)
    }

    /// Resolve a mode against a concrete source form and build the
    /// iterator value.
    pub(crate) fn iter_from_mode(&mut self, mode: IterMode, source: Value) -> Result<Value, Abend> {
        let state = match (mode, source.form()) {
            (IterMode::Npow, _) => {
                let n = index_of(&self.pop_val()?)?;
                if n < 0 {
                    return Err(domain_error("subset cardinality is negative"));
                }
                let set = match as_set(&source) {
                    Some(s) => Value::set(s),
                    None => {
                        return Err(type_error("npow of a non-set").with_operand(&source))
                    }
                };
                IterState::start_npow(set, n as usize)?
            }
            (IterMode::Pow, _) => {
                let set = match as_set(&source) {
                    Some(s) => Value::set(s),
                    None => {
                        return Err(type_error("pow of a non-set").with_operand(&source))
                    }
                };
                IterState::start(IterKind::Pow, set)?
            }
            (IterMode::Domain, _) => {
                let m = as_map(&source)?;
                IterState::start(IterKind::Domain, Value::map(m))?
            }
            (IterMode::Single, Form::Set) => IterState::start(IterKind::Set, source)?,
            (IterMode::Single, Form::Map) => IterState::start(IterKind::Map, source)?,
            (IterMode::Single, Form::Tuple) => IterState::start(IterKind::Tuple, source)?,
            (IterMode::Single, Form::Str) => IterState::start(IterKind::Str, source)?,
            (IterMode::Pair, Form::Map) => IterState::start(IterKind::MapPair, source)?,
            (IterMode::Pair, Form::Tuple) => IterState::start(IterKind::TuplePair, source)?,
            (IterMode::Pair, Form::Str) => IterState::start(IterKind::StrPair, source)?,
            (IterMode::Pair, Form::Set) => {
                let m = as_map(&source)?;
                IterState::start(IterKind::MapPair, Value::map(m))?
            }
            (IterMode::AltPair, Form::Tuple) => {
                IterState::start(IterKind::AltTuplePair, source)?
            }
            (IterMode::Multi, Form::Map) => IterState::start(IterKind::MapMulti, source)?,
            (IterMode::Multi, Form::Set) => {
                let m = as_map(&source)?;
                IterState::start(IterKind::MapMulti, Value::map(m))?
            }
            (mode, form) => {
                return Err(type_error(format!(
                    "cannot iterate a {form} in {mode:?} mode"
                )))
            }
        };
        Ok(Value::Iter(Rc::new(RefCell::new(state))))
    }

    pub(crate) fn op_inext(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
        second: Option<SpecRef>,
    ) -> Result<(), Abend> {
        let target = self.operand_spec(a)?;
        let exhaust = self.operand_target(c)?;
        let iter_val = self.operand_val(b);
        let Value::Iter(state) = &iter_val else {
            return Err(type_error("advance of a non-iterator").with_operand(&iter_val));
        };
        let step = state.borrow_mut().next()?;
        match step {
            None => {
                self.pc.ip = exhaust;
                Ok(())
            }
            Some(IterStep::One(v)) => {
                self.set_spec(target, v);
                Ok(())
            }
            Some(IterStep::Pair(x, y)) => match second {
                Some(r) => {
                    self.set_spec(target, x);
                    self.set_spec(r, y);
                    Ok(())
                }
                None => Err(Abend::new(
                    AbendKind::Resource,
                    "pair iterator advanced without a second target",
                )),
            },
        }
    }
}

/// Slot-targeted mutators for `with`/`less`/`lessf` when the result is
/// the left operand's own slot. `Ok(false)` falls back to the general
/// path (coercions, mailboxes).
fn mutate_in_slot(op: Opcode, v: &mut Value, right: &Value) -> Result<bool, Abend> {
    match (op, &mut *v) {
        (Opcode::With, Value::Set(s)) => {
            if right.is_om() {
                return Err(Abend::from(CoreError::OmValue));
            }
            Rc::make_mut(s).insert(right.clone());
            Ok(true)
        }
        (Opcode::With, Value::Tuple(t)) => {
            Rc::make_mut(t).push(right.clone());
            Ok(true)
        }
        (Opcode::With, Value::Map(m)) => {
            if let Value::Tuple(pair) = right {
                if pair.len() == 2 {
                    let d = pair.get(0).cloned().unwrap_or(Value::Om);
                    let r = pair.get(1).cloned().unwrap_or(Value::Om);
                    if d.is_om() || r.is_om() {
                        return Err(Abend::from(CoreError::OmValue));
                    }
                    Rc::make_mut(m).insert_pair(d, r);
                    return Ok(true);
                }
            }
            Ok(false)
        }
        (Opcode::Less, Value::Set(s)) => {
            if right.is_om() {
                return Err(Abend::from(CoreError::OmValue));
            }
            Rc::make_mut(s).remove(right);
            Ok(true)
        }
        (Opcode::Lessf, Value::Map(m)) => {
            if right.is_om() {
                return Err(Abend::from(CoreError::OmValue));
            }
            Rc::make_mut(m).remove_domain(right);
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Operator slot for a binary opcode.
fn binary_method(op: Opcode) -> OpMethod {
    match op {
        Opcode::Add => OpMethod::Add,
        Opcode::Sub => OpMethod::Sub,
        Opcode::Mult => OpMethod::Mult,
        Opcode::Div => OpMethod::Div,
        Opcode::Exp => OpMethod::Exp,
        Opcode::Mod => OpMethod::Mod,
        Opcode::Min => OpMethod::Min,
        Opcode::Max => OpMethod::Max,
        Opcode::With => OpMethod::With,
        Opcode::Less => OpMethod::Less,
        Opcode::Lessf => OpMethod::Lessf,
        Opcode::Npow => OpMethod::Npow,
        other => unreachable!("not a binary operator: {other:?}"),
    }
}

/// Operator slot for a unary opcode; `not` has none.
fn unary_method(op: Opcode) -> Option<OpMethod> {
    match op {
        Opcode::Uminus => Some(OpMethod::Uminus),
        Opcode::Not => None,
        Opcode::Domain => Some(OpMethod::Domain),
        Opcode::Range => Some(OpMethod::Range),
        Opcode::Pow => Some(OpMethod::Pow),
        Opcode::Arb => Some(OpMethod::Arb),
        Opcode::Nelt => Some(OpMethod::Nelt),
        other => unreachable!("not a unary operator: {other:?}"),
    }
}
