//! Specifiers: the uniform value cell
//!
//! `Value` is a tagged variant with one arm per form. Heap payloads sit
//! behind `Rc`, so cloning a specifier marks its target and dropping one
//! unmarks it; a payload with more than one owner is read-only and every
//! mutator clones before writing (the aggregates' `Rc::make_mut`
//! discipline, or an explicit fresh copy for objects).
//!
//! Equality is recursive in form order. Distinct forms are never equal;
//! integers stay canonical (`Big` never holds an `i64`-sized value), so
//! the short and big arms never meet. Procedures, iterators, mailboxes,
//! process handles, and opaque natives compare by identity.

use crate::atom::{ATOM_FALSE, ATOM_TRUE};
use crate::mailbox::Mailbox;
use crate::map::Map;
use crate::object::Object;
use crate::procval::ProcRec;
use crate::set::Set;
use crate::string::Str;
use crate::tuple::Tuple;
use crate::iter::IterState;
use num_bigint::BigInt;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Process identifier; stable for the life of the process record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

/// A resolved position in a unit's instruction array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRef {
    pub unit: u32,
    pub ip: u32,
}

/// A class inside a unit's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassRef {
    pub unit: u32,
    pub index: u32,
}

/// Native payloads a built-in can smuggle through the value model.
pub trait OpaqueValue: std::any::Any + fmt::Debug {
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Form discriminants, in comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Form {
    Om,
    Atom,
    Int,
    Big,
    Real,
    Str,
    Set,
    Map,
    Tuple,
    Object,
    Process,
    Proc,
    Label,
    Iter,
    Mailbox,
    Opaque,
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Form::Om => "om",
            Form::Atom => "atom",
            Form::Int => "integer",
            Form::Big => "integer",
            Form::Real => "real",
            Form::Str => "string",
            Form::Set => "set",
            Form::Map => "map",
            Form::Tuple => "tuple",
            Form::Object => "object",
            Form::Process => "process",
            Form::Proc => "procedure",
            Form::Label => "label",
            Form::Iter => "iterator",
            Form::Mailbox => "mailbox",
            Form::Opaque => "native",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    /// The undefined value; never a present element of an aggregate.
    Om,
    Int(i64),
    Big(Rc<BigInt>),
    Real(f64),
    Atom(i64),
    Str(Rc<Str>),
    Set(Rc<Set>),
    Map(Rc<Map>),
    Tuple(Rc<Tuple>),
    Object(Rc<Object>),
    /// A process handle: the object whose class is a process class.
    Process(Rc<Object>),
    Proc(Rc<ProcRec>),
    Label(CodeRef),
    Iter(Rc<RefCell<IterState>>),
    Mailbox(Rc<RefCell<Mailbox>>),
    Opaque(Rc<dyn OpaqueValue>),
}

impl Value {
    pub fn form(&self) -> Form {
        match self {
            Value::Om => Form::Om,
            Value::Int(_) => Form::Int,
            Value::Big(_) => Form::Big,
            Value::Real(_) => Form::Real,
            Value::Atom(_) => Form::Atom,
            Value::Str(_) => Form::Str,
            Value::Set(_) => Form::Set,
            Value::Map(_) => Form::Map,
            Value::Tuple(_) => Form::Tuple,
            Value::Object(_) => Form::Object,
            Value::Process(_) => Form::Process,
            Value::Proc(_) => Form::Proc,
            Value::Label(_) => Form::Label,
            Value::Iter(_) => Form::Iter,
            Value::Mailbox(_) => Form::Mailbox,
            Value::Opaque(_) => Form::Opaque,
        }
    }

    pub fn is_om(&self) -> bool {
        matches!(self, Value::Om)
    }

    /// The boolean atom for `b`.
    pub fn bool_atom(b: bool) -> Value {
        Value::Atom(if b { ATOM_TRUE } else { ATOM_FALSE })
    }

    /// `Some(b)` when this is a boolean atom.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Atom(n) if *n == ATOM_TRUE => Some(true),
            Value::Atom(n) if *n == ATOM_FALSE => Some(false),
            _ => None,
        }
    }

    pub fn str(text: &str) -> Value {
        Value::Str(Rc::new(Str::from_str(text)))
    }

    pub fn set(s: Set) -> Value {
        Value::Set(Rc::new(s))
    }

    pub fn map(m: Map) -> Value {
        Value::Map(Rc::new(m))
    }

    pub fn tuple(t: Tuple) -> Value {
        Value::Tuple(Rc::new(t))
    }

    pub fn mailbox() -> Value {
        Value::Mailbox(Rc::new(RefCell::new(Mailbox::new())))
    }

    /// Cardinality of an aggregate (`#x`); strings count characters,
    /// mailboxes queued entries.
    pub fn card(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.len()),
            Value::Set(s) => Some(s.card()),
            Value::Map(m) => Some(m.card()),
            Value::Tuple(t) => Some(t.len()),
            Value::Mailbox(m) => Some(m.borrow().len()),
            _ => None,
        }
    }

    /// Render for diagnostics: like `Display`, but strings keep their
    /// quotes at the top level.
    pub fn printable(&self) -> String {
        let mut out = String::new();
        // nested rendering always quotes strings
        fmt_nested(self, &mut out);
        out
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Om, Value::Om) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Big(a), Value::Big(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Atom(a), Value::Atom(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Process(a), Value::Process(b)) => Rc::ptr_eq(a, b),
            (Value::Proc(a), Value::Proc(b)) => Rc::ptr_eq(a, b),
            (Value::Label(a), Value::Label(b)) => a == b,
            (Value::Iter(a), Value::Iter(b)) => Rc::ptr_eq(a, b),
            (Value::Mailbox(a), Value::Mailbox(b)) => Rc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => {
                std::ptr::eq(Rc::as_ptr(a) as *const u8, Rc::as_ptr(b) as *const u8)
            }
            _ => false,
        }
    }
}

fn fmt_real(f: f64, out: &mut String) {
    if f == f.trunc() && f.abs() < 1e15 {
        out.push_str(&format!("{f:.1}"));
    } else {
        out.push_str(&format!("{f}"));
    }
}

fn fmt_nested(v: &Value, out: &mut String) {
    match v {
        Value::Om => out.push_str("om"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Big(b) => out.push_str(&b.to_string()),
        Value::Real(f) => fmt_real(*f, out),
        Value::Atom(n) => match *n {
            ATOM_TRUE => out.push_str("true"),
            ATOM_FALSE => out.push_str("false"),
            n => out.push_str(&format!("#{n}")),
        },
        Value::Str(s) => {
            out.push('"');
            out.push_str(&s.to_string());
            out.push('"');
        }
        Value::Set(s) => {
            out.push('{');
            let mut first = true;
            s.for_each(&mut |e| {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                fmt_nested(e, out);
            });
            out.push('}');
        }
        Value::Map(m) => {
            out.push('{');
            let mut first = true;
            m.for_each_pair(&mut |d, r| {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                out.push('[');
                fmt_nested(d, out);
                out.push_str(", ");
                fmt_nested(r, out);
                out.push(']');
            });
            out.push('}');
        }
        Value::Tuple(t) => {
            out.push('[');
            for i in 0..t.len() {
                if i > 0 {
                    out.push_str(", ");
                }
                match t.get(i) {
                    Some(e) => fmt_nested(e, out),
                    None => out.push_str("om"),
                }
            }
            out.push(']');
        }
        Value::Object(_) => out.push_str("<object>"),
        Value::Process(_) => out.push_str("<process>"),
        Value::Proc(p) => out.push_str(&format!("<procedure {}>", p.name)),
        Value::Label(_) => out.push_str("<label>"),
        Value::Iter(_) => out.push_str("<iterator>"),
        Value::Mailbox(_) => out.push_str("<mailbox>"),
        Value::Opaque(_) => out.push_str("<native>"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // program-level printing shows string contents bare
            Value::Str(s) => write!(f, "{s}"),
            other => {
                let mut out = String::new();
                fmt_nested(other, &mut out);
                f.write_str(&out)
            }
        }
    }
}
