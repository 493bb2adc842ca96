//! Procedure values
//!
//! A `ProcRec` is the heap record behind a procedure-formed specifier.
//! Its locals are static slots in the owning unit's specifier table;
//! `saved` holds the dormant snapshot of those slots whenever the
//! procedure is not live on a call stack, and `active_use` counts live
//! activations so the runtime knows when to swap the arrays. `parent`
//! chains to the lexically enclosing procedure for closure capture.
//!
//! Procedure equality is identity: two records are the same value only
//! when they are the same record.

use crate::value::{CodeRef, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// What runs when the procedure is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcBody {
    /// Bytecode entry point.
    Code(CodeRef),
    /// Built-in registry index.
    Native(u32),
}

#[derive(Debug)]
pub struct ProcRec {
    /// Diagnostic name.
    pub name: String,
    pub body: ProcBody,
    /// Declared formals; var-args procedures accept at least this many.
    pub formal_count: u32,
    pub var_args: bool,
    pub is_const: bool,
    /// Unit whose specifier table holds the locals.
    pub unit: u32,
    /// First local slot and slot count (formals lead the run).
    pub local_base: u32,
    pub local_count: u32,
    /// Lexically enclosing procedure, for closure capture.
    pub parent: Option<Rc<ProcRec>>,
    /// Live activations on any call stack.
    pub active_use: Cell<u32>,
    /// Once-flag while a process switch saves activations.
    pub switch_saved: Cell<bool>,
    /// Dormant locals; meaningful only while `active_use` is zero.
    pub saved: RefCell<Vec<Value>>,
    /// Instance the procedure runs against, when it is a method taken
    /// out of its class.
    pub bound_self: RefCell<Option<Value>>,
}

impl ProcRec {
    pub fn code(
        name: impl Into<String>,
        entry: CodeRef,
        formal_count: u32,
        unit: u32,
        local_base: u32,
        local_count: u32,
    ) -> Self {
        ProcRec {
            name: name.into(),
            body: ProcBody::Code(entry),
            formal_count,
            var_args: false,
            is_const: false,
            unit,
            local_base,
            local_count,
            parent: None,
            active_use: Cell::new(0),
            switch_saved: Cell::new(false),
            saved: RefCell::new(vec![Value::Om; local_count as usize]),
            bound_self: RefCell::new(None),
        }
    }

    pub fn native(name: impl Into<String>, index: u32, formal_count: u32, var_args: bool) -> Self {
        ProcRec {
            name: name.into(),
            body: ProcBody::Native(index),
            formal_count,
            var_args,
            is_const: true,
            unit: 0,
            local_base: 0,
            local_count: 0,
            parent: None,
            active_use: Cell::new(0),
            switch_saved: Cell::new(false),
            saved: RefCell::new(Vec::new()),
            bound_self: RefCell::new(None),
        }
    }

    pub fn with_parent(mut self, parent: Rc<ProcRec>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, ProcBody::Native(_))
    }
}
