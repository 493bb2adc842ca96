//! Class descriptors
//!
//! A class owns an ordered list of instance variables (each backed by a
//! static specifier slot in the unit table, holding the currently loaded
//! instance's value), a dense slot table for methods and variables, and
//! the per-operator method indexes used by overload dispatch. The
//! runtime state is the currently loaded instance and the self stack
//! used to nest method invocations across instances.

use crate::instruction::SpecRef;
use sett_core::{ClassRef, Value};
use std::cell::RefCell;
use std::collections::HashMap;

/// Operators a class may overload. Binary entries have a right-operand
/// mirror consulted when the left operand's class does not define the
/// slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum OpMethod {
    Add,
    Sub,
    Mult,
    Div,
    Exp,
    Mod,
    Min,
    Max,
    With,
    Less,
    Lessf,
    Npow,
    Uminus,
    Domain,
    Range,
    Pow,
    Arb,
    Nelt,
    From,
    Of,
    Ofa,
    Slice,
    End,
    Sof,
    Sofa,
    Sslice,
    Send,
    Lt,
    In,
    Eq,
    /// Called to begin iteration over the object.
    IterStart,
    /// Called to produce the next element; returns `[more, value]`.
    IterNext,
}

pub const OP_METHOD_COUNT: usize = OpMethod::IterNext as usize + 1;

impl OpMethod {
    pub fn index(self) -> usize {
        self as usize
    }

    /// Slot name the compiler uses for this operator.
    pub fn slot_name(self) -> &'static str {
        match self {
            OpMethod::Add => "+",
            OpMethod::Sub => "-",
            OpMethod::Mult => "*",
            OpMethod::Div => "/",
            OpMethod::Exp => "**",
            OpMethod::Mod => "mod",
            OpMethod::Min => "min",
            OpMethod::Max => "max",
            OpMethod::With => "with",
            OpMethod::Less => "less",
            OpMethod::Lessf => "lessf",
            OpMethod::Npow => "npow",
            OpMethod::Uminus => "uminus",
            OpMethod::Domain => "domain",
            OpMethod::Range => "range",
            OpMethod::Pow => "pow",
            OpMethod::Arb => "arb",
            OpMethod::Nelt => "#",
            OpMethod::From => "from",
            OpMethod::Of => "of",
            OpMethod::Ofa => "ofa",
            OpMethod::Slice => "slice",
            OpMethod::End => "end",
            OpMethod::Sof => "sof",
            OpMethod::Sofa => "sofa",
            OpMethod::Sslice => "sslice",
            OpMethod::Send => "send",
            OpMethod::Lt => "<",
            OpMethod::In => "in",
            OpMethod::Eq => "=",
            OpMethod::IterStart => "iterator_start",
            OpMethod::IterNext => "iterator_next",
        }
    }
}

/// One entry in a class's dense slot table.
#[derive(Debug, Clone)]
pub struct SlotDesc {
    pub name: String,
    pub is_method: bool,
    pub is_public: bool,
    /// Class the slot was defined in (inherited slots keep their origin).
    pub in_class: ClassRef,
    /// For methods: the specifier slot holding the procedure value.
    /// For instance variables: the static slot the loaded instance uses.
    pub value: SpecRef,
    /// Position in the instance trie, for variables.
    pub ivar_index: Option<u32>,
}

#[derive(Debug)]
pub struct ClassDesc {
    pub name: String,
    pub class_ref: ClassRef,
    pub is_process: bool,
    /// Static slots holding the loaded instance's variables, in
    /// instance-variable order.
    pub ivar_slots: Vec<SpecRef>,
    /// Trie height for instances of this class.
    pub vars_height: u32,
    pub slots: Vec<SlotDesc>,
    pub slot_names: HashMap<String, u32>,
    pub left_ops: [Option<u32>; OP_METHOD_COUNT],
    pub right_ops: [Option<u32>; OP_METHOD_COUNT],
    /// The creation method run between `initobj` and `initend`, when the
    /// class declares one.
    pub create_slot: Option<u32>,

    /// Currently loaded instance.
    pub current_self: RefCell<Option<Value>>,
    /// Instances displaced by nested method invocations.
    pub self_stack: RefCell<Vec<Option<Value>>>,
}

impl ClassDesc {
    pub fn new(name: impl Into<String>, class_ref: ClassRef, is_process: bool) -> Self {
        ClassDesc {
            name: name.into(),
            class_ref,
            is_process,
            ivar_slots: Vec::new(),
            vars_height: 0,
            slots: Vec::new(),
            slot_names: HashMap::new(),
            left_ops: [None; OP_METHOD_COUNT],
            right_ops: [None; OP_METHOD_COUNT],
            create_slot: None,
            current_self: RefCell::new(None),
            self_stack: RefCell::new(Vec::new()),
        }
    }

    pub fn slot_index(&self, name: &str) -> Option<u32> {
        self.slot_names.get(name).copied()
    }

    pub fn slot(&self, index: u32) -> Option<&SlotDesc> {
        self.slots.get(index as usize)
    }

    /// Operator method slot, trying the given side only.
    pub fn op_method(&self, op: OpMethod, right: bool) -> Option<u32> {
        if right { self.right_ops[op.index()] } else { self.left_ops[op.index()] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_lookup() {
        let cr = ClassRef { unit: 0, index: 0 };
        let mut c = ClassDesc::new("point", cr, false);
        c.slots.push(SlotDesc {
            name: "x".into(),
            is_method: false,
            is_public: true,
            in_class: cr,
            value: SpecRef { unit: 0, slot: 0 },
            ivar_index: Some(0),
        });
        c.slot_names.insert("x".into(), 0);
        assert_eq!(c.slot_index("x"), Some(0));
        assert_eq!(c.slot_index("y"), None);
        assert!(!c.slot(0).unwrap().is_method);
    }

    #[test]
    fn test_op_method_sides() {
        let cr = ClassRef { unit: 0, index: 0 };
        let mut c = ClassDesc::new("vec", cr, false);
        c.left_ops[OpMethod::Add.index()] = Some(3);
        assert_eq!(c.op_method(OpMethod::Add, false), Some(3));
        assert_eq!(c.op_method(OpMethod::Add, true), None);
    }
}
