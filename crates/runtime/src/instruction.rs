//! Instructions and pre-resolved operands
//!
//! The loader resolves every symbolic operand before execution: specifier
//! operands become `(unit, slot)` indexes into a unit's specifier table,
//! branch operands become instruction indexes, class and slot operands
//! become table indexes. The dispatch loop never looks anything up by
//! name.

use crate::opcode::Opcode;
use sett_core::ClassRef;

/// A resolved specifier slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecRef {
    pub unit: u32,
    pub slot: u32,
}

/// One pre-resolved operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operand {
    #[default]
    None,
    /// Specifier slot.
    Spec(SpecRef),
    /// Branch target: instruction index in the executing unit.
    Target(u32),
    /// Integer literal (argument counts, iteration modes, line numbers).
    Int(i64),
    /// Class table entry.
    Class(ClassRef),
    /// Slot index inside a class.
    Slot(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    pub a: Operand,
    pub b: Operand,
    pub c: Operand,
}

impl Instruction {
    pub fn new(op: Opcode, a: Operand, b: Operand, c: Operand) -> Self {
        Instruction { op, a, b, c }
    }

    /// A `Noop` with no operands (also the padding instruction).
    pub fn noop() -> Self {
        Instruction::new(Opcode::Noop, Operand::None, Operand::None, Operand::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_is_small_and_copy() {
        let i = Instruction::noop();
        let j = i; // Copy
        assert_eq!(i, j);
        assert!(std::mem::size_of::<Instruction>() <= 56);
    }
}
