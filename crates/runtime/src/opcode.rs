//! Opcodes
//!
//! One flat enum, grouped the way the dispatch body handles them. Every
//! instruction carries three operand slots; the opcodes marked "+extra"
//! logically take four and read the overflow from a trailing `Noop`.

/// Opcode, also the key for the profile table and the unit error
/// extensions.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Operand overflow carrier for the "+extra" opcodes.
    Noop,

    // --- data movement ---
    /// Push one/two/three specifier values onto the program stack.
    Push1,
    Push2,
    Push3,
    /// Pop one/two/three values from the program stack into specifiers.
    Pop1,
    Pop2,
    Pop3,
    /// `a := b`
    Asn,

    // --- binary operators (result, left, right) ---
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

    // --- unary operators (result, operand) ---
    Uminus,
    Not,
    Domain,
    Range,
    Pow,
    Arb,
    /// `#x`
    Nelt,

    // --- remove-and-yield (value target, source) ---
    /// Arbitrary element from a set, last from a tuple, oldest from a
    /// mailbox (blocking while empty).
    From,
    /// First element of a tuple or string.
    Fromb,
    /// Last element of a tuple or string.
    Frome,

    // --- conditions (result, left, right) ---
    Eq,
    Ne,
    Lt,
    Le,
    In,
    Notin,
    /// `left incs right`: superset-or-equal.
    Incs,

    // --- control flow ---
    Go,
    Gotrue,
    Gofalse,
    /// Condition check honoring the configured assert mode.
    Assert,
    Stop,
    Stopall,

    // --- extraction ---
    /// `r := f(x)`
    Of,
    /// `r := f{x}`
    Ofa,
    /// `r := f(x)` then delete the element.
    Kof,
    /// Slice `r := f(i..j)` (+extra: end bound).
    Slice,
    /// Tail `r := f(i..)`.
    End,

    // --- sinister assignment ---
    /// `f(x) := v`
    Sof,
    /// `f{x} := s`
    Sofa,
    /// `f(i..j) := v` (+extra: replacement).
    Sslice,
    /// `f(i..) := v`
    Send,
    /// `f(x) := v` keeping map/tuple semantics, no-op on strings.
    Erase,

    // --- iteration ---
    /// Start an iterator (result, source, mode literal).
    Iter,
    /// Advance, branch on exhaustion (target, iterator, branch).
    Inext,
    /// Pair advance (+extra: second target).
    Inextp,

    // --- objects ---
    Initobj,
    Initend,
    /// Current instance as a value.
    SelfVal,
    /// Read an instance-variable slot.
    Slotof,
    /// Write an instance-variable slot.
    Sslotof,
    /// Call a method slot (+extra: argument count).
    Slotcall,
    /// Take a bound method out of its class as a first-class value.
    Menviron,

    // --- calls ---
    /// Call a compile-time-known procedure (result, proc, argc).
    Lcall,
    /// Call a computed procedure value (result, proc, argc).
    Call,
    /// Return (value operand, or none for om).
    Return,
    /// Clone a procedure capturing its current environment.
    Penviron,

    // --- I/O wrappers ---
    /// Write a value to the VM's output sink.
    Print,
    /// Write a line break.
    Newline,
}

impl Opcode {
    /// Total number of opcodes, for profile tables.
    pub const COUNT: usize = Opcode::Newline as usize + 1;

    pub fn index(self) -> usize {
        self as usize
    }

    /// Key into a unit's error-extension map.
    pub fn err_key(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_covers_last() {
        assert_eq!(Opcode::COUNT, Opcode::Newline.index() + 1);
        assert_eq!(Opcode::Noop.index(), 0);
    }
}
