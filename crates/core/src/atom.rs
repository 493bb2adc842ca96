//! Interned atoms
//!
//! Atoms are small interned symbols identified by number. The booleans are
//! the two predefined atoms; `newat` hands out fresh numbers from an
//! interpreter-owned generator.

use crate::value::Value;

/// The `false` atom.
pub const ATOM_FALSE: i64 = 0;
/// The `true` atom.
pub const ATOM_TRUE: i64 = 1;
/// First number handed out for user atoms.
pub const ATOM_FIRST_USER: i64 = 2;

/// Generator for fresh atom numbers.
#[derive(Debug, Clone)]
pub struct AtomGen {
    next: i64,
}

impl AtomGen {
    pub fn new() -> Self {
        AtomGen { next: ATOM_FIRST_USER }
    }

    /// Hand out a fresh, never-before-seen atom.
    pub fn fresh(&mut self) -> Value {
        let n = self.next;
        self.next += 1;
        Value::Atom(n)
    }
}

impl Default for AtomGen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_atoms_distinct() {
        let mut g = AtomGen::new();
        let a = g.fresh();
        let b = g.fresh();
        assert_ne!(a, b);
        assert_ne!(a, Value::Atom(ATOM_TRUE));
        assert_ne!(a, Value::Atom(ATOM_FALSE));
    }
}
