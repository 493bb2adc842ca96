//! Tuples
//!
//! A `Tuple` is a length-indexed radix tree: branch nodes of `TUP_WIDTH`
//! children over leaves of `TUP_WIDTH` cells, with the digit for level
//! `h` taken from bits `h*TUP_SHIFT..` of the element index. A tree of
//! height `h` spans `TUP_WIDTH^(h+1)` slots; appending past the capacity
//! pushes the root down under a new branch, and assigning omega at the
//! last index walks left to the new last element and collapses the
//! height while the length fits a shorter tree.
//!
//! Omega is never stored: missing slots are absent cells, and trailing
//! absences do not exist (the length always ends on a present element).

use crate::hash::value_hash;
use crate::value::Value;
use std::rc::Rc;

/// Index bits consumed per level.
pub const TUP_SHIFT: u32 = 3;
/// Children per node.
pub const TUP_WIDTH: usize = 1 << TUP_SHIFT;

#[derive(Debug, Clone)]
struct TupCell {
    hash: u64,
    value: Value,
}

#[derive(Debug, Clone)]
enum TupNode {
    Branch(Rc<Vec<Option<TupNode>>>),
    Leaf(Rc<Vec<Option<TupCell>>>),
}

impl TupNode {
    fn empty_branch() -> TupNode {
        TupNode::Branch(Rc::new(vec![None; TUP_WIDTH]))
    }

    fn empty_leaf() -> TupNode {
        TupNode::Leaf(Rc::new(vec![None; TUP_WIDTH]))
    }

    fn empty(height: u32) -> TupNode {
        if height == 0 { Self::empty_leaf() } else { Self::empty_branch() }
    }
}

#[derive(Debug, Clone)]
pub struct Tuple {
    len: usize,
    height: u32,
    hash: u64,
    root: TupNode,
}

/// Slots spanned by a tree of `height`.
fn capacity(height: u32) -> usize {
    (TUP_WIDTH as u128)
        .saturating_pow(height + 1)
        .min(usize::MAX as u128) as usize
}

#[inline]
fn digit(index: usize, height: u32) -> usize {
    (index >> (height * TUP_SHIFT)) & (TUP_WIDTH - 1)
}

impl Tuple {
    pub fn new() -> Self {
        Tuple { len: 0, height: 0, hash: 0, root: TupNode::empty_leaf() }
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut t = Tuple::new();
        for (i, v) in values.into_iter().enumerate() {
            t.set(i, v);
        }
        t
    }

    /// The 2-tuple `[a, b]`.
    pub fn pair(a: Value, b: Value) -> Self {
        Tuple::from_values([a, b])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cached XOR of element hashes.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Current tree height; `TUP_WIDTH^(height+1)` slots fit without
    /// growing.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Element at 0-based `index`; `None` is omega (hole or past the end).
    pub fn get(&self, index: usize) -> Option<&Value> {
        if index >= self.len {
            return None;
        }
        Self::get_at(&self.root, self.height, index).map(|c| &c.value)
    }

    fn get_at(node: &TupNode, height: u32, index: usize) -> Option<&TupCell> {
        match node {
            TupNode::Leaf(slots) => slots[index & (TUP_WIDTH - 1)].as_ref(),
            TupNode::Branch(kids) => {
                let kid = kids[digit(index, height)].as_ref()?;
                Self::get_at(kid, height - 1, index)
            }
        }
    }

    /// Assign 0-based `index`, growing, punching a hole, or shrinking as
    /// the value and position dictate.
    pub fn set(&mut self, index: usize, value: Value) {
        if value == Value::Om {
            self.clear(index);
            return;
        }
        while index >= capacity(self.height) {
            let old = std::mem::replace(&mut self.root, TupNode::empty_branch());
            if let TupNode::Branch(kids) = &mut self.root {
                Rc::make_mut(kids)[0] = Some(old);
            }
            self.height += 1;
        }
        let hash = value_hash(&value);
        let old = Self::set_at(&mut self.root, self.height, index, Some(TupCell { hash, value }));
        if let Some(old) = old {
            self.hash ^= old.hash;
        }
        self.hash ^= hash;
        if index + 1 > self.len {
            self.len = index + 1;
        }
    }

    /// Append at the end.
    pub fn push(&mut self, value: Value) {
        if value == Value::Om {
            // trailing omega never lands
            return;
        }
        self.set(self.len, value);
    }

    fn clear(&mut self, index: usize) {
        if index >= self.len {
            return;
        }
        let old = Self::set_at(&mut self.root, self.height, index, None);
        if let Some(old) = old {
            self.hash ^= old.hash;
        }
        if index + 1 == self.len {
            // the last element went away; find the new last and collapse
            self.len = Self::last_present(&self.root, self.height).map_or(0, |i| i + 1);
            while self.height > 0 && self.len <= capacity(self.height - 1) {
                let kid = match &mut self.root {
                    TupNode::Branch(kids) => Rc::make_mut(kids)[0].take(),
                    TupNode::Leaf(_) => unreachable!("leaf root above height 0"),
                };
                self.height -= 1;
                self.root = kid.unwrap_or_else(|| TupNode::empty(self.height));
            }
        }
    }

    fn set_at(
        node: &mut TupNode,
        height: u32,
        index: usize,
        cell: Option<TupCell>,
    ) -> Option<TupCell> {
        match node {
            TupNode::Leaf(slots) => {
                let slots = Rc::make_mut(slots);
                std::mem::replace(&mut slots[index & (TUP_WIDTH - 1)], cell)
            }
            TupNode::Branch(kids) => {
                let d = digit(index, height);
                let kids = Rc::make_mut(kids);
                if kids[d].is_none() {
                    if cell.is_none() {
                        return None;
                    }
                    kids[d] = Some(TupNode::empty(height - 1));
                }
                let kid = kids[d].as_mut().expect("child allocated above");
                Self::set_at(kid, height - 1, index, cell)
            }
        }
    }

    /// Highest present index in the subtree, walking right to left and
    /// skipping absent children.
    fn last_present(node: &TupNode, height: u32) -> Option<usize> {
        match node {
            TupNode::Leaf(slots) => slots
                .iter()
                .enumerate()
                .rev()
                .find(|(_, c)| c.is_some())
                .map(|(i, _)| i),
            TupNode::Branch(kids) => {
                for (d, kid) in kids.iter().enumerate().rev() {
                    if let Some(kid) = kid {
                        if let Some(i) = Self::last_present(kid, height - 1) {
                            return Some(d * capacity(height - 1) + i);
                        }
                    }
                }
                None
            }
        }
    }

    /// Concatenate, preserving holes and shifting the other tuple's
    /// elements past this one's length.
    pub fn concat(&mut self, other: &Tuple) {
        let base = self.len;
        for i in 0..other.len {
            if let Some(v) = other.get(i) {
                self.set(base + i, v.clone());
            }
        }
    }

    /// `count` copies of this tuple, concatenated.
    pub fn repeat(&self, count: usize) -> Tuple {
        let mut out = Tuple::new();
        for _ in 0..count {
            out.concat(self);
        }
        out
    }

    /// Copy out 0-based `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Tuple {
        let mut out = Tuple::new();
        for i in start..end.min(self.len) {
            if let Some(v) = self.get(i) {
                out.set(i - start, v.clone());
            }
        }
        out
    }

    /// Replace 0-based `[start, end)` with `replacement`, shifting the
    /// tail.
    pub fn splice(&mut self, start: usize, end: usize, replacement: &Tuple) {
        let mut out = self.slice(0, start);
        out.concat(replacement);
        let tail = self.slice(end, self.len);
        out.concat(&tail);
        *self = out;
    }

    /// Every slot from 0 to the length, holes as omega.
    pub fn to_vec(&self) -> Vec<Value> {
        (0..self.len)
            .map(|i| self.get(i).cloned().unwrap_or(Value::Om))
            .collect()
    }

    /// Header consistency, used by tests and debug assertions.
    pub fn check_invariants(&self) {
        assert!(self.len <= capacity(self.height), "length exceeds tree span");
        if self.len > 0 {
            assert!(self.get(self.len - 1).is_some(), "trailing omega survived");
            assert!(
                self.height == 0 || self.len > capacity(self.height - 1),
                "tree taller than the length needs"
            );
        } else {
            assert_eq!(self.height, 0, "empty tuple with height");
        }
        let mut h = 0u64;
        for i in 0..self.len {
            if let Some(v) = self.get(i) {
                h ^= value_hash(v);
            }
        }
        assert_eq!(h, self.hash, "hash header out of sync");
    }
}

impl Default for Tuple {
    fn default() -> Self {
        Tuple::new()
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len || self.hash != other.hash {
            return false;
        }
        (0..self.len).all(|i| match (self.get(i), other.get(i)) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tup(ns: impl IntoIterator<Item = i64>) -> Tuple {
        Tuple::from_values(ns.into_iter().map(Value::Int))
    }

    #[test]
    fn test_push_get() {
        let t = tup([1, 2, 3]);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(0), Some(&Value::Int(1)));
        assert_eq!(t.get(2), Some(&Value::Int(3)));
        assert_eq!(t.get(3), None);
        t.check_invariants();
    }

    #[test]
    fn test_growth_past_capacity() {
        let t = tup(0..1000);
        assert_eq!(t.len(), 1000);
        assert!(t.height() >= 3);
        for i in 0..1000 {
            assert_eq!(t.get(i as usize), Some(&Value::Int(i)));
        }
        t.check_invariants();
    }

    #[test]
    fn test_trailing_omega_elision_on_build() {
        let t = Tuple::from_values([Value::Int(1), Value::Int(2), Value::Om]);
        assert_eq!(t.len(), 2);
        t.check_invariants();
    }

    #[test]
    fn test_assign_om_shrinks_to_last_present() {
        let mut t = tup(0..10);
        t.set(9, Value::Om);
        assert_eq!(t.len(), 9);
        t.set(8, Value::Om);
        assert_eq!(t.len(), 8);
        t.set(7, Value::Om);
        assert_eq!(t.len(), 7);
        t.check_invariants();
    }

    #[test]
    fn test_shrink_walks_over_holes() {
        let mut t = tup(0..10);
        t.set(8, Value::Om); // hole in the middle-of-end
        t.set(7, Value::Om);
        assert_eq!(t.len(), 10);
        t.set(9, Value::Om); // clearing the end must skip the holes
        assert_eq!(t.len(), 7);
        t.check_invariants();
    }

    #[test]
    fn test_shrink_collapses_height() {
        let mut t = tup(0..100);
        let tall = t.height();
        for i in (TUP_WIDTH..100).rev() {
            t.set(i, Value::Om);
        }
        assert_eq!(t.len(), TUP_WIDTH);
        assert!(t.height() < tall);
        for i in 0..TUP_WIDTH {
            assert_eq!(t.get(i), Some(&Value::Int(i as i64)));
        }
        t.check_invariants();
    }

    #[test]
    fn test_clear_all_resets() {
        let mut t = tup([5]);
        t.set(0, Value::Om);
        assert_eq!(t.len(), 0);
        assert_eq!(t.hash(), 0);
        t.check_invariants();
    }

    #[test]
    fn test_shared_clone_is_persistent() {
        let a = tup(0..100);
        let mut b = a.clone();
        b.push(Value::Int(100));
        b.set(0, Value::Int(-1));
        assert_eq!(a, tup(0..100));
        assert_eq!(b.len(), 101);
        assert_eq!(b.get(0), Some(&Value::Int(-1)));
    }

    #[test]
    fn test_concat_and_repeat() {
        let mut t = tup([1, 2]);
        t.concat(&tup([3, 4]));
        assert_eq!(t, tup([1, 2, 3, 4]));
        assert_eq!(tup([1, 2]).repeat(3), tup([1, 2, 1, 2, 1, 2]));
    }

    #[test]
    fn test_slice_and_splice() {
        let t = tup(0..10);
        assert_eq!(t.slice(2, 5), tup([2, 3, 4]));
        let mut t = tup([1, 2, 3, 4]);
        t.splice(1, 3, &tup([9]));
        assert_eq!(t, tup([1, 9, 4]));
        t.check_invariants();
    }

    #[test]
    fn test_equality_with_holes() {
        let mut a = tup([1, 2, 3]);
        a.set(1, Value::Om);
        let mut b = Tuple::new();
        b.set(0, Value::Int(1));
        b.set(2, Value::Int(3));
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a, tup([1, 2, 3]));
    }
}
