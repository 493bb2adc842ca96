//! Sets
//!
//! A `Set` is a hash trie (see `trie`) under a header carrying the
//! cardinality, trie height, and the cached XOR hash of its elements.
//! Mutations maintain the header incrementally: XOR out the departing
//! element's hash, XOR in the arriving one, then check the expansion and
//! contraction thresholds.
//!
//! Omega is never an element; callers reject it before reaching here.

use crate::hash::value_hash;
use crate::trie::{self, Trie, TrieCell, TrieCursor, CLASH_SIZE, TRIE_WIDTH};
use crate::value::Value;

#[derive(Debug, Clone)]
pub(crate) struct SetCell {
    pub hash: u64,
    pub value: Value,
}

impl TrieCell for SetCell {
    fn key_hash(&self) -> u64 {
        self.hash
    }
}

#[derive(Debug, Clone)]
pub struct Set {
    card: usize,
    hash: u64,
    trie: Trie<SetCell>,
}

/// Cardinality bound for a trie of `height`:
/// `TRIE_WIDTH^(height+1) * CLASH_SIZE`.
fn expand_limit(height: u32) -> usize {
    (TRIE_WIDTH as u128)
        .saturating_pow(height + 1)
        .saturating_mul(CLASH_SIZE as u128)
        .min(usize::MAX as u128) as usize
}

/// Cell-count floor below which `height` is one too many:
/// `TRIE_WIDTH^height`.
fn contract_limit(height: u32) -> usize {
    (TRIE_WIDTH as u128)
        .saturating_pow(height)
        .min(usize::MAX as u128) as usize
}

impl Set {
    pub fn new() -> Self {
        Set { card: 0, hash: 0, trie: Trie::new(0) }
    }

    pub fn card(&self) -> usize {
        self.card
    }

    pub fn is_empty(&self) -> bool {
        self.card == 0
    }

    /// Cached XOR of element hashes.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub(crate) fn height(&self) -> u32 {
        self.trie.height
    }

    pub fn contains(&self, v: &Value) -> bool {
        let h = value_hash(v);
        self.trie.find(h, |c| c.value == *v).is_some()
    }

    /// Insert, reporting whether the set grew.
    pub fn insert(&mut self, v: Value) -> bool {
        let h = value_hash(&v);
        let cells = self.trie.bucket_mut(h);
        if cells.iter().any(|c| c.hash == h && c.value == v) {
            return false;
        }
        trie::bucket_insert(cells, SetCell { hash: h, value: v });
        self.card += 1;
        self.hash ^= h;
        if self.card > expand_limit(self.trie.height) {
            self.trie = self.trie.rebuilt(self.trie.height + 1);
        }
        true
    }

    /// Remove, reporting whether the element was present.
    pub fn remove(&mut self, v: &Value) -> bool {
        let h = value_hash(v);
        if self.trie.find(h, |c| c.value == *v).is_none() {
            return false;
        }
        let cells = self.trie.bucket_mut(h);
        let pos = cells
            .iter()
            .position(|c| c.hash == h && c.value == *v)
            .expect("cell vanished between find and removal");
        cells.remove(pos);
        self.card -= 1;
        self.hash ^= h;
        if self.trie.height > 0 && self.card < contract_limit(self.trie.height) {
            self.trie = self.trie.rebuilt(self.trie.height - 1);
        }
        true
    }

    /// Some element, in traversal order; `None` on the empty set.
    pub fn arb(&self) -> Option<Value> {
        let mut cursor = TrieCursor::new(self.trie.height);
        cursor.next(&self.trie).map(|c| c.value.clone())
    }

    /// Remove and return some element.
    pub fn take(&mut self) -> Option<Value> {
        let v = self.arb()?;
        self.remove(&v);
        Some(v)
    }

    pub fn for_each(&self, f: &mut impl FnMut(&Value)) {
        self.trie.for_each(&mut |c| f(&c.value));
    }

    /// Every element, in traversal order.
    pub fn elements(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.card);
        self.for_each(&mut |v| out.push(v.clone()));
        out
    }

    pub fn is_subset_of(&self, other: &Set) -> bool {
        if self.card > other.card {
            return false;
        }
        self.trie.try_for_each(&mut |c| other.contains(&c.value))
    }

    pub fn union_with(&mut self, other: &Set) {
        other.for_each(&mut |v| {
            self.insert(v.clone());
        });
    }

    pub fn intersect(&self, other: &Set) -> Set {
        // scan the smaller side
        let (small, large) = if self.card <= other.card { (self, other) } else { (other, self) };
        let mut out = Set::new();
        small.for_each(&mut |v| {
            if large.contains(v) {
                out.insert(v.clone());
            }
        });
        out
    }

    pub fn difference_with(&mut self, other: &Set) {
        other.for_each(&mut |v| {
            self.remove(v);
        });
    }

    pub fn sym_difference_with(&mut self, other: &Set) {
        other.for_each(&mut |v| {
            if !self.remove(v) {
                self.insert(v.clone());
            }
        });
    }

    /// The full powerset, materialized.
    pub fn pow_set(&self) -> Set {
        let elems = self.elements();
        let mut out = Set::new();
        let mut bits = vec![false; elems.len()];
        loop {
            let mut subset = Set::new();
            for (i, &on) in bits.iter().enumerate() {
                if on {
                    subset.insert(elems[i].clone());
                }
            }
            out.insert(Value::set(subset));
            if !bump_bits(&mut bits) {
                break;
            }
        }
        out
    }

    /// All subsets of cardinality `n`, materialized.
    pub fn npow_set(&self, n: usize) -> Set {
        let elems = self.elements();
        let mut out = Set::new();
        if n > elems.len() {
            return out;
        }
        let mut idx: Vec<usize> = (0..n).collect();
        loop {
            let mut subset = Set::new();
            for &i in &idx {
                subset.insert(elems[i].clone());
            }
            out.insert(Value::set(subset));
            if !bump_combination(&mut idx, elems.len()) {
                break;
            }
        }
        out
    }

    pub(crate) fn trie(&self) -> &Trie<SetCell> {
        &self.trie
    }

    /// Header consistency, used by tests and debug assertions.
    pub fn check_invariants(&self) {
        let mut n = 0;
        let mut h = 0u64;
        self.trie.for_each(&mut |c| {
            n += 1;
            h ^= c.hash;
            debug_assert_eq!(c.hash, value_hash(&c.value));
        });
        assert_eq!(n, self.card, "cardinality header out of sync");
        assert_eq!(h, self.hash, "hash header out of sync");
        assert!(self.card <= expand_limit(self.trie.height), "height too small");
    }
}

/// Binary counter over a subset mask; false on carry out.
pub(crate) fn bump_bits(bits: &mut [bool]) -> bool {
    for b in bits.iter_mut() {
        if *b {
            *b = false;
        } else {
            *b = true;
            return true;
        }
    }
    false
}

/// Advance an ascending combination of indexes below `n`; false when the
/// last combination has been consumed.
pub(crate) fn bump_combination(idx: &mut [usize], n: usize) -> bool {
    let k = idx.len();
    if k == 0 {
        return false;
    }
    let mut i = k;
    while i > 0 {
        i -= 1;
        if idx[i] < n - (k - i) {
            idx[i] += 1;
            for j in i + 1..k {
                idx[j] = idx[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

impl Default for Set {
    fn default() -> Self {
        Set::new()
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Self) -> bool {
        self.card == other.card && self.hash == other.hash && self.is_subset_of(other)
    }
}
