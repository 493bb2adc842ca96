//! Maps
//!
//! A `Map` shares the set's trie discipline but its cells carry a domain
//! element and a range. A domain mapped to two or more values holds them
//! as a "multi-val" cell whose range is a set; the header's cardinality
//! counts pairs, while expansion/contraction watch the pair and cell
//! counts respectively. The cached hash is the XOR of one `pair_hash`
//! contribution per (domain, range-element) pair.
//!
//! Canonical form: a single-valued domain is always a `One` cell and a
//! multi-valued one always a `Many` cell with two or more elements, so
//! content-equal maps are cell-identical.

use crate::error::CoreError;
use crate::hash::{pair_hash, value_hash};
use crate::set::Set;
use crate::trie::{self, Trie, TrieCell, CLASH_SIZE, TRIE_WIDTH};
use crate::tuple::Tuple;
use crate::value::Value;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum MapRange {
    One(Value),
    /// Two or more values.
    Many(Rc<Set>),
}

#[derive(Debug, Clone)]
pub(crate) struct MapCell {
    pub hash: u64,
    pub dom: Value,
    pub range: MapRange,
}

impl TrieCell for MapCell {
    fn key_hash(&self) -> u64 {
        self.hash
    }
}

impl MapCell {
    /// XOR of this cell's per-pair hash contributions.
    fn contribution(&self) -> u64 {
        match &self.range {
            MapRange::One(v) => pair_hash(self.hash, value_hash(v)),
            MapRange::Many(s) => {
                let mut h = 0;
                s.for_each(&mut |v| h ^= pair_hash(self.hash, value_hash(v)));
                h
            }
        }
    }

    fn pair_count(&self) -> usize {
        match &self.range {
            MapRange::One(_) => 1,
            MapRange::Many(s) => s.card(),
        }
    }
}

/// Result of a domain lookup.
pub enum Lookup<'a> {
    Absent,
    One(&'a Value),
    Many(&'a Rc<Set>),
}

#[derive(Debug, Clone)]
pub struct Map {
    pairs: usize,
    cells: usize,
    hash: u64,
    trie: Trie<MapCell>,
}

fn expand_limit(height: u32) -> usize {
    (TRIE_WIDTH as u128)
        .saturating_pow(height + 1)
        .saturating_mul(CLASH_SIZE as u128)
        .min(usize::MAX as u128) as usize
}

fn contract_limit(height: u32) -> usize {
    (TRIE_WIDTH as u128)
        .saturating_pow(height)
        .min(usize::MAX as u128) as usize
}

impl Map {
    pub fn new() -> Self {
        Map { pairs: 0, cells: 0, hash: 0, trie: Trie::new(0) }
    }

    /// Pair count (not cell count).
    pub fn card(&self) -> usize {
        self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn lookup(&self, dom: &Value) -> Lookup<'_> {
        let h = value_hash(dom);
        match self.trie.find(h, |c| c.dom == *dom) {
            None => Lookup::Absent,
            Some(cell) => match &cell.range {
                MapRange::One(v) => Lookup::One(v),
                MapRange::Many(s) => Lookup::Many(s),
            },
        }
    }

    /// `m(dom)`: the single value, or omega when absent or multi-valued.
    pub fn image(&self, dom: &Value) -> Value {
        match self.lookup(dom) {
            Lookup::One(v) => v.clone(),
            _ => Value::Om,
        }
    }

    /// `m{dom}`: every value for `dom`, as a set.
    pub fn image_set(&self, dom: &Value) -> Set {
        match self.lookup(dom) {
            Lookup::Absent => Set::new(),
            Lookup::One(v) => {
                let mut s = Set::new();
                s.insert(v.clone());
                s
            }
            Lookup::Many(s) => (**s).clone(),
        }
    }

    /// Insert the pair `[dom, range]`, reporting whether the map grew.
    pub fn insert_pair(&mut self, dom: Value, range: Value) -> bool {
        let h = value_hash(&dom);
        let rh = value_hash(&range);
        let cells = self.trie.bucket_mut(h);
        match cells.iter_mut().find(|c| c.hash == h && c.dom == dom) {
            None => {
                self.hash ^= pair_hash(h, rh);
                trie::bucket_insert(cells, MapCell { hash: h, dom, range: MapRange::One(range) });
                self.pairs += 1;
                self.cells += 1;
                self.maybe_expand();
                true
            }
            Some(cell) => {
                let grew = match &mut cell.range {
                    MapRange::One(v) => {
                        if *v == range {
                            false
                        } else {
                            let mut s = Set::new();
                            s.insert(v.clone());
                            s.insert(range);
                            cell.range = MapRange::Many(Rc::new(s));
                            true
                        }
                    }
                    MapRange::Many(s) => Rc::make_mut(s).insert(range),
                };
                if grew {
                    self.hash ^= pair_hash(h, rh);
                    self.pairs += 1;
                    self.maybe_expand();
                }
                grew
            }
        }
    }

    /// `m(dom) := v`: replace every pair for `dom` with the single pair
    /// `[dom, v]`; omega deletes the domain wholesale.
    pub fn set_image(&mut self, dom: &Value, v: Value) {
        self.remove_domain(dom);
        if v != Value::Om {
            self.insert_pair(dom.clone(), v);
        }
    }

    /// `m{dom} := s`: replace every pair for `dom` with one pair per
    /// element of `s`.
    pub fn set_image_set(&mut self, dom: &Value, s: &Set) {
        self.remove_domain(dom);
        s.for_each(&mut |v| {
            self.insert_pair(dom.clone(), v.clone());
        });
    }

    /// Delete every pair for `dom`; reports whether any existed.
    pub fn remove_domain(&mut self, dom: &Value) -> bool {
        let h = value_hash(dom);
        if self.trie.find(h, |c| c.dom == *dom).is_none() {
            return false;
        }
        let cells = self.trie.bucket_mut(h);
        let pos = cells
            .iter()
            .position(|c| c.hash == h && c.dom == *dom)
            .expect("cell vanished between find and removal");
        let cell = cells.remove(pos);
        self.hash ^= cell.contribution();
        self.pairs -= cell.pair_count();
        self.cells -= 1;
        self.maybe_contract();
        true
    }

    /// Delete the single pair `[dom, v]`, collapsing a two-element cell
    /// back to single-valued form.
    pub fn remove_pair(&mut self, dom: &Value, v: &Value) -> bool {
        let h = value_hash(dom);
        let Some(cell) = self.trie.find(h, |c| c.dom == *dom) else {
            return false;
        };
        match &cell.range {
            MapRange::One(old) => {
                if old == v {
                    self.remove_domain(dom)
                } else {
                    false
                }
            }
            MapRange::Many(s) => {
                if !s.contains(v) {
                    return false;
                }
                let rh = value_hash(v);
                let cells = self.trie.bucket_mut(h);
                let cell = cells
                    .iter_mut()
                    .find(|c| c.hash == h && c.dom == *dom)
                    .expect("cell vanished between find and removal");
                if let MapRange::Many(s) = &mut cell.range {
                    let s = Rc::make_mut(s);
                    s.remove(v);
                    if s.card() == 1 {
                        let only = s.arb().expect("card 1 set has an element");
                        cell.range = MapRange::One(only);
                    }
                }
                self.hash ^= pair_hash(h, rh);
                self.pairs -= 1;
                true
            }
        }
    }

    /// Visit each cell as (domain, range).
    pub fn for_each_cell(&self, f: &mut impl FnMut(&Value, &MapRange)) {
        self.trie.for_each(&mut |c| f(&c.dom, &c.range));
    }

    /// Visit each pair, expanding multi-val cells.
    pub fn for_each_pair(&self, f: &mut impl FnMut(&Value, &Value)) {
        self.trie.for_each(&mut |c| match &c.range {
            MapRange::One(v) => f(&c.dom, v),
            MapRange::Many(s) => s.for_each(&mut |v| f(&c.dom, v)),
        });
    }

    pub fn domain_set(&self) -> Set {
        let mut out = Set::new();
        self.for_each_cell(&mut |d, _| {
            out.insert(d.clone());
        });
        out
    }

    pub fn range_set(&self) -> Set {
        let mut out = Set::new();
        self.for_each_pair(&mut |_, v| {
            out.insert(v.clone());
        });
        out
    }

    /// Lossless projection to a set of `[dom, range]` 2-tuples.
    pub fn to_set(&self) -> Set {
        let mut out = Set::new();
        self.for_each_pair(&mut |d, v| {
            out.insert(Value::tuple(Tuple::pair(d.clone(), v.clone())));
        });
        out
    }

    /// Build a map from a set whose every element is a `[dom, range]`
    /// 2-tuple.
    pub fn from_set(s: &Set) -> Result<Map, CoreError> {
        let mut out = Map::new();
        let mut bad = false;
        s.for_each(&mut |v| {
            if bad {
                return;
            }
            match v {
                Value::Tuple(t) if t.len() == 2 => {
                    let d = t.get(0).cloned().unwrap_or(Value::Om);
                    let r = t.get(1).cloned().unwrap_or(Value::Om);
                    if d == Value::Om || r == Value::Om {
                        bad = true;
                        return;
                    }
                    out.insert_pair(d, r);
                }
                _ => bad = true,
            }
        });
        if bad { Err(CoreError::NotAPair) } else { Ok(out) }
    }

    pub(crate) fn trie(&self) -> &Trie<MapCell> {
        &self.trie
    }

    fn maybe_expand(&mut self) {
        if self.pairs > expand_limit(self.trie.height) {
            self.trie = self.trie.rebuilt(self.trie.height + 1);
        }
    }

    fn maybe_contract(&mut self) {
        if self.trie.height > 0 && self.cells < contract_limit(self.trie.height) {
            self.trie = self.trie.rebuilt(self.trie.height - 1);
        }
    }

    /// Header consistency, used by tests and debug assertions.
    pub fn check_invariants(&self) {
        let mut pairs = 0;
        let mut cells = 0;
        let mut h = 0u64;
        self.trie.for_each(&mut |c| {
            cells += 1;
            pairs += c.pair_count();
            h ^= c.contribution();
            if let MapRange::Many(s) = &c.range {
                assert!(s.card() >= 2, "multi-val cell below two values");
            }
        });
        assert_eq!(pairs, self.pairs, "pair count out of sync");
        assert_eq!(cells, self.cells, "cell count out of sync");
        assert_eq!(h, self.hash, "hash header out of sync");
    }
}

impl Default for Map {
    fn default() -> Self {
        Map::new()
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        if self.pairs != other.pairs || self.hash != other.hash {
            return false;
        }
        self.trie.try_for_each(&mut |c| match (&c.range, other.lookup(&c.dom)) {
            (MapRange::One(a), Lookup::One(b)) => a == b,
            (MapRange::Many(a), Lookup::Many(b)) => a == b,
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_image() {
        let mut m = Map::new();
        assert!(m.insert_pair(Value::Int(1), Value::Int(10)));
        assert_eq!(m.image(&Value::Int(1)), Value::Int(10));
        assert_eq!(m.image(&Value::Int(2)), Value::Om);
        assert_eq!(m.card(), 1);
    }

    #[test]
    fn test_multi_val_semantics() {
        let mut m = Map::new();
        m.insert_pair(Value::Int(1), Value::Int(10));
        m.insert_pair(Value::Int(1), Value::Int(20));
        // multi-valued domain reads as omega through m(x)
        assert_eq!(m.image(&Value::Int(1)), Value::Om);
        let s = m.image_set(&Value::Int(1));
        assert_eq!(s.card(), 2);
        assert!(s.contains(&Value::Int(10)));
        assert!(s.contains(&Value::Int(20)));
        assert_eq!(m.card(), 2);
        m.check_invariants();
    }

    #[test]
    fn test_duplicate_pair_ignored() {
        let mut m = Map::new();
        assert!(m.insert_pair(Value::Int(1), Value::Int(10)));
        assert!(!m.insert_pair(Value::Int(1), Value::Int(10)));
        assert_eq!(m.card(), 1);
    }

    #[test]
    fn test_assign_replaces_all_pairs() {
        let mut m = Map::new();
        m.insert_pair(Value::Int(1), Value::Int(10));
        m.insert_pair(Value::Int(1), Value::Int(20));
        m.set_image(&Value::Int(1), Value::Int(30));
        assert_eq!(m.image(&Value::Int(1)), Value::Int(30));
        assert_eq!(m.card(), 1);
        m.check_invariants();
    }

    #[test]
    fn test_assign_om_deletes_domain() {
        let mut m = Map::new();
        m.insert_pair(Value::Int(1), Value::Int(10));
        m.insert_pair(Value::Int(2), Value::Int(20));
        m.set_image(&Value::Int(1), Value::Om);
        assert_eq!(m.card(), 1);
        assert_eq!(m.image(&Value::Int(1)), Value::Om);
        assert_eq!(m.image(&Value::Int(2)), Value::Int(20));
        m.check_invariants();
    }

    #[test]
    fn test_remove_pair_collapses_to_single() {
        let mut m = Map::new();
        m.insert_pair(Value::Int(1), Value::Int(10));
        m.insert_pair(Value::Int(1), Value::Int(20));
        assert!(m.remove_pair(&Value::Int(1), &Value::Int(20)));
        assert_eq!(m.image(&Value::Int(1)), Value::Int(10));
        // equal content, equal hash with a never-multi map
        let mut n = Map::new();
        n.insert_pair(Value::Int(1), Value::Int(10));
        assert_eq!(m, n);
        assert_eq!(m.hash(), n.hash());
        m.check_invariants();
    }

    #[test]
    fn test_image_set_assignment() {
        let mut m = Map::new();
        let mut s = Set::new();
        s.insert(Value::Int(7));
        s.insert(Value::Int(8));
        m.set_image_set(&Value::Int(1), &s);
        assert_eq!(m.card(), 2);
        assert_eq!(m.image_set(&Value::Int(1)), s);
        m.set_image_set(&Value::Int(1), &Set::new());
        assert!(m.is_empty());
        m.check_invariants();
    }

    #[test]
    fn test_to_set_round_trip() {
        let mut m = Map::new();
        m.insert_pair(Value::Int(1), Value::Int(10));
        m.insert_pair(Value::Int(1), Value::Int(20));
        m.insert_pair(Value::Int(2), Value::Int(30));
        let s = m.to_set();
        assert_eq!(s.card(), 3);
        let back = Map::from_set(&s).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_from_set_rejects_non_pairs() {
        let mut s = Set::new();
        s.insert(Value::Int(1));
        assert_eq!(Map::from_set(&s), Err(CoreError::NotAPair));
    }

    #[test]
    fn test_domain_range() {
        let mut m = Map::new();
        m.insert_pair(Value::Int(1), Value::Int(10));
        m.insert_pair(Value::Int(2), Value::Int(10));
        assert_eq!(m.domain_set().card(), 2);
        assert_eq!(m.range_set().card(), 1);
    }

    #[test]
    fn test_large_map_expansion() {
        let mut m = Map::new();
        for i in 0..500 {
            m.insert_pair(Value::Int(i), Value::Int(i * 2));
        }
        for i in 0..500 {
            assert_eq!(m.image(&Value::Int(i)), Value::Int(i * 2));
        }
        m.check_invariants();
    }
}
