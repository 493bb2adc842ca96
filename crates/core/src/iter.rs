//! Iterators over aggregates
//!
//! An iterator is a first-class value holding its kind, a shared
//! snapshot of the source, and kind-specific cursor state. Iterators are
//! single-pass and not restartable. Because the snapshot shares the
//! source's payload, a mutation by any other holder clones away and
//! leaves the iterator's view untouched; iteration is not defined to be
//! stable under mutation through the iterator itself.
//!
//! Object iteration (the `Object*` kinds) is driven by the runtime
//! through the object's iteration methods; the state here just carries
//! the object and whatever the runtime parks in `object_state`.

use crate::error::CoreError;
use crate::map::{Map, MapRange};
use crate::set::{bump_bits, bump_combination, Set};
use crate::string::Str;
use crate::trie::TrieCursor;
use crate::tuple::Tuple;
use crate::value::Value;
use std::collections::VecDeque;
use std::rc::Rc;

/// One variant per source aggregate and traversal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterKind {
    Set,
    Map,
    MapPair,
    MapMulti,
    Domain,
    Tuple,
    TuplePair,
    AltTuplePair,
    Str,
    StrPair,
    Pow,
    Npow,
    Object,
    ObjectPair,
    ObjectMulti,
}

/// What one advance produces.
#[derive(Debug, Clone, PartialEq)]
pub enum IterStep {
    One(Value),
    Pair(Value, Value),
}

#[derive(Debug)]
enum Cursor {
    Trie(TrieCursor),
    MapExpand {
        trie: TrieCursor,
        pending: VecDeque<(Value, Value)>,
    },
    Index(usize),
    Pow {
        elems: Vec<Value>,
        bits: Vec<bool>,
        done: bool,
    },
    Npow {
        elems: Vec<Value>,
        idx: Vec<usize>,
        done: bool,
    },
    Object,
}

#[derive(Debug)]
pub struct IterState {
    pub kind: IterKind,
    source: Value,
    cursor: Cursor,
    /// Runtime-owned state for the `Object*` kinds.
    pub object_state: Option<Value>,
}

fn wrong_source(kind: IterKind, found: &Value) -> CoreError {
    let expected = match kind {
        IterKind::Set | IterKind::Pow | IterKind::Npow => "a set",
        IterKind::Map | IterKind::MapPair | IterKind::MapMulti | IterKind::Domain => "a map",
        IterKind::Tuple | IterKind::TuplePair | IterKind::AltTuplePair => "a tuple",
        IterKind::Str | IterKind::StrPair => "a string",
        IterKind::Object | IterKind::ObjectPair | IterKind::ObjectMulti => "an object",
    };
    CoreError::wrong_form(expected, found.form())
}

impl IterState {
    /// Initialize an iterator over `source`. The source must already be
    /// coerced to the form the kind expects.
    pub fn start(kind: IterKind, source: Value) -> Result<IterState, CoreError> {
        let cursor = match (kind, &source) {
            (IterKind::Set, Value::Set(s)) => Cursor::Trie(TrieCursor::new(s.height())),
            (IterKind::Pow, Value::Set(s)) => {
                let elems = s.elements();
                let bits = vec![false; elems.len()];
                Cursor::Pow { elems, bits, done: false }
            }
            (
                IterKind::Map | IterKind::MapMulti,
                Value::Map(m),
            ) => Cursor::MapExpand {
                trie: TrieCursor::new(m.trie().height),
                pending: VecDeque::new(),
            },
            (IterKind::MapPair | IterKind::Domain, Value::Map(m)) => {
                Cursor::Trie(TrieCursor::new(m.trie().height))
            }
            (
                IterKind::Tuple | IterKind::TuplePair | IterKind::AltTuplePair,
                Value::Tuple(_),
            ) => Cursor::Index(0),
            (IterKind::Str | IterKind::StrPair, Value::Str(_)) => Cursor::Index(0),
            (
                IterKind::Object | IterKind::ObjectPair | IterKind::ObjectMulti,
                Value::Object(_) | Value::Process(_),
            ) => Cursor::Object,
            (kind, other) => return Err(wrong_source(kind, other)),
        };
        Ok(IterState { kind, source, cursor, object_state: None })
    }

    /// Initialize an `npow` iterator producing the subsets of
    /// cardinality `n`.
    pub fn start_npow(source: Value, n: usize) -> Result<IterState, CoreError> {
        let Value::Set(s) = &source else {
            return Err(wrong_source(IterKind::Npow, &source));
        };
        let elems = s.elements();
        let done = n > elems.len();
        let idx: Vec<usize> = (0..n).collect();
        Ok(IterState {
            kind: IterKind::Npow,
            source,
            cursor: Cursor::Npow { elems, idx, done },
            object_state: None,
        })
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Produce the next element, or `None` on exhaustion.
    pub fn next(&mut self) -> Result<Option<IterStep>, CoreError> {
        match (&self.source, &mut self.cursor) {
            (Value::Set(s), Cursor::Trie(cursor)) => {
                Ok(cursor.next(s.trie()).map(|c| IterStep::One(c.value.clone())))
            }
            (Value::Map(m), Cursor::Trie(cursor)) => match self.kind {
                IterKind::Domain => {
                    Ok(cursor.next(m.trie()).map(|c| IterStep::One(c.dom.clone())))
                }
                // map-pair mirrors extraction: a multi-valued domain
                // reads as omega
                _ => Ok(cursor.next(m.trie()).map(|c| {
                    let r = match &c.range {
                        MapRange::One(v) => v.clone(),
                        MapRange::Many(_) => Value::Om,
                    };
                    IterStep::Pair(c.dom.clone(), r)
                })),
            },
            (Value::Map(m), Cursor::MapExpand { trie, pending }) => loop {
                if let Some((d, r)) = pending.pop_front() {
                    return Ok(Some(match self.kind {
                        IterKind::Map => {
                            IterStep::One(Value::tuple(Tuple::pair(d, r)))
                        }
                        _ => IterStep::Pair(d, r),
                    }));
                }
                match trie.next(m.trie()) {
                    None => return Ok(None),
                    Some(cell) => match &cell.range {
                        MapRange::One(v) => {
                            pending.push_back((cell.dom.clone(), v.clone()))
                        }
                        MapRange::Many(s) => s.for_each(&mut |v| {
                            pending.push_back((cell.dom.clone(), v.clone()))
                        }),
                    },
                }
            },
            (Value::Tuple(t), Cursor::Index(i)) => Ok(next_tuple(self.kind, t, i)),
            (Value::Str(s), Cursor::Index(i)) => Ok(next_str(self.kind, s, i)),
            (_, Cursor::Pow { elems, bits, done }) => {
                if *done {
                    return Ok(None);
                }
                let mut subset = Set::new();
                for (i, &on) in bits.iter().enumerate() {
                    if on {
                        subset.insert(elems[i].clone());
                    }
                }
                if !bump_bits(bits) {
                    *done = true;
                }
                Ok(Some(IterStep::One(Value::set(subset))))
            }
            (_, Cursor::Npow { elems, idx, done }) => {
                if *done {
                    return Ok(None);
                }
                let mut subset = Set::new();
                for &i in idx.iter() {
                    subset.insert(elems[i].clone());
                }
                if !bump_combination(idx, elems.len()) {
                    *done = true;
                }
                Ok(Some(IterStep::One(Value::set(subset))))
            }
            // object iteration is driven through method calls, never here
            (source, _) => {
                Err(CoreError::wrong_form("a concrete aggregate iterator", source.form()))
            }
        }
    }
}

fn next_tuple(kind: IterKind, t: &Rc<Tuple>, i: &mut usize) -> Option<IterStep> {
    while *i < t.len() {
        let index = *i;
        *i += 1;
        let v = t.get(index).cloned();
        match kind {
            IterKind::Tuple => {
                // holes surface as omega
                return Some(IterStep::One(v.unwrap_or(Value::Om)));
            }
            IterKind::TuplePair => {
                if let Some(v) = v {
                    return Some(IterStep::Pair(Value::Int(index as i64 + 1), v));
                }
            }
            _ => {
                if let Some(v) = v {
                    return Some(IterStep::Pair(v, Value::Int(index as i64 + 1)));
                }
            }
        }
    }
    None
}

fn next_str(kind: IterKind, s: &Rc<Str>, i: &mut usize) -> Option<IterStep> {
    if *i >= s.len() {
        return None;
    }
    let index = *i;
    *i += 1;
    let ch = s.byte_at(index).map(|b| Value::Str(Rc::new(Str::from_bytes(&[b]))));
    let ch = ch.unwrap_or(Value::Om);
    match kind {
        IterKind::Str => Some(IterStep::One(ch)),
        _ => Some(IterStep::Pair(Value::Int(index as i64 + 1), ch)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_set(ns: impl IntoIterator<Item = i64>) -> Value {
        let mut s = Set::new();
        for n in ns {
            s.insert(Value::Int(n));
        }
        Value::set(s)
    }

    fn drain(mut it: IterState) -> Vec<IterStep> {
        let mut out = Vec::new();
        while let Some(step) = it.next().unwrap() {
            out.push(step);
        }
        out
    }

    #[test]
    fn test_set_iterator_visits_all() {
        let steps = drain(IterState::start(IterKind::Set, int_set([1, 2, 3])).unwrap());
        let mut ns: Vec<i64> = steps
            .into_iter()
            .map(|s| match s {
                IterStep::One(Value::Int(n)) => n,
                other => panic!("unexpected step {other:?}"),
            })
            .collect();
        ns.sort_unstable();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn test_map_iterators() {
        let mut m = Map::new();
        m.insert_pair(Value::Int(1), Value::Int(10));
        m.insert_pair(Value::Int(1), Value::Int(20));
        m.insert_pair(Value::Int(2), Value::Int(30));
        let m = Value::map(m);

        // single: expanded [d, r] tuples
        let steps = drain(IterState::start(IterKind::Map, m.clone()).unwrap());
        assert_eq!(steps.len(), 3);

        // pair: multi-valued domain reads as om
        let steps = drain(IterState::start(IterKind::MapPair, m.clone()).unwrap());
        assert_eq!(steps.len(), 2);
        assert!(steps.contains(&IterStep::Pair(Value::Int(1), Value::Om)));
        assert!(steps.contains(&IterStep::Pair(Value::Int(2), Value::Int(30))));

        // multi: every (domain, element) pair
        let steps = drain(IterState::start(IterKind::MapMulti, m.clone()).unwrap());
        assert_eq!(steps.len(), 3);
        assert!(steps.contains(&IterStep::Pair(Value::Int(1), Value::Int(10))));
        assert!(steps.contains(&IterStep::Pair(Value::Int(1), Value::Int(20))));

        // domain: each domain once
        let steps = drain(IterState::start(IterKind::Domain, m).unwrap());
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_tuple_iterators() {
        let mut t = Tuple::from_values([Value::Int(5), Value::Int(6), Value::Int(7)]);
        t.set(1, Value::Om);
        let t = Value::tuple(t);

        let steps = drain(IterState::start(IterKind::Tuple, t.clone()).unwrap());
        assert_eq!(
            steps,
            vec![
                IterStep::One(Value::Int(5)),
                IterStep::One(Value::Om),
                IterStep::One(Value::Int(7)),
            ]
        );

        // pair kinds skip holes
        let steps = drain(IterState::start(IterKind::TuplePair, t.clone()).unwrap());
        assert_eq!(
            steps,
            vec![
                IterStep::Pair(Value::Int(1), Value::Int(5)),
                IterStep::Pair(Value::Int(3), Value::Int(7)),
            ]
        );

        let steps = drain(IterState::start(IterKind::AltTuplePair, t).unwrap());
        assert_eq!(
            steps,
            vec![
                IterStep::Pair(Value::Int(5), Value::Int(1)),
                IterStep::Pair(Value::Int(7), Value::Int(3)),
            ]
        );
    }

    #[test]
    fn test_string_iterators() {
        let s = Value::str("ab");
        let steps = drain(IterState::start(IterKind::Str, s.clone()).unwrap());
        assert_eq!(steps, vec![IterStep::One(Value::str("a")), IterStep::One(Value::str("b"))]);

        let steps = drain(IterState::start(IterKind::StrPair, s).unwrap());
        assert_eq!(
            steps,
            vec![
                IterStep::Pair(Value::Int(1), Value::str("a")),
                IterStep::Pair(Value::Int(2), Value::str("b")),
            ]
        );
    }

    #[test]
    fn test_pow_iterator_counts_subsets() {
        let steps = drain(IterState::start(IterKind::Pow, int_set([1, 2, 3])).unwrap());
        assert_eq!(steps.len(), 8);
        // first subset out is empty
        assert_eq!(steps[0], IterStep::One(Value::set(Set::new())));
    }

    #[test]
    fn test_npow_iterator() {
        let steps = drain(IterState::start_npow(int_set([1, 2, 3]), 2).unwrap());
        assert_eq!(steps.len(), 3);
        let steps = drain(IterState::start_npow(int_set([1, 2]), 5).unwrap());
        assert!(steps.is_empty());
        let steps = drain(IterState::start_npow(int_set([1, 2]), 0).unwrap());
        assert_eq!(steps, vec![IterStep::One(Value::set(Set::new()))]);
    }

    #[test]
    fn test_snapshot_survives_source_mutation() {
        let mut s = Set::new();
        for i in 0..50 {
            s.insert(Value::Int(i));
        }
        let source = Value::set(s);
        let mut it = IterState::start(IterKind::Set, source.clone()).unwrap();

        // another holder mutates: the write clones away from the snapshot
        let mut other = source.clone();
        if let Value::Set(rc) = &mut other {
            Rc::make_mut(rc).insert(Value::Int(999));
        }

        let mut count = 0;
        while let Some(_) = it.next().unwrap() {
            count += 1;
        }
        assert_eq!(count, 50);
    }

    #[test]
    fn test_wrong_source_form() {
        assert!(IterState::start(IterKind::Set, Value::Int(1)).is_err());
        assert!(IterState::start(IterKind::Map, int_set([1])).is_err());
    }
}
