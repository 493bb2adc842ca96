//! Algebraic properties of the value model
//!
//! - equal values hash equal, across nested aggregates and regardless of
//!   construction order
//! - a shared aggregate is unchanged by mutations through another holder
//! - trie headers stay within their height bounds after every mutation

use proptest::prelude::*;
use sett_core::{value_hash, Map, Set, Tuple, Value};
use std::rc::Rc;

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Value::Int),
        (-1.0e12_f64..1.0e12).prop_map(Value::Real),
        "[a-z]{0,6}".prop_map(|s| Value::str(&s)),
        (0..8i64).prop_map(Value::Atom),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(|vs| {
                let mut s = Set::new();
                for v in vs {
                    s.insert(v);
                }
                Value::set(s)
            }),
            prop::collection::vec(inner.clone(), 0..4)
                .prop_map(|vs| Value::tuple(Tuple::from_values(vs))),
            prop::collection::vec((inner.clone(), inner), 0..4).prop_map(|pairs| {
                let mut m = Map::new();
                for (d, r) in pairs {
                    m.insert_pair(d, r);
                }
                Value::map(m)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn equal_values_hash_equal(v in arb_value()) {
        // a structural copy is equal and must hash identically
        let copy = rebuild(&v);
        prop_assert_eq!(&copy, &v);
        prop_assert_eq!(value_hash(&copy), value_hash(&v));
    }

    #[test]
    fn set_construction_order_is_immaterial(vs in prop::collection::vec(arb_value(), 0..8)) {
        let mut forward = Set::new();
        for v in &vs {
            forward.insert(v.clone());
        }
        let mut backward = Set::new();
        for v in vs.iter().rev() {
            backward.insert(v.clone());
        }
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(forward.hash(), backward.hash());
    }

    #[test]
    fn shared_set_unchanged_by_other_holder(
        ns in prop::collection::vec(any::<i64>(), 0..32),
        extra in any::<i64>(),
    ) {
        let mut a = Set::new();
        for &n in &ns {
            a.insert(Value::Int(n));
        }
        let snapshot = a.clone();
        let a = Rc::new(a);

        // b shares a's payload, then writes
        let mut b = Rc::clone(&a);
        let m = Rc::make_mut(&mut b);
        m.insert(Value::Int(extra));
        m.remove(&Value::Int(ns.first().copied().unwrap_or(0)));

        prop_assert_eq!(&*a, &snapshot);
        b.check_invariants();
    }

    #[test]
    fn shared_tuple_unchanged_by_other_holder(
        ns in prop::collection::vec(any::<i64>(), 1..32),
        extra in any::<i64>(),
    ) {
        let a = Rc::new(Tuple::from_values(ns.iter().copied().map(Value::Int)));
        let snapshot = (*a).clone();

        let mut b = Rc::clone(&a);
        let m = Rc::make_mut(&mut b);
        m.push(Value::Int(extra));
        m.set(0, Value::Om);

        prop_assert_eq!(&*a, &snapshot);
        b.check_invariants();
    }

    #[test]
    fn shared_map_unchanged_by_other_holder(
        pairs in prop::collection::vec((any::<i64>(), any::<i64>()), 0..24),
        d in any::<i64>(),
    ) {
        let mut a = Map::new();
        for &(x, y) in &pairs {
            a.insert_pair(Value::Int(x), Value::Int(y));
        }
        let snapshot = a.clone();
        let a = Rc::new(a);

        let mut b = Rc::clone(&a);
        let m = Rc::make_mut(&mut b);
        m.insert_pair(Value::Int(d), Value::Int(d));
        m.remove_domain(&Value::Int(pairs.first().map_or(0, |p| p.0)));

        prop_assert_eq!(&*a, &snapshot);
        b.check_invariants();
    }

    #[test]
    fn set_invariants_hold_under_churn(ops in prop::collection::vec((any::<bool>(), 0..200i64), 0..200)) {
        let mut s = Set::new();
        for (insert, n) in ops {
            if insert {
                s.insert(Value::Int(n));
            } else {
                s.remove(&Value::Int(n));
            }
            s.check_invariants();
        }
    }

    #[test]
    fn tuple_trailing_omega_elision(ns in prop::collection::vec(any::<i64>(), 1..40)) {
        let mut t = Tuple::from_values(ns.iter().copied().map(Value::Int));
        // clearing the last slot always lands on a present element or zero
        t.set(t.len() - 1, Value::Om);
        if t.len() > 0 {
            prop_assert!(t.get(t.len() - 1).is_some());
        }
        t.check_invariants();
    }

    #[test]
    fn map_pair_semantics(x in any::<i64>(), y in any::<i64>(), z in any::<i64>()) {
        prop_assume!(y != z);
        let mut m = Map::new();
        m.insert_pair(Value::Int(x), Value::Int(y));
        prop_assert_eq!(m.image(&Value::Int(x)), Value::Int(y));
        m.insert_pair(Value::Int(x), Value::Int(z));
        prop_assert_eq!(m.image(&Value::Int(x)), Value::Om);
        let s = m.image_set(&Value::Int(x));
        prop_assert_eq!(s.card(), 2);
        prop_assert_eq!(m.card(), 2);
    }
}

/// Deep structural copy through fresh aggregate construction.
fn rebuild(v: &Value) -> Value {
    match v {
        Value::Set(s) => {
            let mut out = Set::new();
            s.for_each(&mut |e| {
                out.insert(rebuild(e));
            });
            Value::set(out)
        }
        Value::Map(m) => {
            let mut out = Map::new();
            m.for_each_pair(&mut |d, r| {
                out.insert_pair(rebuild(d), rebuild(r));
            });
            Value::map(out)
        }
        Value::Tuple(t) => {
            let mut out = Tuple::new();
            for i in 0..t.len() {
                if let Some(e) = t.get(i) {
                    out.set(i, rebuild(e));
                }
            }
            Value::tuple(out)
        }
        other => other.clone(),
    }
}
