//! Value hashing
//!
//! Every form hashes deterministically, and equal values hash equal; the
//! aggregate headers rely on this to keep their cached hash codes valid
//! under the XOR-delta discipline (mutations XOR out the old element's
//! contribution and XOR in the new one).
//!
//! Integers are canonical (a `Big` payload never fits `i64`), so the short
//! and big arms never need to agree on a hash for the same value. Reals
//! normalize `-0.0` before hashing so the two zero encodings collide with
//! their shared equality.

use crate::value::Value;
use num_bigint::BigInt;

/// Per-form salts, XORed in before mixing so distinct forms with similar
/// payload bits land far apart.
const SALT_OM: u64 = 0x9e37_79b9_7f4a_7c15;
const SALT_INT: u64 = 0x2545_f491_4f6c_dd1d;
const SALT_REAL: u64 = 0x6a09_e667_f3bc_c909;
const SALT_ATOM: u64 = 0xbb67_ae85_84ca_a73b;
const SALT_STR: u64 = 0x3c6e_f372_fe94_f82b;
const SALT_SET: u64 = 0xa54f_f53a_5f1d_36f1;
const SALT_MAP: u64 = 0x510e_527f_ade6_82d1;
const SALT_TUPLE: u64 = 0x9b05_688c_2b3e_6c1f;
const SALT_OBJECT: u64 = 0x1f83_d9ab_fb41_bd6b;
const SALT_PROC: u64 = 0x5be0_cd19_137e_2179;
const SALT_LABEL: u64 = 0xcbbb_9d5d_c105_9ed8;
const SALT_OPAQUE: u64 = 0x629a_292a_367c_d507;

/// Finalizer from splitmix64; good avalanche for cheap integer keys.
#[inline]
pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    x
}

/// Combine a domain hash with a range hash into a single pair
/// contribution. Rotation keeps the pair asymmetric so `[a, b]` and
/// `[b, a]` contribute differently.
#[inline]
pub fn pair_hash(dom: u64, range: u64) -> u64 {
    mix64(dom.rotate_left(32) ^ range)
}

/// FNV-1a over a byte run; used for string cells.
#[inline]
pub fn bytes_hash(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x1_0000_01b3);
    }
    h
}

pub fn int_hash(i: i64) -> u64 {
    mix64(i as u64 ^ SALT_INT)
}

pub fn big_hash(b: &BigInt) -> u64 {
    let (sign, digits) = b.to_u64_digits();
    let mut h = SALT_INT ^ mix64(sign as i8 as u64);
    for d in digits {
        h = mix64(h ^ d);
    }
    h
}

pub fn real_hash(f: f64) -> u64 {
    // -0.0 == 0.0 must hash identically
    let f = if f == 0.0 { 0.0 } else { f };
    mix64(f.to_bits() ^ SALT_REAL)
}

pub fn atom_hash(n: i64) -> u64 {
    mix64(n as u64 ^ SALT_ATOM)
}

pub fn str_hash(bytes_h: u64) -> u64 {
    mix64(bytes_h ^ SALT_STR)
}

/// Hash an instance-variable index for the object trie.
pub fn slot_hash(index: u32) -> u64 {
    mix64(u64::from(index) ^ SALT_OBJECT)
}

/// Hash of a whole value.
///
/// Aggregates answer from their cached header hash, so this is O(1) for
/// everything except strings with an invalidated cache.
pub fn value_hash(v: &Value) -> u64 {
    match v {
        Value::Om => SALT_OM,
        Value::Int(i) => int_hash(*i),
        Value::Big(b) => big_hash(b),
        Value::Real(f) => real_hash(*f),
        Value::Atom(n) => atom_hash(*n),
        Value::Str(s) => str_hash(s.content_hash()),
        Value::Set(s) => mix64(s.hash() ^ SALT_SET),
        Value::Map(m) => mix64(m.hash() ^ SALT_MAP),
        Value::Tuple(t) => mix64(t.hash() ^ SALT_TUPLE),
        Value::Object(o) => mix64(o.content_hash() ^ SALT_OBJECT),
        // Process handles have identity semantics; the pid is stable for
        // the life of the handle while the instance trie mutates in place.
        Value::Process(o) => match o.process_id() {
            Some(pid) => mix64(u64::from(pid.0) ^ SALT_OBJECT),
            None => SALT_OBJECT,
        },
        Value::Proc(p) => mix64(std::rc::Rc::as_ptr(p) as u64 ^ SALT_PROC),
        Value::Label(c) => mix64((u64::from(c.unit) << 32 | u64::from(c.ip)) ^ SALT_LABEL),
        Value::Iter(i) => mix64(std::rc::Rc::as_ptr(i) as u64 ^ SALT_OPAQUE),
        Value::Mailbox(m) => mix64(std::rc::Rc::as_ptr(m) as u64 ^ SALT_OPAQUE),
        Value::Opaque(o) => mix64(std::rc::Rc::as_ptr(o) as *const u8 as u64 ^ SALT_OPAQUE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_equal_ints_hash_equal() {
        assert_eq!(value_hash(&Value::Int(42)), value_hash(&Value::Int(42)));
        assert_ne!(value_hash(&Value::Int(42)), value_hash(&Value::Int(43)));
    }

    #[test]
    fn test_zero_reals_hash_equal() {
        assert_eq!(value_hash(&Value::Real(0.0)), value_hash(&Value::Real(-0.0)));
    }

    #[test]
    fn test_forms_salted_apart() {
        // 1, 1.0, "1", and atom 1 are all distinct values
        let h_int = value_hash(&Value::Int(1));
        let h_real = value_hash(&Value::Real(1.0));
        let h_atom = value_hash(&Value::Atom(1));
        assert_ne!(h_int, h_real);
        assert_ne!(h_int, h_atom);
        assert_ne!(h_real, h_atom);
    }

    #[test]
    fn test_pair_hash_asymmetric() {
        let a = int_hash(1);
        let b = int_hash(2);
        assert_ne!(pair_hash(a, b), pair_hash(b, a));
    }
}
