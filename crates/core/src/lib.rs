//! Sett Core: the value model for a set-theoretic language runtime
//!
//! Key design principles:
//! - Value: the specifier, a tagged cell with one arm per form
//! - Heap payloads: reference-counted, copy-on-write (a shared payload is
//!   read-only; the first write clones)
//! - Aggregates: persistent hash tries for sets/maps/objects, a
//!   length-indexed radix tree for tuples, cell ropes for strings, all
//!   keeping an incrementally maintained XOR hash in their headers
//!
//! # Modules
//!
//! - `atom`: interned symbols and the boolean atoms
//! - `error`: the `CoreError` taxonomy the runtime maps onto abends
//! - `hash`: per-form hashing and the XOR-delta helpers
//! - `iter`: single-pass iterators over every aggregate kind
//! - `mailbox`: first-class FIFO of specifiers
//! - `map`: hash-trie maps with multi-valued cells
//! - `num`: short/big/real arithmetic with promotion
//! - `object`: instance-variable tries and object headers
//! - `procval`: procedure records (closure chain, dormant locals)
//! - `set`: hash-trie sets
//! - `string`: fixed-width-cell ropes
//! - `tuple`: length-indexed radix trees
//! - `value`: the `Value` enum and recursive equality

pub mod atom;
pub mod error;
pub mod hash;
pub mod iter;
pub mod mailbox;
pub mod map;
pub mod num;
pub mod object;
pub mod procval;
pub mod set;
pub mod string;
mod trie;
pub mod tuple;
pub mod value;

// Re-export key types
pub use atom::{AtomGen, ATOM_FALSE, ATOM_TRUE};
pub use error::CoreError;
pub use hash::value_hash;
pub use iter::{IterKind, IterState, IterStep};
pub use mailbox::Mailbox;
pub use map::{Lookup, Map, MapRange};
pub use object::{vars_height, ObjVars, Object};
pub use procval::{ProcBody, ProcRec};
pub use set::Set;
pub use string::Str;
pub use tuple::Tuple;
pub use value::{ClassRef, CodeRef, Form, OpaqueValue, Pid, Value};
