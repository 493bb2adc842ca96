//! Sett Runtime: the interpreter for a set-theoretic language
//!
//! The runtime executes units of pre-resolved instructions over the
//! `sett-core` value model. The hard parts live here: the dispatch
//! loop, the procedure call/return protocol with closure environment
//! swapping, class instance load/unload with operator overloads, the
//! cooperative process ring with mailbox request queues, and the abend
//! escape with per-unit error extensions.
//!
//! # Modules
//!
//! - `abend`: error kinds and the escape protocol
//! - `builtins`: the built-in procedure ABI and the standard set
//! - `class`: class descriptors and operator method tables
//! - `config`: VM tunables (`sett.toml`)
//! - `frame`: call-stack frames and post-return fixups
//! - `instruction`: instructions and pre-resolved operands
//! - `interp`: the `Vm` and its dispatch loop
//! - `oo`: objects, instance load/unload, method dispatch
//! - `opcode`: the opcode set
//! - `ops`: operator/extraction/assignment/iteration semantics
//! - `process`: the process ring and the cooperative scheduler
//! - `program`: the `UnitBuilder` loader seam
//! - `unit`: loaded units and the unit table

pub mod abend;
pub mod builtins;
pub mod class;
pub mod config;
pub mod frame;
pub mod instruction;
mod interp;
mod oo;
pub mod opcode;
mod ops;
pub mod process;
pub mod program;
pub mod unit;

// Re-export key types
pub use abend::{Abend, AbendKind};
pub use builtins::{BuiltinFn, Builtins};
pub use class::{ClassDesc, OpMethod, SlotDesc};
pub use config::{AssertMode, VmConfig};
pub use instruction::{Instruction, Operand, SpecRef};
pub use interp::Vm;
pub use opcode::Opcode;
pub use ops::IterMode;
pub use process::{ProcessKind, Request, WaitCond};
pub use program::{Program, UnitBuilder};
pub use unit::{Unit, UnitTable};

// The value model is part of the public surface.
pub use sett_core as core;
pub use sett_core::Value;
