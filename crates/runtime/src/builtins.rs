//! Built-in procedures
//!
//! Every built-in is a plain function receiving the VM and its argument
//! array, returning the result specifier. Built-ins never suspend; a
//! blocking one (like `receive`) registers a wait predicate through
//! `Vm::request_block` and returns; the scheduler parks the calling
//! process and installs the predicate's value in the result slot when
//! it unblocks.

use crate::abend::{domain_error, type_error, Abend, AbendKind};
use crate::interp::Vm;
use sett_core::{num, ProcRec, Str, Value};
use std::io::Write;
use std::rc::Rc;

pub type BuiltinFn = fn(&mut Vm, &mut [Value]) -> Result<Value, Abend>;

pub struct BuiltinDesc {
    pub name: &'static str,
    pub func: BuiltinFn,
    pub formal_count: u32,
    pub var_args: bool,
}

/// The registry; indexes are stable, so procedure records refer to
/// built-ins by position.
pub struct Builtins {
    entries: Vec<BuiltinDesc>,
}

impl Builtins {
    pub fn standard() -> Self {
        Builtins {
            entries: vec![
                BuiltinDesc { name: "print", func: bi_print, formal_count: 0, var_args: true },
                BuiltinDesc { name: "nprint", func: bi_nprint, formal_count: 0, var_args: true },
                BuiltinDesc { name: "newat", func: bi_newat, formal_count: 0, var_args: false },
                BuiltinDesc { name: "abs", func: bi_abs, formal_count: 1, var_args: false },
                BuiltinDesc { name: "str", func: bi_str, formal_count: 1, var_args: false },
                BuiltinDesc { name: "char", func: bi_char, formal_count: 1, var_args: false },
                BuiltinDesc { name: "ichar", func: bi_ichar, formal_count: 1, var_args: false },
                BuiltinDesc { name: "pass", func: bi_pass, formal_count: 0, var_args: false },
                BuiltinDesc { name: "receive", func: bi_receive, formal_count: 1, var_args: false },
                BuiltinDesc { name: "command_line", func: bi_command_line, formal_count: 0, var_args: false },
            ],
        }
    }

    pub fn find(&self, name: &str) -> Option<u32> {
        self.entries.iter().position(|e| e.name == name).map(|i| i as u32)
    }

    pub fn func(&self, index: u32) -> Result<BuiltinFn, Abend> {
        self.entries
            .get(index as usize)
            .map(|e| e.func)
            .ok_or_else(|| Abend::new(AbendKind::Resource, "unknown built-in index"))
    }

    /// A procedure value for the named built-in.
    pub fn proc_value(&self, name: &str) -> Option<Value> {
        let index = self.find(name)?;
        let e = &self.entries[index as usize];
        Some(Value::Proc(Rc::new(ProcRec::native(
            e.name,
            index,
            e.formal_count,
            e.var_args,
        ))))
    }
}

fn bi_print(vm: &mut Vm, args: &mut [Value]) -> Result<Value, Abend> {
    bi_nprint(vm, args)?;
    writeln!(vm.out).map_err(|e| Abend::new(AbendKind::Resource, e.to_string()))?;
    Ok(Value::Om)
}

fn bi_nprint(vm: &mut Vm, args: &mut [Value]) -> Result<Value, Abend> {
    let mut first = true;
    for v in args.iter() {
        if !first {
            write!(vm.out, " ").map_err(|e| Abend::new(AbendKind::Resource, e.to_string()))?;
        }
        first = false;
        write!(vm.out, "{v}").map_err(|e| Abend::new(AbendKind::Resource, e.to_string()))?;
    }
    Ok(Value::Om)
}

fn bi_newat(vm: &mut Vm, _args: &mut [Value]) -> Result<Value, Abend> {
    Ok(vm.fresh_atom())
}

fn bi_abs(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, Abend> {
    Ok(num::abs(&args[0])?)
}

fn bi_str(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, Abend> {
    Ok(Value::str(&args[0].to_string()))
}

fn bi_char(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, Abend> {
    match &args[0] {
        Value::Int(i) if (0..=255).contains(i) => {
            Ok(Value::Str(Rc::new(Str::from_bytes(&[*i as u8]))))
        }
        Value::Int(_) => Err(domain_error("char argument out of range")),
        other => Err(type_error("char of a non-integer").with_operand(other)),
    }
}

fn bi_ichar(_vm: &mut Vm, args: &mut [Value]) -> Result<Value, Abend> {
    match &args[0] {
        Value::Str(s) if s.len() == 1 => Ok(Value::Int(i64::from(
            s.byte_at(0).unwrap_or_default(),
        ))),
        other => Err(type_error("ichar needs a one-character string").with_operand(other)),
    }
}

fn bi_pass(vm: &mut Vm, _args: &mut [Value]) -> Result<Value, Abend> {
    vm.request_yield();
    Ok(Value::Om)
}

/// Blocking mailbox receive: parks the caller until a value arrives.
fn bi_receive(vm: &mut Vm, args: &mut [Value]) -> Result<Value, Abend> {
    let Value::Mailbox(mb) = &args[0] else {
        return Err(type_error("receive of a non-mailbox").with_operand(&args[0]));
    };
    if let Some(v) = mb.borrow_mut().pop() {
        return Ok(v);
    }
    let mb = Rc::clone(mb);
    vm.request_block(Box::new(move |_vm: &mut Vm| mb.borrow_mut().pop()), false);
    Ok(Value::Om)
}

fn bi_command_line(vm: &mut Vm, _args: &mut [Value]) -> Result<Value, Abend> {
    Ok(vm.command_line())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let b = Builtins::standard();
        assert!(b.find("print").is_some());
        assert!(b.find("no_such").is_none());
        let p = b.proc_value("abs").unwrap();
        match p {
            Value::Proc(p) => {
                assert!(p.is_native());
                assert_eq!(p.formal_count, 1);
            }
            other => panic!("expected a procedure, got {other:?}"),
        }
    }
}
