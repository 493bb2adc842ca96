//! Procedure calls: literal calls, recursion, var-args, built-ins, and
//! first-class closures with captured environments.

mod common;

use common::SharedOut;
use sett_runtime::core::Tuple;
use sett_runtime::{Opcode, Operand, Program, UnitBuilder, Value, Vm};

fn stop(u: &mut UnitBuilder) {
    u.emit(Opcode::Stop, Operand::None, Operand::None, Operand::None);
}

fn run(u: UnitBuilder) -> Vm {
    let mut vm = Vm::new();
    vm.load(Program::single(u.finish()));
    vm.run("main").expect("program abended");
    vm
}

#[test]
fn test_literal_call_and_return() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_proc("double", 1, 1);
    u.begin_proc("double");
    let x = u.proc_local("double", 0);
    let t = u.proc_local("double", 1);
    u.emit(Opcode::Add, t.into(), x.into(), x.into());
    u.emit(Opcode::Return, t.into(), Operand::None, Operand::None);
    u.begin_body();
    let r = u.slot("r");
    u.emit(Opcode::Push1, Operand::Int(21), Operand::None, Operand::None);
    let f = u.proc_slot("double");
    u.emit(Opcode::Lcall, r.into(), f.into(), Operand::Int(1));
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r), Value::Int(42));
}

#[test]
fn test_recursion_with_local_save_restore() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_proc("fact", 1, 2);
    u.begin_proc("fact");
    let n = u.proc_local("fact", 0);
    let cond = u.proc_local("fact", 1);
    let tmp = u.proc_local("fact", 2);
    u.emit(Opcode::Le, cond.into(), n.into(), Operand::Int(1));
    u.gofalse("fact_rec", cond);
    u.emit(Opcode::Return, Operand::Int(1), Operand::None, Operand::None);
    u.label("fact_rec");
    u.emit(Opcode::Sub, tmp.into(), n.into(), Operand::Int(1));
    u.emit(Opcode::Push1, tmp.into(), Operand::None, Operand::None);
    let f = u.proc_slot("fact");
    u.emit(Opcode::Lcall, tmp.into(), f.into(), Operand::Int(1));
    u.emit(Opcode::Mult, tmp.into(), n.into(), tmp.into());
    u.emit(Opcode::Return, tmp.into(), Operand::None, Operand::None);
    u.begin_body();
    let r = u.slot("r");
    u.emit(Opcode::Push1, Operand::Int(10), Operand::None, Operand::None);
    u.emit(Opcode::Lcall, r.into(), f.into(), Operand::Int(1));
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r), Value::Int(3_628_800));
}

#[test]
fn test_var_args_gather_into_tuple() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_proc("gather", 2, 0);
    u.set_var_args("gather");
    u.begin_proc("gather");
    let rest = u.proc_local("gather", 1);
    u.emit(Opcode::Return, rest.into(), Operand::None, Operand::None);
    u.begin_body();
    let r = u.slot("r");
    u.emit(
        Opcode::Push3,
        Operand::Int(1),
        Operand::Int(2),
        Operand::Int(3),
    );
    let f = u.proc_slot("gather");
    u.emit(Opcode::Lcall, r.into(), f.into(), Operand::Int(3));
    stop(&mut u);
    let vm = run(u);
    let expect = Value::tuple(Tuple::from_values([Value::Int(2), Value::Int(3)]));
    assert_eq!(vm.read(r), expect);
}

#[test]
fn test_closure_counter_keeps_private_state() {
    let mut u = UnitBuilder::new("main", 0);

    // counter() initializes n and hands out inc as a first-class value
    u.declare_proc("counter", 0, 2);
    u.declare_proc("inc", 0, 0);
    u.set_parent("inc", "counter");

    u.begin_proc("counter");
    let n = u.proc_local("counter", 0);
    let out = u.proc_local("counter", 1);
    u.emit(Opcode::Asn, n.into(), Operand::Int(0), Operand::None);
    let inc_slot = u.proc_slot("inc");
    u.emit(Opcode::Penviron, out.into(), inc_slot.into(), Operand::None);
    u.emit(Opcode::Return, out.into(), Operand::None, Operand::None);

    u.begin_proc("inc");
    u.emit(Opcode::Add, n.into(), n.into(), Operand::Int(1));
    u.emit(Opcode::Return, n.into(), Operand::None, Operand::None);

    u.begin_body();
    let c1 = u.slot("c1");
    let c2 = u.slot("c2");
    let r1 = u.slot("r1");
    let r2 = u.slot("r2");
    let r3 = u.slot("r3");
    let counter = u.proc_slot("counter");
    u.emit(Opcode::Lcall, c1.into(), counter.into(), Operand::Int(0));
    u.emit(Opcode::Lcall, c2.into(), counter.into(), Operand::Int(0));
    // first closure twice, second once
    u.emit(Opcode::Call, r1.into(), c1.into(), Operand::Int(0));
    u.emit(Opcode::Call, r2.into(), c1.into(), Operand::Int(0));
    u.emit(Opcode::Call, r3.into(), c2.into(), Operand::Int(0));
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r1), Value::Int(1));
    assert_eq!(vm.read(r2), Value::Int(2));
    assert_eq!(vm.read(r3), Value::Int(1));
}

#[test]
fn test_computed_call_through_of() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_proc("triple", 1, 1);
    u.begin_proc("triple");
    let x = u.proc_local("triple", 0);
    let t = u.proc_local("triple", 1);
    u.emit(Opcode::Mult, t.into(), x.into(), Operand::Int(3));
    u.emit(Opcode::Return, t.into(), Operand::None, Operand::None);
    u.begin_body();
    // f := triple; r := f(7)
    let f = u.slot("f");
    let r = u.slot("r");
    let triple = u.proc_slot("triple");
    u.emit(Opcode::Asn, f.into(), triple.into(), Operand::None);
    u.emit(Opcode::Of, r.into(), f.into(), Operand::Int(7));
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r), Value::Int(21));
}

#[test]
fn test_builtin_calls() {
    let mut u = UnitBuilder::new("main", 0);
    u.begin_body();
    let abs = u.native("abs");
    let newat = u.native("newat");
    let r = u.slot("r");
    let a1 = u.slot("a1");
    let a2 = u.slot("a2");
    let same = u.slot("same");
    u.emit(Opcode::Push1, Operand::Int(-5), Operand::None, Operand::None);
    u.emit(Opcode::Lcall, r.into(), abs.into(), Operand::Int(1));
    u.emit(Opcode::Lcall, a1.into(), newat.into(), Operand::Int(0));
    u.emit(Opcode::Lcall, a2.into(), newat.into(), Operand::Int(0));
    u.emit(Opcode::Eq, same.into(), a1.into(), a2.into());
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r), Value::Int(5));
    assert_eq!(vm.read(same), Value::bool_atom(false));
}

#[test]
fn test_builtin_print_varargs() {
    let mut u = UnitBuilder::new("main", 0);
    u.begin_body();
    let print = u.native("print");
    let s = u.lit(Value::str("sum"));
    u.emit(Opcode::Push2, s.into(), Operand::Int(7), Operand::None);
    u.emit(Opcode::Lcall, Operand::None, print.into(), Operand::Int(2));
    stop(&mut u);
    let out = SharedOut::default();
    let mut vm = Vm::new();
    vm.set_sinks(Box::new(out.clone()), Box::new(SharedOut::default()));
    vm.load(Program::single(u.finish()));
    vm.run("main").unwrap();
    assert_eq!(out.text(), "sum 7\n");
}

#[test]
fn test_wrong_arg_count_abends() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_proc("one", 1, 0);
    u.begin_proc("one");
    u.emit(Opcode::Return, Operand::None, Operand::None, Operand::None);
    u.begin_body();
    let f = u.proc_slot("one");
    u.emit(Opcode::Lcall, Operand::None, f.into(), Operand::Int(0));
    stop(&mut u);
    let mut vm = Vm::new();
    vm.set_sinks(Box::new(SharedOut::default()), Box::new(SharedOut::default()));
    vm.load(Program::single(u.finish()));
    assert!(vm.run("main").is_err());
}

#[test]
fn test_command_line_tuple() {
    let mut u = UnitBuilder::new("main", 0);
    u.begin_body();
    let cl = u.native("command_line");
    let r = u.slot("r");
    u.emit(Opcode::Lcall, r.into(), cl.into(), Operand::Int(0));
    stop(&mut u);
    let mut vm = Vm::new();
    vm.set_command_line(&["alpha".to_string(), "beta".to_string()]);
    vm.load(Program::single(u.finish()));
    vm.run("main").unwrap();
    let expect = Value::tuple(Tuple::from_values([Value::str("alpha"), Value::str("beta")]));
    assert_eq!(vm.read(r), expect);
}
