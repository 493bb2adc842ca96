//! Classes and objects: instance variables, method calls through the
//! self-load protocol, operator overloads with right-operand fallback,
//! bound methods as first-class values, and visibility enforcement.

mod common;

use common::SharedOut;
use sett_runtime::{
    AbendKind, OpMethod, Opcode, Operand, Program, UnitBuilder, Value, Vm,
};

fn stop(u: &mut UnitBuilder) {
    u.emit(Opcode::Stop, Operand::None, Operand::None, Operand::None);
}

fn run(u: UnitBuilder) -> Vm {
    let mut vm = Vm::new();
    vm.load(Program::single(u.finish()));
    vm.run("main").expect("program abended");
    vm
}

/// A point class with two variables and a sum method.
fn build_point(u: &mut UnitBuilder) {
    u.declare_class("point", false, &["x", "y"]);
    u.declare_proc("point_sum", 0, 1);
    u.begin_proc("point_sum");
    let x = u.class_ivar("point", "x");
    let y = u.class_ivar("point", "y");
    let t = u.proc_local("point_sum", 0);
    u.emit(Opcode::Add, t.into(), x.into(), y.into());
    u.emit(Opcode::Return, t.into(), Operand::None, Operand::None);
    u.class_method("point", "sum", "point_sum", true);
}

fn new_point(u: &mut UnitBuilder, name: &str, x: i64, y: i64) -> sett_runtime::SpecRef {
    let slot = u.slot(name);
    let cx = u.class_ivar("point", "x");
    let cy = u.class_ivar("point", "y");
    let class = u.class_operand("point");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Asn, cx.into(), Operand::Int(x), Operand::None);
    u.emit(Opcode::Asn, cy.into(), Operand::Int(y), Operand::None);
    u.emit(Opcode::Initend, slot.into(), class, Operand::None);
    slot
}

#[test]
fn test_method_call_reads_instance_variables() {
    let mut u = UnitBuilder::new("main", 0);
    build_point(&mut u);
    u.begin_body();
    let p = new_point(&mut u, "p", 3, 4);
    let r = u.slot("r");
    let sum = u.slot_operand("point", "sum");
    u.emit(Opcode::Slotcall, r.into(), p.into(), sum);
    u.emit(Opcode::Noop, Operand::Int(0), Operand::None, Operand::None);
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r), Value::Int(7));
}

#[test]
fn test_two_instances_keep_separate_state() {
    let mut u = UnitBuilder::new("main", 0);
    build_point(&mut u);
    u.begin_body();
    let p1 = new_point(&mut u, "p1", 1, 0);
    let p2 = new_point(&mut u, "p2", 2, 0);
    let r1 = u.slot("r1");
    let r2 = u.slot("r2");
    let sum = u.slot_operand("point", "sum");
    u.emit(Opcode::Slotcall, r1.into(), p1.into(), sum);
    u.emit(Opcode::Noop, Operand::Int(0), Operand::None, Operand::None);
    u.emit(Opcode::Slotcall, r2.into(), p2.into(), sum);
    u.emit(Opcode::Noop, Operand::Int(0), Operand::None, Operand::None);
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r1), Value::Int(1));
    assert_eq!(vm.read(r2), Value::Int(2));
}

#[test]
fn test_slot_read_and_write() {
    let mut u = UnitBuilder::new("main", 0);
    build_point(&mut u);
    u.begin_body();
    let p = new_point(&mut u, "p", 3, 4);
    let before = u.slot("before");
    let after = u.slot("after");
    let x = u.slot_operand("point", "x");
    u.emit(Opcode::Slotof, before.into(), p.into(), x);
    u.emit(Opcode::Sslotof, p.into(), x, Operand::Int(9));
    u.emit(Opcode::Slotof, after.into(), p.into(), x);
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(before), Value::Int(3));
    assert_eq!(vm.read(after), Value::Int(9));
}

#[test]
fn test_method_mutation_written_back() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_class("cell", false, &["v"]);
    u.declare_proc("cell_bump", 0, 0);
    u.begin_proc("cell_bump");
    let v = u.class_ivar("cell", "v");
    u.emit(Opcode::Add, v.into(), v.into(), Operand::Int(1));
    u.emit(Opcode::Return, v.into(), Operand::None, Operand::None);
    u.class_method("cell", "bump", "cell_bump", true);
    u.begin_body();
    let c = u.slot("c");
    let class = u.class_operand("cell");
    let cv = u.class_ivar("cell", "v");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Asn, cv.into(), Operand::Int(10), Operand::None);
    u.emit(Opcode::Initend, c.into(), class, Operand::None);
    let r = u.slot("r");
    let seen = u.slot("seen");
    let bump = u.slot_operand("cell", "bump");
    u.emit(Opcode::Slotcall, r.into(), c.into(), bump);
    u.emit(Opcode::Noop, Operand::Int(0), Operand::None, Operand::None);
    let x = u.slot_operand("cell", "v");
    u.emit(Opcode::Slotof, seen.into(), c.into(), x);
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r), Value::Int(11));
    assert_eq!(vm.read(seen), Value::Int(11));
}

#[test]
fn test_right_operand_overload_fallback() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_class("wrap", false, &["v"]);
    // right-operand `+`: 3 + c adds 3 to the wrapped value
    u.declare_proc("wrap_add_r", 1, 1);
    u.begin_proc("wrap_add_r");
    let arg = u.proc_local("wrap_add_r", 0);
    let t = u.proc_local("wrap_add_r", 1);
    let v = u.class_ivar("wrap", "v");
    u.emit(Opcode::Add, t.into(), v.into(), arg.into());
    u.emit(Opcode::Return, t.into(), Operand::None, Operand::None);
    u.class_op("wrap", OpMethod::Add, true, "wrap_add_r");
    u.begin_body();
    let c = u.slot("c");
    let class = u.class_operand("wrap");
    let wv = u.class_ivar("wrap", "v");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Asn, wv.into(), Operand::Int(100), Operand::None);
    u.emit(Opcode::Initend, c.into(), class, Operand::None);
    let r = u.slot("r");
    u.emit(Opcode::Add, r.into(), Operand::Int(3), c.into());
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r), Value::Int(103));
}

#[test]
fn test_comparison_overload_records_boolean() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_class("always", false, &[]);
    u.declare_proc("always_eq", 1, 0);
    u.begin_proc("always_eq");
    let yes = u.lit(Value::bool_atom(true));
    u.emit(Opcode::Return, yes.into(), Operand::None, Operand::None);
    u.class_op("always", OpMethod::Eq, false, "always_eq");
    u.begin_body();
    let a = u.slot("a");
    let class = u.class_operand("always");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Initend, a.into(), class, Operand::None);
    let eq = u.slot("eq");
    let ne = u.slot("ne");
    u.emit(Opcode::Eq, eq.into(), a.into(), Operand::Int(1));
    u.emit(Opcode::Ne, ne.into(), a.into(), Operand::Int(1));
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(eq), Value::bool_atom(true));
    assert_eq!(vm.read(ne), Value::bool_atom(false));
}

#[test]
fn test_menviron_binds_method() {
    let mut u = UnitBuilder::new("main", 0);
    build_point(&mut u);
    u.begin_body();
    let p = new_point(&mut u, "p", 20, 22);
    let m = u.slot("m");
    let r = u.slot("r");
    let sum = u.slot_operand("point", "sum");
    u.emit(Opcode::Menviron, m.into(), p.into(), sum);
    u.emit(Opcode::Call, r.into(), m.into(), Operand::Int(0));
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(r), Value::Int(42));
}

#[test]
fn test_private_method_is_invisible_outside() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_class("shy", false, &[]);
    u.declare_proc("shy_secret", 0, 0);
    u.begin_proc("shy_secret");
    u.emit(Opcode::Return, Operand::Int(1), Operand::None, Operand::None);
    u.class_method("shy", "secret", "shy_secret", false);
    u.begin_body();
    let s = u.slot("s");
    let class = u.class_operand("shy");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Initend, s.into(), class, Operand::None);
    let r = u.slot("r");
    let secret = u.slot_operand("shy", "secret");
    u.emit(Opcode::Slotcall, r.into(), s.into(), secret);
    u.emit(Opcode::Noop, Operand::Int(0), Operand::None, Operand::None);
    stop(&mut u);
    let mut vm = Vm::new();
    vm.set_sinks(Box::new(SharedOut::default()), Box::new(SharedOut::default()));
    vm.load(Program::single(u.finish()));
    let abend = vm.run("main").expect_err("private call should abend");
    assert_eq!(abend.kind, AbendKind::Class);
}

#[test]
fn test_object_iteration_through_iterator_start() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_class("bag", false, &["items"]);
    // iterator_start hands back the aggregate to iterate
    u.declare_proc("bag_iter", 0, 0);
    u.begin_proc("bag_iter");
    let items = u.class_ivar("bag", "items");
    u.emit(Opcode::Return, items.into(), Operand::None, Operand::None);
    u.class_op("bag", OpMethod::IterStart, false, "bag_iter");
    u.begin_body();
    let b = u.slot("b");
    let class = u.class_operand("bag");
    let bi = u.class_ivar("bag", "items");
    let tuple = u.lit(Value::tuple(sett_runtime::core::Tuple::from_values([
        Value::Int(5),
        Value::Int(6),
    ])));
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Asn, bi.into(), tuple.into(), Operand::None);
    u.emit(Opcode::Initend, b.into(), class, Operand::None);
    let it = u.slot("it");
    let x = u.slot("x");
    let total = u.slot("total");
    u.emit(Opcode::Asn, total.into(), Operand::Int(0), Operand::None);
    u.emit(Opcode::Iter, it.into(), b.into(), Operand::Int(1));
    u.label("loop");
    u.inext(x, it, "done");
    u.emit(Opcode::Add, total.into(), total.into(), x.into());
    u.goto("loop");
    u.label("done");
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(total), Value::Int(11));
}

#[test]
fn test_selfval_inside_method() {
    let mut u = UnitBuilder::new("main", 0);
    u.declare_class("node", false, &["tag"]);
    u.declare_proc("node_me", 0, 1);
    u.begin_proc("node_me");
    let me = u.proc_local("node_me", 0);
    u.emit(Opcode::SelfVal, me.into(), Operand::None, Operand::None);
    u.emit(Opcode::Return, me.into(), Operand::None, Operand::None);
    u.class_method("node", "me", "node_me", true);
    u.begin_body();
    let n = u.slot("n");
    let class = u.class_operand("node");
    let tag = u.class_ivar("node", "tag");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Asn, tag.into(), Operand::Int(1), Operand::None);
    u.emit(Opcode::Initend, n.into(), class, Operand::None);
    let r = u.slot("r");
    let same = u.slot("same");
    let me_slot = u.slot_operand("node", "me");
    u.emit(Opcode::Slotcall, r.into(), n.into(), me_slot);
    u.emit(Opcode::Noop, Operand::Int(0), Operand::None, Operand::None);
    u.emit(Opcode::Eq, same.into(), r.into(), n.into());
    stop(&mut u);
    let vm = run(u);
    assert_eq!(vm.read(same), Value::bool_atom(true));
}
