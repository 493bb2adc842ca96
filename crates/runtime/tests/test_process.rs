//! Cooperative processes: request queues, mailbox delivery, blocking
//! receives, and deadlock detection.

mod common;

use common::SharedOut;
use sett_runtime::core::Mailbox;
use sett_runtime::{
    AbendKind, Opcode, Operand, Program, UnitBuilder, Value, Vm, VmConfig,
};
use std::cell::RefCell;
use std::rc::Rc;

fn stop(u: &mut UnitBuilder) {
    u.emit(Opcode::Stop, Operand::None, Operand::None, Operand::None);
}

/// A process class whose `f` method multiplies its argument by ten.
fn build_worker(u: &mut UnitBuilder) {
    u.declare_class("worker", true, &[]);
    u.declare_proc("worker_f", 1, 1);
    u.begin_proc("worker_f");
    let x = u.proc_local("worker_f", 0);
    let t = u.proc_local("worker_f", 1);
    u.emit(Opcode::Mult, t.into(), x.into(), Operand::Int(10));
    u.emit(Opcode::Return, t.into(), Operand::None, Operand::None);
    u.class_method("worker", "f", "worker_f", true);
}

#[test]
fn test_process_requests_serve_in_fifo_order() {
    let mut u = UnitBuilder::new("main", 0);
    build_worker(&mut u);
    u.begin_body();
    let p = u.slot("p");
    let class = u.class_operand("worker");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Initend, p.into(), class, Operand::None);

    // two calls enqueue and return mailboxes immediately
    let m1 = u.slot("m1");
    let m2 = u.slot("m2");
    let f = u.slot_operand("worker", "f");
    u.emit(Opcode::Push1, Operand::Int(1), Operand::None, Operand::None);
    u.emit(Opcode::Slotcall, m1.into(), p.into(), f);
    u.emit(Opcode::Noop, Operand::Int(1), Operand::None, Operand::None);
    u.emit(Opcode::Push1, Operand::Int(2), Operand::None, Operand::None);
    u.emit(Opcode::Slotcall, m2.into(), p.into(), f);
    u.emit(Opcode::Noop, Operand::Int(1), Operand::None, Operand::None);

    // drain the replies; blocking hands control to the worker
    let r1 = u.slot("r1");
    let r2 = u.slot("r2");
    u.emit(Opcode::From, r1.into(), m1.into(), Operand::None);
    u.emit(Opcode::From, r2.into(), m2.into(), Operand::None);
    stop(&mut u);

    let mut vm = Vm::new();
    vm.load(Program::single(u.finish()));
    vm.run("main").unwrap();
    assert!(matches!(vm.read(m1), Value::Mailbox(_)));
    assert!(matches!(vm.read(m2), Value::Mailbox(_)));
    assert_eq!(vm.read(r1), Value::Int(10));
    assert_eq!(vm.read(r2), Value::Int(20));
}

#[test]
fn test_process_survives_tight_scheduler_slice() {
    let mut u = UnitBuilder::new("main", 0);
    build_worker(&mut u);
    u.begin_body();
    let p = u.slot("p");
    let class = u.class_operand("worker");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Initend, p.into(), class, Operand::None);
    let m = u.slot("m");
    let r = u.slot("r");
    let f = u.slot_operand("worker", "f");
    u.emit(Opcode::Push1, Operand::Int(3), Operand::None, Operand::None);
    u.emit(Opcode::Slotcall, m.into(), p.into(), f);
    u.emit(Opcode::Noop, Operand::Int(1), Operand::None, Operand::None);
    u.emit(Opcode::From, r.into(), m.into(), Operand::None);
    stop(&mut u);

    // a one-opcode slice forces switches at every checkpoint
    let mut config = VmConfig::default();
    config.process_slice = 1;
    let mut vm = Vm::with_config(config);
    vm.load(Program::single(u.finish()));
    vm.run("main").unwrap();
    assert_eq!(vm.read(r), Value::Int(30));
}

#[test]
fn test_receive_builtin_blocks_until_delivery() {
    let mut u = UnitBuilder::new("main", 0);
    build_worker(&mut u);
    u.begin_body();
    let p = u.slot("p");
    let class = u.class_operand("worker");
    u.emit(Opcode::Initobj, class, Operand::None, Operand::None);
    u.emit(Opcode::Initend, p.into(), class, Operand::None);
    let m = u.slot("m");
    let r = u.slot("r");
    let f = u.slot_operand("worker", "f");
    let receive = u.native("receive");
    u.emit(Opcode::Push1, Operand::Int(4), Operand::None, Operand::None);
    u.emit(Opcode::Slotcall, m.into(), p.into(), f);
    u.emit(Opcode::Noop, Operand::Int(1), Operand::None, Operand::None);
    u.emit(Opcode::Push1, m.into(), Operand::None, Operand::None);
    u.emit(Opcode::Lcall, r.into(), receive.into(), Operand::Int(1));
    stop(&mut u);

    let mut vm = Vm::new();
    vm.load(Program::single(u.finish()));
    vm.run("main").unwrap();
    assert_eq!(vm.read(r), Value::Int(40));
}

#[test]
fn test_mailbox_with_and_nonblocking_receive() {
    let mut u = UnitBuilder::new("main", 0);
    u.begin_body();
    let m = u.lit(Value::Mailbox(Rc::new(RefCell::new(Mailbox::new()))));
    let r = u.slot("r");
    let n = u.slot("n");
    let receive = u.native("receive");
    u.emit(Opcode::With, m.into(), m.into(), Operand::Int(5));
    u.emit(Opcode::Nelt, n.into(), m.into(), Operand::None);
    u.emit(Opcode::Push1, m.into(), Operand::None, Operand::None);
    u.emit(Opcode::Lcall, r.into(), receive.into(), Operand::Int(1));
    stop(&mut u);
    let mut vm = Vm::new();
    vm.load(Program::single(u.finish()));
    vm.run("main").unwrap();
    assert_eq!(vm.read(n), Value::Int(1));
    assert_eq!(vm.read(r), Value::Int(5));
}

#[test]
fn test_wait_with_nobody_to_deliver_deadlocks() {
    let mut u = UnitBuilder::new("main", 0);
    u.begin_body();
    let m = u.lit(Value::Mailbox(Rc::new(RefCell::new(Mailbox::new()))));
    let r = u.slot("r");
    u.emit(Opcode::From, r.into(), m.into(), Operand::None);
    stop(&mut u);
    let mut vm = Vm::new();
    vm.set_sinks(Box::new(SharedOut::default()), Box::new(SharedOut::default()));
    vm.load(Program::single(u.finish()));
    let abend = vm.run("main").expect_err("empty mailbox with one process");
    assert_eq!(abend.kind, AbendKind::Scheduler);
}

#[test]
fn test_yield_builtin_is_harmless_alone() {
    let mut u = UnitBuilder::new("main", 0);
    u.begin_body();
    let pass = u.native("pass");
    let r = u.slot("r");
    u.emit(Opcode::Lcall, Operand::None, pass.into(), Operand::Int(0));
    u.emit(Opcode::Asn, r.into(), Operand::Int(1), Operand::None);
    stop(&mut u);
    let mut vm = Vm::new();
    vm.load(Program::single(u.finish()));
    vm.run("main").unwrap();
    assert_eq!(vm.read(r), Value::Int(1));
}
