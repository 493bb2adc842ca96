//! The interpreter
//!
//! One coherent fetch-decode loop over pre-resolved instructions. Each
//! step runs the scheduler countdown, the optional trace/profile hooks,
//! then a dense match on the opcode. Failures travel up as `Abend`
//! values; before one escapes, the executing unit's error-extension map
//! gets a chance to handle it and resume.
//!
//! Call discipline: the caller pushes arguments on the program stack;
//! the call saves the callee's static locals above them, moves the
//! arguments into the formal slots, and pushes a call-stack frame. The
//! return restores locals, discards the argument region, and runs any
//! post-return fixup recorded in the frame. Non-literal calls walk the
//! callee's parent chain swapping dormant closure environments into the
//! static slots (and back on return), inside a critical section so the
//! scheduler cannot preempt a half-swapped environment.

use crate::abend::{domain_error, type_error, Abend, AbendKind};
use crate::builtins::Builtins;
use crate::config::{AssertMode, VmConfig};
use crate::frame::{ExtraCode, Frame};
use crate::instruction::{Instruction, Operand, SpecRef};
use crate::opcode::Opcode;
use crate::process::{ProcessRec, WaitCond};
use crate::program::Program;
use crate::unit::{Unit, UnitTable};
use sett_core::{AtomGen, CodeRef, Mailbox, Pid, ProcBody, ProcRec, Tuple, Value};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use tracing::{debug, error, trace};

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    /// `stop` drained to the initial frame.
    Stopped,
    /// `stopall` escaped from depth.
    StopAll,
    /// A frame flagged C-return popped.
    CReturn,
}

pub struct Vm {
    pub(crate) units: UnitTable,
    pub(crate) pstack: Vec<Value>,
    pub(crate) cstack: Vec<Frame>,
    pub(crate) pc: CodeRef,
    pub(crate) current_class: Option<sett_core::ClassRef>,
    pub(crate) processes: Vec<ProcessRec>,
    pub(crate) current: Pid,
    pub(crate) countdown: u32,
    pub(crate) critical: u32,
    pub(crate) atoms: AtomGen,
    pub(crate) builtins: Builtins,
    pub(crate) config: VmConfig,
    pub(crate) out: Box<dyn Write>,
    pub(crate) err: Box<dyn Write>,
    pub(crate) profile: Vec<u64>,
    /// Set by a blocking built-in; consumed right after its return.
    pub(crate) block_request: Option<(WaitCond, bool)>,
    pub(crate) command_line: Value,
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let countdown = config.process_slice;
        let mut vm = Vm {
            units: UnitTable::new(),
            pstack: Vec::new(),
            cstack: Vec::new(),
            pc: CodeRef { unit: 0, ip: 0 },
            current_class: None,
            processes: Vec::new(),
            current: Pid(0),
            countdown,
            critical: 0,
            atoms: AtomGen::new(),
            builtins: Builtins::standard(),
            config,
            out: Box::new(std::io::stdout()),
            err: Box::new(std::io::stderr()),
            profile: vec![0; Opcode::COUNT],
            block_request: None,
            command_line: Value::tuple(Tuple::new()),
        };
        vm.processes.push(ProcessRec::root());
        vm
    }

    /// Replace the output and diagnostic sinks (tests capture them).
    pub fn set_sinks(&mut self, out: Box<dyn Write>, err: Box<dyn Write>) {
        self.out = out;
        self.err = err;
    }

    /// Install the argument tuple programs read as their command line.
    pub fn set_command_line(&mut self, args: &[String]) {
        let t = Tuple::from_values(args.iter().map(|a| Value::str(a)));
        self.command_line = Value::tuple(t);
    }

    pub fn command_line(&self) -> Value {
        self.command_line.clone()
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Executions per opcode, when profiling is on.
    pub fn profile_counts(&self) -> &[u64] {
        &self.profile
    }

    pub fn install_unit(&mut self, unit: Unit) -> u32 {
        self.units.install(unit)
    }

    /// Install every unit of an assembled program.
    pub fn load(&mut self, program: Program) {
        for unit in program.into_units() {
            self.units.install(unit);
        }
    }

    /// Run the named unit's body to completion.
    pub fn run(&mut self, name: &str) -> Result<(), Abend> {
        let unit_id = self
            .units
            .find(name)
            .ok_or_else(|| Abend::new(AbendKind::Resource, format!("no unit named {name}")))?;
        self.pc = CodeRef { unit: unit_id, ip: self.units.get(unit_id).body_entry };
        match self.execute() {
            Ok(_) => Ok(()),
            Err(abend) => {
                // unwind both stacks and print the one-line diagnostic
                self.cstack.clear();
                self.pstack.clear();
                let line = abend.diagnostic();
                error!(target: "sett::abend", "{line}");
                let _ = writeln!(self.err, "{line}");
                Err(abend)
            }
        }
    }

    pub(crate) fn execute(&mut self) -> Result<Exit, Abend> {
        loop {
            if let Some(exit) = self.step()? {
                return Ok(exit);
            }
        }
    }

    /// Run the loop until the frame pushed just before (with `c_return`)
    /// pops.
    pub(crate) fn run_to_creturn(&mut self) -> Result<(), Abend> {
        loop {
            match self.step()? {
                None => {}
                Some(Exit::CReturn) => return Ok(()),
                Some(Exit::Stopped) | Some(Exit::StopAll) => {
                    return Err(Abend::new(
                        AbendKind::Class,
                        "program stopped inside a handler call",
                    ));
                }
            }
        }
    }

    pub(crate) fn step(&mut self) -> Result<Option<Exit>, Abend> {
        // scheduler checkpoint
        if self.countdown == 0 {
            self.countdown = self.config.process_slice;
            if self.critical == 0 && self.processes.len() > 1 {
                self.schedule()?;
            }
        } else {
            self.countdown -= 1;
        }

        let instr = self.fetch()?;
        if self.config.step_trace {
            trace!(target: "sett::step", unit = self.pc.unit, ip = self.pc.ip - 1, op = ?instr.op);
        }
        if self.config.profile {
            self.profile[instr.op.index()] += 1;
        }

        match self.dispatch(instr) {
            Ok(exit) => Ok(exit),
            Err(abend) => self.fail(instr, abend),
        }
    }

    fn fetch(&mut self) -> Result<Instruction, Abend> {
        let unit = self.units.get(self.pc.unit);
        let instr = *unit.code.get(self.pc.ip as usize).ok_or_else(|| {
            Abend::new(AbendKind::Resource, "execution ran off the end of the unit")
        })?;
        self.pc.ip += 1;
        Ok(instr)
    }

    /// Consume the trailing `Noop` that carries operand overflow.
    pub(crate) fn fetch_extra(&mut self) -> Result<Instruction, Abend> {
        let instr = self.fetch()?;
        if instr.op != Opcode::Noop {
            return Err(Abend::new(
                AbendKind::Resource,
                "missing operand-overflow instruction",
            ));
        }
        Ok(instr)
    }

    // --- error extension -------------------------------------------------

    /// Route a failing instruction through the unit's error-extension
    /// map, or let the abend escape.
    fn fail(&mut self, instr: Instruction, abend: Abend) -> Result<Option<Exit>, Abend> {
        let handler = self
            .units
            .get(self.pc.unit)
            .err_ext
            .get(&instr.op.err_key())
            .cloned();
        let Some(handler) = handler else {
            return Err(abend);
        };
        debug!(target: "sett::abend", op = ?instr.op, "dispatching error extension");
        // handler(left, right, end)
        let args = [instr.a, instr.b, instr.c].map(|o| self.operand_val(o));
        for v in args {
            self.push_val(v)?;
        }
        match self.call_value(handler, 3, None, false, ExtraCode::None, None, true) {
            Ok(()) => {
                self.run_to_creturn()?;
                Ok(None)
            }
            // the handler call itself failed: the original abend escapes
            Err(_) => Err(abend),
        }
    }

    // --- specifier access ------------------------------------------------

    pub(crate) fn spec(&self, r: SpecRef) -> &Value {
        &self.units.get(r.unit).specs[r.slot as usize]
    }

    pub(crate) fn spec_val(&self, r: SpecRef) -> Value {
        self.spec(r).clone()
    }

    pub(crate) fn set_spec(&mut self, r: SpecRef, v: Value) {
        self.units.get_mut(r.unit).specs[r.slot as usize] = v;
    }

    pub(crate) fn take_spec(&mut self, r: SpecRef) -> Value {
        std::mem::replace(&mut self.units.get_mut(r.unit).specs[r.slot as usize], Value::Om)
    }

    pub(crate) fn operand_spec(&self, o: Operand) -> Result<SpecRef, Abend> {
        match o {
            Operand::Spec(r) => Ok(r),
            other => Err(Abend::new(
                AbendKind::Resource,
                format!("expected a specifier operand, found {other:?}"),
            )),
        }
    }

    /// Value of an operand: specifiers load, integer literals wrap,
    /// anything else reads as omega.
    pub(crate) fn operand_val(&self, o: Operand) -> Value {
        match o {
            Operand::Spec(r) => self.spec_val(r),
            Operand::Int(i) => Value::Int(i),
            _ => Value::Om,
        }
    }

    pub(crate) fn operand_target(&self, o: Operand) -> Result<u32, Abend> {
        match o {
            Operand::Target(t) => Ok(t),
            other => Err(Abend::new(
                AbendKind::Resource,
                format!("expected a branch operand, found {other:?}"),
            )),
        }
    }

    pub(crate) fn operand_int(&self, o: Operand) -> Result<i64, Abend> {
        match o {
            Operand::Int(i) => Ok(i),
            other => Err(Abend::new(
                AbendKind::Resource,
                format!("expected a literal operand, found {other:?}"),
            )),
        }
    }

    // --- program stack ---------------------------------------------------

    pub(crate) fn push_val(&mut self, v: Value) -> Result<(), Abend> {
        if self.pstack.len() >= self.config.max_pstack {
            return Err(Abend::new(AbendKind::Resource, "program stack exhausted"));
        }
        self.pstack.push(v);
        Ok(())
    }

    pub(crate) fn pop_val(&mut self) -> Result<Value, Abend> {
        self.pstack
            .pop()
            .ok_or_else(|| Abend::new(AbendKind::Resource, "program stack underflow"))
    }

    // --- dispatch --------------------------------------------------------

    fn dispatch(&mut self, instr: Instruction) -> Result<Option<Exit>, Abend> {
        let Instruction { op, a, b, c } = instr;
        match op {
            Opcode::Noop => Ok(None),

            // data movement
            Opcode::Push1 => {
                let v = self.operand_val(a);
                self.push_val(v)?;
                Ok(None)
            }
            Opcode::Push2 => {
                let (x, y) = (self.operand_val(a), self.operand_val(b));
                self.push_val(x)?;
                self.push_val(y)?;
                Ok(None)
            }
            Opcode::Push3 => {
                let (x, y, z) = (self.operand_val(a), self.operand_val(b), self.operand_val(c));
                self.push_val(x)?;
                self.push_val(y)?;
                self.push_val(z)?;
                Ok(None)
            }
            Opcode::Pop1 => {
                let v = self.pop_val()?;
                self.set_spec(self.operand_spec(a)?, v);
                Ok(None)
            }
            Opcode::Pop2 => {
                let y = self.pop_val()?;
                let x = self.pop_val()?;
                self.set_spec(self.operand_spec(b)?, y);
                self.set_spec(self.operand_spec(a)?, x);
                Ok(None)
            }
            Opcode::Pop3 => {
                let z = self.pop_val()?;
                let y = self.pop_val()?;
                let x = self.pop_val()?;
                self.set_spec(self.operand_spec(c)?, z);
                self.set_spec(self.operand_spec(b)?, y);
                self.set_spec(self.operand_spec(a)?, x);
                Ok(None)
            }
            Opcode::Asn => {
                let v = self.operand_val(b);
                self.set_spec(self.operand_spec(a)?, v);
                Ok(None)
            }

            // operators
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mult
            | Opcode::Div
            | Opcode::Exp
            | Opcode::Mod
            | Opcode::Min
            | Opcode::Max
            | Opcode::With
            | Opcode::Less
            | Opcode::Lessf
            | Opcode::Npow => {
                self.op_binary(op, a, b, c)?;
                Ok(None)
            }
            Opcode::Uminus
            | Opcode::Not
            | Opcode::Domain
            | Opcode::Range
            | Opcode::Pow
            | Opcode::Arb
            | Opcode::Nelt => {
                self.op_unary(op, a, b)?;
                Ok(None)
            }
            Opcode::From | Opcode::Fromb | Opcode::Frome => {
                self.op_from(op, a, b)?;
                Ok(None)
            }

            // conditions
            Opcode::Eq
            | Opcode::Ne
            | Opcode::Lt
            | Opcode::Le
            | Opcode::In
            | Opcode::Notin
            | Opcode::Incs => {
                self.op_condition(op, a, b, c)?;
                Ok(None)
            }

            // control flow
            Opcode::Go => {
                self.pc.ip = self.operand_target(a)?;
                Ok(None)
            }
            Opcode::Gotrue => {
                let cond = self.operand_val(b);
                match cond.as_bool() {
                    Some(true) => self.pc.ip = self.operand_target(a)?,
                    Some(false) => {}
                    None => {
                        return Err(type_error("condition is not true or false")
                            .with_operand(&cond))
                    }
                }
                Ok(None)
            }
            Opcode::Gofalse => {
                let cond = self.operand_val(b);
                match cond.as_bool() {
                    Some(false) => self.pc.ip = self.operand_target(a)?,
                    Some(true) => {}
                    None => {
                        return Err(type_error("condition is not true or false")
                            .with_operand(&cond))
                    }
                }
                Ok(None)
            }
            Opcode::Assert => {
                if self.config.assert_mode == AssertMode::Off {
                    return Ok(None);
                }
                let cond = self.operand_val(a);
                if cond.as_bool() == Some(true) {
                    return Ok(None);
                }
                let line = self.operand_int(b).unwrap_or(0);
                match self.config.assert_mode {
                    AssertMode::Fail => {
                        Err(domain_error(format!("assertion failed at line {line}")))
                    }
                    _ => {
                        tracing::warn!(target: "sett::assert", line, "assertion failed");
                        Ok(None)
                    }
                }
            }
            Opcode::Stop => Ok(Some(Exit::Stopped)),
            Opcode::Stopall => Ok(Some(Exit::StopAll)),

            // extraction
            Opcode::Of => self.op_of(a, b, c),
            Opcode::Ofa => {
                self.op_ofa(a, b, c)?;
                Ok(None)
            }
            Opcode::Kof => {
                self.op_kof(a, b, c)?;
                Ok(None)
            }
            Opcode::Slice => self.op_slice(a, b, c),
            Opcode::End => self.op_end(a, b, c),

            // sinister assignment
            Opcode::Sof | Opcode::Erase => self.op_sof(op, a, b, c),
            Opcode::Sofa => self.op_sofa(a, b, c),
            Opcode::Sslice => self.op_sslice(a, b, c),
            Opcode::Send => self.op_send(a, b, c),

            // iteration
            Opcode::Iter => self.op_iter(a, b, c),
            Opcode::Inext => {
                self.op_inext(a, b, c, None)?;
                Ok(None)
            }
            Opcode::Inextp => {
                let extra = self.fetch_extra()?;
                let second = self.operand_spec(extra.a)?;
                self.op_inext(a, b, c, Some(second))?;
                Ok(None)
            }

            // objects
            Opcode::Initobj => {
                self.op_initobj(a)?;
                Ok(None)
            }
            Opcode::Initend => self.op_initend(a, b),
            Opcode::SelfVal => {
                self.op_selfval(a)?;
                Ok(None)
            }
            Opcode::Slotof => {
                self.op_slotof(a, b, c)?;
                Ok(None)
            }
            Opcode::Sslotof => {
                self.op_sslotof(a, b, c)?;
                Ok(None)
            }
            Opcode::Slotcall => self.op_slotcall(a, b, c),
            Opcode::Menviron => {
                self.op_menviron(a, b, c)?;
                Ok(None)
            }

            // calls
            Opcode::Lcall => {
                let callee = self.operand_val(b);
                let argc = self.operand_int(c)? as u32;
                let result = self.operand_spec(a).ok();
                self.call_value(callee, argc, result, true, ExtraCode::None, None, false)?;
                Ok(None)
            }
            Opcode::Call => {
                let callee = self.operand_val(b);
                let argc = self.operand_int(c)? as u32;
                let result = self.operand_spec(a).ok();
                self.call_value(callee, argc, result, false, ExtraCode::None, None, false)?;
                Ok(None)
            }
            Opcode::Return => {
                let v = self.operand_val(a);
                self.do_return(v)
            }
            Opcode::Penviron => {
                self.op_penviron(a, b)?;
                Ok(None)
            }

            // I/O wrappers
            Opcode::Print => {
                let v = self.operand_val(a);
                write!(self.out, "{v}")
                    .map_err(|e| Abend::new(AbendKind::Resource, e.to_string()))?;
                Ok(None)
            }
            Opcode::Newline => {
                writeln!(self.out)
                    .map_err(|e| Abend::new(AbendKind::Resource, e.to_string()))?;
                Ok(None)
            }
        }
    }

    // --- calls -----------------------------------------------------------

    /// The uniform call path for every flavor: literal, computed, method,
    /// error-extension.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        argc: u32,
        result: Option<SpecRef>,
        literal: bool,
        extra: ExtraCode,
        explicit_self: Option<Value>,
        c_return: bool,
    ) -> Result<(), Abend> {
        let proc = match callee {
            Value::Proc(p) => p,
            other => {
                return Err(type_error("call of a non-procedure").with_operand(&other))
            }
        };

        // built-ins never get frames
        if let ProcBody::Native(index) = proc.body {
            return self.call_native(&proc, index, argc, result);
        }

        // a call into another process's object enqueues instead of
        // branching; a process calling its own methods branches directly
        let bound = explicit_self.or_else(|| proc.bound_self.borrow().clone());
        if let Some(Value::Process(obj)) = &bound {
            if let Some(pid) = obj.process_id() {
                if pid != self.current {
                    return self.enqueue_request(pid, proc.clone(), argc, result);
                }
            }
        }

        self.check_arg_count(&proc, argc)?;
        if self.cstack.len() >= self.config.max_cstack {
            return Err(Abend::new(AbendKind::Resource, "call stack exhausted"));
        }

        let entry = match proc.body {
            ProcBody::Code(entry) => entry,
            ProcBody::Native(_) => unreachable!("native handled above"),
        };

        // save the callee's static locals above the argument region
        let arg_base = self
            .pstack
            .len()
            .checked_sub(argc as usize)
            .ok_or_else(|| Abend::new(AbendKind::Resource, "program stack underflow"))?;
        for i in 0..proc.local_count {
            let r = SpecRef { unit: proc.unit, slot: proc.local_base + i };
            let v = self.take_spec(r);
            self.push_val(v)?;
        }

        // move arguments into the formal slots
        self.bind_args(&proc, argc, arg_base)?;

        let mut frame = Frame {
            return_pc: self.pc,
            proc: proc.clone(),
            result,
            arg_count: argc,
            prev_class: self.current_class,
            pushed_self: None,
            c_return,
            literal,
            extra,
            process_request: None,
        };

        // closure environment walk: restore each newly-activated parent.
        // A restored environment sits in slots no process switch knows to
        // save, so each one holds a critical-section count until return.
        if !literal {
            let mut p = proc.parent.clone();
            while let Some(q) = p {
                let uses = q.active_use.get();
                q.active_use.set(uses + 1);
                if uses == 0 {
                    self.swap_env(&q);
                    self.critical += 1;
                }
                p = q.parent.clone();
            }
        }
        proc.active_use.set(proc.active_use.get() + 1);

        // self handling
        if let Some(obj_val) = bound {
            let class_ref = self.class_of_value(&obj_val)?;
            frame.pushed_self = self.load_self(class_ref, obj_val)?;
            self.current_class = Some(class_ref);
        }

        self.cstack.push(frame);
        self.pc = entry;
        Ok(())
    }

    fn check_arg_count(&self, proc: &ProcRec, argc: u32) -> Result<(), Abend> {
        let ok = if proc.var_args {
            argc + 1 >= proc.formal_count
        } else {
            argc == proc.formal_count
        };
        if ok {
            Ok(())
        } else {
            Err(type_error(format!(
                "{} takes {} argument(s), got {argc}",
                proc.name, proc.formal_count
            )))
        }
    }

    fn bind_args(&mut self, proc: &Rc<ProcRec>, argc: u32, arg_base: usize) -> Result<(), Abend> {
        let formals = proc.formal_count;
        if proc.var_args {
            let fixed = formals.saturating_sub(1);
            for j in 0..fixed {
                let v = std::mem::replace(&mut self.pstack[arg_base + j as usize], Value::Om);
                self.set_spec(SpecRef { unit: proc.unit, slot: proc.local_base + j }, v);
            }
            let mut rest = Tuple::new();
            for (k, j) in (fixed..argc).enumerate() {
                let v = std::mem::replace(&mut self.pstack[arg_base + j as usize], Value::Om);
                rest.set(k, v);
            }
            self.set_spec(
                SpecRef { unit: proc.unit, slot: proc.local_base + fixed },
                Value::tuple(rest),
            );
        } else {
            for j in 0..formals {
                let v = std::mem::replace(&mut self.pstack[arg_base + j as usize], Value::Om);
                self.set_spec(SpecRef { unit: proc.unit, slot: proc.local_base + j }, v);
            }
        }
        Ok(())
    }

    fn call_native(
        &mut self,
        proc: &Rc<ProcRec>,
        index: u32,
        argc: u32,
        result: Option<SpecRef>,
    ) -> Result<(), Abend> {
        self.check_arg_count(proc, argc)?;
        let base = self
            .pstack
            .len()
            .checked_sub(argc as usize)
            .ok_or_else(|| Abend::new(AbendKind::Resource, "program stack underflow"))?;
        let mut args: Vec<Value> = self.pstack.drain(base..).collect();
        let func = self.builtins.func(index)?;
        let ret = func(self, &mut args)?;
        // a blocking built-in parked the process instead of answering
        if let Some((cond, checking)) = self.block_request.take() {
            self.block_current(cond, checking, result);
            self.schedule()?;
            return Ok(());
        }
        if let Some(r) = result {
            self.set_spec(r, ret);
        }
        Ok(())
    }

    /// Swap a procedure's static local slots with its dormant snapshot.
    pub(crate) fn swap_env(&mut self, proc: &Rc<ProcRec>) {
        let mut saved = proc.saved.borrow_mut();
        for i in 0..proc.local_count as usize {
            let r = SpecRef { unit: proc.unit, slot: proc.local_base + i as u32 };
            let slot = &mut self.units.get_mut(r.unit).specs[r.slot as usize];
            std::mem::swap(slot, &mut saved[i]);
        }
    }

    // --- return ----------------------------------------------------------

    pub(crate) fn do_return(&mut self, retval: Value) -> Result<Option<Exit>, Abend> {
        let Some(frame) = self.cstack.pop() else {
            // returning from the unit body is a stop
            return Ok(Some(Exit::Stopped));
        };
        let proc = frame.proc.clone();

        // restore the callee's locals from the program stack
        for i in (0..proc.local_count).rev() {
            let v = self.pop_val()?;
            self.set_spec(SpecRef { unit: proc.unit, slot: proc.local_base + i }, v);
        }
        // discard the actual-parameter region
        for _ in 0..frame.arg_count {
            self.pop_val()?;
        }

        // self writeback and restore
        if let Some(class_ref) = frame.pushed_self {
            self.unload_self(class_ref)?;
        }
        self.current_class = frame.prev_class;

        // closure walk back: save each deactivated parent's environment
        proc.active_use.set(proc.active_use.get().saturating_sub(1));
        if !frame.literal {
            let mut p = proc.parent.clone();
            while let Some(q) = p {
                let uses = q.active_use.get();
                q.active_use.set(uses.saturating_sub(1));
                if uses == 1 {
                    self.swap_env(&q);
                    self.critical = self.critical.saturating_sub(1);
                }
                p = q.parent.clone();
            }
        }

        self.pc = frame.return_pc;

        // a request-dispatched frame delivers into its reply mailbox
        if let Some((pid, reply)) = frame.process_request {
            if let Some(mb) = reply {
                mb.borrow_mut().push(retval);
            }
            self.processes[pid.0 as usize].idle = true;
            self.schedule()?;
            return Ok(None);
        }

        // post-return fixups
        match frame.extra {
            ExtraCode::None => {
                if let Some(r) = frame.result {
                    self.set_spec(r, retval);
                }
            }
            ExtraCode::CmpResult { negate } => {
                let b = retval
                    .as_bool()
                    .ok_or_else(|| type_error("comparison method did not return true or false"))?;
                if let Some(r) = frame.result {
                    self.set_spec(r, Value::bool_atom(b != negate));
                }
            }
            ExtraCode::CmpBranch { target } => {
                let b = retval
                    .as_bool()
                    .ok_or_else(|| type_error("comparison method did not return true or false"))?;
                if b {
                    self.pc.ip = target;
                }
            }
            ExtraCode::StartIter { mode } => {
                let iter = self.iter_from_mode(mode, retval)?;
                if let Some(r) = frame.result {
                    self.set_spec(r, iter);
                }
            }
        }

        if frame.c_return {
            return Ok(Some(Exit::CReturn));
        }
        Ok(None)
    }

    // --- process plumbing used by built-ins ------------------------------

    /// Park the current process on a wait/check condition. The unblock
    /// value will land in `dest` when the predicate produces one.
    pub(crate) fn block_current(
        &mut self,
        cond: WaitCond,
        checking: bool,
        dest: Option<SpecRef>,
    ) {
        let rec = &mut self.processes[self.current.0 as usize];
        if checking {
            rec.checking = true;
        } else {
            rec.waiting = true;
        }
        rec.wait_cond = Some(cond);
        rec.wait_dest = dest;
    }

    /// Called by blocking built-ins: the scheduler runs right after the
    /// built-in returns.
    pub fn request_block(&mut self, cond: WaitCond, checking: bool) {
        self.block_request = Some((cond, checking));
    }

    /// Called by the yield built-in: the next step hits a checkpoint.
    pub fn request_yield(&mut self) {
        self.countdown = 0;
    }

    pub(crate) fn fresh_atom(&mut self) -> Value {
        self.atoms.fresh()
    }

    pub fn current_pid(&self) -> Pid {
        self.current
    }

    /// Read a specifier slot (embedders and tests inspect results this
    /// way).
    pub fn read(&self, r: SpecRef) -> Value {
        self.spec_val(r)
    }

    /// Enqueue a method call on a process object; the caller immediately
    /// receives a mailbox when it wants the return value.
    pub(crate) fn enqueue_request(
        &mut self,
        pid: Pid,
        proc: Rc<ProcRec>,
        argc: u32,
        result: Option<SpecRef>,
    ) -> Result<(), Abend> {
        let base = self
            .pstack
            .len()
            .checked_sub(argc as usize)
            .ok_or_else(|| Abend::new(AbendKind::Resource, "program stack underflow"))?;
        let args: Vec<Value> = self.pstack.drain(base..).collect();
        let reply = result.map(|_| Rc::new(RefCell::new(Mailbox::new())));
        self.processes[pid.0 as usize].requests.push_back(crate::process::Request {
            proc,
            args,
            reply: reply.clone(),
        });
        if let (Some(r), Some(mb)) = (result, reply) {
            self.set_spec(r, Value::Mailbox(mb));
        }
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("units", &self.units.len())
            .field("pc", &self.pc)
            .field("processes", &self.processes.len())
            .field("current", &self.current)
            .finish()
    }
}
