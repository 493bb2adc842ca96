//! Processes and the cooperative scheduler
//!
//! Processes form a doubly-linked ring rooted at the root process. The
//! dispatch loop decrements an opcode countdown; at zero (and outside
//! any critical section) the scheduler scans the ring for the next
//! runnable process: not suspended, not blocked on an unsatisfied
//! wait/check predicate, and not idle with an empty request queue.
//!
//! A context switch saves the outgoing process's live state: the
//! locals of every procedure on its call stack (once per procedure, a
//! flag guards recursion) and every class's loaded instance. It then
//! swaps stacks and restores the incoming process's saved state. A
//! switched-in idle process with a pending request starts executing it
//! as a freshly entered call whose frame remembers to deliver the
//! return value into the request's reply mailbox.

use crate::abend::{Abend, AbendKind};
use crate::frame::{ExtraCode, Frame};
use crate::instruction::SpecRef;
use crate::interp::Vm;
use sett_core::{ClassRef, CodeRef, Mailbox, Pid, ProcRec, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;

/// Unblock predicate for a waiting/checking process. Produces the value
/// to install in the process's wait target once the condition holds.
pub type WaitCond = Box<dyn FnMut(&mut Vm) -> Option<Value>>;

/// One queued method call on a process object.
pub struct Request {
    pub proc: Rc<ProcRec>,
    pub args: Vec<Value>,
    pub reply: Option<Rc<RefCell<Mailbox>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Root,
    Child,
}

/// Saved per-class state across a context switch.
pub(crate) struct SavedClass {
    pub class: ClassRef,
    pub slots: Vec<Value>,
    pub current: Option<Value>,
    pub stack: Vec<Option<Value>>,
}

pub struct ProcessRec {
    pub pid: Pid,
    pub kind: ProcessKind,
    pub next: Pid,
    pub prev: Pid,
    pub idle: bool,
    pub suspended: bool,
    pub waiting: bool,
    pub checking: bool,
    /// The owning process object (none for root).
    pub object: Option<Value>,
    pub requests: VecDeque<Request>,
    pub pstack: Vec<Value>,
    pub cstack: Vec<Frame>,
    pub pc: CodeRef,
    pub current_class: Option<ClassRef>,
    pub wait_cond: Option<WaitCond>,
    pub wait_dest: Option<SpecRef>,
    /// Value produced by the unblock predicate, delivered after the
    /// switch-in restore.
    pub unblocked: Option<Value>,
    pub(crate) saved_procs: Vec<(Rc<ProcRec>, Vec<Value>)>,
    pub(crate) saved_classes: Vec<SavedClass>,
}

impl ProcessRec {
    pub fn root() -> Self {
        ProcessRec {
            pid: Pid(0),
            kind: ProcessKind::Root,
            next: Pid(0),
            prev: Pid(0),
            idle: false,
            suspended: false,
            waiting: false,
            checking: false,
            object: None,
            requests: VecDeque::new(),
            pstack: Vec::new(),
            cstack: Vec::new(),
            pc: CodeRef { unit: 0, ip: 0 },
            current_class: None,
            wait_cond: None,
            wait_dest: None,
            unblocked: None,
            saved_procs: Vec::new(),
            saved_classes: Vec::new(),
        }
    }

    fn child(pid: Pid, object: Value) -> Self {
        ProcessRec {
            pid,
            kind: ProcessKind::Child,
            next: pid,
            prev: pid,
            idle: true,
            suspended: false,
            waiting: false,
            checking: false,
            object: Some(object),
            requests: VecDeque::new(),
            pstack: Vec::new(),
            cstack: Vec::new(),
            pc: CodeRef { unit: 0, ip: 0 },
            current_class: None,
            wait_cond: None,
            wait_dest: None,
            unblocked: None,
            saved_procs: Vec::new(),
            saved_classes: Vec::new(),
        }
    }
}

fn deadlock() -> Abend {
    Abend::new(AbendKind::Scheduler, "deadlock: no process can run")
}

impl Vm {
    /// Create a process record for a freshly built process object and
    /// link it into the ring after the current process.
    pub(crate) fn spawn_process(&mut self, handle: Value) -> Pid {
        let pid = Pid(self.processes.len() as u32);
        let mut rec = ProcessRec::child(pid, handle);
        let cur = self.current.0 as usize;
        let next = self.processes[cur].next;
        rec.prev = self.current;
        rec.next = next;
        self.processes[next.0 as usize].prev = pid;
        self.processes[cur].next = pid;
        self.processes.push(rec);
        debug!(target: "sett::process", pid = pid.0, "process spawned");
        pid
    }

    fn next_of(&self, pid: Pid) -> Pid {
        self.processes[pid.0 as usize].next
    }

    /// Keep the scheduler away from a process until `resume_process`.
    pub fn suspend_process(&mut self, pid: Pid) {
        if let Some(rec) = self.processes.get_mut(pid.0 as usize) {
            rec.suspended = true;
        }
    }

    pub fn resume_process(&mut self, pid: Pid) {
        if let Some(rec) = self.processes.get_mut(pid.0 as usize) {
            rec.suspended = false;
        }
    }

    /// Can this process run right now? Consults (and possibly
    /// satisfies) the wait/check predicate of a blocked process.
    fn runnable(&mut self, pid: Pid) -> Result<bool, Abend> {
        let i = pid.0 as usize;
        if self.processes[i].suspended {
            return Ok(false);
        }
        if self.processes[i].waiting || self.processes[i].checking {
            let mut cond = self.processes[i].wait_cond.take();
            let produced = cond.as_mut().and_then(|c| c(self));
            match produced {
                Some(v) => {
                    let rec = &mut self.processes[i];
                    rec.waiting = false;
                    rec.checking = false;
                    rec.unblocked = Some(v);
                    return Ok(true);
                }
                None => {
                    self.processes[i].wait_cond = cond;
                    return Ok(false);
                }
            }
        }
        if self.processes[i].idle {
            return Ok(!self.processes[i].requests.is_empty());
        }
        Ok(true)
    }

    /// Pick the next runnable process, round-robin from the current
    /// one, and hand control to it. A deadlock (nothing runnable,
    /// current included) abends.
    pub(crate) fn schedule(&mut self) -> Result<(), Abend> {
        self.countdown = self.config.process_slice;
        let start = self.current;
        let mut pid = self.next_of(start);
        while pid != start {
            if self.runnable(pid)? {
                return self.resume(pid);
            }
            pid = self.next_of(pid);
        }
        if self.runnable(start)? {
            return self.resume(start);
        }
        Err(deadlock())
    }

    /// Give control to `pid`: switch contexts when it is not already
    /// current, deliver any unblock value, and dispatch a pending
    /// request if the process sits idle.
    fn resume(&mut self, pid: Pid) -> Result<(), Abend> {
        if pid != self.current {
            self.context_switch(pid);
        }
        let i = pid.0 as usize;
        if let Some(v) = self.processes[i].unblocked.take() {
            if let Some(dest) = self.processes[i].wait_dest.take() {
                self.set_spec(dest, v);
            }
        }
        if self.processes[i].idle {
            if let Some(req) = self.processes[i].requests.pop_front() {
                self.processes[i].idle = false;
                self.dispatch_request(pid, req)?;
            }
        }
        Ok(())
    }

    fn context_switch(&mut self, to: Pid) {
        debug!(target: "sett::process", from = self.current.0, to = to.0, "context switch");
        self.save_activations();
        let cur = self.current.0 as usize;
        {
            let rec = &mut self.processes[cur];
            std::mem::swap(&mut self.pstack, &mut rec.pstack);
            std::mem::swap(&mut self.cstack, &mut rec.cstack);
            rec.pc = self.pc;
            rec.current_class = self.current_class;
        }
        let t = to.0 as usize;
        {
            let rec = &mut self.processes[t];
            std::mem::swap(&mut self.pstack, &mut rec.pstack);
            std::mem::swap(&mut self.cstack, &mut rec.cstack);
            self.pc = rec.pc;
            self.current_class = rec.current_class;
        }
        self.current = to;
        self.restore_activations();
    }

    /// Move the outgoing process's live state out of the shared static
    /// slots: every call-stack procedure's locals (once per procedure)
    /// and every class's loaded instance and self stack.
    fn save_activations(&mut self) {
        let frames: Vec<Rc<ProcRec>> = self.cstack.iter().map(|f| f.proc.clone()).collect();
        let mut procs = Vec::new();
        for p in &frames {
            if p.switch_saved.get() {
                continue;
            }
            p.switch_saved.set(true);
            let locals: Vec<Value> = (0..p.local_count)
                .map(|i| self.take_spec(SpecRef { unit: p.unit, slot: p.local_base + i }))
                .collect();
            procs.push((p.clone(), locals));
        }
        for (p, _) in &procs {
            p.switch_saved.set(false);
        }

        let mut classes = Vec::new();
        for u in 0..self.units.len() as u32 {
            for ci in 0..self.units.get(u).classes.len() as u32 {
                let cr = ClassRef { unit: u, index: ci };
                let (loaded, slots) = {
                    let d = self.class_desc(cr);
                    let loaded = d.current_self.borrow().is_some()
                        || !d.self_stack.borrow().is_empty();
                    (loaded, d.ivar_slots.clone())
                };
                if !loaded {
                    continue;
                }
                let values: Vec<Value> = slots.iter().map(|r| self.take_spec(*r)).collect();
                let (current, stack) = {
                    let d = self.class_desc(cr);
                    let current = d.current_self.borrow_mut().take();
                    let stack = std::mem::take(&mut *d.self_stack.borrow_mut());
                    (current, stack)
                };
                classes.push(SavedClass { class: cr, slots: values, current, stack });
            }
        }

        let rec = &mut self.processes[self.current.0 as usize];
        rec.saved_procs = procs;
        rec.saved_classes = classes;
    }

    /// Mirror of `save_activations` for the incoming process.
    fn restore_activations(&mut self) {
        let idx = self.current.0 as usize;
        let procs = std::mem::take(&mut self.processes[idx].saved_procs);
        let classes = std::mem::take(&mut self.processes[idx].saved_classes);
        for (p, locals) in procs {
            for (i, v) in locals.into_iter().enumerate() {
                self.set_spec(SpecRef { unit: p.unit, slot: p.local_base + i as u32 }, v);
            }
        }
        for sc in classes {
            let slots = {
                let d = self.class_desc(sc.class);
                *d.current_self.borrow_mut() = sc.current;
                *d.self_stack.borrow_mut() = sc.stack;
                d.ivar_slots.clone()
            };
            for (r, v) in slots.into_iter().zip(sc.slots) {
                self.set_spec(r, v);
            }
        }
    }

    /// Enter a queued request as a fresh call; the frame is tagged so
    /// the return delivers into the reply mailbox and idles the
    /// process.
    fn dispatch_request(&mut self, pid: Pid, req: Request) -> Result<(), Abend> {
        let object = self.processes[pid.0 as usize]
            .object
            .clone()
            .ok_or_else(|| Abend::new(AbendKind::Scheduler, "request on the root process"))?;
        let argc = req.args.len() as u32;
        for v in req.args {
            self.push_val(v)?;
        }
        self.call_value(
            Value::Proc(req.proc),
            argc,
            None,
            false,
            ExtraCode::None,
            Some(object),
            false,
        )?;
        if let Some(frame) = self.cstack.last_mut() {
            frame.process_request = Some((pid, req.reply));
        }
        Ok(())
    }
}
