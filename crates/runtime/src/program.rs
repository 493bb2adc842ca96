//! Program assembly
//!
//! `UnitBuilder` is the loader seam: it assembles one unit with symbolic
//! labels, named specifier slots, procedure declarations, and class
//! descriptors, then resolves everything to the pre-computed indexes the
//! dispatch loop requires. The archive reader an embedder would write
//! targets exactly this surface; the test suites use it directly.

use crate::builtins::Builtins;
use crate::class::{ClassDesc, OpMethod, SlotDesc};
use crate::instruction::{Instruction, Operand, SpecRef};
use crate::opcode::Opcode;
use crate::unit::Unit;
use sett_core::{vars_height, ClassRef, CodeRef, ProcRec, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// A set of assembled units ready to load into a VM.
#[derive(Debug, Default)]
pub struct Program {
    units: Vec<Unit>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn single(unit: Unit) -> Self {
        Program { units: vec![unit] }
    }

    pub fn add(&mut self, unit: Unit) {
        self.units.push(unit);
    }

    pub(crate) fn into_units(self) -> Vec<Unit> {
        self.units
    }
}

struct ProcDef {
    name: String,
    spec: u32,
    formal_count: u32,
    local_count: u32,
    local_base: u32,
    entry: Option<u32>,
    parent: Option<String>,
    var_args: bool,
}

struct MethodDef {
    slot_name: String,
    proc_name: String,
    is_public: bool,
}

struct ClassDef {
    name: String,
    is_process: bool,
    ivars: Vec<String>,
    ivar_slots: Vec<u32>,
    methods: Vec<MethodDef>,
    ops: Vec<(OpMethod, bool, String)>,
}

pub struct UnitBuilder {
    unit_id: u32,
    name: String,
    code: Vec<Instruction>,
    specs: Vec<Value>,
    spec_names: HashMap<String, u32>,
    labels: HashMap<String, u32>,
    fixups: Vec<(usize, u8, String)>,
    body_entry: Option<u32>,
    procs: Vec<ProcDef>,
    proc_names: HashMap<String, usize>,
    classes: Vec<ClassDef>,
    class_names: HashMap<String, usize>,
    err_ext: Vec<(Opcode, String)>,
    builtins: Builtins,
}

impl UnitBuilder {
    pub fn new(name: impl Into<String>, unit_id: u32) -> Self {
        UnitBuilder {
            unit_id,
            name: name.into(),
            code: Vec::new(),
            specs: Vec::new(),
            spec_names: HashMap::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            body_entry: None,
            procs: Vec::new(),
            proc_names: HashMap::new(),
            classes: Vec::new(),
            class_names: HashMap::new(),
            err_ext: Vec::new(),
            builtins: Builtins::standard(),
        }
    }

    fn alloc_spec(&mut self, init: Value) -> u32 {
        self.specs.push(init);
        (self.specs.len() - 1) as u32
    }

    fn spec_ref(&self, slot: u32) -> SpecRef {
        SpecRef { unit: self.unit_id, slot }
    }

    /// Named slot, created omega-valued on first use.
    pub fn slot(&mut self, name: &str) -> SpecRef {
        if let Some(&slot) = self.spec_names.get(name) {
            return self.spec_ref(slot);
        }
        let slot = self.alloc_spec(Value::Om);
        self.spec_names.insert(name.to_string(), slot);
        self.spec_ref(slot)
    }

    /// Fresh literal slot.
    pub fn lit(&mut self, v: Value) -> SpecRef {
        let slot = self.alloc_spec(v);
        self.spec_ref(slot)
    }

    /// Slot holding the named built-in as a procedure value.
    pub fn native(&mut self, name: &str) -> SpecRef {
        let key = format!("builtin:{name}");
        if let Some(&slot) = self.spec_names.get(&key) {
            return self.spec_ref(slot);
        }
        let proc = self
            .builtins
            .proc_value(name)
            .unwrap_or_else(|| panic!("no built-in named {name}"));
        let slot = self.alloc_spec(proc);
        self.spec_names.insert(key, slot);
        self.spec_ref(slot)
    }

    // --- emission --------------------------------------------------------

    pub fn emit(&mut self, op: Opcode, a: Operand, b: Operand, c: Operand) -> usize {
        self.code.push(Instruction::new(op, a, b, c));
        self.code.len() - 1
    }

    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Define a label at the current position.
    pub fn label(&mut self, name: &str) {
        self.labels.insert(name.to_string(), self.here());
    }

    fn label_fixup(&mut self, instr: usize, pos: u8, label: &str) {
        self.fixups.push((instr, pos, label.to_string()));
    }

    pub fn goto(&mut self, label: &str) {
        let i = self.emit(Opcode::Go, Operand::Target(0), Operand::None, Operand::None);
        self.label_fixup(i, 0, label);
    }

    pub fn gotrue(&mut self, label: &str, cond: SpecRef) {
        let i = self.emit(Opcode::Gotrue, Operand::Target(0), Operand::Spec(cond), Operand::None);
        self.label_fixup(i, 0, label);
    }

    pub fn gofalse(&mut self, label: &str, cond: SpecRef) {
        let i = self.emit(Opcode::Gofalse, Operand::Target(0), Operand::Spec(cond), Operand::None);
        self.label_fixup(i, 0, label);
    }

    /// Single-target iterator advance; branches to `exhausted` when the
    /// iterator runs dry.
    pub fn inext(&mut self, target: SpecRef, iter: SpecRef, exhausted: &str) {
        let i = self.emit(
            Opcode::Inext,
            Operand::Spec(target),
            Operand::Spec(iter),
            Operand::Target(0),
        );
        self.label_fixup(i, 2, exhausted);
    }

    /// Pair iterator advance; the second target rides the overflow
    /// instruction.
    pub fn inextp(&mut self, first: SpecRef, second: SpecRef, iter: SpecRef, exhausted: &str) {
        let i = self.emit(
            Opcode::Inextp,
            Operand::Spec(first),
            Operand::Spec(iter),
            Operand::Target(0),
        );
        self.label_fixup(i, 2, exhausted);
        self.emit(Opcode::Noop, Operand::Spec(second), Operand::None, Operand::None);
    }

    // --- procedures ------------------------------------------------------

    /// Declare a procedure: allocates its value slot and the static
    /// local slots (formals lead). The body is emitted between
    /// `begin_proc` and its `Return`.
    pub fn declare_proc(&mut self, name: &str, formal_count: u32, extra_locals: u32) {
        let spec = {
            let r = self.slot(name);
            r.slot
        };
        let local_count = formal_count + extra_locals;
        let local_base = self.specs.len() as u32;
        for _ in 0..local_count {
            self.alloc_spec(Value::Om);
        }
        let def = ProcDef {
            name: name.to_string(),
            spec,
            formal_count,
            local_count,
            local_base,
            entry: None,
            parent: None,
            var_args: false,
        };
        self.proc_names.insert(name.to_string(), self.procs.len());
        self.procs.push(def);
    }

    pub fn set_var_args(&mut self, name: &str) {
        let i = self.proc_names[name];
        self.procs[i].var_args = true;
    }

    /// Chain a nested procedure to its lexical parent (the parent must
    /// be declared first).
    pub fn set_parent(&mut self, child: &str, parent: &str) {
        let i = self.proc_names[child];
        self.procs[i].parent = Some(parent.to_string());
    }

    /// Mark the entry point of a declared procedure's body.
    pub fn begin_proc(&mut self, name: &str) {
        let entry = self.here();
        let i = self.proc_names[name];
        self.procs[i].entry = Some(entry);
    }

    /// Local slot `i` of a declared procedure (formals first).
    pub fn proc_local(&self, name: &str, i: u32) -> SpecRef {
        let def = &self.procs[self.proc_names[name]];
        assert!(i < def.local_count, "local index out of range");
        SpecRef { unit: self.unit_id, slot: def.local_base + i }
    }

    /// The slot holding the procedure value.
    pub fn proc_slot(&self, name: &str) -> SpecRef {
        let def = &self.procs[self.proc_names[name]];
        SpecRef { unit: self.unit_id, slot: def.spec }
    }

    // --- classes ---------------------------------------------------------

    pub fn declare_class(&mut self, name: &str, is_process: bool, ivars: &[&str]) {
        let mut slots = Vec::new();
        for ivar in ivars {
            let r = self.slot(&format!("{name}.{ivar}"));
            slots.push(r.slot);
        }
        let def = ClassDef {
            name: name.to_string(),
            is_process,
            ivars: ivars.iter().map(|s| s.to_string()).collect(),
            ivar_slots: slots,
            methods: Vec::new(),
            ops: Vec::new(),
        };
        self.class_names.insert(name.to_string(), self.classes.len());
        self.classes.push(def);
    }

    /// The static slot the loaded instance's variable lives in.
    pub fn class_ivar(&self, class: &str, ivar: &str) -> SpecRef {
        let def = &self.classes[self.class_names[class]];
        let i = def
            .ivars
            .iter()
            .position(|v| v == ivar)
            .unwrap_or_else(|| panic!("class {class} has no variable {ivar}"));
        SpecRef { unit: self.unit_id, slot: def.ivar_slots[i] }
    }

    pub fn class_method(&mut self, class: &str, slot_name: &str, proc_name: &str, is_public: bool) {
        let i = self.class_names[class];
        self.classes[i].methods.push(MethodDef {
            slot_name: slot_name.to_string(),
            proc_name: proc_name.to_string(),
            is_public,
        });
    }

    /// Register an operator overload; `right` marks the mirror slot
    /// consulted when the object is the right operand.
    pub fn class_op(&mut self, class: &str, op: OpMethod, right: bool, proc_name: &str) {
        let i = self.class_names[class];
        self.classes[i].ops.push((op, right, proc_name.to_string()));
    }

    pub fn class_operand(&self, class: &str) -> Operand {
        let index = self.class_names[class] as u32;
        Operand::Class(ClassRef { unit: self.unit_id, index })
    }

    /// Slot-index operand for `Slotof`/`Sslotof`/`Slotcall`/`Menviron`.
    pub fn slot_operand(&self, class: &str, slot_name: &str) -> Operand {
        let def = &self.classes[self.class_names[class]];
        if let Some(i) = def.ivars.iter().position(|v| v == slot_name) {
            return Operand::Slot(i as u32);
        }
        if let Some(i) = def.methods.iter().position(|m| m.slot_name == slot_name) {
            return Operand::Slot((def.ivars.len() + i) as u32);
        }
        panic!("class {class} has no slot {slot_name}")
    }

    // --- error extensions and entry --------------------------------------

    /// Route abends raised by `op` to a handler procedure.
    pub fn on_error(&mut self, op: Opcode, proc_name: &str) {
        self.err_ext.push((op, proc_name.to_string()));
    }

    /// Mark the start of the unit body.
    pub fn begin_body(&mut self) {
        self.body_entry = Some(self.here());
    }

    // --- assembly --------------------------------------------------------

    pub fn finish(mut self) -> Unit {
        // resolve label fixups
        for (instr, pos, label) in std::mem::take(&mut self.fixups) {
            let target = *self
                .labels
                .get(&label)
                .unwrap_or_else(|| panic!("undefined label {label}"));
            let operand = Operand::Target(target);
            let i = &mut self.code[instr];
            match pos {
                0 => i.a = operand,
                1 => i.b = operand,
                _ => i.c = operand,
            }
        }

        // build procedure records, parents before children
        let mut recs: HashMap<String, Rc<ProcRec>> = HashMap::new();
        for def in &self.procs {
            let entry = def
                .entry
                .unwrap_or_else(|| panic!("procedure {} has no body", def.name));
            let mut rec = ProcRec::code(
                def.name.clone(),
                CodeRef { unit: self.unit_id, ip: entry },
                def.formal_count,
                self.unit_id,
                def.local_base,
                def.local_count,
            );
            rec.var_args = def.var_args;
            if let Some(parent) = &def.parent {
                let p = recs
                    .get(parent)
                    .unwrap_or_else(|| panic!("parent {parent} not declared before {}", def.name));
                rec.parent = Some(p.clone());
            }
            let rc = Rc::new(rec);
            self.specs[def.spec as usize] = Value::Proc(rc.clone());
            recs.insert(def.name.clone(), rc);
        }

        // class descriptors
        let mut classes = Vec::new();
        for (ci, def) in self.classes.iter().enumerate() {
            let cr = ClassRef { unit: self.unit_id, index: ci as u32 };
            let mut desc = ClassDesc::new(def.name.clone(), cr, def.is_process);
            desc.vars_height = vars_height(def.ivars.len().max(1));
            desc.ivar_slots = def
                .ivar_slots
                .iter()
                .map(|&slot| SpecRef { unit: self.unit_id, slot })
                .collect();
            for (i, ivar) in def.ivars.iter().enumerate() {
                desc.slots.push(SlotDesc {
                    name: ivar.clone(),
                    is_method: false,
                    is_public: true,
                    in_class: cr,
                    value: SpecRef { unit: self.unit_id, slot: def.ivar_slots[i] },
                    ivar_index: Some(i as u32),
                });
                desc.slot_names.insert(ivar.clone(), i as u32);
            }
            for m in &def.methods {
                let spec = self.proc_names[&m.proc_name];
                let spec = self.procs[spec].spec;
                let index = desc.slots.len() as u32;
                desc.slots.push(SlotDesc {
                    name: m.slot_name.clone(),
                    is_method: true,
                    is_public: m.is_public,
                    in_class: cr,
                    value: SpecRef { unit: self.unit_id, slot: spec },
                    ivar_index: None,
                });
                desc.slot_names.insert(m.slot_name.clone(), index);
            }
            for (op, right, proc_name) in &def.ops {
                let spec = self.procs[self.proc_names[proc_name]].spec;
                let index = desc.slots.len() as u32;
                let suffix = if *right { "_r" } else { "" };
                desc.slots.push(SlotDesc {
                    name: format!("{}{suffix}", op.slot_name()),
                    is_method: true,
                    is_public: true,
                    in_class: cr,
                    value: SpecRef { unit: self.unit_id, slot: spec },
                    ivar_index: None,
                });
                if *right {
                    desc.right_ops[op.index()] = Some(index);
                } else {
                    desc.left_ops[op.index()] = Some(index);
                }
            }
            classes.push(desc);
        }

        // error extensions
        let mut err_ext = HashMap::new();
        for (op, proc_name) in &self.err_ext {
            let rec = recs
                .get(proc_name)
                .unwrap_or_else(|| panic!("error handler {proc_name} not declared"));
            err_ext.insert(op.err_key(), Value::Proc(rec.clone()));
        }

        let mut unit = Unit::new(self.name);
        unit.code = self.code;
        unit.specs = self.specs;
        unit.classes = classes;
        unit.err_ext = err_ext;
        unit.body_entry = self.body_entry.unwrap_or(0);
        unit
    }
}

impl From<SpecRef> for Operand {
    fn from(r: SpecRef) -> Self {
        Operand::Spec(r)
    }
}
