//! Objects, classes, and method dispatch
//!
//! The class keeps one loaded instance: its variable values live in the
//! class's static specifier slots while methods run, and the instance
//! trie is written back when the instance is unloaded. Nested method
//! calls on a different instance push the loaded one onto the class's
//! self stack. Operator overloads resolve through the class's per-
//! operator slot table, left side first, then the right operand's
//! mirror.

use crate::abend::{class_error, type_error, Abend};
use crate::class::{ClassDesc, OpMethod, SlotDesc};
use crate::frame::ExtraCode;
use crate::instruction::{Operand, SpecRef};
use crate::interp::{Exit, Vm};
use sett_core::{ClassRef, Object, ProcRec, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Identity comparison for instance handles; structural equality is too
/// weak to decide whether the same instance is already loaded.
fn same_instance(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Process(x), Value::Process(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Process(y)) | (Value::Process(x), Value::Object(y)) => {
            Rc::ptr_eq(x, y)
        }
        _ => false,
    }
}

fn object_rc(v: &Value) -> Result<&Rc<Object>, Abend> {
    match v {
        Value::Object(o) | Value::Process(o) => Ok(o),
        other => Err(type_error("expected an object").with_operand(other)),
    }
}

impl Vm {
    pub(crate) fn class_desc(&self, cr: ClassRef) -> &ClassDesc {
        &self.units.get(cr.unit).classes[cr.index as usize]
    }

    pub(crate) fn class_of_value(&self, v: &Value) -> Result<ClassRef, Abend> {
        Ok(object_rc(v)?.class())
    }

    pub(crate) fn operand_class(&self, o: Operand) -> Result<ClassRef, Abend> {
        match o {
            Operand::Class(cr) => Ok(cr),
            other => Err(Abend::new(
                crate::abend::AbendKind::Resource,
                format!("expected a class operand, found {other:?}"),
            )),
        }
    }

    // --- instance load/unload --------------------------------------------

    /// Make `obj_val` the class's loaded instance, pushing whatever was
    /// loaded. Returns the class to pop at return, or `None` when the
    /// instance was already loaded.
    pub(crate) fn load_self(
        &mut self,
        cr: ClassRef,
        obj_val: Value,
    ) -> Result<Option<ClassRef>, Abend> {
        let slots = {
            let desc = self.class_desc(cr);
            let already = desc
                .current_self
                .borrow()
                .as_ref()
                .is_some_and(|cur| same_instance(cur, &obj_val));
            if already {
                return Ok(None);
            }
            let prev = desc.current_self.borrow_mut().take();
            desc.self_stack.borrow_mut().push(prev);
            *desc.current_self.borrow_mut() = Some(obj_val.clone());
            desc.ivar_slots.clone()
        };
        let obj = object_rc(&obj_val)?.clone();
        for (i, r) in slots.iter().enumerate() {
            let v = obj.get(i as u32);
            self.set_spec(*r, v);
        }
        Ok(Some(cr))
    }

    /// Write the loaded instance's slots back into its trie, then pop
    /// and reload the displaced instance.
    pub(crate) fn unload_self(&mut self, cr: ClassRef) -> Result<(), Abend> {
        let (slots, cur, prev) = {
            let desc = self.class_desc(cr);
            let cur = desc.current_self.borrow_mut().take();
            let prev = desc.self_stack.borrow_mut().pop().flatten();
            *desc.current_self.borrow_mut() = prev.clone();
            (desc.ivar_slots.clone(), cur, prev)
        };
        if let Some(cur) = cur {
            let obj = object_rc(&cur)?.clone();
            for (i, r) in slots.iter().enumerate() {
                let v = self.spec_val(*r);
                obj.set(i as u32, v);
            }
        }
        match prev {
            Some(p) => {
                let obj = object_rc(&p)?.clone();
                for (i, r) in slots.iter().enumerate() {
                    let v = obj.get(i as u32);
                    self.set_spec(*r, v);
                }
            }
            None => {
                for r in slots {
                    self.set_spec(r, Value::Om);
                }
            }
        }
        Ok(())
    }

    // --- object creation -------------------------------------------------

    pub(crate) fn op_initobj(&mut self, a: Operand) -> Result<(), Abend> {
        let cr = self.operand_class(a)?;
        let slots = {
            let desc = self.class_desc(cr);
            let prev = desc.current_self.borrow_mut().take();
            desc.self_stack.borrow_mut().push(prev);
            let fresh = Value::Object(Rc::new(Object::new(cr, desc.vars_height)));
            *desc.current_self.borrow_mut() = Some(fresh);
            desc.ivar_slots.clone()
        };
        for r in slots {
            self.set_spec(r, Value::Om);
        }
        Ok(())
    }

    pub(crate) fn op_initend(&mut self, a: Operand, b: Operand) -> Result<Option<Exit>, Abend> {
        let result = self.operand_spec(a)?;
        let cr = self.operand_class(b)?;
        let (slots, built, is_process) = {
            let desc = self.class_desc(cr);
            let built = desc.current_self.borrow_mut().take();
            (desc.ivar_slots.clone(), built, desc.is_process)
        };
        let built = built.ok_or_else(|| class_error("initend without initobj"))?;
        let obj = object_rc(&built)?.clone();
        // snapshot the constructed values into the instance trie
        for (i, r) in slots.iter().enumerate() {
            let v = self.spec_val(*r);
            obj.set(i as u32, v);
        }
        // restore the displaced instance
        let prev = {
            let desc = self.class_desc(cr);
            let prev = desc.self_stack.borrow_mut().pop().flatten();
            *desc.current_self.borrow_mut() = prev.clone();
            prev
        };
        match prev {
            Some(p) => {
                let pobj = object_rc(&p)?.clone();
                for (i, r) in slots.iter().enumerate() {
                    self.set_spec(*r, pobj.get(i as u32));
                }
            }
            None => {
                for r in &slots {
                    self.set_spec(*r, Value::Om);
                }
            }
        }
        let value = if is_process {
            let handle = Value::Process(obj.clone());
            let pid = self.spawn_process(handle.clone());
            obj.attach_process(pid);
            handle
        } else {
            built
        };
        self.set_spec(result, value);
        Ok(None)
    }

    pub(crate) fn op_selfval(&mut self, a: Operand) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let cr = self
            .current_class
            .ok_or_else(|| class_error("self outside a method"))?;
        let cur = self
            .class_desc(cr)
            .current_self
            .borrow()
            .clone()
            .ok_or_else(|| class_error("class has no loaded instance"))?;
        self.set_spec(result, cur);
        Ok(())
    }

    // --- slot access -----------------------------------------------------

    fn resolve_slot(&self, cr: ClassRef, o: Operand) -> Result<(u32, SlotDesc), Abend> {
        let idx = match o {
            Operand::Slot(i) => i,
            other => {
                return Err(Abend::new(
                    crate::abend::AbendKind::Resource,
                    format!("expected a slot operand, found {other:?}"),
                ))
            }
        };
        let desc = self.class_desc(cr);
        let slot = desc
            .slot(idx)
            .ok_or_else(|| class_error(format!("class {} has no slot {idx}", desc.name)))?;
        Ok((idx, slot.clone()))
    }

    fn check_visible(&self, slot: &SlotDesc) -> Result<(), Abend> {
        if slot.is_public || self.current_class == Some(slot.in_class) {
            Ok(())
        } else {
            Err(class_error(format!("slot {} is not visible here", slot.name)))
        }
    }

    pub(crate) fn op_slotof(&mut self, a: Operand, b: Operand, c: Operand) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let obj_val = self.operand_val(b);
        let cr = self.class_of_value(&obj_val)?;
        let (_, slot) = self.resolve_slot(cr, c)?;
        self.check_visible(&slot)?;
        if slot.is_method {
            return Err(class_error(format!("method {} read as a value", slot.name)));
        }
        let index = slot
            .ivar_index
            .ok_or_else(|| class_error("slot is neither method nor variable"))?;
        let loaded = self
            .class_desc(cr)
            .current_self
            .borrow()
            .as_ref()
            .is_some_and(|cur| same_instance(cur, &obj_val));
        let v = if loaded {
            // the live values sit in the class slots, not the trie
            self.spec_val(slot.value)
        } else {
            object_rc(&obj_val)?.get(index)
        };
        self.set_spec(result, v);
        Ok(())
    }

    pub(crate) fn op_sslotof(&mut self, a: Operand, b: Operand, c: Operand) -> Result<(), Abend> {
        let obj_val = self.operand_val(a);
        let value = self.operand_val(c);
        let cr = self.class_of_value(&obj_val)?;
        let (_, slot) = self.resolve_slot(cr, b)?;
        self.check_visible(&slot)?;
        if slot.is_method {
            return Err(class_error(format!("assignment to method {}", slot.name)));
        }
        let index = slot
            .ivar_index
            .ok_or_else(|| class_error("slot is neither method nor variable"))?;
        let loaded = self
            .class_desc(cr)
            .current_self
            .borrow()
            .as_ref()
            .is_some_and(|cur| same_instance(cur, &obj_val));
        if loaded {
            self.set_spec(slot.value, value);
        } else {
            object_rc(&obj_val)?.set(index, value);
        }
        Ok(())
    }

    pub(crate) fn op_slotcall(
        &mut self,
        a: Operand,
        b: Operand,
        c: Operand,
    ) -> Result<Option<Exit>, Abend> {
        let extra = self.fetch_extra()?;
        let argc = self.operand_int(extra.a)? as u32;
        let result = self.operand_spec(a).ok();
        let obj_val = self.operand_val(b);
        let cr = self.class_of_value(&obj_val)?;
        let (_, slot) = self.resolve_slot(cr, c)?;
        self.check_visible(&slot)?;
        if !slot.is_method {
            return Err(class_error(format!("call of non-method slot {}", slot.name)));
        }
        let proc_val = self.spec_val(slot.value);
        self.call_value(proc_val, argc, result, false, ExtraCode::None, Some(obj_val), false)?;
        Ok(None)
    }

    /// Take a bound method out of its class as a first-class value.
    pub(crate) fn op_menviron(&mut self, a: Operand, b: Operand, c: Operand) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let obj_val = self.operand_val(b);
        let cr = self.class_of_value(&obj_val)?;
        let (_, slot) = self.resolve_slot(cr, c)?;
        self.check_visible(&slot)?;
        if !slot.is_method {
            return Err(class_error(format!("menviron of non-method slot {}", slot.name)));
        }
        let proc_val = self.spec_val(slot.value);
        let Value::Proc(proc) = &proc_val else {
            return Err(class_error("method slot does not hold a procedure"));
        };
        let cloned = self.clone_env(proc);
        *cloned.bound_self.borrow_mut() = Some(obj_val);
        self.set_spec(result, Value::Proc(cloned));
        Ok(())
    }

    /// Clone a procedure as an escaping first-class value, capturing the
    /// current environment of every enclosing activation.
    pub(crate) fn op_penviron(&mut self, a: Operand, b: Operand) -> Result<(), Abend> {
        let result = self.operand_spec(a)?;
        let proc_val = self.operand_val(b);
        let Value::Proc(proc) = &proc_val else {
            return Err(type_error("environment save of a non-procedure").with_operand(&proc_val));
        };
        let cloned = self.clone_env(proc);
        self.set_spec(result, Value::Proc(cloned));
        Ok(())
    }

    /// Deep-copy a procedure record and its parent chain. The visited
    /// map keeps shared parents shared in the copy (the role the
    /// transient `copy` back-pointer plays during cloning).
    pub(crate) fn clone_env(&mut self, proc: &Rc<ProcRec>) -> Rc<ProcRec> {
        let mut visited: HashMap<*const ProcRec, Rc<ProcRec>> = HashMap::new();
        self.clone_proc_rec(proc, &mut visited)
    }

    fn clone_proc_rec(
        &mut self,
        p: &Rc<ProcRec>,
        visited: &mut HashMap<*const ProcRec, Rc<ProcRec>>,
    ) -> Rc<ProcRec> {
        if let Some(c) = visited.get(&Rc::as_ptr(p)) {
            return c.clone();
        }
        let parent = p.parent.as_ref().map(|q| self.clone_proc_rec(q, visited));
        // a live activation's environment is in the static slots; a
        // dormant one's is in its snapshot
        let saved: Vec<Value> = if p.active_use.get() > 0 {
            (0..p.local_count)
                .map(|i| self.spec_val(SpecRef { unit: p.unit, slot: p.local_base + i }))
                .collect()
        } else {
            p.saved.borrow().clone()
        };
        let rec = ProcRec {
            name: p.name.clone(),
            body: p.body,
            formal_count: p.formal_count,
            var_args: p.var_args,
            is_const: p.is_const,
            unit: p.unit,
            local_base: p.local_base,
            local_count: p.local_count,
            parent,
            active_use: Cell::new(0),
            switch_saved: Cell::new(false),
            saved: RefCell::new(saved),
            bound_self: RefCell::new(p.bound_self.borrow().clone()),
        };
        let rc = Rc::new(rec);
        visited.insert(Rc::as_ptr(p), rc.clone());
        rc
    }

    // --- operator overload dispatch --------------------------------------

    /// Invoke an operator slot on `obj` with `args`. `Ok(true)` means a
    /// frame was pushed (or a request enqueued) and the operation will
    /// complete through the return fixup.
    pub(crate) fn overload_with_args(
        &mut self,
        m: OpMethod,
        result: Option<SpecRef>,
        obj: &Value,
        args: Vec<Value>,
        extra: ExtraCode,
    ) -> Result<bool, Abend> {
        let Ok(cr) = self.class_of_value(obj) else {
            return Ok(false);
        };
        let Some(idx) = self.class_desc(cr).op_method(m, false) else {
            return Ok(false);
        };
        self.invoke_op_slot(obj.clone(), cr, idx, args, result, extra)?;
        Ok(true)
    }

    /// Left-slot-then-right-mirror dispatch for binary operators.
    pub(crate) fn overload_binary(
        &mut self,
        m: OpMethod,
        result: SpecRef,
        left: &Value,
        right: &Value,
        extra: ExtraCode,
    ) -> Result<bool, Abend> {
        if let Ok(cr) = self.class_of_value(left) {
            if let Some(idx) = self.class_desc(cr).op_method(m, false) {
                self.invoke_op_slot(left.clone(), cr, idx, vec![right.clone()], Some(result), extra)?;
                return Ok(true);
            }
        }
        if let Ok(cr) = self.class_of_value(right) {
            if let Some(idx) = self.class_desc(cr).op_method(m, true) {
                self.invoke_op_slot(right.clone(), cr, idx, vec![left.clone()], Some(result), extra)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) fn overload_unary(
        &mut self,
        m: OpMethod,
        result: SpecRef,
        obj: &Value,
    ) -> Result<bool, Abend> {
        self.overload_with_args(m, Some(result), obj, Vec::new(), ExtraCode::None)
    }

    pub(crate) fn overload_unary_with_arg(
        &mut self,
        m: OpMethod,
        result: SpecRef,
        obj: &Value,
        arg: Value,
        extra: ExtraCode,
    ) -> Result<bool, Abend> {
        self.overload_with_args(m, Some(result), obj, vec![arg], extra)
    }

    fn invoke_op_slot(
        &mut self,
        obj: Value,
        cr: ClassRef,
        slot_idx: u32,
        args: Vec<Value>,
        result: Option<SpecRef>,
        extra: ExtraCode,
    ) -> Result<(), Abend> {
        let slot = self
            .class_desc(cr)
            .slot(slot_idx)
            .ok_or_else(|| class_error("operator slot out of range"))?
            .clone();
        let proc_val = self.spec_val(slot.value);
        let argc = args.len() as u32;
        for v in args {
            self.push_val(v)?;
        }
        self.call_value(proc_val, argc, result, false, extra, Some(obj), false)
    }
}
