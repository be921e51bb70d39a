//! # Control-Flow and Call Operations
//!
//! Handlers for catch frames, jumps, the payload's four call shapes, and
//! the closure maker.
//!
//! ## Call shapes
//! - `outcall` — method call through an lvalue group `[obj, name]`. On a
//!   function receiver the group names either a custom property or the
//!   `call`/`apply` surface; on anything else the member is resolved and
//!   invoked, with the receiver prepended as `this` when the member is a
//!   function proxy. Raw strings box themselves before lookup.
//! - `wincall` — invoke TOS with the window as `this` (function proxies
//!   only; bare callables and constructors are called plainly).
//! - `new` / `new_attr` — constructor call on TOS / on the member named
//!   by the group at TOS.
//! - `vm_factory` — capture parent stack slots and mint a function object
//!   whose invocation spawns a nested VM (see [`super::run_closure`]).
//!
//! Jump targets are absolute stream indices; `je` tests TOS without
//! popping it.

use std::rc::Rc;

use crate::error::VmError;
use crate::host::{self, Kind};
use crate::value::Value;

use super::{group2, CatchFrame, Vm, VmClosure};

impl Vm {
    // =====================================================
    //                   Frames & jumps
    // =====================================================

    /// Push a catch frame: `(resume_pc, current_depth, catch_slot)`.
    pub(super) fn op_stepin(&mut self) -> Result<(), VmError> {
        let resume_pc = self.cur_usize()?;
        let catch_slot = self.cur_usize()?;
        self.call_stack.push(CatchFrame {
            resume_pc,
            depth: self.stack.len(),
            catch_slot,
        });
        Ok(())
    }

    pub(super) fn op_stepout(&mut self) -> Result<(), VmError> {
        self.call_stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| VmError::Invariant("stepout without catch frame".to_string()))
    }

    /// Unconditional jump: the target is read *at* the current PC.
    pub(super) fn op_jump(&mut self) -> Result<(), VmError> {
        let target = self.opcode.get(self.pc).copied().ok_or_else(|| {
            VmError::Invariant(format!("jump target read past end at pc {}", self.pc))
        })?;
        self.pc = usize::try_from(target)
            .map_err(|_| VmError::Invariant(format!("negative jump target {}", target)))?;
        Ok(())
    }

    /// Jump if TOS is truthy. TOS stays on the stack.
    pub(super) fn op_je(&mut self) -> Result<(), VmError> {
        let target = self.cur_usize()?;
        if self.tos()?.truthy() {
            self.pc = target;
        }
        Ok(())
    }

    /// Raise the value at TOS as a payload-level error.
    pub(super) fn op_throw(&mut self) -> Result<(), VmError> {
        Err(VmError::Js(self.tos()?.clone()))
    }

    pub(super) fn op_clear(&mut self) -> Result<(), VmError> {
        self.err = None;
        Ok(())
    }

    // =====================================================
    //                        Calls
    // =====================================================

    /// Method call through a group.
    pub(super) fn op_outcall(&mut self) -> Result<(), VmError> {
        let nargs = self.cur_usize()?;
        let args = self.split_args(nargs)?;
        let grp = self.pop()?;
        let (obj, name) = group2(&grp)?;

        let result = match &obj {
            // Function receiver: custom properties shadow call/apply.
            Value::Object(f) if matches!(f.kind, Kind::Function(_)) => {
                let key = host::prop_key(&name)?;
                match f.get_raw(&key) {
                    Some(Value::Object(custom)) if custom.is_callable() => {
                        let mut call_args = vec![obj.clone()];
                        call_args.extend(args);
                        host::call_function(&custom, &call_args)
                    }
                    Some(other) => Err(VmError::Type(format!(
                        "{} is not a function",
                        other.type_name()
                    ))),
                    None if key == "call" || key == "apply" => {
                        host::builtins::call_method(&obj, &key, &args)
                    }
                    None => Err(VmError::Type(format!(
                        "function has no method '{}'",
                        key
                    ))),
                }
            }
            _ => {
                // Auto-box raw strings so member lookup reaches methods.
                let recv = match &obj {
                    Value::Str(s) => Value::Object(host::boxed_str(s)),
                    other => other.clone(),
                };
                let member = host::get_member(&recv, &name)?;
                match member {
                    Value::Object(f) if matches!(f.kind, Kind::Function(_)) => {
                        let mut call_args = vec![recv.clone()];
                        call_args.extend(args);
                        host::call_function(&f, &call_args)
                    }
                    Value::Object(f) if f.is_callable() => host::call_function(&f, &args),
                    other => Err(VmError::Type(format!(
                        "{}.{} is not a function ({})",
                        recv.type_name(),
                        name.to_display(),
                        other.type_name()
                    ))),
                }
            }
        }?;
        self.stack.push(result);
        Ok(())
    }

    /// Invoke TOS; function proxies get the window as `this`.
    pub(super) fn op_wincall(&mut self) -> Result<(), VmError> {
        let nargs = self.cur_usize()?;
        let args = self.split_args(nargs)?;
        let f = self.tos()?.clone();
        let result = match &f {
            Value::Object(o) if matches!(o.kind, Kind::Function(_)) => {
                let mut call_args = vec![Value::Object(Rc::clone(&self.window))];
                call_args.extend(args);
                host::call_function(o, &call_args)
            }
            _ => plain_call(&f, &args),
        }?;
        self.set_tos(result)
    }

    /// Constructor call on TOS.
    pub(super) fn op_new(&mut self) -> Result<(), VmError> {
        let nargs = self.cur_usize()?;
        let args = self.split_args(nargs)?;
        let f = self.tos()?.clone();
        let result = plain_call(&f, &args)?;
        self.set_tos(result)
    }

    /// Constructor call on the member named by the group at TOS.
    pub(super) fn op_new_attr(&mut self) -> Result<(), VmError> {
        let nargs = self.cur_usize()?;
        let args = self.split_args(nargs)?;
        let grp = self.tos()?.clone();
        let (obj, name) = group2(&grp)?;
        let member = host::get_member(&obj, &name)?;
        let result = plain_call(&member, &args)?;
        self.set_tos(result)
    }

    /// Read the capture layout and mint a closure object.
    ///
    /// Stream layout: `pc_new, A_len, U_len, (i, j) * A_len, u * U_len`.
    /// `A` copies parent slots (shared cells alias, so the child observes
    /// values current *at call time*); `U` maps positional args onto cell
    /// slots in the child stack.
    pub(super) fn op_vm_factory(&mut self) -> Result<(), VmError> {
        let pc_new = self.cur_usize()?;
        let a_len = self.cur_usize()?;
        let u_len = self.cur_usize()?;

        let mut pairs = Vec::with_capacity(a_len);
        for _ in 0..a_len {
            let i = self.cur_usize()?;
            let j = self.cur_usize()?;
            pairs.push((i, j));
        }
        let mut arg_slots = Vec::with_capacity(u_len);
        for _ in 0..u_len {
            arg_slots.push(self.curcode()?);
        }

        let max_i = pairs.iter().map(|(i, _)| *i).max();
        let mut captured: Vec<Option<Value>> = vec![None; max_i.map_or(0, |m| m + 1)];
        for (i, j) in pairs {
            let v = self
                .stack
                .get(j)
                .cloned()
                .ok_or_else(|| VmError::Invariant(format!("capture slot {} out of range", j)))?;
            captured[i] = Some(v);
        }

        let closure = VmClosure {
            pc: pc_new,
            opcode: Rc::clone(&self.opcode),
            opmap: Rc::clone(&self.opmap),
            window: Rc::downgrade(&self.window),
            captured,
            arg_slots,
        };
        self.stack
            .push(Value::Object(host::Object::new(Kind::Function(closure))));
        Ok(())
    }
}

/// Call a value with no `this` munging: constructors construct, closures
/// take their `this` from the leading argument, bare natives run as-is.
fn plain_call(f: &Value, args: &[Value]) -> Result<Value, VmError> {
    match f {
        Value::Object(o) if o.is_callable() => host::call_function(o, args),
        other => Err(VmError::Type(format!(
            "{} is not a constructor",
            other.type_name()
        ))),
    }
}
