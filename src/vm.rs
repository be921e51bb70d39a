//! # Stack-Based Payload Virtual Machine
//!
//! This module implements the stack machine that executes a payload's
//! decoded opcode stream against a host window.
//!
//! ## High-level model
//! - **Operand stack (`stack`)**: holds [`Value`]s consumed/produced by ops.
//!   The low slots double as variable cells (1-element shared lists), which
//!   is how named locals and closure captures alias each other.
//! - **Catch stack (`call_stack`)**: frames pushed by `stepin` and popped by
//!   `stepout`, each capturing a handler PC, the stack depth to restore, and
//!   a catch-slot index.
//! - **Pending error (`err`)**: the boxed exception a handler trapped;
//!   `check_err` halts the loop when set, `clear` discards it.
//! - **Program counter (`pc`)**: index into the shared opcode stream.
//!   Immediates are read inline after the dispatch byte.
//!
//! ## Dispatch
//! Each step reads one stream value, translates it through the payload's
//! recovered opcode map, and executes the canonical handler. Only `stop`
//! and `check_err`-with-pending-error terminate the loop. An unmapped
//! opcode is a hard error: the map is supposed to cover everything the
//! payload emits.
//!
//! ## Exception unwind
//! Handlers fail with [`VmError`]; the run loop traps the *catchable*
//! variants when a catch frame exists: it restores the frame's PC,
//! truncates the stack to the captured depth, boxes the error into an
//! exception object (`message` + formatted stack trace), stores it as the
//! pending error, and writes it into the catch-slot cell (filling an empty
//! cell) when the slot is nonzero. With no frame, the error escapes to the
//! caller. A pending error surviving to loop exit re-raises as an
//! *uncatchable* [`VmError::Rethrown`].
//!
//! ## Termination
//! The outermost invocation discards the top of stack and returns the
//! slice from position 3 onward; nested invocations (closure calls made by
//! `vm_factory` functions) return the top of stack.

use std::rc::{Rc, Weak};

use crate::error::VmError;
use crate::host::{Kind, Object};
use crate::opcode::{Op, OpMap};
use crate::value::{new_list, ObjRef, Value};

mod ops_arith;
mod ops_control;
mod ops_struct;
#[cfg(test)]
mod tests;

/// Exception-handling frame pushed by `stepin`.
///
/// On unwind the stack truncates to `depth`, control resumes at
/// `resume_pc`, and (when nonzero) the boxed exception is written into the
/// cell at `catch_slot`. The slot necessarily lives below `depth`.
pub(crate) struct CatchFrame {
    resume_pc: usize,
    depth: usize,
    catch_slot: usize,
}

/// Everything a `vm_factory` closure needs to spawn a nested VM later:
/// entry PC, the shared program, captured parent slots (cells are shared
/// by reference, so the child reads *current* values), and the arg-slot
/// overlay indices.
pub struct VmClosure {
    pub(crate) pc: usize,
    pub(crate) opcode: Rc<Vec<i64>>,
    pub(crate) opmap: Rc<OpMap>,
    pub(crate) window: Weak<Object>,
    pub(crate) captured: Vec<Option<Value>>,
    pub(crate) arg_slots: Vec<i64>,
}

/// One VM invocation. Constructed fresh per run; the opcode stream,
/// opcode map, and window are shared.
pub struct Vm {
    pc: usize,
    opcode: Rc<Vec<i64>>,
    opmap: Rc<OpMap>,
    window: ObjRef,
    stack: Vec<Value>,
    call_stack: Vec<CatchFrame>,
    err: Option<Value>,
    empty_init: bool,
}

impl Vm {
    /// The outermost invocation: seeds the two bottom cells (window box
    /// and a scratch object box) and returns the stack tail on `stop`.
    pub fn outer(pc: usize, opcode: Rc<Vec<i64>>, opmap: Rc<OpMap>, window: ObjRef) -> Vm {
        let stack = vec![
            new_list(vec![Value::Object(Rc::clone(&window))]),
            new_list(vec![Value::Object(Object::new(Kind::Object))]),
        ];
        Vm {
            pc,
            opcode,
            opmap,
            window,
            stack,
            call_stack: Vec::new(),
            err: None,
            empty_init: true,
        }
    }

    /// A nested invocation running a closure body on a pre-seeded stack.
    fn nested(
        pc: usize,
        opcode: Rc<Vec<i64>>,
        opmap: Rc<OpMap>,
        window: ObjRef,
        stack: Vec<Value>,
    ) -> Vm {
        Vm {
            pc,
            opcode,
            opmap,
            window,
            stack,
            call_stack: Vec::new(),
            err: None,
            empty_init: false,
        }
    }

    // ----- Stream access -----

    /// Read the next stream value and advance.
    fn curcode(&mut self) -> Result<i64, VmError> {
        let v = self.opcode.get(self.pc).copied().ok_or_else(|| {
            VmError::Invariant(format!("program counter {} past end of stream", self.pc))
        })?;
        self.pc += 1;
        Ok(v)
    }

    /// Read an immediate that must be a non-negative index.
    fn cur_usize(&mut self) -> Result<usize, VmError> {
        let v = self.curcode()?;
        usize::try_from(v)
            .map_err(|_| VmError::Invariant(format!("negative immediate {}", v)))
    }

    // ----- Stack access -----

    fn tos(&self) -> Result<&Value, VmError> {
        self.stack
            .last()
            .ok_or_else(|| VmError::Invariant("stack underflow".to_string()))
    }

    fn set_tos(&mut self, v: Value) -> Result<(), VmError> {
        match self.stack.last_mut() {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(VmError::Invariant("stack underflow".to_string())),
        }
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::Invariant("stack underflow".to_string()))
    }

    /// Pop the top `n` values, preserving their order.
    fn split_args(&mut self, n: usize) -> Result<Vec<Value>, VmError> {
        if self.stack.len() < n {
            return Err(VmError::Invariant("stack underflow".to_string()));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    /// Resolve a (possibly negative, Python-style) stack index.
    fn stack_index(&self, i: i64) -> Result<usize, VmError> {
        let len = self.stack.len() as i64;
        let idx = if i < 0 { i + len } else { i };
        if idx >= 0 && idx < len {
            Ok(idx as usize)
        } else {
            Err(VmError::Invariant(format!("stack index {} out of range", i)))
        }
    }

    // ----- Run loop -----

    /// Execute until `stop` / `check_err` terminates the loop, unwinding
    /// catchable faults into catch frames along the way.
    pub fn run(mut self) -> Result<Value, VmError> {
        loop {
            match self.step() {
                Ok(false) => continue,
                Ok(true) => {
                    // A pending caught error re-raises past every frame.
                    if let Some(err) = self.err.take() {
                        return Err(VmError::Rethrown(err));
                    }
                    return if self.empty_init {
                        self.pop()?;
                        let tail = if self.stack.len() > 3 {
                            self.stack.split_off(3)
                        } else {
                            Vec::new()
                        };
                        Ok(new_list(tail))
                    } else {
                        self.pop()
                    };
                }
                Err(e) if e.is_catchable() && !self.call_stack.is_empty() => {
                    self.unwind(e)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch, map, and execute one operation. Returns `true` when the loop
    /// should terminate.
    fn step(&mut self) -> Result<bool, VmError> {
        let code = self.curcode()?;
        let op = *self.opmap.get(&code).ok_or_else(|| {
            VmError::Invariant(format!("unmapped opcode {} at pc {}", code, self.pc - 1))
        })?;
        match op {
            // ----- Loop control -----
            Op::Stop => return Ok(true),
            Op::CheckErr => return Ok(self.err.is_some()),
            // ----- Memory -----
            Op::Inst => self.op_inst()?,
            Op::Assign => self.op_assign()?,
            Op::Undefined => self.op_undefined()?,
            Op::Null => self.op_null()?,
            Op::True => self.op_true()?,
            Op::False => self.op_false()?,
            Op::InstArr => self.op_inst_arr()?,
            Op::Drop => self.op_drop()?,
            Op::Realloc => self.op_realloc()?,
            // ----- Control -----
            Op::Stepin => self.op_stepin()?,
            Op::Stepout => self.op_stepout()?,
            Op::Jump => self.op_jump()?,
            Op::Je => self.op_je()?,
            Op::Throw => self.op_throw()?,
            Op::Clear => self.op_clear()?,
            // ----- Calls -----
            Op::Outcall => self.op_outcall()?,
            Op::Wincall => self.op_wincall()?,
            Op::New => self.op_new()?,
            Op::NewAttr => self.op_new_attr()?,
            Op::VmFactory => self.op_vm_factory()?,
            // ----- Logic -----
            Op::Eq => self.op_eq()?,
            Op::Refeq => self.op_refeq()?,
            Op::Ge => self.op_ge()?,
            Op::Geq => self.op_geq()?,
            Op::Inv => self.op_inv()?,
            Op::Contains => self.op_contains()?,
            // ----- Arithmetic -----
            Op::Add => self.op_add()?,
            Op::Sub => self.op_sub()?,
            Op::Mul => self.op_mul()?,
            Op::Div => self.op_div()?,
            Op::Mod => self.op_mod()?,
            Op::Bitor => self.op_bitor()?,
            Op::Bitand => self.op_bitand()?,
            Op::Xor => self.op_xor()?,
            Op::Lshift => self.op_lshift()?,
            Op::Rshift => self.op_rshift()?,
            Op::Urshift => self.op_urshift()?,
            // ----- Strings -----
            Op::Zstr => self.op_zstr()?,
            Op::Concat => self.op_concat()?,
            // ----- OOP / lvalues -----
            Op::Group => self.op_group()?,
            Op::Grgetattr => self.op_grgetattr()?,
            Op::Getattr => self.op_getattr()?,
            Op::Setattr => self.op_setattr()?,
            Op::Delattr => self.op_delattr()?,
            Op::GetGlobal => self.op_get_global()?,
            Op::Grwinattr => self.op_grwinattr()?,
            Op::Typeof => self.op_typeof()?,
            Op::Tolist => self.op_tolist()?,
            Op::Grobj => self.op_grobj()?,
            Op::Getobj => self.op_getobj()?,
            Op::Getobj2 => self.op_getobj2()?,
            Op::Chobj => self.op_chobj()?,
            // ----- Advanced -----
            Op::Copy => self.op_copy()?,
            Op::Swap => self.op_swap()?,
            Op::N2list => self.op_n2list()?,
            Op::ArrPopleft => self.op_arr_popleft()?,
        }
        Ok(false)
    }

    /// Trap a catchable error into the innermost catch frame.
    fn unwind(&mut self, e: VmError) -> Result<(), VmError> {
        let frame = self
            .call_stack
            .pop()
            .ok_or_else(|| VmError::Invariant("unwind without catch frame".to_string()))?;
        self.pc = frame.resume_pc;

        let trace = format!("{}\n    at <anonymous>", e);
        let boxed = Value::Object(crate::host::make_exception(&e, trace));
        self.err = Some(boxed.clone());

        // Truncate before touching the slot: the slot lives below `depth`.
        self.stack.truncate(frame.depth);
        if frame.catch_slot != 0 {
            let slot = self.stack.get(frame.catch_slot).ok_or_else(|| {
                VmError::Invariant(format!(
                    "catch slot {} outside restored stack",
                    frame.catch_slot
                ))
            })?;
            match slot {
                Value::List(cell) => {
                    let mut cell = cell.borrow_mut();
                    if cell.is_empty() {
                        cell.push(boxed);
                    } else {
                        cell[0] = boxed;
                    }
                }
                _ => {
                    return Err(VmError::Invariant(
                        "catch slot is not a cell".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Invoke a `vm_factory` closure: copy the captured slots, overlay the
/// `this`/args/self cells and positive arg slots, then run a nested VM and
/// return its top of stack.
pub fn run_closure(c: &VmClosure, func: &ObjRef, args: &[Value]) -> Result<Value, VmError> {
    let window = c
        .window
        .upgrade()
        .ok_or_else(|| VmError::Invariant("window dropped before closure call".to_string()))?;

    let (this, rest) = match args.split_first() {
        Some((t, r)) => (t.clone(), r),
        None => (Value::Undefined, &[][..]),
    };
    // A falsy `this` (the common host convention is to pass null) binds
    // the window instead.
    let this = if this.truthy() {
        this
    } else {
        Value::Object(Rc::clone(&window))
    };

    let max_slot = c
        .arg_slots
        .iter()
        .copied()
        .max()
        .unwrap_or(0)
        .max(0) as usize;
    let need = 3usize.max(1 + max_slot);

    let mut stack: Vec<Value> = c
        .captured
        .iter()
        .map(|slot| slot.clone().unwrap_or(Value::Undefined))
        .collect();
    if stack.len() < need {
        stack.resize(need, Value::Undefined);
    }
    stack[0] = new_list(vec![this]);
    stack[1] = new_list(vec![new_list(rest.to_vec())]);
    stack[2] = new_list(vec![Value::Object(Rc::clone(func))]);
    for (slot, arg) in c.arg_slots.iter().zip(rest.iter()) {
        if *slot > 0 {
            stack[*slot as usize] = new_list(vec![arg.clone()]);
        }
    }

    Vm::nested(
        c.pc,
        Rc::clone(&c.opcode),
        Rc::clone(&c.opmap),
        window,
        stack,
    )
    .run()
}

/// Unpack a 2-element lvalue group. Grouping opcodes guarantee the shape;
/// anything else is a (catchable) type fault, as in the reference.
fn group2(v: &Value) -> Result<(Value, Value), VmError> {
    match v {
        Value::List(l) => {
            let l = l.borrow();
            if l.len() >= 2 {
                Ok((l[0].clone(), l[1].clone()))
            } else {
                Err(VmError::Type("cannot unpack lvalue group".to_string()))
            }
        }
        _ => Err(VmError::Type("cannot unpack lvalue group".to_string())),
    }
}
