//! # Memory, Cell, Group, and String Operations
//!
//! Handlers for the operations that shuffle values between the stream, the
//! operand stack, and variable cells, plus the lvalue-group machinery and
//! the inline-string decoder.
//!
//! ## Cells and groups
//! A named local is a 1-element shared list (*cell*) so closures can alias
//! it; an lvalue is a 2-element list `[object, name]` (*group*). The
//! `*obj` family below indexes the stack and dereferences cells; the
//! `gr*`/`*attr` family builds and consumes groups. Empty cells read as
//! `undefined`; dereferencing one where a value is required is a hard
//! error, while using a non-cell slot surfaces as a catchable type fault
//! (the reference behaves the same way).
//!
//! ## Inline strings
//! `zstr` collects the byte immediates of the *following* `concat`
//! opcodes into a UTF-8 buffer; a standalone `concat` appends a single
//! code point to the top-of-stack string. The `null` handler peeks one
//! opcode ahead and fuses with `refeq` into an is-null test; the fused
//! `refeq` byte is consumed without executing.

use crate::error::VmError;
use crate::host;
use crate::opcode::Op;
use crate::value::{new_list, Value};

use super::{group2, Vm};

impl Vm {
    // =====================================================
    //                       Memory
    // =====================================================

    pub(super) fn op_inst(&mut self) -> Result<(), VmError> {
        let v = self.curcode()?;
        self.stack.push(Value::Int(v));
        Ok(())
    }

    pub(super) fn op_assign(&mut self) -> Result<(), VmError> {
        let v = self.curcode()?;
        self.set_tos(Value::Int(v))
    }

    pub(super) fn op_undefined(&mut self) -> Result<(), VmError> {
        self.stack.push(Value::Undefined);
        Ok(())
    }

    /// Push `null` — unless the next opcode maps to `refeq`, in which case
    /// consume it and push whether TOS *is* the null sentinel. The fusion
    /// must look exactly one opcode ahead.
    pub(super) fn op_null(&mut self) -> Result<(), VmError> {
        let next = self.curcode()?;
        if self.opmap.get(&next) == Some(&Op::Refeq) {
            let is_null = matches!(self.tos()?, Value::Null);
            self.stack.push(Value::Bool(is_null));
        } else {
            self.pc -= 1;
            self.stack.push(Value::Null);
        }
        Ok(())
    }

    pub(super) fn op_true(&mut self) -> Result<(), VmError> {
        self.stack.push(Value::Bool(true));
        Ok(())
    }

    pub(super) fn op_false(&mut self) -> Result<(), VmError> {
        self.stack.push(Value::Bool(false));
        Ok(())
    }

    /// Push a fresh 1-element cell holding the next immediate.
    pub(super) fn op_inst_arr(&mut self) -> Result<(), VmError> {
        let v = self.curcode()?;
        self.stack.push(new_list(vec![Value::Int(v)]));
        Ok(())
    }

    pub(super) fn op_drop(&mut self) -> Result<(), VmError> {
        self.pop()?;
        Ok(())
    }

    /// Resize the stack to exactly `n` slots.
    pub(super) fn op_realloc(&mut self) -> Result<(), VmError> {
        let n = self.cur_usize()?;
        self.stack.resize(n, Value::Undefined);
        Ok(())
    }

    // =====================================================
    //                       Strings
    // =====================================================

    /// Collect the byte operands of the following `concat` opcodes into a
    /// UTF-8 string.
    pub(super) fn op_zstr(&mut self) -> Result<(), VmError> {
        let mut bytes = Vec::new();
        loop {
            let code = self.curcode()?;
            let op = self.opmap.get(&code).ok_or_else(|| {
                VmError::Invariant(format!("unmapped opcode {} in string run", code))
            })?;
            if *op != Op::Concat {
                self.pc -= 1;
                break;
            }
            let b = self.curcode()?;
            let b = u8::try_from(b).map_err(|_| {
                VmError::Invariant(format!("string byte {} out of range", b))
            })?;
            bytes.push(b);
        }
        let s = String::from_utf8(bytes)
            .map_err(|e| VmError::Invariant(format!("invalid UTF-8 in string run: {}", e)))?;
        self.stack.push(Value::Str(s));
        Ok(())
    }

    /// Append one code point to the top-of-stack string.
    pub(super) fn op_concat(&mut self) -> Result<(), VmError> {
        let code = self.curcode()?;
        let ch = u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| VmError::Invariant(format!("invalid code point {}", code)))?;
        match self.stack.last_mut() {
            Some(Value::Str(s)) => {
                s.push(ch);
                Ok(())
            }
            Some(other) => Err(VmError::Type(format!(
                "cannot append a character to {}",
                other.type_name()
            ))),
            None => Err(VmError::Invariant("stack underflow".to_string())),
        }
    }

    // =====================================================
    //                    OOP / lvalues
    // =====================================================

    /// `a, b → [a, b]`
    pub(super) fn op_group(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.tos()?.clone();
        self.set_tos(new_list(vec![a, b]))
    }

    /// `[obj, name], key → [[obj[name], key]]`
    pub(super) fn op_grgetattr(&mut self) -> Result<(), VmError> {
        if self.stack.len() < 2 {
            return Err(VmError::Invariant("stack underflow".to_string()));
        }
        let grp = self.stack[self.stack.len() - 2].clone();
        let (obj, name) = group2(&grp)?;
        let member = host::get_member(&obj, &name)?;
        let key = self.pop()?;
        self.set_tos(new_list(vec![member, key]))
    }

    /// Pop a group and push the member it names. Raw-string `length` is a
    /// direct char count.
    pub(super) fn op_getattr(&mut self) -> Result<(), VmError> {
        let grp = self.pop()?;
        let (obj, attr) = group2(&grp)?;
        if let (Value::Str(s), Value::Str(a)) = (&obj, &attr) {
            if a == "length" {
                self.stack.push(Value::Int(s.chars().count() as i64));
                return Ok(());
            }
        }
        self.stack.push(host::get_member(&obj, &attr)?);
        Ok(())
    }

    /// Write TOS through the group below it, popping nothing.
    pub(super) fn op_setattr(&mut self) -> Result<(), VmError> {
        if self.stack.len() < 2 {
            return Err(VmError::Invariant("stack underflow".to_string()));
        }
        let grp = self.stack[self.stack.len() - 2].clone();
        let (obj, name) = group2(&grp)?;
        let value = self.tos()?.clone();
        host::set_member(&obj, &name, value)
    }

    /// Delete the member named by the group at TOS, pushing whether the
    /// name is gone afterwards.
    pub(super) fn op_delattr(&mut self) -> Result<(), VmError> {
        let grp = self.tos()?.clone();
        let (obj, name) = group2(&grp)?;
        match &obj {
            Value::Object(o) => {
                host::delete_prop(o, &host::prop_key(&name)?)?;
            }
            other => {
                return Err(VmError::Type(format!(
                    "cannot delete property of {}",
                    other.type_name()
                )))
            }
        }
        let still_there = host::contains(&name, &obj)?;
        self.stack.push(Value::Bool(!still_there));
        Ok(())
    }

    /// Resolve TOS as a property name on the window.
    pub(super) fn op_get_global(&mut self) -> Result<(), VmError> {
        let key = host::prop_key(self.tos()?)?;
        let v = host::get_prop(&self.window, &key)?;
        self.set_tos(v)
    }

    /// `name → [window, name]`
    pub(super) fn op_grwinattr(&mut self) -> Result<(), VmError> {
        let name = self.tos()?.clone();
        let win = Value::Object(std::rc::Rc::clone(&self.window));
        self.set_tos(new_list(vec![win, name]))
    }

    pub(super) fn op_typeof(&mut self) -> Result<(), VmError> {
        let t = match self.tos()? {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "object",
            Value::Object(o) => match &o.kind {
                host::Kind::Str(_) => "string",
                host::Kind::Symbol(_) => "symbol",
                _ if o.is_callable() => "function",
                _ => "object",
            },
        };
        self.set_tos(Value::Str(t.to_string()))
    }

    /// Enumerate TOS into a fresh raw list.
    pub(super) fn op_tolist(&mut self) -> Result<(), VmError> {
        let items = match self.tos()? {
            Value::List(l) => l.borrow().clone(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            Value::Object(o) => match &o.kind {
                host::Kind::Array => host::array_elements(o),
                host::Kind::Str(s) => {
                    s.chars().map(|c| Value::Str(c.to_string())).collect()
                }
                _ => {
                    return Err(VmError::Type(format!(
                        "{} is not iterable",
                        o.kind_name()
                    )))
                }
            },
            other => {
                return Err(VmError::Type(format!(
                    "{} is not iterable",
                    other.type_name()
                )))
            }
        };
        self.set_tos(new_list(items))
    }

    /// `idx_or_wrapper, name → [deref(stack[idx]), name]`
    pub(super) fn op_grobj(&mut self) -> Result<(), VmError> {
        if self.stack.len() < 2 {
            return Err(VmError::Invariant("stack underflow".to_string()));
        }
        let idx_value = self.stack[self.stack.len() - 2].clone();
        let idx = match &idx_value {
            Value::List(l) => {
                let l = l.borrow();
                if l.len() != 1 {
                    return Err(VmError::Invariant(
                        "slot wrapper must have exactly one element".to_string(),
                    ));
                }
                slot_index(&l[0])?
            }
            other => slot_index(other)?,
        };
        let resolved = self.stack_index(idx)?;
        let value = self.deref_cell(resolved)?;
        let name = self.pop()?;
        self.set_tos(new_list(vec![value, name]))
    }

    /// Push the dereferenced cell at immediate slot `i`, or `undefined`
    /// for an empty or unassigned slot.
    pub(super) fn op_getobj(&mut self) -> Result<(), VmError> {
        let i = self.cur_usize()?;
        let slot = self
            .stack
            .get(i)
            .ok_or_else(|| VmError::Invariant(format!("slot {} out of range", i)))?;
        let v = match slot {
            Value::List(l) => {
                let l = l.borrow();
                l.first().cloned().unwrap_or(Value::Undefined)
            }
            other if !other.truthy() => Value::Undefined,
            other => {
                return Err(VmError::Type(format!(
                    "{} is not subscriptable",
                    other.type_name()
                )))
            }
        };
        self.stack.push(v);
        Ok(())
    }

    /// Like `getobj`, but the slot index comes boxed in the TOS wrapper.
    pub(super) fn op_getobj2(&mut self) -> Result<(), VmError> {
        let wrapper = self.tos()?.clone();
        let idx = match &wrapper {
            Value::List(l) => {
                let l = l.borrow();
                let first = l.first().cloned().ok_or_else(|| {
                    VmError::Invariant("empty slot wrapper".to_string())
                })?;
                slot_index(&first)?
            }
            other => {
                return Err(VmError::Type(format!(
                    "{} is not subscriptable",
                    other.type_name()
                )))
            }
        };
        let resolved = self.stack_index(idx)?;
        let v = self.deref_cell(resolved)?;
        self.set_tos(v)
    }

    /// Write TOS into the cell whose index is boxed at stack[-2],
    /// creating the cell's element if it is empty.
    pub(super) fn op_chobj(&mut self) -> Result<(), VmError> {
        if self.stack.len() < 2 {
            return Err(VmError::Invariant("stack underflow".to_string()));
        }
        let wrapper = self.stack[self.stack.len() - 2].clone();
        let idx = match &wrapper {
            Value::List(l) => {
                let l = l.borrow();
                let first = l.first().cloned().ok_or_else(|| {
                    VmError::Invariant("empty slot wrapper".to_string())
                })?;
                slot_index(&first)?
            }
            other => {
                return Err(VmError::Type(format!(
                    "{} is not subscriptable",
                    other.type_name()
                )))
            }
        };
        let resolved = self.stack_index(idx)?;
        let value = self.tos()?.clone();
        match &self.stack[resolved] {
            Value::List(cell) => {
                let cell = std::rc::Rc::clone(cell);
                let mut cell = cell.borrow_mut();
                if cell.is_empty() {
                    cell.push(value);
                } else {
                    cell[0] = value;
                }
                Ok(())
            }
            Value::Undefined | Value::Null => Err(VmError::Attribute(
                "cannot store into an unassigned slot".to_string(),
            )),
            other => Err(VmError::Type(format!(
                "{} slot cannot hold a value",
                other.type_name()
            ))),
        }
    }

    // =====================================================
    //                       Advanced
    // =====================================================

    pub(super) fn op_copy(&mut self) -> Result<(), VmError> {
        let v = self.tos()?.clone();
        self.stack.push(v);
        Ok(())
    }

    /// Swap TOS with the slot `k` below the second-from-top.
    pub(super) fn op_swap(&mut self) -> Result<(), VmError> {
        let k = self.cur_usize()?;
        let len = self.stack.len();
        let lower = len
            .checked_sub(2 + k)
            .ok_or_else(|| VmError::Invariant("swap reaches below the stack".to_string()))?;
        self.stack.swap(lower, len - 1);
        Ok(())
    }

    /// If immediate slot `k` is unassigned, seed it with an empty list.
    pub(super) fn op_n2list(&mut self) -> Result<(), VmError> {
        let k = self.cur_usize()?;
        let slot = self
            .stack
            .get_mut(k)
            .ok_or_else(|| VmError::Invariant(format!("slot {} out of range", k)))?;
        if matches!(slot, Value::Undefined) {
            *slot = new_list(Vec::new());
        }
        Ok(())
    }

    /// Pop-left from the list at TOS: pushes `(value, true)` on success or
    /// `(undefined, false)` when the list is empty. The list stays put.
    pub(super) fn op_arr_popleft(&mut self) -> Result<(), VmError> {
        let popped = match self.tos()? {
            Value::List(l) => {
                let l = std::rc::Rc::clone(l);
                let mut l = l.borrow_mut();
                if l.is_empty() {
                    None
                } else {
                    Some(l.remove(0))
                }
            }
            Value::Object(o) if matches!(o.kind, host::Kind::Array) => {
                if host::array_length(o) == 0 {
                    None
                } else {
                    // The reference cannot pop-left a host array either.
                    return Err(VmError::Attribute(
                        "Array has no attribute 'pop'".to_string(),
                    ));
                }
            }
            other => {
                return Err(VmError::Type(format!(
                    "{} has no length",
                    other.type_name()
                )))
            }
        };
        match popped {
            Some(v) => {
                self.stack.push(v);
                self.stack.push(Value::Bool(true));
            }
            None => {
                self.stack.push(Value::Undefined);
                self.stack.push(Value::Bool(false));
            }
        }
        Ok(())
    }

    /// Dereference the cell at an absolute stack position, requiring a
    /// non-empty cell.
    fn deref_cell(&self, idx: usize) -> Result<Value, VmError> {
        match &self.stack[idx] {
            Value::List(l) => l.borrow().first().cloned().ok_or_else(|| {
                VmError::Invariant(format!("slot {} holds an empty cell", idx))
            }),
            Value::Undefined | Value::Null => Err(VmError::Type(format!(
                "slot {} is not subscriptable",
                idx
            ))),
            other => Err(VmError::Type(format!(
                "{} is not subscriptable",
                other.type_name()
            ))),
        }
    }
}

/// A slot index must be an integer value.
fn slot_index(v: &Value) -> Result<i64, VmError> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(if *b { 1 } else { 0 }),
        other => Err(VmError::Type(format!(
            "stack indices must be integers, not {}",
            other.type_name()
        ))),
    }
}
