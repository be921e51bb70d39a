//! # Logic, Arithmetic, and Bitwise Operations
//!
//! Handlers for the comparison, arithmetic, and bit-twiddling opcodes.
//!
//! ## Semantics notes
//! - Binary handlers take the right operand from a pop and leave the
//!   result in the left operand's slot, mirroring the reference's
//!   `stack[-1] = stack[-2] op stack.pop()` shape.
//! - Integer arithmetic stays integral; `div` computes in floating point
//!   and demotes exact quotients back to integers.
//! - Every bitwise result reduces to signed 32-bit; `urshift` reduces the
//!   left operand to unsigned 32-bit first and its result is therefore
//!   non-negative. `bitor` truncates a float left operand to an integer;
//!   `lshift` of NaN behaves as zero. These are load-bearing: payloads
//!   hash with exactly these reductions.
//! - Mixed-type ordering comparisons fault catchably (payload probes rely
//!   on trapping them); `refeq` is identity except that primitive string
//!   and integer right operands promote to value equality, emulating
//!   interning.

use crate::error::VmError;
use crate::host;
use crate::value::{value_cmp, value_eq, Value};

use super::Vm;

/// Reduce to signed 32-bit, two's complement.
fn signed32(n: i64) -> i64 {
    n as i32 as i64
}

/// Integer pair when both operands are integral, float pair otherwise.
enum NumPair {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn num_pair(a: &Value, b: &Value) -> Result<NumPair, VmError> {
    match (int_like(a), int_like(b)) {
        (Some(x), Some(y)) => Ok(NumPair::Ints(x, y)),
        _ => Ok(NumPair::Floats(a.as_number()?, b.as_number()?)),
    }
}

fn int_like(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(if *b { 1 } else { 0 }),
        _ => None,
    }
}

impl Vm {
    // =====================================================
    //                        Logic
    // =====================================================

    pub(super) fn op_eq(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.tos()?.clone();
        self.set_tos(Value::Bool(value_eq(&a, &b)))
    }

    /// Identity comparison; primitive string/int right operands degrade to
    /// value equality.
    pub(super) fn op_refeq(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.tos()?.clone();
        let same = match &b {
            Value::Str(_) | Value::Int(_) | Value::Bool(_) => value_eq(&a, &b),
            Value::Undefined => matches!(a, Value::Undefined),
            Value::Null => matches!(a, Value::Null),
            Value::Float(_) => false,
            Value::List(rb) => matches!(&a, Value::List(ra) if std::rc::Rc::ptr_eq(ra, rb)),
            Value::Object(ob) => {
                matches!(&a, Value::Object(oa) if std::rc::Rc::ptr_eq(oa, ob))
            }
        };
        self.set_tos(Value::Bool(same))
    }

    /// Strict greater-than.
    pub(super) fn op_ge(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.tos()?.clone();
        let res = value_cmp(&a, &b)? == std::cmp::Ordering::Greater;
        self.set_tos(Value::Bool(res))
    }

    /// Greater-or-equal; a boxed-string left operand compares numerically.
    pub(super) fn op_geq(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.tos()?.clone();
        let res = match &a {
            Value::Object(o) => match &o.kind {
                host::Kind::Str(s) => {
                    let lhs: f64 = s.trim().parse().map_err(|_| {
                        VmError::Type(format!("could not convert '{}' to a number", s))
                    })?;
                    lhs >= b.as_number()?
                }
                _ => value_cmp(&a, &b)? != std::cmp::Ordering::Less,
            },
            _ => value_cmp(&a, &b)? != std::cmp::Ordering::Less,
        };
        self.set_tos(Value::Bool(res))
    }

    pub(super) fn op_inv(&mut self) -> Result<(), VmError> {
        let t = self.tos()?.truthy();
        self.set_tos(Value::Bool(!t))
    }

    /// `key in container`.
    pub(super) fn op_contains(&mut self) -> Result<(), VmError> {
        let container = self.pop()?;
        let key = self.tos()?.clone();
        let res = host::contains(&key, &container)?;
        self.set_tos(Value::Bool(res))
    }

    // =====================================================
    //                     Arithmetic
    // =====================================================

    /// Addition with string coercion on either side; lists concatenate.
    pub(super) fn op_add(&mut self) -> Result<(), VmError> {
        let mut b = self.pop()?;
        if let Value::Object(o) = &b {
            if let host::Kind::Str(s) = &o.kind {
                b = Value::Str(s.clone());
            }
        }
        let a = self.tos()?.clone();
        let result = match (&a, &b) {
            (_, Value::Str(s)) => Value::Str(a.to_display() + s),
            (Value::Str(s), _) => Value::Str(s.clone() + &b.to_display()),
            (Value::List(la), Value::List(lb)) => {
                let mut joined = la.borrow().clone();
                joined.extend(lb.borrow().iter().cloned());
                crate::value::new_list(joined)
            }
            _ => match num_pair(&a, &b)? {
                NumPair::Ints(x, y) => match x.checked_add(y) {
                    Some(sum) => Value::Int(sum),
                    None => Value::Float(x as f64 + y as f64),
                },
                NumPair::Floats(x, y) => Value::Float(x + y),
            },
        };
        self.set_tos(result)
    }

    pub(super) fn op_sub(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.tos()?.clone();
        let result = match num_pair(&a, &b)? {
            NumPair::Ints(x, y) => match x.checked_sub(y) {
                Some(d) => Value::Int(d),
                None => Value::Float(x as f64 - y as f64),
            },
            NumPair::Floats(x, y) => Value::Float(x - y),
        };
        self.set_tos(result)
    }

    pub(super) fn op_mul(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.tos()?.clone();
        let result = match num_pair(&a, &b)? {
            NumPair::Ints(x, y) => match x.checked_mul(y) {
                Some(p) => Value::Int(p),
                None => Value::Float(x as f64 * y as f64),
            },
            NumPair::Floats(x, y) => Value::Float(x * y),
        };
        self.set_tos(result)
    }

    /// True division, demoted to an integer when exact.
    pub(super) fn op_div(&mut self) -> Result<(), VmError> {
        let b = self.pop()?.as_number()?;
        let a = self.tos()?.as_number()?;
        if b == 0.0 {
            return Err(VmError::Invariant("division by zero".to_string()));
        }
        let q = a / b;
        let result = if q.is_finite() && q == q.trunc() && q.abs() < 9.0e18 {
            Value::Int(q as i64)
        } else {
            Value::Float(q)
        };
        self.set_tos(result)
    }

    /// Floor modulo (the result takes the divisor's sign).
    pub(super) fn op_mod(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.tos()?.clone();
        let result = match num_pair(&a, &b)? {
            NumPair::Ints(x, y) => {
                if y == 0 {
                    return Err(VmError::Invariant("modulo by zero".to_string()));
                }
                Value::Int(((x % y) + y) % y)
            }
            NumPair::Floats(x, y) => {
                if y == 0.0 {
                    return Err(VmError::Invariant("modulo by zero".to_string()));
                }
                Value::Float(x - y * (x / y).floor())
            }
        };
        self.set_tos(result)
    }

    // =====================================================
    //                      Bitwise
    // =====================================================

    /// Bitwise OR; a float left operand truncates to an integer first.
    pub(super) fn op_bitor(&mut self) -> Result<(), VmError> {
        let b = self.pop()?.as_bits()?;
        let a = match self.tos()? {
            Value::Float(f) => *f as i64,
            other => other.as_bits()?,
        };
        self.set_tos(Value::Int(signed32(a | b)))
    }

    pub(super) fn op_bitand(&mut self) -> Result<(), VmError> {
        let b = self.pop()?.as_bits()?;
        let a = self.tos()?.as_bits()?;
        self.set_tos(Value::Int(signed32(a & b)))
    }

    pub(super) fn op_xor(&mut self) -> Result<(), VmError> {
        let b = self.pop()?.as_bits()?;
        let a = self.tos()?.as_bits()?;
        self.set_tos(Value::Int(signed32(a ^ b)))
    }

    /// Left shift; NaN shifts as zero, counts ≥ 32 vanish into the
    /// 32-bit reduction.
    pub(super) fn op_lshift(&mut self) -> Result<(), VmError> {
        let b = self.pop()?;
        if matches!(self.tos()?, Value::Float(f) if f.is_nan()) {
            return self.set_tos(Value::Int(0));
        }
        let shift = b.as_bits()?;
        let a = self.tos()?.as_bits()?;
        if shift < 0 {
            return Err(VmError::Invariant("negative shift count".to_string()));
        }
        let result = if shift >= 32 {
            0
        } else {
            signed32(a.wrapping_shl(shift as u32))
        };
        self.set_tos(Value::Int(result))
    }

    /// Arithmetic (sign-extending) right shift.
    pub(super) fn op_rshift(&mut self) -> Result<(), VmError> {
        let shift = self.pop()?.as_bits()?;
        let a = self.tos()?.as_bits()?;
        if shift < 0 {
            return Err(VmError::Invariant("negative shift count".to_string()));
        }
        self.set_tos(Value::Int(signed32(a >> shift.min(63))))
    }

    /// Unsigned right shift: reduce to unsigned 32-bit, then shift.
    pub(super) fn op_urshift(&mut self) -> Result<(), VmError> {
        let shift = self.pop()?.as_bits()?;
        let a = self.tos()?.as_bits()?;
        if shift < 0 {
            return Err(VmError::Invariant("negative shift count".to_string()));
        }
        let reduced = a as u32;
        let result = if shift >= 32 {
            0
        } else {
            (reduced >> shift) as i64
        };
        self.set_tos(Value::Int(result))
    }
}
