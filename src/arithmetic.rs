//! The operator table: an external collaborator the engine delegates every
//! binary/unary operation to, so a host can swap numeric coercion rules
//! (e.g. strict-numeric vs. JS-like string coercion) without touching the
//! interpreter.

use std::cmp::Ordering;
use std::rc::Rc;

use regex::Regex;

use crate::error::{JexlError, JexlResult, Position};
use crate::types::{Value, ValueRange};

/// The binary/unary operators [`Arithmetic::try_overload`] and
/// [`Arithmetic::try_assign_overload`] are asked about before the default
/// rules run, letting a host intercept e.g. `Duration + Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Neg,
    Not,
    BitNot,
}

/// The full operator surface a [`Value`] needs: arithmetic, comparisons,
/// boolean coercion, and the handful of collection/range builders the
/// grammar routes through the arithmetic provider rather than hardcoding
/// (so a host can represent, say, arrays as something other than `Vec`).
pub trait Arithmetic {
    fn add(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn sub(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn mul(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn div(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn rem(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn bit_and(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn bit_or(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn bit_xor(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn shl(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn shr(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value>;
    fn neg(&self, v: &Value, pos: Position) -> JexlResult<Value>;
    fn bit_not(&self, v: &Value, pos: Position) -> JexlResult<Value>;

    fn equals(&self, l: &Value, r: &Value) -> bool;
    fn compare(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Ordering>;

    /// Truthiness used by `if`/`while`/`&&`/`||`/ternary conditions.
    fn to_boolean(&self, v: &Value) -> bool;
    /// Truthiness used by the `?:`/predicate forms that treat `null` and
    /// empty collections as false in addition to `to_boolean`'s rules.
    fn test_predicate(&self, v: &Value) -> bool {
        match v.flatten() {
            Value::Null => false,
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Str(s) => !s.is_empty(),
            other => self.to_boolean(&other),
        }
    }

    /// Narrow numeric arguments in place before a call (e.g. `Float` ->
    /// `Int` when the value is integral and the callee expects integers).
    /// Default: no-op, since narrowing is a host/Introspection concern in
    /// the default configuration.
    fn narrow_arguments(&self, _args: &mut [Value]) {}

    fn range(&self, l: &Value, r: &Value, inclusive: bool, pos: Position) -> JexlResult<Value> {
        let (Some(start), Some(end)) = (l.as_int(), r.as_int()) else {
            return Err(Box::new(JexlError::Operator(
                "range bounds must be integers".into(),
                pos,
            )));
        };
        Ok(Value::Range(Rc::new(ValueRange { start, end, inclusive })))
    }

    fn contains(&self, container: &Value, item: &Value, pos: Position) -> JexlResult<bool>;
    fn starts_with(&self, s: &Value, prefix: &Value, pos: Position) -> JexlResult<bool>;
    fn ends_with(&self, s: &Value, suffix: &Value, pos: Position) -> JexlResult<bool>;
    fn matches(&self, s: &Value, pattern: &Value, pos: Position) -> JexlResult<bool>;

    /// Return `Some(result)` to short-circuit the default rule for `op`
    /// (e.g. a host numeric type overloading `+`); `None` falls through to
    /// the provider's built-in handling.
    fn try_overload(&self, _op: Operator, _l: &Value, _r: &Value) -> Option<JexlResult<Value>> {
        None
    }

    fn try_assign_overload(
        &self,
        _op: Operator,
        _current: &Value,
        _rhs: &Value,
    ) -> Option<JexlResult<Value>> {
        None
    }
}

fn op_err(msg: impl Into<String>, pos: Position) -> Box<JexlError> {
    Box::new(JexlError::Operator(msg.into(), pos))
}

/// Numeric tower: two ints stay int; anything else involving a float
/// promotes to float. Used by both [`DefaultArithmetic`] and
/// [`StrictArithmetic`].
enum Num {
    Int(i64),
    Float(f64),
}

fn coerce_numeric(v: &Value, strict_strings: bool, pos: Position) -> JexlResult<Num> {
    match v.flatten() {
        Value::Int(i) => Ok(Num::Int(i)),
        Value::Float(f) => Ok(Num::Float(f)),
        Value::Bool(b) => Ok(Num::Int(b as i64)),
        Value::Str(s) if strict_strings => {
            if let Ok(i) = s.parse::<i64>() {
                Ok(Num::Int(i))
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(Num::Float(f))
            } else {
                Err(op_err(format!("'{s}' is not numeric"), pos))
            }
        }
        other => Err(op_err(format!("{} is not numeric", other.type_name()), pos)),
    }
}

macro_rules! numeric_binop {
    ($name:ident, $int_op:tt, $float_op:tt, $strict_strings:expr) => {
        fn $name(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
            match (coerce_numeric(l, $strict_strings, pos)?, coerce_numeric(r, $strict_strings, pos)?) {
                (Num::Int(a), Num::Int(b)) => Ok(Value::Int(a $int_op b)),
                (a, b) => {
                    let a = match a { Num::Int(i) => i as f64, Num::Float(f) => f };
                    let b = match b { Num::Int(i) => i as f64, Num::Float(f) => f };
                    Ok(Value::Float(a $float_op b))
                }
            }
        }
    };
}

/// The loose, JS-like default: `+` concatenates when either side is a
/// string, comparisons coerce, division always produces a float unless both
/// operands are integers and divide evenly.
#[derive(Debug, Default)]
pub struct DefaultArithmetic;

impl DefaultArithmetic {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, pattern: &str, pos: Position) -> JexlResult<Regex> {
        Regex::new(pattern).map_err(|e| op_err(format!("invalid regex '{pattern}': {e}"), pos))
    }
}

impl Arithmetic for DefaultArithmetic {
    fn add(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        match (l.flatten(), r.flatten()) {
            (Value::Str(a), b) => Ok(Value::string(format!("{a}{b}"))),
            (a, Value::Str(b)) => Ok(Value::string(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => {
                let mut v = a.borrow().clone();
                v.extend(b.borrow().iter().cloned());
                Ok(Value::array(v))
            }
            _ => self.numeric_add(l, r, pos),
        }
    }

    fn sub(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        self.sub_impl(l, r, pos)
    }
    fn mul(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        self.mul_impl(l, r, pos)
    }
    fn div(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        match (coerce_numeric(l, true, pos)?, coerce_numeric(r, true, pos)?) {
            (Num::Int(_), Num::Int(0)) => Err(op_err("division by zero", pos)),
            (Num::Int(a), Num::Int(b)) if a % b == 0 => Ok(Value::Int(a / b)),
            (a, b) => {
                let a = match a { Num::Int(i) => i as f64, Num::Float(f) => f };
                let b = match b { Num::Int(i) => i as f64, Num::Float(f) => f };
                Ok(Value::Float(a / b))
            }
        }
    }
    fn rem(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        match (coerce_numeric(l, true, pos)?, coerce_numeric(r, true, pos)?) {
            (Num::Int(_), Num::Int(0)) => Err(op_err("division by zero", pos)),
            (Num::Int(a), Num::Int(b)) => Ok(Value::Int(a % b)),
            (a, b) => {
                let a = match a { Num::Int(i) => i as f64, Num::Float(f) => f };
                let b = match b { Num::Int(i) => i as f64, Num::Float(f) => f };
                Ok(Value::Float(a % b))
            }
        }
    }
    fn bit_and(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        Ok(Value::Int(int_of(l, pos)? & int_of(r, pos)?))
    }
    fn bit_or(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        Ok(Value::Int(int_of(l, pos)? | int_of(r, pos)?))
    }
    fn bit_xor(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        Ok(Value::Int(int_of(l, pos)? ^ int_of(r, pos)?))
    }
    fn shl(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        Ok(Value::Int(int_of(l, pos)?.wrapping_shl(int_of(r, pos)? as u32)))
    }
    fn shr(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        Ok(Value::Int(int_of(l, pos)?.wrapping_shr(int_of(r, pos)? as u32)))
    }
    fn neg(&self, v: &Value, pos: Position) -> JexlResult<Value> {
        match coerce_numeric(v, true, pos)? {
            Num::Int(i) => Ok(Value::Int(-i)),
            Num::Float(f) => Ok(Value::Float(-f)),
        }
    }
    fn bit_not(&self, v: &Value, pos: Position) -> JexlResult<Value> {
        Ok(Value::Int(!int_of(v, pos)?))
    }

    fn equals(&self, l: &Value, r: &Value) -> bool {
        match (l.flatten(), r.flatten()) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => a as f64 == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| self.equals(x, y))
            }
            _ => false,
        }
    }

    fn compare(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Ordering> {
        match (l.flatten(), r.flatten()) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(&b)),
            _ => {
                let a = match coerce_numeric(l, true, pos)? { Num::Int(i) => i as f64, Num::Float(f) => f };
                let b = match coerce_numeric(r, true, pos)? { Num::Int(i) => i as f64, Num::Float(f) => f };
                a.partial_cmp(&b).ok_or_else(|| op_err("NaN is not comparable", pos))
            }
        }
    }

    fn to_boolean(&self, v: &Value) -> bool {
        match v.flatten() {
            Value::Null => false,
            Value::Bool(b) => b,
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    fn contains(&self, container: &Value, item: &Value, pos: Position) -> JexlResult<bool> {
        match container.flatten() {
            Value::Array(a) => Ok(a.borrow().iter().any(|v| self.equals(v, item))),
            Value::Map(m) => {
                if let Some(key) = item.as_str() {
                    Ok(m.borrow().contains_key(key.as_ref()))
                } else {
                    Ok(false)
                }
            }
            Value::Str(s) => {
                let needle = item.as_str().ok_or_else(|| op_err("'in' on string needs a string", pos))?;
                Ok(s.contains(needle.as_ref()))
            }
            Value::Range(range) => {
                let n = item.as_int().ok_or_else(|| op_err("'in' on range needs an integer", pos))?;
                Ok(range.contains(n))
            }
            other => Err(op_err(format!("cannot test 'in' on {}", other.type_name()), pos)),
        }
    }

    fn starts_with(&self, s: &Value, prefix: &Value, pos: Position) -> JexlResult<bool> {
        let s = s.as_str().ok_or_else(|| op_err("^= needs a string", pos))?;
        let p = prefix.as_str().ok_or_else(|| op_err("^= needs a string", pos))?;
        Ok(s.starts_with(p.as_ref()))
    }

    fn ends_with(&self, s: &Value, suffix: &Value, pos: Position) -> JexlResult<bool> {
        let s = s.as_str().ok_or_else(|| op_err("$= needs a string", pos))?;
        let p = suffix.as_str().ok_or_else(|| op_err("$= needs a string", pos))?;
        Ok(s.ends_with(p.as_ref()))
    }

    fn matches(&self, s: &Value, pattern: &Value, pos: Position) -> JexlResult<bool> {
        let s = s.as_str().ok_or_else(|| op_err("=~ needs a string operand", pos))?;
        let pattern = pattern.as_str().ok_or_else(|| op_err("=~ needs a string/regex pattern", pos))?;
        Ok(self.compile(&pattern, pos)?.is_match(&s))
    }
}

impl DefaultArithmetic {
    numeric_binop!(numeric_add, +, +, true);
    numeric_binop!(sub_impl, -, -, true);
    numeric_binop!(mul_impl, *, *, true);
}

fn int_of(v: &Value, pos: Position) -> JexlResult<i64> {
    v.as_int().ok_or_else(|| op_err(format!("{} is not an integer", v.type_name()), pos))
}

/// Numeric-only variant: `'1' + 2` is a type error, not string
/// concatenation — the "strict arithmetic" mode from the end-to-end scenario
/// table (`evaluate("'1' + 2")` returning `3` rather than `"12"`).
#[derive(Debug, Default)]
pub struct StrictArithmetic {
    inner: DefaultArithmetic,
}

impl StrictArithmetic {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Arithmetic for StrictArithmetic {
    fn add(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> {
        if matches!(l.flatten(), Value::Array(_)) || matches!(r.flatten(), Value::Array(_)) {
            return self.inner.add(l, r, pos);
        }
        self.inner.numeric_add(l, r, pos)
    }
    fn sub(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.sub(l, r, pos) }
    fn mul(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.mul(l, r, pos) }
    fn div(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.div(l, r, pos) }
    fn rem(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.rem(l, r, pos) }
    fn bit_and(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.bit_and(l, r, pos) }
    fn bit_or(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.bit_or(l, r, pos) }
    fn bit_xor(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.bit_xor(l, r, pos) }
    fn shl(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.shl(l, r, pos) }
    fn shr(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Value> { self.inner.shr(l, r, pos) }
    fn neg(&self, v: &Value, pos: Position) -> JexlResult<Value> { self.inner.neg(v, pos) }
    fn bit_not(&self, v: &Value, pos: Position) -> JexlResult<Value> { self.inner.bit_not(v, pos) }
    fn equals(&self, l: &Value, r: &Value) -> bool { self.inner.equals(l, r) }
    fn compare(&self, l: &Value, r: &Value, pos: Position) -> JexlResult<Ordering> { self.inner.compare(l, r, pos) }
    fn to_boolean(&self, v: &Value) -> bool { self.inner.to_boolean(v) }
    fn contains(&self, container: &Value, item: &Value, pos: Position) -> JexlResult<bool> { self.inner.contains(container, item, pos) }
    fn starts_with(&self, s: &Value, prefix: &Value, pos: Position) -> JexlResult<bool> { self.inner.starts_with(s, prefix, pos) }
    fn ends_with(&self, s: &Value, suffix: &Value, pos: Position) -> JexlResult<bool> { self.inner.ends_with(s, suffix, pos) }
    fn matches(&self, s: &Value, pattern: &Value, pos: Position) -> JexlResult<bool> { self.inner.matches(s, pattern, pos) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_add_concatenates_strings() {
        let a = DefaultArithmetic::new();
        let v = a.add(&Value::string("1"), &Value::Int(2), Position::NONE).unwrap();
        assert_eq!(v.to_string(), "12");
    }

    #[test]
    fn strict_add_is_numeric() {
        let a = StrictArithmetic::new();
        let v = a.add(&Value::string("1"), &Value::Int(2), Position::NONE).unwrap();
        assert!(matches!(v, Value::Int(3)));
    }

    #[test]
    fn division_by_zero_errors() {
        let a = DefaultArithmetic::new();
        assert!(a.div(&Value::Int(1), &Value::Int(0), Position::NONE).is_err());
    }

    #[test]
    fn integer_division_stays_integer_when_even() {
        let a = DefaultArithmetic::new();
        let v = a.div(&Value::Int(6), &Value::Int(3), Position::NONE).unwrap();
        assert!(matches!(v, Value::Int(2)));
    }
}
