//! The runtime `Value` tagged union (spec §3.2).
//!
//! Grounded on the teacher's `Value` enum (`crates/monty/src/value.rs`):
//! small scalars inline, everything else a `Ref(HeapId)` into the arena.
//! The teacher leans on Rust's own `Rc` for its heap; this crate keeps the
//! arena explicit (see [`crate::heap`]) so refcounts are the atomic
//! counters spec §3.2 calls for rather than `Rc`'s non-atomic ones.
//!
//! `Value` does not implement `Clone` the ordinary way: a bare struct
//! clone would duplicate a `HeapId` without touching its refcount, so
//! every caller that needs a second handle to a heap value must go
//! through [`Value::clone_with_heap`], and every caller done with one
//! must call [`Value::drop_with_heap`]. This mirrors the teacher's own
//! discipline of running every `Value` drop through `Heap::dec_ref`.

use crate::heap::{Heap, HeapId};
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    I32(i32),
    I64(i64),
    F64(f64),
}

impl NumberValue {
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, Self::I32(_) | Self::I64(_))
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::I32(v) => f64::from(v),
            Self::I64(v) => v as f64,
            Self::F64(v) => v,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::I32(v) => i64::from(v),
            Self::I64(v) => v,
            Self::F64(v) => v as i64,
        }
    }
}

/// A runtime value (spec §3.2). `Ref` covers `STRING`/`ARRAY`/`OBJECT`/
/// `BUFFER`/`FILE`/`FUNCTION`/`CLOSURE` uniformly: which kind it is is
/// determined by the [`crate::heap::HeapData`] variant at that id.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(NumberValue),
    Bool(bool),
    Null,
    Rune(char),
    Type(Type),
    /// `PTR(opaque)` (spec §3.2): an untyped handle for FFI. By-value like
    /// every other non-`Ref` variant — no heap slot, no refcount — and
    /// opaque to everything but the native collaborator it came from or is
    /// headed to.
    Ptr(usize),
    Ref(HeapId),
}

impl Value {
    #[must_use]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// `to_bool` per spec §4.1: numeric kinds are nonzero, `NULL` is always
    /// false, and a `STRING` is falsy exactly when it is empty. This needs
    /// `heap` only for the `STRING` case; callers without a heap handle (an
    /// empty-array-free context) can use [`Self::is_truthy`] instead.
    #[must_use]
    pub fn to_bool(&self, heap: &Heap) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Null => false,
            Self::Number(n) => n.as_f64() != 0.0,
            Self::Ref(id) => match heap.get(*id) {
                crate::heap::HeapData::Str(s) => !s.data.is_empty(),
                _ => true,
            },
            Self::Rune(_) | Self::Type(_) | Self::Ptr(_) => true,
        }
    }

    /// Heap-free truthiness check. Treats every `Ref` as truthy, including
    /// an empty string; use [`Self::to_bool`] wherever a `Heap` is at hand
    /// so empty-string falsiness (spec §4.1) is honored.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Null => false,
            Self::Number(n) => n.as_f64() != 0.0,
            Self::Rune(_) | Self::Type(_) | Self::Ref(_) | Self::Ptr(_) => true,
        }
    }

    #[must_use]
    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Self::Number(n) if n.is_integer() => "integer",
            Self::Number(_) => "float",
            Self::Bool(_) => "bool",
            Self::Null => "null",
            Self::Rune(_) => "rune",
            Self::Type(_) => "type",
            Self::Ptr(_) => "ptr",
            Self::Ref(id) => match heap.get(*id) {
                crate::heap::HeapData::Str(_) => "string",
                crate::heap::HeapData::Array(_) => "array",
                crate::heap::HeapData::Object(_) => "object",
                crate::heap::HeapData::Buffer(_) => "buffer",
                crate::heap::HeapData::File(_) => "file",
                crate::heap::HeapData::Function(_) => "function",
            },
        }
    }

    /// Produces a second handle to the same value, bumping the heap
    /// refcount if this is a `Ref`. This is the only sanctioned way to
    /// duplicate a `Value` that might be heap-backed.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &Heap) -> Self {
        if let Self::Ref(id) = self {
            heap.inc_ref(*id);
        }
        self.clone()
    }

    /// Releases this value's claim on the heap, if any. Must be called
    /// exactly once per `Value` that was ever produced by `clone_with_heap`
    /// or `Heap::allocate` and is going out of scope (spec §3.2, §8
    /// invariant 2: refcounts balance to zero at program end).
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }
}

/// Free functions implementing spec §4.1's coercion table: the single
/// point where a `Value` crosses from one numeric/representational kind
/// into another. Grounded on the teacher's `coerce`-style helpers in
/// `value.rs`, which centralize every numeric downcast instead of
/// scattering `as` casts through the evaluator.
pub mod coerce {
    use super::{NumberValue, Value};
    use crate::error::RuntimeError;
    use crate::heap::{Heap, HeapData};

    pub fn to_bool(value: &Value, heap: &Heap) -> bool {
        value.to_bool(heap)
    }

    /// Spec §4.1's numeric-coercion table: every numeric kind, `BOOL`
    /// (0/1), `STRING` (parsed), and `NULL` (0) convert; nothing else does.
    pub fn to_i32(value: &Value, heap: &Heap) -> Result<i32, RuntimeError> {
        Ok(to_i64(value, heap)? as i32)
    }

    pub fn to_i64(value: &Value, heap: &Heap) -> Result<i64, RuntimeError> {
        match value {
            Value::Number(n) => Ok(n.as_i64()),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Null => Ok(0),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => s.data.trim().parse::<i64>().map_err(|_| {
                    RuntimeError::type_mismatch(format!("cannot coerce \"{}\" to an integer", s.data))
                }),
                other => Err(RuntimeError::type_mismatch(format!("cannot coerce {other:?} to an integer"))),
            },
            other => Err(RuntimeError::type_mismatch(format!(
                "cannot coerce {other:?} to an integer"
            ))),
        }
    }

    pub fn to_f64(value: &Value, heap: &Heap) -> Result<f64, RuntimeError> {
        match value {
            Value::Number(n) => Ok(n.as_f64()),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Null => Ok(0.0),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => s.data.trim().parse::<f64>().map_err(|_| {
                    RuntimeError::type_mismatch(format!("cannot coerce \"{}\" to a float", s.data))
                }),
                other => Err(RuntimeError::type_mismatch(format!("cannot coerce {other:?} to a float"))),
            },
            other => Err(RuntimeError::type_mismatch(format!(
                "cannot coerce {other:?} to a float"
            ))),
        }
    }

    /// Renders a value for `print`/string-interpolation (spec §4.5).
    /// Unlike the arithmetic coercions this never fails: every value has a
    /// textual form.
    pub fn to_display_string(value: &Value, heap: &Heap) -> String {
        match value {
            Value::Number(NumberValue::I32(v)) => v.to_string(),
            Value::Number(NumberValue::I64(v)) => v.to_string(),
            Value::Number(NumberValue::F64(v)) => format_float(*v),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Rune(c) => c.to_string(),
            Value::Type(t) => t.to_string(),
            Value::Ptr(addr) => format!("<ptr {addr:#x}>"),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => s.data.clone(),
                HeapData::Array(arr) => {
                    let parts: Vec<String> = arr.items.iter().map(|v| to_display_string(v, heap)).collect();
                    format!("[{}]", parts.join(", "))
                }
                HeapData::Object(obj) => {
                    let parts: Vec<String> = obj
                        .fields
                        .iter()
                        .map(|(k, v)| format!("{k}: {}", to_display_string(v, heap)))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                HeapData::Buffer(buf) => format!("<buffer {} bytes>", buf.bytes.len()),
                HeapData::File(file) => format!("<file {:?} open={}>", file.path, file.is_open),
                HeapData::Function(func) => match &func.name {
                    Some(name) => format!("<function {name}>"),
                    None => "<function>".to_string(),
                },
            },
        }
    }

    fn format_float(v: f64) -> String {
        if v.fract() == 0.0 && v.is_finite() {
            format!("{v:.1}")
        } else {
            v.to_string()
        }
    }
}
