//! Builtin-function catalog and the `print`-output collaborator (spec §4.5).
//!
//! `PrintWriter` and its `StdPrint`/`CollectStringPrint` implementations
//! are grounded directly on the sibling `ouros` interpreter's `io.rs`
//! (same author's other example in this retrieval pack): a minimal
//! two-method trait (`stdout_write`/`stdout_push`) so a test harness can
//! swap in a string collector without touching the evaluator.
//!
//! `NativeRegistry` is this crate's equivalent of the teacher's
//! `Builtins` enum (`crates/monty/src/builtins/mod.rs`): a single dispatch
//! surface the evaluator calls through for every `BUILTIN_FN`. Spec §4.5
//! marks the runtime library (time/file/FFI) a black box, so those
//! catalog entries go through `NativeRegistry`'s default method rather
//! than a hand-written implementation.

use std::borrow::Cow;

use crate::error::RuntimeError;
use crate::heap::{Heap, HemArray, HeapData};
use crate::value::{coerce, NumberValue, Value};

/// Output sink for the `print` builtin (spec §4.5). Kept as a trait, not
/// a hardcoded stdout write, so tests can capture output instead of
/// racing the process's real stdout.
pub trait PrintWriter {
    fn stdout_write(&mut self, output: Cow<'_, str>);
    fn stdout_push(&mut self, end: char);
}

/// Default writer: buffers per line and flushes to stdout on drop.
#[derive(Debug, Default)]
pub struct StdPrint {
    buffer: String,
}

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        self.buffer.push_str(&output);
    }

    fn stdout_push(&mut self, end: char) {
        self.buffer.push(end);
    }
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        print!("{}", self.buffer);
    }
}

/// Collects `print` output into a string, for tests and embedders.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        self.0.push_str(&output);
    }

    fn stdout_push(&mut self, end: char) {
        self.0.push(end);
    }
}

/// Black-box native functions the (out-of-scope) runtime library would
/// supply: time, file I/O, FFI. Spec §4.5 explicitly treats these as a
/// collaborator the evaluator calls through without knowing their
/// internals; the default here is the one behavior this crate *does*
/// own — a `Fatal` error naming the missing function, so an embedder
/// that hasn't wired up a real library gets a clear message instead of
/// a silent no-op.
pub trait NativeRegistry {
    fn call_native(&mut self, name: &str, args: &[Value], heap: &mut Heap) -> Result<Value, RuntimeError> {
        let _ = (args, heap);
        Err(RuntimeError::Fatal(format!(
            "native function '{name}' has no registered implementation"
        )))
    }
}

/// A `NativeRegistry` with nothing wired up; every call fails with the
/// default `Fatal` message. Suitable for tests that don't exercise the
/// time/file/FFI surface.
#[derive(Debug, Default)]
pub struct NoNatives;

impl NativeRegistry for NoNatives {}

/// Names of functions implemented directly in this crate (spec §4.5:
/// `print`, `len`, `type_of`, and the array/string method families).
/// Anything not in this list falls through to [`NativeRegistry`].
///
/// Uses strum's `EnumString`/`Display` derives for the name <-> variant
/// mapping, the same way the teacher's `BuiltinsFunctions`
/// (`crates/monty/src/builtins/mod.rs`) turns a builtin's source-text name
/// into its dispatch variant and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Builtin {
    Print,
    Len,
    TypeOf,
    Push,
    Pop,
    Shift,
    Unshift,
    Insert,
    Remove,
    Get,
    Set,
    First,
    Last,
    Clear,
    Contains,
    Slice,
    Join,
    Concat,
    Reverse,
}

impl Builtin {
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Invokes this builtin. `map`/`filter`/`reduce` are deliberately not
    /// here: spec §4.5 requires them to call back into the evaluator's own
    /// `CALL` dispatch for their callback argument, so they are
    /// implemented directly in [`crate::interpreter::Evaluator`] instead
    /// of this self-contained table.
    pub fn call(
        self,
        args: &[Value],
        heap: &mut Heap,
        print: &mut dyn PrintWriter,
    ) -> Result<Value, RuntimeError> {
        match self {
            Self::Print => {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        print.stdout_push(' ');
                    }
                    print.stdout_write(Cow::Owned(coerce::to_display_string(arg, heap)));
                }
                print.stdout_push('\n');
                Ok(Value::Null)
            }
            Self::Len => len(args, heap),
            Self::TypeOf => {
                let arg = arg0(args)?;
                let name = arg.type_name(heap).to_string();
                Ok(Value::Ref(heap.allocate(HeapData::Str(crate::heap::HemString::new(name)))))
            }
            Self::Push => {
                let arg = arg0(args)?;
                let id = arg.ref_id().ok_or_else(|| RuntimeError::type_mismatch("expected an array"))?;
                for pushed in &args[1..] {
                    let actual = pushed.type_name(heap);
                    let HeapData::Array(arr) = heap.get(id) else {
                        return Err(RuntimeError::type_mismatch("expected an array"));
                    };
                    check_element_type(arr, actual)?;
                }
                // Builtins receive `args` on loan from the caller, which
                // drops its own copies after this call returns, so storing
                // one of them long-term needs its own bumped handle.
                let retained: Vec<Value> = args[1..].iter().map(|v| v.clone_with_heap(heap)).collect();
                let HeapData::Array(arr) = heap.get_mut(id) else {
                    return Err(RuntimeError::type_mismatch("expected an array"));
                };
                arr.items.extend(retained);
                Ok(Value::Number(NumberValue::I64(arr.items.len() as i64)))
            }
            Self::Pop => mutate_array(args, heap, |arr, _| Ok(arr.items.pop().unwrap_or(Value::Null))),
            Self::Shift => mutate_array(args, heap, |arr, _| {
                Ok(if arr.items.is_empty() {
                    Value::Null
                } else {
                    arr.items.remove(0)
                })
            }),
            Self::Unshift => {
                let arg = arg0(args)?;
                let id = arg.ref_id().ok_or_else(|| RuntimeError::type_mismatch("expected an array"))?;
                let retained: Vec<Value> = args[1..].iter().map(|v| v.clone_with_heap(heap)).collect();
                let HeapData::Array(arr) = heap.get_mut(id) else {
                    return Err(RuntimeError::type_mismatch("expected an array"));
                };
                for (offset, v) in retained.into_iter().enumerate() {
                    arr.items.insert(offset, v);
                }
                Ok(Value::Number(NumberValue::I64(arr.items.len() as i64)))
            }
            Self::Insert => {
                let arg = arg0(args)?;
                let id = arg.ref_id().ok_or_else(|| RuntimeError::type_mismatch("insert() requires an array"))?;
                let idx = args.get(1).ok_or_else(|| RuntimeError::arity_mismatch("insert() requires an index"))?;
                let i = coerce::to_i64(idx, heap)?;
                let value = args
                    .get(2)
                    .cloned()
                    .ok_or_else(|| RuntimeError::arity_mismatch("insert() requires a value"))?;
                let actual = value.type_name(heap).to_string();
                // Validate the typed-array invariant and the (one-past-the-
                // end-permissive) bounds before touching any refcount, so a
                // rejected call never bumps then has to unwind one.
                let resolved = {
                    let HeapData::Array(arr) = heap.get(id) else {
                        return Err(RuntimeError::type_mismatch("insert() requires an array"));
                    };
                    check_element_type(arr, &actual)?;
                    resolve_insert_index(i, arr.items.len())?
                };
                let retained = value.clone_with_heap(heap);
                let HeapData::Array(arr) = heap.get_mut(id) else {
                    unreachable!("checked Array above");
                };
                arr.items.insert(resolved, retained);
                Ok(Value::Number(NumberValue::I64(arr.items.len() as i64)))
            }
            Self::Remove => {
                let idx = args
                    .get(1)
                    .ok_or_else(|| RuntimeError::arity_mismatch("remove() requires an index"))?;
                let i = coerce::to_i64(idx, heap)?;
                mutate_array(args, heap, |arr, _rest| {
                    let resolved = resolve_index(i, arr.items.len())?;
                    Ok(arr.items.remove(resolved))
                })
            }
            Self::Get => {
                let arg = arg0(args)?;
                let id = arg.ref_id().ok_or_else(|| RuntimeError::type_mismatch("get() requires an array"))?;
                let idx = args.get(1).ok_or_else(|| RuntimeError::arity_mismatch("get() requires an index"))?;
                let i = coerce::to_i64(idx, heap)?;
                let HeapData::Array(arr) = heap.get(id) else {
                    return Err(RuntimeError::type_mismatch("get() requires an array"));
                };
                let resolved = resolve_index(i, arr.items.len())?;
                Ok(arr.items[resolved].clone_with_heap(heap))
            }
            Self::Set => {
                let arg = arg0(args)?;
                let id = arg.ref_id().ok_or_else(|| RuntimeError::type_mismatch("set() requires an array"))?;
                let idx = args.get(1).ok_or_else(|| RuntimeError::arity_mismatch("set() requires an index"))?;
                let i = coerce::to_i64(idx, heap)?;
                let value = args
                    .get(2)
                    .cloned()
                    .ok_or_else(|| RuntimeError::arity_mismatch("set() requires a value"))?;
                let actual = value.type_name(heap).to_string();
                let resolved = {
                    let HeapData::Array(arr) = heap.get(id) else {
                        return Err(RuntimeError::type_mismatch("set() requires an array"));
                    };
                    check_element_type(arr, &actual)?;
                    resolve_index(i, arr.items.len())?
                };
                let retained = value.clone_with_heap(heap);
                let HeapData::Array(arr) = heap.get_mut(id) else {
                    unreachable!("checked Array above");
                };
                let old = std::mem::replace(&mut arr.items[resolved], retained);
                old.drop_with_heap(heap);
                Ok(Value::Bool(true))
            }
            Self::First => {
                let arg = arg0(args)?;
                let id = arg.ref_id().ok_or_else(|| RuntimeError::type_mismatch("expected an array"))?;
                let HeapData::Array(arr) = heap.get(id) else {
                    return Err(RuntimeError::type_mismatch("expected an array"));
                };
                Ok(arr.items.first().map(|v| v.clone_with_heap(heap)).unwrap_or(Value::Null))
            }
            Self::Last => {
                let arg = arg0(args)?;
                let id = arg.ref_id().ok_or_else(|| RuntimeError::type_mismatch("expected an array"))?;
                let HeapData::Array(arr) = heap.get(id) else {
                    return Err(RuntimeError::type_mismatch("expected an array"));
                };
                Ok(arr.items.last().map(|v| v.clone_with_heap(heap)).unwrap_or(Value::Null))
            }
            Self::Clear => mutate_array(args, heap, |arr, _| {
                arr.items.clear();
                Ok(Value::Null)
            }),
            Self::Contains => {
                let arg = arg0(args)?;
                let id = arg
                    .ref_id()
                    .ok_or_else(|| RuntimeError::type_mismatch("contains() requires an array"))?;
                let needle = args.get(1).cloned().unwrap_or(Value::Null);
                let HeapData::Array(arr) = heap.get(id) else {
                    return Err(RuntimeError::type_mismatch("contains() requires an array"));
                };
                Ok(Value::Bool(arr.items.iter().any(|v| values_shallow_eq(v, &needle))))
            }
            Self::Slice => {
                let arg = arg0(args)?;
                let id = arg
                    .ref_id()
                    .ok_or_else(|| RuntimeError::type_mismatch("slice() requires an array"))?;
                let start = args.get(1).map(|v| coerce::to_i64(v, heap)).transpose()?.unwrap_or(0);
                let HeapData::Array(arr) = heap.get(id) else {
                    return Err(RuntimeError::type_mismatch("slice() requires an array"));
                };
                let len = arr.items.len() as i64;
                let end = args.get(2).map(|v| coerce::to_i64(v, heap)).transpose()?.unwrap_or(len);
                let (start, end) = clamp_range(start, end, len);
                let sliced: Vec<Value> = arr.items[start..end].to_vec();
                let retained: Vec<Value> = sliced.iter().map(|v| v.clone_with_heap(heap)).collect();
                Ok(Value::Ref(heap.allocate(HeapData::Array(HemArray::untyped(retained)))))
            }
            Self::Concat => {
                let arg = arg0(args)?;
                let id = arg
                    .ref_id()
                    .ok_or_else(|| RuntimeError::type_mismatch("concat() requires an array"))?;
                let mut combined = match heap.get(id) {
                    HeapData::Array(arr) => arr.items.clone(),
                    _ => return Err(RuntimeError::type_mismatch("concat() requires an array")),
                };
                for other in &args[1..] {
                    let other_id = other
                        .ref_id()
                        .ok_or_else(|| RuntimeError::type_mismatch("concat() requires array arguments"))?;
                    match heap.get(other_id) {
                        HeapData::Array(arr) => combined.extend(arr.items.clone()),
                        _ => return Err(RuntimeError::type_mismatch("concat() requires array arguments")),
                    }
                }
                let retained: Vec<Value> = combined.iter().map(|v| v.clone_with_heap(heap)).collect();
                Ok(Value::Ref(heap.allocate(HeapData::Array(HemArray::untyped(retained)))))
            }
            Self::Reverse => mutate_array(args, heap, |arr, _| {
                arr.items.reverse();
                Ok(Value::Null)
            }),
            Self::Join => {
                let arg = arg0(args)?;
                let id = arg
                    .ref_id()
                    .ok_or_else(|| RuntimeError::type_mismatch("join() requires an array"))?;
                let sep = args
                    .get(1)
                    .map(|v| coerce::to_display_string(v, heap))
                    .unwrap_or_default();
                let HeapData::Array(arr) = heap.get(id) else {
                    return Err(RuntimeError::type_mismatch("join() requires an array"));
                };
                let parts: Vec<String> = arr.items.iter().map(|v| coerce::to_display_string(v, heap)).collect();
                Ok(Value::Ref(heap.allocate(HeapData::Str(crate::heap::HemString::new(
                    parts.join(&sep),
                )))))
            }
        }
    }
}

fn arg0(args: &[Value]) -> Result<Value, RuntimeError> {
    args.first()
        .cloned()
        .ok_or_else(|| RuntimeError::arity_mismatch("expected at least 1 argument, got 0"))
}

fn len(args: &[Value], heap: &Heap) -> Result<Value, RuntimeError> {
    let arg = arg0(args)?;
    let count = match &arg {
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => s.data.chars().count(),
            HeapData::Array(arr) => arr.items.len(),
            HeapData::Object(obj) => obj.fields.len(),
            HeapData::Buffer(buf) => buf.bytes.len(),
            HeapData::File(_) | HeapData::Function(_) => {
                return Err(RuntimeError::type_mismatch("len() not supported for this type"))
            }
        },
        _ => return Err(RuntimeError::type_mismatch("len() requires a string, array, or object")),
    };
    Ok(Value::Number(NumberValue::I64(count as i64)))
}

fn mutate_array(
    args: &[Value],
    heap: &mut Heap,
    f: impl FnOnce(&mut crate::heap::HemArray, &[Value]) -> Result<Value, RuntimeError>,
) -> Result<Value, RuntimeError> {
    let arg = arg0(args)?;
    let id = arg
        .ref_id()
        .ok_or_else(|| RuntimeError::type_mismatch("expected an array"))?;
    let HeapData::Array(arr) = heap.get_mut(id) else {
        return Err(RuntimeError::type_mismatch("expected an array"));
    };
    f(arr, &args[1..])
}

fn clamp_range(start: i64, end: i64, len: i64) -> (usize, usize) {
    let start = start.clamp(0, len) as usize;
    let end = end.clamp(0, len).max(start as i64) as usize;
    (start, end)
}

/// Bounds-checks a read/write index, allowing a negative index to count
/// back from the end (spec §4.4's `INDEX` rule: "negative -> error" for
/// bare `[]` indexing; `get`/`set`/`remove` apply the same resolution so a
/// program that mixes `xs[i]` and `xs.get(i)` sees consistent bounds).
fn resolve_index(i: i64, len: usize) -> Result<usize, RuntimeError> {
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(RuntimeError::IndexOutOfBounds { index: i, len });
    }
    Ok(resolved as usize)
}

/// `insert()` accepts one more position than `resolve_index` (inserting at
/// `len` appends), so it gets its own bounds check rather than reusing
/// `resolve_index` and special-casing the one-past-the-end position there.
fn resolve_insert_index(i: i64, len: usize) -> Result<usize, RuntimeError> {
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved as usize > len {
        return Err(RuntimeError::IndexOutOfBounds { index: i, len });
    }
    Ok(resolved as usize)
}

/// Spec §3.2 typed-array invariant: "every push/insert/set must match that
/// tag or fail".
fn check_element_type(arr: &crate::heap::HemArray, actual: &str) -> Result<(), RuntimeError> {
    if let Some(elem_type) = &arr.element_type {
        let matches = elem_type.to_string() == actual || (elem_type.is_numeric() && matches!(actual, "integer" | "float"));
        if !matches {
            return Err(RuntimeError::type_mismatch(format!(
                "cannot assign {actual} into array of {elem_type}"
            )));
        }
    }
    Ok(())
}

/// Shallow equality used by `contains()`: scalars compare by value, heap
/// references compare by identity (spec §9's resolution for reference
/// types: Hemlock has no deep-equality operator). Numeric kinds compare
/// after widening (spec §4.1), matching `Evaluator::values_equal`.
fn values_shallow_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Ref(x), Value::Ref(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
