//! Reference-counted heap arena (spec §3.2, §5).
//!
//! Grounded on the teacher's `Heap`/`HeapData` arena (`src/heap.rs`): a
//! flat `Vec<Option<HeapEntry>>` that never reuses an id within a run,
//! with `dec_ref` walking an explicit stack instead of recursing so large
//! `ARRAY` cascades can't blow the native stack.
//!
//! Unlike the teacher, the refcount field here is an `AtomicUsize` (spec
//! §3.2: "Every heap entity has `refcount ≥ 1`... stored atomically as a
//! safety hedge", §5: "for any embedding that hands values to another
//! thread between evaluator ticks"). The evaluator itself never crosses a
//! thread boundary, so `Ordering::Relaxed` is sufficient everywhere.

use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

use crate::value::Value;

/// Stable identifier for an entry in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(u32);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A UTF-8 string heap entity. Spec §3.2 calls for length-prefixed,
/// NUL-terminated storage with `capacity >= length + 1`; `String`'s own
/// invariants already guarantee a valid UTF-8 byte buffer with a known
/// length, so the NUL-termination requirement (aimed at the C backend's
/// wire representation) is satisfied lazily by [`HemString::as_c_str`]
/// rather than carried on every mutation.
#[derive(Debug, Clone, Default)]
pub struct HemString {
    pub data: String,
}

impl HemString {
    #[must_use]
    pub fn new(data: String) -> Self {
        Self { data }
    }

    /// NUL-terminated byte view for the (out-of-scope) C backend / FFI
    /// surface. Allocates; not on any hot path.
    #[must_use]
    pub fn as_c_str(&self) -> Vec<u8> {
        let mut bytes = self.data.clone().into_bytes();
        bytes.push(0);
        bytes
    }
}

/// A (possibly typed) array heap entity.
#[derive(Debug, Clone, Default)]
pub struct HemArray {
    pub items: Vec<Value>,
    /// `Some(t)` for a typed array: every push/insert/set must match `t`
    /// (spec §3.2 invariant). `None` for an untyped array.
    pub element_type: Option<crate::types::Type>,
}

impl HemArray {
    #[must_use]
    pub fn untyped(items: Vec<Value>) -> Self {
        Self {
            items,
            element_type: None,
        }
    }

    #[must_use]
    pub fn typed(items: Vec<Value>, element_type: crate::types::Type) -> Self {
        Self {
            items,
            element_type: Some(element_type),
        }
    }
}

/// An object heap entity: an ordered field map (spec §3.2 `OBJECT`).
///
/// Uses `IndexMap` to preserve insertion order, matching the teacher's
/// `Dict` rationale ("preserve insertion order (matching Python 3.7+
/// behavior)") even though Hemlock objects are keyed by plain field names
/// rather than arbitrary hashable values.
#[derive(Debug, Clone, Default)]
pub struct HemObject {
    pub fields: IndexMap<String, Value>,
}

/// Raw byte region for FFI (spec §3.2 `BUFFER`).
#[derive(Debug, Clone, Default)]
pub struct HemBuffer {
    pub bytes: Vec<u8>,
}

/// An open file handle (spec §3.2 `FILE`). The evaluator never opens one
/// itself (file I/O lives in the out-of-scope runtime library); this
/// exists purely as a heap-entity target for `Value::FILE` values handed
/// in from native calls.
#[derive(Debug, Clone)]
pub struct HemFileHandle {
    pub path: String,
    pub is_open: bool,
}

/// A user-defined function's captured state, referenced by `Value::FUNCTION`.
///
/// The body is shared (`Rc`) rather than cloned per call; the captured
/// environment is the evaluator's own parent-pointer chain (spec §4.2,
/// §9: "the evaluator ... uses parent-pointer chains", making the
/// resolver's capture-set bookkeeping irrelevant here but still computed
/// for the C backend).
#[derive(Debug, Clone)]
pub struct HemFunction {
    pub name: Option<String>,
    pub param_names: Vec<String>,
    pub rest_param: Option<String>,
    pub body: std::rc::Rc<Vec<crate::ast::StmtNode>>,
    pub closure: crate::environment::EnvHandle,
}

/// Heap-allocated payload kinds. One variant per spec §3.2 heap entity
/// (`String`, `Array`, `Object`, `Buffer`, `FileHandle`, `Function`); a
/// `Closure` in this design is just a `HemFunction` whose `closure` field
/// is non-root, so there is no separate heap-data variant for it (see
/// DESIGN.md).
#[derive(Debug, Clone)]
pub enum HeapData {
    Str(HemString),
    Array(HemArray),
    Object(HemObject),
    Buffer(HemBuffer),
    File(HemFileHandle),
    Function(HemFunction),
}

struct HeapEntry {
    refcount: AtomicUsize,
    data: HeapData,
}

/// The refcounted arena backing every `Value::STRING/ARRAY/OBJECT/BUFFER/
/// FILE/FUNCTION/CLOSURE`.
#[derive(Default)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new heap entry with `refcount = 1`.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let id = self.entries.len();
        self.entries.push(Some(HeapEntry {
            refcount: AtomicUsize::new(1),
            data,
        }));
        HeapId(id as u32)
    }

    pub fn inc_ref(&self, id: HeapId) {
        let entry = self.entries[id.index()].as_ref().expect("Heap::inc_ref: entry freed");
        entry.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the refcount, freeing the entry (and cascading into any
    /// `ARRAY`/`OBJECT` children) once it reaches zero. Uses an explicit
    /// worklist instead of recursion (spec §3.2: "`Array` cascades release
    /// over its elements").
    pub fn dec_ref(&mut self, id: HeapId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let entry = self.entries[current.index()]
                .as_ref()
                .expect("Heap::dec_ref: entry freed");
            let prev = entry.refcount.fetch_sub(1, Ordering::Relaxed);
            if prev > 1 {
                continue;
            }
            let freed = self.entries[current.index()].take().expect("already checked Some");
            enqueue_children(&freed.data, &mut stack);
        }
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.entries[id.index()].as_ref().expect("Heap::get: entry freed").data
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.entries[id.index()].as_mut().expect("Heap::get_mut: entry freed").data
    }

    #[must_use]
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entries[id.index()]
            .as_ref()
            .expect("Heap::refcount: entry freed")
            .refcount
            .load(Ordering::Relaxed)
    }

    /// Number of still-live entries. Used by the refcount-balance test
    /// (spec §8 invariant 2).
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

fn enqueue_children(data: &HeapData, stack: &mut Vec<HeapId>) {
    match data {
        HeapData::Array(arr) => {
            for item in &arr.items {
                if let Some(id) = item.ref_id() {
                    stack.push(id);
                }
            }
        }
        HeapData::Object(obj) => {
            for value in obj.fields.values() {
                if let Some(id) = value.ref_id() {
                    stack.push(id);
                }
            }
        }
        HeapData::Str(_) | HeapData::Buffer(_) | HeapData::File(_) | HeapData::Function(_) => {}
    }
}
