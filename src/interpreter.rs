//! Tree-walking evaluator (spec §4.4) and the `run_program` driver (spec §6).
//!
//! Grounded on the teacher's `run.rs`/`run_frame.rs` split: a pipeline
//! function drives resolve → infer → evaluate and maps whichever stage
//! fails onto a tagged top-level error (here `HemlockError`), while the
//! evaluator itself threads a `ControlFlow` signal up through statement
//! execution the way the teacher's `RunResult<Option<FrameExit>>` does
//! for `return`/`break`/`continue` propagation.

use crate::ast::{BinaryOp, ExprKind, ExprNode, FunctionLiteral, Program, StmtKind, StmtNode, UnaryOp};
use crate::builtins::{Builtin, NativeRegistry, PrintWriter};
use crate::environment::{Binding, Environment};
use crate::error::{HemlockError, RuntimeError};
use crate::heap::{Heap, HeapData, HemArray, HemFunction, HemObject, HemString};
use crate::resolver::Resolver;
use crate::type_infer::TypeInferer;
use crate::value::{coerce, NumberValue, Value};

/// Signal threaded up through statement execution (spec §4.4: `return`,
/// `break`, `continue` unwind through enclosing blocks without Rust-level
/// panics or exceptions).
enum Signal {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// The tree-walking evaluator. Holds the heap, the current environment,
/// the type-inference registry (consulted for numeric-widening decisions,
/// spec §4.3), and the two evaluator collaborators spec §4.5 treats as
/// black boxes: the native-function registry and the print sink.
pub struct Evaluator<'a> {
    heap: Heap,
    env: Environment,
    registry: crate::type_infer::ReturnTypeRegistry,
    natives: &'a mut dyn NativeRegistry,
    print: &'a mut dyn PrintWriter,
}

impl<'a> Evaluator<'a> {
    #[must_use]
    pub fn new(
        registry: crate::type_infer::ReturnTypeRegistry,
        natives: &'a mut dyn NativeRegistry,
        print: &'a mut dyn PrintWriter,
    ) -> Self {
        Self {
            heap: Heap::new(),
            env: Environment::new_global(),
            registry,
            natives,
            print,
        }
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Executes a whole (already resolved and type-inferred) program.
    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        for stmt in program {
            match self.exec_stmt(stmt)? {
                Signal::Normal => {}
                Signal::Return(v) => {
                    v.drop_with_heap(&mut self.heap);
                    self.env.finish(&mut self.heap);
                    return Ok(());
                }
                Signal::Break | Signal::Continue => {
                    return Err(RuntimeError::Fatal(
                        "break/continue outside of a loop".to_string(),
                    ))
                }
            }
        }
        self.env.finish(&mut self.heap);
        Ok(())
    }

    fn exec_block(&mut self, body: &[StmtNode]) -> Result<Signal, RuntimeError> {
        let parent = self.env.enter();
        let result = self.exec_stmts(body);
        self.env.exit(parent, &mut self.heap);
        result
    }

    fn exec_stmts(&mut self, body: &[StmtNode]) -> Result<Signal, RuntimeError> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Signal::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Signal::Normal)
    }

    fn exec_stmt(&mut self, stmt: &StmtNode) -> Result<Signal, RuntimeError> {
        match &stmt.kind {
            StmtKind::Let { name, value, .. } => {
                let v = self.eval_expr(value)?;
                self.env.define(name, v, Binding::Mutable)?;
                Ok(Signal::Normal)
            }
            StmtKind::Const { name, value, .. } => {
                let v = self.eval_expr(value)?;
                self.env.define(name, v, Binding::Const)?;
                Ok(Signal::Normal)
            }
            StmtKind::Expr(expr) => {
                let v = self.eval_expr(expr)?;
                v.drop_with_heap(&mut self.heap);
                Ok(Signal::Normal)
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.eval_expr(cond)?;
                let truthy = c.to_bool(&self.heap);
                c.drop_with_heap(&mut self.heap);
                if truthy {
                    self.exec_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch)
                } else {
                    Ok(Signal::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    let c = self.eval_expr(cond)?;
                    let truthy = c.to_bool(&self.heap);
                    c.drop_with_heap(&mut self.heap);
                    if !truthy {
                        break;
                    }
                    match self.exec_block(body)? {
                        Signal::Normal | Signal::Continue => {}
                        Signal::Break => break,
                        ret @ Signal::Return(_) => return Ok(ret),
                    }
                }
                Ok(Signal::Normal)
            }
            StmtKind::For {
                init,
                cond,
                incr,
                body,
            } => {
                let parent = self.env.enter();
                let result = (|| -> Result<Signal, RuntimeError> {
                    if let Some(init) = init {
                        self.exec_stmt(init)?;
                    }
                    loop {
                        if let Some(cond) = cond {
                            let c = self.eval_expr(cond)?;
                            let truthy = c.to_bool(&self.heap);
                            c.drop_with_heap(&mut self.heap);
                            if !truthy {
                                break;
                            }
                        }
                        match self.exec_block(body)? {
                            Signal::Normal | Signal::Continue => {}
                            Signal::Break => break,
                            ret @ Signal::Return(_) => return Ok(ret),
                        }
                        if let Some(incr) = incr {
                            let v = self.eval_expr(incr)?;
                            v.drop_with_heap(&mut self.heap);
                        }
                    }
                    Ok(Signal::Normal)
                })();
                self.env.exit(parent, &mut self.heap);
                result
            }
            StmtKind::Block(body) => self.exec_block(body),
            StmtKind::Return(expr) => {
                let v = match expr {
                    Some(e) => self.eval_expr(e)?,
                    None => Value::Null,
                };
                Ok(Signal::Return(v))
            }
            StmtKind::Break => Ok(Signal::Break),
            StmtKind::Continue => Ok(Signal::Continue),
        }
    }

    fn eval_expr(&mut self, expr: &ExprNode) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Number { int, float, is_float } => Ok(Value::Number(if *is_float {
                NumberValue::F64(*float)
            } else if let Ok(narrow) = i32::try_from(*int) {
                // Spec §4.3: "Integer literal in [-2^31, 2^31-1] -> I32, else
                // I64" is a rule about the value's runtime width, not only
                // its inferred static type, so the same range check governs
                // both here and in `type_infer`'s `best_guess`.
                NumberValue::I32(narrow)
            } else {
                NumberValue::I64(*int)
            })),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Str(s) => Ok(Value::Ref(self.heap.allocate(HeapData::Str(HemString::new(s.clone()))))),
            ExprKind::StringInterpolation(parts) => self.eval_interpolation(parts),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Rune(c) => Ok(Value::Rune(*c)),
            ExprKind::Ident { name, resolved } => match resolved {
                Some(slot) => Ok(self.env.get_slotted(slot.depth, slot.slot, &self.heap)),
                None => self.env.get(name, &self.heap),
            },
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right),
            ExprKind::Unary { op, operand } => self.eval_unary(*op, operand),
            ExprKind::Call { callee, args } => self.eval_call(callee, args),
            ExprKind::Assign { target, value, resolved } => {
                let v = self.eval_expr(value)?;
                let dup = v.clone_with_heap(&self.heap);
                match resolved {
                    Some(slot) => self.env.set_slotted(slot.depth, slot.slot, v, &mut self.heap)?,
                    None => self.env.set(target, v, &mut self.heap)?,
                }
                Ok(dup)
            }
            ExprKind::GetProperty { object, name } => self.eval_get_property(object, name),
            ExprKind::Index { object, index } => self.eval_index(object, index),
            ExprKind::IndexAssign { object, index, value } => self.eval_index_assign(object, index, value),
            ExprKind::ArrayLiteral(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item)?);
                }
                Ok(Value::Ref(self.heap.allocate(HeapData::Array(HemArray::untyped(values)))))
            }
            ExprKind::ObjectLiteral(fields) => {
                let mut map = indexmap::IndexMap::new();
                for (name, value_expr) in fields {
                    let v = self.eval_expr(value_expr)?;
                    if let Some(old) = map.insert(name.clone(), v) {
                        old.drop_with_heap(&mut self.heap);
                    }
                }
                Ok(Value::Ref(self.heap.allocate(HeapData::Object(HemObject { fields: map }))))
            }
            ExprKind::Function(func) => self.eval_function_literal(func),
            ExprKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.eval_expr(cond)?;
                let truthy = c.to_bool(&self.heap);
                c.drop_with_heap(&mut self.heap);
                if truthy {
                    self.eval_expr(then_branch)
                } else {
                    self.eval_expr(else_branch)
                }
            }
            ExprKind::NullCoalesce { left, right } => {
                let l = self.eval_expr(left)?;
                if matches!(l, Value::Null) {
                    l.drop_with_heap(&mut self.heap);
                    self.eval_expr(right)
                } else {
                    Ok(l)
                }
            }
            ExprKind::PrefixInc(e) => self.eval_incdec(e, 1, true),
            ExprKind::PrefixDec(e) => self.eval_incdec(e, -1, true),
            ExprKind::PostfixInc(e) => self.eval_incdec(e, 1, false),
            ExprKind::PostfixDec(e) => self.eval_incdec(e, -1, false),
            ExprKind::Await(e) => {
                // Non-goal surface (spec §1): evaluated synchronously, the
                // value passes through unchanged.
                self.eval_expr(e)
            }
        }
    }

    fn eval_interpolation(&mut self, parts: &[crate::ast::InterpPart]) -> Result<Value, RuntimeError> {
        let mut out = String::new();
        for part in parts {
            match part {
                crate::ast::InterpPart::Literal(lit) => out.push_str(lit),
                crate::ast::InterpPart::Expr(e) => {
                    let v = self.eval_expr(e)?;
                    out.push_str(&coerce::to_display_string(&v, &self.heap));
                    v.drop_with_heap(&mut self.heap);
                }
            }
        }
        Ok(Value::Ref(self.heap.allocate(HeapData::Str(HemString::new(out)))))
    }

    fn eval_incdec(&mut self, target: &ExprNode, delta: i64, prefix: bool) -> Result<Value, RuntimeError> {
        let ExprKind::Ident { name, resolved } = &target.kind else {
            return Err(RuntimeError::type_mismatch("increment/decrement target must be a variable"));
        };
        let current = match resolved {
            Some(slot) => self.env.get_slotted(slot.depth, slot.slot, &self.heap),
            None => self.env.get(name, &self.heap)?,
        };
        if !matches!(current, Value::Number(_)) {
            return Err(RuntimeError::type_mismatch("increment/decrement target must be numeric"));
        }
        // Preserves the target's own numeric width (spec §4.1's widening
        // rule applies here too: incrementing an `I32` by the `I32` delta
        // `1`/`-1` stays `I32`, matching plain `+`/`-`).
        let delta_val = Value::Number(NumberValue::I32(delta as i32));
        let updated = numeric_op(
            &current,
            &delta_val,
            |a, b| a + b,
            |a, b| a.checked_add(b),
            i32::wrapping_add,
        )?;
        match resolved {
            Some(slot) => self.env.set_slotted(slot.depth, slot.slot, updated.clone(), &mut self.heap)?,
            None => self.env.set(name, updated.clone(), &mut self.heap)?,
        }
        Ok(if prefix { updated } else { current })
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &ExprNode) -> Result<Value, RuntimeError> {
        let v = self.eval_expr(operand)?;
        let result = match op {
            UnaryOp::Negate => match v {
                Value::Number(NumberValue::I32(n)) => Value::Number(NumberValue::I32(-n)),
                Value::Number(NumberValue::I64(n)) => Value::Number(NumberValue::I64(-n)),
                Value::Number(NumberValue::F64(n)) => Value::Number(NumberValue::F64(-n)),
                other => return Err(RuntimeError::type_mismatch(format!("cannot negate {other:?}"))),
            },
            UnaryOp::Not => Value::Bool(!v.to_bool(&self.heap)),
            UnaryOp::BitNot => Value::Number(NumberValue::I64(!coerce::to_i64(&v, &self.heap)?)),
        };
        v.drop_with_heap(&mut self.heap);
        Ok(result)
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &ExprNode, right: &ExprNode) -> Result<Value, RuntimeError> {
        // AND/OR short-circuit and return the determining operand value,
        // not a coerced bool (spec §9 open-question resolution).
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let l = self.eval_expr(left)?;
            let l_truthy = l.to_bool(&self.heap);
            if (op == BinaryOp::And && !l_truthy) || (op == BinaryOp::Or && l_truthy) {
                return Ok(l);
            }
            l.drop_with_heap(&mut self.heap);
            return self.eval_expr(right);
        }

        let l = self.eval_expr(left)?;
        let r = self.eval_expr(right)?;
        let result = self.apply_binary(op, &l, &r);
        l.drop_with_heap(&mut self.heap);
        r.drop_with_heap(&mut self.heap);
        result
    }

    fn apply_binary(&mut self, op: BinaryOp, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        match op {
            BinaryOp::Add => self.add(l, r),
            BinaryOp::Sub => numeric_op(l, r, |a, b| a - b, |a, b| a.checked_sub(b), i32::wrapping_sub),
            BinaryOp::Mul => numeric_op(l, r, |a, b| a * b, |a, b| a.checked_mul(b), i32::wrapping_mul),
            BinaryOp::Div => self.divide(l, r),
            BinaryOp::Mod => self.modulo(l, r),
            BinaryOp::Eq => Ok(Value::Bool(self.values_equal(l, r))),
            BinaryOp::Ne => Ok(Value::Bool(!self.values_equal(l, r))),
            BinaryOp::Lt => compare(l, r, |o| o.is_lt()),
            BinaryOp::Le => compare(l, r, |o| o.is_le()),
            BinaryOp::Gt => compare(l, r, |o| o.is_gt()),
            BinaryOp::Ge => compare(l, r, |o| o.is_ge()),
            BinaryOp::BitAnd => bitwise_op(l, r, |a, b| a & b),
            BinaryOp::BitOr => bitwise_op(l, r, |a, b| a | b),
            BinaryOp::BitXor => bitwise_op(l, r, |a, b| a ^ b),
            BinaryOp::BitLshift => bitwise_op(l, r, |a, b| a << b),
            BinaryOp::BitRshift => bitwise_op(l, r, |a, b| a >> b),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled by eval_binary's short-circuit path"),
        }
    }

    /// `+` overloads onto string/array concatenation as well as numeric
    /// addition (spec §4.4). Array `+` sets the resulting array's
    /// `element_type` to `NULL` (spec §9: a concatenation of two typed
    /// arrays cannot in general keep either side's element type).
    fn add(&mut self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        // Arrays only concatenate with arrays; strings concatenate with
        // anything, coercing the other side through its display string
        // (spec §4.1 scenario: `"hi" + " " + 42` => `"hi 42"`).
        let l_is_str = matches!(l.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Str(_)));
        let r_is_str = matches!(r.ref_id().map(|id| self.heap.get(id)), Some(HeapData::Str(_)));
        if l_is_str || r_is_str {
            let s = format!("{}{}", coerce::to_display_string(l, &self.heap), coerce::to_display_string(r, &self.heap));
            return Ok(Value::Ref(self.heap.allocate(HeapData::Str(HemString::new(s)))));
        }
        if let (Some(lid), Some(rid)) = (l.ref_id(), r.ref_id()) {
            if let (HeapData::Array(a), HeapData::Array(b)) = (self.heap.get(lid), self.heap.get(rid)) {
                let mut items = a.items.clone();
                items.extend(b.items.clone());
                let retained: Vec<Value> = items.iter().map(|v| v.clone_with_heap(&self.heap)).collect();
                return Ok(Value::Ref(self.heap.allocate(HeapData::Array(HemArray::untyped(retained)))));
            }
        }
        numeric_op(l, r, |a, b| a + b, |a, b| a.checked_add(b), i32::wrapping_add)
    }

    /// `DIV` always yields `F64` (spec §4.1: "DIV always yields F64"),
    /// unlike `+`/`-`/`*`/`%` which widen toward the narrowest shared
    /// integer kind. Division by zero is still a fatal error when both
    /// operands are integers; float division by zero follows IEEE 754 and
    /// produces `inf`/`NaN` rather than erroring.
    fn divide(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        let (Value::Number(ln), Value::Number(rn)) = (l, r) else {
            return Err(RuntimeError::type_mismatch("'/' requires numeric operands"));
        };
        if ln.is_integer() && rn.is_integer() && rn.as_i64() == 0 {
            return Err(RuntimeError::Fatal("division by zero".to_string()));
        }
        Ok(Value::Number(NumberValue::F64(ln.as_f64() / rn.as_f64())))
    }

    fn modulo(&self, l: &Value, r: &Value) -> Result<Value, RuntimeError> {
        let (Value::Number(ln), Value::Number(rn)) = (l, r) else {
            return Err(RuntimeError::type_mismatch("'%' requires numeric operands"));
        };
        if ln.is_integer() && rn.is_integer() {
            let rhs = rn.as_i64();
            if rhs == 0 {
                return Err(RuntimeError::Fatal("division by zero".to_string()));
            }
            match widen_kind(*ln, *rn) {
                NumKind::I32 => Ok(Value::Number(NumberValue::I32((ln.as_i64() % rhs) as i32))),
                _ => Ok(Value::Number(NumberValue::I64(ln.as_i64() % rhs))),
            }
        } else {
            Ok(Value::Number(NumberValue::F64(ln.as_f64() % rn.as_f64())))
        }
    }

    /// Structural equality for scalars, identity equality for heap
    /// references (spec §9: Hemlock has no deep-equality operator, so two
    /// distinct arrays with equal contents compare unequal). Spec §4.1:
    /// "Equality across distinct numeric kinds compares numeric values
    /// after widening" — `NumberValue`'s derived `PartialEq` is exact per
    /// variant (`I32(5) != I64(5)`), so numeric comparisons go through
    /// `as_f64` instead of the derived `Value` equality.
    fn values_equal(&self, l: &Value, r: &Value) -> bool {
        match (l, r) {
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
            _ => l == r,
        }
    }

    fn eval_get_property(&mut self, object: &ExprNode, name: &str) -> Result<Value, RuntimeError> {
        let obj = self.eval_expr(object)?;
        let id = obj
            .ref_id()
            .ok_or_else(|| RuntimeError::type_mismatch(format!("cannot read property '{name}' of a non-object value")))?;
        let result = match self.heap.get(id) {
            // A missing field reads as `NULL`, not an error (spec §4.4).
            HeapData::Object(o) => Ok(o
                .fields
                .get(name)
                .map(|v| v.clone_with_heap(&self.heap))
                .unwrap_or(Value::Null)),
            HeapData::Array(arr) if name == "length" => {
                Ok(Value::Number(NumberValue::I64(arr.items.len() as i64)))
            }
            HeapData::Str(s) if name == "length" => Ok(Value::Number(NumberValue::I64(s.data.len() as i64))),
            _ => Err(RuntimeError::type_mismatch(format!(
                "cannot read property '{name}' of a non-object value"
            ))),
        };
        obj.drop_with_heap(&mut self.heap);
        result
    }

    fn eval_index(&mut self, object: &ExprNode, index: &ExprNode) -> Result<Value, RuntimeError> {
        let obj = self.eval_expr(object)?;
        let idx = self.eval_expr(index)?;
        let result = self.index_get(&obj, &idx);
        obj.drop_with_heap(&mut self.heap);
        idx.drop_with_heap(&mut self.heap);
        result
    }

    fn index_get(&self, obj: &Value, idx: &Value) -> Result<Value, RuntimeError> {
        let id = obj
            .ref_id()
            .ok_or_else(|| RuntimeError::type_mismatch("indexing requires an array or string"))?;
        match self.heap.get(id) {
            HeapData::Array(arr) => {
                let i = coerce::to_i64(idx, &self.heap)?;
                let resolved = resolve_index(i, arr.items.len())?;
                Ok(arr.items[resolved].clone_with_heap(&self.heap))
            }
            HeapData::Str(s) => {
                // Byte-based indexing (spec §9's resolution): each index
                // names one UTF-8 byte, not one Unicode scalar value.
                let i = coerce::to_i64(idx, &self.heap)?;
                let bytes = s.data.as_bytes();
                let resolved = resolve_index(i, bytes.len())?;
                Ok(Value::Number(NumberValue::I64(i64::from(bytes[resolved]))))
            }
            // `OBJECT` with a string index reads a field (spec §4.4); a
            // missing key is `NULL`, same as `.`-property access.
            HeapData::Object(o) => {
                let key = coerce::to_display_string(idx, &self.heap);
                Ok(o.fields
                    .get(key.as_str())
                    .map(|v| v.clone_with_heap(&self.heap))
                    .unwrap_or(Value::Null))
            }
            _ => Err(RuntimeError::type_mismatch("indexing requires an array or string")),
        }
    }

    fn eval_index_assign(&mut self, object: &ExprNode, index: &ExprNode, value: &ExprNode) -> Result<Value, RuntimeError> {
        let obj = self.eval_expr(object)?;
        let idx = self.eval_expr(index)?;
        let val = self.eval_expr(value)?;
        let dup = val.clone_with_heap(&self.heap);
        let result = self.index_set(&obj, &idx, val);
        obj.drop_with_heap(&mut self.heap);
        idx.drop_with_heap(&mut self.heap);
        result.map(|()| dup)
    }

    fn index_set(&mut self, obj: &Value, idx: &Value, value: Value) -> Result<(), RuntimeError> {
        let id = obj
            .ref_id()
            .ok_or_else(|| RuntimeError::type_mismatch("index assignment requires an array"))?;
        let i = coerce::to_i64(idx, &self.heap)?;
        let actual = value.type_name(&self.heap);
        let HeapData::Array(arr) = self.heap.get_mut(id) else {
            return Err(RuntimeError::type_mismatch("index assignment requires an array"));
        };
        if let Some(elem_type) = &arr.element_type {
            if !type_matches(elem_type, actual) {
                return Err(RuntimeError::type_mismatch(format!(
                    "cannot assign {actual} into array of {elem_type}"
                )));
            }
        }
        // `INDEX_ASSIGN` never raises `IndexOutOfBounds` (spec §7): a
        // negative index still resolves against the current length, but a
        // non-negative index at or past the end pads with `NULL` up to and
        // including `i` instead of erroring (spec §4.4).
        let resolved = if i < 0 {
            resolve_index(i, arr.items.len())?
        } else {
            let i = i as usize;
            if i >= arr.items.len() {
                arr.items.resize(i + 1, Value::Null);
            }
            i
        };
        let old = std::mem::replace(&mut arr.items[resolved], value);
        old.drop_with_heap(&mut self.heap);
        Ok(())
    }

    fn eval_function_literal(&mut self, func: &FunctionLiteral) -> Result<Value, RuntimeError> {
        let hem_fn = HemFunction {
            name: func.name.clone(),
            param_names: func.param_names.clone(),
            rest_param: func.rest_param.clone(),
            body: std::rc::Rc::new(func.body.clone()),
            closure: self.env.handle(),
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::Function(hem_fn))))
    }

    fn eval_call(&mut self, callee: &ExprNode, args: &[ExprNode]) -> Result<Value, RuntimeError> {
        // `map`/`filter`/`reduce`/`find` are method-style builtins that need to
        // call back into CALL dispatch for their callback argument (spec
        // §4.5); recognize them here, ahead of general evaluation, the
        // same way the teacher special-cases `AttrCall` ahead of a plain
        // `Call`.
        if let ExprKind::GetProperty { object, name } = &callee.kind {
            if matches!(name.as_str(), "map" | "filter" | "reduce" | "find") {
                return self.eval_higher_order(object, name, args);
            }
            // `STRING`/`ARRAY` method-call syntax (spec §4.4's `GET_PROPERTY`
            // rule: "a small fixed method table"): the receiver becomes the
            // builtin's implicit first argument, e.g. `xs.push(1)` reads as
            // `push(xs, 1)`.
            if let Some(builtin) = Builtin::lookup(name) {
                let receiver = self.eval_expr(object)?;
                let mut values = Vec::with_capacity(args.len() + 1);
                values.push(receiver);
                for a in args {
                    values.push(self.eval_expr(a)?);
                }
                let result = builtin.call(&values, &mut self.heap, &mut *self.print);
                for v in values {
                    v.drop_with_heap(&mut self.heap);
                }
                return result;
            }
        }

        if let ExprKind::Ident { name, resolved: None } = &callee.kind {
            if let Some(builtin) = Builtin::lookup(name) {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval_expr(a)?);
                }
                let result = builtin.call(&values, &mut self.heap, &mut *self.print);
                for v in values {
                    v.drop_with_heap(&mut self.heap);
                }
                return result;
            }
            // An unresolved name that isn't a local builtin and isn't a
            // declared variable is handed to the runtime-library
            // collaborator (spec §4.5: time/file/FFI functions live
            // there, not in this crate).
            if !self.env.has(name) {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval_expr(a)?);
                }
                let result = self.natives.call_native(name, &values, &mut self.heap);
                for v in values {
                    v.drop_with_heap(&mut self.heap);
                }
                return result;
            }
        }

        let callee_val = self.eval_expr(callee)?;
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.eval_expr(a)?);
        }
        let result = self.call_value(&callee_val, values);
        callee_val.drop_with_heap(&mut self.heap);
        result
    }

    /// Calls a `FUNCTION` value with already-evaluated arguments,
    /// consuming them. `args.len() > params.len()` is only an error
    /// without a rest-parameter (spec §4.4: "extras ignored unless a
    /// rest-parameter is declared").
    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let id = callee
            .ref_id()
            .ok_or_else(|| RuntimeError::type_mismatch("value is not callable"))?;
        let HeapData::Function(func) = self.heap.get(id) else {
            for v in args {
                v.drop_with_heap(&mut self.heap);
            }
            return Err(RuntimeError::type_mismatch("value is not callable"));
        };
        let param_names = func.param_names.clone();
        let rest_param = func.rest_param.clone();
        let body = func.body.clone();
        let closure = func.closure.clone();

        if args.len() < param_names.len() {
            let got = args.len();
            for v in args {
                v.drop_with_heap(&mut self.heap);
            }
            return Err(RuntimeError::arity_mismatch(format!(
                "expected {} argument(s), got {got}",
                param_names.len(),
            )));
        }
        if rest_param.is_none() && args.len() > param_names.len() {
            for v in args {
                v.drop_with_heap(&mut self.heap);
            }
            return Err(RuntimeError::arity_mismatch(format!(
                "expected {} argument(s), got more",
                param_names.len()
            )));
        }

        let allow_implicit = self.env.allow_implicit_declaration;
        let saved_env = std::mem::replace(&mut self.env, Environment::from_handle(closure, allow_implicit));
        let parent = self.env.enter();

        let mut args = args.into_iter();
        for name in &param_names {
            let v = args.next().expect("checked arity above");
            self.env.define(name, v, Binding::Mutable)?;
        }
        if let Some(rest_name) = &rest_param {
            let rest: Vec<Value> = args.collect();
            let arr = Value::Ref(self.heap.allocate(HeapData::Array(HemArray::untyped(rest))));
            self.env.define(rest_name, arr, Binding::Mutable)?;
        }

        let result = self.exec_stmts(&body);
        self.env.exit(parent, &mut self.heap);
        self.env = saved_env;

        match result? {
            Signal::Return(v) => Ok(v),
            Signal::Normal => Ok(Value::Null),
            Signal::Break | Signal::Continue => Err(RuntimeError::Fatal(
                "break/continue escaped a function body".to_string(),
            )),
        }
    }

    fn eval_higher_order(&mut self, object: &ExprNode, name: &str, args: &[ExprNode]) -> Result<Value, RuntimeError> {
        let obj = self.eval_expr(object)?;
        let id = obj
            .ref_id()
            .ok_or_else(|| RuntimeError::type_mismatch(format!("{name}() requires an array")))?;
        // Each extracted item is a genuinely new owned handle (refcount
        // bumped here), distinct from the array's own copies, so this
        // loop's bookkeeping is free to drop what it doesn't forward.
        let items: Vec<Value> = match self.heap.get(id) {
            HeapData::Array(arr) => arr.items.iter().map(|v| v.clone_with_heap(&self.heap)).collect(),
            _ => {
                obj.drop_with_heap(&mut self.heap);
                return Err(RuntimeError::type_mismatch(format!("{name}() requires an array")));
            }
        };
        let expected_args = if name == "reduce" { 1..=2 } else { 1..=1 };
        if !expected_args.contains(&args.len()) {
            for item in items {
                item.drop_with_heap(&mut self.heap);
            }
            obj.drop_with_heap(&mut self.heap);
            return Err(RuntimeError::arity_mismatch(format!(
                "{name}() requires {} callback argument(s)",
                if name == "reduce" { "1-2" } else { "exactly 1" }
            )));
        }
        let callback = self.eval_expr(&args[0])?;

        let result = match name {
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                let mut failure = None;
                for item in items {
                    let dup = item.clone_with_heap(&self.heap);
                    match self.call_value(&callback, vec![dup]) {
                        Ok(mapped) => out.push(mapped),
                        Err(e) => {
                            failure = Some(e);
                            item.drop_with_heap(&mut self.heap);
                            break;
                        }
                    }
                    item.drop_with_heap(&mut self.heap);
                }
                match failure {
                    Some(e) => {
                        for v in out {
                            v.drop_with_heap(&mut self.heap);
                        }
                        Err(e)
                    }
                    None => Ok(Value::Ref(self.heap.allocate(HeapData::Array(HemArray::untyped(out))))),
                }
            }
            "filter" => {
                let mut out = Vec::new();
                let mut failure = None;
                for item in items {
                    let dup = item.clone_with_heap(&self.heap);
                    match self.call_value(&callback, vec![dup]) {
                        Ok(kept) => {
                            let keep = kept.to_bool(&self.heap);
                            kept.drop_with_heap(&mut self.heap);
                            if keep {
                                out.push(item);
                            } else {
                                item.drop_with_heap(&mut self.heap);
                            }
                        }
                        Err(e) => {
                            failure = Some(e);
                            item.drop_with_heap(&mut self.heap);
                            break;
                        }
                    }
                }
                match failure {
                    Some(e) => {
                        for v in out {
                            v.drop_with_heap(&mut self.heap);
                        }
                        Err(e)
                    }
                    None => Ok(Value::Ref(self.heap.allocate(HeapData::Array(HemArray::untyped(out))))),
                }
            }
            "find" => {
                let mut found = None;
                let mut failure = None;
                for item in items {
                    if found.is_some() {
                        item.drop_with_heap(&mut self.heap);
                        continue;
                    }
                    let dup = item.clone_with_heap(&self.heap);
                    match self.call_value(&callback, vec![dup]) {
                        Ok(matched) => {
                            let keep = matched.to_bool(&self.heap);
                            matched.drop_with_heap(&mut self.heap);
                            if keep {
                                found = Some(item);
                            } else {
                                item.drop_with_heap(&mut self.heap);
                            }
                        }
                        Err(e) => {
                            failure = Some(e);
                            item.drop_with_heap(&mut self.heap);
                            break;
                        }
                    }
                }
                match failure {
                    Some(e) => {
                        if let Some(v) = found {
                            v.drop_with_heap(&mut self.heap);
                        }
                        Err(e)
                    }
                    None => Ok(found.unwrap_or(Value::Null)),
                }
            }
            "reduce" => {
                let seed_result = if args.len() == 2 { self.eval_expr(&args[1]).map(Some) } else { Ok(None) };
                match seed_result {
                    Err(e) => {
                        for item in items {
                            item.drop_with_heap(&mut self.heap);
                        }
                        Err(e)
                    }
                    Ok(seed) => {
                        let mut iter = items.into_iter();
                        match seed.or_else(|| iter.next()) {
                            None => Err(RuntimeError::Fatal(
                                "reduce() of empty array with no initial value".to_string(),
                            )),
                            Some(mut acc) => {
                                let mut failure = None;
                                for item in iter {
                                    match self.call_value(&callback, vec![acc, item]) {
                                        Ok(next) => acc = next,
                                        Err(e) => {
                                            failure = Some(e);
                                            acc = Value::Null;
                                            break;
                                        }
                                    }
                                }
                                match failure {
                                    Some(e) => {
                                        acc.drop_with_heap(&mut self.heap);
                                        Err(e)
                                    }
                                    None => Ok(acc),
                                }
                            }
                        }
                    }
                }
            }
            _ => unreachable!("dispatched only for map/filter/reduce/find"),
        };
        callback.drop_with_heap(&mut self.heap);
        obj.drop_with_heap(&mut self.heap);
        result
    }
}

fn resolve_index(i: i64, len: usize) -> Result<usize, RuntimeError> {
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(RuntimeError::IndexOutOfBounds { index: i, len });
    }
    Ok(resolved as usize)
}

fn type_matches(elem_type: &crate::types::Type, actual_name: &str) -> bool {
    elem_type.to_string() == actual_name || (elem_type.is_numeric() && matches!(actual_name, "integer" | "float"))
}

/// Which width an `ADD`/`SUB`/`MUL`/`MOD`/bitwise op should compute in
/// (spec §4.1: "if either operand is F64, both -> F64; else if either is
/// I64, -> I64; else I32").
enum NumKind {
    I32,
    I64,
    F64,
}

fn widen_kind(ln: NumberValue, rn: NumberValue) -> NumKind {
    match (ln, rn) {
        (NumberValue::F64(_), _) | (_, NumberValue::F64(_)) => NumKind::F64,
        (NumberValue::I64(_), _) | (_, NumberValue::I64(_)) => NumKind::I64,
        _ => NumKind::I32,
    }
}

/// `+`/`-`/`*`/`%`'s shared widening dispatch (spec §4.1's arithmetic
/// widening rule). `I32`-vs-`I32` wraps on overflow like native `i32`
/// arithmetic (spec §8 invariant 4: "subject to two's-complement wrap");
/// `I64`-vs-`I64` (or mixed `I32`/`I64`) raises a `Fatal` on overflow
/// instead, since there is no wider integer kind to promote into.
fn numeric_op(
    l: &Value,
    r: &Value,
    float_op: impl Fn(f64, f64) -> f64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    wrap32_op: impl Fn(i32, i32) -> i32,
) -> Result<Value, RuntimeError> {
    let (Value::Number(ln), Value::Number(rn)) = (l, r) else {
        return Err(RuntimeError::type_mismatch("operator requires numeric operands"));
    };
    match widen_kind(*ln, *rn) {
        NumKind::F64 => Ok(Value::Number(NumberValue::F64(float_op(ln.as_f64(), rn.as_f64())))),
        NumKind::I32 => {
            let (NumberValue::I32(a), NumberValue::I32(b)) = (*ln, *rn) else {
                unreachable!("widen_kind only returns I32 when both operands are I32")
            };
            Ok(Value::Number(NumberValue::I32(wrap32_op(a, b))))
        }
        NumKind::I64 => {
            let result = int_op(ln.as_i64(), rn.as_i64())
                .ok_or_else(|| RuntimeError::Fatal("integer overflow".to_string()))?;
            Ok(Value::Number(NumberValue::I64(result)))
        }
    }
}

/// `&`/`|`/`^`/`<<`/`>>` share `ADD`/`SUB`/`MUL`'s widening rule (spec
/// §4.1: "Bitwise ops require integer operands; widen as above") but
/// never overflow, so there is no fallible branch to thread through.
fn bitwise_op(l: &Value, r: &Value, op: impl Fn(i64, i64) -> i64) -> Result<Value, RuntimeError> {
    let (Value::Number(ln), Value::Number(rn)) = (l, r) else {
        return Err(RuntimeError::type_mismatch("bitwise operator requires integer operands"));
    };
    if !ln.is_integer() || !rn.is_integer() {
        return Err(RuntimeError::type_mismatch("bitwise operator requires integer operands"));
    }
    let result = op(ln.as_i64(), rn.as_i64());
    match widen_kind(*ln, *rn) {
        NumKind::I32 => Ok(Value::Number(NumberValue::I32(result as i32))),
        _ => Ok(Value::Number(NumberValue::I64(result))),
    }
}

fn compare(l: &Value, r: &Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value, RuntimeError> {
    let (Value::Number(ln), Value::Number(rn)) = (l, r) else {
        return Err(RuntimeError::type_mismatch("comparison requires numeric operands"));
    };
    let ordering = ln
        .as_f64()
        .partial_cmp(&rn.as_f64())
        .ok_or_else(|| RuntimeError::Fatal("comparison with NaN".to_string()))?;
    Ok(Value::Bool(pred(ordering)))
}

/// Runs the full resolve → infer → evaluate pipeline over a program
/// (spec §6's external entry point). Tags whichever stage fails so a
/// driver can print the right `<Kind> error:` prefix.
pub fn run_program(
    mut program: Program,
    natives: &mut dyn NativeRegistry,
    print: &mut dyn PrintWriter,
) -> Result<(), HemlockError> {
    Resolver::new().resolve(&mut program).map_err(HemlockError::from)?;
    let registry = TypeInferer::new().infer(&mut program);
    let mut evaluator = Evaluator::new(registry, natives, print);
    evaluator.run(&program).map_err(HemlockError::from)
}
