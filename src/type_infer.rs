//! Flow-insensitive type inference (spec §4.3).
//!
//! Grounded on the teacher's own multi-pass-to-fixpoint design: the
//! registry of function return types is rebuilt across whole-program
//! passes until a pass changes nothing, the same "run it again until
//! stable" worklist shape the teacher uses for its scope-capture
//! resolution in `resolver`-adjacent code. Uses `ahash` for the registry
//! map, matching the teacher's preference for `ahash` over the
//! std-library `HashMap` wherever a map is on a hot path.

use ahash::AHashMap;

use crate::ast::{ExprKind, ExprNode, FunctionLiteral, Program, StmtKind, StmtNode};
use crate::types::Type;

/// A point in the inference lattice (spec §4.3): `Unknown` is top, the
/// numeric tower widens `I32`/`I64` into `Integer` into `Numeric`, and
/// every other surface type is a flat atom directly below `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum InferredType {
    Unknown,
    Numeric,
    Integer,
    I32,
    I64,
    F64,
    Bool,
    Str,
    Null,
    Array,
    Object,
    Function,
}

impl InferredType {
    #[must_use]
    pub fn from_static(ty: &Type) -> Self {
        match ty {
            Type::I32 => Self::I32,
            Type::I64 => Self::I64,
            Type::I8 | Type::I16 | Type::U8 | Type::U16 | Type::U32 | Type::U64 => Self::Integer,
            Type::F32 | Type::F64 => Self::F64,
            Type::Bool => Self::Bool,
            Type::String => Self::Str,
            Type::Array(_) => Self::Array,
            Type::Object => Self::Object,
            Type::Function => Self::Function,
            Type::Ptr | Type::Void | Type::Any => Self::Unknown,
        }
    }

    /// Lattice `meet`: the tightest type both operands are known to have,
    /// widening toward `Unknown` on mismatch rather than failing (spec
    /// §4.3: "never errors; it only widens").
    #[must_use]
    pub fn meet(self, other: Self) -> Self {
        if self == other {
            return self;
        }
        use InferredType::{Bool, F64, I32, I64, Integer, Numeric, Unknown};
        match (self, other) {
            (I32, I64) | (I64, I32) => Integer,
            (a, b) if is_integer_like(a) && is_integer_like(b) => Integer,
            (a, b) if is_numeric_like(a) && is_numeric_like(b) => Numeric,
            (Bool, _) | (_, Bool) => Unknown,
            _ => Unknown,
        }
        .min_with(self, other)
    }
}

fn is_integer_like(t: InferredType) -> bool {
    matches!(t, InferredType::I32 | InferredType::I64 | InferredType::Integer)
}

fn is_numeric_like(t: InferredType) -> bool {
    is_integer_like(t) || matches!(t, InferredType::F64 | InferredType::Numeric)
}

trait MeetExt {
    fn min_with(self, a: InferredType, b: InferredType) -> InferredType;
}

impl MeetExt for InferredType {
    /// `meet`'s own computed guess can still be wrong when one side was
    /// `F64` and the other `Integer`: that combination must widen to
    /// `Numeric`, not `Integer`. This tie-breaker folds that case in
    /// without growing the match arm above into an unreadable grid.
    fn min_with(self, a: InferredType, b: InferredType) -> InferredType {
        if matches!(self, InferredType::Integer) && (matches!(a, InferredType::F64) || matches!(b, InferredType::F64))
        {
            InferredType::Numeric
        } else {
            self
        }
    }
}

/// Registry of inferred return types, keyed by function name (spec §4.3:
/// "a per-function return-type fact"). Anonymous functions have no entry;
/// callers treat a missing name as `Unknown`.
#[derive(Debug, Default, Clone)]
pub struct ReturnTypeRegistry {
    map: AHashMap<String, InferredType>,
}

impl ReturnTypeRegistry {
    #[must_use]
    pub fn get(&self, name: &str) -> InferredType {
        self.map.get(name).copied().unwrap_or(InferredType::Unknown)
    }
}

/// Runs the whole-program, flow-insensitive inference pass, annotating
/// every `ExprNode::inferred_type` in place and returning the function
/// return-type registry it converged on.
pub struct TypeInferer {
    registry: AHashMap<String, InferredType>,
}

impl TypeInferer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: AHashMap::new(),
        }
    }

    /// Runs passes over the program until one leaves the registry
    /// unchanged (spec §4.3's fixpoint requirement), then stamps every
    /// expression's `inferred_type` using the converged registry.
    pub fn infer(mut self, program: &mut Program) -> ReturnTypeRegistry {
        loop {
            let before = self.registry.clone();
            self.collect_returns(program);
            if self.registry == before {
                break;
            }
        }
        for stmt in program.iter_mut() {
            self.annotate_stmt(stmt);
        }
        ReturnTypeRegistry { map: self.registry }
    }

    fn collect_returns(&mut self, program: &[StmtNode]) {
        for stmt in program {
            self.collect_returns_stmt(stmt);
        }
    }

    fn collect_returns_stmt(&mut self, stmt: &StmtNode) {
        match &stmt.kind {
            StmtKind::Let { value, .. } | StmtKind::Const { value, .. } => self.collect_returns_expr(value),
            StmtKind::Expr(expr) => self.collect_returns_expr(expr),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.collect_returns_expr(cond);
                self.collect_returns(then_branch);
                if let Some(else_branch) = else_branch {
                    self.collect_returns(else_branch);
                }
            }
            StmtKind::While { cond, body } => {
                self.collect_returns_expr(cond);
                self.collect_returns(body);
            }
            StmtKind::For {
                init,
                cond,
                incr,
                body,
            } => {
                if let Some(init) = init {
                    self.collect_returns_stmt(init);
                }
                if let Some(cond) = cond {
                    self.collect_returns_expr(cond);
                }
                if let Some(incr) = incr {
                    self.collect_returns_expr(incr);
                }
                self.collect_returns(body);
            }
            StmtKind::Block(body) => self.collect_returns(body),
            StmtKind::Return(Some(expr)) => self.collect_returns_expr(expr),
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        }
    }

    fn collect_returns_expr(&mut self, expr: &ExprNode) {
        if let ExprKind::Function(func) = &expr.kind {
            let inferred = self.infer_function_return(func);
            if let Some(name) = &func.name {
                self.registry.insert(name.clone(), inferred);
            }
            for stmt in &func.body {
                self.collect_returns_stmt(stmt);
            }
        }
        walk_children(expr, &mut |child| self.collect_returns_expr(child));
    }

    /// Best-effort return type of one function body: the `meet` of every
    /// `RETURN` expression's static-or-best-guess type, or `Unknown` if
    /// the function has no explicit return (falls off the end, or every
    /// branch only returns bare `return;`).
    fn infer_function_return(&self, func: &FunctionLiteral) -> InferredType {
        if let Some(ret) = &func.return_type {
            return InferredType::from_static(ret);
        }
        let mut acc: Option<InferredType> = None;
        collect_return_exprs(&func.body, &mut |expr| {
            let t = self.best_guess(expr);
            acc = Some(match acc {
                Some(existing) => existing.meet(t),
                None => t,
            });
        });
        acc.unwrap_or(InferredType::Unknown)
    }

    /// A shallow, non-recursive-call-aware guess at an expression's type:
    /// literals are exact, a call to an already-registered function reuses
    /// its registry entry, everything else is `Unknown`. This is
    /// deliberately conservative — spec §4.3 only promises a best-effort
    /// annotation, not a sound type system.
    fn best_guess(&self, expr: &ExprNode) -> InferredType {
        match &expr.kind {
            ExprKind::Number { is_float: true, .. } => InferredType::F64,
            // Spec §4.3: "Integer literal in [-2^31, 2^31-1] -> I32, else
            // I64" — this is the rule the I32/Integer split in the lattice
            // exists for (Design Notes: "keep the lattice ... loses the
            // ability to pick I32 vs I64 for code generation").
            ExprKind::Number { int, is_float: false, .. } => {
                if i32::try_from(*int).is_ok() {
                    InferredType::I32
                } else {
                    InferredType::I64
                }
            }
            ExprKind::Bool(_) => InferredType::Bool,
            ExprKind::Str(_) | ExprKind::StringInterpolation(_) => InferredType::Str,
            ExprKind::Null => InferredType::Null,
            ExprKind::ArrayLiteral(_) => InferredType::Array,
            ExprKind::ObjectLiteral(_) => InferredType::Object,
            ExprKind::Function(_) => InferredType::Function,
            ExprKind::Binary { op, left, right } => self.best_guess_binary(*op, left, right),
            ExprKind::Unary { operand, .. } => self.best_guess(operand),
            ExprKind::Ternary {
                then_branch,
                else_branch,
                ..
            } => self.best_guess(then_branch).meet(self.best_guess(else_branch)),
            ExprKind::NullCoalesce { left, right } => self.best_guess(left).meet(self.best_guess(right)),
            ExprKind::Call { callee, .. } => match &callee.kind {
                ExprKind::Ident { name, .. } => self.registry.get(name).copied().unwrap_or(InferredType::Unknown),
                _ => InferredType::Unknown,
            },
            _ => InferredType::Unknown,
        }
    }

    fn best_guess_binary(&self, op: crate::ast::BinaryOp, left: &ExprNode, right: &ExprNode) -> InferredType {
        use crate::ast::BinaryOp as B;
        match op {
            B::Eq | B::Ne | B::Lt | B::Le | B::Gt | B::Ge | B::And | B::Or => InferredType::Bool,
            // Spec §4.3: "DIV -> F64 unconditionally", distinct from the
            // meet-based widening every other arithmetic op uses.
            B::Div => InferredType::F64,
            // Spec §4.3: "BINARY ADD/SUB/MUL: ... else (ADD with a STRING
            // operand) -> STRING" — `meet` alone has no notion of string
            // concatenation, so ADD checks for a STRING operand first.
            B::Add => {
                let l = self.best_guess(left);
                let r = self.best_guess(right);
                if matches!(l, InferredType::Str) || matches!(r, InferredType::Str) {
                    InferredType::Str
                } else {
                    l.meet(r)
                }
            }
            B::Sub | B::Mul | B::Mod | B::BitAnd | B::BitOr | B::BitXor | B::BitLshift | B::BitRshift => {
                self.best_guess(left).meet(self.best_guess(right))
            }
        }
    }

    fn annotate_stmt(&self, stmt: &mut StmtNode) {
        match &mut stmt.kind {
            StmtKind::Let { value, .. } | StmtKind::Const { value, .. } => self.annotate_expr(value),
            StmtKind::Expr(expr) => self.annotate_expr(expr),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.annotate_expr(cond);
                for s in then_branch {
                    self.annotate_stmt(s);
                }
                if let Some(else_branch) = else_branch {
                    for s in else_branch {
                        self.annotate_stmt(s);
                    }
                }
            }
            StmtKind::While { cond, body } => {
                self.annotate_expr(cond);
                for s in body {
                    self.annotate_stmt(s);
                }
            }
            StmtKind::For {
                init,
                cond,
                incr,
                body,
            } => {
                if let Some(init) = init {
                    self.annotate_stmt(init);
                }
                if let Some(cond) = cond {
                    self.annotate_expr(cond);
                }
                if let Some(incr) = incr {
                    self.annotate_expr(incr);
                }
                for s in body {
                    self.annotate_stmt(s);
                }
            }
            StmtKind::Block(body) => {
                for s in body {
                    self.annotate_stmt(s);
                }
            }
            StmtKind::Return(Some(expr)) => self.annotate_expr(expr),
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        }
    }

    fn annotate_expr(&self, expr: &mut ExprNode) {
        expr.inferred_type = Some(self.best_guess(expr));
        if let ExprKind::Function(func) = &mut expr.kind {
            for stmt in &mut func.body {
                self.annotate_stmt(stmt);
            }
        }
        walk_children_mut(expr, &mut |child| self.annotate_expr(child));
    }
}

impl Default for TypeInferer {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_return_exprs(body: &[StmtNode], visit: &mut impl FnMut(&ExprNode)) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Return(Some(expr)) => visit(expr),
            StmtKind::Return(None) => {}
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_return_exprs(then_branch, visit);
                if let Some(else_branch) = else_branch {
                    collect_return_exprs(else_branch, visit);
                }
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => collect_return_exprs(body, visit),
            StmtKind::Block(body) => collect_return_exprs(body, visit),
            StmtKind::Let { .. } | StmtKind::Const { .. } | StmtKind::Expr(_) | StmtKind::Break | StmtKind::Continue => {}
        }
    }
}

/// Visits the direct child expressions of `expr` (not descending into
/// nested function bodies, which callers handle specially since they're
/// `Vec<StmtNode>` rather than `ExprNode`).
fn walk_children(expr: &ExprNode, visit: &mut impl FnMut(&ExprNode)) {
    match &expr.kind {
        ExprKind::Binary { left, right, .. } => {
            visit(left);
            visit(right);
        }
        ExprKind::Unary { operand, .. } => visit(operand),
        ExprKind::Call { callee, args } => {
            visit(callee);
            for a in args {
                visit(a);
            }
        }
        ExprKind::Assign { value, .. } => visit(value),
        ExprKind::GetProperty { object, .. } => visit(object),
        ExprKind::Index { object, index } => {
            visit(object);
            visit(index);
        }
        ExprKind::IndexAssign { object, index, value } => {
            visit(object);
            visit(index);
            visit(value);
        }
        ExprKind::ArrayLiteral(items) => {
            for item in items {
                visit(item);
            }
        }
        ExprKind::ObjectLiteral(fields) => {
            for (_, v) in fields {
                visit(v);
            }
        }
        ExprKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            visit(cond);
            visit(then_branch);
            visit(else_branch);
        }
        ExprKind::NullCoalesce { left, right } => {
            visit(left);
            visit(right);
        }
        ExprKind::PrefixInc(e) | ExprKind::PrefixDec(e) | ExprKind::PostfixInc(e) | ExprKind::PostfixDec(e) | ExprKind::Await(e) => {
            visit(e);
        }
        ExprKind::StringInterpolation(parts) => {
            for part in parts {
                if let crate::ast::InterpPart::Expr(e) = part {
                    visit(e);
                }
            }
        }
        ExprKind::Number { .. }
        | ExprKind::Bool(_)
        | ExprKind::Str(_)
        | ExprKind::Null
        | ExprKind::Rune(_)
        | ExprKind::Ident { .. }
        | ExprKind::Function(_) => {}
    }
}

fn walk_children_mut(expr: &mut ExprNode, visit: &mut impl FnMut(&mut ExprNode)) {
    match &mut expr.kind {
        ExprKind::Binary { left, right, .. } => {
            visit(left);
            visit(right);
        }
        ExprKind::Unary { operand, .. } => visit(operand),
        ExprKind::Call { callee, args } => {
            visit(callee);
            for a in args {
                visit(a);
            }
        }
        ExprKind::Assign { value, .. } => visit(value),
        ExprKind::GetProperty { object, .. } => visit(object),
        ExprKind::Index { object, index } => {
            visit(object);
            visit(index);
        }
        ExprKind::IndexAssign { object, index, value } => {
            visit(object);
            visit(index);
            visit(value);
        }
        ExprKind::ArrayLiteral(items) => {
            for item in items {
                visit(item);
            }
        }
        ExprKind::ObjectLiteral(fields) => {
            for (_, v) in fields {
                visit(v);
            }
        }
        ExprKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            visit(cond);
            visit(then_branch);
            visit(else_branch);
        }
        ExprKind::NullCoalesce { left, right } => {
            visit(left);
            visit(right);
        }
        ExprKind::PrefixInc(e) | ExprKind::PrefixDec(e) | ExprKind::PostfixInc(e) | ExprKind::PostfixDec(e) | ExprKind::Await(e) => {
            visit(e);
        }
        ExprKind::StringInterpolation(parts) => {
            for part in parts {
                if let crate::ast::InterpPart::Expr(e) = part {
                    visit(e);
                }
            }
        }
        ExprKind::Number { .. }
        | ExprKind::Bool(_)
        | ExprKind::Str(_)
        | ExprKind::Null
        | ExprKind::Rune(_)
        | ExprKind::Ident { .. }
        | ExprKind::Function(_) => {}
    }
}
