//! Lexical resolver pass (spec §4.2).
//!
//! Grounded on the teacher's `Namespace` scope-chain walk
//! (`crates/monty/src/namespace.rs`), run here as a static pre-pass
//! instead of at call time: a parallel scope stack mirrors the runtime
//! `Environment`'s nesting exactly (`BLOCK`/`FOR`/`WHILE`/function body
//! each push one level), and every `IDENT`/`ASSIGN` is stamped with the
//! `(depth, slot)` the evaluator will later index into directly.
//!
//! An identifier the resolver can't find in any tracked scope is left
//! unannotated rather than rejected: spec §4.2 treats that as a dynamic
//! or forward global reference, resolved at runtime through
//! [`crate::environment::Environment::get`].

use std::collections::HashSet;

use crate::ast::{ExprKind, ExprNode, FunctionLiteral, Program, ResolvedSlot, StmtKind, StmtNode};
use crate::error::ResolveError;

struct ScopeFrame {
    names: Vec<String>,
    /// Names referenced from an enclosed function, accumulated into the
    /// nearest enclosing `FUNCTION`'s `capture_set` when that function's
    /// frame pops (spec §4.2's capture-set bookkeeping; unused by the
    /// tree-walking evaluator itself, kept for the out-of-scope C
    /// backend per spec §9).
    captured_from_below: HashSet<String>,
}

impl ScopeFrame {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            captured_from_below: HashSet::new(),
        }
    }
}

/// Performs the resolver pass over a whole program in place.
pub struct Resolver {
    scopes: Vec<ScopeFrame>,
}

impl Resolver {
    #[must_use]
    pub fn new() -> Self {
        Self { scopes: vec![ScopeFrame::new()] }
    }

    /// Resolves every identifier and declaration in `program`, returning
    /// the first duplicate-declaration error encountered (spec §4.2: the
    /// only resolver-pass failure mode).
    pub fn resolve(mut self, program: &mut Program) -> Result<(), ResolveError> {
        for stmt in program.iter_mut() {
            self.resolve_stmt(stmt)?;
        }
        Ok(())
    }

    fn enter_scope(&mut self) {
        self.scopes.push(ScopeFrame::new());
    }

    fn exit_scope(&mut self) {
        let popped = self.scopes.pop().expect("exit_scope without matching enter_scope");
        if let Some(parent) = self.scopes.last_mut() {
            parent.captured_from_below.extend(popped.captured_from_below);
        }
    }

    fn declare(&mut self, name: &str) -> Result<u32, ResolveError> {
        let frame = self.scopes.last_mut().expect("at least one scope frame always present");
        if frame.names.iter().any(|n| n == name) {
            return Err(ResolveError::redeclaration(name));
        }
        let slot = frame.names.len() as u32;
        frame.names.push(name.to_string());
        Ok(slot)
    }

    /// Finds `name` in the scope stack, returning `(depth, slot)` where
    /// `depth` counts outward from the innermost frame. Records a capture
    /// on every frame strictly between the use site and the declaring
    /// frame, so a `FUNCTION` frame several levels out still sees the
    /// name cross its boundary.
    fn resolve_name(&mut self, name: &str) -> Option<ResolvedSlot> {
        for depth in 0..self.scopes.len() {
            let idx = self.scopes.len() - 1 - depth;
            if let Some(slot) = self.scopes[idx].names.iter().position(|n| n == name) {
                for frame in &mut self.scopes[idx + 1..] {
                    frame.captured_from_below.insert(name.to_string());
                }
                return Some(ResolvedSlot {
                    depth: depth as u32,
                    slot: slot as u32,
                });
            }
        }
        None
    }

    fn resolve_stmt(&mut self, stmt: &mut StmtNode) -> Result<(), ResolveError> {
        match &mut stmt.kind {
            StmtKind::Let { name, value, .. } | StmtKind::Const { name, value, .. } => {
                self.resolve_expr(value)?;
                self.declare(name)?;
            }
            StmtKind::Expr(expr) => self.resolve_expr(expr)?,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(cond)?;
                self.enter_scope();
                for s in then_branch.iter_mut() {
                    self.resolve_stmt(s)?;
                }
                self.exit_scope();
                if let Some(else_branch) = else_branch {
                    self.enter_scope();
                    for s in else_branch.iter_mut() {
                        self.resolve_stmt(s)?;
                    }
                    self.exit_scope();
                }
            }
            StmtKind::While { cond, body } => {
                self.resolve_expr(cond)?;
                self.enter_scope();
                for s in body.iter_mut() {
                    self.resolve_stmt(s)?;
                }
                self.exit_scope();
            }
            StmtKind::For {
                init,
                cond,
                incr,
                body,
            } => {
                self.enter_scope();
                if let Some(init) = init {
                    self.resolve_stmt(init)?;
                }
                if let Some(cond) = cond {
                    self.resolve_expr(cond)?;
                }
                if let Some(incr) = incr {
                    self.resolve_expr(incr)?;
                }
                // The evaluator runs `init`/`cond`/`incr` directly in the
                // for-scope but executes `body` through `exec_block`, which
                // pushes its own scope per iteration — body references must
                // resolve one scope deeper than `init`, matching that.
                self.enter_scope();
                for s in body.iter_mut() {
                    self.resolve_stmt(s)?;
                }
                self.exit_scope();
                self.exit_scope();
            }
            StmtKind::Block(body) => {
                self.enter_scope();
                for s in body.iter_mut() {
                    self.resolve_stmt(s)?;
                }
                self.exit_scope();
            }
            StmtKind::Return(Some(expr)) => self.resolve_expr(expr)?,
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        }
        Ok(())
    }

    fn resolve_function(&mut self, func: &mut FunctionLiteral) -> Result<(), ResolveError> {
        self.enter_scope();
        for param in &func.param_names {
            self.declare(param)?;
        }
        if let Some(rest) = &func.rest_param {
            self.declare(rest)?;
        }
        for stmt in func.body.iter_mut() {
            self.resolve_stmt(stmt)?;
        }
        let frame = self.scopes.last().expect("just entered");
        let mut captures: Vec<String> = frame.captured_from_below.iter().cloned().collect();
        captures.sort();
        func.capture_set = captures;
        self.exit_scope();
        Ok(())
    }

    fn resolve_expr(&mut self, expr: &mut ExprNode) -> Result<(), ResolveError> {
        match &mut expr.kind {
            ExprKind::Ident { name, resolved } => {
                *resolved = self.resolve_name(name);
            }
            ExprKind::Assign { target, value, resolved } => {
                self.resolve_expr(value)?;
                *resolved = self.resolve_name(target);
            }
            ExprKind::Binary { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)?;
            }
            ExprKind::Unary { operand, .. } => self.resolve_expr(operand)?,
            ExprKind::Call { callee, args } => {
                self.resolve_expr(callee)?;
                for a in args.iter_mut() {
                    self.resolve_expr(a)?;
                }
            }
            ExprKind::GetProperty { object, .. } => self.resolve_expr(object)?,
            ExprKind::Index { object, index } => {
                self.resolve_expr(object)?;
                self.resolve_expr(index)?;
            }
            ExprKind::IndexAssign { object, index, value } => {
                self.resolve_expr(object)?;
                self.resolve_expr(index)?;
                self.resolve_expr(value)?;
            }
            ExprKind::ArrayLiteral(items) => {
                for item in items.iter_mut() {
                    self.resolve_expr(item)?;
                }
            }
            ExprKind::ObjectLiteral(fields) => {
                for (_, v) in fields.iter_mut() {
                    self.resolve_expr(v)?;
                }
            }
            ExprKind::Function(func) => self.resolve_function(func)?,
            ExprKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(cond)?;
                self.resolve_expr(then_branch)?;
                self.resolve_expr(else_branch)?;
            }
            ExprKind::NullCoalesce { left, right } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)?;
            }
            ExprKind::PrefixInc(e) | ExprKind::PrefixDec(e) | ExprKind::PostfixInc(e) | ExprKind::PostfixDec(e) | ExprKind::Await(e) => {
                self.resolve_expr(e)?;
            }
            ExprKind::StringInterpolation(parts) => {
                for part in parts.iter_mut() {
                    if let crate::ast::InterpPart::Expr(e) = part {
                        self.resolve_expr(e)?;
                    }
                }
            }
            ExprKind::Number { .. } | ExprKind::Bool(_) | ExprKind::Str(_) | ExprKind::Null | ExprKind::Rune(_) => {}
        }
        Ok(())
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}
