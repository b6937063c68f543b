//! AST node definitions (spec §3.4).
//!
//! This crate is the consumer, not the producer, of the AST: the lexer and
//! parser are out of scope (spec §1) and are assumed to deliver a fully
//! built tree matching this module. The constructors here exist so tests
//! (and any embedder) can build that tree directly without a parser.
//!
//! The tree is owned top to bottom exactly as spec.md requires: each node
//! exclusively owns its children, so dropping a node drops its subtree.

use crate::type_infer::InferredType;
use crate::types::Type;

/// Byte-offset span in the original source, stamped by the (external)
/// lexer/parser. Carried on every node so the resolver/evaluator can build
/// diagnostics; defaults to `(0, 0)` for hand-built test trees that don't
/// care about source positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A lexically-resolved variable reference: `(scope_depth, slot_index)`,
/// filled in by the resolver pass (spec §4.2). `None` until resolved, and
/// resolution never overwrites an existing value (idempotent on an
/// already-processed tree, per spec §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResolvedSlot {
    pub depth: u32,
    pub slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    BitLshift,
    BitRshift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
    BitNot,
}

/// A function literal. Appears inside `Expr::Function`.
///
/// # Expansion over spec.md
/// `name` and `rest_param` are supplemental fields spec.md's distillation
/// dropped: `name` lets a function refer to itself for recursion
/// diagnostics and `repr`; `rest_param` is required by §4.4's own wording
/// ("extras ignored unless a rest-parameter is declared"). `capture_set`
/// is filled in by the resolver (spec §4.2) for the (out-of-scope)
/// C-backend closure translator; the evaluator never reads it since it
/// uses parent-pointer environments instead (spec §4.2, §9).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionLiteral {
    pub name: Option<String>,
    pub param_names: Vec<String>,
    pub param_types: Option<Vec<Type>>,
    pub rest_param: Option<String>,
    pub return_type: Option<Type>,
    pub body: Vec<StmtNode>,
    pub capture_set: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ExprKind {
    Number {
        int: i64,
        float: f64,
        is_float: bool,
    },
    Bool(bool),
    Str(String),
    /// `STRING_INTERPOLATION`: alternating literal chunks and embedded
    /// expressions, concatenated left to right at evaluation time.
    StringInterpolation(Vec<InterpPart>),
    Null,
    Rune(char),
    Ident {
        name: String,
        resolved: Option<ResolvedSlot>,
    },
    Binary {
        op: BinaryOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExprNode>,
    },
    Call {
        callee: Box<ExprNode>,
        args: Vec<ExprNode>,
    },
    Assign {
        target: String,
        value: Box<ExprNode>,
        resolved: Option<ResolvedSlot>,
    },
    GetProperty {
        object: Box<ExprNode>,
        name: String,
    },
    Index {
        object: Box<ExprNode>,
        index: Box<ExprNode>,
    },
    IndexAssign {
        object: Box<ExprNode>,
        index: Box<ExprNode>,
        value: Box<ExprNode>,
    },
    ArrayLiteral(Vec<ExprNode>),
    ObjectLiteral(Vec<(String, ExprNode)>),
    Function(FunctionLiteral),
    Ternary {
        cond: Box<ExprNode>,
        then_branch: Box<ExprNode>,
        else_branch: Box<ExprNode>,
    },
    NullCoalesce {
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    PrefixInc(Box<ExprNode>),
    PrefixDec(Box<ExprNode>),
    PostfixInc(Box<ExprNode>),
    PostfixDec(Box<ExprNode>),
    Await(Box<ExprNode>),
}

/// One chunk of a `STRING_INTERPOLATION` expression.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum InterpPart {
    Literal(String),
    Expr(ExprNode),
}

/// An expression with its source span and (once the type inferer has run)
/// its best-effort static type (spec §4.3). `inferred_type` is `None` on a
/// freshly-parsed tree; the evaluator treats a `None` the same as
/// `InferredType::Unknown`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExprNode {
    pub span: Span,
    pub kind: ExprKind,
    pub inferred_type: Option<InferredType>,
}

impl ExprNode {
    #[must_use]
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Self {
            span,
            kind,
            inferred_type: None,
        }
    }

    /// Convenience constructor for hand-built test trees that don't care
    /// about source spans.
    #[must_use]
    pub fn dummy(kind: ExprKind) -> Self {
        Self::new(Span::default(), kind)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum StmtKind {
    Let {
        name: String,
        type_annotation: Option<Type>,
        value: ExprNode,
    },
    Const {
        name: String,
        type_annotation: Option<Type>,
        value: ExprNode,
    },
    Expr(ExprNode),
    If {
        cond: ExprNode,
        then_branch: Vec<StmtNode>,
        else_branch: Option<Vec<StmtNode>>,
    },
    While {
        cond: ExprNode,
        body: Vec<StmtNode>,
    },
    For {
        init: Option<Box<StmtNode>>,
        cond: Option<ExprNode>,
        incr: Option<ExprNode>,
        body: Vec<StmtNode>,
    },
    Block(Vec<StmtNode>),
    Return(Option<ExprNode>),
    Break,
    Continue,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StmtNode {
    pub span: Span,
    pub kind: StmtKind,
}

impl StmtNode {
    #[must_use]
    pub fn new(span: Span, kind: StmtKind) -> Self {
        Self { span, kind }
    }

    #[must_use]
    pub fn dummy(kind: StmtKind) -> Self {
        Self::new(Span::default(), kind)
    }
}

/// A whole program: the top-level `Stmt[]` spec §6 names as the external
/// input contract.
pub type Program = Vec<StmtNode>;
