//! Error taxonomy for the resolver, type inferer, and evaluator.
//!
//! Mirrors the teacher's hand-written `Display` impls (`ParseError`,
//! `ExcType`) rather than a derive macro: every phrase here is one a user
//! is meant to read, so the wording is pinned down directly instead of
//! templated.

use std::fmt;

/// The evaluator's runtime fault taxonomy (spec §7).
///
/// All variants are fatal: there is no user-level `try`/`catch` in the
/// core language, so every one of these unwinds evaluation to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    UndefinedVariable(String),
    Redeclaration(String),
    ConstWrite(String),
    TypeMismatch(String),
    IndexOutOfBounds { index: i64, len: usize },
    ArityMismatch(String),
    Fatal(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedVariable(name) => write!(f, "Undefined variable '{name}'"),
            Self::Redeclaration(name) => write!(f, "Variable '{name}' already defined in this scope"),
            Self::ConstWrite(name) => write!(f, "Cannot assign to const variable '{name}'"),
            Self::TypeMismatch(msg) => write!(f, "{msg}"),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "Array index {index} out of bounds (length {len})")
            }
            Self::ArityMismatch(msg) => write!(f, "{msg}"),
            Self::Fatal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    pub fn arity_mismatch(msg: impl Into<String>) -> Self {
        Self::ArityMismatch(msg.into())
    }
}

/// A resolver-pass failure (spec §4.2): currently only duplicate names in
/// one lexical scope, since an unresolved identifier is not an error (it
/// falls back to dynamic/global lookup).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveError {
    pub message: String,
}

impl ResolveError {
    pub fn redeclaration(name: &str) -> Self {
        Self {
            message: format!("Variable '{name}' already defined in this scope"),
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ResolveError {}

/// The type inferer never hard-fails in this design (flow-insensitive,
/// total over `UNKNOWN`), but the driver-facing surface still reserves a
/// slot for it so `run_program`'s three-stage pipeline is uniform.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    pub message: String,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TypeError {}

/// Top-level error returned by `run_program`, tagged with which pass
/// raised it so the driver can print the right `<Kind> error:` prefix
/// (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub enum HemlockError {
    Resolve(ResolveError),
    Type(TypeError),
    Runtime(RuntimeError),
}

impl fmt::Display for HemlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve(e) => write!(f, "Resolve error: {e}"),
            Self::Type(e) => write!(f, "Type error: {e}"),
            Self::Runtime(e) => write!(f, "Runtime error: {e}"),
        }
    }
}

impl std::error::Error for HemlockError {}

impl From<ResolveError> for HemlockError {
    fn from(e: ResolveError) -> Self {
        Self::Resolve(e)
    }
}

impl From<TypeError> for HemlockError {
    fn from(e: TypeError) -> Self {
        Self::Type(e)
    }
}

impl From<RuntimeError> for HemlockError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}
