//! Static `Type` descriptions (spec §3.1): used for explicit annotations
//! and for the FFI surface the C backend consumes. Distinct from the
//! type-inference lattice in [`crate::type_infer`], which additionally
//! tracks `NUMERIC`/`INTEGER` widening states that have no surface syntax.

use std::fmt;

/// A first-class type description, carried by AST nodes that have an
/// explicit annotation (`LET`/`CONST` with `: Type`, function parameters
/// and return types) and by `Value::TYPE` when types are used as values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    String,
    /// Carries the element type; boxed since `Type` would otherwise be
    /// infinitely sized.
    Array(Box<Type>),
    Object,
    Function,
    Ptr,
    Void,
    Any,
}

impl Type {
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::U8 | Self::U16 | Self::U32 | Self::U64
        )
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I8 => write!(f, "i8"),
            Self::I16 => write!(f, "i16"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
            Self::U32 => write!(f, "u32"),
            Self::U64 => write!(f, "u64"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
            Self::Bool => write!(f, "bool"),
            Self::String => write!(f, "string"),
            Self::Array(elem) => write!(f, "array<{elem}>"),
            Self::Object => write!(f, "object"),
            Self::Function => write!(f, "function"),
            Self::Ptr => write!(f, "ptr"),
            Self::Void => write!(f, "void"),
            Self::Any => write!(f, "any"),
        }
    }
}
