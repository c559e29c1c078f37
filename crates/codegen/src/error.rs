//! Codegen error types

use text_size::TextRange;
use thiserror::Error;

/// The specific kind of a fatal resolution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    /// A local name is loaded but never bound anywhere on the scope chain.
    Undefined,
    /// `nonlocal` names a symbol absent from every enclosing function scope.
    NonlocalUnbound,
    /// `global`/`nonlocal` after the name was already bound locally.
    BindingConflict,
    /// The same parameter name appears twice in one signature.
    DuplicateParam,
}

impl std::fmt::Display for ResolveErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolveErrorKind::Undefined => "undefined name",
            ResolveErrorKind::NonlocalUnbound => "no binding for nonlocal",
            ResolveErrorKind::BindingConflict => {
                "name is assigned before global/nonlocal declaration"
            }
            ResolveErrorKind::DuplicateParam => "duplicate parameter",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("{kind} '{name}' at {span:?}")]
    Resolve {
        kind: ResolveErrorKind,
        name: String,
        span: TextRange,
    },

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("unresolved module '{module}'")]
    UnresolvedModule { module: String },

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodegenError {
    pub fn undefined(name: impl Into<String>, span: TextRange) -> Self {
        CodegenError::Resolve {
            kind: ResolveErrorKind::Undefined,
            name: name.into(),
            span,
        }
    }

    pub fn nonlocal_unbound(name: impl Into<String>, span: TextRange) -> Self {
        CodegenError::Resolve {
            kind: ResolveErrorKind::NonlocalUnbound,
            name: name.into(),
            span,
        }
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;
