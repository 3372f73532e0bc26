//! Template errors

use lumen_dom::DomError;
use lumen_reactive::NotifyError;
use lumen_syntax::{LexError, StructureError};
use thiserror::Error;

/// Result type for template operations
pub type Result<T, E = EvalError> = std::result::Result<T, E>;

/// Failure to compile a template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error("syntax error in `{snippet}`: {message}")]
    Syntax { message: String, snippet: String },

    #[error("unbalanced markup: {0}")]
    Unbalanced(String),
}

/// Failure while evaluating or rendering
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("`{0}` is not defined")]
    NotDefined(String),

    #[error("cannot read `{property}` of {target}")]
    PropertyOfNullish { property: String, target: &'static str },

    #[error("cannot assign to `{property}` of a {target}")]
    NotAssignable { property: String, target: &'static str },

    #[error("`{0}` is not a function")]
    NotCallable(String),

    #[error("loop over `{path}` is not iterable in `{snippet}`")]
    NotIterable { path: String, snippet: String },

    #[error("invalid assignment target")]
    InvalidTarget,

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("{0:#}")]
    Thrown(anyhow::Error),
}

impl EvalError {
    /// Recover an `EvalError` that crossed a host callback boundary
    pub fn from_host(err: anyhow::Error) -> Self {
        match err.downcast::<EvalError>() {
            Ok(eval) => eval,
            Err(other) => EvalError::Thrown(other),
        }
    }
}
