//! Lumen errors

use lumen_dom::NodeId;
use lumen_template::{EvalError, TemplateError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LumenError>;

#[derive(Debug, Error)]
pub enum LumenError {
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("render error: {0}")]
    Render(#[from] EvalError),

    #[error("mount target {0:?} is not an element")]
    NotAnElement(NodeId),
}
