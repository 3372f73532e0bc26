//! Syntax errors

use thiserror::Error;

/// Lexing failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unrecognized input at line {line}, column {col}: `{context}`")]
    Unrecognized { line: u32, col: u32, context: String },

    #[error("lexer made no progress in mode `{mode}` at line {line}, column {col}")]
    Stalled { mode: String, line: u32, col: u32 },

    #[error("grammar has no mode named `{0}`")]
    UnknownMode(String),

    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

/// Invalid grammar definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("rule `{rule}` has an invalid pattern: {message}")]
    Pattern { rule: String, message: String },
}

/// Failure to parse the structure of a function-like construct
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("missing closing `{expected}` for `{open}` opened at token {index}")]
    Unclosed { open: String, expected: String, index: usize },

    #[error("expected {expected}, found `{found}`")]
    Unexpected { expected: String, found: String },

    #[error("unexpected end of input, expected {0}")]
    UnexpectedEnd(String),

    #[error("not a function: `{0}`")]
    NotAFunction(String),
}
