//! Lumen Syntax
//!
//! Everything Lumen knows about source text:
//! - [`lexer`]: a grammar-driven tokenizer that descends into and ascends out
//!   of named modes, producing a lossless token tree
//! - [`markup`]: the HTML/JS grammar used for templates
//! - [`fregex`]: regular-expression-like combinators over token slices
//! - [`function`]: structural parsing of function-like token runs

mod error;
pub mod token;
pub mod grammar;
pub mod lexer;
pub mod markup;
pub mod fregex;
pub mod function;

pub use error::{GrammarError, LexError, StructureError};
pub use token::Token;
pub use grammar::{Grammar, Match, Rule, Transition};
pub use lexer::{lex, lex_at, LexOptions};
pub use markup::{lex_html, lex_js, markup_grammar, parse_template_tokens, MarkupState};
pub use function::{ArgName, ErrorPolicy, FunctionShape, MapExpression, ParsedFunction};
