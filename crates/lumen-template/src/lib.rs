//! Lumen Template
//!
//! Compiles markup template literals into a tree of node specs, then
//! renders that tree into a [`lumen_dom::Dom`] as a virtual tree that keeps
//! itself up to date: every `${...}` watches the data paths it reads and
//! patches only its own DOM nodes when one of them changes.
//!
//! ```text
//! source --lex--> tokens --compile--> Template --instantiate--> Instance --apply--> DOM
//! ```
//!
//! Expressions are a JavaScript subset, parsed by [`expr`] and evaluated by
//! [`interp`] against an explicit [`Scope`].

mod attributes;
mod builtins;
pub mod compile;
mod context;
mod error;
pub mod expr;
mod host;
pub mod interp;
pub mod scope;
mod template;
pub mod vtree;

pub use compile::{ElementSpec, ExprKind, ExprSpec, NodeSpec};
pub use context::{CompileOptions, RenderContext};
pub use error::{EvalError, Result, TemplateError};
pub use host::{DomNodeRef, Fragment};
pub use scope::{ItemPath, Scope, ScopeItem};
pub use template::{Instance, Template, TemplateStats};
pub use vtree::{VElement, VExpression, VNode, VText};
