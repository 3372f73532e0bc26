//! Lumen
//!
//! Reactive templates that patch the DOM in place.
//!
//! A template is markup with `${...}` expressions. Each expression watches
//! the data paths it reads; when one of them changes only the nodes that
//! expression rendered are touched. Loops over arrays patch per item.
//!
//! # Example
//! ```rust,ignore
//! use lumen::{Component, Config, Dom, Value};
//!
//! let data = Value::from_json(&serde_json::json!({"fruits": ["Apple"]}));
//! let data = data.as_object().unwrap();
//! let dom = Dom::new();
//! let list = Component::compile("`<ul>${this.fruits.map(f => `<li>${f}</li>`)}</ul>`", &Config::default())?;
//! let mounted = list.render(data, &dom)?;
//!
//! data.get("fruits").as_object().unwrap().push(vec![Value::str("Banana")])?;
//! assert_eq!(mounted.outer_html(), "<ul><li>Apple</li><li>Banana</li></ul>");
//! ```

mod component;
mod config;
mod error;

pub use component::{Component, Mounted};
pub use config::Config;
pub use error::{LumenError, Result};

pub use lumen_dom::{Dom, NodeId};
pub use lumen_reactive::{unwatch, watch, Action, Change, ObjRef, Value, WatchId};
pub use lumen_template::{CompileOptions, EvalError, Template, TemplateError};

// Re-export sub-crates for advanced usage
pub use lumen_dom as dom;
pub use lumen_reactive as reactive;
pub use lumen_syntax as syntax;
pub use lumen_template as template;

/// Lumen version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compiles components with one shared configuration
#[derive(Debug, Clone, Default)]
pub struct Lumen {
    config: Config,
}

impl Lumen {
    pub fn new(config: Config) -> Self {
        tracing::info!("Lumen {} initialized", VERSION);
        Self { config }
    }

    /// Load the configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(Config::from_json(json)?))
    }

    pub fn compile(&self, source: &str) -> Result<Component> {
        Component::compile(source, &self.config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
