//! Render context shared by every virtual node of one instance

use lumen_dom::Dom;
use lumen_syntax::LexOptions;
use std::cell::RefCell;

/// Compile-time switches
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub lex: LexOptions,
    /// Write `value` inputs back into the data they display
    pub two_way_binding: bool,
    /// Treat `on*` attributes as event handlers
    pub event_attributes: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            lex: LexOptions::default(),
            two_way_binding: true,
            event_attributes: true,
        }
    }
}

/// State shared by the virtual nodes of one mounted template
#[derive(Debug)]
pub struct RenderContext {
    pub dom: Dom,
    pub options: CompileOptions,
    /// Paths currently being written by a two-way binding. The input that
    /// wrote them already shows the value, so it is not re-rendered.
    in_flight: RefCell<Vec<Vec<String>>>,
}

impl RenderContext {
    pub fn new(dom: Dom, options: CompileOptions) -> Self {
        Self {
            dom,
            options,
            in_flight: RefCell::new(Vec::new()),
        }
    }

    pub fn begin_write(&self, path: Vec<String>) {
        self.in_flight.borrow_mut().push(path);
    }

    pub fn end_write(&self) {
        self.in_flight.borrow_mut().pop();
    }

    pub fn is_in_flight(&self, path: &[String]) -> bool {
        self.in_flight.borrow().iter().any(|p| p == path)
    }
}
