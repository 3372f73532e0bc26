//! Host values
//!
//! Values the interpreter hands around but cannot look inside: a rendered
//! markup fragment waiting to be placed, and a live DOM node exposed to
//! event handlers.

use crate::compile::NodeSpec;
use crate::scope::Scope;
use lumen_dom::{Dom, NodeId};
use lumen_reactive::{HostValue, Value};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Markup produced by a template literal inside an expression, bound to
/// the scope it was evaluated in
pub struct Fragment {
    pub nodes: Rc<Vec<NodeSpec>>,
    pub scope: Scope,
}

impl Fragment {
    pub fn new(nodes: Rc<Vec<NodeSpec>>, scope: Scope) -> Self {
        Self { nodes, scope }
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment").field("nodes", &self.nodes.len()).finish()
    }
}

impl HostValue for Fragment {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &str {
        "Fragment"
    }
}

/// A DOM node as seen from script, e.g. `event.target`
#[derive(Clone)]
pub struct DomNodeRef {
    pub dom: Dom,
    pub node: NodeId,
}

impl DomNodeRef {
    pub fn new(dom: &Dom, node: NodeId) -> Self {
        Self { dom: dom.clone(), node }
    }

    /// Script-visible property of the node
    pub fn property(&self, key: &str) -> Value {
        let attribute = |name: &str| self.dom.get_attribute(self.node, name);
        match key {
            "value" | "type" | "id" | "name" | "className" => {
                let name = if key == "className" { "class" } else { key };
                attribute(name).map(Value::from).unwrap_or_else(|| {
                    if key == "value" { Value::str("") } else { Value::Undefined }
                })
            }
            "checked" | "disabled" => Value::Bool(attribute(key).is_some()),
            "tagName" | "nodeName" => self
                .dom
                .tag_name(self.node)
                .map(|t| Value::from(t.to_ascii_uppercase()))
                .unwrap_or_else(|| Value::str("#text")),
            "textContent" => Value::from(self.dom.text_content(self.node)),
            "childElementCount" => Value::Number(self.dom.child_count(self.node) as f64),
            _ => Value::Undefined,
        }
    }
}

impl fmt::Debug for DomNodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomNodeRef({:?})", self.node)
    }
}

impl HostValue for DomNodeRef {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &str {
        "HTMLElement"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_properties() {
        let dom = Dom::new();
        let input = dom.create_element("input");
        dom.set_attribute(input, "type", "checkbox").unwrap();
        dom.set_attribute(input, "checked", "").unwrap();
        let node = DomNodeRef::new(&dom, input);

        assert_eq!(node.property("type"), Value::str("checkbox"));
        assert_eq!(node.property("checked"), Value::Bool(true));
        assert_eq!(node.property("value"), Value::str(""));
        assert_eq!(node.property("tagName"), Value::str("INPUT"));
        assert_eq!(node.property("id"), Value::Undefined);
    }
}
