//! Components
//!
//! A [`Component`] is a compiled template. Mounting it against a data
//! object renders it and keeps the rendered nodes in sync with the data
//! until the returned [`Mounted`] is dropped or unmounted.

use crate::config::Config;
use crate::error::{LumenError, Result};
use lumen_dom::{Dom, NodeId};
use lumen_reactive::ObjRef;
use lumen_template::{Instance, Template, TemplateStats};

/// A compiled component template
#[derive(Debug, Clone)]
pub struct Component {
    template: Template,
}

impl Component {
    pub fn compile(source: &str, config: &Config) -> Result<Self> {
        let template = Template::compile(source, &config.compile_options())?;
        Ok(Self { template })
    }

    pub fn from_template(template: Template) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn stats(&self) -> TemplateStats {
        self.template.stats()
    }

    /// Render without attaching to any parent
    pub fn render(&self, data: &ObjRef, dom: &Dom) -> Result<Mounted> {
        self.attach(data, dom, NodeId::NONE, None)
    }

    /// Render and append to the children of `parent`
    pub fn mount(&self, data: &ObjRef, dom: &Dom, parent: NodeId) -> Result<Mounted> {
        expect_element(dom, parent)?;
        self.attach(data, dom, parent, None)
    }

    /// Render into an element that already exists. If the template's only
    /// root has the host's tag, the host becomes that root.
    pub fn mount_into(&self, data: &ObjRef, dom: &Dom, host: NodeId) -> Result<Mounted> {
        expect_element(dom, host)?;
        self.attach(data, dom, NodeId::NONE, Some(host))
    }

    fn attach(&self, data: &ObjRef, dom: &Dom, parent: NodeId, host: Option<NodeId>) -> Result<Mounted> {
        let instance = self.template.instantiate(data, dom);
        let inserted = instance.apply(parent, host)?;
        tracing::debug!(inserted, nodes = instance.dom_count(), "mounted component");
        Ok(Mounted {
            instance,
            data: data.clone(),
            inserted,
        })
    }
}

fn expect_element(dom: &Dom, node: NodeId) -> Result<()> {
    match dom.tag_name(node) {
        Some(_) => Ok(()),
        None => Err(LumenError::NotAnElement(node)),
    }
}

/// A rendered component bound to its data
pub struct Mounted {
    instance: Instance,
    data: ObjRef,
    inserted: usize,
}

impl Mounted {
    pub fn data(&self) -> &ObjRef {
        &self.data
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Nodes inserted into the parent by the initial render
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    /// DOM node of the first root element
    pub fn element(&self) -> Option<NodeId> {
        self.instance.root_element().map(|el| el.node())
    }

    /// Top-level DOM nodes, in order
    pub fn nodes(&self) -> Vec<NodeId> {
        self.instance.dom_nodes()
    }

    /// Markup of every top-level node
    pub fn outer_html(&self) -> String {
        let dom = self.instance.dom();
        self.nodes().into_iter().map(|node| dom.outer_html(node)).collect()
    }

    /// Detach the rendered nodes and stop watching the data
    pub fn unmount(self) -> Result<()> {
        self.instance.remove()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_reactive::Value;
    use serde_json::json;

    #[test]
    fn test_mount_rejects_text_parent() {
        let dom = Dom::new();
        let text = dom.create_text("x");
        let data = Value::from_json(&json!({})).as_object().unwrap().clone();
        let component = Component::compile("<p></p>", &Config::default()).unwrap();
        assert!(matches!(
            component.mount(&data, &dom, text),
            Err(LumenError::NotAnElement(node)) if node == text
        ));
    }

    #[test]
    fn test_two_way_binding_off() {
        let dom = Dom::new();
        let data = Value::from_json(&json!({"name": "Ann"})).as_object().unwrap().clone();
        let config = Config {
            two_way_binding: false,
            ..Config::default()
        };
        let mounted = Component::compile("<input value=${this.name}>", &config)
            .unwrap()
            .render(&data, &dom)
            .unwrap();
        let input = mounted.element().unwrap();
        dom.set_attribute(input, "value", "Bob").unwrap();
        dom.dispatch_event(input, "input").unwrap();
        assert_eq!(data.get("name"), Value::str("Ann"));
    }
}
