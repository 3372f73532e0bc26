//! Templates and instances
//!
//! A [`Template`] is compiled once; [`Template::instantiate`] binds it to a
//! data object and [`Instance::apply`] renders it into the DOM.

use crate::compile::{compile_nodes, ExprKind, NodeSpec};
use crate::context::{CompileOptions, RenderContext};
use crate::error::{Result, TemplateError};
use crate::expr::strip_backticks;
use crate::scope::Scope;
use crate::vtree::{reindex, SiblingList, VElement, VNode};
use lumen_dom::{Dom, NodeId};
use lumen_reactive::ObjRef;
use lumen_syntax::{parse_template_tokens, Token};
use std::rc::Rc;

/// A compiled template, shared by all of its instances
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Rc<Vec<NodeSpec>>,
    options: CompileOptions,
}

/// Expression counts of a compiled template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateStats {
    pub elements: usize,
    pub simple: usize,
    pub complex: usize,
    pub loops: usize,
}

impl Template {
    /// Compile template source, with or without its backticks
    pub fn compile(source: &str, options: &CompileOptions) -> Result<Self, TemplateError> {
        let tokens = parse_template_tokens(source, &options.lex)?;
        Self::build_virtual_element(&tokens, options)
    }

    /// Compile already lexed template tokens
    pub fn build_virtual_element(tokens: &[Token], options: &CompileOptions) -> Result<Self, TemplateError> {
        let nodes = compile_nodes(strip_backticks(tokens))?;
        let template = Self {
            nodes: Rc::new(nodes),
            options: options.clone(),
        };
        let stats = template.stats();
        tracing::debug!(
            roots = template.nodes.len(),
            elements = stats.elements,
            simple = stats.simple,
            complex = stats.complex,
            loops = stats.loops,
            "compiled template"
        );
        Ok(template)
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn stats(&self) -> TemplateStats {
        fn walk(nodes: &[NodeSpec], stats: &mut TemplateStats) {
            for node in nodes {
                match node {
                    NodeSpec::Element(el) => {
                        stats.elements += 1;
                        walk(&el.children, stats);
                    }
                    NodeSpec::Expression(spec) => match &spec.kind {
                        ExprKind::Simple(_) => stats.simple += 1,
                        ExprKind::Complex(_) => stats.complex += 1,
                        ExprKind::Loop(lp) => {
                            stats.loops += 1;
                            walk(&lp.item, stats);
                        }
                    },
                    NodeSpec::Text(_) => {}
                }
            }
        }
        let mut stats = TemplateStats::default();
        walk(&self.nodes, &mut stats);
        stats
    }

    /// Bind the template to `data`. Nothing is rendered until
    /// [`Instance::apply`].
    pub fn instantiate(&self, data: &ObjRef, dom: &Dom) -> Instance {
        let ctx = Rc::new(RenderContext::new(dom.clone(), self.options.clone()));
        let scope = Scope::root(data);
        let roots = SiblingList::new(0);
        *roots.nodes.borrow_mut() = self.nodes.iter().map(|spec| VNode::instantiate(spec, &scope, &ctx)).collect();
        Instance { ctx, roots }
    }
}

/// One rendering of a template against one data object. Dropping it
/// drops every subscription it made; the DOM nodes stay unless
/// [`Instance::remove`] is called first.
pub struct Instance {
    ctx: Rc<RenderContext>,
    roots: Rc<SiblingList>,
}

impl Instance {
    /// Render into the DOM and return the number of nodes inserted into
    /// `parent`.
    ///
    /// With `existing`, a template whose only root is an element with the
    /// same tag renders into `existing` itself; any other template renders
    /// its roots as children of `existing`. Without it, the roots are
    /// appended to `parent`, or left detached if `parent` is
    /// [`NodeId::NONE`].
    pub fn apply(&self, parent: NodeId, existing: Option<NodeId>) -> Result<usize> {
        let dom = &self.ctx.dom;
        let nodes = self.roots.nodes.borrow().clone();

        if let Some(existing) = existing {
            if let [VNode::Element(root)] = nodes.as_slice() {
                if dom.tag_name(existing).is_some_and(|tag| tag.eq_ignore_ascii_case(root.tag())) {
                    return root.apply(NodeId::NONE, 0, Some(existing));
                }
            }
            return self.apply_roots(&nodes, existing);
        }
        self.apply_roots(&nodes, parent)
    }

    fn apply_roots(&self, nodes: &[VNode], parent: NodeId) -> Result<usize> {
        let base = if parent.is_valid() { self.ctx.dom.child_count(parent) } else { 0 };
        self.roots.base.set(base);
        let mut at = base;
        for node in nodes {
            at += node.apply(parent, at, &self.roots)?;
        }
        reindex(&self.roots);
        Ok(at - base)
    }

    /// Virtual root nodes
    pub fn roots(&self) -> Vec<VNode> {
        self.roots.nodes.borrow().clone()
    }

    /// The first root element
    pub fn root_element(&self) -> Option<Rc<VElement>> {
        self.roots.nodes.borrow().iter().find_map(|node| match node {
            VNode::Element(el) => Some(el.clone()),
            _ => None,
        })
    }

    /// Live DOM nodes owned by the roots, in document order
    pub fn dom_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for node in self.roots.nodes.borrow().iter() {
            node.dom_nodes(&mut out);
        }
        out
    }

    pub fn dom_count(&self) -> usize {
        self.roots.dom_count()
    }

    pub fn dom(&self) -> &Dom {
        &self.ctx.dom
    }

    /// Detach the rendered nodes and drop every subscription
    pub fn remove(&self) -> Result<()> {
        let nodes = std::mem::take(&mut *self.roots.nodes.borrow_mut());
        for node in &nodes {
            node.remove()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_reactive::Value;
    use serde_json::json;

    fn data(v: serde_json::Value) -> ObjRef {
        Value::from_json(&v).as_object().unwrap().clone()
    }

    #[test]
    fn test_compile_stats() {
        let t = Template::compile(
            "`<ul class=${this.c}>${this.items.map(i => `<li>${i.name}</li>`)}<li>${this.n + 1}</li></ul>`",
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(
            t.stats(),
            TemplateStats {
                elements: 3,
                simple: 1,
                complex: 1,
                loops: 1
            }
        );
    }

    #[test]
    fn test_apply_into_existing_host() {
        let dom = Dom::new();
        let host = dom.create_element("my-card");
        let d = data(json!({"title": "Hi"}));
        let t = Template::compile("<my-card class=\"c\"><h1>${this.title}</h1></my-card>", &CompileOptions::default())
            .unwrap();
        let instance = t.instantiate(&d, &dom);
        assert_eq!(instance.apply(NodeId::NONE, Some(host)).unwrap(), 0);
        assert_eq!(dom.outer_html(host), "<my-card class=\"c\"><h1>Hi</h1></my-card>");
    }

    #[test]
    fn test_roots_appended_after_existing_children() {
        let dom = Dom::new();
        let parent = dom.create_element("div");
        let first = dom.create_element("span");
        dom.append_child(parent, first).unwrap();
        let d = data(json!({"a": "x"}));
        let instance = Template::compile("`${this.a}<b></b>`", &CompileOptions::default())
            .unwrap()
            .instantiate(&d, &dom);
        assert_eq!(instance.apply(parent, None).unwrap(), 2);

        d.set("a", Value::from_json(&json!(["1", "2"]))).unwrap();
        assert_eq!(dom.inner_html(parent), "<span></span>12<b></b>");

        instance.remove().unwrap();
        assert_eq!(dom.inner_html(parent), "<span></span>");
    }

    #[test]
    fn test_dropping_instance_unwatches() {
        let dom = Dom::new();
        let d = data(json!({"l": [{"n": 1}], "v": 1}));
        let before = lumen_reactive::registry_stats().subscriptions;
        let instance = Template::compile("<p>${this.v}${this.l.map(x => `<i>${x.n}</i>`)}</p>", &CompileOptions::default())
            .unwrap()
            .instantiate(&d, &dom);
        instance.apply(NodeId::NONE, None).unwrap();
        assert!(lumen_reactive::registry_stats().subscriptions > before);
        drop(instance);
        assert_eq!(lumen_reactive::registry_stats().subscriptions, before);
    }
}
