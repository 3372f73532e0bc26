//! Template Compiler
//!
//! Turns the markup tokens of a template into an immutable tree of
//! [`NodeSpec`]s. This is done once per template; every instance and
//! every loop iteration renders from the same specs.
//!
//! Each `${...}` is classified here:
//! - simple: a bare property chain such as `this.user.name`
//! - loop: `<array>.map(<params> => <body>)` with nothing after the call
//! - complex: anything else, re-rendered wholesale
//!
//! and the property chains it depends on are collected so the renderer
//! can watch them.

use crate::error::TemplateError;
use crate::expr::{
    expression_body, parse_expression, parse_statements, strip_backticks, unescape, Argument, Body, Expr, Key,
    Property, Stmt, TemplatePart,
};
use lumen_dom::VOID_ELEMENTS;
use lumen_syntax::function::simple_map_expression;
use lumen_syntax::token::{join_leaves, significant, without_spaces};
use lumen_syntax::{ArgName, Token};
use std::collections::HashSet;
use std::rc::Rc;

type CompileResult<T> = Result<T, TemplateError>;

/// One static node of a compiled template
#[derive(Debug, Clone)]
pub enum NodeSpec {
    Element(Rc<ElementSpec>),
    Expression(Rc<ExprSpec>),
    Text(Rc<str>),
}

#[derive(Debug)]
pub struct ElementSpec {
    /// Lowercased tag name
    pub tag: String,
    pub attributes: Vec<AttrSpec>,
    /// `<div ${expr}>` expressions that produce whole attributes
    pub attribute_expressions: Vec<Rc<ExprSpec>>,
    pub children: Vec<NodeSpec>,
}

#[derive(Debug)]
pub struct AttrSpec {
    pub name: String,
    /// Empty for a bare boolean attribute
    pub parts: Vec<AttrPart>,
}

impl AttrSpec {
    /// The expression when the value is exactly one `${...}`
    pub fn whole_expression(&self) -> Option<&Rc<ExprSpec>> {
        match self.parts.as_slice() {
            [AttrPart::Expr(spec)] => Some(spec),
            _ => None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, AttrPart::Text(_)))
    }
}

#[derive(Debug)]
pub enum AttrPart {
    Text(String),
    Expr(Rc<ExprSpec>),
}

/// A compiled `${...}` or `#{...}`
#[derive(Debug)]
pub struct ExprSpec {
    pub kind: ExprKind,
    /// Property chains in local form, e.g. `["item", "title"]`
    pub watch_chains: Vec<Vec<String>>,
    /// Source text, for error messages
    pub source: String,
    /// `#{...}`: rendered once, never watched
    pub once: bool,
}

#[derive(Debug)]
pub enum ExprKind {
    Simple(Expr),
    Complex(Expr),
    Loop(LoopSpec),
}

#[derive(Debug)]
pub struct LoopSpec {
    /// The mapped array
    pub array: Expr,
    /// Chain of the array when it is a plain property chain
    pub array_chain: Option<Vec<String>>,
    /// Callback parameters: item, then optionally index and array
    pub params: Vec<ArgName>,
    /// Nodes rendered for every element
    pub item: Vec<NodeSpec>,
}

impl LoopSpec {
    /// Whether the callback uses the element index
    pub fn has_index(&self) -> bool {
        self.params.len() > 1
    }
}

impl ExprSpec {
    /// Compile an `expr`/`hashExpr` region token
    pub fn compile(token: &Token) -> CompileResult<Self> {
        Self::from_tokens(expression_body(token), token.is_kind("hashExpr"))
    }

    /// Compile the tokens of an expression body
    pub fn from_tokens(tokens: &[Token], once: bool) -> CompileResult<Self> {
        let source = join_leaves(tokens).trim().to_string();
        let body = without_spaces(tokens);

        if let Some(map) = simple_map_expression(&body) {
            let array = parse_expression(&body[map.watched.clone()])?;
            let array_chain = array.chain();
            let watch_chains = match &array_chain {
                Some(chain) => vec![chain.clone()],
                None => collect_chains(&array),
            };
            let item = compile_loop_item(&body[map.body.clone()], map.block, once)?;
            return Ok(Self {
                kind: ExprKind::Loop(LoopSpec {
                    array,
                    array_chain,
                    params: map.params,
                    item,
                }),
                watch_chains,
                source,
                once,
            });
        }

        let expr = parse_expression(tokens)?;
        let watch_chains = collect_chains(&expr);
        let kind = match expr.chain() {
            Some(_) => ExprKind::Simple(expr),
            None => ExprKind::Complex(expr),
        };
        Ok(Self {
            kind,
            watch_chains,
            source,
            once,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ExprKind::Simple(_) => "simple",
            ExprKind::Complex(_) => "complex",
            ExprKind::Loop(_) => "loop",
        }
    }
}

/// Nodes for one loop iteration: the markup of a template literal body,
/// or a nested expression (possibly another loop)
fn compile_loop_item(body: &[Token], block: bool, once: bool) -> CompileResult<Vec<NodeSpec>> {
    if block {
        let stmts = parse_statements(body)?;
        let expr = Expr::Block(Rc::new(stmts));
        let watch_chains = collect_chains(&expr);
        return Ok(vec![NodeSpec::Expression(Rc::new(ExprSpec {
            kind: ExprKind::Complex(expr),
            watch_chains,
            source: join_leaves(body).trim().to_string(),
            once,
        }))]);
    }

    let tokens = significant(body);
    if let [single] = tokens.as_slice() {
        if single.is_kind("template") {
            let inner = strip_backticks(single.children());
            if has_markup(inner) {
                return compile_nodes(inner);
            }
        }
    }
    Ok(vec![NodeSpec::Expression(Rc::new(ExprSpec::from_tokens(body, once)?))])
}

pub(crate) fn has_markup(tokens: &[Token]) -> bool {
    tokens
        .iter()
        .any(|t| t.is_kind("openTag") || t.is_kind("closeTag") || t.is_kind("comment"))
}

struct OpenElement {
    tag: String,
    attributes: Vec<AttrSpec>,
    attribute_expressions: Vec<Rc<ExprSpec>>,
    children: Vec<NodeSpec>,
}

impl OpenElement {
    fn close(self) -> NodeSpec {
        NodeSpec::Element(Rc::new(ElementSpec {
            tag: self.tag,
            attributes: self.attributes,
            attribute_expressions: self.attribute_expressions,
            children: self.children,
        }))
    }
}

#[derive(Default)]
struct TreeBuilder {
    roots: Vec<NodeSpec>,
    open: Vec<OpenElement>,
    text: String,
}

impl TreeBuilder {
    fn push(&mut self, node: NodeSpec) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        // whitespace between top-level nodes is layout, not content
        if self.open.is_empty() && text.trim().is_empty() {
            return;
        }
        self.push(NodeSpec::Text(Rc::from(text)));
    }

    fn close(&mut self, tag: &str) -> CompileResult<()> {
        let Some(at) = self.open.iter().rposition(|e| e.tag == tag) else {
            return Err(TemplateError::Unbalanced(format!("unexpected </{tag}>")));
        };
        while self.open.len() > at {
            if let Some(element) = self.open.pop() {
                if element.tag != tag {
                    tracing::warn!(tag = %element.tag, "implicitly closing element");
                }
                let node = element.close();
                self.push(node);
            }
        }
        Ok(())
    }
}

/// Build the node specs for a run of markup tokens (template body without
/// its backticks)
pub fn compile_nodes(tokens: &[Token]) -> CompileResult<Vec<NodeSpec>> {
    let mut tree = TreeBuilder::default();
    for token in tokens {
        match &*token.kind {
            "escape" => tree.text.push_str(&unescape(&token.text)),
            "comment" | "template" => {}
            "expr" | "hashExpr" => {
                tree.flush_text();
                tree.push(NodeSpec::Expression(Rc::new(ExprSpec::compile(token)?)));
            }
            "openTag" => {
                tree.flush_text();
                let (element, self_closing) = parse_open_tag(token)?;
                if self_closing || VOID_ELEMENTS.contains(&element.tag.as_str()) {
                    tree.push(element.close());
                } else {
                    tree.open.push(element);
                }
            }
            "closeTag" => {
                tree.flush_text();
                let tag = token
                    .text
                    .trim_start_matches("</")
                    .trim_end_matches('>')
                    .trim()
                    .to_ascii_lowercase();
                tree.close(&tag)?;
            }
            _ => tree.text.push_str(&token.text),
        }
    }
    tree.flush_text();
    if let Some(unclosed) = tree.open.last() {
        return Err(TemplateError::Unbalanced(format!("<{}> is never closed", unclosed.tag)));
    }
    Ok(tree.roots)
}

/// Tag name, attributes and whether the tag closes itself
fn parse_open_tag(token: &Token) -> CompileResult<(OpenElement, bool)> {
    let children = token.children();
    let mut element = OpenElement {
        tag: String::new(),
        attributes: Vec::new(),
        attribute_expressions: Vec::new(),
        children: Vec::new(),
    };
    let mut self_closing = false;
    let mut i = 0;
    while i < children.len() {
        let t = &children[i];
        match &*t.kind {
            "tagName" => element.tag = t.text[1..].to_ascii_lowercase(),
            "attrName" => {
                let name = t.text.clone();
                let mut parts = Vec::new();
                if let Some(eq) = next_significant(children, i + 1).filter(|&j| children[j].is_kind("equals")) {
                    i = eq;
                    if let Some(v) = next_significant(children, eq + 1).filter(|&j| !children[j].is_kind("tagEnd")) {
                        i = v;
                        parts = attribute_value(&children[v])?;
                    }
                }
                element.attributes.push(AttrSpec { name, parts });
            }
            "expr" | "hashExpr" => element.attribute_expressions.push(Rc::new(ExprSpec::compile(t)?)),
            "tagEnd" => self_closing = t.is("/>"),
            _ => {}
        }
        i += 1;
    }
    Ok((element, self_closing))
}

fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&j| !tokens[j].is_kind("whitespace"))
}

/// Parts of a quoted, unquoted or expression attribute value
fn attribute_value(token: &Token) -> CompileResult<Vec<AttrPart>> {
    match &*token.kind {
        "dquote" | "squote" => {
            let children = token.children();
            let start = usize::from(children.first().is_some_and(|t| t.kind == token.kind));
            let end = if children.len() > start && children.last().is_some_and(|t| t.kind == token.kind) {
                children.len() - 1
            } else {
                children.len()
            };
            let mut parts = Vec::new();
            for t in &children[start..end] {
                if t.is_kind("expr") || t.is_kind("hashExpr") {
                    parts.push(AttrPart::Expr(Rc::new(ExprSpec::compile(t)?)));
                } else if let Some(AttrPart::Text(text)) = parts.last_mut() {
                    text.push_str(&t.text);
                } else {
                    parts.push(AttrPart::Text(t.text.clone()));
                }
            }
            Ok(parts)
        }
        "expr" | "hashExpr" => Ok(vec![AttrPart::Expr(Rc::new(ExprSpec::compile(token)?))]),
        _ => Ok(vec![AttrPart::Text(token.text.clone())]),
    }
}

/// Property chains `expr` reads, minus names bound inside it
pub fn collect_chains(expr: &Expr) -> Vec<Vec<String>> {
    let mut collector = ChainCollector::default();
    collector.expr(expr);
    collector.finish()
}

#[derive(Default)]
struct ChainCollector {
    chains: Vec<Vec<String>>,
    /// Names bound by arrow parameters and declarations, innermost last
    bound: Vec<HashSet<String>>,
}

impl ChainCollector {
    fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|frame| frame.contains(name))
    }

    fn add(&mut self, mut chain: Vec<String>) {
        if chain.is_empty() || self.is_bound(&chain[0]) {
            return;
        }
        if chain.len() > 1 && chain.last().is_some_and(|last| last == "length") {
            chain.pop();
        }
        self.chains.push(chain);
    }

    fn bind(&mut self, target: &ArgName) {
        if let Some(frame) = self.bound.last_mut() {
            frame.extend(target.bound_names());
        }
    }

    fn expr(&mut self, expr: &Expr) {
        if let Some(chain) = expr.chain() {
            self.add(chain);
            return;
        }
        match expr {
            Expr::Literal(_) | Expr::This | Expr::Identifier(_) | Expr::Markup(_) => {}
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        self.expr(e);
                    }
                }
            }
            Expr::Array(items) => self.arguments(items),
            Expr::Object(props) => {
                for prop in props {
                    match prop {
                        Property::Init { key, value } => {
                            self.key(key);
                            self.expr(value);
                        }
                        Property::Spread(e) => self.expr(e),
                    }
                }
            }
            Expr::Member { object, property, .. } => {
                self.expr(object);
                self.key(property);
            }
            Expr::Call { callee, arguments, .. } => {
                match callee.as_ref() {
                    // a method call depends on its receiver, not on the method
                    Expr::Member { object, property, .. } => match object.chain() {
                        Some(chain) if chain.len() == 1 && chain[0] == "this" => {
                            if let Some(name) = property.static_name() {
                                self.add(vec!["this".to_string(), name]);
                            }
                        }
                        _ => {
                            self.expr(object);
                            self.key(property);
                        }
                    },
                    Expr::Identifier(_) => {}
                    other => self.expr(other),
                }
                self.arguments(arguments);
            }
            Expr::Arrow(function) => {
                self.bound.push(HashSet::new());
                for param in &function.params {
                    self.bind(&param.target);
                    if let Some(default) = &param.default {
                        self.expr(default);
                    }
                }
                match &function.body {
                    Body::Expr(e) => self.expr(e),
                    Body::Block(stmts) => self.stmts(stmts),
                }
                self.bound.pop();
            }
            Expr::Unary { argument, .. } | Expr::Update { argument, .. } => self.expr(argument),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Conditional { test, consequent, alternate } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Expr::Block(stmts) => {
                self.bound.push(HashSet::new());
                self.stmts(stmts);
                self.bound.pop();
            }
        }
    }

    fn key(&mut self, key: &Key) {
        if let Key::Computed(e) = key {
            self.expr(e);
        }
    }

    fn arguments(&mut self, items: &[Argument]) {
        for item in items {
            match item {
                Argument::Expr(e) | Argument::Spread(e) => self.expr(e),
                Argument::Hole => {}
            }
        }
    }

    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Declare(decls) => {
                for (target, init) in decls {
                    if let Some(init) = init {
                        self.expr(init);
                    }
                    self.bind(target);
                }
            }
            Stmt::Expr(e) => self.expr(e),
            Stmt::If { test, consequent, alternate } => {
                self.expr(test);
                self.stmt(consequent);
                if let Some(alternate) = alternate {
                    self.stmt(alternate);
                }
            }
            Stmt::Return(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            Stmt::Block(stmts) => self.stmts(stmts),
            Stmt::Empty => {}
        }
    }

    /// Deduplicated chains, dropping any chain that extends another one
    fn finish(self) -> Vec<Vec<String>> {
        let mut out: Vec<Vec<String>> = Vec::new();
        let mut chains = self.chains;
        chains.sort_by_key(Vec::len);
        for chain in chains {
            if !out.iter().any(|kept| chain.starts_with(kept)) {
                out.push(chain);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_syntax::{parse_template_tokens, LexOptions};

    fn compile(src: &str) -> Vec<NodeSpec> {
        let tokens = parse_template_tokens(src, &LexOptions::default()).unwrap();
        compile_nodes(strip_backticks(&tokens)).unwrap()
    }

    fn expression(node: &NodeSpec) -> &ExprSpec {
        match node {
            NodeSpec::Expression(spec) => spec,
            other => panic!("expected an expression, got {other:?}"),
        }
    }

    fn element(node: &NodeSpec) -> &ElementSpec {
        match node {
            NodeSpec::Element(spec) => spec,
            other => panic!("expected an element, got {other:?}"),
        }
    }

    fn chains(spec: &ExprSpec) -> Vec<String> {
        spec.watch_chains.iter().map(|c| c.join(".")).collect()
    }

    #[test]
    fn test_element_tree() {
        let nodes = compile("`<div class=\"a\"><br><p>hi <b>you</b></p><img/></div>`");
        assert_eq!(nodes.len(), 1);
        let div = element(&nodes[0]);
        assert_eq!(div.tag, "div");
        assert_eq!(div.attributes[0].name, "class");
        let tags: Vec<_> = div.children.iter().map(|c| element(c).tag.as_str()).collect();
        assert_eq!(tags, ["br", "p", "img"]);
        let p = element(&div.children[1]);
        assert!(matches!(&p.children[0], NodeSpec::Text(t) if &**t == "hi "));
    }

    #[test]
    fn test_unbalanced_markup() {
        let tokens = parse_template_tokens("<div><p></div></span>", &LexOptions::default()).unwrap();
        let err = compile_nodes(&tokens).unwrap_err();
        assert_eq!(err, TemplateError::Unbalanced("unexpected </span>".into()));

        let tokens = parse_template_tokens("<div>", &LexOptions::default()).unwrap();
        assert!(matches!(compile_nodes(&tokens), Err(TemplateError::Unbalanced(_))));
    }

    #[test]
    fn test_expression_kinds() {
        let nodes = compile("`<p>${this.user.name}${this.a + this.b.length}#{this.once}</p>`");
        let p = element(&nodes[0]);
        let simple = expression(&p.children[0]);
        assert_eq!(simple.kind_name(), "simple");
        assert_eq!(chains(simple), ["this.user.name"]);

        let complex = expression(&p.children[1]);
        assert_eq!(complex.kind_name(), "complex");
        assert_eq!(chains(complex), ["this.a", "this.b"]);

        assert!(expression(&p.children[2]).once);
    }

    #[test]
    fn test_loop_with_markup_body() {
        let nodes = compile("`<ul>${this.items.map((item, i) => `<li>${i}: ${item.title}</li>`)}</ul>`");
        let ul = element(&nodes[0]);
        let spec = expression(&ul.children[0]);
        let ExprKind::Loop(lp) = &spec.kind else {
            panic!("expected a loop");
        };
        assert_eq!(lp.array_chain, Some(vec!["this".to_string(), "items".into()]));
        assert!(lp.has_index());
        let li = element(&lp.item[0]);
        assert_eq!(li.tag, "li");
        assert_eq!(chains(expression(&li.children[2])), ["item.title"]);
    }

    #[test]
    fn test_nested_loop_body() {
        let nodes = compile("`${this.pets.map(p => p.activities.map(a => a))}`");
        let ExprKind::Loop(outer) = &expression(&nodes[0]).kind else {
            panic!("expected a loop");
        };
        let inner = expression(&outer.item[0]);
        let ExprKind::Loop(inner_loop) = &inner.kind else {
            panic!("expected a nested loop");
        };
        assert_eq!(inner_loop.array_chain, Some(vec!["p".to_string(), "activities".into()]));
    }

    #[test]
    fn test_chained_map_is_complex() {
        let nodes = compile("`${this.items.map(x => x.n).join(', ')}`");
        let spec = expression(&nodes[0]);
        assert_eq!(spec.kind_name(), "complex");
        assert_eq!(chains(spec), ["this.items"]);
    }

    #[test]
    fn test_bound_names_are_not_watched() {
        let nodes = compile("`${this.list.filter(x => x.on && x.v > this.min).length}`");
        assert_eq!(chains(expression(&nodes[0])), ["this.list", "this.min"]);

        let nodes = compile("`${this.format(this.price)}`");
        assert_eq!(chains(expression(&nodes[0])), ["this.format", "this.price"]);
    }

    #[test]
    fn test_attribute_parts() {
        let nodes = compile("`<input class=\"a ${this.cls} b\" value=${this.v} disabled ${this.attrs}>`");
        let input = element(&nodes[0]);
        assert_eq!(input.attributes.len(), 3);
        assert_eq!(input.attributes[0].parts.len(), 3);
        assert!(input.attributes[1].whole_expression().is_some());
        assert!(input.attributes[2].parts.is_empty());
        assert_eq!(input.attribute_expressions.len(), 1);
        assert!(input.children.is_empty());
    }
}
