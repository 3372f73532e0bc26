//! Virtual Tree
//!
//! The live side of a compiled template. Every [`VNode`] is rendered from a
//! [`NodeSpec`] in some [`Scope`] and owns the DOM nodes it created:
//! - [`VElement`]: exactly one element, plus its children
//! - [`VText`]: exactly one text node
//! - [`VExpression`]: zero or more nodes, arranged in groups. A loop has
//!   one group per array element; other expressions have a single group.
//!
//! An expression's DOM nodes are spliced directly into its parent element,
//! so it records `start_index`, the position of its first node among the
//! parent's children. Every sibling list (an element's children, or the
//! roots of an instance) is shared through a [`SiblingList`] so that when
//! an expression grows or shrinks, the start indices of everything after
//! it can be recomputed.

use crate::attributes::{self, AttrBinding};
use crate::compile::{ElementSpec, ExprKind, ExprSpec, LoopSpec, NodeSpec};
use crate::context::RenderContext;
use crate::error::{EvalError, Result};
use crate::host::Fragment;
use crate::interp::{bind_pattern, eval};
use crate::scope::{ItemPath, Scope};
use lumen_dom::{Dom, ListenerId, NodeId};
use lumen_reactive::{watch, watch_path, Action, Change, ObjRef, Value, WatchId};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Subscriptions owned by one virtual node, dropped with it
#[derive(Debug, Default)]
pub(crate) struct Watches(RefCell<Vec<WatchId>>);

impl Watches {
    pub(crate) fn push(&self, id: WatchId) {
        self.0.borrow_mut().push(id);
    }

    pub(crate) fn first(&self) -> Option<WatchId> {
        self.0.borrow().first().copied()
    }

    pub(crate) fn clear(&self) {
        let ids = std::mem::take(&mut *self.0.borrow_mut());
        for id in ids {
            lumen_reactive::unwatch(id);
        }
    }
}

impl Drop for Watches {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Event listener removed from the DOM when dropped
pub(crate) struct ListenerGuard {
    dom: Dom,
    id: ListenerId,
}

impl ListenerGuard {
    pub(crate) fn new(dom: &Dom, id: ListenerId) -> Self {
        Self { dom: dom.clone(), id }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.dom.remove_event_listener(self.id);
    }
}

/// Virtual nodes whose DOM nodes share one parent
#[derive(Default)]
pub struct SiblingList {
    pub(crate) nodes: RefCell<Vec<VNode>>,
    /// Index of the first node among the parent's children
    pub(crate) base: Cell<usize>,
}

impl SiblingList {
    pub(crate) fn new(base: usize) -> Rc<Self> {
        Rc::new(Self {
            nodes: RefCell::new(Vec::new()),
            base: Cell::new(base),
        })
    }

    pub(crate) fn dom_count(&self) -> usize {
        self.nodes.borrow().iter().map(VNode::dom_count).sum()
    }
}

/// Recompute the start index of every expression in `list`, descending
/// into expression groups (their nodes share the same DOM parent)
pub(crate) fn reindex(list: &SiblingList) {
    let Ok(nodes) = list.nodes.try_borrow() else {
        return;
    };
    let mut index = list.base.get();
    for node in nodes.iter() {
        index = node.reindex_from(index);
    }
}

#[derive(Clone)]
pub enum VNode {
    Element(Rc<VElement>),
    Expression(Rc<VExpression>),
    Text(Rc<VText>),
}

impl VNode {
    /// Create the (not yet applied) virtual node for `spec`
    pub fn instantiate(spec: &NodeSpec, scope: &Scope, ctx: &Rc<RenderContext>) -> VNode {
        match spec {
            NodeSpec::Element(spec) => VNode::Element(Rc::new(VElement::new(spec.clone(), scope.clone(), ctx.clone()))),
            NodeSpec::Expression(spec) => VNode::Expression(VExpression::new(spec.clone(), scope.clone(), ctx.clone())),
            NodeSpec::Text(text) => VNode::Text(Rc::new(VText::new(ctx.dom.clone(), text))),
        }
    }

    /// Create DOM nodes and insert them into `parent` at `index`. Returns
    /// how many were inserted.
    pub fn apply(&self, parent: NodeId, index: usize, siblings: &Rc<SiblingList>) -> Result<usize> {
        match self {
            VNode::Element(el) => el.apply(parent, index, None),
            VNode::Expression(expr) => expr.apply(parent, index, siblings),
            VNode::Text(text) => text.apply(parent, index),
        }
    }

    /// Number of DOM nodes currently owned
    pub fn dom_count(&self) -> usize {
        match self {
            VNode::Element(_) | VNode::Text(_) => 1,
            VNode::Expression(expr) => expr.dom_count(),
        }
    }

    /// Detach the owned DOM nodes. Subscriptions go when the node is
    /// dropped.
    pub fn remove(&self) -> Result<()> {
        match self {
            VNode::Element(el) => Ok(el.ctx.dom.remove(el.node())?),
            VNode::Text(text) => Ok(text.dom.remove(text.node())?),
            VNode::Expression(expr) => expr.remove_all(),
        }
    }

    /// Owned DOM nodes in document order
    pub fn dom_nodes(&self, out: &mut Vec<NodeId>) {
        match self {
            VNode::Element(el) => out.push(el.node()),
            VNode::Text(text) => out.push(text.node()),
            VNode::Expression(expr) => {
                for group in expr.groups.borrow().iter() {
                    for node in &group.nodes {
                        node.dom_nodes(out);
                    }
                }
            }
        }
    }

    fn reindex_from(&self, index: usize) -> usize {
        match self {
            VNode::Element(_) | VNode::Text(_) => index + 1,
            VNode::Expression(expr) => {
                expr.start_index.set(index);
                let Ok(groups) = expr.groups.try_borrow() else {
                    tracing::trace!(source = %expr.spec.source, "skip reindex of expression being patched");
                    return index;
                };
                let mut index = index;
                for group in groups.iter() {
                    for node in &group.nodes {
                        index = node.reindex_from(index);
                    }
                }
                index
            }
        }
    }
}

/// A static element of the template
pub struct VElement {
    spec: Rc<ElementSpec>,
    scope: Scope,
    ctx: Rc<RenderContext>,
    node: Cell<NodeId>,
    children: Rc<SiblingList>,
    bindings: RefCell<Vec<Rc<AttrBinding>>>,
}

impl VElement {
    pub fn new(spec: Rc<ElementSpec>, scope: Scope, ctx: Rc<RenderContext>) -> Self {
        Self {
            spec,
            scope,
            ctx,
            node: Cell::new(NodeId::NONE),
            children: SiblingList::new(0),
            bindings: RefCell::new(Vec::new()),
        }
    }

    /// The live element, once applied
    pub fn node(&self) -> NodeId {
        self.node.get()
    }

    pub fn tag(&self) -> &str {
        &self.spec.tag
    }

    pub fn children(&self) -> Vec<VNode> {
        self.children.nodes.borrow().clone()
    }

    /// Render into `existing` when given, otherwise into a new element
    /// inserted into `parent` at `index` (if `parent` is a node).
    pub fn apply(&self, parent: NodeId, index: usize, existing: Option<NodeId>) -> Result<usize> {
        let dom = &self.ctx.dom;
        let el = existing.unwrap_or_else(|| dom.create_element(&self.spec.tag));
        self.node.set(el);

        let bindings = attributes::bind(&self.spec, &self.scope, &self.ctx, el)?;
        *self.bindings.borrow_mut() = bindings;

        let base = if existing.is_some() { dom.child_count(el) } else { 0 };
        self.children.base.set(base);
        let nodes: Vec<VNode> = self
            .spec
            .children
            .iter()
            .map(|spec| VNode::instantiate(spec, &self.scope, &self.ctx))
            .collect();
        *self.children.nodes.borrow_mut() = nodes.clone();
        let mut at = base;
        for node in &nodes {
            at += node.apply(el, at, &self.children)?;
        }

        if existing.is_none() && parent.is_valid() {
            dom.insert_at(parent, index, el)?;
        }
        tracing::trace!(tag = %self.spec.tag, node = ?el, children = at - base, "apply element");
        Ok(usize::from(existing.is_none()))
    }
}

/// A text node of the template, or one produced by an expression
pub struct VText {
    dom: Dom,
    text: RefCell<String>,
    node: Cell<NodeId>,
}

impl VText {
    pub fn new(dom: Dom, text: &str) -> Self {
        Self {
            dom,
            text: RefCell::new(text.to_string()),
            node: Cell::new(NodeId::NONE),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node.get()
    }

    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    fn apply(&self, parent: NodeId, index: usize) -> Result<usize> {
        let node = self.dom.create_text(&self.text.borrow());
        self.node.set(node);
        if parent.is_valid() {
            self.dom.insert_at(parent, index, node)?;
        }
        Ok(1)
    }

    /// Update the text in place, keeping the DOM node
    fn set_text(&self, text: &str) -> Result<()> {
        if *self.text.borrow() == text {
            return Ok(());
        }
        *self.text.borrow_mut() = text.to_string();
        Ok(self.dom.set_text(self.node(), text)?)
    }
}

/// Nodes rendered for one array element (or the whole value of a
/// non-loop expression)
struct Group {
    nodes: Vec<VNode>,
    /// Array index this group renders; shared with the item's path
    index: Rc<Cell<usize>>,
}

impl Group {
    fn dom_count(&self) -> usize {
        self.nodes.iter().map(VNode::dom_count).sum()
    }
}

/// A `${...}` or `#{...}` embedded in the template
pub struct VExpression {
    spec: Rc<ExprSpec>,
    scope: Scope,
    ctx: Rc<RenderContext>,
    groups: RefCell<Vec<Group>>,
    start_index: Cell<usize>,
    dom_parent: Cell<NodeId>,
    siblings: RefCell<Weak<SiblingList>>,
    watches: Watches,
    loop_watch: Cell<Option<WatchId>>,
    /// The array the loop groups were rendered from
    rendered: RefCell<Option<ObjRef>>,
    weak_self: Weak<VExpression>,
}

impl VExpression {
    pub fn new(spec: Rc<ExprSpec>, scope: Scope, ctx: Rc<RenderContext>) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            spec,
            scope,
            ctx,
            groups: RefCell::new(Vec::new()),
            start_index: Cell::new(0),
            dom_parent: Cell::new(NodeId::NONE),
            siblings: RefCell::new(Weak::new()),
            watches: Watches::default(),
            loop_watch: Cell::new(None),
            rendered: RefCell::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub fn spec(&self) -> &ExprSpec {
        &self.spec
    }

    pub fn start_index(&self) -> usize {
        self.start_index.get()
    }

    pub fn dom_count(&self) -> usize {
        self.groups.borrow().iter().map(Group::dom_count).sum()
    }

    /// Number of groups: the rendered array length for a loop
    pub fn group_count(&self) -> usize {
        self.groups.borrow().len()
    }

    /// Virtual nodes of group `i`
    pub fn group(&self, i: usize) -> Vec<VNode> {
        self.groups.borrow().get(i).map(|g| g.nodes.clone()).unwrap_or_default()
    }

    fn apply(&self, parent: NodeId, index: usize, siblings: &Rc<SiblingList>) -> Result<usize> {
        self.dom_parent.set(parent);
        self.start_index.set(index);
        *self.siblings.borrow_mut() = Rc::downgrade(siblings);
        if !self.spec.once {
            self.watch();
        }
        let groups = self.build_groups()?;
        let count = self.apply_groups(&groups, index, siblings)?;
        *self.groups.borrow_mut() = groups;
        Ok(count)
    }

    fn watch(&self) {
        let Some(root) = self.scope.this().as_object().cloned() else {
            return;
        };
        if let ExprKind::Loop(lp) = &self.spec.kind {
            if let Some(path) = lp.array_chain.as_ref().and_then(|c| self.scope.resolve(c)) {
                let id = watch(&root, &path, self.callback());
                self.loop_watch.set(Some(id));
                self.watches.push(id);
                return;
            }
        }
        for chain in &self.spec.watch_chains {
            if let Some(path) = self.scope.resolve(chain) {
                self.watches.push(watch(&root, &path, self.callback()));
            }
        }
    }

    fn callback(&self) -> impl Fn(&Change) -> anyhow::Result<()> + 'static {
        let weak = self.weak_self.clone();
        move |change: &Change| match weak.upgrade() {
            Some(expr) => expr.on_change(change).map_err(anyhow::Error::from),
            None => Ok(()),
        }
    }

    fn build_groups(&self) -> Result<Vec<Group>> {
        match &self.spec.kind {
            ExprKind::Simple(expr) | ExprKind::Complex(expr) => {
                let value = eval(expr, &self.scope)?;
                let mut nodes = Vec::new();
                self.flatten(value, &mut nodes);
                Ok(vec![Group {
                    nodes,
                    index: Rc::new(Cell::new(0)),
                }])
            }
            ExprKind::Loop(lp) => {
                let array = self.current_array(lp)?;
                let groups = (0..array.len()).map(|i| self.materialize(lp, i, &array)).collect();
                *self.rendered.borrow_mut() = Some(array);
                Ok(groups)
            }
        }
    }

    fn apply_groups(&self, groups: &[Group], index: usize, siblings: &Rc<SiblingList>) -> Result<usize> {
        let parent = self.dom_parent.get();
        let mut at = index;
        for group in groups {
            for node in &group.nodes {
                at += node.apply(parent, at, siblings)?;
            }
        }
        Ok(at - index)
    }

    /// Turn an expression result into virtual nodes
    fn flatten(&self, value: Value, out: &mut Vec<VNode>) {
        match value {
            Value::Undefined | Value::Null => {}
            Value::Object(obj) if obj.is_array() => {
                for item in obj.iter_values() {
                    self.flatten(item, out);
                }
            }
            Value::Host(host) => match host.as_any().downcast_ref::<Fragment>() {
                Some(fragment) => {
                    out.extend(fragment.nodes.iter().map(|spec| VNode::instantiate(spec, &fragment.scope, &self.ctx)));
                }
                None => out.push(self.text(&host.to_display())),
            },
            other => out.push(self.text(&other.to_display_string())),
        }
    }

    fn text(&self, text: &str) -> VNode {
        VNode::Text(Rc::new(VText::new(self.ctx.dom.clone(), text)))
    }

    /// The array a loop maps over
    fn current_array(&self, lp: &LoopSpec) -> Result<ObjRef> {
        match eval(&lp.array, &self.scope)? {
            Value::Object(obj) if obj.is_array() => Ok(obj),
            _ => Err(EvalError::NotIterable {
                path: self
                    .array_path()
                    .map(|p| p.join("."))
                    .or_else(|| lp.array_chain.as_ref().map(|c| c.join(".")))
                    .unwrap_or_default(),
                snippet: self.spec.source.clone(),
            }),
        }
    }

    /// Current data path of the mapped array. Index segments follow the
    /// registry's rewrites as enclosing arrays are edited.
    fn array_path(&self) -> Option<Vec<String>> {
        if let Some(id) = self.loop_watch.get() {
            return watch_path(id);
        }
        match &self.spec.kind {
            ExprKind::Loop(lp) => lp.array_chain.as_ref().and_then(|c| self.scope.resolve(c)),
            _ => None,
        }
    }

    /// Build (without applying) the group for element `i`
    fn materialize(&self, lp: &LoopSpec, i: usize, array: &ObjRef) -> Group {
        let index = Rc::new(Cell::new(i));
        let scope = self.scope.child();
        let params = &lp.params;

        if let Some(item) = params.first() {
            let weak = self.weak_self.clone();
            let cell = index.clone();
            let item_path = ItemPath::Dynamic(Rc::new(move || {
                let mut path = weak.upgrade()?.array_path()?;
                path.push(cell.get().to_string());
                Some(path)
            }));
            bind_pattern(&scope, item, array.get(&i.to_string()), item_path);
        }
        if let Some(position) = params.get(1) {
            bind_pattern(&scope, position, Value::Number(i as f64), ItemPath::Unbound);
        }
        if let Some(whole) = params.get(2) {
            let weak = self.weak_self.clone();
            let array_path = ItemPath::Dynamic(Rc::new(move || weak.upgrade()?.array_path()));
            bind_pattern(&scope, whole, Value::Object(array.clone()), array_path);
        }

        let nodes = lp.item.iter().map(|spec| VNode::instantiate(spec, &scope, &self.ctx)).collect();
        Group { nodes, index }
    }

    fn on_change(&self, change: &Change) -> Result<()> {
        match &self.spec.kind {
            ExprKind::Loop(lp) => self.on_loop_change(lp, change),
            ExprKind::Simple(_) | ExprKind::Complex(_) => self.update(),
        }
    }

    /// Re-evaluate a non-loop expression, keeping text nodes that are still
    /// text nodes and rebuilding the rest
    fn update(&self) -> Result<()> {
        let Some(siblings) = self.siblings.borrow().upgrade() else {
            return Ok(());
        };
        let fresh = match self.build_groups()?.pop() {
            Some(group) => group.nodes,
            None => Vec::new(),
        };
        let old = self.groups.borrow_mut().pop().map(|g| g.nodes).unwrap_or_default();
        let before: usize = old.iter().map(VNode::dom_count).sum();
        let parent = self.dom_parent.get();

        let mut kept = Vec::with_capacity(fresh.len());
        let mut at = self.start_index.get();
        let mut old = old.into_iter();
        let mut fresh = fresh.into_iter();
        loop {
            match (old.next(), fresh.next()) {
                (Some(VNode::Text(prev)), Some(VNode::Text(next))) => {
                    prev.set_text(&next.text())?;
                    at += 1;
                    kept.push(VNode::Text(prev));
                }
                (Some(prev), Some(next)) => {
                    prev.remove()?;
                    at += next.apply(parent, at, &siblings)?;
                    kept.push(next);
                }
                (Some(prev), None) => prev.remove()?,
                (None, Some(next)) => {
                    at += next.apply(parent, at, &siblings)?;
                    kept.push(next);
                }
                (None, None) => break,
            }
        }

        let after = at - self.start_index.get();
        self.groups.borrow_mut().push(Group {
            nodes: kept,
            index: Rc::new(Cell::new(0)),
        });
        if after != before {
            reindex(&siblings);
        }
        Ok(())
    }

    fn on_loop_change(&self, lp: &LoopSpec, change: &Change) -> Result<()> {
        let Some(array_path) = self.array_path() else {
            return self.rebuild();
        };
        let path = &change.path;
        if array_path.starts_with(path) && path.len() < array_path.len() {
            // something above the array changed; it may still be the same array
            let same = matches!(
                (eval(&lp.array, &self.scope), &*self.rendered.borrow()),
                (Ok(Value::Object(now)), Some(before)) if now.ptr_eq(before)
            );
            if same {
                return Ok(());
            }
            return self.rebuild();
        }
        if !path.starts_with(&array_path) || path.len() == array_path.len() {
            return self.rebuild();
        }
        if path.len() > array_path.len() + 1 {
            // an element's own property: its group watches that
            return Ok(());
        }
        let Ok(i) = path[array_path.len()].parse::<usize>() else {
            return self.rebuild();
        };
        let Some(siblings) = self.siblings.borrow().upgrade() else {
            return Ok(());
        };

        let array = self.current_array(lp)?;
        let count = self.group_count();
        tracing::trace!(action = %change.action, index = i, groups = count, "loop change");
        match change.action {
            Action::Set if i < count => self.replace_group(lp, i, &array, &siblings)?,
            Action::Set | Action::Insert if i <= count => self.insert_group(lp, i, &array, &siblings)?,
            Action::Remove if i < count => self.remove_group(i)?,
            Action::Delete if i < count => {
                if i < array.len() {
                    self.replace_group(lp, i, &array, &siblings)?;
                } else {
                    self.remove_group(i)?;
                }
            }
            Action::Delete => {}
            _ => return self.rebuild(),
        }

        if lp.has_index() && matches!(change.action, Action::Insert | Action::Remove) {
            let from = if change.action == Action::Insert { i + 1 } else { i };
            for j in from..self.group_count().min(array.len()) {
                self.replace_group(lp, j, &array, &siblings)?;
            }
        }
        reindex(&siblings);
        Ok(())
    }

    /// DOM offset of group `i`
    fn group_offset(&self, i: usize) -> usize {
        self.start_index.get() + self.groups.borrow()[..i].iter().map(Group::dom_count).sum::<usize>()
    }

    fn insert_group(&self, lp: &LoopSpec, i: usize, array: &ObjRef, siblings: &Rc<SiblingList>) -> Result<()> {
        let group = self.materialize(lp, i, array);
        let offset = self.group_offset(i);
        self.apply_groups(std::slice::from_ref(&group), offset, siblings)?;
        let mut groups = self.groups.borrow_mut();
        for later in &groups[i..] {
            later.index.set(later.index.get() + 1);
        }
        groups.insert(i, group);
        Ok(())
    }

    fn remove_group(&self, i: usize) -> Result<()> {
        let group = {
            let mut groups = self.groups.borrow_mut();
            let group = groups.remove(i);
            for later in &groups[i..] {
                later.index.set(later.index.get() - 1);
            }
            group
        };
        for node in &group.nodes {
            node.remove()?;
        }
        Ok(())
    }

    fn replace_group(&self, lp: &LoopSpec, i: usize, array: &ObjRef, siblings: &Rc<SiblingList>) -> Result<()> {
        self.remove_group(i)?;
        self.insert_group(lp, i, array, siblings)
    }

    /// Drop every group and render from scratch
    fn rebuild(&self) -> Result<()> {
        tracing::debug!(source = %self.spec.source, "rebuild expression");
        let Some(siblings) = self.siblings.borrow().upgrade() else {
            return Ok(());
        };
        self.remove_all()?;
        let groups = self.build_groups()?;
        self.apply_groups(&groups, self.start_index.get(), &siblings)?;
        *self.groups.borrow_mut() = groups;
        reindex(&siblings);
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        let groups = std::mem::take(&mut *self.groups.borrow_mut());
        for group in &groups {
            for node in &group.nodes {
                node.remove()?;
            }
        }
        Ok(())
    }
}
