//! Lumen DOM - in-memory Document Object Model
//!
//! Arena-based DOM tree that the template engine patches. Nodes are addressed
//! by [`NodeId`] and shared through the single-threaded [`Dom`] handle.

mod node;
mod tree;
mod events;
mod observer;
mod serializer;

pub use node::{Node, NodeData, ElementData, Attribute};
pub use tree::DomTree;
pub use events::{Event, Listener, ListenerId};
pub use observer::{MutationLog, MutationRecord, MutationType};
pub use serializer::{escape_attribute, escape_text, VOID_ELEMENTS};

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Node identifier (index into arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Sentinel for "no node"
    pub const NONE: NodeId = NodeId(u32::MAX);

    /// Whether this id refers to a node
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }

    /// Raw arena index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Result type for DOM operations
pub type DomResult<T> = Result<T, DomError>;

/// DOM operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("node {0:?} not found")]
    NotFound(NodeId),

    #[error("hierarchy request error: {0:?} cannot be inserted under {1:?}")]
    HierarchyRequest(NodeId, NodeId),

    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
}

/// Shared handle to a [`DomTree`].
///
/// Everything in Lumen runs on one thread, so the tree lives behind an
/// `Rc<RefCell<_>>`. Borrows are kept short: no borrow is held while event
/// listeners run.
#[derive(Clone, Default)]
pub struct Dom(Rc<RefCell<DomTree>>);

impl std::fmt::Debug for Dom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.try_borrow() {
            Ok(tree) => f.debug_struct("Dom").field("nodes", &tree.len()).finish(),
            Err(_) => f.write_str("Dom(<borrowed>)"),
        }
    }
}

impl Dom {
    /// Create a handle to a new, empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable access to the tree
    pub fn tree(&self) -> Ref<'_, DomTree> {
        self.0.borrow()
    }

    /// Mutable access to the tree
    pub fn tree_mut(&self) -> RefMut<'_, DomTree> {
        self.0.borrow_mut()
    }

    /// Whether two handles point at the same tree
    pub fn same_tree(&self, other: &Dom) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.tree_mut().create_element(tag)
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.tree_mut().create_text(text)
    }

    pub fn create_comment(&self, text: &str) -> NodeId {
        self.tree_mut().create_comment(text)
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.tree_mut().append_child(parent, child)
    }

    pub fn insert_at(&self, parent: NodeId, index: usize, child: NodeId) -> DomResult<()> {
        self.tree_mut().insert_at(parent, index, child)
    }

    pub fn remove(&self, node: NodeId) -> DomResult<()> {
        self.tree_mut().remove(node)
    }

    pub fn child_count(&self, parent: NodeId) -> usize {
        self.tree().child_count(parent)
    }

    pub fn child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
        self.tree().child_at(parent, index)
    }

    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.tree().children(parent).collect()
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> DomResult<()> {
        self.tree_mut().set_attribute(node, name, value)
    }

    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.tree().get_attribute(node, name).map(str::to_string)
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) -> DomResult<bool> {
        self.tree_mut().remove_attribute(node, name)
    }

    pub fn set_text(&self, node: NodeId, text: &str) -> DomResult<()> {
        self.tree_mut().set_text(node, text)
    }

    pub fn text(&self, node: NodeId) -> Option<String> {
        self.tree().text(node).map(str::to_string)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.tree().text_content(node)
    }

    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.tree().tag_name(node).map(str::to_string)
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        serializer::outer_html(&self.tree(), node)
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        serializer::inner_html(&self.tree(), node)
    }

    pub fn add_event_listener(&self, node: NodeId, kind: &str, listener: Listener) -> ListenerId {
        self.tree_mut().add_listener(node, kind, listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.tree_mut().remove_listener(id)
    }

    /// Dispatch an event at `target`, bubbling to its ancestors.
    ///
    /// Listeners are collected before any of them runs, so a listener may
    /// freely mutate the tree or (un)register listeners.
    pub fn dispatch_event(&self, target: NodeId, kind: &str) -> anyhow::Result<()> {
        let listeners = self.tree().listeners_on_path(target, kind);
        tracing::trace!(?target, kind, count = listeners.len(), "dispatch event");
        let event = Event::new(kind, target);
        for listener in listeners {
            listener(&event)?;
        }
        Ok(())
    }

    /// Drain recorded mutations
    pub fn take_records(&self) -> Vec<MutationRecord> {
        self.tree_mut().log_mut().take_records()
    }

    /// Number of nodes created since the last [`Dom::reset_created`]
    pub fn nodes_created(&self) -> usize {
        self.tree().log().nodes_created()
    }

    pub fn reset_created(&self) {
        self.tree_mut().log_mut().reset_created()
    }
}
