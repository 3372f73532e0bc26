//! DOM Tree (arena-based allocation)
//!
//! Core node manipulation: append, insert at index, remove, attributes and
//! character data. Every mutation is recorded in the tree's [`MutationLog`].

use crate::events::{Listener, ListenerId};
use crate::node::{Node, NodeData};
use crate::observer::{MutationLog, MutationRecord};
use crate::{DomError, DomResult, NodeId};

/// Arena-based DOM tree
#[derive(Default)]
pub struct DomTree {
    nodes: Vec<Node>,
    listeners: Vec<(ListenerId, NodeId, String, Listener)>,
    next_listener: u64,
    log: MutationLog,
}

impl DomTree {
    /// Create a new empty DOM tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Get a mutable node by ID
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    fn node(&self, id: NodeId) -> DomResult<&Node> {
        self.get(id).ok_or(DomError::NotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> DomResult<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(DomError::NotFound(id))
    }

    /// Number of nodes ever allocated in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn log(&self) -> &MutationLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MutationLog {
        &mut self.log
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        self.log.node_created();
        id
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(Node::element(tag))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(Node::text(text))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(Node::comment(text))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).map(|n| n.parent).filter(|p| p.is_valid())
    }

    /// Iterate over the children of `parent`
    pub fn children(&self, parent: NodeId) -> Children<'_> {
        let next = self.get(parent).map(|n| n.first_child).unwrap_or(NodeId::NONE);
        Children { tree: self, next }
    }

    pub fn child_count(&self, parent: NodeId) -> usize {
        self.children(parent).count()
    }

    pub fn child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
        self.children(parent).nth(index)
    }

    fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        while node.is_valid() {
            if node == ancestor {
                return true;
            }
            node = self.get(node).map(|n| n.parent).unwrap_or(NodeId::NONE);
        }
        false
    }

    /// Unlink a node from its parent without logging
    fn unlink(&mut self, id: NodeId) -> DomResult<Option<NodeId>> {
        let (parent, prev, next) = {
            let n = self.node(id)?;
            (n.parent, n.prev_sibling, n.next_sibling)
        };
        if !parent.is_valid() {
            return Ok(None);
        }
        if prev.is_valid() {
            self.node_mut(prev)?.next_sibling = next;
        } else {
            self.node_mut(parent)?.first_child = next;
        }
        if next.is_valid() {
            self.node_mut(next)?.prev_sibling = prev;
        } else {
            self.node_mut(parent)?.last_child = prev;
        }
        let n = self.node_mut(id)?;
        n.parent = NodeId::NONE;
        n.prev_sibling = NodeId::NONE;
        n.next_sibling = NodeId::NONE;
        Ok(Some(parent))
    }

    /// Insert `child` under `parent` before `reference` (append when NONE)
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) -> DomResult<()> {
        if !self.node(parent)?.is_element() {
            return Err(DomError::NotAnElement(parent));
        }
        if reference == child {
            return Ok(());
        }
        if self.is_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest(child, parent));
        }
        if reference.is_valid() && self.node(reference)?.parent != parent {
            return Err(DomError::NotAChild { parent, child: reference });
        }
        if let Some(old_parent) = self.unlink(child)? {
            self.log.push(MutationRecord::removed(old_parent, child));
        }

        let prev = if reference.is_valid() {
            self.node(reference)?.prev_sibling
        } else {
            self.node(parent)?.last_child
        };
        {
            let n = self.node_mut(child)?;
            n.parent = parent;
            n.prev_sibling = prev;
            n.next_sibling = reference;
        }
        if prev.is_valid() {
            self.node_mut(prev)?.next_sibling = child;
        } else {
            self.node_mut(parent)?.first_child = child;
        }
        if reference.is_valid() {
            self.node_mut(reference)?.prev_sibling = child;
        } else {
            self.node_mut(parent)?.last_child = child;
        }
        self.log.push(MutationRecord::added(parent, child));
        Ok(())
    }

    /// Append a child node
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.insert_before(parent, child, NodeId::NONE)
    }

    /// Insert `child` so that it ends up at `index` among `parent`'s children.
    /// An index past the end appends.
    pub fn insert_at(&mut self, parent: NodeId, index: usize, child: NodeId) -> DomResult<()> {
        let reference = self.child_at(parent, index).unwrap_or(NodeId::NONE);
        self.insert_before(parent, child, reference)
    }

    /// Detach a node from its parent. Detaching a detached node is a no-op.
    pub fn remove(&mut self, id: NodeId) -> DomResult<()> {
        if let Some(parent) = self.unlink(id)? {
            tracing::trace!(?parent, node = ?id, "remove node");
            self.log.push(MutationRecord::removed(parent, id));
        }
        Ok(())
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.get(id)?.as_element().map(|e| e.tag.as_str())
    }

    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.get(id)?.as_element()?.get_attr(name)
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> DomResult<()> {
        let el = self.node_mut(id)?.as_element_mut().ok_or(DomError::NotAnElement(id))?;
        if el.get_attr(name) == Some(value) {
            return Ok(());
        }
        let old = el.set_attr(name, value);
        self.log.push(MutationRecord::attribute(id, name, old));
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> DomResult<bool> {
        let el = self.node_mut(id)?.as_element_mut().ok_or(DomError::NotAnElement(id))?;
        match el.remove_attr(name) {
            Some(old) => {
                self.log.push(MutationRecord::attribute(id, name, Some(old)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Attributes of an element in insertion order
    pub fn attributes(&self, id: NodeId) -> Vec<(String, String)> {
        self.get(id)
            .and_then(|n| n.as_element())
            .map(|e| e.attrs.iter().map(|a| (a.name.clone(), a.value.clone())).collect())
            .unwrap_or_default()
    }

    /// Replace the data of a text or comment node
    pub fn set_text(&mut self, id: NodeId, text: &str) -> DomResult<()> {
        let node = self.node_mut(id)?;
        let old = match &mut node.data {
            NodeData::Text(t) | NodeData::Comment(t) => {
                if t == text {
                    return Ok(());
                }
                std::mem::replace(t, text.to_string())
            }
            NodeData::Element(_) => return Err(DomError::NotAnElement(id)),
        };
        self.log.push(MutationRecord::character_data(id, old));
        Ok(())
    }

    /// Data of a text or comment node
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.get(id)?.data {
            NodeData::Text(t) | NodeData::Comment(t) => Some(t),
            NodeData::Element(_) => None,
        }
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.get(id).map(|n| &n.data) {
            Some(NodeData::Text(t)) => out.push_str(t),
            Some(NodeData::Element(_)) => {
                for child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn add_listener(&mut self, node: NodeId, kind: &str, listener: Listener) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, node, kind.to_string(), listener));
        id
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, ..)| *lid != id);
        before != self.listeners.len()
    }

    /// Listeners for `kind` on `target` and its ancestors, innermost first
    pub(crate) fn listeners_on_path(&self, target: NodeId, kind: &str) -> Vec<Listener> {
        let mut out = Vec::new();
        let mut node = target;
        while node.is_valid() {
            out.extend(
                self.listeners
                    .iter()
                    .filter(|(_, n, k, _)| *n == node && k == kind)
                    .map(|(.., l)| l.clone()),
            );
            node = self.get(node).map(|n| n.parent).unwrap_or(NodeId::NONE);
        }
        out
    }

    pub fn listener_count(&self, node: NodeId) -> usize {
        self.listeners.iter().filter(|(_, n, ..)| *n == node).count()
    }
}

/// Iterator over child ids
pub struct Children<'a> {
    tree: &'a DomTree,
    next: NodeId,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if !self.next.is_valid() {
            return None;
        }
        let current = self.next;
        self.next = self.tree.get(current).map(|n| n.next_sibling).unwrap_or(NodeId::NONE);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_at_positions() {
        let mut tree = DomTree::new();
        let ul = tree.create_element("ul");
        let a = tree.create_text("a");
        let b = tree.create_text("b");
        let c = tree.create_text("c");
        tree.append_child(ul, a).unwrap();
        tree.insert_at(ul, 5, c).unwrap();
        tree.insert_at(ul, 1, b).unwrap();
        let texts: Vec<_> = tree.children(ul).map(|id| tree.text(id).unwrap().to_string()).collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn test_remove_relinks_siblings() {
        let mut tree = DomTree::new();
        let p = tree.create_element("p");
        let ids: Vec<_> = (0..3).map(|i| tree.create_text(&i.to_string())).collect();
        for id in &ids {
            tree.append_child(p, *id).unwrap();
        }
        tree.remove(ids[1]).unwrap();
        assert_eq!(tree.child_count(p), 2);
        assert_eq!(tree.child_at(p, 1), Some(ids[2]));
        tree.remove(ids[2]).unwrap();
        assert_eq!(tree.get(p).unwrap().last_child, ids[0]);
        // Removing a detached node is harmless
        tree.remove(ids[2]).unwrap();
    }

    #[test]
    fn test_hierarchy_error() {
        let mut tree = DomTree::new();
        let outer = tree.create_element("div");
        let inner = tree.create_element("span");
        tree.append_child(outer, inner).unwrap();
        assert_eq!(
            tree.append_child(inner, outer),
            Err(DomError::HierarchyRequest(outer, inner))
        );
    }

    #[test]
    fn test_text_on_element_fails() {
        let mut tree = DomTree::new();
        let div = tree.create_element("div");
        assert!(tree.set_text(div, "x").is_err());
        let t = tree.create_text("x");
        assert!(tree.set_attribute(t, "a", "b").is_err());
    }
}
