//! Mutation records
//!
//! Every structural, attribute and character-data change made to a
//! [`DomTree`](crate::DomTree) is appended to its log, in the spirit of
//! `MutationObserver`. Tests use it to check that a patch touched only what
//! it had to.

use crate::NodeId;

/// Mutation record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub mutation_type: MutationType,
    pub target: NodeId,
    pub added_node: Option<NodeId>,
    pub removed_node: Option<NodeId>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    Attributes,
    CharacterData,
    ChildList,
}

impl MutationRecord {
    pub fn added(parent: NodeId, child: NodeId) -> Self {
        Self {
            mutation_type: MutationType::ChildList,
            target: parent,
            added_node: Some(child),
            removed_node: None,
            attribute_name: None,
            old_value: None,
        }
    }

    pub fn removed(parent: NodeId, child: NodeId) -> Self {
        Self {
            mutation_type: MutationType::ChildList,
            target: parent,
            added_node: None,
            removed_node: Some(child),
            attribute_name: None,
            old_value: None,
        }
    }

    pub fn attribute(target: NodeId, name: &str, old_value: Option<String>) -> Self {
        Self {
            mutation_type: MutationType::Attributes,
            target,
            added_node: None,
            removed_node: None,
            attribute_name: Some(name.to_string()),
            old_value,
        }
    }

    pub fn character_data(target: NodeId, old_value: String) -> Self {
        Self {
            mutation_type: MutationType::CharacterData,
            target,
            added_node: None,
            removed_node: None,
            attribute_name: None,
            old_value: Some(old_value),
        }
    }
}

/// Append-only log of mutations plus a created-node counter
#[derive(Debug, Default)]
pub struct MutationLog {
    records: Vec<MutationRecord>,
    created: usize,
}

impl MutationLog {
    pub fn push(&mut self, record: MutationRecord) {
        self.records.push(record);
    }

    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn records(&self) -> &[MutationRecord] {
        &self.records
    }

    pub(crate) fn node_created(&mut self) {
        self.created += 1;
    }

    pub fn nodes_created(&self) -> usize {
        self.created
    }

    pub fn reset_created(&mut self) {
        self.created = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomTree;

    #[test]
    fn test_records_child_list_and_data() {
        let mut tree = DomTree::new();
        let p = tree.create_element("p");
        let t = tree.create_text("old");
        tree.append_child(p, t).unwrap();
        tree.set_text(t, "new").unwrap();
        tree.set_text(t, "new").unwrap();

        let records = tree.log_mut().take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], MutationRecord::added(p, t));
        assert_eq!(records[1].mutation_type, MutationType::CharacterData);
        assert_eq!(records[1].old_value.as_deref(), Some("old"));
        assert_eq!(tree.log().nodes_created(), 2);
    }
}
