//! Correlation tree reconstruction from delivered envelopes.
//!
//! The engine never keeps the action tree in memory. Backends (and tests)
//! rebuild it purely from `action.id` / `action.parentId` references, so
//! insertion or delivery order does not matter.

use std::collections::HashMap;

use crate::envelope::EventEnvelope;
use crate::ids::ActionId;

/// One action in a reconstructed tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub envelope: EventEnvelope,
    pub children: Vec<ActionId>,
}

/// Parent/child tree of actions rebuilt from envelopes.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTree {
    nodes: HashMap<ActionId, TreeNode>,
    roots: Vec<ActionId>,
    orphans: Vec<ActionId>,
    duplicates: Vec<ActionId>,
}

impl CorrelationTree {
    /// Build a tree from envelopes in any order.
    ///
    /// Envelopes without a parseable `action.id` are skipped. A repeated
    /// action id is recorded in [`duplicates`](Self::duplicates) and the
    /// first envelope wins.
    pub fn from_envelopes<I>(envelopes: I) -> Self
    where
        I: IntoIterator<Item = EventEnvelope>,
    {
        let mut tree = Self::default();
        let mut order = Vec::new();

        for envelope in envelopes {
            let Some(id) = envelope.action_id() else {
                continue;
            };
            if tree.nodes.contains_key(&id) {
                tree.duplicates.push(id);
                continue;
            }
            order.push(id);
            tree.nodes.insert(
                id,
                TreeNode {
                    envelope,
                    children: Vec::new(),
                },
            );
        }

        for id in order {
            match tree.nodes[&id].envelope.parent_id() {
                None => tree.roots.push(id),
                Some(parent) => match tree.nodes.get_mut(&parent) {
                    Some(node) => node.children.push(id),
                    None => tree.orphans.push(id),
                },
            }
        }

        tree
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Actions without a parent reference.
    pub fn roots(&self) -> &[ActionId] {
        &self.roots
    }

    /// Actions whose parent was never delivered.
    pub fn orphans(&self) -> &[ActionId] {
        &self.orphans
    }

    /// Action ids seen more than once.
    pub fn duplicates(&self) -> &[ActionId] {
        &self.duplicates
    }

    pub fn get(&self, id: &ActionId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn children_of(&self, id: &ActionId) -> &[ActionId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent_of(&self, id: &ActionId) -> Option<ActionId> {
        self.nodes.get(id).and_then(|node| node.envelope.parent_id())
    }

    /// Distance from the nearest root (roots have depth 0).
    ///
    /// Returns `None` for unknown ids and for chains that do not end at a
    /// delivered root.
    pub fn depth(&self, id: &ActionId) -> Option<usize> {
        let mut depth = 0;
        let mut current = *id;
        loop {
            let node = self.nodes.get(&current)?;
            match node.envelope.parent_id() {
                None => return Some(depth),
                Some(parent) => {
                    depth += 1;
                    if depth > self.nodes.len() {
                        return None;
                    }
                    current = parent;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionOutcome, ActionRecord, Attributes};
    use crate::ids::SessionId;
    use crate::serializer::EventSerializer;
    use chrono::Utc;

    fn finalize(record: &ActionRecord) -> EventEnvelope {
        EventSerializer::new("test", "test.action", SessionId::new()).finalize(
            record,
            Utc::now(),
            &ActionOutcome::success(),
            &Attributes::new(),
        )
    }

    #[test]
    fn test_rebuilds_out_of_order() {
        let root = ActionRecord::new("session_started", None, Attributes::new(), Attributes::new());
        let child = ActionRecord::new("checkout", Some(root.id), Attributes::new(), Attributes::new());
        let grandchild = ActionRecord::new("authorize", Some(child.id), Attributes::new(), Attributes::new());

        let tree = CorrelationTree::from_envelopes(vec![
            finalize(&grandchild),
            finalize(&root),
            finalize(&child),
        ]);

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.roots(), &[root.id]);
        assert_eq!(tree.children_of(&root.id), &[child.id]);
        assert_eq!(tree.children_of(&child.id), &[grandchild.id]);
        assert_eq!(tree.parent_of(&grandchild.id), Some(child.id));
        assert_eq!(tree.depth(&grandchild.id), Some(2));
        assert!(tree.orphans().is_empty());
    }

    #[test]
    fn test_orphans_and_duplicates() {
        let missing_parent = ActionId::new();
        let orphan = ActionRecord::new("lost", Some(missing_parent), Attributes::new(), Attributes::new());
        let envelope = finalize(&orphan);

        let tree = CorrelationTree::from_envelopes(vec![envelope.clone(), envelope]);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.orphans(), &[orphan.id]);
        assert_eq!(tree.duplicates(), &[orphan.id]);
        assert!(tree.roots().is_empty());
        assert_eq!(tree.depth(&orphan.id), None);
    }

    #[test]
    fn test_empty_tree() {
        let tree = CorrelationTree::from_envelopes(Vec::new());
        assert!(tree.is_empty());
        assert!(tree.children_of(&ActionId::new()).is_empty());
    }
}
