//! Node registry for one cluster session.
//!
//! Not synchronized: the orchestrator owns the registry and applies every
//! update from a single task, fed by the per-node driver tasks over a
//! channel.

use std::collections::HashMap;

use crate::domain::{ClusterNode, DomainError, InstanceId, NodeRole, NodeState};

/// Map of instance id to node, remembering insertion order.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<InstanceId, ClusterNode>,
    order: Vec<InstanceId>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node or replace the record with the same id.
    pub fn upsert(&mut self, node: ClusterNode) {
        if !self.nodes.contains_key(&node.id) {
            self.order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    #[must_use]
    pub fn get(&self, id: &InstanceId) -> Option<&ClusterNode> {
        self.nodes.get(id)
    }

    /// Apply a state transition, guarded by the node's state machine.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTransition`] for an unknown edge. An
    /// unknown id is reported the same way, from `Terminated`.
    pub fn transition(
        &mut self,
        id: &InstanceId,
        next: NodeState,
    ) -> Result<&mut ClusterNode, DomainError> {
        let Some(node) = self.nodes.get_mut(id) else {
            return Err(DomainError::InvalidTransition {
                instance_id: id.to_string(),
                from: NodeState::Terminated,
                to: next,
            });
        };
        node.transition(next)?;
        Ok(node)
    }

    /// All nodes, manager first, then in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<&ClusterNode> {
        let mut nodes: Vec<&ClusterNode> = self.order.iter().filter_map(|id| self.nodes.get(id)).collect();
        nodes.sort_by_key(|n| !n.is_manager());
        nodes
    }

    #[must_use]
    pub fn by_role(&self, role: NodeRole) -> Vec<&ClusterNode> {
        self.all().into_iter().filter(|n| n.role == role).collect()
    }

    #[must_use]
    pub fn manager(&self) -> Option<&ClusterNode> {
        self.by_role(NodeRole::Manager).into_iter().next()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<InstanceId> {
        self.all().into_iter().map(|n| n.id.clone()).collect()
    }

    /// Ids of nodes still provisioning.
    #[must_use]
    pub fn unsettled(&self) -> Vec<InstanceId> {
        self.all()
            .into_iter()
            .filter(|n| !n.state.is_terminal())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Whether every node reached a terminal state.
    #[must_use]
    pub fn all_settled(&self) -> bool {
        self.nodes.values().all(|n| n.state.is_terminal())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.upsert(ClusterNode::new(InstanceId::new("i-2"), NodeRole::Worker));
        registry.upsert(ClusterNode::new(InstanceId::new("i-1"), NodeRole::Manager));
        registry.upsert(ClusterNode::new(InstanceId::new("i-3"), NodeRole::Worker));
        registry
    }

    #[test]
    fn all_lists_manager_first_then_insertion_order() {
        let ids: Vec<String> = registry().all().iter().map(|n| n.id.to_string()).collect();
        assert_eq!(ids, vec!["i-1", "i-2", "i-3"]);
    }

    #[test]
    fn upsert_replaces_without_reordering() {
        let mut registry = registry();
        let mut node = registry.get(&InstanceId::new("i-2")).unwrap().clone();
        node.core_count = Some(8);
        registry.upsert(node);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.all()[1].core_count, Some(8));
    }

    #[test]
    fn by_role_filters() {
        let registry = registry();
        assert_eq!(registry.by_role(NodeRole::Worker).len(), 2);
        assert_eq!(registry.manager().unwrap().id.as_str(), "i-1");
    }

    #[test]
    fn settles_once_every_node_is_terminal() {
        let mut registry = registry();
        assert!(!registry.all_settled());
        for id in ["i-1", "i-2", "i-3"] {
            registry
                .transition(&InstanceId::new(id), NodeState::Failed)
                .unwrap();
        }
        assert!(registry.all_settled());
        assert!(registry.unsettled().is_empty());
    }

    #[test]
    fn rejects_unknown_ids_and_bad_edges() {
        let mut registry = registry();
        assert!(registry
            .transition(&InstanceId::new("i-9"), NodeState::Booting)
            .is_err());
        assert!(registry
            .transition(&InstanceId::new("i-1"), NodeState::Ready)
            .is_err());
    }
}
