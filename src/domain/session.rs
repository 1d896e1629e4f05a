//! Cluster sessions and the manager endpoint they expose.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::id::{AccountContext, InstanceId, SessionId};
use super::node::{ClusterNode, NodeRole};

/// Whether a session is still being provisioned or has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Instances exist but the launch has not finished.
    Provisioning,
    /// The launch committed; the manager is serving.
    Active,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Provisioning => f.write_str("provisioning"),
            SessionStatus::Active => f.write_str("active"),
        }
    }
}

/// One launched cluster: a manager plus its workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSession {
    pub id: SessionId,
    pub account: AccountContext,
    pub image_id: String,
    pub desired_workers: usize,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    nodes: Vec<ClusterNode>,
}

impl ClusterSession {
    /// Build a session, putting the manager first.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one node is a manager, no instance appears
    /// twice, and there are at most `desired_workers` workers.
    pub fn try_new(
        id: SessionId,
        account: AccountContext,
        image_id: impl Into<String>,
        desired_workers: usize,
        status: SessionStatus,
        nodes: Vec<ClusterNode>,
    ) -> Result<Self, DomainError> {
        let (mut ordered, workers): (Vec<_>, Vec<_>) =
            nodes.into_iter().partition(ClusterNode::is_manager);
        ordered.extend(workers);

        let session = Self {
            id,
            account,
            image_id: image_id.into(),
            desired_workers,
            created_at: Utc::now(),
            status,
            nodes: ordered,
        };
        session.validate()?;
        Ok(session)
    }

    /// Check the session invariants. Called on construction and after loading.
    ///
    /// # Errors
    ///
    /// See [`ClusterSession::try_new`].
    pub fn validate(&self) -> Result<(), DomainError> {
        let managers = self.nodes.iter().filter(|n| n.is_manager()).count();
        if managers != 1 || !self.nodes[0].is_manager() {
            return Err(DomainError::ManagerCount { found: managers });
        }

        let workers = self.nodes.len() - 1;
        if workers > self.desired_workers {
            return Err(DomainError::TooManyWorkers {
                found: workers,
                desired: self.desired_workers,
            });
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(DomainError::DuplicateNode {
                    instance_id: node.id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// All nodes, manager first.
    #[must_use]
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    #[must_use]
    pub fn manager(&self) -> &ClusterNode {
        &self.nodes[0]
    }

    pub fn workers(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Worker)
    }

    #[must_use]
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Where the manager's interactive service can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub session_id: SessionId,
    pub instance_id: InstanceId,
    pub address: String,
    pub port: u16,
    pub scheme: String,
}

impl EndpointInfo {
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}:{}/", self.scheme, self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountContext {
        AccountContext::new("default", "us-east-1")
    }

    fn manager() -> ClusterNode {
        ClusterNode::new(InstanceId::new("i-m"), NodeRole::Manager)
    }

    fn worker(id: &str) -> ClusterNode {
        ClusterNode::new(InstanceId::new(id), NodeRole::Worker)
    }

    #[test]
    fn manager_is_moved_to_the_front() {
        let session = ClusterSession::try_new(
            SessionId::new("s"),
            account(),
            "ami-1",
            2,
            SessionStatus::Active,
            vec![worker("i-a"), manager(), worker("i-b")],
        )
        .unwrap();

        assert_eq!(session.manager().id.as_str(), "i-m");
        assert_eq!(session.workers().count(), 2);
        assert_eq!(
            session.instance_ids(),
            vec![
                InstanceId::new("i-m"),
                InstanceId::new("i-a"),
                InstanceId::new("i-b")
            ]
        );
    }

    #[test]
    fn rejects_missing_or_duplicate_manager() {
        let none = ClusterSession::try_new(
            SessionId::new("s"),
            account(),
            "ami-1",
            1,
            SessionStatus::Active,
            vec![worker("i-a")],
        );
        assert_eq!(none.unwrap_err(), DomainError::ManagerCount { found: 0 });

        let mut second = manager();
        second.id = InstanceId::new("i-m2");
        let two = ClusterSession::try_new(
            SessionId::new("s"),
            account(),
            "ami-1",
            1,
            SessionStatus::Active,
            vec![manager(), second],
        );
        assert_eq!(two.unwrap_err(), DomainError::ManagerCount { found: 2 });
    }

    #[test]
    fn rejects_more_workers_than_requested() {
        let result = ClusterSession::try_new(
            SessionId::new("s"),
            account(),
            "ami-1",
            1,
            SessionStatus::Active,
            vec![manager(), worker("i-a"), worker("i-b")],
        );
        assert!(matches!(
            result,
            Err(DomainError::TooManyWorkers {
                found: 2,
                desired: 1
            })
        ));
    }

    #[test]
    fn rejects_duplicate_instances() {
        let result = ClusterSession::try_new(
            SessionId::new("s"),
            account(),
            "ami-1",
            2,
            SessionStatus::Active,
            vec![manager(), worker("i-a"), worker("i-a")],
        );
        assert!(matches!(result, Err(DomainError::DuplicateNode { .. })));
    }

    #[test]
    fn endpoint_url_includes_port() {
        let endpoint = EndpointInfo {
            session_id: SessionId::new("s"),
            instance_id: InstanceId::new("i-m"),
            address: "203.0.113.4".into(),
            port: 8787,
            scheme: "http".into(),
        };
        assert_eq!(endpoint.url(), "http://203.0.113.4:8787/");
    }
}
