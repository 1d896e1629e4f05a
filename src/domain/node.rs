//! Cluster nodes and their bootstrap state machine.
//!
//! ```text
//! Requested --> Booting --> Configuring --> Ready
//!     \            \             \
//!      +------------+-------------+--> Failed
//! ```
//!
//! Every non-terminated state may move to `Terminated`, which only happens
//! through an explicit terminate. `Ready` and `Failed` are terminal for
//! provisioning: once a node lands there it never re-enters the machine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::DomainError;
use super::id::InstanceId;
use crate::error::{BootstrapError, ProviderError};

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Runs the interactive service and exports the shared home directory.
    Manager,
    /// Contributes cores to the parallel pool.
    Worker,
}

impl NodeRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeRole::Manager => "manager",
            NodeRole::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Requested,
    Booting,
    Configuring,
    Ready,
    Failed,
    Terminated,
}

impl NodeState {
    /// Whether provisioning has finished for a node in this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Ready | NodeState::Failed | NodeState::Terminated
        )
    }

    /// Whether the state machine has an edge from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::{Booting, Configuring, Failed, Ready, Requested, Terminated};

        matches!(
            (self, next),
            (Requested, Booting)
                | (Booting, Configuring)
                | (Configuring, Ready)
                | (Requested | Booting | Configuring, Failed)
                | (Requested | Booting | Configuring | Ready | Failed, Terminated)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeState::Requested => "requested",
            NodeState::Booting => "booting",
            NodeState::Configuring => "configuring",
            NodeState::Ready => "ready",
            NodeState::Failed => "failed",
            NodeState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a node ended in `Failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeFailure {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider reports the instance as gone or going away.
    #[error("instance is {state}")]
    InstanceLost { state: String },

    /// A step needed the manager's address but the manager never became ready.
    #[error("manager never became available for step '{step}'")]
    ManagerUnavailable { step: String },
}

/// A single instance belonging to a cluster session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: InstanceId,
    pub role: NodeRole,
    pub state: NodeState,
    /// Address used to reach the node (SSH, service endpoint).
    #[serde(default)]
    pub address: Option<String>,
    /// In-cluster address, used for the hostfile when known.
    #[serde(default)]
    pub private_address: Option<String>,
    #[serde(default)]
    pub core_count: Option<u32>,
    /// Human-readable failure reason once the node is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ClusterNode {
    /// A freshly requested node.
    pub fn new(id: InstanceId, role: NodeRole) -> Self {
        Self {
            id,
            role,
            state: NodeState::Requested,
            address: None,
            private_address: None,
            core_count: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn is_manager(&self) -> bool {
        self.role == NodeRole::Manager
    }

    /// Move the node along its state machine.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTransition`] when the edge does not
    /// exist, which includes every attempt to leave a terminal state other
    /// than into `Terminated`.
    pub fn transition(&mut self, next: NodeState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                instance_id: self.id.to_string(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Address the hostfile should list for this node.
    #[must_use]
    pub fn hostfile_address(&self) -> Option<&str> {
        self.private_address
            .as_deref()
            .or(self.address.as_deref())
    }
}
