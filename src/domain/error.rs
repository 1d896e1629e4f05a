//! Domain validation errors for cluster types.
//!
//! These errors are returned when a node transition or a session shape
//! would break a domain invariant.

use thiserror::Error;

use super::node::NodeState;

/// Errors that occur when domain invariants are violated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A node was asked to move along an edge its state machine does not have.
    #[error("node {instance_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The node being transitioned.
        instance_id: String,
        /// Current state.
        from: NodeState,
        /// Rejected target state.
        to: NodeState,
    },

    /// A session must hold exactly one manager node.
    #[error("a cluster session needs exactly one manager, found {found}")]
    ManagerCount {
        /// Number of manager nodes present.
        found: usize,
    },

    /// A session holds more workers than were requested.
    #[error("session holds {found} workers but only {desired} were requested")]
    TooManyWorkers { found: usize, desired: usize },

    /// The same instance appears twice in one session.
    #[error("instance {instance_id} appears more than once")]
    DuplicateNode { instance_id: String },

    /// Bootstrap step names must be unique within a role's plan.
    #[error("bootstrap step '{name}' is defined more than once")]
    DuplicateStep { name: String },
}
