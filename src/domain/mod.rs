//! Provider-agnostic cluster domain: nodes, sessions, hostfiles, and
//! bootstrap plans.

pub mod bootstrap;
pub mod error;
pub mod hostfile;
pub mod id;
pub mod node;
pub mod session;

pub use bootstrap::{BootstrapPlan, BootstrapStep, StepVars};
pub use error::DomainError;
pub use hostfile::{Hostfile, HostfileEntry, HostfileOptions};
pub use id::{AccountContext, InstanceId, SessionId};
pub use node::{ClusterNode, NodeFailure, NodeRole, NodeState};
pub use session::{ClusterSession, EndpointInfo, SessionStatus};
