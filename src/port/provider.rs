//! Cloud provider port.
//!
//! A stateless facade over the provider's instance API. Implementations
//! classify every failure as transient or permanent; retrying is the
//! caller's job.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{InstanceId, NodeRole};
use crate::error::ProviderError;

/// Handle returned for each instance a launch call created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub id: InstanceId,
    pub role: NodeRole,
}

/// Provider-side lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown,
}

impl InstanceState {
    /// Map the provider's state name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Still on its way up or serving.
    #[must_use]
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which address the operator uses to reach nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    #[default]
    Public,
    Private,
}

impl AddressKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// Result of a describe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatus {
    pub state: InstanceState,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
}

impl InstanceStatus {
    #[must_use]
    pub fn address(&self, kind: AddressKind) -> Option<&str> {
        match kind {
            AddressKind::Public => self.public_address.as_deref(),
            AddressKind::Private => self.private_address.as_deref(),
        }
    }
}

/// Instance operations the orchestrator needs from a cloud provider.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Launch `count` instances of `image_id` for the given role.
    ///
    /// Calls repeating a `client_token` return the instances of the first
    /// call instead of launching more, so a retried request whose response
    /// was lost does not leave a second batch running.
    async fn launch(
        &self,
        image_id: &str,
        count: usize,
        role: NodeRole,
        client_token: &str,
    ) -> Result<Vec<NodeHandle>, ProviderError>;

    /// Current state and addresses of an instance.
    async fn describe(&self, id: &InstanceId) -> Result<InstanceStatus, ProviderError>;

    /// Terminate instances. Terminating an already terminated instance succeeds.
    async fn terminate(&self, ids: &[InstanceId]) -> Result<(), ProviderError>;

    /// Attach key/value tags to an instance.
    async fn tag(&self, id: &InstanceId, tags: &[(String, String)]) -> Result<(), ProviderError>;

    /// Provider name for logging.
    fn provider_name(&self) -> &'static str;
}
