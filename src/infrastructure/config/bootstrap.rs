//! Bootstrap plan and service endpoint configuration.

use serde::{Deserialize, Serialize};

use crate::domain::{BootstrapPlan, BootstrapStep, DomainError, HostfileOptions, NodeRole};

/// Node bootstrap settings.
///
/// Empty step lists fall back to the stock plans for each role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapConfig {
    /// Directory on each node holding step completion markers.
    #[serde(default = "default_marker_dir")]
    pub marker_dir: String,
    /// Home directory of the service account, exported by the manager.
    #[serde(default = "default_shared_home")]
    pub shared_home: String,
    /// Service account created on every node.
    #[serde(default = "default_service_user")]
    pub service_user: String,
    #[serde(default = "default_hostfile_name")]
    pub hostfile_name: String,
    /// Give the manager `cores - 1` hostfile slots.
    #[serde(default)]
    pub include_manager: bool,
    #[serde(default)]
    pub manager: Vec<BootstrapStep>,
    #[serde(default)]
    pub worker: Vec<BootstrapStep>,
}

fn default_marker_dir() -> String {
    "/var/lib/rcluster/steps".into()
}

fn default_shared_home() -> String {
    "/home/cluster".into()
}

fn default_service_user() -> String {
    "cluster".into()
}

fn default_hostfile_name() -> String {
    "hostfile".into()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            marker_dir: default_marker_dir(),
            shared_home: default_shared_home(),
            service_user: default_service_user(),
            hostfile_name: default_hostfile_name(),
            include_manager: false,
            manager: Vec::new(),
            worker: Vec::new(),
        }
    }
}

impl BootstrapConfig {
    /// Plan for `role`, using the stock steps when none are configured.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::DuplicateStep`] when two steps share a name.
    pub fn plan(&self, role: NodeRole) -> Result<BootstrapPlan, DomainError> {
        let configured = match role {
            NodeRole::Manager => &self.manager,
            NodeRole::Worker => &self.worker,
        };
        let steps = if configured.is_empty() {
            match role {
                NodeRole::Manager => BootstrapPlan::default_manager(),
                NodeRole::Worker => BootstrapPlan::default_worker(),
            }
        } else {
            configured.clone()
        };
        BootstrapPlan::try_new(role, self.marker_dir.clone(), steps)
    }

    #[must_use]
    pub fn hostfile_options(&self) -> HostfileOptions {
        HostfileOptions {
            include_manager: self.include_manager,
        }
    }
}

/// Interactive service on the manager.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_port")]
    pub port: u16,
    #[serde(default = "default_service_scheme")]
    pub scheme: String,
}

fn default_service_port() -> u16 {
    8787
}

fn default_service_scheme() -> String {
    "http".into()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_service_port(),
            scheme: default_service_scheme(),
        }
    }
}
