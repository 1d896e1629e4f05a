//! Application services (use cases).
//!
//! The orchestrator drives the cluster lifecycle; per-node provisioning,
//! the node registry and provider retries support it.

pub mod orchestrator;
pub mod provisioning;
pub mod registry;
pub mod retry;

pub use orchestrator::{
    ClusterOrchestrator, FailedNode, LaunchReport, LaunchRequest, OrchestratorSettings,
    TerminateReport,
};
pub use provisioning::{DriverSettings, NodeEvent, NodeJob, ProvisioningDriver};
pub use registry::NodeRegistry;
pub use retry::RetryPolicy;
