//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`provider`] - `ScriptedProvider`, an in-memory [`CloudProvider`](crate::port::CloudProvider)
//! - [`configurator`] - `ScriptedConfigurator`, a recording [`NodeConfigurator`](crate::port::NodeConfigurator)
//! - [`store`] - `MemorySessionStore`
//!
//! The free functions build orchestrators and sessions wired to those fakes.

pub mod configurator;
pub mod provider;
pub mod store;

use std::sync::Arc;

pub use configurator::ScriptedConfigurator;
pub use provider::ScriptedProvider;
pub use store::MemorySessionStore;

use crate::application::{ClusterOrchestrator, OrchestratorSettings};
use crate::domain::{
    AccountContext, BootstrapPlan, BootstrapStep, ClusterNode, ClusterSession, InstanceId,
    NodeRole, NodeState, SessionId, SessionStatus,
};
use crate::port::AddressKind;

/// Marker directory used by test plans.
pub const MARKER_DIR: &str = "/var/lib/rcluster/steps";

/// Orchestrator settings with the stock plans, reaching nodes by private
/// address so scripted addresses are `10.0.0.n`.
pub fn settings() -> OrchestratorSettings {
    settings_with_plans(BootstrapPlan::default_manager(), BootstrapPlan::default_worker())
}

/// Orchestrator settings around custom step lists.
///
/// # Panics
///
/// Panics on duplicate step names.
pub fn settings_with_plans(
    manager: Vec<BootstrapStep>,
    worker: Vec<BootstrapStep>,
) -> OrchestratorSettings {
    let mut settings = OrchestratorSettings::new(
        BootstrapPlan::try_new(NodeRole::Manager, MARKER_DIR, manager).expect("manager plan"),
        BootstrapPlan::try_new(NodeRole::Worker, MARKER_DIR, worker).expect("worker plan"),
    );
    settings.address_kind = AddressKind::Private;
    settings
}

/// Orchestrator over the given fakes with a fresh in-memory store.
pub fn orchestrator(
    provider: Arc<ScriptedProvider>,
    configurator: Arc<ScriptedConfigurator>,
) -> ClusterOrchestrator {
    orchestrator_with(
        provider,
        configurator,
        Arc::new(MemorySessionStore::new()),
        settings(),
    )
}

/// Orchestrator over the given fakes, store and settings.
pub fn orchestrator_with(
    provider: Arc<ScriptedProvider>,
    configurator: Arc<ScriptedConfigurator>,
    store: Arc<MemorySessionStore>,
    settings: OrchestratorSettings,
) -> ClusterOrchestrator {
    ClusterOrchestrator::new(provider, configurator, store, settings)
}

/// A ready node with scripted-style addresses for index `n`.
pub fn ready_node(n: u32, role: NodeRole, cores: u32) -> ClusterNode {
    ClusterNode {
        id: InstanceId::new(format!("i-{n:04}")),
        role,
        state: NodeState::Ready,
        address: Some(format!("10.0.0.{n}")),
        private_address: Some(format!("10.0.0.{n}")),
        core_count: Some(cores),
        failure: None,
    }
}

/// An active session: manager `i-0001` plus `workers` ready workers.
///
/// # Panics
///
/// Never for the nodes built here.
pub fn active_session(account: AccountContext, workers: u32) -> ClusterSession {
    let mut nodes = vec![ready_node(1, NodeRole::Manager, 2)];
    nodes.extend((0..workers).map(|w| ready_node(w + 2, NodeRole::Worker, 2)));
    ClusterSession::try_new(
        SessionId::new("session-test"),
        account,
        "ami-test",
        workers as usize,
        SessionStatus::Active,
        nodes,
    )
    .expect("valid session")
}
