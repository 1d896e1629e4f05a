//! Per-node provisioning.
//!
//! One driver task runs per launched instance. It polls the provider until
//! the instance is running and reachable, runs the role's bootstrap plan,
//! reads the core count, and reports progress to the orchestrator over a
//! channel. The orchestrator is the only writer of node state; drivers only
//! emit events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::domain::{BootstrapPlan, InstanceId, NodeFailure, StepVars};
use crate::error::BootstrapError;
use crate::port::{AddressKind, CloudProvider, InstanceState, NodeConfigurator, NodeHandle};

/// Timing for a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    pub poll_interval: Duration,
    /// Budget from launch to `Ready`.
    pub node_timeout: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            node_timeout: Duration::from_secs(600),
        }
    }
}

/// Progress reported by a driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// The provider acknowledged the instance.
    Booting { id: InstanceId },
    /// The instance is reachable and bootstrap has started.
    Configuring {
        id: InstanceId,
        address: String,
        private_address: Option<String>,
    },
    Ready {
        id: InstanceId,
        core_count: Option<u32>,
    },
    Failed {
        id: InstanceId,
        failure: NodeFailure,
    },
}

impl NodeEvent {
    #[must_use]
    pub fn id(&self) -> &InstanceId {
        match self {
            NodeEvent::Booting { id }
            | NodeEvent::Configuring { id, .. }
            | NodeEvent::Ready { id, .. }
            | NodeEvent::Failed { id, .. } => id,
        }
    }
}

/// Everything a driver needs to provision one node.
#[derive(Debug, Clone)]
pub struct NodeJob {
    pub handle: NodeHandle,
    pub plan: Arc<BootstrapPlan>,
    pub vars: StepVars,
    /// Carries the manager's in-cluster address once it is ready.
    pub manager_ready: watch::Receiver<Option<String>>,
}

/// Drives nodes from `Requested` to `Ready` or `Failed`.
pub struct ProvisioningDriver {
    provider: Arc<dyn CloudProvider>,
    configurator: Arc<dyn NodeConfigurator>,
    retry: RetryPolicy,
    settings: DriverSettings,
    address_kind: AddressKind,
}

impl ProvisioningDriver {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        configurator: Arc<dyn NodeConfigurator>,
        retry: RetryPolicy,
        settings: DriverSettings,
        address_kind: AddressKind,
    ) -> Self {
        Self {
            provider,
            configurator,
            retry,
            settings,
            address_kind,
        }
    }

    #[must_use]
    pub fn settings(&self) -> DriverSettings {
        self.settings
    }

    /// Provision one node, reporting progress on `events`.
    ///
    /// Sends exactly one terminal event (`Ready` or `Failed`) unless `cancel`
    /// fires first, in which case the task stops polling and sends nothing
    /// further.
    pub async fn drive(
        &self,
        job: NodeJob,
        events: mpsc::Sender<NodeEvent>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let id = job.handle.id.clone();
        let budget = self.settings.node_timeout;

        let outcome = tokio::select! {
            () = cancelled(&mut cancel) => {
                debug!(instance = %id, "Provisioning cancelled");
                return;
            }
            result = timeout(budget, self.advance(&job, &events)) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(NodeFailure::from(BootstrapError::Timeout {
                    after_secs: budget.as_secs(),
                })),
            },
        };

        let event = match outcome {
            Ok(core_count) => {
                info!(instance = %id, role = %job.handle.role, cores = ?core_count, "Node ready");
                NodeEvent::Ready { id, core_count }
            }
            Err(failure) => {
                warn!(instance = %id, role = %job.handle.role, error = %failure, "Node failed");
                NodeEvent::Failed { id, failure }
            }
        };
        let _ = events.send(event).await;
    }

    async fn advance(
        &self,
        job: &NodeJob,
        events: &mpsc::Sender<NodeEvent>,
    ) -> Result<Option<u32>, NodeFailure> {
        let id = &job.handle.id;
        let mut booting = false;

        let (address, private_address) = loop {
            let status = self
                .retry
                .run("describe", || self.provider.describe(id))
                .await?;

            if !status.state.is_alive() {
                return Err(NodeFailure::InstanceLost {
                    state: status.state.to_string(),
                });
            }
            if !booting {
                booting = true;
                let _ = events.send(NodeEvent::Booting { id: id.clone() }).await;
            }

            if status.state == InstanceState::Running {
                match status.address(self.address_kind) {
                    Some(addr) if self.configurator.is_reachable(addr).await => {
                        break (addr.to_string(), status.private_address.clone());
                    }
                    Some(addr) => debug!(instance = %id, address = addr, "Waiting for remote shell"),
                    None => debug!(instance = %id, "Waiting for an address"),
                }
            }
            sleep(self.settings.poll_interval).await;
        };

        let _ = events
            .send(NodeEvent::Configuring {
                id: id.clone(),
                address: address.clone(),
                private_address,
            })
            .await;

        let mut vars = job.vars.clone();
        for step in job.plan.steps() {
            if step.needs_manager() && vars.manager_address.is_none() {
                debug!(instance = %id, step = %step.name, "Waiting for manager");
                let mut manager_ready = job.manager_ready.clone();
                let manager = manager_ready
                    .wait_for(Option::is_some)
                    .await
                    .map(|addr| addr.clone())
                    .map_err(|_| NodeFailure::ManagerUnavailable {
                        step: step.name.clone(),
                    })?;
                vars.manager_address = manager;
            }

            let command = job.plan.guarded_command(step, &vars);
            self.configurator.run(&address, &step.name, &command).await?;
            debug!(instance = %id, step = %step.name, "Bootstrap step done");
        }

        Ok(self.configurator.core_count(&address).await)
    }
}

/// Resolves once `flag` turns true or its sender goes away.
pub(crate) async fn cancelled(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|cancel| *cancel).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BootstrapStep, NodeRole};
    use crate::testkit::{ScriptedConfigurator, ScriptedProvider};

    fn driver(provider: Arc<ScriptedProvider>, configurator: Arc<ScriptedConfigurator>) -> ProvisioningDriver {
        ProvisioningDriver::new(
            provider,
            configurator,
            RetryPolicy::default(),
            DriverSettings::default(),
            AddressKind::Private,
        )
    }

    fn job(id: &str, role: NodeRole, steps: Vec<BootstrapStep>) -> (NodeJob, watch::Sender<Option<String>>) {
        let (tx, rx) = watch::channel(None);
        let plan = BootstrapPlan::try_new(role, "/var/lib/rcluster/steps", steps).unwrap();
        let job = NodeJob {
            handle: NodeHandle {
                id: InstanceId::new(id),
                role,
            },
            plan: Arc::new(plan),
            vars: StepVars {
                manager_address: None,
                shared_home: "/home/cluster".into(),
                user: "cluster".into(),
            },
            manager_ready: rx,
        };
        (job, tx)
    }

    async fn collect(mut rx: mpsc::Receiver<NodeEvent>) -> Vec<NodeEvent> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_emits_booting_configuring_ready() {
        let provider = Arc::new(ScriptedProvider::new());
        let handles = provider.launch("ami-1", 1, NodeRole::Worker, "token").await.unwrap();
        provider.set_pending_polls(&handles[0].id, 2);
        let configurator = Arc::new(ScriptedConfigurator::new());
        configurator.set_cores("10.0.0.1", 4);

        let (mut job, _manager) = job("i-0001", NodeRole::Worker, vec![BootstrapStep::new("runtime", "true")]);
        job.handle = handles[0].clone();
        let (tx, rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        driver(provider, configurator.clone()).drive(job, tx, cancel_rx).await;

        let events = collect(rx).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], NodeEvent::Booting { .. }));
        assert!(matches!(&events[1], NodeEvent::Configuring { address, .. } if address == "10.0.0.1"));
        assert_eq!(
            events[2],
            NodeEvent::Ready {
                id: InstanceId::new("i-0001"),
                core_count: Some(4)
            }
        );
        assert_eq!(configurator.steps_run("10.0.0.1"), vec!["runtime"]);
    }

    #[tokio::test(start_paused = true)]
    async fn script_failure_fails_the_node_once() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.launch("ami-1", 1, NodeRole::Worker, "token").await.unwrap();
        let configurator = Arc::new(ScriptedConfigurator::new());
        configurator.fail_step("10.0.0.1", "runtime", 100, "E: unable to locate package");

        let (job, _manager) = job(
            "i-0001",
            NodeRole::Worker,
            vec![BootstrapStep::new("runtime", "apt-get install r-base"), BootstrapStep::new("after", "true")],
        );
        let (tx, rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        driver(provider, configurator.clone()).drive(job, tx, cancel_rx).await;

        let events = collect(rx).await;
        let terminal: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, NodeEvent::Ready { .. } | NodeEvent::Failed { .. }))
            .collect();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(
            terminal[0],
            NodeEvent::Failed {
                failure: NodeFailure::Bootstrap(BootstrapError::ScriptFailure { exit_code: 100, .. }),
                ..
            }
        ));
        assert_eq!(configurator.steps_run("10.0.0.1"), vec!["runtime"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_node_times_out() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.launch("ami-1", 1, NodeRole::Worker, "token").await.unwrap();
        let configurator = Arc::new(ScriptedConfigurator::new());
        configurator.set_unreachable("10.0.0.1");

        let (job, _manager) = job("i-0001", NodeRole::Worker, vec![]);
        let (tx, rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        driver(provider, configurator).drive(job, tx, cancel_rx).await;

        let events = collect(rx).await;
        assert_eq!(
            events.last(),
            Some(&NodeEvent::Failed {
                id: InstanceId::new("i-0001"),
                failure: NodeFailure::Bootstrap(BootstrapError::Timeout { after_secs: 600 }),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn worker_mount_waits_for_manager_address() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.launch("ami-1", 1, NodeRole::Worker, "token").await.unwrap();
        let configurator = Arc::new(ScriptedConfigurator::new());

        let (job, manager) = job(
            "i-0001",
            NodeRole::Worker,
            vec![BootstrapStep::new("mount", "mount {manager_address}:{shared_home}")],
        );
        let (tx, rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let driver = driver(provider, configurator.clone());

        let drive = driver.drive(job, tx, cancel_rx);
        let publish = async {
            sleep(Duration::from_secs(60)).await;
            manager.send_replace(Some("10.0.0.9".into()));
        };
        tokio::join!(drive, publish);

        let events = collect(rx).await;
        assert!(matches!(events.last(), Some(NodeEvent::Ready { .. })));
        let commands = configurator.commands_run("10.0.0.1");
        assert!(commands[0].contains("mount 10.0.0.9:/home/cluster"));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_instance_fails_without_retrying() {
        let provider = Arc::new(ScriptedProvider::new());
        let handles = provider.launch("ami-1", 1, NodeRole::Worker, "token").await.unwrap();
        provider.set_state(&handles[0].id, InstanceState::Terminated);
        let configurator = Arc::new(ScriptedConfigurator::new());

        let (job, _manager) = job("i-0001", NodeRole::Worker, vec![]);
        let (tx, rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        driver(provider, configurator).drive(job, tx, cancel_rx).await;

        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            NodeEvent::Failed { failure: NodeFailure::InstanceLost { state }, .. } if state == "terminated"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_without_terminal_event() {
        let provider = Arc::new(ScriptedProvider::new());
        let handles = provider.launch("ami-1", 1, NodeRole::Worker, "token").await.unwrap();
        provider.set_pending_polls(&handles[0].id, u32::MAX);
        let configurator = Arc::new(ScriptedConfigurator::new());

        let (job, _manager) = job("i-0001", NodeRole::Worker, vec![]);
        let (tx, rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let driver = driver(provider, configurator);

        let drive = driver.drive(job, tx, cancel_rx);
        let cancel = async {
            sleep(Duration::from_secs(30)).await;
            cancel_tx.send_replace(true);
        };
        tokio::join!(drive, cancel);

        let events = collect(rx).await;
        assert_eq!(events, vec![NodeEvent::Booting { id: InstanceId::new("i-0001") }]);
    }
}
