//! Cluster lifecycle: launch, open, terminate.
//!
//! `launch` requests the manager and workers concurrently, fans out one
//! provisioning task per node, and folds their events into a
//! [`NodeRegistry`] from this task alone. The launch commits only once
//! every node is terminal:
//!
//! ```text
//! manager Ready, workers all Ready    -> Active session
//! manager Ready, some workers Failed  -> Active session, failed workers reported and terminated
//! manager Failed                      -> every node terminated, ManagerBootstrapFailed
//! session deadline passed             -> every node terminated, LaunchTimeout
//! cancelled                           -> every node terminated, LaunchCancelled
//! ```
//!
//! The session deadline covers the whole call, from the first provider
//! request to the final save. A record is saved as soon as the instances
//! exist; a `terminate` from another process clears it, and the launch
//! then stops instead of committing.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::provisioning::{cancelled, DriverSettings, NodeEvent, NodeJob, ProvisioningDriver};
use super::registry::NodeRegistry;
use super::retry::RetryPolicy;
use crate::domain::{
    AccountContext, BootstrapPlan, ClusterNode, ClusterSession, EndpointInfo, Hostfile,
    HostfileOptions, InstanceId, NodeRole, NodeState, SessionId, SessionStatus, StepVars,
};
use crate::error::{Error, LifecycleError, ProviderError, Result};
use crate::port::{AddressKind, CloudProvider, InstanceState, NodeConfigurator, NodeHandle, SessionStore};

/// Knobs for the orchestrator, usually built from the config file.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub manager_plan: BootstrapPlan,
    pub worker_plan: BootstrapPlan,
    pub retry: RetryPolicy,
    pub driver: DriverSettings,
    /// Budget for the whole launch.
    pub session_timeout: Duration,
    pub hostfile: HostfileOptions,
    /// Shared home directory on the manager; the hostfile lands here.
    pub shared_home: String,
    pub hostfile_name: String,
    /// Service account created on every node.
    pub user: String,
    /// Tag key marking instances with their session id.
    pub tag_key: String,
    pub service_port: u16,
    pub service_scheme: String,
    pub address_kind: AddressKind,
}

impl OrchestratorSettings {
    /// Settings with stock defaults around the given plans.
    pub fn new(manager_plan: BootstrapPlan, worker_plan: BootstrapPlan) -> Self {
        Self {
            manager_plan,
            worker_plan,
            retry: RetryPolicy::default(),
            driver: DriverSettings::default(),
            session_timeout: Duration::from_secs(1200),
            hostfile: HostfileOptions::default(),
            shared_home: "/home/cluster".into(),
            hostfile_name: "hostfile".into(),
            user: "cluster".into(),
            tag_key: "rcluster".into(),
            service_port: 8787,
            service_scheme: "http".into(),
            address_kind: AddressKind::Public,
        }
    }

    #[must_use]
    pub fn hostfile_path(&self) -> String {
        format!("{}/{}", self.shared_home.trim_end_matches('/'), self.hostfile_name)
    }
}

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub workers: usize,
    pub image_id: String,
}

/// A worker left out of the committed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedNode {
    pub id: InstanceId,
    pub reason: String,
}

/// Outcome of a successful launch.
#[derive(Debug, Clone)]
pub struct LaunchReport {
    pub session: ClusterSession,
    pub hostfile: Hostfile,
    /// Workers that failed; empty on full success.
    pub failed_workers: Vec<FailedNode>,
    pub endpoint: EndpointInfo,
}

impl LaunchReport {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed_workers.is_empty()
    }
}

/// Outcome of `terminate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TerminateReport {
    /// Session that was torn down, if one existed.
    pub session_id: Option<SessionId>,
    pub terminated: Vec<InstanceId>,
    /// Whether a launch in progress was cancelled.
    pub cancelled_launch: bool,
}

enum Outcome {
    Settled,
    ManagerFailed,
    TimedOut,
    Cancelled,
}

/// Owns the lifecycle of the account's one cluster session.
pub struct ClusterOrchestrator {
    provider: Arc<dyn CloudProvider>,
    configurator: Arc<dyn NodeConfigurator>,
    store: Arc<dyn SessionStore>,
    driver: Arc<ProvisioningDriver>,
    manager_plan: Arc<BootstrapPlan>,
    worker_plan: Arc<BootstrapPlan>,
    settings: OrchestratorSettings,
    in_flight: Mutex<Option<watch::Sender<bool>>>,
}

impl ClusterOrchestrator {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        configurator: Arc<dyn NodeConfigurator>,
        store: Arc<dyn SessionStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let driver = Arc::new(ProvisioningDriver::new(
            Arc::clone(&provider),
            Arc::clone(&configurator),
            settings.retry,
            settings.driver,
            settings.address_kind,
        ));
        Self {
            provider,
            configurator,
            store,
            driver,
            manager_plan: Arc::new(settings.manager_plan.clone()),
            worker_plan: Arc::new(settings.worker_plan.clone()),
            settings,
            in_flight: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn account(&self) -> &AccountContext {
        self.store.account()
    }

    /// The stored session, if any.
    ///
    /// # Errors
    ///
    /// Fails when the session record cannot be read.
    pub fn session(&self) -> Result<Option<ClusterSession>> {
        self.store.load()
    }

    /// Launch a manager plus `request.workers` workers and wait until the
    /// cluster is usable.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::SessionConflict`] if a session exists or a launch is running
    /// - [`LifecycleError::ManagerBootstrapFailed`] if the manager never became ready
    /// - [`LifecycleError::LaunchTimeout`] if the session deadline passed
    /// - [`LifecycleError::LaunchCancelled`] if `terminate` interrupted the launch
    /// - a provider error if instances could not be requested
    pub async fn launch(&self, request: LaunchRequest) -> Result<LaunchReport> {
        let deadline = Instant::now() + self.settings.session_timeout;
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.is_some() {
                return Err(LifecycleError::SessionConflict {
                    existing: "launch in progress".into(),
                }
                .into());
            }
            *in_flight = Some(cancel_tx);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(existing) = self.store.load()? {
            return Err(LifecycleError::SessionConflict {
                existing: existing.id.to_string(),
            }
            .into());
        }

        let session_id = SessionId::generate();
        info!(
            session = %session_id,
            account = %self.account(),
            workers = request.workers,
            image = %request.image_id,
            provider = self.provider.provider_name(),
            "Launching cluster"
        );

        let handles = self.request_instances(&session_id, &request).await?;
        let ids: Vec<InstanceId> = handles.iter().map(|h| h.id.clone()).collect();

        if *cancel_rx.borrow() {
            return Err(self
                .abort(&session_id, &ids, LifecycleError::LaunchCancelled)
                .await);
        }

        let mut registry = NodeRegistry::new();
        for handle in &handles {
            registry.upsert(ClusterNode::new(handle.id.clone(), handle.role));
        }

        let provisional = ClusterSession::try_new(
            session_id.clone(),
            self.account().clone(),
            request.image_id.clone(),
            request.workers,
            SessionStatus::Provisioning,
            registry.all().into_iter().cloned().collect(),
        )?;
        if let Err(e) = self.store.save(&provisional) {
            error!(error = %e, "Failed to record provisional session");
            if let Err(teardown) = self.teardown(&ids).await {
                error!(error = %teardown, instances = ?ids, "Instances may be orphaned");
            }
            return Err(e);
        }

        self.tag_instances(&session_id, &handles, deadline).await;

        let outcome = self
            .provision(handles, &mut registry, &mut cancel_rx, deadline)
            .await;

        match outcome {
            Outcome::Settled | Outcome::ManagerFailed => {}
            Outcome::TimedOut => {
                let pending = registry.unsettled().len();
                let after_secs = self.settings.session_timeout.as_secs();
                warn!(pending, after_secs, "Cluster launch timed out");
                return Err(self
                    .abort(
                        &session_id,
                        &ids,
                        LifecycleError::LaunchTimeout { after_secs, pending },
                    )
                    .await);
            }
            Outcome::Cancelled => {
                info!(session = %session_id, "Cluster launch cancelled");
                return Err(self
                    .abort(&session_id, &ids, LifecycleError::LaunchCancelled)
                    .await);
            }
        }

        if !self.still_recorded(&session_id) {
            info!(session = %session_id, "Session record removed during launch");
            return Err(self
                .abort(&session_id, &ids, LifecycleError::LaunchCancelled)
                .await);
        }

        let Some(manager) = registry.manager().cloned() else {
            return Err(self
                .abort(
                    &session_id,
                    &ids,
                    LifecycleError::ManagerBootstrapFailed {
                        instance_id: String::new(),
                        reason: "no manager instance".into(),
                    },
                )
                .await);
        };
        if manager.state != NodeState::Ready {
            let reason = manager
                .failure
                .clone()
                .unwrap_or_else(|| format!("ended in state {}", manager.state));
            error!(instance = %manager.id, reason = %reason, "Manager failed to bootstrap");
            return Err(self
                .abort(
                    &session_id,
                    &ids,
                    LifecycleError::ManagerBootstrapFailed {
                        instance_id: manager.id.to_string(),
                        reason,
                    },
                )
                .await);
        }

        let failed_workers = self.release_failed_workers(&mut registry).await;

        let ready: Vec<ClusterNode> = registry
            .all()
            .into_iter()
            .filter(|n| n.state == NodeState::Ready)
            .cloned()
            .collect();
        let hostfile = Hostfile::assemble_with(&ready, self.settings.hostfile);

        let manager_address = manager.address.clone().unwrap_or_default();
        let hostfile_path = self.settings.hostfile_path();
        if let Err(e) = self
            .configurator
            .write_file(&manager_address, &hostfile_path, &hostfile.render())
            .await
        {
            error!(instance = %manager.id, error = %e, "Failed to write hostfile");
            return Err(self
                .abort(
                    &session_id,
                    &ids,
                    LifecycleError::ManagerBootstrapFailed {
                        instance_id: manager.id.to_string(),
                        reason: format!("writing {hostfile_path}: {e}"),
                    },
                )
                .await);
        }

        if !self.still_recorded(&session_id) {
            info!(session = %session_id, "Session record removed during launch");
            return Err(self
                .abort(&session_id, &ids, LifecycleError::LaunchCancelled)
                .await);
        }

        let session = ClusterSession::try_new(
            session_id,
            self.account().clone(),
            request.image_id,
            request.workers,
            SessionStatus::Active,
            ready,
        )?;
        self.store.save(&session)?;

        let endpoint = self.endpoint_for(&session, manager_address);
        info!(
            session = %session.id,
            nodes = session.nodes().len(),
            slots = hostfile.total_slots(),
            failed_workers = failed_workers.len(),
            url = %endpoint.url(),
            "Cluster ready"
        );

        Ok(LaunchReport {
            session,
            hostfile,
            failed_workers,
            endpoint,
        })
    }

    /// Endpoint of the active session's manager.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NoActiveSession`] without a session, or
    /// [`LifecycleError::ManagerUnreachable`] when the manager is not
    /// running or has no address.
    pub async fn open(&self) -> Result<EndpointInfo> {
        let session = self.store.load()?.ok_or(LifecycleError::NoActiveSession)?;
        let manager = session.manager();
        let manager_unreachable = |reason: String| -> Error {
            LifecycleError::ManagerUnreachable {
                instance_id: manager.id.to_string(),
                reason,
            }
            .into()
        };

        if !session.is_active() {
            return Err(manager_unreachable("session is still provisioning".into()));
        }

        let status = self
            .settings
            .retry
            .run("describe", || self.provider.describe(&manager.id))
            .await
            .map_err(|e| manager_unreachable(e.to_string()))?;
        if status.state != InstanceState::Running {
            return Err(manager_unreachable(format!("instance is {}", status.state)));
        }
        let address = status
            .address(self.settings.address_kind)
            .map(str::to_string)
            .or_else(|| manager.address.clone())
            .ok_or_else(|| manager_unreachable("instance has no address".into()))?;

        Ok(self.endpoint_for(&session, address))
    }

    /// Terminate every node of the session and forget it. Cancels a launch
    /// in progress first.
    ///
    /// # Errors
    ///
    /// Fails only when the provider refuses to terminate; the session record
    /// is then kept so the call can be repeated.
    pub async fn terminate(&self) -> Result<TerminateReport> {
        let cancelled_launch = self.cancel_launch();

        let Some(session) = self.store.load()? else {
            info!(account = %self.account(), "No cluster session to terminate");
            return Ok(TerminateReport {
                cancelled_launch,
                ..TerminateReport::default()
            });
        };

        let ids = session.instance_ids();
        info!(session = %session.id, instances = ids.len(), "Terminating cluster");
        self.teardown(&ids).await?;
        self.store.clear()?;

        Ok(TerminateReport {
            session_id: Some(session.id),
            terminated: ids,
            cancelled_launch,
        })
    }

    /// Signal a running launch to stop. Returns whether one was running.
    pub fn cancel_launch(&self) -> bool {
        match self.in_flight.lock().as_ref() {
            Some(cancel) => {
                cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Launch the manager and the workers. Each role's request carries a
    /// client token derived from the session, so retries never launch twice.
    async fn request_instances(
        &self,
        session_id: &SessionId,
        request: &LaunchRequest,
    ) -> Result<Vec<NodeHandle>> {
        let image = request.image_id.as_str();
        let retry = &self.settings.retry;
        let manager_token = client_token(session_id, NodeRole::Manager);
        let worker_token = client_token(session_id, NodeRole::Worker);

        let manager = retry.run("launch", || {
            self.provider
                .launch(image, 1, NodeRole::Manager, &manager_token)
        });
        let workers = async {
            if request.workers == 0 {
                return Ok(Vec::new());
            }
            retry
                .run("launch", || {
                    self.provider
                        .launch(image, request.workers, NodeRole::Worker, &worker_token)
                })
                .await
        };
        let (manager, workers) = tokio::join!(manager, workers);

        let manager_count = manager.as_ref().map_or(0, Vec::len);
        if let (Ok(manager), Ok(workers)) = (&manager, &workers) {
            if manager_count == 1 {
                return Ok(manager.iter().chain(workers).cloned().collect());
            }
        }

        let launched: Vec<InstanceId> = manager
            .iter()
            .chain(workers.iter())
            .flatten()
            .map(|h| h.id.clone())
            .collect();
        if let Err(e) = self.teardown(&launched).await {
            error!(error = %e, instances = ?launched, "Instances may be orphaned");
        }

        let err = match (manager, workers) {
            (Err(e), _) | (_, Err(e)) => e,
            _ => ProviderError::Permanent(format!(
                "expected one manager instance, provider returned {manager_count}"
            )),
        };
        error!(error = %err, "Failed to request instances");
        Err(err.into())
    }

    /// Tag every instance concurrently. Tags are best effort; whatever is
    /// still retrying at the deadline is dropped.
    async fn tag_instances(&self, session_id: &SessionId, handles: &[NodeHandle], deadline: Instant) {
        let role_key = format!("{}-role", self.settings.tag_key);
        let mut tasks = JoinSet::new();
        for handle in handles {
            let provider = Arc::clone(&self.provider);
            let retry = self.settings.retry;
            let id = handle.id.clone();
            let tags = vec![
                (self.settings.tag_key.clone(), session_id.to_string()),
                (role_key.clone(), handle.role.to_string()),
            ];
            tasks.spawn(async move {
                let result = retry.run("tag", || provider.tag(&id, &tags)).await;
                (id, result)
            });
        }

        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok((id, Err(e))) = joined {
                    warn!(instance = %id, error = %e, "Failed to tag instance");
                }
            }
        };
        if timeout_at(deadline, collect).await.is_err() {
            warn!(pending = tasks.len(), "Tagging still retrying at the session deadline");
        }
    }

    async fn provision(
        &self,
        handles: Vec<NodeHandle>,
        registry: &mut NodeRegistry,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Outcome {
        let (events_tx, mut events) = mpsc::channel(handles.len() * 4);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (manager_tx, manager_rx) = watch::channel(None);

        let mut tasks = JoinSet::new();
        for handle in handles {
            let plan = match handle.role {
                NodeRole::Manager => Arc::clone(&self.manager_plan),
                NodeRole::Worker => Arc::clone(&self.worker_plan),
            };
            let job = NodeJob {
                handle,
                plan,
                vars: StepVars {
                    manager_address: None,
                    shared_home: self.settings.shared_home.clone(),
                    user: self.settings.user.clone(),
                },
                manager_ready: manager_rx.clone(),
            };
            let driver = Arc::clone(&self.driver);
            let events_tx = events_tx.clone();
            let stop_rx = stop_rx.clone();
            tasks.spawn(async move { driver.drive(job, events_tx, stop_rx).await });
        }
        drop(events_tx);

        let outcome = loop {
            if Instant::now() >= deadline {
                break Outcome::TimedOut;
            }
            if registry.all_settled() {
                break Outcome::Settled;
            }
            tokio::select! {
                biased;
                () = cancelled(cancel) => break Outcome::Cancelled,
                () = sleep_until(deadline) => break Outcome::TimedOut,
                event = events.recv() => match event {
                    Some(event) => {
                        if apply_event(registry, event, &manager_tx) {
                            break Outcome::ManagerFailed;
                        }
                    }
                    None => {
                        for id in registry.unsettled() {
                            mark_failed(registry, &id, "provisioning task ended unexpectedly".into());
                        }
                    }
                },
            }
        };

        stop_tx.send_replace(true);
        while tasks.join_next().await.is_some() {}
        outcome
    }

    async fn release_failed_workers(&self, registry: &mut NodeRegistry) -> Vec<FailedNode> {
        let failed: Vec<FailedNode> = registry
            .by_role(NodeRole::Worker)
            .into_iter()
            .filter(|n| n.state == NodeState::Failed)
            .map(|n| FailedNode {
                id: n.id.clone(),
                reason: n.failure.clone().unwrap_or_default(),
            })
            .collect();
        if failed.is_empty() {
            return failed;
        }

        let ids: Vec<InstanceId> = failed.iter().map(|f| f.id.clone()).collect();
        warn!(failed = ?ids, "Continuing with a reduced cluster");
        match self.teardown(&ids).await {
            Ok(()) => {
                for id in &ids {
                    let _ = registry.transition(id, NodeState::Terminated);
                }
            }
            Err(e) => warn!(error = %e, instances = ?ids, "Failed to terminate failed workers"),
        }
        failed
    }

    async fn teardown(&self, ids: &[InstanceId]) -> std::result::Result<(), ProviderError> {
        if ids.is_empty() {
            return Ok(());
        }
        debug!(instances = ?ids, "Terminating instances");
        self.settings
            .retry
            .run("terminate", || self.provider.terminate(ids))
            .await
    }

    /// Whether the store still holds this launch's record. An unreadable
    /// store counts as recorded; the final save reports it.
    fn still_recorded(&self, session_id: &SessionId) -> bool {
        match self.store.load() {
            Ok(stored) => stored.is_some_and(|s| s.id == *session_id),
            Err(e) => {
                warn!(error = %e, "Could not re-read session record");
                true
            }
        }
    }

    /// Tear down every launched node and turn `reason` into the launch error.
    /// The record is only dropped once the teardown succeeded, and only if
    /// it still belongs to this launch.
    async fn abort(&self, session_id: &SessionId, ids: &[InstanceId], reason: LifecycleError) -> Error {
        match self.teardown(ids).await {
            Ok(()) => {
                let owned = matches!(self.store.load(), Ok(Some(s)) if s.id == *session_id);
                if owned {
                    if let Err(e) = self.store.clear() {
                        warn!(error = %e, "Failed to clear session record");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, instances = ?ids, "Teardown failed; run terminate to retry");
            }
        }
        reason.into()
    }

    fn endpoint_for(&self, session: &ClusterSession, address: String) -> EndpointInfo {
        EndpointInfo {
            session_id: session.id.clone(),
            instance_id: session.manager().id.clone(),
            address,
            port: self.settings.service_port,
            scheme: self.settings.service_scheme.clone(),
        }
    }
}

/// Idempotency token for one role's launch request.
fn client_token(session_id: &SessionId, role: NodeRole) -> String {
    format!("{session_id}-{role}")
}

struct InFlightGuard<'a>(&'a Mutex<Option<watch::Sender<bool>>>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

/// Fold one driver event into the registry. Returns true when the manager failed.
fn apply_event(
    registry: &mut NodeRegistry,
    event: NodeEvent,
    manager_ready: &watch::Sender<Option<String>>,
) -> bool {
    match event {
        NodeEvent::Booting { id } => {
            advance(registry, &id, NodeState::Booting);
            false
        }
        NodeEvent::Configuring {
            id,
            address,
            private_address,
        } => {
            if let Some(node) = advance(registry, &id, NodeState::Configuring) {
                node.address = Some(address);
                node.private_address = private_address;
            }
            false
        }
        NodeEvent::Ready { id, core_count } => {
            if let Some(node) = advance(registry, &id, NodeState::Ready) {
                node.core_count = core_count;
                if node.is_manager() {
                    let address = node.hostfile_address().map(str::to_string);
                    info!(instance = %id, address = ?address, "Manager ready");
                    manager_ready.send_replace(address);
                }
            }
            false
        }
        NodeEvent::Failed { id, failure } => mark_failed(registry, &id, failure.to_string()),
    }
}

fn advance<'a>(
    registry: &'a mut NodeRegistry,
    id: &InstanceId,
    next: NodeState,
) -> Option<&'a mut ClusterNode> {
    let from = registry.get(id).map(|n| n.state);
    match registry.transition(id, next) {
        Ok(node) => {
            info!(
                instance_id = %id,
                role = %node.role,
                from = from.map_or("unknown", NodeState::as_str),
                to = %next,
                "Node transition"
            );
            Some(node)
        }
        Err(e) => {
            warn!(error = %e, "Ignoring out-of-order node event");
            None
        }
    }
}

fn mark_failed(registry: &mut NodeRegistry, id: &InstanceId, reason: String) -> bool {
    match advance(registry, id, NodeState::Failed) {
        Some(node) => {
            node.failure = Some(reason);
            node.is_manager()
        }
        None => false,
    }
}
