//! Scripted [`CloudProvider`] for deterministic lifecycle tests.
//!
//! Instances are numbered in launch order: the n-th instance is `i-000n`
//! with private address `10.0.0.n` and public address `203.0.113.n`.
//! A fresh instance reports `running` on its first describe unless
//! [`ScriptedProvider::set_boot_polls`] or [`ScriptedProvider::set_pending_polls`]
//! say otherwise. Launches repeating a client token return the instances
//! of the first call with that token.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{InstanceId, NodeRole};
use crate::error::ProviderError;
use crate::port::{CloudProvider, InstanceState, InstanceStatus, NodeHandle};

struct ScriptedInstance {
    role: NodeRole,
    state: InstanceState,
    /// Describes left that still report `pending`.
    pending_polls: u32,
    index: u32,
}

#[derive(Default)]
struct ProviderState {
    next_index: u32,
    order: Vec<InstanceId>,
    instances: HashMap<InstanceId, ScriptedInstance>,
    launch_failures: HashMap<NodeRole, VecDeque<ProviderError>>,
    lost_responses: HashMap<NodeRole, VecDeque<ProviderError>>,
    by_token: HashMap<String, Vec<NodeHandle>>,
    describe_failures: VecDeque<ProviderError>,
    terminate_failures: VecDeque<ProviderError>,
    tag_failures: VecDeque<ProviderError>,
    short_launch: HashMap<NodeRole, usize>,
    launch_delay: Option<Duration>,
    boot_polls: u32,
    launch_calls: u32,
    describe_calls: u32,
    terminate_calls: u32,
    terminated: Vec<InstanceId>,
    tags: HashMap<InstanceId, Vec<(String, String)>>,
}

/// In-memory cloud with scripted failures and boot delays.
#[derive(Default)]
pub struct ScriptedProvider {
    state: Mutex<ProviderState>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `launch` for `role` fail with `error`. Queued errors
    /// are consumed one per call.
    pub fn fail_launch(&self, role: NodeRole, error: ProviderError) {
        self.state
            .lock()
            .launch_failures
            .entry(role)
            .or_default()
            .push_back(error);
    }

    /// Make the next `launch` for `role` start its instances and then fail
    /// with `error`, as if the response never arrived.
    pub fn lose_launch_response(&self, role: NodeRole, error: ProviderError) {
        self.state
            .lock()
            .lost_responses
            .entry(role)
            .or_default()
            .push_back(error);
    }

    /// Make the next `describe` (for any instance) fail with `error`.
    pub fn fail_describe(&self, error: ProviderError) {
        self.state.lock().describe_failures.push_back(error);
    }

    /// Make the next `terminate` fail with `error`.
    pub fn fail_terminate(&self, error: ProviderError) {
        self.state.lock().terminate_failures.push_back(error);
    }

    /// Make the next `tag` fail with `error`.
    pub fn fail_tag(&self, error: ProviderError) {
        self.state.lock().tag_failures.push_back(error);
    }

    /// Return only `count` instances for `role` launches, whatever was asked.
    pub fn short_launch(&self, role: NodeRole, count: usize) {
        self.state.lock().short_launch.insert(role, count);
    }

    /// Delay every launch call. Ids are assigned before the delay.
    pub fn set_launch_delay(&self, delay: Duration) {
        self.state.lock().launch_delay = Some(delay);
    }

    /// Newly launched instances report `pending` for their first `polls` describes.
    pub fn set_boot_polls(&self, polls: u32) {
        self.state.lock().boot_polls = polls;
    }

    /// Report `pending` for the next `polls` describes of `id`.
    pub fn set_pending_polls(&self, id: &InstanceId, polls: u32) {
        if let Some(instance) = self.state.lock().instances.get_mut(id) {
            instance.state = InstanceState::Pending;
            instance.pending_polls = polls;
        }
    }

    /// Force the provider-side state of `id`.
    pub fn set_state(&self, id: &InstanceId, state: InstanceState) {
        if let Some(instance) = self.state.lock().instances.get_mut(id) {
            instance.state = state;
            instance.pending_polls = 0;
        }
    }

    pub fn launch_calls(&self) -> u32 {
        self.state.lock().launch_calls
    }

    pub fn describe_calls(&self) -> u32 {
        self.state.lock().describe_calls
    }

    pub fn terminate_calls(&self) -> u32 {
        self.state.lock().terminate_calls
    }

    /// Every instance ever launched, in launch order.
    pub fn launched(&self) -> Vec<InstanceId> {
        self.state.lock().order.clone()
    }

    /// Instances launched with `role`, in launch order.
    pub fn launched_with_role(&self, role: NodeRole) -> Vec<InstanceId> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter(|id| state.instances.get(*id).is_some_and(|i| i.role == role))
            .cloned()
            .collect()
    }

    /// Ids passed to successful terminate calls, in call order.
    pub fn terminated(&self) -> Vec<InstanceId> {
        self.state.lock().terminated.clone()
    }

    /// Instances that are neither terminated nor shutting down.
    pub fn alive(&self) -> Vec<InstanceId> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter(|id| state.instances.get(*id).is_some_and(|i| i.state.is_alive()))
            .cloned()
            .collect()
    }

    pub fn tags(&self, id: &InstanceId) -> Vec<(String, String)> {
        self.state.lock().tags.get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CloudProvider for ScriptedProvider {
    async fn launch(
        &self,
        _image_id: &str,
        count: usize,
        role: NodeRole,
        client_token: &str,
    ) -> Result<Vec<NodeHandle>, ProviderError> {
        let (handles, delay) = {
            let mut state = self.state.lock();
            state.launch_calls += 1;
            if let Some(error) = state
                .launch_failures
                .get_mut(&role)
                .and_then(VecDeque::pop_front)
            {
                return Err(error);
            }
            if let Some(handles) = state.by_token.get(client_token) {
                return Ok(handles.clone());
            }

            let count = state.short_launch.get(&role).copied().unwrap_or(count);
            let boot_polls = state.boot_polls;
            let mut handles = Vec::with_capacity(count);
            for _ in 0..count {
                state.next_index += 1;
                let index = state.next_index;
                let id = InstanceId::new(format!("i-{index:04}"));
                state.order.push(id.clone());
                state.instances.insert(
                    id.clone(),
                    ScriptedInstance {
                        role,
                        state: InstanceState::Pending,
                        pending_polls: boot_polls,
                        index,
                    },
                );
                handles.push(NodeHandle { id, role });
            }
            state.by_token.insert(client_token.to_string(), handles.clone());
            if let Some(error) = state
                .lost_responses
                .get_mut(&role)
                .and_then(VecDeque::pop_front)
            {
                return Err(error);
            }
            (handles, state.launch_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(handles)
    }

    async fn describe(&self, id: &InstanceId) -> Result<InstanceStatus, ProviderError> {
        let mut state = self.state.lock();
        state.describe_calls += 1;
        if let Some(error) = state.describe_failures.pop_front() {
            return Err(error);
        }

        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::Permanent(format!("instance {id} does not exist")))?;

        if instance.state == InstanceState::Pending {
            if instance.pending_polls > 0 {
                instance.pending_polls -= 1;
            } else {
                instance.state = InstanceState::Running;
            }
        }

        let has_address = instance.state == InstanceState::Running;
        Ok(InstanceStatus {
            state: instance.state,
            public_address: has_address.then(|| format!("203.0.113.{}", instance.index)),
            private_address: has_address.then(|| format!("10.0.0.{}", instance.index)),
        })
    }

    async fn terminate(&self, ids: &[InstanceId]) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.terminate_calls += 1;
        if let Some(error) = state.terminate_failures.pop_front() {
            return Err(error);
        }
        for id in ids {
            if let Some(instance) = state.instances.get_mut(id) {
                instance.state = InstanceState::Terminated;
            }
            state.terminated.push(id.clone());
        }
        Ok(())
    }

    async fn tag(&self, id: &InstanceId, tags: &[(String, String)]) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        if let Some(error) = state.tag_failures.pop_front() {
            return Err(error);
        }
        state
            .tags
            .entry(id.clone())
            .or_default()
            .extend(tags.iter().cloned());
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
