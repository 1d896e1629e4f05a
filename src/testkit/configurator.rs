//! Scripted [`NodeConfigurator`] that records what would have run where.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::BootstrapError;
use crate::port::NodeConfigurator;

#[derive(Default)]
struct ConfiguratorState {
    cores: HashMap<String, u32>,
    unreachable: HashSet<String>,
    hanging: HashSet<String>,
    step_delays: HashMap<String, Duration>,
    step_failures: HashMap<(String, String), (i32, String)>,
    write_failures: HashSet<String>,
    runs: HashMap<String, Vec<(String, String)>>,
    files: HashMap<(String, String), String>,
}

/// Configurator keyed by node address.
///
/// Every address is reachable and every step succeeds unless scripted
/// otherwise. Core counts are unknown until set.
#[derive(Default)]
pub struct ScriptedConfigurator {
    state: Mutex<ConfiguratorState>,
}

impl ScriptedConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cores(&self, address: &str, cores: u32) {
        self.state.lock().cores.insert(address.to_string(), cores);
    }

    /// The node never accepts connections.
    pub fn set_unreachable(&self, address: &str) {
        self.state.lock().unreachable.insert(address.to_string());
    }

    /// Every step on the node blocks forever.
    pub fn set_hang(&self, address: &str) {
        self.state.lock().hanging.insert(address.to_string());
    }

    /// Each step on the node takes `delay`.
    pub fn set_step_delay(&self, address: &str, delay: Duration) {
        self.state
            .lock()
            .step_delays
            .insert(address.to_string(), delay);
    }

    /// Step `step` on the node exits with `exit_code`.
    pub fn fail_step(&self, address: &str, step: &str, exit_code: i32, stderr: &str) {
        self.state.lock().step_failures.insert(
            (address.to_string(), step.to_string()),
            (exit_code, stderr.to_string()),
        );
    }

    /// File writes to the node fail.
    pub fn fail_writes(&self, address: &str) {
        self.state.lock().write_failures.insert(address.to_string());
    }

    /// Names of the steps started on the node, in order.
    pub fn steps_run(&self, address: &str) -> Vec<String> {
        self.state
            .lock()
            .runs
            .get(address)
            .map(|runs| runs.iter().map(|(step, _)| step.clone()).collect())
            .unwrap_or_default()
    }

    /// Full commands started on the node, in order.
    pub fn commands_run(&self, address: &str) -> Vec<String> {
        self.state
            .lock()
            .runs
            .get(address)
            .map(|runs| runs.iter().map(|(_, command)| command.clone()).collect())
            .unwrap_or_default()
    }

    /// Contents last written to `path` on the node.
    pub fn file(&self, address: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .files
            .get(&(address.to_string(), path.to_string()))
            .cloned()
    }
}

#[async_trait]
impl NodeConfigurator for ScriptedConfigurator {
    async fn is_reachable(&self, address: &str) -> bool {
        !self.state.lock().unreachable.contains(address)
    }

    async fn run(&self, address: &str, step: &str, command: &str) -> Result<(), BootstrapError> {
        let (hang, delay, failure) = {
            let mut state = self.state.lock();
            state
                .runs
                .entry(address.to_string())
                .or_default()
                .push((step.to_string(), command.to_string()));
            (
                state.hanging.contains(address),
                state.step_delays.get(address).copied(),
                state
                    .step_failures
                    .get(&(address.to_string(), step.to_string()))
                    .cloned(),
            )
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some((exit_code, stderr)) => Err(BootstrapError::ScriptFailure {
                step: step.to_string(),
                exit_code,
                stderr,
            }),
            None => Ok(()),
        }
    }

    async fn core_count(&self, address: &str) -> Option<u32> {
        self.state.lock().cores.get(address).copied()
    }

    async fn write_file(
        &self,
        address: &str,
        path: &str,
        contents: &str,
    ) -> Result<(), BootstrapError> {
        let mut state = self.state.lock();
        if state.write_failures.contains(address) {
            return Err(BootstrapError::ScriptFailure {
                step: format!("write {path}"),
                exit_code: 1,
                stderr: "tee: Permission denied".into(),
            });
        }
        state
            .files
            .insert((address.to_string(), path.to_string()), contents.to_string());
        Ok(())
    }
}
