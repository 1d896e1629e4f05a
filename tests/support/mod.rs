#![allow(dead_code)]

use std::sync::Arc;

use rcluster::application::{ClusterOrchestrator, LaunchReport, LaunchRequest, OrchestratorSettings};
use rcluster::error::Result;
use rcluster::testkit::{self, MemorySessionStore, ScriptedConfigurator, ScriptedProvider};

/// Scripted cloud plus an orchestrator wired to it.
pub struct Cluster {
    pub provider: Arc<ScriptedProvider>,
    pub configurator: Arc<ScriptedConfigurator>,
    pub store: Arc<MemorySessionStore>,
    pub orchestrator: ClusterOrchestrator,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_settings(testkit::settings())
    }

    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        Self::with_store(settings, MemorySessionStore::new())
    }

    pub fn with_store(settings: OrchestratorSettings, store: MemorySessionStore) -> Self {
        let provider = Arc::new(ScriptedProvider::new());
        let configurator = Arc::new(ScriptedConfigurator::new());
        let store = Arc::new(store);
        let orchestrator = testkit::orchestrator_with(
            Arc::clone(&provider),
            Arc::clone(&configurator),
            Arc::clone(&store),
            settings,
        );
        Self {
            provider,
            configurator,
            store,
            orchestrator,
        }
    }

    pub async fn launch(&self, workers: usize) -> Result<LaunchReport> {
        self.orchestrator
            .launch(LaunchRequest {
                workers,
                image_id: "ami-test".into(),
            })
            .await
    }
}

/// Scripted private address of the n-th launched instance.
pub fn address(n: u32) -> String {
    format!("10.0.0.{n}")
}

pub const HOSTFILE_PATH: &str = "/home/cluster/hostfile";
