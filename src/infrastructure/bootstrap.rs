//! Composition root: config to adapters to orchestrator.

use std::sync::Arc;

use tracing::debug;

use crate::adapter::outbound::aws::AwsCliProvider;
use crate::adapter::outbound::ssh::SshConfigurator;
use crate::adapter::outbound::store::FileSessionStore;
use crate::application::{ClusterOrchestrator, OrchestratorSettings};
use crate::domain::NodeRole;
use crate::error::Result;
use crate::infrastructure::config::Config;

/// Orchestrator settings derived from the config.
///
/// # Errors
///
/// Fails when a bootstrap plan has duplicate step names.
pub fn orchestrator_settings(config: &Config) -> Result<OrchestratorSettings> {
    let mut settings = OrchestratorSettings::new(
        config.bootstrap.plan(NodeRole::Manager)?,
        config.bootstrap.plan(NodeRole::Worker)?,
    );
    settings.retry = config.retry.policy();
    settings.driver = config.provisioning.driver_settings();
    settings.session_timeout = config.provisioning.session_timeout();
    settings.hostfile = config.bootstrap.hostfile_options();
    settings.shared_home = config.bootstrap.shared_home.clone();
    settings.hostfile_name = config.bootstrap.hostfile_name.clone();
    settings.user = config.bootstrap.service_user.clone();
    settings.tag_key = config.provider.tag_key.clone();
    settings.service_port = config.service.port;
    settings.service_scheme = config.service.scheme.clone();
    settings.address_kind = config.provider.address;
    Ok(settings)
}

/// Session store for the config's account context.
#[must_use]
pub fn session_store(config: &Config) -> FileSessionStore {
    FileSessionStore::new(config.state_dir(), config.account())
}

/// Wire the production adapters into an orchestrator.
///
/// # Errors
///
/// Fails when the orchestrator settings cannot be built.
pub fn build_orchestrator(config: &Config) -> Result<ClusterOrchestrator> {
    let settings = orchestrator_settings(config)?;
    let store = session_store(config);
    debug!(
        account = %config.account(),
        store = %store.path().display(),
        "Building orchestrator"
    );

    Ok(ClusterOrchestrator::new(
        Arc::new(AwsCliProvider::new(config.provider.clone())),
        Arc::new(SshConfigurator::new(&config.ssh)),
        Arc::new(store),
        settings,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::AddressKind;

    #[test]
    fn settings_follow_config() {
        let config = Config::parse_toml(
            r#"
            [provider]
            address = "private"
            tag_key = "lab"

            [provisioning]
            session_timeout_secs = 1800

            [bootstrap]
            shared_home = "/srv/home"
            include_manager = true

            [service]
            port = 8888
            "#,
        )
        .unwrap();
        let settings = orchestrator_settings(&config).unwrap();

        assert_eq!(settings.address_kind, AddressKind::Private);
        assert_eq!(settings.tag_key, "lab");
        assert_eq!(settings.session_timeout.as_secs(), 1800);
        assert_eq!(settings.hostfile_path(), "/srv/home/hostfile");
        assert!(settings.hostfile.include_manager);
        assert_eq!(settings.service_port, 8888);
        assert_eq!(settings.retry.max_attempts, 5);
    }

    #[test]
    fn store_is_keyed_by_account() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state_dir = Some(dir.path().to_path_buf());
        config.provider.profile = "lab".into();
        config.provider.region = "eu-west-1".into();

        let store = session_store(&config);
        assert!(store.path().starts_with(dir.path().join("sessions")));
        assert!(store.path().to_string_lossy().contains("lab"));
    }
}
