//! Config template, environment overrides and wiring into the orchestrator.

use std::sync::Mutex;
use std::time::Duration;

use rcluster::domain::NodeRole;
use rcluster::infrastructure::bootstrap::{orchestrator_settings, session_store};
use rcluster::infrastructure::config::Config;
use rcluster::port::{AddressKind, SessionStore};

static ENV_LOCK: Mutex<()> = Mutex::new(());

const TEMPLATE: &str = include_str!("../config.toml.example");

#[test]
fn template_matches_the_defaults() {
    let _guard = ENV_LOCK.lock().expect("env lock poisoned");

    let from_template = Config::parse_toml(TEMPLATE).unwrap();
    let defaults = Config::parse_toml("").unwrap();

    assert_eq!(
        toml::to_string(&from_template).unwrap(),
        toml::to_string(&defaults).unwrap()
    );
}

#[test]
fn environment_overrides_provider_identity() {
    let _guard = ENV_LOCK.lock().expect("env lock poisoned");

    std::env::set_var("RCLUSTER_PROFILE", "lab");
    std::env::set_var("RCLUSTER_REGION", "ap-southeast-2");
    std::env::set_var("RCLUSTER_IMAGE_ID", "ami-env");
    let config = Config::parse_toml("[provider]\nregion = \"us-east-1\"\n");
    std::env::remove_var("RCLUSTER_PROFILE");
    std::env::remove_var("RCLUSTER_REGION");
    std::env::remove_var("RCLUSTER_IMAGE_ID");

    let config = config.unwrap();
    assert_eq!(config.account().as_str(), "lab@ap-southeast-2");
    assert_eq!(config.image_id(None).unwrap(), "ami-env");
}

#[test]
fn settings_follow_the_config() {
    let _guard = ENV_LOCK.lock().expect("env lock poisoned");

    let config = Config::parse_toml(
        r#"
        [provider]
        address = "private"
        tag_key = "lab-cluster"

        [provisioning]
        poll_interval_secs = 3
        node_timeout_secs = 120
        session_timeout_secs = 300

        [retry]
        base_delay_ms = 200
        max_delay_ms = 800
        max_attempts = 3

        [bootstrap]
        shared_home = "/srv/cluster"
        include_manager = true

        [[bootstrap.worker]]
        name = "mount"
        command = "mount {manager_address}:{shared_home} {shared_home}"

        [service]
        port = 8888
        scheme = "https"
        "#,
    )
    .unwrap();

    let settings = orchestrator_settings(&config).unwrap();

    assert_eq!(settings.address_kind, AddressKind::Private);
    assert_eq!(settings.tag_key, "lab-cluster");
    assert_eq!(settings.driver.poll_interval, Duration::from_secs(3));
    assert_eq!(settings.driver.node_timeout, Duration::from_secs(120));
    assert_eq!(settings.session_timeout, Duration::from_secs(300));
    assert_eq!(settings.retry.max_attempts, 3);
    assert_eq!(settings.retry.base_delay, Duration::from_millis(200));
    assert!(settings.hostfile.include_manager);
    assert_eq!(settings.hostfile_path(), "/srv/cluster/hostfile");
    assert_eq!(settings.service_port, 8888);
    assert_eq!(settings.service_scheme, "https");

    assert_eq!(settings.worker_plan.role(), NodeRole::Worker);
    assert_eq!(settings.worker_plan.steps().len(), 1);
    // manager keeps the stock plan
    assert_eq!(settings.manager_plan.steps()[0].name, "runtime");
}

#[test]
fn session_store_lives_under_the_state_dir() {
    let _guard = ENV_LOCK.lock().expect("env lock poisoned");

    let dir = tempfile::tempdir().unwrap();
    let config = Config::parse_toml(&format!(
        "state_dir = {:?}\n[provider]\nprofile = \"lab\"\nregion = \"eu-west-1\"\n",
        dir.path().display().to_string()
    ))
    .unwrap();

    let store = session_store(&config);
    assert_eq!(store.account().as_str(), "lab@eu-west-1");
    assert!(store.path().starts_with(dir.path()));
    assert!(store.load().unwrap().is_none());
}
