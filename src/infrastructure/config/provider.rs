//! Cloud provider and SSH configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::port::AddressKind;

/// Instance launch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Region instances are launched in.
    #[serde(default = "default_region")]
    pub region: String,
    /// Named credentials profile.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Image launched for every node. May be overridden per launch.
    #[serde(default)]
    pub image_id: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    /// Key pair installed on launched instances.
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub placement_group: Option<String>,
    #[serde(default)]
    pub subnet_id: Option<String>,
    /// Address used to reach nodes from the operator's machine.
    #[serde(default)]
    pub address: AddressKind,
    /// Tag key that marks instances with their session id.
    #[serde(default = "default_tag_key")]
    pub tag_key: String,
}

fn default_region() -> String {
    "us-east-1".into()
}

fn default_profile() -> String {
    "default".into()
}

fn default_instance_type() -> String {
    "m4.large".into()
}

fn default_tag_key() -> String {
    "rcluster".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            profile: default_profile(),
            image_id: String::new(),
            instance_type: default_instance_type(),
            key_name: None,
            security_groups: Vec::new(),
            placement_group: None,
            subnet_id: None,
            address: AddressKind::default(),
            tag_key: default_tag_key(),
        }
    }
}

/// Remote shell settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    /// Login user on the image.
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// Private key matching `provider.key_name`.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_ssh_user() -> String {
    "ubuntu".into()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            key_path: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}
