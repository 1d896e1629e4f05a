//! EC2 provider backed by the `aws` command line.
//!
//! Each call runs one `aws ec2 ...` process with JSON output. Credentials,
//! profile resolution and request signing stay with the CLI.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

use super::dto::{DescribeInstancesResponse, RunInstancesResponse};
use crate::domain::{InstanceId, NodeRole};
use crate::error::ProviderError;
use crate::infrastructure::config::provider::ProviderConfig;
use crate::port::{CloudProvider, InstanceStatus, NodeHandle};

/// Error codes worth retrying.
const TRANSIENT_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "Throttling",
    "ThrottlingException",
    "ServiceUnavailable",
    "Unavailable",
    "InternalError",
    "InsufficientInstanceCapacity",
    // Eventual consistency right after run-instances.
    "InvalidInstanceID.NotFound",
];

/// Network-level failures reported by the CLI itself.
const TRANSIENT_MESSAGES: &[&str] = &[
    "Could not connect to the endpoint URL",
    "Connection was closed",
    "Read timeout",
    "Connect timeout",
];

/// Map CLI stderr to a transient or permanent error.
#[must_use]
pub fn classify(stderr: &str) -> ProviderError {
    let message = stderr.trim().to_string();
    let transient = TRANSIENT_CODES
        .iter()
        .any(|code| message.contains(&format!("({code})")))
        || TRANSIENT_MESSAGES.iter().any(|m| message.contains(m));

    if transient {
        ProviderError::Transient(message)
    } else {
        ProviderError::Permanent(message)
    }
}

/// [`CloudProvider`] that shells out to `aws ec2`.
pub struct AwsCliProvider {
    binary: String,
    config: ProviderConfig,
}

impl AwsCliProvider {
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            binary: "aws".into(),
            config,
        }
    }

    /// Use a different executable, e.g. a wrapper script.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn global_args(&self) -> Vec<String> {
        vec![
            "--region".into(),
            self.config.region.clone(),
            "--profile".into(),
            self.config.profile.clone(),
            "--output".into(),
            "json".into(),
            "ec2".into(),
        ]
    }

    fn run_instances_args(
        &self,
        image_id: &str,
        count: usize,
        role: NodeRole,
        client_token: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "run-instances".to_string(),
            "--image-id".into(),
            image_id.into(),
            "--count".into(),
            count.to_string(),
            "--instance-type".into(),
            self.config.instance_type.clone(),
            "--client-token".into(),
            client_token.into(),
        ];
        if let Some(key_name) = &self.config.key_name {
            args.extend(["--key-name".into(), key_name.clone()]);
        }
        if !self.config.security_groups.is_empty() {
            args.push("--security-group-ids".into());
            args.extend(self.config.security_groups.iter().cloned());
        }
        if let Some(group) = &self.config.placement_group {
            args.extend(["--placement".into(), format!("GroupName={group}")]);
        }
        if let Some(subnet) = &self.config.subnet_id {
            args.extend(["--subnet-id".into(), subnet.clone()]);
        }
        args.extend([
            "--tag-specifications".into(),
            format!(
                "ResourceType=instance,Tags=[{{Key={}-role,Value={}}}]",
                self.config.tag_key, role
            ),
        ]);
        args
    }

    async fn exec(&self, args: Vec<String>) -> Result<String, ProviderError> {
        debug!(binary = %self.binary, command = %args.join(" "), "Running provider command");
        let output = Command::new(&self.binary)
            .args(self.global_args())
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProviderError::Permanent(format!("failed to run {}: {e}", self.binary)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    async fn exec_json<T: DeserializeOwned>(&self, args: Vec<String>) -> Result<T, ProviderError> {
        let stdout = self.exec(args).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| ProviderError::Permanent(format!("unexpected provider output: {e}")))
    }
}

#[async_trait]
impl CloudProvider for AwsCliProvider {
    async fn launch(
        &self,
        image_id: &str,
        count: usize,
        role: NodeRole,
        client_token: &str,
    ) -> Result<Vec<NodeHandle>, ProviderError> {
        let response: RunInstancesResponse = self
            .exec_json(self.run_instances_args(image_id, count, role, client_token))
            .await?;
        Ok(response
            .instances
            .into_iter()
            .map(|i| NodeHandle {
                id: InstanceId::new(i.instance_id),
                role,
            })
            .collect())
    }

    async fn describe(&self, id: &InstanceId) -> Result<InstanceStatus, ProviderError> {
        let response: DescribeInstancesResponse = self
            .exec_json(vec![
                "describe-instances".into(),
                "--instance-ids".into(),
                id.to_string(),
            ])
            .await?;
        response
            .reservations
            .iter()
            .flat_map(|r| r.instances.iter())
            .find(|i| i.instance_id == id.as_str())
            .map(|i| i.status())
            .ok_or_else(|| ProviderError::Transient(format!("{id} missing from describe output")))
    }

    async fn terminate(&self, ids: &[InstanceId]) -> Result<(), ProviderError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut args = vec!["terminate-instances".to_string(), "--instance-ids".into()];
        args.extend(ids.iter().map(ToString::to_string));
        self.exec(args).await.map(|_| ())
    }

    async fn tag(&self, id: &InstanceId, tags: &[(String, String)]) -> Result<(), ProviderError> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut args = vec![
            "create-tags".to_string(),
            "--resources".into(),
            id.to_string(),
            "--tags".into(),
        ];
        args.extend(tags.iter().map(|(k, v)| format!("Key={k},Value={v}")));
        self.exec(args).await.map(|_| ())
    }

    fn provider_name(&self) -> &'static str {
        "aws"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_is_transient() {
        let err = classify(
            "\nAn error occurred (RequestLimitExceeded) when calling the DescribeInstances operation: Request limit exceeded.\n",
        );
        assert!(err.is_transient());
        assert!(classify("Could not connect to the endpoint URL: \"https://ec2.us-east-1.amazonaws.com/\"").is_transient());
    }

    #[test]
    fn bad_image_is_permanent() {
        let err = classify(
            "An error occurred (InvalidAMIID.Malformed) when calling the RunInstances operation: Invalid id: \"nope\"",
        );
        assert_eq!(
            err,
            ProviderError::Permanent(
                "An error occurred (InvalidAMIID.Malformed) when calling the RunInstances operation: Invalid id: \"nope\"".into()
            )
        );
        assert!(!classify("An error occurred (UnauthorizedOperation)").is_transient());
    }

    #[test]
    fn run_instances_args_include_optional_settings() {
        let provider = AwsCliProvider::new(ProviderConfig {
            key_name: Some("lab".into()),
            security_groups: vec!["sg-1".into(), "sg-2".into()],
            placement_group: Some("tight".into()),
            ..ProviderConfig::default()
        });
        let args = provider.run_instances_args("ami-1", 3, NodeRole::Worker, "s-1-worker");
        let joined = args.join(" ");

        assert!(joined.starts_with(
            "run-instances --image-id ami-1 --count 3 --instance-type m4.large --client-token s-1-worker"
        ));
        assert!(joined.contains("--key-name lab"));
        assert!(joined.contains("--security-group-ids sg-1 sg-2"));
        assert!(joined.contains("--placement GroupName=tight"));
        assert!(!joined.contains("--subnet-id"));
        assert!(joined.ends_with("Tags=[{Key=rcluster-role,Value=worker}]"));
    }

    #[test]
    fn global_args_select_account() {
        let provider = AwsCliProvider::new(ProviderConfig {
            region: "eu-west-1".into(),
            profile: "lab".into(),
            ..ProviderConfig::default()
        });
        assert_eq!(
            provider.global_args(),
            vec!["--region", "eu-west-1", "--profile", "lab", "--output", "json", "ec2"]
        );
    }
}
