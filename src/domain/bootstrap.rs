//! Bootstrap plans: the ordered, idempotent steps that take a booted
//! instance to a servable node.
//!
//! Each step is wrapped so that it records a completion marker on the node
//! and is skipped when the marker already exists. Re-running a plan against
//! a half-configured node therefore only runs the steps that never finished.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::node::NodeRole;

/// Placeholder for the manager's in-cluster address.
pub const MANAGER_ADDRESS: &str = "{manager_address}";

/// One named shell step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStep {
    pub name: String,
    pub command: String,
}

impl BootstrapStep {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    /// Steps that mention the manager's address can only run once the
    /// manager is ready.
    #[must_use]
    pub fn needs_manager(&self) -> bool {
        self.command.contains(MANAGER_ADDRESS)
    }

    /// File name of the step's completion marker. Distinct names that
    /// sanitize to the same marker count as duplicates.
    #[must_use]
    pub fn marker_name(&self) -> String {
        let stem: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{stem}.done")
    }
}

/// Values substituted into step commands.
#[derive(Debug, Clone, Default)]
pub struct StepVars {
    pub manager_address: Option<String>,
    pub shared_home: String,
    pub user: String,
}

impl StepVars {
    fn render(&self, command: &str) -> String {
        let mut out = command
            .replace("{shared_home}", &self.shared_home)
            .replace("{user}", &self.user);
        if let Some(addr) = &self.manager_address {
            out = out.replace(MANAGER_ADDRESS, addr);
        }
        out
    }
}

/// Ordered steps for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPlan {
    role: NodeRole,
    marker_dir: String,
    steps: Vec<BootstrapStep>,
}

impl BootstrapPlan {
    /// # Errors
    ///
    /// Step names map to marker files, so their markers must be unique.
    pub fn try_new(
        role: NodeRole,
        marker_dir: impl Into<String>,
        steps: Vec<BootstrapStep>,
    ) -> Result<Self, DomainError> {
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.marker_name()) {
                return Err(DomainError::DuplicateStep {
                    name: step.name.clone(),
                });
            }
        }
        Ok(Self {
            role,
            marker_dir: marker_dir.into(),
            steps,
        })
    }

    #[must_use]
    pub fn role(&self) -> NodeRole {
        self.role
    }

    #[must_use]
    pub fn steps(&self) -> &[BootstrapStep] {
        &self.steps
    }

    /// Shell command that runs `step` at most once per node.
    #[must_use]
    pub fn guarded_command(&self, step: &BootstrapStep, vars: &StepVars) -> String {
        let marker = format!("{}/{}", self.marker_dir, step.marker_name());
        format!(
            "test -f '{marker}' || ( set -e; {body}; sudo mkdir -p '{dir}'; sudo touch '{marker}' )",
            body = vars.render(&step.command),
            dir = self.marker_dir,
        )
    }

    /// Stock manager plan: runtime, interactive server, service account,
    /// SSH keys, and the shared home export.
    #[must_use]
    pub fn default_manager() -> Vec<BootstrapStep> {
        vec![
            BootstrapStep::new("runtime", INSTALL_RUNTIME),
            BootstrapStep::new(
                "server",
                "sudo DEBIAN_FRONTEND=noninteractive apt-get install -y -qq gdebi-core wget \
                 && wget -q -O /tmp/rstudio-server.deb https://download2.rstudio.org/server/jammy/amd64/rstudio-server-2024.04.2-764-amd64.deb \
                 && sudo gdebi -n /tmp/rstudio-server.deb",
            ),
            BootstrapStep::new("service-account", CREATE_ACCOUNT),
            BootstrapStep::new(
                "ssh-keys",
                "sudo -u {user} mkdir -p {shared_home}/.ssh \
                 && (sudo -u {user} test -f {shared_home}/.ssh/id_rsa || sudo -u {user} ssh-keygen -q -t rsa -N '' -f {shared_home}/.ssh/id_rsa) \
                 && sudo -u {user} sh -c 'cat {shared_home}/.ssh/id_rsa.pub >> {shared_home}/.ssh/authorized_keys'",
            ),
            BootstrapStep::new(
                "shared-home-export",
                "sudo DEBIAN_FRONTEND=noninteractive apt-get install -y -qq nfs-kernel-server \
                 && (grep -q '^{shared_home} ' /etc/exports || echo '{shared_home} *(rw,sync,no_subtree_check,no_root_squash)' | sudo tee -a /etc/exports) \
                 && sudo exportfs -ra",
            ),
        ]
    }

    /// Stock worker plan: runtime, service account, and the shared home mount.
    #[must_use]
    pub fn default_worker() -> Vec<BootstrapStep> {
        vec![
            BootstrapStep::new("runtime", INSTALL_RUNTIME),
            BootstrapStep::new("service-account", CREATE_ACCOUNT),
            BootstrapStep::new(
                "shared-home-mount",
                "sudo DEBIAN_FRONTEND=noninteractive apt-get install -y -qq nfs-common \
                 && (mountpoint -q {shared_home} || sudo mount -t nfs {manager_address}:{shared_home} {shared_home})",
            ),
        ]
    }
}

const INSTALL_RUNTIME: &str =
    "sudo apt-get update -qq && sudo DEBIAN_FRONTEND=noninteractive apt-get install -y -qq r-base";

const CREATE_ACCOUNT: &str = "id -u {user} >/dev/null 2>&1 \
     || sudo useradd --create-home --home-dir {shared_home} --shell /bin/bash {user}";

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> StepVars {
        StepVars {
            manager_address: Some("10.0.0.1".into()),
            shared_home: "/home/cluster".into(),
            user: "cluster".into(),
        }
    }

    #[test]
    fn guarded_command_checks_marker_first() {
        let plan = BootstrapPlan::try_new(
            NodeRole::Worker,
            "/var/lib/rcluster/steps",
            vec![BootstrapStep::new("mount home", "mount {manager_address}:{shared_home}")],
        )
        .unwrap();
        let cmd = plan.guarded_command(&plan.steps()[0], &vars());

        assert!(cmd.starts_with("test -f '/var/lib/rcluster/steps/mount-home.done' ||"));
        assert!(cmd.contains("mount 10.0.0.1:/home/cluster"));
        assert!(cmd.ends_with("sudo touch '/var/lib/rcluster/steps/mount-home.done' )"));
    }

    #[test]
    fn duplicate_step_names_are_rejected() {
        let result = BootstrapPlan::try_new(
            NodeRole::Manager,
            "/tmp",
            vec![BootstrapStep::new("a", "true"), BootstrapStep::new("a", "false")],
        );
        assert_eq!(
            result.unwrap_err(),
            DomainError::DuplicateStep { name: "a".into() }
        );
    }

    #[test]
    fn names_sharing_a_marker_are_rejected() {
        let result = BootstrapPlan::try_new(
            NodeRole::Worker,
            "/m",
            vec![
                BootstrapStep::new("setup r", "echo one"),
                BootstrapStep::new("setup-r", "echo two"),
            ],
        );
        assert_eq!(
            result.unwrap_err(),
            DomainError::DuplicateStep {
                name: "setup-r".into()
            }
        );
    }

    #[test]
    fn only_worker_mount_waits_for_manager() {
        assert!(BootstrapPlan::default_manager()
            .iter()
            .all(|s| !s.needs_manager()));
        let waiting: Vec<_> = BootstrapPlan::default_worker()
            .into_iter()
            .filter(BootstrapStep::needs_manager)
            .map(|s| s.name)
            .collect();
        assert_eq!(waiting, vec!["shared-home-mount"]);
    }

    #[test]
    fn missing_manager_address_leaves_placeholder() {
        let rendered = StepVars::default().render("ping {manager_address}");
        assert_eq!(rendered, "ping {manager_address}");
    }
}
