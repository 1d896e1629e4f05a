//! Node configuration port.

use async_trait::async_trait;

use crate::error::BootstrapError;

/// Remote execution on a booted node.
#[async_trait]
pub trait NodeConfigurator: Send + Sync {
    /// Whether the node accepts remote commands yet.
    async fn is_reachable(&self, address: &str) -> bool;

    /// Run one bootstrap step. A non-zero exit is a [`BootstrapError::ScriptFailure`].
    async fn run(&self, address: &str, step: &str, command: &str) -> Result<(), BootstrapError>;

    /// Number of cores on the node, if it can be determined.
    async fn core_count(&self, address: &str) -> Option<u32>;

    /// Replace `path` on the node with `contents`.
    async fn write_file(
        &self,
        address: &str,
        path: &str,
        contents: &str,
    ) -> Result<(), BootstrapError>;
}
