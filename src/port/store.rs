//! Session persistence port.

use crate::domain::{AccountContext, ClusterSession};
use crate::error::Result;

/// Durable storage for the one session of an account context.
pub trait SessionStore: Send + Sync {
    /// Replace the stored session. Either the old or the new record survives
    /// a crash, never a mix.
    fn save(&self, session: &ClusterSession) -> Result<()>;

    /// The stored session, if any.
    fn load(&self) -> Result<Option<ClusterSession>>;

    /// Forget the stored session. Clearing an empty store succeeds.
    fn clear(&self) -> Result<()>;

    /// Account context this store is keyed by.
    fn account(&self) -> &AccountContext;
}
