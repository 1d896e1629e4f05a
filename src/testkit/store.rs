//! In-memory [`SessionStore`].

use parking_lot::Mutex;

use crate::domain::{AccountContext, ClusterSession, SessionStatus};
use crate::error::Result;
use crate::port::SessionStore;

#[derive(Default)]
struct StoreState {
    session: Option<ClusterSession>,
    history: Vec<SessionStatus>,
    fail_saves: bool,
    clears: u32,
}

/// Session store that keeps the record in memory and remembers every save.
pub struct MemorySessionStore {
    account: AccountContext,
    state: Mutex<StoreState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::for_account(AccountContext::new("test", "us-east-1"))
    }

    pub fn for_account(account: AccountContext) -> Self {
        Self {
            account,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Start with `session` already stored.
    pub fn with_session(self, session: ClusterSession) -> Self {
        self.state.lock().session = Some(session);
        self
    }

    /// Make every later save fail.
    pub fn fail_saves(&self) {
        self.state.lock().fail_saves = true;
    }

    /// The currently stored session.
    pub fn current(&self) -> Option<ClusterSession> {
        self.state.lock().session.clone()
    }

    /// Status of every successful save, in order.
    pub fn saved_statuses(&self) -> Vec<SessionStatus> {
        self.state.lock().history.clone()
    }

    pub fn clears(&self) -> u32 {
        self.state.lock().clears
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &ClusterSession) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_saves {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "session store is read-only",
            )
            .into());
        }
        state.history.push(session.status);
        state.session = Some(session.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<ClusterSession>> {
        Ok(self.state.lock().session.clone())
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.session = None;
        state.clears += 1;
        Ok(())
    }

    fn account(&self) -> &AccountContext {
        &self.account
    }
}
