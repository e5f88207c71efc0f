//! Per-run execution context.

use boardflow_core::{FlowId, UserId};
use boardflow_remote::RemoteSession;
use tracing::warn;

/// State owned by one run: who it runs for and the current remote session.
///
/// The context is threaded by `&mut` through the walk, so a session opened
/// on one path is visible to every node walked after it.
pub struct ExecutionContext {
    /// The saved flow being run, or `None` for an unsaved graph.
    pub flow_id: Option<FlowId>,
    /// The owner every device lookup is checked against.
    pub owner_id: UserId,
    session: Option<Box<dyn RemoteSession>>,
}

impl ExecutionContext {
    /// Creates a context with no session.
    #[must_use]
    pub fn new(flow_id: Option<FlowId>, owner_id: UserId) -> Self {
        Self {
            flow_id,
            owner_id,
            session: None,
        }
    }

    /// Returns the current session, if one is open.
    #[must_use]
    pub fn session(&self) -> Option<&dyn RemoteSession> {
        self.session.as_deref()
    }

    /// Returns true if a session is open.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Installs a freshly opened session.
    ///
    /// Callers close any previous session first with `close_session`.
    pub fn set_session(&mut self, session: Box<dyn RemoteSession>) {
        self.session = Some(session);
    }

    /// Closes and drops the current session, if any.
    pub async fn close_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(e) = session.close().await {
            warn!(host = %session.host(), error = %e, "failed to close remote session");
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("flow_id", &self.flow_id)
            .field("owner_id", &self.owner_id)
            .field("session", &self.session.as_ref().map(|s| s.host()))
            .finish()
    }
}
