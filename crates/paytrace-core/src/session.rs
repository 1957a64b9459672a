//! Session root bookkeeping
//!
//! One session per engine. The root action is created during the first
//! successful `configure` and its id becomes the fallback parent for every
//! action that has neither an explicit nor an ambient parent.

use std::sync::OnceLock;

use paytrace_span::{ActionId, SessionId};

/// Session id plus the lazily-set root action id
#[derive(Debug)]
pub struct SessionRoot {
    session_id: SessionId,
    root: OnceLock<ActionId>,
}

impl SessionRoot {
    pub fn new() -> Self {
        Self {
            session_id: SessionId::new(),
            root: OnceLock::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Root action id, once the session has started.
    pub fn root_id(&self) -> Option<ActionId> {
        self.root.get().copied()
    }

    /// Record the root id. Only the first call has any effect; returns
    /// whether this call set it.
    pub fn set_root(&self, id: ActionId) -> bool {
        self.root.set(id).is_ok()
    }
}

impl Default for SessionRoot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_set_once() {
        let session = SessionRoot::new();
        assert_eq!(session.root_id(), None);

        let first = ActionId::new();
        assert!(session.set_root(first));
        assert!(!session.set_root(ActionId::new()));
        assert_eq!(session.root_id(), Some(first));
    }

    #[test]
    fn test_sessions_are_distinct() {
        assert_ne!(SessionRoot::new().session_id(), SessionRoot::new().session_id());
    }
}
