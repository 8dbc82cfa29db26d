//! Session context: who is signed in, on which device, and whether we are online.
//!
//! Constructed once at startup and shared with every component that needs it.

use crate::{DeviceId, UserId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-process session state.
#[derive(Debug)]
pub struct SessionContext {
    device_id: DeviceId,
    user_id: RwLock<Option<UserId>>,
    online: AtomicBool,
}

impl SessionContext {
    /// Create a signed-out, online session for `device_id`.
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: RwLock::new(None),
            online: AtomicBool::new(true),
        }
    }

    /// Builder: start signed in as `user_id`.
    pub fn with_user(self, user_id: impl Into<UserId>) -> Self {
        *self.user_id.write() = Some(user_id.into());
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Currently signed-in user.
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id.read().clone()
    }

    pub fn sign_in(&self, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        tracing::info!(user_id = %user_id, device_id = %self.device_id, "Signed in");
        *self.user_id.write() = Some(user_id);
    }

    pub fn sign_out(&self) {
        if let Some(user_id) = self.user_id.write().take() {
            tracing::info!(user_id = %user_id, "Signed out");
        }
    }

    /// Record a connectivity change reported by the platform.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            tracing::info!(online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Storage scope: the user id when signed in, otherwise the device id.
    pub fn scope(&self) -> String {
        self.user_id().unwrap_or_else(|| self.device_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_follows_sign_in() {
        let session = SessionContext::new("device-1");
        assert_eq!(session.scope(), "device-1");
        assert_eq!(session.user_id(), None);

        session.sign_in("user-1");
        assert_eq!(session.scope(), "user-1");

        session.sign_out();
        assert_eq!(session.scope(), "device-1");
    }

    #[test]
    fn connectivity_flag() {
        let session = SessionContext::new("device-1").with_user("user-1");
        assert!(session.is_online());
        session.set_online(false);
        assert!(!session.is_online());
        assert_eq!(session.user_id().as_deref(), Some("user-1"));
    }
}
