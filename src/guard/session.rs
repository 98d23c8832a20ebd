// src/guard/session.rs
//! Session expiry bookkeeping. Identity issuance lives elsewhere; this only
//! tracks the expiry window of the signed-in dashboard session.

use std::sync::Mutex;

use crate::sync::now_ms;

#[derive(Debug, Clone, Copy)]
pub struct SessionCfg {
    pub session_timeout_ms: u64,
    pub warning_ms: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            session_timeout_ms: 86_400_000,
            warning_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionInner {
    user_id: String,
    expires_at_ms: u64,
    warning_acknowledged: bool,
}

/// Status snapshot for the UI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStatus {
    pub user_id: String,
    pub expires_at_ms: u64,
    pub expires_in_ms: u64,
    pub expired: bool,
    pub warn: bool,
    pub warning_acknowledged: bool,
}

#[derive(Debug)]
pub struct SessionTracker {
    cfg: SessionCfg,
    inner: Mutex<Option<SessionInner>>,
}

impl SessionTracker {
    pub fn new(cfg: SessionCfg) -> Self {
        Self {
            cfg,
            inner: Mutex::new(None),
        }
    }

    /// Created on sign-in; expiry runs a full timeout from now.
    pub fn sign_in(&self, user_id: &str) {
        self.sign_in_at(user_id, now_ms());
    }

    pub fn sign_in_at(&self, user_id: &str, now_ms: u64) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        *inner = Some(SessionInner {
            user_id: user_id.to_string(),
            expires_at_ms: now_ms + self.cfg.session_timeout_ms,
            warning_acknowledged: false,
        });
    }

    /// Explicit user action pushes expiry forward by the full timeout.
    pub fn extend(&self) {
        self.extend_at(now_ms());
    }

    pub fn extend_at(&self, now_ms: u64) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if let Some(s) = inner.as_mut() {
            s.expires_at_ms = now_ms + self.cfg.session_timeout_ms;
            s.warning_acknowledged = false;
        }
    }

    /// Sign-out or forced expiry path.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        *inner = None;
    }

    pub fn acknowledge_warning(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if let Some(s) = inner.as_mut() {
            s.warning_acknowledged = true;
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }

    /// True iff an expiry is set and now has reached it.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.as_ref().is_some_and(|s| now_ms >= s.expires_at_ms)
    }

    pub fn should_warn(&self) -> bool {
        self.should_warn_at(now_ms())
    }

    /// True iff an expiry is set and now sits inside the warning window
    /// before it: `expiry - warning_ms <= now < expiry`.
    pub fn should_warn_at(&self, now_ms: u64) -> bool {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.as_ref().is_some_and(|s| {
            now_ms < s.expires_at_ms
                && now_ms >= s.expires_at_ms.saturating_sub(self.cfg.warning_ms)
        })
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.status_at(now_ms())
    }

    pub fn status_at(&self, now_ms: u64) -> Option<SessionStatus> {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.as_ref().map(|s| SessionStatus {
            user_id: s.user_id.clone(),
            expires_at_ms: s.expires_at_ms,
            expires_in_ms: s.expires_at_ms.saturating_sub(now_ms),
            expired: now_ms >= s.expires_at_ms,
            warn: now_ms < s.expires_at_ms
                && now_ms >= s.expires_at_ms.saturating_sub(self.cfg.warning_ms),
            warning_acknowledged: s.warning_acknowledged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SessionTracker {
        SessionTracker::new(SessionCfg {
            session_timeout_ms: 10_000,
            warning_ms: 2_000,
        })
    }

    #[test]
    fn warn_window_boundaries() {
        let t = tracker();
        let t0 = 100_000u64;
        t.sign_in_at("ana", t0); // expires at 110_000

        assert!(!t.should_warn_at(107_999));
        assert!(t.should_warn_at(108_000));
        assert!(t.should_warn_at(109_999));
        assert!(!t.should_warn_at(110_000)); // expired, not warning
        assert!(t.is_expired_at(110_000));
        assert!(!t.is_expired_at(109_999));
    }

    #[test]
    fn extend_pushes_full_timeout_from_now() {
        let t = tracker();
        let t0 = 1_000u64;
        t.sign_in_at("ana", t0);
        t.extend_at(t0 + 9_000);
        assert!(!t.is_expired_at(t0 + 10_000));
        assert!(t.is_expired_at(t0 + 19_000));
    }

    #[test]
    fn no_session_is_never_expired_or_warning() {
        let t = tracker();
        assert!(!t.is_expired_at(5));
        assert!(!t.should_warn_at(5));
        assert!(t.status_at(5).is_none());

        t.sign_in_at("ana", 0);
        t.clear();
        assert!(!t.is_expired_at(1_000_000));
    }

    #[test]
    fn acknowledge_is_bookkeeping_only() {
        let t = tracker();
        t.sign_in_at("ana", 0);
        t.acknowledge_warning();
        // The window itself is unaffected by acknowledgement.
        assert!(t.should_warn_at(9_000));
        assert!(t.status_at(9_000).unwrap().warning_acknowledged);
    }
}
