//! Session expiry monitoring.
//!
//! A `SessionMonitor` watches every credential source for one backend and
//! keeps at most one timer scheduled, firing the expiry callback at the
//! earliest future expiry across all sources. `check_and_schedule` is
//! idempotent when nothing changed, so it can be invoked opportunistically
//! on every outgoing request without building up duplicate timers.
//!
//! Expiry derives from locally stored metadata. A session the server revokes
//! early is not detected here; that case surfaces as a 401 on the next
//! request and is handled by the redirect guard.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::{join_all, BoxFuture};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::CredentialStore;

/// Reads one credential source and reports when it invalidates, if known
pub type ExpiryCheck =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<DateTime<Utc>>>> + Send + Sync>;

/// Invoked when the earliest credential expiry is reached
pub type ExpiryCallback = Arc<dyn Fn() + Send + Sync>;

struct MonitorState {
    last_expiries: Option<Vec<Option<DateTime<Utc>>>>,
    /// Expiry set the callback already fired for, so repeated checks with an
    /// unchanged, already-expired set stay idempotent
    fired_for: Option<Vec<Option<DateTime<Utc>>>>,
    timer: Option<JoinHandle<()>>,
    foreground: bool,
}

/// One instance per active backend URL.
pub struct SessionMonitor {
    backend_url: String,
    checks: Vec<ExpiryCheck>,
    on_expired: ExpiryCallback,
    state: Arc<Mutex<MonitorState>>,
}

impl SessionMonitor {
    pub fn new(
        backend_url: impl Into<String>,
        checks: Vec<ExpiryCheck>,
        on_expired: ExpiryCallback,
    ) -> Self {
        Self {
            backend_url: backend_url.into(),
            checks,
            on_expired,
            state: Arc::new(Mutex::new(MonitorState {
                last_expiries: None,
                fired_for: None,
                timer: None,
                foreground: true,
            })),
        }
    }

    /// Monitor with the standard checkers for a backend: the session cookie
    /// expiry and the HMIS bearer token's `exp` claim.
    pub fn for_store(
        backend_url: impl Into<String>,
        store: &CredentialStore,
        on_expired: ExpiryCallback,
    ) -> Self {
        Self::new(
            backend_url,
            vec![session_cookie_expiry(store), bearer_token_expiry(store)],
            on_expired,
        )
    }

    /// Re-read all credential sources and reconcile the timer.
    ///
    /// Checkers run concurrently; a failing checker is logged and treated as
    /// "no expiry" for this cycle. The timer is only touched when the
    /// observed expiries changed or no timer is pending (the latter covers
    /// returning from background). An expiry already in the past invokes the
    /// callback synchronously instead of scheduling, and is remembered so
    /// further checks with the same expiries do not fire again.
    ///
    /// Returns true when this call scheduled a timer or fired the callback.
    pub async fn check_and_schedule(&self) -> bool {
        let results = join_all(self.checks.iter().map(|check| check())).await;
        let expiries: Vec<Option<DateTime<Utc>>> = results
            .into_iter()
            .map(|result| match result {
                Ok(expiry) => expiry,
                Err(e) => {
                    debug!(backend = %self.backend_url, error = %e, "expiry check failed, skipping this cycle");
                    None
                }
            })
            .collect();

        let now = Utc::now();
        let fire_now = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let timer_pending = state
                .timer
                .as_ref()
                .map(|timer| !timer.is_finished())
                .unwrap_or(false);
            let unchanged = state.last_expiries.as_ref() == Some(&expiries);
            let already_fired = state.fired_for.as_ref() == Some(&expiries);

            if unchanged && (timer_pending || already_fired) {
                return false;
            }
            if !state.foreground {
                // Battery policy: nothing is scheduled while backgrounded.
                state.last_expiries = Some(expiries);
                return false;
            }

            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let earliest = expiries.iter().flatten().min().copied();

            match earliest {
                None => {
                    state.last_expiries = Some(expiries);
                    state.fired_for = None;
                    return false;
                }
                Some(expiry) if expiry <= now => {
                    state.fired_for = Some(expiries.clone());
                    state.last_expiries = Some(expiries);
                    true
                }
                Some(expiry) => {
                    // Anchor the deadline here: the spawned task may be first
                    // polled arbitrarily late, and sleep(delay) would only
                    // start counting then.
                    let delay = (expiry - now).to_std().unwrap_or_default();
                    let deadline = tokio::time::Instant::now() + delay;
                    debug!(backend = %self.backend_url, at = %expiry, "scheduling session expiry timer");
                    let on_expired = Arc::clone(&self.on_expired);
                    let backend_url = self.backend_url.clone();
                    let monitor_state = Arc::clone(&self.state);
                    let fired_set = expiries.clone();
                    state.fired_for = None;
                    state.last_expiries = Some(expiries);
                    state.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep_until(deadline).await;
                        warn!(backend = %backend_url, "session expired");
                        {
                            let mut state =
                                monitor_state.lock().unwrap_or_else(|e| e.into_inner());
                            state.fired_for = Some(fired_set);
                        }
                        on_expired();
                    }));
                    false
                }
            }
        };

        if fire_now {
            warn!(backend = %self.backend_url, "session already expired");
            (self.on_expired)();
        }
        true
    }

    /// Backgrounding cancels the pending timer; nothing is rescheduled until
    /// the next explicit check after returning to foreground.
    pub fn set_foreground(&self, foreground: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.foreground = foreground;
        if !foreground {
            if let Some(timer) = state.timer.take() {
                debug!(backend = %self.backend_url, "app backgrounded, cancelling expiry timer");
                timer.abort();
            }
        }
    }

    /// Cancel the pending timer. Also runs on drop.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

/// Checker for the backend session cookie's stored expiry
pub fn session_cookie_expiry(store: &CredentialStore) -> ExpiryCheck {
    let store = store.clone();
    Arc::new(move || {
        let store = store.clone();
        Box::pin(async move { Ok(store.session_expires_at()) })
    })
}

/// Checker for the HMIS bearer token's `exp` claim
pub fn bearer_token_expiry(store: &CredentialStore) -> ExpiryCheck {
    let store = store.clone();
    Arc::new(move || {
        let store = store.clone();
        Box::pin(async move { Ok(store.hmis_token().as_deref().and_then(jwt_expiry)) })
    })
}

/// Read the `exp` claim out of a JWT without verifying the signature.
/// A token without a readable claim yields None rather than an error.
pub(crate) fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}
