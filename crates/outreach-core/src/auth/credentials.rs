//! Credential storage for one backend origin.
//!
//! A `CredentialStore` holds the session cookie, CSRF token, and HMIS bearer
//! token issued by a backend, and builds the `Cookie` request header from
//! them. It is the only mutable state shared across the transport components:
//! written by login/logout and CSRF priming, read synchronously on every
//! outgoing request.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential file name in the cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialSet {
    pub session_cookie: Option<String>,
    pub session_expires_at: Option<DateTime<Utc>>,
    pub csrf_token: Option<String>,
    pub hmis_token: Option<String>,
}

impl CredentialSet {
    pub fn session_expired(&self) -> bool {
        match self.session_expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }
}

/// Per-backend credential store.
/// Clone is cheap - the credential set is shared behind an Arc.
#[derive(Clone)]
pub struct CredentialStore {
    cache_dir: PathBuf,
    inner: Arc<Mutex<CredentialSet>>,
}

impl CredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            inner: Arc::new(Mutex::new(CredentialSet::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CredentialSet> {
        // A poisoned lock only means a writer panicked mid-update; the set
        // itself is plain data, so recover it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load credentials from disk. Returns false if no usable credentials
    /// were found; an expired session is not restored.
    pub fn load(&self) -> Result<bool> {
        let path = self.credentials_path();
        if !path.exists() {
            return Ok(false);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read credentials file")?;
        let set: CredentialSet = serde_json::from_str(&contents)
            .context("Failed to parse credentials file")?;

        if set.session_expired() {
            return Ok(false);
        }
        *self.lock() = set;
        Ok(true)
    }

    pub fn save(&self) -> Result<()> {
        let set = self.snapshot();
        let path = self.credentials_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&set)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Clear all credentials, in memory and on disk. Called on logout and
    /// when switching backend environments.
    pub fn clear(&self) -> Result<()> {
        *self.lock() = CredentialSet::default();
        let path = self.credentials_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn set_session(&self, cookie: String, expires_at: Option<DateTime<Utc>>) {
        let mut set = self.lock();
        set.session_cookie = Some(cookie);
        set.session_expires_at = expires_at;
    }

    pub fn set_csrf_token(&self, token: String) {
        self.lock().csrf_token = Some(token);
    }

    pub fn set_hmis_token(&self, token: String) {
        self.lock().hmis_token = Some(token);
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.lock().csrf_token.clone()
    }

    pub fn hmis_token(&self) -> Option<String> {
        self.lock().hmis_token.clone()
    }

    pub fn session_expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().session_expires_at
    }

    pub fn has_session(&self) -> bool {
        let set = self.lock();
        set.session_cookie.is_some() && !set.session_expired()
    }

    /// Current credential set, cloned under the lock
    pub fn snapshot(&self) -> CredentialSet {
        self.lock().clone()
    }

    /// Build the `Cookie` header value from the stored session and CSRF
    /// cookies. Returns None when neither is present.
    pub fn cookie_header(&self, session_name: &str, csrf_name: &str) -> Option<String> {
        let set = self.lock();
        let mut pairs = Vec::new();
        if let Some(ref session) = set.session_cookie {
            pairs.push(format!("{}={}", session_name, session));
        }
        if let Some(ref csrf) = set.csrf_token {
            pairs.push(format!("{}={}", csrf_name, csrf));
        }
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    fn credentials_path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIALS_FILE)
    }
}
