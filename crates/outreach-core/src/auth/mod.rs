//! Authentication state for one backend origin.
//!
//! This module provides:
//! - `CredentialStore`: session cookie, CSRF token, and HMIS bearer storage
//! - `SessionMonitor`: single-timer expiry scheduling across credential sources

pub mod credentials;
pub mod session;

pub use credentials::{CredentialSet, CredentialStore};
pub use session::{
    bearer_token_expiry, session_cookie_expiry, ExpiryCallback, ExpiryCheck, SessionMonitor,
};
