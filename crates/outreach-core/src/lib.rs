//! Core client library for the outreach case-management apps.
//!
//! This crate is the transport layer shared by the mobile/web clients: an
//! authenticated gateway client for the backend GraphQL/REST API, credential
//! and session-expiry management, and paginated fetch aggregation for the
//! HMIS REST API.
//!
//! The pieces compose around one shared `CredentialStore` per backend:
//! - `GatewayClient` primes and attaches the CSRF token, routes each
//!   operation to REST or GraphQL execution, and funnels unauthenticated
//!   failures through a deduplicated `RedirectGuard`
//! - `SessionMonitor` keeps a single timer scheduled for the earliest
//!   credential expiry and fires a logout-style callback when it is reached
//! - `HmisClient` aggregates both of the HMIS API's pagination conventions
//!   behind "fetch all pages" calls
//!
//! UI concerns stay in the apps: the redirect action and the expiry callback
//! are injected closures, never navigation logic of their own.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{
    ApiError, GatewayClient, GraphqlError, GraphqlResponse, HmisClient, Operation, OperationKind,
    RedirectAction, RedirectGuard,
};
pub use auth::{CredentialSet, CredentialStore, ExpiryCallback, ExpiryCheck, SessionMonitor};
pub use config::BackendConfig;
