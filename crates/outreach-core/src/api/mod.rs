//! Gateway transport for the backend GraphQL/REST APIs.
//!
//! `GatewayClient` carries every operation through CSRF priming, header
//! injection, REST/GraphQL dispatch, and unauthenticated detection;
//! `HmisClient` layers the pagination aggregators over the HMIS REST API.

pub mod client;
pub mod error;
pub mod hmis;
pub mod operation;
pub mod pagination;
pub mod redirect;

pub use client::{GatewayClient, GraphqlResponse};
pub use error::{ApiError, GraphqlError, UNAUTHENTICATED_CODE};
pub use hmis::HmisClient;
pub use operation::{Operation, OperationKind};
pub use redirect::{RedirectAction, RedirectGuard};
