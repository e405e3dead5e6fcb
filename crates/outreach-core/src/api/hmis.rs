//! HMIS REST API client.
//!
//! The HMIS backend uses bearer-token auth and paginates its collection
//! endpoints two different ways depending on the resource. Screens that need
//! "all items" go through the aggregators in `pagination`; this client wires
//! them to the wire: `page`/`per_page` query parameters, the bearer token
//! from the credential store, and the shared browser User-Agent.

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;

use crate::auth::CredentialStore;

use super::client::USER_AGENT;
use super::pagination::{self, CountedPage, CursorPage, PageRequest, DEFAULT_PER_PAGE};
use super::ApiError;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// REST client for the HMIS API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HmisClient {
    client: Client,
    base_url: String,
    store: CredentialStore,
}

impl HmisClient {
    pub fn new(base_url: impl Into<String>, store: CredentialStore) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            store,
        })
    }

    /// Fetch every item of a cursor-paginated resource (HAL `_links.next`)
    pub async fn fetch_all_linked<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        pagination::fetch_all_cursor(DEFAULT_PER_PAGE, |request| {
            self.get_page::<CursorPage<T>>(path, request)
        })
        .await
    }

    /// Fetch every item of a count-paginated resource (`_meta.page_count`)
    pub async fn fetch_all_counted<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        pagination::fetch_all_counted(DEFAULT_PER_PAGE, |request| {
            self.get_page::<CountedPage<T>>(path, request)
        })
        .await
    }

    async fn get_page<P: DeserializeOwned>(&self, path: &str, request: PageRequest) -> Result<P> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .client
            .get(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .query(&[("page", request.page), ("per_page", request.per_page)]);

        if let Some(token) = self.store.hmis_token() {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to fetch {} page {}", path, request.page))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body).into());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} page {}", path, request.page))
    }
}
