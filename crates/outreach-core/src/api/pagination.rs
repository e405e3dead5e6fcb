//! Paginated fetch aggregation for the HMIS REST API.
//!
//! The API paginates two different ways, so both conventions live behind the
//! same "fetch every page" shape:
//! - cursor style: HAL `_links.next` on each page; strictly sequential
//!   because the existence of a further page is only known after fetching
//!   the current one
//! - page-count style: `_meta.page_count` on the first page; the remaining
//!   pages are fetched concurrently and concatenated in page-index order
//!
//! Every page is fetched exactly once and item order is append-only in page
//! order. Fetch errors propagate to the caller unmodified - no partial
//! results, no retry.

use std::future::Future;

use anyhow::Result;
use futures::future::try_join_all;
use serde::Deserialize;
use tracing::debug;

/// Default page size requested from the HMIS API
pub const DEFAULT_PER_PAGE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

/// HAL-style page: `{ items, _links: { next: { href } } }`
#[derive(Debug, Clone, Deserialize)]
pub struct CursorPage<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(rename = "_links", default)]
    pub links: Option<PageLinks>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<PageLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageLink {
    pub href: String,
}

impl<T> CursorPage<T> {
    pub fn next_href(&self) -> Option<&str> {
        self.links.as_ref()?.next.as_ref().map(|link| link.href.as_str())
    }
}

/// Metadata-style page: `{ items, _meta: { current_page, page_count } }`
#[derive(Debug, Clone, Deserialize)]
pub struct CountedPage<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(rename = "_meta")]
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub page_count: u32,
}

/// Fetch every page of a cursor-paginated resource, stopping when a page
/// carries no `next` link. Pages are fetched one at a time, in order.
pub async fn fetch_all_cursor<T, F, Fut>(per_page: u32, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<CursorPage<T>>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let response = fetch(PageRequest { page, per_page }).await?;
        let has_next = response.next_href().is_some();
        items.extend(response.items);
        if !has_next {
            break;
        }
        page += 1;
    }
    debug!(pages = page, total = items.len(), "aggregated cursor-paginated resource");
    Ok(items)
}

/// Fetch every page of a count-paginated resource: page 1 first to learn the
/// page count, then all remaining pages concurrently. The result preserves
/// page-index order regardless of completion order.
pub async fn fetch_all_counted<T, F, Fut>(per_page: u32, fetch: F) -> Result<Vec<T>>
where
    F: Fn(PageRequest) -> Fut,
    Fut: Future<Output = Result<CountedPage<T>>>,
{
    let first = fetch(PageRequest { page: 1, per_page }).await?;
    let page_count = first.meta.page_count;
    let mut items = first.items;

    if page_count > 1 {
        let rest = try_join_all((2..=page_count).map(|page| fetch(PageRequest { page, per_page }))).await?;
        for page in rest {
            items.extend(page.items);
        }
    }
    debug!(pages = page_count.max(1), total = items.len(), "aggregated count-paginated resource");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn next_link(page: u32) -> Option<PageLinks> {
        Some(PageLinks {
            next: Some(PageLink {
                href: format!("/items?page={}", page + 1),
            }),
        })
    }

    #[tokio::test]
    async fn cursor_fetches_each_page_once_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let items = fetch_all_cursor(10, |request| {
            let calls = Arc::clone(&calls);
            async move {
                calls.lock().unwrap().push(request.page);
                let page = match request.page {
                    1 => CursorPage {
                        items: vec!["a".to_string(), "b".to_string()],
                        links: next_link(1),
                    },
                    2 => CursorPage {
                        items: vec!["c".to_string()],
                        links: next_link(2),
                    },
                    3 => CursorPage {
                        items: vec!["d".to_string()],
                        links: None,
                    },
                    other => panic!("unexpected page {other}"),
                };
                Ok(page)
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec!["a", "b", "c", "d"]);
        assert_eq!(*calls.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cursor_handles_single_page() {
        let items: Vec<String> = fetch_all_cursor(10, |_request| async move {
            Ok(CursorPage {
                items: vec!["only".to_string()],
                links: Some(PageLinks { next: None }),
            })
        })
        .await
        .unwrap();
        assert_eq!(items, vec!["only"]);
    }

    #[tokio::test(start_paused = true)]
    async fn counted_preserves_page_order_regardless_of_completion() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let items = fetch_all_counted(10, |request| {
            let calls = Arc::clone(&calls);
            async move {
                calls.lock().unwrap().push(request.page);
                if request.page > 1 {
                    // Page 2 finishes last, page 4 first
                    tokio::time::sleep(Duration::from_millis(50 * (5 - request.page) as u64)).await;
                }
                Ok(CountedPage {
                    items: vec![format!("p{}", request.page)],
                    meta: PageMeta {
                        current_page: request.page,
                        page_count: 4,
                    },
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec!["p1", "p2", "p3", "p4"]);

        let calls = calls.lock().unwrap();
        // Page 1 alone first, then the rest issued as one concurrent batch
        assert_eq!(calls[0], 1);
        assert_eq!(calls.len(), 4);
        let mut rest: Vec<u32> = calls[1..].to_vec();
        rest.sort_unstable();
        assert_eq!(rest, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn counted_stops_at_single_page() {
        let calls = Arc::new(Mutex::new(0u32));
        let items = fetch_all_counted(10, |request| {
            let calls = Arc::clone(&calls);
            async move {
                *calls.lock().unwrap() += 1;
                Ok(CountedPage {
                    items: vec![request.page],
                    meta: PageMeta {
                        current_page: 1,
                        page_count: 1,
                    },
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1]);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn counted_propagates_fetch_errors() {
        let result: Result<Vec<String>> = fetch_all_counted(10, |request| async move {
            if request.page == 3 {
                anyhow::bail!("page {} unavailable", request.page);
            }
            Ok(CountedPage {
                items: vec![format!("p{}", request.page)],
                meta: PageMeta {
                    current_page: request.page,
                    page_count: 4,
                },
            })
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cursor_propagates_fetch_errors() {
        let result: Result<Vec<String>> = fetch_all_cursor(10, |request| async move {
            if request.page == 2 {
                anyhow::bail!("boom");
            }
            Ok(CursorPage {
                items: vec!["a".to_string()],
                links: next_link(request.page),
            })
        })
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn wire_formats_parse() {
        let hal: CursorPage<serde_json::Value> = serde_json::from_str(
            r#"{ "items": [{"id": 1}], "_links": { "next": { "href": "/clients?page=2" } } }"#,
        )
        .unwrap();
        assert_eq!(hal.items.len(), 1);
        assert_eq!(hal.next_href(), Some("/clients?page=2"));

        let last: CursorPage<serde_json::Value> =
            serde_json::from_str(r#"{ "items": [], "_links": {} }"#).unwrap();
        assert_eq!(last.next_href(), None);

        let counted: CountedPage<serde_json::Value> = serde_json::from_str(
            r#"{ "items": [{"id": 1}], "_meta": { "current_page": 1, "page_count": 7 } }"#,
        )
        .unwrap();
        assert_eq!(counted.meta.page_count, 7);
    }
}
