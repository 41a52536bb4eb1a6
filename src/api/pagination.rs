//! Cursor pagination with early-break predicates and cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use super::xrpc::{Params, RequestOptions, XrpcClient};
use crate::error::{Error, Result};

/// Shared cancellation flag, checked between pages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, not-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the page callback wants to happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    /// Keep fetching
    Continue,
    /// Stop now and return what was collected so far
    Cancel,
}

type BreakPredicate<'a> = Box<dyn Fn(&Value) -> bool + Send + Sync + 'a>;
type PageCallback<'a> = Box<dyn FnMut(&[Value]) -> PageControl + Send + 'a>;

/// Options for [`XrpcClient::fetch_all`]
pub struct FetchAllOptions<'a> {
    field: String,
    params: Params,
    request: RequestOptions,
    break_when: Option<BreakPredicate<'a>>,
    keep_last_page: bool,
    on_page_load: Option<PageCallback<'a>>,
    cancel: Option<CancelToken>,
}

impl<'a> FetchAllOptions<'a> {
    /// Collect the array found under `field` in each response
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            params: Params::new(),
            request: RequestOptions::default(),
            break_when: None,
            keep_last_page: false,
            on_page_load: None,
            cancel: None,
        }
    }

    /// Query parameters for the first page
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Auth mode and headers
    pub fn request(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    /// Stop after the page containing an item matching `predicate`
    pub fn break_when(mut self, predicate: impl Fn(&Value) -> bool + Send + Sync + 'a) -> Self {
        self.break_when = Some(Box::new(predicate));
        self
    }

    /// Keep the whole boundary page instead of trimming at the break item
    pub fn keep_last_page(mut self, keep: bool) -> Self {
        self.keep_last_page = keep;
        self
    }

    /// Called with each page's items after it is accumulated
    pub fn on_page_load(
        mut self,
        callback: impl FnMut(&[Value]) -> PageControl + Send + 'a,
    ) -> Self {
        self.on_page_load = Some(Box::new(callback));
        self
    }

    /// Stop at the next page boundary once this token is cancelled
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl XrpcClient {
    /// Fetch every page of a cursor-paginated method
    ///
    /// Pages are appended in server order. A cancelled scan (page callback
    /// or token) returns the items collected so far, including the page
    /// that was just loaded.
    pub async fn fetch_all(&self, method: &str, options: FetchAllOptions<'_>) -> Result<Vec<Value>> {
        let FetchAllOptions {
            field,
            mut params,
            request,
            break_when,
            keep_last_page,
            mut on_page_load,
            cancel,
        } = options;

        if field.is_empty() {
            return Err(Error::Request("fetch_all: field is required".to_string()));
        }

        let mut data: Vec<Value> = Vec::new();

        loop {
            let mut response = self.get_request(method, &params, &request).await?;

            let mut items = match response.get_mut(&field).map(Value::take) {
                Some(Value::Array(items)) => items,
                None | Some(Value::Null) => Vec::new(),
                Some(_) => {
                    return Err(Error::data(format!("{method}: '{field}' is not an array")));
                }
            };

            let mut cursor = response
                .get("cursor")
                .and_then(Value::as_str)
                .map(str::to_string);

            if let Some(predicate) = &break_when {
                if let Some(index) = items.iter().position(|item| predicate(item)) {
                    if !keep_last_page {
                        items.truncate(index);
                    }
                    cursor = None;
                }
            }

            tracing::debug!(
                "{}: page of {} {} (more: {})",
                method,
                items.len(),
                field,
                cursor.is_some()
            );

            let page_start = data.len();
            data.extend(items);

            if let Some(callback) = on_page_load.as_mut() {
                if callback(&data[page_start..]) == PageControl::Cancel {
                    tracing::debug!("{}: cancelled by page callback", method);
                    break;
                }
            }

            if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                tracing::debug!("{}: cancelled", method);
                break;
            }

            match cursor {
                Some(cursor) => params.set("cursor", cursor),
                None => break,
            }
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::testing::FakeTransport;
    use serde_json::json;

    fn items(ts: &[i64]) -> Value {
        Value::Array(ts.iter().map(|t| json!({ "t": t })).collect())
    }

    fn times(values: &[Value]) -> Vec<i64> {
        values.iter().map(|v| v["t"].as_i64().unwrap()).collect()
    }

    fn two_pages() -> Arc<FakeTransport> {
        let fake = Arc::new(FakeTransport::new());
        fake.on_with("getTimeline", |req| {
            let body = if req.url.contains("cursor=p2") {
                json!({ "feed": items(&[7, 6, 5]), "cursor": "p3" })
            } else {
                json!({ "feed": items(&[10, 9, 8]), "cursor": "p2" })
            };
            Some(crate::api::transport::HttpResponse {
                status: 200,
                body: body.to_string(),
            })
        });
        fake
    }

    #[tokio::test]
    async fn test_break_trims_boundary_page() {
        let fake = two_pages();
        let client = XrpcClient::new("api.bsky.app", fake.clone());

        let result = client
            .fetch_all(
                "app.bsky.feed.getTimeline",
                FetchAllOptions::new("feed").break_when(|item| item["t"].as_i64() <= Some(6)),
            )
            .await
            .unwrap();

        assert_eq!(times(&result), vec![10, 9, 8, 7]);
        assert_eq!(fake.count("getTimeline"), 2);
    }

    #[tokio::test]
    async fn test_keep_last_page() {
        let client = XrpcClient::new("api.bsky.app", two_pages());

        let result = client
            .fetch_all(
                "app.bsky.feed.getTimeline",
                FetchAllOptions::new("feed")
                    .break_when(|item| item["t"].as_i64() <= Some(6))
                    .keep_last_page(true),
            )
            .await
            .unwrap();

        assert_eq!(times(&result), vec![10, 9, 8, 7, 6, 5]);
    }

    #[tokio::test]
    async fn test_page_callback_cancel_returns_first_page() {
        let fake = two_pages();
        let client = XrpcClient::new("api.bsky.app", fake.clone());
        let mut seen = Vec::new();

        let result = client
            .fetch_all(
                "app.bsky.feed.getTimeline",
                FetchAllOptions::new("feed").on_page_load(|page| {
                    seen.push(page.len());
                    PageControl::Cancel
                }),
            )
            .await
            .unwrap();

        assert_eq!(times(&result), vec![10, 9, 8]);
        assert_eq!(seen, vec![3]);
        assert_eq!(fake.count("getTimeline"), 1);
    }

    #[tokio::test]
    async fn test_cancel_token_stops_at_page_boundary() {
        let fake = two_pages();
        let client = XrpcClient::new("api.bsky.app", fake.clone());
        let token = CancelToken::new();
        let trigger = token.clone();

        let result = client
            .fetch_all(
                "app.bsky.feed.getTimeline",
                FetchAllOptions::new("feed")
                    .cancel_token(token)
                    .on_page_load(move |_| {
                        trigger.cancel();
                        PageControl::Continue
                    }),
            )
            .await
            .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(fake.count("getTimeline"), 1);
    }

    #[tokio::test]
    async fn test_stops_without_cursor() {
        let fake = Arc::new(FakeTransport::new());
        fake.on("getLists", 200, json!({ "lists": [{ "t": 1 }] }));
        let client = XrpcClient::new("api.bsky.app", fake.clone());

        let result = client
            .fetch_all("app.bsky.graph.getLists", FetchAllOptions::new("lists"))
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(fake.count("getLists"), 1);
    }

    #[tokio::test]
    async fn test_empty_field_is_rejected() {
        let client = XrpcClient::new("api.bsky.app", Arc::new(FakeTransport::new()));
        let err = client
            .fetch_all("app.bsky.graph.getLists", FetchAllOptions::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }
}
