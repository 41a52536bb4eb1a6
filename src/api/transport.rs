//! HTTP transport used by the XRPC client
//!
//! Everything above this module speaks in [`HttpRequest`] / [`HttpResponse`]
//! values, so tests can swap reqwest for a scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{Error, Result};

/// HTTP verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET with a query string
    Get,
    /// POST with an optional JSON body
    Post,
}

/// A fully-built request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Verb
    pub method: Method,
    /// Absolute URL including the query string
    pub url: String,
    /// Extra headers (auth, content type, caller-supplied)
    pub headers: Vec<(String, String)>,
    /// Serialized JSON body
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Look up a header value (case-insensitive name)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response: status and body text
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Body as text (may be empty)
    pub body: String,
}

/// Sends requests over the wire
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one request; transport failures map to [`Error::Network`]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("skythread/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(Box::new(e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(Box::new(e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(Box::new(e)))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for unit tests

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;

    type Handler = Box<dyn Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync>;

    /// Answers requests from a list of (url fragment, handler) routes and
    /// records every request it sees
    #[derive(Default)]
    pub struct FakeTransport {
        routes: Mutex<Vec<(String, VecDeque<Handler>)>>,
        log: Mutex<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a JSON response for the next request whose URL contains `fragment`.
        /// The last queued response for a route is reused once the queue drains.
        pub fn on(&self, fragment: &str, status: u16, body: Value) -> &Self {
            let body = body.to_string();
            self.on_with(fragment, move |_| {
                Some(HttpResponse {
                    status,
                    body: body.clone(),
                })
            })
        }

        /// Queue a custom handler; returning `None` falls through to the next route
        pub fn on_with(
            &self,
            fragment: &str,
            handler: impl Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync + 'static,
        ) -> &Self {
            let mut routes = self.routes.lock().unwrap();
            if let Some((_, queue)) = routes.iter_mut().find(|(f, _)| f == fragment) {
                queue.push_back(Box::new(handler));
            } else {
                let mut queue: VecDeque<Handler> = VecDeque::new();
                queue.push_back(Box::new(handler));
                routes.push((fragment.to_string(), queue));
            }
            self
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.log.lock().unwrap().clone()
        }

        pub fn count(&self, fragment: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.contains(fragment))
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.log.lock().unwrap().push(request.clone());
            // Let concurrent callers interleave like real I/O would
            tokio::task::yield_now().await;

            let mut routes = self.routes.lock().unwrap();
            for (fragment, queue) in routes.iter_mut() {
                if !request.url.contains(fragment.as_str()) {
                    continue;
                }
                let response = if queue.len() > 1 {
                    queue.pop_front().and_then(|h| h(&request))
                } else {
                    queue.front().and_then(|h| h(&request))
                };
                if let Some(response) = response {
                    return Ok(response);
                }
            }

            Err(Error::Network(
                format!("no route for {}", request.url).into(),
            ))
        }
    }
}
