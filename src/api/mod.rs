//! API clients for the AT Protocol / Bluesky network

pub mod bluesky;
pub mod context;
pub mod handle_cache;
pub mod identity;
pub mod pagination;
pub mod transport;
pub mod xrpc;

pub use bluesky::{AuthorFeedFilter, BlueskyApi, Mentions, ScanOptions, feed_post_time};
pub use context::ApiContext;
pub use handle_cache::HandleCache;
pub use pagination::{CancelToken, FetchAllOptions, PageControl};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use xrpc::{Auth, Params, RequestOptions, XrpcClient};
