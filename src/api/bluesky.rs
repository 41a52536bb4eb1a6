//! Bluesky (AT Protocol) API client

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::join_all;
use serde_json::{Value, json};

use super::handle_cache::HandleCache;
use super::pagination::{CancelToken, FetchAllOptions, PageControl};
use super::xrpc::{Auth, Params, RequestOptions, XrpcClient};
use crate::error::{Error, Result};
use crate::links;
use crate::models::{AtUri, Post};

/// Page size used by every timeline scan
pub const PAGE_LIMIT: u32 = 100;

/// Maximum actors per getProfiles call, and posts per getPosts batch
pub const BATCH_SIZE: usize = 25;

/// Default `depth` for getPostThread
pub const DEFAULT_THREAD_DEPTH: u32 = 10;

const LIKE_COLLECTION: &str = "app.bsky.feed.like";
const CURATE_LIST: &str = "app.bsky.graph.defs#curatelist";
const REPLY_BACKLINK_SOURCE: &str = "app.bsky.feed.post:reply.parent.uri";

/// Which posts an author feed includes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorFeedFilter {
    /// Posts, replies and reposts
    PostsWithReplies,
    /// Posts and reposts
    PostsNoReplies,
    /// Posts, reposts and replies in the author's own threads
    PostsAndAuthorThreads,
    /// Posts and replies with images
    PostsWithMedia,
    /// Posts and replies with videos
    PostsWithVideo,
}

impl AuthorFeedFilter {
    /// Value of the `filter` parameter
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PostsWithReplies => "posts_with_replies",
            Self::PostsNoReplies => "posts_no_replies",
            Self::PostsAndAuthorThreads => "posts_and_author_threads",
            Self::PostsWithMedia => "posts_with_media",
            Self::PostsWithVideo => "posts_with_video",
        }
    }
}

type PageCallback<'a> = Box<dyn FnMut(&[Value]) -> PageControl + Send + 'a>;

/// Progress, boundary and cancellation hooks for a timeline scan
#[derive(Default)]
pub struct ScanOptions<'a> {
    on_page_load: Option<PageCallback<'a>>,
    keep_last_page: bool,
    cancel: Option<CancelToken>,
}

impl<'a> ScanOptions<'a> {
    /// No hooks, trim the boundary page
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after each page
    pub fn on_page_load(mut self, callback: impl FnMut(&[Value]) -> PageControl + Send + 'a) -> Self {
        self.on_page_load = Some(Box::new(callback));
        self
    }

    /// Keep the items past the cutoff on the last page
    pub fn keep_last_page(mut self, keep: bool) -> Self {
        self.keep_last_page = keep;
        self
    }

    /// Stop at the next page boundary once cancelled
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn apply(self, mut options: FetchAllOptions<'a>) -> FetchAllOptions<'a> {
        if let Some(callback) = self.on_page_load {
            options = options.on_page_load(callback);
        }
        if let Some(token) = self.cancel {
            options = options.cancel_token(token);
        }
        options.keep_last_page(self.keep_last_page)
    }
}

/// One page of mentions
#[derive(Debug, Clone, Default)]
pub struct Mentions {
    /// Cursor for the next page
    pub cursor: Option<String>,
    /// Post views of the replies and mentions
    pub posts: Vec<Value>,
}

fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Time a feed item appeared: repost time for reposts, creation time otherwise
pub fn feed_post_time(item: &Value) -> Option<DateTime<Utc>> {
    match item.get("reason").filter(|r| !r.is_null()) {
        Some(reason) => parse_time(reason.get("indexedAt")),
        None => parse_time(item.pointer("/post/record/createdAt")),
    }
}

/// Start of a window of `days` days ending now
pub fn cutoff_for_days(days: f64) -> DateTime<Utc> {
    window_start(Utc::now(), days)
}

/// Start of a window of `days` days ending at `end`
///
/// Windows reaching past the representable range start at
/// [`DateTime::MIN_UTC`].
pub fn window_start(end: DateTime<Utc>, days: f64) -> DateTime<Utc> {
    let millis = days * 86_400_000.0;
    if millis.is_nan() {
        return end;
    }
    Duration::try_milliseconds(millis as i64)
        .and_then(|offset| end.checked_sub_signed(offset))
        .unwrap_or(if millis > 0.0 { DateTime::<Utc>::MIN_UTC } else { DateTime::<Utc>::MAX_UTC })
}

/// True if the item is older than the cutoff; an item exactly at the cutoff is inside
pub fn is_before(item: &Value, cutoff: DateTime<Utc>) -> bool {
    feed_post_time(item).is_some_and(|time| time < cutoff)
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Bluesky-specific calls on top of one XRPC host
pub struct BlueskyApi {
    client: Arc<XrpcClient>,
    handles: Arc<HandleCache>,
    profiles: Mutex<HashMap<String, Value>>,
    thread_depth: u32,
}

impl BlueskyApi {
    /// Wrap a client; the handle cache may be shared between hosts
    pub fn new(client: Arc<XrpcClient>, handles: Arc<HandleCache>) -> Self {
        Self {
            client,
            handles,
            profiles: Mutex::new(HashMap::new()),
            thread_depth: DEFAULT_THREAD_DEPTH,
        }
    }

    /// Override the getPostThread depth
    pub fn with_thread_depth(mut self, depth: u32) -> Self {
        self.thread_depth = depth;
        self
    }

    /// The underlying XRPC client
    pub fn client(&self) -> &XrpcClient {
        &self.client
    }

    /// Handle cache
    pub fn handles(&self) -> &HandleCache {
        &self.handles
    }

    /// Remember a profile by DID and by handle
    pub fn cache_profile(&self, profile: &Value) {
        let did = profile.get("did").and_then(Value::as_str);
        let handle = profile.get("handle").and_then(Value::as_str);

        if let Ok(mut profiles) = self.profiles.lock() {
            if let Some(did) = did {
                profiles.insert(did.to_string(), profile.clone());
            }
            if let Some(handle) = handle {
                profiles.insert(handle.to_string(), profile.clone());
            }
        }

        if let (Some(did), Some(handle)) = (did, handle) {
            if let Err(e) = self.handles.set_handle_did(handle, did) {
                tracing::warn!("Failed to save handle cache: {}", e);
            }
        }
    }

    /// Offer every author in a tree to the profile cache
    pub fn cache_authors(&self, post: &Post) {
        post.visit(&mut |p| {
            if !p.author.did.is_empty() {
                if let Some(author) = p.data().get("author") {
                    self.cache_profile(author);
                }
            }
        });
    }

    /// Profile cached by DID or handle
    pub fn cached_profile(&self, actor: &str) -> Option<Value> {
        self.profiles.lock().ok()?.get(actor).cloned()
    }

    /// Handle → DID, cache first
    pub async fn resolve_handle(&self, handle: &str) -> Result<String> {
        if let Some(did) = self.handles.get_handle_did(handle) {
            return Ok(did);
        }

        let json = self
            .client
            .get_request(
                "com.atproto.identity.resolveHandle",
                &Params::new().with("handle", handle),
                &RequestOptions::auth(Auth::None),
            )
            .await?;

        let did = json
            .get("did")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::data(format!("Missing DID in response: {json}")))?
            .to_string();

        self.handles.set_handle_did(handle, &did)?;
        Ok(did)
    }

    /// DID → handle, from the cache or the profile
    pub async fn fetch_handle_for_did(&self, did: &str) -> Result<String> {
        if let Some(handle) = self.handles.find_handle_by_did(did) {
            return Ok(handle);
        }

        let profile = self.load_user_profile(did).await?;
        profile
            .get("handle")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::data(format!("Profile of {did} has no handle")))
    }

    /// `getPostThread` for an at:// URI; returns the `thread` node
    pub async fn load_thread_by_at_uri(&self, uri: &str) -> Result<Value> {
        let mut json = self
            .client
            .get(
                "app.bsky.feed.getPostThread",
                &Params::new().with("uri", uri).with("depth", self.thread_depth),
            )
            .await?;

        json.get_mut("thread")
            .map(Value::take)
            .ok_or_else(|| Error::data("Missing thread in response"))
    }

    /// Thread for (handle-or-DID, rkey)
    pub async fn load_thread_by_id(&self, author: &str, rkey: &str) -> Result<Value> {
        let did = if author.starts_with("did:") {
            author.to_string()
        } else {
            self.resolve_handle(author).await?
        };

        let uri = AtUri::new(&did, "app.bsky.feed.post", rkey);
        self.load_thread_by_at_uri(&uri.to_string()).await
    }

    /// Thread for a web post URL
    pub async fn load_thread_by_url(&self, url: &str) -> Result<Value> {
        let parsed = links::parse_post_url(url)?;
        self.load_thread_by_id(&parsed.user, &parsed.rkey).await
    }

    /// `getProfile`, cached
    pub async fn load_user_profile(&self, actor: &str) -> Result<Value> {
        if let Some(profile) = self.cached_profile(actor) {
            return Ok(profile);
        }

        let profile = self
            .client
            .get("app.bsky.actor.getProfile", &Params::new().with("actor", actor))
            .await?;
        self.cache_profile(&profile);
        Ok(profile)
    }

    /// `getProfiles` in concurrent chunks of 25; order follows `actors`
    pub async fn get_profiles(&self, actors: &[String]) -> Result<Vec<Value>> {
        let requests = actors.chunks(BATCH_SIZE).map(|chunk| async move {
            let json = self
                .client
                .get(
                    "app.bsky.actor.getProfiles",
                    &Params::new().with_all("actors", chunk),
                )
                .await?;
            Ok::<_, Error>(json.get("profiles").and_then(Value::as_array).cloned().unwrap_or_default())
        });

        let mut profiles = Vec::new();
        for chunk in join_all(requests).await {
            for profile in chunk? {
                self.cache_profile(&profile);
                profiles.push(profile);
            }
        }

        Ok(profiles)
    }

    /// URIs of every reply the backlinks index knows about
    pub async fn get_replies(&self, uri: &str) -> Result<Vec<String>> {
        let records = self
            .client
            .fetch_all(
                "blue.microcosm.links.getBacklinks",
                FetchAllOptions::new("records").params(
                    Params::new()
                        .with("subject", uri)
                        .with("source", REPLY_BACKLINK_SOURCE)
                        .with("limit", PAGE_LIMIT),
                ),
            )
            .await?;

        Ok(records
            .iter()
            .filter_map(|record| {
                let did = record.get("did")?.as_str()?;
                let collection = record.get("collection")?.as_str()?;
                let rkey = record.get("rkey")?.as_str()?;
                Some(AtUri::new(did, collection, rkey).to_string())
            })
            .collect())
    }

    /// Number of quotes of a post
    pub async fn get_quote_count(&self, uri: &str) -> Result<u64> {
        let json = self
            .client
            .get("blue.feeds.post.getQuoteCount", &Params::new().with("uri", uri))
            .await?;
        json.get("quoteCount")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::data("Missing quoteCount in response"))
    }

    /// One page of quotes of a post
    pub async fn get_quotes(&self, uri: &str, cursor: Option<&str>) -> Result<Value> {
        self.client
            .get(
                "blue.feeds.post.getQuotes",
                &Params::new().with("uri", uri).with_opt("cursor", cursor),
            )
            .await
    }

    /// One page of the newest posts with a hashtag
    pub async fn get_hashtag_feed(&self, hashtag: &str, cursor: Option<&str>) -> Result<Value> {
        self.client
            .get(
                "app.bsky.feed.searchPosts",
                &Params::new()
                    .with("q", format!("#{}", hashtag.trim_start_matches('#')))
                    .with("limit", 50)
                    .with("sort", "latest")
                    .with_opt("cursor", cursor),
            )
            .await
    }

    /// Raw notifications page
    pub async fn load_notifications(&self, params: &Params) -> Result<Value> {
        self.client
            .get("app.bsky.notification.listNotifications", params)
            .await
    }

    /// Replies and mentions with their posts, fetched in concurrent batches
    pub async fn load_mentions(&self, cursor: Option<&str>) -> Result<Mentions> {
        let response = self
            .load_notifications(
                &Params::new()
                    .with_opt("cursor", cursor)
                    .with("limit", PAGE_LIMIT)
                    .with_all("reasons", ["reply", "mention"]),
            )
            .await?;

        let uris: Vec<String> = response
            .get("notifications")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|n| n.get("uri").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let batches = join_all(uris.chunks(BATCH_SIZE).map(|batch| self.load_posts(batch))).await;

        let mut posts = Vec::new();
        for batch in batches {
            posts.extend(batch?);
        }

        Ok(Mentions {
            cursor: response
                .get("cursor")
                .and_then(Value::as_str)
                .map(str::to_string),
            posts,
        })
    }

    async fn load_feed(
        &self,
        method: &str,
        params: Params,
        days: f64,
        scan: ScanOptions<'_>,
    ) -> Result<Vec<Value>> {
        let cutoff = cutoff_for_days(days);
        let options = FetchAllOptions::new("feed")
            .params(params.with("limit", PAGE_LIMIT))
            .break_when(move |item| is_before(item, cutoff));

        self.client.fetch_all(method, scan.apply(options)).await
    }

    /// Home timeline items from the last `days` days
    pub async fn load_home_timeline(&self, days: f64, scan: ScanOptions<'_>) -> Result<Vec<Value>> {
        self.load_feed("app.bsky.feed.getTimeline", Params::new(), days, scan)
            .await
    }

    /// Author feed items from the last `days` days
    pub async fn load_user_timeline(
        &self,
        did: &str,
        days: f64,
        filter: AuthorFeedFilter,
        scan: ScanOptions<'_>,
    ) -> Result<Vec<Value>> {
        let params = Params::new()
            .with("actor", did)
            .with("filter", filter.as_str());
        self.load_feed("app.bsky.feed.getAuthorFeed", params, days, scan)
            .await
    }

    /// List feed items from the last `days` days
    pub async fn load_list_timeline(
        &self,
        list: &str,
        days: f64,
        scan: ScanOptions<'_>,
    ) -> Result<Vec<Value>> {
        self.load_feed(
            "app.bsky.feed.getListFeed",
            Params::new().with("list", list),
            days,
            scan,
        )
        .await
    }

    /// The user's curation lists
    pub async fn load_user_lists(&self) -> Result<Vec<Value>> {
        let did = self.client.user_did()?;
        let lists = self
            .client
            .fetch_all(
                "app.bsky.graph.getLists",
                FetchAllOptions::new("lists")
                    .params(Params::new().with("actor", did).with("limit", PAGE_LIMIT)),
            )
            .await?;

        Ok(lists
            .into_iter()
            .filter(|list| list.get("purpose").and_then(Value::as_str) == Some(CURATE_LIST))
            .collect())
    }

    /// `getPosts`; empty input makes no request
    pub async fn load_posts(&self, uris: &[String]) -> Result<Vec<Value>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }

        let json = self
            .client
            .get("app.bsky.feed.getPosts", &Params::new().with_all("uris", uris))
            .await?;
        Ok(json.get("posts").and_then(Value::as_array).cloned().unwrap_or_default())
    }

    /// Exactly one post, or a data error
    pub async fn load_post(&self, uri: &str) -> Result<Value> {
        let mut posts = self.load_posts(&[uri.to_string()]).await?;
        if posts.len() == 1 {
            Ok(posts.remove(0))
        } else {
            Err(Error::data("Post not found"))
        }
    }

    /// The post, if the server still has it
    pub async fn load_post_if_exists(&self, uri: &str) -> Result<Option<Value>> {
        Ok(self.load_posts(&[uri.to_string()]).await?.into_iter().next())
    }

    /// Refresh author and viewer state of a post seen anonymously
    pub async fn load_post_viewer_info(&self, post: &mut Post) -> Result<Option<Value>> {
        let data = self.load_post_if_exists(&post.uri).await?;

        if let Some(data) = &data {
            post.apply_viewer_info(data);
        }

        Ok(data)
    }

    /// Like a post; returns the created record's `{uri, cid}`
    pub async fn like_post(&self, post: &Post) -> Result<Value> {
        let did = self.client.user_did()?;
        let body = json!({
            "repo": did,
            "collection": LIKE_COLLECTION,
            "record": {
                "$type": LIKE_COLLECTION,
                "subject": { "uri": post.uri, "cid": post.cid },
                "createdAt": now_iso()
            }
        });

        self.client
            .post_request(
                "com.atproto.repo.createRecord",
                Some(&body),
                &RequestOptions::auth(Auth::Required),
            )
            .await
    }

    /// Delete a like record
    pub async fn remove_like(&self, like_uri: &str) -> Result<()> {
        let did = self.client.user_did()?;
        let like = AtUri::parse(like_uri)?;
        let body = json!({ "repo": did, "collection": LIKE_COLLECTION, "rkey": like.rkey });

        self.client
            .post_request(
                "com.atproto.repo.deleteRecord",
                Some(&body),
                &RequestOptions::auth(Auth::Required),
            )
            .await?;
        Ok(())
    }

    /// Load the user's avatar into the session; `None` if they have none
    pub async fn load_current_user_avatar(&self) -> Result<Option<String>> {
        let did = self.client.user_did()?;

        let json = self
            .client
            .get(
                "com.atproto.repo.getRecord",
                &Params::new()
                    .with("repo", &did)
                    .with("collection", "app.bsky.actor.profile")
                    .with("rkey", "self"),
            )
            .await?;

        let url = json
            .pointer("/value/avatar/ref/$link")
            .and_then(Value::as_str)
            .map(|cid| links::avatar_url(&did, cid));

        if url.is_some() {
            self.client.set_avatar(url.clone())?;
        }

        Ok(url)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::transport::HttpResponse;
    use crate::api::transport::testing::FakeTransport;
    use crate::api::xrpc::tests::{jwt, logged_in};
    use crate::store::MemoryStore;

    pub(crate) fn api_with(fake: Arc<FakeTransport>) -> BlueskyApi {
        let handles = Arc::new(HandleCache::load(MemoryStore::shared()).unwrap());
        BlueskyApi::new(Arc::new(XrpcClient::new("api.bsky.app", fake)), handles)
    }

    #[test]
    fn test_feed_post_time_prefers_reason() {
        let repost = json!({
            "post": { "record": { "createdAt": "2024-01-01T00:00:00Z" } },
            "reason": { "indexedAt": "2024-05-01T00:00:00Z" }
        });
        assert_eq!(feed_post_time(&repost).unwrap().to_rfc3339(), "2024-05-01T00:00:00+00:00");

        let own = json!({ "post": { "record": { "createdAt": "2024-01-01T00:00:00Z" } } });
        assert_eq!(feed_post_time(&own).unwrap().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_cutoff_boundary_is_inclusive() {
        let cutoff = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let at = json!({ "post": { "record": { "createdAt": "2024-01-01T00:00:00Z" } } });
        let before = json!({ "post": { "record": { "createdAt": "2023-12-31T23:59:59Z" } } });
        assert!(!is_before(&at, cutoff));
        assert!(is_before(&before, cutoff));
    }

    #[test]
    fn test_window_start_clamps_huge_windows() {
        let end = Utc::now();
        assert_eq!(window_start(end, f64::INFINITY), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window_start(end, 1e9), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window_start(end, f64::NAN), end);
        assert_eq!(window_start(end, 1.0), end - Duration::days(1));
    }

    #[tokio::test]
    async fn test_huge_window_scans_whole_feed() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "getTimeline",
            200,
            json!({ "feed": [
                { "post": { "record": { "createdAt": "2001-01-01T00:00:00Z" } } }
            ]}),
        );
        let api = api_with(fake.clone());

        let items = api.load_home_timeline(1e9, ScanOptions::new()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(fake.count("getTimeline"), 1);
    }

    #[tokio::test]
    async fn test_resolve_handle_hits_network_once() {
        let fake = Arc::new(FakeTransport::new());
        fake.on("resolveHandle", 200, json!({ "did": "did:plc:alice" }));
        let api = api_with(fake.clone());

        let first = api.resolve_handle("alice.test").await.unwrap();
        let second = api.resolve_handle("alice.test").await.unwrap();

        assert_eq!(first, "did:plc:alice");
        assert_eq!(first, second);
        assert_eq!(fake.count("resolveHandle"), 1);
        assert!(fake.requests()[0].header("Authorization").is_none());
    }

    #[tokio::test]
    async fn test_resolve_handle_without_did() {
        let fake = Arc::new(FakeTransport::new());
        fake.on("resolveHandle", 200, json!({}));
        let err = api_with(fake).resolve_handle("x.test").await.unwrap_err();
        assert!(matches!(err, Error::Data(ref msg) if msg.starts_with("Missing DID")));
    }

    #[tokio::test]
    async fn test_profile_cache_feeds_handle_lookup() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "app.bsky.actor.getProfile?",
            200,
            json!({ "did": "did:plc:bob", "handle": "bob.test" }),
        );
        let api = api_with(fake.clone());

        assert_eq!(api.fetch_handle_for_did("did:plc:bob").await.unwrap(), "bob.test");
        assert_eq!(api.fetch_handle_for_did("did:plc:bob").await.unwrap(), "bob.test");
        assert_eq!(api.resolve_handle("bob.test").await.unwrap(), "did:plc:bob");
        assert_eq!(fake.count("getProfile"), 1);
        assert_eq!(fake.count("resolveHandle"), 0);
    }

    #[tokio::test]
    async fn test_get_profiles_chunks_of_25() {
        let fake = Arc::new(FakeTransport::new());
        fake.on_with("getProfiles", |req| {
            let url = url::Url::parse(&req.url).ok()?;
            let profiles: Vec<Value> = url
                .query_pairs()
                .filter(|(k, _)| k == "actors")
                .map(|(_, v)| json!({ "did": v, "handle": format!("{v}.test") }))
                .collect();
            Some(HttpResponse {
                status: 200,
                body: json!({ "profiles": profiles }).to_string(),
            })
        });
        let api = api_with(fake.clone());

        let actors: Vec<String> = (0..60).map(|i| format!("did:plc:u{i}")).collect();
        let profiles = api.get_profiles(&actors).await.unwrap();

        assert_eq!(profiles.len(), 60);
        assert_eq!(fake.count("getProfiles"), 3);
        assert_eq!(profiles[59]["did"], "did:plc:u59");
        assert!(api.cached_profile("did:plc:u30.test").is_some());
    }

    #[tokio::test]
    async fn test_load_posts_and_not_found() {
        let fake = Arc::new(FakeTransport::new());
        fake.on("getPosts", 200, json!({ "posts": [] }));
        let api = api_with(fake.clone());

        assert!(api.load_posts(&[]).await.unwrap().is_empty());
        assert_eq!(fake.count("getPosts"), 0);

        let err = api.load_post("at://did:plc:a/app.bsky.feed.post/1").await.unwrap_err();
        assert!(matches!(err, Error::Data(ref msg) if msg == "Post not found"));
        assert!(api
            .load_post_if_exists("at://did:plc:a/app.bsky.feed.post/1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_get_replies_builds_uris() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "getBacklinks",
            200,
            json!({ "records": [
                { "did": "did:plc:a", "collection": "app.bsky.feed.post", "rkey": "r1" },
                { "did": "did:plc:b", "collection": "app.bsky.feed.post", "rkey": "r2" }
            ]}),
        );
        let api = api_with(fake.clone());

        let replies = api.get_replies("at://did:plc:op/app.bsky.feed.post/1").await.unwrap();
        assert_eq!(
            replies,
            vec![
                "at://did:plc:a/app.bsky.feed.post/r1",
                "at://did:plc:b/app.bsky.feed.post/r2"
            ]
        );
        assert!(fake.requests()[0].url.contains("source=app.bsky.feed.post%3Areply.parent.uri"));
    }

    #[tokio::test]
    async fn test_like_and_unlike() {
        let fake = Arc::new(FakeTransport::new());
        fake.on("createRecord", 200, json!({ "uri": "at://did:plc:me/app.bsky.feed.like/l1", "cid": "c" }));
        fake.on("deleteRecord", 200, json!({}));

        let client = logged_in(fake.clone(), &jwt(Utc::now().timestamp() + 3600, "t"));
        let handles = Arc::new(HandleCache::load(MemoryStore::shared()).unwrap());
        let api = BlueskyApi::new(Arc::new(client), handles);

        let post = Post::new(
            crate::models::post_json("at://did:plc:a/app.bsky.feed.post/1", "did:plc:a", "x", "2024-01-01T00:00:00Z"),
            Default::default(),
        )
        .unwrap();

        api.like_post(&post).await.unwrap();
        api.remove_like("at://did:plc:me/app.bsky.feed.like/l1").await.unwrap();

        let requests = fake.requests();
        let like: Value = serde_json::from_slice(requests[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(like["record"]["subject"]["uri"], "at://did:plc:a/app.bsky.feed.post/1");
        assert_eq!(like["repo"], "did:plc:me");
        assert!(requests[0].url.starts_with("https://pds.example.com/"));

        let unlike: Value = serde_json::from_slice(requests[1].body.as_deref().unwrap()).unwrap();
        assert_eq!(unlike["rkey"], "l1");
    }

    #[tokio::test]
    async fn test_user_lists_keep_curate_lists() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "getLists",
            200,
            json!({ "lists": [
                { "uri": "at://did:plc:me/app.bsky.graph.list/friends", "purpose": "app.bsky.graph.defs#curatelist" },
                { "uri": "at://did:plc:me/app.bsky.graph.list/spam", "purpose": "app.bsky.graph.defs#modlist" }
            ], "cursor": "c1" }),
        );
        fake.on(
            "getLists",
            200,
            json!({ "lists": [
                { "uri": "at://did:plc:me/app.bsky.graph.list/rust", "purpose": "app.bsky.graph.defs#curatelist" }
            ]}),
        );

        let client = logged_in(fake.clone(), &jwt(Utc::now().timestamp() + 3600, "t"));
        let handles = Arc::new(HandleCache::load(MemoryStore::shared()).unwrap());
        let api = BlueskyApi::new(Arc::new(client), handles);

        let lists = api.load_user_lists().await.unwrap();
        let uris: Vec<&str> = lists.iter().filter_map(|l| l["uri"].as_str()).collect();
        assert_eq!(
            uris,
            ["at://did:plc:me/app.bsky.graph.list/friends", "at://did:plc:me/app.bsky.graph.list/rust"]
        );

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.contains("actor=did%3Aplc%3Ame"));
        assert!(requests[1].url.contains("cursor=c1"));
    }

    #[tokio::test]
    async fn test_load_mentions_batches() {
        let fake = Arc::new(FakeTransport::new());
        let notifications: Vec<Value> = (0..30)
            .map(|i| json!({ "uri": format!("at://did:plc:a/app.bsky.feed.post/{i}") }))
            .collect();
        fake.on("listNotifications", 200, json!({ "notifications": notifications, "cursor": "next" }));
        fake.on_with("getPosts", |req| {
            let url = url::Url::parse(&req.url).ok()?;
            let posts: Vec<Value> = url
                .query_pairs()
                .filter(|(k, _)| k == "uris")
                .map(|(_, v)| json!({ "uri": v }))
                .collect();
            Some(HttpResponse {
                status: 200,
                body: json!({ "posts": posts }).to_string(),
            })
        });

        let mentions = api_with(fake.clone()).load_mentions(None).await.unwrap();
        assert_eq!(mentions.posts.len(), 30);
        assert_eq!(mentions.cursor.as_deref(), Some("next"));
        assert_eq!(fake.count("getPosts"), 2);
        assert_eq!(fake.requests()[0].url.matches("reasons=").count(), 2);
    }

    #[tokio::test]
    async fn test_avatar_saved_in_session() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "getRecord",
            200,
            json!({ "value": { "avatar": { "ref": { "$link": "bafkavatar" } } } }),
        );
        let client = Arc::new(logged_in(fake.clone(), &jwt(Utc::now().timestamp() + 3600, "t")));
        let handles = Arc::new(HandleCache::load(MemoryStore::shared()).unwrap());
        let api = BlueskyApi::new(client.clone(), handles);

        let url = api.load_current_user_avatar().await.unwrap();
        assert_eq!(
            url.as_deref(),
            Some("https://cdn.bsky.app/img/avatar/plain/did:plc:me/bafkavatar@jpeg")
        );
        assert_eq!(client.session().unwrap().avatar, url);
    }
}
