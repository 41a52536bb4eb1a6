//! Loading a thread and expanding it in place

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::api::ApiContext;
use crate::error::{Error, Result};
use crate::models::{AnyPost, Post};
use crate::thread;

/// Builds post trees and grows them as the reader asks for more
pub struct ThreadLoader {
    context: Arc<ApiContext>,
}

impl ThreadLoader {
    /// Loader using the context's current client selection
    pub fn new(context: Arc<ApiContext>) -> Self {
        Self { context }
    }

    fn build(&self, json: serde_json::Value) -> Result<AnyPost> {
        let root = thread::parse_thread(json)?;
        if let Some(post) = root.as_post() {
            self.context.api().cache_authors(post);
        }
        Ok(root)
    }

    /// Thread of a `https://bsky.app/profile/{user}/post/{rkey}` URL
    pub async fn load_thread_from_url(&self, url: &str) -> Result<AnyPost> {
        let json = self.context.api().load_thread_by_url(url).await?;
        self.build(json)
    }

    /// Thread of an at:// URI
    pub async fn load_thread_by_at_uri(&self, uri: &str) -> Result<AnyPost> {
        let json = self.context.api().load_thread_by_at_uri(uri).await?;
        self.build(json)
    }

    /// Thread of (handle or DID, rkey)
    pub async fn load_thread_by_id(&self, author: &str, rkey: &str) -> Result<AnyPost> {
        let json = self.context.api().load_thread_by_id(author, rkey).await?;
        self.build(json)
    }

    /// Quote count from the quotes service; stored on the post
    pub async fn load_quote_count(&self, post: &mut Post) -> Result<u64> {
        let count = self.context.blue().get_quote_count(&post.uri).await?;
        post.quote_count = Some(count);
        Ok(count)
    }

    /// Fetch the subthread of a collapsed deep post and merge its replies
    ///
    /// Returns how many replies were added.
    pub async fn load_more_replies(&self, post: &mut Post) -> Result<usize> {
        let api = self.context.api();
        let mut json = api.load_thread_by_at_uri(&post.uri).await?;

        // the parents are already on the page
        if let Some(node) = json.as_object_mut() {
            node.remove("parent");
        }

        let page_root = post.page_root.clone().unwrap_or_else(|| post.uri.clone());
        let reloaded = thread::parse_thread_post(
            json,
            Some(&page_root),
            post.level.unwrap_or(0),
            post.absolute_level.unwrap_or(0),
        )?;

        let Some(reloaded) = reloaded.as_post() else {
            return Err(Error::data(format!("{} is no longer available", post.uri)));
        };
        api.cache_authors(reloaded);

        Ok(post.append_replies(reloaded.replies.clone()))
    }

    /// Look up replies the thread response left out and merge them
    ///
    /// Every missing reply gets one entry in the result: the loaded subtree,
    /// or `None` if it couldn't be fetched. Loaded ones are also merged into
    /// `post.replies`. A backlinks index that doesn't know the post yields
    /// [`Error::HiddenRepliesUnavailable`].
    pub async fn load_hidden_replies(&self, post: &mut Post) -> Result<Vec<Option<AnyPost>>> {
        let expected = self
            .context
            .constellation()
            .get_replies(&post.uri)
            .await
            .map_err(|e| match e.status() {
                Some(404) => Error::HiddenRepliesUnavailable,
                _ => e,
            })?;

        let mut missing: Vec<String> = expected
            .into_iter()
            .filter(|uri| !post.replies.iter().any(|reply| reply.uri() == uri))
            .collect();
        missing.sort_by(|a, b| rkey(a).cmp(rkey(b)).then_with(|| a.cmp(b)));
        missing.dedup();

        tracing::debug!("{}: {} hidden replies to load", post.uri, missing.len());

        let api = self.context.api();
        let responses = join_all(missing.iter().map(|uri| api.load_thread_by_at_uri(uri))).await;

        let parent: &Post = post;
        let settled: Vec<Option<AnyPost>> = responses
            .into_iter()
            .zip(&missing)
            .map(|(response, uri)| {
                match response.and_then(|json| thread::parse_reply_fragment(json, parent)) {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        tracing::warn!("Couldn't load hidden reply {}: {}", uri, e);
                        None
                    }
                }
            })
            .collect();

        for reply in settled.iter().flatten() {
            if let Some(loaded) = reply.as_post() {
                api.cache_authors(loaded);
            }
        }

        post.append_replies(settled.iter().flatten().cloned().collect());
        Ok(settled)
    }

    /// Like or unlike the post `uri` under `root`; returns whether it is now liked
    ///
    /// A post loaded without viewer state (anonymously, or in incognito mode)
    /// first gets it from the account, so an existing like isn't doubled.
    pub async fn toggle_like(&self, root: &mut Post, uri: &str) -> Result<bool> {
        let account = self.context.account();
        let post = root
            .find_mut(uri)
            .ok_or_else(|| Error::data(format!("{uri} is not in this thread")))?;

        if !post.has_viewer_info() {
            account.load_post_viewer_info(post).await?;
        }

        match post.viewer_like().map(str::to_string) {
            Some(like) => {
                account.remove_like(&like).await?;
                post.set_viewer_like(None);
                post.like_count = post.like_count.map(|count| count.saturating_sub(1));
                Ok(false)
            }
            None => {
                let created = account.like_post(post).await?;
                post.set_viewer_like(created.get("uri").and_then(Value::as_str).map(str::to_string));
                post.like_count = Some(post.like_count.unwrap_or(0) + 1);
                Ok(true)
            }
        }
    }

    /// Replace a blocked stub somewhere under `root` with the full post
    pub async fn reload_blocked_post(&self, root: &mut Post, uri: &str) -> Result<bool> {
        let loaded = self.context.reload_blocked_post(uri).await?;

        let Some(parent) = find_parent_of(root, uri) else {
            return Ok(false);
        };

        match parent.replies.iter_mut().find(|reply| reply.uri() == uri) {
            Some(slot) => {
                let mut loaded = loaded;
                loaded.level = parent.level.map(|l| l + 1);
                loaded.absolute_level = parent.absolute_level.map(|l| l + 1);
                loaded.page_root = parent.page_root.clone();
                *slot = loaded.into();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn rkey(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

fn find_parent_of<'a>(post: &'a mut Post, uri: &str) -> Option<&'a mut Post> {
    if post.replies.iter().any(|reply| reply.uri() == uri) {
        return Some(post);
    }

    post.replies
        .iter_mut()
        .filter_map(AnyPost::as_post_mut)
        .find_map(|reply| find_parent_of(reply, uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::HttpResponse;
    use crate::api::transport::testing::FakeTransport;
    use crate::config::Config;
    use crate::models::post_json;
    use crate::api::xrpc::tests::jwt;
    use crate::session::{Session, SessionStore};
    use crate::store::MemoryStore;
    use serde_json::json;

    const ROOT: &str = "at://did:plc:op/app.bsky.feed.post/root";

    fn thread_view(uri: &str, did: &str, created_at: &str, reply_count: u64, replies: Vec<Value>) -> Value {
        let mut post = post_json(uri, did, "text", created_at);
        post["replyCount"] = json!(reply_count);
        json!({ "$type": "app.bsky.feed.defs#threadViewPost", "post": post, "replies": replies })
    }

    fn loader(fake: Arc<FakeTransport>) -> ThreadLoader {
        let context = ApiContext::new(&Config::default(), MemoryStore::shared(), fake).unwrap();
        ThreadLoader::new(Arc::new(context))
    }

    fn respond(body: Value) -> Option<HttpResponse> {
        Some(HttpResponse { status: 200, body: body.to_string() })
    }

    fn root_thread() -> Value {
        json!({ "thread": thread_view(
            ROOT,
            "did:plc:op",
            "2024-01-01T00:00:00Z",
            3,
            vec![thread_view("at://did:plc:a/app.bsky.feed.post/a1", "did:plc:a", "2024-01-01T01:00:00Z", 0, vec![])],
        )})
    }

    #[tokio::test]
    async fn test_load_from_url_caches_authors() {
        let fake = Arc::new(FakeTransport::new());
        fake.on("resolveHandle", 200, json!({ "did": "did:plc:op" }));
        fake.on("getPostThread", 200, root_thread());
        let loader = loader(fake.clone());

        let root = loader
            .load_thread_from_url("https://bsky.app/profile/op.test/post/root")
            .await
            .unwrap();

        let post = root.as_post().unwrap();
        assert_eq!(post.uri, ROOT);
        assert_eq!(post.replies.len(), 1);
        assert!(post.has_hidden_replies());
        assert!(fake.requests()[1].url.contains("depth=10"));
        assert!(loader.context.api().cached_profile("did:plc:a").is_some());
    }

    #[tokio::test]
    async fn test_hidden_replies_settle_individually() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "getBacklinks",
            200,
            json!({ "records": [
                { "did": "did:plc:c", "collection": "app.bsky.feed.post", "rkey": "c3" },
                { "did": "did:plc:a", "collection": "app.bsky.feed.post", "rkey": "a1" },
                { "did": "did:plc:b", "collection": "app.bsky.feed.post", "rkey": "b2" }
            ]}),
        );
        fake.on_with("getPostThread", |req| {
            if req.url.contains("post%2Fb2") {
                respond(json!({ "thread": thread_view(
                    "at://did:plc:b/app.bsky.feed.post/b2", "did:plc:b", "2024-01-01T02:00:00Z", 0, vec![]
                )}))
            } else if req.url.contains("post%2Fc3") {
                Some(HttpResponse { status: 500, body: String::new() })
            } else {
                respond(root_thread())
            }
        });
        let loader = loader(fake.clone());

        let mut root = loader.load_thread_by_at_uri(ROOT).await.unwrap();
        let post = root.as_post_mut().unwrap();

        let settled = loader.load_hidden_replies(post).await.unwrap();

        // sorted by rkey: b2, c3
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[0].as_ref().unwrap().uri(), "at://did:plc:b/app.bsky.feed.post/b2");
        assert!(settled[1].is_none());

        assert_eq!(post.replies.len(), 2);
        let merged = post.replies[1].as_post().unwrap();
        assert_eq!(merged.level, Some(1));
        assert_eq!(merged.page_root.as_deref(), Some(ROOT));
    }

    #[tokio::test]
    async fn test_hidden_replies_shared_rkey_fetched_once() {
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "getBacklinks",
            200,
            json!({ "records": [
                { "did": "did:plc:a", "collection": "app.bsky.feed.post", "rkey": "k" },
                { "did": "did:plc:b", "collection": "app.bsky.feed.post", "rkey": "k" },
                { "did": "did:plc:a", "collection": "app.bsky.feed.post", "rkey": "k" }
            ]}),
        );
        fake.on_with("getPostThread", |req| {
            if req.url.contains("did%3Aplc%3Aa") {
                respond(json!({ "thread": thread_view(
                    "at://did:plc:a/app.bsky.feed.post/k", "did:plc:a", "2024-01-01T02:00:00Z", 0, vec![]
                )}))
            } else if req.url.contains("did%3Aplc%3Ab") {
                respond(json!({ "thread": thread_view(
                    "at://did:plc:b/app.bsky.feed.post/k", "did:plc:b", "2024-01-01T03:00:00Z", 0, vec![]
                )}))
            } else {
                respond(root_thread())
            }
        });
        let loader = loader(fake.clone());

        let mut root = loader.load_thread_by_at_uri(ROOT).await.unwrap();
        let post = root.as_post_mut().unwrap();

        let settled = loader.load_hidden_replies(post).await.unwrap();
        assert_eq!(settled.len(), 2);
        assert_eq!(fake.count("getPostThread"), 3);
    }

    #[tokio::test]
    async fn test_hidden_replies_unavailable_vs_failure() {
        let fake = Arc::new(FakeTransport::new());
        fake.on("getPostThread", 200, root_thread());
        fake.on("getBacklinks", 404, json!({ "error": "NotFound" }));
        fake.on("getBacklinks", 502, json!({ "error": "BadGateway" }));
        let loader = loader(fake);

        let mut root = loader.load_thread_by_at_uri(ROOT).await.unwrap();
        let post = root.as_post_mut().unwrap();

        assert!(matches!(
            loader.load_hidden_replies(post).await,
            Err(Error::HiddenRepliesUnavailable)
        ));
        assert_eq!(loader.load_hidden_replies(post).await.unwrap_err().status(), Some(502));
    }

    #[tokio::test]
    async fn test_load_more_replies_merges() {
        let fake = Arc::new(FakeTransport::new());
        let deep = "at://did:plc:a/app.bsky.feed.post/deep";
        fake.on(
            "getPostThread",
            200,
            json!({ "thread": thread_view(deep, "did:plc:a", "2024-01-01T00:00:00Z", 2, vec![
                thread_view("at://did:plc:x/app.bsky.feed.post/2", "did:plc:x", "2024-01-02T00:00:00Z", 0, vec![]),
                thread_view("at://did:plc:a/app.bsky.feed.post/3", "did:plc:a", "2024-01-03T00:00:00Z", 0, vec![]),
            ])}),
        );
        fake.on("getQuoteCount", 200, json!({ "quoteCount": 4 }));
        let loader = loader(fake);

        let mut view = post_json(deep, "did:plc:a", "deep", "2024-01-01T00:00:00Z");
        view["replyCount"] = json!(2);
        let mut post = Post::new(view, crate::models::PostPosition::in_thread(5, 5)).unwrap();
        assert!(post.has_more_replies());

        assert_eq!(loader.load_more_replies(&mut post).await.unwrap(), 2);
        assert!(!post.has_more_replies());
        // the author's own reply comes first
        assert_eq!(post.replies[0].uri(), "at://did:plc:a/app.bsky.feed.post/3");
        assert_eq!(post.replies[0].as_post().unwrap().level, Some(6));

        assert_eq!(loader.load_quote_count(&mut post).await.unwrap(), 4);
        assert_eq!(post.quote_count, Some(4));
    }

    #[tokio::test]
    async fn test_reload_blocked_reply() {
        let fake = Arc::new(FakeTransport::new());
        let blocked = "at://did:plc:z/app.bsky.feed.post/z1";
        fake.on(
            "getPostThread",
            200,
            json!({ "thread": {
                "$type": "app.bsky.feed.defs#threadViewPost",
                "post": post_json(ROOT, "did:plc:op", "root", "2024-01-01T00:00:00Z"),
                "replies": [{
                    "$type": "app.bsky.feed.defs#blockedPost",
                    "uri": blocked,
                    "blocked": true,
                    "author": { "did": "did:plc:z", "viewer": { "blocking": "at://did:plc:op/app.bsky.graph.block/1" } }
                }]
            }}),
        );
        fake.on("getPosts", 200, json!({ "posts": [post_json(blocked, "did:plc:z", "hidden text", "2024-01-01T03:00:00Z")] }));
        fake.on("getProfile?", 200, json!({ "did": "did:plc:z", "handle": "zed.test" }));
        let loader = loader(fake);

        let mut root = loader.load_thread_by_at_uri(ROOT).await.unwrap();
        let post = root.as_post_mut().unwrap();
        assert!(matches!(post.replies[0], AnyPost::Blocked(_)));

        assert!(loader.reload_blocked_post(post, blocked).await.unwrap());
        let reloaded = post.replies[0].as_post().unwrap();
        assert_eq!(reloaded.text(), "hidden text");
        assert_eq!(reloaded.author.handle, "zed.test");
        assert_eq!(reloaded.level, Some(1));
    }

    #[tokio::test]
    async fn test_toggle_like_fetches_viewer_state_first() {
        let reply = "at://did:plc:a/app.bsky.feed.post/a1";
        let fake = Arc::new(FakeTransport::new());
        fake.on("getPostThread", 200, root_thread());
        let mut view = post_json(reply, "did:plc:a", "text", "2024-01-01T01:00:00Z");
        view["likeCount"] = json!(3);
        view["viewer"] = json!({ "like": "at://did:plc:me/app.bsky.feed.like/old" });
        fake.on("getPosts", 200, json!({ "posts": [view] }));
        fake.on("deleteRecord", 200, json!({}));
        fake.on("createRecord", 200, json!({ "uri": "at://did:plc:me/app.bsky.feed.like/new", "cid": "c" }));

        let store = MemoryStore::shared();
        SessionStore::new(store.clone())
            .save(&Session {
                access_token: jwt(chrono::Utc::now().timestamp() + 3600, "a"),
                refresh_token: "r".into(),
                did: "did:plc:me".into(),
                pds_endpoint: "pds.example.com".into(),
                avatar: None,
            })
            .unwrap();
        let context = ApiContext::new(&Config::default(), store, fake.clone()).unwrap();
        let loader = ThreadLoader::new(Arc::new(context));

        let mut root = loader.load_thread_by_at_uri(ROOT).await.unwrap();
        let post = root.as_post_mut().unwrap();
        assert!(!post.replies[0].as_post().unwrap().has_viewer_info());

        // already liked on the server: the first toggle unlikes
        assert!(!loader.toggle_like(post, reply).await.unwrap());
        let unliked = post.replies[0].as_post().unwrap();
        assert!(unliked.has_viewer_info());
        assert!(!unliked.liked());
        assert_eq!(unliked.like_count, Some(2));

        assert!(loader.toggle_like(post, reply).await.unwrap());
        assert_eq!(post.replies[0].as_post().unwrap().viewer_like(), Some("at://did:plc:me/app.bsky.feed.like/new"));

        assert_eq!(fake.count("getPosts"), 1);
        assert_eq!(fake.count("deleteRecord"), 1);
        assert_eq!(fake.count("createRecord"), 1);

        assert!(matches!(loader.toggle_like(post, "at://did:plc:x/app.bsky.feed.post/nope").await, Err(Error::Data(_))));
    }
}
