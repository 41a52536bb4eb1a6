//! Building post trees from thread, feed and quote views
//!
//! Three shapes come back from the server:
//! - thread views (`getPostThread`): nested parents and replies, strict
//! - feed items (timelines, search): one post plus flat reply refs, strict
//! - quoted record views inside embeds: lenient, unknown types degrade to a
//!   generic record

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{
    AnyPost, AnyRecord, Author, BlockedPost, DetachedQuotePost, FeedGeneratorRecord, MissingPost,
    Post, PostPosition, Record, StarterPackRecord, UserListRecord,
};

fn take(json: &mut Value, key: &str) -> Option<Value> {
    json.get_mut(key)
        .map(Value::take)
        .filter(|value| !value.is_null())
}

fn type_of(json: &Value) -> Option<&str> {
    json.get("$type").and_then(Value::as_str)
}

fn unexpected_type(json: &Value) -> Error {
    Error::data(format!(
        "Unexpected record type: {}",
        type_of(json).unwrap_or("(none)")
    ))
}

/// Parse a `getPostThread` response's `thread`, anchored at level 0
pub fn parse_thread(json: Value) -> Result<AnyPost> {
    parse_thread_post(json, None, 0, 0)
}

/// Parse one thread view node
///
/// Replies are parsed one level deeper and sorted. Parents are only
/// followed from the anchor upwards (`absolute_level <= 0`).
pub fn parse_thread_post(
    mut json: Value,
    page_root: Option<&str>,
    level: i32,
    absolute_level: i32,
) -> Result<AnyPost> {
    match type_of(&json) {
        Some("app.bsky.feed.defs#threadViewPost") => {
            let view = take(&mut json, "post").ok_or_else(|| Error::data("thread node without post"))?;
            let mut post = Post::new(view, PostPosition::in_thread(level, absolute_level))?;

            let root = page_root
                .map(str::to_string)
                .unwrap_or_else(|| post.uri.clone());
            post.page_root = Some(root.clone());

            if let Some(Value::Array(replies)) = take(&mut json, "replies") {
                let replies = replies
                    .into_iter()
                    .map(|reply| parse_thread_post(reply, Some(&root), level + 1, absolute_level + 1))
                    .collect::<Result<Vec<_>>>()?;
                post.set_replies(replies);
            }

            if absolute_level <= 0 {
                if let Some(parent) = take(&mut json, "parent") {
                    let parent = parse_thread_post(parent, Some(&root), level - 1, absolute_level - 1)?;
                    post.parent = Some(Box::new(parent));
                }
            }

            Ok(post.into())
        }
        Some("app.bsky.feed.defs#notFoundPost") => Ok(AnyPost::Missing(MissingPost::new(json))),
        Some("app.bsky.feed.defs#blockedPost") => Ok(AnyPost::Blocked(BlockedPost::new(json))),
        _ => Err(unexpected_type(&json)),
    }
}

/// Parse a reply subtree fetched after `parent` was already on the page
///
/// The fragment's own ancestors are already on the page, so its `parent`
/// chain is dropped rather than walked again.
pub fn parse_reply_fragment(mut json: Value, parent: &Post) -> Result<AnyPost> {
    take(&mut json, "parent");
    parse_thread_post(
        json,
        parent.page_root.as_deref().or(Some(&parent.uri)),
        parent.level.unwrap_or(0) + 1,
        parent.absolute_level.unwrap_or(0) + 1,
    )
}

/// Parse the target of a quote embed
pub fn parse_view_record(json: &Value) -> AnyRecord {
    match type_of(json) {
        Some("app.bsky.embed.record#viewRecord") => {
            match Post::new(json.clone(), PostPosition::embedded()) {
                Ok(post) => AnyRecord::Post(post.into()),
                Err(e) => {
                    tracing::warn!("Malformed quoted post: {}", e);
                    AnyRecord::Generic(Record::new(json.clone()))
                }
            }
        }
        Some("app.bsky.embed.record#viewNotFound") => {
            AnyRecord::Post(AnyPost::Missing(MissingPost::new(json.clone())))
        }
        Some("app.bsky.embed.record#viewBlocked") => {
            AnyRecord::Post(AnyPost::Blocked(BlockedPost::new(json.clone())))
        }
        Some("app.bsky.embed.record#viewDetached") => {
            AnyRecord::Post(AnyPost::Detached(DetachedQuotePost::new(json.clone())))
        }
        Some("app.bsky.feed.defs#generatorView") => {
            AnyRecord::FeedGenerator(FeedGeneratorRecord::new(json.clone()))
        }
        Some("app.bsky.graph.defs#listView") => AnyRecord::UserList(UserListRecord::new(json.clone())),
        Some("app.bsky.graph.defs#starterPackViewBasic") => {
            AnyRecord::StarterPack(StarterPackRecord::new(json.clone()))
        }
        other => {
            tracing::warn!("Unknown record type: {:?}", other);
            AnyRecord::Generic(Record::new(json.clone()))
        }
    }
}

/// Parse one item of a feed page (`{post, reply?, reason?}`)
pub fn parse_feed_post(mut json: Value) -> Result<Post> {
    let view = take(&mut json, "post").ok_or_else(|| Error::data("feed item without post"))?;
    let mut post = Post::new(view, PostPosition::default())?;

    if let Some(mut reply) = take(&mut json, "reply") {
        if let Some(parent) = take(&mut reply, "parent") {
            post.parent = Some(Box::new(parse_post_view(parent)?));
        }
        if let Some(root) = take(&mut reply, "root") {
            post.thread_root = Some(Box::new(parse_post_view(root)?));
        }
        post.grandparent_author = Author::from_json(reply.get("grandparentAuthor"));
    }

    post.reason = take(&mut json, "reason");

    Ok(post)
}

/// Parse a typed postView that may be a stub (feed reply refs)
pub fn parse_post_view(json: Value) -> Result<AnyPost> {
    match type_of(&json) {
        Some("app.bsky.feed.defs#postView") => Ok(Post::new(json, PostPosition::default())?.into()),
        Some("app.bsky.feed.defs#notFoundPost") => Ok(AnyPost::Missing(MissingPost::new(json))),
        Some("app.bsky.feed.defs#blockedPost") => Ok(AnyPost::Blocked(BlockedPost::new(json))),
        _ => Err(unexpected_type(&json)),
    }
}
