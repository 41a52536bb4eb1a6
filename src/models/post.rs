//! Posts, post stubs and reply ordering

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::at_uri::AtUri;
use super::embed::Embed;
use super::lenient_count;
use super::profile::Author;
use super::record::Record;
use crate::error::{Error, Result};
use crate::links;

/// Reply text authors use to pin a reply to their own thread
pub const PIN_MARKER: &str = "📌";

/// Suffix of handles bridged from the fediverse by Bridgy Fed
pub const FEDI_BRIDGE_SUFFIX: &str = ".ap.brid.gy";

/// Depth below which missing replies are loaded lazily rather than looked up
const LAZY_REPLY_LEVEL: i32 = 4;

#[derive(Debug, Clone, Default, Deserialize)]
struct PostRecordData {
    #[serde(default)]
    text: String,
    #[serde(rename = "createdAt", default)]
    created_at: Option<String>,
    #[serde(default)]
    facets: Option<Value>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    reply: Option<ReplyRefs>,
    #[serde(default)]
    embed: Option<Value>,
    #[serde(rename = "bridgyOriginalText", default)]
    bridgy_original_text: Option<String>,
    #[serde(rename = "bridgyOriginalUrl", default)]
    bridgy_original_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReplyRefs {
    #[serde(default)]
    parent: Option<Value>,
    #[serde(default)]
    root: Option<Value>,
}

/// Where a post sits in the tree it is parsed into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostPosition {
    /// Depth in the thread response it came from (negative for ancestors)
    pub level: Option<i32>,
    /// Depth in the whole tree on the page (0 at the page root)
    pub absolute_level: Option<i32>,
    /// Extracted from a quote embed instead of a post view
    pub is_embed: bool,
}

impl PostPosition {
    /// Position inside a thread response
    pub fn in_thread(level: i32, absolute_level: i32) -> Self {
        Self {
            level: Some(level),
            absolute_level: Some(absolute_level),
            is_embed: false,
        }
    }

    /// Position of a quoted post
    pub fn embedded() -> Self {
        Self {
            is_embed: true,
            ..Self::default()
        }
    }
}

/// A full post with content
#[derive(Debug, Clone)]
pub struct Post {
    data: Value,
    record: PostRecordData,

    /// at:// URI
    pub uri: String,
    /// Content hash
    pub cid: Option<String>,
    /// Author snapshot at fetch time
    pub author: Author,
    /// Attached embed
    pub embed: Option<Embed>,

    /// Likes
    pub like_count: Option<u64>,
    /// Replies
    pub reply_count: Option<u64>,
    /// Reposts
    pub repost_count: Option<u64>,
    /// Quotes
    pub quote_count: Option<u64>,

    /// Direct parent, when loaded
    pub parent: Option<Box<AnyPost>>,
    /// Root of the thread as declared by the record (feed replies only)
    pub thread_root: Option<Box<AnyPost>>,
    /// URI of the post at the top of the subtree loaded on the page
    pub page_root: Option<String>,
    /// Loaded replies, in display order
    pub replies: Vec<AnyPost>,

    /// Depth in the thread response it was loaded from
    pub level: Option<i32>,
    /// Depth in the whole visible tree
    pub absolute_level: Option<i32>,
    /// True if this post was extracted from a quote embed
    pub is_embed: bool,

    /// Feed reason (e.g. a repost), for feed items
    pub reason: Option<Value>,
    /// Author of the grandparent, for feed replies
    pub grandparent_author: Option<Author>,

    viewer_like: Option<String>,
    created_at: Option<DateTime<Utc>>,
    lowercase_text: String,
}

impl Post {
    /// Build a post from a postView (or a quote's viewRecord when embedded)
    pub fn new(data: Value, position: PostPosition) -> Result<Self> {
        let uri = data
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::data("post view without uri"))?
            .to_string();

        let record_key = if position.is_embed { "value" } else { "record" };
        let record_json = data
            .get(record_key)
            .ok_or_else(|| Error::data(format!("post {uri} has no {record_key}")))?;
        let record: PostRecordData = serde_json::from_value(record_json.clone())
            .map_err(|e| Error::data(format!("invalid record in {uri}: {e}")))?;

        let embed = if !position.is_embed && data.get("embed").is_some() {
            Some(Embed::parse_inline(&data["embed"]))
        } else if position.is_embed && data.pointer("/embeds/0").is_some() {
            Some(Embed::parse_inline(&data["embeds"][0]))
        } else {
            record.embed.as_ref().map(Embed::parse_raw)
        };

        let created_at = record
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let page_root = (position.absolute_level == Some(0)).then(|| uri.clone());

        Ok(Self {
            cid: data.get("cid").and_then(Value::as_str).map(str::to_string),
            author: Author::from_json(data.get("author")).unwrap_or_default(),
            like_count: lenient_count(data.get("likeCount")),
            reply_count: lenient_count(data.get("replyCount")),
            repost_count: lenient_count(data.get("repostCount")),
            quote_count: lenient_count(data.get("quoteCount")),
            viewer_like: data
                .pointer("/viewer/like")
                .and_then(Value::as_str)
                .map(str::to_string),
            lowercase_text: record.text.to_lowercase(),
            uri,
            embed,
            parent: None,
            thread_root: None,
            page_root,
            replies: Vec::new(),
            level: position.level,
            absolute_level: position.absolute_level,
            is_embed: position.is_embed,
            reason: None,
            grandparent_author: None,
            created_at,
            record,
            data,
        })
    }

    /// Raw view JSON
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Record key
    pub fn rkey(&self) -> String {
        rkey_of(&self.uri)
    }

    /// Post text
    pub fn text(&self) -> &str {
        &self.record.text
    }

    /// Lowercased text, computed once
    pub fn lowercase_text(&self) -> &str {
        &self.lowercase_text
    }

    /// Rich-text facets
    pub fn facets(&self) -> Option<&Value> {
        self.record.facets.as_ref()
    }

    /// Hashtags stored outside the text
    pub fn tags(&self) -> &[String] {
        self.record.tags.as_deref().unwrap_or_default()
    }

    /// Creation time from the record
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Repost time for reposts, creation time otherwise
    pub fn effective_time(&self) -> Option<DateTime<Utc>> {
        self.reason
            .as_ref()
            .and_then(|reason| reason.get("indexedAt"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .or(self.created_at)
    }

    /// URI of the viewer's like record
    pub fn viewer_like(&self) -> Option<&str> {
        self.viewer_like.as_deref()
    }

    /// Mark the post liked (or not) after a like/unlike call
    pub fn set_viewer_like(&mut self, like_uri: Option<String>) {
        self.viewer_like = like_uri;
    }

    /// Take author and viewer state from a fresh view of the same post
    pub fn apply_viewer_info(&mut self, view: &Value) {
        if let Some(author) = Author::from_json(view.get("author")) {
            self.author = author;
        }
        if let Some(likes) = lenient_count(view.get("likeCount")) {
            self.like_count = Some(likes);
        }
        let viewer = view.get("viewer").cloned().unwrap_or_else(|| Value::Object(Map::new()));
        self.viewer_like = viewer
            .get("like")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(data) = self.data.as_object_mut() {
            data.insert("viewer".to_string(), viewer);
        }
    }

    /// True if the viewer liked this post
    pub fn liked(&self) -> bool {
        self.viewer_like.is_some()
    }

    /// True if the view came with viewer state (i.e. was fetched logged in)
    pub fn has_viewer_info(&self) -> bool {
        self.data.get("viewer").is_some()
    }

    /// Author is muted by the viewer
    pub fn muted(&self) -> bool {
        self.author
            .viewer
            .as_ref()
            .and_then(|v| v.muted)
            .unwrap_or(false)
    }

    /// Name of the mute list the author is on
    pub fn mute_list_name(&self) -> Option<&str> {
        self.author
            .viewer
            .as_ref()?
            .muted_by_list
            .as_ref()?
            .name
            .as_deref()
    }

    /// A threadgate limits who can reply
    pub fn is_restricting_replies(&self) -> bool {
        self.data
            .pointer("/threadgate/record/allow")
            .is_some_and(|allow| !allow.is_null())
    }

    /// Parent declared in the record's reply ref
    pub fn parent_reference(&self) -> Option<Record> {
        self.record
            .reply
            .as_ref()
            .and_then(|r| r.parent.clone())
            .map(Record::new)
    }

    /// Root declared in the record's reply ref
    pub fn root_reference(&self) -> Option<Record> {
        self.record
            .reply
            .as_ref()
            .and_then(|r| r.root.clone())
            .map(Record::new)
    }

    /// Author is a bridged fediverse account
    pub fn is_fedi_post(&self) -> bool {
        self.author.handle.ends_with(FEDI_BRIDGE_SUFFIX)
    }

    /// `user@instance` for bridged accounts
    pub fn author_fedi_handle(&self) -> Option<String> {
        self.author
            .handle
            .strip_suffix(FEDI_BRIDGE_SUFFIX)
            .map(|handle| handle.replacen('.', "@", 1))
    }

    /// Original fediverse text of a bridged post
    pub fn original_fedi_content(&self) -> Option<&str> {
        self.record.bridgy_original_text.as_deref()
    }

    /// Original fediverse URL of a bridged post
    pub fn original_fedi_url(&self) -> Option<&str> {
        self.record.bridgy_original_url.as_deref()
    }

    /// False when the author's handle failed verification
    pub fn has_valid_handle(&self) -> bool {
        self.author.has_valid_handle()
    }

    /// Name to show for the author
    pub fn author_display_name(&self) -> &str {
        self.author.display_name_or_handle()
    }

    /// Web link to the author's profile
    pub fn link_to_author(&self) -> String {
        links::profile_url(self.author.handle_or_did())
    }

    /// Web link to this post
    pub fn link_to_post(&self) -> String {
        links::post_url(self.author.handle_or_did(), &self.rkey())
    }

    /// Profile link built from the DID in the URI
    pub fn did_link_to_author(&self) -> String {
        did_link(&self.uri)
    }

    /// True if this post is the top of the loaded subtree
    pub fn is_page_root(&self) -> bool {
        self.page_root.as_deref() == Some(self.uri.as_str())
    }

    /// Replace the replies and put them in display order
    pub fn set_replies(&mut self, replies: Vec<AnyPost>) {
        self.replies = replies;
        self.sort_replies();
    }

    /// Merge newly loaded replies, skipping ones already present, and
    /// re-sort the whole list; returns how many were added
    pub fn append_replies(&mut self, replies: Vec<AnyPost>) -> usize {
        let before = self.replies.len();

        for reply in replies {
            if !self.replies.iter().any(|r| r.uri() == reply.uri()) {
                self.replies.push(reply);
            }
        }

        self.sort_replies();
        self.replies.len() - before
    }

    fn sort_replies(&mut self) {
        let parent_did = self.author.did.clone();
        self.replies
            .sort_by(|a, b| compare_replies(&parent_did, a, b));
    }

    fn missing_replies(&self) -> bool {
        self.reply_count
            .is_some_and(|count| count > self.replies.len() as u64)
    }

    /// Deep post with unloaded replies: fetch the subthread to see them
    pub fn has_more_replies(&self) -> bool {
        self.missing_replies()
            && self.replies.is_empty()
            && self.level.is_some_and(|level| level > LAZY_REPLY_LEVEL)
    }

    /// Replies the server left out of the thread: look them up via backlinks
    pub fn has_hidden_replies(&self) -> bool {
        self.missing_replies()
            && (!self.replies.is_empty()
                || self.level.is_none_or(|level| level <= LAZY_REPLY_LEVEL))
    }

    /// Loaded parents, from the topmost one down to the direct parent
    pub fn ancestors(&self) -> Vec<&AnyPost> {
        let mut chain = Vec::new();
        let mut current = self.parent.as_deref();
        while let Some(parent) = current {
            chain.push(parent);
            current = parent.as_post().and_then(|post| post.parent.as_deref());
        }
        chain.reverse();
        chain
    }

    /// This post or a descendant with the given URI
    pub fn find_mut(&mut self, uri: &str) -> Option<&mut Post> {
        if self.uri == uri {
            return Some(self);
        }

        for reply in &mut self.replies {
            if let AnyPost::Post(post) = reply {
                if let Some(found) = post.find_mut(uri) {
                    return Some(found);
                }
            }
        }

        None
    }

    /// Visit this post, its ancestors and all loaded descendants
    pub fn visit(&self, f: &mut dyn FnMut(&Post)) {
        f(self);

        if let Some(AnyPost::Post(parent)) = self.parent.as_deref() {
            parent.visit_ancestors(f);
        }

        for reply in &self.replies {
            if let AnyPost::Post(post) = reply {
                post.visit_descendants(f);
            }
        }
    }

    fn visit_ancestors(&self, f: &mut dyn FnMut(&Post)) {
        f(self);
        if let Some(AnyPost::Post(parent)) = self.parent.as_deref() {
            parent.visit_ancestors(f);
        }
    }

    fn visit_descendants(&self, f: &mut dyn FnMut(&Post)) {
        f(self);
        for reply in &self.replies {
            if let AnyPost::Post(post) = reply {
                post.visit_descendants(f);
            }
        }
    }
}

/// Sibling order: parent's author first, then pinned, then oldest first;
/// stubs after all real posts
fn compare_replies(parent_did: &str, a: &AnyPost, b: &AnyPost) -> Ordering {
    match (a, b) {
        (AnyPost::Post(a), AnyPost::Post(b)) => {
            let a_own = a.author.did == parent_did;
            let b_own = b.author.did == parent_did;
            let a_pin = a.text() == PIN_MARKER;
            let b_pin = b.text() == PIN_MARKER;

            b_own
                .cmp(&a_own)
                .then_with(|| b_pin.cmp(&a_pin))
                .then_with(|| a.created_at.cmp(&b.created_at))
        }
        (AnyPost::Post(_), _) => Ordering::Less,
        (_, AnyPost::Post(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn rkey_of(uri: &str) -> String {
    AtUri::parse(uri)
        .map(|u| u.rkey)
        .unwrap_or_else(|_| uri.rsplit('/').next().unwrap_or_default().to_string())
}

fn did_link(uri: &str) -> String {
    let repo = AtUri::parse(uri).map(|u| u.repo).unwrap_or_default();
    links::profile_url(&repo)
}

fn uri_of(data: &Value) -> String {
    data.get("uri")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Post hidden because of a block in either direction
#[derive(Debug, Clone)]
pub struct BlockedPost {
    data: Value,
    /// at:// URI
    pub uri: String,
    /// Author reference with viewer state
    pub author: Option<Author>,
}

impl BlockedPost {
    /// Wrap a blockedPost / viewBlocked
    pub fn new(data: Value) -> Self {
        Self {
            uri: uri_of(&data),
            author: Author::from_json(data.get("author")),
            data,
        }
    }

    /// The viewer blocks the author
    pub fn blocks_user(&self) -> bool {
        self.author
            .as_ref()
            .and_then(|a| a.viewer.as_ref())
            .is_some_and(|v| v.blocking.is_some())
    }

    /// The author blocks the viewer
    pub fn blocked_by_user(&self) -> bool {
        self.author
            .as_ref()
            .and_then(|a| a.viewer.as_ref())
            .and_then(|v| v.blocked_by)
            .unwrap_or(false)
    }
}

/// Deleted or otherwise unavailable post
#[derive(Debug, Clone)]
pub struct MissingPost {
    data: Value,
    /// at:// URI
    pub uri: String,
}

impl MissingPost {
    /// Wrap a notFoundPost / viewNotFound
    pub fn new(data: Value) -> Self {
        Self {
            uri: uri_of(&data),
            data,
        }
    }
}

/// Quote the quoted author detached from their post
#[derive(Debug, Clone)]
pub struct DetachedQuotePost {
    data: Value,
    /// at:// URI
    pub uri: String,
}

impl DetachedQuotePost {
    /// Wrap a viewDetached
    pub fn new(data: Value) -> Self {
        Self {
            uri: uri_of(&data),
            data,
        }
    }
}

/// One node of a thread: a post or a stub standing in for one
#[derive(Debug, Clone)]
pub enum AnyPost {
    /// Full post
    Post(Box<Post>),
    /// Blocked stub
    Blocked(BlockedPost),
    /// Missing stub
    Missing(MissingPost),
    /// Detached quote stub
    Detached(DetachedQuotePost),
}

impl AnyPost {
    /// at:// URI
    pub fn uri(&self) -> &str {
        match self {
            Self::Post(p) => &p.uri,
            Self::Blocked(p) => &p.uri,
            Self::Missing(p) => &p.uri,
            Self::Detached(p) => &p.uri,
        }
    }

    /// Raw JSON the node was parsed from
    pub fn data(&self) -> &Value {
        match self {
            Self::Post(p) => &p.data,
            Self::Blocked(p) => &p.data,
            Self::Missing(p) => &p.data,
            Self::Detached(p) => &p.data,
        }
    }

    /// Content hash, when the view includes one
    pub fn cid(&self) -> Option<&str> {
        self.data().get("cid").and_then(Value::as_str)
    }

    /// Record key
    pub fn rkey(&self) -> String {
        rkey_of(self.uri())
    }

    /// Profile link built from the DID in the URI
    pub fn did_link_to_author(&self) -> String {
        did_link(self.uri())
    }

    /// The full post, if this isn't a stub
    pub fn as_post(&self) -> Option<&Post> {
        match self {
            Self::Post(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable full post, if this isn't a stub
    pub fn as_post_mut(&mut self) -> Option<&mut Post> {
        match self {
            Self::Post(p) => Some(p),
            _ => None,
        }
    }

    /// Identity fields (`uri`, `cid`, `author`) exactly as received
    pub fn identity(&self) -> Value {
        let data = self.data();
        let mut out = Map::new();
        for key in ["uri", "cid", "author"] {
            if let Some(value) = data.get(key) {
                out.insert(key.to_string(), value.clone());
            }
        }
        Value::Object(out)
    }
}

impl From<Post> for AnyPost {
    fn from(post: Post) -> Self {
        Self::Post(Box::new(post))
    }
}
