//! Generic records and the non-post records that can be quoted

use serde_json::Value;

use super::at_uri::AtUri;
use super::post::AnyPost;
use super::profile::Author;
use super::lenient_count;

/// Any record or record view, kept as raw JSON
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    data: Value,
}

impl Record {
    /// Wrap a JSON payload
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// Raw JSON
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// at:// URI
    pub fn uri(&self) -> Option<&str> {
        self.data.get("uri").and_then(Value::as_str)
    }

    /// Content hash
    pub fn cid(&self) -> Option<&str> {
        self.data.get("cid").and_then(Value::as_str)
    }

    /// Last segment of the URI
    pub fn rkey(&self) -> Option<String> {
        self.uri()
            .and_then(|uri| AtUri::parse(uri).ok())
            .map(|uri| uri.rkey)
    }

    /// `$type` of the payload
    pub fn record_type(&self) -> Option<&str> {
        self.data.get("$type").and_then(Value::as_str)
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    fn creator(&self) -> Option<Author> {
        Author::from_json(self.data.get("creator"))
    }
}

/// Custom feed (generatorView)
#[derive(Debug, Clone, PartialEq)]
pub struct FeedGeneratorRecord {
    /// Underlying view
    pub record: Record,
    /// Feed owner
    pub author: Option<Author>,
}

impl FeedGeneratorRecord {
    /// Wrap a generatorView
    pub fn new(data: Value) -> Self {
        let record = Record::new(data);
        let author = record.creator();
        Self { record, author }
    }

    /// Feed name
    pub fn title(&self) -> Option<&str> {
        self.record.str_field("displayName")
    }

    /// Feed description
    pub fn description(&self) -> Option<&str> {
        self.record.str_field("description")
    }

    /// Number of likes
    pub fn like_count(&self) -> Option<u64> {
        lenient_count(self.record.data.get("likeCount"))
    }

    /// Feed avatar URL
    pub fn avatar(&self) -> Option<&str> {
        self.record.str_field("avatar")
    }
}

/// User list or moderation list (listView)
#[derive(Debug, Clone, PartialEq)]
pub struct UserListRecord {
    /// Underlying view
    pub record: Record,
    /// List owner
    pub author: Option<Author>,
}

impl UserListRecord {
    /// Wrap a listView
    pub fn new(data: Value) -> Self {
        let record = Record::new(data);
        let author = record.creator();
        Self { record, author }
    }

    /// List name
    pub fn title(&self) -> Option<&str> {
        self.record.str_field("name")
    }

    /// `app.bsky.graph.defs#curatelist`, `#modlist`, ...
    pub fn purpose(&self) -> Option<&str> {
        self.record.str_field("purpose")
    }

    /// List description
    pub fn description(&self) -> Option<&str> {
        self.record.str_field("description")
    }

    /// List avatar URL
    pub fn avatar(&self) -> Option<&str> {
        self.record.str_field("avatar")
    }
}

/// Starter pack (starterPackViewBasic)
#[derive(Debug, Clone, PartialEq)]
pub struct StarterPackRecord {
    /// Underlying view
    pub record: Record,
    /// Pack owner
    pub author: Option<Author>,
}

impl StarterPackRecord {
    /// Wrap a starterPackViewBasic
    pub fn new(data: Value) -> Self {
        let record = Record::new(data);
        let author = record.creator();
        Self { record, author }
    }

    /// Pack name
    pub fn title(&self) -> Option<&str> {
        self.record.data.pointer("/record/name").and_then(Value::as_str)
    }

    /// Pack description
    pub fn description(&self) -> Option<&str> {
        self.record
            .data
            .pointer("/record/description")
            .and_then(Value::as_str)
    }
}

/// Target of a quote embed
#[derive(Debug, Clone)]
pub enum AnyRecord {
    /// A post or a post stub
    Post(AnyPost),
    /// Custom feed
    FeedGenerator(FeedGeneratorRecord),
    /// List
    UserList(UserListRecord),
    /// Starter pack
    StarterPack(StarterPackRecord),
    /// Anything else, including bare strong refs from raw embeds
    Generic(Record),
}

impl AnyRecord {
    /// at:// URI of the target
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Post(post) => Some(post.uri()),
            Self::FeedGenerator(r) => r.record.uri(),
            Self::UserList(r) => r.record.uri(),
            Self::StarterPack(r) => r.record.uri(),
            Self::Generic(r) => r.uri(),
        }
    }

    /// The quoted post, if this is a full post
    pub fn as_post(&self) -> Option<&super::post::Post> {
        match self {
            Self::Post(AnyPost::Post(post)) => Some(post),
            _ => None,
        }
    }
}
