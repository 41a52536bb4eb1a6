//! Data models for skythread

mod at_uri;
mod embed;
mod post;
mod profile;
mod record;

pub use at_uri::AtUri;
pub use embed::{
    Embed, EmbedSource, ImageEmbed, LinkEmbed, RecordEmbed, RecordWithMediaEmbed, VideoEmbed,
};
pub use post::{
    AnyPost, BlockedPost, DetachedQuotePost, FEDI_BRIDGE_SUFFIX, MissingPost, PIN_MARKER, Post,
    PostPosition,
};
pub use profile::{ActorViewer, Author, INVALID_HANDLE, ListBasic};
pub use record::{AnyRecord, FeedGeneratorRecord, Record, StarterPackRecord, UserListRecord};

#[cfg(test)]
pub(crate) use post::tests::post_json;

use serde_json::Value;

/// Read a count that may be a number or a numeric string
pub(crate) fn lenient_count(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_count() {
        assert_eq!(lenient_count(Some(&json!(5))), Some(5));
        assert_eq!(lenient_count(Some(&json!("17"))), Some(17));
        assert_eq!(lenient_count(Some(&json!("8 likes"))), Some(8));
        assert_eq!(lenient_count(Some(&json!("n/a"))), None);
        assert_eq!(lenient_count(Some(&Value::Null)), None);
        assert_eq!(lenient_count(None), None);
    }
}
