//! Search the text of recent home timeline posts

use std::sync::{Arc, RwLock};

use chrono::Utc;

use super::page_progress;
use super::scan::{ScanState, Scanner};
use crate::api::{BlueskyApi, PageControl, ScanOptions, feed_post_time};
use crate::error::Result;
use crate::models::Post;
use crate::thread;

/// Fetches a window of the home timeline once, then searches it locally
pub struct TimelineSearch {
    api: Arc<BlueskyApi>,
    scanner: Scanner,
    posts: RwLock<Vec<Post>>,
}

impl TimelineSearch {
    /// Search over `api`'s home timeline
    pub fn new(api: Arc<BlueskyApi>) -> Self {
        Self {
            api,
            scanner: Scanner::new(),
            posts: RwLock::new(Vec::new()),
        }
    }

    /// State of the latest fetch
    pub fn state(&self) -> ScanState {
        self.scanner.state()
    }

    /// Number of timeline items available to search
    pub fn len(&self) -> usize {
        self.posts.read().map(|p| p.len()).unwrap_or_default()
    }

    /// True before the first completed fetch
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the last `days` days of the timeline
    ///
    /// A fetch that is stopped or superseded by a newer one keeps the
    /// previously loaded posts and returns `false`.
    pub async fn fetch_timeline(&self, days: f64, on_progress: impl Fn(f64) + Send + Sync) -> Result<bool> {
        let ticket = self.scanner.start();
        let start = Utc::now();

        let options = ScanOptions::new()
            .cancel_token(ticket.token())
            .on_page_load(|page| {
                if !self.scanner.is_current(&ticket) {
                    return PageControl::Cancel;
                }
                if let Some(progress) = page_progress(page, start, days, feed_post_time) {
                    on_progress(progress);
                }
                PageControl::Continue
            });

        let result = self.api.load_home_timeline(days, options).await;
        let state = self.scanner.finish(&ticket);
        let timeline = result?;

        if state == ScanState::Cancelled || !self.scanner.is_current(&ticket) {
            return Ok(false);
        }

        let parsed: Vec<Post> = timeline
            .into_iter()
            .filter_map(|item| match thread::parse_feed_post(item) {
                Ok(post) => Some(post),
                Err(e) => {
                    tracing::warn!("Skipping unparseable timeline item: {}", e);
                    None
                }
            })
            .collect();

        if let Ok(mut posts) = self.posts.write() {
            *posts = parsed;
        }
        Ok(true)
    }

    /// Stop the running fetch
    pub fn stop_fetch(&self) {
        self.scanner.cancel();
    }

    /// Loaded posts whose text contains `query`, case-insensitively
    pub fn search_posts(&self, query: &str) -> Vec<Post> {
        if query.is_empty() {
            return Vec::new();
        }

        let query = query.to_lowercase();
        let Ok(posts) = self.posts.read() else {
            return Vec::new();
        };

        posts
            .iter()
            .filter(|post| post.lowercase_text().contains(&query))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::bluesky::tests::api_with;
    use crate::api::transport::testing::FakeTransport;
    use crate::services::tests::{feed_item, hours_before};
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_fetch_and_search() {
        let start = Utc::now();
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "getTimeline",
            200,
            json!({ "feed": [
                { "reply": {} },
                feed_item("at://did:plc:a/app.bsky.feed.post/1", "did:plc:a", "Rust is Great", hours_before(start, 1)),
                feed_item("at://did:plc:b/app.bsky.feed.post/2", "did:plc:b", "cats", hours_before(start, 2)),
                feed_item("at://did:plc:c/app.bsky.feed.post/3", "did:plc:c", "rusty nail", hours_before(start, 200)),
            ]}),
        );

        let search = TimelineSearch::new(Arc::new(api_with(fake)));
        let progress = Mutex::new(Vec::new());

        assert!(search.fetch_timeline(7.0, |p| progress.lock().unwrap().push(p)).await.unwrap());
        assert_eq!(search.state(), ScanState::Completed);
        // the 200-hour-old post is past the window, the item without a post is skipped
        assert_eq!(search.len(), 2);
        assert_eq!(progress.lock().unwrap().len(), 1);

        let found = search.search_posts("RUST");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uri, "at://did:plc:a/app.bsky.feed.post/1");

        assert!(search.search_posts("").is_empty());
        assert!(search.search_posts("dogs").is_empty());
    }

    #[test]
    fn test_stopped_fetch_keeps_nothing() {
        let start = Utc::now();
        let fake = Arc::new(FakeTransport::new());
        fake.on(
            "getTimeline",
            200,
            json!({
                "feed": [feed_item("at://did:plc:a/app.bsky.feed.post/1", "did:plc:a", "x", hours_before(start, 1))],
                "cursor": "next"
            }),
        );
        let search = Arc::new(TimelineSearch::new(Arc::new(api_with(fake.clone()))));

        let stopper = search.clone();
        let fetched = tokio_test::block_on(search.fetch_timeline(7.0, move |_| stopper.stop_fetch()));

        assert!(!fetched.unwrap());
        assert_eq!(fake.count("getTimeline"), 1);
        assert_eq!(search.state(), ScanState::Cancelled);
        assert!(search.is_empty());
    }
}
