//! Who fills your timeline: posts and reposts per user over a time window

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;

use super::scan::{ScanState, ScanTicket, Scanner};
use super::{OnProgress, days_since, page_progress, window_fraction};
use crate::api::bluesky::window_start;
use crate::api::{AuthorFeedFilter, BlueskyApi, PageControl, ScanOptions, feed_post_time};
use crate::error::Result;
use crate::models::Author;

/// Maximum number of rows in a result
pub const MAX_ROWS: usize = 25;

/// A user picked for a multi-user scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserWithHandle {
    /// Account DID
    pub did: String,
    /// Handle shown in the results
    pub handle: String,
    /// Avatar URL
    pub avatar: Option<String>,
}

/// Counts for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingStatsRow {
    /// Handle of the author or reposter
    pub handle: String,
    /// Avatar URL
    pub avatar: Option<String>,
    /// Original posts and replies in own threads
    pub own: u32,
    /// Reposts
    pub reposts: u32,
    /// `own + reposts`
    pub all: u32,
}

/// Totals over all users
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sums {
    /// Original posts
    pub own: u32,
    /// Reposts
    pub reposts: u32,
    /// Both
    pub all: u32,
}

/// Result of one posting stats scan
#[derive(Debug, Clone, PartialEq)]
pub struct PostingStatsResult {
    /// Top users by `all`, descending
    pub users: Vec<PostingStatsRow>,
    /// Totals, including users past the top rows
    pub sums: Sums,
    /// How far back the fetched data reaches, in days
    pub fetched_days: f64,
    /// Length of the window the counts cover, in days
    pub days_back: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct UserProgress {
    pages: u32,
    progress: f64,
}

/// Combined progress of parallel per-user scans
///
/// Each user's expected page count is extrapolated from the pages fetched
/// so far and the share of the window they covered; users without an
/// estimate yet are assumed to need the average.
fn estimate_progress(users: &HashMap<String, UserProgress>) -> f64 {
    let known: Vec<f64> = users
        .values()
        .filter(|u| u.progress > 0.0)
        .map(|u| f64::from(u.pages) / u.progress)
        .collect();

    if known.is_empty() {
        return 0.0;
    }

    let average = known.iter().sum::<f64>() / known.len() as f64;
    let expected_total = average * users.len() as f64;
    let fetched: u32 = users.values().map(|u| u.pages).sum();

    window_fraction(f64::from(fetched), expected_total)
}

/// Options for [`aggregate`]
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Report `days_back` as the requested window even if the data is shorter
    pub fixed_window: bool,
    /// Users that get a row even with zero posts
    pub users: Vec<UserWithHandle>,
}

/// Count posts and reposts per user
///
/// Items older than `requested_days` before `start` are dropped; an item
/// exactly at the cutoff is counted. Replies only count when they answer a
/// post counted earlier, so conversations in other people's threads don't
/// inflate the numbers. Items are processed oldest first regardless of the
/// order they were fetched in.
pub fn aggregate(
    posts: &[Value],
    requested_days: f64,
    start: DateTime<Utc>,
    options: &AggregateOptions,
) -> Option<PostingStatsResult> {
    let mut timed: Vec<(DateTime<Utc>, &Value)> = posts
        .iter()
        .filter_map(|item| feed_post_time(item).map(|time| (time, item)))
        .collect();

    let oldest = timed.iter().map(|(time, _)| *time).min()?;
    let fetched_days = days_since(start, oldest);
    let days_back = if options.fixed_window {
        requested_days
    } else {
        requested_days.min(fetched_days)
    };

    let cutoff = window_start(start, requested_days);
    timed.retain(|(time, _)| *time >= cutoff);
    timed.sort_by_key(|(time, _)| *time);

    let mut rows: HashMap<String, PostingStatsRow> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for user in &options.users {
        order.push(user.handle.clone());
        rows.insert(
            user.handle.clone(),
            PostingStatsRow {
                handle: user.handle.clone(),
                avatar: user.avatar.clone(),
                own: 0,
                reposts: 0,
                all: 0,
            },
        );
    }

    let mut own_threads: HashSet<&str> = HashSet::new();
    let mut sums = Sums::default();

    for (_, item) in timed {
        if let Some(reply) = item.get("reply").filter(|r| !r.is_null()) {
            let parent = reply.pointer("/parent/uri").and_then(Value::as_str);
            if !parent.is_some_and(|uri| own_threads.contains(uri)) {
                continue;
            }
        }

        let reason = item.get("reason").filter(|r| !r.is_null());
        let user = match reason {
            Some(reason) => Author::from_json(reason.get("by")),
            None => Author::from_json(item.pointer("/post/author")),
        };
        let Some(user) = user else { continue };

        let row = rows.entry(user.handle.clone()).or_insert_with(|| {
            order.push(user.handle.clone());
            PostingStatsRow {
                handle: user.handle.clone(),
                avatar: user.avatar.clone(),
                own: 0,
                reposts: 0,
                all: 0,
            }
        });

        if reason.is_some() {
            row.reposts += 1;
            sums.reposts += 1;
        } else {
            row.own += 1;
            sums.own += 1;
            if let Some(uri) = item.pointer("/post/uri").and_then(Value::as_str) {
                own_threads.insert(uri);
            }
        }
    }

    sums.all = sums.own + sums.reposts;

    let mut users: Vec<PostingStatsRow> = order
        .into_iter()
        .filter_map(|handle| rows.remove(&handle))
        .map(|mut row| {
            row.all = row.own + row.reposts;
            row
        })
        .collect();
    users.sort_by(|a, b| b.all.cmp(&a.all));
    users.truncate(MAX_ROWS);

    Some(PostingStatsResult {
        users,
        sums,
        fetched_days,
        days_back,
    })
}

/// Posting stats scanner
///
/// A scan that gets cancelled, or replaced by a newer one, returns `None`
/// and its partial data is dropped.
pub struct PostingStats {
    account: Arc<BlueskyApi>,
    public: Arc<BlueskyApi>,
    scanner: Scanner,
    on_progress: Option<OnProgress>,
}

impl PostingStats {
    /// `account` serves the home, list and own timelines; `public` the per-user scans
    pub fn new(account: Arc<BlueskyApi>, public: Arc<BlueskyApi>) -> Self {
        Self {
            account,
            public,
            scanner: Scanner::new(),
            on_progress: None,
        }
    }

    /// Report progress after every page
    pub fn with_progress(mut self, callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// State of the latest scan
    pub fn state(&self) -> ScanState {
        self.scanner.state()
    }

    /// Stop the running scan after its current page
    pub fn cancel(&self) {
        self.scanner.cancel();
    }

    fn report(&self, progress: f64) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }

    fn scan_options(&self, ticket: &ScanTicket, start: DateTime<Utc>, days: f64) -> ScanOptions<'_> {
        ScanOptions::new()
            .keep_last_page(true)
            .cancel_token(ticket.token())
            .on_page_load(move |page| {
                if let Some(progress) = page_progress(page, start, days, feed_post_time) {
                    self.report(progress);
                }
                PageControl::Continue
            })
    }

    fn finish(
        &self,
        ticket: &ScanTicket,
        posts: Result<Vec<Value>>,
        days: f64,
        start: DateTime<Utc>,
        options: &AggregateOptions,
    ) -> Result<Option<PostingStatsResult>> {
        let posts = match posts {
            Ok(posts) => posts,
            Err(e) => {
                self.scanner.finish(ticket);
                return Err(e);
            }
        };

        if self.scanner.finish(ticket) == ScanState::Cancelled {
            return Ok(None);
        }

        Ok(aggregate(&posts, days, start, options))
    }

    /// Scan the logged-in user's home timeline
    pub async fn scan_home_timeline(&self, days: f64) -> Result<Option<PostingStatsResult>> {
        let ticket = self.scanner.start();
        let start = Utc::now();
        let posts = self
            .account
            .load_home_timeline(days, self.scan_options(&ticket, start, days))
            .await;
        self.finish(&ticket, posts, days, start, &AggregateOptions::default())
    }

    /// Scan a list feed
    pub async fn scan_list_timeline(&self, list: &str, days: f64) -> Result<Option<PostingStatsResult>> {
        let ticket = self.scanner.start();
        let start = Utc::now();
        let posts = self
            .account
            .load_list_timeline(list, days, self.scan_options(&ticket, start, days))
            .await;
        self.finish(&ticket, posts, days, start, &AggregateOptions::default())
    }

    /// Scan the user's own posts and reposts
    pub async fn scan_your_timeline(&self, days: f64) -> Result<Option<PostingStatsResult>> {
        let did = self.account.client().user_did()?;
        let ticket = self.scanner.start();
        let start = Utc::now();
        let posts = self
            .account
            .load_user_timeline(
                &did,
                days,
                AuthorFeedFilter::PostsNoReplies,
                self.scan_options(&ticket, start, days),
            )
            .await;
        self.finish(&ticket, posts, days, start, &AggregateOptions::default())
    }

    /// Scan several users' feeds concurrently and compare them
    pub async fn scan_user_timelines(
        &self,
        users: &[UserWithHandle],
        days: f64,
    ) -> Result<Option<PostingStatsResult>> {
        let ticket = self.scanner.start();
        let start = Utc::now();

        let progress: Mutex<HashMap<String, UserProgress>> = Mutex::new(
            users
                .iter()
                .map(|u| (u.did.clone(), UserProgress::default()))
                .collect(),
        );

        let scans = users.iter().map(|user| {
            let progress = &progress;
            let options = ScanOptions::new()
                .keep_last_page(true)
                .cancel_token(ticket.token())
                .on_page_load(move |page| {
                    let Some(fraction) = page_progress(page, start, days, feed_post_time) else {
                        return PageControl::Continue;
                    };

                    let estimate = progress.lock().ok().map(|mut all| {
                        let entry = all.entry(user.did.clone()).or_default();
                        entry.pages += 1;
                        entry.progress = fraction;
                        estimate_progress(&all)
                    });

                    if let Some(estimate) = estimate {
                        self.report(estimate);
                    }
                    PageControl::Continue
                });

            self.public
                .load_user_timeline(&user.did, days, AuthorFeedFilter::PostsAndAuthorThreads, options)
        });

        let posts = join_all(scans)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()
            .map(|sets| sets.into_iter().flatten().collect());

        let options = AggregateOptions {
            fixed_window: true,
            users: users.to_vec(),
        };
        self.finish(&ticket, posts, days, start, &options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::bluesky::tests::api_with;
    use crate::api::transport::HttpResponse;
    use crate::api::transport::testing::FakeTransport;
    use crate::services::tests::{feed_item, hours_before};
    use serde_json::json;
    use std::sync::Weak;

    fn repost(mut item: Value, by: &str, at: DateTime<Utc>) -> Value {
        item["reason"] = json!({
            "$type": "app.bsky.feed.defs#reasonRepost",
            "by": { "did": by, "handle": format!("{}.test", &by[8..]) },
            "indexedAt": at.to_rfc3339()
        });
        item
    }

    fn reply_to(mut item: Value, parent_uri: &str) -> Value {
        item["reply"] = json!({
            "parent": { "$type": "app.bsky.feed.defs#postView", "uri": parent_uri },
            "root": { "$type": "app.bsky.feed.defs#postView", "uri": parent_uri }
        });
        item
    }

    fn sample_feed(start: DateTime<Utc>) -> Vec<Value> {
        let p1 = "at://did:plc:alice/app.bsky.feed.post/1";
        vec![
            repost(
                feed_item("at://did:plc:dan/app.bsky.feed.post/9", "did:plc:dan", "x", hours_before(start, 100)),
                "did:plc:carol",
                hours_before(start, 5),
            ),
            reply_to(
                feed_item("at://did:plc:bob/app.bsky.feed.post/3", "did:plc:bob", "x", hours_before(start, 10)),
                "at://did:plc:someone/app.bsky.feed.post/0",
            ),
            reply_to(
                feed_item("at://did:plc:alice/app.bsky.feed.post/2", "did:plc:alice", "x", hours_before(start, 12)),
                p1,
            ),
            feed_item(p1, "did:plc:alice", "x", hours_before(start, 24)),
            feed_item("at://did:plc:bob/app.bsky.feed.post/4", "did:plc:bob", "x", hours_before(start, 240)),
        ]
    }

    #[test]
    fn test_aggregate_counts() {
        let start = Utc::now();
        let result = aggregate(&sample_feed(start), 7.0, start, &AggregateOptions::default()).unwrap();

        assert_eq!(result.sums, Sums { own: 2, reposts: 1, all: 3 });
        assert_eq!(result.users.len(), 2);
        assert_eq!(result.users[0].handle, "alice.test");
        assert_eq!(result.users[0].own, 2);
        assert_eq!(result.users[1].handle, "carol.test");
        assert_eq!(result.users[1].reposts, 1);
        assert!((result.fetched_days - 10.0).abs() < 1e-6);
        assert_eq!(result.days_back, 7.0);
    }

    #[test]
    fn test_aggregate_order_independent() {
        let start = Utc::now();
        let mut reversed = sample_feed(start);
        reversed.reverse();

        assert_eq!(
            aggregate(&reversed, 7.0, start, &AggregateOptions::default()),
            aggregate(&sample_feed(start), 7.0, start, &AggregateOptions::default())
        );
    }

    #[test]
    fn test_aggregate_empty_and_seeded_users() {
        let start = Utc::now();
        assert!(aggregate(&[], 7.0, start, &AggregateOptions::default()).is_none());

        let options = AggregateOptions {
            fixed_window: true,
            users: vec![UserWithHandle {
                did: "did:plc:quiet".into(),
                handle: "quiet.test".into(),
                avatar: None,
            }],
        };
        let result = aggregate(&sample_feed(start), 30.0, start, &options).unwrap();
        assert_eq!(result.days_back, 30.0);
        assert!(result.users.iter().any(|u| u.handle == "quiet.test" && u.all == 0));
        assert_eq!(result.users[0].handle, "alice.test");
    }

    #[test]
    fn test_estimate_progress() {
        let mut users = HashMap::new();
        users.insert("a".to_string(), UserProgress { pages: 1, progress: 0.5 });
        users.insert("b".to_string(), UserProgress::default());
        // a needs 2 pages, b is assumed to need 2 as well: 1 of 4 done
        assert!((estimate_progress(&users) - 0.25).abs() < 1e-9);

        users.clear();
        users.insert("a".to_string(), UserProgress::default());
        assert_eq!(estimate_progress(&users), 0.0);
    }

    #[tokio::test]
    async fn test_scan_home_timeline_reports_progress() {
        let start = Utc::now();
        let fake = Arc::new(FakeTransport::new());
        fake.on("getTimeline", 200, json!({ "feed": sample_feed(start) }));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let api = Arc::new(api_with(fake.clone()));
        let stats = PostingStats::new(api.clone(), api).with_progress(move |p| {
            sink.lock().unwrap().push(p);
        });

        let result = stats.scan_home_timeline(7.0).await.unwrap().unwrap();
        assert_eq!(result.sums.all, 3);
        assert_eq!(stats.state(), ScanState::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
        assert!(fake.requests()[0].url.contains("limit=100"));
    }

    #[tokio::test]
    async fn test_cancelled_scan_returns_nothing() {
        let start = Utc::now();
        let fake = Arc::new(FakeTransport::new());
        let api = Arc::new(api_with(fake.clone()));
        let stats = Arc::new(PostingStats::new(api.clone(), api));

        let weak: Weak<PostingStats> = Arc::downgrade(&stats);
        let page = json!({
            "feed": [feed_item("at://did:plc:a/app.bsky.feed.post/1", "did:plc:a", "x", hours_before(start, 1))],
            "cursor": "more"
        })
        .to_string();
        fake.on_with("getTimeline", move |_| {
            if let Some(stats) = weak.upgrade() {
                stats.cancel();
            }
            Some(HttpResponse { status: 200, body: page.clone() })
        });

        assert_eq!(stats.scan_home_timeline(7.0).await.unwrap(), None);
        assert_eq!(stats.state(), ScanState::Cancelled);
        assert_eq!(fake.count("getTimeline"), 1);
    }

    #[tokio::test]
    async fn test_scan_user_timelines() {
        let start = Utc::now();
        let fake = Arc::new(FakeTransport::new());
        let alice = json!({ "feed": [
            feed_item("at://did:plc:alice/app.bsky.feed.post/1", "did:plc:alice", "x", hours_before(start, 2)),
            feed_item("at://did:plc:alice/app.bsky.feed.post/2", "did:plc:alice", "x", hours_before(start, 30)),
        ]})
        .to_string();
        fake.on_with("getAuthorFeed", move |req| {
            let body = if req.url.contains("actor=did%3Aplc%3Aalice") {
                alice.clone()
            } else {
                json!({ "feed": [] }).to_string()
            };
            Some(HttpResponse { status: 200, body })
        });

        let api = Arc::new(api_with(fake.clone()));
        let stats = PostingStats::new(api.clone(), api);
        let users = vec![
            UserWithHandle { did: "did:plc:alice".into(), handle: "alice.test".into(), avatar: None },
            UserWithHandle { did: "did:plc:bob".into(), handle: "bob.test".into(), avatar: None },
        ];

        let result = stats.scan_user_timelines(&users, 7.0).await.unwrap().unwrap();
        assert_eq!(fake.count("getAuthorFeed"), 2);
        assert!(fake.requests().iter().all(|r| r.url.contains("filter=posts_and_author_threads")));
        assert_eq!(result.users[0].own, 2);
        assert_eq!(result.users[1].handle, "bob.test");
        assert_eq!(result.users[1].all, 0);
        assert_eq!(result.days_back, 7.0);
    }
}
