//! Whose posts you like, and who likes yours

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;

use super::scan::{ScanState, Scanner};
use super::{OnProgress, page_progress};
use crate::api::bluesky::{PAGE_LIMIT, cutoff_for_days};
use crate::api::{
    AuthorFeedFilter, BlueskyApi, CancelToken, FetchAllOptions, PageControl, Params, ScanOptions,
    feed_post_time,
};
use crate::error::Result;
use crate::models::{AtUri, lenient_count};

/// Rows kept in each ranking
pub const TOP_ENTRIES: usize = 25;

/// Posts whose likers are fetched concurrently
pub const LIKES_BATCH: usize = 10;

const PROGRESS_WEIGHTS: [f64; 3] = [0.1, 0.65, 0.25];

/// One user and how many likes they gave or got
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikeStat {
    /// Account DID, when known
    pub did: Option<String>,
    /// Handle, when known
    pub handle: Option<String>,
    /// Avatar URL
    pub avatar: Option<String>,
    /// Number of likes
    pub count: u32,
}

/// Both rankings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikeStatsResult {
    /// Users whose posts you liked most
    pub given_likes: Vec<LikeStat>,
    /// Users who liked your posts most
    pub received_likes: Vec<LikeStat>,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Posts = 0,
    LikeRecords = 1,
    PostLikes = 2,
}

/// Counts per key, remembering the order keys were first seen in
#[derive(Default)]
struct Tally {
    index: HashMap<String, usize>,
    rows: Vec<LikeStat>,
}

impl Tally {
    fn add(&mut self, key: &str, make: impl FnOnce() -> LikeStat) {
        let position = *self.index.entry(key.to_string()).or_insert_with(|| {
            self.rows.push(make());
            self.rows.len() - 1
        });
        self.rows[position].count += 1;
    }

    fn top(mut self) -> Vec<LikeStat> {
        self.rows.sort_by(|a, b| b.count.cmp(&a.count));
        self.rows.truncate(TOP_ENTRIES);
        self.rows
    }
}

fn like_time(record: &Value) -> Option<DateTime<Utc>> {
    record
        .pointer("/value/createdAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Rank liked authors by the DID in each like's subject URI
pub fn sum_up_given_likes(likes: &[Value]) -> Vec<LikeStat> {
    let mut tally = Tally::default();

    for like in likes {
        let Some(uri) = like.pointer("/value/subject/uri").and_then(Value::as_str) else {
            continue;
        };
        let Ok(subject) = AtUri::parse(uri) else {
            continue;
        };
        tally.add(&subject.repo, || LikeStat {
            did: Some(subject.repo.clone()),
            ..LikeStat::default()
        });
    }

    tally.top()
}

/// Rank likers by handle
pub fn sum_up_received_likes(likes: &[Value]) -> Vec<LikeStat> {
    let mut tally = Tally::default();

    for like in likes {
        let Some(handle) = like.pointer("/actor/handle").and_then(Value::as_str) else {
            continue;
        };
        tally.add(handle, || LikeStat {
            did: like.pointer("/actor/did").and_then(Value::as_str).map(str::to_string),
            handle: Some(handle.to_string()),
            avatar: like.pointer("/actor/avatar").and_then(Value::as_str).map(str::to_string),
            count: 0,
        });
    }

    tally.top()
}

/// Like stats scanner
///
/// Like [`PostingStats`](super::PostingStats), a cancelled scan returns `None`.
pub struct LikeStats {
    account: Arc<BlueskyApi>,
    public: Arc<BlueskyApi>,
    scanner: Scanner,
    on_progress: Option<OnProgress>,
    progress: Mutex<[f64; 3]>,
}

impl LikeStats {
    /// `account` lists the user's like records; `public` reads feeds and likers
    pub fn new(account: Arc<BlueskyApi>, public: Arc<BlueskyApi>) -> Self {
        Self {
            account,
            public,
            scanner: Scanner::new(),
            on_progress: None,
            progress: Mutex::new([0.0; 3]),
        }
    }

    /// Report weighted progress after every page
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

    fn update_progress(&self, stage: Stage, value: f64) {
        let total = match self.progress.lock() {
            Ok(mut progress) => {
                progress[stage as usize] = value;
                progress
                    .iter()
                    .zip(PROGRESS_WEIGHTS)
                    .map(|(p, w)| p * w)
                    .sum::<f64>()
            }
            Err(_) => return,
        };

        if let Some(callback) = &self.on_progress {
            callback(total);
        }
    }

    fn reset_progress(&self) {
        if let Ok(mut progress) = self.progress.lock() {
            *progress = [0.0; 3];
        }
        if let Some(callback) = &self.on_progress {
            callback(0.0);
        }
    }

    /// Scan both directions over the last `days` days
    pub async fn find_likes(&self, days: f64) -> Result<Option<LikeStatsResult>> {
        let did = self.account.client().user_did()?;
        let ticket = self.scanner.start();
        let start = Utc::now();
        self.reset_progress();

        let (given, received) = tokio::join!(
            self.fetch_given_likes(&did, days, start, ticket.token()),
            self.fetch_received_likes(&did, days, start, ticket.token()),
        );

        let result = self.rank(given, received).await;
        let state = self.scanner.finish(&ticket);

        match result {
            Ok(_) if state == ScanState::Cancelled => Ok(None),
            Ok(result) => Ok(Some(result)),
            Err(e) => Err(e),
        }
    }

    async fn rank(&self, given: Result<Vec<Value>>, received: Result<Vec<Value>>) -> Result<LikeStatsResult> {
        let received_likes = sum_up_received_likes(&received?);
        let mut given_likes = sum_up_given_likes(&given?);

        let dids: Vec<String> = given_likes.iter().filter_map(|s| s.did.clone()).collect();
        if !dids.is_empty() {
            let profiles = self.public.get_profiles(&dids).await?;
            let by_did: HashMap<&str, &Value> = profiles
                .iter()
                .filter_map(|p| Some((p.get("did")?.as_str()?, p)))
                .collect();

            for stat in &mut given_likes {
                if let Some(profile) = stat.did.as_deref().and_then(|did| by_did.get(did)) {
                    stat.handle = profile.get("handle").and_then(Value::as_str).map(str::to_string);
                    stat.avatar = profile.get("avatar").and_then(Value::as_str).map(str::to_string);
                }
            }
        }

        Ok(LikeStatsResult {
            given_likes,
            received_likes,
        })
    }

    async fn fetch_given_likes(
        &self,
        did: &str,
        days: f64,
        start: DateTime<Utc>,
        cancel: CancelToken,
    ) -> Result<Vec<Value>> {
        let cutoff = cutoff_for_days(days);

        self.account
            .client()
            .fetch_all(
                "com.atproto.repo.listRecords",
                FetchAllOptions::new("records")
                    .params(
                        Params::new()
                            .with("repo", did)
                            .with("collection", "app.bsky.feed.like")
                            .with("limit", PAGE_LIMIT),
                    )
                    .break_when(move |record| like_time(record).is_some_and(|time| time < cutoff))
                    .on_page_load(|page| {
                        if let Some(progress) = page_progress(page, start, days, like_time) {
                            self.update_progress(Stage::LikeRecords, progress);
                        }
                        PageControl::Continue
                    })
                    .cancel_token(cancel),
            )
            .await
    }

    async fn fetch_received_likes(
        &self,
        did: &str,
        days: f64,
        start: DateTime<Utc>,
        cancel: CancelToken,
    ) -> Result<Vec<Value>> {
        let options = ScanOptions::new()
            .cancel_token(cancel.clone())
            .on_page_load(|page| {
                if let Some(progress) = page_progress(page, start, days, feed_post_time) {
                    self.update_progress(Stage::Posts, progress);
                }
                PageControl::Continue
            });

        let own_posts = self
            .public
            .load_user_timeline(did, days, AuthorFeedFilter::PostsWithReplies, options)
            .await?;

        let liked: Vec<&str> = own_posts
            .iter()
            .filter(|item| item.get("reason").is_none_or(Value::is_null))
            .filter(|item| lenient_count(item.pointer("/post/likeCount")).is_some_and(|n| n > 0))
            .filter_map(|item| item.pointer("/post/uri").and_then(Value::as_str))
            .collect();

        let mut likes = Vec::new();

        for (i, batch) in liked.chunks(LIKES_BATCH).enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            self.update_progress(Stage::PostLikes, (i * LIKES_BATCH) as f64 / liked.len() as f64);

            let requests = batch.iter().map(|uri| {
                self.public.client().fetch_all(
                    "app.bsky.feed.getLikes",
                    FetchAllOptions::new("likes")
                        .params(Params::new().with("uri", uri).with("limit", PAGE_LIMIT)),
                )
            });

            for result in join_all(requests).await {
                likes.extend(result?);
            }
        }

        self.update_progress(Stage::PostLikes, 1.0);
        Ok(likes)
    }
}
