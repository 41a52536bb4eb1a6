//! Cursor-driven "load more" lists: quotes of a post and hashtag search

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::api::{ApiContext, BlueskyApi};
use crate::error::{Error, Result};
use crate::models::{Post, PostPosition};

/// One loaded page
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Posts in server order
    pub posts: Vec<Post>,
    /// True when there is nothing more to load
    pub finished: bool,
}

#[derive(Debug, Default)]
struct PagerState {
    cursor: Option<String>,
    loading: bool,
    finished: bool,
}

/// Cursor bookkeeping; at most one page load at a time
#[derive(Debug, Default)]
struct Pager {
    state: Mutex<PagerState>,
}

impl Pager {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PagerState>> {
        self.state
            .lock()
            .map_err(|_| Error::Storage("pager lock poisoned".to_string()))
    }

    fn is_finished(&self) -> bool {
        self.lock().is_ok_and(|s| s.finished)
    }

    /// Load the next page; `None` while another load runs or after the last page
    async fn next<F, Fut>(&self, fetch: F) -> Result<Option<FeedPage>>
    where
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let cursor = {
            let mut state = self.lock()?;
            if state.loading || state.finished {
                return Ok(None);
            }
            state.loading = true;
            state.cursor.clone()
        };

        let _loading = LoadingGuard(self);
        let response = fetch(cursor).await?;

        let mut state = self.lock()?;
        state.cursor = response
            .get("cursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        state.finished = state.cursor.is_none();

        Ok(Some(FeedPage {
            posts: parse_posts(&response),
            finished: state.finished,
        }))
    }
}

/// Clears `loading` when a load ends, including when its future is dropped
struct LoadingGuard<'a>(&'a Pager);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.state.lock() {
            state.loading = false;
        }
    }
}

fn parse_posts(response: &Value) -> Vec<Post> {
    response
        .get("posts")
        .and_then(Value::as_array)
        .map(|posts| {
            posts
                .iter()
                .filter_map(|view| match Post::new(view.clone(), PostPosition::default()) {
                    Ok(post) => Some(post),
                    Err(e) => {
                        tracing::warn!("Skipping post in page: {}", e);
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Pages through the quotes of one post
pub struct QuotesPager {
    context: Arc<ApiContext>,
    url: String,
    pager: Pager,
}

impl QuotesPager {
    /// Quotes of the post at `url` (web URL or at:// URI)
    pub fn new(context: Arc<ApiContext>, url: &str) -> Self {
        Self {
            context,
            url: url.to_string(),
            pager: Pager::default(),
        }
    }

    /// True after the last page
    pub fn is_finished(&self) -> bool {
        self.pager.is_finished()
    }

    /// Next page of quotes
    pub async fn next_page(&self) -> Result<Option<FeedPage>> {
        self.pager
            .next(|cursor| async move { self.context.get_quotes(&self.url, cursor.as_deref()).await })
            .await
    }
}

/// Pages through the newest posts with a hashtag
pub struct HashtagPager {
    api: Arc<BlueskyApi>,
    tag: String,
    pager: Pager,
}

impl HashtagPager {
    /// Posts tagged `tag` (with or without the `#`)
    pub fn new(api: Arc<BlueskyApi>, tag: &str) -> Self {
        Self {
            api,
            tag: tag.trim_start_matches('#').to_string(),
            pager: Pager::default(),
        }
    }

    /// True after the last page
    pub fn is_finished(&self) -> bool {
        self.pager.is_finished()
    }

    /// Next page of posts
    pub async fn next_page(&self) -> Result<Option<FeedPage>> {
        self.pager
            .next(|cursor| async move { self.api.get_hashtag_feed(&self.tag, cursor.as_deref()).await })
            .await
    }
}
