//! Application services built on the API clients
//!
//! The scanners (posting stats, like stats, timeline search) share one
//! shape: fetch a time window page by page, report progress after each
//! page, aggregate at the end. Only one scan runs per instance; starting
//! another cancels the first.

pub mod feed_pager;
pub mod like_stats;
pub mod posting_stats;
pub mod scan;
pub mod thread_loader;
pub mod timeline_search;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use feed_pager::{FeedPage, HashtagPager, QuotesPager};
pub use like_stats::{LikeStat, LikeStats, LikeStatsResult};
pub use posting_stats::{PostingStats, PostingStatsResult, PostingStatsRow, Sums, UserWithHandle};
pub use scan::{ScanState, ScanTicket, Scanner};
pub use thread_loader::ThreadLoader;
pub use timeline_search::TimelineSearch;

/// Progress callback; receives a fraction between 0 and 1
pub type OnProgress = Box<dyn Fn(f64) + Send + Sync>;

/// Days between `time` and `start`
pub(crate) fn days_since(start: DateTime<Utc>, time: DateTime<Utc>) -> f64 {
    (start - time).num_milliseconds() as f64 / 86_400_000.0
}

/// `min(1, days covered / requested days)` for the last item of a page
pub(crate) fn page_progress(
    page: &[Value],
    start: DateTime<Utc>,
    requested_days: f64,
    time_of: impl Fn(&Value) -> Option<DateTime<Utc>>,
) -> Option<f64> {
    let last = time_of(page.last()?)?;
    Some(window_fraction(days_since(start, last), requested_days))
}

/// Covered share of the requested window, clamped to `0..=1`
pub(crate) fn window_fraction(days: f64, requested_days: f64) -> f64 {
    if requested_days <= 0.0 {
        return 1.0;
    }
    (days / requested_days).clamp(0.0, 1.0)
}
