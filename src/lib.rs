//! # Skythread 🧵
//!
//! A Bluesky thread reader and timeline scanner.
//!
//! ## Overview
//!
//! Skythread talks to the ATProto XRPC endpoints of a PDS, the Bluesky
//! AppView and two auxiliary services. It reconstructs full reply trees
//! (including replies the AppView hides), pages through quotes and hashtag
//! feeds, and scans timelines to rank who posts and who likes the most.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Services                             │
//! │  Thread loader, pagers, posting/like stats, timeline search │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │   ApiContext    │ │     Thread      │ │     Models      │
//! │                 │ │                 │ │                 │
//! │ • Account / PDS │ │ • Tree build    │ │ • Post, stubs   │
//! │ • AppView       │ │ • Reply order   │ │ • Embeds        │
//! │ • Quotes, links │ │ • Feed items    │ │ • Records       │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │   XrpcClient    │ │     Session     │ │      Store      │
//! │                 │ │                 │ │                 │
//! │ • Token refresh │ │ • Tokens, DID   │ │ • Encrypted     │
//! │ • fetch_all     │ │ • Settings      │ │ • In-memory     │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`api`]: XRPC client, pagination, identity and the Bluesky API
//! - [`config`]: Configuration management
//! - [`links`]: Parsing bsky.app URLs
//! - [`models`]: Posts, embeds, records and profiles
//! - [`services`]: Thread loading and timeline scanners
//! - [`session`]: Persisted login and user settings
//! - [`store`]: Key-value persistence
//! - [`thread`]: Building reply trees from API responses
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use skythread::api::{ApiContext, ReqwestTransport};
//! use skythread::services::ThreadLoader;
//! use skythread::store::MemoryStore;
//! use skythread::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(30))?);
//!     let context = Arc::new(ApiContext::new(&Config::default(), MemoryStore::shared(), transport)?);
//!     let root = ThreadLoader::new(context)
//!         .load_thread_from_url("https://bsky.app/profile/bsky.app/post/3l6oveex3ii2l")
//!         .await?;
//!     println!("{}", root.uri());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::similar_names)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::future_not_send)]

pub mod api;
pub mod config;
pub mod error;
pub mod links;
pub mod models;
pub mod paths;
pub mod services;
pub mod session;
pub mod store;
pub mod thread;

// Re-export main types for convenience
pub use config::Config;
pub use error::{Error, Result};
pub use models::{AnyPost, Post};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "skythread";
