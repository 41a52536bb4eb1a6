//! Which host answers which call
//!
//! Reads go to the user's PDS when logged in and not incognito, and to the
//! AppView otherwise. Quote lookups, backlinks and timeline scans each have
//! their own host. All clients share one handle cache.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::bluesky::BlueskyApi;
use super::handle_cache::HandleCache;
use super::identity;
use super::transport::HttpTransport;
use super::xrpc::XrpcClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::links;
use crate::models::{AtUri, Author, Post, PostPosition};
use crate::session::{Session, SessionStore, Settings};
use crate::store::SharedStore;

/// Collection of post records
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// The set of API clients the app talks through
pub struct ApiContext {
    store: SharedStore,
    default_pds_host: String,
    account: Arc<BlueskyApi>,
    appview: Arc<BlueskyApi>,
    public: Arc<BlueskyApi>,
    blue: Arc<BlueskyApi>,
    constellation: Arc<BlueskyApi>,
    settings: RwLock<Settings>,
}

impl ApiContext {
    /// Build every client from the config; the account session is loaded from `store`
    pub fn new(config: &Config, store: SharedStore, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let handles = Arc::new(HandleCache::load(store.clone())?);
        let settings = Settings::load(&store)?;

        let anonymous = |host: &str| {
            Arc::new(
                BlueskyApi::new(
                    Arc::new(XrpcClient::new(host, transport.clone())),
                    handles.clone(),
                )
                .with_thread_depth(config.thread_depth),
            )
        };

        let account_client = XrpcClient::with_session_store(transport.clone(), SessionStore::new(store.clone()))?
            .with_refresh_margin(config.refresh_margin_secs);
        let account = Arc::new(
            BlueskyApi::new(Arc::new(account_client), handles.clone()).with_thread_depth(config.thread_depth),
        );

        Ok(Self {
            appview: anonymous(&config.appview_host),
            public: anonymous(&config.public_appview_host),
            blue: anonymous(&config.blue_host),
            constellation: anonymous(&config.constellation_host),
            account,
            store,
            default_pds_host: config.default_pds_host.clone(),
            settings: RwLock::new(settings),
        })
    }

    /// Client for general reads: the account unless logged out or incognito
    pub fn api(&self) -> Arc<BlueskyApi> {
        if self.account.client().is_logged_in() && !self.settings().incognito {
            self.account.clone()
        } else {
            self.appview.clone()
        }
    }

    /// Authenticated client on the user's PDS
    pub fn account(&self) -> Arc<BlueskyApi> {
        self.account.clone()
    }

    /// Anonymous AppView client
    pub fn appview(&self) -> Arc<BlueskyApi> {
        self.appview.clone()
    }

    /// Public AppView client used for long scans
    pub fn public(&self) -> Arc<BlueskyApi> {
        self.public.clone()
    }

    /// Quote count / quotes host
    pub fn blue(&self) -> Arc<BlueskyApi> {
        self.blue.clone()
    }

    /// Backlinks host
    pub fn constellation(&self) -> Arc<BlueskyApi> {
        self.constellation.clone()
    }

    /// Current session, if logged in
    pub fn session(&self) -> Option<Session> {
        self.account.client().session()
    }

    /// Current settings
    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn replace_settings(&self, settings: Settings) -> Result<()> {
        settings.save(&self.store)?;
        let mut guard = self
            .settings
            .write()
            .map_err(|_| Error::Storage("settings lock poisoned".to_string()))?;
        *guard = settings;
        Ok(())
    }

    /// Switch incognito browsing on or off
    pub fn set_incognito(&self, incognito: bool) -> Result<()> {
        self.replace_settings(Settings {
            incognito,
            ..self.settings()
        })
    }

    /// Find the user's PDS, log in there and load their avatar
    pub async fn log_in(&self, identifier: &str, password: &str) -> Result<Session> {
        let pds = identity::pds_endpoint_for_identifier(&self.appview, identifier, &self.default_pds_host).await?;
        tracing::info!("Logging in to {}", pds);

        self.account.client().log_in(&pds, identifier, password).await?;

        if let Err(e) = self.account.load_current_user_avatar().await {
            tracing::warn!("Couldn't load avatar: {}", e);
        }

        self.session().ok_or_else(|| Error::data("Login succeeded without a session"))
    }

    /// Forget the session and reset session-only settings
    pub fn log_out(&self) -> Result<()> {
        self.account.client().reset_tokens()?;
        self.replace_settings(self.settings().after_log_out())
    }

    /// at:// URI of a post given its web URL (or an at:// URI, returned as is)
    pub async fn post_uri_from_url(&self, url: &str) -> Result<String> {
        if url.starts_with("at://") {
            return Ok(AtUri::parse(url)?.to_string());
        }

        let parsed = links::parse_post_url(url)?;
        let did = if parsed.user.starts_with("did:") {
            parsed.user
        } else {
            self.appview.resolve_handle(&parsed.user).await?
        };

        Ok(AtUri::new(&did, POST_COLLECTION, &parsed.rkey).to_string())
    }

    /// One page of quotes of a post given by URL or at:// URI
    pub async fn get_quotes(&self, url_or_uri: &str, cursor: Option<&str>) -> Result<Value> {
        let uri = self.post_uri_from_url(url_or_uri).await?;
        self.blue.get_quotes(&uri, cursor).await
    }

    /// Load a post the current account can't see, with the author's profile
    pub async fn reload_blocked_post(&self, uri: &str) -> Result<Post> {
        let did = AtUri::parse(uri)?.repo;
        let api = self.api();

        let (post, profile) = tokio::join!(self.appview.load_post(uri), api.load_user_profile(&did));

        let mut post = Post::new(post?, PostPosition::default())?;
        if let Some(author) = Author::from_json(Some(&profile?)) {
            post.author = author;
        }

        Ok(post)
    }
}
