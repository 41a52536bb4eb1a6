//! Logged-in session and persisted user settings

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{self, SharedStore};

/// Credentials of the logged-in account
///
/// Only constructed when all four core fields are known, so a `Session`
/// value always means "logged in".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Short-lived JWT sent as the bearer token
    pub access_token: String,
    /// Long-lived JWT used to obtain a new access token
    pub refresh_token: String,
    /// DID of the account
    pub did: String,
    /// Host of the account's PDS (no scheme)
    pub pds_endpoint: String,
    /// Avatar URL, loaded lazily
    pub avatar: Option<String>,
}

/// On-disk shape of the session blob; every field may be missing
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredUser {
    #[serde(rename = "accessToken", default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(rename = "refreshToken", default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(rename = "userDID", default, skip_serializing_if = "Option::is_none")]
    did: Option<String>,
    #[serde(rename = "pdsEndpoint", default, skip_serializing_if = "Option::is_none")]
    pds_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar: Option<String>,
}

impl StoredUser {
    fn into_session(self) -> Option<Session> {
        Some(Session {
            access_token: self.access_token?,
            refresh_token: self.refresh_token?,
            did: self.did?,
            pds_endpoint: self.pds_endpoint?,
            avatar: self.avatar,
        })
    }
}

impl From<&Session> for StoredUser {
    fn from(session: &Session) -> Self {
        Self {
            access_token: Some(session.access_token.clone()),
            refresh_token: Some(session.refresh_token.clone()),
            did: Some(session.did.clone()),
            pds_endpoint: Some(session.pds_endpoint.clone()),
            avatar: session.avatar.clone(),
        }
    }
}

/// Reads and writes the session blob in a key-value store
#[derive(Clone)]
pub struct SessionStore {
    store: SharedStore,
}

impl SessionStore {
    /// Wrap a store
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// The persisted session, if it is complete
    pub fn load(&self) -> Result<Option<Session>> {
        let stored: Option<StoredUser> = store::load_json(self.store.as_ref(), store::USER_DATA_KEY)?;
        Ok(stored.and_then(StoredUser::into_session))
    }

    /// Persist a session, replacing the previous one
    pub fn save(&self, session: &Session) -> Result<()> {
        store::save_json(
            self.store.as_ref(),
            store::USER_DATA_KEY,
            &StoredUser::from(session),
        )
    }

    /// Forget the session
    pub fn clear(&self) -> Result<()> {
        self.store.remove(store::USER_DATA_KEY)
    }
}

/// User-facing preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Locale used to format dates
    #[serde(rename = "dateLocale", default, skip_serializing_if = "Option::is_none")]
    pub date_locale: Option<String>,

    /// Browse anonymously through the public AppView even when logged in
    #[serde(default)]
    pub incognito: bool,

    /// Hide posts with infohazard content warnings
    #[serde(default)]
    pub biohazard: Option<bool>,
}

impl Settings {
    /// Load settings, defaulting when absent
    pub fn load(store: &SharedStore) -> Result<Self> {
        Ok(store::load_json(store.as_ref(), store::SETTINGS_KEY)?.unwrap_or_default())
    }

    /// Persist settings
    pub fn save(&self, store: &SharedStore) -> Result<()> {
        store::save_json(store.as_ref(), store::SETTINGS_KEY, self)
    }

    /// Settings after a logout: incognito only makes sense while logged in
    pub fn after_log_out(&self) -> Self {
        Self {
            incognito: false,
            ..self.clone()
        }
    }
}
