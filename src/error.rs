//! Error types shared by every layer of the client

use serde_json::Value;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error codes the server uses for tokens that must be refreshed
pub const TOKEN_ERROR_CODES: &[&str] = &["InvalidToken", "ExpiredToken"];

/// Everything that can go wrong talking to the network or parsing its data
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed post URL or at:// URI (user input, never retried)
    #[error(transparent)]
    Url(#[from] UrlError),

    /// Missing, malformed or rejected credentials
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Non-2xx response from the server
    #[error("API error status {status}{}", describe_body(.body))]
    Api {
        /// HTTP status code
        status: u16,
        /// Parsed JSON body, if the response had one
        body: Option<Value>,
    },

    /// The call succeeded but the payload is not what it should be
    #[error("unexpected response data: {0}")]
    Data(String),

    /// DID or DID document problems
    #[error(transparent)]
    Did(#[from] DidError),

    /// Login identifier is neither a handle, an email nor a DID
    #[error("Please enter your handle or DID.")]
    InvalidIdentifier,

    /// The backlinks service doesn't know this post (old post or unsupported)
    #[error("hidden replies are not available for this post")]
    HiddenRepliesUnavailable,

    /// Invalid options passed to a request helper
    #[error("invalid request: {0}")]
    Request(String),

    /// Transport-level failure, propagated as is
    #[error("network error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body was not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Key-value store failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Shorthand for a data contract violation
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// HTTP status of an API error
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The `error` code string from an API error body
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Api { body: Some(body), .. } => body.get("error").and_then(Value::as_str),
            _ => None,
        }
    }

    /// True for a 400 carrying `InvalidToken` or `ExpiredToken`
    pub fn is_token_error(&self) -> bool {
        self.status() == Some(400)
            && self
                .error_code()
                .is_some_and(|code| TOKEN_ERROR_CODES.contains(&code))
    }

    /// True if the user has to log in again to recover
    pub const fn requires_login(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

fn describe_body(body: &Option<Value>) -> String {
    body.as_ref().map(|b| format!(": {b}")).unwrap_or_default()
}

/// Reasons a post URL or at:// URI is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    /// Not parseable as a URL at all
    #[error("invalid URL: {0}")]
    InvalidSyntax(String),
    /// Scheme other than http/https
    #[error("URL must start with http(s)://")]
    UnsupportedScheme,
    /// Path isn't `/profile/{user}/post/{rkey}`
    #[error("This is not a valid thread URL")]
    NotAPostPath,
    /// Doesn't start with `at://`
    #[error("Not an at:// URI: {0}")]
    NotAtUri(String),
    /// Wrong number of segments
    #[error("Invalid at:// URI: {0}")]
    InvalidAtUri(String),
}

/// Authentication failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No session, but the call requires one
    #[error("Not logged in")]
    NotLoggedIn,
    /// Auth headers requested without an access token
    #[error("Can't send auth headers, access token is missing")]
    MissingAccessToken,
    /// Access token isn't a three-part JWT
    #[error("Invalid access token format")]
    InvalidTokenFormat,
    /// JWT payload has no usable `exp`
    #[error("Invalid token expiry data")]
    InvalidTokenExpiry,
    /// Token refresh didn't succeed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

/// DID resolution failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DidError {
    /// Neither `did:plc:` nor `did:web:`
    #[error("Unknown DID type: {0}")]
    UnknownMethod(String),
    /// DID document has no `#atproto_pds` service
    #[error("Missing #atproto_pds service definition")]
    MissingPdsService,
}
