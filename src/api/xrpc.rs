//! XRPC request layer: auth modes, token refresh and response parsing

use std::sync::{Arc, RwLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use super::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::error::{AuthError, Error, Result};
use crate::session::{Session, SessionStore};

/// Default margin before expiry at which the access token is refreshed
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 60;

/// How a request authenticates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    /// Send the session's access token if there is a session
    #[default]
    Default,
    /// Never send an Authorization header
    None,
    /// Send the session's access token; fail if there isn't one
    Required,
    /// Send this exact token
    Token(String),
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Auth mode
    pub auth: Auth,
    /// Extra headers
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    /// Options with a specific auth mode
    pub fn auth(auth: Auth) -> Self {
        Self {
            auth,
            headers: Vec::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Query parameters; repeated keys encode array values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Empty parameter list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key/value pair
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    /// Append a pair only if the value is present
    pub fn with_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    /// Append one pair per value
    pub fn with_all<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        for value in values {
            self.0.push((key.to_string(), value.to_string()));
        }
        self
    }

    /// Replace every value of `key` with a single one
    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.0.retain(|(k, _)| k != key);
        self.0.push((key.to_string(), value.to_string()));
    }

    /// First value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True if there are no parameters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// `https://{host}/xrpc`, adding the scheme when the host has none
pub fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.contains("://") {
        format!("{host}/xrpc")
    } else {
        format!("https://{host}/xrpc")
    }
}

/// Read the `exp` claim (seconds since epoch) from a JWT
pub fn token_expiry(token: &str) -> Result<i64> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidTokenFormat.into());
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| AuthError::InvalidTokenExpiry)?;
    let claims: Value =
        serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidTokenExpiry)?;

    claims
        .get("exp")
        .and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64)))
        .ok_or_else(|| AuthError::InvalidTokenExpiry.into())
}

/// Client for one XRPC host, optionally carrying a session
pub struct XrpcClient {
    host: Option<String>,
    transport: Arc<dyn HttpTransport>,
    session: RwLock<Option<Session>>,
    sessions: Option<SessionStore>,
    refresh_lock: Mutex<()>,
    refresh_margin_secs: i64,
}

impl XrpcClient {
    /// Anonymous client for a fixed host
    pub fn new(host: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            host: Some(host.to_string()),
            transport,
            session: RwLock::new(None),
            sessions: None,
            refresh_lock: Mutex::new(()),
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
        }
    }

    /// Account client: talks to the session's PDS and manages its tokens
    pub fn with_session_store(
        transport: Arc<dyn HttpTransport>,
        sessions: SessionStore,
    ) -> Result<Self> {
        let session = sessions.load()?;
        Ok(Self {
            host: None,
            transport,
            session: RwLock::new(session),
            sessions: Some(sessions),
            refresh_lock: Mutex::new(()),
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
        })
    }

    /// Override the refresh margin
    pub fn with_refresh_margin(mut self, secs: i64) -> Self {
        self.refresh_margin_secs = secs;
        self
    }

    /// Host requests go to, if known
    pub fn host(&self) -> Option<String> {
        self.host
            .clone()
            .or_else(|| self.session().map(|s| s.pds_endpoint))
    }

    /// Underlying transport, for non-XRPC fetches like DID documents
    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    /// True when all session fields are present
    pub fn is_logged_in(&self) -> bool {
        self.session().is_some()
    }

    /// DID of the logged-in user
    pub fn user_did(&self) -> Result<String> {
        self.session()
            .map(|s| s.did)
            .ok_or_else(|| AuthError::NotLoggedIn.into())
    }

    fn manages_tokens(&self) -> bool {
        self.sessions.is_some()
    }

    fn access_token(&self) -> Option<String> {
        self.session().map(|s| s.access_token)
    }

    fn store_session(&self, session: Option<Session>) -> Result<()> {
        if let Some(sessions) = &self.sessions {
            match &session {
                Some(s) => sessions.save(s)?,
                None => sessions.clear()?,
            }
        }

        let mut guard = self
            .session
            .write()
            .map_err(|_| Error::Storage("session lock poisoned".to_string()))?;
        *guard = session;
        Ok(())
    }

    /// Update the session's avatar URL
    pub fn set_avatar(&self, avatar: Option<String>) -> Result<()> {
        match self.session() {
            Some(mut session) => {
                session.avatar = avatar;
                self.store_session(Some(session))
            }
            None => Err(AuthError::NotLoggedIn.into()),
        }
    }

    /// GET `/xrpc/{method}`
    pub async fn get_request(
        &self,
        method: &str,
        params: &Params,
        options: &RequestOptions,
    ) -> Result<Value> {
        self.request(Method::Get, method, params, None, options).await
    }

    /// GET with default options
    pub async fn get(&self, method: &str, params: &Params) -> Result<Value> {
        self.get_request(method, params, &RequestOptions::default())
            .await
    }

    /// POST `/xrpc/{method}` with an optional JSON body
    pub async fn post_request(
        &self,
        method: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<Value> {
        self.request(Method::Post, method, &Params::new(), body, options)
            .await
    }

    async fn request(
        &self,
        verb: Method,
        method: &str,
        params: &Params,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<Value> {
        let uses_session = match options.auth {
            Auth::Default => self.is_logged_in(),
            Auth::Required => true,
            Auth::None | Auth::Token(_) => false,
        };

        if uses_session && self.manages_tokens() {
            self.ensure_fresh().await?;
        }

        let token = match &options.auth {
            Auth::Token(token) => Some(token.clone()),
            Auth::None => None,
            _ if uses_session => Some(
                self.access_token()
                    .ok_or(AuthError::MissingAccessToken)?,
            ),
            _ => None,
        };

        let result = self
            .send(verb, method, params, body, token.as_deref(), &options.headers)
            .await;

        match (result, token) {
            (Err(e), Some(stale)) if uses_session && self.manages_tokens() && e.is_token_error() => {
                tracing::debug!("{} rejected the access token, refreshing", method);
                self.refresh_if_stale(&stale).await?;
                let fresh = self.access_token().ok_or(AuthError::MissingAccessToken)?;
                self.send(verb, method, params, body, Some(&fresh), &options.headers)
                    .await
            }
            (result, _) => result,
        }
    }

    async fn send(
        &self,
        verb: Method,
        method: &str,
        params: &Params,
        body: Option<&Value>,
        token: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Value> {
        let host = self
            .host()
            .ok_or_else(|| Error::Request("Hostname not set".to_string()))?;
        self.send_to(&host, verb, method, params, body, token, extra_headers)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_to(
        &self,
        host: &str,
        verb: Method,
        method: &str,
        params: &Params,
        body: Option<&Value>,
        token: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Value> {
        let mut url = url::Url::parse(&format!("{}/{}", base_url(host), method))
            .map_err(|e| Error::Request(format!("invalid host {host}: {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.pairs());
        }

        let mut headers = Vec::new();
        if let Some(token) = token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        let body = match body {
            Some(value) => {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                Some(serde_json::to_vec(value)?)
            }
            None => None,
        };

        headers.extend(extra_headers.iter().cloned());

        let response = self
            .transport
            .send(HttpRequest {
                method: verb,
                url: url.to_string(),
                headers,
                body,
            })
            .await?;

        parse_response(response)
    }

    /// Refresh the access token first if it expires within the margin
    async fn ensure_fresh(&self) -> Result<()> {
        let token = self.access_token().ok_or(AuthError::MissingAccessToken)?;
        let expiry = token_expiry(&token)?;

        if expiry < Utc::now().timestamp() + self.refresh_margin_secs {
            self.refresh_if_stale(&token).await?;
        }

        Ok(())
    }

    /// Refresh unless another caller already replaced `stale` while we waited
    async fn refresh_if_stale(&self, stale: &str) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        match self.access_token() {
            Some(current) if current != stale => Ok(()),
            Some(_) => self.refresh_access_token().await,
            None => Err(AuthError::NotLoggedIn.into()),
        }
    }

    async fn refresh_access_token(&self) -> Result<()> {
        let session = self.session().ok_or(AuthError::NotLoggedIn)?;
        tracing::info!("Refreshing access token for {}", session.did);

        let result = self
            .send(
                Method::Post,
                "com.atproto.server.refreshSession",
                &Params::new(),
                None,
                Some(&session.refresh_token),
                &[],
            )
            .await;

        match result {
            Ok(json) => {
                self.save_tokens(&json)?;
                tracing::info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                if matches!(e.status(), Some(400 | 401)) {
                    tracing::warn!("Server rejected refresh token, logging out: {}", e);
                    self.store_session(None)?;
                } else {
                    tracing::warn!("Token refresh failed: {}", e);
                }
                Err(AuthError::RefreshFailed(e.to_string()).into())
            }
        }
    }

    /// Log in on `pds_host` and adopt the returned session
    pub async fn log_in(&self, pds_host: &str, identifier: &str, password: &str) -> Result<Value> {
        let body = serde_json::json!({ "identifier": identifier, "password": password });
        let json = self
            .send_to(
                pds_host,
                Method::Post,
                "com.atproto.server.createSession",
                &Params::new(),
                Some(&body),
                None,
                &[],
            )
            .await?;

        self.save_tokens_with_host(&json, Some(pds_host))?;
        Ok(json)
    }

    /// Adopt tokens from a createSession/refreshSession response
    pub fn save_tokens(&self, json: &Value) -> Result<()> {
        self.save_tokens_with_host(json, None)
    }

    fn save_tokens_with_host(&self, json: &Value, login_host: Option<&str>) -> Result<()> {
        let field = |name: &str| {
            json.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::data(format!("Missing {name} in session response")))
        };

        let previous = self.session();
        let pds_endpoint = pds_from_did_doc(json)
            .or_else(|| login_host.map(str::to_string))
            .or_else(|| previous.as_ref().map(|s| s.pds_endpoint.clone()))
            .or_else(|| self.host.clone())
            .ok_or_else(|| Error::data("Missing PDS endpoint in session response"))?;

        let session = Session {
            access_token: field("accessJwt")?,
            refresh_token: field("refreshJwt")?,
            did: field("did")?,
            pds_endpoint,
            avatar: previous.and_then(|s| s.avatar),
        };

        self.store_session(Some(session))
    }

    /// Drop the session (tokens, DID, PDS and avatar)
    pub fn reset_tokens(&self) -> Result<()> {
        self.store_session(None)
    }
}

/// The `#atproto_pds` endpoint declared in a DID document, without `https://`
pub fn pds_service_endpoint(doc: &Value) -> Option<String> {
    doc.get("service")?
        .as_array()?
        .iter()
        .find(|s| s.get("id").and_then(Value::as_str) == Some("#atproto_pds"))?
        .get("serviceEndpoint")?
        .as_str()
        .map(|endpoint| endpoint.replacen("https://", "", 1))
}

fn pds_from_did_doc(json: &Value) -> Option<String> {
    json.get("didDoc").and_then(pds_service_endpoint)
}

/// Map a raw response to JSON or an API error
pub fn parse_response(response: HttpResponse) -> Result<Value> {
    let text = response.body.trim();
    let success = (200..300).contains(&response.status);

    if text.is_empty() {
        return if success {
            Ok(Value::Null)
        } else {
            Err(Error::Api {
                status: response.status,
                body: None,
            })
        };
    }

    if success {
        Ok(serde_json::from_str(text)?)
    } else {
        let body = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
        Err(Error::Api {
            status: response.status,
            body: Some(body),
        })
    }
}
