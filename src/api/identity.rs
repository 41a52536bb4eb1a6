//! Finding the PDS that hosts an account

use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::Value;

use super::bluesky::BlueskyApi;
use super::transport::{HttpRequest, HttpTransport, Method};
use super::xrpc::pds_service_endpoint;
use crate::error::{DidError, Error, Result};

static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
static HANDLE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, input: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(input))
}

/// What kind of login identifier the user typed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// `did:...`
    Did(String),
    /// Email address
    Email(String),
    /// Handle, without a leading `@`
    Handle(String),
}

impl Identifier {
    /// Classify user input
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if input.starts_with("did:") {
            Ok(Self::Did(input.to_string()))
        } else if matches(&EMAIL_RE, r"^[^@]+@[^@]+$", input) {
            Ok(Self::Email(input.to_string()))
        } else if matches(&HANDLE_RE, r"^@?[\w\-]+(\.[\w\-]+)+$", input) {
            Ok(Self::Handle(input.trim_start_matches('@').to_string()))
        } else {
            Err(Error::InvalidIdentifier)
        }
    }
}

/// URL of the DID document for `did:plc:` and `did:web:` DIDs
pub fn did_document_url(did: &str) -> Result<String> {
    if did.starts_with("did:plc:") {
        Ok(format!("https://plc.directory/{did}"))
    } else if let Some(host) = did.strip_prefix("did:web:") {
        Ok(format!("https://{host}/.well-known/did.json"))
    } else {
        Err(DidError::UnknownMethod(did.to_string()).into())
    }
}

/// Fetch a DID document and read its `#atproto_pds` endpoint
pub async fn pds_endpoint_for_did(transport: &dyn HttpTransport, did: &str) -> Result<String> {
    let url = did_document_url(did)?;
    let response = transport
        .send(HttpRequest {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: None,
        })
        .await?;

    if response.status != 200 {
        return Err(Error::Api {
            status: response.status,
            body: serde_json::from_str(&response.body).ok(),
        });
    }

    let doc: Value = serde_json::from_str(&response.body)?;
    pds_service_endpoint(&doc).ok_or_else(|| DidError::MissingPdsService.into())
}

/// PDS host for a handle, email or DID
///
/// Emails can't be resolved, so they log in through `default_pds_host`.
pub async fn pds_endpoint_for_identifier(
    api: &BlueskyApi,
    identifier: &str,
    default_pds_host: &str,
) -> Result<String> {
    let transport = api.client().transport();

    match Identifier::parse(identifier)? {
        Identifier::Did(did) => pds_endpoint_for_did(transport.as_ref(), &did).await,
        Identifier::Email(_) => Ok(default_pds_host.to_string()),
        Identifier::Handle(handle) => {
            let did = api.resolve_handle(&handle).await?;
            pds_endpoint_for_did(transport.as_ref(), &did).await
        }
    }
}
