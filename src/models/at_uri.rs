//! at:// record URIs

use std::fmt;
use std::str::FromStr;

use crate::error::UrlError;

/// `at://{repo}/{collection}/{rkey}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    /// DID (or handle) of the repository
    pub repo: String,
    /// Record collection NSID
    pub collection: String,
    /// Record key
    pub rkey: String,
}

impl AtUri {
    /// Parse an at:// URI
    pub fn parse(uri: &str) -> Result<Self, UrlError> {
        let Some(rest) = uri.strip_prefix("at://") else {
            return Err(UrlError::NotAtUri(uri.to_string()));
        };

        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [repo, collection, rkey] => Ok(Self {
                repo: repo.to_string(),
                collection: collection.to_string(),
                rkey: rkey.to_string(),
            }),
            _ => Err(UrlError::InvalidAtUri(uri.to_string())),
        }
    }

    /// Build a URI from its parts
    pub fn new(repo: &str, collection: &str, rkey: &str) -> Self {
        Self {
            repo: repo.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        }
    }
}

impl FromStr for AtUri {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.repo, self.collection, self.rkey)
    }
}
