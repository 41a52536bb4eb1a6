//! Post URLs: parsing web links and building them back

use url::Url;

use crate::error::UrlError;

/// Base URL of the web app that profile and post links point to
pub const WEB_APP_URL: &str = "https://bsky.app";

/// Author and record key extracted from a post URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostUrl {
    /// Handle or DID from the path
    pub user: String,
    /// Record key of the post
    pub rkey: String,
}

/// Parse `http(s)://{host}/profile/{handle-or-did}/post/{rkey}`
///
/// The host is not checked, so mirrors of the web app work too.
pub fn parse_post_url(input: &str) -> Result<PostUrl, UrlError> {
    let url = Url::parse(input).map_err(|e| UrlError::InvalidSyntax(e.to_string()))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(UrlError::UnsupportedScheme);
    }

    let parts: Vec<&str> = url.path().split('/').collect();

    if parts.len() < 5 || parts[1] != "profile" || parts[3] != "post" {
        return Err(UrlError::NotAPostPath);
    }

    if parts[2].is_empty() || parts[4].is_empty() {
        return Err(UrlError::NotAPostPath);
    }

    Ok(PostUrl {
        user: parts[2].to_string(),
        rkey: parts[4].to_string(),
    })
}

/// `https://bsky.app/profile/{handle-or-did}`
pub fn profile_url(handle_or_did: &str) -> String {
    format!("{WEB_APP_URL}/profile/{handle_or_did}")
}

/// `https://bsky.app/profile/{handle-or-did}/post/{rkey}`
pub fn post_url(handle_or_did: &str, rkey: &str) -> String {
    format!("{}/post/{}", profile_url(handle_or_did), rkey)
}

/// Avatar CDN URL for a blob
pub fn avatar_url(did: &str, cid: &str) -> String {
    format!("https://cdn.bsky.app/img/avatar/plain/{did}/{cid}@jpeg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert_eq!(
            parse_post_url("https://bsky.app/profile/mackuba.eu/post/3kxyz").unwrap(),
            PostUrl {
                user: "mackuba.eu".into(),
                rkey: "3kxyz".into()
            }
        );

        let did = parse_post_url("http://example.com/profile/did:plc:abc/post/3k/extra").unwrap();
        assert_eq!(did.user, "did:plc:abc");
        assert_eq!(did.rkey, "3k");
    }

    #[test]
    fn test_each_failure_has_its_own_reason() {
        assert!(matches!(
            parse_post_url("not a url"),
            Err(UrlError::InvalidSyntax(_))
        ));
        assert_eq!(
            parse_post_url("ftp://bsky.app/profile/a/post/b"),
            Err(UrlError::UnsupportedScheme)
        );
        assert_eq!(
            parse_post_url("mailto:someone@example.com"),
            Err(UrlError::UnsupportedScheme)
        );
        assert_eq!(
            parse_post_url("https://bsky.app/profile/a"),
            Err(UrlError::NotAPostPath)
        );
        assert_eq!(
            parse_post_url("https://bsky.app/profile/a/feed/b"),
            Err(UrlError::NotAPostPath)
        );
        assert_eq!(
            parse_post_url("https://bsky.app/profile//post/"),
            Err(UrlError::NotAPostPath)
        );
    }

    #[test]
    fn test_link_builders() {
        assert_eq!(post_url("a.test", "3k"), "https://bsky.app/profile/a.test/post/3k");
        assert_eq!(
            avatar_url("did:plc:a", "bafk"),
            "https://cdn.bsky.app/img/avatar/plain/did:plc:a/bafk@jpeg"
        );
    }
}
