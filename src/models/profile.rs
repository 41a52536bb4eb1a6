//! Author profile snapshots embedded in post views

use serde::{Deserialize, Serialize};

/// Handle the server reports when a DID's handle can't be verified
pub const INVALID_HANDLE: &str = "handle.invalid";

/// Profile of a post author (profileViewBasic)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Account DID
    #[serde(default)]
    pub did: String,

    /// Current handle
    #[serde(default)]
    pub handle: String,

    /// Display name
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    /// Relationship to the logged-in user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ActorViewer>,
}

/// Viewer state of an actor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorViewer {
    /// Muted directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,

    /// Muted through a mute list
    #[serde(rename = "mutedByList", default, skip_serializing_if = "Option::is_none")]
    pub muted_by_list: Option<ListBasic>,

    /// URI of the viewer's block record, if the viewer blocks this actor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<String>,

    /// This actor blocks the viewer
    #[serde(rename = "blockedBy", default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<bool>,
}

/// Minimal list view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBasic {
    /// List name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Author {
    /// Parse a JSON profile; `None` if absent or malformed
    pub fn from_json(json: Option<&serde_json::Value>) -> Option<Self> {
        json.and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Display name, or the handle without `.bsky.social`
    pub fn display_name_or_handle(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self
                .handle
                .strip_suffix(".bsky.social")
                .unwrap_or(&self.handle),
        }
    }

    /// False when the server couldn't verify the handle
    pub fn has_valid_handle(&self) -> bool {
        self.handle != INVALID_HANDLE
    }

    /// Handle if valid, DID otherwise
    pub fn handle_or_did(&self) -> &str {
        if self.has_valid_handle() {
            &self.handle
        } else {
            &self.did
        }
    }
}
