//! Post embeds: images, links, videos and quotes
//!
//! An embed comes in two shapes. A *raw* embed is read from the stored post
//! record and only carries references. An *inline* embed comes from a
//! hydrated post view and has quoted records fully resolved.

use serde_json::Value;

use super::record::{AnyRecord, Record};
use crate::thread::parse_view_record;

/// Where an embed was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedSource {
    /// Stored record (`app.bsky.embed.*`)
    Raw,
    /// Hydrated view (`app.bsky.embed.*#view`)
    Inline,
}

/// Image gallery
#[derive(Debug, Clone)]
pub struct ImageEmbed {
    /// Shape
    pub source: EmbedSource,
    /// Image entries as returned by the server
    pub images: Vec<Value>,
}

/// External link card
#[derive(Debug, Clone)]
pub struct LinkEmbed {
    /// Shape
    pub source: EmbedSource,
    /// Target URL
    pub url: Option<String>,
    /// Card title
    pub title: Option<String>,
    /// Card description (inline only)
    pub description: Option<String>,
    /// Thumbnail (blob ref when raw, URL when inline)
    pub thumb: Option<Value>,
}

/// Video
#[derive(Debug, Clone)]
pub struct VideoEmbed {
    /// Shape
    pub source: EmbedSource,
    /// Video blob ref (raw only)
    pub video: Option<Value>,
    /// HLS playlist URL (inline only)
    pub playlist_url: Option<String>,
    /// Alt text
    pub alt: Option<String>,
}

/// Quote of another record
#[derive(Debug, Clone)]
pub struct RecordEmbed {
    /// Shape
    pub source: EmbedSource,
    /// Quoted record
    pub record: Box<AnyRecord>,
}

/// Quote with attached media
#[derive(Debug, Clone)]
pub struct RecordWithMediaEmbed {
    /// Shape
    pub source: EmbedSource,
    /// Quoted record
    pub record: Box<AnyRecord>,
    /// Attached media
    pub media: Box<Embed>,
}

/// Any embed
#[derive(Debug, Clone)]
pub enum Embed {
    /// Images
    Images(ImageEmbed),
    /// Link card
    Link(LinkEmbed),
    /// Video
    Video(VideoEmbed),
    /// Quoted record
    Record(RecordEmbed),
    /// Quoted record plus media
    RecordWithMedia(RecordWithMediaEmbed),
    /// Unrecognized `$type`, kept as is
    Unknown(Value),
}

fn str_at(json: &Value, pointer: &str) -> Option<String> {
    json.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn array_at(json: &Value, key: &str) -> Vec<Value> {
    json.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

impl Embed {
    /// Parse a hydrated embed from a post view
    pub fn parse_inline(json: &Value) -> Self {
        let source = EmbedSource::Inline;

        match json.get("$type").and_then(Value::as_str) {
            Some("app.bsky.embed.record#view") => Self::Record(RecordEmbed {
                source,
                record: Box::new(parse_view_record(&json["record"])),
            }),
            Some("app.bsky.embed.recordWithMedia#view") => {
                Self::RecordWithMedia(RecordWithMediaEmbed {
                    source,
                    record: Box::new(parse_view_record(&json["record"]["record"])),
                    media: Box::new(Self::parse_inline(&json["media"])),
                })
            }
            Some("app.bsky.embed.images#view") => Self::Images(ImageEmbed {
                source,
                images: array_at(json, "images"),
            }),
            Some("app.bsky.embed.external#view") => Self::Link(LinkEmbed {
                source,
                url: str_at(json, "/external/uri"),
                title: str_at(json, "/external/title"),
                description: str_at(json, "/external/description"),
                thumb: json.pointer("/external/thumb").cloned(),
            }),
            Some("app.bsky.embed.video#view") => Self::Video(VideoEmbed {
                source,
                video: None,
                playlist_url: str_at(json, "/playlist"),
                alt: str_at(json, "/alt"),
            }),
            other => {
                tracing::warn!("Unexpected embed type: {:?}", other);
                Self::Unknown(json.clone())
            }
        }
    }

    /// Parse a reference-only embed from a stored post record
    pub fn parse_raw(json: &Value) -> Self {
        let source = EmbedSource::Raw;

        match json.get("$type").and_then(Value::as_str) {
            Some("app.bsky.embed.record") => Self::Record(RecordEmbed {
                source,
                record: Box::new(AnyRecord::Generic(Record::new(json["record"].clone()))),
            }),
            Some("app.bsky.embed.recordWithMedia") => Self::RecordWithMedia(RecordWithMediaEmbed {
                source,
                record: Box::new(AnyRecord::Generic(Record::new(
                    json["record"]["record"].clone(),
                ))),
                media: Box::new(Self::parse_raw(&json["media"])),
            }),
            Some("app.bsky.embed.images") => Self::Images(ImageEmbed {
                source,
                images: array_at(json, "images"),
            }),
            Some("app.bsky.embed.external") => Self::Link(LinkEmbed {
                source,
                url: str_at(json, "/external/uri"),
                title: str_at(json, "/external/title"),
                description: None,
                thumb: json.pointer("/external/thumb").cloned(),
            }),
            Some("app.bsky.embed.video") => Self::Video(VideoEmbed {
                source,
                video: json.get("video").cloned(),
                playlist_url: None,
                alt: str_at(json, "/alt"),
            }),
            other => {
                tracing::warn!("Unexpected embed type: {:?}", other);
                Self::Unknown(json.clone())
            }
        }
    }

    /// Raw or inline; `None` for unknown embeds
    pub fn source(&self) -> Option<EmbedSource> {
        match self {
            Self::Images(e) => Some(e.source),
            Self::Link(e) => Some(e.source),
            Self::Video(e) => Some(e.source),
            Self::Record(e) => Some(e.source),
            Self::RecordWithMedia(e) => Some(e.source),
            Self::Unknown(_) => None,
        }
    }

    /// The quoted record, for quote embeds
    pub fn quoted_record(&self) -> Option<&AnyRecord> {
        match self {
            Self::Record(e) => Some(&e.record),
            Self::RecordWithMedia(e) => Some(&e.record),
            _ => None,
        }
    }
}
