//! Upstream search item parsing
//!
//! Each entry of a search page is parsed on its own so that one malformed
//! entry never prevents its siblings from being ingested.

use crate::storage::NewItem;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Wire format of `snippet.publishedAt`
pub const PUBLISHED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Why a single search entry could not be turned into an item
#[derive(Debug, Error, PartialEq)]
pub enum ItemError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("unparsable publishedAt {value:?}: {reason}")]
    BadTimestamp { value: String, reason: String },

    #[error("unexpected item shape: {0}")]
    Shape(String),
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: Option<RawId>,
    snippet: Option<RawSnippet>,
}

#[derive(Debug, Deserialize)]
struct RawId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSnippet {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    thumbnails: Option<RawThumbnails>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnails {
    default: Option<RawThumbnail>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

/// Extracts `id.videoId` without validating the rest of the entry
pub fn external_id(value: &Value) -> Option<&str> {
    value
        .get("id")
        .and_then(|id| id.get("videoId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Parses `snippet.publishedAt` in the fixed upstream format
pub fn parse_published_at(value: &str) -> Result<DateTime<Utc>, ItemError> {
    NaiveDateTime::parse_from_str(value, PUBLISHED_AT_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| ItemError::BadTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Parses one search entry into an item ingested under `query`
pub fn parse_item(value: &Value, query: &str) -> Result<NewItem, ItemError> {
    let raw = RawItem::deserialize(value).map_err(|e| ItemError::Shape(e.to_string()))?;

    let external_id = raw
        .id
        .and_then(|id| id.video_id)
        .filter(|id| !id.is_empty())
        .ok_or(ItemError::MissingField("id.videoId"))?;
    let snippet = raw.snippet.ok_or(ItemError::MissingField("snippet"))?;

    let published_at = snippet
        .published_at
        .ok_or(ItemError::MissingField("snippet.publishedAt"))?;
    let published_at = parse_published_at(&published_at)?;

    let title = snippet
        .title
        .ok_or(ItemError::MissingField("snippet.title"))?;
    let description = snippet
        .description
        .ok_or(ItemError::MissingField("snippet.description"))?;
    let thumbnail_url = snippet
        .thumbnails
        .and_then(|t| t.default)
        .and_then(|t| t.url)
        .ok_or(ItemError::MissingField("snippet.thumbnails.default.url"))?;

    Ok(NewItem {
        external_id,
        title,
        description,
        published_at,
        thumbnail_url,
        query: query.to_string(),
    })
}
