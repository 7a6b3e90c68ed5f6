use serde::Deserialize;
use serde_json::Value;

use super::types::{normalize_link, normalize_thumbnail, FeedItem, Preview};

/// `{kind, data: {after, children}}` as returned by the listing endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ListingEnvelope {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingData {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<Value>,
}

/// A parsed page: the continuation cursor plus normalized items in server order.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub after: Option<String>,
    pub items: Vec<FeedItem>,
}

pub(crate) fn parse_listing(body: Value) -> Result<ListingPage, serde_json::Error> {
    let envelope: ListingEnvelope = serde_json::from_value(body)?;
    let ListingData { after, children } = envelope.data;
    let after = after.filter(|a| !a.is_empty());
    Ok(ListingPage {
        after,
        items: children.iter().map(normalize).collect(),
    })
}

/// Map a raw listing child onto a [`FeedItem`].
///
/// Accepts either the `{kind, data}` wrapper or the bare data object. This
/// never fails: fields with the wrong type read as empty/zero, media fields
/// fall back to the placeholder and a preview that does not match the
/// expected shape becomes `None`.
pub fn normalize(raw: &Value) -> FeedItem {
    let data = match raw.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => raw,
    };

    FeedItem {
        id: string_field(data, "id"),
        title: string_field(data, "title"),
        author: string_field(data, "author"),
        topic: string_field(data, "subreddit"),
        created_at: data
            .get("created_utc")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        comment_count: data
            .get("num_comments")
            .and_then(as_count)
            .unwrap_or(0),
        score: data.get("score").and_then(as_score).unwrap_or(0),
        body_text: string_field(data, "selftext"),
        link_url: normalize_link(data.get("url").and_then(Value::as_str)),
        thumbnail_url: normalize_thumbnail(data.get("thumbnail").and_then(Value::as_str)),
        preview: data.get("preview").and_then(parse_preview),
    }
}

fn string_field(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        // Some APIs send numeric ids
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn as_count(v: &Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

fn as_score(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

fn parse_preview(v: &Value) -> Option<Preview> {
    if v.is_null() {
        return None;
    }
    match serde_json::from_value::<Preview>(v.clone()) {
        Ok(preview) if !preview.images.is_empty() => Some(preview),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping malformed preview");
            None
        }
    }
}
