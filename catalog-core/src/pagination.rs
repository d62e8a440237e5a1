//! Opaque page tokens and list slicing.
//!
//! Page tokens encode a position into the sorted, filtered snapshot. The
//! contract for clients is the round-trip invariant: iterating `pageToken`
//! until it comes back empty yields exactly `size` items, no duplicates, no
//! omissions.

use crate::error::CoreError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;

/// Default `pageSize` when the query omits one.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Upper bound on `pageSize` to keep responses bounded.
pub const MAX_PAGE_SIZE: usize = 1000;

const TOKEN_PREFIX: &str = "v1:";

pub fn encode_page_token(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{TOKEN_PREFIX}{offset}"))
}

pub fn decode_page_token(token: &str) -> Result<usize, CoreError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| CoreError::invalid("malformed page token"))?;
    let raw = String::from_utf8(raw).map_err(|_| CoreError::invalid("malformed page token"))?;
    raw.strip_prefix(TOKEN_PREFIX)
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| CoreError::invalid("malformed page token"))
}

/// One page of a list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    /// Total number of items in the filtered snapshot.
    pub size: usize,
}

/// Slices an already sorted and filtered snapshot.
pub fn paginate<T>(
    items: Vec<T>,
    page_size: Option<usize>,
    page_token: Option<&str>,
) -> Result<Page<T>, CoreError> {
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = match page_token {
        Some(token) if !token.is_empty() => decode_page_token(token)?,
        _ => 0,
    };
    let size = items.len();
    let end = (offset + page_size).min(size);
    let page: Vec<T> = if offset >= size {
        Vec::new()
    } else {
        items
            .into_iter()
            .skip(offset)
            .take(end - offset)
            .collect()
    };
    let next_page_token = if end < size {
        Some(encode_page_token(end))
    } else {
        None
    };
    Ok(Page {
        items: page,
        next_page_token,
        size,
    })
}
