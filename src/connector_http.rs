//! HTTP plumbing shared by the catalog connectors.
//!
//! Maps transport and status failures onto the [`SourceError`] taxonomy:
//!
//! | Upstream | Error |
//! |----------|-------|
//! | HTTP 429 | [`SourceError::RateLimited`] |
//! | HTTP 404 | [`SourceError::NotFound`] |
//! | other non-2xx, network error, timeout | [`SourceError::Transient`] |
//! | 2xx with an undecodable body | [`SourceError::Mapping`] |

use std::time::Duration;

use anyhow::Result;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};

use datasearch_core::error::SourceError;

const USER_AGENT: &str = concat!("datasearch/", env!("CARGO_PKG_VERSION"));

/// Build the client every connector uses.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// Classify a non-success response.
pub fn classify_status(status: StatusCode, what: &str, body: &str) -> SourceError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited(format!("{}: {}", what, status)),
        StatusCode::NOT_FOUND => SourceError::NotFound(what.to_string()),
        _ => SourceError::Transient(format!("{}: HTTP {} {}", what, status, snippet)),
    }
}

/// Send `request` and decode a JSON body, returning it with the response
/// headers (used for pagination links).
pub async fn get_json(
    request: RequestBuilder,
    what: &str,
) -> Result<(serde_json::Value, HeaderMap), SourceError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            SourceError::Transient(format!("{}: timed out", what))
        } else {
            SourceError::Transient(format!("{}: {}", what, e))
        }
    })?;

    let status = response.status();
    let headers = response.headers().clone();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, what, &body));
    }

    let text = response
        .text()
        .await
        .map_err(|e| SourceError::Transient(format!("{}: reading body: {}", what, e)))?;
    let json = serde_json::from_str(&text)
        .map_err(|e| SourceError::Mapping(format!("{}: invalid JSON: {}", what, e)))?;

    Ok((json, headers))
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let url = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        if is_next && url.starts_with('<') && url.ends_with('>') {
            Some(url[1..url.len() - 1].to_string())
        } else {
            None
        }
    })
}
