//! Shared HTTP plumbing for the JSON quote providers.

use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};

use crate::domain::errors::SourceError;

const ERROR_BODY_LIMIT: usize = 200;

/// Build the HTTP client shared by all sources.
///
/// No client-wide timeout is set; each fetch supplies its own.
pub fn http_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!("quote-collector/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// GET `url` and parse the body as JSON.
///
/// Transport failures, timeouts and non-2xx statuses are `Unavailable`.
/// A body that is not JSON is `Malformed`.
pub(super) async fn get_json(
    client: &Client,
    source_name: &str,
    url: &str,
    query: &[(&str, &str)],
    timeout: Duration,
) -> Result<Value, SourceError> {
    let response = client
        .get(url)
        .query(query)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| SourceError::unavailable(source_name, describe(e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::unavailable(
            source_name,
            format!("HTTP {status}: {}", truncate(body.trim(), ERROR_BODY_LIMIT)),
        ));
    }

    let text = response
        .text()
        .await
        .map_err(|e| SourceError::unavailable(source_name, describe(e)))?;

    serde_json::from_str(&text)
        .map_err(|e| SourceError::malformed(source_name, format!("invalid JSON body: {e}")))
}

/// Extract the provider's `{"data": {...}}` envelope.
pub(super) fn data_envelope(
    source_name: &str,
    body: Value,
) -> Result<Map<String, Value>, SourceError> {
    match body {
        Value::Object(mut root) => match root.remove("data") {
            Some(Value::Object(data)) => Ok(data),
            Some(_) => Err(SourceError::malformed(source_name, "`data` is not an object")),
            None => Err(SourceError::malformed(source_name, "missing `data` envelope")),
        },
        _ => Err(SourceError::malformed(source_name, "response is not a JSON object")),
    }
}

// Query strings can carry API keys, so the URL is dropped from the message.
fn describe(error: reqwest::Error) -> String {
    if error.is_timeout() {
        return "request timed out".to_string();
    }
    let kind = if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    format!("{kind}: {}", error.without_url())
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_extracts_data_object() {
        let data = data_envelope("coinbase", json!({"data": {"amount": "1"}})).unwrap();
        assert_eq!(data.get("amount"), Some(&json!("1")));
    }

    #[test]
    fn envelope_missing_is_malformed() {
        let err = data_envelope("coinbase", json!({"errors": []})).unwrap_err();
        assert_eq!(err.kind(), "malformed");
        assert!(err.to_string().contains("missing `data` envelope"));
    }

    #[test]
    fn envelope_wrong_shape_is_malformed() {
        assert!(data_envelope("coinbase", json!({"data": [1, 2]})).is_err());
        assert!(data_envelope("coinbase", json!("data")).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 200), "short");
    }
}
