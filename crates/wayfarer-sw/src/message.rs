//! Control messages recognized by the worker.
//!
//! Pages post JSON payloads like `{"type": "SKIP_WAITING"}`. Anything the
//! worker does not recognize is ignored, never an error.

use serde::Deserialize;
use serde_json::Value;

/// A recognized page → worker control message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    /// Force a waiting worker to activate immediately.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,

    /// Add URLs to the runtime cache on demand.
    #[serde(rename = "CACHE_URLS")]
    CacheUrls {
        #[serde(default)]
        urls: Vec<String>,
    },
}

impl WorkerMessage {
    /// Parse a message payload. Unrecognized or malformed payloads yield
    /// `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_skip_waiting() {
        let msg = WorkerMessage::from_json(&json!({"type": "SKIP_WAITING"}));
        assert_eq!(msg, Some(WorkerMessage::SkipWaiting));
    }

    #[test]
    fn test_parse_cache_urls() {
        let msg = WorkerMessage::from_json(&json!({
            "type": "CACHE_URLS",
            "urls": ["/images/day1/market.jpg", "/images/day2/harbor.jpg"],
        }));
        assert_eq!(
            msg,
            Some(WorkerMessage::CacheUrls {
                urls: vec![
                    "/images/day1/market.jpg".to_string(),
                    "/images/day2/harbor.jpg".to_string(),
                ],
            })
        );
    }

    #[test]
    fn test_cache_urls_default_empty() {
        let msg = WorkerMessage::from_json(&json!({"type": "CACHE_URLS"}));
        assert_eq!(msg, Some(WorkerMessage::CacheUrls { urls: vec![] }));
    }

    #[test]
    fn test_unknown_type_ignored() {
        assert_eq!(
            WorkerMessage::from_json(&json!({"type": "PREFETCH_ALL"})),
            None
        );
    }

    #[test]
    fn test_malformed_payload_ignored() {
        assert_eq!(WorkerMessage::from_json(&json!(42)), None);
        assert_eq!(WorkerMessage::from_json(&json!({"urls": []})), None);
    }
}
