use thiserror::Error;

/// Failures raised while paginating the search API and appending rows.
///
/// Only [`FetchError::Status`] and [`FetchError::Request`] are absorbed by the
/// fetch loop; every other variant propagates to the caller.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response has no `items` list")]
    MissingItems,

    #[error("first page returned no items; cannot infer row schema")]
    EmptySchemaSample,

    #[error("item is not a JSON object")]
    NotAnObject,

    #[error("row column `{column}` is not in the table schema")]
    SchemaMismatch { column: String },

    /// SQLite column names ignore ASCII case; JSON keys do not.
    #[error("keys `{first}` and `{second}` collide as table columns")]
    DuplicateColumn { first: String, second: String },

    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl FetchError {
    /// HTTP status and network errors stop pagination; nothing else is caught.
    pub fn halts_pagination(&self) -> bool {
        matches!(self, FetchError::Status { .. } | FetchError::Request(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_kinds_halt() {
        let status = FetchError::Status {
            status: 429,
            url: "http://x".into(),
        };
        assert!(status.halts_pagination());
        assert!(!FetchError::EmptySchemaSample.halts_pagination());
        assert!(!FetchError::SchemaMismatch { column: "a".into() }.halts_pagination());
        let json = serde_json::from_str::<serde_json::Value>("<html>").unwrap_err();
        assert!(!FetchError::from(json).halts_pagination());
    }

    #[test]
    fn status_message_names_code() {
        let e = FetchError::Status {
            status: 503,
            url: "http://example.test/search".into(),
        };
        assert_eq!(e.to_string(), "HTTP 503 from http://example.test/search");
    }
}
