// src/server/protocol.rs

//! NDJSON protocol types.
//!
//! One JSON object per line in both directions. Responses are written in
//! request issue order; pushed change events carry their own `key` so the
//! two are distinguishable on a shared stream.

use serde::{Deserialize, Serialize};

/// Request types from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Request {
    Hash {
        root: String,
        path: String,
        glob: String,
        #[serde(default)]
        persistent: bool,
    },
    Watch {
        root: String,
        path: String,
        glob: String,
    },
    Unwatch(UnwatchTarget),
}

/// `unwatch` accepts either the opaque key id or the original triple.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UnwatchTarget {
    Key {
        key: String,
    },
    Spec {
        root: String,
        path: String,
        glob: String,
    },
}

/// Response types to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Hash { hash: String, file_count: usize },
    Watch { key: String },
    Ack { ok: bool },
    Error { error: String },
}

/// Change event pushed to subscribed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: String,
    pub paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_request_parses_with_default_persistent() {
        let req: Request =
            serde_json::from_str(r#"{"cmd":"hash","root":"/repo","path":"src","glob":"**/*.rs"}"#)
                .unwrap();
        assert_eq!(
            req,
            Request::Hash {
                root: "/repo".to_string(),
                path: "src".to_string(),
                glob: "**/*.rs".to_string(),
                persistent: false,
            }
        );
    }

    #[test]
    fn unwatch_parses_both_shapes() {
        let by_key: Request =
            serde_json::from_str(r#"{"cmd":"unwatch","key":"abc123"}"#).unwrap();
        assert_eq!(
            by_key,
            Request::Unwatch(UnwatchTarget::Key {
                key: "abc123".to_string()
            })
        );

        let by_spec: Request = serde_json::from_str(
            r#"{"cmd":"unwatch","root":"/repo","path":".","glob":"*.rs"}"#,
        )
        .unwrap();
        assert!(matches!(by_spec, Request::Unwatch(UnwatchTarget::Spec { .. })));
    }

    #[test]
    fn responses_serialize_flat() {
        let hash = Response::Hash {
            hash: "aa".to_string(),
            file_count: 3,
        };
        assert_eq!(
            serde_json::to_string(&hash).unwrap(),
            r#"{"hash":"aa","file_count":3}"#
        );

        let err = Response::Error {
            error: "No files matched the glob pattern".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"error":"No files matched the glob pattern"}"#
        );
    }

    #[test]
    fn malformed_lines_fail_to_parse() {
        assert!(serde_json::from_str::<Request>("not json").is_err());
        assert!(serde_json::from_str::<Request>(r#"{"cmd":"nope"}"#).is_err());
    }
}
