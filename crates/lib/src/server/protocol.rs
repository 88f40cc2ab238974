//! HTTP wire types for the follow-up API.

use crate::llm::{ModelResponse, Provenance};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/followup`. Missing fields decode as empty and are rejected as malformed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpParams {
    #[serde(default)]
    pub session_key: String,
    #[serde(default)]
    pub question: String,
}

/// Success body: `{ "answer", "provenance": "real" | "mock" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpReply {
    pub answer: String,
    pub provenance: Provenance,
}

impl From<ModelResponse> for FollowUpReply {
    fn from(r: ModelResponse) -> Self {
        Self {
            answer: r.answer,
            provenance: r.provenance,
        }
    }
}

/// Error body: `{ "error", "details" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_accept_camel_case_and_missing_fields() {
        let p: FollowUpParams =
            serde_json::from_str(r#"{"sessionKey":"s1","question":"What is HDL?"}"#).unwrap();
        assert_eq!(p.session_key, "s1");
        assert_eq!(p.question, "What is HDL?");
        let p: FollowUpParams = serde_json::from_str(r#"{"question":"q"}"#).unwrap();
        assert!(p.session_key.is_empty());
    }

    #[test]
    fn reply_shape() {
        let reply = FollowUpReply {
            answer: "text".to_string(),
            provenance: Provenance::Mock,
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v, serde_json::json!({"answer": "text", "provenance": "mock"}));
    }
}
