//! Payloads for the insight node: weekly feed, reader feedback and requeue.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_approve: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_like: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_skip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_override: Option<bool>,
}

impl FeedbackSignals {
    /// First set signal wins: approve, like, skip, else view.
    pub fn action(&self) -> &'static str {
        if self.editor_approve == Some(true) {
            "approve"
        } else if self.user_like == Some(true) {
            "like"
        } else if self.user_skip == Some(true) {
            "skip"
        } else {
            "view"
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub id: String,
    /// Partial feed item, forwarded as-is.
    #[serde(default)]
    pub item: Value,
    #[serde(default)]
    pub signals: FeedbackSignals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    pub id: String,
    #[serde(default)]
    pub reward: f64,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub requeued: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightFeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub items: Vec<Value>,
}

impl InsightFeed {
    /// Tolerates a missing or non-array `items`.
    pub fn from_body(body: &Value, keep_generated_at: bool) -> Self {
        InsightFeed {
            generated_at: if keep_generated_at {
                body.get("generated_at").and_then(Value::as_str).map(str::to_string)
            } else {
                None
            },
            items: body
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        }
    }
}
