//! Oracle traits for LLM judgments.
//!
//! Two layers:
//! - [`Completion`] is the raw text-in/text-out capability of a hosted model
//! - [`Oracle`] is the narrow judgment capability the pipeline depends on:
//!   batch classification and duplicate confirmation
//!
//! Tests inject deterministic oracles directly; production wraps a
//! completion backend in [`LlmOracle`](crate::oracle::LlmOracle).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OracleResult;
use crate::types::cluster::ItemKind;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completion request: ordered messages plus sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Deterministic (temperature 0) request with no messages yet.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Total characters across all messages (used to scale timeouts).
    pub fn input_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw completion capability of a hosted language model.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Send the request and return the first choice's text.
    async fn complete(&self, request: &CompletionRequest) -> OracleResult<String>;
}

/// One item in a classification batch.
///
/// `local_id` is sequential within the batch (1-based), not the caller's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyItem {
    pub local_id: usize,
    pub text: String,
}

impl ClassifyItem {
    pub fn new(local_id: usize, text: impl Into<String>) -> Self {
        Self {
            local_id,
            text: text.into(),
        }
    }
}

/// A label returned for one batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyLabel {
    pub id: usize,
    pub label: String,
}

impl ClassifyLabel {
    pub fn new(id: usize, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    /// Read `{id, label}` from a decoded reply entry.
    ///
    /// Accepts integer ids, whole-number floats (`1.0`) and integer-like
    /// string ids. Entries without a usable id or a non-empty string label
    /// yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = match value.get("id")? {
            Value::Number(n) => match n.as_u64() {
                Some(id) => usize::try_from(id).ok()?,
                None => whole_number(n.as_f64()?)?,
            },
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        let label = value.get("label")?.as_str()?.trim();
        if label.is_empty() {
            return None;
        }
        Some(Self::new(id, label))
    }
}

fn whole_number(value: f64) -> Option<usize> {
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= usize::MAX as f64)
        .then_some(value as usize)
}

/// The oracle's answer to "which candidates duplicate this seed?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupDecision {
    #[serde(default)]
    pub duplicates: Vec<String>,
    #[serde(default)]
    pub canonical: Option<String>,
}

impl DedupDecision {
    /// "No duplicates".
    pub fn refusal() -> Self {
        Self::default()
    }

    pub fn merge(
        duplicates: impl IntoIterator<Item = impl Into<String>>,
        canonical: impl Into<String>,
    ) -> Self {
        Self {
            duplicates: duplicates.into_iter().map(Into::into).collect(),
            canonical: Some(canonical.into()),
        }
    }

    /// Read a decision from a decoded reply object.
    ///
    /// Non-string duplicate entries are dropped; a missing, null or blank
    /// canonical becomes `None`.
    pub fn from_value(value: &Value) -> Self {
        let duplicates = value
            .get("duplicates")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let canonical = value
            .get("canonical")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            duplicates,
            canonical,
        }
    }

    /// True when the decision confirms a merge.
    pub fn is_merge(&self) -> bool {
        !self.duplicates.is_empty() && self.canonical.is_some()
    }
}

/// Judgment oracle used by the batch scheduler and the cluster builder.
///
/// Implementations may fail freely: callers degrade every error to a
/// fallback (a default label, or "no duplicates").
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Label every item of a batch.
    ///
    /// Returned ids refer to [`ClassifyItem::local_id`]. Missing ids are
    /// allowed; the caller fills them with its fallback label.
    async fn classify(&self, batch: &[ClassifyItem]) -> OracleResult<Vec<ClassifyLabel>>;

    /// Pick the duplicates of `seed` among `candidates` and a canonical label.
    async fn judge(
        &self,
        seed: &str,
        candidates: &[String],
        kind: ItemKind,
    ) -> OracleResult<DedupDecision>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decision_filters_non_strings() {
        let value = json!({"duplicates": ["United States", 7, null, "  ", "U.S."], "canonical": "USA"});
        let decision = DedupDecision::from_value(&value);

        assert_eq!(decision.duplicates, vec!["United States", "U.S."]);
        assert_eq!(decision.canonical.as_deref(), Some("USA"));
        assert!(decision.is_merge());
    }

    #[test]
    fn test_decision_missing_canonical_is_not_merge() {
        let decision = DedupDecision::from_value(&json!({"duplicates": ["a"]}));
        assert!(!decision.is_merge());

        let decision = DedupDecision::from_value(&json!({"duplicates": [], "canonical": null}));
        assert_eq!(decision, DedupDecision::refusal());

        let decision = DedupDecision::from_value(&json!({"duplicates": "a", "canonical": "a"}));
        assert!(decision.duplicates.is_empty());
    }

    #[test]
    fn test_classify_label_from_value() {
        assert_eq!(
            ClassifyLabel::from_value(&json!({"id": 2, "label": "Person"})),
            Some(ClassifyLabel::new(2, "Person"))
        );
        assert_eq!(
            ClassifyLabel::from_value(&json!({"id": " 3 ", "label": "City"})),
            Some(ClassifyLabel::new(3, "City"))
        );
        assert_eq!(ClassifyLabel::from_value(&json!({"id": -1, "label": "X"})), None);
        assert_eq!(
            ClassifyLabel::from_value(&json!({"id": 4.0, "label": "Event"})),
            Some(ClassifyLabel::new(4, "Event"))
        );
        assert_eq!(ClassifyLabel::from_value(&json!({"id": 1.5, "label": "X"})), None);
        assert_eq!(ClassifyLabel::from_value(&json!({"id": -2.0, "label": "X"})), None);
        assert_eq!(ClassifyLabel::from_value(&json!({"id": 1, "label": ""})), None);
        assert_eq!(ClassifyLabel::from_value(&json!({"label": "X"})), None);
        assert_eq!(ClassifyLabel::from_value(&json!(["1", "X"])), None);
    }

    #[test]
    fn test_request_input_chars() {
        let request = CompletionRequest::new()
            .message(Message::system("abc"))
            .message(Message::user("de"));
        assert_eq!(request.input_chars(), 5);
        assert_eq!(request.temperature, 0.0);
    }
}
