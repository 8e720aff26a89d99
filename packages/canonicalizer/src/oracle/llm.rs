//! Oracle backed by a chat completion model.

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::{OracleError, OracleResult};
use crate::pipeline::decode::{decode_array, decode_object};
use crate::pipeline::prompts::{
    default_labels, format_classify_batch, format_classify_system_prompt, format_judge_prompt,
};
use crate::traits::oracle::{
    ClassifyItem, ClassifyLabel, Completion, CompletionRequest, DedupDecision, Message, Oracle,
};
use crate::types::cluster::ItemKind;

/// Turns prompts and lenient decoding into [`Oracle`] judgments.
///
/// # Example
///
/// ```rust,ignore
/// use canonicalizer::oracle::{LlmOracle, OpenAiClient};
///
/// let oracle = LlmOracle::new(OpenAiClient::from_env()?);
/// let labels = oracle.classify(&batch).await?;
/// ```
pub struct LlmOracle<C> {
    completion: C,
    labels: IndexMap<String, String>,
    system_prompt: String,
    judge_max_tokens: u32,
}

impl<C: Completion> LlmOracle<C> {
    pub fn new(completion: C) -> Self {
        let labels = default_labels();
        let system_prompt = format_classify_system_prompt(&labels);
        Self {
            completion,
            labels,
            system_prompt,
            judge_max_tokens: 256,
        }
    }

    /// Replace the label ontology offered to the classifier.
    pub fn with_labels(mut self, labels: IndexMap<String, String>) -> Self {
        self.system_prompt = format_classify_system_prompt(&labels);
        self.labels = labels;
        self
    }

    /// Cap the judgment reply length (default: 256).
    pub fn with_judge_max_tokens(mut self, max_tokens: u32) -> Self {
        self.judge_max_tokens = max_tokens;
        self
    }

    pub fn labels(&self) -> &IndexMap<String, String> {
        &self.labels
    }

    pub fn completion(&self) -> &C {
        &self.completion
    }
}

#[async_trait]
impl<C: Completion> Oracle for LlmOracle<C> {
    async fn classify(&self, batch: &[ClassifyItem]) -> OracleResult<Vec<ClassifyLabel>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let request = CompletionRequest::new()
            .message(Message::system(self.system_prompt.as_str()))
            .message(Message::user(format_classify_batch(batch)));
        let reply = self.completion.complete(&request).await?;

        let decoded = decode_array(&reply);
        if decoded.is_empty() {
            return Err(OracleError::Malformed(format!(
                "no labels in classification reply ({} chars)",
                reply.len()
            )));
        }
        debug!(stage = ?decoded.stage, items = batch.len(), "Classification reply decoded");

        Ok(decoded
            .into_items()
            .iter()
            .filter_map(ClassifyLabel::from_value)
            .collect())
    }

    async fn judge(
        &self,
        seed: &str,
        candidates: &[String],
        kind: ItemKind,
    ) -> OracleResult<DedupDecision> {
        if candidates.is_empty() {
            return Ok(DedupDecision::refusal());
        }

        let request = CompletionRequest::new()
            .message(Message::user(format_judge_prompt(seed, candidates, kind)))
            .max_tokens(self.judge_max_tokens);
        let reply = self.completion.complete(&request).await?;

        let decoded = decode_object(&reply);
        debug!(stage = ?decoded.stage, seed, "Judgment reply decoded");
        Ok(DedupDecision::from_value(&decoded.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;
    use crate::traits::oracle::Role;

    #[tokio::test]
    async fn test_classify_reads_fenced_array() {
        let completion = ScriptedCompletion::new().with_reply(
            "```json\n[{\"id\": 1, \"label\": \"Person\"}, {\"id\": \"2\", \"label\": \"Location\"}]\n```",
        );
        let oracle = LlmOracle::new(completion);

        let labels = oracle
            .classify(&[ClassifyItem::new(1, "a"), ClassifyItem::new(2, "b")])
            .await
            .unwrap();
        assert_eq!(
            labels,
            vec![ClassifyLabel::new(1, "Person"), ClassifyLabel::new(2, "Location")]
        );

        let requests = oracle.completion().requests();
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert!(requests[0].messages[0].content.contains("1. Person:"));
        assert_eq!(requests[0].messages[1].content, "1. a\n2. b");
    }

    #[tokio::test]
    async fn test_classify_python_literal_reply() {
        let completion =
            ScriptedCompletion::new().with_reply("[{'id': 1, 'label': 'Organization'}, {'id': 2}]");
        let oracle = LlmOracle::new(completion);

        let labels = oracle
            .classify(&[ClassifyItem::new(1, "a"), ClassifyItem::new(2, "b")])
            .await
            .unwrap();
        assert_eq!(labels, vec![ClassifyLabel::new(1, "Organization")]);
    }

    #[tokio::test]
    async fn test_classify_garbage_is_malformed() {
        let oracle = LlmOracle::new(ScriptedCompletion::new().with_reply("I cannot help with that"));
        let err = oracle
            .classify(&[ClassifyItem::new(1, "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_custom_labels() {
        let mut labels = IndexMap::new();
        labels.insert("Gene".to_string(), "A gene or gene product".to_string());
        let oracle = LlmOracle::new(ScriptedCompletion::new().with_reply("[]")).with_labels(labels);

        let labels = oracle.classify(&[ClassifyItem::new(1, "BRCA1")]).await.unwrap();
        assert!(labels.is_empty());
        let system = &oracle.completion().requests()[0].messages[0].content;
        assert!(system.contains("1. Gene: A gene or gene product"));
        assert!(!system.contains("Person"));
    }

    #[tokio::test]
    async fn test_judge_merge() {
        let completion = ScriptedCompletion::new()
            .with_reply(r#"Sure! {"duplicates": ["United States"], "canonical": "USA"}"#);
        let oracle = LlmOracle::new(completion);

        let decision = oracle
            .judge("USA", &["United States".to_string()], ItemKind::Entity)
            .await
            .unwrap();
        assert_eq!(decision, DedupDecision::merge(["United States"], "USA"));

        let request = &oracle.completion().requests()[0];
        assert_eq!(request.max_tokens, Some(256));
        assert!(request.messages[0].content.contains("- United States"));
    }

    #[tokio::test]
    async fn test_judge_unparseable_reply_is_refusal() {
        let oracle = LlmOracle::new(ScriptedCompletion::new().with_reply("sure, here: [oops"));

        let decision = oracle
            .judge("USA", &["U.S.".to_string()], ItemKind::Entity)
            .await
            .unwrap();
        assert_eq!(decision, DedupDecision::refusal());
    }

    #[tokio::test]
    async fn test_judge_without_candidates_skips_model() {
        let oracle = LlmOracle::new(ScriptedCompletion::new());
        let decision = oracle.judge("USA", &[], ItemKind::Entity).await.unwrap();

        assert_eq!(decision, DedupDecision::refusal());
        assert!(oracle.completion().requests().is_empty());
    }
}
