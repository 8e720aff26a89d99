//! Triple records exchanged with the surrounding pipeline.

use serde::{Deserialize, Serialize};

/// Type assigned when no label is known for a span.
pub const UNKNOWN_TYPE: &str = "Unknown";

fn unknown_type() -> String {
    UNKNOWN_TYPE.to_string()
}

/// An untyped `[head, relation, tail]` triple as produced by extraction.
///
/// Serializes as a three-element JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawTriple(pub String, pub String, pub String);

impl RawTriple {
    pub fn new(head: impl Into<String>, relation: impl Into<String>, tail: impl Into<String>) -> Self {
        Self(head.into(), relation.into(), tail.into())
    }

    pub fn head(&self) -> &str {
        &self.0
    }

    pub fn relation(&self) -> &str {
        &self.1
    }

    pub fn tail(&self) -> &str {
        &self.2
    }

    /// Case-insensitive identity used for exact lexical dedup.
    pub fn folded_key(&self) -> (String, String, String) {
        (
            self.0.to_lowercase(),
            self.1.to_lowercase(),
            self.2.to_lowercase(),
        )
    }
}

/// All raw triples extracted from one source line.
pub type RawRow = Vec<RawTriple>;

/// A typed endpoint of a triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Surface form
    pub text: String,

    /// Semantic type label (entity type)
    #[serde(rename = "type", default = "unknown_type")]
    pub entity_type: String,

    /// Embedding of `text`, when a collaborator already computed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Span {
    pub fn new(text: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            entity_type: entity_type.into(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A grouped triple record with typed endpoints.
///
/// The head/tail text and the relation are the only fields the alias
/// resolver ever rewrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// Source line the triple was extracted from
    pub row_id: usize,

    /// Stable id, e.g. `triple_000042`
    pub triple_id: String,

    pub relation: String,
    pub head: Span,
    pub tail: Span,

    /// Embedding of `relation`, when a collaborator already computed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_embedding: Option<Vec<f32>>,
}

impl Triple {
    pub fn new(
        row_id: usize,
        triple_id: impl Into<String>,
        head: Span,
        relation: impl Into<String>,
        tail: Span,
    ) -> Self {
        Self {
            row_id,
            triple_id: triple_id.into(),
            relation: relation.into(),
            head,
            tail,
            relation_embedding: None,
        }
    }

    pub fn with_relation_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.relation_embedding = Some(embedding);
        self
    }

    /// Bucket key for this triple's relation.
    pub fn type_pair(&self) -> (String, String) {
        (self.head.entity_type.clone(), self.tail.entity_type.clone())
    }

    /// Drop embedding payloads before writing output.
    pub fn strip_embeddings(mut self) -> Self {
        self.head.embedding = None;
        self.tail.embedding = None;
        self.relation_embedding = None;
        self
    }

    pub fn to_raw(&self) -> RawTriple {
        RawTriple::new(&self.head.text, &self.relation, &self.tail.text)
    }
}

/// Which endpoint a typing request focuses on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Focus {
    Head,
    Tail,
}

impl Focus {
    /// Id suffix used in typed span records.
    pub fn suffix(self) -> &'static str {
        match self {
            Focus::Head => "H",
            Focus::Tail => "T",
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Focus::Head => "HEAD",
            Focus::Tail => "TAIL",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "H" => Some(Focus::Head),
            "T" => Some(Focus::Tail),
            _ => None,
        }
    }
}

/// A typing request/result record: `{row_id, id, text, label}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedSpan {
    pub row_id: usize,

    /// `{triple_id}_{H|T}`
    pub id: String,

    /// Focus-marked triple text sent to the classifier
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl TypedSpan {
    /// Split the id into its triple id and focus.
    pub fn triple_and_focus(&self) -> Option<(&str, Focus)> {
        let (base, suffix) = self.id.rsplit_once('_')?;
        Some((base, Focus::from_suffix(suffix)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_triple_serializes_as_array() {
        let raw = RawTriple::new("Trane", "location", "Swords, Dublin");
        let json = serde_json::to_string(&raw).unwrap();
        assert_eq!(json, r#"["Trane","location","Swords, Dublin"]"#);

        let back: RawTriple = serde_json::from_str(&json).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_triple_record_shape() {
        let json = r#"{
            "row_id": 3,
            "triple_id": "triple_000007",
            "relation": "capital of",
            "head": {"text": "Paris", "type": "City", "embedding": [0.1, 0.2]},
            "tail": {"text": "France"}
        }"#;

        let triple: Triple = serde_json::from_str(json).unwrap();
        assert_eq!(triple.head.entity_type, "City");
        assert_eq!(triple.tail.entity_type, UNKNOWN_TYPE);
        assert_eq!(triple.head.embedding.as_deref(), Some(&[0.1, 0.2][..]));

        let stripped = serde_json::to_value(triple.strip_embeddings()).unwrap();
        assert!(stripped["head"].get("embedding").is_none());
        assert!(stripped.get("relation_embedding").is_none());
        assert_eq!(stripped["head"]["type"], "City");
    }

    #[test]
    fn test_typed_span_id_parts() {
        let span = TypedSpan {
            row_id: 0,
            id: "triple_000001_T".to_string(),
            text: String::new(),
            label: None,
        };
        assert_eq!(span.triple_and_focus(), Some(("triple_000001", Focus::Tail)));

        let bad = TypedSpan {
            id: "triple_000001_X".to_string(),
            ..span
        };
        assert_eq!(bad.triple_and_focus(), None);
    }
}
