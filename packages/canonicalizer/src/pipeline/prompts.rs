//! LLM prompts for span typing and duplicate judgment.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::traits::oracle::ClassifyItem;
use crate::types::cluster::ItemKind;

/// System prompt for batch span typing.
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You are an expert classifier for a knowledge-graph triple tagging task.

Each input contains:
- [HEAD] ... [/HEAD]
- [REL] ... [/REL]
- [TAIL] ... [/TAIL]
- [FOCUS] ... [/FOCUS]

Your task:
- If FOCUS=HEAD: classify HEAD
- If FOCUS=TAIL: classify TAIL
- Prefer relation cues when ambiguous

Allowed labels:
{labels}

Return a JSON array of objects:
{"id": <int>, "label": "<entity type>"}

Rules:
- Classify EACH item independently
- No extra text
- One label per item"#;

/// Prompt asking whether any candidates duplicate an item.
pub const JUDGE_PROMPT: &str = r#"Find duplicate {item_type} for the item and an alias that best
represents the duplicates. Duplicates are those that are the same
in meaning, such as with variation in tense, plural form, stem form,
case, abbreviation, shorthand.

If semantic equivalence is clear, merge.
If uncertain, do NOT merge, but ALWAYS return valid JSON.

Item:
{item}

Candidates:
{candidates}

Return JSON only. Do not include explanations or text outside JSON.
If there are no duplicates, return:
{ "duplicates": [], "canonical": null }

If duplicates is non-empty, canonical MUST be one of [Item or Candidates]."#;

/// Labels offered to the classifier when no ontology is configured.
pub fn default_labels() -> IndexMap<String, String> {
    [
        ("Person", "A human individual, real or fictional"),
        ("Organization", "A company, institution, agency, team or group"),
        ("Location", "A place: country, city, region, address, facility"),
        ("Event", "Something that happens at a time: meeting, war, election"),
        ("Date", "A point or span in time"),
        ("Work", "A creative work: book, film, song, artwork"),
        ("Product", "A manufactured good, software or service"),
        ("Concept", "An abstract idea, field, theory or method"),
        ("Quantity", "A number, amount, measurement or money value"),
        ("Other", "Anything that fits none of the labels above"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Hash of both prompt templates, for tagging intermediate outputs.
pub fn prompts_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(CLASSIFY_SYSTEM_PROMPT.as_bytes());
    hasher.update(JUDGE_PROMPT.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Format the classification system prompt with a numbered label list.
pub fn format_classify_system_prompt(labels: &IndexMap<String, String>) -> String {
    let labels_block = labels
        .iter()
        .enumerate()
        .map(|(i, (label, description))| format!("{}. {}: {}", i + 1, label, description))
        .collect::<Vec<_>>()
        .join("\n");

    fill_template(CLASSIFY_SYSTEM_PROMPT, &[("{labels}", &labels_block)])
}

/// Format one batch as `"{local_id}. {text}"` lines.
pub fn format_classify_batch(batch: &[ClassifyItem]) -> String {
    batch
        .iter()
        .map(|item| format!("{}. {}", item.local_id, item.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format the duplicate judgment prompt.
pub fn format_judge_prompt(seed: &str, candidates: &[String], kind: ItemKind) -> String {
    let candidates_text = candidates
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n");

    fill_template(
        JUDGE_PROMPT,
        &[
            ("{item_type}", kind.as_str()),
            ("{item}", seed),
            ("{candidates}", &candidates_text),
        ],
    )
}

/// Substitute placeholders in a single left-to-right pass over `template`.
///
/// Inserted values are never scanned again, so text that happens to contain
/// a placeholder is kept verbatim.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_hash_is_consistent() {
        let hash1 = prompts_hash();
        let hash2 = prompts_hash();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 hex
    }

    #[test]
    fn test_classify_system_prompt_lists_labels() {
        let mut labels = IndexMap::new();
        labels.insert("Person".to_string(), "A human".to_string());
        labels.insert("City".to_string(), "A city".to_string());

        let prompt = format_classify_system_prompt(&labels);
        assert!(prompt.contains("1. Person: A human\n2. City: A city"));
        assert!(!prompt.contains("{labels}"));
        assert!(prompt.contains(r#"{"id": <int>, "label": "<entity type>"}"#));
    }

    #[test]
    fn test_classify_batch_lines() {
        let batch = vec![ClassifyItem::new(1, "alpha"), ClassifyItem::new(2, "beta")];
        assert_eq!(format_classify_batch(&batch), "1. alpha\n2. beta");
    }

    #[test]
    fn test_judge_prompt() {
        let prompt = format_judge_prompt(
            "USA",
            &["United States".to_string(), "U.S.".to_string()],
            ItemKind::Entity,
        );
        assert!(prompt.starts_with("Find duplicate entity for the item"));
        assert!(prompt.contains("Item:\nUSA\n"));
        assert!(prompt.contains("Candidates:\n- United States\n- U.S.\n"));
        assert!(prompt.contains(r#"{ "duplicates": [], "canonical": null }"#));
    }

    #[test]
    fn test_judge_prompt_keeps_braces_in_item() {
        let prompt = format_judge_prompt("{candidates}", &["x".to_string()], ItemKind::Relation);
        assert!(prompt.contains("Item:\n{candidates}\n"));
        assert!(prompt.contains("Candidates:\n- x"));
    }

    #[test]
    fn test_judge_prompt_keeps_placeholders_in_candidates() {
        let prompt = format_judge_prompt(
            "USA",
            &["{item} Corp".to_string(), "{item_type}".to_string()],
            ItemKind::Entity,
        );
        assert!(prompt.contains("Item:\nUSA\n"));
        assert!(prompt.contains("Candidates:\n- {item} Corp\n- {item_type}\n"));
        assert!(!prompt.contains("- USA Corp"));
    }

    #[test]
    fn test_fill_template_leaves_unknown_braces() {
        let filled = fill_template(r#"{"id": {n}} {x"#, &[("{n}", "{n}{n}")]);
        assert_eq!(filled, r#"{"id": {n}{n}} {x"#);
    }

    #[test]
    fn test_default_labels_nonempty() {
        let labels = default_labels();
        assert!(labels.contains_key("Person"));
        assert_eq!(labels.keys().last().map(String::as_str), Some("Other"));
    }
}
