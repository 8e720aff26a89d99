//! Record transformations around the canonicalization core.
//!
//! Raw rows → exact dedup → focus-marked spans → (typing) → grouped triples
//! → (canonicalization) → rows again.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, warn};

use crate::types::triple::{Focus, RawRow, RawTriple, Span, Triple, TypedSpan, UNKNOWN_TYPE};

static HEAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[HEAD\](.*?)\[/HEAD\]").unwrap());
static REL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[REL\](.*?)\[/REL\]").unwrap());
static TAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[TAIL\](.*?)\[/TAIL\]").unwrap());

/// Drop exact duplicate triples, ignoring case.
///
/// A triple repeated within a row is dropped. Across rows, every occurrence
/// of a case-insensitive key is rewritten to the first surface form seen.
/// Returns the rows and the number of triples dropped.
pub fn dedup_rows(rows: Vec<RawRow>) -> (Vec<RawRow>, usize) {
    let mut first_seen: HashMap<(String, String, String), RawTriple> = HashMap::new();
    let mut dropped = 0;

    let rows = rows
        .into_iter()
        .map(|row| {
            let mut row_seen = HashSet::new();
            let mut deduped = Vec::with_capacity(row.len());
            for triple in row {
                let key = triple.folded_key();
                if !row_seen.insert(key.clone()) {
                    dropped += 1;
                    continue;
                }
                let canonical = first_seen.entry(key).or_insert(triple);
                deduped.push(canonical.clone());
            }
            deduped
        })
        .collect();

    debug!(dropped, "Exact duplicate triples removed");
    (rows, dropped)
}

/// Format the focus-marked text the classifier sees.
pub fn focus_text(triple: &RawTriple, focus: Focus) -> String {
    format!(
        "[HEAD] {} [/HEAD] [REL] {} [/REL] [TAIL] {} [/TAIL] [FOCUS] {} [/FOCUS]",
        triple.head(),
        triple.relation(),
        triple.tail(),
        focus.marker()
    )
}

/// Read `(head, relation, tail)` back out of a focus-marked text.
pub fn parse_focus_text(text: &str) -> Option<RawTriple> {
    let grab = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    };
    Some(RawTriple::new(grab(&HEAD_RE)?, grab(&REL_RE)?, grab(&TAIL_RE)?))
}

/// Two typing requests per triple, one focused on each endpoint.
///
/// Triples are numbered from 1 across all rows (`triple_000001`); the row
/// index becomes `row_id`.
pub fn focus_spans(rows: &[RawRow]) -> Vec<TypedSpan> {
    let mut spans = Vec::new();
    let mut next = 1usize;

    for (row_id, row) in rows.iter().enumerate() {
        for triple in row {
            let base_id = format!("triple_{:06}", next);
            next += 1;
            for focus in [Focus::Head, Focus::Tail] {
                spans.push(TypedSpan {
                    row_id,
                    id: format!("{}_{}", base_id, focus.suffix()),
                    text: focus_text(triple, focus),
                    label: None,
                });
            }
        }
    }
    spans
}

/// Join labeled head/tail spans into grouped triples.
///
/// Groups are keyed by `(row_id, triple_id)` and kept in first-seen order.
/// An endpoint without a labeled span gets the unknown type. Spans whose id
/// or text cannot be read are skipped.
pub fn assemble_triples(spans: &[TypedSpan]) -> Vec<Triple> {
    let mut groups: IndexMap<(usize, String), Triple> = IndexMap::new();

    for span in spans {
        let Some((base_id, focus)) = span.triple_and_focus() else {
            warn!(id = %span.id, "Skipping span with unreadable id");
            continue;
        };
        let Some(raw) = parse_focus_text(&span.text) else {
            warn!(id = %span.id, "Skipping span with unreadable text");
            continue;
        };

        let triple = groups
            .entry((span.row_id, base_id.to_string()))
            .or_insert_with(|| {
                Triple::new(
                    span.row_id,
                    base_id,
                    Span::new(raw.head(), UNKNOWN_TYPE),
                    raw.relation(),
                    Span::new(raw.tail(), UNKNOWN_TYPE),
                )
            });

        let label = span.label.clone().unwrap_or_else(|| UNKNOWN_TYPE.to_string());
        match focus {
            Focus::Head => triple.head.entity_type = label,
            Focus::Tail => triple.tail.entity_type = label,
        }
    }

    groups.into_values().collect()
}

/// Regroup triples into rows by `row_id`.
///
/// Rows run from the smallest to the largest `row_id`; ids in between with no
/// triples become empty rows.
pub fn restore_rows(triples: &[Triple]) -> Vec<RawRow> {
    let by_row = group_by_row(triples);
    match (by_row.keys().next(), by_row.keys().next_back()) {
        (Some(&min), Some(&max)) => (min..=max).map(|id| row_at(&by_row, id)).collect(),
        _ => Vec::new(),
    }
}

/// Regroup triples into exactly `row_count` rows, `0..row_count`.
///
/// Triples with a `row_id` outside that range are dropped with a warning.
pub fn restore_rows_to(triples: &[Triple], row_count: usize) -> Vec<RawRow> {
    let by_row = group_by_row(triples);
    if let Some(&max) = by_row.keys().next_back() {
        if max >= row_count {
            warn!(max_row_id = max, row_count, "Dropping triples beyond the last row");
        }
    }
    (0..row_count).map(|id| row_at(&by_row, id)).collect()
}

fn group_by_row(triples: &[Triple]) -> BTreeMap<usize, RawRow> {
    let mut by_row: BTreeMap<usize, RawRow> = BTreeMap::new();
    for triple in triples {
        by_row.entry(triple.row_id).or_default().push(triple.to_raw());
    }
    by_row
}

fn row_at(by_row: &BTreeMap<usize, RawRow>, id: usize) -> RawRow {
    by_row.get(&id).cloned().unwrap_or_default()
}
