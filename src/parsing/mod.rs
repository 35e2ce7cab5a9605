//! Free-text scraping of OCR output into identifier-keyed records.
//!
//! The three parsers are pure functions over independent documents. None of
//! them fail: text that does not follow the expected layout simply yields no
//! records. Every emitted identifier goes through [`normalize_identifier`] so
//! the documents can be joined on plain string equality.

mod answers;
mod criteria;
mod questions;

use serde::Serialize;

pub(crate) use answers::parse_answers;
pub(crate) use criteria::parse_criteria;
pub(crate) use questions::parse_questions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ParsedQuestion {
    pub(crate) identifier: String,
    pub(crate) question_text: String,
    pub(crate) total_marks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ParsedAnswer {
    pub(crate) identifier: String,
    pub(crate) answer_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct CriterionEntry {
    pub(crate) description: String,
    pub(crate) marks: f64,
}

/// Rubric section for one identifier. Never empty once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct CriteriaGroup {
    pub(crate) identifier: String,
    pub(crate) criteria: Vec<CriterionEntry>,
}

/// Canonical join key: whitespace removed, letters lowercased (`"1 (A)"` -> `"1(a)"`).
pub(crate) fn normalize_identifier(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}
