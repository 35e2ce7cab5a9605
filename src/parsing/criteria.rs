use std::sync::OnceLock;

use regex::Regex;

use super::{normalize_identifier, CriteriaGroup, CriterionEntry};

const SECTION_MARKER: &str = "Evaluation Criteria";

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Evaluation Criteria\s+(\d+(?:\s*\([a-zA-Z]\))?)\s*:")
            .expect("criteria header pattern")
    })
}

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Criteria:\s*([^\r\n]+?)[\r\n]+marks:\s*(\d*\.?\d+)")
            .expect("criteria entry pattern")
    })
}

/// Collects one group per `Evaluation Criteria <id>:` section that holds at
/// least one `Criteria:` / `marks:` pair.
///
/// A section ends where the next `Evaluation Criteria` marker starts, so
/// entries never leak from one section into another.
pub(crate) fn parse_criteria(input: &str) -> Vec<CriteriaGroup> {
    header_pattern()
        .captures_iter(input)
        .filter_map(|header| {
            let section_start = header.get(0)?.end();
            let section_end = input[section_start..]
                .find(SECTION_MARKER)
                .map_or(input.len(), |offset| section_start + offset);

            let criteria = parse_section(&input[section_start..section_end]);
            if criteria.is_empty() {
                return None;
            }

            Some(CriteriaGroup { identifier: normalize_identifier(header.get(1)?.as_str()), criteria })
        })
        .collect()
}

fn parse_section(section: &str) -> Vec<CriterionEntry> {
    entry_pattern()
        .captures_iter(section)
        .filter_map(|entry| {
            let description = entry.get(1)?.as_str().trim().to_string();
            let marks = entry.get(2)?.as_str().parse::<f64>().ok()?;
            Some(CriterionEntry { description, marks })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(description: &str, marks: f64) -> CriterionEntry {
        CriterionEntry { description: description.to_string(), marks }
    }

    #[test]
    fn parses_single_section() {
        let parsed = parse_criteria("Evaluation Criteria 1(a):\nCriteria: mentions Y\nmarks: 10");

        assert_eq!(
            parsed,
            vec![CriteriaGroup {
                identifier: "1(a)".to_string(),
                criteria: vec![entry("mentions Y", 10.0)],
            }]
        );
    }

    #[test]
    fn parses_fractional_marks_and_crlf() {
        let input = "Evaluation Criteria 1 (b):\r\n\
            Criteria: Regno di Sicilia\r\nmarks: 1\r\n\
            Criteria:   Costituzioni melfitane  \r\n\r\nmarks:1.5\r\n\
            Criteria: tolleranza religiosa\nmarks: .5\n";

        let parsed = parse_criteria(input);

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].identifier, "1(b)");
        assert_eq!(
            parsed[0].criteria,
            vec![
                entry("Regno di Sicilia", 1.0),
                entry("Costituzioni melfitane", 1.5),
                entry("tolleranza religiosa", 0.5),
            ]
        );
    }

    #[test]
    fn sections_do_not_leak_into_each_other() {
        let input = "Evaluation Criteria 1(a):Evaluation Criteria 1(b):\n\
            Criteria: Gregorio IX\nmarks: 1.5\n\
            Evaluation Criteria 2(a):\n\
            Criteria: strumento della scomunica\nmarks: 3";

        let parsed = parse_criteria(input);

        assert_eq!(
            parsed,
            vec![
                CriteriaGroup {
                    identifier: "1(b)".to_string(),
                    criteria: vec![entry("Gregorio IX", 1.5)],
                },
                CriteriaGroup {
                    identifier: "2(a)".to_string(),
                    criteria: vec![entry("strumento della scomunica", 3.0)],
                },
            ]
        );
    }

    #[test]
    fn header_without_entries_is_dropped() {
        let input = "Evaluation Criteria 3(a):\nNo rubric provided.\n\
            Evaluation Criteria 3(b):\nCriteria: cites sources\nmarks: 2";

        let parsed = parse_criteria(input);

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].identifier, "3(b)");
        assert!(parsed.iter().all(|group| !group.criteria.is_empty()));
    }

    #[test]
    fn unrecognized_marker_closes_previous_section() {
        let input = "Evaluation Criteria 1(a):\nCriteria: first\nmarks: 1\n\
            Evaluation Criteria for Question 2:\nCriteria: orphan\nmarks: 4";

        let parsed = parse_criteria(input);

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].criteria, vec![entry("first", 1.0)]);
    }

    #[test]
    fn keywords_are_case_sensitive() {
        let input = "Evaluation Criteria 4:\ncriteria: lower\nmarks: 1\nCriteria: upper\nMarks: 2";

        assert!(parse_criteria(input).is_empty());
        assert!(parse_criteria("evaluation criteria 4:\nCriteria: x\nmarks: 1").is_empty());
    }

    #[test]
    fn reparsing_is_idempotent() {
        let input = "Evaluation Criteria 1(a):\nCriteria: a\nmarks: 1\nCriteria: b\nmarks: 2";
        assert_eq!(parse_criteria(input), parse_criteria(input));
    }
}
