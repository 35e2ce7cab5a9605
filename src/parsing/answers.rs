use std::sync::OnceLock;

use regex::Regex;

use super::{normalize_identifier, ParsedAnswer};

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Without a separating space the identifier must start with a digit, so
    // "Answers:" is not a header.
    PATTERN.get_or_init(|| {
        Regex::new(r"^Answer(?:\s+(\S+?)|(\d\S*?)):").expect("answer header pattern")
    })
}

struct OpenAnswer {
    identifier: String,
    text: String,
}

impl OpenAnswer {
    fn append(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(line);
    }

    fn finish(self) -> ParsedAnswer {
        ParsedAnswer { identifier: self.identifier, answer_text: self.text.trim().to_string() }
    }
}

/// Line-oriented scan: an `Answer <id>:` line opens a record, every other
/// line continues the open one. Lines before the first header are dropped.
pub(crate) fn parse_answers(input: &str) -> Vec<ParsedAnswer> {
    let mut answers = Vec::new();
    let mut current: Option<OpenAnswer> = None;

    for line in input.trim().lines() {
        let header = header_pattern()
            .captures(line)
            .and_then(|caps| Some((caps.get(0)?.end(), caps.get(1).or(caps.get(2))?.as_str())));

        if let Some((prefix_end, identifier)) = header {
            if let Some(open) = current.take() {
                answers.push(open.finish());
            }
            let mut open =
                OpenAnswer { identifier: normalize_identifier(identifier), text: String::new() };
            open.append(line[prefix_end..].trim());
            current = Some(open);
        } else if let Some(open) = current.as_mut() {
            open.append(line.trim());
        }
    }

    if let Some(open) = current {
        answers.push(open.finish());
    }

    answers
}
