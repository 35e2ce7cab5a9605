use std::sync::OnceLock;

use regex::Regex;

use super::{normalize_identifier, ParsedQuestion};

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)Question\s*(\d+(?:\s*\([a-z]\))?)\s*:\s*")
            .expect("question header pattern")
    })
}

// A question body runs until the next header, or the next sub-lettered
// "Question <n>(<x>)" reference even without a colon. A bare "question 2"
// in prose does not end it.
fn boundary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)Question\s*\d+(?:\s*\([a-z]\)|\s*:)").expect("question boundary pattern")
    })
}

fn marks_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:Total Marks|Marks|Punteggio Totale|Punti Totali|Valutazione)[:.\-\s]*(\d+)",
        )
        .expect("marks pattern")
    })
}

/// Extracts every `Question <id>: <body>` block, in document order.
///
/// Duplicate identifiers are kept as separate entries.
pub(crate) fn parse_questions(input: &str) -> Vec<ParsedQuestion> {
    let mut questions = Vec::new();
    let mut cursor = 0;

    while let Some(header) = header_pattern().captures_at(input, cursor) {
        let (Some(whole), Some(identifier)) = (header.get(0), header.get(1)) else {
            break;
        };

        let body_start = whole.end();
        let body_end = boundary_pattern()
            .find_at(input, body_start)
            .map_or(input.len(), |boundary| boundary.start());

        questions.push(build_question(identifier.as_str(), &input[body_start..body_end]));
        cursor = body_end;
    }

    questions
}

fn build_question(identifier: &str, body: &str) -> ParsedQuestion {
    let body = body.trim();
    let annotation = marks_pattern()
        .captures(body)
        .and_then(|caps| Some((caps.get(0)?, caps.get(1)?)));

    let (question_text, total_marks) = match annotation {
        Some((annotation, value)) => {
            let mut text = String::with_capacity(body.len());
            text.push_str(&body[..annotation.start()]);
            text.push_str(&body[annotation.end()..]);
            (text.trim().to_string(), value.as_str().parse::<u32>().unwrap_or(0))
        }
        None => (body.to_string(), 0),
    };

    ParsedQuestion { identifier: normalize_identifier(identifier), question_text, total_marks }
}
