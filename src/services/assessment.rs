use std::future::Future;
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use thiserror::Error;

use crate::core::config::Settings;
use crate::parsing::{
    normalize_identifier, parse_answers, parse_criteria, parse_questions, CriteriaGroup,
    ParsedAnswer, ParsedQuestion,
};
use crate::services::ai_grading::{
    CriteriaSpec, CriterionScore, OracleError, OracleVerdict, Persona, ScoringOracle,
    ScoringRequest,
};
use crate::services::text_extraction::{ExtractionError, TextExtractor, UploadedDocument};

/// Rejections of oracle output that does not fit the submitted rubric.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum ValidationError {
    #[error("criterion '{criterion}' scored {score} outside [0, {max_score}]")]
    ScoreOutOfRange { criterion: String, score: f64, max_score: f64 },
    #[error("total score {total} outside [0, {limit}]")]
    TotalOutOfRange { total: f64, limit: f64 },
    #[error("criterion '{0}' was not submitted")]
    UnknownCriterion(String),
}

#[derive(Debug, Error)]
pub(crate) enum EvaluationError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("scoring failed for question {identifier}: {source}")]
    Oracle { identifier: String, source: OracleError },
    #[error("oracle output rejected for question {identifier}: {source}")]
    Validation { identifier: String, source: ValidationError },
    #[error("evaluation exceeded the {0:?} deadline")]
    DeadlineExceeded(Duration),
}

const LIMIT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub(crate) struct EvaluationOptions {
    pub(crate) deadline: Duration,
    pub(crate) strict_validation: bool,
}

impl EvaluationOptions {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            deadline: Duration::from_secs(settings.evaluation().request_timeout_seconds),
            strict_validation: settings.evaluation().strict_oracle_validation,
        }
    }
}

/// One question ready for scoring, with the outcome of its answer and
/// rubric lookups.
#[derive(Debug, Clone)]
pub(crate) struct JoinedQuestion {
    pub(crate) request: ScoringRequest,
    pub(crate) total_marks: u32,
    pub(crate) answer_missing: bool,
    pub(crate) criteria_missing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AssessmentRecord {
    pub(crate) identifier: String,
    pub(crate) question: String,
    pub(crate) answer_missing: bool,
    pub(crate) criteria_missing: bool,
    pub(crate) criteria_scores: Vec<CriterionScore>,
    pub(crate) total_score: f64,
    pub(crate) max_score: u32,
}

/// Left outer join from the question list. The first answer and the first
/// criteria group with the same identifier win; misses fall back to empty
/// text and an empty rubric.
pub(crate) fn join_documents(
    questions: Vec<ParsedQuestion>,
    answers: &[ParsedAnswer],
    groups: &[CriteriaGroup],
) -> Vec<JoinedQuestion> {
    questions
        .into_iter()
        .map(|question| {
            let answer = answers.iter().find(|answer| answer.identifier == question.identifier);
            let group = groups.iter().find(|group| group.identifier == question.identifier);

            JoinedQuestion {
                request: ScoringRequest {
                    identifier: Some(question.identifier),
                    question: question.question_text,
                    answer: answer.map(|answer| answer.answer_text.clone()).unwrap_or_default(),
                    criteria: CriteriaSpec::Marks(
                        group.map(|group| group.criteria.clone()).unwrap_or_default(),
                    ),
                    total_marks: f64::from(question.total_marks),
                    persona: Persona::Expert,
                },
                total_marks: question.total_marks,
                answer_missing: answer.is_none(),
                criteria_missing: group.is_none(),
            }
        })
        .collect()
}

/// Parses the three documents, joins them and scores every question
/// concurrently. Records keep question order; any single failure fails the
/// whole batch.
pub(crate) async fn evaluate_batch(
    oracle: &dyn ScoringOracle,
    question_text: &str,
    answer_text: &str,
    criteria_text: &str,
    strict_validation: bool,
) -> Result<Vec<AssessmentRecord>, EvaluationError> {
    let questions = parse_questions(question_text);
    let answers = parse_answers(answer_text);
    let groups = parse_criteria(criteria_text);

    tracing::info!(
        questions = questions.len(),
        answers = answers.len(),
        criteria_groups = groups.len(),
        "Documents parsed"
    );

    let joined = join_documents(questions, &answers, &groups);
    for item in joined.iter().filter(|item| item.answer_missing || item.criteria_missing) {
        tracing::warn!(
            question = %item.request.label(),
            answer_missing = item.answer_missing,
            criteria_missing = item.criteria_missing,
            "Question scored with defaulted inputs"
        );
    }

    let outcome =
        try_join_all(joined.into_iter().map(|item| score_joined(oracle, item, strict_validation)))
            .await;
    record_outcome("batch", &outcome);
    outcome
}

async fn score_joined(
    oracle: &dyn ScoringOracle,
    item: JoinedQuestion,
    strict_validation: bool,
) -> Result<AssessmentRecord, EvaluationError> {
    let verdict = score_checked(oracle, &item.request, strict_validation).await?;
    let JoinedQuestion { request, total_marks, answer_missing, criteria_missing } = item;

    Ok(AssessmentRecord {
        identifier: request.identifier.unwrap_or_default(),
        question: request.question,
        answer_missing,
        criteria_missing,
        criteria_scores: verdict.criteria_scores,
        total_score: verdict.total_score,
        max_score: total_marks,
    })
}

/// Scores one standalone answer.
pub(crate) async fn evaluate_single(
    oracle: &dyn ScoringOracle,
    request: &ScoringRequest,
    strict_validation: bool,
) -> Result<OracleVerdict, EvaluationError> {
    let outcome = score_checked(oracle, request, strict_validation).await;
    record_outcome("single", &outcome);
    outcome
}

async fn score_checked(
    oracle: &dyn ScoringOracle,
    request: &ScoringRequest,
    strict_validation: bool,
) -> Result<OracleVerdict, EvaluationError> {
    let verdict = oracle.score(request).await.map_err(|source| EvaluationError::Oracle {
        identifier: request.label().to_string(),
        source,
    })?;

    if strict_validation {
        verify_verdict(request, &verdict).map_err(|source| EvaluationError::Validation {
            identifier: request.label().to_string(),
            source,
        })?;
    }

    Ok(verdict)
}

/// Checks every score against the limit submitted for its criterion, and
/// that returned criterion names belong to the submitted rubric.
pub(crate) fn verify_verdict(
    request: &ScoringRequest,
    verdict: &OracleVerdict,
) -> Result<(), ValidationError> {
    let submitted: Vec<(String, f64)> = request
        .criteria
        .limits(request.total_marks)
        .into_iter()
        .map(|(name, limit)| (normalize_identifier(name), limit))
        .collect();

    for score in &verdict.criteria_scores {
        let out_of_range = |max_score: f64| ValidationError::ScoreOutOfRange {
            criterion: score.criterion.clone(),
            score: score.score,
            max_score,
        };

        let in_range = score.score.is_finite()
            && score.max_score.is_finite()
            && score.score >= 0.0
            && score.score <= score.max_score;
        if !in_range {
            return Err(out_of_range(score.max_score));
        }

        if submitted.is_empty() {
            continue;
        }
        let name = normalize_identifier(&score.criterion);
        let Some(&(_, limit)) = submitted.iter().find(|(candidate, _)| *candidate == name) else {
            return Err(ValidationError::UnknownCriterion(score.criterion.clone()));
        };
        if exceeds(score.max_score, limit) || exceeds(score.score, limit) {
            return Err(out_of_range(limit));
        }
    }

    let total = verdict.total_score;
    let above_limit = request.total_marks > 0.0 && total > request.total_marks;
    if !total.is_finite() || total < 0.0 || above_limit {
        return Err(ValidationError::TotalOutOfRange { total, limit: request.total_marks });
    }

    Ok(())
}

// Weighted limits are products of floats, so allow for rounding.
fn exceeds(value: f64, limit: f64) -> bool {
    value > limit + LIMIT_TOLERANCE
}

/// Extracts every document concurrently, preserving input order.
pub(crate) async fn extract_all(
    extractor: &dyn TextExtractor,
    documents: Vec<UploadedDocument>,
) -> Result<Vec<String>, EvaluationError> {
    let texts =
        try_join_all(documents.into_iter().map(|document| extractor.extract_text(document)))
            .await?;
    Ok(texts)
}

/// Abandons `work` once `deadline` elapses.
pub(crate) async fn within_deadline<T, F>(deadline: Duration, work: F) -> Result<T, EvaluationError>
where
    F: Future<Output = Result<T, EvaluationError>>,
{
    tokio::time::timeout(deadline, work)
        .await
        .map_err(|_| EvaluationError::DeadlineExceeded(deadline))?
}

fn record_outcome<T>(flow: &'static str, outcome: &Result<T, EvaluationError>) {
    let result = match outcome {
        Ok(_) => "success",
        Err(EvaluationError::Validation { .. }) => "rejected",
        Err(_) => "failed",
    };
    metrics::counter!("evaluations_total", "flow" => flow, "outcome" => result).increment(1);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::parsing::CriterionEntry;
    use crate::schemas::evaluation::EvaluationCriterionInput;
    use crate::test_support::StubOracle;

    const QUESTIONS: &str = "Question 1(a): What is X? Total Marks: 10";
    const ANSWERS: &str = "Answer 1(a): X is Y.";
    const CRITERIA: &str = "Evaluation Criteria 1(a):\nCriteria: mentions Y\nmarks: 10";

    fn score(criterion: &str, score: f64, max_score: f64) -> CriterionScore {
        CriterionScore {
            criterion: criterion.to_string(),
            score,
            max_score,
            justification: "ok".to_string(),
        }
    }

    fn marks_request(criteria: Vec<CriterionEntry>, total_marks: f64) -> ScoringRequest {
        ScoringRequest {
            identifier: Some("1(a)".to_string()),
            question: "What is X?".to_string(),
            answer: "X is Y.".to_string(),
            criteria: CriteriaSpec::Marks(criteria),
            total_marks,
            persona: Persona::Expert,
        }
    }

    #[tokio::test]
    async fn end_to_end_dispatches_joined_question() {
        let oracle = StubOracle::full_marks();

        let records =
            evaluate_batch(&oracle, QUESTIONS, ANSWERS, CRITERIA, true).await.expect("records");

        let calls = oracle.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].question, "What is X?");
        assert_eq!(calls[0].answer, "X is Y.");
        assert_eq!(calls[0].total_marks, 10.0);
        match &calls[0].criteria {
            CriteriaSpec::Marks(entries) => assert_eq!(
                entries,
                &vec![CriterionEntry { description: "mentions Y".to_string(), marks: 10.0 }]
            ),
            other => panic!("unexpected criteria: {other:?}"),
        }

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identifier, "1(a)");
        assert_eq!(records[0].question, "What is X?");
        assert_eq!(records[0].max_score, 10);
        assert_eq!(records[0].total_score, 10.0);
        assert!(!records[0].answer_missing);
        assert!(!records[0].criteria_missing);
    }

    #[tokio::test]
    async fn unmatched_question_gets_defaults_and_flags() {
        let oracle = StubOracle::full_marks();
        let questions = format!("{QUESTIONS}\nQuestion 3: Why? Marks: 4");

        let records =
            evaluate_batch(&oracle, &questions, ANSWERS, CRITERIA, true).await.expect("records");

        let calls = oracle.calls();
        let third = calls.iter().find(|call| call.label() == "3").expect("question 3 call");
        assert_eq!(third.answer, "");
        assert!(third.criteria.limits(third.total_marks).is_empty());

        assert_eq!(records[1].identifier, "3");
        assert!(records[1].answer_missing);
        assert!(records[1].criteria_missing);
        assert_eq!(records[1].max_score, 4);
    }

    #[test]
    fn join_takes_first_match_and_drops_orphans() {
        let questions = parse_questions("Question 2: Q?");
        let answers = parse_answers("Answer 2: first\nAnswer 2: second\nAnswer 9: orphan");

        let joined = join_documents(questions, &answers, &[]);

        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].request.answer, "first");
        assert!(joined[0].criteria_missing);
    }

    #[tokio::test]
    async fn records_follow_question_order_not_completion_order() {
        let oracle = StubOracle::full_marks().delay_for("1", Duration::from_millis(50));
        let questions = "Question 1: slow? Marks: 2\nQuestion 2: fast? Marks: 3";

        let records = evaluate_batch(&oracle, questions, "", "", true).await.expect("records");

        let ids: Vec<_> = records.iter().map(|record| record.identifier.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn one_failed_question_fails_the_batch() {
        let oracle = StubOracle::full_marks().failing_on("2");
        let questions = "Question 1: a?\nQuestion 2: b?\nQuestion 3: c?";

        let err = evaluate_batch(&oracle, questions, "", "", true).await.expect_err("failure");

        match err {
            EvaluationError::Oracle { identifier, .. } => assert_eq!(identifier, "2"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn strict_validation_rejects_inflated_scores() {
        let inflated = OracleVerdict {
            criteria_scores: vec![score("mentions Y", 12.0, 10.0)],
            total_score: 12.0,
        };

        let strict = evaluate_batch(
            &StubOracle::returning(inflated.clone()),
            QUESTIONS,
            ANSWERS,
            CRITERIA,
            true,
        )
        .await
        .expect_err("rejected");
        assert!(matches!(strict, EvaluationError::Validation { .. }));

        let lenient =
            evaluate_batch(&StubOracle::returning(inflated), QUESTIONS, ANSWERS, CRITERIA, false)
                .await
                .expect("trusted as returned");
        assert_eq!(lenient[0].total_score, 12.0);
    }

    #[test]
    fn verify_verdict_checks_criterion_names_and_totals() {
        let request = marks_request(
            vec![CriterionEntry { description: "Mentions  Y".to_string(), marks: 10.0 }],
            10.0,
        );

        let renamed = OracleVerdict {
            criteria_scores: vec![score(" mentions y ", 5.0, 10.0)],
            total_score: 5.0,
        };
        assert_eq!(verify_verdict(&request, &renamed), Ok(()));

        let unknown = OracleVerdict {
            criteria_scores: vec![score("style", 5.0, 10.0)],
            total_score: 5.0,
        };
        assert_eq!(
            verify_verdict(&request, &unknown),
            Err(ValidationError::UnknownCriterion("style".to_string()))
        );

        let over = OracleVerdict { criteria_scores: Vec::new(), total_score: 10.5 };
        assert!(matches!(
            verify_verdict(&request, &over),
            Err(ValidationError::TotalOutOfRange { .. })
        ));

        let negative = OracleVerdict {
            criteria_scores: vec![score("mentions Y", -1.0, 10.0)],
            total_score: 0.0,
        };
        assert!(matches!(
            verify_verdict(&request, &negative),
            Err(ValidationError::ScoreOutOfRange { .. })
        ));
    }

    #[test]
    fn verify_verdict_bounds_scores_by_submitted_marks() {
        let request = marks_request(
            vec![
                CriterionEntry { description: "a".to_string(), marks: 1.0 },
                CriterionEntry { description: "b".to_string(), marks: 9.0 },
            ],
            10.0,
        );

        let inflated = OracleVerdict {
            criteria_scores: vec![score("a", 9.0, 9.0)],
            total_score: 9.0,
        };
        assert_eq!(
            verify_verdict(&request, &inflated),
            Err(ValidationError::ScoreOutOfRange {
                criterion: "a".to_string(),
                score: 9.0,
                max_score: 1.0,
            })
        );

        let raised_max = OracleVerdict {
            criteria_scores: vec![score("a", 1.0, 5.0)],
            total_score: 1.0,
        };
        assert!(matches!(
            verify_verdict(&request, &raised_max),
            Err(ValidationError::ScoreOutOfRange { .. })
        ));

        let fair = OracleVerdict {
            criteria_scores: vec![score("a", 1.0, 1.0), score("b", 8.5, 9.0)],
            total_score: 9.5,
        };
        assert_eq!(verify_verdict(&request, &fair), Ok(()));
    }

    #[test]
    fn verify_verdict_bounds_weighted_criteria_by_share_of_total() {
        let request = ScoringRequest {
            criteria: CriteriaSpec::Weighted(vec![
                EvaluationCriterionInput {
                    name: "Accuracy".to_string(),
                    description: "Facts are correct".to_string(),
                    weightage: 60.0,
                },
                EvaluationCriterionInput {
                    name: "Clarity".to_string(),
                    description: "Well organised".to_string(),
                    weightage: 40.0,
                },
            ]),
            ..marks_request(Vec::new(), 10.0)
        };

        let full = OracleVerdict {
            criteria_scores: vec![score("Accuracy", 6.0, 6.0), score("Clarity", 4.0, 4.0)],
            total_score: 10.0,
        };
        assert_eq!(verify_verdict(&request, &full), Ok(()));

        let over_share = OracleVerdict {
            criteria_scores: vec![score("Clarity", 7.0, 7.0)],
            total_score: 7.0,
        };
        assert_eq!(
            verify_verdict(&request, &over_share),
            Err(ValidationError::ScoreOutOfRange {
                criterion: "Clarity".to_string(),
                score: 7.0,
                max_score: 4.0,
            })
        );
    }

    #[test]
    fn verify_verdict_skips_total_limit_without_declared_marks() {
        let request = marks_request(Vec::new(), 0.0);
        let verdict = OracleVerdict {
            criteria_scores: vec![score("anything", 3.0, 5.0)],
            total_score: 3.0,
        };

        assert_eq!(verify_verdict(&request, &verdict), Ok(()));
    }

    #[tokio::test]
    async fn deadline_abandons_slow_batch() {
        let oracle = StubOracle::full_marks().delay_for("1(a)", Duration::from_millis(500));

        let err = within_deadline(
            Duration::from_millis(20),
            evaluate_batch(&oracle, QUESTIONS, ANSWERS, CRITERIA, true),
        )
        .await
        .expect_err("deadline");

        assert!(matches!(err, EvaluationError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn empty_documents_produce_no_records() {
        let oracle = StubOracle::full_marks();

        let records = evaluate_batch(&oracle, "", "", "", true).await.expect("records");

        assert!(records.is_empty());
        assert!(oracle.calls().is_empty());
    }
}
