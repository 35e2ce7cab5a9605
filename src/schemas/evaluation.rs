use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::ai_grading::OracleVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum Language {
    English,
    Italian,
}

impl Language {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Italian => "Italian",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ENGLISH" => Ok(Self::English),
            "ITALIAN" => Ok(Self::Italian),
            other => Err(format!("Unsupported language '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum Subject {
    History,
    Essay,
    Philosophy,
}

impl Subject {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Essay => "essay writing",
            Self::Philosophy => "philosophy",
        }
    }
}

impl FromStr for Subject {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HISTORY" => Ok(Self::History),
            "ESSAY" => Ok(Self::Essay),
            "PHILOSOPHY" => Ok(Self::Philosophy),
            other => Err(format!("Unsupported subject '{other}'")),
        }
    }
}

/// One teacher-authored rubric line sent with a single answer evaluation.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub(crate) struct EvaluationCriterionInput {
    #[validate(length(min = 1, message = "criterion name must not be empty"))]
    pub(crate) name: String,
    #[validate(length(min = 1, message = "criterion description must not be empty"))]
    pub(crate) description: String,
    #[serde(alias = "weight")]
    #[validate(range(min = 0.0, max = 100.0, message = "weightage must be between 0 and 100"))]
    pub(crate) weightage: f64,
}

#[derive(Debug, Validate)]
pub(crate) struct EvaluateAnswerForm {
    #[validate(length(min = 1, message = "question must not be empty"))]
    pub(crate) question: String,
    pub(crate) subject: Subject,
    pub(crate) language: Language,
    #[validate(length(min = 1, message = "at least one evaluation criterion is required"), nested)]
    pub(crate) evaluation_criteria: Vec<EvaluationCriterionInput>,
    #[validate(range(exclusive_min = 0.0, message = "totalScore must be positive"))]
    pub(crate) total_score: f64,
}

impl EvaluateAnswerForm {
    /// Rules `validator` cannot express: the criteria count ceiling and the
    /// weightages adding up to exactly 100.
    pub(crate) fn check_criteria(&self, max_criteria: usize) -> Result<(), String> {
        if self.evaluation_criteria.len() > max_criteria {
            return Err(format!("At most {max_criteria} evaluation criteria are allowed"));
        }

        let total: f64 = self.evaluation_criteria.iter().map(|criterion| criterion.weightage).sum();
        if (total - 100.0).abs() > 1e-6 {
            return Err(format!("Criteria weightages must add up to 100 (got {total})"));
        }

        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EvaluateAnswerResponse {
    pub(crate) result: OracleVerdict,
}
