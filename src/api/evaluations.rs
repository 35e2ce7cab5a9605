use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::uploads::MultipartForm;
use crate::core::state::AppState;
use crate::schemas::evaluation::{
    EvaluateAnswerForm, EvaluateAnswerResponse, EvaluationCriterionInput, Language, Subject,
};
use crate::services::ai_grading::{CriteriaSpec, Persona, ScoringRequest};
use crate::services::assessment::{
    evaluate_single, extract_all, within_deadline, EvaluationOptions,
};
use crate::services::text_extraction::DocumentKind;

const IMAGE_FIELD_SUFFIX: &str = "-image";

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/evaluate", post(evaluate_answer))
}

/// Scores one answer, photographed across one or more images, against
/// weighted criteria.
pub(crate) async fn evaluate_answer(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<EvaluateAnswerResponse>, ApiError> {
    let settings = state.settings();
    let mut form = MultipartForm::read(&mut multipart, settings.storage()).await?;

    let evaluation = parse_form(&form)?;
    evaluation.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    evaluation.check_criteria(settings.evaluation().max_criteria).map_err(ApiError::BadRequest)?;

    let images = form.take_files_with_suffix(IMAGE_FIELD_SUFFIX);
    if images.is_empty() {
        return Err(ApiError::BadRequest("At least one answer image is required".to_string()));
    }
    let max_images = settings.storage().max_images_per_evaluation;
    if images.len() as u64 > max_images {
        return Err(ApiError::BadRequest(format!(
            "Maximum number of images per evaluation exceeded ({max_images})"
        )));
    }
    let documents = images
        .into_iter()
        .map(|image| image.into_document(DocumentKind::Solution, settings.storage()))
        .collect::<Result<Vec<_>, _>>()?;

    let options = EvaluationOptions::from_settings(settings);
    let verdict = within_deadline(options.deadline, async {
        let texts = extract_all(state.extractor(), documents).await?;
        let request = ScoringRequest {
            identifier: None,
            question: evaluation.question.clone(),
            answer: texts.join(","),
            criteria: CriteriaSpec::Weighted(evaluation.evaluation_criteria.clone()),
            total_marks: evaluation.total_score,
            persona: Persona::Subject { language: evaluation.language, subject: evaluation.subject },
        };
        evaluate_single(state.oracle(), &request, options.strict_validation).await
    })
    .await?;

    tracing::info!(total_score = verdict.total_score, "Answer evaluated");

    Ok(Json(EvaluateAnswerResponse { result: verdict }))
}

fn parse_form(form: &MultipartForm) -> Result<EvaluateAnswerForm, ApiError> {
    let subject =
        form.required_text("subject")?.parse::<Subject>().map_err(ApiError::BadRequest)?;
    let language =
        form.required_text("language")?.parse::<Language>().map_err(ApiError::BadRequest)?;
    let evaluation_criteria: Vec<EvaluationCriterionInput> =
        serde_json::from_str(form.required_text("evaluationCriteria")?).map_err(|err| {
            ApiError::BadRequest(format!("evaluationCriteria must be a JSON array: {err}"))
        })?;
    let total_score = form
        .required_text("totalScore")?
        .parse::<f64>()
        .map_err(|_| ApiError::BadRequest("totalScore must be a number".to_string()))?;

    Ok(EvaluateAnswerForm {
        question: form.text("question").unwrap_or_default().trim().to_string(),
        subject,
        language,
        evaluation_criteria,
        total_score,
    })
}
