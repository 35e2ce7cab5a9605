use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::api::uploads::MultipartForm;
use crate::core::state::AppState;
use crate::services::assessment::{
    evaluate_batch, extract_all, within_deadline, AssessmentRecord, EvaluationOptions,
};
use crate::services::text_extraction::DocumentKind;

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/evaluate-assignment", post(evaluate_assignment))
}

/// Scores a whole assignment from its question sheet, answer sheet and
/// rubric.
pub(crate) async fn evaluate_assignment(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<AssessmentRecord>>, ApiError> {
    let storage = state.settings().storage();
    let mut form = MultipartForm::read(&mut multipart, storage).await?;

    let documents = vec![
        form.take_file("questionFile")?.into_document(DocumentKind::Question, storage)?,
        form.take_file("answerFile")?.into_document(DocumentKind::Answer, storage)?,
        form.take_file("criteriaFile")?.into_document(DocumentKind::Criteria, storage)?,
    ];

    let options = EvaluationOptions::from_settings(state.settings());
    let records = within_deadline(options.deadline, async {
        let texts = extract_all(state.extractor(), documents).await?;
        evaluate_batch(
            state.oracle(),
            &texts[0],
            &texts[1],
            &texts[2],
            options.strict_validation,
        )
        .await
    })
    .await?;

    tracing::info!(records = records.len(), "Assignment evaluated");

    Ok(Json(records))
}
