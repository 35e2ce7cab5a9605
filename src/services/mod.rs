pub(crate) mod ai_grading;
pub(crate) mod assessment;
pub(crate) mod datalab_ocr;
pub(crate) mod storage;
pub(crate) mod text_extraction;

const MAX_BACKOFF_SECS: u64 = 60;

/// Exponential retry delay, capped so large retry counts cannot overflow.
pub(crate) fn backoff_secs(attempt: u32) -> u64 {
    2_u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS)
}
