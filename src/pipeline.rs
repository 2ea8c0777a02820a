//! Request sequencing for the two extraction entry points.
//!
//! validate input -> check quota -> extract -> log -> increment (success only).
//! Rejections before extraction leave no trace in storage.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::extractor::{ExtractionAttempt, RecipeExtractor};
use crate::limiter::{AttemptRecord, RateLimiter, DAILY_EXTRACTION_LIMIT};
use crate::schema::{ExtractedRecipeData, ExtractionModule};
use crate::sites::parse_supported_url;

/// Longest accepted recipe text, in characters after trimming.
pub const MAX_TEXT_CHARS: usize = 10_000;

/// Success payload for both entry points.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResponse {
    pub extraction_log_id: Uuid,
    pub extracted_data: ExtractedRecipeData,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Echo of the submitted text; text extractions only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

#[derive(Clone)]
pub struct ExtractionService {
    extractor: Arc<RecipeExtractor>,
    limiter: RateLimiter,
}

impl ExtractionService {
    pub fn new(extractor: Arc<RecipeExtractor>, limiter: RateLimiter) -> Self {
        Self { extractor, limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn extract_from_text(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<ExtractionResponse, ApiError> {
        let text = validate_text(text)?;
        self.ensure_quota(user_id).await?;

        let attempt = self.extractor.extract_from_text(text).await;
        let mut response = self
            .finish(user_id, ExtractionModule::Text, text, attempt)
            .await?;
        response.original_text = Some(text.to_string());
        Ok(response)
    }

    pub async fn extract_from_url(
        &self,
        user_id: &str,
        url: &str,
    ) -> Result<ExtractionResponse, ApiError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ApiError::new(
                axum::http::StatusCode::BAD_REQUEST,
                "INVALID_URL",
                "URL is required",
            ));
        }
        parse_supported_url(url)?;
        self.ensure_quota(user_id).await?;

        let attempt = self.extractor.extract_from_url(url).await;
        self.finish(user_id, ExtractionModule::Url, url, attempt)
            .await
    }

    async fn ensure_quota(&self, user_id: &str) -> Result<(), ApiError> {
        let allowed = self
            .limiter
            .check_daily_limit(user_id)
            .await
            .map_err(|e| ApiError::storage(&e))?;
        if allowed {
            Ok(())
        } else {
            Err(ApiError::daily_limit_exceeded(DAILY_EXTRACTION_LIMIT))
        }
    }

    /// Record the attempt and turn the outcome into the caller's response.
    /// The logged duration is model time only.
    async fn finish(
        &self,
        user_id: &str,
        module: ExtractionModule,
        input: &str,
        attempt: ExtractionAttempt,
    ) -> Result<ExtractionResponse, ApiError> {
        let duration_ms = attempt.model_duration.map(|d| d.as_millis() as i64);
        let result = match attempt.outcome {
            Ok(result) if !result.has_errors => result,
            Ok(result) => {
                let message = result.warnings.join("; ");
                self.log_failure(user_id, module, input, &message, duration_ms)
                    .await;
                return Err(ApiError::extraction_failed(&result));
            }
            Err(err) => {
                self.log_failure(user_id, module, input, &err.to_string(), duration_ms)
                    .await;
                return Err(err.into());
            }
        };

        let log_id = self
            .limiter
            .log_extraction_attempt(AttemptRecord {
                user_id,
                module,
                input,
                data: Some(&result.data),
                error_message: None,
                tokens_used: None,
                duration_ms,
            })
            .await
            .map_err(|e| ApiError::storage(&e))?;

        if let Err(e) = self.limiter.increment_daily_count(user_id).await {
            warn!("Failed to increment daily count for {}: {:?}", user_id, e);
        }

        info!(
            "{} extraction {} succeeded for {} (model {:?} ms, {} warnings)",
            module,
            log_id,
            user_id,
            duration_ms,
            result.warnings.len()
        );

        Ok(ExtractionResponse {
            extraction_log_id: log_id,
            extracted_data: result.data,
            warnings: result.warnings,
            original_text: None,
        })
    }

    /// A failed log write must not mask the extraction failure.
    async fn log_failure(
        &self,
        user_id: &str,
        module: ExtractionModule,
        input: &str,
        message: &str,
        duration_ms: Option<i64>,
    ) {
        warn!("{} extraction failed for {}: {}", module, user_id, message);

        let record = AttemptRecord {
            user_id,
            module,
            input,
            data: None,
            error_message: Some(message),
            tokens_used: None,
            duration_ms,
        };
        if let Err(e) = self.limiter.log_extraction_attempt(record).await {
            warn!("Failed to log extraction failure for {}: {:?}", user_id, e);
        }
    }
}

fn validate_text(text: &str) -> Result<&str, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ApiError::new(
            axum::http::StatusCode::BAD_REQUEST,
            "MISSING_TEXT",
            "Recipe text is required",
        ));
    }

    let length = text.chars().count();
    if length > MAX_TEXT_CHARS {
        return Err(ApiError::new(
            axum::http::StatusCode::BAD_REQUEST,
            "TEXT_TOO_LONG",
            format!(
                "Recipe text is too long ({} characters, at most {} allowed)",
                length, MAX_TEXT_CHARS
            ),
        ));
    }

    Ok(text)
}
