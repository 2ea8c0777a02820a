//! Recipe extraction from pasted text or a supported recipe page.

use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::fetch::{FetchError, HtmlFetcher};
use crate::openrouter::{
    ChatCompletion, ChatCompletionRequest, GatewayError, ModelParameters, ResponseFormat,
};
use crate::reducer::{self, ReduceError, ReducedContent};
use crate::schema::{recipe_extraction_schema, ExtractionValidationResult, ALLOWED_TAGS};
use crate::sites::{parse_supported_url, UrlRejection};
use crate::validator;

const SCHEMA_NAME: &str = "recipe_extraction";
const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 3000;

static SYSTEM_PROMPT: LazyLock<String> = LazyLock::new(|| {
    format!(
        r#"You extract structured recipes from text. Respond with a single JSON object and nothing else.

Use EXACTLY these field names:
- "name": the recipe name
- "ingredients": array of ingredients, one per entry, with quantities
- "steps": array of preparation steps in order
- "preparation_time": total preparation time as free text (omit if unknown)
- "suggested_tags": array of tags

Never use alternative or translated field names such as "nazwa", "skladniki", "składniki", "kroki", "przygotowanie", "czas_przygotowania" or "tagi".

"suggested_tags" may only contain tags from this list: {}.
Keep ingredients and steps in the language of the original recipe. Do not invent ingredients or steps that are not in the source."#,
        ALLOWED_TAGS.join(", ")
    )
});

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Url(#[from] UrlRejection),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Reduce(#[from] ReduceError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("The AI response was not valid JSON: {0}")]
    Parse(String),
}

/// Outcome of one extraction and the time spent waiting on the model.
#[derive(Debug)]
pub struct ExtractionAttempt {
    pub outcome: Result<ExtractionValidationResult, ExtractionError>,
    /// `None` when the run stopped before the model was called.
    pub model_duration: Option<Duration>,
}

/// Turns raw input into a validated recipe via the chat model.
pub struct RecipeExtractor {
    client: Arc<dyn ChatCompletion>,
    fetcher: Arc<dyn HtmlFetcher>,
}

impl RecipeExtractor {
    pub fn new(client: Arc<dyn ChatCompletion>, fetcher: Arc<dyn HtmlFetcher>) -> Self {
        Self { client, fetcher }
    }

    pub async fn extract_from_text(&self, text: &str) -> ExtractionAttempt {
        let mut model_duration = None;
        let outcome = self.run_text(text, &mut model_duration).await;
        ExtractionAttempt {
            outcome,
            model_duration,
        }
    }

    /// Fetch, reduce and extract a page. Rejects unsupported domains before
    /// any network call.
    pub async fn extract_from_url(&self, url: &str) -> ExtractionAttempt {
        let mut model_duration = None;
        let outcome = self.run_url(url, &mut model_duration).await;
        ExtractionAttempt {
            outcome,
            model_duration,
        }
    }

    async fn run_text(
        &self,
        text: &str,
        model_duration: &mut Option<Duration>,
    ) -> Result<ExtractionValidationResult, ExtractionError> {
        info!("Extracting recipe from text ({} chars)", text.chars().count());

        let user_message = format!("Extract the recipe from the following text:\n\n{}", text);
        let raw = self.request_recipe(user_message, model_duration).await?;
        Ok(validator::validate(&raw))
    }

    async fn run_url(
        &self,
        url: &str,
        model_duration: &mut Option<Duration>,
    ) -> Result<ExtractionValidationResult, ExtractionError> {
        let parsed = parse_supported_url(url)?;
        info!("Extracting recipe from {}", parsed);

        let html = self.fetcher.fetch(parsed.as_str()).await?;
        let page = reducer::reduce(&html, parsed.as_str())?;

        let mut raw = self
            .request_recipe(page_prompt(&page, parsed.as_str()), model_duration)
            .await?;

        // Page facts replace whatever the model guessed.
        if let Some(obj) = raw.as_object_mut() {
            obj.insert("source_url".to_string(), Value::String(url.trim().to_string()));
            obj.insert(
                "image_url".to_string(),
                page.image_url.clone().map_or(Value::Null, Value::String),
            );
        }

        Ok(validator::validate(&raw))
    }

    /// Ask the model for a recipe. `model_duration` covers the gateway call only.
    async fn request_recipe(
        &self,
        user_message: String,
        model_duration: &mut Option<Duration>,
    ) -> Result<Value, ExtractionError> {
        let request = ChatCompletionRequest {
            system_message: Some(SYSTEM_PROMPT.clone()),
            user_message,
            model_name: None,
            response_format: Some(ResponseFormat::json_schema(
                SCHEMA_NAME,
                recipe_extraction_schema(),
                true,
            )),
            model_parameters: Some(ModelParameters {
                temperature: Some(TEMPERATURE),
                max_tokens: Some(MAX_TOKENS),
                ..Default::default()
            }),
        };

        let started = Instant::now();
        let response = self.client.create_chat_completion(request).await;
        *model_duration = Some(started.elapsed());
        let response = response?;

        let content = response
            .content()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ExtractionError::Parse("empty response".to_string()))?;

        debug!("Raw model response length: {} chars", content.len());
        parse_llm_json(content)
    }
}

fn page_prompt(page: &ReducedContent, url: &str) -> String {
    let mut prompt = format!("Extract the recipe from this web page.\n\nURL: {}\n", url);
    if let Some(title) = &page.title {
        prompt.push_str(&format!("Title: {}\n", title));
    }
    prompt.push_str(&format!("\nPage content:\n\n{}", page.text));
    prompt
}

/// Parse model output as JSON, unwrapping a markdown code fence if present.
fn parse_llm_json(response: &str) -> Result<Value, ExtractionError> {
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    };

    serde_json::from_str(json_str).map_err(|e| {
        ExtractionError::Parse(format!(
            "{} ({})",
            e,
            json_str.chars().take(200).collect::<String>()
        ))
    })
}
