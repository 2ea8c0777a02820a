//! Recipe extraction data types.
//!
//! `ExtractedRecipeData` is the contract shared by the model, the validator and
//! the HTTP responses. `recipe_extraction_schema()` is the JSON Schema handed to
//! the model as a strict structured-output format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name given to the placeholder recipe returned when extraction fails.
pub const PLACEHOLDER_RECIPE_NAME: &str = "New Recipe";

/// Fixed vocabulary the model's tag suggestions are filtered against.
pub const ALLOWED_TAGS: &[&str] = &[
    "śniadanie",
    "obiad",
    "kolacja",
    "deser",
    "przekąska",
    "zupa",
    "sałatka",
    "napój",
    "ciasto",
    "pieczywo",
    "makaron",
    "mięso",
    "drób",
    "ryba",
    "owoce morza",
    "wegetariańskie",
    "wegańskie",
    "bezglutenowe",
    "bez laktozy",
    "szybkie",
    "łatwe",
    "na imprezę",
    "święta",
    "grill",
    "kuchnia polska",
    "kuchnia włoska",
    "kuchnia azjatycka",
    "kuchnia meksykańska",
];

/// Returns true if `tag` belongs to the allowed tag set.
pub fn is_allowed_tag(tag: &str) -> bool {
    ALLOWED_TAGS.contains(&tag)
}

/// Structured recipe produced by an extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecipeData {
    pub name: String,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparation_time: Option<String>,
    #[serde(default)]
    pub suggested_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl ExtractedRecipeData {
    /// The fixed data returned alongside `has_errors = true`.
    pub fn placeholder() -> Self {
        Self {
            name: PLACEHOLDER_RECIPE_NAME.to_string(),
            ingredients: Vec::new(),
            steps: Vec::new(),
            preparation_time: None,
            suggested_tags: Vec::new(),
            image_url: None,
            source_url: None,
        }
    }
}

/// Uniform result threaded from the validator up to the entry points.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionValidationResult {
    pub data: ExtractedRecipeData,
    pub warnings: Vec<String>,
    #[serde(rename = "hasErrors")]
    pub has_errors: bool,
}

/// Input modality of an extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionModule {
    Text,
    Url,
}

impl ExtractionModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Url => "url",
        }
    }
}

impl std::fmt::Display for ExtractionModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit row per extraction attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAttemptLog {
    pub id: Uuid,
    pub user_id: String,
    pub module: ExtractionModule,
    pub input_data: String,
    pub extraction_result: Option<ExtractedRecipeData>,
    pub error_message: Option<String>,
    pub tokens_used: Option<i64>,
    /// Milliseconds spent waiting on the extraction.
    pub generation_duration: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ExtractionAttemptLog {
    pub fn new(user_id: &str, module: ExtractionModule, input_data: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            module,
            input_data: input_data.to_string(),
            extraction_result: None,
            error_message: None,
            tokens_used: None,
            generation_duration: None,
            created_at: Utc::now(),
        }
    }
}

/// JSON Schema sent to the model as the structured-output contract.
pub fn recipe_extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "name": {
                "type": "string",
                "description": "Recipe name"
            },
            "ingredients": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Ingredients, one per entry, with quantities"
            },
            "steps": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Preparation steps in order"
            },
            "preparation_time": {
                "type": "string",
                "description": "Total preparation time, free text"
            },
            "suggested_tags": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Tags chosen only from the allowed list"
            },
            "image_url": { "type": "string" },
            "source_url": { "type": "string" }
        },
        "required": ["name", "ingredients", "steps", "suggested_tags"],
        "additionalProperties": false
    })
}
