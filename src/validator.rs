//! Validation of the model's structured output.
//!
//! Only `name`, `ingredients` and `steps` are load-bearing: a shortfall in any
//! of them replaces the whole result with the placeholder recipe. Everything
//! else degrades gracefully (bad tags are dropped, unknown fields ignored).

use serde_json::Value;
use tracing::{debug, warn};

use crate::schema::{is_allowed_tag, ExtractedRecipeData, ExtractionValidationResult};

/// A schema violation, keyed by the top-level field it concerns.
#[derive(Debug, Clone, PartialEq)]
struct Issue {
    field: String,
    message: String,
}

impl Issue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate parsed model output.
pub fn validate(raw: &Value) -> ExtractionValidationResult {
    match parse_recipe(raw) {
        Ok(mut data) => {
            let mut warnings = Vec::new();
            let (kept, rejected) = filter_tags(&data.suggested_tags);
            if !rejected.is_empty() {
                warn!("Dropping {} unsupported tags: {:?}", rejected.len(), rejected);
                warnings.push(format!(
                    "Removed unsupported tags: {}",
                    rejected.join(", ")
                ));
            }
            data.suggested_tags = kept;

            debug!(
                "Recipe '{}' validated ({} ingredients, {} steps, {} tags)",
                data.name,
                data.ingredients.len(),
                data.steps.len(),
                data.suggested_tags.len()
            );

            ExtractionValidationResult {
                data,
                warnings,
                has_errors: false,
            }
        }
        Err(issues) => {
            warn!("Model output failed validation: {:?}", issues);
            let mut warnings: Vec<String> = Vec::new();
            for issue in &issues {
                let warning = warning_for(issue);
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }

            ExtractionValidationResult {
                data: ExtractedRecipeData::placeholder(),
                warnings,
                has_errors: true,
            }
        }
    }
}

fn warning_for(issue: &Issue) -> String {
    match issue.field.as_str() {
        "name" => "Could not extract the recipe name - fill it in manually.".to_string(),
        "ingredients" => {
            "Could not extract the ingredient list - add the ingredients manually.".to_string()
        }
        "steps" => "Could not extract the preparation steps - add them manually.".to_string(),
        _ => format!(
            "The AI response did not match the expected recipe format ({}).",
            issue.message
        ),
    }
}

fn parse_recipe(raw: &Value) -> Result<ExtractedRecipeData, Vec<Issue>> {
    let Some(obj) = raw.as_object() else {
        return Err(vec![Issue::new("", "expected a JSON object")]);
    };

    let mut issues = Vec::new();

    let name = match obj.get("name").and_then(Value::as_str).map(str::trim) {
        Some(name) if !name.is_empty() => Some(name.to_string()),
        Some(_) => {
            issues.push(Issue::new("name", "name must not be empty"));
            None
        }
        None => {
            issues.push(Issue::new("name", "name is required"));
            None
        }
    };

    let ingredients = required_string_list(obj.get("ingredients"), "ingredients", &mut issues);
    let steps = required_string_list(obj.get("steps"), "steps", &mut issues);

    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(ExtractedRecipeData {
        name: name.unwrap_or_default(),
        ingredients,
        steps,
        preparation_time: optional_string(obj.get("preparation_time")),
        suggested_tags: string_items(obj.get("suggested_tags")),
        image_url: optional_string(obj.get("image_url")),
        source_url: optional_string(obj.get("source_url")),
    })
}

/// An array of at least one string, each non-empty after trimming.
fn required_string_list(value: Option<&Value>, field: &str, issues: &mut Vec<Issue>) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        issues.push(Issue::new(field, format!("{} must be an array", field)));
        return Vec::new();
    };

    if items.is_empty() {
        issues.push(Issue::new(field, format!("{} must contain at least one entry", field)));
        return Vec::new();
    }

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item.as_str().map(str::trim) {
            Some(s) if !s.is_empty() => out.push(s.to_string()),
            _ => issues.push(Issue::new(
                field,
                format!("{}[{}] must be a non-empty string", field, i),
            )),
        }
    }
    out
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_items(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Split tags into (allowed, rejected), normalising case and dropping duplicates.
fn filter_tags(tags: &[String]) -> (Vec<String>, Vec<String>) {
    let mut kept: Vec<String> = Vec::new();
    let mut rejected: Vec<String> = Vec::new();

    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if kept.contains(&tag) || rejected.contains(&tag) {
            continue;
        }
        if is_allowed_tag(&tag) {
            kept.push(tag);
        } else {
            rejected.push(tag);
        }
    }

    (kept, rejected)
}
