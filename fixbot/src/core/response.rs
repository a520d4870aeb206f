//! Strict parsing of model responses into a typed verdict.
//!
//! The model is asked for one JSON object. We accept it either inside a fenced
//! code block or as the first balanced top-level `{...}` span, validate it
//! against the embedded JSON Schema, and only then deserialize.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::Deserialize;
use serde_json::Value;

pub const FIX_RESPONSE_SCHEMA: &str = include_str!("../../schemas/fix_response.schema.json");

static VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(FIX_RESPONSE_SCHEMA).expect("embedded schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded schema should compile")
});

/// Why a model response could not be turned into a verdict.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("response contained no JSON object")]
    NoJson,
    #[error("response JSON is malformed: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("response does not match the expected shape: {}", .0.join("; "))]
    Schema(Vec<String>),
}

/// Decision returned by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVerdict {
    pub should_fix: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub fix: Option<ModelFix>,
}

impl ModelVerdict {
    /// Confidence rounded and clamped to 0..=100.
    pub fn confidence_percent(&self) -> u8 {
        if self.confidence.is_nan() {
            return 0;
        }
        self.confidence.round().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFix {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub code_changes: Vec<ModelChange>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelChange {
    pub file_path: String,
    #[serde(default)]
    pub original_code: Option<String>,
    pub new_code: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Extract, schema-check, and deserialize a model response.
pub fn parse_verdict(raw: &str) -> Result<ModelVerdict, ParseError> {
    let json = extract_json_object(raw).ok_or(ParseError::NoJson)?;
    let value: Value = serde_json::from_str(json)?;
    let errors: Vec<String> = VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(ParseError::Schema(errors));
    }
    Ok(serde_json::from_value(value)?)
}

/// Find the JSON object in a model response.
///
/// A fenced block whose body starts with `{` wins; otherwise the first balanced
/// top-level object span is used.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    fenced_object(raw).or_else(|| first_balanced_object(raw))
}

fn fenced_object(raw: &str) -> Option<&str> {
    let mut rest = raw;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // Skip the info string (e.g. `json`) up to the end of the line.
        let body_start = after.find('\n').map(|i| i + 1)?;
        let body = &after[body_start..];
        if body.trim_start().starts_with('{') {
            // String-aware scan: fences inside JSON strings do not close the block.
            return first_balanced_object(body);
        }
        let close = body.find("```")?;
        rest = &body[close + 3..];
    }
    None
}

fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
