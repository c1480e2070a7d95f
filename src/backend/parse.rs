//! Lenient parsing of backend verdicts into [`RawAnalysis`].
//!
//! Backends answer in free text that usually, but not always, is the JSON
//! object the system prompt asks for. Anything unusable becomes a neutral,
//! zero-confidence analysis instead of an error.

use crate::types::{AnalysisDetails, RawAnalysis};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Reasoning attached to a verdict that could not be parsed.
pub const PARSE_FAILURE_REASONING: &str = "parse failure: backend response was not a JSON verdict";

const NO_REASONING: &str = "No reasoning provided";
const DEFAULT_CONFIDENCE: f64 = 50.0;

/// Parse a verdict. Tries the whole text first, then the outermost
/// `{ ... }` span, which covers fenced code blocks and chatty preambles.
#[must_use]
pub fn parse_verdict(raw: &str) -> RawAnalysis {
    match find_object(raw) {
        Some(object) => from_object(object).clamped(),
        None => {
            debug!("Unparseable verdict ({} bytes)", raw.len());
            RawAnalysis::neutral(PARSE_FAILURE_REASONING)
        }
    }
}

fn find_object(raw: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(object)) = serde_json::from_str(raw.trim()) {
        return Some(object);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&raw[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn from_object(object: Map<String, Value>) -> RawAnalysis {
    let ai_probability = number(object.get("aiProbability")).unwrap_or(0.0);
    let confidence = number(object.get("confidence")).unwrap_or(DEFAULT_CONFIDENCE);
    let is_ai_generated = object
        .get("isAiGenerated")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut signals = string_list(object.get("signals"));
    // Older prompt revisions split signals by modality.
    for key in ["textualPatterns", "visualArtifacts", "audioMarkers"] {
        signals.extend(string_list(object.get(key)));
    }

    let reasoning = text(object.get("reasoning")).unwrap_or_else(|| NO_REASONING.to_string());
    let model_fingerprint = text(object.get("modelFingerprint"));
    let manipulation_type = text(object.get("manipulationType"));

    RawAnalysis {
        ai_probability,
        is_ai_generated,
        model_fingerprint,
        manipulation_type,
        confidence,
        details: AnalysisDetails {
            reasoning,
            signals,
            metadata: Some(json!({ "raw": Value::Object(object) })),
        },
    }
}

/// Numbers, and numeric strings some models emit.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
