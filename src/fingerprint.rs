//! Model fingerprint matching.
//!
//! Maps detection signals to the generator most likely to have produced the
//! content. This is a heuristic over a static signature table, not a learned
//! classifier.
//!
//! Signal matching picks the candidate with the highest fraction of its
//! signature tokens present among the request signals, provided the fraction
//! exceeds [`MATCH_THRESHOLD`]. Ties go to the candidate declared first in
//! [`MODEL_SIGNATURES`].

use crate::types::ContentType;
use tracing::debug;

/// Minimum fraction of a model's signature that must be present.
pub const MATCH_THRESHOLD: f64 = 0.3;

/// Known generators and their signature tokens, in tie-break order.
pub const MODEL_SIGNATURES: &[(&str, &[&str])] = &[
    (
        "GPT-4",
        &[
            "structured_lists",
            "hedging_language",
            "comprehensive_coverage",
            "markdown_formatting",
        ],
    ),
    (
        "GPT-4o",
        &["concise_responses", "natural_flow", "multimodal_awareness"],
    ),
    (
        "Claude",
        &[
            "nuanced_reasoning",
            "ethical_considerations",
            "structured_analysis",
            "caveat_language",
        ],
    ),
    (
        "DALL-E 3",
        &[
            "smooth_textures",
            "consistent_lighting",
            "text_in_images",
            "photorealistic_skin",
        ],
    ),
    (
        "Midjourney",
        &[
            "artistic_style",
            "dramatic_lighting",
            "painterly_quality",
            "aspect_ratio_artifacts",
        ],
    ),
    (
        "Stable Diffusion",
        &[
            "texture_artifacts",
            "finger_anomalies",
            "background_blur_patterns",
        ],
    ),
    (
        "ElevenLabs",
        &["consistent_prosody", "natural_pauses", "voice_cloning_markers"],
    ),
    (
        "Suno",
        &[
            "musical_patterns",
            "lyric_generation_markers",
            "audio_loop_artifacts",
        ],
    ),
];

/// Identify the generator behind an analysis.
///
/// A fingerprint named by the backend wins: it is mapped to the canonical
/// table name when it mentions one (the longest matching name, so "gpt-4o"
/// resolves to `GPT-4o` rather than `GPT-4`), and returned unchanged
/// otherwise. Without one, the signals are matched against the table.
#[must_use]
pub fn identify_model(
    signals: &[String],
    content_type: ContentType,
    reported: Option<&str>,
) -> Option<String> {
    if let Some(reported) = reported.map(str::trim).filter(|r| !r.is_empty()) {
        return Some(canonical_name(reported).map_or_else(|| reported.to_string(), str::to_string));
    }

    let normalized: Vec<String> = signals
        .iter()
        .map(|s| normalize_signal(s))
        .filter(|s| !s.is_empty())
        .collect();
    if normalized.is_empty() {
        return None;
    }

    let mut best: Option<(&str, f64)> = None;
    for (model, signature) in MODEL_SIGNATURES {
        let score = signature_overlap(signature, &normalized);
        let beats_best = best.map_or(true, |(_, best_score)| score > best_score);
        if score > MATCH_THRESHOLD && beats_best {
            best = Some((model, score));
        }
    }

    match best {
        Some((model, score)) => {
            debug!("Fingerprint {model} matched {content_type} signals ({score:.2})");
            Some(model.to_string())
        }
        None => {
            debug!(
                "No fingerprint above threshold for {} {content_type} signal(s)",
                normalized.len()
            );
            None
        }
    }
}

/// Lowercase and join whitespace runs with underscores.
#[must_use]
pub fn normalize_signal(signal: &str) -> String {
    signal
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

fn canonical_name(reported: &str) -> Option<&'static str> {
    let lowered = reported.to_lowercase();
    MODEL_SIGNATURES
        .iter()
        .map(|(model, _)| *model)
        .filter(|model| lowered.contains(&model.to_lowercase()))
        .max_by_key(|model| model.len())
}

/// Fraction of `signature` tokens present in `signals`, by substring overlap
/// in either direction.
fn signature_overlap(signature: &[&str], signals: &[String]) -> f64 {
    if signature.is_empty() {
        return 0.0;
    }
    let matched = signature
        .iter()
        .filter(|token| {
            signals
                .iter()
                .any(|s| s.contains(**token) || token.contains(s.as_str()))
        })
        .count();
    #[allow(clippy::cast_precision_loss)]
    let fraction = matched as f64 / signature.len() as f64;
    fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_reported_fingerprint_canonicalized() {
        let found = identify_model(&[], ContentType::Image, Some("Looks like midjourney v6"));
        assert_eq!(found.as_deref(), Some("Midjourney"));
    }

    #[test]
    fn test_reported_fingerprint_prefers_specific_name() {
        let found = identify_model(&[], ContentType::Text, Some("gpt-4o-mini"));
        assert_eq!(found.as_deref(), Some("GPT-4o"));
    }

    #[test]
    fn test_unknown_reported_fingerprint_kept() {
        let found = identify_model(&[], ContentType::Image, Some("Flux.1 [dev]"));
        assert_eq!(found.as_deref(), Some("Flux.1 [dev]"));
    }

    #[test]
    fn test_signal_match_above_threshold() {
        // 2 of 4 Claude tokens = 0.5
        let found = identify_model(
            &signals(&["Nuanced Reasoning", "caveat language", "unrelated"]),
            ContentType::Text,
            None,
        );
        assert_eq!(found.as_deref(), Some("Claude"));
    }

    #[test]
    fn test_signal_match_below_threshold() {
        // 1 of 4 = 0.25, 1 of 3 would be 0.33 but nothing else matches
        let found = identify_model(&signals(&["smooth textures"]), ContentType::Image, None);
        assert_eq!(found, None);
    }

    #[test]
    fn test_one_of_three_exceeds_threshold() {
        let found = identify_model(&signals(&["finger anomalies"]), ContentType::Image, None);
        assert_eq!(found.as_deref(), Some("Stable Diffusion"));
    }

    #[test]
    fn test_tie_goes_to_first_declared() {
        // GPT-4o and ElevenLabs both score 1/3; GPT-4o is declared first.
        let found = identify_model(
            &signals(&["natural flow", "voice cloning markers"]),
            ContentType::Audio,
            None,
        );
        assert_eq!(found.as_deref(), Some("GPT-4o"));
    }

    #[test]
    fn test_empty_and_blank_signals() {
        assert_eq!(identify_model(&[], ContentType::Text, None), None);
        assert_eq!(identify_model(&signals(&["", "   "]), ContentType::Text, None), None);
        assert_eq!(
            identify_model(&signals(&["finger anomalies"]), ContentType::Image, Some("  ")),
            Some("Stable Diffusion".to_string())
        );
    }

    #[test]
    fn test_normalize_signal() {
        assert_eq!(normalize_signal("  Dramatic   Lighting "), "dramatic_lighting");
    }
}
