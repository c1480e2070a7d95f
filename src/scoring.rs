//! Trust scoring.
//!
//! The trust score is the inverse of the backend's AI probability, pulled
//! toward the neutral midpoint in proportion to the backend's uncertainty:
//!
//! ```text
//! raw      = 100 - ai_probability
//! w        = confidence / 100
//! weighted = raw * w + 50 * (1 - w)
//! score    = clamp(round2(weighted), 0, 100)
//! ```

use crate::types::{BackendKind, RawAnalysis, TrustScore};

/// Score assigned when the backend has no confidence at all.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Compute the trust score for a probability/confidence pair.
#[must_use]
pub fn trust_score(ai_probability: f64, confidence: f64) -> f64 {
    let raw = 100.0 - ai_probability;
    let weight = confidence / 100.0;
    let weighted = raw.mul_add(weight, NEUTRAL_SCORE * (1.0 - weight));
    let rounded = (weighted * 100.0).round() / 100.0;
    rounded.clamp(0.0, 100.0)
}

/// Build the immutable [`TrustScore`] for one analysis.
#[must_use]
pub fn score_analysis(
    analysis: &RawAnalysis,
    backend: BackendKind,
    is_byok: bool,
    processing_time_ms: u64,
) -> TrustScore {
    TrustScore {
        score: trust_score(analysis.ai_probability, analysis.confidence),
        ai_probability: analysis.ai_probability,
        is_ai_generated: analysis.is_ai_generated,
        confidence: analysis.confidence,
        model_fingerprint: analysis.model_fingerprint.clone(),
        manipulation_type: analysis.manipulation_type.clone(),
        backend,
        is_byok,
        processing_time_ms,
    }
}
