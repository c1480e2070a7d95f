//! Prompt text shared by the analysis backends.

/// System instruction. Pins the JSON verdict shape every adapter parses.
pub const SYSTEM_PROMPT: &str = "You are a forensic analyst who detects AI-generated and \
manipulated media. Examine the submitted content and answer with a single JSON object and \
nothing else, using exactly these keys:
{
  \"aiProbability\": number from 0 to 100,
  \"isAiGenerated\": boolean,
  \"modelFingerprint\": string naming the likely generator, or null,
  \"manipulationType\": string such as \"deepfake\", \"face_swap\", \"voice_clone\", \"fully_synthetic\", or null,
  \"confidence\": number from 0 to 100 describing how sure you are,
  \"reasoning\": short explanation,
  \"signals\": array of short snake_case detection signals
}
Be calibrated: when evidence is weak, lower the confidence rather than guessing.";

/// Prefix for text analysis; the text follows directly.
pub const TEXT_PROMPT: &str = "Assess whether the following text was written by an AI model. \
Look at phrasing regularity, hedging, list structure, coverage patterns and stylistic tics. \
Signals might include structured_lists, hedging_language, nuanced_reasoning or natural_flow.

Text:
";

/// Image analysis instruction.
pub const IMAGE_PROMPT: &str = "Assess whether this image was generated or edited by an AI \
model. Look at textures, lighting consistency, hands and fingers, rendered text, backgrounds \
and compression artifacts. Signals might include smooth_textures, finger_anomalies, \
dramatic_lighting or painterly_quality.";

/// Audio analysis instruction for backends that take audio inline.
pub const AUDIO_PROMPT: &str = "Assess whether this audio was synthesized or cloned by an AI \
model. Listen for prosody, breathing, pauses, room tone and looping artifacts. Signals might \
include consistent_prosody, natural_pauses, voice_cloning_markers or audio_loop_artifacts.";

/// Build the analysis prompt for a transcript produced from audio.
#[must_use]
pub fn transcript_prompt(transcript: &str) -> String {
    format!(
        "{AUDIO_PROMPT}\n\nOnly a transcript of the recording is available. Judge speech \
patterns, word choice and any markers of synthetic speech from the text alone, and lower the \
confidence accordingly.\n\nTranscript:\n{transcript}"
    )
}
