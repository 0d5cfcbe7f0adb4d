//! Prompt decoration applied to caller text before it reaches a workflow.

use crate::error::CoreError;

/// Appended to every caller-supplied positive prompt.
pub const POSITIVE_SUFFIX: &str =
    ",(looking at camera:1.3),(atmosphere), coherent, continuity, epic, plain background";

/// Negative prompt used for every stage.
pub const NEGATIVE_PROMPT: &str = "logo, logos, images, graphics, text, \
embedding:verybadimagenegative_v1.3, (3d), white eyes, layout, (worst quality:1.4),\
(low quality:1.4),(normal quality:1.3), lowres,watermark, title, (jpeg-artifacts:1.33), \
embedding:badhandv4, embedding:bad-artist, embedding:bad-artist-anime, (hands:1.5)";

/// Positive and negative prompt text shared by every stage of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub positive: String,
    pub negative: String,
}

/// Validate the caller prompt and apply the fixed decoration.
pub fn decorate(prompt: &str) -> Result<PromptPair, CoreError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(CoreError::Validation("Missing positive prompt".into()));
    }

    Ok(PromptPair {
        positive: format!("{prompt}{POSITIVE_SUFFIX}"),
        negative: NEGATIVE_PROMPT.to_string(),
    })
}
