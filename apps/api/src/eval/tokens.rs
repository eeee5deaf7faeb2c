use crate::models::eval::TokenUsage;

/// Characters per token used by the estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Approximates the token count of `text` as `ceil(chars / 4)`.
///
/// Not a real tokenizer: deterministic, counts Unicode scalar values.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}

/// Estimated usage for a rendered prompt and its completion.
pub fn usage_for(prompt: &str, completion: &str) -> TokenUsage {
    TokenUsage::new(estimate_tokens(prompt), estimate_tokens(completion))
}
