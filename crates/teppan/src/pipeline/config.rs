use serde::{Deserialize, Serialize};

/// Pipeline construction settings.
///
/// Validated once, before any engine is compiled; violations surface as
/// [`crate::error::PipelineError::Configuration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pick the arg-max token instead of sampling from the distribution.
    pub deterministic: bool,
    /// Sampling temperature; must be greater than zero.
    pub sampling_temperature: f32,
    /// Generation budget per request. `None` (or zero) means "until the
    /// stopping condition", bounded by a hard ceiling of
    /// `100 × sequence_length`.
    pub max_generated_tokens: Option<usize>,
    /// Chunk size used by the multitoken engine during prompt prefill. Must
    /// be smaller than the fixed sequence length while chunked prefill is
    /// enabled.
    pub prompt_processing_sequence_length: usize,
    /// Keep generating up to the budget even after an end-of-sequence token.
    pub force_max_tokens: bool,
    /// Engine-side optimized cache management toggle.
    pub use_cache: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deterministic: true,
            sampling_temperature: 1.0,
            max_generated_tokens: Some(1024),
            prompt_processing_sequence_length: 64,
            force_max_tokens: false,
            use_cache: true,
        }
    }
}
