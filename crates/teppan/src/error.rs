use thiserror::Error;

/// Failure raised by an external inference engine.
///
/// The orchestration layer never retries these: an engine call may have
/// already written cache rows, and the writes are not transactional.
#[derive(Error, Debug)]
#[error("engine invocation failed: {message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error taxonomy for the text generation pipeline.
///
/// All variants are fail-fast: configuration problems surface before any
/// engine work begins, and no partial batch result is ever returned.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline was constructed or invoked with invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Appending to the context would exceed the fixed sequence length.
    #[error("context of {needed} rows exceeds the fixed sequence length {limit}")]
    Capacity { needed: usize, limit: usize },

    /// A tensor operation was attempted on incompatible shapes.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// An engine invocation failed; propagated unchanged.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Tokenization of the request input failed.
    #[error("tokenization failed: {0}")]
    Tokenization(String),
}
