//! Tokenization seam.
//!
//! Tokenization is an external collaborator: it turns text into token-id and
//! attention-mask arrays and back. The pipeline only depends on this trait;
//! padding sits on the left so that the most recent tokens stay at the right
//! edge of the window.

use crate::error::PipelineError;
use crate::tensor::Tensor;

/// How encoded sequences are padded against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Pad to the longest sequence in the batch.
    Longest,
    /// Pad (and truncate) every sequence to the model's fixed length.
    MaxLength,
}

/// Tokenized batch: `input_ids` and `attention_mask`, both `[batch, L]`.
#[derive(Debug, Clone)]
pub struct Encoding {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
}

/// External tokenizer consumed by the pipeline.
pub trait Tokenizer: Send + Sync {
    /// Encode a batch of sequences, left-padded per `padding`. `max_length`
    /// is the model's fixed sequence length; with [`Padding::MaxLength`] and
    /// `truncate` the caller has opted into fixed-length truncation.
    fn encode(
        &self,
        sequences: &[String],
        max_length: usize,
        padding: Padding,
        truncate: bool,
    ) -> Result<Encoding, PipelineError>;

    /// Decode generated tokens back to text, skipping special tokens.
    fn decode(&self, tokens: &[i64]) -> String;

    fn eos_token_id(&self) -> i64;

    /// Dedicated padding token, if the vocabulary has one. The pipeline
    /// falls back to the end-of-sequence token otherwise.
    fn pad_token_id(&self) -> Option<i64>;

    /// Whether encoding prepends a beginning-of-sequence token.
    fn declares_bos_token(&self) -> bool {
        false
    }
}
