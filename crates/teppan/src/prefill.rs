//! Chunked prompt prefill planning.
//!
//! Long prompts are pushed through the multitoken engine in fixed-size
//! chunks. The planner is a lazy, finite, non-restartable iterator: each
//! chunk's attention mask and positions depend on the cache occupancy left
//! behind by the previous chunk, so engine inputs must not be precomputed
//! eagerly. Any remainder shorter than one chunk is left for the decoder's
//! single-token fallback, never discarded.

use crate::engine::{Engine, EngineInputs, InputName};
use crate::error::PipelineError;
use crate::mask::create_causal_mask;
use crate::session::SessionId;
use crate::tensor::Tensor;

/// Lazy sequence of engine-input sets, one per full chunk of the prompt.
pub struct PrefillPlanner<'a> {
    engine: &'a dyn Engine,
    session: &'a SessionId,
    tokens: &'a [i64],
    chunk_size: usize,
    num_chunks: usize,
    next_chunk: usize,
}

impl<'a> PrefillPlanner<'a> {
    /// Plan prefill of `tokens` through `engine`, whose declared input length
    /// is the chunk size.
    pub fn new(engine: &'a dyn Engine, session: &'a SessionId, tokens: &'a [i64]) -> Self {
        let chunk_size = engine.input_ids_length();
        Self {
            engine,
            session,
            tokens,
            chunk_size,
            num_chunks: tokens.len() / chunk_size,
            next_chunk: 0,
        }
    }

    /// Number of prompt tokens covered by full chunks.
    pub fn planned_tokens(&self) -> usize {
        self.num_chunks * self.chunk_size
    }

    fn build_chunk(&self, chunk_index: usize) -> Result<EngineInputs, PipelineError> {
        let chunk_size = self.chunk_size;
        let sequence_length = self.engine.sequence_length();
        let chunk = &self.tokens[chunk_index * chunk_size..(chunk_index + 1) * chunk_size];

        // Occupancy is queried fresh per chunk: the cache grows after each
        // chunk is processed.
        let cached = self.engine.non_blank_rows(self.session);
        if cached + chunk_size > sequence_length {
            return Err(PipelineError::Capacity {
                needed: cached + chunk_size,
                limit: sequence_length,
            });
        }

        let input_ids = Tensor::from_i64(vec![1, chunk_size], chunk.to_vec());

        // 1s from the right covering both the chunk and the cache entries it
        // attends to; the rest stays masked.
        let unmasked = chunk_size + cached;
        let mut mask_data = vec![0i64; sequence_length];
        for slot in &mut mask_data[sequence_length - unmasked..] {
            *slot = 1;
        }
        let attention_mask = Tensor::from_i64(vec![1, sequence_length], mask_data);

        // Position of each chunk token is its row in the cache once written.
        // The degenerate chunk size of 1 is an ordinary autoregressive step.
        let positions = if chunk_size == 1 {
            Tensor::from_i64(vec![1, 1], vec![cached as i64])
        } else {
            Tensor::arange_i64(cached, cached + chunk_size)
        };

        let mut inputs = EngineInputs::new();
        for name in self.engine.input_names() {
            match name {
                InputName::InputIds => inputs.insert(*name, input_ids.clone()),
                InputName::AttentionMask => inputs.insert(*name, attention_mask.clone()),
                InputName::Positions => inputs.insert(*name, positions.clone()),
                InputName::CausalMask => {
                    inputs.insert(*name, create_causal_mask(&input_ids, &attention_mask)?)
                }
            }
        }
        Ok(inputs)
    }
}

impl Iterator for PrefillPlanner<'_> {
    type Item = Result<EngineInputs, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_chunk == self.num_chunks {
            return None;
        }
        let chunk_index = self.next_chunk;
        self.next_chunk += 1;
        Some(self.build_chunk(chunk_index))
    }
}
