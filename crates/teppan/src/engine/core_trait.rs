use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EngineError, PipelineError};
use crate::session::{CacheClock, CacheEntry, SessionId, SessionStore};
use crate::tensor::Tensor;

/// Tensor roles an engine may declare in its input signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputName {
    InputIds,
    AttentionMask,
    CausalMask,
    Positions,
}

impl InputName {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputName::InputIds => "input_ids",
            InputName::AttentionMask => "attention_mask",
            InputName::CausalMask => "causal_mask",
            InputName::Positions => "positions",
        }
    }
}

/// Ordered role → tensor mapping built fresh for every engine call.
///
/// Only roles the target engine declares are ever populated; the builder side
/// must not invent tensors the engine does not ask for.
#[derive(Debug, Clone, Default)]
pub struct EngineInputs {
    entries: Vec<(InputName, Tensor)>,
}

impl EngineInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: InputName, tensor: Tensor) {
        self.entries.push((name, tensor));
    }

    pub fn get(&self, name: InputName) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| t)
    }

    pub fn names(&self) -> Vec<InputName> {
        self.entries.iter().map(|(n, _)| *n).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(InputName, Tensor)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Next-token/logits pair returned by one engine invocation.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// The sampled next token.
    pub token: i64,
    /// Logits for the processed tokens, shape `[1, L, vocab]`.
    pub logits: Tensor,
}

/// Introspection answers about the model behind the engines.
///
/// Fixed at pipeline construction; the two booleans decide which engines are
/// built and how the prompt is processed.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    /// Whether the model accepts a `causal_mask` input. Without it the prompt
    /// cannot be processed in multitoken chunks.
    pub supports_causal_mask: bool,
    /// Whether the model exposes cache outputs at all.
    pub supports_cache: bool,
    /// Fixed sequence length of the model's attention window.
    pub sequence_length: usize,
    /// Vocabulary size of the logits axis.
    pub vocab_size: usize,
}

/// One compiled view of the model.
///
/// A pipeline holds up to two engines over the same logical cache: a
/// multitoken engine consuming `input_ids_length > 1` tokens per call for
/// prompt throughput, and a single-token engine advancing one token at a
/// time. Both read and write their own [`SessionStore`].
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run one forward pass for the given session.
    ///
    /// Errors propagate to the caller unmodified; a cache-mutating call is
    /// never retried by the orchestration layer.
    async fn invoke(
        &self,
        inputs: EngineInputs,
        session: &SessionId,
    ) -> Result<EngineOutput, EngineError>;

    /// Ordered input signature declared by the underlying model.
    fn input_names(&self) -> &[InputName];

    /// Number of new tokens this engine consumes per call.
    fn input_ids_length(&self) -> usize;

    /// Fixed sequence length of the engine's attention window.
    fn sequence_length(&self) -> usize;

    /// This engine's session store.
    fn store(&self) -> &SessionStore;

    fn has_session(&self, id: &SessionId) -> bool {
        self.store().has(id)
    }

    /// Number of non-blank cache rows held for a session.
    fn non_blank_rows(&self, id: &SessionId) -> usize {
        self.store().non_blank_rows(id)
    }

    /// Accept a cache entry written by the other engine; stale entries are
    /// ignored by the store.
    fn transfer_cache(&self, entry: CacheEntry) {
        self.store().transfer(entry)
    }
}

/// Settings handed to an [`EngineBuilder`] for one engine of the pair.
///
/// Engine-side tuning (cache management, determinism, sampling temperature)
/// travels here explicitly rather than through ambient process state.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub input_ids_length: usize,
    pub sequence_length: usize,
    /// Whether the model exposes cache outputs; controls whether this engine
    /// writes its session store at all.
    pub cache_enabled: bool,
    /// Engine-side cache management optimization toggle. Travels here
    /// explicitly instead of through ambient process state.
    pub optimized_kv_cache: bool,
    pub deterministic: bool,
    pub sampling_temperature: f32,
    /// Shared write clock so the two engines' stores order their writes
    /// against each other.
    pub cache_clock: CacheClock,
}

/// Compiles engines on behalf of the pipeline.
pub trait EngineBuilder: Send + Sync {
    fn build(&self, settings: EngineSettings) -> Result<Arc<dyn Engine>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_preserve_insertion_order() {
        let mut inputs = EngineInputs::new();
        inputs.insert(InputName::InputIds, Tensor::zeros_i64(&[1, 2]));
        inputs.insert(InputName::Positions, Tensor::zeros_i64(&[1, 2]));
        assert_eq!(
            inputs.names(),
            vec![InputName::InputIds, InputName::Positions]
        );
        assert!(inputs.get(InputName::CausalMask).is_none());
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn input_names_render_as_engine_labels() {
        assert_eq!(InputName::AttentionMask.as_str(), "attention_mask");
        assert_eq!(InputName::CausalMask.as_str(), "causal_mask");
    }
}
