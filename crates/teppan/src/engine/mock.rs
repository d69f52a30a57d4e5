use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{EngineError, PipelineError};
use crate::session::{CacheClock, SessionId, SessionStore};
use crate::tensor::Tensor;

use super::{Engine, EngineBuilder, EngineInputs, EngineOutput, EngineSettings, InputName};

pub(crate) const ALL_INPUT_NAMES: [InputName; 4] = [
    InputName::InputIds,
    InputName::AttentionMask,
    InputName::CausalMask,
    InputName::Positions,
];

/// One recorded engine invocation, for assertions on what the orchestration
/// layer actually sent.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub session: SessionId,
    pub inputs: EngineInputs,
}

/// Scripted engine: pops the next token from a shared script, fills logits
/// with the token value, and tracks cache occupancy through a real store.
pub(crate) struct MockEngine {
    input_names: Vec<InputName>,
    input_ids_length: usize,
    sequence_length: usize,
    vocab_size: usize,
    store: SessionStore,
    script: Arc<Mutex<VecDeque<i64>>>,
    fallback_token: i64,
    writes_cache: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockEngine {
    pub fn new(
        input_names: Vec<InputName>,
        input_ids_length: usize,
        sequence_length: usize,
        writes_cache: bool,
        clock: CacheClock,
        script: Arc<Mutex<VecDeque<i64>>>,
    ) -> Self {
        Self {
            input_names,
            input_ids_length,
            sequence_length,
            vocab_size: 16,
            store: SessionStore::new(clock, sequence_length),
            script,
            fallback_token: 7,
            writes_cache,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn invoke(
        &self,
        inputs: EngineInputs,
        session: &SessionId,
    ) -> Result<EngineOutput, EngineError> {
        let processed = inputs
            .get(InputName::InputIds)
            .map(|t| t.shape()[1])
            .unwrap_or(self.input_ids_length);

        self.calls.lock().unwrap().push(RecordedCall {
            session: session.clone(),
            inputs,
        });

        if self.writes_cache {
            let rows = (self.store.non_blank_rows(session) + processed).min(self.sequence_length);
            self.store
                .touch(session, rows)
                .map_err(|e| EngineError::new(e.to_string()))?;
        }

        let token = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback_token);
        let logits = Tensor::from_f32(
            vec![1, processed, self.vocab_size],
            vec![token as f32; processed * self.vocab_size],
        );
        Ok(EngineOutput { token, logits })
    }

    fn input_names(&self) -> &[InputName] {
        &self.input_names
    }

    fn input_ids_length(&self) -> usize {
        self.input_ids_length
    }

    fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn store(&self) -> &SessionStore {
        &self.store
    }
}

/// Builds [`MockEngine`]s that share one token script, and keeps handles to
/// everything it built so tests can inspect recorded calls.
pub(crate) struct MockEngineBuilder {
    input_names: Vec<InputName>,
    script: Arc<Mutex<VecDeque<i64>>>,
    built: Mutex<Vec<Arc<MockEngine>>>,
}

impl MockEngineBuilder {
    pub fn new(script: Vec<i64>) -> Self {
        Self::with_input_names(ALL_INPUT_NAMES.to_vec(), script)
    }

    pub fn with_input_names(input_names: Vec<InputName>, script: Vec<i64>) -> Self {
        Self {
            input_names,
            script: Arc::new(Mutex::new(script.into())),
            built: Mutex::new(Vec::new()),
        }
    }

    /// Engines built so far, in construction order.
    pub fn built(&self) -> Vec<Arc<MockEngine>> {
        self.built.lock().unwrap().clone()
    }

    /// Total invocations across every engine built by this builder.
    pub fn total_calls(&self) -> usize {
        self.built().iter().map(|e| e.call_count()).sum()
    }
}

impl EngineBuilder for MockEngineBuilder {
    fn build(&self, settings: EngineSettings) -> Result<Arc<dyn Engine>, PipelineError> {
        let engine = Arc::new(MockEngine::new(
            self.input_names.clone(),
            settings.input_ids_length,
            settings.sequence_length,
            settings.cache_enabled,
            settings.cache_clock,
            self.script.clone(),
        ));
        self.built.lock().unwrap().push(engine.clone());
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_tokens_come_out_in_order() {
        let engine = MockEngine::new(
            ALL_INPUT_NAMES.to_vec(),
            1,
            8,
            true,
            CacheClock::new(),
            Arc::new(Mutex::new(VecDeque::from(vec![3, 4]))),
        );
        let session = SessionId::from("s");
        let mut inputs = EngineInputs::new();
        inputs.insert(InputName::InputIds, Tensor::from_i64(vec![1, 1], vec![9]));

        let first = engine.invoke(inputs.clone(), &session).await.unwrap();
        let second = engine.invoke(inputs, &session).await.unwrap();
        assert_eq!(first.token, 3);
        assert_eq!(second.token, 4);
        assert_eq!(engine.non_blank_rows(&session), 2);
        assert_eq!(engine.call_count(), 2);
    }
}
