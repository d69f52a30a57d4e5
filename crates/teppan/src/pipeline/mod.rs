//! The text generation pipeline.
//!
//! [`TextGenerationPipeline`] owns the full request path: tokenize the input
//! sequences, split them into sub-batches with their cache session ids,
//! decode each sub-batch concurrently through an engine pair, rejoin the
//! outputs in submission order, and detokenize. Engine pairing happens once
//! at construction from the model profile: a multitoken engine for prompt
//! throughput wherever the model can accept one, and a single-token engine
//! whenever the model exposes a cache.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::decoder::{AutoregressiveDecoder, DecodeOptions, DecoderConfig};
use crate::engine::{Engine, EngineBuilder, EngineSettings, ModelProfile};
use crate::error::{EngineError, PipelineError};
use crate::session::{CacheClock, SessionId};
use crate::tokenizer::{Padding, Tokenizer};
use crate::transport::{self, SubBatchOutput};

mod config;
mod schema;

pub use config::PipelineConfig;
pub use schema::{GenerationRequest, GenerationResponse, OneOrMany};

use schema::validate_session_ids;

/// Each sub-batch holds exactly one sequence so cache sessions never share a
/// forward pass.
const SUB_BATCH_SIZE: usize = 1;

/// Orchestrates autoregressive text generation over a compiled model.
pub struct TextGenerationPipeline {
    tokenizer: Arc<dyn Tokenizer>,
    engine: Option<Arc<dyn Engine>>,
    multitoken_engine: Option<Arc<dyn Engine>>,
    profile: ModelProfile,
    config: PipelineConfig,
}

impl TextGenerationPipeline {
    /// Validate the configuration against the model profile and compile the
    /// engine pair.
    pub fn new(
        profile: ModelProfile,
        builder: &dyn EngineBuilder,
        tokenizer: Arc<dyn Tokenizer>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        if config.sampling_temperature <= 0.0 {
            return Err(PipelineError::Configuration(format!(
                "sampling temperature must be positive, got {}",
                config.sampling_temperature
            )));
        }
        let budget = config.max_generated_tokens.filter(|&m| m > 0);
        if !profile.supports_cache && budget != Some(1) {
            return Err(PipelineError::Configuration(
                "a model without cache support can only generate one token per request; \
                 set the generation budget to exactly 1"
                    .into(),
            ));
        }

        let chunked_prefill = profile.supports_cache && profile.supports_causal_mask;
        if chunked_prefill && config.prompt_processing_sequence_length >= profile.sequence_length {
            return Err(PipelineError::Configuration(format!(
                "the prompt chunk size ({}) must be smaller than the sequence length ({})",
                config.prompt_processing_sequence_length, profile.sequence_length
            )));
        }
        if profile.supports_cache && !profile.supports_causal_mask {
            warn!(
                "model exposes a cache but no causal mask input; \
                 prompts will be processed one token at a time"
            );
        }

        // Both engines' stores share one write clock so their cache entries
        // order against each other.
        let clock = CacheClock::new();
        let settings = |input_ids_length: usize| EngineSettings {
            input_ids_length,
            sequence_length: profile.sequence_length,
            cache_enabled: profile.supports_cache,
            optimized_kv_cache: config.use_cache,
            deterministic: config.deterministic,
            sampling_temperature: config.sampling_temperature,
            cache_clock: clock.clone(),
        };

        let multitoken_engine = if chunked_prefill {
            Some(builder.build(settings(config.prompt_processing_sequence_length))?)
        } else if !profile.supports_cache {
            // Without a cache the whole prompt goes through in one pass.
            Some(builder.build(settings(profile.sequence_length))?)
        } else {
            None
        };
        let engine = if profile.supports_cache {
            Some(builder.build(settings(1))?)
        } else {
            None
        };
        info!(
            sequence_length = profile.sequence_length,
            cache = profile.supports_cache,
            chunked_prefill,
            "pipeline initialized"
        );

        Ok(Self {
            tokenizer,
            engine,
            multitoken_engine,
            profile,
            config,
        })
    }

    /// Generate text for every sequence in the request.
    ///
    /// Sequences decode concurrently, one cache session each; the response
    /// lists them in request order and mirrors the request's single/batch
    /// arity. Caller-supplied session ids are validated up front, otherwise
    /// a fresh random id is assigned per sequence.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, PipelineError> {
        let sequences = request.sequences.to_vec();
        if sequences.is_empty() {
            return Err(PipelineError::Configuration(
                "the request contains no input sequences".into(),
            ));
        }

        let session_ids = validate_session_ids(&request.sequences, &request.session_ids)?
            .unwrap_or_else(|| sequences.iter().map(|_| SessionId::generate()).collect());

        let padding = if request.fixed_sequence_length {
            Padding::MaxLength
        } else {
            Padding::Longest
        };
        let encoding = self.tokenizer.encode(
            &sequences,
            self.profile.sequence_length,
            padding,
            request.fixed_sequence_length,
        )?;

        let (batches, _) = transport::split(
            &[encoding.input_ids, encoding.attention_mask],
            &session_ids,
            SUB_BATCH_SIZE,
        )?;
        debug!(batches = batches.len(), "dispatching sub-batches");

        // A shared streamer would interleave tokens from concurrent
        // sequences; only a single-sequence request gets one.
        let streamer = if sequences.len() == 1 {
            request.streamer.clone()
        } else {
            None
        };

        let decoder_config = DecoderConfig {
            cache_support: self.profile.supports_cache,
            max_generated_tokens: self.config.max_generated_tokens,
            force_max_tokens: self.config.force_max_tokens,
            eos_token_id: self.tokenizer.eos_token_id(),
            strip_bos: self.tokenizer.declares_bos_token(),
        };

        let mut handles = Vec::with_capacity(batches.len());
        for batch in batches {
            let engine = self.engine.clone();
            let multitoken = self.multitoken_engine.clone();
            let config = decoder_config.clone();
            let opts = DecodeOptions {
                include_prompt_logits: request.include_prompt_logits,
                streamer: streamer.clone(),
            };
            handles.push(tokio::spawn(async move {
                let decoder = AutoregressiveDecoder::new(engine, multitoken, config)?;
                let session = batch.session_ids[0].clone();
                let out = decoder
                    .run(&batch.tensors[0], &batch.tensors[1], &session, &opts)
                    .await?;
                Ok::<_, PipelineError>(SubBatchOutput {
                    tokens: out.tokens,
                    logits: out.logits,
                    session_ids: batch.session_ids,
                })
            }));
        }

        // Awaiting in submission order keeps the join order-preserving even
        // though the tasks finish in any order.
        let mut outputs = Vec::with_capacity(handles.len());
        for handle in handles {
            let output = handle
                .await
                .map_err(|e| EngineError::new(format!("decode task failed: {e}")))??;
            outputs.push(output);
        }

        let pad_token = self
            .tokenizer
            .pad_token_id()
            .unwrap_or_else(|| self.tokenizer.eos_token_id());
        let joined = transport::join(outputs, self.profile.supports_cache, pad_token)?;

        let tokens = joined
            .tokens
            .as_i64()
            .ok_or_else(|| PipelineError::Shape("generated tokens must be integers".into()))?;
        let row_len = joined.tokens.shape()[1];
        let mut texts = Vec::with_capacity(sequences.len());
        for row in tokens.chunks(row_len) {
            texts.push(self.tokenizer.decode(row));
        }

        let sequences = if request.sequences.is_single() {
            OneOrMany::One(texts.remove(0))
        } else {
            OneOrMany::Many(texts)
        };
        Ok(GenerationResponse {
            sequences,
            logits: request.return_logits.then_some(joined.logits),
            session_ids: joined.session_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngineBuilder;
    use crate::error::PipelineError;
    use crate::tensor::Tensor;
    use crate::tokenizer::Encoding;

    const EOS: i64 = 2;

    /// Treats each whitespace-separated integer as one token. Token 2 is the
    /// end-of-sequence marker and is skipped on decode.
    struct FakeTokenizer;

    impl Tokenizer for FakeTokenizer {
        fn encode(
            &self,
            sequences: &[String],
            max_length: usize,
            padding: Padding,
            truncate: bool,
        ) -> Result<Encoding, PipelineError> {
            let rows: Vec<Vec<i64>> = sequences
                .iter()
                .map(|s| {
                    s.split_whitespace()
                        .map(|w| {
                            w.parse::<i64>().map_err(|_| {
                                PipelineError::Tokenization(format!("not a token: {w:?}"))
                            })
                        })
                        .collect()
                })
                .collect::<Result<_, _>>()?;

            let width = match padding {
                Padding::MaxLength => max_length,
                Padding::Longest => rows.iter().map(Vec::len).max().unwrap_or(0),
            };
            let mut input_ids = Vec::new();
            let mut attention_mask = Vec::new();
            for mut row in rows {
                if truncate && row.len() > width {
                    row.drain(..row.len() - width);
                }
                let pad = width - row.len();
                input_ids.extend(std::iter::repeat(0).take(pad));
                attention_mask.extend(std::iter::repeat(0).take(pad));
                input_ids.extend(&row);
                attention_mask.extend(std::iter::repeat(1).take(row.len()));
            }
            let shape = vec![sequences.len(), width];
            Ok(Encoding {
                input_ids: Tensor::from_i64(shape.clone(), input_ids),
                attention_mask: Tensor::from_i64(shape, attention_mask),
            })
        }

        fn decode(&self, tokens: &[i64]) -> String {
            tokens
                .iter()
                .filter(|&&t| t != EOS)
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        }

        fn eos_token_id(&self) -> i64 {
            EOS
        }

        fn pad_token_id(&self) -> Option<i64> {
            None
        }
    }

    fn profile(cache: bool, causal_mask: bool, sequence_length: usize) -> ModelProfile {
        ModelProfile {
            supports_causal_mask: causal_mask,
            supports_cache: cache,
            sequence_length,
            vocab_size: 16,
        }
    }

    fn config(chunk: usize, max: Option<usize>) -> PipelineConfig {
        PipelineConfig {
            prompt_processing_sequence_length: chunk,
            max_generated_tokens: max,
            ..PipelineConfig::default()
        }
    }

    fn pipeline(
        profile: ModelProfile,
        builder: &MockEngineBuilder,
        config: PipelineConfig,
    ) -> Result<TextGenerationPipeline, PipelineError> {
        TextGenerationPipeline::new(profile, builder, Arc::new(FakeTokenizer), config)
    }

    #[test]
    fn non_positive_temperature_is_rejected() {
        let builder = MockEngineBuilder::new(vec![]);
        let mut cfg = config(4, Some(8));
        cfg.sampling_temperature = 0.0;
        assert!(matches!(
            pipeline(profile(true, true, 16), &builder, cfg),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn no_cache_model_rejects_a_multi_token_budget() {
        let builder = MockEngineBuilder::new(vec![]);
        assert!(matches!(
            pipeline(profile(false, true, 16), &builder, config(4, Some(8))),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn chunk_size_must_fit_inside_the_window() {
        let builder = MockEngineBuilder::new(vec![]);
        assert!(matches!(
            pipeline(profile(true, true, 16), &builder, config(16, Some(8))),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn cache_without_causal_mask_builds_only_the_single_token_engine() {
        let builder = MockEngineBuilder::new(vec![]);
        let p = pipeline(profile(true, false, 16), &builder, config(4, Some(8))).unwrap();
        assert_eq!(builder.built().len(), 1);
        assert_eq!(builder.built()[0].input_ids_length(), 1);
        assert!(p.multitoken_engine.is_none());
    }

    #[test]
    fn cached_causal_mask_model_builds_the_engine_pair() {
        let builder = MockEngineBuilder::new(vec![]);
        let _ = pipeline(profile(true, true, 16), &builder, config(4, Some(8))).unwrap();
        let built = builder.built();
        assert_eq!(built.len(), 2);
        // multitoken first, then the single-token engine
        assert_eq!(built[0].input_ids_length(), 4);
        assert_eq!(built[1].input_ids_length(), 1);
    }

    #[tokio::test]
    async fn no_cache_model_answers_in_one_engine_call() {
        let builder = MockEngineBuilder::new(vec![9]);
        let p = pipeline(profile(false, true, 8), &builder, config(4, Some(1))).unwrap();

        let response = p
            .generate(GenerationRequest::new("5 6 7"))
            .await
            .unwrap();

        assert_eq!(response.sequences, OneOrMany::One("9".to_string()));
        assert_eq!(builder.total_calls(), 1);
        assert_eq!(response.session_ids.len(), 1);
    }

    #[tokio::test]
    async fn short_prompt_generates_through_the_cache() {
        let builder = MockEngineBuilder::new(vec![20, 21, 22, 23, 24]);
        let p = pipeline(profile(true, true, 8), &builder, config(4, Some(1))).unwrap();

        let response = p
            .generate(GenerationRequest::new("5 6 7"))
            .await
            .unwrap();

        // three-token prompt never fills a chunk of four
        let built = builder.built();
        assert_eq!(built[0].call_count(), 0);
        // 3 prefill steps + 1 generation + 1 silent cache write
        assert_eq!(built[1].call_count(), 5);
        assert_eq!(response.sequences, OneOrMany::One("22 23".to_string()));
    }

    #[tokio::test]
    async fn batched_sequences_keep_their_order_and_sessions() {
        // empty script: every call yields the fallback token, so concurrent
        // decode order cannot change the outputs
        let builder = MockEngineBuilder::new(vec![]);
        let p = pipeline(profile(true, true, 16), &builder, config(4, Some(2))).unwrap();

        let request = GenerationRequest {
            session_ids: Some(OneOrMany::Many(vec!["left".into(), "right".into()])),
            ..GenerationRequest::new(vec!["10 11".to_string(), "12 13 14".to_string()])
        };
        let response = p.generate(request).await.unwrap();

        assert_eq!(
            response.session_ids,
            vec![SessionId::from("left"), SessionId::from("right")]
        );
        match response.sequences {
            OneOrMany::Many(texts) => {
                assert_eq!(texts.len(), 2);
                // budget of 2 on top of the token the prefill produced
                assert_eq!(texts[0], "7 7 7");
                assert_eq!(texts[1], "7 7 7");
            }
            other => panic!("expected a batched response, got {other:?}"),
        }
        // each sequence got its own cache session on the single-token engine
        let built = builder.built();
        let single = &built[1];
        assert!(single.has_session(&SessionId::from("left")));
        assert!(single.has_session(&SessionId::from("right")));
    }

    #[tokio::test]
    async fn duplicate_session_ids_are_rejected() {
        let builder = MockEngineBuilder::new(vec![]);
        let p = pipeline(profile(true, true, 16), &builder, config(4, Some(1))).unwrap();

        let request = GenerationRequest {
            session_ids: Some(OneOrMany::Many(vec!["s".into(), "s".into()])),
            ..GenerationRequest::new(vec!["10".to_string(), "11".to_string()])
        };
        assert!(matches!(
            p.generate(request).await,
            Err(PipelineError::Configuration(_))
        ));
        assert_eq!(builder.total_calls(), 0);
    }

    #[tokio::test]
    async fn session_id_count_must_match_sequence_count() {
        let builder = MockEngineBuilder::new(vec![]);
        let p = pipeline(profile(true, true, 16), &builder, config(4, Some(1))).unwrap();

        let request = GenerationRequest {
            session_ids: Some(OneOrMany::One("only".into())),
            ..GenerationRequest::new(vec!["10".to_string(), "11".to_string()])
        };
        assert!(matches!(
            p.generate(request).await,
            Err(PipelineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn logits_are_returned_on_request() {
        let builder = MockEngineBuilder::new(vec![9]);
        let p = pipeline(profile(false, true, 8), &builder, config(4, Some(1))).unwrap();

        let request = GenerationRequest {
            return_logits: true,
            ..GenerationRequest::new("5 6 7")
        };
        let response = p.generate(request).await.unwrap();
        let logits = response.logits.expect("requested logits");
        // one pass over the three-token prompt, mock vocabulary of 16
        assert_eq!(logits.shape(), &[1, 3, 16]);
    }

    #[tokio::test]
    async fn empty_requests_are_rejected() {
        let builder = MockEngineBuilder::new(vec![]);
        let p = pipeline(profile(true, true, 16), &builder, config(4, Some(1))).unwrap();
        let request = GenerationRequest::new(Vec::<String>::new());
        assert!(matches!(
            p.generate(request).await,
            Err(PipelineError::Configuration(_))
        ));
    }
}
