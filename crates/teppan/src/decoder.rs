//! Token-by-token generation loop.
//!
//! The decoder drives one sequence through three phases. PREFILL pushes the
//! prompt into the cache: full chunks through the multitoken engine, the
//! remainder one token at a time, yielding the prompt plus exactly one new
//! token. GENERATE repeats single-token inference until the token budget is
//! exhausted or an end-of-sequence token appears. After the stopping
//! condition, one extra single-token call writes the final accepted token
//! into the cache so a later call on the same session resumes from a fully
//! updated cache; that call's output is discarded.

use std::sync::Arc;

use tracing::debug;

use crate::engine::{Engine, EngineInputs, EngineOutput, InputName};
use crate::error::PipelineError;
use crate::mask::create_causal_mask;
use crate::prefill::PrefillPlanner;
use crate::session::{synchronize, SessionId};
use crate::streaming::TokenSink;
use crate::tensor::Tensor;

/// Per-request decoding knobs.
#[derive(Default)]
pub struct DecodeOptions {
    /// Prepend the prompt logits to the generated-token logits.
    pub include_prompt_logits: bool,
    /// Sink receiving each produced token synchronously, in order.
    pub streamer: Option<Arc<dyn TokenSink>>,
}

/// Result of decoding one sequence.
#[derive(Debug, Clone)]
pub struct DecodeOutput {
    /// Generated tokens, shape `[1, n]`.
    pub tokens: Tensor,
    /// Accumulated logits, shape `[1, m, vocab]`.
    pub logits: Tensor,
}

/// Static decoding configuration, fixed at pipeline construction.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Whether the model exposes cache outputs at all.
    pub cache_support: bool,
    /// Generation budget; unset or zero falls back to a hard safety ceiling
    /// of `100 × sequence_length`.
    pub max_generated_tokens: Option<usize>,
    /// Keep generating past an end-of-sequence token.
    pub force_max_tokens: bool,
    /// Token that terminates generation.
    pub eos_token_id: i64,
    /// The tokenizer prepends a beginning-of-sequence token, which a prior
    /// turn on the session will already have consumed.
    pub strip_bos: bool,
}

/// Drives the PREFILL → GENERATE → DONE loop over an engine pair.
pub struct AutoregressiveDecoder {
    engine: Option<Arc<dyn Engine>>,
    multitoken_engine: Option<Arc<dyn Engine>>,
    config: DecoderConfig,
}

impl AutoregressiveDecoder {
    /// `engine` advances one token per call; `multitoken_engine` consumes
    /// prompt chunks. Either may be absent depending on the model profile,
    /// but never both.
    pub fn new(
        engine: Option<Arc<dyn Engine>>,
        multitoken_engine: Option<Arc<dyn Engine>>,
        config: DecoderConfig,
    ) -> Result<Self, PipelineError> {
        if engine.is_none() && multitoken_engine.is_none() {
            return Err(PipelineError::Configuration(
                "at least one engine must be supplied to the decoder".into(),
            ));
        }
        if config.cache_support && engine.is_none() {
            return Err(PipelineError::Configuration(
                "cache support requires a single-token engine".into(),
            ));
        }
        Ok(Self {
            engine,
            multitoken_engine,
            config,
        })
    }

    /// Decode one sequence. `input_ids` and `attention_mask` are the
    /// tokenized prompt, shape `[1, L]`.
    pub async fn run(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        session: &SessionId,
        opts: &DecodeOptions,
    ) -> Result<DecodeOutput, PipelineError> {
        if !self.config.cache_support {
            return self.no_cache_pass(input_ids, attention_mask, session, opts).await;
        }

        let engine = self.single_token_engine()?;
        let sequence_length = engine.sequence_length();

        debug!(session = %session, "prompt prefill");
        let (mut tokens, prompt_logits) =
            self.prompt_inference(input_ids, attention_mask, session).await?;

        if let Some(streamer) = &opts.streamer {
            streamer.push(*tokens.last().expect("prefill yields a token"));
        }

        let max_tokens = self
            .config
            .max_generated_tokens
            .filter(|&m| m > 0)
            .unwrap_or(100 * sequence_length);

        let mut generated_tokens = vec![*tokens.last().expect("prefill yields a token")];
        let mut generated_logits = if opts.include_prompt_logits {
            prompt_logits
        } else {
            Vec::new()
        };

        debug!(session = %session, max_tokens, "token generation");
        while generated_tokens.len() <= max_tokens {
            let step = self.autoregressive_inference(&tokens, session).await?;
            tokens.push(step.token);
            generated_tokens.push(step.token);
            generated_logits.push(step.logits);

            if let Some(streamer) = &opts.streamer {
                streamer.push(step.token);
            }

            if step.token == self.config.eos_token_id && !self.config.force_max_tokens {
                break;
            }
        }

        // One extra inference to write the final accepted token into the
        // cache; its token and logits are discarded.
        self.autoregressive_inference(&tokens, session).await?;
        if let Some(streamer) = &opts.streamer {
            streamer.close();
        }
        debug!(session = %session, generated = generated_tokens.len(), "decode done");

        let count = generated_tokens.len();
        Ok(DecodeOutput {
            tokens: Tensor::from_i64(vec![1, count], generated_tokens),
            logits: Tensor::cat(&generated_logits, 1)?,
        })
    }

    /// One pass over the whole prompt through the cache-less engine; yields
    /// exactly one token and the prompt logits.
    async fn no_cache_pass(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        session: &SessionId,
        opts: &DecodeOptions,
    ) -> Result<DecodeOutput, PipelineError> {
        let engine = self.multitoken_engine.as_ref().ok_or_else(|| {
            PipelineError::Configuration(
                "a model without cache support requires a multitoken engine".into(),
            )
        })?;

        let mask = attention_mask
            .as_i64()
            .ok_or_else(|| PipelineError::Shape("attention mask must be an integer tensor".into()))?;

        // Position of each prompt token among the attended ones; padded
        // slots fall on -1.
        let mut positions = Vec::with_capacity(mask.len());
        let mut running = 0i64;
        for &m in mask {
            running += m;
            positions.push(running * m - 1);
        }
        let positions = Tensor::from_i64(attention_mask.shape().to_vec(), positions);

        let mut inputs = EngineInputs::new();
        for name in engine.input_names() {
            match name {
                InputName::InputIds => inputs.insert(*name, input_ids.clone()),
                InputName::AttentionMask => inputs.insert(*name, attention_mask.clone()),
                InputName::Positions => inputs.insert(*name, positions.clone()),
                InputName::CausalMask => {
                    inputs.insert(*name, create_causal_mask(input_ids, attention_mask)?)
                }
            }
        }

        let out = engine.invoke(inputs, session).await?;
        if let Some(streamer) = &opts.streamer {
            streamer.push(out.token);
            streamer.close();
        }
        Ok(DecodeOutput {
            tokens: Tensor::from_i64(vec![1, 1], vec![out.token]),
            logits: out.logits,
        })
    }

    /// PREFILL: process the prompt through full multitoken chunks, then the
    /// remainder one token at a time. Returns the prompt token list with one
    /// new token appended, plus the per-step logits.
    async fn prompt_inference(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        session: &SessionId,
    ) -> Result<(Vec<i64>, Vec<Tensor>), PipelineError> {
        let engine = self.single_token_engine()?;
        let ids = input_ids
            .as_i64()
            .ok_or_else(|| PipelineError::Shape("input ids must be an integer tensor".into()))?;
        let mask = attention_mask
            .as_i64()
            .ok_or_else(|| PipelineError::Shape("attention mask must be an integer tensor".into()))?;

        // Real prompt tokens are the ones the attention mask keeps.
        let mut tokens: Vec<i64> = ids
            .iter()
            .zip(mask)
            .filter(|(_, m)| **m != 0)
            .map(|(t, _)| *t)
            .collect();

        let mut prompt_logits = Vec::new();
        let mut new_token = None;
        let mut num_tokens_processed = 0;

        if let Some(multitoken) = &self.multitoken_engine {
            if tokens.len() > multitoken.input_ids_length() {
                synchronize(engine.store(), multitoken.store(), session);
                if multitoken.has_session(session) && self.config.strip_bos {
                    tokens.remove(0);
                }

                let planner = PrefillPlanner::new(multitoken.as_ref(), session, &tokens);
                for inputs in planner {
                    let out = multitoken.invoke(inputs?, session).await?;
                    num_tokens_processed += multitoken.input_ids_length();
                    new_token = Some(out.token);
                    prompt_logits.push(out.logits);
                }
            }
        }

        if let Some(multitoken) = &self.multitoken_engine {
            synchronize(engine.store(), multitoken.store(), session);
        }
        if engine.has_session(session) && num_tokens_processed == 0 && self.config.strip_bos {
            tokens.remove(0);
        }

        // The remainder (shorter than one chunk) populates the cache through
        // ordinary autoregressive steps.
        let mut run_tokens = tokens[..num_tokens_processed].to_vec();
        for &token in &tokens[num_tokens_processed..] {
            run_tokens.push(token);
            let out = self.autoregressive_inference(&run_tokens, session).await?;
            new_token = Some(out.token);
            prompt_logits.push(out.logits);
        }

        let new_token = new_token.ok_or_else(|| {
            PipelineError::Configuration("prompt contained no attended tokens".into())
        })?;
        tokens.push(new_token);
        Ok((tokens, prompt_logits))
    }

    /// One single-token inference over the latest token in the context.
    async fn autoregressive_inference(
        &self,
        tokens: &[i64],
        session: &SessionId,
    ) -> Result<EngineOutput, PipelineError> {
        let engine = self.single_token_engine()?;
        let sequence_length = engine.sequence_length();
        let cached = engine.non_blank_rows(session);
        if cached + 1 > sequence_length {
            return Err(PipelineError::Capacity {
                needed: cached + 1,
                limit: sequence_length,
            });
        }

        let new_token = *tokens
            .last()
            .ok_or_else(|| PipelineError::Shape("autoregressive step over empty context".into()))?;

        // Padding sits on the left, so the mask is 1s from the right across
        // the new token and every cached row.
        let unmasked = cached + 1;
        let mut mask_data = vec![0i64; sequence_length];
        for slot in &mut mask_data[sequence_length - unmasked..] {
            *slot = 1;
        }
        let attention_mask = Tensor::from_i64(vec![1, sequence_length], mask_data);
        let positions = Tensor::from_i64(vec![1, 1], vec![cached as i64]);
        let input_ids = Tensor::from_i64(vec![1, 1], vec![new_token]);

        let mut inputs = EngineInputs::new();
        for name in engine.input_names() {
            match name {
                InputName::InputIds => inputs.insert(*name, input_ids.clone()),
                InputName::AttentionMask => inputs.insert(*name, attention_mask.clone()),
                InputName::Positions => inputs.insert(*name, positions.clone()),
                InputName::CausalMask => {
                    inputs.insert(*name, create_causal_mask(&input_ids, &attention_mask)?)
                }
            }
        }
        engine.invoke(inputs, session).await.map_err(Into::into)
    }

    fn single_token_engine(&self) -> Result<&Arc<dyn Engine>, PipelineError> {
        self.engine.as_ref().ok_or_else(|| {
            PipelineError::Configuration("no single-token engine was initialized".into())
        })
    }
}
