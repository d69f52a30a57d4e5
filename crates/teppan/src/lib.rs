//! # Teppan
//!
//! An orchestration layer for autoregressive text generation over compiled
//! inference engines with externally managed key/value caches.
//!
//! ## Overview
//!
//! Fixed-window transformer engines accept a constant number of new tokens
//! per call and keep attention state in a cache the caller owns. This crate
//! provides the machinery that turns such engines into a text generation
//! pipeline: prompts are pushed through the cache in fixed-size chunks, then
//! tokens are generated one at a time until a stopping condition, with the
//! cache surviving across requests so a conversation can resume where it
//! left off.
//!
//! Key components include:
//!
//! - A causal mask builder for fixed-window attention over a partially
//!   filled cache
//! - Session stores with timestamp-based synchronization between the two
//!   engines of a pipeline
//! - A chunked prefill planner and an autoregressive decode loop
//! - Batch split/join transport that keeps session identifiers attached
//!   out-of-band
//! - Asynchronous streaming of generated tokens
//!
//! ## Architecture
//!
//! ### Assumptions
//!
//! Tensors reserve two dimensions with special meanings:
//!  - The `0th` dimension is the batch dimension
//!  - The `1st` dimension is the sequence dimension
//!
//! Padding within the attention window sits on the left, so the most recent
//! tokens occupy the right edge.
//!
//! ### The engine seam
//!
//! The [`engine::Engine`] trait is the boundary to the compiled model: one
//! forward pass per call, inputs selected by the model's declared input
//! signature, cache state tracked per session. A pipeline holds up to two
//! engines over the same logical cache, paired at construction from the
//! model's [`engine::ModelProfile`].
//!
//! ### The pipeline
//!
//! [`pipeline::TextGenerationPipeline`] owns the request path end to end:
//! tokenize, split into per-sequence sub-batches, decode concurrently,
//! rejoin in request order, detokenize.

pub mod decoder;
pub mod engine;
pub mod error;
pub mod mask;
pub mod pipeline;
pub mod prefill;
pub mod session;
pub mod streaming;
pub mod tensor;
pub mod tokenizer;
pub mod transport;

pub use engine::{Engine, EngineBuilder, EngineInputs, EngineOutput, ModelProfile};
pub use error::{EngineError, PipelineError};
pub use pipeline::{GenerationRequest, GenerationResponse, OneOrMany, PipelineConfig,
    TextGenerationPipeline};
pub use session::SessionId;
pub use tensor::Tensor;
pub use tokenizer::Tokenizer;
