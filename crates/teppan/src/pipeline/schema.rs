use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::session::SessionId;
use crate::streaming::TokenSink;
use crate::tensor::Tensor;

/// A single sequence or a batch of them; responses mirror the request arity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_single(&self) -> bool {
        matches!(self, OneOrMany::One(_))
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        OneOrMany::One(value.to_string())
    }
}

impl From<Vec<String>> for OneOrMany {
    fn from(value: Vec<String>) -> Self {
        OneOrMany::Many(value)
    }
}

/// One text generation request.
#[derive(Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The input sequences to generate text from.
    pub sequences: OneOrMany,
    /// Caller-supplied cache session ids, one per sequence and unique within
    /// the request. Generated as random uuids when absent.
    #[serde(default)]
    pub session_ids: Option<OneOrMany>,
    /// Return the logits tensor alongside the generated text.
    #[serde(default)]
    pub return_logits: bool,
    /// Prepend the prompt logits to the generated-token logits. Only
    /// meaningful together with `return_logits`.
    #[serde(default)]
    pub include_prompt_logits: bool,
    /// Pad or truncate every input to exactly the fixed sequence length.
    #[serde(default)]
    pub fixed_sequence_length: bool,
    /// Sink receiving generated tokens as they are produced.
    #[serde(skip)]
    pub streamer: Option<Arc<dyn TokenSink>>,
}

impl GenerationRequest {
    pub fn new(sequences: impl Into<OneOrMany>) -> Self {
        Self {
            sequences: sequences.into(),
            session_ids: None,
            return_logits: false,
            include_prompt_logits: false,
            fixed_sequence_length: false,
            streamer: None,
        }
    }
}

/// One text generation response.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    /// Generated text, matching the request arity.
    pub sequences: OneOrMany,
    /// Logits of shape `[batch, seq, vocab]` when the caller asked for them.
    pub logits: Option<Tensor>,
    /// Cache session ids, item `i` belonging to sequence `i`.
    pub session_ids: Vec<SessionId>,
}

/// Check caller-supplied session ids against the request's sequences:
/// cardinality must match and ids must be unique within the request.
pub(crate) fn validate_session_ids(
    sequences: &OneOrMany,
    session_ids: &Option<OneOrMany>,
) -> Result<Option<Vec<SessionId>>, PipelineError> {
    let Some(session_ids) = session_ids else {
        return Ok(None);
    };
    let ids = session_ids.to_vec();
    if ids.len() != sequences.len() {
        return Err(PipelineError::Configuration(format!(
            "number of session ids must match the number of input sequences: \
             detected {} sequences and {} session ids",
            sequences.len(),
            ids.len()
        )));
    }
    for (i, id) in ids.iter().enumerate() {
        if ids[..i].contains(id) {
            return Err(PipelineError::Configuration(format!(
                "session ids must be unique, detected duplicate {id:?}"
            )));
        }
    }
    Ok(Some(ids.iter().map(|id| SessionId::new(id.clone())).collect()))
}
