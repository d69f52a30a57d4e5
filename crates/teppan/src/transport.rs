//! Batch splitting and joining.
//!
//! A logical batch is a list of per-role tensors plus a parallel list of
//! session identifiers. The identifiers travel out-of-band as a structured
//! pair: they are never concatenated into the numeric payload, yet every
//! sub-batch must carry exactly the ids of the items it contains so the
//! engine call can locate its cache sessions. The split/join round trip
//! preserves item order end to end.

use crate::error::PipelineError;
use crate::session::SessionId;
use crate::tensor::Tensor;

/// One fragment of a logical batch, ready for dispatch.
#[derive(Debug, Clone)]
pub struct SubBatch {
    /// Per-role tensors, each with the sub-batch size on axis 0.
    pub tensors: Vec<Tensor>,
    /// Session ids of exactly the items in this fragment.
    pub session_ids: Vec<SessionId>,
}

/// Decoded output of one sub-batch.
#[derive(Debug, Clone)]
pub struct SubBatchOutput {
    /// Generated tokens, shape `[k, n]`.
    pub tokens: Tensor,
    /// Accumulated logits, shape `[k, n, vocab]`.
    pub logits: Tensor,
    pub session_ids: Vec<SessionId>,
}

/// The reassembled logical batch.
#[derive(Debug, Clone)]
pub struct JoinedOutput {
    pub tokens: Tensor,
    pub logits: Tensor,
    pub session_ids: Vec<SessionId>,
}

/// Partition a logical batch into sub-batches of at most `batch_size` items,
/// re-attaching the matching slice of session ids to each. Returns the
/// sub-batches and the original batch size for later reconstruction.
pub fn split(
    tensors: &[Tensor],
    session_ids: &[SessionId],
    batch_size: usize,
) -> Result<(Vec<SubBatch>, usize), PipelineError> {
    if batch_size == 0 {
        return Err(PipelineError::Configuration(
            "batch split size must be positive".into(),
        ));
    }
    let first = tensors.first().ok_or_else(|| {
        PipelineError::Shape("cannot split a batch with no tensors".into())
    })?;
    let orig_batch_size = first.shape()[0];
    if session_ids.len() != orig_batch_size {
        return Err(PipelineError::Configuration(format!(
            "{} session ids for a batch of {}",
            session_ids.len(),
            orig_batch_size
        )));
    }
    for tensor in tensors {
        if tensor.shape()[0] != orig_batch_size {
            return Err(PipelineError::Shape(format!(
                "inconsistent batch sizes: {} and {}",
                orig_batch_size,
                tensor.shape()[0]
            )));
        }
    }

    let mut batches = Vec::new();
    let mut start = 0;
    while start < orig_batch_size {
        let take = batch_size.min(orig_batch_size - start);
        let tensors = tensors
            .iter()
            .map(|t| t.narrow(0, start, take))
            .collect::<Result<Vec<_>, _>>()?;
        batches.push(SubBatch {
            tensors,
            session_ids: session_ids[start..start + take].to_vec(),
        });
        start += take;
    }
    Ok((batches, orig_batch_size))
}

/// Rejoin per-sub-batch outputs into one logical batch, preserving item
/// order.
///
/// With cache support the sub-batches may have generated sequences of
/// different lengths, so tokens are right-padded with `pad_token` and logits
/// with zero up to the longest sequence before concatenating along the batch
/// axis. Session ids concatenate without padding.
pub fn join(
    batch_outputs: Vec<SubBatchOutput>,
    cache_enabled: bool,
    pad_token: i64,
) -> Result<JoinedOutput, PipelineError> {
    if batch_outputs.is_empty() {
        return Err(PipelineError::Shape("cannot join zero sub-batches".into()));
    }

    let mut tokens: Vec<Tensor> = Vec::with_capacity(batch_outputs.len());
    let mut logits: Vec<Tensor> = Vec::with_capacity(batch_outputs.len());
    let mut session_ids = Vec::new();
    for output in batch_outputs {
        tokens.push(output.tokens);
        logits.push(output.logits);
        session_ids.extend(output.session_ids);
    }

    if cache_enabled {
        let max_tokens = tokens.iter().map(|t| t.shape()[1]).max().unwrap_or(0);
        tokens = tokens
            .iter()
            .map(|t| t.pad_to_length(1, max_tokens, pad_token))
            .collect::<Result<Vec<_>, _>>()?;

        let max_logits = logits.iter().map(|t| t.shape()[1]).max().unwrap_or(0);
        logits = logits
            .iter()
            .map(|t| t.pad_to_length(1, max_logits, 0))
            .collect::<Result<Vec<_>, _>>()?;
    }

    Ok(JoinedOutput {
        tokens: Tensor::cat(&tokens, 0)?,
        logits: Tensor::cat(&logits, 0)?,
        session_ids,
    })
}
