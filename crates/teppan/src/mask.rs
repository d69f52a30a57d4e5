//! Causal mask construction.
//!
//! A causal mask restricts which positions a query token may attend to. For a
//! chunk of `L` new tokens placed at the right edge of a fixed `S`-length
//! context, the mask is the concatenation of an all-ones "past" block covering
//! the `S - L` cache positions and a lower-triangular block over the new
//! tokens, with any positions masked out by the attention mask zeroed from the
//! left edge:
//!
//! ```text
//! input_ids      = [[1, 2, 3, 4]]
//! attention_mask = [[0, 0, 1, 1, 1, 1, 1]]
//!
//! causal_mask    = [[[[ 0 0 1 | 1 0 0 0 ],
//!                     [ 0 0 1 | 1 1 0 0 ],
//!                     [ 0 0 1 | 1 1 1 0 ],
//!                     [ 0 0 1 | 1 1 1 1 ]]]]
//! ```

use crate::error::PipelineError;
use crate::tensor::Tensor;

/// Build a causal mask from `input_ids` of shape `[batch, L]` and
/// `attention_mask` of shape `[batch, S]`, with `S >= L`.
///
/// The result has shape `[batch, 1, L, S]`. In the single-token case
/// (`L == 1`) no triangular computation is needed and the mask is the
/// attention mask reshaped to `[batch, 1, 1, S]`.
pub fn create_causal_mask(
    input_ids: &Tensor,
    attention_mask: &Tensor,
) -> Result<Tensor, PipelineError> {
    if input_ids.rank() != 2 || attention_mask.rank() != 2 {
        return Err(PipelineError::Shape(format!(
            "causal mask expects rank-2 inputs, got {:?} and {:?}",
            input_ids.shape(),
            attention_mask.shape()
        )));
    }
    let batch = input_ids.shape()[0];
    let input_ids_length = input_ids.shape()[1];
    let sequence_length = attention_mask.shape()[1];
    if attention_mask.shape()[0] != batch || sequence_length < input_ids_length {
        return Err(PipelineError::Shape(format!(
            "incompatible causal mask inputs: ids {:?}, attention mask {:?}",
            input_ids.shape(),
            attention_mask.shape()
        )));
    }
    let mask_data = attention_mask
        .as_i64()
        .ok_or_else(|| PipelineError::Shape("attention mask must be an integer tensor".into()))?;

    if input_ids_length == 1 {
        return attention_mask
            .clone()
            .reshape(vec![batch, 1, 1, sequence_length]);
    }

    let num_zeros = mask_data.iter().filter(|&&v| v == 0).count();
    let past = sequence_length - input_ids_length;

    let mut data = Vec::with_capacity(batch * input_ids_length * sequence_length);
    for _ in 0..batch {
        for row in 0..input_ids_length {
            for col in 0..sequence_length {
                let visible = col < past || col - past <= row;
                let masked = col < num_zeros;
                data.push(if visible && !masked { 1 } else { 0 });
            }
        }
    }
    Ok(Tensor::from_i64(
        vec![batch, 1, input_ids_length, sequence_length],
        data,
    ))
}
