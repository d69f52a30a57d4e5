//! Dense row-major tensor type backing the engine input construction.
//!
//! Engine inputs in this crate are small integer masks, position vectors and
//! floating point logits, so the type supports exactly two element types and
//! the handful of axis operations the orchestration layer needs: reshape,
//! slicing, concatenation and right-padding along an axis.

use serde::Serialize;

use crate::error::PipelineError;

/// Storage for tensor elements, varying by element type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TensorData {
    /// 64-bit signed integers (token ids, masks, positions).
    I64(Vec<i64>),
    /// 32-bit floats (logits).
    F32(Vec<f32>),
}

impl TensorData {
    fn len(&self) -> usize {
        match self {
            TensorData::I64(v) => v.len(),
            TensorData::F32(v) => v.len(),
        }
    }
}

/// N-dimensional dense tensor with row-major layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tensor {
    shape: Vec<usize>,
    strides: Vec<usize>,
    data: TensorData,
}

/// Compute row-major strides from shape.
/// strides[i] = product of shape[i+1..]
fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; shape.len()];
    if shape.is_empty() {
        return strides;
    }
    strides[shape.len() - 1] = 1;
    for i in (0..shape.len() - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

impl Tensor {
    /// Create an integer tensor from shape and data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the product of `shape`.
    pub fn from_i64(shape: Vec<usize>, data: Vec<i64>) -> Self {
        Self::new(shape, TensorData::I64(data))
    }

    /// Create a float tensor from shape and data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the product of `shape`.
    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self::new(shape, TensorData::F32(data))
    }

    fn new(shape: Vec<usize>, data: TensorData) -> Self {
        let n_elements: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            n_elements,
            "data length {} does not match shape {:?}",
            data.len(),
            shape,
        );
        let strides = compute_strides(&shape);
        Self {
            shape,
            strides,
            data,
        }
    }

    /// Create a zero-filled integer tensor.
    pub fn zeros_i64(shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        Self::from_i64(shape.to_vec(), vec![0i64; n])
    }

    /// Create a one-filled integer tensor.
    pub fn ones_i64(shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        Self::from_i64(shape.to_vec(), vec![1i64; n])
    }

    /// Create a zero-filled float tensor.
    pub fn zeros_f32(shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        Self::from_f32(shape.to_vec(), vec![0.0f32; n])
    }

    /// Integer range `[start, end)` as a `[1, end - start]` tensor.
    pub fn arange_i64(start: usize, end: usize) -> Self {
        let data: Vec<i64> = (start..end).map(|v| v as i64).collect();
        Self::from_i64(vec![1, end - start], data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Borrow the underlying integer data, if this is an integer tensor.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::I64(v) => Some(v),
            TensorData::F32(_) => None,
        }
    }

    /// Borrow the underlying float data, if this is a float tensor.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            TensorData::I64(_) => None,
        }
    }

    /// Flat offset of a multi-dimensional index.
    ///
    /// # Panics
    /// Panics if the index rank does not match the tensor rank.
    pub fn offset(&self, index: &[usize]) -> usize {
        assert_eq!(index.len(), self.rank(), "index rank mismatch");
        index
            .iter()
            .zip(&self.strides)
            .map(|(i, s)| i * s)
            .sum()
    }

    /// Integer element at a multi-dimensional index.
    pub fn i64_at(&self, index: &[usize]) -> i64 {
        let off = self.offset(index);
        self.as_i64().expect("integer tensor")[off]
    }

    /// Float element at a multi-dimensional index.
    pub fn f32_at(&self, index: &[usize]) -> f32 {
        let off = self.offset(index);
        self.as_f32().expect("float tensor")[off]
    }

    /// Reinterpret the tensor with a new shape holding the same elements.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, PipelineError> {
        let n: usize = shape.iter().product();
        if n != self.numel() {
            return Err(PipelineError::Shape(format!(
                "cannot reshape {:?} into {:?}",
                self.shape, shape
            )));
        }
        Ok(Self {
            strides: compute_strides(&shape),
            shape,
            data: self.data,
        })
    }

    /// Slice `len` blocks starting at `start` along `axis`.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Self, PipelineError> {
        self.check_axis(axis)?;
        if start + len > self.shape[axis] {
            return Err(PipelineError::Shape(format!(
                "narrow {}..{} out of bounds for axis {} of {:?}",
                start,
                start + len,
                axis,
                self.shape
            )));
        }
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        let old_block = self.shape[axis] * inner;

        let mut shape = self.shape.clone();
        shape[axis] = len;
        let data = match &self.data {
            TensorData::I64(v) => {
                TensorData::I64(narrow_data(v, outer, inner, old_block, start, len))
            }
            TensorData::F32(v) => {
                TensorData::F32(narrow_data(v, outer, inner, old_block, start, len))
            }
        };
        Ok(Self::new(shape, data))
    }

    /// Right-pad the tensor along `axis` up to `len` elements, filling with
    /// `value` (converted to the tensor's element type).
    pub fn pad_to_length(&self, axis: usize, len: usize, value: i64) -> Result<Self, PipelineError> {
        self.check_axis(axis)?;
        if len < self.shape[axis] {
            return Err(PipelineError::Shape(format!(
                "cannot pad axis {} of {:?} down to {}",
                axis, self.shape, len
            )));
        }
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        let old_len = self.shape[axis];

        let mut shape = self.shape.clone();
        shape[axis] = len;
        let data = match &self.data {
            TensorData::I64(v) => {
                TensorData::I64(pad_data(v, outer, inner, old_len, len, value))
            }
            TensorData::F32(v) => {
                TensorData::F32(pad_data(v, outer, inner, old_len, len, value as f32))
            }
        };
        Ok(Self::new(shape, data))
    }

    /// Concatenate tensors along `axis`, in the order supplied.
    ///
    /// All tensors must share element type and shape on every other axis.
    pub fn cat(tensors: &[Tensor], axis: usize) -> Result<Tensor, PipelineError> {
        let first = tensors
            .first()
            .ok_or_else(|| PipelineError::Shape("cat of zero tensors".into()))?;
        first.check_axis(axis)?;
        for t in &tensors[1..] {
            let compatible = t.rank() == first.rank()
                && t.shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(d, (a, b))| d == axis || a == b);
            if !compatible {
                return Err(PipelineError::Shape(format!(
                    "cat of incompatible shapes {:?} and {:?} along axis {}",
                    first.shape, t.shape, axis
                )));
            }
        }

        let outer: usize = first.shape[..axis].iter().product();
        let inner: usize = first.shape[axis + 1..].iter().product();
        let total_axis: usize = tensors.iter().map(|t| t.shape[axis]).sum();

        let mut shape = first.shape.clone();
        shape[axis] = total_axis;
        let data = match &first.data {
            TensorData::I64(_) => {
                let parts = tensors
                    .iter()
                    .map(|t| {
                        t.as_i64()
                            .map(|d| (d, t.shape[axis] * inner))
                            .ok_or_else(|| {
                                PipelineError::Shape("cat of mixed element types".into())
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                TensorData::I64(cat_data(&parts, outer))
            }
            TensorData::F32(_) => {
                let parts = tensors
                    .iter()
                    .map(|t| {
                        t.as_f32()
                            .map(|d| (d, t.shape[axis] * inner))
                            .ok_or_else(|| {
                                PipelineError::Shape("cat of mixed element types".into())
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                TensorData::F32(cat_data(&parts, outer))
            }
        };
        Ok(Self::new(shape, data))
    }

    fn check_axis(&self, axis: usize) -> Result<(), PipelineError> {
        if axis >= self.rank() {
            return Err(PipelineError::Shape(format!(
                "axis {} out of range for shape {:?}",
                axis, self.shape
            )));
        }
        Ok(())
    }
}

fn narrow_data<T: Copy>(
    data: &[T],
    outer: usize,
    inner: usize,
    old_block: usize,
    start: usize,
    len: usize,
) -> Vec<T> {
    let mut out = Vec::with_capacity(outer * len * inner);
    for o in 0..outer {
        let base = o * old_block + start * inner;
        out.extend_from_slice(&data[base..base + len * inner]);
    }
    out
}

fn pad_data<T: Copy>(
    data: &[T],
    outer: usize,
    inner: usize,
    old_len: usize,
    new_len: usize,
    fill: T,
) -> Vec<T> {
    let mut out = Vec::with_capacity(outer * new_len * inner);
    for o in 0..outer {
        let base = o * old_len * inner;
        out.extend_from_slice(&data[base..base + old_len * inner]);
        out.extend(std::iter::repeat(fill).take((new_len - old_len) * inner));
    }
    out
}

fn cat_data<T: Copy>(parts: &[(&[T], usize)], outer: usize) -> Vec<T> {
    let total: usize = parts.iter().map(|(_, block)| block).sum();
    let mut out = Vec::with_capacity(outer * total);
    for o in 0..outer {
        for (data, block) in parts {
            out.extend_from_slice(&data[o * block..(o + 1) * block]);
        }
    }
    out
}
