//! CPU tensor implementation.

use std::sync::Arc;

use pagedref::dtype::{DType, TensorDType};
use pagedref::tensor::Tensor;
use pagedref::{Error, Result};

/// A host-resident tensor backed by shared byte storage.
///
/// Uses `Arc<Vec<u8>>` so clones and `reshape` views are cheap (shared
/// backing). Half-precision data is kept in its raw storage type and widened
/// to f32 on read.
#[derive(Clone)]
pub struct CpuTensor {
    data: Arc<Vec<u8>>,
    shape: Vec<usize>,
    dtype: DType,
}

impl CpuTensor {
    /// Create a tensor from a typed slice (`f32`, `f16`, `bf16` or `u32`).
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape.
    #[must_use]
    pub fn from_slice<T: TensorDType + bytemuck::Pod>(shape: &[usize], data: &[T]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "data len {} != shape product {numel}",
            data.len()
        );
        Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            shape: shape.to_vec(),
            dtype: T::DTYPE,
        }
    }

    /// Create a tensor from an f32 slice.
    #[must_use]
    pub fn from_f32(shape: &[usize], data: &[f32]) -> Self {
        Self::from_slice(shape, data)
    }

    /// Create a tensor from a u32 slice (block tables, context lengths).
    #[must_use]
    pub fn from_u32(shape: &[usize], data: &[u32]) -> Self {
        Self::from_slice(shape, data)
    }

    /// Create a tensor of `shape` where every element is `value`, stored
    /// as `dtype`.
    ///
    /// # Errors
    /// Returns `UnsupportedDtype` for `U32`.
    pub fn full(shape: &[usize], value: f32, dtype: DType) -> Result<Self> {
        let numel: usize = shape.iter().product();
        match dtype {
            DType::F32 => Ok(Self::from_f32(shape, &vec![value; numel])),
            DType::F16 => Ok(Self::from_slice(shape, &vec![half::f16::from_f32(value); numel])),
            DType::BF16 => Ok(Self::from_slice(shape, &vec![half::bf16::from_f32(value); numel])),
            DType::U32 => Err(Error::UnsupportedDtype(format!(
                "full: cannot fill {dtype} with a float"
            ))),
        }
    }

    /// View the data as `T`, which must be the tensor's dtype.
    ///
    /// # Panics
    /// Panics if `T::DTYPE` is not the tensor's dtype.
    #[must_use]
    pub fn as_slice<T: TensorDType + bytemuck::Pod>(&self) -> &[T] {
        assert_eq!(self.dtype, T::DTYPE, "expected {} tensor", T::DTYPE);
        let bytes = self.as_bytes();
        // An empty Vec<u8> has a dangling pointer with alignment 1.
        if bytes.is_empty() {
            return &[];
        }
        bytemuck::cast_slice(bytes)
    }

    /// Get the data as an f32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not F32.
    #[must_use]
    pub fn as_f32_slice(&self) -> &[f32] {
        self.as_slice()
    }

    /// Get the data as a u32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not U32.
    #[must_use]
    pub fn as_u32_slice(&self) -> &[u32] {
        self.as_slice()
    }

    /// Get the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size_in_bytes()]
    }

    /// Convert to an f32 Vec, widening bf16/f16 if necessary.
    ///
    /// # Errors
    /// Returns `UnsupportedDtype` for integer tensors.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self.dtype {
            DType::F32 => Ok(self.as_f32_slice().to_vec()),
            DType::BF16 => Ok(self
                .as_slice::<half::bf16>()
                .iter()
                .map(|v| v.to_f32())
                .collect()),
            DType::F16 => Ok(self
                .as_slice::<half::f16>()
                .iter()
                .map(|v| v.to_f32())
                .collect()),
            other => Err(Error::UnsupportedDtype(format!(
                "to_f32_vec: cannot widen {other} to f32"
            ))),
        }
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn reshape(&self, shape: &[usize]) -> Self {
        let new_numel: usize = shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "reshape: {} elements != {new_numel} elements",
            self.numel()
        );
        Self {
            data: Arc::clone(&self.data),
            shape: shape.to_vec(),
            dtype: self.dtype,
        }
    }
}
