//! CastOps implementation for CpuBackend.

use pagedref::backend::CastOps;
use pagedref::dtype::DType;
use pagedref::tensor::Tensor;
use pagedref::Result;

use crate::tensor::CpuTensor;
use crate::CpuBackend;

impl CastOps for CpuBackend {
    fn cast_to_f32(input: &CpuTensor) -> Result<CpuTensor> {
        let f32_data = input.to_f32_vec()?;
        Ok(CpuTensor::from_f32(input.shape(), &f32_data))
    }

    fn cast_from_f32(input: &CpuTensor, target: DType) -> Result<CpuTensor> {
        if input.dtype() != DType::F32 {
            return Err(pagedref::Error::DtypeMismatch {
                what: "cast_from_f32 input",
                expected: DType::F32.to_string(),
                got: input.dtype().to_string(),
            });
        }
        let f32_data = input.as_f32_slice();
        match target {
            DType::F32 => Ok(input.clone()),
            DType::BF16 => {
                let bf16_data: Vec<half::bf16> =
                    f32_data.iter().map(|&v| half::bf16::from_f32(v)).collect();
                Ok(CpuTensor::from_slice(input.shape(), &bf16_data))
            }
            DType::F16 => {
                let f16_data: Vec<half::f16> =
                    f32_data.iter().map(|&v| half::f16::from_f32(v)).collect();
                Ok(CpuTensor::from_slice(input.shape(), &f16_data))
            }
            other => Err(pagedref::Error::UnsupportedDtype(format!(
                "cast_from_f32: unsupported target dtype {other}"
            ))),
        }
    }
}
