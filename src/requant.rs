//! Requantization: converting int32 accumulators back to quantized outputs.
//!
//! Coefficients are derived per invocation from tensor scales. Rounding and
//! saturation belong to the compute primitive's epilogue; the helpers at the
//! bottom of this file are the host reference of that epilogue.

use crate::error::{ConvError, ConvResult};
use crate::layout::TensorLayout;
use crate::param::NonlineMode;

/// Affine coefficients of `dst = alpha * acc + beta * bias + gamma * z`,
/// all expressed in units of the destination scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequantCoeffs {
    pub alpha: f32,
    pub beta: f32,
    /// Zero when no residual tensor is present.
    pub gamma: f32,
    /// Kept for output saturation and real-domain nonlinearities.
    pub dst_scale: f32,
}

impl RequantCoeffs {
    pub fn new(
        src_scale: f32,
        filter_scale: f32,
        bias_scale: f32,
        z_scale: Option<f32>,
        dst_scale: f32,
    ) -> Self {
        Self {
            alpha: src_scale * filter_scale / dst_scale,
            beta: bias_scale / dst_scale,
            gamma: z_scale.map_or(0.0, |z| z / dst_scale),
            dst_scale,
        }
    }

    /// Read scales from quantized layouts; `z` is ignored when empty.
    pub fn from_layouts(
        src: &TensorLayout,
        filter: &TensorLayout,
        bias: &TensorLayout,
        z: &TensorLayout,
        dst: &TensorLayout,
    ) -> ConvResult<Self> {
        let z_scale = if z.is_empty() {
            None
        } else {
            Some(scale_of("z", z)?)
        };
        Ok(Self::new(
            scale_of("src", src)?,
            scale_of("filter", filter)?,
            scale_of("bias", bias)?,
            z_scale,
            scale_of("dst", dst)?,
        ))
    }

    /// Unrounded epilogue value in destination units.
    #[inline]
    pub fn apply(&self, acc: i32, bias: i32, z: i32) -> f32 {
        self.alpha * acc as f32 + self.beta * bias as f32 + self.gamma * z as f32
    }
}

fn scale_of(role: &'static str, layout: &TensorLayout) -> ConvResult<f32> {
    layout.dtype.scale().ok_or(ConvError::InvalidDType {
        role,
        dtype: layout.dtype,
    })
}

/// Apply `mode` to a value in destination units. Sigmoid and h-swish are
/// evaluated in the real domain, which is why `dst_scale` is needed.
#[inline]
pub fn apply_nonlinearity(x: f32, mode: NonlineMode, dst_scale: f32) -> f32 {
    match mode {
        NonlineMode::Identity => x,
        NonlineMode::Relu => x.max(0.0),
        NonlineMode::Sigmoid => {
            let real = x * dst_scale;
            1.0 / (1.0 + (-real).exp()) / dst_scale
        }
        NonlineMode::HSwish => {
            let real = x * dst_scale;
            real * (real + 3.0).clamp(0.0, 6.0) / 6.0 / dst_scale
        }
    }
}

/// Round half to even and clamp into `i8`.
#[inline]
pub fn saturate_i8(x: f32) -> i8 {
    x.round_ties_even().clamp(i8::MIN as f32, i8::MAX as f32) as i8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() <= 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn test_coefficients_without_residual() {
        let c = RequantCoeffs::new(0.5, 0.25, 0.125, None, 0.1);
        assert!(close(c.alpha, 1.25));
        assert!(close(c.beta, 1.25));
        assert_eq!(c.gamma, 0.0);
        assert_eq!(c.dst_scale, 0.1);
    }

    #[test]
    fn test_coefficients_with_residual() {
        let c = RequantCoeffs::new(1.0, 1.0, 1.0, Some(0.3), 0.6);
        assert!(close(c.gamma, 0.5));
    }

    #[test]
    fn test_from_layouts_rejects_plain_dtype() {
        let q = TensorLayout::new(&[1], DType::QuantizedS8 { scale: 1.0 });
        let plain = TensorLayout::new(&[1], DType::Int32);
        let empty = TensorLayout::empty(DType::Int8);
        let err = RequantCoeffs::from_layouts(&q, &q, &plain, &empty, &q).unwrap_err();
        assert!(matches!(err, ConvError::InvalidDType { role: "bias", .. }));
    }

    #[test]
    fn test_saturate_rounds_half_to_even() {
        assert_eq!(saturate_i8(2.5), 2);
        assert_eq!(saturate_i8(3.5), 4);
        assert_eq!(saturate_i8(-2.5), -2);
        assert_eq!(saturate_i8(1000.0), 127);
        assert_eq!(saturate_i8(-1000.0), -128);
    }

    #[test]
    fn test_nonlinearities() {
        assert_eq!(apply_nonlinearity(-3.0, NonlineMode::Relu, 0.1), 0.0);
        assert_eq!(apply_nonlinearity(-3.0, NonlineMode::Identity, 0.1), -3.0);
        // real 6.0 -> hswish 6.0 -> 60 dst units
        assert!(close(apply_nonlinearity(60.0, NonlineMode::HSwish, 0.1), 60.0));
        // real -4.0 -> 0
        assert_eq!(apply_nonlinearity(-40.0, NonlineMode::HSwish, 0.1), 0.0);
        // sigmoid(0) = 0.5 real
        assert!(close(apply_nonlinearity(0.0, NonlineMode::Sigmoid, 0.5), 1.0));
    }
}
