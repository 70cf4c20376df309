//! Tensor element types with their quantization parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a tensor, carrying scale / zero point for quantized types.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DType {
    Int8,
    Uint8,
    Int32,
    Float32,
    /// Symmetric signed 8-bit: `real = scale * q`.
    QuantizedS8 { scale: f32 },
    /// Symmetric signed 32-bit, used for bias and accumulators.
    QuantizedS32 { scale: f32 },
    /// Asymmetric unsigned 8-bit: `real = scale * (q - zero_point)`.
    Quantized8Asymm { scale: f32, zero_point: u8 },
}

/// Tag of a [`DType`] without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DTypeEnum {
    Int8,
    Uint8,
    Int32,
    Float32,
    QuantizedS8,
    QuantizedS32,
    Quantized8Asymm,
}

impl DType {
    pub const fn enumv(&self) -> DTypeEnum {
        match self {
            DType::Int8 => DTypeEnum::Int8,
            DType::Uint8 => DTypeEnum::Uint8,
            DType::Int32 => DTypeEnum::Int32,
            DType::Float32 => DTypeEnum::Float32,
            DType::QuantizedS8 { .. } => DTypeEnum::QuantizedS8,
            DType::QuantizedS32 { .. } => DTypeEnum::QuantizedS32,
            DType::Quantized8Asymm { .. } => DTypeEnum::Quantized8Asymm,
        }
    }

    pub const fn size_in_bytes(&self) -> usize {
        match self {
            DType::Int8 | DType::Uint8 | DType::QuantizedS8 { .. } => 1,
            DType::Quantized8Asymm { .. } => 1,
            DType::Int32 | DType::Float32 | DType::QuantizedS32 { .. } => 4,
        }
    }

    /// Quantization scale, `None` for plain types.
    pub const fn scale(&self) -> Option<f32> {
        match *self {
            DType::QuantizedS8 { scale }
            | DType::QuantizedS32 { scale }
            | DType::Quantized8Asymm { scale, .. } => Some(scale),
            _ => None,
        }
    }

    pub const fn zero_point(&self) -> Option<u8> {
        match *self {
            DType::Quantized8Asymm { zero_point, .. } => Some(zero_point),
            _ => None,
        }
    }

    pub const fn is_quantized(&self) -> bool {
        self.scale().is_some()
    }

    pub const fn name(&self) -> &'static str {
        match self.enumv() {
            DTypeEnum::Int8 => "Int8",
            DTypeEnum::Uint8 => "Uint8",
            DTypeEnum::Int32 => "Int32",
            DTypeEnum::Float32 => "Float32",
            DTypeEnum::QuantizedS8 => "QuantizedS8",
            DTypeEnum::QuantizedS32 => "QuantizedS32",
            DTypeEnum::Quantized8Asymm => "Quantized8Asymm",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DType::QuantizedS8 { scale } | DType::QuantizedS32 { scale } => {
                write!(f, "{}({scale})", self.name())
            }
            DType::Quantized8Asymm { scale, zero_point } => {
                write!(f, "{}({scale},{zero_point})", self.name())
            }
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quant_params() {
        let q = DType::Quantized8Asymm {
            scale: 0.5,
            zero_point: 128,
        };
        assert_eq!(q.scale(), Some(0.5));
        assert_eq!(q.zero_point(), Some(128));
        assert_eq!(q.size_in_bytes(), 1);
        assert_eq!(DType::Int32.scale(), None);
        assert_eq!(DType::QuantizedS32 { scale: 1.0 }.size_in_bytes(), 4);
    }

    #[test]
    fn test_display() {
        assert_eq!(DType::QuantizedS8 { scale: 0.25 }.to_string(), "QuantizedS8(0.25)");
        assert_eq!(DType::Float32.to_string(), "Float32");
    }
}
