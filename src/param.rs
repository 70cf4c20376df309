//! Convolution operator parameters.

use serde::{Deserialize, Serialize};

/// Tensor memory format. Packed formats keep `pack_size()` channels innermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Nchw,
    Nchw4,
    Nchw32,
}

impl Format {
    pub const fn pack_size(self) -> usize {
        match self {
            Format::Nchw => 1,
            Format::Nchw4 => 4,
            Format::Nchw32 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sparse {
    Dense,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    CrossCorrelation,
    /// True convolution, filter flipped.
    Convolution,
}

/// Post-accumulation nonlinearity. The discriminant is the tag handed to kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum NonlineMode {
    Identity = 0,
    Relu = 1,
    Sigmoid = 2,
    HSwish = 3,
}

impl NonlineMode {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(NonlineMode::Identity),
            1 => Some(NonlineMode::Relu),
            2 => Some(NonlineMode::Sigmoid),
            3 => Some(NonlineMode::HSwish),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvParam {
    pub format: Format,
    pub sparse: Sparse,
    pub mode: Mode,
    pub nonline_mode: NonlineMode,
    pub pad_h: usize,
    pub pad_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilate_h: usize,
    pub dilate_w: usize,
}

impl Default for ConvParam {
    fn default() -> Self {
        Self {
            format: Format::Nchw,
            sparse: Sparse::Dense,
            mode: Mode::CrossCorrelation,
            nonline_mode: NonlineMode::Identity,
            pad_h: 0,
            pad_w: 0,
            stride_h: 1,
            stride_w: 1,
            dilate_h: 1,
            dilate_w: 1,
        }
    }
}

impl ConvParam {
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_sparse(mut self, sparse: Sparse) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_nonline_mode(mut self, mode: NonlineMode) -> Self {
        self.nonline_mode = mode;
        self
    }

    pub fn with_padding(mut self, pad_h: usize, pad_w: usize) -> Self {
        self.pad_h = pad_h;
        self.pad_w = pad_w;
        self
    }

    pub fn with_stride(mut self, stride_h: usize, stride_w: usize) -> Self {
        self.stride_h = stride_h;
        self.stride_w = stride_w;
        self
    }

    pub fn with_dilation(mut self, dilate_h: usize, dilate_w: usize) -> Self {
        self.dilate_h = dilate_h;
        self.dilate_w = dilate_w;
        self
    }
}
