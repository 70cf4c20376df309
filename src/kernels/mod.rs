//! Compute-primitive interface.
//!
//! Algorithm variants never run arithmetic themselves; they enqueue work on
//! a caller-supplied stream through the traits below. Calls made on one
//! stream execute in program order, so a relayout issued before a launch is
//! complete by the time the launch reads its output. Device faults are
//! reported by [`ConvBiasStream::synchronize`] / [`DeconvStream::synchronize`],
//! not by the enqueueing call.
//!
//! [`host::HostStream`] implements every primitive on host memory and serves
//! as the golden model for tests.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::error::ConvResult;
use crate::layout::TensorLayout;
use crate::problem::ConvShape;
use crate::requant::RequantCoeffs;

pub mod host;

pub use host::HostStream;

/// `(m, n, k)` extent of a GEMM tile.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct GemmCoord {
    pub m: u32,
    pub n: u32,
    pub k: u32,
}

impl GemmCoord {
    pub const fn new(m: u32, n: u32, k: u32) -> Self {
        Self { m, n, k }
    }
}

impl fmt::Display for GemmCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}X{}X{}", self.m, self.n, self.k)
    }
}

/// Flattened geometry record passed to convolution primitives.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct ConvKernParam {
    pub n: u32,
    pub co: u32,
    pub ci: u32,
    pub hi: u32,
    pub wi: u32,
    pub ho: u32,
    pub wo: u32,
    pub ph: u32,
    pub pw: u32,
    pub sh: u32,
    pub sw: u32,
    pub fh: u32,
    pub fw: u32,
}

impl From<&ConvShape> for ConvKernParam {
    fn from(s: &ConvShape) -> Self {
        Self {
            n: s.n as u32,
            co: s.co as u32,
            ci: s.ci as u32,
            hi: s.hi as u32,
            wi: s.wi as u32,
            ho: s.ho as u32,
            wo: s.wo as u32,
            ph: s.ph as u32,
            pw: s.pw as u32,
            sh: s.sh as u32,
            sw: s.sw as u32,
            fh: s.fh as u32,
            fw: s.fw as u32,
        }
    }
}

/// Arguments of the int8 NCHW32 tensor-core implicit-GEMM conv-bias primitive.
///
/// `filter` must already be in CHWN32 order. `reduce_offsets` is present iff
/// the kernel is larger than 1x1 and holds `(ci/32) * fh * fw` pairs of
/// `i32` offsets that the primitive fills and consumes.
#[derive(Debug)]
pub struct ImmaConvLaunch<'a> {
    pub src: &'a [i8],
    pub filter: &'a [i8],
    pub bias: &'a [i32],
    pub z: Option<&'a [i8]>,
    pub dst: &'a mut [i8],
    pub reduce_offsets: Option<&'a mut [u8]>,
    pub param: ConvKernParam,
    pub nonlinear_mode: u32,
    pub coeffs: RequantCoeffs,
    pub threadblock: GemmCoord,
    pub warp: GemmCoord,
}

/// Stream accepting conv-bias work.
pub trait ConvBiasStream {
    /// Strided copy between two layouts of identical shape.
    fn relayout_i8(
        &mut self,
        src: &[i8],
        src_layout: &TensorLayout,
        dst: &mut [i8],
        dst_layout: &TensorLayout,
    ) -> ConvResult<()>;

    fn conv_bias_int8_imma_ncdiv32hw32(&mut self, launch: ImmaConvLaunch<'_>) -> ConvResult<()>;

    /// Wait for enqueued work and surface asynchronous faults.
    fn synchronize(&mut self) -> ConvResult<()>;
}

/// Geometry of a direct stride-1 dot-product convolution over staged buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DotConvParam {
    /// Reduction channels (the diff channels).
    pub oc: u32,
    /// Produced channels (the gradient channels).
    pub ic: u32,
    /// Staged (padded, interleaved) diff extent.
    pub h2: u32,
    pub w2: u32,
    /// Produced gradient extent.
    pub oh: u32,
    pub ow: u32,
    pub fh: u32,
    pub fw: u32,
}

/// Arguments of the quint8 dot-product direct convolution primitive for one
/// batch item: `grad[c][y][x] = sum (diff[o][y+i][x+j] - zd) * (filter[c][o][i][j] - zf)`.
#[derive(Debug)]
pub struct DotConvLaunch<'a> {
    /// `oc * h2 * w2` staged diff.
    pub diff: &'a [u8],
    /// `ic * oc * fh * fw` staged filter.
    pub filter: &'a [u8],
    /// `ic * oh * ow` output.
    pub grad: &'a mut [i32],
    pub diff_zero_point: u8,
    pub filter_zero_point: u8,
    pub param: DotConvParam,
}

/// Stream accepting backward-data work.
pub trait DeconvStream {
    fn conv_direct_quint8_dot(&mut self, launch: DotConvLaunch<'_>) -> ConvResult<()>;

    fn synchronize(&mut self) -> ConvResult<()>;
}
