//! Quint8 backward-data by direct convolution with unsigned dot products.
//!
//! Backward data is computed as a stride-1 cross-correlation of a staged
//! diff with the flipped, channel-transposed filter. The staged diff pads
//! every side by `k - 1 - pad` and, for stride 2, interleaves one row and
//! column between diff samples. Staging bytes hold the diff zero point so
//! they contribute nothing after zero-point correction.

use crate::algo::{Algorithm, ConvBackwardDataAlgo};
use crate::device::{DeviceCaps, FeatureFlags};
use crate::dtype::DTypeEnum;
use crate::error::ConvResult;
use crate::kernels::{DeconvStream, DotConvLaunch, DotConvParam};
use crate::param::{Format, Mode, Sparse};
use crate::problem::{ConvBackwardDataExecArgs, ConvBackwardDataSizeArgs, ConvBackwardDataTensors};
use crate::workspace::WorkspaceBundle;

pub const FILTER_FLIPPED_REGION: &str = "filter_flipped";
pub const DIFF_PADDED_REGION: &str = "diff_padded";

const SUPPORTED_KERNELS: [usize; 4] = [2, 3, 5, 7];

fn can_quint8_dot(args: &ConvBackwardDataSizeArgs, caps: &DeviceCaps, stride: usize) -> bool {
    let param = &args.param;
    let s = args.shape();
    let mut available = param.format == Format::Nchw
        && param.sparse == Sparse::Dense
        && param.mode == Mode::CrossCorrelation;
    available &= args.filter.dtype.enumv() == DTypeEnum::Quantized8Asymm
        && args.diff.dtype.enumv() == DTypeEnum::Quantized8Asymm
        && args.grad.dtype.enumv() == DTypeEnum::QuantizedS32;
    available &= s.dh == 1 && s.dw == 1;
    available &= s.sh == stride && s.sw == stride;
    available &= s.fh == s.fw && SUPPORTED_KERNELS.contains(&s.fh);
    available &= s.fh > s.ph && s.fw > s.pw;
    // Each tap contributes at most 255 * 255 in magnitude.
    available &= (s.co * s.fh * s.fw)
        .checked_mul(255 * 255)
        .is_some_and(|worst| worst <= i32::MAX as usize);
    available && caps.has(FeatureFlags::DOTPROD)
}

/// Staged diff extent: the gradient extent grown by `k - 1`.
fn staged_extent(args: &ConvBackwardDataSizeArgs) -> (usize, usize) {
    let s = args.shape();
    (s.hi + s.fh - 1, s.wi + s.fw - 1)
}

fn quint8_dot_bundle(args: &ConvBackwardDataSizeArgs) -> WorkspaceBundle {
    let s = args.shape();
    let (h2, w2) = staged_extent(args);
    WorkspaceBundle::new(&[
        (FILTER_FLIPPED_REGION, s.ci * s.co * s.fh * s.fw),
        (DIFF_PADDED_REGION, s.co * h2 * w2),
    ])
}

fn quint8_dot_execute(
    name: &str,
    args: ConvBackwardDataExecArgs<'_>,
    stream: &mut dyn DeconvStream,
) -> ConvResult<()> {
    let ConvBackwardDataExecArgs {
        size,
        tensors,
        workspace,
    } = args;
    let ConvBackwardDataTensors { filter, diff, grad } = tensors;
    let s = size.shape();
    let (oc, ic, fh, fw) = (s.co, s.ci, s.fh, s.fw);
    let (h2, w2) = staged_extent(size);
    let zd = size.diff.dtype.zero_point().unwrap_or(0);
    let zf = size.filter.dtype.zero_point().unwrap_or(0);

    let bundle = quint8_dot_bundle(size);
    let mut regions = bundle.split_mut(workspace)?.into_iter();
    let filter_flipped = regions.next().unwrap_or_default();
    let diff_padded = regions.next().unwrap_or_default();

    // (oc, ic, fh, fw) -> (ic, oc, fh, fw), spatially reversed
    for c in 0..ic {
        for o in 0..oc {
            for i in 0..fh {
                let src_row = ((o * ic + c) * fh + (fh - 1 - i)) * fw;
                let dst_row = ((c * oc + o) * fh + i) * fw;
                for j in 0..fw {
                    filter_flipped[dst_row + j] = filter[src_row + fw - 1 - j];
                }
            }
        }
    }

    let (top, left) = (fh - 1 - s.ph, fw - 1 - s.pw);
    let diff_batch = oc * s.ho * s.wo;
    let grad_batch = ic * s.hi * s.wi;
    let param = DotConvParam {
        oc: oc as u32,
        ic: ic as u32,
        h2: h2 as u32,
        w2: w2 as u32,
        oh: s.hi as u32,
        ow: s.wi as u32,
        fh: fh as u32,
        fw: fw as u32,
    };
    log::trace!("{}: staged diff {}x{} for {}", name, h2, w2, s);

    for b in 0..s.n {
        diff_padded.fill(zd);
        let diff = &diff[b * diff_batch..(b + 1) * diff_batch];
        for o in 0..oc {
            for y in 0..s.ho {
                let row = &mut diff_padded[(o * h2 + top + y * s.sh) * w2..][..w2];
                let src = &diff[(o * s.ho + y) * s.wo..][..s.wo];
                for (x, &v) in src.iter().enumerate() {
                    row[left + x * s.sw] = v;
                }
            }
        }
        stream.conv_direct_quint8_dot(DotConvLaunch {
            diff: diff_padded,
            filter: filter_flipped,
            grad: &mut grad[b * grad_batch..(b + 1) * grad_batch],
            diff_zero_point: zd,
            filter_zero_point: zf,
            param,
        })?;
    }
    Ok(())
}

/// Direct dot-product backward data for stride 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlgoUdot8DirectStride1;

impl Algorithm for AlgoUdot8DirectStride1 {
    type Args = ConvBackwardDataSizeArgs;

    fn name(&self) -> &str {
        "ARM_COMMON_QUINT8_DIRECT_DOT_STRD1"
    }

    fn usable(&self, args: &ConvBackwardDataSizeArgs, caps: &DeviceCaps) -> bool {
        can_quint8_dot(args, caps, 1)
    }

    fn workspace_bundle(&self, args: &ConvBackwardDataSizeArgs) -> WorkspaceBundle {
        quint8_dot_bundle(args)
    }
}

impl ConvBackwardDataAlgo for AlgoUdot8DirectStride1 {
    fn execute(
        &self,
        args: ConvBackwardDataExecArgs<'_>,
        stream: &mut dyn DeconvStream,
    ) -> ConvResult<()> {
        quint8_dot_execute(self.name(), args, stream)
    }
}

/// Direct dot-product backward data for stride 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlgoUdot8DirectStride2;

impl Algorithm for AlgoUdot8DirectStride2 {
    type Args = ConvBackwardDataSizeArgs;

    fn name(&self) -> &str {
        "ARM_COMMON_QUINT8_DIRECT_DOT_STRD2"
    }

    fn usable(&self, args: &ConvBackwardDataSizeArgs, caps: &DeviceCaps) -> bool {
        can_quint8_dot(args, caps, 2)
    }

    fn workspace_bundle(&self, args: &ConvBackwardDataSizeArgs) -> WorkspaceBundle {
        quint8_dot_bundle(args)
    }
}

impl ConvBackwardDataAlgo for AlgoUdot8DirectStride2 {
    fn execute(
        &self,
        args: ConvBackwardDataExecArgs<'_>,
        stream: &mut dyn DeconvStream,
    ) -> ConvResult<()> {
        quint8_dot_execute(self.name(), args, stream)
    }
}
