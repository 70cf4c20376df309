//! Int8 NCHW32 conv-bias on tensor cores via implicit GEMM.

use std::fmt;

use crate::algo::{Algorithm, ConvBiasAlgo};
use crate::device::{DeviceCaps, MIN_CONST_MEM_BYTES};
use crate::dtype::{DType, DTypeEnum};
use crate::error::ConvResult;
use crate::kernels::{ConvBiasStream, ConvKernParam, GemmCoord, ImmaConvLaunch};
use crate::layout::TensorLayout;
use crate::param::{Format, Mode, Sparse};
use crate::problem::{check_bias_share_in_channel, ConvBiasExecArgs, ConvBiasSizeArgs};
use crate::requant::RequantCoeffs;
use crate::workspace::WorkspaceBundle;

pub const FILTER_REGION: &str = "filter";
pub const REDUCE_OFFSETS_REGION: &str = "reduce_offsets";

/// Threadblock and warp tile of the MMA primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlgoParam {
    pub threadblock_m: u32,
    pub threadblock_n: u32,
    pub threadblock_k: u32,
    pub warp_m: u32,
    pub warp_n: u32,
    pub warp_k: u32,
}

impl AlgoParam {
    pub const fn new(tb: (u32, u32, u32), warp: (u32, u32, u32)) -> Self {
        Self {
            threadblock_m: tb.0,
            threadblock_n: tb.1,
            threadblock_k: tb.2,
            warp_m: warp.0,
            warp_n: warp.1,
            warp_k: warp.2,
        }
    }

    pub const fn threadblock(&self) -> GemmCoord {
        GemmCoord::new(self.threadblock_m, self.threadblock_n, self.threadblock_k)
    }

    pub const fn warp(&self) -> GemmCoord {
        GemmCoord::new(self.warp_m, self.warp_n, self.warp_k)
    }
}

/// Renders as `{tbm}X{tbn}X{tbk}_{wm}X{wn}X{wk}`.
impl fmt::Display for AlgoParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.threadblock(), self.warp())
    }
}

/// Tiles registered in priority order.
pub const TILE_CONFIGS: [AlgoParam; 7] = [
    AlgoParam::new((128, 256, 64), (64, 64, 64)),
    AlgoParam::new((256, 128, 64), (64, 64, 64)),
    AlgoParam::new((128, 128, 64), (64, 64, 64)),
    AlgoParam::new((64, 128, 64), (32, 64, 64)),
    AlgoParam::new((128, 64, 64), (64, 32, 64)),
    AlgoParam::new((64, 64, 64), (32, 32, 64)),
    AlgoParam::new((32, 64, 64), (32, 16, 64)),
];

#[derive(Debug, Clone)]
pub struct AlgoInt8Nchw32ImmaImplicitGemm {
    param: AlgoParam,
    name: String,
}

impl AlgoInt8Nchw32ImmaImplicitGemm {
    pub fn new(param: AlgoParam) -> Self {
        Self {
            param,
            name: format!("INT8_NCHW32_IMMA_IMPLICIT_GEMM_{param}"),
        }
    }

    pub fn param(&self) -> AlgoParam {
        self.param
    }
}

fn is(dtype: DType, expected: DTypeEnum) -> bool {
    dtype.enumv() == expected
}

impl Algorithm for AlgoInt8Nchw32ImmaImplicitGemm {
    type Args = ConvBiasSizeArgs;

    fn name(&self) -> &str {
        &self.name
    }

    fn usable(&self, args: &ConvBiasSizeArgs, caps: &DeviceCaps) -> bool {
        let param = &args.param;
        if !args.has_bias() || !check_bias_share_in_channel(&args.bias, param.format) {
            return false;
        }
        if param.format != Format::Nchw32 {
            return false;
        }
        let shape = args.shape();
        let mut available = param.sparse == Sparse::Dense;
        available &= param.mode == Mode::CrossCorrelation;
        available &= is(args.src.dtype, DTypeEnum::QuantizedS8)
            && is(args.filter.dtype, DTypeEnum::QuantizedS8)
            && is(args.bias.dtype, DTypeEnum::QuantizedS32)
            && is(args.dst.dtype, DTypeEnum::QuantizedS8);
        available &= !args.has_z() || is(args.z.dtype, DTypeEnum::QuantizedS8);
        available &= shape.dh == 1 && shape.dw == 1;
        available &= caps.is_compute_capability_required(7, 5);
        if shape.is_1x1() {
            return available;
        }
        // Offsets of non-1x1 kernels are staged in constant memory.
        available &= caps.total_const_mem >= MIN_CONST_MEM_BYTES;
        let const_mem_usage = self.workspace_bytes(args) - args.filter.span().dist_byte();
        available && const_mem_usage <= caps.total_const_mem
    }

    fn workspace_bundle(&self, args: &ConvBiasSizeArgs) -> WorkspaceBundle {
        let shape = args.shape();
        let ws_filter = args.filter.span().dist_byte();
        if shape.is_1x1() {
            return WorkspaceBundle::new(&[(FILTER_REGION, ws_filter)]);
        }
        let ws_offsets = (shape.ci / 32) * shape.fh * shape.fw * std::mem::size_of::<i32>() * 2;
        WorkspaceBundle::new(&[(FILTER_REGION, ws_filter), (REDUCE_OFFSETS_REGION, ws_offsets)])
    }
}

impl ConvBiasAlgo for AlgoInt8Nchw32ImmaImplicitGemm {
    fn execute(&self, args: ConvBiasExecArgs<'_>, stream: &mut dyn ConvBiasStream) -> ConvResult<()> {
        let ConvBiasExecArgs {
            size,
            tensors,
            workspace,
        } = args;
        let shape = size.shape();
        let (co, ci, fh, fw) = (shape.co, shape.ci, shape.fh, shape.fw);

        let bundle = self.workspace_bundle(size);
        let mut regions = bundle.split_mut(workspace)?.into_iter();
        let ws_filter: &mut [i8] = bytemuck::cast_slice_mut(regions.next().unwrap_or_default());
        let reduce_offsets = regions.next();

        // nchw32 -> chwn32
        let filter_src = TensorLayout::new(&[co, ci / 32, fh, fw, 32], DType::Int8);
        let filter_dst = TensorLayout::with_stride(
            &[co, ci / 32, fh, fw, 32],
            &[32, (co * fh * fw * 32) as isize, (co * fw * 32) as isize, (co * 32) as isize, 1],
            DType::Int8,
        );
        stream.relayout_i8(tensors.filter, &filter_src, ws_filter, &filter_dst)?;

        let coeffs =
            RequantCoeffs::from_layouts(&size.src, &size.filter, &size.bias, &size.z, &size.dst)?;
        log::trace!(
            "{}: alpha={} beta={} gamma={} on {}",
            self.name,
            coeffs.alpha,
            coeffs.beta,
            coeffs.gamma,
            shape
        );
        stream.conv_bias_int8_imma_ncdiv32hw32(ImmaConvLaunch {
            src: tensors.src,
            filter: ws_filter,
            bias: tensors.bias,
            z: if size.has_z() { tensors.z } else { None },
            dst: tensors.dst,
            reduce_offsets,
            param: ConvKernParam::from(shape),
            nonlinear_mode: size.param.nonline_mode.as_u32(),
            coeffs,
            threadblock: self.param.threadblock(),
            warp: self.param.warp(),
        })
    }
}
