//! Problem descriptors handed to algorithm variants.
//!
//! A descriptor is validated once at construction: layouts must agree with
//! the format, channel counts must match between roles, and the output
//! spatial size must equal the one deduced from input size and geometry.
//! Variants only read it.

use std::fmt;

use crate::error::{ConvError, ConvResult};
use crate::layout::TensorLayout;
use crate::param::{ConvParam, Format, Sparse};

/// Canonized convolution geometry.
///
/// For backward data, `hi/wi` describe the gradient (the forward input) and
/// `ho/wo` the incoming diff (the forward output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConvShape {
    pub n: usize,
    pub ci: usize,
    pub co: usize,
    pub hi: usize,
    pub wi: usize,
    pub ho: usize,
    pub wo: usize,
    pub fh: usize,
    pub fw: usize,
    pub ph: usize,
    pub pw: usize,
    pub sh: usize,
    pub sw: usize,
    pub dh: usize,
    pub dw: usize,
    pub groups: usize,
}

impl ConvShape {
    pub fn is_1x1(&self) -> bool {
        self.fh == 1 && self.fw == 1
    }
}

impl fmt::Display for ConvShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} ci={} co={} in={}x{} out={}x{} k={}x{} pad={}x{} stride={}x{} dilate={}x{} g={}",
            self.n,
            self.ci,
            self.co,
            self.hi,
            self.wi,
            self.ho,
            self.wo,
            self.fh,
            self.fw,
            self.ph,
            self.pw,
            self.sh,
            self.sw,
            self.dh,
            self.dw,
            self.groups
        )
    }
}

/// Output extent of one spatial axis, `None` when the window does not fit.
pub fn conv_output_size(
    input: usize,
    filter: usize,
    pad: usize,
    stride: usize,
    dilation: usize,
) -> Option<usize> {
    if stride == 0 || dilation == 0 || filter == 0 {
        return None;
    }
    let effective = (filter - 1) * dilation + 1;
    let padded = input + 2 * pad;
    if padded < effective {
        return None;
    }
    Some((padded - effective) / stride + 1)
}

/// Whether `bias` broadcasts along the channel axis only.
pub fn check_bias_share_in_channel(bias: &TensorLayout, format: Format) -> bool {
    match format {
        Format::Nchw => {
            bias.ndim() == 4 && bias[0] == 1 && bias[2] == 1 && bias[3] == 1
        }
        Format::Nchw4 | Format::Nchw32 => {
            bias.ndim() == 5
                && bias[0] == 1
                && bias[2] == 1
                && bias[3] == 1
                && bias[4] == format.pack_size()
        }
    }
}

fn invalid(msg: String) -> ConvError {
    ConvError::InvalidLayout(msg)
}

/// Canonize `(src, filter, dst)` into a [`ConvShape`], where `src` has the
/// forward-input role and `dst` the forward-output role.
fn canonize(
    src: &TensorLayout,
    filter: &TensorLayout,
    dst: &TensorLayout,
    param: &ConvParam,
) -> ConvResult<ConvShape> {
    let pack = param.format.pack_size();
    let act_ndim = if pack > 1 { 5 } else { 4 };
    let group_axis = usize::from(param.sparse == Sparse::Group);
    let filter_ndim = act_ndim + group_axis;

    if src.ndim() != act_ndim || dst.ndim() != act_ndim {
        return Err(invalid(format!(
            "{:?} expects {}-d activations, got src {} and dst {}",
            param.format, act_ndim, src, dst
        )));
    }
    if filter.ndim() != filter_ndim {
        return Err(invalid(format!(
            "{:?}/{:?} expects {}-d filter, got {}",
            param.format, param.sparse, filter_ndim, filter
        )));
    }
    if pack > 1 && (src[4] != pack || dst[4] != pack || filter[filter_ndim - 1] != pack) {
        return Err(invalid(format!(
            "innermost axis must be {pack} for {:?}",
            param.format
        )));
    }

    if src[2] == 0 || src[3] == 0 {
        return Err(invalid(format!("empty spatial extent in {}", src)));
    }

    let n = src[0];
    let ci = src[1] * pack;
    let (groups, ocpg, icpg) = match param.sparse {
        Sparse::Dense => (1, filter[0], filter[1] * pack),
        Sparse::Group => (filter[0], filter[1], filter[2] * pack),
    };
    let (fh, fw) = (filter[2 + group_axis], filter[3 + group_axis]);
    let co = groups * ocpg;

    if groups == 0 || icpg * groups != ci {
        return Err(invalid(format!(
            "filter {} does not match {} input channels",
            filter, ci
        )));
    }
    if co % pack != 0 {
        return Err(invalid(format!(
            "{co} output channels not divisible by pack size {pack}"
        )));
    }

    let ho = conv_output_size(src[2], fh, param.pad_h, param.stride_h, param.dilate_h);
    let wo = conv_output_size(src[3], fw, param.pad_w, param.stride_w, param.dilate_w);
    let (ho, wo) = match (ho, wo) {
        (Some(ho), Some(wo)) => (ho, wo),
        _ => {
            return Err(invalid(format!(
                "window {fh}x{fw} does not fit input {}x{} with {:?}",
                src[2], src[3], param
            )))
        }
    };
    if dst[0] != n || dst[1] * pack != co || dst[2] != ho || dst[3] != wo {
        return Err(invalid(format!(
            "dst {} does not match deduced (n={n}, co={co}, {ho}x{wo})",
            dst
        )));
    }

    Ok(ConvShape {
        n,
        ci,
        co,
        hi: src[2],
        wi: src[3],
        ho,
        wo,
        fh,
        fw,
        ph: param.pad_h,
        pw: param.pad_w,
        sh: param.stride_h,
        sw: param.stride_w,
        dh: param.dilate_h,
        dw: param.dilate_w,
        groups,
    })
}

/// Shared behaviour of descriptors that can be keyed and reported.
pub trait ProblemDesc {
    const OPERATOR: &'static str;

    /// Stable key covering every field gating logic may look at. Scales
    /// never affect gating and are excluded.
    fn fingerprint(&self) -> String;
}

/// Descriptor of a fused conv + bias (+ residual) + nonlinearity forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvBiasSizeArgs {
    pub src: TensorLayout,
    pub filter: TensorLayout,
    /// Empty when absent.
    pub bias: TensorLayout,
    /// Residual added before the nonlinearity; empty when absent.
    pub z: TensorLayout,
    pub dst: TensorLayout,
    pub param: ConvParam,
    shape: ConvShape,
}

impl ConvBiasSizeArgs {
    pub fn new(
        src: TensorLayout,
        filter: TensorLayout,
        bias: TensorLayout,
        z: TensorLayout,
        dst: TensorLayout,
        param: ConvParam,
    ) -> ConvResult<Self> {
        let shape = canonize(&src, &filter, &dst, &param)?;
        if !z.is_empty() && !z.eq_shape(&dst) {
            return Err(invalid(format!("z {} must match dst {}", z, dst)));
        }
        if !bias.is_empty() {
            let pack = param.format.pack_size();
            let act_ndim = if pack > 1 { 5 } else { 4 };
            if bias.ndim() != act_ndim
                || bias[1] * pack != shape.co
                || (pack > 1 && bias[4] != pack)
            {
                return Err(invalid(format!(
                    "bias {} does not cover {} output channels",
                    bias, shape.co
                )));
            }
        }
        Ok(Self {
            src,
            filter,
            bias,
            z,
            dst,
            param,
            shape,
        })
    }

    pub fn shape(&self) -> &ConvShape {
        &self.shape
    }

    pub fn has_bias(&self) -> bool {
        !self.bias.is_empty()
    }

    pub fn has_z(&self) -> bool {
        !self.z.is_empty()
    }
}

impl ProblemDesc for ConvBiasSizeArgs {
    const OPERATOR: &'static str = "ConvBiasForward";

    fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{:?}",
            self.src.shape_key(),
            self.filter.shape_key(),
            self.bias.shape_key(),
            self.z.shape_key(),
            self.dst.shape_key(),
            self.param
        )
    }
}

impl fmt::Display for ConvBiasSizeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:?} {:?} {:?}] src={} filter={} bias={} dst={}",
            self.shape,
            self.param.format,
            self.param.sparse,
            self.param.mode,
            self.src.dtype,
            self.filter.dtype,
            self.bias.dtype,
            self.dst.dtype
        )
    }
}

/// Descriptor of a convolution backward-data pass: `grad = conv^T(diff, filter)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvBackwardDataSizeArgs {
    pub filter: TensorLayout,
    pub diff: TensorLayout,
    pub grad: TensorLayout,
    pub param: ConvParam,
    shape: ConvShape,
}

impl ConvBackwardDataSizeArgs {
    pub fn new(
        filter: TensorLayout,
        diff: TensorLayout,
        grad: TensorLayout,
        param: ConvParam,
    ) -> ConvResult<Self> {
        let shape = canonize(&grad, &filter, &diff, &param)?;
        Ok(Self {
            filter,
            diff,
            grad,
            param,
            shape,
        })
    }

    pub fn shape(&self) -> &ConvShape {
        &self.shape
    }
}

impl ProblemDesc for ConvBackwardDataSizeArgs {
    const OPERATOR: &'static str = "ConvolutionBackwardData";

    fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{:?}",
            self.filter.shape_key(),
            self.diff.shape_key(),
            self.grad.shape_key(),
            self.param
        )
    }
}

impl fmt::Display for ConvBackwardDataSizeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:?} {:?} {:?}] filter={} diff={} grad={}",
            self.shape,
            self.param.format,
            self.param.sparse,
            self.param.mode,
            self.filter.dtype,
            self.diff.dtype,
            self.grad.dtype
        )
    }
}

/// Data of a conv-bias invocation, laid out as the descriptor says.
#[derive(Debug)]
pub struct ConvBiasTensors<'a> {
    pub src: &'a [i8],
    pub filter: &'a [i8],
    pub bias: &'a [i32],
    pub z: Option<&'a [i8]>,
    pub dst: &'a mut [i8],
}

#[derive(Debug)]
pub struct ConvBiasExecArgs<'a> {
    pub size: &'a ConvBiasSizeArgs,
    pub tensors: ConvBiasTensors<'a>,
    pub workspace: &'a mut [u8],
}

/// Data of a backward-data invocation.
#[derive(Debug)]
pub struct ConvBackwardDataTensors<'a> {
    pub filter: &'a [u8],
    pub diff: &'a [u8],
    pub grad: &'a mut [i32],
}

#[derive(Debug)]
pub struct ConvBackwardDataExecArgs<'a> {
    pub size: &'a ConvBackwardDataSizeArgs,
    pub tensors: ConvBackwardDataTensors<'a>,
    pub workspace: &'a mut [u8],
}
