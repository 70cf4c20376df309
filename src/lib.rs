//! qconv-kernels: quantized convolution algorithm dispatch.
//!
//! This crate selects and runs hardware-specific int8 convolution variants:
//! - **Uniform variant contract**: `usable`, `workspace_bytes`, `execute`
//! - **Tensor-core implicit GEMM**: NCHW32 int8 conv + bias with fused
//!   requantization, one variant per threadblock/warp tile
//! - **Dot-product backward data**: quint8 direct deconvolution for stride 1 and 2
//! - **Runtime registration**: variants are registered from a [`DeviceCaps`]
//!   snapshot instead of compile-time guards
//!
//! Compute primitives sit behind the [`ConvBiasStream`] and [`DeconvStream`]
//! traits; [`HostStream`] runs them on the CPU.
//!
//! # Quick Start
//!
//! ```ignore
//! use qconv_kernels::{ConvBiasForward, DeviceCaps, DispatchConfig, HostStream};
//!
//! let opr = ConvBiasForward::new(DeviceCaps::cuda(7, 5, 65536), &DispatchConfig::from_env()?);
//! let mut workspace = vec![0u8; opr.get_workspace_in_bytes(&args)?];
//! opr.exec(&args, tensors, &mut workspace, &mut HostStream::new())?;
//! ```

pub mod algo;
pub mod config;
pub mod device;
pub mod dtype;
pub mod error;
pub mod kernels;
pub mod layout;
pub mod operator;
pub mod param;
pub mod problem;
pub mod requant;
pub mod workspace;

pub use algo::{
    AlgoInt8Nchw32ImmaImplicitGemm, AlgoParam, AlgoSelector, AlgoUdot8DirectStride1,
    AlgoUdot8DirectStride2, Algorithm, ConvBackwardDataAlgo, ConvBackwardDataAlgoPack,
    ConvBiasAlgo, ConvBiasAlgoPack,
};
pub use config::{DispatchConfig, OperatorPolicy};
pub use device::{DeviceCaps, DeviceKind, FeatureFlags};
pub use dtype::{DType, DTypeEnum};
pub use error::{ConvError, ConvResult};
pub use kernels::{ConvBiasStream, DeconvStream, HostStream};
pub use layout::{TensorLayout, TensorSpan};
pub use operator::{ConvBiasForward, ConvolutionBackwardData};
pub use param::{ConvParam, Format, Mode, NonlineMode, Sparse};
pub use problem::{
    ConvBackwardDataExecArgs, ConvBackwardDataSizeArgs, ConvBackwardDataTensors, ConvBiasExecArgs,
    ConvBiasSizeArgs, ConvBiasTensors, ConvShape, ProblemDesc,
};
pub use requant::RequantCoeffs;
pub use workspace::{WorkspaceBundle, WorkspaceRegion};
