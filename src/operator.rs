//! Operator entry points: selection, workspace query and checked execution.

use crate::algo::{
    ConvBackwardDataAlgo, ConvBackwardDataAlgoPack, ConvBiasAlgo, ConvBiasAlgoPack,
};
use crate::config::{DispatchConfig, OperatorPolicy};
use crate::device::DeviceCaps;
use crate::error::{ConvError, ConvResult};
use crate::kernels::{ConvBiasStream, DeconvStream};
use crate::layout::TensorLayout;
use crate::problem::{
    ConvBackwardDataExecArgs, ConvBackwardDataSizeArgs, ConvBackwardDataTensors, ConvBiasExecArgs,
    ConvBiasSizeArgs, ConvBiasTensors,
};

fn check_tensor(role: &'static str, provided: usize, layout: &TensorLayout) -> ConvResult<()> {
    let required = layout.span().dist_elem();
    if provided < required {
        return Err(ConvError::TensorTooSmall {
            role,
            required,
            provided,
        });
    }
    Ok(())
}

fn check_workspace(required: usize, provided: usize) -> ConvResult<()> {
    if provided < required {
        return Err(ConvError::WorkspaceTooSmall { required, provided });
    }
    Ok(())
}

/// Fused convolution + bias (+ residual) + nonlinearity.
#[derive(Debug)]
pub struct ConvBiasForward {
    algos: ConvBiasAlgoPack,
    caps: DeviceCaps,
    policy: OperatorPolicy,
}

impl ConvBiasForward {
    pub fn new(caps: DeviceCaps, config: &DispatchConfig) -> Self {
        Self::with_algos(ConvBiasAlgoPack::for_device(&caps), caps, config.conv_bias.clone())
    }

    pub fn with_algos(algos: ConvBiasAlgoPack, caps: DeviceCaps, policy: OperatorPolicy) -> Self {
        Self {
            algos,
            caps,
            policy,
        }
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn algos(&self) -> &ConvBiasAlgoPack {
        &self.algos
    }

    pub fn get_algorithm(&self, args: &ConvBiasSizeArgs) -> ConvResult<&dyn ConvBiasAlgo> {
        self.algos.select(args, &self.caps, &self.policy)
    }

    /// Names of every registered variant, in priority order.
    pub fn get_all_algorithms(&self) -> Vec<&str> {
        self.algos.iter().map(|a| a.name()).collect()
    }

    pub fn usable_algorithms(&self, args: &ConvBiasSizeArgs) -> Vec<&str> {
        self.algos
            .usable_algos(args, &self.caps)
            .into_iter()
            .map(|a| a.name())
            .collect()
    }

    pub fn get_workspace_in_bytes(&self, args: &ConvBiasSizeArgs) -> ConvResult<usize> {
        Ok(self.get_algorithm(args)?.workspace_bytes(args))
    }

    pub fn exec(
        &self,
        args: &ConvBiasSizeArgs,
        tensors: ConvBiasTensors<'_>,
        workspace: &mut [u8],
        stream: &mut dyn ConvBiasStream,
    ) -> ConvResult<()> {
        let algo = self.get_algorithm(args)?;
        check_workspace(algo.workspace_bytes(args), workspace.len())?;
        check_tensor("src", tensors.src.len(), &args.src)?;
        check_tensor("filter", tensors.filter.len(), &args.filter)?;
        check_tensor("bias", tensors.bias.len(), &args.bias)?;
        check_tensor("dst", tensors.dst.len(), &args.dst)?;
        if args.has_z() {
            check_tensor("z", tensors.z.map_or(0, <[i8]>::len), &args.z)?;
        }
        log::debug!("ConvBiasForward: exec {} on {}", algo.name(), args);
        algo.execute(
            ConvBiasExecArgs {
                size: args,
                tensors,
                workspace,
            },
            stream,
        )
    }
}

/// Gradient of a convolution with respect to its input.
#[derive(Debug)]
pub struct ConvolutionBackwardData {
    algos: ConvBackwardDataAlgoPack,
    caps: DeviceCaps,
    policy: OperatorPolicy,
}

impl ConvolutionBackwardData {
    pub fn new(caps: DeviceCaps, config: &DispatchConfig) -> Self {
        Self::with_algos(
            ConvBackwardDataAlgoPack::for_device(&caps),
            caps,
            config.conv_backward_data.clone(),
        )
    }

    pub fn with_algos(
        algos: ConvBackwardDataAlgoPack,
        caps: DeviceCaps,
        policy: OperatorPolicy,
    ) -> Self {
        Self {
            algos,
            caps,
            policy,
        }
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn algos(&self) -> &ConvBackwardDataAlgoPack {
        &self.algos
    }

    pub fn get_algorithm(
        &self,
        args: &ConvBackwardDataSizeArgs,
    ) -> ConvResult<&dyn ConvBackwardDataAlgo> {
        self.algos.select(args, &self.caps, &self.policy)
    }

    pub fn get_all_algorithms(&self) -> Vec<&str> {
        self.algos.iter().map(|a| a.name()).collect()
    }

    pub fn usable_algorithms(&self, args: &ConvBackwardDataSizeArgs) -> Vec<&str> {
        self.algos
            .usable_algos(args, &self.caps)
            .into_iter()
            .map(|a| a.name())
            .collect()
    }

    pub fn get_workspace_in_bytes(&self, args: &ConvBackwardDataSizeArgs) -> ConvResult<usize> {
        Ok(self.get_algorithm(args)?.workspace_bytes(args))
    }

    pub fn exec(
        &self,
        args: &ConvBackwardDataSizeArgs,
        tensors: ConvBackwardDataTensors<'_>,
        workspace: &mut [u8],
        stream: &mut dyn DeconvStream,
    ) -> ConvResult<()> {
        let algo = self.get_algorithm(args)?;
        check_workspace(algo.workspace_bytes(args), workspace.len())?;
        check_tensor("filter", tensors.filter.len(), &args.filter)?;
        check_tensor("diff", tensors.diff.len(), &args.diff)?;
        check_tensor("grad", tensors.grad.len(), &args.grad)?;
        log::debug!("ConvolutionBackwardData: exec {} on {}", algo.name(), args);
        algo.execute(
            ConvBackwardDataExecArgs {
                size: args,
                tensors,
                workspace,
            },
            stream,
        )
    }
}
