//! Per-operator variant registration.
//!
//! Registration only decides which variants a device could ever run;
//! `usable` still makes the per-problem decision.

use crate::algo::imma_nchw32::{AlgoInt8Nchw32ImmaImplicitGemm, TILE_CONFIGS};
use crate::algo::udot8_deconv::{AlgoUdot8DirectStride1, AlgoUdot8DirectStride2};
use crate::algo::{AlgoSelector, ConvBackwardDataAlgo, ConvBiasAlgo};
use crate::device::{DeviceCaps, DeviceKind, FeatureFlags};

pub type ConvBiasAlgoPack = AlgoSelector<dyn ConvBiasAlgo>;
pub type ConvBackwardDataAlgoPack = AlgoSelector<dyn ConvBackwardDataAlgo>;

fn register_imma(pack: &mut ConvBiasAlgoPack) {
    for param in TILE_CONFIGS {
        pack.register(Box::new(AlgoInt8Nchw32ImmaImplicitGemm::new(param)));
    }
}

fn register_udot8(pack: &mut ConvBackwardDataAlgoPack) {
    pack.register(Box::new(AlgoUdot8DirectStride1));
    pack.register(Box::new(AlgoUdot8DirectStride2));
}

impl AlgoSelector<dyn ConvBiasAlgo> {
    /// Variants whose primitives exist on `caps`.
    pub fn for_device(caps: &DeviceCaps) -> Self {
        let mut pack = Self::new();
        if caps.kind == DeviceKind::Cuda {
            register_imma(&mut pack);
        }
        log::debug!("ConvBiasForward: {} algorithms registered for {}", pack.len(), caps);
        pack
    }

    /// Every known variant regardless of device.
    pub fn all() -> Self {
        let mut pack = Self::new();
        register_imma(&mut pack);
        pack
    }
}

impl AlgoSelector<dyn ConvBackwardDataAlgo> {
    pub fn for_device(caps: &DeviceCaps) -> Self {
        let mut pack = Self::new();
        if caps.has(FeatureFlags::DOTPROD) {
            register_udot8(&mut pack);
        }
        log::debug!(
            "ConvolutionBackwardData: {} algorithms registered for {}",
            pack.len(),
            caps
        );
        pack
    }

    pub fn all() -> Self {
        let mut pack = Self::new();
        register_udot8(&mut pack);
        pack
    }
}
