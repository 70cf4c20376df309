//! Device capability snapshot consumed by usability predicates.
//!
//! Gating never talks to a driver directly: callers build a [`DeviceCaps`]
//! once (host detection, a CUDA context query, or by hand in tests) and pass
//! it next to the problem descriptor.

use std::fmt;
use std::ops::BitOr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

/// Bitfield of instruction-set features relevant to kernel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    bits: u32,
}

impl FeatureFlags {
    pub const NONE: Self = Self { bits: 0 };
    pub const NEON: Self = Self { bits: 1 << 0 };
    /// ARMv8.2 `sdot`/`udot`.
    pub const DOTPROD: Self = Self { bits: 1 << 1 };
    pub const AVX2: Self = Self { bits: 1 << 2 };
    pub const AVX512_VNNI: Self = Self { bits: 1 << 3 };
    /// Int8 tensor-core MMA (sm_75+).
    pub const INT8_TENSOR_CORE: Self = Self { bits: 1 << 4 };

    pub const fn from_bits(bits: u32) -> Self {
        Self { bits }
    }

    pub const fn bits(self) -> u32 {
        self.bits
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }
}

impl BitOr for FeatureFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut feats = Vec::new();
        if self.contains(Self::NEON) {
            feats.push("NEON");
        }
        if self.contains(Self::DOTPROD) {
            feats.push("DOTPROD");
        }
        if self.contains(Self::AVX2) {
            feats.push("AVX2");
        }
        if self.contains(Self::AVX512_VNNI) {
            feats.push("VNNI");
        }
        if self.contains(Self::INT8_TENSOR_CORE) {
            feats.push("IMMA");
        }
        if feats.is_empty() {
            feats.push("Scalar");
        }
        write!(f, "{}", feats.join("+"))
    }
}

/// Minimum constant memory a device must report before any kernel stages
/// data there.
pub const MIN_CONST_MEM_BYTES: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceCaps {
    pub kind: DeviceKind,
    /// `(major, minor)` for CUDA devices.
    pub compute_capability: Option<(u32, u32)>,
    /// Total constant memory in bytes (0 when the device has none).
    pub total_const_mem: usize,
    pub features: FeatureFlags,
}

impl DeviceCaps {
    pub fn cpu(features: FeatureFlags) -> Self {
        Self {
            kind: DeviceKind::Cpu,
            compute_capability: None,
            total_const_mem: 0,
            features,
        }
    }

    pub fn cuda(major: u32, minor: u32, total_const_mem: usize) -> Self {
        let mut features = FeatureFlags::NONE;
        if (major, minor) >= (7, 5) {
            features = features | FeatureFlags::INT8_TENSOR_CORE;
        }
        Self {
            kind: DeviceKind::Cuda,
            compute_capability: Some((major, minor)),
            total_const_mem,
            features,
        }
    }

    /// Host CPU capabilities, detected once per process.
    pub fn host() -> &'static DeviceCaps {
        static HOST: OnceLock<DeviceCaps> = OnceLock::new();
        HOST.get_or_init(|| {
            let caps = Self::cpu(detect_host_features());
            log::info!("Detected host features: {}", caps.features);
            caps
        })
    }

    /// Whether the device is at least compute capability `major.minor`.
    pub fn is_compute_capability_required(&self, major: u32, minor: u32) -> bool {
        match self.compute_capability {
            Some(cc) => cc >= (major, minor),
            None => false,
        }
    }

    pub fn has(&self, feature: FeatureFlags) -> bool {
        self.features.contains(feature)
    }

    /// Compact key for selection caches.
    pub fn fingerprint(&self) -> String {
        match self.compute_capability {
            Some((major, minor)) => format!(
                "{:?}_sm{}{}_cmem{}_{}",
                self.kind, major, minor, self.total_const_mem, self.features
            ),
            None => format!("{:?}_{}", self.kind, self.features),
        }
    }

    /// Query compute capability and constant memory of the context's device.
    #[cfg(feature = "cuda")]
    pub fn from_cuda_context(
        ctx: &std::sync::Arc<cudarc::driver::CudaContext>,
    ) -> crate::error::ConvResult<Self> {
        use cudarc::driver::sys::CUdevice_attribute;

        let major = ctx.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?;
        let minor = ctx.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?;
        let const_mem = ctx.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_TOTAL_CONSTANT_MEMORY)?;
        log::debug!(
            "CUDA device: sm_{}{}, {} bytes constant memory",
            major,
            minor,
            const_mem
        );
        Ok(Self::cuda(major as u32, minor as u32, const_mem.max(0) as usize))
    }
}

impl fmt::Display for DeviceCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compute_capability {
            Some((major, minor)) => write!(
                f,
                "{:?} sm_{}{} | cmem {}K | {}",
                self.kind,
                major,
                minor,
                self.total_const_mem / 1024,
                self.features
            ),
            None => write!(f, "{:?} | {}", self.kind, self.features),
        }
    }
}

fn detect_host_features() -> FeatureFlags {
    #[allow(unused_mut)]
    let mut flags = FeatureFlags::NONE;
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            flags = flags | FeatureFlags::AVX2;
        }
        if is_x86_feature_detected!("avx512vnni") {
            flags = flags | FeatureFlags::AVX512_VNNI;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        flags = flags | FeatureFlags::NEON;
        if std::arch::is_aarch64_feature_detected!("dotprod") {
            flags = flags | FeatureFlags::DOTPROD;
        }
    }
    flags
}
