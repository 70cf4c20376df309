//! Algorithm variants and priority-order selection.
//!
//! Each variant answers three questions about a problem descriptor: can it
//! run here ([`Algorithm::usable`]), how much scratch does it need
//! ([`Algorithm::workspace_bytes`]), and run it (`execute` on the
//! per-operator traits). The selector only ever talks to these traits.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::OperatorPolicy;
use crate::device::DeviceCaps;
use crate::error::{ConvError, ConvResult};
use crate::kernels::{ConvBiasStream, DeconvStream};
use crate::problem::{
    ConvBackwardDataExecArgs, ConvBackwardDataSizeArgs, ConvBiasExecArgs, ConvBiasSizeArgs,
    ProblemDesc,
};
use crate::workspace::WorkspaceBundle;

pub mod imma_nchw32;
pub mod pack;
pub mod udot8_deconv;

pub use imma_nchw32::{AlgoInt8Nchw32ImmaImplicitGemm, AlgoParam};
pub use pack::{ConvBackwardDataAlgoPack, ConvBiasAlgoPack};
pub use udot8_deconv::{AlgoUdot8DirectStride1, AlgoUdot8DirectStride2};

/// Operation-independent part of a variant.
pub trait Algorithm: Send + Sync {
    type Args: ProblemDesc + fmt::Display;

    /// Stable identifier, unique within one operator.
    fn name(&self) -> &str;

    /// Pure predicate: `false` for anything the variant cannot run,
    /// including resource limits of `caps`.
    fn usable(&self, args: &Self::Args, caps: &DeviceCaps) -> bool;

    fn workspace_bundle(&self, args: &Self::Args) -> WorkspaceBundle;

    fn workspace_bytes(&self, args: &Self::Args) -> usize {
        self.workspace_bundle(args).total_size_in_bytes()
    }
}

pub trait ConvBiasAlgo: Algorithm<Args = ConvBiasSizeArgs> {
    /// Enqueue the computation on `stream`. Callers must have checked
    /// [`Algorithm::usable`] and sized the workspace with
    /// [`Algorithm::workspace_bytes`].
    fn execute(&self, args: ConvBiasExecArgs<'_>, stream: &mut dyn ConvBiasStream) -> ConvResult<()>;
}

pub trait ConvBackwardDataAlgo: Algorithm<Args = ConvBackwardDataSizeArgs> {
    fn execute(
        &self,
        args: ConvBackwardDataExecArgs<'_>,
        stream: &mut dyn DeconvStream,
    ) -> ConvResult<()>;
}

impl fmt::Debug for dyn ConvBiasAlgo + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConvBiasAlgo").field(&self.name()).finish()
    }
}

impl fmt::Debug for dyn ConvBackwardDataAlgo + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConvBackwardDataAlgo").field(&self.name()).finish()
    }
}

/// Ordered variant list plus a memo of past choices.
///
/// The memo is keyed by descriptor, device and policy fingerprints, so a hit
/// always names the variant a fresh scan would pick.
pub struct AlgoSelector<A: ?Sized> {
    algos: Vec<Box<A>>,
    cache: Mutex<HashMap<String, usize>>,
}

impl<A: ?Sized> Default for AlgoSelector<A> {
    fn default() -> Self {
        Self {
            algos: Vec::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<A: ?Sized + Algorithm> fmt::Debug for AlgoSelector<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgoSelector")
            .field("algos", &self.algos.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl<A: ?Sized + Algorithm> AlgoSelector<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `algo` at the lowest priority.
    pub fn register(&mut self, algo: Box<A>) {
        self.algos.push(algo);
        self.lock_cache().clear();
    }

    pub fn len(&self) -> usize {
        self.algos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &A> {
        self.algos.iter().map(|a| a.as_ref())
    }

    pub fn by_name(&self, name: &str) -> Option<&A> {
        self.iter().find(|a| a.name() == name)
    }

    /// Every variant whose predicate accepts `args`, ignoring config.
    pub fn usable_algos(&self, args: &A::Args, caps: &DeviceCaps) -> Vec<&A> {
        self.iter().filter(|a| a.usable(args, caps)).collect()
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    /// Pick the forced variant or the first usable, non-disabled one.
    pub fn select(
        &self,
        args: &A::Args,
        caps: &DeviceCaps,
        policy: &OperatorPolicy,
    ) -> ConvResult<&A> {
        let key = format!(
            "{}#{}#{}",
            args.fingerprint(),
            caps.fingerprint(),
            policy.fingerprint()
        );
        if let Some(&idx) = self.lock_cache().get(&key) {
            return Ok(self.algos[idx].as_ref());
        }
        let idx = self.scan(args, caps, policy)?;
        self.lock_cache().insert(key, idx);
        Ok(self.algos[idx].as_ref())
    }

    fn scan(&self, args: &A::Args, caps: &DeviceCaps, policy: &OperatorPolicy) -> ConvResult<usize> {
        let operator = <A::Args as ProblemDesc>::OPERATOR;
        if let Some(forced) = &policy.force {
            let idx = self
                .algos
                .iter()
                .position(|a| a.name() == forced)
                .ok_or_else(|| ConvError::AlgorithmNotFound(forced.clone()))?;
            if self.algos[idx].usable(args, caps) {
                log::debug!("{}: using forced algorithm {}", operator, forced);
                return Ok(idx);
            }
            log::warn!("{}: forced algorithm {} is not usable for {}", operator, forced, args);
            return Err(ConvError::NoAlgorithm {
                operator,
                problem: format!("{args} (forced {forced})"),
            });
        }

        for (idx, algo) in self.algos.iter().enumerate() {
            if policy.is_disabled(algo.name()) {
                log::trace!("{}: {} disabled by config", operator, algo.name());
                continue;
            }
            if algo.usable(args, caps) {
                log::debug!("{}: selected {} for {}", operator, algo.name(), args);
                return Ok(idx);
            }
            log::trace!("{}: {} not usable", operator, algo.name());
        }
        Err(ConvError::NoAlgorithm {
            operator,
            problem: args.to_string(),
        })
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::layout::TensorLayout;
    use crate::param::ConvParam;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Fake {
        name: &'static str,
        usable: bool,
        calls: AtomicUsize,
    }

    impl Fake {
        fn boxed(name: &'static str, usable: bool) -> Box<Self> {
            Box::new(Self {
                name,
                usable,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Algorithm for Fake {
        type Args = ConvBackwardDataSizeArgs;

        fn name(&self) -> &str {
            self.name
        }

        fn usable(&self, _: &Self::Args, _: &DeviceCaps) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.usable
        }

        fn workspace_bundle(&self, _: &Self::Args) -> WorkspaceBundle {
            WorkspaceBundle::new(&[("scratch", 16)])
        }
    }

    fn args() -> ConvBackwardDataSizeArgs {
        ConvBackwardDataSizeArgs::new(
            TensorLayout::new(&[4, 2, 3, 3], DType::Uint8),
            TensorLayout::new(&[1, 4, 4, 4], DType::Uint8),
            TensorLayout::new(&[1, 2, 6, 6], DType::Int32),
            ConvParam::default(),
        )
        .unwrap()
    }

    fn selector() -> AlgoSelector<Fake> {
        let mut sel = AlgoSelector::new();
        sel.register(Fake::boxed("A", false));
        sel.register(Fake::boxed("B", true));
        sel.register(Fake::boxed("C", true));
        sel
    }

    #[test]
    fn test_first_usable_in_priority_order() {
        let sel = selector();
        let caps = DeviceCaps::cpu(Default::default());
        let chosen = sel.select(&args(), &caps, &OperatorPolicy::default()).unwrap();
        assert_eq!(chosen.name(), "B");
        assert_eq!(chosen.workspace_bytes(&args()), 16);
        assert_eq!(sel.usable_algos(&args(), &caps).len(), 2);
    }

    #[test]
    fn test_selection_is_memoized() {
        let sel = selector();
        let caps = DeviceCaps::cpu(Default::default());
        let policy = OperatorPolicy::default();
        sel.select(&args(), &caps, &policy).unwrap();
        sel.select(&args(), &caps, &policy).unwrap();
        let calls = sel.by_name("A").unwrap().calls.load(Ordering::Relaxed);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_memo_shared_across_scales() {
        let sel = selector();
        let caps = DeviceCaps::cpu(Default::default());
        let policy = OperatorPolicy::default();
        for scale in [0.5f32, 0.25, 0.125] {
            let qa = DType::Quantized8Asymm {
                scale,
                zero_point: 7,
            };
            let scaled = ConvBackwardDataSizeArgs::new(
                TensorLayout::new(&[4, 2, 3, 3], qa),
                TensorLayout::new(&[1, 4, 4, 4], qa),
                TensorLayout::new(&[1, 2, 6, 6], DType::QuantizedS32 { scale }),
                ConvParam::default(),
            )
            .unwrap();
            assert_eq!(sel.select(&scaled, &caps, &policy).unwrap().name(), "B");
        }
        let calls = sel.by_name("A").unwrap().calls.load(Ordering::Relaxed);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_disabled_and_forced() {
        let sel = selector();
        let caps = DeviceCaps::cpu(Default::default());
        let skip_b = OperatorPolicy {
            force: None,
            disabled: vec!["B".into()],
        };
        assert_eq!(sel.select(&args(), &caps, &skip_b).unwrap().name(), "C");

        let force_c = OperatorPolicy {
            force: Some("C".into()),
            disabled: Vec::new(),
        };
        assert_eq!(sel.select(&args(), &caps, &force_c).unwrap().name(), "C");

        let force_a = OperatorPolicy {
            force: Some("A".into()),
            disabled: Vec::new(),
        };
        let err = sel.select(&args(), &caps, &force_a).unwrap_err();
        assert!(matches!(
            err,
            ConvError::NoAlgorithm {
                operator: "ConvolutionBackwardData",
                ..
            }
        ));

        let force_missing = OperatorPolicy {
            force: Some("Z".into()),
            disabled: Vec::new(),
        };
        let err = sel.select(&args(), &caps, &force_missing).unwrap_err();
        assert!(matches!(err, ConvError::AlgorithmNotFound(name) if name == "Z"));
    }

    #[test]
    fn test_no_algorithm_message() {
        let mut sel = AlgoSelector::new();
        sel.register(Fake::boxed("A", false));
        let caps = DeviceCaps::cpu(Default::default());
        let err = sel
            .select(&args(), &caps, &OperatorPolicy::default())
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("no algorithm available for ConvolutionBackwardData with"));
    }
}
