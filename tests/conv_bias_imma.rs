use qconv_kernels::algo::imma_nchw32::TILE_CONFIGS;
use qconv_kernels::requant::{apply_nonlinearity, saturate_i8};
use qconv_kernels::{
    AlgoInt8Nchw32ImmaImplicitGemm, Algorithm, ConvBiasForward, ConvBiasSizeArgs, ConvBiasTensors,
    ConvError, ConvParam, DType, DeviceCaps, DispatchConfig, Format, HostStream, NonlineMode,
    RequantCoeffs, TensorLayout,
};

fn s8(scale: f32) -> DType {
    DType::QuantizedS8 { scale }
}

fn s32(scale: f32) -> DType {
    DType::QuantizedS32 { scale }
}

/// Deterministic values in `[-range, range]`.
fn lcg_fill(len: usize, seed: u64, range: i32) -> Vec<i32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) % (2 * range as u64 + 1)) as i32 - range
        })
        .collect()
}

fn to_i8(v: Vec<i32>) -> Vec<i8> {
    v.into_iter().map(|x| x as i8).collect()
}

struct Case {
    n: usize,
    ci: usize,
    co: usize,
    hw: usize,
    k: usize,
    pad: usize,
    stride: usize,
    with_z: bool,
    mode: NonlineMode,
}

impl Case {
    fn args(&self) -> ConvBiasSizeArgs {
        let out = (self.hw + 2 * self.pad - self.k) / self.stride + 1;
        let z = if self.with_z {
            TensorLayout::new(&[self.n, self.co / 32, out, out, 32], s8(0.2))
        } else {
            TensorLayout::empty(s8(1.0))
        };
        ConvBiasSizeArgs::new(
            TensorLayout::new(&[self.n, self.ci / 32, self.hw, self.hw, 32], s8(0.05)),
            TensorLayout::new(&[self.co, self.ci / 32, self.k, self.k, 32], s8(0.02)),
            TensorLayout::new(&[1, self.co / 32, 1, 1, 32], s32(0.001)),
            z,
            TensorLayout::new(&[self.n, self.co / 32, out, out, 32], s8(0.1)),
            ConvParam::default()
                .with_format(Format::Nchw32)
                .with_padding(self.pad, self.pad)
                .with_stride(self.stride, self.stride)
                .with_nonline_mode(self.mode),
        )
        .unwrap()
    }
}

/// Direct NCHW32 convolution with the same epilogue.
fn reference(
    args: &ConvBiasSizeArgs,
    src: &[i8],
    filter: &[i8],
    bias: &[i32],
    z: Option<&[i8]>,
) -> Vec<i8> {
    let s = *args.shape();
    let coeffs =
        RequantCoeffs::from_layouts(&args.src, &args.filter, &args.bias, &args.z, &args.dst).unwrap();
    let (cb, ob) = (s.ci / 32, s.co / 32);
    let mut out = vec![0i8; args.dst.total_nr_elems()];
    for b in 0..s.n {
        for o in 0..s.co {
            for oh in 0..s.ho {
                for ow in 0..s.wo {
                    let mut acc = 0i32;
                    for c in 0..s.ci {
                        for kh in 0..s.fh {
                            for kw in 0..s.fw {
                                let ih = (oh * s.sh + kh) as isize - s.ph as isize;
                                let iw = (ow * s.sw + kw) as isize - s.pw as isize;
                                if ih < 0 || iw < 0 || ih >= s.hi as isize || iw >= s.wi as isize {
                                    continue;
                                }
                                let (ih, iw) = (ih as usize, iw as usize);
                                let x = src[(((b * cb + c / 32) * s.hi + ih) * s.wi + iw) * 32 + c % 32];
                                let w = filter
                                    [(((o * cb + c / 32) * s.fh + kh) * s.fw + kw) * 32 + c % 32];
                                acc += x as i32 * w as i32;
                            }
                        }
                    }
                    let at = (((b * ob + o / 32) * s.ho + oh) * s.wo + ow) * 32 + o % 32;
                    let zv = z.map_or(0, |z| z[at] as i32);
                    let v = coeffs.apply(acc, bias[o], zv);
                    out[at] = saturate_i8(apply_nonlinearity(
                        v,
                        args.param.nonline_mode,
                        coeffs.dst_scale,
                    ));
                }
            }
        }
    }
    out
}

fn run_case(case: &Case) {
    let args = case.args();
    let src = to_i8(lcg_fill(args.src.total_nr_elems(), 1, 127));
    let filter = to_i8(lcg_fill(args.filter.total_nr_elems(), 2, 127));
    let bias = lcg_fill(case.co, 3, 20000);
    let z = case.with_z.then(|| to_i8(lcg_fill(args.z.total_nr_elems(), 4, 127)));
    let expected = reference(&args, &src, &filter, &bias, z.as_deref());

    let opr = ConvBiasForward::new(DeviceCaps::cuda(8, 6, 65536), &DispatchConfig::default());
    let mut workspace = vec![0u8; opr.get_workspace_in_bytes(&args).unwrap()];
    let mut dst = vec![0i8; args.dst.total_nr_elems()];
    let mut stream = HostStream::new();
    opr.exec(
        &args,
        ConvBiasTensors {
            src: &src,
            filter: &filter,
            bias: &bias,
            z: z.as_deref(),
            dst: &mut dst,
        },
        &mut workspace,
        &mut stream,
    )
    .unwrap();
    assert_eq!(dst, expected);
}

#[test]
fn one_by_one_scenario_is_usable_with_filter_only_workspace() {
    let args = ConvBiasSizeArgs::new(
        TensorLayout::new(&[1, 2, 7, 7, 32], s8(0.5)),
        TensorLayout::new(&[64, 2, 1, 1, 32], s8(0.25)),
        TensorLayout::new(&[1, 2, 1, 1, 32], s32(0.125)),
        TensorLayout::empty(s8(1.0)),
        TensorLayout::new(&[1, 2, 7, 7, 32], s8(0.1)),
        ConvParam::default().with_format(Format::Nchw32),
    )
    .unwrap();
    let algo = AlgoInt8Nchw32ImmaImplicitGemm::new(TILE_CONFIGS[2]);
    assert!(algo.usable(&args, &DeviceCaps::cuda(7, 5, 65536)));

    let coeffs =
        RequantCoeffs::from_layouts(&args.src, &args.filter, &args.bias, &args.z, &args.dst).unwrap();
    assert!((coeffs.alpha - 1.25).abs() < 1e-6);
    assert!((coeffs.beta - 1.25).abs() < 1e-6);
    assert_eq!(coeffs.gamma, 0.0);

    let bundle = algo.workspace_bundle(&args);
    assert_eq!(bundle.nr_regions(), 1);
    assert_eq!(algo.workspace_bytes(&args), args.filter.span().dist_byte());
}

#[test]
fn three_by_three_on_small_constant_memory_is_not_usable() {
    // 8 input blocks of 3x3 taps -> 576 offset bytes, but the device is
    // below the constant memory floor.
    let args = ConvBiasSizeArgs::new(
        TensorLayout::new(&[1, 8, 7, 7, 32], s8(0.5)),
        TensorLayout::new(&[32, 8, 3, 3, 32], s8(0.25)),
        TensorLayout::new(&[1, 1, 1, 1, 32], s32(0.125)),
        TensorLayout::empty(s8(1.0)),
        TensorLayout::new(&[1, 1, 5, 5, 32], s8(0.1)),
        ConvParam::default().with_format(Format::Nchw32),
    )
    .unwrap();
    let caps = DeviceCaps::cuda(7, 5, 32768);
    for param in TILE_CONFIGS {
        assert!(!AlgoInt8Nchw32ImmaImplicitGemm::new(param).usable(&args, &caps));
    }
    let opr = ConvBiasForward::new(caps, &DispatchConfig::default());
    let err = opr.get_workspace_in_bytes(&args).unwrap_err();
    assert!(matches!(err, ConvError::NoAlgorithm { operator: "ConvBiasForward", .. }));
}

#[test]
fn one_by_one_matches_reference() {
    run_case(&Case {
        n: 2,
        ci: 64,
        co: 32,
        hw: 3,
        k: 1,
        pad: 0,
        stride: 1,
        with_z: false,
        mode: NonlineMode::Identity,
    });
}

#[test]
fn strided_padded_with_residual_and_relu_matches_reference() {
    run_case(&Case {
        n: 2,
        ci: 64,
        co: 64,
        hw: 5,
        k: 3,
        pad: 1,
        stride: 2,
        with_z: true,
        mode: NonlineMode::Relu,
    });
}

#[test]
fn hswish_epilogue_matches_reference() {
    run_case(&Case {
        n: 1,
        ci: 32,
        co: 32,
        hw: 6,
        k: 5,
        pad: 2,
        stride: 1,
        with_z: false,
        mode: NonlineMode::HSwish,
    });
}

#[test]
fn sigmoid_with_residual_matches_reference() {
    run_case(&Case {
        n: 1,
        ci: 32,
        co: 64,
        hw: 4,
        k: 3,
        pad: 0,
        stride: 1,
        with_z: true,
        mode: NonlineMode::Sigmoid,
    });
}
