//! Host reference implementation of the compute primitives.
//!
//! Every call completes before returning, which trivially satisfies the
//! in-order stream contract. Work inside one primitive is split across the
//! rayon pool by output channel block.

use rayon::prelude::*;

use crate::error::{ConvError, ConvResult};
use crate::kernels::{
    ConvBiasStream, DeconvStream, DotConvLaunch, ImmaConvLaunch,
};
use crate::layout::{for_each_index, TensorLayout};
use crate::param::NonlineMode;
use crate::requant::{apply_nonlinearity, saturate_i8};

/// Bytes per reduction step in the IMMA offsets table: `(src, filter)` as `i32`.
const OFFSET_PAIR_BYTES: usize = 2 * std::mem::size_of::<i32>();

#[derive(Debug, Default)]
pub struct HostStream {
    pool: Option<rayon::ThreadPool>,
    history: Vec<&'static str>,
}

impl HostStream {
    /// Stream running on the global rayon pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream with a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> ConvResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("qconv-host-{i}"))
            .build()
            .map_err(|e| ConvError::Device(format!("failed to build host pool: {e}")))?;
        Ok(Self {
            pool: Some(pool),
            history: Vec::new(),
        })
    }

    /// Names of the primitives enqueued so far, in order.
    pub fn history(&self) -> &[&'static str] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn run<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

fn ensure_len(role: &'static str, len: usize, required: usize) -> ConvResult<()> {
    if len < required {
        return Err(ConvError::TensorTooSmall {
            role,
            required,
            provided: len,
        });
    }
    Ok(())
}

/// Products accumulate modulo 2^32, like the tensor-core accumulator.
#[inline]
fn dot_i8(a: &[i8], b: &[i8]) -> i32 {
    a.iter()
        .zip(b)
        .fold(0i32, |acc, (&x, &y)| acc.wrapping_add(x as i32 * y as i32))
}

impl ConvBiasStream for HostStream {
    fn relayout_i8(
        &mut self,
        src: &[i8],
        src_layout: &TensorLayout,
        dst: &mut [i8],
        dst_layout: &TensorLayout,
    ) -> ConvResult<()> {
        if !src_layout.eq_shape(dst_layout) {
            return Err(ConvError::InvalidLayout(format!(
                "relayout shape mismatch: {} vs {}",
                src_layout, dst_layout
            )));
        }
        ensure_len("relayout src", src.len(), src_layout.span().dist_elem())?;
        ensure_len("relayout dst", dst.len(), dst_layout.span().dist_elem())?;
        self.history.push("relayout");
        for_each_index(&src_layout.shape, |idx| {
            dst[dst_layout.offset_of(idx)] = src[src_layout.offset_of(idx)];
        });
        Ok(())
    }

    fn conv_bias_int8_imma_ncdiv32hw32(&mut self, launch: ImmaConvLaunch<'_>) -> ConvResult<()> {
        let ImmaConvLaunch {
            src,
            filter,
            bias,
            z,
            dst,
            reduce_offsets,
            param,
            nonlinear_mode,
            coeffs,
            ..
        } = launch;
        let mode = NonlineMode::from_u32(nonlinear_mode)
            .ok_or_else(|| ConvError::Device(format!("unknown nonlinear mode {nonlinear_mode}")))?;
        let [n, co, ci, hi, wi, ho, wo, ph, pw, sh, sw, fh, fw] = [
            param.n, param.co, param.ci, param.hi, param.wi, param.ho, param.wo, param.ph,
            param.pw, param.sh, param.sw, param.fh, param.fw,
        ]
        .map(|v| v as usize);
        let cb = ci / 32;
        let steps = cb * fh * fw;
        let plane = ho * wo * 32;

        ensure_len("src", src.len(), n * ci * hi * wi)?;
        ensure_len("filter", filter.len(), co * ci * fh * fw)?;
        ensure_len("bias", bias.len(), co)?;
        ensure_len("dst", dst.len(), n * co * ho * wo)?;
        if let Some(z) = z {
            ensure_len("z", z.len(), n * co * ho * wo)?;
        }

        // Reduction step -> (src offset from the window origin, filter offset).
        let step_offsets = |step: usize| {
            let (kw, rest) = (step % fw, step / fw);
            let (kh, c) = (rest % fh, rest / fh);
            (((c * hi + kh) * wi + kw) * 32, ((c * fh + kh) * fw + kw) * co * 32)
        };
        let table: Vec<(usize, usize)> = match reduce_offsets {
            Some(region) => {
                ensure_len("reduce_offsets", region.len(), steps * OFFSET_PAIR_BYTES)?;
                for (step, pair) in region.chunks_exact_mut(OFFSET_PAIR_BYTES).take(steps).enumerate() {
                    let (s, f) = step_offsets(step);
                    pair[..4].copy_from_slice(bytemuck::bytes_of(&(s as i32)));
                    pair[4..].copy_from_slice(bytemuck::bytes_of(&(f as i32)));
                }
                region
                    .chunks_exact(OFFSET_PAIR_BYTES)
                    .take(steps)
                    .map(|pair| {
                        let s: i32 = bytemuck::pod_read_unaligned(&pair[..4]);
                        let f: i32 = bytemuck::pod_read_unaligned(&pair[4..]);
                        (s as usize, f as usize)
                    })
                    .collect()
            }
            None => (0..steps).map(step_offsets).collect(),
        };

        self.history.push("conv_bias_int8_imma");
        let cob = co / 32;
        let dst = &mut dst[..n * co * ho * wo];
        self.run(|| {
            dst.par_chunks_mut(plane).enumerate().for_each(|(block, out)| {
                let (b, ob) = (block / cob, block % cob);
                let batch_base = (b * cb * hi * wi * 32) as isize;
                for oh in 0..ho {
                    for ow in 0..wo {
                        let ih0 = (oh * sh) as isize - ph as isize;
                        let iw0 = (ow * sw) as isize - pw as isize;
                        let origin = batch_base + (ih0 * wi as isize + iw0) * 32;
                        let mut acc = [0i32; 32];
                        for (step, &(s_off, f_off)) in table.iter().enumerate() {
                            let ih = ih0 + ((step / fw) % fh) as isize;
                            let iw = iw0 + (step % fw) as isize;
                            if ih < 0 || iw < 0 || ih >= hi as isize || iw >= wi as isize {
                                continue;
                            }
                            let at = (origin + s_off as isize) as usize;
                            let lanes = &src[at..at + 32];
                            for (cl, a) in acc.iter_mut().enumerate() {
                                let f_at = f_off + (ob * 32 + cl) * 32;
                                *a = a.wrapping_add(dot_i8(lanes, &filter[f_at..f_at + 32]));
                            }
                        }
                        let pix = (oh * wo + ow) * 32;
                        for (cl, &a) in acc.iter().enumerate() {
                            let zv = z.map_or(0, |z| z[block * plane + pix + cl] as i32);
                            let v = coeffs.apply(a, bias[ob * 32 + cl], zv);
                            out[pix + cl] = saturate_i8(apply_nonlinearity(v, mode, coeffs.dst_scale));
                        }
                    }
                }
            });
        });
        Ok(())
    }

    fn synchronize(&mut self) -> ConvResult<()> {
        Ok(())
    }
}

impl DeconvStream for HostStream {
    fn conv_direct_quint8_dot(&mut self, launch: DotConvLaunch<'_>) -> ConvResult<()> {
        let DotConvLaunch {
            diff,
            filter,
            grad,
            diff_zero_point,
            filter_zero_point,
            param,
        } = launch;
        let [oc, ic, h2, w2, oh, ow, fh, fw] = [
            param.oc, param.ic, param.h2, param.w2, param.oh, param.ow, param.fh, param.fw,
        ]
        .map(|v| v as usize);
        if oh + fh > h2 + 1 || ow + fw > w2 + 1 {
            return Err(ConvError::InvalidLayout(format!(
                "staged diff {h2}x{w2} too small for {oh}x{ow} output with {fh}x{fw} kernel"
            )));
        }
        ensure_len("diff", diff.len(), oc * h2 * w2)?;
        ensure_len("filter", filter.len(), ic * oc * fh * fw)?;
        ensure_len("grad", grad.len(), ic * oh * ow)?;

        self.history.push("conv_direct_quint8_dot");
        if ic * oh * ow == 0 {
            return Ok(());
        }
        let (zd, zf) = (diff_zero_point as i32, filter_zero_point as i32);
        let grad = &mut grad[..ic * oh * ow];
        self.run(|| {
            grad.par_chunks_mut(oh * ow).enumerate().for_each(|(c, out)| {
                for y in 0..oh {
                    for x in 0..ow {
                        let mut acc = 0i32;
                        for o in 0..oc {
                            for i in 0..fh {
                                let d_at = (o * h2 + y + i) * w2 + x;
                                let f_at = ((c * oc + o) * fh + i) * fw;
                                acc += diff[d_at..d_at + fw]
                                    .iter()
                                    .zip(&filter[f_at..f_at + fw])
                                    .map(|(&d, &f)| (d as i32 - zd) * (f as i32 - zf))
                                    .sum::<i32>();
                            }
                        }
                        out[y * ow + x] = acc;
                    }
                }
            });
        });
        Ok(())
    }

    fn synchronize(&mut self) -> ConvResult<()> {
        Ok(())
    }
}
