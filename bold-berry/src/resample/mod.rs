//! 体素空间重采样.
//!
//! 每个输出帧只插值一次: 逐帧头动, 畸变校正, 功能像到结构像, 结构像到模板
//! 在送入内核前合成为一条链. 插值后的负值截断为 0.

use crate::error::{ResampleError, Result};
use crate::kernel::{Interpolation, VolumeKernel};
use crate::transform::{SeriesChain, Transform, TransformChain};
use crate::volume::filter::clip_negative;
use crate::{Grid, Series, Volume};

mod anat;
mod native;
mod standard;

pub use anat::AnatResampler;
pub use native::{NativeOutputs, NativeResampler};
pub use standard::{StandardResampler, StdInputs, StdJoined, StdOutputs, StdPlan};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 变换估计流程给出的 BOLD 变换.
#[derive(Clone, Debug)]
pub struct BoldTransforms {
    /// 逐帧头动校正, 第 `t` 个把第 `t` 帧映射到 BOLD 参考帧.
    pub hmc: Vec<Transform>,
    /// 畸变校正位移场 (参考帧到参考帧), 未启用时为 `None`.
    pub fieldwarp: Option<Transform>,
    /// BOLD 参考帧到结构像的仿射.
    pub bold_to_t1w: Transform,
}

impl BoldTransforms {
    /// 头动之后的公共部分: `[sdc?] + rest`, 源到目标顺序.
    pub fn tail(&self, rest: &[&Transform]) -> Vec<Transform> {
        self.fieldwarp
            .iter()
            .chain(rest.iter().copied())
            .cloned()
            .collect()
    }

    /// 逐帧链 `[hmc_t, sdc?, rest...]`. 任一帧不连续或帧数不符即失败.
    pub fn series_chain(&self, n_volumes: usize, rest: &[&Transform]) -> Result<SeriesChain> {
        Ok(SeriesChain::new(&self.hmc, &self.tail(rest), n_volumes)?)
    }
}

/// 按逐帧链把序列重采样到 `reference`, 每帧只调用一次内核, 并截断负值.
pub fn resample_series<K: VolumeKernel + ?Sized>(
    kernel: &K,
    series: &Series,
    chains: &SeriesChain,
    reference: &Grid,
    interpolation: Interpolation,
) -> Result<Series> {
    if chains.len() != series.len() {
        return Err(ResampleError::shape("per-volume chains", &[series.len()], &[chains.len()]));
    }
    let volumes = series.split();
    let run = |(volume, chain): (&Volume, &TransformChain)| -> Result<Volume> {
        let mut out = kernel.apply(volume, reference, chain, interpolation)?;
        clip_negative(&mut out);
        Ok(out)
    };
    let pairs: Vec<_> = volumes.iter().zip(chains.iter()).collect();

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            let out = pairs.into_par_iter().map(run).collect::<Result<Vec<_>>>()?;
        } else {
            let out = pairs.into_iter().map(run).collect::<Result<Vec<_>>>()?;
        }
    }
    Series::merge(out, series.repetition_time())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::consts::frame::{BOLD, BOLD_REF, T1W};
    use crate::kernel::{KernelError, ReferenceKernel};
    use ndarray::Array4;

    /// 记录调用次数的内核.
    #[derive(Default)]
    pub struct CountingKernel {
        pub calls: AtomicUsize,
    }

    impl VolumeKernel for CountingKernel {
        fn apply(
            &self,
            moving: &Volume,
            reference: &Grid,
            chain: &TransformChain,
            interpolation: Interpolation,
        ) -> std::result::Result<Volume, KernelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ReferenceKernel.apply(moving, reference, chain, interpolation)
        }
    }

    /// 6x6x6, 2mm, 值为 `i + 10 t` 的序列.
    pub fn bold(n: usize) -> Series {
        let grid = Grid::from_zooms((6, 6, 6), [2.0; 3], [0.0; 3]).unwrap();
        let data = Array4::from_shape_fn((n, 6, 6, 6), |(t, i, _, _)| i as f32 + 10.0 * t as f32);
        Series::new(grid, data).unwrap().with_repetition_time(2.0)
    }

    /// 全部为恒等的变换.
    pub fn identity_transforms(n: usize) -> BoldTransforms {
        BoldTransforms {
            hmc: (0..n).map(|_| Transform::identity(BOLD, BOLD_REF)).collect(),
            fieldwarp: None,
            bold_to_t1w: Transform::identity(BOLD_REF, T1W),
        }
    }
}
