//! goodvoxels: 剔除局部变异系数过高的体素.
//!
//! 计算流程:
//!
//! 1. 皮层条带以多标签插值重采样到 BOLD 网格 (恒等变换).
//! 2. 逐体素时间均值 `M`, 样本标准差 `S`, 变异系数 `cov = S / M`.
//! 3. 条带内非零 `cov` 的均值与标准差; `cov` 除以该均值得到归一化 `cov`.
//! 4. 条带内归一化 `cov` 做高斯平滑, 再除以平滑后的二值条带, 得到局部均值;
//!    对结果做一次众数膨胀, 补上条带外的空洞.
//! 5. 全脑归一化 `cov` 除以局部均值得到调制后的 `cov`, 统计其条带内的均值与标准差.
//! 6. `upper = mean + f * std`, `lower = std - f * mean` (下界只计算与报告).
//! 7. 保留 `M > 0` 且调制后的 `cov` 不超过 `upper` 的体素.
//!
//! 所有除法在除数接近 0 时取 0, 不产生 NaN.

use ndarray::Zip;

use crate::config::GoodvoxelsConfig;
use crate::consts::frame::T1W;
use crate::error::{ResampleError, Result};
use crate::kernel::{Interpolation, VolumeKernel};
use crate::transform::{Transform, TransformChain};
use crate::volume::filter::{gaussian_smooth, modal_dilate};
use crate::volume::stats::{
    apply_mask, binarize, divide, divide_scalar, masked_nonzero_stats, temporal_mean,
    temporal_std, MeanStd,
};
use crate::{Mask, Series, Volume};

/// 估计过程中的标量统计.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GoodvoxelsReport {
    /// 条带内 `cov` 的均值.
    pub cov_mean: f64,
    /// 条带内 `cov` 的标准差.
    pub cov_std: f64,
    /// 条带内调制后 `cov` 的均值.
    pub modulated_mean: f64,
    /// 条带内调制后 `cov` 的标准差.
    pub modulated_std: f64,
    /// 上界 `modulated_mean + f * modulated_std`.
    pub upper: f64,
    /// 下界 `modulated_std - f * modulated_mean`. 不参与阈值化.
    pub lower: f64,
    /// 重采样后的条带体素数.
    pub ribbon_voxels: usize,
    /// 条带内被剔除的体素数.
    pub excluded_in_ribbon: usize,
}

/// 估计结果.
#[derive(Clone, Debug)]
pub struct Goodvoxels {
    /// 全脑保留掩码, 用作体到面投影的体素 ROI.
    pub mask: Mask,
    /// 保留掩码与条带的交集.
    pub ribbon: Mask,
    /// 调制后的变异系数.
    pub modulated_cov: Volume,
    /// 标量统计.
    pub report: GoodvoxelsReport,
}

/// 阈值化: `mean_signal > 0` 且 `modulated <= upper` 的体素.
pub fn goodvoxels_mask(modulated: &Volume, mean_signal: &Volume, upper: f64) -> Result<Mask> {
    if !modulated.grid().same_as(mean_signal.grid()) {
        return Err(ResampleError::shape(
            "goodvoxels threshold operand",
            &modulated.grid().dims(),
            &mean_signal.grid().dims(),
        ));
    }
    let upper = upper as f32;
    let data = Zip::from(modulated.data())
        .and(mean_signal.data())
        .map_collect(|m, s| *s > 0.0 && *m <= upper);
    Mask::new(modulated.grid().clone(), data)
}

fn stats_or_zero(stats: Option<MeanStd>, what: &str) -> MeanStd {
    stats.unwrap_or_else(|| {
        log::warn!("no nonzero {what} voxels inside the ribbon, statistics set to 0");
        MeanStd {
            mean: 0.0,
            std: 0.0,
            count: 0,
        }
    })
}

/// goodvoxels 估计器.
#[derive(Clone, Debug)]
pub struct GoodvoxelsEstimator<'a, K: ?Sized> {
    kernel: &'a K,
    config: GoodvoxelsConfig,
}

impl<'a, K: VolumeKernel + ?Sized> GoodvoxelsEstimator<'a, K> {
    /// 使用 `kernel` 把条带重采样到 BOLD 网格.
    pub fn new(kernel: &'a K, config: GoodvoxelsConfig) -> Self {
        Self { kernel, config }
    }

    /// 由已变换到结构像空间的 BOLD 序列和结构像条带掩码估计 goodvoxels.
    pub fn estimate(&self, series: &Series, anat_ribbon: &Mask) -> Result<Goodvoxels> {
        let sigma = self.config.smooth_sigma_mm;
        let factor = self.config.threshold_factor;

        let chain = TransformChain::new(vec![Transform::identity(T1W, T1W)])?;
        let ribbon = self
            .kernel
            .apply(&anat_ribbon.to_volume(), series.grid(), &chain, Interpolation::MultiLabel)?
            .to_mask();

        let mean = temporal_mean(series);
        let std = temporal_std(series);
        let cov = divide(&std, &mean)?;

        let cov_stats = stats_or_zero(masked_nonzero_stats(&cov, &ribbon)?, "cov");
        let cov_ribbon_norm = divide_scalar(&apply_mask(&cov, &ribbon)?, cov_stats.mean);

        // `-bin -s 5`
        let norm_support = Volume::new(
            cov_ribbon_norm.grid().clone(),
            binarize(cov_ribbon_norm.data()),
        )?;
        let smooth_norm = gaussian_smooth(&norm_support, sigma);
        // `-s 5 -div smooth_norm -dilD`
        let local = modal_dilate(&divide(&gaussian_smooth(&cov_ribbon_norm, sigma), &smooth_norm)?);

        let cov_norm = divide_scalar(&cov, cov_stats.mean);
        let modulated = divide(&cov_norm, &local)?;
        let mod_stats = stats_or_zero(masked_nonzero_stats(&modulated, &ribbon)?, "modulated cov");

        let upper = mod_stats.mean + factor * mod_stats.std;
        let lower = mod_stats.std - factor * mod_stats.mean;
        log::debug!(
            "goodvoxels: cov {:.4} +- {:.4}, modulated {:.4} +- {:.4}, upper {upper:.4}",
            cov_stats.mean,
            cov_stats.std,
            mod_stats.mean,
            mod_stats.std
        );

        let mask = goodvoxels_mask(&modulated, &mean, upper)?;
        let good_ribbon = mask.intersect(&ribbon)?;
        let ribbon_voxels = ribbon.count();
        let excluded_in_ribbon = ribbon_voxels - good_ribbon.count();
        log::info!("goodvoxels: excluded {excluded_in_ribbon} of {ribbon_voxels} ribbon voxels");

        Ok(Goodvoxels {
            mask,
            ribbon: good_ribbon,
            modulated_cov: modulated,
            report: GoodvoxelsReport {
                cov_mean: cov_stats.mean,
                cov_std: cov_stats.std,
                modulated_mean: mod_stats.mean,
                modulated_std: mod_stats.std,
                upper,
                lower,
                ribbon_voxels,
                excluded_in_ribbon,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ReferenceKernel;
    use crate::Grid;
    use ndarray::{Array3, Array4};

    const OUTLIERS: [(usize, usize, usize); 2] = [(0, 0, 0), (3, 3, 3)];

    /// 4x4x4, 2mm 体素, 基线 100, 逐帧 +-1 波动; 两个体素的波动为 +-60.
    fn noisy_series() -> Series {
        let grid = Grid::from_zooms((4, 4, 4), [2.0; 3], [0.0; 3]).unwrap();
        let data = Array4::from_shape_fn((4, 4, 4, 4), |(t, i, j, k)| {
            let amp = if OUTLIERS.contains(&(i, j, k)) { 60.0 } else { 1.0 + 0.1 * ((i + j + k) % 3) as f32 };
            if t % 2 == 0 {
                100.0 + amp
            } else {
                100.0 - amp
            }
        });
        Series::new(grid, data).unwrap().with_repetition_time(2.0)
    }

    fn estimate(series: &Series, ribbon: &Mask) -> Goodvoxels {
        let kernel = ReferenceKernel;
        GoodvoxelsEstimator::new(&kernel, GoodvoxelsConfig::default())
            .estimate(series, ribbon)
            .unwrap()
    }

    #[test]
    fn test_high_variance_voxels_excluded() {
        let series = noisy_series();
        let ribbon = Mask::full(series.grid().clone());
        let gv = estimate(&series, &ribbon);

        for idx in OUTLIERS {
            assert!(!gv.mask[idx], "{idx:?} should be excluded");
            assert!(!gv.ribbon[idx]);
        }
        assert_eq!(gv.mask.count(), 64 - OUTLIERS.len());
        assert_eq!(gv.report.ribbon_voxels, 64);
        assert_eq!(gv.report.excluded_in_ribbon, 2);
        assert!(gv.report.upper > gv.report.modulated_mean);
    }

    #[test]
    fn test_ribbon_restricts_output() {
        let series = noisy_series();
        let mut data = Array3::from_elem((4, 4, 4), false);
        data.slice_mut(ndarray::s![.., .., 0..2]).fill(true);
        let ribbon = Mask::new(series.grid().clone(), data).unwrap();
        let gv = estimate(&series, &ribbon);

        assert!(gv.ribbon.is_subset_of(&ribbon));
        assert!(gv.ribbon.is_subset_of(&gv.mask));
        assert!(!gv.mask[(0, 0, 0)]);
        assert_eq!(gv.report.ribbon_voxels, 32);
    }

    #[test]
    fn test_threshold_monotone() {
        let series = noisy_series();
        let ribbon = Mask::full(series.grid().clone());
        let gv = estimate(&series, &ribbon);
        let mean = temporal_mean(&series);

        let mut prev = goodvoxels_mask(&gv.modulated_cov, &mean, 0.0).unwrap();
        for upper in [0.1, 0.5, 1.0, gv.report.upper, 10.0, 100.0] {
            let cur = goodvoxels_mask(&gv.modulated_cov, &mean, upper).unwrap();
            assert!(prev.is_subset_of(&cur));
            prev = cur;
        }
        assert_eq!(prev.count(), 64);
    }

    #[test]
    fn test_threshold_inclusive_at_upper() {
        let grid = Grid::from_zooms((3, 1, 1), [2.0; 3], [0.0; 3]).unwrap();
        let modulated = Volume::new(
            grid.clone(),
            Array3::from_shape_vec((3, 1, 1), vec![0.5, 0.75, 1.0]).unwrap(),
        )
        .unwrap();
        let mean = Volume::new(grid, Array3::from_elem((3, 1, 1), 10.0)).unwrap();

        // 恰好等于上界的体素保留.
        let mask = goodvoxels_mask(&modulated, &mean, 0.75).unwrap();
        assert!(mask[(0, 0, 0)]);
        assert!(mask[(1, 0, 0)]);
        assert!(!mask[(2, 0, 0)]);
        assert_eq!(goodvoxels_mask(&modulated, &mean, 1.0).unwrap().count(), 3);
    }

    #[test]
    fn test_lower_bound_formula_pinned() {
        let series = noisy_series();
        let ribbon = Mask::full(series.grid().clone());
        let r = estimate(&series, &ribbon).report;
        // 下界沿用 `std - 0.5 * mean`, 与上界并不对称.
        assert!((r.lower - (r.modulated_std - 0.5 * r.modulated_mean)).abs() < 1e-12);
        assert!((r.upper - (r.modulated_mean + 0.5 * r.modulated_std)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_signal_voxels_dropped() {
        let grid = Grid::from_zooms((4, 4, 4), [2.0; 3], [0.0; 3]).unwrap();
        let data = Array4::from_shape_fn((3, 4, 4, 4), |(t, i, _, _)| {
            if i == 0 {
                0.0
            } else {
                50.0 + t as f32
            }
        });
        let series = Series::new(grid.clone(), data).unwrap();
        let gv = estimate(&series, &Mask::full(grid));
        assert!(!gv.mask[(0, 2, 2)]);
        assert!(gv.mask[(2, 2, 2)]);
        assert!(gv.report.upper.is_finite());
        assert!(gv.modulated_cov.data().iter().all(|v| v.is_finite()));
    }
}
