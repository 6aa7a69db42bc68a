//! 流水线配置.
//!
//! 所有字段都有与原流程一致的默认值. 启用 `serde` feature 时可以序列化/反序列化.

use crate::consts::{goodvoxels, surface};
use crate::error::{ResampleError, Result};
use crate::flow::Scheduler;
use crate::grayords::Density;
use crate::kernel::Interpolation;

/// 体素重采样的插值方式, 按数据种类分别配置.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResampleConfig {
    /// BOLD 序列.
    pub bold: Interpolation,
    /// BOLD 脑掩码.
    pub mask: Interpolation,
    /// 分割标签 (aseg, aparc).
    pub labels: Interpolation,
    /// T2* 图.
    pub t2star: Interpolation,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            bold: Interpolation::LanczosWindowedSinc,
            mask: Interpolation::MultiLabel,
            labels: Interpolation::MultiLabel,
            t2star: Interpolation::LanczosWindowedSinc,
        }
    }
}

impl ResampleConfig {
    /// 所有体数据都使用 `interpolation` (标签与掩码仍保持多标签).
    pub fn with_bold(mut self, interpolation: Interpolation) -> Self {
        self.bold = interpolation;
        self.t2star = interpolation;
        self
    }
}

/// goodvoxels 掩码估计.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GoodvoxelsConfig {
    /// 是否在表面投影时排除高方差体素.
    pub enabled: bool,
    /// 空间平滑高斯核标准差 (毫米).
    pub smooth_sigma_mm: f64,
    /// 阈值系数.
    pub threshold_factor: f64,
}

impl Default for GoodvoxelsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smooth_sigma_mm: goodvoxels::SMOOTH_SIGMA_MM,
            threshold_factor: goodvoxels::THRESHOLD_FACTOR,
        }
    }
}

/// 表面重采样.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SurfaceConfig {
    /// 投影后测地膨胀距离 (毫米).
    pub dilate_distance_mm: f64,
    /// FreeSurfer 表面空间采样时, 是否把内侧壁置为 NaN.
    pub medial_surface_nan: bool,
    /// fsLR 模板网格每个半球的顶点数. `None` 时由 grayordinates 密度决定.
    pub fslr_vertices: Option<usize>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            dilate_distance_mm: surface::DILATE_DISTANCE_MM,
            medial_surface_nan: false,
            fslr_vertices: None,
        }
    }
}

/// 整条流水线的配置.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// 输出的目标空间, 按请求顺序, 例如 `["MNI152NLin6Asym:res-2", "fsaverage:den-10k"]`.
    pub output_spaces: Vec<String>,
    /// grayordinates 密度. `None` 表示不输出 grayordinates.
    pub grayordinates: Option<Density>,
    /// 是否同时输出原始采集空间的序列.
    pub native: bool,
    /// 体素重采样.
    pub resample: ResampleConfig,
    /// goodvoxels.
    pub goodvoxels: GoodvoxelsConfig,
    /// 表面.
    pub surface: SurfaceConfig,
    /// 工作线程数. `None` 时读取 `$BOLD_BERRY_THREADS`, 再回退到核心数.
    pub threads: Option<usize>,
}

impl PipelineConfig {
    /// 校验数值范围.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ResampleError::InvalidConfiguration(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };
        positive("goodvoxels.smooth_sigma_mm", self.goodvoxels.smooth_sigma_mm)?;
        positive("goodvoxels.threshold_factor", self.goodvoxels.threshold_factor)?;
        positive("surface.dilate_distance_mm", self.surface.dilate_distance_mm)?;
        if self.surface.fslr_vertices == Some(0) {
            return Err(ResampleError::InvalidConfiguration(
                "surface.fslr_vertices must be at least 1".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(ResampleError::InvalidConfiguration(
                "threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// 按配置创建执行器.
    pub fn scheduler(&self) -> Scheduler {
        match self.threads {
            Some(n) => Scheduler::new(n),
            None => Scheduler::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.resample.bold, Interpolation::LanczosWindowedSinc);
        assert_eq!(c.resample.mask, Interpolation::MultiLabel);
        assert_eq!(c.goodvoxels.smooth_sigma_mm, 5.0);
        assert_eq!(c.surface.dilate_distance_mm, 10.0);
        assert!(!c.goodvoxels.enabled);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_invalid() {
        let mut c = PipelineConfig::default();
        c.goodvoxels.smooth_sigma_mm = 0.0;
        assert!(matches!(c.validate(), Err(ResampleError::InvalidConfiguration(_))));
        let c = PipelineConfig {
            threads: Some(0),
            ..Default::default()
        };
        assert!(c.validate().is_err());
        let mut c = PipelineConfig::default();
        c.surface.fslr_vertices = Some(0);
        assert!(c.validate().is_err());
        let c = PipelineConfig {
            threads: Some(3),
            ..Default::default()
        };
        assert_eq!(c.scheduler().workers(), 3);
    }
}
