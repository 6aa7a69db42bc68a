//! 个体表面 -> fsLR 模板网格.
//!
//! 每个半球独立执行:
//!
//! 1. 厚度构建初始 ROI, 填洞, 去孤岛, 得到个体 ROI;
//! 2. 中间面按球面配准以重心坐标降采样到模板网格, 作为新网格的面积曲面;
//! 3. 条带约束投影 (可选 goodvoxels 体素 ROI), 测地膨胀, 个体 ROI 掩码;
//! 4. 面积自适应重心坐标重采样到模板网格, 模板 ROI 掩码.
//!
//! 两个半球并行, 结果按 `[L, R]` 位置返回, 不做合并.

use ndarray::{Array1, Array2};

use super::dilate::dilate_nearest;
use super::roi::{create_roi, fill_holes, mask_metric, remove_islands};
use super::{HemiPair, HemiSurfaces, Hemisphere, Mesh, SurfaceCatalog};
use crate::config::SurfaceConfig;
use crate::error::{ResampleError, Result};
use crate::flow::fan_out_join;
use crate::kernel::{AreaSurfaces, Interpolation, Ribbon, SurfaceKernel};
use crate::{Mask, Series};

/// 一个半球的 fsLR 结果.
#[derive(Clone, Debug)]
pub struct HemiFslr {
    /// 半球.
    pub hemisphere: Hemisphere,
    /// 个体网格上的皮层 ROI.
    pub native_roi: Array1<bool>,
    /// 降采样到模板网格的中间面.
    pub downsampled_midthickness: Mesh,
    /// 模板网格上的序列, `[vertex, t]`.
    pub bold_fslr: Array2<f32>,
    /// 模板网格上的皮层 ROI (不含内侧壁), 即 grayordinates 的表面部分.
    pub fslr_roi: Array1<bool>,
}

/// 检查面积曲面与对应球面的顶点数.
fn check_area(role: &'static str, sphere: &Mesh, area: &Mesh) -> Result<()> {
    if sphere.len() != area.len() {
        return Err(ResampleError::AreaMismatch {
            role,
            expected: sphere.len(),
            actual: area.len(),
        });
    }
    Ok(())
}

/// fsLR 重采样器.
pub struct FslrResampler<'a, K: ?Sized> {
    kernel: &'a K,
    config: SurfaceConfig,
}

impl<'a, K: SurfaceKernel + ?Sized> FslrResampler<'a, K> {
    /// 使用 `kernel` 完成投影与重采样.
    pub fn new(kernel: &'a K, config: SurfaceConfig) -> Self {
        Self { kernel, config }
    }

    /// 由厚度得到个体 ROI: 填洞后去孤岛.
    pub fn native_roi(&self, surfaces: &HemiSurfaces) -> Result<Array1<bool>> {
        let initial = create_roi(&surfaces.thickness);
        let filled = fill_holes(&initial, &surfaces.midthickness)?;
        remove_islands(&filled, &surfaces.midthickness)
    }

    /// 处理一个半球.
    pub fn resample_hemisphere(
        &self,
        series: &Series,
        surfaces: &HemiSurfaces,
        volume_roi: Option<&Mask>,
    ) -> Result<HemiFslr> {
        let hemi = surfaces.hemisphere;
        let native_roi = self.native_roi(surfaces)?;
        log::debug!(
            "[{hemi}] native roi: {} of {} vertices",
            native_roi.iter().filter(|v| **v).count(),
            native_roi.len()
        );

        let downsampled = self.kernel.resample_surface(
            &surfaces.midthickness,
            &surfaces.sphere_reg,
            &surfaces.template_sphere,
        )?;

        let ribbon = Ribbon {
            midthickness: &surfaces.midthickness,
            white: &surfaces.white,
            pial: &surfaces.pial,
        };
        let projected = self.kernel.volume_to_surface(series, ribbon, volume_roi)?;
        let dilated = dilate_nearest(
            &projected,
            &surfaces.midthickness,
            self.config.dilate_distance_mm,
        )?;
        let masked = mask_metric(&dilated, &native_roi)?;

        check_area("current_area", &surfaces.sphere_reg, &surfaces.midthickness)?;
        check_area("new_area", &surfaces.template_sphere, &downsampled)?;
        let resampled = self.kernel.resample_metric(
            &masked,
            &surfaces.sphere_reg,
            &surfaces.template_sphere,
            Some(AreaSurfaces {
                current: &surfaces.midthickness,
                new: &downsampled,
            }),
            Some(&native_roi),
            Interpolation::AdaptiveBarycentricArea,
        )?;
        let bold_fslr = mask_metric(&resampled, &surfaces.template_roi)?;
        log::info!("[{hemi}] resampled {} volumes to {} fsLR vertices", series.len(), bold_fslr.nrows());

        Ok(HemiFslr {
            hemisphere: hemi,
            native_roi,
            downsampled_midthickness: downsampled,
            bold_fslr,
            fslr_roi: surfaces.template_roi.clone(),
        })
    }

    /// 两个半球并行处理, 失败时错误标记为 `fslr[L]` 或 `fslr[R]`.
    pub fn resample(
        &self,
        series: &Series,
        catalog: &SurfaceCatalog,
        volume_roi: Option<&Mask>,
    ) -> Result<HemiPair<HemiFslr>> {
        let params: Vec<(String, Hemisphere)> = Hemisphere::BOTH
            .iter()
            .map(|h| (h.label().to_string(), *h))
            .collect();
        let joined = fan_out_join("fslr", &params, |hemi| {
            let surfaces = catalog.select(*hemi)?;
            self.resample_hemisphere(series, &surfaces, volume_roi)
        })?;
        HemiPair::try_from_vec(joined.into_items())
    }
}
