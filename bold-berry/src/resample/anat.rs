use super::{resample_series, BoldTransforms};
use crate::config::ResampleConfig;
use crate::error::Result;
use crate::kernel::VolumeKernel;
use crate::template::sampling_reference;
use crate::{Grid, Series};

/// 结构像空间重采样: `[hmc, sdc?, bold2t1]`, 网格取结构像视野与 BOLD 体素尺寸.
///
/// 结果是表面投影与 goodvoxels 的输入.
pub struct AnatResampler<'a, K: ?Sized> {
    kernel: &'a K,
    config: ResampleConfig,
}

impl<'a, K: VolumeKernel + ?Sized> AnatResampler<'a, K> {
    /// 创建.
    pub fn new(kernel: &'a K, config: ResampleConfig) -> Self {
        Self { kernel, config }
    }

    /// 执行.
    pub fn run(&self, series: &Series, transforms: &BoldTransforms, anat_grid: &Grid) -> Result<Series> {
        let chains = transforms.series_chain(series.len(), &[&transforms.bold_to_t1w])?;
        let reference = sampling_reference(anat_grid, series.grid(), true)?;
        log::info!(
            "resampling {} volumes to T1w at {:?} mm",
            series.len(),
            reference.zooms()
        );
        resample_series(self.kernel, series, &chains, &reference, self.config.bold)
    }
}
