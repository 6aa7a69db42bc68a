use super::{resample_series, BoldTransforms};
use crate::config::ResampleConfig;
use crate::error::Result;
use crate::kernel::VolumeKernel;
use crate::volume::stats::temporal_mean;
use crate::{Series, Volume};

/// 原始采集空间的结果.
#[derive(Clone, Debug)]
pub struct NativeOutputs {
    /// 头动 (与畸变) 校正后的序列, 位于 BOLD 参考帧.
    pub bold: Series,
    /// 时间均值参考图.
    pub bold_ref: Volume,
}

/// 原始采集空间重采样: 只合成 `[hmc, sdc?]`, 参考网格为 BOLD 自身的网格.
pub struct NativeResampler<'a, K: ?Sized> {
    kernel: &'a K,
    config: ResampleConfig,
}

impl<'a, K: VolumeKernel + ?Sized> NativeResampler<'a, K> {
    /// 创建.
    pub fn new(kernel: &'a K, config: ResampleConfig) -> Self {
        Self { kernel, config }
    }

    /// 执行.
    pub fn run(&self, series: &Series, transforms: &BoldTransforms) -> Result<NativeOutputs> {
        let chains = transforms.series_chain(series.len(), &[])?;
        log::info!(
            "resampling {} volumes in native space (sdc: {})",
            series.len(),
            transforms.fieldwarp.is_some()
        );
        let bold = resample_series(self.kernel, series, &chains, series.grid(), self.config.bold)?;
        let bold_ref = temporal_mean(&bold);
        Ok(NativeOutputs { bold, bold_ref })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::frame::BOLD_REF;
    use crate::kernel::{Interpolation, ReferenceKernel};
    use crate::resample::testing::{bold, identity_transforms, CountingKernel};
    use crate::transform::{DisplacementField, Transform};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn config() -> ResampleConfig {
        ResampleConfig::default().with_bold(Interpolation::Linear)
    }

    #[test]
    fn test_identity_is_lossless() {
        let s = bold(4);
        let kernel = CountingKernel::default();
        let out = NativeResampler::new(&kernel, config())
            .run(&s, &identity_transforms(4))
            .unwrap();
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 4);
        assert_eq!(out.bold.data(), s.data());
        // 均值: i + 10 * 1.5.
        assert!((out.bold_ref[(2, 0, 0)] - 17.0).abs() < 1e-5);
    }

    #[test]
    fn test_fieldwarp_applied_once() {
        let s = bold(2);
        let mut t = identity_transforms(2);
        let field = DisplacementField::uniform(s.grid().clone(), [2.0, 0.0, 0.0]);
        t.fieldwarp = Some(Transform::field(BOLD_REF, BOLD_REF, Arc::new(field)));
        let out = NativeResampler::new(&ReferenceKernel, config()).run(&s, &t).unwrap();
        // 位移场把每个点拉回 +2mm, 即下一个体素.
        assert!((out.bold.frame(0)[(1, 3, 3)] - 2.0).abs() < 1e-5);
        assert!((out.bold.frame(1)[(4, 3, 3)] - 15.0).abs() < 1e-5);
        // 最后一个体素拉出视野, 填 0.
        assert_eq!(out.bold.frame(1)[(5, 3, 3)], 0.0);
    }

    #[test]
    fn test_motion_frame_mismatch_fails_before_resampling() {
        let s = bold(3);
        let kernel = CountingKernel::default();
        let err = NativeResampler::new(&kernel, config())
            .run(&s, &identity_transforms(2))
            .unwrap_err();
        assert!(matches!(err, crate::ResampleError::Composition(_)));
        assert_eq!(kernel.calls.load(Ordering::SeqCst), 0);
    }
}
