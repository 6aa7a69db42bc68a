//! 时间轴与掩码内的标量统计.
//!
//! 掩码统计只统计 **掩码内且非零** 的体素 (`fslstats -M / -S` 语义):
//! 掩码外的体素被忽略, 而不是置零后参与平均.

use ndarray::{Array3, ArrayView3, Axis, Zip};
use num::Float;

use super::{Mask, Series, Volume};
use crate::consts::goodvoxels::DIV_EPSILON;
use crate::error::{ResampleError, Result};

/// 均值与样本标准差.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeanStd {
    /// 均值.
    pub mean: f64,
    /// 样本标准差 (`n - 1` 归一化). 只有一个样本时为 0.
    pub std: f64,
    /// 参与统计的样本数.
    pub count: usize,
}

/// 计算一组数的均值与样本标准差. 空输入返回 `None`.
pub fn mean_std<T: Float, I: IntoIterator<Item = T>>(it: I) -> Option<MeanStd> {
    // Welford.
    let mut count = 0usize;
    let mut mean = 0.0f64;
    let mut m2 = 0.0f64;
    for x in it.into_iter() {
        let x = x.to_f64()?;
        count += 1;
        let delta = x - mean;
        mean += delta / count as f64;
        m2 += delta * (x - mean);
    }
    if count == 0 {
        return None;
    }
    let std = if count > 1 {
        (m2 / (count - 1) as f64).sqrt()
    } else {
        0.0
    };
    Some(MeanStd { mean, std, count })
}

/// 逐体素的时间均值.
pub fn temporal_mean(series: &Series) -> Volume {
    let data = series
        .data()
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array3::zeros(series.grid().shape()));
    volume_unchecked(series, data)
}

/// 逐体素的时间样本标准差 (`n - 1` 归一化, 单帧时为 0).
pub fn temporal_std(series: &Series) -> Volume {
    let ddof = if series.len() > 1 { 1.0 } else { 0.0 };
    let data = series.data().std_axis(Axis(0), ddof);
    volume_unchecked(series, data)
}

/// 由序列的网格直接包装体数据. 调用方保证形状一致.
fn volume_unchecked(series: &Series, data: Array3<f32>) -> Volume {
    Volume {
        grid: series.grid().clone(),
        data,
    }
}

/// 掩码内非零体素的均值与样本标准差. 没有符合条件的体素时返回 `None`.
pub fn masked_nonzero_stats(values: &Volume, mask: &Mask) -> Result<Option<MeanStd>> {
    if !values.grid().same_as(mask.grid()) {
        return Err(ResampleError::shape(
            "masked statistics",
            &values.grid().dims(),
            &mask.grid().dims(),
        ));
    }
    Ok(mean_std(
        values
            .data()
            .iter()
            .zip(mask.data().iter())
            .filter(|(v, m)| **m && **v != 0.0 && v.is_finite())
            .map(|(v, _)| *v),
    ))
}

/// 逐元素除法. 除数绝对值不大于 [`DIV_EPSILON`] 时商为 0.
#[inline]
pub fn safe_div(num: f32, den: f32) -> f32 {
    if den.abs() <= DIV_EPSILON || !den.is_finite() {
        0.0
    } else {
        num / den
    }
}

/// 两个同网格体数据逐元素相除, 见 [`safe_div`].
pub fn divide(num: &Volume, den: &Volume) -> Result<Volume> {
    if !num.grid().same_as(den.grid()) {
        return Err(ResampleError::shape(
            "division operand",
            &num.grid().dims(),
            &den.grid().dims(),
        ));
    }
    let data = Zip::from(num.data())
        .and(den.data())
        .map_collect(|a, b| safe_div(*a, *b));
    Ok(Volume {
        grid: num.grid().clone(),
        data,
    })
}

/// 体数据除以标量, 见 [`safe_div`].
pub fn divide_scalar(num: &Volume, den: f64) -> Volume {
    let den = den as f32;
    Volume {
        grid: num.grid().clone(),
        data: num.data().mapv(|a| safe_div(a, den)),
    }
}

/// 掩码外的体素置零 (`fslmaths -mas`).
pub fn apply_mask(values: &Volume, mask: &Mask) -> Result<Volume> {
    if !values.grid().same_as(mask.grid()) {
        return Err(ResampleError::shape(
            "mask operand",
            &values.grid().dims(),
            &mask.grid().dims(),
        ));
    }
    let data = Zip::from(values.data())
        .and(mask.data())
        .map_collect(|v, m| if *m { *v } else { 0.0 });
    Ok(Volume {
        grid: values.grid().clone(),
        data,
    })
}

/// 以 `> 0` 二值化 (`fslmaths -bin`), 结果仍为 0/1 体数据.
pub fn binarize(values: ArrayView3<f32>) -> Array3<f32> {
    values.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Grid;
    use ndarray::{Array3, Array4};

    fn grid() -> Grid {
        Grid::from_zooms((2, 2, 1), [1.0; 3], [0.0; 3]).unwrap()
    }

    #[test]
    fn test_mean_std() {
        let s = mean_std([2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((s.mean - 5.0).abs() < 1e-12);
        // 样本标准差: sqrt(32 / 7).
        assert!((s.std - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(mean_std(Vec::<f32>::new()), None);
        assert_eq!(mean_std([3.0f32]).unwrap().std, 0.0);
    }

    #[test]
    fn test_masked_stats_ignore_outside_and_zero() {
        let g = grid();
        let v = Volume::new(g.clone(), Array3::from_shape_vec((2, 2, 1), vec![1.0, 3.0, 0.0, 100.0]).unwrap()).unwrap();
        let m = Mask::new(g, Array3::from_shape_vec((2, 2, 1), vec![true, true, true, false]).unwrap()).unwrap();
        let s = masked_nonzero_stats(&v, &m).unwrap().unwrap();
        // 只统计 1.0 和 3.0.
        assert_eq!(s.count, 2);
        assert!((s.mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_temporal_stats_and_guarded_division() {
        let g = grid();
        let data = Array4::from_shape_vec(
            (2, 2, 2, 1),
            vec![1.0, 0.0, 5.0, 2.0, 3.0, 0.0, 5.0, 4.0],
        )
        .unwrap();
        let s = Series::new(g, data).unwrap();
        let mean = temporal_mean(&s);
        let std = temporal_std(&s);
        assert_eq!(mean[(0, 0, 0)], 2.0);
        assert_eq!(mean[(0, 1, 0)], 0.0);
        assert!((std[(0, 0, 0)] - 2.0f32.sqrt()).abs() < 1e-6);

        let cov = divide(&std, &mean).unwrap();
        // 均值为 0 的体素: 商定义为 0, 不产生 NaN/inf.
        assert_eq!(cov[(0, 1, 0)], 0.0);
        assert_eq!(cov[(1, 0, 0)], 0.0);
        assert!(cov.data().iter().all(|v| v.is_finite()));
    }
}
