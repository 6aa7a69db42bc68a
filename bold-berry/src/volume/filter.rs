//! 体数据滤波: 毫米尺度的高斯平滑, 众数膨胀与负值截断.

use std::collections::BTreeMap;

use ndarray::{Array1, Array3, ArrayViewMut1, Axis, Zip};
use ordered_float::NotNan;

use super::Volume;
use crate::Idx3d;

/// 一维归一化高斯核, 半径取 `ceil(3 sigma)`.
fn gaussian_kernel(sigma_vox: f64) -> Array1<f64> {
    let radius = (3.0 * sigma_vox).ceil().max(1.0) as isize;
    let mut kernel = Array1::from_shape_fn((2 * radius + 1) as usize, |i| {
        let x = (i as isize - radius) as f64;
        (-0.5 * (x / sigma_vox).powi(2)).exp()
    });
    let sum = kernel.sum();
    kernel /= sum;
    kernel
}

/// 在一条体素线上做零填充卷积.
fn convolve_lane(mut lane: ArrayViewMut1<f32>, kernel: &Array1<f64>) {
    let n = lane.len() as isize;
    let radius = (kernel.len() / 2) as isize;
    let src = lane.to_owned();
    for i in 0..n {
        let mut acc = 0.0f64;
        for (k, w) in kernel.iter().enumerate() {
            let j = i + k as isize - radius;
            if (0..n).contains(&j) {
                acc += *w * src[j as usize] as f64;
            }
        }
        lane[i as usize] = acc as f32;
    }
}

/// 各向同性高斯平滑, `sigma_mm` 为毫米单位的标准差 (`fslmaths -s`).
///
/// 每个轴按体素尺寸换算核宽度, 视野外视为 0. 因此边缘会被压低,
/// 需要时请用平滑后的掩码做归一化.
pub fn gaussian_smooth(volume: &Volume, sigma_mm: f64) -> Volume {
    let mut data = volume.data().to_owned();
    if sigma_mm <= 0.0 {
        return Volume {
            grid: volume.grid().clone(),
            data,
        };
    }
    let zooms = volume.grid().zooms();
    for (axis, zoom) in zooms.iter().enumerate() {
        let kernel = gaussian_kernel(sigma_mm / zoom);
        let lanes = Zip::from(data.lanes_mut(Axis(axis)));

        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                lanes.par_for_each(|lane| convolve_lane(lane, &kernel));
            } else {
                lanes.for_each(|lane| convolve_lane(lane, &kernel));
            }
        }
    }
    Volume {
        grid: volume.grid().clone(),
        data,
    }
}

/// 26 邻域 (不含自身) 中合法的邻居.
fn neighbors26((i, j, k): Idx3d, (si, sj, sk): Idx3d) -> impl Iterator<Item = Idx3d> {
    itertools::iproduct!(-1isize..=1, -1isize..=1, -1isize..=1)
        .filter(|d| *d != (0, 0, 0))
        .filter_map(move |(di, dj, dk)| {
            let (a, b, c) = (i as isize + di, j as isize + dj, k as isize + dk);
            if a < 0 || b < 0 || c < 0 {
                return None;
            }
            let (a, b, c) = (a as usize, b as usize, c as usize);
            (a < si && b < sj && c < sk).then_some((a, b, c))
        })
}

/// 众数膨胀 (`fslmaths -dilD`).
///
/// 每个值为 0 的体素取其 26 邻域内非零值的众数; 出现次数并列时取最小值.
/// 没有非零邻居的体素保持 0. 只膨胀一层.
pub fn modal_dilate(volume: &Volume) -> Volume {
    let src = volume.data();
    let shape = volume.grid().shape();
    let data = Array3::from_shape_fn(shape, |idx| {
        let v = src[idx];
        if v != 0.0 {
            return v;
        }
        let mut votes: BTreeMap<NotNan<f32>, usize> = BTreeMap::new();
        for n in neighbors26(idx, shape) {
            if let Ok(key) = NotNan::new(src[n]) {
                if *key != 0.0 {
                    *votes.entry(key).or_default() += 1;
                }
            }
        }
        // 升序遍历, 只在严格更多时替换, 并列自然保留较小值.
        let mut best: Option<(NotNan<f32>, usize)> = None;
        for (key, cnt) in votes {
            if best.map_or(true, |(_, c)| cnt > c) {
                best = Some((key, cnt));
            }
        }
        best.map_or(0.0, |(key, _)| key.into_inner())
    });
    Volume {
        grid: volume.grid().clone(),
        data,
    }
}

/// 原地把负值截断为 0. 非有限值保持不变.
pub fn clip_negative(volume: &mut Volume) {
    volume.data_mut().mapv_inplace(|v| if v < 0.0 { 0.0 } else { v });
}
