//! 连续体素坐标处的采样.
//!
//! 落在网格之外 (超出 `[0, n - 1]` 加容差) 的坐标统一返回 `None`,
//! 由调用方决定填充值.

use std::collections::BTreeMap;

use ndarray::ArrayView3;
use ordered_float::NotNan;

const EDGE_TOLERANCE: f64 = 1e-6;

/// 八个角点及其三线性权重.
fn corners(data: &ArrayView3<f32>, [x, y, z]: [f64; 3]) -> Option<[((usize, usize, usize), f64); 8]> {
    let shape = data.shape();
    let mut base = [0usize; 3];
    let mut frac = [0f64; 3];
    for (axis, c) in [x, y, z].into_iter().enumerate() {
        let hi = (shape[axis] - 1) as f64;
        if !c.is_finite() || c < -EDGE_TOLERANCE || c > hi + EDGE_TOLERANCE {
            return None;
        }
        let c = c.clamp(0.0, hi);
        let f = c.floor();
        base[axis] = f as usize;
        frac[axis] = c - f;
    }
    let mut ans = [((0, 0, 0), 0.0); 8];
    for (n, slot) in ans.iter_mut().enumerate() {
        let mut idx = [0usize; 3];
        let mut w = 1.0;
        for axis in 0..3 {
            let up = (n >> axis) & 1 == 1;
            idx[axis] = if up {
                (base[axis] + 1).min(shape[axis] - 1)
            } else {
                base[axis]
            };
            w *= if up { frac[axis] } else { 1.0 - frac[axis] };
        }
        *slot = ((idx[0], idx[1], idx[2]), w);
    }
    Some(ans)
}

/// 最近邻采样.
pub fn nearest(data: &ArrayView3<f32>, [x, y, z]: [f64; 3]) -> Option<f32> {
    let shape = data.shape();
    let mut idx = [0usize; 3];
    for (axis, c) in [x, y, z].into_iter().enumerate() {
        let r = c.round();
        if !r.is_finite() || r < 0.0 || r > (shape[axis] - 1) as f64 {
            return None;
        }
        idx[axis] = r as usize;
    }
    Some(data[(idx[0], idx[1], idx[2])])
}

/// 三线性插值.
pub fn trilinear(data: &ArrayView3<f32>, p: [f64; 3]) -> Option<f32> {
    let cs = corners(data, p)?;
    let acc: f64 = cs.iter().map(|(idx, w)| *w * data[*idx] as f64).sum();
    Some(acc as f32)
}

/// 多标签采样: 八个角点按三线性权重投票, 权重最大的标签胜出,
/// 并列时取较小标签. 结果总是输入中已有的值.
pub fn majority(data: &ArrayView3<f32>, p: [f64; 3]) -> Option<f32> {
    let cs = corners(data, p)?;
    let mut votes: BTreeMap<NotNan<f32>, f64> = BTreeMap::new();
    for (idx, w) in cs.iter() {
        if *w <= 0.0 {
            continue;
        }
        if let Ok(label) = NotNan::new(data[*idx]) {
            *votes.entry(label).or_default() += *w;
        }
    }
    let mut best: Option<(NotNan<f32>, f64)> = None;
    for (label, w) in votes {
        if best.map_or(true, |(_, bw)| w > bw + 1e-12) {
            best = Some((label, w));
        }
    }
    best.map(|(label, _)| label.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> Array3<f32> {
        Array3::from_shape_fn((3, 3, 3), |(i, j, k)| (i * 9 + j * 3 + k) as f32)
    }

    #[test]
    fn test_trilinear_exact_on_linear_field() {
        let a = ramp();
        let v = a.view();
        assert_eq!(trilinear(&v, [1.0, 1.0, 1.0]), Some(13.0));
        let x = trilinear(&v, [0.5, 1.5, 0.25]).unwrap();
        assert!((x - (4.5 + 4.5 + 0.25)).abs() < 1e-5);
        assert_eq!(trilinear(&v, [2.0, 2.0, 2.0]), Some(26.0));
        assert_eq!(trilinear(&v, [2.5, 0.0, 0.0]), None);
        assert_eq!(trilinear(&v, [-0.1, 0.0, 0.0]), None);
    }

    #[test]
    fn test_nearest() {
        let a = ramp();
        let v = a.view();
        assert_eq!(nearest(&v, [0.4, 0.6, 1.49]), Some(4.0));
        assert_eq!(nearest(&v, [2.6, 0.0, 0.0]), None);
    }

    #[test]
    fn test_majority_returns_existing_label() {
        let mut a = Array3::zeros((2, 2, 2));
        a[(1, 0, 0)] = 7.0;
        a[(1, 1, 0)] = 7.0;
        a[(1, 0, 1)] = 7.0;
        let v = a.view();
        // 正中心: 0 有 5 票, 7 有 3 票.
        assert_eq!(majority(&v, [0.5, 0.5, 0.5]), Some(0.0));
        // 靠近 i = 1 面时 7 胜出.
        assert_eq!(majority(&v, [0.9, 0.2, 0.2]), Some(7.0));
    }
}
