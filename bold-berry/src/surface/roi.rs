//! 顶点 ROI: 由厚度构建, 填洞, 去孤岛, 以及对逐顶点序列做掩码.
//!
//! 连通区域按网格边的邻接关系划分, 大小按顶点面积 (来自中间面) 衡量.
//! 面积相同的区域之间, 最小顶点编号较小者视为更大.

use std::collections::VecDeque;

use ndarray::{Array1, Array2, Axis};

use super::Mesh;
use crate::error::{ResampleError, Result};

/// 由厚度构建初始 ROI: 厚度有限且非零的顶点为皮层.
pub fn create_roi(thickness: &Array1<f32>) -> Array1<bool> {
    thickness.mapv(|v| v.is_finite() && v != 0.0)
}

/// 按广度优先划分满足 `pred` 的连通区域. 区域按最小顶点编号升序排列.
pub fn components<P: Fn(usize) -> bool>(mesh: &Mesh, pred: P) -> Vec<Vec<usize>> {
    let mut ans = Vec::new();
    let mut visited = vec![false; mesh.len()];
    let mut bfs_q = VecDeque::with_capacity(16);

    for start in 0..mesh.len() {
        if visited[start] || !pred(start) {
            continue;
        }
        visited[start] = true;
        bfs_q.push_back(start);
        let mut this_area = Vec::with_capacity(16);
        while let Some(cur) = bfs_q.pop_front() {
            this_area.push(cur);
            for &n in mesh.neighbours(cur) {
                if !visited[n] && pred(n) {
                    visited[n] = true;
                    bfs_q.push_back(n);
                }
            }
        }
        ans.push(this_area);
    }
    ans
}

/// 面积最大区域的下标.
fn largest(areas: &[Vec<usize>], vertex_areas: &Array1<f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, area) in areas.iter().enumerate() {
        let size: f64 = area.iter().map(|v| vertex_areas[*v]).sum();
        if best.map_or(true, |(_, s)| size > s) {
            best = Some((i, size));
        }
    }
    best.map(|(i, _)| i)
}

fn check_len(what: &str, roi: &Array1<bool>, mesh: &Mesh) -> Result<()> {
    if roi.len() != mesh.len() {
        return Err(ResampleError::shape(what, &[mesh.len()], &[roi.len()]));
    }
    Ok(())
}

/// 填补 ROI 中的洞 (拓扑填充, 不插值).
///
/// 闭合网格上, 面积最大的非 ROI 区域被视为内侧壁而保留, 其余非 ROI 区域并入 ROI.
/// 开放网格上, 内侧壁已被切除 (表现为网格边界), 所有非 ROI 区域都是洞.
pub fn fill_holes(roi: &Array1<bool>, mesh: &Mesh) -> Result<Array1<bool>> {
    check_len("roi for hole filling", roi, mesh)?;
    let holes = components(mesh, |v| !roi[v]);
    let keep = if mesh.is_open() {
        None
    } else {
        largest(&holes, &mesh.vertex_areas())
    };
    let mut ans = roi.clone();
    let mut filled = 0;
    for (i, hole) in holes.iter().enumerate() {
        if Some(i) == keep {
            continue;
        }
        filled += hole.len();
        for &v in hole {
            ans[v] = true;
        }
    }
    log::debug!("filled {filled} vertices in {} non-roi areas", holes.len());
    Ok(ans)
}

/// 去除 ROI 中的孤岛: 只保留面积最大的 ROI 连通区域.
pub fn remove_islands(roi: &Array1<bool>, mesh: &Mesh) -> Result<Array1<bool>> {
    check_len("roi for island removal", roi, mesh)?;
    let areas = components(mesh, |v| roi[v]);
    let mut ans = Array1::from_elem(roi.len(), false);
    if let Some(keep) = largest(&areas, &mesh.vertex_areas()) {
        for &v in &areas[keep] {
            ans[v] = true;
        }
        log::debug!("kept 1 of {} roi areas", areas.len());
    }
    Ok(ans)
}

/// ROI 之外的顶点整行置零. `metric` 为 `[vertex, t]`.
pub fn mask_metric(metric: &Array2<f32>, roi: &Array1<bool>) -> Result<Array2<f32>> {
    if metric.len_of(Axis(0)) != roi.len() {
        return Err(ResampleError::shape(
            "metric mask",
            &[roi.len()],
            &[metric.len_of(Axis(0))],
        ));
    }
    let mut ans = metric.clone();
    for (mut row, keep) in ans.axis_iter_mut(Axis(0)).zip(roi.iter()) {
        if !*keep {
            row.fill(0.0);
        }
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::testing::grid_mesh;
    use crate::Point3;

    /// 闭合的 "枕头" 网格: 顶面 `n x n` 网格, 底面共享边界, 内部顶点下沉到 `z = -1`.
    fn pillow(n: usize) -> Mesh {
        let top = grid_mesh(n, 1.0, 0.0);
        let mut vertices = top.vertices().to_vec();
        let bottom = |r: usize, c: usize| -> usize {
            if r == 0 || c == 0 || r == n - 1 || c == n - 1 {
                r * n + c
            } else {
                n * n + (r - 1) * (n - 2) + (c - 1)
            }
        };
        for r in 1..n - 1 {
            for c in 1..n - 1 {
                vertices.push(Point3::new(c as f64, r as f64, -1.0));
            }
        }
        let mut faces = top.faces().to_vec();
        for r in 0..n - 1 {
            for c in 0..n - 1 {
                let (a, b, d, e) = (bottom(r, c), bottom(r, c + 1), bottom(r + 1, c), bottom(r + 1, c + 1));
                faces.push([a, d, b]);
                faces.push([b, d, e]);
            }
        }
        Mesh::new(vertices, faces).unwrap()
    }

    /// 顶面为皮层, 底面内部为内侧壁.
    fn cortex(mesh: &Mesh, n: usize) -> Array1<bool> {
        Array1::from_shape_fn(mesh.len(), |v| v < n * n)
    }

    #[test]
    fn test_create_roi() {
        let t = Array1::from_vec(vec![2.5, 0.0, f32::NAN, 1.0]);
        assert_eq!(create_roi(&t).to_vec(), vec![true, false, false, true]);
    }

    #[test]
    fn test_punctured_triangle_round_trip_closed() {
        let n = 7;
        let mesh = pillow(n);
        assert!(!mesh.is_open());
        let clean = cortex(&mesh, n);

        // 在顶面内部刺穿一个三角形.
        let a = 2 * n + 2;
        let mut punctured = clean.clone();
        for v in [a, a + 1, a + n] {
            punctured[v] = false;
        }
        let filled = fill_holes(&punctured, &mesh).unwrap();
        let restored = remove_islands(&filled, &mesh).unwrap();
        assert_eq!(restored, clean);
        assert_eq!(components(&mesh, |v| restored[v]).len(), 1);
    }

    #[test]
    fn test_punctured_triangle_round_trip_open() {
        let mesh = grid_mesh(6, 1.0, 0.0);
        let clean = Array1::from_elem(mesh.len(), true);
        let mut punctured = clean.clone();
        for v in [8, 9, 14] {
            punctured[v] = false;
        }
        let restored = remove_islands(&fill_holes(&punctured, &mesh).unwrap(), &mesh).unwrap();
        assert_eq!(restored, clean);
    }

    #[test]
    fn test_island_removed() {
        let n = 7;
        let mesh = pillow(n);
        let mut roi = cortex(&mesh, n);
        // 内侧壁中间的孤立 ROI 顶点.
        let island = n * n + (n - 2) * (n - 2) / 2;
        roi[island] = true;
        let pruned = remove_islands(&roi, &mesh).unwrap();
        assert!(!pruned[island]);
        assert_eq!(pruned, cortex(&mesh, n));
        // 填洞不会吞掉内侧壁.
        let filled = fill_holes(&cortex(&mesh, n), &mesh).unwrap();
        assert_eq!(filled, cortex(&mesh, n));
    }

    #[test]
    fn test_mask_metric() {
        let m = Array2::from_elem((3, 2), 1.5f32);
        let roi = Array1::from_vec(vec![true, false, true]);
        let out = mask_metric(&m, &roi).unwrap();
        assert_eq!(out.row(1).to_vec(), vec![0.0, 0.0]);
        assert_eq!(out.row(2).to_vec(), vec![1.5, 1.5]);
        assert!(mask_metric(&m, &Array1::from_vec(vec![true])).is_err());
    }
}
