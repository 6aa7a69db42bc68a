use binary_heap_plus::BinaryHeap;
use ndarray::{Array2, Axis};

use super::Mesh;
use crate::error::{ResampleError, Result};

/// 一个顶点的整行数据为 0 或非有限值时视为未采样.
fn is_bad(row: ndarray::ArrayView1<f32>) -> bool {
    row.iter().all(|v| *v == 0.0 || !v.is_finite())
}

/// 最近值测地膨胀 (`-metric-dilate -nearest`).
///
/// 每个未采样顶点取沿网格边测地距离最近的已采样顶点的整行数据,
/// 距离超过 `distance_mm` 的顶点保持原值. `metric` 为 `[vertex, t]`.
pub fn dilate_nearest(metric: &Array2<f32>, mesh: &Mesh, distance_mm: f64) -> Result<Array2<f32>> {
    let n = metric.len_of(Axis(0));
    if n != mesh.len() {
        return Err(ResampleError::shape("metric dilation", &[mesh.len()], &[n]));
    }

    let bad: Vec<bool> = metric.axis_iter(Axis(0)).map(is_bad).collect();
    let mut best = vec![f64::INFINITY; n];
    let mut origin = vec![usize::MAX; n];

    // 堆顶距离最小.
    let mut heap: BinaryHeap<(f64, usize, usize), _> =
        BinaryHeap::new_by(|a: &(f64, usize, usize), b: &(f64, usize, usize)| b.0.total_cmp(&a.0));
    for v in (0..n).filter(|v| !bad[*v]) {
        best[v] = 0.0;
        origin[v] = v;
        heap.push((0.0, v, v));
    }

    while let Some((dist, v, src)) = heap.pop() {
        if dist > best[v] || dist > distance_mm {
            continue;
        }
        for &w in mesh.neighbours(v) {
            let d = dist + mesh.distance(v, w);
            if d <= distance_mm && d < best[w] {
                best[w] = d;
                origin[w] = src;
                heap.push((d, w, src));
            }
        }
    }

    let mut ans = metric.clone();
    let mut filled = 0usize;
    for v in (0..n).filter(|v| bad[*v] && origin[*v] != usize::MAX) {
        let src = metric.row(origin[v]).to_owned();
        ans.row_mut(v).assign(&src);
        filled += 1;
    }
    let left = bad.iter().filter(|b| **b).count() - filled;
    log::debug!("dilation filled {filled} vertices, {left} left beyond {distance_mm} mm");
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::testing::grid_mesh;

    #[test]
    fn test_fill_within_distance() {
        // 一行 10 个顶点, 间距 3 毫米.
        let mesh = grid_mesh(10, 3.0, 0.0);
        let mut m = Array2::zeros((mesh.len(), 2));
        m.row_mut(0).assign(&ndarray::arr1(&[5.0, 6.0]));
        m.row_mut(9).assign(&ndarray::arr1(&[-1.0, 2.0]));
        let out = dilate_nearest(&m, &mesh, 10.0).unwrap();

        // 顶点 3 距顶点 0 为 9 毫米.
        assert_eq!(out.row(3).to_vec(), vec![5.0, 6.0]);
        // 顶点 8 距顶点 9 为 3 毫米.
        assert_eq!(out.row(8).to_vec(), vec![-1.0, 2.0]);
        // 顶点 5 距两者都超过 10 毫米 (第一行内), 但沿对角线也够不到.
        assert_eq!(out.row(5).to_vec(), vec![0.0, 0.0]);
        // 原有数据不变.
        assert_eq!(out.row(0).to_vec(), vec![5.0, 6.0]);
    }

    #[test]
    fn test_nan_rows_are_bad() {
        let mesh = grid_mesh(2, 1.0, 0.0);
        let mut m = Array2::from_elem((4, 1), 1.0f32);
        m[(3, 0)] = f32::NAN;
        let out = dilate_nearest(&m, &mesh, 10.0).unwrap();
        assert_eq!(out[(3, 0)], 1.0);
    }
}
