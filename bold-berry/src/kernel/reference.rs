use ndarray::{Array1, Array2, Array3, ArrayView3, Axis, Zip};

use super::{AreaSurfaces, Interpolation, KernelError, Ribbon, SurfaceKernel, VolumeKernel};
use crate::consts::surface::RIBBON_FRACTIONS;
use crate::surface::Mesh;
use crate::transform::TransformChain;
use crate::volume::sample;
use crate::{Grid, Idx3d, Mask, Point3, Series, Volume};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

const NAME: &str = "reference kernel";

type Sampler = fn(&ArrayView3<f32>, [f64; 3]) -> Option<f32>;

/// 内置参考内核.
///
/// 体数据支持最近邻, 三线性与多标签插值; 曲面操作全部基于球面上的最近顶点,
/// 面积自适应模式额外把当前网格的顶点按面积加权累积到最近的新顶点上.
/// 它没有实现 sinc 与真正的重心坐标插值, 只适合测试和小数据.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReferenceKernel;

impl ReferenceKernel {
    fn sampler(interpolation: Interpolation) -> Result<Sampler, KernelError> {
        match interpolation {
            Interpolation::Nearest => Ok(sample::nearest),
            Interpolation::Linear => Ok(sample::trilinear),
            Interpolation::MultiLabel => Ok(sample::majority),
            other => Err(KernelError::Unsupported {
                kernel: NAME,
                interpolation: other,
            }),
        }
    }
}

impl VolumeKernel for ReferenceKernel {
    fn apply(
        &self,
        moving: &Volume,
        reference: &Grid,
        chain: &TransformChain,
        interpolation: Interpolation,
    ) -> Result<Volume, KernelError> {
        let sampler = Self::sampler(interpolation)?;
        let src = moving.data();
        let src_grid = moving.grid();
        let mut out = Array3::<f32>::zeros(reference.shape());
        let zip = Zip::indexed(&mut out);
        let op = |idx: Idx3d, v: &mut f32| {
            let p = chain.pull(&reference.index_to_world(idx));
            *v = sampler(&src, src_grid.world_to_voxel(&p)).unwrap_or(0.0);
        };

        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                zip.par_for_each(op);
            } else {
                zip.for_each(op);
            }
        }
        Volume::new(reference.clone(), out).map_err(|e| KernelError::Failed(e.to_string()))
    }
}

/// 单位球面方向.
fn directions(mesh: &Mesh) -> Vec<Point3> {
    mesh.vertices()
        .iter()
        .map(|p| {
            let n = p.coords.norm();
            if n > 0.0 {
                Point3::from(p.coords / n)
            } else {
                *p
            }
        })
        .collect()
}

/// 对 `targets` 中每个点, 在 `candidates` 的有效点中找最近者.
fn nearest_indices(targets: &[Point3], candidates: &[Point3], valid: &[bool]) -> Vec<Option<usize>> {
    let find = |t: &Point3| -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| valid[*i])
            .min_by(|(_, a), (_, b)| (*a - t).norm_squared().total_cmp(&(*b - t).norm_squared()))
            .map(|(i, _)| i)
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            (0..targets.len()).into_par_iter().map(|i| find(&targets[i])).collect()
        } else {
            targets.iter().map(find).collect()
        }
    }
}

fn input_error(what: impl Into<String>) -> KernelError {
    KernelError::Input(what.into())
}

impl SurfaceKernel for ReferenceKernel {
    fn volume_to_surface(
        &self,
        series: &Series,
        ribbon: Ribbon<'_>,
        volume_roi: Option<&Mask>,
    ) -> Result<Array2<f32>, KernelError> {
        let n = ribbon.midthickness.len();
        if ribbon.white.len() != n || ribbon.pial.len() != n {
            return Err(input_error(format!(
                "ribbon surfaces have {}/{}/{} vertices",
                ribbon.white.len(),
                n,
                ribbon.pial.len()
            )));
        }
        if let Some(roi) = volume_roi {
            if !roi.grid().same_as(series.grid()) {
                return Err(input_error("volume roi is not on the series grid"));
            }
        }
        let grid = series.grid();

        // 每个顶点在白质面到软膜面之间的采样体素.
        let voxels: Vec<Vec<Idx3d>> = (0..n)
            .map(|v| {
                let w = ribbon.white.vertices()[v];
                let p = ribbon.pial.vertices()[v];
                let mut ans: Vec<Idx3d> = Vec::with_capacity(RIBBON_FRACTIONS.len());
                for f in RIBBON_FRACTIONS {
                    let q = w + (p - w) * f;
                    let [x, y, z] = grid.world_to_voxel(&q);
                    let (x, y, z) = (x.round(), y.round(), z.round());
                    if x < 0.0 || y < 0.0 || z < 0.0 {
                        continue;
                    }
                    let idx = (x as usize, y as usize, z as usize);
                    if grid.check(idx) && volume_roi.map_or(true, |roi| roi[idx]) {
                        ans.push(idx);
                    }
                }
                ans
            })
            .collect();

        let data = series.data();
        let out = Array2::from_shape_fn((n, series.len()), |(v, t)| {
            let vox = &voxels[v];
            if vox.is_empty() {
                return 0.0;
            }
            let frame = data.index_axis(Axis(0), t);
            vox.iter().map(|idx| frame[*idx]).sum::<f32>() / vox.len() as f32
        });
        Ok(out)
    }

    fn resample_surface(
        &self,
        surface: &Mesh,
        current_sphere: &Mesh,
        new_sphere: &Mesh,
    ) -> Result<Mesh, KernelError> {
        if surface.len() != current_sphere.len() {
            return Err(input_error(format!(
                "surface has {} vertices, current sphere has {}",
                surface.len(),
                current_sphere.len()
            )));
        }
        let valid = vec![true; current_sphere.len()];
        let nearest = nearest_indices(&directions(new_sphere), &directions(current_sphere), &valid);
        let vertices = nearest
            .into_iter()
            .map(|i| i.map_or(Point3::origin(), |i| surface.vertices()[i]))
            .collect();
        new_sphere
            .with_vertices(vertices)
            .map_err(|e| KernelError::Failed(e.to_string()))
    }

    fn resample_metric(
        &self,
        metric: &Array2<f32>,
        current_sphere: &Mesh,
        new_sphere: &Mesh,
        areas: Option<AreaSurfaces<'_>>,
        roi: Option<&Array1<bool>>,
        interpolation: Interpolation,
    ) -> Result<Array2<f32>, KernelError> {
        let adaptive = match interpolation {
            Interpolation::AdaptiveBarycentricArea => true,
            Interpolation::Barycentric | Interpolation::Nearest => false,
            other => {
                return Err(KernelError::Unsupported {
                    kernel: NAME,
                    interpolation: other,
                })
            }
        };
        let n_cur = current_sphere.len();
        if metric.len_of(Axis(0)) != n_cur {
            return Err(input_error(format!(
                "metric has {} rows, current sphere has {n_cur} vertices",
                metric.len_of(Axis(0))
            )));
        }
        let valid = match roi {
            Some(roi) if roi.len() != n_cur => {
                return Err(input_error(format!("roi has {} vertices, expected {n_cur}", roi.len())))
            }
            Some(roi) => roi.to_vec(),
            None => vec![true; n_cur],
        };
        if let Some(a) = areas {
            if a.current.len() != n_cur || a.new.len() != new_sphere.len() {
                return Err(input_error("area surfaces do not match the spheres"));
            }
        }

        let cur_dirs = directions(current_sphere);
        let new_dirs = directions(new_sphere);
        let n_new = new_sphere.len();
        let n_t = metric.len_of(Axis(1));
        let mut out = Array2::<f32>::zeros((n_new, n_t));
        let mut weight = vec![0.0f64; n_new];

        if let (true, Some(a)) = (adaptive, areas) {
            let cur_area = a.current.vertex_areas();
            let all_new = vec![true; n_new];
            let forward = nearest_indices(&cur_dirs, &new_dirs, &all_new);
            let mut acc = Array2::<f64>::zeros((n_new, n_t));
            for (c, target) in forward.into_iter().enumerate() {
                let Some(target) = target else { continue };
                if !valid[c] {
                    continue;
                }
                let w = cur_area[c];
                weight[target] += w;
                for t in 0..n_t {
                    acc[(target, t)] += w * metric[(c, t)] as f64;
                }
            }
            for v in (0..n_new).filter(|v| weight[*v] > 0.0) {
                for t in 0..n_t {
                    out[(v, t)] = (acc[(v, t)] / weight[v]) as f32;
                }
            }
        }

        let backward = nearest_indices(&new_dirs, &cur_dirs, &valid);
        for (v, src) in backward.into_iter().enumerate() {
            if weight[v] > 0.0 {
                continue;
            }
            if let Some(src) = src {
                out.row_mut(v).assign(&metric.row(src));
            }
        }
        Ok(out)
    }
}
