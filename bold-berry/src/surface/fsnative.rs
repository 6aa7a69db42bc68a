//! FreeSurfer 表面空间 (`fsnative`, `fsaverage*`) 采样.
//!
//! 每个顶点在白质面到软膜面之间等间隔采样六个点再取平均. 个体曲面位于 FreeSurfer
//! 个体空间, 序列位于结构像空间, 二者之间的 ITK 仿射先以 (序列网格, 个体 T1 网格)
//! 为参考几何转换为 LTA, 再把曲面拉回结构像空间. `fsaverage*` 目标在个体表面上采样后,
//! 按球面配准重采样到目标网格.

use std::sync::Arc;

use ndarray::{Array1, Array2};

use super::{HemiPair, Hemisphere, Mesh, SurfaceCatalog, SurfaceRole};
use crate::config::SurfaceConfig;
use crate::consts::frame::{FSNATIVE, T1W};
use crate::consts::space;
use crate::error::{ResampleError, Result};
use crate::flow::{fan_out_join, Joined};
use crate::kernel::{Interpolation, Ribbon, SurfaceKernel};
use crate::space::KeyedMap;
use crate::transform::{itk_to_lta, ItkAffine, Transform};
use crate::{Grid, Series};

/// 个体的 FreeSurfer 重建.
#[derive(Clone, Debug)]
pub struct FsSubject {
    /// 结构像到 FreeSurfer 个体空间的 ITK 仿射.
    pub t1w_to_fsnative: ItkAffine,
    /// FreeSurfer 个体 T1 的网格.
    pub fsnative_grid: Grid,
    /// 个体曲面 (`White`, `Pial`, `SphereReg`, 可选 `Midthickness`), 位于个体空间.
    pub surfaces: SurfaceCatalog,
    /// 个体皮层标签, 内侧壁置 NaN 时使用.
    pub cortex: Option<HemiPair<Array1<bool>>>,
}

/// 一个 `fsaverage*` 目标.
#[derive(Clone, Debug)]
pub struct FsTarget {
    /// 目标球面.
    pub sphere: HemiPair<Arc<Mesh>>,
    /// 目标皮层标签, 内侧壁置 NaN 时使用.
    pub cortex: Option<HemiPair<Array1<bool>>>,
}

/// 内侧壁 (不在 `cortex` 中的顶点) 置为 NaN.
pub fn medial_nans(metric: &mut Array2<f32>, cortex: &Array1<bool>) -> Result<()> {
    if metric.nrows() != cortex.len() {
        return Err(ResampleError::shape("medial wall", &[cortex.len()], &[metric.nrows()]));
    }
    for (mut row, keep) in metric.rows_mut().into_iter().zip(cortex.iter()) {
        if !*keep {
            row.fill(f32::NAN);
        }
    }
    Ok(())
}

/// FreeSurfer 表面采样器.
pub struct FsSurfaceSampler<'a, K: ?Sized> {
    kernel: &'a K,
    config: SurfaceConfig,
    targets: KeyedMap<FsTarget>,
}

impl<'a, K: SurfaceKernel + ?Sized> FsSurfaceSampler<'a, K> {
    /// `targets` 提供 `fsaverage*` 目标, 以空间名为键.
    pub fn new(kernel: &'a K, config: SurfaceConfig, targets: KeyedMap<FsTarget>) -> Self {
        Self {
            kernel,
            config,
            targets,
        }
    }

    /// 个体曲面拉回到结构像空间.
    fn to_t1w(mesh: &Mesh, t1w_to_fs: &Transform) -> Result<Mesh> {
        mesh.with_vertices(mesh.vertices().iter().map(|p| t1w_to_fs.pull(p)).collect())
    }

    /// 在个体表面上采样一个半球.
    fn sample_native(
        &self,
        series: &Series,
        subject: &FsSubject,
        t1w_to_fs: &Transform,
        hemi: Hemisphere,
    ) -> Result<Array2<f32>> {
        let white = Self::to_t1w(&*subject.surfaces.mesh(hemi, SurfaceRole::White)?, t1w_to_fs)?;
        let pial = Self::to_t1w(&*subject.surfaces.mesh(hemi, SurfaceRole::Pial)?, t1w_to_fs)?;
        // 输出挂在个体网格顶点上. 没有中间面时以白质面作为输出曲面, 三者顶点一一对应.
        let midthickness = match subject.surfaces.mesh(hemi, SurfaceRole::Midthickness) {
            Ok(mesh) => Some(Self::to_t1w(&mesh, t1w_to_fs)?),
            Err(_) => None,
        };
        let ribbon = Ribbon {
            midthickness: midthickness.as_ref().unwrap_or(&white),
            white: &white,
            pial: &pial,
        };
        Ok(self.kernel.volume_to_surface(series, ribbon, None)?)
    }

    /// 采样到一个目标空间, 两个半球按 `[L, R]` 返回.
    pub fn sample_target(
        &self,
        series: &Series,
        subject: &FsSubject,
        target: &str,
    ) -> Result<HemiPair<Array2<f32>>> {
        let lta = itk_to_lta(&subject.t1w_to_fsnative, series.grid(), &subject.fsnative_grid)?;
        let t1w_to_fs = lta.to_transform(T1W, FSNATIVE)?;
        let fs_target = if target == space::FSNATIVE {
            None
        } else {
            Some(self.targets.get(target)?)
        };

        HemiPair::try_from_fn(|hemi| {
            let native = self.sample_native(series, subject, &t1w_to_fs, hemi)?;
            let (mut out, cortex) = match fs_target {
                None => (native, subject.cortex.as_ref()),
                Some(t) => {
                    let sphere_reg = subject.surfaces.mesh(hemi, SurfaceRole::SphereReg)?;
                    let out = self.kernel.resample_metric(
                        &native,
                        &sphere_reg,
                        t.sphere.get(hemi),
                        None,
                        None,
                        Interpolation::Barycentric,
                    )?;
                    (out, t.cortex.as_ref())
                }
            };
            if self.config.medial_surface_nan {
                match cortex {
                    Some(c) => medial_nans(&mut out, c.get(hemi))?,
                    None => log::warn!("[{target}/{hemi}] no cortex label, medial wall kept"),
                }
            }
            Ok(out)
        })
    }

    /// 对每个目标空间采样, 结果按请求顺序汇合.
    pub fn sample(
        &self,
        series: &Series,
        subject: &FsSubject,
        targets: &[String],
    ) -> Result<Joined<HemiPair<Array2<f32>>>> {
        let params: Vec<(String, String)> = targets.iter().map(|t| (t.clone(), t.clone())).collect();
        fan_out_join("bold_surf", &params, |target| {
            let out = self.sample_target(series, subject, target)?;
            log::info!("sampled {} volumes to {target}", series.len());
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::ReferenceKernel;
    use crate::surface::testing::grid_mesh;
    use nalgebra::Matrix4;
    use ndarray::Array4;

    const N: usize = 4;

    /// 序列值随 x 线性变化: `v = x + 100 t`.
    fn series() -> Series {
        let grid = Grid::from_zooms((10, 10, 6), [1.0; 3], [0.0; 3]).unwrap();
        let data = Array4::from_shape_fn((2, 10, 10, 6), |(t, i, _, _)| i as f32 + 100.0 * t as f32);
        Series::new(grid, data).unwrap()
    }

    /// 个体空间相对结构像空间沿 x 平移了 +2mm.
    fn subject(cortex: bool) -> FsSubject {
        let mut ras = Matrix4::identity();
        ras[(0, 3)] = 2.0;
        let forward = Transform::affine(T1W, FSNATIVE, ras).unwrap();
        let mut surfaces = SurfaceCatalog::new();
        for hemi in Hemisphere::BOTH {
            surfaces = surfaces
                .with_surface(hemi, SurfaceRole::White, Arc::new(grid_mesh(N, 1.0, 2.0)))
                .with_surface(hemi, SurfaceRole::Pial, Arc::new(grid_mesh(N, 1.0, 3.0)))
                .with_surface(hemi, SurfaceRole::SphereReg, Arc::new(grid_mesh(N, 1.0, 50.0)));
        }
        let mut label = Array1::from_elem(N * N, true);
        label[5] = false;
        FsSubject {
            t1w_to_fsnative: ItkAffine::from_transform(&forward).unwrap(),
            fsnative_grid: Grid::from_zooms((12, 12, 12), [1.0; 3], [-1.0; 3]).unwrap(),
            surfaces,
            cortex: cortex.then(|| HemiPair::from_fn(|_| label.clone())),
        }
    }

    fn fsaverage() -> KeyedMap<FsTarget> {
        // 目标网格只有 2x2 个顶点, 对应个体球面的左下角.
        let sphere = Arc::new(grid_mesh(2, 1.0, 50.0));
        KeyedMap::new("surface target").with(
            "fsaverage5",
            FsTarget {
                sphere: HemiPair::from_fn(|_| Arc::clone(&sphere)),
                cortex: None,
            },
        )
    }

    #[test]
    fn test_fsnative_pulls_surfaces_into_t1w() {
        let kernel = ReferenceKernel;
        let sampler = FsSurfaceSampler::new(&kernel, SurfaceConfig::default(), fsaverage());
        let out = sampler.sample_target(&series(), &subject(false), "fsnative").unwrap();
        // 个体空间 x = c 对应结构像 x = c - 2. 只检查落在视野内的列.
        for c in 2..N {
            assert_eq!(out.left[(c, 0)], (c - 2) as f32);
            assert_eq!(out.right[(c, 1)], (c - 2) as f32 + 100.0);
        }
    }

    #[test]
    fn test_midthickness_used_when_present() {
        let kernel = ReferenceKernel;
        let sampler = FsSurfaceSampler::new(&kernel, SurfaceConfig::default(), fsaverage());
        let plain = sampler.sample_target(&series(), &subject(false), "fsnative").unwrap();

        let mut with_mid = subject(false);
        for hemi in Hemisphere::BOTH {
            with_mid.surfaces = with_mid
                .surfaces
                .with_surface(hemi, SurfaceRole::Midthickness, Arc::new(grid_mesh(N, 1.0, 2.5)));
        }
        let out = sampler.sample_target(&series(), &with_mid, "fsnative").unwrap();
        assert_eq!(out.left, plain.left);

        // 中间面与白质面顶点数不一致时由内核拒绝.
        let mut broken = subject(false);
        broken.surfaces = broken.surfaces.with_surface(
            Hemisphere::Left,
            SurfaceRole::Midthickness,
            Arc::new(grid_mesh(N + 1, 1.0, 2.5)),
        );
        let err = sampler.sample_target(&series(), &broken, "fsnative").unwrap_err();
        assert!(matches!(err.root(), ResampleError::Kernel(_)));
    }

    #[test]
    fn test_fsaverage_and_medial_nans() {
        let kernel = ReferenceKernel;
        let config = SurfaceConfig {
            medial_surface_nan: true,
            ..Default::default()
        };
        let sampler = FsSurfaceSampler::new(&kernel, config, fsaverage());
        let subject = subject(true);
        let spaces = vec!["fsaverage5".to_string(), "fsnative".to_string()];
        let joined = sampler.sample(&series(), &subject, &spaces).unwrap();

        assert_eq!(joined.keys(), &["fsaverage5", "fsnative"]);
        let fsavg = joined.select("surface space", "fsaverage5").unwrap();
        assert_eq!(fsavg.left.nrows(), 4);
        // fsaverage 没有皮层标签, 不置 NaN.
        assert!(fsavg.left.iter().all(|v| v.is_finite()));
        let native = joined.select("surface space", "fsnative").unwrap();
        assert!(native.left.row(5).iter().all(|v| v.is_nan()));
        assert!(native.left.row(6).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_unknown_target_names_branch() {
        let kernel = ReferenceKernel;
        let sampler = FsSurfaceSampler::new(&kernel, SurfaceConfig::default(), fsaverage());
        let spaces = vec!["fsaverage6".to_string()];
        let err = sampler.sample(&series(), &subject(false), &spaces).unwrap_err();
        assert_eq!(err.branch_label(), Some("bold_surf[fsaverage6]"));
        assert!(matches!(err.root(), ResampleError::MissingKey { .. }));
    }
}
