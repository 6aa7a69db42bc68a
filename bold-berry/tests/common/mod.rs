#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use bold_berry::prelude::*;
use bold_berry::surface::{MetricRole, SurfaceRole};
use bold_berry::Point3;
use ndarray::{Array1, Array4};
use rand::Rng;

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Warn)
            .init();
    });
}

/// `shape` 网格, 值为 `i * zoom / 2 + 10 t` (即世界坐标 x 的一半).
pub fn ramp_series(n: usize, shape: (usize, usize, usize), zoom: f64) -> Series {
    let grid = Grid::from_zooms(shape, [zoom; 3], [0.0; 3]).unwrap();
    let data = Array4::from_shape_fn((n, shape.0, shape.1, shape.2), |(t, i, _, _)| {
        (i as f64 * zoom / 2.0) as f32 + 10.0 * t as f32
    });
    Series::new(grid, data).unwrap().with_repetition_time(2.0)
}

pub fn identity_transforms(n: usize) -> BoldTransforms {
    BoldTransforms {
        hmc: (0..n).map(|_| Transform::identity("bold", "boldref")).collect(),
        fieldwarp: None,
        bold_to_t1w: Transform::identity("boldref", "T1w"),
    }
}

pub fn anat2std(spaces: &[&str]) -> KeyedMap<Transform> {
    spaces.iter().fold(KeyedMap::new("anat2std transform"), |m, s| {
        m.with(*s, Transform::identity("T1w", *s))
    })
}

pub fn inputs(series: Series, spaces: &[&str]) -> PipelineInputs {
    let n = series.len();
    let mask = Mask::full(series.grid().clone());
    let grid = series.grid().clone();
    PipelineInputs::new(series, identity_transforms(n), mask, anat2std(spaces), grid)
}

pub fn pipeline(
    kernel: Arc<dyn VolumeKernel>,
    catalog: TemplateCatalog,
    config: PipelineConfig,
) -> BoldResamplingPipeline {
    BoldResamplingPipeline::new(kernel, Arc::new(ReferenceKernel), Arc::new(catalog), config)
}

pub fn config(spaces: &[&str]) -> PipelineConfig {
    let mut c = PipelineConfig {
        output_spaces: spaces.iter().map(|s| s.to_string()).collect(),
        threads: Some(4),
        ..Default::default()
    };
    c.resample = c.resample.with_bold(Interpolation::Linear);
    c
}

/// 记录调用次数的内核.
#[derive(Default)]
pub struct CountingKernel {
    pub calls: AtomicUsize,
}

impl CountingKernel {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VolumeKernel for CountingKernel {
    fn apply(
        &self,
        moving: &Volume,
        reference: &Grid,
        chain: &TransformChain,
        interpolation: Interpolation,
    ) -> std::result::Result<Volume, KernelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ReferenceKernel.apply(moving, reference, chain, interpolation)
    }
}

/// 每次调用前随机等待的内核, 打乱分支完成顺序.
pub struct JitterKernel {
    pub max_delay_ms: u64,
}

impl VolumeKernel for JitterKernel {
    fn apply(
        &self,
        moving: &Volume,
        reference: &Grid,
        chain: &TransformChain,
        interpolation: Interpolation,
    ) -> std::result::Result<Volume, KernelError> {
        let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
        std::thread::sleep(Duration::from_millis(delay));
        ReferenceKernel.apply(moving, reference, chain, interpolation)
    }
}

/// `n x n` 个顶点的平面网格, 位于 `z = height`.
pub fn grid_mesh(n: usize, height: f64) -> Mesh {
    let mut vertices = Vec::with_capacity(n * n);
    for r in 0..n {
        for c in 0..n {
            vertices.push(Point3::new(c as f64, r as f64, height));
        }
    }
    let mut faces = Vec::new();
    for r in 0..n - 1 {
        for c in 0..n - 1 {
            let a = r * n + c;
            faces.push([a, a + 1, a + n]);
            faces.push([a + 1, a + n + 1, a + n]);
        }
    }
    Mesh::new(vertices, faces).unwrap()
}

/// 两个半球相同的曲面目录. 厚度在 `holes` 顶点处为 0, 模板 ROI 在 `medial` 顶点处为 0.
pub fn surface_catalog(n: usize, holes: &[usize], medial: &[usize]) -> SurfaceCatalog {
    let sphere = Arc::new(grid_mesh(n, 10.0));
    let mut thickness = Array1::from_elem(n * n, 1.0f32);
    for v in holes {
        thickness[*v] = 0.0;
    }
    let mut template_roi = Array1::from_elem(n * n, 1.0f32);
    for v in medial {
        template_roi[*v] = 0.0;
    }
    Hemisphere::BOTH.iter().fold(SurfaceCatalog::new(), |cat, hemi| {
        cat.with_surface(*hemi, SurfaceRole::White, Arc::new(grid_mesh(n, 1.0)))
            .with_surface(*hemi, SurfaceRole::Pial, Arc::new(grid_mesh(n, 2.0)))
            .with_surface(*hemi, SurfaceRole::Midthickness, Arc::new(grid_mesh(n, 1.5)))
            .with_surface(*hemi, SurfaceRole::SphereReg, Arc::clone(&sphere))
            .with_surface(*hemi, SurfaceRole::TemplateSphere, Arc::clone(&sphere))
            .with_metric(*hemi, MetricRole::Thickness, thickness.clone())
            .with_metric(*hemi, MetricRole::TemplateRoi, template_roi.clone())
    })
}
