//! 整条重采样流水线.
//!
//! 按配置把各个重采样器装配成一张 [`Workflow`] 并交给 [`Scheduler`](crate::flow::Scheduler) 执行:
//!
//! ```text
//! inputnode ─┬─ bold_native
//!            ├─ bold_t1_trans ─┬─ goodvoxels ─┐
//!            │                 ├──────────────┴─ fslr[L|R] ── fslr_join ─┐
//!            │                 └─ bold_surf[<target>] ── bold_surf_join  │
//!            └─ std_trans[<space>]/{plan,resample} ── std_trans_join ── std_outputs ─┴─ grayords
//! ```
//!
//! 启用 grayordinates 但未请求对应的 `MNI152NLin6Asym` 分辨率时, 自动追加该空间.
//! 皮层下结构的分割图谱 (`atlas-HCP`) 由 [`TemplateResolver::atlas`] 提供.

use std::any::Any;
use std::sync::Arc;

use ndarray::Array2;

use crate::config::PipelineConfig;
use crate::consts::space::{FSNATIVE, SUBCORTICAL_ATLAS, SUBCORTICAL_TEMPLATE, SURFACE_TEMPLATE};
use crate::error::{ResampleError, Result};
use crate::flow::{Joined, Slots, Task, Workflow};
use crate::goodvoxels::{Goodvoxels, GoodvoxelsEstimator};
use crate::grayords::{GrayordinateSeries, GrayordinatesAssembler};
use crate::kernel::{SurfaceKernel, VolumeKernel};
use crate::resample::{
    AnatResampler, BoldTransforms, NativeOutputs, NativeResampler, StandardResampler, StdInputs,
    StdJoined, StdOutputs, StdPlan,
};
use crate::space::{KeyedMap, SpatialReference};
use crate::surface::fslr::{FslrResampler, HemiFslr};
use crate::surface::fsnative::{FsSubject, FsSurfaceSampler, FsTarget};
use crate::surface::{HemiPair, Hemisphere, SurfaceCatalog};
use crate::template::TemplateResolver;
use crate::transform::Transform;
use crate::{Grid, Mask, Series, Volume};

/// 流水线输入. 构造后只读, 在所有分支之间共享.
#[derive(Clone, Debug)]
pub struct PipelineInputs {
    /// 原始 BOLD 序列.
    pub bold: Series,
    /// 变换估计流程给出的 BOLD 变换.
    pub transforms: BoldTransforms,
    /// BOLD 参考帧中的脑掩码.
    pub bold_mask: Mask,
    /// 空间名到结构像->模板变换的映射.
    pub anat2std: KeyedMap<Transform>,
    /// 结构像网格.
    pub anat_grid: Grid,
    /// fsLR 重采样所需的个体曲面与模板.
    pub surfaces: Option<SurfaceCatalog>,
    /// 结构像空间的皮层条带, goodvoxels 使用.
    pub anat_ribbon: Option<Mask>,
    /// FreeSurfer 重建.
    pub freesurfer: Option<FsSubject>,
    /// `fsaverage*` 目标.
    pub fs_targets: KeyedMap<FsTarget>,
    /// aseg.
    pub aseg: Option<Volume>,
    /// aparc.
    pub aparc: Option<Volume>,
    /// T2*.
    pub t2star: Option<Volume>,
}

impl PipelineInputs {
    /// 只含必需输入.
    pub fn new(
        bold: Series,
        transforms: BoldTransforms,
        bold_mask: Mask,
        anat2std: KeyedMap<Transform>,
        anat_grid: Grid,
    ) -> Self {
        Self {
            bold,
            transforms,
            bold_mask,
            anat2std,
            anat_grid,
            surfaces: None,
            anat_ribbon: None,
            freesurfer: None,
            fs_targets: KeyedMap::new("surface target"),
            aseg: None,
            aparc: None,
            t2star: None,
        }
    }

    /// 加入 fsLR 曲面.
    pub fn with_surfaces(mut self, surfaces: SurfaceCatalog) -> Self {
        self.surfaces = Some(surfaces);
        self
    }

    /// 加入皮层条带.
    pub fn with_ribbon(mut self, ribbon: Mask) -> Self {
        self.anat_ribbon = Some(ribbon);
        self
    }

    /// 加入 FreeSurfer 重建与 `fsaverage*` 目标.
    pub fn with_freesurfer(mut self, subject: FsSubject, targets: KeyedMap<FsTarget>) -> Self {
        self.freesurfer = Some(subject);
        self.fs_targets = targets;
        self
    }

    /// 加入分割图.
    pub fn with_segmentations(mut self, aseg: Volume, aparc: Volume) -> Self {
        self.aseg = Some(aseg);
        self.aparc = Some(aparc);
        self
    }

    /// 加入 T2* 图.
    pub fn with_t2star(mut self, t2star: Volume) -> Self {
        self.t2star = Some(t2star);
        self
    }

    fn into_slots(self) -> Slots {
        let mut slots = Slots::new()
            .with("bold", self.bold)
            .with("transforms", self.transforms)
            .with("bold_mask", self.bold_mask)
            .with("anat2std", self.anat2std)
            .with("anat_grid", self.anat_grid)
            .with("fs_targets", self.fs_targets);
        if let Some(v) = self.surfaces {
            slots.insert("surfaces", v);
        }
        if let Some(v) = self.anat_ribbon {
            slots.insert("anat_ribbon", v);
        }
        if let Some(v) = self.freesurfer {
            slots.insert("freesurfer", v);
        }
        for (name, v) in [("aseg", self.aseg), ("aparc", self.aparc), ("t2star", self.t2star)] {
            if let Some(v) = v {
                slots.insert(name, v);
            }
        }
        slots
    }
}

/// 由输出空间列表推出的执行计划.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputPlan {
    /// 标准模板空间, 按请求顺序, 键不重复.
    pub standard: Vec<SpatialReference>,
    /// FreeSurfer 表面空间键, 按请求顺序.
    pub freesurfer: Vec<String>,
    /// 是否执行 fsLR 重采样.
    pub fslr: bool,
    /// 是否输出结构像空间序列.
    pub anat: bool,
    /// 是否输出原始采集空间序列.
    pub native: bool,
}

impl OutputPlan {
    /// 解析配置中的输出空间.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut plan = Self {
            native: config.native,
            ..Default::default()
        };
        for s in config.output_spaces.iter() {
            let r = SpatialReference::parse(s)?;
            if r.is_freesurfer() {
                if !plan.freesurfer.contains(&r.key()) {
                    plan.freesurfer.push(r.key());
                }
            } else if r.template() == SURFACE_TEMPLATE {
                plan.fslr = true;
            } else if r.is_standard() {
                plan.push_standard(r);
            } else {
                match r.template() {
                    "T1w" | "anat" => plan.anat = true,
                    "func" | "run" | "bold" | "boldref" | "sbref" => plan.native = true,
                    other => log::warn!("output space {other} is not produced by this pipeline"),
                }
            }
        }
        if let Some(density) = config.grayordinates {
            plan.fslr = true;
            let r = density.subcortical_reference();
            if !plan.standard.iter().any(|s| s.key() == r.key()) {
                log::info!("grayordinates {density}: adding {} to standard spaces", r.key());
                plan.standard.push(r);
            }
        }
        Ok(plan)
    }

    fn push_standard(&mut self, r: SpatialReference) {
        if self.standard.iter().any(|s| s.key() == r.key()) {
            log::warn!("duplicate output space {} ignored", r.key());
        } else {
            self.standard.push(r);
        }
    }

    /// 是否需要结构像空间的序列.
    pub fn needs_anat(&self, goodvoxels: bool) -> bool {
        self.anat || self.fslr || goodvoxels || !self.freesurfer.is_empty()
    }
}

/// 流水线输出. 未执行的部分为 `None`.
#[derive(Clone, Debug)]
pub struct PipelineOutputs {
    /// 原始采集空间.
    pub native: Option<NativeOutputs>,
    /// 结构像空间.
    pub bold_t1: Option<Series>,
    /// goodvoxels.
    pub goodvoxels: Option<Goodvoxels>,
    /// fsLR.
    pub fslr: Option<HemiPair<HemiFslr>>,
    /// FreeSurfer 表面空间, 按请求顺序.
    pub freesurfer: Option<Joined<HemiPair<Array2<f32>>>>,
    /// 标准空间, 按请求顺序.
    pub standard: StdJoined,
    /// grayordinates.
    pub grayordinates: Option<GrayordinateSeries>,
}

fn take<T: Any + Send + Sync + Clone>(slots: &Slots, name: &str) -> Result<Option<T>> {
    if !slots.contains(name) {
        return Ok(None);
    }
    Ok(Some(slots.get::<T>(name)?.clone()))
}

fn unshare<T: Clone>(joined: &Joined<Arc<T>>) -> Vec<T> {
    joined.items().iter().map(|a| T::clone(a)).collect()
}

impl PipelineOutputs {
    fn collect(slots: &Slots) -> Result<Self> {
        let fslr = take::<Joined<Arc<HemiFslr>>>(slots, "fslr_join.out")?
            .map(|j| HemiPair::try_from_vec(unshare(&j)))
            .transpose()?;
        let freesurfer = take::<Joined<Arc<HemiPair<Array2<f32>>>>>(slots, "bold_surf_join.out")?
            .map(|j| j.map(|a| HemiPair::clone(a)));
        Ok(Self {
            native: take(slots, "bold_native.out")?,
            bold_t1: take(slots, "bold_t1_trans.out")?,
            goodvoxels: take(slots, "goodvoxels.out")?,
            fslr,
            freesurfer,
            standard: take(slots, "std_outputs.out")?.unwrap_or_default(),
            grayordinates: take(slots, "grayords.out")?,
        })
    }
}

/// 从槽位中借出标准空间共享输入. 可选输入没有绑定时为 `None`.
fn std_inputs(slots: &Slots) -> Result<StdInputs<'_>> {
    Ok(StdInputs {
        series: slots.get("bold")?,
        transforms: slots.get("transforms")?,
        bold_mask: slots.get("bold_mask")?,
        anat2std: slots.get("anat2std")?,
        aseg: slots.get("aseg").ok(),
        aparc: slots.get("aparc").ok(),
        t2star: slots.get("t2star").ok(),
    })
}

/// BOLD 重采样流水线.
pub struct BoldResamplingPipeline {
    volume_kernel: Arc<dyn VolumeKernel>,
    surface_kernel: Arc<dyn SurfaceKernel>,
    resolver: Arc<dyn TemplateResolver>,
    config: PipelineConfig,
}

impl BoldResamplingPipeline {
    /// 创建.
    pub fn new(
        volume_kernel: Arc<dyn VolumeKernel>,
        surface_kernel: Arc<dyn SurfaceKernel>,
        resolver: Arc<dyn TemplateResolver>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            volume_kernel,
            surface_kernel,
            resolver,
            config,
        }
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 按配置与可用输入装配任务图. 缺少某个输出所需的输入时返回 `InvalidConfiguration`.
    pub fn workflow(&self, inputs: &PipelineInputs) -> Result<Workflow> {
        self.config.validate()?;
        let plan = OutputPlan::from_config(&self.config)?;
        let goodvoxels = self.config.goodvoxels.enabled;
        let missing = |what: &str, why: &str| {
            ResampleError::InvalidConfiguration(format!("{why} requires {what}"))
        };
        if plan.fslr && inputs.surfaces.is_none() {
            return Err(missing("surfaces", "fsLR resampling"));
        }
        if goodvoxels && inputs.anat_ribbon.is_none() {
            return Err(missing("an anatomical ribbon", "goodvoxels"));
        }
        if !plan.freesurfer.is_empty() && inputs.freesurfer.is_none() {
            return Err(missing("a FreeSurfer reconstruction", "FreeSurfer surface sampling"));
        }

        let mut wf = Workflow::new();
        if plan.native {
            self.add_native(&mut wf)?;
        }
        if plan.needs_anat(goodvoxels) {
            self.add_anat(&mut wf)?;
        }
        if goodvoxels {
            self.add_goodvoxels(&mut wf)?;
        }
        if plan.fslr {
            self.add_fslr(&mut wf, goodvoxels)?;
        }
        if !plan.freesurfer.is_empty() {
            self.add_freesurfer(&mut wf, &plan.freesurfer)?;
        }
        self.add_standard(&mut wf, &plan.standard, inputs)?;
        if self.config.grayordinates.is_some() {
            self.add_grayords(&mut wf)?;
        }
        log::debug!("workflow has {} tasks", wf.tasks().len());
        Ok(wf)
    }

    /// 执行.
    pub fn run(&self, inputs: PipelineInputs) -> Result<PipelineOutputs> {
        let workflow = self.workflow(&inputs)?;
        let results = self.config.scheduler().run(&workflow, &inputs.into_slots())?;
        PipelineOutputs::collect(&results)
    }

    fn add_native(&self, wf: &mut Workflow) -> Result<()> {
        let kernel = Arc::clone(&self.volume_kernel);
        let config = self.config.resample.clone();
        let task = Task::new("bold_native")
            .input("bold", "inputnode.bold")
            .input("transforms", "inputnode.transforms")
            .output("out")
            .body(move |s| {
                let out = NativeResampler::new(&*kernel, config.clone()).run(s.get("bold")?, s.get("transforms")?)?;
                Ok(Slots::new().with("out", out))
            });
        Ok(wf.add(task)?)
    }

    fn add_anat(&self, wf: &mut Workflow) -> Result<()> {
        let kernel = Arc::clone(&self.volume_kernel);
        let config = self.config.resample.clone();
        let task = Task::new("bold_t1_trans")
            .input("bold", "inputnode.bold")
            .input("transforms", "inputnode.transforms")
            .input("anat_grid", "inputnode.anat_grid")
            .output("out")
            .body(move |s| {
                let out = AnatResampler::new(&*kernel, config.clone()).run(
                    s.get("bold")?,
                    s.get("transforms")?,
                    s.get("anat_grid")?,
                )?;
                Ok(Slots::new().with("out", out))
            });
        Ok(wf.add(task)?)
    }

    fn add_goodvoxels(&self, wf: &mut Workflow) -> Result<()> {
        let kernel = Arc::clone(&self.volume_kernel);
        let config = self.config.goodvoxels.clone();
        let task = Task::new("goodvoxels")
            .input("bold_t1", "bold_t1_trans.out")
            .input("anat_ribbon", "inputnode.anat_ribbon")
            .output("out")
            .output("mask")
            .body(move |s| {
                let out = GoodvoxelsEstimator::new(&*kernel, config.clone())
                    .estimate(s.get("bold_t1")?, s.get("anat_ribbon")?)?;
                let mask = out.mask.clone();
                Ok(Slots::new().with("out", out).with("mask", mask))
            });
        Ok(wf.add(task)?)
    }

    fn add_fslr(&self, wf: &mut Workflow, goodvoxels: bool) -> Result<()> {
        let params = Hemisphere::BOTH
            .iter()
            .map(|h| (h.label().to_string(), *h))
            .collect();
        let fan = wf.fan_out("fslr", params, |b, hemi: Hemisphere| {
            let kernel = Arc::clone(&self.surface_kernel);
            let config = self.config.surface.clone();
            let mut task = Task::new(b.task("resample"))
                .input("bold_t1", "bold_t1_trans.out")
                .input("surfaces", "inputnode.surfaces")
                .output("out");
            if goodvoxels {
                task = task.input("volume_roi", "goodvoxels.mask");
            }
            vec![task.body(move |s| {
                let catalog: &SurfaceCatalog = s.get("surfaces")?;
                let surfaces = catalog.select(hemi)?;
                let out = FslrResampler::new(&*kernel, config.clone()).resample_hemisphere(
                    s.get("bold_t1")?,
                    &surfaces,
                    s.get("volume_roi").ok(),
                )?;
                Ok(Slots::new().with("out", out))
            })]
        })?;
        Ok(wf.join::<HemiFslr>("fslr_join", &fan, "resample", "out")?)
    }

    fn add_freesurfer(&self, wf: &mut Workflow, targets: &[String]) -> Result<()> {
        let params = targets.iter().map(|t| (t.clone(), t.clone())).collect();
        let fan = wf.fan_out("bold_surf", params, |b, target: String| {
            let kernel = Arc::clone(&self.surface_kernel);
            let config = self.config.surface.clone();
            let task = Task::new(b.task("sample"))
                .input("bold_t1", "bold_t1_trans.out")
                .input("freesurfer", "inputnode.freesurfer")
                .input("fs_targets", "inputnode.fs_targets")
                .output("out")
                .body(move |s| {
                    let all: &KeyedMap<FsTarget> = s.get("fs_targets")?;
                    let mut only = KeyedMap::new("surface target");
                    if target != FSNATIVE {
                        only.insert(target.clone(), all.get(&target)?.clone());
                    }
                    let out = FsSurfaceSampler::new(&*kernel, config.clone(), only).sample_target(
                        s.get("bold_t1")?,
                        s.get("freesurfer")?,
                        &target,
                    )?;
                    Ok(Slots::new().with("out", out))
                });
            vec![task]
        })?;
        Ok(wf.join::<HemiPair<Array2<f32>>>("bold_surf_join", &fan, "sample", "out")?)
    }

    fn add_standard(
        &self,
        wf: &mut Workflow,
        references: &[SpatialReference],
        inputs: &PipelineInputs,
    ) -> Result<()> {
        let optional: Vec<&str> = [
            ("aseg", inputs.aseg.is_some()),
            ("aparc", inputs.aparc.is_some()),
            ("t2star", inputs.t2star.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect();
        let bind = |mut task: Task| {
            for name in ["bold", "transforms", "bold_mask", "anat2std"].iter().chain(optional.iter()) {
                task = task.input(*name, format!("inputnode.{name}"));
            }
            task
        };

        let params = references.iter().map(|r| (r.key(), r.clone())).collect();
        let fan = wf.fan_out("std_trans", params, |b, reference: SpatialReference| {
            let plan = {
                let kernel = Arc::clone(&self.volume_kernel);
                let resolver = Arc::clone(&self.resolver);
                let config = self.config.resample.clone();
                bind(Task::new(b.task("plan")))
                    .output("plan")
                    .body(move |s| {
                        let plan = StandardResampler::new(&*kernel, &*resolver, config.clone())
                            .plan(&reference, &std_inputs(s)?)?;
                        Ok(Slots::new().with("plan", plan))
                    })
            };
            let resample = {
                let kernel = Arc::clone(&self.volume_kernel);
                let resolver = Arc::clone(&self.resolver);
                let config = self.config.resample.clone();
                bind(Task::new(b.task("resample")))
                    .input("plan", b.source("plan", "plan"))
                    .output("out")
                    .body(move |s| {
                        let plan: &StdPlan = s.get("plan")?;
                        let out = StandardResampler::new(&*kernel, &*resolver, config.clone())
                            .execute(plan, &std_inputs(s)?)?;
                        Ok(Slots::new().with("out", out))
                    })
            };
            vec![plan, resample]
        })?;
        wf.join::<StdOutputs>("std_trans_join", &fan, "resample", "out")?;

        let task = Task::new("std_outputs")
            .input("joined", "std_trans_join.out")
            .output("out")
            .body(|s| {
                let joined: &Joined<Arc<StdOutputs>> = s.get("joined")?;
                Ok(Slots::new().with("out", StdJoined::from_outputs(unshare(joined))))
            });
        Ok(wf.add(task)?)
    }

    fn add_grayords(&self, wf: &mut Workflow) -> Result<()> {
        let Some(density) = self.config.grayordinates else {
            return Ok(());
        };
        let resolver = Arc::clone(&self.resolver);
        let vertices = self.config.surface.fslr_vertices;
        let task = Task::new("grayords")
            .input("standard", "std_outputs.out")
            .input("fslr", "fslr_join.out")
            .output("out")
            .body(move |s| {
                let fslr: &Joined<Arc<HemiFslr>> = s.get("fslr")?;
                let surfaces = HemiPair::try_from_vec(
                    fslr.items().iter().map(|h| h.bold_fslr.clone()).collect(),
                )?;
                let cortex = HemiPair::try_from_vec(
                    fslr.items().iter().map(|h| h.fslr_roi.clone()).collect(),
                )?;
                let res = density.subcortical_resolution().to_string();
                let atlas = resolver
                    .atlas(SUBCORTICAL_TEMPLATE, SUBCORTICAL_ATLAS, &res)
                    .ok_or_else(|| {
                        ResampleError::missing_key(
                            "template atlas",
                            format!("tpl-{SUBCORTICAL_TEMPLATE}_res-{res}_atlas-{SUBCORTICAL_ATLAS}"),
                            Vec::<String>::new(),
                        )
                    })?;
                let mut assembler = GrayordinatesAssembler::new(density, None);
                if let Some(n) = vertices {
                    assembler = assembler.with_vertices_per_hemisphere(n);
                }
                let out = assembler.assemble(s.get("standard")?, &surfaces, &cortex, &atlas)?;
                Ok(Slots::new().with("out", out))
            });
        Ok(wf.add(task)?)
    }
}
