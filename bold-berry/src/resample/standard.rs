//! 标准模板空间重采样.
//!
//! 每个请求的空间独立执行: 解析模板与分辨率, 按空间名选出结构像到模板的变换,
//! 构建逐帧链, 一次插值, 截断负值, 合并; 同时把 BOLD 掩码 (以及可选的分割图与 T2* 图)
//! 带到同一网格. 所有空间并行, 汇合后的各个列表第 `i` 项都对应第 `i` 个请求.

use super::{resample_series, BoldTransforms};
use crate::config::ResampleConfig;
use crate::error::{ResampleError, Result};
use crate::flow::{fan_out_join, Joined};
use crate::kernel::{Interpolation, VolumeKernel};
use crate::space::{KeyedMap, SpatialReference};
use crate::template::{sampling_reference, select_template, ResolvedTemplate, TemplateResolver};
use crate::transform::{SeriesChain, Transform, TransformChain};
use crate::volume::stats::{apply_mask, temporal_mean};
use crate::{Grid, Mask, Series, Volume};

/// 所有空间共享的输入.
#[derive(Clone, Copy, Debug)]
pub struct StdInputs<'a> {
    /// 原始 BOLD 序列.
    pub series: &'a Series,
    /// BOLD 变换.
    pub transforms: &'a BoldTransforms,
    /// BOLD 参考帧中的脑掩码.
    pub bold_mask: &'a Mask,
    /// 空间名 (模板加 cohort) 到结构像->模板变换的映射.
    pub anat2std: &'a KeyedMap<Transform>,
    /// 结构像空间的 aseg 分割.
    pub aseg: Option<&'a Volume>,
    /// 结构像空间的 aparc 分割.
    pub aparc: Option<&'a Volume>,
    /// 结构像空间的 T2* 图 (多回波).
    pub t2star: Option<&'a Volume>,
}

/// 一个空间的执行计划. 构建计划不调用内核, 任何选择或合成错误都在这里暴露.
#[derive(Clone, Debug)]
pub struct StdPlan {
    /// 请求的空间.
    pub reference: SpatialReference,
    /// 解析出的模板.
    pub template: ResolvedTemplate,
    /// 采样网格.
    pub grid: Grid,
    /// 逐帧链 `[hmc, sdc?, bold2t1, anat2std]`.
    pub series_chain: SeriesChain,
    /// 掩码链 `[bold2t1, anat2std]`.
    pub mask_chain: TransformChain,
    /// 分割图与 T2* 的链 `[anat2std]`.
    pub anat_chain: TransformChain,
}

/// 一个空间的结果.
#[derive(Clone, Debug)]
pub struct StdOutputs {
    /// 输出键, 例如 `MNI152NLin6Asym_res-2`.
    pub spatial_reference: String,
    /// 空间名 (结构像->模板变换的键).
    pub template: String,
    /// 重采样后的序列.
    pub bold_std: Series,
    /// 掩码内的时间均值参考图.
    pub bold_std_ref: Volume,
    /// 重采样后的脑掩码.
    pub bold_mask_std: Mask,
    /// aseg.
    pub bold_aseg_std: Option<Volume>,
    /// aparc.
    pub bold_aparc_std: Option<Volume>,
    /// T2*.
    pub t2star_std: Option<Volume>,
}

/// 汇合后的并行列表. 所有列表长度相同, 第 `i` 项对应第 `i` 个请求的空间.
#[derive(Clone, Debug, Default)]
pub struct StdJoined {
    /// 输出键.
    pub spatial_reference: Vec<String>,
    /// 空间名.
    pub template: Vec<String>,
    /// 序列.
    pub bold_std: Vec<Series>,
    /// 参考图.
    pub bold_std_ref: Vec<Volume>,
    /// 掩码.
    pub bold_mask_std: Vec<Mask>,
    /// aseg, 仅当输入提供时存在.
    pub bold_aseg_std: Option<Vec<Volume>>,
    /// aparc, 仅当输入提供时存在.
    pub bold_aparc_std: Option<Vec<Volume>>,
    /// T2*, 仅当输入提供时存在.
    pub t2star_std: Option<Vec<Volume>>,
}

impl StdJoined {
    /// 由按请求顺序汇合的结果拆成并行列表.
    pub fn from_outputs<I: IntoIterator<Item = StdOutputs>>(outputs: I) -> Self {
        let mut ans = Self::default();
        let mut aseg = Vec::new();
        let mut aparc = Vec::new();
        let mut t2star = Vec::new();
        for o in outputs {
            ans.spatial_reference.push(o.spatial_reference);
            ans.template.push(o.template);
            ans.bold_std.push(o.bold_std);
            ans.bold_std_ref.push(o.bold_std_ref);
            ans.bold_mask_std.push(o.bold_mask_std);
            aseg.extend(o.bold_aseg_std);
            aparc.extend(o.bold_aparc_std);
            t2star.extend(o.t2star_std);
        }
        let n = ans.len();
        let complete = |v: Vec<Volume>| (!v.is_empty() && v.len() == n).then_some(v);
        ans.bold_aseg_std = complete(aseg);
        ans.bold_aparc_std = complete(aparc);
        ans.t2star_std = complete(t2star);
        ans
    }

    /// 空间个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.spatial_reference.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.spatial_reference.is_empty()
    }

    /// 输出键对应的下标.
    pub fn index_of(&self, key: &str) -> Result<usize> {
        self.spatial_reference
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| {
                ResampleError::missing_key(
                    "standard-space output",
                    key,
                    self.spatial_reference.iter().cloned(),
                )
            })
    }

    /// 按输出键选出序列.
    pub fn select_bold(&self, key: &str) -> Result<&Series> {
        self.index_of(key).map(|i| &self.bold_std[i])
    }
}

/// 标准空间重采样器.
pub struct StandardResampler<'a, K: ?Sized, R: ?Sized> {
    kernel: &'a K,
    resolver: &'a R,
    config: ResampleConfig,
}

impl<'a, K, R> StandardResampler<'a, K, R>
where
    K: VolumeKernel + ?Sized,
    R: TemplateResolver + ?Sized,
{
    /// 创建.
    pub fn new(kernel: &'a K, resolver: &'a R, config: ResampleConfig) -> Self {
        Self {
            kernel,
            resolver,
            config,
        }
    }

    /// 为一个空间构建计划.
    pub fn plan(&self, reference: &SpatialReference, inputs: &StdInputs<'_>) -> Result<StdPlan> {
        let template = select_template(self.resolver, reference)?;
        let anat2std = inputs.anat2std.get(&reference.space())?;
        let t = inputs.transforms;
        let series_chain = t.series_chain(inputs.series.len(), &[&t.bold_to_t1w, anat2std])?;
        let mask_chain = TransformChain::new(vec![t.bold_to_t1w.clone(), anat2std.clone()])?;
        let anat_chain = TransformChain::new(vec![anat2std.clone()])?;
        let grid = sampling_reference(&template.grid, inputs.series.grid(), template.keep_native)?;
        log::debug!(
            "[{}] template {} res-{}, grid {:?} @ {:?} mm",
            reference.key(),
            template.template,
            template.resolution,
            grid.shape(),
            grid.zooms()
        );
        Ok(StdPlan {
            reference: reference.clone(),
            template,
            grid,
            series_chain,
            mask_chain,
            anat_chain,
        })
    }

    fn anat_volume(&self, plan: &StdPlan, volume: Option<&Volume>, interpolation: Interpolation) -> Result<Option<Volume>> {
        volume
            .map(|v| {
                self.kernel
                    .apply(v, &plan.grid, &plan.anat_chain, interpolation)
                    .map_err(ResampleError::from)
            })
            .transpose()
    }

    /// 按计划执行.
    pub fn execute(&self, plan: &StdPlan, inputs: &StdInputs<'_>) -> Result<StdOutputs> {
        let key = plan.reference.key();
        let bold_std = resample_series(
            self.kernel,
            inputs.series,
            &plan.series_chain,
            &plan.grid,
            self.config.bold,
        )?;
        let bold_mask_std = self
            .kernel
            .apply(&inputs.bold_mask.to_volume(), &plan.grid, &plan.mask_chain, self.config.mask)?
            .to_mask();
        let bold_std_ref = apply_mask(&temporal_mean(&bold_std), &bold_mask_std)?;

        let bold_aseg_std = self.anat_volume(plan, inputs.aseg, self.config.labels)?;
        let bold_aparc_std = self.anat_volume(plan, inputs.aparc, self.config.labels)?;
        let t2star_std = self.anat_volume(plan, inputs.t2star, self.config.t2star)?;
        log::info!("[{key}] resampled {} volumes", bold_std.len());

        Ok(StdOutputs {
            spatial_reference: key,
            template: plan.reference.space(),
            bold_std,
            bold_std_ref,
            bold_mask_std,
            bold_aseg_std,
            bold_aparc_std,
            t2star_std,
        })
    }

    /// 一个空间: 计划加执行.
    pub fn resample_space(&self, reference: &SpatialReference, inputs: &StdInputs<'_>) -> Result<StdOutputs> {
        let plan = self.plan(reference, inputs)?;
        self.execute(&plan, inputs)
    }

    /// 对所有请求的空间扇出, 按请求顺序汇合. 失败的空间以 `std_trans[<key>]` 标记.
    pub fn run(&self, references: &[SpatialReference], inputs: &StdInputs<'_>) -> Result<StdJoined> {
        let params: Vec<(String, &SpatialReference)> =
            references.iter().map(|r| (r.key(), r)).collect();
        let joined: Joined<StdOutputs> =
            fan_out_join("std_trans", &params, |r| self.resample_space(r, inputs))?;
        Ok(StdJoined::from_outputs(joined.into_items()))
    }
}
