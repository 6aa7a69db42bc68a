//! 模板解析: (模板名, cohort, 分辨率) -> 具体参考网格.

use std::collections::HashMap;

use crate::consts::space::FALLBACK_RESOLUTIONS;
use crate::error::{ResampleError, Result};
use crate::space::SpatialReference;
use crate::{Grid, Volume};

/// 模板解析协作者.
///
/// 实现方只需回答某个模板在某个分辨率下是否存在, 回退策略由 [`select_template`] 统一处理.
/// 同一模板的不同 cohort 是不同的参考图像.
pub trait TemplateResolver: Send + Sync {
    /// 模板 `template` 的 `cohort` 在分辨率标记 `resolution` 下的参考网格.
    fn resolve(&self, template: &str, cohort: Option<&str>, resolution: &str) -> Option<Grid>;

    /// 模板上的分割图谱 (整数标签, 0 为背景), 例如 `atlas = "HCP"`. 默认没有.
    fn atlas(&self, _template: &str, _atlas: &str, _resolution: &str) -> Option<Volume> {
        None
    }
}

/// 解析结果.
#[derive(Clone, Debug)]
pub struct ResolvedTemplate {
    /// 模板名.
    pub template: String,
    /// cohort.
    pub cohort: Option<String>,
    /// 实际使用的分辨率标记.
    pub resolution: String,
    /// 模板参考网格.
    pub grid: Grid,
    /// 是否应保持 BOLD 原始体素尺寸.
    pub keep_native: bool,
}

/// 为一个目标空间选择模板参考.
///
/// 显式给出的分辨率按原样解析, 不回退. 未给出或为 `native` 时依次尝试
/// [`FALLBACK_RESOLUTIONS`], 全部失败返回 `ResolutionFallbackExhausted`.
pub fn select_template<R>(resolver: &R, reference: &SpatialReference) -> Result<ResolvedTemplate>
where
    R: TemplateResolver + ?Sized,
{
    let template = reference.template();
    let cohort = reference.cohort();
    let explicit = reference.resolution().filter(|r| !r.is_empty());
    let keep_native = reference.is_native_resolution();

    let candidates: Vec<String> = match explicit {
        Some(r) if !keep_native => vec![r.to_string()],
        _ => FALLBACK_RESOLUTIONS.iter().map(|r| r.to_string()).collect(),
    };
    for (n, res) in candidates.iter().enumerate() {
        if let Some(grid) = resolver.resolve(template, cohort, res) {
            if n > 0 {
                log::info!(
                    "template {}: resolution {} unavailable, using {res}",
                    reference.space(),
                    candidates[0]
                );
            }
            return Ok(ResolvedTemplate {
                template: template.to_string(),
                cohort: cohort.map(str::to_string),
                resolution: res.clone(),
                grid,
                keep_native,
            });
        }
    }
    Err(ResampleError::ResolutionFallbackExhausted {
        template: reference.space(),
        tried: candidates,
    })
}

/// 采样参考网格: 默认就是模板网格; `keep_native` 时在模板视野内使用 BOLD 的体素尺寸.
pub fn sampling_reference(fixed: &Grid, moving: &Grid, keep_native: bool) -> Result<Grid> {
    if keep_native {
        fixed.with_zooms(moving.zooms())
    } else {
        Ok(fixed.clone())
    }
}

type CatalogKey = (String, Option<String>, String);

/// 内存中的模板目录.
#[derive(Clone, Debug, Default)]
pub struct TemplateCatalog {
    grids: HashMap<CatalogKey, Grid>,
    atlases: HashMap<(String, String, String), Volume>,
}

impl TemplateCatalog {
    /// 空目录.
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个模板分辨率.
    pub fn insert(&mut self, template: impl Into<String>, resolution: impl ToString, grid: Grid) {
        self.grids
            .insert((template.into(), None, resolution.to_string()), grid);
    }

    /// 注册某个 cohort 的模板分辨率.
    pub fn insert_cohort(
        &mut self,
        template: impl Into<String>,
        cohort: impl ToString,
        resolution: impl ToString,
        grid: Grid,
    ) {
        self.grids.insert(
            (template.into(), Some(cohort.to_string()), resolution.to_string()),
            grid,
        );
    }

    /// 链式注册.
    pub fn with(mut self, template: impl Into<String>, resolution: impl ToString, grid: Grid) -> Self {
        self.insert(template, resolution, grid);
        self
    }

    /// 链式注册某个 cohort.
    pub fn with_cohort(
        mut self,
        template: impl Into<String>,
        cohort: impl ToString,
        resolution: impl ToString,
        grid: Grid,
    ) -> Self {
        self.insert_cohort(template, cohort, resolution, grid);
        self
    }

    /// 注册分割图谱.
    pub fn with_atlas(
        mut self,
        template: impl Into<String>,
        atlas: impl Into<String>,
        resolution: impl ToString,
        labels: Volume,
    ) -> Self {
        self.atlases
            .insert((template.into(), atlas.into(), resolution.to_string()), labels);
        self
    }
}

impl TemplateResolver for TemplateCatalog {
    fn resolve(&self, template: &str, cohort: Option<&str>, resolution: &str) -> Option<Grid> {
        self.grids
            .get(&(
                template.to_string(),
                cohort.map(str::to_string),
                resolution.to_string(),
            ))
            .cloned()
    }

    fn atlas(&self, template: &str, atlas: &str, resolution: &str) -> Option<Volume> {
        self.atlases
            .get(&(template.to_string(), atlas.to_string(), resolution.to_string()))
            .cloned()
    }
}
