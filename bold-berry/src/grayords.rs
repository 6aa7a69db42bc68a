//! grayordinates: 左右半球 fsLR 皮层顶点加皮层下结构体素, 拼接成一个 `[grayordinate, t]` 矩阵.
//!
//! 皮层下部分从标准空间的汇合结果中按键 `MNI152NLin6Asym_res-{2|1}` 选出,
//! 只保留分割图谱中有标签的体素. 表面部分只保留模板皮层 ROI 内的顶点 (去掉内侧壁).
//! 行顺序固定: 左皮层, 右皮层, 皮层下结构按标签升序, 结构内体素按 `(i, j, k)` 行优先.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use ndarray::{s, Array1, Array2, ArrayView2};

use crate::consts::space::{SUBCORTICAL_TEMPLATE, SURFACE_TEMPLATE};
use crate::consts::surface::{FSLR_32K_VERTICES, FSLR_59K_VERTICES};
use crate::error::{ResampleError, Result};
use crate::resample::StdJoined;
use crate::space::SpatialReference;
use crate::surface::{HemiPair, Hemisphere};
use crate::{Grid, Idx3d, Volume};

/// grayordinates 密度.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Density {
    /// 91,282 个 grayordinates: 32k 表面, 2mm 皮层下.
    #[cfg_attr(feature = "serde", serde(rename = "91k"))]
    K91,
    /// 170,494 个 grayordinates: 59k 表面, 1mm 皮层下.
    #[cfg_attr(feature = "serde", serde(rename = "170k"))]
    K170,
}

impl Density {
    /// 文本标记.
    pub fn label(self) -> &'static str {
        match self {
            Self::K91 => "91k",
            Self::K170 => "170k",
        }
    }

    /// 皮层下模板分辨率标记.
    pub fn subcortical_resolution(self) -> u32 {
        match self {
            Self::K91 => 2,
            Self::K170 => 1,
        }
    }

    /// fsLR 表面密度.
    pub fn surface_density(self) -> &'static str {
        match self {
            Self::K91 => "32k",
            Self::K170 => "59k",
        }
    }

    /// 每个半球的 fsLR 顶点数.
    pub fn vertices_per_hemisphere(self) -> usize {
        match self {
            Self::K91 => FSLR_32K_VERTICES,
            Self::K170 => FSLR_59K_VERTICES,
        }
    }

    /// 皮层下部分对应的目标空间.
    pub fn subcortical_reference(self) -> SpatialReference {
        SpatialReference::new(SUBCORTICAL_TEMPLATE)
            .with_spec("res", self.subcortical_resolution().to_string())
    }

    /// 皮层下部分在标准空间汇合结果中的键.
    pub fn subcortical_key(self) -> String {
        self.subcortical_reference().key()
    }

    /// 描述文本.
    pub fn description(self) -> &'static str {
        match self {
            Self::K91 => {
                "91,282 grayordinates corresponding to all of the grey matter sampled at a \
                 2mm average vertex spacing on the surface and as 2mm voxels in subcortical \
                 structures"
            }
            Self::K170 => {
                "170,494 grayordinates corresponding to all of the grey matter sampled at a \
                 1.6mm average vertex spacing on the surface and as 1.6mm voxels in subcortical \
                 structures"
            }
        }
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Density {
    type Err = ResampleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "91k" => Ok(Self::K91),
            "170k" => Ok(Self::K170),
            _ => Err(ResampleError::Parse {
                input: s.to_string(),
                reason: "grayordinates density must be `91k` or `170k`".to_string(),
            }),
        }
    }
}

/// 与序列一同输出的描述信息.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "PascalCase"))]
pub struct GrayordinatesMetadata {
    /// 密度描述.
    pub density: String,
    /// 重复时间 (秒).
    pub repetition_time: Option<f64>,
    /// 皮层下体数据的参考空间键.
    pub volume_reference: String,
    /// 左半球表面模板.
    pub left_cortex: String,
    /// 右半球表面模板.
    pub right_cortex: String,
}

/// grayordinates 中的一个结构.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Structure {
    /// 左半球皮层.
    CortexLeft,
    /// 右半球皮层.
    CortexRight,
    /// 皮层下结构, 以图谱标签区分.
    Subcortical(u32),
}

impl Structure {
    fn cortex(hemi: Hemisphere) -> Self {
        match hemi {
            Hemisphere::Left => Self::CortexLeft,
            Hemisphere::Right => Self::CortexRight,
        }
    }
}

/// 结构内每一行对应的位置.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelIndices {
    /// fsLR 顶点下标.
    Vertices(Vec<usize>),
    /// 皮层下网格中的体素下标.
    Voxels(Vec<Idx3d>),
}

/// 一个结构在拼接矩阵中占据的连续行.
#[derive(Clone, Debug, PartialEq)]
pub struct BrainModel {
    /// 结构.
    pub structure: Structure,
    /// 起始行.
    pub offset: usize,
    /// 各行的位置.
    pub indices: ModelIndices,
}

impl BrainModel {
    /// 行数.
    pub fn count(&self) -> usize {
        match &self.indices {
            ModelIndices::Vertices(v) => v.len(),
            ModelIndices::Voxels(v) => v.len(),
        }
    }

    /// 所占的行.
    #[inline]
    pub fn rows(&self) -> Range<usize> {
        self.offset..self.offset + self.count()
    }

    /// 是否为表面结构.
    #[inline]
    pub fn is_surface(&self) -> bool {
        matches!(self.indices, ModelIndices::Vertices(_))
    }
}

/// grayordinates 序列.
#[derive(Clone, Debug)]
pub struct GrayordinateSeries {
    /// 密度.
    pub density: Density,
    /// 重复时间 (秒).
    pub repetition_time: Option<f64>,
    /// 拼接后的序列, `[grayordinate, t]`.
    pub data: Array2<f32>,
    /// 各结构的行范围, 顺序与 `data` 的行一致.
    pub models: Vec<BrainModel>,
    /// 皮层下体素所在网格.
    pub volume_grid: Grid,
}

impl GrayordinateSeries {
    /// 时间点数.
    #[inline]
    pub fn n_timepoints(&self) -> usize {
        self.data.ncols()
    }

    /// grayordinates 总数.
    #[inline]
    pub fn n_grayordinates(&self) -> usize {
        self.data.nrows()
    }

    /// 表面部分的行数.
    pub fn n_vertices(&self) -> usize {
        self.models.iter().filter(|m| m.is_surface()).map(BrainModel::count).sum()
    }

    /// 皮层下部分的行数.
    pub fn n_voxels(&self) -> usize {
        self.n_grayordinates() - self.n_vertices()
    }

    /// 某个结构.
    pub fn model(&self, structure: Structure) -> Option<&BrainModel> {
        self.models.iter().find(|m| m.structure == structure)
    }

    /// 某个结构的序列, `[row, t]`.
    pub fn structure_data(&self, structure: Structure) -> Option<ArrayView2<'_, f32>> {
        self.model(structure).map(|m| self.data.slice(s![m.rows(), ..]))
    }

    /// 描述信息.
    pub fn metadata(&self) -> GrayordinatesMetadata {
        let surface = |hemi: Hemisphere| {
            format!(
                "tpl-{SURFACE_TEMPLATE}_hemi-{hemi}_den-{}_sphere",
                self.density.surface_density()
            )
        };
        GrayordinatesMetadata {
            density: self.density.description().to_string(),
            repetition_time: self.repetition_time,
            volume_reference: self.density.subcortical_key(),
            left_cortex: surface(Hemisphere::Left),
            right_cortex: surface(Hemisphere::Right),
        }
    }
}

/// 按标签分组的体素, 标签升序, 组内行优先. 非整数值四舍五入, 0 及以下为背景.
fn label_voxels(atlas: &Volume) -> BTreeMap<u32, Vec<Idx3d>> {
    let mut groups: BTreeMap<u32, Vec<Idx3d>> = BTreeMap::new();
    for (idx, v) in atlas.data().indexed_iter() {
        let label = v.round();
        if v.is_finite() && label >= 1.0 {
            groups.entry(label as u32).or_default().push(idx);
        }
    }
    groups
}

/// grayordinates 组装.
#[derive(Clone, Debug)]
pub struct GrayordinatesAssembler {
    density: Density,
    repetition_time: Option<f64>,
    vertices_per_hemisphere: usize,
}

impl GrayordinatesAssembler {
    /// `repetition_time` 为 `None` 时取皮层下序列自带的值.
    pub fn new(density: Density, repetition_time: Option<f64>) -> Self {
        Self {
            density,
            repetition_time,
            vertices_per_hemisphere: density.vertices_per_hemisphere(),
        }
    }

    /// 覆盖每个半球的顶点数, 用于非标准的 fsLR 网格.
    pub fn with_vertices_per_hemisphere(mut self, n: usize) -> Self {
        self.vertices_per_hemisphere = n;
        self
    }

    /// 密度.
    #[inline]
    pub fn density(&self) -> Density {
        self.density
    }

    /// 组装.
    ///
    /// `surfaces` 为两个半球 fsLR 网格上的序列, `cortex` 为对应的模板皮层 ROI,
    /// `atlas` 为皮层下网格上的分割图谱.
    ///
    /// 标准空间结果中没有对应键时返回 `MissingKey`. 顶点数与密度不符, ROI 长度不符,
    /// 时间点数不一致, 或图谱不在皮层下网格上时返回 `Shape`.
    pub fn assemble(
        &self,
        standard: &StdJoined,
        surfaces: &HemiPair<Array2<f32>>,
        cortex: &HemiPair<Array1<bool>>,
        atlas: &Volume,
    ) -> Result<GrayordinateSeries> {
        let key = self.density.subcortical_key();
        let subcortical = standard.select_bold(&key)?;
        let n = subcortical.len();
        let expected = self.vertices_per_hemisphere;

        for (hemi, metric) in surfaces.iter() {
            if metric.nrows() != expected {
                return Err(ResampleError::shape(
                    format!("{} grayordinates vertices ({hemi})", self.density),
                    &[expected],
                    &[metric.nrows()],
                ));
            }
            if metric.ncols() != n {
                return Err(ResampleError::shape(
                    format!("grayordinates timepoints ({hemi})"),
                    &[n],
                    &[metric.ncols()],
                ));
            }
            let roi = cortex.get(hemi);
            if roi.len() != expected {
                return Err(ResampleError::shape(
                    format!("cortex roi ({hemi})"),
                    &[expected],
                    &[roi.len()],
                ));
            }
        }

        let grid = subcortical.grid();
        if !atlas.grid().same_as(grid) {
            let (a, b, c) = grid.shape();
            let (x, y, z) = atlas.grid().shape();
            return Err(ResampleError::shape("subcortical atlas grid", &[a, b, c], &[x, y, z]));
        }

        let mut models = Vec::new();
        let mut offset = 0;
        for (hemi, roi) in cortex.iter() {
            let vertices: Vec<usize> = roi.iter().enumerate().filter(|(_, v)| **v).map(|(i, _)| i).collect();
            let model = BrainModel {
                structure: Structure::cortex(hemi),
                offset,
                indices: ModelIndices::Vertices(vertices),
            };
            offset += model.count();
            models.push(model);
        }
        let groups = label_voxels(atlas);
        if groups.is_empty() {
            log::warn!("subcortical atlas on {key} has no labelled voxels");
        }
        for (label, voxels) in groups {
            let model = BrainModel {
                structure: Structure::Subcortical(label),
                offset,
                indices: ModelIndices::Voxels(voxels),
            };
            offset += model.count();
            models.push(model);
        }

        let mut data = Array2::<f32>::zeros((offset, n));
        let volume = subcortical.data();
        for model in models.iter() {
            match &model.indices {
                ModelIndices::Vertices(vertices) => {
                    let metric = surfaces.get(match model.structure {
                        Structure::CortexRight => Hemisphere::Right,
                        _ => Hemisphere::Left,
                    });
                    for (row, v) in model.rows().zip(vertices.iter()) {
                        data.row_mut(row).assign(&metric.row(*v));
                    }
                }
                ModelIndices::Voxels(voxels) => {
                    for (row, (i, j, k)) in model.rows().zip(voxels.iter().copied()) {
                        for t in 0..n {
                            data[(row, t)] = volume[(t, i, j, k)];
                        }
                    }
                }
            }
        }
        log::info!(
            "assembled {offset} {} grayordinates ({} structures) from {key}, {n} timepoints",
            self.density,
            models.len()
        );

        Ok(GrayordinateSeries {
            density: self.density,
            repetition_time: self.repetition_time.or_else(|| subcortical.repetition_time()),
            data,
            models,
            volume_grid: grid.clone(),
        })
    }
}
