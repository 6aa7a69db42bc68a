//! 外部重采样内核的接口.
//!
//! 插值数值本身 (sinc, 重心坐标, 面积自适应) 由协作者实现, 本 crate 只声明契约,
//! 并在每次调用时显式传入插值方式. [`ReferenceKernel`] 是一个小型的内置实现,
//! 覆盖最近邻, 三线性与多标签, 用于测试和小数据.

use std::fmt;

use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::surface::Mesh;
use crate::transform::TransformChain;
use crate::{Grid, Mask, Series, Volume};

mod reference;

pub use reference::ReferenceKernel;

/// 插值方式.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Interpolation {
    /// 最近邻.
    Nearest,
    /// 多标签 (按邻域加权投票).
    MultiLabel,
    /// 三线性.
    Linear,
    /// Lanczos 窗 sinc.
    LanczosWindowedSinc,
    /// 重心坐标 (曲面).
    Barycentric,
    /// 面积自适应重心坐标 (曲面).
    AdaptiveBarycentricArea,
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nearest => "NearestNeighbor",
            Self::MultiLabel => "MultiLabel",
            Self::Linear => "Linear",
            Self::LanczosWindowedSinc => "LanczosWindowedSinc",
            Self::Barycentric => "BARYCENTRIC",
            Self::AdaptiveBarycentricArea => "ADAP_BARY_AREA",
        };
        f.write_str(s)
    }
}

/// 内核调用失败.
#[derive(Error, Debug)]
pub enum KernelError {
    /// 内核不支持该插值方式.
    #[error("{kernel} does not support {interpolation} interpolation")]
    Unsupported {
        /// 内核名.
        kernel: &'static str,
        /// 请求的插值方式.
        interpolation: Interpolation,
    },

    /// 输入之间不一致 (顶点数, 帧数等).
    #[error("inconsistent kernel input: {0}")]
    Input(String),

    /// 内核自身报告的失败.
    #[error("kernel failed: {0}")]
    Failed(String),
}

/// 条带约束投影所需的三张曲面 (同一半球, 顶点一一对应).
#[derive(Copy, Clone, Debug)]
pub struct Ribbon<'a> {
    /// 输出所在曲面.
    pub midthickness: &'a Mesh,
    /// 内边界.
    pub white: &'a Mesh,
    /// 外边界.
    pub pial: &'a Mesh,
}

/// 面积自适应重采样所需的两张面积曲面.
#[derive(Copy, Clone, Debug)]
pub struct AreaSurfaces<'a> {
    /// 与当前球面顶点对应的面积曲面.
    pub current: &'a Mesh,
    /// 与新球面顶点对应的面积曲面.
    pub new: &'a Mesh,
}

/// 体数据重采样内核.
pub trait VolumeKernel: Send + Sync {
    /// 用一条变换链把 `moving` 重采样到 `reference` 网格. 链的源帧是 `moving` 所在帧,
    /// 目标帧是 `reference` 所在帧. 参考网格之外的点取 0.
    fn apply(
        &self,
        moving: &Volume,
        reference: &Grid,
        chain: &TransformChain,
        interpolation: Interpolation,
    ) -> Result<Volume, KernelError>;
}

/// 曲面重采样内核. 所有逐顶点的时间序列按 `[vertex, t]` 排列.
pub trait SurfaceKernel: Send + Sync {
    /// 条带约束的体到面投影. `volume_roi` 给出时只采样其中的体素.
    fn volume_to_surface(
        &self,
        series: &Series,
        ribbon: Ribbon<'_>,
        volume_roi: Option<&Mask>,
    ) -> Result<Array2<f32>, KernelError>;

    /// 依据球面配准把曲面坐标重采样到新网格 (重心坐标).
    fn resample_surface(
        &self,
        surface: &Mesh,
        current_sphere: &Mesh,
        new_sphere: &Mesh,
    ) -> Result<Mesh, KernelError>;

    /// 依据球面配准把逐顶点序列重采样到新网格. `roi` 为当前网格上的有效顶点.
    fn resample_metric(
        &self,
        metric: &Array2<f32>,
        current_sphere: &Mesh,
        new_sphere: &Mesh,
        areas: Option<AreaSurfaces<'_>>,
        roi: Option<&Array1<bool>>,
        interpolation: Interpolation,
    ) -> Result<Array2<f32>, KernelError>;
}
