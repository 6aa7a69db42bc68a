#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 将 BOLD 功能像时间序列从采集几何重采样到其它目标几何
//! (个体皮层表面, 对称皮层模板 fsLR, 体素标准模板), 并把多个独立估计的空间变换
//! (逐帧头动校正, 畸变校正位移场, 功能像到结构像仿射, 结构像到标准模板变换)
//! 合成为 **一次** 插值.
//!
//! 该 crate 只负责编排与核心算法. 真正的插值数值内核 (sinc, 重心坐标等),
//! 网格/体数据文件格式, 以及变换估计流程都被视为外部协作者,
//! 通过 [`kernel`] 中的 trait 和 [`template::TemplateResolver`] 接入.
//!
//! # 注意
//!
//! 1. 所有实体在单次流水线运行中创建, 构造后只读, 可以在并行分支之间自由共享.
//! 2. 反复插值会累积模糊, 因此每个重采样器都只调用一次外部内核.
//!
//! # 开发计划
//!
//! ### 变换链合成与格式转换 ✅
//!
//! 帧连续性检查, 全仿射链折叠为单个矩阵, ITK / LTA 仿射互转.
//!
//! 实现位于 `bold-berry/src/transform`.
//!
//! ### DAG 执行器 ✅
//!
//! 声明式输入/输出槽位, 依赖就绪后才执行的调度器, 按扇出参数顺序汇合的 join.
//!
//! 实现位于 `bold-berry/src/flow`.
//!
//! ### goodvoxels 掩码估计 ✅
//!
//! 基于局部调制的变异系数剔除高方差体素.
//!
//! 实现位于 `bold-berry/src/goodvoxels.rs`.
//!
//! ### 表面重采样 ✅
//!
//! 皮层 ROI 构建 (填洞, 去孤岛), 条带约束投影, 测地膨胀, fsLR 面积自适应重采样.
//! 另提供 FreeSurfer 表面空间 (`fsnative`, `fsaverage*`) 采样.
//!
//! 实现位于 `bold-berry/src/surface`.
//!
//! ### 体素空间重采样 ✅
//!
//! 原始采集空间与标准模板空间, 后者按模板扇出并按请求顺序汇合.
//!
//! 实现位于 `bold-berry/src/resample`.
//!
//! ### grayordinates 组装 ✅
//!
//! 左右皮层 ROI 内的顶点与图谱标记的皮层下体素拼接成一个矩阵, 附带各结构的行范围.
//!
//! 实现位于 `bold-berry/src/grayords.rs`.
//!
//! ### 面积一致性的更强校验 ⌛️
//!
//! 目前只校验顶点数; 面积总和的容差校验尚未确定阈值.

/// 三维体素索引 `(i, j, k)`, 与体素到世界坐标仿射矩阵的列一一对应.
pub type Idx3d = (usize, usize, usize);

/// 世界坐标 (RAS, 毫米).
pub type Point3 = nalgebra::Point3<f64>;

pub mod consts;
pub mod error;
pub mod config;

pub mod volume;
pub mod transform;
pub mod space;
pub mod template;
pub mod kernel;

pub mod flow;

pub mod goodvoxels;
pub mod surface;
pub mod resample;
pub mod grayords;

pub mod pipeline;
pub mod prelude;

pub use error::{ResampleError, Result};
pub use volume::{Grid, Mask, Series, Volume};
