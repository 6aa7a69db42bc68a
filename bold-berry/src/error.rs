//! 运行时错误.
//!
//! 数值退化 (例如 goodvoxels 统计中均值接近 0) 不在此列:
//! 它们在本地以确定的回退值处理, 只写日志, 不向调用者暴露.

use thiserror::Error;

use crate::flow::FlowError;
use crate::kernel::KernelError;

/// 变换链不可合成.
///
/// 在任何重采样调用发生前抛出.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum CompositionError {
    /// 空链.
    #[error("empty transform chain")]
    Empty,

    /// 第 `index` 个变换的目标帧与下一个变换的源帧不一致.
    #[error("frame break after step {index}: `{destination}` does not feed `{next}`")]
    FrameBreak {
        /// 断点前一个变换在链中的位置.
        index: usize,
        /// 该变换的目标帧.
        destination: String,
        /// 下一个变换的源帧.
        next: String,
    },

    /// 仿射矩阵不可逆.
    #[error("singular affine `{from}` -> `{to}`")]
    Singular {
        /// 源帧.
        from: String,
        /// 目标帧.
        to: String,
    },

    /// 逐帧头动变换个数与 BOLD 帧数不一致.
    #[error("expected {expected} per-volume transforms, got {actual}")]
    VolumeCount {
        /// BOLD 帧数.
        expected: usize,
        /// 头动变换个数.
        actual: usize,
    },
}

/// 本 crate 的统一错误类型.
#[derive(Error, Debug)]
pub enum ResampleError {
    /// 变换链不连续.
    #[error(transparent)]
    Composition(#[from] CompositionError),

    /// 映射中缺少调用者保证存在的键.
    #[error("missing {what} for key `{key}` (available: {available:?})")]
    MissingKey {
        /// 被查找的内容.
        what: &'static str,
        /// 查找键.
        key: String,
        /// 已有的键.
        available: Vec<String>,
    },

    /// 模板在回退后仍无可用分辨率.
    #[error("no usable resolution for template `{template}` (tried {tried:?})")]
    ResolutionFallbackExhausted {
        /// 空间名 (模板加 cohort).
        template: String,
        /// 依次尝试过的分辨率.
        tried: Vec<String>,
    },

    /// 外部重采样内核失败.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// 工作流结构错误.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// 数组形状不一致.
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    Shape {
        /// 出错的对象.
        what: String,
        /// 期望形状.
        expected: Vec<usize>,
        /// 实际形状.
        actual: Vec<usize>,
    },

    /// 体素网格不合法 (例如仿射矩阵奇异).
    #[error("invalid geometry: {0}")]
    Geometry(String),

    /// 无法解析空间标识.
    #[error("cannot parse spatial reference `{input}`: {reason}")]
    Parse {
        /// 原始输入.
        input: String,
        /// 原因.
        reason: String,
    },

    /// 面积曲面与球面配准的顶点数不一致.
    #[error("area surface `{role}` has {actual} vertices, sphere has {expected}")]
    AreaMismatch {
        /// 曲面角色.
        role: &'static str,
        /// 球面顶点数.
        expected: usize,
        /// 面积曲面顶点数.
        actual: usize,
    },

    /// 配置不合法.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// 某个扇出分支 (空间, 半球或模板) 失败.
    #[error("branch `{label}` failed: {source}")]
    Branch {
        /// 分支标签, 例如 `std_trans[MNI152NLin6Asym_res-2]`.
        label: String,
        /// 原始错误.
        #[source]
        source: Box<ResampleError>,
    },
}

/// 运行时结果.
pub type Result<T> = std::result::Result<T, ResampleError>;

impl ResampleError {
    /// 构造 `MissingKey`.
    pub fn missing_key<K, I, S>(what: &'static str, key: K, available: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MissingKey {
            what,
            key: key.into(),
            available: available.into_iter().map(Into::into).collect(),
        }
    }

    /// 构造 `Shape`.
    pub fn shape(what: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::Shape {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// 用分支标签包装错误. 已经是分支错误的不再重复包装.
    pub fn in_branch(self, label: impl Into<String>) -> Self {
        match self {
            e @ Self::Branch { .. } => e,
            e => Self::Branch {
                label: label.into(),
                source: Box::new(e),
            },
        }
    }

    /// 沿分支链找到最内层的原始错误.
    pub fn root(&self) -> &ResampleError {
        match self {
            Self::Branch { source, .. } => source.root(),
            e => e,
        }
    }

    /// 最外层分支标签 (若有).
    pub fn branch_label(&self) -> Option<&str> {
        match self {
            Self::Branch { label, .. } => Some(label),
            _ => None,
        }
    }
}
