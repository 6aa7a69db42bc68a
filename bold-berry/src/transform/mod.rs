//! 坐标帧之间的空间变换.
//!
//! 约定: 所有变换都以 RAS 世界坐标 (毫米) 描述. `push` 把源帧中的点映射到目标帧,
//! `pull` 把目标帧中的点拉回源帧. 重采样总是对输出网格上的每个点做 `pull`,
//! 因此一条链只需要一次插值.

use std::fmt;
use std::sync::Arc;

use nalgebra::{Matrix4, Vector4};

use crate::error::CompositionError;
use crate::Point3;

mod chain;
mod field;
mod format;

pub use chain::{compose, SeriesChain, TransformChain};
pub use field::DisplacementField;
pub use format::{itk_to_lta, ItkAffine, LtaAffine, LtaKind};

/// 命名坐标帧, 例如 `bold`, `boldref`, `T1w`, `MNI152NLin6Asym`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame(String);

impl Frame {
    /// 创建帧.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// 帧名.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// 变换的具体映射.
#[derive(Clone, Debug)]
pub enum Mapping {
    /// 恒等映射.
    Identity,

    /// 仿射映射, `forward` 为源到目标的齐次矩阵, `inverse` 为其逆.
    Affine {
        /// 源 -> 目标.
        forward: Matrix4<f64>,
        /// 目标 -> 源.
        inverse: Matrix4<f64>,
    },

    /// 稠密位移场.
    Field(Arc<DisplacementField>),

    /// 按源到目标顺序依次应用的若干变换.
    Composite(Arc<[Transform]>),
}

/// 两个坐标帧之间的空间变换. 构造后只读, 克隆代价低.
#[derive(Clone, Debug)]
pub struct Transform {
    source: Frame,
    destination: Frame,
    mapping: Mapping,
}

#[inline]
fn apply(m: &Matrix4<f64>, p: &Point3) -> Point3 {
    let v = m * Vector4::new(p.x, p.y, p.z, 1.0);
    Point3::new(v.x, v.y, v.z)
}

impl Transform {
    /// 恒等变换. 源帧与目标帧可以不同 (例如两个已对齐的空间).
    pub fn identity(source: impl Into<Frame>, destination: impl Into<Frame>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            mapping: Mapping::Identity,
        }
    }

    /// 仿射变换, `matrix` 把源帧中的点映射到目标帧. 矩阵奇异时返回 `Err`.
    pub fn affine(
        source: impl Into<Frame>,
        destination: impl Into<Frame>,
        matrix: Matrix4<f64>,
    ) -> Result<Self, CompositionError> {
        let source = source.into();
        let destination = destination.into();
        let inverse = matrix.try_inverse().ok_or_else(|| CompositionError::Singular {
            from: source.to_string(),
            to: destination.to_string(),
        })?;
        Ok(Self {
            source,
            destination,
            mapping: Mapping::Affine {
                forward: matrix,
                inverse,
            },
        })
    }

    /// 平移变换.
    pub fn translation(
        source: impl Into<Frame>,
        destination: impl Into<Frame>,
        offset: [f64; 3],
    ) -> Self {
        let mut forward = Matrix4::identity();
        let mut inverse = Matrix4::identity();
        for axis in 0..3 {
            forward[(axis, 3)] = offset[axis];
            inverse[(axis, 3)] = -offset[axis];
        }
        Self {
            source: source.into(),
            destination: destination.into(),
            mapping: Mapping::Affine { forward, inverse },
        }
    }

    /// 位移场变换. 位移场定义在目标帧的网格上.
    pub fn field(
        source: impl Into<Frame>,
        destination: impl Into<Frame>,
        field: Arc<DisplacementField>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            mapping: Mapping::Field(field),
        }
    }

    /// 源帧.
    #[inline]
    pub fn source(&self) -> &Frame {
        &self.source
    }

    /// 目标帧.
    #[inline]
    pub fn destination(&self) -> &Frame {
        &self.destination
    }

    /// 具体映射.
    #[inline]
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// 若映射是线性的 (恒等, 仿射, 或全由它们组成的复合), 返回源到目标矩阵.
    pub fn as_matrix(&self) -> Option<Matrix4<f64>> {
        match &self.mapping {
            Mapping::Identity => Some(Matrix4::identity()),
            Mapping::Affine { forward, .. } => Some(*forward),
            Mapping::Field(_) => None,
            Mapping::Composite(steps) => steps
                .iter()
                .try_fold(Matrix4::identity(), |acc, t| t.as_matrix().map(|m| m * acc)),
        }
    }

    /// 源帧中的点映射到目标帧.
    pub fn push(&self, p: &Point3) -> Point3 {
        match &self.mapping {
            Mapping::Identity => *p,
            Mapping::Affine { forward, .. } => apply(forward, p),
            Mapping::Field(field) => field.push(p),
            Mapping::Composite(steps) => steps.iter().fold(*p, |q, t| t.push(&q)),
        }
    }

    /// 目标帧中的点拉回源帧.
    pub fn pull(&self, p: &Point3) -> Point3 {
        match &self.mapping {
            Mapping::Identity => *p,
            Mapping::Affine { inverse, .. } => apply(inverse, p),
            Mapping::Field(field) => field.pull(p),
            Mapping::Composite(steps) => steps.iter().rev().fold(*p, |q, t| t.pull(&q)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_push_pull() {
        let mut m = Matrix4::identity();
        m[(0, 0)] = 2.0;
        m[(1, 3)] = 5.0;
        let t = Transform::affine("a", "b", m).unwrap();
        let p = Point3::new(1.0, 1.0, 1.0);
        let q = t.push(&p);
        assert_eq!(q, Point3::new(2.0, 6.0, 1.0));
        assert!((t.pull(&q) - p).norm() < 1e-12);
        assert_eq!(t.source().as_str(), "a");
    }

    #[test]
    fn test_singular_affine() {
        let mut m = Matrix4::identity();
        m[(1, 1)] = 0.0;
        let err = Transform::affine("a", "b", m).unwrap_err();
        assert!(matches!(err, CompositionError::Singular { .. }));
    }

    #[test]
    fn test_translation_matrix() {
        let t = Transform::translation("a", "b", [1.0, -2.0, 3.0]);
        let m = t.as_matrix().unwrap();
        assert_eq!(m[(1, 3)], -2.0);
        assert_eq!(t.pull(&Point3::new(1.0, -2.0, 3.0)), Point3::origin());
    }
}
