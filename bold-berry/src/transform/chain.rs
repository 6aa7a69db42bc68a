use std::sync::Arc;

use super::{Frame, Mapping, Transform};
use crate::error::CompositionError;
use crate::Point3;

/// 检查帧连续性: 第 `i` 个变换的目标帧必须等于第 `i + 1` 个的源帧.
fn check_continuity(steps: &[Transform]) -> Result<(), CompositionError> {
    if steps.is_empty() {
        return Err(CompositionError::Empty);
    }
    for (index, pair) in steps.windows(2).enumerate() {
        if pair[0].destination() != pair[1].source() {
            return Err(CompositionError::FrameBreak {
                index,
                destination: pair[0].destination().to_string(),
                next: pair[1].source().to_string(),
            });
        }
    }
    Ok(())
}

/// 把按 **源到目标** 顺序排列的变换合成为一个等价变换.
///
/// 链中全为线性映射时折叠为单个仿射矩阵; 否则得到展平的复合变换.
/// 帧不连续时在做任何计算之前返回 `Err`.
pub fn compose(steps: &[Transform]) -> Result<Transform, CompositionError> {
    check_continuity(steps)?;
    let source = steps[0].source().clone();
    let destination = steps[steps.len() - 1].destination().clone();
    if steps.len() == 1 {
        return Ok(steps[0].clone());
    }

    let matrix = steps
        .iter()
        .try_fold(nalgebra::Matrix4::identity(), |acc, t| t.as_matrix().map(|m| m * acc));
    if let Some(m) = matrix {
        return Transform::affine(source, destination, m);
    }

    let mut flat = Vec::with_capacity(steps.len());
    for t in steps {
        match t.mapping() {
            Mapping::Composite(inner) => flat.extend(inner.iter().cloned()),
            _ => flat.push(t.clone()),
        }
    }
    Ok(Transform {
        source,
        destination,
        mapping: Mapping::Composite(Arc::from(flat)),
    })
}

/// 经过连续性校验的变换链.
///
/// 保存原始步骤 (源到目标顺序) 以及合成后的等价变换.
#[derive(Clone, Debug)]
pub struct TransformChain {
    steps: Arc<[Transform]>,
    composed: Transform,
}

impl TransformChain {
    /// 由源到目标顺序的步骤创建链.
    pub fn new(steps: Vec<Transform>) -> Result<Self, CompositionError> {
        let composed = compose(&steps)?;
        Ok(Self {
            steps: Arc::from(steps),
            composed,
        })
    }

    /// 按 "最外层在前" 的记法创建链, 即 `[anat2std, bold2anat, sdc, hmc]`.
    pub fn from_outermost_first(mut steps: Vec<Transform>) -> Result<Self, CompositionError> {
        steps.reverse();
        Self::new(steps)
    }

    /// 原始步骤.
    #[inline]
    pub fn steps(&self) -> &[Transform] {
        &self.steps
    }

    /// 合成后的等价变换.
    #[inline]
    pub fn composed(&self) -> &Transform {
        &self.composed
    }

    /// 链的源帧.
    #[inline]
    pub fn source(&self) -> &Frame {
        self.composed.source()
    }

    /// 链的目标帧.
    #[inline]
    pub fn destination(&self) -> &Frame {
        self.composed.destination()
    }

    /// 把目标帧中的点拉回源帧.
    #[inline]
    pub fn pull(&self, p: &Point3) -> Point3 {
        self.composed.pull(p)
    }

    /// 把源帧中的点推到目标帧.
    #[inline]
    pub fn push(&self, p: &Point3) -> Point3 {
        self.composed.push(p)
    }
}

/// 逐帧变换链: 第 `t` 帧使用 `[hmc_t, tail...]`.
///
/// 所有链在构造时一次性校验, 任何一帧不连续都会在重采样前失败.
#[derive(Clone, Debug)]
pub struct SeriesChain {
    chains: Vec<TransformChain>,
}

impl SeriesChain {
    /// 由逐帧头动变换和公共尾部 (源到目标顺序) 构建. `hmc` 个数必须等于帧数.
    pub fn new(
        hmc: &[Transform],
        tail: &[Transform],
        n_volumes: usize,
    ) -> Result<Self, CompositionError> {
        if hmc.len() != n_volumes {
            return Err(CompositionError::VolumeCount {
                expected: n_volumes,
                actual: hmc.len(),
            });
        }
        // 尾部与头动无关, 先合成一次.
        let tail = if tail.is_empty() {
            None
        } else {
            Some(compose(tail)?)
        };
        let chains = hmc
            .iter()
            .map(|h| {
                let mut steps = Vec::with_capacity(2);
                steps.push(h.clone());
                steps.extend(tail.iter().cloned());
                TransformChain::new(steps)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { chains })
    }

    /// 帧数.
    #[inline]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// 是否没有任何帧.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// 第 `t` 帧的链.
    #[inline]
    pub fn get(&self, t: usize) -> Option<&TransformChain> {
        self.chains.get(t)
    }

    /// 逐帧迭代.
    pub fn iter(&self) -> impl Iterator<Item = &TransformChain> {
        self.chains.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::DisplacementField;
    use crate::Grid;
    use nalgebra::Matrix4;

    fn rotation_z(src: &str, dst: &str, deg: f64) -> Transform {
        let r = nalgebra::Rotation3::from_axis_angle(&nalgebra::Vector3::z_axis(), deg.to_radians());
        let m: Matrix4<f64> = r.to_homogeneous();
        Transform::affine(src, dst, m).unwrap()
    }

    fn sample_steps() -> Vec<Transform> {
        let g = Grid::from_zooms((20, 20, 20), [2.0; 3], [-20.0; 3]).unwrap();
        let f = DisplacementField::uniform(g, [0.5, -0.25, 0.0]);
        vec![
            rotation_z("bold", "boldref", 10.0),
            Transform::field("boldref", "boldref", Arc::new(f)),
            Transform::translation("boldref", "T1w", [3.0, 0.0, -1.0]),
            rotation_z("T1w", "MNI", -30.0),
        ]
    }

    #[test]
    fn test_compose_associative() {
        let s = sample_steps();
        let p = Point3::new(1.0, 2.0, 3.0);

        let all = compose(&s).unwrap();
        let left = compose(&[compose(&s[..2]).unwrap(), compose(&s[2..]).unwrap()]).unwrap();
        let right = compose(&[s[0].clone(), compose(&s[1..]).unwrap()]).unwrap();
        let nested = compose(&[compose(&[s[0].clone(), s[1].clone(), s[2].clone()]).unwrap(), s[3].clone()]).unwrap();

        let expected = s.iter().fold(p, |q, t| t.push(&q));
        for t in [&all, &left, &right, &nested] {
            assert!((t.push(&p) - expected).norm() < 1e-9);
            assert_eq!(t.source().as_str(), "bold");
            assert_eq!(t.destination().as_str(), "MNI");
        }
        let y = Point3::new(-4.0, 0.5, 2.0);
        assert!((left.pull(&y) - right.pull(&y)).norm() < 1e-9);
    }

    #[test]
    fn test_affine_only_chain_collapses() {
        let s = sample_steps();
        let t = compose(&[s[0].clone(), s[2].clone(), s[3].clone()]).unwrap();
        assert!(matches!(t.mapping(), Mapping::Affine { .. }));
        let t = compose(&s).unwrap();
        match t.mapping() {
            Mapping::Composite(steps) => assert_eq!(steps.len(), 4),
            other => panic!("unexpected mapping {other:?}"),
        }
    }

    #[test]
    fn test_frame_break() {
        let s = sample_steps();
        let err = TransformChain::new(vec![s[0].clone(), s[3].clone()]).unwrap_err();
        assert_eq!(
            err,
            CompositionError::FrameBreak {
                index: 0,
                destination: "boldref".into(),
                next: "T1w".into(),
            }
        );
        assert_eq!(TransformChain::new(vec![]).unwrap_err(), CompositionError::Empty);
    }

    #[test]
    fn test_outermost_first_order() {
        let s = sample_steps();
        let a = TransformChain::new(s.clone()).unwrap();
        let mut rev = s;
        rev.reverse();
        let b = TransformChain::from_outermost_first(rev).unwrap();
        let p = Point3::new(0.0, 1.0, 0.0);
        assert!((a.push(&p) - b.push(&p)).norm() < 1e-12);
    }

    #[test]
    fn test_series_chain_counts() {
        let s = sample_steps();
        let hmc = vec![s[0].clone(); 3];
        let chain = SeriesChain::new(&hmc, &s[1..], 3).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.get(2).unwrap().destination().as_str(), "MNI");
        let err = SeriesChain::new(&hmc, &s[1..], 4).unwrap_err();
        assert_eq!(err, CompositionError::VolumeCount { expected: 4, actual: 3 });
        // 尾部不连续.
        let err = SeriesChain::new(&hmc, &[s[1].clone(), s[3].clone()], 3).unwrap_err();
        assert!(matches!(err, CompositionError::FrameBreak { .. }));
    }
}
