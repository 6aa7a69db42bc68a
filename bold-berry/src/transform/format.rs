//! 仿射变换的两种外部表示: ITK (LPS, 固定图像到移动图像的点映射)
//! 与 LTA (FreeSurfer, RAS 或体素坐标, 带源/目标几何).
//!
//! 仿射矩阵的数值含义只相对于一对参考几何才有定义. 这里所有转换都显式接收两张参考网格,
//! 并在结果中保存它们.

use nalgebra::{Matrix3, Matrix4, Vector3};

use super::{Frame, Transform};
use crate::error::CompositionError;
use crate::Grid;

/// RAS <-> LPS 翻转, 自逆.
fn lps_flip() -> Matrix4<f64> {
    Matrix4::from_diagonal(&nalgebra::Vector4::new(-1.0, -1.0, 1.0, 1.0))
}

/// ITK 仿射: LPS 坐标中把 **目标 (固定)** 帧的点映射到 **源 (移动)** 帧.
#[derive(Clone, Debug, PartialEq)]
pub struct ItkAffine {
    matrix: Matrix4<f64>,
}

impl ItkAffine {
    /// 由 LPS 齐次矩阵创建.
    pub fn new(matrix: Matrix4<f64>) -> Self {
        Self { matrix }
    }

    /// 由 ITK 文本格式的参数创建: 按行排列的 3x3 矩阵加平移 (12 个数),
    /// 以及旋转中心 (`FixedParameters`). 偏移量为 `t + c - A c`.
    pub fn from_parameters(parameters: &[f64; 12], center: [f64; 3]) -> Self {
        let a = Matrix3::from_row_slice(&parameters[..9]);
        let t = Vector3::new(parameters[9], parameters[10], parameters[11]);
        let c = Vector3::from(center);
        let offset = t + c - a * c;
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&a);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&offset);
        Self { matrix }
    }

    /// LPS 齐次矩阵.
    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    /// 由线性变换得到 ITK 表示. 非线性变换返回 `None`.
    pub fn from_transform(t: &Transform) -> Option<Self> {
        let forward = t.as_matrix()?;
        let pull = forward.try_inverse()?;
        let f = lps_flip();
        Some(Self {
            matrix: f * pull * f,
        })
    }

    /// RAS 坐标中源到目标的矩阵.
    pub fn ras_forward(&self) -> Result<Matrix4<f64>, CompositionError> {
        let f = lps_flip();
        (f * self.matrix * f)
            .try_inverse()
            .ok_or_else(|| CompositionError::Singular {
                from: "itk".into(),
                to: "ras".into(),
            })
    }

    /// 转为本 crate 的变换.
    pub fn to_transform(
        &self,
        source: impl Into<Frame>,
        destination: impl Into<Frame>,
    ) -> Result<Transform, CompositionError> {
        Transform::affine(source, destination, self.ras_forward()?)
    }
}

/// LTA 矩阵的坐标类型.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LtaKind {
    /// 世界坐标 (RAS) 到世界坐标.
    RasToRas,

    /// 源体素坐标到目标体素坐标.
    VoxToVox,
}

/// LTA 仿射: 源几何到目标几何, 携带两张参考网格.
#[derive(Clone, Debug, PartialEq)]
pub struct LtaAffine {
    kind: LtaKind,
    matrix: Matrix4<f64>,
    src: Grid,
    dst: Grid,
}

impl LtaAffine {
    /// 由 RAS 到 RAS 矩阵创建.
    pub fn from_ras2ras(matrix: Matrix4<f64>, src: Grid, dst: Grid) -> Self {
        Self {
            kind: LtaKind::RasToRas,
            matrix,
            src,
            dst,
        }
    }

    /// 矩阵坐标类型.
    #[inline]
    pub fn kind(&self) -> LtaKind {
        self.kind
    }

    /// 当前坐标类型下的矩阵.
    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    /// 源几何.
    #[inline]
    pub fn src(&self) -> &Grid {
        &self.src
    }

    /// 目标几何.
    #[inline]
    pub fn dst(&self) -> &Grid {
        &self.dst
    }

    /// RAS 到 RAS 矩阵.
    pub fn ras2ras(&self) -> Matrix4<f64> {
        match self.kind {
            LtaKind::RasToRas => self.matrix,
            LtaKind::VoxToVox => self.dst.affine() * self.matrix * self.src.inverse_affine(),
        }
    }

    /// 体素到体素矩阵: `dst^-1 * ras2ras * src`.
    pub fn vox2vox(&self) -> Matrix4<f64> {
        match self.kind {
            LtaKind::RasToRas => self.dst.inverse_affine() * self.matrix * self.src.affine(),
            LtaKind::VoxToVox => self.matrix,
        }
    }

    /// 转换到指定坐标类型, 参考几何不变.
    pub fn to_kind(&self, kind: LtaKind) -> Self {
        let matrix = match kind {
            LtaKind::RasToRas => self.ras2ras(),
            LtaKind::VoxToVox => self.vox2vox(),
        };
        Self {
            kind,
            matrix,
            src: self.src.clone(),
            dst: self.dst.clone(),
        }
    }

    /// 源体素坐标映射到目标体素坐标.
    pub fn map_voxel(&self, [x, y, z]: [f64; 3]) -> [f64; 3] {
        let v = self.vox2vox() * nalgebra::Vector4::new(x, y, z, 1.0);
        [v.x, v.y, v.z]
    }

    /// 转为本 crate 的变换.
    pub fn to_transform(
        &self,
        source: impl Into<Frame>,
        destination: impl Into<Frame>,
    ) -> Result<Transform, CompositionError> {
        Transform::affine(source, destination, self.ras2ras())
    }
}

/// ITK 仿射转为 LTA, 源几何与目标几何必须是下游真正使用的那两张网格.
pub fn itk_to_lta(itk: &ItkAffine, src: &Grid, dst: &Grid) -> Result<LtaAffine, CompositionError> {
    Ok(LtaAffine::from_ras2ras(
        itk.ras_forward()?,
        src.clone(),
        dst.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point3;

    fn known() -> Transform {
        let r = nalgebra::Rotation3::from_euler_angles(0.1, -0.2, 0.3);
        let mut m: Matrix4<f64> = r.to_homogeneous();
        m[(0, 3)] = 4.0;
        m[(1, 3)] = -7.0;
        m[(2, 3)] = 1.5;
        Transform::affine("T1w", "fsnative", m).unwrap()
    }

    fn grids() -> (Grid, Grid) {
        let src = Grid::from_zooms((64, 64, 40), [1.0, 1.0, 1.2], [-32.0, -32.0, -24.0]).unwrap();
        let dst = Grid::from_zooms((128, 128, 128), [1.0; 3], [-64.0, -64.0, -64.0]).unwrap();
        (src, dst)
    }

    #[test]
    fn test_itk_round_trip() {
        let t = known();
        let itk = ItkAffine::from_transform(&t).unwrap();
        let back = itk.to_transform("T1w", "fsnative").unwrap();
        let p = Point3::new(10.0, -3.0, 22.0);
        assert!((back.push(&p) - t.push(&p)).norm() < 1e-9);

        // ITK 矩阵在 LPS 中做的是拉回.
        let q = t.push(&p);
        let lps = itk.matrix() * nalgebra::Vector4::new(-q.x, -q.y, q.z, 1.0);
        assert!((-lps.x - p.x).abs() < 1e-9 && (-lps.y - p.y).abs() < 1e-9 && (lps.z - p.z).abs() < 1e-9);
    }

    #[test]
    fn test_itk_parameters_center() {
        // 绕中心 (1, 2, 3) 的恒等 + 平移.
        let mut p = [0.0; 12];
        p[0] = 1.0;
        p[4] = 1.0;
        p[8] = 1.0;
        p[9] = 5.0;
        let itk = ItkAffine::from_parameters(&p, [1.0, 2.0, 3.0]);
        assert_eq!(itk.matrix()[(0, 3)], 5.0);
        assert_eq!(itk.matrix()[(1, 3)], 0.0);
    }

    #[test]
    fn test_lta_known_point_through_both_representations() {
        let t = known();
        let (src, dst) = grids();
        let itk = ItkAffine::from_transform(&t).unwrap();
        let lta = itk_to_lta(&itk, &src, &dst).unwrap();

        let v = [12.0, 40.0, 7.5];
        let expected = dst.world_to_voxel(&t.push(&src.voxel_to_world(v)));
        let got = lta.map_voxel(v);
        for axis in 0..3 {
            assert!((got[axis] - expected[axis]).abs() < 1e-9);
        }
        let vox = lta.to_kind(LtaKind::VoxToVox);
        assert_eq!(vox.kind(), LtaKind::VoxToVox);
        assert!((vox.ras2ras() - lta.ras2ras()).norm() < 1e-9);
        let p = Point3::new(1.0, 2.0, 3.0);
        let via = vox.to_transform("T1w", "fsnative").unwrap();
        assert!((via.push(&p) - t.push(&p)).norm() < 1e-9);
    }

    #[test]
    fn test_lta_swapped_references_differ() {
        let t = known();
        let (src, dst) = grids();
        let itk = ItkAffine::from_transform(&t).unwrap();
        let right = itk_to_lta(&itk, &src, &dst).unwrap();
        let swapped = itk_to_lta(&itk, &dst, &src).unwrap();
        let v = [12.0, 40.0, 7.5];
        let a = right.map_voxel(v);
        let b = swapped.map_voxel(v);
        assert!((0..3).any(|axis| (a[axis] - b[axis]).abs() > 1.0));
    }
}
