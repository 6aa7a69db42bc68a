//! 体素网格, 三维体数据, 四维时间序列和布尔掩码.
//!
//! 索引统一为 `(i, j, k)`, 与 [`Grid`] 仿射矩阵的前三列对应.
//! 时间序列按 `[t, i, j, k]` 存储, 因此沿 `Axis(0)` 迭代即为逐帧迭代.

use std::ops::{Index, IndexMut};

use nalgebra::{Matrix4, Vector4};
use ndarray::{Array3, Array4, ArrayView3, ArrayView4, ArrayViewMut3, Axis};

use crate::consts::GEOMETRY_TOLERANCE;
use crate::error::{ResampleError, Result};
use crate::{Idx3d, Point3};

pub mod filter;
pub mod sample;
pub mod stats;

/// 体素网格: 形状加体素到世界坐标 (RAS, 毫米) 的仿射矩阵.
///
/// 逆矩阵在构造时计算并缓存, 构造后只读.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    shape: Idx3d,
    affine: Matrix4<f64>,
    inverse: Matrix4<f64>,
}

impl Grid {
    /// 由形状和仿射矩阵创建网格. 矩阵奇异或形状为空时返回 `Err`.
    pub fn new(shape: Idx3d, affine: Matrix4<f64>) -> Result<Self> {
        let (i, j, k) = shape;
        if i == 0 || j == 0 || k == 0 {
            return Err(ResampleError::Geometry(format!("empty grid shape {shape:?}")));
        }
        let inverse = affine
            .try_inverse()
            .ok_or_else(|| ResampleError::Geometry("singular voxel-to-world affine".into()))?;
        Ok(Self {
            shape,
            affine,
            inverse,
        })
    }

    /// 轴对齐网格: 体素尺寸为 `zooms`, 体素 `(0, 0, 0)` 的中心位于 `origin`.
    pub fn from_zooms(shape: Idx3d, zooms: [f64; 3], origin: [f64; 3]) -> Result<Self> {
        let mut affine = Matrix4::identity();
        for axis in 0..3 {
            affine[(axis, axis)] = zooms[axis];
            affine[(axis, 3)] = origin[axis];
        }
        Self::new(shape, affine)
    }

    /// 网格形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 以数组形式获取形状.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        let (i, j, k) = self.shape;
        [i, j, k]
    }

    /// 体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (i, j, k) = self.shape;
        i * j * k
    }

    /// 体素到世界坐标仿射矩阵.
    #[inline]
    pub fn affine(&self) -> &Matrix4<f64> {
        &self.affine
    }

    /// 世界坐标到体素坐标仿射矩阵.
    #[inline]
    pub fn inverse_affine(&self) -> &Matrix4<f64> {
        &self.inverse
    }

    /// 检查索引是否合法.
    #[inline]
    pub fn check(&self, (i0, j0, k0): Idx3d) -> bool {
        let (i, j, k) = self.shape;
        i0 < i && j0 < j && k0 < k
    }

    /// 连续体素坐标到世界坐标.
    #[inline]
    pub fn voxel_to_world(&self, [x, y, z]: [f64; 3]) -> Point3 {
        let v = self.affine * Vector4::new(x, y, z, 1.0);
        Point3::new(v.x, v.y, v.z)
    }

    /// 整数索引 (体素中心) 到世界坐标.
    #[inline]
    pub fn index_to_world(&self, (i, j, k): Idx3d) -> Point3 {
        self.voxel_to_world([i as f64, j as f64, k as f64])
    }

    /// 世界坐标到连续体素坐标.
    #[inline]
    pub fn world_to_voxel(&self, p: &Point3) -> [f64; 3] {
        let v = self.inverse * Vector4::new(p.x, p.y, p.z, 1.0);
        [v.x, v.y, v.z]
    }

    /// 各轴体素尺寸 (毫米), 即仿射矩阵前三列的长度.
    pub fn zooms(&self) -> [f64; 3] {
        let mut ans = [0.0; 3];
        for (axis, z) in ans.iter_mut().enumerate() {
            *z = self.affine.fixed_view::<3, 1>(0, axis).norm();
        }
        ans
    }

    /// 两个网格是否描述同一组体素 (形状相同, 仿射在容差内相等).
    pub fn same_as(&self, other: &Grid) -> bool {
        self.shape == other.shape
            && self
                .affine
                .iter()
                .zip(other.affine.iter())
                .all(|(a, b)| (a - b).abs() <= GEOMETRY_TOLERANCE)
    }

    /// 保持方向和视野, 以新的体素尺寸 `zooms` 重新划分网格.
    ///
    /// 体素 `(0, 0, 0)` 的中心位置保持不变, 新形状向上取整以覆盖原视野.
    pub fn with_zooms(&self, zooms: [f64; 3]) -> Result<Grid> {
        if zooms.iter().any(|z| !z.is_finite() || *z <= 0.0) {
            return Err(ResampleError::Geometry(format!("invalid zooms {zooms:?}")));
        }
        let old = self.zooms();
        let dims = self.dims();
        let mut affine = self.affine;
        let mut shape = [0usize; 3];
        for axis in 0..3 {
            let scale = zooms[axis] / old[axis];
            for row in 0..3 {
                affine[(row, axis)] *= scale;
            }
            let extent = dims[axis] as f64 * old[axis];
            shape[axis] = ((extent / zooms[axis]) - 1e-6).ceil().max(1.0) as usize;
        }
        Grid::new((shape[0], shape[1], shape[2]), affine)
    }
}

/// 三维体数据.
#[derive(Clone, Debug)]
pub struct Volume {
    grid: Grid,
    data: Array3<f32>,
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for Volume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Volume {
    /// 创建体数据. `data` 形状必须与 `grid` 一致.
    pub fn new(grid: Grid, data: Array3<f32>) -> Result<Self> {
        if data.shape() != grid.dims() {
            return Err(ResampleError::shape("volume", &grid.dims(), data.shape()));
        }
        Ok(Self { grid, data })
    }

    /// 全零体数据.
    pub fn zeros(grid: Grid) -> Self {
        let data = Array3::zeros(grid.shape());
        Self { grid, data }
    }

    /// 所在网格.
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.data.view_mut()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    /// 按 `> 0` 二值化为掩码.
    pub fn to_mask(&self) -> Mask {
        Mask {
            grid: self.grid.clone(),
            data: self.data.mapv(|v| v > 0.0),
        }
    }
}

/// 四维时间序列, 可附带重复时间 (秒).
#[derive(Clone, Debug)]
pub struct Series {
    grid: Grid,
    data: Array4<f32>,
    repetition_time: Option<f64>,
}

impl Series {
    /// 创建序列. `data` 为 `[t, i, j, k]`, 空间形状必须与 `grid` 一致, 且至少一帧.
    pub fn new(grid: Grid, data: Array4<f32>) -> Result<Self> {
        let shape = data.shape();
        if shape[0] == 0 || shape[1..] != grid.dims() {
            let (i, j, k) = grid.shape();
            return Err(ResampleError::shape("series", &[shape[0].max(1), i, j, k], shape));
        }
        Ok(Self {
            grid,
            data,
            repetition_time: None,
        })
    }

    /// 附带重复时间.
    #[inline]
    pub fn with_repetition_time(mut self, tr: f64) -> Self {
        self.repetition_time = Some(tr);
        self
    }

    /// 重复时间 (若已知).
    #[inline]
    pub fn repetition_time(&self) -> Option<f64> {
        self.repetition_time
    }

    /// 所在网格.
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// 帧数.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 序列不可能为空, 该方法总是返回 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_data(self) -> Array4<f32> {
        self.data
    }

    /// 第 `t` 帧的视图. 越界时 panic.
    #[inline]
    pub fn frame(&self, t: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), t)
    }

    /// 逐帧拆分为独立的体数据.
    pub fn split(&self) -> Vec<Volume> {
        self.data
            .axis_iter(Axis(0))
            .map(|v| Volume {
                grid: self.grid.clone(),
                data: v.to_owned(),
            })
            .collect()
    }

    /// 将多帧体数据按顺序合并为序列. 所有帧必须位于同一网格.
    pub fn merge(volumes: Vec<Volume>, repetition_time: Option<f64>) -> Result<Self> {
        let first = volumes
            .first()
            .ok_or_else(|| ResampleError::shape("series", &[1], &[0]))?;
        let grid = first.grid.clone();
        if let Some(bad) = volumes.iter().find(|v| !v.grid.same_as(&grid)) {
            return Err(ResampleError::shape(
                "merged frame",
                &grid.dims(),
                &bad.grid.dims(),
            ));
        }
        let views: Vec<_> = volumes.iter().map(|v| v.data.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| ResampleError::Geometry(format!("cannot stack frames: {e}")))?;
        Ok(Self {
            grid,
            data,
            repetition_time,
        })
    }
}

/// 三维布尔掩码.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    grid: Grid,
    data: Array3<bool>,
}

impl Index<Idx3d> for Mask {
    type Output = bool;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Mask {
    /// 创建掩码. `data` 形状必须与 `grid` 一致.
    pub fn new(grid: Grid, data: Array3<bool>) -> Result<Self> {
        if data.shape() != grid.dims() {
            return Err(ResampleError::shape("mask", &grid.dims(), data.shape()));
        }
        Ok(Self { grid, data })
    }

    /// 全真掩码.
    pub fn full(grid: Grid) -> Self {
        let data = Array3::from_elem(grid.shape(), true);
        Self { grid, data }
    }

    /// 所在网格.
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, bool> {
        self.data.view()
    }

    /// 为真的体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|b| **b).count()
    }

    /// 与另一个同网格掩码求交.
    pub fn intersect(&self, other: &Mask) -> Result<Mask> {
        if !self.grid.same_as(&other.grid) {
            return Err(ResampleError::shape(
                "mask intersection",
                &self.grid.dims(),
                &other.grid.dims(),
            ));
        }
        let mut data = self.data.clone();
        data.zip_mut_with(&other.data, |a, b| *a = *a && *b);
        Ok(Mask {
            grid: self.grid.clone(),
            data,
        })
    }

    /// 判断 `self` 是否是 `other` 的子集.
    pub fn is_subset_of(&self, other: &Mask) -> bool {
        self.data
            .iter()
            .zip(other.data.iter())
            .all(|(a, b)| !*a || *b)
    }

    /// 转换为 0/1 体数据, 以便交给体素重采样内核.
    pub fn to_volume(&self) -> Volume {
        Volume {
            grid: self.grid.clone(),
            data: self.data.mapv(|b| if b { 1.0 } else { 0.0 }),
        }
    }
}
