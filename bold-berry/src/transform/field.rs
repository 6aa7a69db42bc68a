use ndarray::Array3;

use crate::consts::FIELD_INVERSION_STEPS;
use crate::error::{ResampleError, Result};
use crate::volume::sample;
use crate::{Grid, Point3};

/// 稠密位移场 (畸变校正 warp).
///
/// 定义在目标帧的网格上: 目标帧中的点 `y` 对应源帧中的 `y + d(y)`.
/// `d` 按三线性插值取值, 网格外视为 0.
#[derive(Clone, Debug)]
pub struct DisplacementField {
    grid: Grid,
    components: [Array3<f32>; 3],
}

impl DisplacementField {
    /// 由三个分量 (x, y, z, 毫米) 创建位移场. 每个分量形状必须与 `grid` 一致.
    pub fn new(grid: Grid, components: [Array3<f32>; 3]) -> Result<Self> {
        for c in components.iter() {
            if c.shape() != grid.dims() {
                return Err(ResampleError::shape("displacement field", &grid.dims(), c.shape()));
            }
        }
        Ok(Self { grid, components })
    }

    /// 处处为常量位移的位移场.
    pub fn uniform(grid: Grid, d: [f32; 3]) -> Self {
        let components = d.map(|v| Array3::from_elem(grid.shape(), v));
        Self { grid, components }
    }

    /// 所在网格.
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// 点 `p` (目标帧) 处的位移.
    pub fn displacement(&self, p: &Point3) -> [f64; 3] {
        let v = self.grid.world_to_voxel(p);
        let mut ans = [0.0; 3];
        for (d, c) in ans.iter_mut().zip(self.components.iter()) {
            *d = sample::trilinear(&c.view(), v).unwrap_or(0.0) as f64;
        }
        ans
    }

    /// 目标帧 -> 源帧.
    pub fn pull(&self, p: &Point3) -> Point3 {
        let [dx, dy, dz] = self.displacement(p);
        Point3::new(p.x + dx, p.y + dy, p.z + dz)
    }

    /// 源帧 -> 目标帧, 即求解 `y + d(y) = x`.
    ///
    /// 用固定次数的不动点迭代 `y <- x - d(y)`, 对平滑且位移较小的场收敛.
    pub fn push(&self, x: &Point3) -> Point3 {
        let mut y = *x;
        for _ in 0..FIELD_INVERSION_STEPS {
            let [dx, dy, dz] = self.displacement(&y);
            y = Point3::new(x.x - dx, x.y - dy, x.z - dz);
        }
        y
    }
}
