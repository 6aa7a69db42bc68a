//! 皮层表面: 半球, 三角网格, 形态学数据, 以及按半球选取曲面.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ndarray::Array1;

use crate::error::{ResampleError, Result};
use crate::Point3;

pub mod dilate;
pub mod fslr;
pub mod fsnative;
pub mod roi;

/// 半球.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Hemisphere {
    /// 左半球.
    Left,
    /// 右半球.
    Right,
}

impl Hemisphere {
    /// 按输出顺序排列的两个半球.
    pub const BOTH: [Hemisphere; 2] = [Hemisphere::Left, Hemisphere::Right];

    /// BIDS 标签 `L` / `R`.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Left => "L",
            Self::Right => "R",
        }
    }

    /// FreeSurfer 前缀 `lh` / `rh`.
    pub const fn fs_prefix(self) -> &'static str {
        match self {
            Self::Left => "lh",
            Self::Right => "rh",
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 按位置配对的左右半球结果. 两者相互独立, 不做合并.
#[derive(Clone, Debug, PartialEq)]
pub struct HemiPair<T> {
    /// 左半球.
    pub left: T,
    /// 右半球.
    pub right: T,
}

impl<T> HemiPair<T> {
    /// 直接创建.
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    /// 对两个半球分别调用 `f`.
    pub fn from_fn<F: FnMut(Hemisphere) -> T>(mut f: F) -> Self {
        Self {
            left: f(Hemisphere::Left),
            right: f(Hemisphere::Right),
        }
    }

    /// 对两个半球分别调用可能失败的 `f`.
    pub fn try_from_fn<F: FnMut(Hemisphere) -> Result<T>>(mut f: F) -> Result<Self> {
        Ok(Self {
            left: f(Hemisphere::Left)?,
            right: f(Hemisphere::Right)?,
        })
    }

    /// 由按 `[L, R]` 顺序排列的结果构建. 长度不为 2 时返回 `Err`.
    pub fn try_from_vec(items: Vec<T>) -> Result<Self> {
        let n = items.len();
        let mut it = items.into_iter();
        match (it.next(), it.next(), it.next()) {
            (Some(left), Some(right), None) => Ok(Self { left, right }),
            _ => Err(ResampleError::shape("hemisphere pair", &[2], &[n])),
        }
    }

    /// 取出一个半球.
    pub fn get(&self, hemi: Hemisphere) -> &T {
        match hemi {
            Hemisphere::Left => &self.left,
            Hemisphere::Right => &self.right,
        }
    }

    /// 逐半球映射.
    pub fn map<U, F: FnMut(T) -> U>(self, mut f: F) -> HemiPair<U> {
        HemiPair {
            left: f(self.left),
            right: f(self.right),
        }
    }

    /// 按 `[L, R]` 顺序迭代.
    pub fn iter(&self) -> impl Iterator<Item = (Hemisphere, &T)> {
        [(Hemisphere::Left, &self.left), (Hemisphere::Right, &self.right)].into_iter()
    }
}

/// 三角网格. 构造时预先计算邻接关系与边界顶点.
#[derive(Clone, Debug)]
pub struct Mesh {
    vertices: Vec<Point3>,
    faces: Vec<[usize; 3]>,
    neighbours: Vec<Vec<usize>>,
    boundary: Vec<bool>,
}

impl Mesh {
    /// 由顶点与三角面创建. 面引用越界或退化 (重复顶点) 时返回 `Err`.
    pub fn new(vertices: Vec<Point3>, faces: Vec<[usize; 3]>) -> Result<Self> {
        let n = vertices.len();
        let mut neighbours = vec![Vec::new(); n];
        let mut edges: HashMap<(usize, usize), usize> = HashMap::with_capacity(faces.len() * 3 / 2);
        for (f, face) in faces.iter().enumerate() {
            if face.iter().any(|v| *v >= n) {
                return Err(ResampleError::Geometry(format!(
                    "face {f} references a vertex outside 0..{n}"
                )));
            }
            let [a, b, c] = *face;
            if a == b || b == c || a == c {
                return Err(ResampleError::Geometry(format!("face {f} is degenerate")));
            }
            for (x, y) in [(a, b), (b, c), (c, a)] {
                neighbours[x].push(y);
                neighbours[y].push(x);
                *edges.entry((x.min(y), x.max(y))).or_default() += 1;
            }
        }
        for list in neighbours.iter_mut() {
            list.sort_unstable();
            list.dedup();
        }
        let mut boundary = vec![false; n];
        for ((x, y), count) in edges {
            if count == 1 {
                boundary[x] = true;
                boundary[y] = true;
            }
        }
        Ok(Self {
            vertices,
            faces,
            neighbours,
            boundary,
        })
    }

    /// 拓扑不变, 替换顶点坐标.
    pub fn with_vertices(&self, vertices: Vec<Point3>) -> Result<Self> {
        if vertices.len() != self.vertices.len() {
            return Err(ResampleError::shape(
                "mesh vertices",
                &[self.vertices.len()],
                &[vertices.len()],
            ));
        }
        Ok(Self {
            vertices,
            faces: self.faces.clone(),
            neighbours: self.neighbours.clone(),
            boundary: self.boundary.clone(),
        })
    }

    /// 顶点数.
    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// 是否没有顶点.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// 顶点坐标.
    #[inline]
    pub fn vertices(&self) -> &[Point3] {
        &self.vertices
    }

    /// 三角面.
    #[inline]
    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// 顶点 `v` 的邻居 (升序).
    #[inline]
    pub fn neighbours(&self, v: usize) -> &[usize] {
        &self.neighbours[v]
    }

    /// 顶点 `v` 是否位于网格边界上.
    #[inline]
    pub fn is_boundary(&self, v: usize) -> bool {
        self.boundary[v]
    }

    /// 网格是否开放 (存在只属于一个面的边).
    pub fn is_open(&self) -> bool {
        self.boundary.iter().any(|b| *b)
    }

    /// 两个顶点之间的欧氏距离.
    #[inline]
    pub fn distance(&self, a: usize, b: usize) -> f64 {
        (self.vertices[a] - self.vertices[b]).norm()
    }

    /// 顶点面积: 每个三角面的面积平均分给它的三个顶点.
    pub fn vertex_areas(&self) -> Array1<f64> {
        let mut ans = Array1::zeros(self.len());
        for [a, b, c] in self.faces.iter().copied() {
            let (pa, pb, pc) = (self.vertices[a], self.vertices[b], self.vertices[c]);
            let area = 0.5 * (pb - pa).cross(&(pc - pa)).norm();
            for v in [a, b, c] {
                ans[v] += area / 3.0;
            }
        }
        ans
    }

    /// 网格总面积.
    pub fn total_area(&self) -> f64 {
        self.vertex_areas().sum()
    }
}

/// 网格曲面的角色.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SurfaceRole {
    /// 白质面.
    White,
    /// 软膜面.
    Pial,
    /// 中间面.
    Midthickness,
    /// 个体到模板的球面配准.
    SphereReg,
    /// 模板球面.
    TemplateSphere,
}

impl SurfaceRole {
    /// 文件名中使用的标签.
    pub const fn label(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Pial => "pial",
            Self::Midthickness => "midthickness",
            Self::SphereReg => "sphere_reg_fsLR",
            Self::TemplateSphere => "template_sphere",
        }
    }
}

/// 逐顶点标量数据的角色.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetricRole {
    /// 皮层厚度.
    Thickness,
    /// 模板皮层 ROI (非零即皮层).
    TemplateRoi,
}

impl MetricRole {
    /// 文件名中使用的标签.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Thickness => "thickness",
            Self::TemplateRoi => "template_roi",
        }
    }
}

/// 带半球与角色标记的网格曲面.
#[derive(Clone, Debug)]
pub struct Surface {
    /// 半球.
    pub hemisphere: Hemisphere,
    /// 角色.
    pub role: SurfaceRole,
    /// 网格.
    pub mesh: Arc<Mesh>,
}

/// 逐顶点形态学数据.
#[derive(Clone, Debug)]
pub struct Morphometry {
    /// 半球.
    pub hemisphere: Hemisphere,
    /// 角色.
    pub role: MetricRole,
    /// 每个顶点一个值.
    pub values: Array1<f32>,
}

/// 一个半球的全部表面输入.
#[derive(Clone, Debug)]
pub struct HemiSurfaces {
    /// 半球.
    pub hemisphere: Hemisphere,
    /// 白质面.
    pub white: Arc<Mesh>,
    /// 软膜面.
    pub pial: Arc<Mesh>,
    /// 中间面.
    pub midthickness: Arc<Mesh>,
    /// 个体球面配准.
    pub sphere_reg: Arc<Mesh>,
    /// 模板球面.
    pub template_sphere: Arc<Mesh>,
    /// 皮层厚度.
    pub thickness: Array1<f32>,
    /// 模板 ROI.
    pub template_roi: Array1<bool>,
}

/// 两个半球的曲面与形态学数据.
#[derive(Clone, Debug, Default)]
pub struct SurfaceCatalog {
    surfaces: Vec<Surface>,
    metrics: Vec<Morphometry>,
}

impl SurfaceCatalog {
    /// 空目录.
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一张网格曲面. 同半球同角色的旧曲面被替换.
    pub fn with_surface(mut self, hemisphere: Hemisphere, role: SurfaceRole, mesh: Arc<Mesh>) -> Self {
        self.surfaces
            .retain(|s| !(s.hemisphere == hemisphere && s.role == role));
        self.surfaces.push(Surface {
            hemisphere,
            role,
            mesh,
        });
        self
    }

    /// 登记逐顶点数据. 同半球同角色的旧数据被替换.
    pub fn with_metric(mut self, hemisphere: Hemisphere, role: MetricRole, values: Array1<f32>) -> Self {
        self.metrics
            .retain(|m| !(m.hemisphere == hemisphere && m.role == role));
        self.metrics.push(Morphometry {
            hemisphere,
            role,
            values,
        });
        self
    }

    fn surface(&self, hemi: Hemisphere, role: SurfaceRole) -> Result<Arc<Mesh>> {
        self.surfaces
            .iter()
            .find(|s| s.hemisphere == hemi && s.role == role)
            .map(|s| Arc::clone(&s.mesh))
            .ok_or_else(|| self.missing(format!("{hemi}.{}", role.label())))
    }

    fn metric(&self, hemi: Hemisphere, role: MetricRole) -> Result<&Array1<f32>> {
        self.metrics
            .iter()
            .find(|m| m.hemisphere == hemi && m.role == role)
            .map(|m| &m.values)
            .ok_or_else(|| self.missing(format!("{hemi}.{}", role.label())))
    }

    fn missing(&self, key: String) -> ResampleError {
        let available = self
            .surfaces
            .iter()
            .map(|s| format!("{}.{}", s.hemisphere, s.role.label()))
            .chain(
                self.metrics
                    .iter()
                    .map(|m| format!("{}.{}", m.hemisphere, m.role.label())),
            );
        ResampleError::missing_key("surface", key, available)
    }

    /// 网格曲面 (供只需要部分曲面的采样器使用).
    pub fn mesh(&self, hemi: Hemisphere, role: SurfaceRole) -> Result<Arc<Mesh>> {
        self.surface(hemi, role)
    }

    /// 选出一个半球的全部输入, 并检查它们的顶点数彼此一致.
    pub fn select(&self, hemi: Hemisphere) -> Result<HemiSurfaces> {
        let white = self.surface(hemi, SurfaceRole::White)?;
        let pial = self.surface(hemi, SurfaceRole::Pial)?;
        let midthickness = self.surface(hemi, SurfaceRole::Midthickness)?;
        let sphere_reg = self.surface(hemi, SurfaceRole::SphereReg)?;
        let template_sphere = self.surface(hemi, SurfaceRole::TemplateSphere)?;
        let thickness = self.metric(hemi, MetricRole::Thickness)?.clone();
        let template_roi = self
            .metric(hemi, MetricRole::TemplateRoi)?
            .mapv(|v| v.is_finite() && v != 0.0);

        let n = midthickness.len();
        for (what, len) in [
            ("white", white.len()),
            ("pial", pial.len()),
            ("sphere_reg", sphere_reg.len()),
            ("thickness", thickness.len()),
        ] {
            if len != n {
                return Err(ResampleError::shape(format!("{hemi}.{what}"), &[n], &[len]));
            }
        }
        if template_roi.len() != template_sphere.len() {
            return Err(ResampleError::shape(
                format!("{hemi}.template_roi"),
                &[template_sphere.len()],
                &[template_roi.len()],
            ));
        }
        Ok(HemiSurfaces {
            hemisphere: hemi,
            white,
            pial,
            midthickness,
            sphere_reg,
            template_sphere,
            thickness,
            template_roi,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_mesh_topology() {
        let m = grid_mesh(3, 1.0, 0.0);
        assert_eq!(m.len(), 9);
        assert!(m.is_open());
        // 中心顶点不在边界上.
        assert!(!m.is_boundary(4));
        assert!(m.is_boundary(0));
        assert_eq!(m.neighbours(4).len(), 6);
        assert!((m.total_area() - 4.0).abs() < 1e-12);

        let o = octahedron();
        assert!(!o.is_open());
        assert_eq!(o.neighbours(4), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_invalid_faces() {
        let v = vec![Point3::origin(); 3];
        assert!(Mesh::new(v.clone(), vec![[0, 1, 3]]).is_err());
        assert!(Mesh::new(v, vec![[0, 1, 1]]).is_err());
    }

    #[test]
    fn test_hemi_pair_order() {
        let p = HemiPair::try_from_vec(vec!["l", "r"]).unwrap();
        assert_eq!(p.iter().map(|(h, v)| (h.label(), *v)).collect::<Vec<_>>(), vec![("L", "l"), ("R", "r")]);
        assert!(HemiPair::try_from_vec(vec![1]).is_err());
        assert_eq!(*p.get(Hemisphere::Right), "r");
    }

    #[test]
    fn test_catalog_missing_surface() {
        let m = Arc::new(grid_mesh(3, 1.0, 0.0));
        let cat = SurfaceCatalog::new().with_surface(Hemisphere::Left, SurfaceRole::White, m);
        match cat.select(Hemisphere::Left).unwrap_err() {
            ResampleError::MissingKey { key, available, .. } => {
                assert_eq!(key, "L.pial");
                assert_eq!(available, vec!["L.white"]);
            }
            e => panic!("unexpected error {e}"),
        }
    }
}
