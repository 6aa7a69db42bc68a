//! 通用常量.

/// goodvoxels 相关常量.
pub mod goodvoxels {
    /// 变异系数空间平滑的高斯核标准差, 以毫米为单位 (`fslmaths -s 5`).
    pub const SMOOTH_SIGMA_MM: f64 = 5.0;

    /// 阈值中标准差 (上界) 或均值 (下界) 的系数.
    pub const THRESHOLD_FACTOR: f64 = 0.5;

    /// 除数绝对值不大于该值时, 商被定义为 0.
    pub const DIV_EPSILON: f32 = 1e-6;
}

/// 表面相关常量.
pub mod surface {
    /// 投影后测地膨胀的距离, 以毫米为单位.
    pub const DILATE_DISTANCE_MM: f64 = 10.0;

    /// 条带采样时, 白质面到软膜面之间的采样比例 (共六个点, 间隔 20%).
    pub const RIBBON_FRACTIONS: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

    /// fsLR 32k 网格每个半球的顶点数.
    pub const FSLR_32K_VERTICES: usize = 32492;

    /// fsLR 59k 网格每个半球的顶点数.
    pub const FSLR_59K_VERTICES: usize = 59412;
}

/// 模板与空间命名.
pub mod space {
    /// grayordinates 皮层下部分使用的模板.
    pub const SUBCORTICAL_TEMPLATE: &str = "MNI152NLin6Asym";

    /// grayordinates 皮层下结构使用的分割图谱.
    pub const SUBCORTICAL_ATLAS: &str = "HCP";

    /// 表面模板.
    pub const SURFACE_TEMPLATE: &str = "fsLR";

    /// 个体 FreeSurfer 表面空间.
    pub const FSNATIVE: &str = "fsnative";

    /// 未指定分辨率时依次尝试的模板分辨率.
    pub const FALLBACK_RESOLUTIONS: [u32; 2] = [2, 1];

    /// 保持 BOLD 原始分辨率的分辨率标记.
    pub const NATIVE_RESOLUTION: &str = "native";
}

/// 坐标帧名称.
pub mod frame {
    /// BOLD 单帧采集空间.
    pub const BOLD: &str = "bold";

    /// BOLD 参考帧 (头动校正的目标).
    pub const BOLD_REF: &str = "boldref";

    /// 个体结构像空间.
    pub const T1W: &str = "T1w";

    /// FreeSurfer 个体空间.
    pub const FSNATIVE: &str = "fsnative";
}

/// 变换位移场不动点求逆的迭代次数.
pub const FIELD_INVERSION_STEPS: usize = 16;

/// 几何比较所用的容差 (毫米).
pub const GEOMETRY_TOLERANCE: f64 = 1e-4;

/// 工作线程数环境变量.
pub const THREADS_ENV: &str = "BOLD_BERRY_THREADS";
