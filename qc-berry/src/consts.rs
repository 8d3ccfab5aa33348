//! 通用常量.

/// 切面相关的默认值.
pub mod cut {
    /// 每个轴上默认展示的切面个数.
    pub const DEFAULT_N_CUTS: usize = 7;

    /// 矢状方向 (第 0 个体素轴) 的默认占用阈值比例.
    pub const SAGITTAL_FRACTION: f64 = 0.2;

    /// 冠状方向 (第 1 个体素轴) 的默认占用阈值比例.
    pub const CORONAL_FRACTION: f64 = 0.1;

    /// 轴状方向 (第 2 个体素轴) 的默认占用阈值比例.
    ///
    /// 30% 能剔除几乎为空的轴状切面.
    pub const AXIAL_FRACTION: f64 = 0.3;

    /// 坐标保留的小数位数.
    pub const DECIMALS: i32 = 3;
}

/// 随机切片采样相关的默认值.
pub mod sample {
    /// 切片中前景体素比例的默认下限 (严格大于).
    pub const MIN_OCCUPIED_FRACTION: f64 = 0.2;

    /// 最大尝试次数为 `轴长 * RETRY_FACTOR`.
    pub const RETRY_FACTOR: usize = 8;
}

/// 皮层 ribbon 标签.
pub mod ribbon {
    /// 左右半球标签相差的模数.
    pub const MODULUS: u32 = 39;

    /// 取模后白质的标签值.
    pub const WHITE: u32 = 2;

    /// 取模后不小于该值即视为 pial 面以内.
    pub const PIAL_MIN: u32 = 2;
}

/// 空间标准化 step 的固定模板视图 (MNI 空间, 单位毫米).
///
/// 顺序与 [`crate::rating::TemplateView`] 的判别值一致.
pub const TEMPLATE_CUTS: [(crate::volume::ViewAxis, f64); 9] = {
    use crate::volume::ViewAxis::*;
    [
        (X, -50.0),
        (X, -8.0),
        (X, 30.0),
        (Y, -65.0),
        (Y, -20.0),
        (Y, 54.0),
        (Z, -6.0),
        (Z, 13.0),
        (Z, 58.0),
    ]
};

/// 渲染结果缓存.
pub mod render {
    /// 引擎默认最多缓存的图像个数.
    pub const CACHE_CAPACITY: usize = 1024;
}

/// 渲染时使用的灰度值.
pub mod gray {
    /// 黑色.
    pub const BLACK: u8 = 0;

    /// 亮灰色.
    pub const LIGHT_GRAY: u8 = 192;

    /// 白色.
    pub const WHITE: u8 = 255;
}

/// 底图灰度窗口的分位数 `(下限, 上限)`.
pub mod window {
    /// 场图的分位数. 场图两端常有极值, 需要截掉.
    pub const FMAP: (f64, f64) = (0.15, 0.998);

    /// 脑掩膜 step 的 T1 底图分位数.
    pub const MASK: (f64, f64) = (0.0, 0.95);

    /// 其余情况使用完整的取值范围.
    pub const FULL: (f64, f64) = (0.0, 1.0);
}
