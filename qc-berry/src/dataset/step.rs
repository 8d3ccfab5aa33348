//! 各评审阶段的配置记录.

use super::Step;
use crate::rating::Rating;
use crate::render::{ImageFormat, Overlay};

/// 条目需要的文件个数.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FileShape {
    /// 单个文件.
    Single,

    /// 底图 + 叠加.
    Pair,
}

/// 选取子视图时使用哪一个文件的几何信息.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GeometryFrom {
    /// 不需要.
    Nothing,

    /// 底图, 前景为体素值大于 0 处.
    Primary,

    /// 叠加文件.
    Secondary,
}

/// 子视图的生成方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ViewKind {
    /// 随机方向上的等距切面之一.
    Cuts,

    /// 随机方向上按占用率随机抽取的切片.
    RandomSlice,

    /// 固定模板视图之一.
    Template,
}

/// 单个评审阶段的全部差异.
#[derive(Copy, Clone, Debug)]
pub struct StepProfile {
    /// 文件个数.
    pub files: FileShape,

    /// 几何信息来源.
    pub geometry: GeometryFrom,

    /// 子视图生成方式.
    pub view: ViewKind,

    /// 允许的评分值.
    pub ratings: &'static [Rating],

    /// 是否允许点选问题位置.
    pub clicks: bool,

    /// 叠加方式.
    pub overlay: Overlay,

    /// 输出图像格式.
    pub format: ImageFormat,
}

const GRADED: &[Rating] = &[Rating::Pass, Rating::Unsure, Rating::Fail];

impl StepProfile {
    /// 是否接受评分值 `rating`.
    #[inline]
    pub fn accepts(&self, rating: Rating) -> bool {
        self.ratings.contains(&rating)
    }
}

impl Step {
    /// 该阶段的配置记录.
    pub const fn profile(self) -> StepProfile {
        match self {
            Self::Mask => StepProfile {
                files: FileShape::Pair,
                geometry: GeometryFrom::Secondary,
                view: ViewKind::Cuts,
                ratings: GRADED,
                clicks: true,
                overlay: Overlay::FilledMask,
                format: ImageFormat::Png,
            },
            Self::SpatialNormalization => StepProfile {
                files: FileShape::Single,
                geometry: GeometryFrom::Nothing,
                view: ViewKind::Template,
                ratings: GRADED,
                clicks: true,
                overlay: Overlay::TemplateRoi,
                format: ImageFormat::Png,
            },
            Self::SurfaceLocalization => StepProfile {
                files: FileShape::Pair,
                geometry: GeometryFrom::Secondary,
                view: ViewKind::Cuts,
                ratings: GRADED,
                clicks: true,
                overlay: Overlay::Ribbon,
                format: ImageFormat::Png,
            },
            Self::FmapCoregistration => StepProfile {
                files: FileShape::Pair,
                geometry: GeometryFrom::Secondary,
                view: ViewKind::RandomSlice,
                ratings: &Rating::ALL,
                clicks: false,
                overlay: Overlay::Contour,
                format: ImageFormat::Png,
            },
            Self::Dtifit => StepProfile {
                files: FileShape::Single,
                geometry: GeometryFrom::Primary,
                view: ViewKind::RandomSlice,
                ratings: &Rating::ALL,
                clicks: false,
                overlay: Overlay::Nothing,
                format: ImageFormat::Gif,
            },
        }
    }
}
