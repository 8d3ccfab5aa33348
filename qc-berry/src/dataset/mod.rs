//! 数据集 (layout) 与评审条目.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{QcError, QcResult};

mod catalog;
mod step;

pub use catalog::{Catalog, Layout, ReviewItem};
pub use step::{FileShape, GeometryFrom, StepProfile, ViewKind};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 已注册数据集的编号.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayoutId(pub u64);

/// 评审条目的编号. 在同一个 [`Catalog`] 内全局唯一.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemId(pub u64);

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layout#{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// 评审阶段.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Step {
    /// 脑掩膜.
    Mask = 0,

    /// 空间标准化.
    SpatialNormalization = 1,

    /// 皮层表面定位.
    SurfaceLocalization = 2,

    /// 场图配准.
    FmapCoregistration = 3,

    /// 弥散张量拟合.
    Dtifit = 4,
}

impl Step {
    /// 全部阶段.
    pub const ALL: [Step; 5] = [
        Step::Mask,
        Step::SpatialNormalization,
        Step::SurfaceLocalization,
        Step::FmapCoregistration,
        Step::Dtifit,
    ];

    /// 机器可读名称, 与外部路由名一致.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mask => "mask",
            Self::SpatialNormalization => "spatial_normalization",
            Self::SurfaceLocalization => "surface_localization",
            Self::FmapCoregistration => "fmap_coregistration",
            Self::Dtifit => "dtifit",
        }
    }
}

impl fmt::Display for Step {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = QcError;

    /// 未知名称返回 `Err(QcError::NotFound)`.
    fn from_str(s: &str) -> QcResult<Self> {
        Self::ALL
            .into_iter()
            .find(|step| step.name() == s)
            .ok_or_else(|| QcError::NotFound(format!("unknown step `{s}`")))
    }
}

/// 一个评审条目对应的一个或两个文件.
///
/// 两个文件时, `primary` 为底图, `secondary` 为叠加 (掩膜, ribbon 等).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemFiles {
    /// 底图.
    pub primary: PathBuf,

    /// 叠加.
    pub secondary: Option<PathBuf>,
}

impl ItemFiles {
    /// 单文件条目.
    pub fn single(primary: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
        }
    }

    /// 双文件条目.
    pub fn pair(primary: impl Into<PathBuf>, secondary: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            secondary: Some(secondary.into()),
        }
    }

    /// 用于唯一性约束的全部路径.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.primary.as_path()).chain(self.secondary.as_deref())
    }
}

/// 文件发现. 给定数据集根目录和阶段, 列出所有待评审的文件组.
pub trait FileDiscovery: Send + Sync {
    /// 列出 `root` 下 `step` 阶段的文件组. 返回顺序即条目创建顺序.
    fn discover(&self, root: &Path, step: Step) -> QcResult<Vec<ItemFiles>>;
}

impl<F> FileDiscovery for F
where
    F: Fn(&Path, Step) -> QcResult<Vec<ItemFiles>> + Send + Sync,
{
    #[inline]
    fn discover(&self, root: &Path, step: Step) -> QcResult<Vec<ItemFiles>> {
        self(root, step)
    }
}
