//! 运行时错误.

use std::path::PathBuf;

use crate::dataset::{ItemId, Step};
use crate::volume::ViewAxis;

/// 引擎运行时错误.
///
/// 前四类由引擎自身产生; 其余均为下层 (文件, 体数据, 编码) 错误的透传.
#[derive(Debug, thiserror::Error)]
pub enum QcError {
    /// 找不到对象: 未准备过的 step, 未注册的 layout, 或某 step 下尚无任何评审条目.
    #[error("not found: {0}")]
    NotFound(String),

    /// 非法输入: 切面数为 0, 子视图与 step 不符, 评分值不在该 step 允许的范围内等.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 在有限次采样内没有找到占用率足够的切片.
    #[error(
        "no qualifying slice along {axis} above {min} after {attempts} attempts{}",
        .item.map(|i| format!(" for {i}")).unwrap_or_default()
    )]
    ExhaustedRetries {
        /// 无法展示的条目. 直接调用采样函数时为 `None`.
        item: Option<ItemId>,
        /// 最后尝试的轴.
        axis: ViewAxis,
        /// 前景比例阈值.
        min: f64,
        /// 已经尝试的总次数.
        attempts: usize,
    },

    /// 与已有注册冲突. 先注册者有效.
    #[error("conflict: {0}")]
    Conflict(String),

    /// 读取 nifti 文件错误.
    #[error("nifti error on {}: {source}", .path.display())]
    Nifti {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: nifti::NiftiError,
    },

    /// 图像编码错误.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// 评分快照编解码错误.
    #[error(transparent)]
    Snapshot(#[from] bincode::Error),

    /// 其他底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QcError {
    /// 某 step 在当前 layout 中尚未准备.
    pub(crate) fn step_not_prepared(step: Step) -> Self {
        Self::NotFound(format!("step `{step}` has not been prepared for this layout"))
    }

    /// 是否为 [`QcError::NotFound`].
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// 是否为 [`QcError::InvalidInput`].
    #[inline]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// 是否为 [`QcError::ExhaustedRetries`].
    #[inline]
    pub fn is_exhausted_retries(&self) -> bool {
        matches!(self, Self::ExhaustedRetries { .. })
    }

    /// 错误所涉及的评审条目, 如果已知.
    #[inline]
    pub fn item(&self) -> Option<ItemId> {
        match self {
            Self::ExhaustedRetries { item, .. } => *item,
            _ => None,
        }
    }

    /// 是否为 [`QcError::Conflict`].
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// 引擎运行时结果.
pub type QcResult<T> = Result<T, QcError>;
