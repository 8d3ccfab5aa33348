//! 评分事件及其存储.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::consts::TEMPLATE_CUTS;
use crate::dataset::ItemId;
use crate::error::{QcError, QcResult};
use crate::volume::ViewAxis;

mod ledger;

pub use ledger::{MemoryLedger, RatingStore};

/// 评分值. 并非每个 step 都接受全部取值, 见 [`crate::dataset::StepProfile`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rating {
    /// 通过.
    Pass = 0,

    /// 不确定.
    Unsure = 1,

    /// 不通过.
    Fail = 2,

    /// 图像不足以做出判断. 调度时默认不计数.
    NotInformative = 3,
}

impl Rating {
    /// 全部评分值, 按判别值排列.
    pub const ALL: [Rating; 4] = [
        Rating::Pass,
        Rating::Unsure,
        Rating::Fail,
        Rating::NotInformative,
    ];

    /// 判别值.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Rating {
    type Error = QcError;

    fn try_from(value: u8) -> QcResult<Self> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| QcError::InvalidInput(format!("unknown rating value {value}")))
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Unsure => "unsure",
            Self::Fail => "fail",
            Self::NotInformative => "not informative",
        })
    }
}

/// 空间标准化 step 的九个固定模板视图.
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TemplateView {
    X0 = 0,
    X1,
    X2,
    Y0,
    Y1,
    Y2,
    Z0,
    Z1,
    Z2,
}

impl TemplateView {
    /// 全部视图.
    pub const ALL: [TemplateView; 9] = {
        use TemplateView::*;
        [X0, X1, X2, Y0, Y1, Y2, Z0, Z1, Z2]
    };

    /// 展示方向.
    #[inline]
    pub const fn axis(self) -> ViewAxis {
        TEMPLATE_CUTS[self as usize].0
    }

    /// 模板空间中的切面坐标 (毫米).
    #[inline]
    pub const fn coord(self) -> f64 {
        TEMPLATE_CUTS[self as usize].1
    }

    /// 均匀随机选择一个视图.
    #[inline]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// 一个评审条目在某次展示时所用的二维视图.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubView {
    /// 等距切面中的第 `cut` 个.
    Cut {
        /// 展示方向.
        axis: ViewAxis,
        /// 切面序号, 小于 layout 的切面个数.
        cut: usize,
    },

    /// 随机抽取的第 `index` 个体素切片.
    Slice {
        /// 展示方向.
        axis: ViewAxis,
        /// 沿 `axis` 的体素索引.
        index: usize,
    },

    /// 固定模板视图.
    Template(TemplateView),
}

impl SubView {
    /// 展示方向.
    pub fn axis(&self) -> ViewAxis {
        match self {
            Self::Cut { axis, .. } | Self::Slice { axis, .. } => *axis,
            Self::Template(v) => v.axis(),
        }
    }
}

impl fmt::Display for SubView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cut { axis, cut } => write!(f, "{axis}-cut#{cut}"),
            Self::Slice { axis, index } => write!(f, "{axis}-slice@{index}"),
            Self::Template(v) => write!(f, "{v:?}"),
        }
    }
}

/// 评审者在渲染图像上点击的位置 (像素坐标).
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClickPoint {
    /// 水平方向.
    pub x: f64,
    /// 垂直方向.
    pub y: f64,
}

/// 一次不可变的评分事件.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Judgment {
    /// 被评审的条目.
    pub item: ItemId,

    /// 当时展示的视图.
    pub sub_view: SubView,

    /// 评审者.
    pub rater: String,

    /// 评分值.
    pub rating: Rating,

    /// 源数据本身存在问题, 无法使用.
    pub source_data_issue: bool,

    /// 标记出的问题位置. 仅点选类 step 允许非空.
    pub clicks: Vec<ClickPoint>,

    /// 创建时间.
    pub created: DateTime<Utc>,
}

impl Judgment {
    /// 以当前时间创建评分.
    pub fn new(item: ItemId, sub_view: SubView, rater: impl Into<String>, rating: Rating) -> Self {
        Self {
            item,
            sub_view,
            rater: rater.into(),
            rating,
            source_data_issue: false,
            clicks: vec![],
            created: Utc::now(),
        }
    }

    /// 设置源数据问题标记.
    #[inline]
    pub fn with_source_data_issue(mut self, issue: bool) -> Self {
        self.source_data_issue = issue;
        self
    }

    /// 附加点选位置.
    #[inline]
    pub fn with_clicks(mut self, clicks: Vec<ClickPoint>) -> Self {
        self.clicks = clicks;
        self
    }
}
