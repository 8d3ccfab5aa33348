//! 引擎配置.
//!
//! 所有参数都有默认值; 需要调整时通过带校验的构造函数创建.

use crate::consts::{cut, render, sample};
use crate::error::{QcError, QcResult};
use crate::rating::Rating;

/// 切面选取参数.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CutSpec {
    /// 每个轴上的切面个数.
    n_cuts: usize,

    /// 各轴占用阈值, 为正交平面体素总数的比例. 按 `[X, Y, Z]` 存储.
    fractions: [f64; 3],
}

impl Default for CutSpec {
    fn default() -> Self {
        Self {
            n_cuts: cut::DEFAULT_N_CUTS,
            fractions: [
                cut::SAGITTAL_FRACTION,
                cut::CORONAL_FRACTION,
                cut::AXIAL_FRACTION,
            ],
        }
    }
}

impl CutSpec {
    /// 构建参数.
    ///
    /// `n_cuts` 必须至少为 1, `fractions` 的每一项必须在 `[0, 1]` 内,
    /// 否则返回 `Err(QcError::InvalidInput)`.
    pub fn new(n_cuts: usize, fractions: [f64; 3]) -> QcResult<Self> {
        Self::check_n_cuts(n_cuts)?;
        if let Some(f) = fractions.iter().find(|f| !(0.0..=1.0).contains(*f)) {
            return Err(QcError::InvalidInput(format!(
                "occupancy fraction must be within [0, 1], got {f}"
            )));
        }
        Ok(Self { n_cuts, fractions })
    }

    /// 使用默认阈值, 仅指定切面个数.
    #[inline]
    pub fn with_n_cuts(n_cuts: usize) -> QcResult<Self> {
        Self::check_n_cuts(n_cuts)?;
        Ok(Self {
            n_cuts,
            ..Self::default()
        })
    }

    #[inline]
    fn check_n_cuts(n_cuts: usize) -> QcResult<()> {
        if n_cuts < 1 {
            return Err(QcError::InvalidInput("n_cuts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// 切面个数.
    #[inline]
    pub fn n_cuts(&self) -> usize {
        self.n_cuts
    }

    /// 各轴占用阈值比例.
    #[inline]
    pub fn fractions(&self) -> [f64; 3] {
        self.fractions
    }
}

/// 随机切片采样参数.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplerSpec {
    min_occupied_fraction: f64,
    retry_factor: usize,
}

impl Default for SamplerSpec {
    fn default() -> Self {
        Self {
            min_occupied_fraction: sample::MIN_OCCUPIED_FRACTION,
            retry_factor: sample::RETRY_FACTOR,
        }
    }
}

impl SamplerSpec {
    /// 构建参数. 切片前景比例须 **严格大于** `min_occupied_fraction` 才被接受,
    /// 最多尝试 `轴长 * retry_factor` 次.
    ///
    /// `min_occupied_fraction` 不在 `[0, 1)` 内或 `retry_factor` 为 0 时返回
    /// `Err(QcError::InvalidInput)`.
    pub fn new(min_occupied_fraction: f64, retry_factor: usize) -> QcResult<Self> {
        if !(0.0..1.0).contains(&min_occupied_fraction) {
            return Err(QcError::InvalidInput(format!(
                "min occupied fraction must be within [0, 1), got {min_occupied_fraction}"
            )));
        }
        if retry_factor == 0 {
            return Err(QcError::InvalidInput("retry factor must be positive".to_string()));
        }
        Ok(Self {
            min_occupied_fraction,
            retry_factor,
        })
    }

    /// 前景比例下限.
    #[inline]
    pub fn min_occupied_fraction(&self) -> f64 {
        self.min_occupied_fraction
    }

    /// 重试倍数.
    #[inline]
    pub fn retry_factor(&self) -> usize {
        self.retry_factor
    }
}

/// 选取下一个评审条目的策略.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SchedulePolicy {
    /// 评分次数最少者优先; 并列时随机.
    #[default]
    LeastRated,

    /// 完全随机. 仅供对比实验.
    Random,
}

/// 引擎整体配置.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// 切面选取参数.
    pub cuts: CutSpec,

    /// 随机切片采样参数.
    pub sampler: SamplerSpec,

    /// 调度计数时忽略的评分值.
    pub excluded: Vec<Rating>,

    /// 调度策略.
    pub policy: SchedulePolicy,

    /// 缓存渲染结果时是否以 zlib 压缩.
    pub compress_images: bool,

    /// 渲染结果缓存最多保留的图像数. 为 0 时不缓存.
    pub image_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cuts: CutSpec::default(),
            sampler: SamplerSpec::default(),
            excluded: vec![Rating::NotInformative],
            policy: SchedulePolicy::default(),
            compress_images: true,
            image_cache_capacity: render::CACHE_CAPACITY,
        }
    }
}
