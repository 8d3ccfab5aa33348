//! 切面选取.
//!
//! 给定二值掩膜, 在每个轴上找出若干个等距且 "不空" 的物理坐标切面
//! ([`compute_cuts`]); 或者沿某个轴随机挑选一个前景足够多的切片
//! ([`random_slice`]).

use std::ops::Index;

use itertools::{Itertools, MinMaxResult};
use ndarray::{Array2, ArrayView2, ArrayView3};

use crate::config::CutSpec;
use crate::consts::cut::DECIMALS;
use crate::error::QcResult;
use crate::volume::{Affine, ViewAxis};

mod sampler;

pub use sampler::{random_slice, slice_fraction};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 每个轴上的一组切面.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cuts {
    /// 仿射变换前的体素坐标, 按 `[X, Y, Z]` 存储.
    voxel: [Vec<f64>; 3],

    /// 物理坐标, 保留三位小数.
    world: [Vec<f64>; 3],
}

impl Cuts {
    /// 每个轴上的切面个数.
    #[inline]
    pub fn n_cuts(&self) -> usize {
        self.voxel[0].len()
    }

    /// 轴 `axis` 上的物理坐标.
    #[inline]
    pub fn world(&self, axis: ViewAxis) -> &[f64] {
        &self.world[axis.index()]
    }

    /// 轴 `axis` 上的体素坐标 (浮点, 未取整).
    #[inline]
    pub fn voxel(&self, axis: ViewAxis) -> &[f64] {
        &self.voxel[axis.index()]
    }

    /// 第 `cut` 组切面对应的体素点 `(i, j, k)`. 越界时返回 `None`.
    pub fn voxel_point(&self, cut: usize) -> Option<[f64; 3]> {
        let [i, j, k] = &self.voxel;
        Some([*i.get(cut)?, *j.get(cut)?, *k.get(cut)?])
    }
}

impl Index<ViewAxis> for Cuts {
    type Output = [f64];

    /// 等价于 [`Cuts::world`].
    #[inline]
    fn index(&self, axis: ViewAxis) -> &Self::Output {
        self.world(axis)
    }
}

/// 使用默认阈值, 在每个轴上计算 `n_cuts` 个切面.
///
/// `n_cuts` 为 0 时返回 `Err(QcError::InvalidInput)`.
#[inline]
pub fn compute_cuts(mask: ArrayView3<bool>, affine: &Affine, n_cuts: usize) -> QcResult<Cuts> {
    Ok(compute_cuts_with(mask, affine, &CutSpec::with_n_cuts(n_cuts)?))
}

/// 按 `spec` 在每个轴上计算等距切面.
///
/// 1. 将掩膜沿另外两个轴求和, 得到每个轴上的占用计数;
/// 2. 取计数超过 `ceil(正交平面体素数 * 比例)` 的索引范围;
///   不足 `n_cuts` 个时退化为计数非零的范围; 仍为空则取整个轴;
/// 3. 在范围内取 `n_cuts + 2` 个等距点并丢掉两端, 避免切在边界上;
/// 4. 经 `affine` 变换到物理坐标并保留三位小数.
///
/// 该函数是纯函数: 相同输入总是得到相同输出.
pub fn compute_cuts_with(mask: ArrayView3<bool>, affine: &Affine, spec: &CutSpec) -> Cuts {
    let n = spec.n_cuts();
    let (si, sj, sk) = mask.dim();
    let planes = [sj * sk, si * sk, si * sj];

    let mut vox = Array2::<f64>::ones((4, n));
    let mut voxel: [Vec<f64>; 3] = Default::default();
    for axis in ViewAxis::ALL {
        let ax = axis.index();
        let profile = occupancy_profile(mask, axis);
        let threshold = (planes[ax] as f64 * spec.fractions()[ax]).ceil() as usize;
        let (lo, hi) = qualifying_range(&profile, threshold, n);

        let step = (hi - lo) as f64 / (n + 1) as f64;
        let coords: Vec<f64> = (1..=n).map(|c| lo as f64 + step * c as f64).collect();
        for (c, v) in coords.iter().enumerate() {
            vox[[ax, c]] = *v;
        }
        voxel[ax] = coords;
    }

    let ras = affine.apply_columns(vox.view());
    let world = ViewAxis::ALL.map(|axis| {
        ras.row(axis.index())
            .iter()
            .map(|v| round_decimals(*v))
            .collect()
    });

    Cuts { voxel, world }
}

/// 沿 `axis` 每个切片中的前景体素个数.
pub fn occupancy_profile(mask: ArrayView3<bool>, axis: ViewAxis) -> Vec<usize> {
    fn count(s: ArrayView2<bool>) -> usize {
        s.iter().filter(|b| **b).count()
    }

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            mask.axis_iter(axis.axis()).into_par_iter().map(count).collect()
        } else {
            mask.axis_iter(axis.axis()).map(count).collect()
        }
    }
}

/// 占用计数超过阈值的索引范围 `[lo, hi]`.
fn qualifying_range(profile: &[usize], threshold: usize, n_cuts: usize) -> (usize, usize) {
    let above = |th: usize| profile.iter().positions(move |&c| c > th);
    let threshold = if above(threshold).count() < n_cuts {
        0
    } else {
        threshold
    };
    match above(threshold).minmax() {
        MinMaxResult::NoElements => (0, profile.len().saturating_sub(1)),
        MinMaxResult::OneElement(i) => (i, i),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    }
}

#[inline]
fn round_decimals(v: f64) -> f64 {
    let scale = 10f64.powi(DECIMALS);
    (v * scale).round() / scale
}
