//! 按占用率约束随机抽取切片.

use log::warn;
use ndarray::ArrayView3;
use rand::Rng;

use crate::config::SamplerSpec;
use crate::error::{QcError, QcResult};
use crate::volume::ViewAxis;

/// 沿 `axis` 第 `index` 个切片中前景体素所占比例. 空切片记为 0. 越界时 panic.
pub fn slice_fraction(mask: ArrayView3<bool>, axis: ViewAxis, index: usize) -> f64 {
    let s = mask.index_axis(axis.axis(), index);
    if s.is_empty() {
        return 0.0;
    }
    s.iter().filter(|b| **b).count() as f64 / s.len() as f64
}

/// 沿 `axis` 均匀随机抽取切片, 直到其前景比例严格大于
/// `spec.min_occupied_fraction()`.
///
/// 最多尝试 `轴长 * spec.retry_factor()` 次, 仍未找到时返回
/// `Err(QcError::ExhaustedRetries)`. 轴长为 0 时返回 `Err(QcError::InvalidInput)`.
pub fn random_slice<R: Rng + ?Sized>(
    mask: ArrayView3<bool>,
    axis: ViewAxis,
    spec: &SamplerSpec,
    rng: &mut R,
) -> QcResult<usize> {
    let len = mask.len_of(axis.axis());
    if len == 0 {
        return Err(QcError::InvalidInput(format!("empty axis {axis}")));
    }

    let min = spec.min_occupied_fraction();
    let attempts = len.saturating_mul(spec.retry_factor());
    for _ in 0..attempts {
        let index = rng.gen_range(0..len);
        if slice_fraction(mask, axis, index) > min {
            return Ok(index);
        }
    }

    warn!("no slice along {axis} above {min} after {attempts} attempts");
    Err(QcError::ExhaustedRetries {
        item: None,
        axis,
        min,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::{random_slice, slice_fraction};
    use crate::config::SamplerSpec;
    use crate::error::QcError;
    use crate::volume::ViewAxis;
    use ndarray::{s, Array3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// 只有 `j` 在 `[3, 6)` 的冠状切片有 60% 的前景.
    fn band() -> Array3<bool> {
        let mut m = Array3::from_elem((10, 10, 10), false);
        m.slice_mut(s![..6, 3..6, ..]).fill(true);
        m
    }

    #[test]
    fn test_slice_fraction() {
        let m = band();
        assert_eq!(slice_fraction(m.view(), ViewAxis::Y, 0), 0.0);
        assert!((slice_fraction(m.view(), ViewAxis::Y, 4) - 0.6).abs() < 1e-12);
        assert!((slice_fraction(m.view(), ViewAxis::X, 0) - 0.3).abs() < 1e-12);
        assert_eq!(slice_fraction(m.view(), ViewAxis::X, 9), 0.0);
    }

    #[test]
    fn test_random_slice_satisfies_threshold() {
        let m = band();
        let spec = SamplerSpec::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let i = random_slice(m.view(), ViewAxis::Y, &spec, &mut rng).unwrap();
            assert!((3..6).contains(&i));
            assert!(slice_fraction(m.view(), ViewAxis::Y, i) > spec.min_occupied_fraction());
        }
    }

    #[test]
    fn test_random_slice_is_bounded() {
        let m = band();
        // 任何切片都达不到 70%.
        let spec = SamplerSpec::new(0.7, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        match random_slice(m.view(), ViewAxis::Y, &spec, &mut rng) {
            Err(QcError::ExhaustedRetries {
                item: None,
                axis: ViewAxis::Y,
                attempts,
                ..
            }) => assert_eq!(attempts, 30),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_random_slice_empty_axis() {
        let m = Array3::from_elem((0, 3, 3), true);
        let mut rng = StdRng::seed_from_u64(1);
        let err = random_slice(m.view(), ViewAxis::X, &SamplerSpec::default(), &mut rng);
        assert!(err.unwrap_err().is_invalid_input());
    }
}
