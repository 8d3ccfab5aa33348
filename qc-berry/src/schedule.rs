//! 选取下一个评审条目.
//!
//! 默认策略是 "评分最少者优先": 每次都从当前评分次数最少的条目中挑选,
//! 长期来看所有条目的评分次数趋于一致, 不会有条目被饿死.

use std::sync::Arc;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::SchedulePolicy;
use crate::dataset::{ItemId, ReviewItem};
use crate::error::{QcError, QcResult};
use crate::rating::{Rating, RatingStore};

/// 调度器. 只读地借用评分存储, 可在多个评审者之间并发使用.
pub struct WorkScheduler<'a, S: RatingStore + ?Sized> {
    ledger: &'a S,
    excluded: &'a [Rating],
    policy: SchedulePolicy,
}

impl<'a, S: RatingStore + ?Sized> WorkScheduler<'a, S> {
    /// 创建调度器. 计数时忽略评分值在 `excluded` 中的评分.
    #[inline]
    pub fn new(ledger: &'a S, excluded: &'a [Rating], policy: SchedulePolicy) -> Self {
        Self {
            ledger,
            excluded,
            policy,
        }
    }

    /// `items` 中每个条目的有效评分次数, 基于同一快照.
    pub fn counts(&self, items: &[Arc<ReviewItem>]) -> Vec<u64> {
        let ids: Vec<ItemId> = items.iter().map(|i| i.id()).collect();
        self.ledger.counts(&ids, self.excluded)
    }

    /// 从 `items` 中选出下一个条目.
    ///
    /// 按 [`SchedulePolicy::LeastRated`] 时, 结果一定是有效评分次数最少的条目之一,
    /// 并列时随机选择. `items` 为空时返回 `Err(QcError::NotFound)`.
    pub fn select_next<R: Rng + ?Sized>(
        &self,
        items: &[Arc<ReviewItem>],
        rng: &mut R,
    ) -> QcResult<Arc<ReviewItem>> {
        if items.is_empty() {
            return Err(QcError::NotFound("no review items for this step".to_string()));
        }

        let picked = match self.policy {
            SchedulePolicy::Random => items.choose(rng),
            SchedulePolicy::LeastRated => {
                let counts = self.counts(items);
                let min = counts.iter().copied().min().unwrap_or_default();
                let fewest: Vec<&Arc<ReviewItem>> = items
                    .iter()
                    .zip(&counts)
                    .filter_map(|(item, c)| (*c == min).then_some(item))
                    .collect();
                debug!("{} of {} items have {min} ratings", fewest.len(), items.len());
                fewest.choose(rng).copied()
            }
        };

        picked
            .cloned()
            .ok_or_else(|| QcError::NotFound("no review items for this step".to_string()))
    }
}
