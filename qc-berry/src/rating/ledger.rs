//! 只追加的评分账本.

use std::collections::HashMap;

use log::debug;
use parking_lot::RwLock;

use super::{Judgment, Rating};
use crate::dataset::ItemId;
use crate::error::QcResult;

/// 评分存储. 引擎只要求按条目计数, 以及每次追加都是原子的.
pub trait RatingStore: Send + Sync {
    /// 原子地追加一条评分, 返回已记录的评分. 不做去重.
    fn record(&self, judgment: Judgment) -> QcResult<Judgment>;

    /// 条目 `item` 上评分值不在 `excluding` 中的评分个数.
    fn count(&self, item: ItemId, excluding: &[Rating]) -> u64;

    /// 批量计数. 实现应尽量基于同一时刻的快照.
    fn counts(&self, items: &[ItemId], excluding: &[Rating]) -> Vec<u64> {
        items.iter().map(|i| self.count(*i, excluding)).collect()
    }

    /// 已记录的评分总数.
    fn len(&self) -> usize;

    /// 是否尚无任何评分.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 每个条目按评分值分桶的计数.
type Histogram = [u64; 4];

#[inline]
fn sum_excluding(h: &Histogram, excluding: &[Rating]) -> u64 {
    Rating::ALL
        .iter()
        .filter(|r| !excluding.contains(r))
        .map(|r| h[r.index()])
        .sum()
}

#[derive(Debug, Default)]
struct LedgerInner {
    judgments: Vec<Judgment>,
    histograms: HashMap<ItemId, Histogram>,
}

impl LedgerInner {
    fn push(&mut self, judgment: Judgment) {
        self.histograms.entry(judgment.item).or_default()[judgment.rating.index()] += 1;
        self.judgments.push(judgment);
    }
}

/// 内存中的评分账本. 写操作持有写锁, 因此计数不会丢失.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<LedgerInner>,
}

impl MemoryLedger {
    /// 创建空账本.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 由已有评分重建账本.
    pub fn from_judgments<I: IntoIterator<Item = Judgment>>(it: I) -> Self {
        let mut inner = LedgerInner::default();
        it.into_iter().for_each(|j| inner.push(j));
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// 条目 `item` 上的全部评分, 按记录顺序.
    pub fn judgments_for(&self, item: ItemId) -> Vec<Judgment> {
        self.inner
            .read()
            .judgments
            .iter()
            .filter(|j| j.item == item)
            .cloned()
            .collect()
    }

    /// 获取全部评分的拷贝.
    pub fn snapshot(&self) -> Vec<Judgment> {
        self.inner.read().judgments.clone()
    }
}

impl RatingStore for MemoryLedger {
    fn record(&self, judgment: Judgment) -> QcResult<Judgment> {
        debug!(
            "record {} on {} ({}) by {}",
            judgment.rating, judgment.item, judgment.sub_view, judgment.rater
        );
        self.inner.write().push(judgment.clone());
        Ok(judgment)
    }

    fn count(&self, item: ItemId, excluding: &[Rating]) -> u64 {
        self.inner
            .read()
            .histograms
            .get(&item)
            .map_or(0, |h| sum_excluding(h, excluding))
    }

    fn counts(&self, items: &[ItemId], excluding: &[Rating]) -> Vec<u64> {
        let inner = self.inner.read();
        items
            .iter()
            .map(|i| {
                inner
                    .histograms
                    .get(i)
                    .map_or(0, |h| sum_excluding(h, excluding))
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.inner.read().judgments.len()
    }
}

/// 快照持久化. 文件内容为 zlib 压缩的 bincode 编码.
#[cfg(feature = "serde")]
mod persist {
    use std::fs::File;
    use std::io::{BufReader, BufWriter, Write};
    use std::path::Path;

    use flate2::read::ZlibDecoder;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use log::info;

    use super::{Judgment, MemoryLedger};
    use crate::error::QcResult;

    impl MemoryLedger {
        /// 将全部评分写入 `path`. 已存在的文件会被覆盖.
        pub fn save<P: AsRef<Path>>(&self, path: P) -> QcResult<()> {
            let inner = self.inner.read();
            let file = BufWriter::new(File::create(path.as_ref())?);
            let mut e = ZlibEncoder::new(file, Compression::default());
            bincode::serialize_into(&mut e, &inner.judgments)?;
            e.finish()?.flush()?;
            info!(
                "saved {} judgments to {}",
                inner.judgments.len(),
                path.as_ref().display()
            );
            Ok(())
        }

        /// 从 [`MemoryLedger::save`] 写出的文件恢复账本.
        pub fn load<P: AsRef<Path>>(path: P) -> QcResult<Self> {
            let file = BufReader::new(File::open(path.as_ref())?);
            let judgments: Vec<Judgment> = bincode::deserialize_from(ZlibDecoder::new(file))?;
            info!(
                "loaded {} judgments from {}",
                judgments.len(),
                path.as_ref().display()
            );
            Ok(Self::from_judgments(judgments))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryLedger, RatingStore};
    use crate::dataset::ItemId;
    use crate::rating::{Judgment, Rating, SubView};
    use crate::volume::ViewAxis;
    use std::sync::Arc;

    fn judge(item: u64, rating: Rating) -> Judgment {
        let v = SubView::Slice {
            axis: ViewAxis::X,
            index: 3,
        };
        Judgment::new(ItemId(item), v, "tester", rating)
    }

    #[test]
    fn test_count_excluding() {
        let l = MemoryLedger::new();
        for r in [Rating::Pass, Rating::NotInformative, Rating::Fail, Rating::Pass] {
            l.record(judge(1, r)).unwrap();
        }
        l.record(judge(2, Rating::Unsure)).unwrap();

        assert_eq!(l.count(ItemId(1), &[]), 4);
        assert_eq!(l.count(ItemId(1), &[Rating::NotInformative]), 3);
        assert_eq!(l.count(ItemId(1), &[Rating::Pass, Rating::Fail]), 1);
        assert_eq!(l.count(ItemId(9), &[]), 0);
        assert_eq!(
            l.counts(&[ItemId(2), ItemId(1), ItemId(3)], &[Rating::NotInformative]),
            [1, 3, 0]
        );
        assert_eq!(l.len(), 5);
    }

    #[test]
    fn test_no_deduplication() {
        let l = MemoryLedger::new();
        let j = judge(5, Rating::Pass);
        l.record(j.clone()).unwrap();
        l.record(j).unwrap();
        assert_eq!(l.count(ItemId(5), &[]), 2);
        assert_eq!(l.judgments_for(ItemId(5)).len(), 2);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let l = Arc::new(MemoryLedger::new());
        let pool = threadpool::ThreadPool::new(num_cpus::get().max(2));
        let (items, per_item) = (4u64, 250u64);
        for i in 0..items * per_item {
            let l = Arc::clone(&l);
            pool.execute(move || {
                l.record(judge(i % items, Rating::Fail)).unwrap();
            });
        }
        pool.join();
        assert_eq!(pool.panic_count(), 0);
        for i in 0..items {
            assert_eq!(l.count(ItemId(i), &[]), per_item);
        }
        assert_eq!(l.len() as u64, items * per_item);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_save_and_load() {
        let l = MemoryLedger::new();
        l.record(judge(1, Rating::Pass)).unwrap();
        l.record(judge(1, Rating::NotInformative)).unwrap();
        l.record(judge(2, Rating::Fail).with_source_data_issue(true))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.bin.z");
        l.save(&path).unwrap();

        let back = MemoryLedger::load(&path).unwrap();
        assert_eq!(back.snapshot(), l.snapshot());
        assert_eq!(back.count(ItemId(1), &[Rating::NotInformative]), 1);
        assert!(back.judgments_for(ItemId(2))[0].source_data_issue);
    }
}
