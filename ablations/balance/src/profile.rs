//! 调度策略运行统计.

use qc_berry::config::SchedulePolicy;
use std::time::{Duration, Instant};

/// ablation/benchmark 计时器.
///
/// 该计时器支持 "中途中断" 与 "结束中断, 继续开始计时".
#[derive(Clone, Debug)]
pub struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器. 初始化时会视为已经开始计时 (`self.start()`).
    #[inline]
    pub fn new() -> Self {
        Self {
            consumed: Duration::from_secs(0),
            since: Instant::now(),
        }
    }

    /// 开始计时.
    #[inline]
    pub fn start(&mut self) {
        self.since = Instant::now();
    }

    /// 结束计时, 并将这一区间的时间累加. 返回本轮计时时长.
    ///
    /// # 注意
    ///
    /// 上一次调用必须是 `self.start()`, 否则计算时间值无意义.
    #[inline]
    pub fn elapsed(&mut self) -> Duration {
        let d = self.since.elapsed();
        self.consumed += d;
        d
    }

    /// 获得总共累计下来的时间综合 (以微秒为单位).
    #[inline]
    pub fn get_total_us(&self) -> u64 {
        self.consumed.as_micros() as u64
    }
}

impl Default for AccTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个调度策略的统计.
#[derive(Clone, Debug)]
pub struct Profile {
    policy: SchedulePolicy,

    /// 各条目的有效评分次数.
    counts: Vec<u64>,

    /// 账本中的评分总数 (包括被排除的评分值).
    judgments: usize,

    /// 全部评审者线程的墙钟时间.
    timer: AccTimer,
}

impl Profile {
    /// 初始化统计. `timer` 应已停止计时.
    pub fn new(policy: SchedulePolicy, counts: Vec<u64>, judgments: usize, timer: AccTimer) -> Self {
        Self {
            policy,
            counts,
            judgments,
            timer,
        }
    }

    /// 调度策略.
    #[inline]
    pub fn get_policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// 条目个数.
    #[inline]
    pub fn get_items(&self) -> usize {
        self.counts.len()
    }

    /// 评分总数.
    #[inline]
    pub fn get_judgments(&self) -> usize {
        self.judgments
    }

    /// 最多的有效评分次数.
    #[inline]
    pub fn get_max(&self) -> Option<u64> {
        self.counts.iter().copied().max()
    }

    /// 最少的有效评分次数.
    #[inline]
    pub fn get_min(&self) -> Option<u64> {
        self.counts.iter().copied().min()
    }

    /// 极差.
    pub fn get_spread(&self) -> Option<u64> {
        Some(self.get_max()? - self.get_min()?)
    }

    /// 平均有效评分次数.
    pub fn get_mean(&self) -> Option<f64> {
        if self.counts.is_empty() {
            return None;
        }
        Some(self.counts.iter().sum::<u64>() as f64 / self.counts.len() as f64)
    }

    /// 有效评分次数的总体标准差.
    pub fn get_std(&self) -> Option<f64> {
        let mean = self.get_mean()?;
        let var = self
            .counts
            .iter()
            .map(|c| (*c as f64 - mean).powi(2))
            .sum::<f64>()
            / self.counts.len() as f64;
        Some(var.sqrt())
    }

    /// 总耗时 (微秒).
    #[inline]
    pub fn get_total_us(&self) -> u64 {
        self.timer.get_total_us()
    }
}
