//! 比较 "评分最少者优先" 与完全随机两种调度策略下, 各条目评分次数的均衡程度.
//!
//! 多个评审者线程同时在同一个合成数据集上评审. 设置 `$QC_LEDGER_PATH`
//! 时, 最后一轮的全部评分会写入该快照文件.

mod profile;
mod result;
mod runner;

fn main() {
    simple_logger::init_with_level(log::Level::Warn).unwrap();
    runner::run().analyze();
}
