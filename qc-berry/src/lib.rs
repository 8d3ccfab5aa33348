#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 为神经影像预处理结果的人工质控 (QC) 评分提供切面选取, 条目调度和评审流程.
//!
//! 评审者每次看到某个三维体数据的一张二维切片 (脑掩膜, 空间标准化结果, 皮层 ribbon,
//! 场图配准或 DTI 拟合结果), 给出 pass/unsure/fail 评分, 然后进入下一个最需要评审的条目.
//!
//! 该 crate 不包含 Web 层, 数据库和绘图; 文件发现 ([`dataset::FileDiscovery`]),
//! 体数据读取 ([`volume::VolumeSource`]) 和渲染 ([`render::Renderer`]) 都以 trait 形式注入.
//!
//! # 注意
//!
//! 1. 所有坐标均按 nifti 的体素顺序 `(i, j, k)` 解释, 物理坐标由仿射矩阵给出.
//! 2. 在非期望情况下 (如越界索引), 程序会直接 panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 功能
//!
//! ### 等距切面选取 ✅
//!
//! 按占用率阈值在每个轴上选取 `n` 个切面, 全空掩膜也能给出结果.
//!
//! 实现位于 `qc-berry/src/cut/mod.rs`.
//!
//! ### 带上限的随机切片采样 ✅
//!
//! 拒绝采样, 尝试次数有上限, 不会死循环.
//!
//! 实现位于 `qc-berry/src/cut/sampler.rs`.
//!
//! ### 评分账本与 "最少评分者优先" 调度 ✅
//!
//! 实现位于 `qc-berry/src/rating` 和 `qc-berry/src/schedule.rs`.
//!
//! ### 评审会话状态机 ✅
//!
//! `Unregistered -> LayoutReady -> Presenting`, 提交后回到 `Presenting`.
//!
//! 实现位于 `qc-berry/src/session`.
//!
//! ### 灰度渲染与图像缓存 ✅
//!
//! 实现位于 `qc-berry/src/render`.
//!
//! ### 评分快照 ✅
//!
//! `serde` feature 下, 账本可以 bincode + zlib 的形式持久化.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod config;
pub mod consts;
pub mod cut;
pub mod dataset;
mod error;
pub mod prelude;
pub mod rating;
pub mod render;
pub mod schedule;
pub mod session;
pub mod volume;

pub use error::{QcError, QcResult};
