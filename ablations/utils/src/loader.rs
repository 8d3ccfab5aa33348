//! 对 `qc-berry::dataset` 的更一层封装. 提供实验所需的数据集与账本路径.

use std::env;
use std::path::PathBuf;

/// 获取待评审数据集的根目录.
///
/// 1. 若环境变量 `$QC_LAYOUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/qc`.
pub fn layout_dir_from_env_or_home() -> PathBuf {
    match env::var("QC_LAYOUT_DIR") {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => qc_berry::dataset::home_dataset_dir_with(["qc"]).expect("no home directory"),
    }
}

/// 获取评分快照路径.
///
/// 1. 若环境变量 `$QC_LEDGER_PATH` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/qc/ledger.bin.z`.
pub fn ledger_path_from_env_or_home() -> PathBuf {
    match env::var("QC_LEDGER_PATH") {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => qc_berry::dataset::home_dataset_dir_with(["qc", "ledger.bin.z"])
            .expect("no home directory"),
    }
}
