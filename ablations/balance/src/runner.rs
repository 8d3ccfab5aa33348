//! 程序运行函数.

use crate::profile::{AccTimer, Profile};
use crate::result::AblationResult;
use log::info;
use ndarray::Array3;
use qc_berry::dataset::FileShape;
use qc_berry::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use utils::loader;

/// 合成数据集中的条目个数.
const N_ITEMS: usize = 40;

/// 每个评审者提交的评分次数.
const ROUNDS: usize = 200;

/// 合成体数据的边长.
const DIM: usize = 16;

/// 接受 "不可评" 的随机切片阶段.
const STEP: Step = Step::Dtifit;

/// 合成数据集: 每个受试者一个子目录.
fn discover(root: &Path, step: Step) -> QcResult<Vec<ItemFiles>> {
    Ok((0..N_ITEMS)
        .map(|i| {
            let dir = root.join(format!("sub-{i:03}"));
            match step.profile().files {
                FileShape::Single => ItemFiles::single(dir.join("map.nii.gz")),
                FileShape::Pair => {
                    ItemFiles::pair(dir.join("anat.nii.gz"), dir.join("mask.nii.gz"))
                }
            }
        })
        .collect())
}

/// 按受试者编号生成大小不同的立方体前景. 不读取文件.
fn synthetic(path: &Path) -> QcResult<VolumeGeometry> {
    let i: usize = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("sub-"))
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| QcError::NotFound(path.display().to_string()))?;

    // 边长 9 ~ 13, 中间的切片前景比例都大于 0.2.
    let half = 5 + i % 3;
    let c = DIM / 2;
    let data = Array3::from_shape_fn((DIM, DIM, DIM), |(x, y, z)| {
        if [x, y, z].iter().all(|v| v.abs_diff(c) < half) {
            (x + y + z) as f32 + 1.0
        } else {
            0.0
        }
    });
    Ok(VolumeGeometry::new(data, Affine::scaled([1.0; 3], [-(c as f64); 3])))
}

/// 单个评审者: 注册, 然后连续评审 `ROUNDS` 次. 每十次有一次 "不可评".
fn rate(engine: &Engine, root: &Path, rater: usize) -> QcResult<()> {
    let rng = StdRng::seed_from_u64(rater as u64);
    let mut s = ReviewSession::with_rng(format!("rater{rater:02}"), rng);
    s.register(engine, root, STEP)?;
    s.activate(engine, STEP)?;
    for n in 0..ROUNDS {
        let rating = if n % 10 == 9 {
            Rating::NotInformative
        } else {
            Rating::Pass
        };
        s.submit(engine, rating, false, vec![])?;
    }
    Ok(())
}

/// 以策略 `policy` 运行一轮.
fn run_policy(
    policy: SchedulePolicy,
    root: &Path,
    raters: usize,
) -> QcResult<(Profile, Arc<MemoryLedger>)> {
    let ledger = Arc::new(MemoryLedger::new());
    let config = EngineConfig {
        policy,
        ..EngineConfig::default()
    };
    let engine = Engine::new(Arc::new(discover), Arc::new(synthetic))
        .with_config(config)
        .with_ledger(Arc::clone(&ledger) as Arc<dyn RatingStore>);
    let layout = engine.register_layout(root, STEP)?;

    let mut timer = AccTimer::new();
    timer.start();
    thread::scope(|s| {
        let engine = &engine;
        let handles: Vec<_> = (0..raters)
            .map(|r| s.spawn(move || rate(engine, root, r)))
            .collect();
        handles
            .into_iter()
            .map(|th| th.join().expect("Thread joining error"))
            .collect::<QcResult<Vec<()>>>()
    })?;
    timer.elapsed();

    let counts = engine.rating_counts(layout, STEP)?;
    info!("{policy:?}: {} judgments", ledger.len());
    let profile = Profile::new(policy, counts.into_values().collect(), ledger.len(), timer);
    Ok((profile, ledger))
}

/// 实际运行.
pub fn run() -> AblationResult {
    // 合成数据不读取该目录, 它只作为数据集的键.
    let root = loader::layout_dir_from_env_or_home();
    let raters = utils::cpus();

    println!("Running ablation studies with {raters} raters...");
    let mut profiles = Vec::with_capacity(2);
    let mut last = None;
    for policy in [SchedulePolicy::LeastRated, SchedulePolicy::Random] {
        let (p, ledger) = run_policy(policy, &root, raters).expect("Ablation run error");
        profiles.push(p);
        last = Some(ledger);
    }

    if let (Some(_), Some(ledger)) = (env::var_os("QC_LEDGER_PATH"), last) {
        let path = loader::ledger_path_from_env_or_home();
        ledger.save(&path).expect("Saving ledger error");
        println!("Ledger saved to {}", path.display());
    }

    AblationResult::from_iter(profiles)
}
