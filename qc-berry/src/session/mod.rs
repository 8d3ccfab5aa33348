//! 评审会话.
//!
//! [`Engine`] 持有所有评审者共享的状态; [`ReviewSession`] 是单个评审者的状态机:
//!
//! ```text
//! Unregistered --register--> LayoutReady --activate--> Presenting
//!                                                       |     ^
//!                                                       +-----+
//!                                                        submit
//! ```
//!
//! 会话没有终止状态, 评审者停止提交即结束.

use std::path::Path;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::{LayoutId, Step};
use crate::error::{QcError, QcResult};
use crate::rating::{ClickPoint, Judgment, Rating};

mod engine;

pub use engine::{Engine, Presentation};

/// 会话状态.
#[derive(Clone, Debug)]
pub enum SessionState {
    /// 尚未注册数据集.
    Unregistered,

    /// 数据集已注册, 阶段 `step` 已准备.
    LayoutReady {
        /// 数据集.
        layout: LayoutId,
        /// 最近注册 (或展示) 的阶段.
        step: Step,
    },

    /// 正在展示一个条目.
    Presenting(Presentation),
}

/// 单个评审者的会话.
#[derive(Debug)]
pub struct ReviewSession<R = StdRng> {
    rater: String,
    created: DateTime<Utc>,
    state: SessionState,
    rng: R,
}

impl ReviewSession<StdRng> {
    /// 以熵源初始化的随机数生成器创建会话.
    pub fn new(rater: impl Into<String>) -> Self {
        Self::with_rng(rater, StdRng::from_entropy())
    }
}

impl<R: Rng> ReviewSession<R> {
    /// 使用给定的随机数生成器创建会话.
    pub fn with_rng(rater: impl Into<String>, rng: R) -> Self {
        Self {
            rater: rater.into(),
            created: Utc::now(),
            state: SessionState::Unregistered,
            rng,
        }
    }

    /// 评审者.
    #[inline]
    pub fn rater(&self) -> &str {
        &self.rater
    }

    /// 创建时间.
    #[inline]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// 当前状态.
    #[inline]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// 当前数据集. 未注册时为 `None`.
    pub fn layout(&self) -> Option<LayoutId> {
        match &self.state {
            SessionState::Unregistered => None,
            SessionState::LayoutReady { layout, .. } => Some(*layout),
            SessionState::Presenting(p) => Some(p.layout),
        }
    }

    /// 当前展示. 不处于展示状态时为 `None`.
    pub fn current(&self) -> Option<&Presentation> {
        match &self.state {
            SessionState::Presenting(p) => Some(p),
            _ => None,
        }
    }

    /// 注册数据集并准备阶段 `step`, 进入 `LayoutReady`.
    ///
    /// 可以在任何状态下调用; 失败时状态不变.
    pub fn register<P: AsRef<Path>>(
        &mut self,
        engine: &Engine,
        path: P,
        step: Step,
    ) -> QcResult<LayoutId> {
        let layout = engine.register_layout(path, step)?;
        self.state = SessionState::LayoutReady { layout, step };
        Ok(layout)
    }

    /// 在当前数据集的阶段 `step` 上选取下一个条目, 进入 `Presenting`.
    ///
    /// 未注册数据集, 或 `step` 尚未为当前数据集准备时返回
    /// `Err(QcError::NotFound)`. 失败时状态不变.
    pub fn activate(&mut self, engine: &Engine, step: Step) -> QcResult<&Presentation> {
        let layout = self
            .layout()
            .ok_or_else(|| QcError::NotFound("no layout registered in this session".to_string()))?;
        let p = engine.next_presentation_with(layout, step, &self.rater, &mut self.rng)?;
        self.state = SessionState::Presenting(p);
        self.current()
            .ok_or_else(|| QcError::NotFound("nothing presented".to_string()))
    }

    /// 对当前展示的条目与子视图提交评分, 随后在同一阶段上重新
    /// [`activate`](ReviewSession::activate).
    ///
    /// 不处于展示状态时返回 `Err(QcError::NotFound)`. 评分被拒绝时状态不变;
    /// 评分已记录但选取下一个条目失败时, 会话回到 `LayoutReady`.
    pub fn submit(
        &mut self,
        engine: &Engine,
        rating: Rating,
        source_data_issue: bool,
        clicks: Vec<ClickPoint>,
    ) -> QcResult<&Presentation> {
        let (layout, step, judgment) = match &self.state {
            SessionState::Presenting(p) => (
                p.layout,
                p.step,
                Judgment::new(p.item.id(), p.sub_view, self.rater.as_str(), rating)
                    .with_source_data_issue(source_data_issue)
                    .with_clicks(clicks),
            ),
            _ => {
                return Err(QcError::NotFound(
                    "no item is being presented in this session".to_string(),
                ))
            }
        };
        engine.record_judgment(judgment)?;
        self.state = SessionState::LayoutReady { layout, step };
        self.activate(engine, step)
    }
}

#[cfg(test)]
mod tests {
    use super::{Engine, ReviewSession, SessionState};
    use crate::config::{CutSpec, EngineConfig, SchedulePolicy};
    use crate::cut::slice_fraction;
    use crate::dataset::{ItemFiles, ItemId, LayoutId, Step};
    use crate::rating::{ClickPoint, Judgment, Rating, SubView, TemplateView};
    use crate::render::GraySliceRenderer;
    use crate::volume::{Affine, ViewAxis, VolumeGeometry};
    use crate::{QcError, QcResult};
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const N_ITEMS: usize = 3;
    const DIM: (usize, usize, usize) = (8, 8, 8);

    /// 每个条目一个子目录; 文件名决定体数据内容.
    fn discover(calls: Arc<AtomicUsize>) -> impl Fn(&Path, Step) -> QcResult<Vec<ItemFiles>> {
        move |root: &Path, step: Step| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..N_ITEMS)
                .map(|i| {
                    let dir = root.join(format!("sub-{i:02}"));
                    match step {
                        Step::Mask => ItemFiles::pair(dir.join("anat.nii"), dir.join("mask.nii")),
                        Step::SpatialNormalization => ItemFiles::single(dir.join("mni.nii")),
                        Step::SurfaceLocalization => {
                            ItemFiles::pair(dir.join("anat.nii"), dir.join("ribbon.nii"))
                        }
                        Step::FmapCoregistration => {
                            ItemFiles::pair(dir.join("fmap.nii"), dir.join("func_mask.nii"))
                        }
                        Step::Dtifit => ItemFiles::single(dir.join("fa.nii")),
                    }
                })
                .collect())
        }
    }

    fn volumes(path: &Path) -> QcResult<VolumeGeometry> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let in_box = |i: usize, j: usize, k: usize| {
            [i, j, k].iter().all(|v| (2..6).contains(v))
        };
        let data = match name {
            "mask.nii" | "func_mask.nii" | "fa.nii" => {
                Array3::from_shape_fn(DIM, |(i, j, k)| if in_box(i, j, k) { 1.0 } else { 0.0 })
            }
            "ribbon.nii" => {
                Array3::from_shape_fn(DIM, |(i, j, k)| if in_box(i, j, k) { 41.0 } else { 0.0 })
            }
            "empty.nii" => Array3::zeros(DIM),
            // 只有矢状面 i = 3 有前景.
            "slab.nii" => Array3::from_shape_fn(DIM, |(i, _, _)| if i == 3 { 1.0 } else { 0.0 }),
            "anat.nii" | "fmap.nii" | "mni.nii" => {
                Array3::from_shape_fn(DIM, |(i, j, k)| (i * j + k) as f32)
            }
            _ => return Err(QcError::NotFound(path.display().to_string())),
        };
        Ok(VolumeGeometry::new(data, Affine::scaled([2.0; 3], [-8.0; 3])))
    }

    fn engine() -> (Engine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let e = Engine::new(Arc::new(discover(Arc::clone(&calls))), Arc::new(volumes));
        (e, calls)
    }

    fn session(seed: u64) -> ReviewSession {
        ReviewSession::with_rng("alice", StdRng::seed_from_u64(seed))
    }

    fn spread(counts: &BTreeMap<ItemId, u64>) -> u64 {
        let max = counts.values().max().copied().unwrap_or_default();
        let min = counts.values().min().copied().unwrap_or_default();
        max - min
    }

    #[test]
    fn test_register_is_idempotent() {
        let (e, calls) = engine();
        let a = e.register_layout("/data/ds1", Step::Mask).unwrap();
        let b = e.register_layout("/data/ds1/", Step::Mask).unwrap();
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(e.items(a, Step::Mask).unwrap().len(), N_ITEMS);

        // 新的阶段只发现一次.
        e.register_layout("/data/ds1", Step::Dtifit).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(e.layout(a).unwrap().steps().len(), 2);

        let other = e.register_layout("/data/ds2", Step::Mask).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_register_conflicting_cuts() {
        let (e, _) = engine();
        let id = e.register_layout("/data/ds1", Step::Mask).unwrap();
        let cuts = CutSpec::with_n_cuts(3).unwrap();
        let err = e.register_layout_with("/data/ds1", Step::Mask, &cuts).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(e.layout(id).unwrap().cut_spec().n_cuts(), 7);
    }

    #[test]
    fn test_least_rated_example() {
        let (e, _) = engine();
        let id = e.register_layout("/data/ds1", Step::Mask).unwrap();
        let items: Vec<ItemId> = e.items(id, Step::Mask).unwrap().iter().map(|i| i.id()).collect();
        let view = SubView::Cut {
            axis: ViewAxis::Z,
            cut: 0,
        };
        for (item, n) in items.iter().zip([0, 2, 1]) {
            for _ in 0..n {
                e.submit_judgment(*item, view, "bob", Rating::Fail, false).unwrap();
            }
        }

        let mut s = session(7);
        s.register(&e, "/data/ds1", Step::Mask).unwrap();
        let first = s.activate(&e, Step::Mask).unwrap().item.id();
        assert_eq!(first, items[0]);

        let next = s.submit(&e, Rating::Pass, false, vec![]).unwrap().item.id();
        let counts = e.rating_counts(id, Step::Mask).unwrap();
        assert_eq!(counts.values().copied().collect::<Vec<_>>(), [1, 2, 1]);
        assert_eq!(counts[&next], 1);
    }

    #[test]
    fn test_sequential_sessions_stay_balanced() {
        for step in Step::ALL {
            let (e, _) = engine();
            let mut s = session(step as u64);
            let id = s.register(&e, "/data/ds1", step).unwrap();
            s.activate(&e, step).unwrap();
            for n in 0..20 {
                // NotInformative 不计入平衡.
                let rating = match (n % 5, step.profile().accepts(Rating::NotInformative)) {
                    (0, true) => Rating::NotInformative,
                    _ => Rating::Pass,
                };
                let p = s.submit(&e, rating, false, vec![]).unwrap();
                assert_eq!(p.step, step);
                assert!(spread(&e.rating_counts(id, step).unwrap()) <= 1);
            }
        }
    }

    #[test]
    fn test_sub_views_follow_step() {
        let (e, _) = engine();
        let mut rng = StdRng::seed_from_u64(3);
        let id = e.register_layout("/data/ds1", Step::Mask).unwrap();
        for step in Step::ALL {
            e.register_layout("/data/ds1", step).unwrap();
        }

        for _ in 0..10 {
            let p = e.next_presentation_with(id, Step::Mask, "carol", &mut rng).unwrap();
            let SubView::Cut { axis, cut } = p.sub_view else {
                panic!("{} is not a cut", p.sub_view);
            };
            assert!(cut < 7);
            assert!(p.request.voxel.is_some());
            assert_eq!(p.request.overlay_volume, p.item.files().secondary);
            // 掩膜占据体素 [2, 6), 切面落在其中, 仿射为 x = 2i - 8.
            assert!((-4.0..=2.0).contains(&p.request.coord), "{axis}={}", p.request.coord);

            let p = e.next_presentation_with(id, Step::Dtifit, "carol", &mut rng).unwrap();
            let SubView::Slice { axis, index } = p.sub_view else {
                panic!("{} is not a slice", p.sub_view);
            };
            let fa = volumes(&p.item.files().primary).unwrap().mask();
            assert!(slice_fraction(fa.view(), axis, index) > 0.2);
            assert_eq!(p.request.coord, 2.0 * index as f64 - 8.0);
            assert_eq!(p.request.overlay_volume, None);

            let p = e
                .next_presentation_with(id, Step::SpatialNormalization, "carol", &mut rng)
                .unwrap();
            let SubView::Template(v) = p.sub_view else {
                panic!("{} is not a template view", p.sub_view);
            };
            assert_eq!(p.request.coord, v.coord());
            assert_eq!(p.request.axis, v.axis());
            assert!(p.request.voxel.is_none());
        }
    }

    #[test]
    fn test_invalid_judgments() {
        let (e, _) = engine();
        let id = e.register_layout("/data/ds1", Step::Mask).unwrap();
        e.register_layout("/data/ds1", Step::FmapCoregistration).unwrap();
        let mask_item = e.items(id, Step::Mask).unwrap()[0].id();
        let fmap_item = e.items(id, Step::FmapCoregistration).unwrap()[0].id();
        let cut = SubView::Cut {
            axis: ViewAxis::X,
            cut: 1,
        };
        let slice = SubView::Slice {
            axis: ViewAxis::Y,
            index: 3,
        };

        let invalid = |r: QcResult<Judgment>| r.unwrap_err().is_invalid_input();
        assert!(invalid(e.submit_judgment(mask_item, cut, "d", Rating::NotInformative, false)));
        assert!(invalid(e.submit_judgment(mask_item, slice, "d", Rating::Pass, false)));
        assert!(invalid(e.submit_judgment(
            mask_item,
            SubView::Cut {
                axis: ViewAxis::X,
                cut: 7
            },
            "d",
            Rating::Pass,
            false
        )));
        assert!(invalid(e.submit_judgment(
            fmap_item,
            SubView::Slice {
                axis: ViewAxis::Y,
                index: 8
            },
            "d",
            Rating::Pass,
            false
        )));
        assert!(invalid(e.submit_judgment(
            fmap_item,
            SubView::Template(TemplateView::X0),
            "d",
            Rating::Pass,
            false
        )));
        let clicked = Judgment::new(fmap_item, slice, "d", Rating::Fail)
            .with_clicks(vec![ClickPoint { x: 1.0, y: 2.0 }]);
        assert!(invalid(e.record_judgment(clicked)));
        assert!(e.ledger().is_empty());

        assert!(e
            .submit_judgment(ItemId(999), cut, "d", Rating::Pass, false)
            .unwrap_err()
            .is_not_found());

        let ok = Judgment::new(mask_item, cut, "d", Rating::Fail)
            .with_clicks(vec![ClickPoint { x: 1.0, y: 2.0 }]);
        assert_eq!(e.record_judgment(ok).unwrap().clicks.len(), 1);
        let ok = e.submit_judgment(fmap_item, slice, "d", Rating::NotInformative, true);
        assert!(ok.unwrap().source_data_issue);
        assert_eq!(e.ledger().len(), 2);
    }

    #[test]
    fn test_unmapped_transitions() {
        let (e, _) = engine();
        let mut s = session(1);
        assert!(s.activate(&e, Step::Mask).unwrap_err().is_not_found());
        assert!(s.submit(&e, Rating::Pass, false, vec![]).unwrap_err().is_not_found());
        assert!(matches!(s.state(), SessionState::Unregistered));

        let id = s.register(&e, "/data/ds1", Step::Mask).unwrap();
        assert!(matches!(s.state(), SessionState::LayoutReady { layout, .. } if *layout == id));
        assert!(s.submit(&e, Rating::Pass, false, vec![]).unwrap_err().is_not_found());
        // Dtifit 尚未准备.
        assert!(s.activate(&e, Step::Dtifit).unwrap_err().is_not_found());
        assert!(s.current().is_none());

        s.activate(&e, Step::Mask).unwrap();
        assert!(s.current().is_some());
        assert!(e.next_presentation(LayoutId(42), Step::Mask, "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_rejected_submission_keeps_presentation() {
        let (e, _) = engine();
        let mut s = session(2);
        s.register(&e, "/data/ds1", Step::Mask).unwrap();
        let before = s.activate(&e, Step::Mask).unwrap().item.id();
        let err = s.submit(&e, Rating::NotInformative, false, vec![]).unwrap_err();
        assert!(err.is_invalid_input());
        assert_eq!(s.current().map(|p| p.item.id()), Some(before));
    }

    #[test]
    fn test_empty_step_is_not_found() {
        let e = Engine::new(
            Arc::new(|_: &Path, _: Step| -> QcResult<Vec<ItemFiles>> { Ok(vec![]) }),
            Arc::new(volumes),
        );
        let id = e.register_layout("/data/empty", Step::Mask).unwrap();
        assert!(e.items(id, Step::Mask).unwrap().is_empty());
        assert!(e.next_presentation(id, Step::Mask, "x").unwrap_err().is_not_found());
    }

    /// 阶段 Dtifit 下, 每个文件名一个条目.
    fn engine_with_files(names: &'static [&'static str]) -> Engine {
        Engine::new(
            Arc::new(move |root: &Path, _: Step| -> QcResult<Vec<ItemFiles>> {
                Ok(names.iter().map(|n| ItemFiles::single(root.join(n))).collect())
            }),
            Arc::new(volumes),
        )
    }

    #[test]
    fn test_exhausted_retries_surface() {
        let e = engine_with_files(&["empty.nii"]);
        let id = e.register_layout("/data/ds1", Step::Dtifit).unwrap();
        let item = e.items(id, Step::Dtifit).unwrap()[0].id();

        let err = e.next_presentation(id, Step::Dtifit, "x").unwrap_err();
        assert!(err.is_exhausted_retries());
        assert_eq!(err.item(), Some(item));
        assert!(
            matches!(err, QcError::ExhaustedRetries { attempts, .. } if attempts == 3 * 8 * 8),
            "{err}"
        );
        assert!(e.is_unpresentable(item));

        // 唯一的条目已不可展示.
        assert!(e.next_presentation(id, Step::Dtifit, "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_empty_item_does_not_block_step() {
        let e = engine_with_files(&["empty.nii", "fa.nii"]);
        let id = e.register_layout("/data/ds1", Step::Dtifit).unwrap();
        let items = e.items(id, Step::Dtifit).unwrap();
        let (empty, good) = (items[0].id(), items[1].id());

        let mut rng = StdRng::seed_from_u64(13);
        let (mut shown, mut failed) = (0, 0);
        for _ in 0..50 {
            match e.next_presentation_with(id, Step::Dtifit, "x", &mut rng) {
                Ok(p) => {
                    assert_eq!(p.item.id(), good);
                    e.submit_judgment(good, p.sub_view, "x", Rating::Pass, false)
                        .unwrap();
                    shown += 1;
                }
                Err(err) => {
                    assert_eq!(err.item(), Some(empty));
                    failed += 1;
                }
            }
        }
        assert_eq!((shown, failed), (49, 1));
        assert_eq!(e.unpresentable(id, Step::Dtifit).unwrap(), [empty]);
        assert_eq!(e.rating_counts(id, Step::Dtifit).unwrap()[&good], 49);

        // 坏条目仍可记录源数据问题.
        let view = SubView::Slice {
            axis: ViewAxis::Z,
            index: 0,
        };
        let j = e.submit_judgment(empty, view, "x", Rating::Fail, true).unwrap();
        assert!(j.source_data_issue);
    }

    #[test]
    fn test_slice_axis_falls_back() {
        let e = engine_with_files(&["slab.nii"]);
        let id = e.register_layout("/data/ds1", Step::Dtifit).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..100 {
            let p = e.next_presentation_with(id, Step::Dtifit, "x", &mut rng).unwrap();
            assert_eq!(
                p.sub_view,
                SubView::Slice {
                    axis: ViewAxis::X,
                    index: 3
                }
            );
        }
        assert!(e.unpresentable(id, Step::Dtifit).unwrap().is_empty());
    }

    #[test]
    fn test_rendered_images_are_cached() {
        let (e, _) = engine();
        let e = e.with_renderer(Arc::new(GraySliceRenderer::new(Arc::new(volumes))));
        let mut rng = StdRng::seed_from_u64(11);
        let id = e.register_layout("/data/ds1", Step::SurfaceLocalization).unwrap();

        let p = e
            .next_presentation_with(id, Step::SurfaceLocalization, "eve", &mut rng)
            .unwrap();
        let img = p.image.expect("renderer is configured");
        assert!(img.is_compressed());
        assert_eq!(&img.bytes().unwrap()[..4], b"\x89PNG");

        let again = e.image(p.item.id(), p.sub_view).unwrap();
        assert!(Arc::ptr_eq(&img, &again));
        assert_eq!(e.images().len(), 1);

        let (plain, _) = engine();
        assert!(plain.image(p.item.id(), p.sub_view).unwrap_err().is_not_found());
    }

    #[test]
    fn test_random_policy_config() {
        let (e, _) = engine();
        let e = e.with_config(EngineConfig {
            policy: SchedulePolicy::Random,
            ..EngineConfig::default()
        });
        let mut s = session(5);
        s.register(&e, PathBuf::from("/data/ds1"), Step::SpatialNormalization)
            .unwrap();
        s.activate(&e, Step::SpatialNormalization).unwrap();
        for _ in 0..10 {
            s.submit(&e, Rating::Unsure, false, vec![]).unwrap();
        }
        assert_eq!(e.ledger().len(), 10);
    }

    #[test]
    fn test_concurrent_raters() {
        simple_logger::init_with_level(log::Level::Info).ok();
        let (e, _) = engine();
        let e = Arc::new(e);
        let id = e.register_layout("/data/ds1", Step::FmapCoregistration).unwrap();
        let (raters, rounds) = (num_cpus::get().clamp(2, 8), 25);

        let pool = threadpool::ThreadPool::new(raters);
        for r in 0..raters {
            let e = Arc::clone(&e);
            pool.execute(move || {
                let rng = StdRng::seed_from_u64(r as u64);
                let mut s = ReviewSession::with_rng(format!("rater{r}"), rng);
                s.register(&e, "/data/ds1", Step::FmapCoregistration).unwrap();
                s.activate(&e, Step::FmapCoregistration).unwrap();
                for _ in 0..rounds {
                    s.submit(&e, Rating::Pass, false, vec![]).unwrap();
                }
            });
        }
        pool.join();
        assert_eq!(pool.panic_count(), 0);

        let counts = e.rating_counts(id, Step::FmapCoregistration).unwrap();
        assert_eq!(counts.len(), N_ITEMS);
        assert_eq!(counts.values().sum::<u64>(), (raters * rounds) as u64);
        assert_eq!(e.ledger().len(), raters * rounds);
    }
}
