//! 评审引擎: 数据集注册, 条目展示与评分提交.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;
use rand::Rng;

use crate::config::{CutSpec, EngineConfig};
use crate::cut::random_slice;
use crate::dataset::{Catalog, FileDiscovery, ItemId, Layout, LayoutId, ReviewItem, Step, ViewKind};
use crate::error::{QcError, QcResult};
use crate::rating::{Judgment, MemoryLedger, Rating, RatingStore, SubView, TemplateView};
use crate::render::{ImageCache, ImageRequest, Overlay, RenderedImage, Renderer};
use crate::schedule::WorkScheduler;
use crate::volume::{ViewAxis, VolumeSource};

/// 一次展示: 选中的条目, 子视图, 以及交给渲染器的请求.
#[derive(Clone, Debug)]
pub struct Presentation {
    /// 所属数据集.
    pub layout: LayoutId,

    /// 所属阶段.
    pub step: Step,

    /// 评审者.
    pub rater: String,

    /// 选中的条目.
    pub item: Arc<ReviewItem>,

    /// 子视图.
    pub sub_view: SubView,

    /// 渲染请求.
    pub request: ImageRequest,

    /// 渲染结果. 引擎未配置渲染器时为 `None`.
    pub image: Option<Arc<RenderedImage>>,
}

/// 评审引擎. 所有方法只需 `&self`, 可在多个评审者线程间共享.
///
/// 数据集登记册由读写锁保护, 且锁只在登记册操作期间持有;
/// 文件发现, 体数据加载与渲染都在锁外进行.
///
/// 无法生成子视图的条目 (体数据读取失败, 或掩膜过空以致采样耗尽) 会被标记为
/// 不可展示, 之后的调度不再选中它们, 以免一个坏条目卡住整个阶段.
pub struct Engine {
    config: EngineConfig,
    catalog: RwLock<Catalog>,
    ledger: Arc<dyn RatingStore>,
    discovery: Arc<dyn FileDiscovery>,
    volumes: Arc<dyn VolumeSource>,
    renderer: Option<Arc<dyn Renderer>>,
    images: ImageCache,
    unpresentable: RwLock<HashSet<ItemId>>,
}

impl Engine {
    /// 以默认配置和内存账本创建引擎.
    pub fn new(discovery: Arc<dyn FileDiscovery>, volumes: Arc<dyn VolumeSource>) -> Self {
        Self {
            config: EngineConfig::default(),
            catalog: RwLock::new(Catalog::new()),
            ledger: Arc::new(MemoryLedger::new()),
            discovery,
            volumes,
            renderer: None,
            images: ImageCache::new(),
            unpresentable: RwLock::new(HashSet::new()),
        }
    }

    /// 替换配置. 渲染结果缓存按新配置的容量重建.
    #[inline]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.images = ImageCache::with_capacity(config.image_cache_capacity);
        self.config = config;
        self
    }

    /// 替换评分存储.
    #[inline]
    pub fn with_ledger(mut self, ledger: Arc<dyn RatingStore>) -> Self {
        self.ledger = ledger;
        self
    }

    /// 设置渲染器. 设置后每次展示都会渲染 (或取出缓存的) 图像.
    #[inline]
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 评分存储.
    #[inline]
    pub fn ledger(&self) -> &Arc<dyn RatingStore> {
        &self.ledger
    }

    /// 渲染结果缓存.
    #[inline]
    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    /// 条目 `item` 是否已被标记为不可展示.
    pub fn is_unpresentable(&self, item: ItemId) -> bool {
        self.unpresentable.read().contains(&item)
    }

    /// 数据集 `layout` 在阶段 `step` 中被标记为不可展示的条目.
    pub fn unpresentable(&self, layout: LayoutId, step: Step) -> QcResult<Vec<ItemId>> {
        let marked = self.unpresentable.read();
        Ok(self
            .items(layout, step)?
            .iter()
            .map(|i| i.id())
            .filter(|id| marked.contains(id))
            .collect())
    }

    /// 按编号取出数据集的一份拷贝.
    pub fn layout(&self, id: LayoutId) -> QcResult<Layout> {
        self.catalog.read().layout(id).cloned()
    }

    /// 数据集 `layout` 在阶段 `step` 的全部条目.
    pub fn items(&self, layout: LayoutId, step: Step) -> QcResult<Vec<Arc<ReviewItem>>> {
        Ok(self.catalog.read().items(layout, step)?.to_vec())
    }

    /// 使用配置中的切面参数注册数据集, 见 [`Engine::register_layout_with`].
    #[inline]
    pub fn register_layout<P: AsRef<Path>>(&self, path: P, step: Step) -> QcResult<LayoutId> {
        let cuts = self.config.cuts.clone();
        self.register_layout_with(path, step, &cuts)
    }

    /// 注册数据集并准备阶段 `step`. 幂等: 同一路径只产生一个数据集,
    /// 已准备的阶段不会重复发现文件, 也不会重复创建条目.
    ///
    /// 同一路径以不同的切面参数注册时返回 `Err(QcError::Conflict)`.
    pub fn register_layout_with<P: AsRef<Path>>(
        &self,
        path: P,
        step: Step,
        cuts: &CutSpec,
    ) -> QcResult<LayoutId> {
        let id = self.catalog.write().insert_layout(path.as_ref(), cuts)?;
        let root = {
            let catalog = self.catalog.read();
            if catalog.is_prepared(id, step) {
                return Ok(id);
            }
            catalog.layout(id)?.src().to_path_buf()
        };

        let files = self.discovery.discover(&root, step)?;
        debug!("discovered {} file groups of `{step}` under {}", files.len(), root.display());

        // 发现期间可能有其他线程完成了准备.
        let mut catalog = self.catalog.write();
        if !catalog.is_prepared(id, step) {
            catalog.prepare(id, step, files)?;
        }
        Ok(id)
    }

    /// 以线程本地随机数生成器选取下一次展示, 见 [`Engine::next_presentation_with`].
    #[inline]
    pub fn next_presentation(
        &self,
        layout: LayoutId,
        step: Step,
        rater: &str,
    ) -> QcResult<Presentation> {
        self.next_presentation_with(layout, step, rater, &mut rand::thread_rng())
    }

    /// 选取下一个条目并为其生成子视图.
    ///
    /// 阶段未准备, 没有条目, 或全部条目都不可展示时返回 `Err(QcError::NotFound)`.
    ///
    /// 选中的条目无法生成子视图时, 该条目被标记为不可展示并返回对应错误;
    /// 随机切片在三个方向上都采样失败时返回带有条目编号的
    /// `Err(QcError::ExhaustedRetries)`, 调用方可据此记录一条源数据问题评分.
    /// 之后的调用不会再选中它.
    pub fn next_presentation_with<R: Rng + ?Sized>(
        &self,
        layout: LayoutId,
        step: Step,
        rater: &str,
        rng: &mut R,
    ) -> QcResult<Presentation> {
        let (items, cuts) = {
            let catalog = self.catalog.read();
            let items = catalog.items(layout, step)?.to_vec();
            (items, catalog.layout(layout)?.cut_spec().clone())
        };
        let total = items.len();
        let items: Vec<Arc<ReviewItem>> = {
            let marked = self.unpresentable.read();
            items.into_iter().filter(|i| !marked.contains(&i.id())).collect()
        };
        if items.is_empty() && total > 0 {
            return Err(QcError::NotFound(format!(
                "all {total} items of step `{step}` are unpresentable"
            )));
        }

        let scheduler =
            WorkScheduler::new(self.ledger.as_ref(), &self.config.excluded, self.config.policy);
        let item = scheduler.select_next(&items, rng)?;
        let (sub_view, request) = self
            .pick_sub_view(&item, &cuts, rng)
            .and_then(|v| Ok((v, self.request_for(&item, v, &cuts)?)))
            .map_err(|e| self.mark_unpresentable(&item, e))?;
        let image = match &self.renderer {
            Some(r) => Some(self.render(r.as_ref(), item.id(), sub_view, &request)?),
            None => None,
        };
        debug!("{rater} <- {} {sub_view}", item.id());

        Ok(Presentation {
            layout,
            step,
            rater: rater.to_owned(),
            item,
            sub_view,
            request,
            image,
        })
    }

    /// 以当前时间提交评分, 见 [`Engine::record_judgment`].
    pub fn submit_judgment(
        &self,
        item: ItemId,
        sub_view: SubView,
        rater: &str,
        rating: Rating,
        unusable: bool,
    ) -> QcResult<Judgment> {
        let j = Judgment::new(item, sub_view, rater, rating).with_source_data_issue(unusable);
        self.record_judgment(j)
    }

    /// 校验并记录一条评分.
    ///
    /// 以下情况返回 `Err(QcError::InvalidInput)`: 评分值不被该阶段接受;
    /// 子视图与该阶段不符或越界; 不允许点选的阶段带有点选位置.
    /// 条目不存在时返回 `Err(QcError::NotFound)`.
    pub fn record_judgment(&self, judgment: Judgment) -> QcResult<Judgment> {
        let (item, cuts) = {
            let catalog = self.catalog.read();
            let item = catalog.item(judgment.item)?;
            let cuts = catalog.layout(item.layout())?.cut_spec().clone();
            (item, cuts)
        };
        let step = item.step();
        let profile = step.profile();
        if !profile.accepts(judgment.rating) {
            return Err(QcError::InvalidInput(format!(
                "rating {} is not accepted by step `{step}`",
                judgment.rating
            )));
        }
        if !profile.clicks && !judgment.clicks.is_empty() {
            return Err(QcError::InvalidInput(format!(
                "step `{step}` does not take clicked points"
            )));
        }
        self.request_for(&item, judgment.sub_view, &cuts)?;

        let j = self.ledger.record(judgment)?;
        info!("{} rated {} {} as {}", j.rater, j.item, j.sub_view, j.rating);
        Ok(j)
    }

    /// 数据集 `layout` 在阶段 `step` 中每个条目的有效评分次数.
    pub fn rating_counts(&self, layout: LayoutId, step: Step) -> QcResult<BTreeMap<ItemId, u64>> {
        let items = self.items(layout, step)?;
        let scheduler =
            WorkScheduler::new(self.ledger.as_ref(), &self.config.excluded, self.config.policy);
        let counts = scheduler.counts(&items);
        Ok(items.iter().map(|i| i.id()).zip(counts).collect())
    }

    /// 渲染 (或取出缓存的) 条目 `item` 在子视图 `sub_view` 下的图像.
    ///
    /// 未配置渲染器时返回 `Err(QcError::NotFound)`.
    pub fn image(&self, item: ItemId, sub_view: SubView) -> QcResult<Arc<RenderedImage>> {
        let renderer = self
            .renderer
            .as_ref()
            .ok_or_else(|| QcError::NotFound("no renderer configured".to_string()))?;
        if let Some(img) = self.images.get(item, sub_view) {
            return Ok(img);
        }
        let (item, cuts) = {
            let catalog = self.catalog.read();
            let item = catalog.item(item)?;
            let cuts = catalog.layout(item.layout())?.cut_spec().clone();
            (item, cuts)
        };
        let request = self.request_for(&item, sub_view, &cuts)?;
        self.render(renderer.as_ref(), item.id(), sub_view, &request)
    }

    fn mark_unpresentable(&self, item: &ReviewItem, err: QcError) -> QcError {
        warn!("{} of step `{}` is unpresentable: {err}", item.id(), item.step());
        self.unpresentable.write().insert(item.id());
        match err {
            QcError::ExhaustedRetries {
                axis,
                min,
                attempts,
                ..
            } => QcError::ExhaustedRetries {
                item: Some(item.id()),
                axis,
                min,
                attempts,
            },
            other => other,
        }
    }

    fn render(
        &self,
        renderer: &dyn Renderer,
        item: ItemId,
        sub_view: SubView,
        request: &ImageRequest,
    ) -> QcResult<Arc<RenderedImage>> {
        self.images.get_or_render(item, sub_view, || {
            let bytes = renderer.render(request)?;
            RenderedImage::new(bytes, request.format, self.config.compress_images)
        })
    }

    /// 按该阶段的方式随机生成子视图.
    fn pick_sub_view<R: Rng + ?Sized>(
        &self,
        item: &ReviewItem,
        cuts: &CutSpec,
        rng: &mut R,
    ) -> QcResult<SubView> {
        Ok(match item.step().profile().view {
            ViewKind::Cuts => {
                let n = item.cuts(self.volumes.as_ref(), cuts)?.n_cuts();
                SubView::Cut {
                    axis: ViewAxis::random(rng),
                    cut: rng.gen_range(0..n),
                }
            }
            ViewKind::RandomSlice => {
                let mask = item.geometry(self.volumes.as_ref())?.mask();
                // 先试随机抽到的方向, 失败后依次换用另外两个方向.
                let first = ViewAxis::random(rng);
                let axes = ViewAxis::ALL.into_iter().filter(|a| *a != first);
                let mut spent = 0;
                let mut last = None;
                for axis in std::iter::once(first).chain(axes) {
                    match random_slice(mask.view(), axis, &self.config.sampler, rng) {
                        Ok(index) => return Ok(SubView::Slice { axis, index }),
                        Err(QcError::ExhaustedRetries { attempts, .. }) => {
                            debug!("{}: no slice along {axis}, trying another axis", item.id());
                            spent += attempts;
                            last = Some(axis);
                        }
                        Err(e) => return Err(e),
                    }
                }
                return Err(QcError::ExhaustedRetries {
                    item: Some(item.id()),
                    axis: last.unwrap_or(first),
                    min: self.config.sampler.min_occupied_fraction(),
                    attempts: spent,
                });
            }
            ViewKind::Template => SubView::Template(TemplateView::random(rng)),
        })
    }

    /// 校验子视图与条目的阶段相符, 并生成渲染请求.
    fn request_for(
        &self,
        item: &ReviewItem,
        sub_view: SubView,
        cuts: &CutSpec,
    ) -> QcResult<ImageRequest> {
        let step = item.step();
        let profile = step.profile();
        let mismatch = || {
            QcError::InvalidInput(format!("sub-view {sub_view} does not fit step `{step}`"))
        };

        let (coord, voxel) = match (profile.view, sub_view) {
            (ViewKind::Cuts, SubView::Cut { axis, cut }) => {
                let c = item.cuts(self.volumes.as_ref(), cuts)?;
                let coord = *c.world(axis).get(cut).ok_or_else(mismatch)?;
                (coord, c.voxel_point(cut))
            }
            (ViewKind::RandomSlice, SubView::Slice { axis, index }) => {
                let g = item.geometry(self.volumes.as_ref())?;
                if index >= g.len_of(axis) {
                    return Err(mismatch());
                }
                // 切片编号的物理坐标取体素 (i, i, i) 在该方向上的分量.
                let i = index as f64;
                let coord = g.affine().apply([i; 3])[axis.index()];
                let (a, b, c) = g.shape();
                let mut voxel = [a, b, c].map(|n| n.saturating_sub(1) as f64 / 2.0);
                voxel[axis.index()] = i;
                (coord, Some(voxel))
            }
            (ViewKind::Template, SubView::Template(v)) => (v.coord(), None),
            _ => return Err(mismatch()),
        };

        let files = item.files();
        let overlay_volume = match profile.overlay {
            Overlay::Nothing | Overlay::TemplateRoi => None,
            _ => files.secondary.clone(),
        };
        Ok(ImageRequest {
            step,
            background: files.primary.clone(),
            overlay: profile.overlay,
            overlay_volume,
            axis: sub_view.axis(),
            coord,
            voxel,
            format: profile.format,
        })
    }
}
