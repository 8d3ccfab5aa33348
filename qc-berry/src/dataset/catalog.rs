//! 已注册数据集和评审条目的登记册.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use once_cell::sync::OnceCell;

use super::{FileShape, GeometryFrom, ItemFiles, ItemId, LayoutId, Step};
use crate::config::CutSpec;
use crate::cut::{compute_cuts_with, Cuts};
use crate::error::{QcError, QcResult};
use crate::volume::{VolumeGeometry, VolumeSource};

/// 已注册的数据集.
#[derive(Clone, Debug)]
pub struct Layout {
    id: LayoutId,
    src: PathBuf,
    cuts: CutSpec,
    steps: BTreeSet<Step>,
    created: DateTime<Utc>,
}

impl Layout {
    /// 编号.
    #[inline]
    pub fn id(&self) -> LayoutId {
        self.id
    }

    /// 数据集根目录.
    #[inline]
    pub fn src(&self) -> &Path {
        &self.src
    }

    /// 注册时确定的切面参数.
    #[inline]
    pub fn cut_spec(&self) -> &CutSpec {
        &self.cuts
    }

    /// 已准备好的阶段.
    #[inline]
    pub fn steps(&self) -> &BTreeSet<Step> {
        &self.steps
    }

    /// 阶段 `step` 是否已准备.
    #[inline]
    pub fn is_prepared(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }

    /// 注册时间.
    #[inline]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

/// 一个评审条目.
///
/// 体数据和切面在第一次使用时加载并缓存.
#[derive(Debug)]
pub struct ReviewItem {
    id: ItemId,
    layout: LayoutId,
    step: Step,
    files: ItemFiles,
    geometry: OnceCell<Arc<VolumeGeometry>>,
    cuts: OnceCell<Cuts>,
}

impl ReviewItem {
    fn new(id: ItemId, layout: LayoutId, step: Step, files: ItemFiles) -> Self {
        Self {
            id,
            layout,
            step,
            files,
            geometry: OnceCell::new(),
            cuts: OnceCell::new(),
        }
    }

    /// 编号.
    #[inline]
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// 所属数据集.
    #[inline]
    pub fn layout(&self) -> LayoutId {
        self.layout
    }

    /// 所属阶段.
    #[inline]
    pub fn step(&self) -> Step {
        self.step
    }

    /// 文件.
    #[inline]
    pub fn files(&self) -> &ItemFiles {
        &self.files
    }

    /// 选取子视图所用体数据的路径. 该阶段不需要时返回 `None`.
    pub fn geometry_path(&self) -> Option<&Path> {
        match self.step.profile().geometry {
            GeometryFrom::Nothing => None,
            GeometryFrom::Primary => Some(&self.files.primary),
            GeometryFrom::Secondary => self.files.secondary.as_deref(),
        }
    }

    /// 加载 (或取出缓存的) 体数据.
    ///
    /// 该阶段不需要体数据时返回 `Err(QcError::InvalidInput)`.
    pub fn geometry(&self, source: &dyn VolumeSource) -> QcResult<Arc<VolumeGeometry>> {
        let path = self.geometry_path().ok_or_else(|| {
            QcError::InvalidInput(format!("step `{}` has no geometry", self.step))
        })?;
        self.geometry
            .get_or_try_init(|| {
                debug!("loading geometry of {} from {}", self.id, path.display());
                source.load(path).map(Arc::new)
            })
            .cloned()
    }

    /// 按 `spec` 计算 (或取出缓存的) 等距切面. 同一条目应始终使用同一个 `spec`.
    pub fn cuts(&self, source: &dyn VolumeSource, spec: &CutSpec) -> QcResult<&Cuts> {
        self.cuts.get_or_try_init(|| {
            let g = self.geometry(source)?;
            Ok(compute_cuts_with(g.mask().view(), g.affine(), spec))
        })
    }
}

/// 数据集与评审条目的登记册.
///
/// 唯一性约束: 同一阶段内, 任何文件路径至多属于一个条目.
#[derive(Debug, Default)]
pub struct Catalog {
    layouts: Vec<Layout>,
    by_path: HashMap<PathBuf, LayoutId>,
    items: HashMap<(LayoutId, Step), Vec<Arc<ReviewItem>>>,
    by_id: HashMap<ItemId, Arc<ReviewItem>>,
    claimed: HashMap<(Step, PathBuf), ItemId>,
}

/// 去掉末尾分隔符和 `.` 等冗余部分, 使同一目录的不同写法得到同一个键.
#[inline]
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

impl Catalog {
    /// 创建空登记册.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部数据集.
    #[inline]
    pub fn layouts(&self) -> &[Layout] {
        &self.layouts
    }

    /// 按编号查找数据集, 不存在时返回 `Err(QcError::NotFound)`.
    pub fn layout(&self, id: LayoutId) -> QcResult<&Layout> {
        self.layouts
            .get(id.0 as usize)
            .ok_or_else(|| QcError::NotFound(format!("{id} is not registered")))
    }

    /// 按根目录查找数据集.
    pub fn layout_for_path(&self, path: &Path) -> Option<&Layout> {
        let id = self.by_path.get(&normalize(path))?;
        self.layouts.get(id.0 as usize)
    }

    /// 注册数据集. 同一路径重复注册时返回已有编号;
    /// 若切面参数与首次注册不同则返回 `Err(QcError::Conflict)`, 首次注册有效.
    pub fn insert_layout(&mut self, path: &Path, cuts: &CutSpec) -> QcResult<LayoutId> {
        if let Some(layout) = self.layout_for_path(path) {
            if layout.cuts != *cuts {
                return Err(QcError::Conflict(format!(
                    "{} was registered with {:?}, refusing {:?}",
                    path.display(),
                    layout.cuts,
                    cuts
                )));
            }
            return Ok(layout.id);
        }

        let id = LayoutId(self.layouts.len() as u64);
        let src = normalize(path);
        info!("register {id} at {}", src.display());
        self.by_path.insert(src.clone(), id);
        self.layouts.push(Layout {
            id,
            src,
            cuts: cuts.clone(),
            steps: BTreeSet::new(),
            created: Utc::now(),
        });
        Ok(id)
    }

    /// 数据集 `layout` 的阶段 `step` 是否已准备.
    pub fn is_prepared(&self, layout: LayoutId, step: Step) -> bool {
        self.layout(layout).is_ok_and(|l| l.is_prepared(step))
    }

    /// 为数据集 `layout` 批量创建阶段 `step` 的评审条目, 并将该阶段标记为已准备.
    /// 返回新建条目个数.
    ///
    /// 已属于本数据集同阶段的文件组会被跳过. 以下情况下不做任何修改:
    ///
    /// - 文件个数与阶段要求不符: `Err(QcError::InvalidInput)`;
    /// - 文件已属于其他数据集的同阶段条目: `Err(QcError::Conflict)`.
    pub fn prepare(
        &mut self,
        layout: LayoutId,
        step: Step,
        files: Vec<ItemFiles>,
    ) -> QcResult<usize> {
        self.layout(layout)?;
        let shape = step.profile().files;

        let mut batch: HashSet<PathBuf> = HashSet::new();
        let mut fresh = Vec::with_capacity(files.len());
        for f in files {
            if (shape == FileShape::Pair) != f.secondary.is_some() {
                return Err(QcError::InvalidInput(format!(
                    "step `{step}` expects {shape:?} files, got {f:?}"
                )));
            }

            let mut owned_here = false;
            for p in f.paths() {
                match self.claimed.get(&(step, p.to_owned())) {
                    Some(other) if self.by_id[other].layout != layout => {
                        return Err(QcError::Conflict(format!(
                            "{} already belongs to {other} of another layout",
                            p.display()
                        )));
                    }
                    Some(_) => owned_here = true,
                    None => {}
                }
            }
            // 同一批次内重复出现的文件只取第一次.
            if owned_here || f.paths().any(|p| batch.contains(p)) {
                continue;
            }
            batch.extend(f.paths().map(Path::to_path_buf));
            fresh.push(f);
        }

        let created = fresh.len();
        for f in fresh {
            let id = ItemId(self.by_id.len() as u64);
            for p in f.paths() {
                self.claimed.insert((step, p.to_owned()), id);
            }
            let item = Arc::new(ReviewItem::new(id, layout, step, f));
            self.by_id.insert(id, Arc::clone(&item));
            self.items.entry((layout, step)).or_default().push(item);
        }
        self.layouts[layout.0 as usize].steps.insert(step);
        info!("prepared `{step}` for {layout}: {created} new items");
        Ok(created)
    }

    /// 数据集 `layout` 在阶段 `step` 的全部条目.
    ///
    /// 阶段未准备时返回 `Err(QcError::NotFound)`; 已准备但没有条目时返回空切片.
    pub fn items(&self, layout: LayoutId, step: Step) -> QcResult<&[Arc<ReviewItem>]> {
        if !self.layout(layout)?.is_prepared(step) {
            return Err(QcError::step_not_prepared(step));
        }
        Ok(self
            .items
            .get(&(layout, step))
            .map_or(&[][..], |v| v.as_slice()))
    }

    /// 按编号查找条目, 不存在时返回 `Err(QcError::NotFound)`.
    pub fn item(&self, id: ItemId) -> QcResult<Arc<ReviewItem>> {
        self.by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| QcError::NotFound(format!("{id} does not exist")))
    }
}

#[cfg(test)]
mod tests {
    use super::Catalog;
    use crate::config::CutSpec;
    use crate::dataset::{ItemFiles, Step};
    use crate::volume::{Affine, VolumeGeometry};
    use crate::QcResult;
    use ndarray::Array3;
    use std::path::Path;

    fn masks(root: &str, n: usize) -> Vec<ItemFiles> {
        (0..n)
            .map(|i| {
                ItemFiles::pair(
                    format!("{root}/sub-{i}_T1w.nii"),
                    format!("{root}/sub-{i}_mask.nii"),
                )
            })
            .collect()
    }

    #[test]
    fn test_layout_registration_is_idempotent() {
        let mut c = Catalog::new();
        let spec = CutSpec::default();
        let a = c.insert_layout(Path::new("/data/ds1"), &spec).unwrap();
        let b = c.insert_layout(Path::new("/data/ds1/"), &spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(c.layouts().len(), 1);

        let other = CutSpec::with_n_cuts(3).unwrap();
        assert!(c
            .insert_layout(Path::new("/data/ds1"), &other)
            .unwrap_err()
            .is_conflict());
        assert_eq!(c.layout(a).unwrap().cut_spec(), &spec);
    }

    #[test]
    fn test_prepare_does_not_duplicate() {
        let mut c = Catalog::new();
        let l = c.insert_layout(Path::new("/d"), &CutSpec::default()).unwrap();
        assert!(c.items(l, Step::Mask).unwrap_err().is_not_found());

        assert_eq!(c.prepare(l, Step::Mask, masks("/d", 3)).unwrap(), 3);
        assert_eq!(c.prepare(l, Step::Mask, masks("/d", 4)).unwrap(), 1);
        assert_eq!(c.items(l, Step::Mask).unwrap().len(), 4);
        assert!(c.is_prepared(l, Step::Mask));
        assert!(!c.is_prepared(l, Step::Dtifit));
    }

    #[test]
    fn test_prepare_rejects_foreign_or_malformed_files() {
        let mut c = Catalog::new();
        let a = c.insert_layout(Path::new("/a"), &CutSpec::default()).unwrap();
        let b = c.insert_layout(Path::new("/b"), &CutSpec::default()).unwrap();
        c.prepare(a, Step::Mask, masks("/shared", 2)).unwrap();

        assert!(c
            .prepare(b, Step::Mask, masks("/shared", 1))
            .unwrap_err()
            .is_conflict());
        assert!(!c.is_prepared(b, Step::Mask));

        let single = vec![ItemFiles::single("/b/x.nii")];
        assert!(c.prepare(b, Step::Mask, single).unwrap_err().is_invalid_input());

        // 不同阶段可以共用同一个文件.
        let fa = vec![ItemFiles::single("/shared/sub-0_T1w.nii")];
        assert_eq!(c.prepare(b, Step::Dtifit, fa).unwrap(), 1);
    }

    #[test]
    fn test_empty_prepared_step() {
        let mut c = Catalog::new();
        let l = c.insert_layout(Path::new("/e"), &CutSpec::default()).unwrap();
        assert_eq!(c.prepare(l, Step::Dtifit, vec![]).unwrap(), 0);
        assert!(c.items(l, Step::Dtifit).unwrap().is_empty());
    }

    #[test]
    fn test_geometry_and_cuts_are_cached() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut c = Catalog::new();
        let l = c.insert_layout(Path::new("/g"), &CutSpec::default()).unwrap();
        c.prepare(l, Step::Mask, masks("/g", 1)).unwrap();
        let item = c.items(l, Step::Mask).unwrap()[0].clone();
        assert_eq!(item.geometry_path(), Some(Path::new("/g/sub-0_mask.nii")));

        let loads = AtomicUsize::new(0);
        let source = |_: &Path| -> QcResult<VolumeGeometry> {
            loads.fetch_add(1, Ordering::Relaxed);
            let m = Array3::from_elem((6, 6, 6), true);
            Ok(VolumeGeometry::from_mask(&m, Affine::identity()))
        };
        let spec = CutSpec::with_n_cuts(2).unwrap();
        let first = item.cuts(&source, &spec).unwrap().clone();
        let second = item.cuts(&source, &spec).unwrap();
        item.geometry(&source).unwrap();
        assert_eq!(&first, second);
        assert_eq!(first.n_cuts(), 2);
        assert_eq!(loads.load(Ordering::Relaxed), 1);
    }
}
