//! 渲染请求与渲染结果缓存.
//!
//! 引擎本身不关心如何把切面画成图像, 只负责给出 [`ImageRequest`];
//! 实际渲染由外部的 [`Renderer`] 完成.

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::trace;
use parking_lot::RwLock;

use crate::consts;
use crate::dataset::{ItemId, Step};
use crate::error::QcResult;
use crate::rating::SubView;
use crate::volume::ViewAxis;

mod gray;

pub use gray::GraySliceRenderer;

/// 输出图像格式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageFormat {
    /// PNG.
    Png,

    /// GIF.
    Gif,
}

/// 叠加在底图上的内容.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Overlay {
    /// 无叠加.
    Nothing,

    /// 半透明填充的掩膜.
    FilledMask,

    /// 掩膜轮廓线.
    Contour,

    /// 皮层 ribbon 的白质面与 pial 面轮廓.
    Ribbon,

    /// 模板空间中的标准脑区, 由渲染器自行提供.
    TemplateRoi,
}

/// 交给外部渲染器的请求.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageRequest {
    /// 所属阶段.
    pub step: Step,

    /// 底图.
    pub background: PathBuf,

    /// 叠加方式.
    pub overlay: Overlay,

    /// 叠加所用的体数据; 模板叠加时为 `None`.
    pub overlay_volume: Option<PathBuf>,

    /// 展示方向.
    pub axis: ViewAxis,

    /// 切面在 `axis` 方向上的物理坐标 (毫米).
    pub coord: f64,

    /// 切面经过的体素点 `(i, j, k)`. 模板视图只有物理坐标, 此时为 `None`.
    pub voxel: Option<[f64; 3]>,

    /// 输出格式.
    pub format: ImageFormat,
}

/// 外部渲染器: 将请求画成编码后的图像字节.
pub trait Renderer: Send + Sync {
    /// 渲染. 相同请求应得到相同结果.
    fn render(&self, request: &ImageRequest) -> QcResult<Vec<u8>>;
}

impl<F> Renderer for F
where
    F: Fn(&ImageRequest) -> QcResult<Vec<u8>> + Send + Sync,
{
    #[inline]
    fn render(&self, request: &ImageRequest) -> QcResult<Vec<u8>> {
        self(request)
    }
}

/// 渲染结果. 可能以 zlib 压缩存储.
#[derive(Clone, Debug)]
pub struct RenderedImage {
    buf: Vec<u8>,
    compressed: bool,
    format: ImageFormat,
}

impl RenderedImage {
    /// 保存渲染结果. `compress` 为 `true` 时以 zlib 压缩.
    pub fn new(bytes: Vec<u8>, format: ImageFormat, compress: bool) -> QcResult<Self> {
        if !compress {
            return Ok(Self {
                buf: bytes,
                compressed: false,
                format,
            });
        }
        let mut e = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::best());
        e.write_all(&bytes)?;
        Ok(Self {
            buf: e.finish()?,
            compressed: true,
            format,
        })
    }

    /// 是否压缩存储.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// 图像格式.
    #[inline]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// 底层存储的字节数.
    #[inline]
    pub fn stored_len(&self) -> usize {
        self.buf.len()
    }

    /// 原始图像字节. 压缩存储时会解压.
    pub fn bytes(&self) -> QcResult<Cow<'_, [u8]>> {
        if !self.compressed {
            return Ok(Cow::Borrowed(&self.buf));
        }
        let mut d = ZlibDecoder::new(self.buf.as_slice());
        let mut out = Vec::with_capacity(self.buf.len() * 2);
        d.read_to_end(&mut out)?;
        Ok(Cow::Owned(out))
    }
}

type CacheKey = (ItemId, SubView);

#[derive(Debug, Default)]
struct CacheSlots {
    images: HashMap<CacheKey, Arc<RenderedImage>>,
    // 写入顺序, 最早写入的在前.
    order: VecDeque<CacheKey>,
}

/// 渲染结果缓存, 以 (条目, 子视图) 为键.
///
/// 最多保留 `capacity` 张图像; 超出时丢弃最早写入的图像.
#[derive(Debug)]
pub struct ImageCache {
    capacity: usize,
    slots: RwLock<CacheSlots>,
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::with_capacity(consts::render::CACHE_CAPACITY)
    }
}

impl ImageCache {
    /// 以默认容量创建空缓存.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建最多保留 `capacity` 张图像的空缓存. 容量为 0 时不缓存.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            slots: RwLock::new(CacheSlots::default()),
        }
    }

    /// 容量.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 读取缓存.
    pub fn get(&self, item: ItemId, view: SubView) -> Option<Arc<RenderedImage>> {
        self.slots.read().images.get(&(item, view)).cloned()
    }

    /// 读取缓存; 不存在时调用 `render` 并写入.
    ///
    /// 渲染在锁外进行, 并发的相同请求可能各自渲染一次, 以先写入者为准.
    pub fn get_or_render<F>(&self, item: ItemId, view: SubView, render: F) -> QcResult<Arc<RenderedImage>>
    where
        F: FnOnce() -> QcResult<RenderedImage>,
    {
        if let Some(img) = self.get(item, view) {
            return Ok(img);
        }
        let img = Arc::new(render()?);
        if self.capacity == 0 {
            return Ok(img);
        }

        let key = (item, view);
        let mut slots = self.slots.write();
        if let Some(first) = slots.images.get(&key) {
            return Ok(Arc::clone(first));
        }
        while slots.order.len() >= self.capacity {
            match slots.order.pop_front() {
                Some(old) => {
                    slots.images.remove(&old);
                    trace!("evicted image of {} {}", old.0, old.1);
                }
                None => break,
            }
        }
        slots.order.push_back(key);
        slots.images.insert(key, Arc::clone(&img));
        Ok(img)
    }

    /// 丢弃条目 `item` 的全部缓存图像.
    pub fn remove_item(&self, item: ItemId) {
        let mut slots = self.slots.write();
        slots.order.retain(|(i, _)| *i != item);
        slots.images.retain(|(i, _), _| *i != item);
    }

    /// 缓存的图像个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.read().images.len()
    }

    /// 缓存是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
