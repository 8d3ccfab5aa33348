//! 不依赖外部工具的灰度切片渲染器.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::gif::GifEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, Frame, GrayImage, ImageEncoder, Luma};
use ndarray::{Array2, ArrayView, ArrayView2, Dimension};
use num::ToPrimitive;
use ordered_float::NotNan;
use parking_lot::RwLock;

use super::{ImageFormat, ImageRequest, Overlay, Renderer};
use crate::consts::{gray, window};
use crate::dataset::Step;
use crate::error::{QcError, QcResult};
use crate::volume::{VolumeGeometry, VolumeSource};

type Idx2d = (usize, usize);

/// 灰度窗口. 窗口以下为黑色, 以上为白色, 其间线性映射.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct IntensityWindow {
    lower: f32,
    upper: f32,
}

impl IntensityWindow {
    /// 取 `data` 中有限值的 `lo`, `hi` 分位数作为窗口. 没有有限值时返回 `None`.
    pub(crate) fn from_quantiles<D: Dimension>(
        data: ArrayView<f32, D>,
        (lo, hi): (f64, f64),
    ) -> Option<Self> {
        let mut values: Vec<NotNan<f32>> = data
            .iter()
            .filter(|v| v.is_finite())
            .filter_map(|v| NotNan::new(*v).ok())
            .collect();
        if values.is_empty() {
            return None;
        }
        values.sort_unstable();
        let at = |q: f64| {
            let i = ((values.len() - 1) as f64 * q.clamp(0.0, 1.0)).round();
            values[i.to_usize().unwrap_or(0)].into_inner()
        };
        Some(Self {
            lower: at(lo),
            upper: at(hi),
        })
    }

    /// 将体素值映射为灰度. 非有限值为黑色.
    pub(crate) fn eval(&self, v: f32) -> u8 {
        if !v.is_finite() || v <= self.lower {
            gray::BLACK
        } else if v >= self.upper {
            gray::WHITE
        } else {
            // 255, not 256.
            ((v - self.lower) / (self.upper - self.lower) * 255.0) as u8
        }
    }
}

/// 各 step 底图使用的分位数.
fn window_quantiles(step: Step) -> (f64, f64) {
    match step {
        Step::Mask => window::MASK,
        Step::FmapCoregistration => window::FMAP,
        _ => window::FULL,
    }
}

/// 获得 `(h, w)` 的 4-邻居索引. 不检查越界.
#[inline]
fn neighbour4((h, w): Idx2d) -> [Idx2d; 4] {
    [
        (h.wrapping_sub(1), w),
        (h.saturating_add(1), w),
        (h, w.wrapping_sub(1)),
        (h, w.saturating_add(1)),
    ]
}

/// 前景像素中, 4-邻域含有背景或位于图像边缘的像素.
fn boundary(mask: ArrayView2<bool>) -> Array2<bool> {
    let mut out = Array2::from_elem(mask.dim(), false);
    for (pos, _) in mask.indexed_iter().filter(|(_, m)| **m) {
        out[pos] = neighbour4(pos)
            .into_iter()
            .any(|p| !mask.get(p).copied().unwrap_or(false));
    }
    out
}

/// 以灰度图展示切片的渲染器.
///
/// 底图按 step 对应的分位数窗口归一化, 叠加内容以白色 (或亮灰色) 绘制.
/// 窗口取自整个底图体数据, 同一底图的所有切片对比度一致; 每个底图只计算一次.
/// 切片的第 0 维为图像的横轴, 第 1 维自下而上为纵轴.
/// [`Overlay::TemplateRoi`] 需要模板图谱, 本渲染器只绘制底图.
pub struct GraySliceRenderer {
    source: Arc<dyn VolumeSource>,
    windows: RwLock<HashMap<(PathBuf, Step), IntensityWindow>>,
}

impl GraySliceRenderer {
    /// 从 `source` 读取体数据.
    #[inline]
    pub fn new(source: Arc<dyn VolumeSource>) -> Self {
        Self {
            source,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// 底图 `request.background` 的灰度窗口. 体数据中没有有限值时取 `[0, 1]`.
    fn window(&self, request: &ImageRequest, bg: &VolumeGeometry) -> IntensityWindow {
        let key = (request.background.clone(), request.step);
        if let Some(w) = self.windows.read().get(&key) {
            return *w;
        }
        let w = IntensityWindow::from_quantiles(bg.data(), window_quantiles(request.step))
            .unwrap_or(IntensityWindow {
                lower: 0.0,
                upper: 1.0,
            });
        *self.windows.write().entry(key).or_insert(w)
    }

    /// 定位请求对应的切片编号.
    fn locate(request: &ImageRequest, bg: &VolumeGeometry) -> QcResult<usize> {
        let axis = request.axis;
        let len = bg.len_of(axis);
        let at = match request.voxel {
            Some(p) => p[axis.index()],
            None => {
                // 经过体数据中心, 且 `axis` 方向物理坐标为 `coord` 的点.
                let (a, b, c) = bg.shape();
                let center = [a, b, c].map(|n| n.saturating_sub(1) as f64 / 2.0);
                let mut world = bg.affine().apply(center);
                world[axis.index()] = request.coord;
                bg.affine().inverse()?.apply(world)[axis.index()]
            }
        };
        match at.round().to_usize() {
            Some(i) if i < len => Ok(i),
            _ => Err(QcError::InvalidInput(format!(
                "{axis}={} lies outside {}",
                request.coord,
                request.background.display()
            ))),
        }
    }

    fn load_overlay(&self, path: &Path, bg: &VolumeGeometry) -> QcResult<VolumeGeometry> {
        let ov = self.source.load(path)?;
        if ov.shape() != bg.shape() {
            return Err(QcError::InvalidInput(format!(
                "overlay {} has shape {:?}, background has {:?}",
                path.display(),
                ov.shape(),
                bg.shape()
            )));
        }
        Ok(ov)
    }

    /// 按叠加方式生成 `(遮罩, 灰度)` 图层, 后者覆盖前者.
    fn layers(
        &self,
        request: &ImageRequest,
        bg: &VolumeGeometry,
        index: usize,
    ) -> QcResult<Vec<(Array2<bool>, Paint)>> {
        let path = match (request.overlay, &request.overlay_volume) {
            (Overlay::Nothing | Overlay::TemplateRoi, _) => return Ok(vec![]),
            (_, Some(p)) => p.as_path(),
            (ov, None) => {
                return Err(QcError::InvalidInput(format!(
                    "{ov:?} overlay requires an overlay volume"
                )))
            }
        };
        let ov = self.load_overlay(path, bg)?;
        let axis = request.axis.axis();

        Ok(match request.overlay {
            Overlay::FilledMask => {
                let m = ov.mask().index_axis(axis, index).to_owned();
                vec![(m, Paint::Blend(gray::WHITE))]
            }
            Overlay::Contour => {
                let m = ov.mask();
                vec![(boundary(m.index_axis(axis, index)), Paint::Solid(gray::WHITE))]
            }
            Overlay::Ribbon => {
                let s = ov.ribbon_surfaces();
                vec![
                    (
                        boundary(s.pial.index_axis(axis, index)),
                        Paint::Solid(gray::LIGHT_GRAY),
                    ),
                    (
                        boundary(s.white.index_axis(axis, index)),
                        Paint::Solid(gray::WHITE),
                    ),
                ]
            }
            Overlay::Nothing | Overlay::TemplateRoi => vec![],
        })
    }
}

#[derive(Copy, Clone, Debug)]
enum Paint {
    Solid(u8),
    Blend(u8),
}

impl Paint {
    #[inline]
    fn apply(self, pix: u8) -> u8 {
        match self {
            Paint::Solid(g) => g,
            Paint::Blend(g) => ((u16::from(pix) + u16::from(g)) / 2) as u8,
        }
    }
}

fn encode(img: GrayImage, format: ImageFormat) -> QcResult<Vec<u8>> {
    let mut bytes = Vec::new();
    match format {
        ImageFormat::Png => {
            PngEncoder::new(&mut bytes).write_image(
                img.as_raw(),
                img.width(),
                img.height(),
                ColorType::L8,
            )?;
        }
        ImageFormat::Gif => {
            let rgba = DynamicImage::ImageLuma8(img).to_rgba8();
            GifEncoder::new(&mut bytes).encode_frame(Frame::new(rgba))?;
        }
    }
    Ok(bytes)
}

impl Renderer for GraySliceRenderer {
    fn render(&self, request: &ImageRequest) -> QcResult<Vec<u8>> {
        let bg = self.source.load(&request.background)?;
        let index = Self::locate(request, &bg)?;
        let slice = bg.slice_at(request.axis, index);
        let layers = self.layers(request, &bg, index)?;

        let (width, height) = slice.dim();
        let win = self.window(request, &bg);
        let mut img = GrayImage::new(width as u32, height as u32);
        for ((x, y), &v) in slice.indexed_iter() {
            let pix = layers
                .iter()
                .filter(|(m, _)| m[(x, y)])
                .fold(win.eval(v), |pix, (_, paint)| paint.apply(pix));
            img.put_pixel(x as u32, (height - 1 - y) as u32, Luma([pix]));
        }
        log::debug!(
            "rendered {} {}#{index} with {:?}",
            request.background.display(),
            request.axis,
            request.overlay
        );

        encode(img, request.format)
    }
}
