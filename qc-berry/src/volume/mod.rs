//! 三维体数据及其几何信息.

use std::fmt;
use std::path::Path;

use ndarray::{Array3, ArrayView2, ArrayView3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use num::ToPrimitive;
use rand::Rng;

use crate::consts::ribbon;
use crate::error::{QcError, QcResult};
use crate::Idx3d;

mod affine;

pub use affine::Affine;

/// 展示方向, 同时也是体素轴编号.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ViewAxis {
    /// 第 0 轴, 矢状面.
    X = 0,

    /// 第 1 轴, 冠状面.
    Y = 1,

    /// 第 2 轴, 轴状面.
    Z = 2,
}

impl ViewAxis {
    /// 按轴序排列的全部方向.
    pub const ALL: [ViewAxis; 3] = [ViewAxis::X, ViewAxis::Y, ViewAxis::Z];

    /// 对应的 ndarray 轴编号.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 对应的 ndarray 轴.
    #[inline]
    pub const fn axis(self) -> Axis {
        Axis(self as usize)
    }

    /// 均匀随机选择一个方向.
    #[inline]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

impl fmt::Display for ViewAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
        })
    }
}

/// 带仿射的三维体数据. 体素值以 `f32` 保存, 索引顺序与 nifti 一致, 即 `(i, j, k)`.
#[derive(Clone, Debug)]
pub struct VolumeGeometry {
    data: Array3<f32>,
    affine: Affine,
}

impl VolumeGeometry {
    /// 直接构建.
    #[inline]
    pub fn new(data: Array3<f32>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// 由二值掩膜构建, 前景记为 `1.0`.
    pub fn from_mask(mask: &Array3<bool>, affine: Affine) -> Self {
        Self::new(mask.mapv(|b| if b { 1.0 } else { 0.0 }), affine)
    }

    /// 打开 nii 文件. 4D 文件尾部的单例维度会被去掉; 其余非 3D 数据返回
    /// `Err(QcError::InvalidInput)`.
    pub fn open<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        let path = path.as_ref();
        let wrap = |source| QcError::Nifti {
            path: path.to_owned(),
            source,
        };

        let obj = ReaderOptions::new().read_file(path).map_err(wrap)?;
        let affine = Affine::from_header(obj.header());
        let mut data = obj.into_volume().into_ndarray::<f32>().map_err(wrap)?;
        while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
            let last = data.ndim() - 1;
            data = data.index_axis_move(Axis(last), 0);
        }
        let data = data.into_dimensionality::<Ix3>().map_err(|e| {
            QcError::InvalidInput(format!("{} is not a 3D volume: {e}", path.display()))
        })?;

        Ok(Self::new(data, affine))
    }

    /// 体素形状 `(i, j, k)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 沿 `axis` 的切片个数.
    #[inline]
    pub fn len_of(&self, axis: ViewAxis) -> usize {
        self.data.len_of(axis.axis())
    }

    /// 仿射变换.
    #[inline]
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 沿 `axis` 的第 `index` 个切片. 越界时 panic.
    #[inline]
    pub fn slice_at(&self, axis: ViewAxis, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(axis.axis(), index)
    }

    /// 二值掩膜: 体素值大于 0 即为前景.
    pub fn mask(&self) -> Array3<bool> {
        self.data.mapv(|v| v > 0.0)
    }

    /// 将体数据视作 FreeSurfer ribbon 标签, 拆出白质面和 pial 面掩膜.
    pub fn ribbon_surfaces(&self) -> RibbonSurfaces {
        let labels = self
            .data
            .mapv(|v| v.round().to_u32().map_or(0, |l| l % ribbon::MODULUS));
        RibbonSurfaces {
            white: labels.mapv(|l| l == ribbon::WHITE),
            pial: labels.mapv(|l| l >= ribbon::PIAL_MIN),
        }
    }
}

/// 皮层 ribbon 的两个表面掩膜.
#[derive(Clone, Debug)]
pub struct RibbonSurfaces {
    /// 白质.
    pub white: Array3<bool>,

    /// pial 面以内.
    pub pial: Array3<bool>,
}

/// 体数据来源. 给定文件路径, 返回对应的体数据.
pub trait VolumeSource: Send + Sync {
    /// 加载 `path` 处的体数据.
    fn load(&self, path: &Path) -> QcResult<VolumeGeometry>;
}

impl<F> VolumeSource for F
where
    F: Fn(&Path) -> QcResult<VolumeGeometry> + Send + Sync,
{
    #[inline]
    fn load(&self, path: &Path) -> QcResult<VolumeGeometry> {
        self(path)
    }
}

/// 从本地 nii 文件读取体数据.
#[derive(Copy, Clone, Debug, Default)]
pub struct NiftiSource;

impl VolumeSource for NiftiSource {
    #[inline]
    fn load(&self, path: &Path) -> QcResult<VolumeGeometry> {
        VolumeGeometry::open(path)
    }
}
