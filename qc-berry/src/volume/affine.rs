//! 体素坐标与物理坐标之间的仿射变换.

use ndarray::{arr2, s, Array2, ArrayView2};
use nifti::NiftiHeader;

use crate::error::{QcError, QcResult};

/// 4×4 齐次仿射矩阵, 将体素索引 `(i, j, k, 1)` 映射到物理坐标 (毫米).
///
/// 最后一行恒为 `[0, 0, 0, 1]`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Affine {
    mat: Array2<f64>,
}

impl Default for Affine {
    #[inline]
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    /// 单位变换.
    #[inline]
    pub fn identity() -> Self {
        Self {
            mat: Array2::eye(4),
        }
    }

    /// 由前三行构建. 第四行自动补为 `[0, 0, 0, 1]`.
    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        let [r0, r1, r2] = rows;
        Self {
            mat: arr2(&[r0, r1, r2, [0.0, 0.0, 0.0, 1.0]]),
        }
    }

    /// 各轴缩放 `scale` 并平移 `offset` 的对角仿射.
    pub fn scaled(scale: [f64; 3], offset: [f64; 3]) -> Self {
        let [sx, sy, sz] = scale;
        let [ox, oy, oz] = offset;
        Self::from_rows([
            [sx, 0.0, 0.0, ox],
            [0.0, sy, 0.0, oy],
            [0.0, 0.0, sz, oz],
        ])
    }

    /// 从 nifti header 读取仿射.
    ///
    /// 优先使用 sform (`sform_code > 0`), 其次 qform 四元数 (`qform_code > 0`),
    /// 都缺失时仅按 `pixdim` 缩放.
    pub fn from_header(h: &NiftiHeader) -> Self {
        let widen = |row: [f32; 4]| row.map(f64::from);
        if h.sform_code > 0 {
            return Self::from_rows([widen(h.srow_x), widen(h.srow_y), widen(h.srow_z)]);
        }

        let [qfac, dx, dy, dz, ..] = h.pixdim.map(f64::from);
        if h.qform_code <= 0 {
            return Self::scaled([dx, dy, dz], [0.0; 3]);
        }

        let (b, c, d) = (
            f64::from(h.quatern_b),
            f64::from(h.quatern_c),
            f64::from(h.quatern_d),
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        // qfac 只允许 ±1; 0 视为 1.
        let qfac = if qfac < 0.0 { -1.0 } else { 1.0 };
        let (sx, sy, sz) = (dx, dy, dz * qfac);
        let (ox, oy, oz) = (
            f64::from(h.quatern_x),
            f64::from(h.quatern_y),
            f64::from(h.quatern_z),
        );

        Self::from_rows([
            [
                (a * a + b * b - c * c - d * d) * sx,
                2.0 * (b * c - a * d) * sy,
                2.0 * (b * d + a * c) * sz,
                ox,
            ],
            [
                2.0 * (b * c + a * d) * sx,
                (a * a + c * c - b * b - d * d) * sy,
                2.0 * (c * d - a * b) * sz,
                oy,
            ],
            [
                2.0 * (b * d - a * c) * sx,
                2.0 * (c * d + a * b) * sy,
                (a * a + d * d - b * b - c * c) * sz,
                oz,
            ],
        ])
    }

    /// 获得矩阵的只读视图.
    #[inline]
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.mat.view()
    }

    /// 变换单个体素坐标.
    pub fn apply(&self, [i, j, k]: [f64; 3]) -> [f64; 3] {
        let m = &self.mat;
        let row = |r: usize| m[[r, 0]] * i + m[[r, 1]] * j + m[[r, 2]] * k + m[[r, 3]];
        [row(0), row(1), row(2)]
    }

    /// 批量变换. `vox` 为 4×n 的齐次坐标 (每列一个点), 返回 3×n 的物理坐标.
    ///
    /// 如果 `vox` 不是 4 行, 则程序 panic.
    pub fn apply_columns(&self, vox: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(vox.nrows(), 4, "齐次坐标必须为 4 行");
        self.mat.dot(&vox).slice(s![..3, ..]).to_owned()
    }

    /// 逆变换. 当线性部分奇异时返回 `Err(QcError::InvalidInput)`.
    pub fn inverse(&self) -> QcResult<Self> {
        let m = |r: usize, c: usize| self.mat[[r, c]];
        let cof = [
            [
                m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1),
                m(0, 2) * m(2, 1) - m(0, 1) * m(2, 2),
                m(0, 1) * m(1, 2) - m(0, 2) * m(1, 1),
            ],
            [
                m(1, 2) * m(2, 0) - m(1, 0) * m(2, 2),
                m(0, 0) * m(2, 2) - m(0, 2) * m(2, 0),
                m(0, 2) * m(1, 0) - m(0, 0) * m(1, 2),
            ],
            [
                m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0),
                m(0, 1) * m(2, 0) - m(0, 0) * m(2, 1),
                m(0, 0) * m(1, 1) - m(0, 1) * m(1, 0),
            ],
        ];
        let det = m(0, 0) * cof[0][0] + m(0, 1) * cof[1][0] + m(0, 2) * cof[2][0];
        if det.abs() < f64::EPSILON {
            return Err(QcError::InvalidInput("singular affine".to_string()));
        }

        let inv = cof.map(|row| row.map(|v| v / det));
        let t = [m(0, 3), m(1, 3), m(2, 3)];
        let shift = |r: usize| -(inv[r][0] * t[0] + inv[r][1] * t[1] + inv[r][2] * t[2]);
        Ok(Self::from_rows([
            [inv[0][0], inv[0][1], inv[0][2], shift(0)],
            [inv[1][0], inv[1][1], inv[1][2], shift(1)],
            [inv[2][0], inv[2][1], inv[2][2], shift(2)],
        ]))
    }
}
