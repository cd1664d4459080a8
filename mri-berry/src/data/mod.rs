use std::collections::BTreeSet;
use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayView, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::label::*;
use crate::Idx3d;

mod region;

pub use region::{Region, RegionKind};

/// 打开 nifti 格式的体数据或标注时的错误.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// nifti 文件读取或解码失败.
    #[error("nifti error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 数据与 header 中记录的形状不符.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// header 中记录的体素分辨率不合法 (非有限值或非正数).
    #[error("invalid voxel spacing {0:?}")]
    InvalidSpacing([f64; 3]),
}

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 获取单个体素分辨率, 顺序为 `[z, h, w]`, 单位为毫米.
#[inline]
fn get_spacing_from_header(h: &NiftiHeader) -> [f64; 3] {
    let [_, w, h, z, ..] = h.pixdim;
    [z as f64, h as f64, w as f64]
}

/// 分辨率是否合法: 三个分量均为有限正数.
#[inline]
fn is_valid_spacing(spacing: &[f64; 3]) -> bool {
    spacing.iter().all(|s| s.is_finite() && *s > 0.0)
}

/// 打开 nifti 文件, 返回 `(z, h, w)` 顺序的 `Array3<$t>` 数据和 header.
macro_rules! read_nifti {
    ($path: expr, $t: ty) => {{
        let obj = ReaderOptions::new().read_file($path)?;
        let header = obj.header().clone();

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<$t>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        let data =
            Array3::<$t>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())?;
        (data, header)
    }};
}

/// 三维体素网格的共用属性和部分通用操作.
pub trait GridAttr {
    /// 获取数据形状大小 `(z, h, w)`.
    fn shape(&self) -> Idx3d;

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }
}

/// 3D MRI 扫描: 体素强度 (以 `f32` 保存) 与体素分辨率.
///
/// 该结构是只读的. 所有变换 (如归一化) 都产生新的数据, 而不会修改原扫描.
#[derive(Debug, Clone)]
pub struct Volume {
    spacing: [f64; 3],
    data: Array3<f32>,
}

impl GridAttr for Volume {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for Volume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl Volume {
    /// 根据 `(z, h, w)` 顺序的强度数据和 `[z, h, w]` 顺序的体素分辨率 (毫米) 构建扫描.
    ///
    /// `spacing` 的三个分量必须为有限正数, 否则返回 `None`.
    pub fn new(data: Array3<f32>, spacing: [f64; 3]) -> Option<Self> {
        is_valid_spacing(&spacing).then_some(Self { spacing, data })
    }

    /// 以各向同性的 1mm 分辨率构建扫描.
    #[inline]
    pub fn from_data(data: Array3<f32>) -> Self {
        Self {
            spacing: [1.0; 3],
            data,
        }
    }

    /// 打开 nii 文件格式的 3D MRI 扫描. `path` 为 nii 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenError> {
        let (data, header) = read_nifti!(path.as_ref(), f32);
        let spacing = get_spacing_from_header(&header);
        Self::new(data, spacing).ok_or(OpenError::InvalidSpacing(spacing))
    }

    /// 获取单个体素分辨率, 顺序为 `[z, h, w]`, 单位为毫米.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// 3D 肿瘤标注. 0 代表健康组织, 其它值代表肿瘤子区 (如水肿, 活跃区, 坏死核心).
///
/// 未知的非零值同样被视为一个 (不透明的) 肿瘤子区.
#[derive(Debug, Clone)]
pub struct TumourMask {
    data: Array3<u8>,
}

impl GridAttr for TumourMask {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for TumourMask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl TumourMask {
    /// 根据 `(z, h, w)` 顺序的标注数据直接创建.
    #[inline]
    pub fn new(data: Array3<u8>) -> Self {
        Self { data }
    }

    /// 创建形状为 `shape` 的全健康 (全 0) 标注.
    #[inline]
    pub fn healthy(shape: Idx3d) -> Self {
        Self {
            data: Array3::from_elem(shape, HEALTHY),
        }
    }

    /// 打开 nii 文件格式的 3D 肿瘤标注 (如 BraTS `*_seg.nii.gz`).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenError> {
        let (data, _) = read_nifti!(path.as_ref(), u8);
        Ok(Self { data })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获取 3D 标注中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 收集标注中出现过的全部肿瘤标签 (非零值), 升序.
    pub fn tumour_labels(&self) -> BTreeSet<u8> {
        self.data.iter().copied().filter(|p| is_tumour(*p)).collect()
    }

    /// 标注是否全为健康组织?
    #[inline]
    pub fn is_all_healthy(&self) -> bool {
        self.data.iter().all(|p| is_healthy(*p))
    }
}
