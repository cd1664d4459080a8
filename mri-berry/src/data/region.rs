//! 区域: 体数据中互不相交的体素子集, 以及限定在该子集上的强度.

use std::fmt;
use std::sync::Arc;

use itertools::{Itertools, MinMaxResult};
use ndarray::{Array1, Array3, ArrayView1};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::Volume;
use crate::Idx3d;

/// 区域类型. 同时决定了区域的名称.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RegionKind {
    /// 整个体数据 (肿瘤无关模式). 名称为 `whole`.
    Whole,

    /// 标注值为 0 的健康组织. 名称为 `healthy`.
    Healthy,

    /// 所有肿瘤子区的并集. 名称为 `tumour`.
    Tumour,

    /// 单个肿瘤子区, 参数为其标注值. 名称为 `tumour-{label}`.
    Compartment(u8),
}

impl RegionKind {
    /// 区域名称, 如 `healthy`, `tumour-2`.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Whole => write!(f, "whole"),
            RegionKind::Healthy => write!(f, "healthy"),
            RegionKind::Tumour => write!(f, "tumour"),
            RegionKind::Compartment(label) => write!(f, "tumour-{label}"),
        }
    }
}

/// 一个命名区域: 体素索引集合 (按行优先序存储) 与对应强度.
///
/// 索引和强度均以 `Arc` 共享, 因此克隆的开销很小. 区域是只读的,
/// 预处理会生成新的区域而非修改原区域.
#[derive(Clone, Debug)]
pub struct Region {
    kind: RegionKind,
    volume_shape: Idx3d,
    spacing: [f64; 3],
    indices: Arc<[Idx3d]>,
    intensities: Arc<Array1<f32>>,
}

impl Region {
    /// 从 `volume` 中收集 `indices` 对应的强度, 构建区域.
    ///
    /// 如果存在越界索引, 则程序 panic.
    pub fn gather(kind: RegionKind, volume: &Volume, indices: Vec<Idx3d>) -> Self {
        let intensities: Array1<f32> = indices.iter().map(|p| volume[*p]).collect();
        Self {
            kind,
            volume_shape: volume.data().dim(),
            spacing: volume.spacing(),
            indices: indices.into(),
            intensities: Arc::new(intensities),
        }
    }

    /// 用新的强度替换本区域的强度, 返回新区域. 索引集合共享, 不复制.
    ///
    /// 如果 `intensities` 长度与区域大小不符, 则程序 panic.
    pub(crate) fn with_intensities(&self, intensities: Array1<f32>) -> Self {
        assert_eq!(intensities.len(), self.len(), "区域强度长度不符");
        Self {
            kind: self.kind,
            volume_shape: self.volume_shape,
            spacing: self.spacing,
            indices: Arc::clone(&self.indices),
            intensities: Arc::new(intensities),
        }
    }

    /// 区域类型.
    #[inline]
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// 区域名称.
    #[inline]
    pub fn name(&self) -> String {
        self.kind.name()
    }

    /// 区域体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// 区域是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// 区域的全部体素索引, 按行优先序存储.
    #[inline]
    pub fn indices(&self) -> &[Idx3d] {
        &self.indices
    }

    /// 区域强度, 与 [`Self::indices`] 一一对应.
    #[inline]
    pub fn intensities(&self) -> ArrayView1<'_, f32> {
        self.intensities.view()
    }

    /// 所属体数据的形状.
    #[inline]
    pub fn volume_shape(&self) -> Idx3d {
        self.volume_shape
    }

    /// 所属体数据的体素分辨率, 顺序为 `[z, h, w]`.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 区域内有限强度的 `(最小值, 最大值)`. 若不存在有限强度则返回 `None`.
    pub fn intensity_range(&self) -> Option<(f32, f32)> {
        match self
            .intensities
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .minmax()
        {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(v) => Some((v, v)),
            MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
        }
    }

    /// 将区域还原为与原体数据同形状的扫描, 区域外的体素填充为 0.
    ///
    /// 基于文件或外部进程的分类器可以借此得到 "挖出" 该区域后的子体数据.
    pub fn to_masked_volume(&self) -> Volume {
        let mut data = Array3::<f32>::zeros(self.volume_shape);
        for (pos, v) in self.indices.iter().zip(self.intensities.iter()) {
            data[*pos] = *v;
        }
        // 分辨率来自已校验过的 `Volume`, 无需再次检查.
        Volume {
            spacing: self.spacing,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Region, RegionKind};
    use crate::{GridAttr, Volume};
    use ndarray::{array, Array3};

    #[test]
    fn test_region_kind_names() {
        assert_eq!(RegionKind::Whole.name(), "whole");
        assert_eq!(RegionKind::Healthy.name(), "healthy");
        assert_eq!(RegionKind::Tumour.name(), "tumour");
        assert_eq!(RegionKind::Compartment(4).name(), "tumour-4");
    }

    #[test]
    fn test_region_gather_and_mask_back() {
        let data = Array3::from_shape_fn((2, 2, 2), |(z, h, w)| (z * 4 + h * 2 + w) as f32);
        let volume = Volume::new(data, [1.0, 2.0, 2.0]).unwrap();
        let region = Region::gather(RegionKind::Tumour, &volume, vec![(0, 0, 1), (1, 1, 1)]);

        assert_eq!(region.len(), 2);
        assert_eq!(region.intensities(), array![1.0, 7.0]);
        assert_eq!(region.intensity_range(), Some((1.0, 7.0)));

        let masked = region.to_masked_volume();
        assert_eq!(masked.shape(), (2, 2, 2));
        assert_eq!(masked.spacing(), [1.0, 2.0, 2.0]);
        assert_eq!(masked[(0, 0, 1)], 1.0);
        assert_eq!(masked[(1, 1, 1)], 7.0);
        assert_eq!(masked.data().sum(), 8.0);
    }

    #[test]
    fn test_region_with_intensities_shares_indices() {
        let volume = Volume::from_data(Array3::from_elem((1, 1, 3), 2.0));
        let region = Region::gather(RegionKind::Whole, &volume, vec![(0, 0, 0), (0, 0, 2)]);
        let scaled = region.with_intensities(array![1.0, 1.5]);
        assert_eq!(scaled.indices(), region.indices());
        assert_eq!(region.intensities(), array![2.0, 2.0]);
        assert_eq!(scaled.intensities(), array![1.0, 1.5]);
    }

    #[test]
    fn test_region_range_skips_non_finite() {
        let volume = Volume::from_data(array![[[f32::NAN, 3.0, f32::INFINITY]]]);
        let all = vec![(0, 0, 0), (0, 0, 1), (0, 0, 2)];
        let region = Region::gather(RegionKind::Whole, &volume, all);
        assert_eq!(region.intensity_range(), Some((3.0, 3.0)));

        let only_nan = Region::gather(RegionKind::Whole, &volume, vec![(0, 0, 0)]);
        assert_eq!(only_nan.intensity_range(), None);
    }
}
