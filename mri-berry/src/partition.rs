//! 体数据分区.
//!
//! 按照肿瘤标注与模式对应的分区策略, 将体数据切分为有序、互不相交且恰好覆盖全部体素的区域.

use std::collections::BTreeMap;

use log::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{Compartment, Mode};
use crate::consts::label::HEALTHY;
use crate::error::{SegError, SegResult};
use crate::{GridAttr, Idx3d, Region, RegionKind, TumourMask, Volume};

/// 分区降级说明: 需要肿瘤的模式遇到了全 0 标注, 退化为单个健康区域.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Degradation {
    /// 原本请求的模式.
    pub requested: Mode,
}

/// 一次分区的结果.
#[derive(Clone, Debug)]
pub struct Partition {
    regions: Vec<Region>,
    empty: Vec<RegionKind>,
    degradation: Option<Degradation>,
}

impl Partition {
    /// 全部非空区域, 顺序即下游处理顺序.
    #[inline]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// 消费自我, 获得全部非空区域.
    #[inline]
    pub fn into_regions(self) -> Vec<Region> {
        self.regions
    }

    /// 被丢弃的空区域.
    #[inline]
    pub fn empty(&self) -> &[RegionKind] {
        &self.empty
    }

    /// 若发生了模式降级, 返回说明.
    #[inline]
    pub fn degradation(&self) -> Option<Degradation> {
        self.degradation
    }

    /// 区域体素总数.
    pub fn voxel_count(&self) -> usize {
        self.regions.iter().map(Region::len).sum()
    }
}

/// 分区器. 持有只读的扫描与可选的肿瘤标注.
pub struct VolumePartitioner<'a> {
    volume: &'a Volume,
    mask: Option<&'a TumourMask>,
}

impl<'a> VolumePartitioner<'a> {
    /// 初始化分区器.
    #[inline]
    pub fn new(volume: &'a Volume, mask: Option<&'a TumourMask>) -> Self {
        Self { volume, mask }
    }

    /// 按 `mode` 对应的策略分区. `compartments` 是预期的肿瘤子区,
    /// 仅在肿瘤实体加权模式下用于记录缺失的子区.
    ///
    /// # 错误
    ///
    /// 1. 模式需要标注但未提供, 返回 [`SegError::MissingMask`];
    /// 2. 标注与扫描形状不一致, 返回 [`SegError::ShapeMismatch`].
    ///
    /// 肿瘤无关模式下完全忽略标注, 不做任何检查.
    pub fn split(&self, mode: Mode, compartments: &[Compartment]) -> SegResult<Partition> {
        if !mode.requires_mask() {
            return Ok(self.whole());
        }
        let mask = self.mask.ok_or(SegError::MissingMask { mode })?;
        if mask.shape() != self.volume.shape() {
            return Err(SegError::ShapeMismatch {
                volume: self.volume.shape(),
                mask: mask.shape(),
            });
        }

        let mut buckets = bucket_by_label(mask);
        let healthy = buckets.remove(&HEALTHY).unwrap_or_default();

        if buckets.is_empty() {
            warn!("{mode}: tumour mask is all healthy, degrading to a single healthy region");
            let empty = match mode {
                Mode::BiasCorrected => vec![RegionKind::Tumour],
                _ => compartments
                    .iter()
                    .map(|c| RegionKind::Compartment(c.label))
                    .collect(),
            };
            return Ok(Partition {
                regions: vec![Region::gather(RegionKind::Healthy, self.volume, healthy)],
                empty,
                degradation: Some(Degradation { requested: mode }),
            });
        }

        let mut regions = Vec::with_capacity(buckets.len() + 1);
        let mut empty = vec![];
        if healthy.is_empty() {
            empty.push(RegionKind::Healthy);
        } else {
            regions.push(Region::gather(RegionKind::Healthy, self.volume, healthy));
        }

        if let Mode::BiasCorrected = mode {
            let mut tumour: Vec<Idx3d> = buckets.into_values().flatten().collect();
            // 恢复行优先序.
            tumour.sort_unstable();
            regions.push(Region::gather(RegionKind::Tumour, self.volume, tumour));
        } else {
            empty.extend(
                compartments
                    .iter()
                    .filter(|c| !buckets.contains_key(&c.label))
                    .map(|c| RegionKind::Compartment(c.label)),
            );
            regions.extend(buckets.into_iter().map(|(label, indices)| {
                Region::gather(RegionKind::Compartment(label), self.volume, indices)
            }));
        }

        debug!(
            "{mode}: {} region(s), {} empty region(s) dropped",
            regions.len(),
            empty.len()
        );
        Ok(Partition {
            regions,
            empty,
            degradation: None,
        })
    }

    /// 整个体数据作为唯一区域.
    fn whole(&self) -> Partition {
        let indices = self.volume.data().indexed_iter().map(|(p, _)| p).collect();
        Partition {
            regions: vec![Region::gather(RegionKind::Whole, self.volume, indices)],
            empty: vec![],
            degradation: None,
        }
    }
}

/// 按标注值收集体素索引. 每个桶内的索引按行优先序存储.
fn bucket_by_label(mask: &TumourMask) -> BTreeMap<u8, Vec<Idx3d>> {
    let mut buckets: BTreeMap<u8, Vec<Idx3d>> = BTreeMap::new();
    for (pos, label) in mask.data().indexed_iter() {
        buckets.entry(*label).or_default().push(pos);
    }
    buckets
}
