//! 标签对齐与重组.
//!
//! 各区域由分类器独立分割, 因此同一个类别编号在不同区域中的含义可能不同.
//! 重组前先按类内平均强度 (升序) 将每个区域的类别编号对齐, 再写回与扫描同形状的全局标签.

use std::fs::File;
use std::io;
use std::path::Path;

use log::debug;
use ndarray::{Array3, ArrayView3};
use ndarray_npy::{NpzWriter, WriteNpzError};
use ordered_float::OrderedFloat;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::classifier::LabelMap;
use crate::config::Mode;
use crate::consts::{label::UNSEGMENTED, NO_REGION};
use crate::error::{SegError, SegResult};
use crate::{Idx3d, Region, RegionKind};

/// 计算 `region` 的类别对齐置换: 返回值第 `k - 1` 项为原始类别 `k` 对齐后的编号.
///
/// 规则:
///
/// 1. 出现在区域中的类别按类内有限强度的平均值升序编号为 `1, 2, ...`;
/// 2. 平均值相同时, 原始编号较小者在前;
/// 3. 区域中不存在 (或只含非有限强度) 的类别按原始编号顺序占据剩余编号.
///
/// 对齐是确定且幂等的: 对已对齐的标签再次对齐将得到恒等置换.
///
/// `labels` 须已通过 [`LabelMap::validate`] 校验.
pub fn align(region: &Region, labels: &LabelMap, class_count: u8) -> Vec<u8> {
    let c = class_count as usize;
    let mut sums = vec![0.0f64; c];
    let mut counts = vec![0usize; c];
    for (&raw, &v) in labels.view().iter().zip(region.intensities().iter()) {
        if v.is_finite() {
            let k = raw as usize - 1;
            sums[k] += v as f64;
            counts[k] += 1;
        }
    }

    let (mut present, absent): (Vec<_>, Vec<_>) = (0..c).partition(|&k| counts[k] > 0);
    present.sort_by_key(|&k| (OrderedFloat(sums[k] / counts[k] as f64), k));

    let mut perm = vec![0u8; c];
    for (aligned, raw) in present.into_iter().chain(absent).enumerate() {
        perm[raw] = aligned as u8 + 1;
    }
    perm
}

/// 单个区域在全局分割中的摘要.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionSummary {
    /// 区域类型.
    pub kind: RegionKind,

    /// 体素个数.
    pub voxels: usize,

    /// 对齐置换 (见 [`align`]). 分类失败的区域为 `None`.
    pub alignment: Option<Vec<u8>>,
}

/// 标签重组器.
#[derive(Clone, Debug)]
pub struct LabelRecombiner {
    shape: Idx3d,
    mode: Mode,
    tissue_classes: Vec<String>,
}

impl LabelRecombiner {
    /// 以扫描形状, 分割模式与组织类别名称初始化.
    pub fn new(shape: Idx3d, mode: Mode, tissue_classes: Vec<String>) -> Self {
        Self {
            shape,
            mode,
            tissue_classes,
        }
    }

    /// 类别数.
    #[inline]
    pub fn class_count(&self) -> u8 {
        self.tissue_classes.len() as u8
    }

    /// 将各区域的分类结果合并为全局分割.
    ///
    /// `parts` 中标签为 `None` 的区域 (分类失败) 仍然在来源图中占有其体素,
    /// 但标签记为 [`UNSEGMENTED`], 且结果被标记为不完整.
    ///
    /// # 注意
    ///
    /// 1. 若某体素被写入两次, 返回 [`SegError::PartitionOverlap`];
    ///    若某体素从未被写入, 返回 [`SegError::PartitionGap`]. 两者都说明分区存在缺陷, 不会被修复.
    /// 2. 如果区域来自另一形状的扫描, 则程序 panic.
    pub fn recombine(&self, parts: &[(Region, Option<LabelMap>)]) -> SegResult<GlobalSegmentation> {
        let class_count = self.class_count();
        let mut labels = Array3::<u8>::from_elem(self.shape, UNSEGMENTED);
        let mut provenance = Array3::<u16>::from_elem(self.shape, NO_REGION);
        let mut regions = Vec::with_capacity(parts.len());

        for (i, (region, map)) in parts.iter().enumerate() {
            // 区域至多为健康组织加上 255 个肿瘤子区, 不会触及 `NO_REGION`.
            let owner = i as u16;
            let alignment = match map {
                Some(map) => {
                    map.validate(region.len(), class_count)
                        .map_err(|source| SegError::Classifier {
                            region: region.kind(),
                            source,
                        })?;
                    Some(align(region, map, class_count))
                }
                None => None,
            };

            for (j, &pos) in region.indices().iter().enumerate() {
                if provenance[pos] != NO_REGION {
                    return Err(SegError::PartitionOverlap { index: pos });
                }
                provenance[pos] = owner;
                if let (Some(map), Some(perm)) = (map, &alignment) {
                    labels[pos] = perm[map.view()[j] as usize - 1];
                }
            }

            debug!(
                "region `{}` merged: {} voxels, alignment {:?}",
                region.kind(),
                region.len(),
                alignment
            );
            regions.push(RegionSummary {
                kind: region.kind(),
                voxels: region.len(),
                alignment,
            });
        }

        if let Some((index, _)) = provenance.indexed_iter().find(|(_, &r)| r == NO_REGION) {
            return Err(SegError::PartitionGap { index });
        }

        Ok(GlobalSegmentation {
            mode: self.mode,
            complete: regions.iter().all(|r| r.alignment.is_some()),
            labels,
            provenance,
            regions,
            tissue_classes: self.tissue_classes.clone(),
        })
    }
}

/// 写出 npz 文件错误.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// 底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// npz 编码错误.
    #[error(transparent)]
    Npz(#[from] WriteNpzError),
}

/// 全局分割结果: 与扫描同形状的标签, 以及每个体素的来源区域.
///
/// 标签 `1..=C` 按平均强度升序对应配置中的组织类别, 标签 0 ([`UNSEGMENTED`])
/// 只出现在分类失败的区域中.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalSegmentation {
    mode: Mode,
    labels: Array3<u8>,
    provenance: Array3<u16>,
    regions: Vec<RegionSummary>,
    tissue_classes: Vec<String>,
    complete: bool,
}

impl GlobalSegmentation {
    /// 分割模式.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 全局标签.
    #[inline]
    pub fn labels(&self) -> ArrayView3<'_, u8> {
        self.labels.view()
    }

    /// 来源图: 每个体素所属区域在 [`Self::regions`] 中的下标.
    #[inline]
    pub fn provenance(&self) -> ArrayView3<'_, u16> {
        self.provenance.view()
    }

    /// 区域摘要, 顺序即分区顺序.
    #[inline]
    pub fn regions(&self) -> &[RegionSummary] {
        &self.regions
    }

    /// 体素 `pos` 所属区域. 越界时返回 `None`.
    pub fn region_of(&self, pos: Idx3d) -> Option<&RegionSummary> {
        self.provenance
            .get(pos)
            .and_then(|&r| self.regions.get(r as usize))
    }

    /// 是否所有区域都分类成功?
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// 类别数.
    #[inline]
    pub fn class_count(&self) -> u8 {
        self.tissue_classes.len() as u8
    }

    /// 类别 `class` (从 1 开始) 的名称.
    pub fn class_name(&self, class: u8) -> Option<&str> {
        let k = (class as usize).checked_sub(1)?;
        self.tissue_classes.get(k).map(String::as_str)
    }

    /// 类别 `class` 的二值掩膜.
    pub fn class_mask(&self, class: u8) -> Array3<bool> {
        self.labels.mapv(|l| l == class)
    }

    /// 标签为 `class` 的体素个数.
    pub fn count(&self, class: u8) -> usize {
        self.labels.iter().filter(|&&l| l == class).count()
    }

    /// 未分割的体素个数.
    #[inline]
    pub fn unsegmented_count(&self) -> usize {
        self.count(UNSEGMENTED)
    }

    /// 将标签与来源图分别以 `labels.npy`, `provenance.npy` 写入 npz 文件 `path`.
    pub fn write_npz<P: AsRef<Path>>(&self, path: P) -> Result<(), WriteError> {
        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array("labels.npy", &self.labels)?;
        npz.add_array("provenance.npy", &self.provenance)?;
        npz.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use ndarray::{array, Array3};
    use ndarray_npy::NpzReader;

    use super::{align, LabelRecombiner};
    use crate::classifier::LabelMap;
    use crate::config::Mode;
    use crate::consts::label::UNSEGMENTED;
    use crate::error::SegError;
    use crate::{Region, RegionKind, Volume};

    fn classes() -> Vec<String> {
        vec!["csf".into(), "gm".into(), "wm".into()]
    }

    /// 形状 (1, 1, 6), 强度 10, 10, 20, 20, 30, 30.
    fn volume() -> Volume {
        Volume::from_data(array![[[10.0, 10.0, 20.0, 20.0, 30.0, 30.0]]])
    }

    fn region(kind: RegionKind, ws: &[usize]) -> Region {
        Region::gather(kind, &volume(), ws.iter().map(|&w| (0, 0, w)).collect())
    }

    #[test]
    fn test_align_by_mean_intensity() {
        let r = region(RegionKind::Whole, &[0, 1, 2, 3, 4, 5]);
        // 原始类别 3 最暗, 2 居中, 1 最亮.
        let raw = LabelMap::from(vec![3, 3, 2, 2, 1, 1]);
        assert_eq!(align(&r, &raw, 3), vec![3, 2, 1]);
    }

    #[test]
    fn test_align_absent_and_ties() {
        let r = region(RegionKind::Tumour, &[0, 1]);
        // 两个体素强度相同: 原始编号较小者在前; 类别 1 不存在, 排在最后.
        let raw = LabelMap::from(vec![3, 2]);
        assert_eq!(align(&r, &raw, 3), vec![3, 1, 2]);
    }

    #[test]
    fn test_align_is_idempotent() {
        let r = region(RegionKind::Whole, &[0, 1, 2, 3, 4, 5]);
        let raw = LabelMap::from(vec![2, 2, 3, 1, 3, 3]);
        let perm = align(&r, &raw, 3);
        let aligned = LabelMap::from(
            raw.view()
                .iter()
                .map(|&l| perm[l as usize - 1])
                .collect::<Vec<_>>(),
        );
        assert_eq!(align(&r, &aligned, 3), vec![1, 2, 3]);
    }

    #[test]
    fn test_recombine_two_regions() {
        let healthy = region(RegionKind::Healthy, &[0, 1, 4, 5]);
        let tumour = region(RegionKind::Tumour, &[2, 3]);
        let parts = vec![
            (healthy, Some(LabelMap::from(vec![2, 2, 1, 1]))),
            (tumour, Some(LabelMap::from(vec![1, 1]))),
        ];
        let seg = LabelRecombiner::new((1, 1, 6), Mode::BiasCorrected, classes())
            .recombine(&parts)
            .unwrap();

        assert!(seg.is_complete());
        assert_eq!(seg.labels(), array![[[1u8, 1, 1, 1, 2, 2]]]);
        assert_eq!(seg.provenance(), array![[[0u16, 0, 1, 1, 0, 0]]]);
        assert_eq!(seg.region_of((0, 0, 3)).unwrap().kind, RegionKind::Tumour);
        assert_eq!(seg.region_of((0, 0, 9)), None);
        assert_eq!(seg.count(1), 4);
        assert_eq!(seg.class_mask(2), array![[[false, false, false, false, true, true]]]);
        assert_eq!(seg.class_name(1), Some("csf"));
        assert_eq!(seg.class_name(0), None);
        assert_eq!(seg.class_name(4), None);
    }

    #[test]
    fn test_recombine_failed_region_unsegmented() {
        let parts = vec![
            (
                region(RegionKind::Healthy, &[0, 1, 4, 5]),
                Some(LabelMap::from(vec![1, 1, 3, 3])),
            ),
            (region(RegionKind::Tumour, &[2, 3]), None),
        ];
        let seg = LabelRecombiner::new((1, 1, 6), Mode::BiasCorrected, classes())
            .recombine(&parts)
            .unwrap();
        assert!(!seg.is_complete());
        assert_eq!(seg.unsegmented_count(), 2);
        assert_eq!(seg.labels()[(0, 0, 2)], UNSEGMENTED);
        assert_eq!(seg.provenance()[(0, 0, 2)], 1);
        assert_eq!(seg.regions()[1].alignment, None);
    }

    #[test]
    fn test_recombine_detects_overlap_and_gap() {
        let rec = LabelRecombiner::new((1, 1, 6), Mode::BiasCorrected, classes());

        let overlap = vec![
            (region(RegionKind::Healthy, &[0, 1, 2, 3]), None),
            (region(RegionKind::Tumour, &[3, 4, 5]), None),
        ];
        assert_eq!(
            rec.recombine(&overlap),
            Err(SegError::PartitionOverlap { index: (0, 0, 3) })
        );

        let gap = vec![
            (region(RegionKind::Healthy, &[0, 1]), None),
            (region(RegionKind::Tumour, &[3, 4, 5]), None),
        ];
        let err = rec.recombine(&gap).unwrap_err();
        assert_eq!(err, SegError::PartitionGap { index: (0, 0, 2) });
        assert!(err.is_internal());
    }

    #[test]
    fn test_recombine_rejects_malformed_labels() {
        let parts = vec![(
            region(RegionKind::Whole, &[0, 1, 2, 3, 4, 5]),
            Some(LabelMap::from(vec![1, 1, 1])),
        )];
        let err = LabelRecombiner::new((1, 1, 6), Mode::Agnostic, classes())
            .recombine(&parts)
            .unwrap_err();
        assert!(matches!(
            err,
            SegError::Classifier {
                region: RegionKind::Whole,
                ..
            }
        ));
    }

    #[test]
    fn test_write_npz() {
        let parts = vec![(
            region(RegionKind::Whole, &[0, 1, 2, 3, 4, 5]),
            Some(LabelMap::from(vec![1, 1, 2, 2, 3, 3])),
        )];
        let seg = LabelRecombiner::new((1, 1, 6), Mode::Agnostic, classes())
            .recombine(&parts)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.npz");
        seg.write_npz(&path).unwrap();

        let mut npz = NpzReader::new(File::open(&path).unwrap()).unwrap();
        let labels: Array3<u8> = npz.by_name("labels.npy").unwrap();
        let provenance: Array3<u16> = npz.by_name("provenance.npy").unwrap();
        assert_eq!(labels, seg.labels());
        assert_eq!(provenance, Array3::<u16>::zeros((1, 1, 6)));
    }
}
