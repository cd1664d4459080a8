//! 区域强度预处理 (归一化).
//!
//! 肿瘤区域的强度分布与健康组织明显不同. 在对每个区域单独调用分类器之前,
//! 肿瘤区域 (或其每个子区) 被独立地缩放到固定的目标区间, 使其强度尺度不会主导分类器的概率模型.
//! 健康区域保持原样.

use log::warn;
use ndarray::Array1;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{Mode, NormMethod, Normalization};
use crate::{Region, RegionKind};

/// 退化区域的类型.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Degeneracy {
    /// 区域没有体素.
    Empty,

    /// 区域内全部有限强度相同 (参数为该值), 缩放会除以零.
    Constant(f32),

    /// 区域内不存在有限强度.
    NonFinite,
}

/// 单个区域的预处理结果说明.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PreconditionOutcome {
    /// 恒等变换.
    Identity,

    /// 从源区间 `from` 线性缩放到目标区间 `to`.
    Rescaled {
        /// 源区间 (截断后).
        from: (f32, f32),

        /// 目标区间.
        to: (f32, f32),
    },

    /// 退化区域, 原样透传.
    Degenerate(Degeneracy),
}

impl PreconditionOutcome {
    /// 是否为退化区域?
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Degenerate(_))
    }
}

/// 区域预处理器.
#[derive(Copy, Clone, Debug)]
pub struct RegionPreconditioner {
    mode: Mode,
    normalization: Normalization,
}

impl RegionPreconditioner {
    /// 以模式和归一化策略初始化.
    #[inline]
    pub fn new(mode: Mode, normalization: Normalization) -> Self {
        Self {
            mode,
            normalization,
        }
    }

    /// 在当前模式下, `kind` 区域是否需要缩放?
    ///
    /// 1. 肿瘤无关模式: 全部恒等;
    /// 2. 偏差校正模式: 仅缩放 (合并后的) 肿瘤区域;
    /// 3. 肿瘤实体加权模式: 缩放每个肿瘤子区.
    pub fn needs_rescale(&self, kind: RegionKind) -> bool {
        match self.mode {
            Mode::Agnostic => false,
            Mode::BiasCorrected => matches!(kind, RegionKind::Tumour),
            Mode::EntityWeighted => matches!(kind, RegionKind::Compartment(_)),
        }
    }

    /// 对 `region` 施加预处理, 返回新区域及处理说明. 不会修改输入.
    ///
    /// 退化区域 (空, 常量, 无有限强度) 不会导致除零, 而是原样透传并标记.
    pub fn apply(&self, region: &Region) -> (Region, PreconditionOutcome) {
        if !self.needs_rescale(region.kind()) {
            return (region.clone(), PreconditionOutcome::Identity);
        }

        let from = match self.source_window(region) {
            Ok(w) => w,
            Err(d) => {
                warn!("region `{}` is degenerate ({d:?}), passed through unscaled", region.kind());
                return (region.clone(), PreconditionOutcome::Degenerate(d));
            }
        };
        let to = self.normalization.target_range();
        let scaled = rescale(region.intensities().to_owned(), from, to);
        (
            region.with_intensities(scaled),
            PreconditionOutcome::Rescaled { from, to },
        )
    }

    /// 计算源区间. 退化时返回 `Err`.
    fn source_window(&self, region: &Region) -> Result<(f32, f32), Degeneracy> {
        if region.is_empty() {
            return Err(Degeneracy::Empty);
        }
        let (lo, hi) = match self.normalization.method() {
            NormMethod::MinMax => region.intensity_range().ok_or(Degeneracy::NonFinite)?,
            NormMethod::Percentile { low, high } => {
                let mut finite: Vec<f32> = region
                    .intensities()
                    .iter()
                    .copied()
                    .filter(|v| v.is_finite())
                    .collect();
                if finite.is_empty() {
                    return Err(Degeneracy::NonFinite);
                }
                finite.sort_unstable_by(f32::total_cmp);
                (percentile(&finite, low), percentile(&finite, high))
            }
        };
        if hi > lo {
            Ok((lo, hi))
        } else {
            Err(Degeneracy::Constant(lo))
        }
    }
}

/// 对升序排列的非空 `sorted` 取第 `p` 百分位 (最近秩).
#[inline]
fn percentile(sorted: &[f32], p: f32) -> f32 {
    let rank = (p as f64 / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// 将 `data` 中的有限值截断到 `from` 后线性映射到 `to`. 非有限值原样保留.
///
/// 调用者需保证 `from.0 < from.1`.
fn rescale(mut data: Array1<f32>, (lo, hi): (f32, f32), (t_lo, t_hi): (f32, f32)) -> Array1<f32> {
    let k = (t_hi - t_lo) / (hi - lo);
    let op = move |v: f32| {
        if v.is_finite() {
            t_lo + (v.clamp(lo, hi) - lo) * k
        } else {
            v
        }
    };

    #[cfg(feature = "rayon")]
    data.par_mapv_inplace(op);
    #[cfg(not(feature = "rayon"))]
    data.mapv_inplace(op);
    data
}
