//! 运行诊断信息.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::Mode;
use crate::error::ClassifierError;
use crate::precondition::{Degeneracy, PreconditionOutcome};
use crate::RegionKind;

/// 编排器状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RunState {
    /// 已配置, 尚未分区.
    Configured,

    /// 已分区.
    Partitioned,

    /// 各区域已完成预处理.
    Preconditioned,

    /// 各区域已完成分类 (成功或失败).
    Classified,

    /// 已合并为全局分割.
    Recombined,

    /// 运行成功结束.
    Done,

    /// 运行失败. 终止状态.
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Configured => "configured",
            RunState::Partitioned => "partitioned",
            RunState::Preconditioned => "preconditioned",
            RunState::Classified => "classified",
            RunState::Recombined => "recombined",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 非致命的警告. 只记录, 不影响运行.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Warning {
    /// 区域退化 (空, 常量或没有有限强度), 未经缩放直接交给分类器.
    DegenerateRegion {
        /// 退化区域.
        region: RegionKind,

        /// 退化类型.
        reason: Degeneracy,
    },

    /// 区域没有体素, 已从分区中剔除.
    EmptyRegion {
        /// 空区域.
        region: RegionKind,
    },

    /// 肿瘤标注全为 0, 需要肿瘤的模式退化为单个健康区域.
    ModeDegraded {
        /// 原本请求的模式.
        requested: Mode,
    },
}

/// 单个区域的分类状态.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RegionStatus {
    /// 尚未分类.
    Pending,

    /// 分类成功.
    Classified,

    /// 分类失败.
    Failed(ClassifierError),
}

/// 单个区域的诊断记录.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionRecord {
    /// 区域类型.
    pub kind: RegionKind,

    /// 体素个数.
    pub voxels: usize,

    /// 预处理结果. 预处理前为 `None`.
    pub precondition: Option<PreconditionOutcome>,

    /// 分类状态.
    pub status: RegionStatus,
}

/// 一次运行的诊断信息. 成功和失败的运行都会携带.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostics {
    mode: Mode,
    regions: Vec<RegionRecord>,
    warnings: Vec<Warning>,
    trail: Vec<RunState>,
}

impl Diagnostics {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            mode,
            regions: Vec::new(),
            warnings: Vec::new(),
            trail: vec![RunState::Configured],
        }
    }

    /// 请求的分割模式.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 各非空区域的记录, 顺序即分区顺序.
    #[inline]
    pub fn regions(&self) -> &[RegionRecord] {
        &self.regions
    }

    /// 按类型查找区域记录.
    pub fn region(&self, kind: RegionKind) -> Option<&RegionRecord> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    /// 全部警告, 按产生顺序.
    #[inline]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// 经过的状态序列, 从 [`RunState::Configured`] 开始.
    #[inline]
    pub fn trail(&self) -> &[RunState] {
        &self.trail
    }

    /// 当前 (最后到达的) 状态.
    #[inline]
    pub fn state(&self) -> RunState {
        self.trail.last().copied().unwrap_or(RunState::Configured)
    }

    /// 是否发生了模式降级?
    pub fn is_degraded(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, Warning::ModeDegraded { .. }))
    }

    /// 所有分类失败的区域及其原因.
    pub fn failures(&self) -> impl Iterator<Item = (RegionKind, &ClassifierError)> + '_ {
        self.regions.iter().filter_map(|r| match &r.status {
            RegionStatus::Failed(e) => Some((r.kind, e)),
            _ => None,
        })
    }

    pub(crate) fn enter(&mut self, state: RunState) {
        self.trail.push(state);
    }

    pub(crate) fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub(crate) fn add_region(&mut self, kind: RegionKind, voxels: usize) {
        self.regions.push(RegionRecord {
            kind,
            voxels,
            precondition: None,
            status: RegionStatus::Pending,
        });
    }

    /// 第 `i` 个区域的记录. 下标来自分区, 必然有效.
    pub(crate) fn record_mut(&mut self, i: usize) -> &mut RegionRecord {
        &mut self.regions[i]
    }
}

#[cfg(test)]
mod tests {
    use super::{Diagnostics, RegionStatus, RunState, Warning};
    use crate::config::Mode;
    use crate::error::ClassifierError;
    use crate::RegionKind;

    #[test]
    fn test_diagnostics_bookkeeping() {
        let mut d = Diagnostics::new(Mode::BiasCorrected);
        assert_eq!(d.state(), RunState::Configured);

        d.add_region(RegionKind::Healthy, 10);
        d.add_region(RegionKind::Tumour, 2);
        d.record_mut(1).status = RegionStatus::Failed(ClassifierError::Cancelled);
        d.warn(Warning::ModeDegraded {
            requested: Mode::BiasCorrected,
        });
        d.enter(RunState::Partitioned);

        assert_eq!(d.state(), RunState::Partitioned);
        assert!(d.is_degraded());
        assert_eq!(d.region(RegionKind::Healthy).unwrap().voxels, 10);
        let failures: Vec<_> = d.failures().collect();
        assert_eq!(failures, vec![(RegionKind::Tumour, &ClassifierError::Cancelled)]);
        assert_eq!(RunState::Preconditioned.to_string(), "preconditioned");
    }
}
