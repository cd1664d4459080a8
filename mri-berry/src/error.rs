//! 运行时错误.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, Mode};
use crate::{Idx3d, RegionKind};

/// 单个区域的分类器调用错误. 只影响该区域, 是否波及整次运行由失败处理策略决定.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClassifierError {
    /// 调用超时.
    #[error("classifier timed out after {after:?}")]
    Timeout {
        /// 超时时长.
        after: Duration,
    },

    /// 分类器运行结束, 但没有收敛.
    #[error("classifier did not converge: {0}")]
    ConvergenceFailure(String),

    /// 因兄弟区域失败而被协作式取消.
    #[error("classifier invocation cancelled")]
    Cancelled,

    /// 分类器输出不合法 (长度不符, 或标签不在 `1..=C` 内).
    #[error("malformed classifier output: {0}")]
    MalformedOutput(String),

    /// 分类器无法启动, 或在返回结果之前崩溃.
    #[error("classifier crashed: {0}")]
    Crashed(String),
}

/// 分割运行错误.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SegError {
    /// 当前模式需要肿瘤标注, 但未提供. 致命, 不会重试.
    #[error("mode `{mode}` requires a tumour mask")]
    MissingMask {
        /// 当前模式.
        mode: Mode,
    },

    /// 肿瘤标注与扫描形状不一致. 致命.
    #[error("tumour mask shape {mask:?} differs from volume shape {volume:?}")]
    ShapeMismatch {
        /// 扫描形状.
        volume: Idx3d,

        /// 标注形状.
        mask: Idx3d,
    },

    /// 配置不合法.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// 某区域的分类器调用失败.
    #[error("region `{region}`: {source}")]
    Classifier {
        /// 失败区域.
        region: RegionKind,

        /// 失败原因.
        #[source]
        source: ClassifierError,
    },

    /// 某体素被多个区域写入. 内部一致性错误, 说明分区存在缺陷.
    #[error("voxel {index:?} is claimed by more than one region")]
    PartitionOverlap {
        /// 第一个被重复写入的体素.
        index: Idx3d,
    },

    /// 某体素没有被任何区域写入. 内部一致性错误, 说明分区存在缺陷.
    #[error("voxel {index:?} is not covered by any region")]
    PartitionGap {
        /// 第一个被遗漏的体素 (行优先序).
        index: Idx3d,
    },

    /// 工作线程池异常 (线程无法创建或中途崩溃).
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

impl SegError {
    /// 是否为内部一致性错误 (分区重叠或遗漏)?
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            SegError::PartitionOverlap { .. } | SegError::PartitionGap { .. }
        )
    }
}

/// 分割运行时结果.
pub type SegResult<T> = Result<T, SegError>;
