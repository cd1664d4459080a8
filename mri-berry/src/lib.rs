#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 在存在脑肿瘤的情况下, 对 3D MRI 扫描进行脑组织 (脑脊液, 灰质, 白质) 分割的编排引擎.
//!
//! 真正的聚类分割由外部的组织分类器 ([`TissueClassifier`]) 完成.
//! 本 crate 负责的是: 如何按肿瘤标注把体数据切分成互不相交的区域,
//! 如何对每个区域做强度预处理, 如何并发调度分类器, 以及如何把各区域的标签重新拼接成
//! 全局一致、无冲突的分割结果.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 外部分类器被视为黑盒. 本库只约定其调用接口, 不关心其统计模型.
//! 2. 内部一致性被破坏时 (区域重叠或遗漏体素) 返回致命错误, 绝不静默修复.
//!
//! # 开发计划
//!
//! ### 三种分割模式 ✅
//!
//! 肿瘤无关 (agnostic), 偏差校正 (bias corrected), 肿瘤实体加权 (entity weighted).
//!
//! 实现位于 `mri-berry/src/config.rs` 和 `mri-berry/src/partition.rs`.
//!
//! ### 区域强度归一化 ✅
//!
//! min-max 与百分位截断两种方式, 退化区域 (空, 常量) 原样透传并记录.
//!
//! 实现位于 `mri-berry/src/precondition.rs`.
//!
//! ### 分类器调用: 超时与协作式取消 ✅
//!
//! 实现位于 `mri-berry/src/classifier`.
//!
//! ### 标签对齐与重组 ✅
//!
//! 各区域独立分类后, 按类内平均强度升序对齐类别编号, 再合并为全局分割.
//!
//! 实现位于 `mri-berry/src/recombine.rs`.
//!
//! ### 状态机与固定大小工作线程池 ✅
//!
//! 实现位于 `mri-berry/src/orchestrator`.
//!
//! ### 外部进程分类器适配 (如 FSL `fast`) ⌛️
//!
//! 目前只提供 [`BandClassifier`] 作为基线实现.

/// 三维索引 `(z, h, w)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D MRI 体数据, 肿瘤标注与区域.
mod data;

pub use data::{GridAttr, OpenError, Region, RegionKind, TumourMask, Volume};

pub mod consts;

pub mod config;

pub mod error;

pub mod partition;

pub mod precondition;

pub mod classifier;

pub mod recombine;

pub mod orchestrator;

pub mod prelude;

pub use classifier::{BandClassifier, CancelToken, LabelMap, TissueClassifier};
pub use config::{FailurePolicy, Mode, Normalization, SegConfig};
pub use error::{ClassifierError, SegError, SegResult};
pub use orchestrator::{RunFailure, RunState, SegmentationOrchestrator, SegmentationReport};
pub use recombine::GlobalSegmentation;
