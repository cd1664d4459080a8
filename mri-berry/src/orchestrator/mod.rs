//! 分割编排器.
//!
//! 一次运行依次经过 `Configured → Partitioned → Preconditioned → Classified → Recombined → Done`,
//! 任一步出错都会进入终止状态 `Failed`. 每个阶段都是一个独立的值, 由下一阶段消耗,
//! 因此不存在跨阶段的共享可变状态. 重试即重新调用一次 [`SegmentationOrchestrator::run`].

use std::sync::Arc;

use log::{debug, info, warn};

use crate::classifier::{CancelToken, ClassifierInvoker, LabelMap, TissueClassifier};
use crate::config::{FailurePolicy, SegConfig};
use crate::error::{ClassifierError, SegError};
use crate::partition::VolumePartitioner;
use crate::precondition::{PreconditionOutcome, RegionPreconditioner};
use crate::recombine::{GlobalSegmentation, LabelRecombiner};
use crate::{GridAttr, Idx3d, Region, TumourMask, Volume};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

mod diagnostics;
mod pool;

pub use diagnostics::{Diagnostics, RegionRecord, RegionStatus, RunState, Warning};

use pool::WorkerPool;

/// 一次成功运行的结果.
#[derive(Clone, Debug)]
pub struct SegmentationReport {
    /// 全局分割.
    pub segmentation: GlobalSegmentation,

    /// 诊断信息.
    pub diagnostics: Diagnostics,
}

impl SegmentationReport {
    /// 是否所有区域都分类成功? 若为 `false`, 失败区域的体素为未分割.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.segmentation.is_complete()
    }
}

/// 一次失败的运行. 不包含任何分割结果.
#[derive(Clone, Debug, thiserror::Error)]
#[error("segmentation failed while {failed_at}: {error}")]
pub struct RunFailure {
    /// 失败原因.
    #[source]
    pub error: SegError,

    /// 失败时所处的状态.
    pub failed_at: RunState,

    /// 截至失败时收集到的诊断信息.
    pub diagnostics: Diagnostics,
}

/// 分割编排器.
///
/// 持有不可变的配置和分类器, 自身没有跨运行的状态, 可以被多个线程同时用于不同扫描.
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use mri_berry::prelude::*;
/// use ndarray::Array3;
///
/// let volume = Volume::from_data(Array3::from_shape_fn((4, 4, 4), |(z, _, _)| z as f32));
/// let config = SegConfig::builder().mode(Mode::Agnostic).build().unwrap();
/// let orchestrator = SegmentationOrchestrator::new(config, Arc::new(BandClassifier));
///
/// let report = orchestrator.run(&volume, None).unwrap();
/// assert!(report.is_complete());
/// assert_eq!(report.segmentation.labels().dim(), (4, 4, 4));
/// ```
pub struct SegmentationOrchestrator {
    config: SegConfig,
    classifier: Arc<dyn TissueClassifier>,
}

impl SegmentationOrchestrator {
    /// 以配置与分类器初始化.
    pub fn new(config: SegConfig, classifier: Arc<dyn TissueClassifier>) -> Self {
        Self { config, classifier }
    }

    /// 运行配置.
    #[inline]
    pub fn config(&self) -> &SegConfig {
        &self.config
    }

    /// 对 `volume` 做一次完整的分割.
    ///
    /// `mask` 为肿瘤标注. 肿瘤无关模式会忽略它; 其余模式缺少标注时立即失败,
    /// 不会调用任何分类器.
    pub fn run(
        &self,
        volume: &Volume,
        mask: Option<&TumourMask>,
    ) -> Result<SegmentationReport, RunFailure> {
        info!(
            "segmentation run: mode `{}`, {} classes, {} workers, volume {:?}",
            self.config.mode(),
            self.config.class_count(),
            self.config.workers(),
            volume.shape()
        );

        let report = Configured::new(&self.config, volume, mask)
            .partition()?
            .precondition()
            .classify(&self.config, Arc::clone(&self.classifier))?
            .recombine(&self.config)?
            .finish();

        info!(
            "segmentation done: {} regions, complete = {}, {} warnings",
            report.segmentation.regions().len(),
            report.is_complete(),
            report.diagnostics.warnings().len()
        );
        Ok(report)
    }
}

/// 结束一次运行, 记录失败状态.
fn fail(mut diagnostics: Diagnostics, error: SegError) -> RunFailure {
    let failed_at = diagnostics.state();
    warn!("run failed while {failed_at}: {error}");
    diagnostics.enter(RunState::Failed);
    RunFailure {
        error,
        failed_at,
        diagnostics,
    }
}

struct Configured<'a> {
    config: &'a SegConfig,
    volume: &'a Volume,
    mask: Option<&'a TumourMask>,
    diagnostics: Diagnostics,
}

struct Partitioned {
    shape: Idx3d,
    preconditioner: RegionPreconditioner,
    regions: Vec<Region>,
    diagnostics: Diagnostics,
}

struct Preconditioned {
    shape: Idx3d,
    regions: Vec<Region>,
    diagnostics: Diagnostics,
}

struct Classified {
    shape: Idx3d,
    parts: Vec<(Region, Option<LabelMap>)>,
    diagnostics: Diagnostics,
}

struct Recombined {
    segmentation: GlobalSegmentation,
    diagnostics: Diagnostics,
}

impl<'a> Configured<'a> {
    fn new(config: &'a SegConfig, volume: &'a Volume, mask: Option<&'a TumourMask>) -> Self {
        Self {
            config,
            volume,
            mask,
            diagnostics: Diagnostics::new(config.mode()),
        }
    }

    fn partition(self) -> Result<Partitioned, RunFailure> {
        let Self {
            config,
            volume,
            mask,
            mut diagnostics,
        } = self;

        let partitioner = VolumePartitioner::new(volume, mask);
        let partition = match partitioner.split(config.mode(), config.compartments()) {
            Ok(p) => p,
            Err(e) => return Err(fail(diagnostics, e)),
        };

        if let Some(d) = partition.degradation() {
            diagnostics.warn(Warning::ModeDegraded {
                requested: d.requested,
            });
        }
        for &kind in partition.empty() {
            diagnostics.warn(Warning::EmptyRegion { region: kind });
        }
        for r in partition.regions() {
            diagnostics.add_region(r.kind(), r.len());
        }
        diagnostics.enter(RunState::Partitioned);
        debug!("partitioned into {} regions", partition.regions().len());

        Ok(Partitioned {
            shape: volume.shape(),
            preconditioner: RegionPreconditioner::new(config.mode(), config.normalization()),
            regions: partition.into_regions(),
            diagnostics,
        })
    }
}

impl Partitioned {
    fn precondition(self) -> Preconditioned {
        let Self {
            shape,
            preconditioner: pre,
            regions,
            mut diagnostics,
        } = self;

        let processed = precondition_all(&pre, &regions);
        let mut regions = Vec::with_capacity(processed.len());
        for (i, (region, outcome)) in processed.into_iter().enumerate() {
            if let PreconditionOutcome::Degenerate(reason) = outcome {
                diagnostics.warn(Warning::DegenerateRegion {
                    region: region.kind(),
                    reason,
                });
            }
            diagnostics.record_mut(i).precondition = Some(outcome);
            regions.push(region);
        }
        diagnostics.enter(RunState::Preconditioned);

        Preconditioned {
            shape,
            regions,
            diagnostics,
        }
    }
}

/// 借助 `rayon`, 并行地预处理全部区域.
#[cfg(feature = "rayon")]
fn precondition_all(
    pre: &RegionPreconditioner,
    regions: &[Region],
) -> Vec<(Region, PreconditionOutcome)> {
    regions.par_iter().map(|r| pre.apply(r)).collect()
}

#[cfg(not(feature = "rayon"))]
fn precondition_all(
    pre: &RegionPreconditioner,
    regions: &[Region],
) -> Vec<(Region, PreconditionOutcome)> {
    regions.iter().map(|r| pre.apply(r)).collect()
}

impl Preconditioned {
    fn classify(
        self,
        config: &SegConfig,
        classifier: Arc<dyn TissueClassifier>,
    ) -> Result<Classified, RunFailure> {
        let Self {
            shape,
            regions,
            mut diagnostics,
        } = self;

        let invoker = ClassifierInvoker::new(
            classifier,
            config.class_count(),
            config.classifier_timeout(),
        );
        let pool = WorkerPool::new(config.workers(), invoker, config.failure_policy());
        let batch = match pool.run(&regions, &CancelToken::new()) {
            Ok(b) => b,
            Err(e) => return Err(fail(diagnostics, e)),
        };

        let mut parts = Vec::with_capacity(regions.len());
        for (i, (region, out)) in regions.into_iter().zip(batch.outcomes).enumerate() {
            let labels = match out {
                Ok(labels) => {
                    diagnostics.record_mut(i).status = RegionStatus::Classified;
                    Some(labels)
                }
                Err(e) => {
                    diagnostics.record_mut(i).status = RegionStatus::Failed(e);
                    None
                }
            };
            parts.push((region, labels));
        }

        if config.failure_policy() == FailurePolicy::AbortOnFirstError {
            // 被取消的区域只在没有其他失败时才作为失败原因.
            let culprit = batch
                .first_failure
                .or_else(|| parts.iter().position(|(_, l)| l.is_none()));
            if let Some(i) = culprit {
                let record = &diagnostics.regions()[i];
                let source = match &record.status {
                    RegionStatus::Failed(e) => e.clone(),
                    _ => ClassifierError::Cancelled,
                };
                let error = SegError::Classifier {
                    region: record.kind,
                    source,
                };
                return Err(fail(diagnostics, error));
            }
        }
        diagnostics.enter(RunState::Classified);

        Ok(Classified {
            shape,
            parts,
            diagnostics,
        })
    }
}

impl Classified {
    fn recombine(self, config: &SegConfig) -> Result<Recombined, RunFailure> {
        let Self {
            shape,
            parts,
            mut diagnostics,
        } = self;
        let recombiner =
            LabelRecombiner::new(shape, config.mode(), config.tissue_classes().to_vec());
        match recombiner.recombine(&parts) {
            Ok(segmentation) => {
                diagnostics.enter(RunState::Recombined);
                Ok(Recombined {
                    segmentation,
                    diagnostics,
                })
            }
            Err(e) => Err(fail(diagnostics, e)),
        }
    }
}

impl Recombined {
    fn finish(self) -> SegmentationReport {
        let Self {
            segmentation,
            mut diagnostics,
        } = self;
        diagnostics.enter(RunState::Done);
        SegmentationReport {
            segmentation,
            diagnostics,
        }
    }
}
