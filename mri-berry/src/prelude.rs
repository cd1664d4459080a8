//! 🧠欢迎光临🧠
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::{GridAttr, OpenError, Region, RegionKind, TumourMask, Volume};

pub use crate::consts::label::{HEALTHY, UNSEGMENTED};
pub use crate::consts::{BRATS_COMPARTMENTS, DEFAULT_TISSUE_CLASSES};

pub use crate::config::{FailurePolicy, Mode, NormMethod, Normalization, SegConfig};
pub use crate::error::{ClassifierError, SegError, SegResult};

pub use crate::classifier::{BandClassifier, CancelToken, LabelMap, TissueClassifier};
pub use crate::orchestrator::{
    Diagnostics, RunFailure, RunState, SegmentationOrchestrator, SegmentationReport, Warning,
};
pub use crate::recombine::GlobalSegmentation;
