//! 外部组织分类器的调用接口.
//!
//! 分类器对单个区域内的体素按强度聚类, 输出每个体素的类别 `1..=C`.
//! 本库把它当作黑盒, 只约定 [`TissueClassifier`] 接口, 并由 [`ClassifierInvoker`]
//! 负责超时, 取消与输出校验.

use ndarray::{Array1, ArrayView1};

use crate::error::ClassifierError;
use crate::Region;

mod band;
mod cancel;
mod invoke;

pub use band::BandClassifier;
pub use cancel::CancelToken;
pub use invoke::ClassifierInvoker;

/// 组织分类器.
///
/// 实现需要可以跨线程共享: 同一个分类器会被多个工作线程同时调用.
///
/// # 注意
///
/// 1. 输出的标签须与 [`Region::indices`] 一一对应, 取值在 `1..=class_count` 内.
///    类别编号的含义由分类器自行决定, 重组时会按平均强度重新对齐.
/// 2. 耗时较长的实现应当定期检查 `cancel`, 被取消后返回 [`ClassifierError::Cancelled`].
/// 3. 基于文件或外部进程的实现可以用 [`Region::to_masked_volume`] 得到挖出该区域后的子体数据.
pub trait TissueClassifier: Send + Sync {
    /// 分类器名称, 仅用于日志.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// 对 `region` 做 `class_count` 类组织分割.
    fn classify(
        &self,
        region: &Region,
        class_count: u8,
        cancel: &CancelToken,
    ) -> Result<LabelMap, ClassifierError>;
}

impl<F> TissueClassifier for F
where
    F: Fn(&Region, u8, &CancelToken) -> Result<LabelMap, ClassifierError> + Send + Sync,
{
    fn classify(
        &self,
        region: &Region,
        class_count: u8,
        cancel: &CancelToken,
    ) -> Result<LabelMap, ClassifierError> {
        self(region, class_count, cancel)
    }
}

/// 单个区域的分类结果, 与区域体素一一对应.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabelMap(Array1<u8>);

impl From<Vec<u8>> for LabelMap {
    fn from(labels: Vec<u8>) -> Self {
        Self(Array1::from(labels))
    }
}

impl LabelMap {
    /// 包装原始标签.
    #[inline]
    pub fn new(labels: Array1<u8>) -> Self {
        Self(labels)
    }

    /// 标签个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 标签视图.
    #[inline]
    pub fn view(&self) -> ArrayView1<'_, u8> {
        self.0.view()
    }

    /// 检查长度是否为 `expected_len`, 且全部标签位于 `1..=class_count`.
    pub fn validate(&self, expected_len: usize, class_count: u8) -> Result<(), ClassifierError> {
        if self.len() != expected_len {
            return Err(ClassifierError::MalformedOutput(format!(
                "expected {expected_len} labels, got {}",
                self.len()
            )));
        }
        match self.0.iter().find(|&&l| l == 0 || l > class_count) {
            Some(l) => Err(ClassifierError::MalformedOutput(format!(
                "label {l} outside 1..={class_count}"
            ))),
            None => Ok(()),
        }
    }
}

/// 测试用的分类器桩.
#[cfg(test)]
pub(crate) mod testing {
    use std::thread;
    use std::time::{Duration, Instant};

    use ndarray::{Array1, Array3};

    use super::{BandClassifier, CancelToken, LabelMap, TissueClassifier};
    use crate::error::ClassifierError;
    use crate::{Region, RegionKind};

    /// 安装测试日志. 重复调用无副作用.
    pub(crate) fn init_logger() {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Debug)
            .env()
            .init();
    }

    /// 按真值体数据输出标签. 可以给出一个置换, 把真值类别 `k` 报告为 `permutation[k - 1]`,
    /// 用以模拟分类器的类别编号与强度顺序无关.
    pub(crate) struct GroundTruth {
        pub(crate) truth: Array3<u8>,
        pub(crate) permutation: Option<Vec<u8>>,
    }

    impl TissueClassifier for GroundTruth {
        fn name(&self) -> &str {
            "ground-truth"
        }

        fn classify(
            &self,
            region: &Region,
            _class_count: u8,
            _cancel: &CancelToken,
        ) -> Result<LabelMap, ClassifierError> {
            let labels: Array1<u8> = region
                .indices()
                .iter()
                .map(|p| {
                    let k = self.truth[*p];
                    match &self.permutation {
                        Some(perm) => perm[k as usize - 1],
                        None => k,
                    }
                })
                .collect();
            Ok(LabelMap::new(labels))
        }
    }

    /// 对指定区域卡住 (直到被取消) 或报告不收敛, 其余区域交给 [`BandClassifier`].
    #[derive(Default)]
    pub(crate) struct Scripted {
        pub(crate) stall: Option<RegionKind>,
        pub(crate) diverge: Option<RegionKind>,
    }

    impl TissueClassifier for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn classify(
            &self,
            region: &Region,
            class_count: u8,
            cancel: &CancelToken,
        ) -> Result<LabelMap, ClassifierError> {
            if self.stall == Some(region.kind()) {
                // 最多卡 10 秒, 避免测试线程泄漏.
                let start = Instant::now();
                while !cancel.is_cancelled() && start.elapsed() < Duration::from_secs(10) {
                    thread::sleep(Duration::from_millis(1));
                }
                return Err(ClassifierError::Cancelled);
            }
            if self.diverge == Some(region.kind()) {
                return Err(ClassifierError::ConvergenceFailure(
                    "EM did not settle after 100 iterations".to_owned(),
                ));
            }
            BandClassifier.classify(region, class_count, cancel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LabelMap;
    use crate::error::ClassifierError;

    #[test]
    fn test_label_map_validation() {
        let labels = LabelMap::from(vec![1, 3, 2, 2]);
        assert!(labels.validate(4, 3).is_ok());
        assert!(matches!(
            labels.validate(5, 3),
            Err(ClassifierError::MalformedOutput(_))
        ));
        assert!(matches!(
            labels.validate(4, 2),
            Err(ClassifierError::MalformedOutput(_))
        ));
        assert!(LabelMap::from(vec![0]).validate(1, 3).is_err());
        assert!(LabelMap::from(vec![]).validate(0, 3).is_ok());
    }
}
