//! 带超时与取消的分类器调用.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use log::{debug, warn};

use super::{CancelToken, LabelMap, TissueClassifier};
use crate::error::ClassifierError;
use crate::Region;

/// 等待分类器结果时的轮询间隔.
const POLL_SLICE: Duration = Duration::from_millis(5);

/// 分类器调用器.
///
/// 每次调用都在一个独立的辅助线程中运行分类器, 调用方线程则以 [`POLL_SLICE`]
/// 为间隔等待结果, 同时检查截止时间和取消令牌. 分类器的输出在返回前会被校验.
///
/// # 注意
///
/// 超时或被取消时, 调用器会取消本次调用的子令牌后立即返回,
/// 不等待辅助线程结束. 不响应取消的分类器会在后台继续运行直到自行返回, 其结果被丢弃.
#[derive(Clone)]
pub struct ClassifierInvoker {
    classifier: Arc<dyn TissueClassifier>,
    class_count: u8,
    timeout: Option<Duration>,
}

impl ClassifierInvoker {
    /// 以分类器, 类别数与单次调用超时初始化. `timeout` 为 `None` 时不限时.
    pub fn new(
        classifier: Arc<dyn TissueClassifier>,
        class_count: u8,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            classifier,
            class_count,
            timeout,
        }
    }

    /// 类别数.
    #[inline]
    pub fn class_count(&self) -> u8 {
        self.class_count
    }

    /// 对 `region` 调用分类器, 返回校验过的标签.
    ///
    /// 若 `cancel` 在调用前已被取消, 则直接返回 [`ClassifierError::Cancelled`].
    pub fn invoke(&self, region: &Region, cancel: &CancelToken) -> Result<LabelMap, ClassifierError> {
        if cancel.is_cancelled() {
            return Err(ClassifierError::Cancelled);
        }
        debug!(
            "invoking `{}` on region `{}` ({} voxels)",
            self.classifier.name(),
            region.kind(),
            region.len()
        );

        let labels = self.run_detached(region, cancel)?;
        labels.validate(region.len(), self.class_count)?;
        Ok(labels)
    }

    fn run_detached(&self, region: &Region, cancel: &CancelToken) -> Result<LabelMap, ClassifierError> {
        let token = cancel.child_token();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let classifier = Arc::clone(&self.classifier);
        let job_region = region.clone();
        let job_token = token.clone();
        let class_count = self.class_count;
        thread::Builder::new()
            .name(format!("classify-{}", region.kind()))
            .spawn(move || {
                // 调用方可能已经放弃等待, 发送失败无需处理.
                let _ = tx.send(classifier.classify(&job_region, class_count, &job_token));
            })
            .map_err(|e| ClassifierError::Crashed(e.to_string()))?;

        let start = Instant::now();
        loop {
            match rx.recv_timeout(POLL_SLICE) {
                Ok(out) => return out,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ClassifierError::Crashed(format!(
                        "`{}` exited without a result",
                        self.classifier.name()
                    )));
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            if let Some(limit) = self.timeout {
                if start.elapsed() >= limit {
                    warn!("region `{}` timed out after {limit:?}", region.kind());
                    token.cancel();
                    return Err(ClassifierError::Timeout { after: limit });
                }
            }
            if cancel.is_cancelled() {
                token.cancel();
                return Err(ClassifierError::Cancelled);
            }
        }
    }
}
