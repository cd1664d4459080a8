//! 固定大小的工作线程池.

use std::thread;

use log::{debug, warn};

use crate::classifier::{CancelToken, ClassifierInvoker, LabelMap};
use crate::config::FailurePolicy;
use crate::error::{ClassifierError, SegError, SegResult};
use crate::Region;

/// 单个区域的分类结果.
pub(crate) type Outcome = Result<LabelMap, ClassifierError>;

/// 一批区域的分类结果.
#[derive(Debug)]
pub(crate) struct Batch {
    /// 与输入区域一一对应.
    pub(crate) outcomes: Vec<Outcome>,

    /// 按完成顺序, 第一个非取消失败的区域下标.
    pub(crate) first_failure: Option<usize>,
}

/// 工作线程池.
///
/// 每次 [`WorkerPool::run`] 都在作用域线程中启动至多 `workers` 个工作线程,
/// 它们从同一个任务队列中取出区域下标, 调用分类器, 再把结果送回结果通道.
/// 调用方等待全部区域完成后才返回 (屏障).
///
/// # 注意
///
/// 在 [`FailurePolicy::AbortOnFirstError`] 下, 第一个失败会取消整批运行的令牌:
/// 尚在队列中的区域直接记为 [`ClassifierError::Cancelled`], 运行中的调用协作式地退出.
pub(crate) struct WorkerPool {
    workers: usize,
    invoker: ClassifierInvoker,
    policy: FailurePolicy,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize, invoker: ClassifierInvoker, policy: FailurePolicy) -> Self {
        Self {
            workers: workers.max(1),
            invoker,
            policy,
        }
    }

    /// 对全部 `regions` 分类. 仅在线程池自身出错时返回 `Err`.
    pub(crate) fn run(&self, regions: &[Region], run_token: &CancelToken) -> SegResult<Batch> {
        let n = regions.len();
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        for i in 0..n {
            job_tx
                .send(i)
                .map_err(|e| SegError::WorkerPool(e.to_string()))?;
        }
        drop(job_tx);

        let (res_tx, res_rx) = crossbeam_channel::unbounded::<(usize, Outcome)>();
        let workers = self.workers.min(n).max(1);
        debug!("classifying {n} regions with {workers} workers");

        thread::scope(|s| {
            let mut handles = Vec::with_capacity(workers);
            let mut spawn_error = None;
            for w in 0..workers {
                let job_rx = job_rx.clone();
                let res_tx = res_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("seg-worker-{w}"))
                    .spawn_scoped(s, move || {
                        for i in job_rx.iter() {
                            let out = self.classify_one(&regions[i], run_token);
                            if res_tx.send((i, out)).is_err() {
                                break;
                            }
                        }
                    });
                match spawned {
                    Ok(h) => handles.push(h),
                    Err(e) => {
                        spawn_error = Some(e);
                        break;
                    }
                }
            }
            drop(res_tx);

            let mut slots: Vec<Option<Outcome>> = vec![None; n];
            let mut first_failure = None;
            for (i, out) in res_rx.iter() {
                if first_failure.is_none()
                    && matches!(&out, Err(e) if *e != ClassifierError::Cancelled)
                {
                    first_failure = Some(i);
                }
                slots[i] = Some(out);
            }

            for h in handles {
                h.join()
                    .map_err(|_| SegError::WorkerPool("a worker thread panicked".to_owned()))?;
            }
            if let Some(e) = spawn_error {
                return Err(SegError::WorkerPool(e.to_string()));
            }

            let outcomes = slots
                .into_iter()
                .enumerate()
                .map(|(i, slot)| {
                    slot.ok_or_else(|| {
                        SegError::WorkerPool(format!("region #{i} was never classified"))
                    })
                })
                .collect::<SegResult<Vec<_>>>()?;
            Ok(Batch {
                outcomes,
                first_failure,
            })
        })
    }

    fn classify_one(&self, region: &Region, run_token: &CancelToken) -> Outcome {
        if run_token.is_cancelled() {
            return Err(ClassifierError::Cancelled);
        }
        let out = self.invoker.invoke(region, &run_token.child_token());
        match &out {
            Ok(_) => debug!("region `{}` classified", region.kind()),
            Err(ClassifierError::Cancelled) => debug!("region `{}` cancelled", region.kind()),
            Err(e) => {
                warn!("region `{}` failed: {e}", region.kind());
                if self.policy == FailurePolicy::AbortOnFirstError {
                    run_token.cancel();
                }
            }
        }
        out
    }
}
