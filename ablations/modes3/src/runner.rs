//! 程序运行函数.

use crate::result::{ModeRun, ModesResult};
use mri_berry::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use utils::loader;

/// 实际运行.
pub fn run() -> ModesResult {
    let (volume, mask) = loader::input_from_env_or_phantom().expect("Loading input error");
    let workers = loader::workers_from_env_or_cpus();
    log::info!(
        "input volume {:?}, tumour labels: {:?}, {} workers",
        volume.shape(),
        mask.as_ref().map(TumourMask::tumour_labels),
        workers
    );

    let base = SegConfig::builder()
        .workers(workers)
        .failure_policy(FailurePolicy::BestEffort)
        .build()
        .expect("Building config error");
    let classifier: Arc<dyn TissueClassifier> = Arc::new(BandClassifier);

    println!("Running all segmentation modes...");
    thread::scope(|s| {
        let (volume, mask) = (&volume, mask.as_ref());
        let handles = Mode::ALL.map(|mode| {
            let orchestrator = SegmentationOrchestrator::new(base.with_mode(mode), Arc::clone(&classifier));
            s.spawn(move || {
                let start = Instant::now();
                let outcome = orchestrator.run(volume, mask);
                ModeRun {
                    outcome,
                    elapsed: start.elapsed(),
                }
            })
        });

        ModesResult::from_iter(
            Mode::ALL.into_iter().zip(
                handles
                    .into_iter()
                    .map(|th| th.join().expect("Thread joining error")),
            ),
        )
    })
}
