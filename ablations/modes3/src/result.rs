//! 实验结果.

use mri_berry::prelude::*;
use std::io::{self, Write};
use std::time::Duration;

/// 单个模式的运行结果.
pub struct ModeRun {
    pub outcome: Result<SegmentationReport, RunFailure>,
    pub elapsed: Duration,
}

/// 将 `report` 的结果写进 `w` 中.
fn describe_report<W: Write>(r: &SegmentationReport, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";
    let seg = &r.segmentation;

    writeln!(w, "{S4}Complete: {}", r.is_complete())?;
    writeln!(w, "{S4}Regions:")?;
    for rec in r.diagnostics.regions() {
        writeln!(
            w,
            "{S4}{S4}{:<10} {:>8} voxels, {:?}",
            rec.kind.name(),
            rec.voxels,
            rec.precondition
        )?;
    }
    writeln!(w, "{S4}Classes:")?;
    for class in 1..=seg.class_count() {
        writeln!(
            w,
            "{S4}{S4}{:<20} {:>8}",
            seg.class_name(class).unwrap_or("/"),
            seg.count(class)
        )?;
    }
    writeln!(w, "{S4}Unsegmented: {}", seg.unsegmented_count())?;
    write!(w, "{S4}Warnings: {}", r.diagnostics.warnings().len())?;
    for warning in r.diagnostics.warnings() {
        write!(w, "\n{S4}{S4}{warning:?}")?;
    }
    Ok(())
}

/// 将 `run` 的结果写进 `w` 中.
fn describe_into<W: Write>(mode: Mode, run: &ModeRun, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Mode `{mode}`:")?;
    writeln!(w, "{S4}Total machine time: {} us", run.elapsed.as_micros())?;
    match &run.outcome {
        Ok(report) => describe_report(report, w),
        Err(failure) => {
            writeln!(w, "{S4}Failed while {}: {}", failure.failed_at, failure.error)?;
            write!(w, "{S4}Trail: {:?}", failure.diagnostics.trail())
        }
    }
}

/// 模式对比实验最终结果.
pub struct ModesResult {
    data: Vec<(Mode, ModeRun)>,
}

impl ModesResult {
    pub fn from_iter<I: IntoIterator<Item = (Mode, ModeRun)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(1024);

        for (mode, run) in self.data.iter() {
            describe_into(*mode, run, &mut buf).unwrap();
            println!("{}", String::from_utf8_lossy(&buf));
            buf.clear();

            utils::sep();
        }
    }
}
