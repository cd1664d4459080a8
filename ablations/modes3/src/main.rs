//! 三种分割模式对比实验.
//!
//! 同一份输入 (NIfTI 或合成模体) 分别以肿瘤无关, 偏差校正, 肿瘤实体加权三种模式分割,
//! 并打印各模式的区域划分, 类别统计与耗时.

mod result;
mod runner;

use log::LevelFilter;
use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .expect("Logger initialization error");

    runner::run().analyze();
}
