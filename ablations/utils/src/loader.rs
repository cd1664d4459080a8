//! 实验输入加载器: 从环境变量读取 NIfTI 路径与线程数, 缺省时使用合成模体.

use mri_berry::{OpenError, TumourMask, Volume};
use std::env;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// 缺省模体边长.
pub const PHANTOM_SIZE: usize = 48;

/// 读取路径类环境变量. 未设置或为空时返回 `None`.
fn path_from_env(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// 获取 MRI 扫描路径 (`$MRI_SCAN`).
#[inline]
pub fn scan_path_from_env() -> Option<PathBuf> {
    path_from_env("MRI_SCAN")
}

/// 获取肿瘤标注路径 (`$MRI_TUMOUR_MASK`).
#[inline]
pub fn mask_path_from_env() -> Option<PathBuf> {
    path_from_env("MRI_TUMOUR_MASK")
}

/// 获取工作线程数.
///
/// 1. 若环境变量 `$MRI_WORKERS` 为正整数, 则返回其值;
/// 2. 否则, 返回可并行核心数.
pub fn workers_from_env_or_cpus() -> NonZeroUsize {
    env::var("MRI_WORKERS")
        .ok()
        .and_then(|v| v.trim().parse::<NonZeroUsize>().ok())
        .or_else(|| NonZeroUsize::new(crate::cpus()))
        .unwrap_or(NonZeroUsize::MIN)
}

/// 加载实验输入.
///
/// 1. 若 `$MRI_SCAN` 非空, 则读取该扫描, 并在 `$MRI_TUMOUR_MASK` 非空时读取对应标注;
/// 2. 否则, 返回边长为 [`PHANTOM_SIZE`] 的合成模体及其标注.
pub fn input_from_env_or_phantom() -> Result<(Volume, Option<TumourMask>), OpenError> {
    match scan_path_from_env() {
        Some(scan) => {
            let volume = Volume::open(scan)?;
            let mask = mask_path_from_env().map(TumourMask::open).transpose()?;
            Ok((volume, mask))
        }
        None => {
            let (volume, mask) = crate::phantom(PHANTOM_SIZE);
            Ok((volume, Some(mask)))
        }
    }
}
