//! 模式对比实验依赖的通用组件.

use mri_berry::consts::label::{BRATS_ACTIVE, BRATS_EDEMA, BRATS_NECROTIC, HEALTHY};
use mri_berry::{TumourMask, Volume};
use ndarray::Array3;

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 确定性的伪随机扰动, 取值于 `[-1, 1)`.
#[inline]
fn jitter((z, h, w): (usize, usize, usize)) -> f32 {
    let mut x = (z as u64) << 42 ^ (h as u64) << 21 ^ w as u64;
    x = x.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 29;
    (x % 2001) as f32 / 1000.0 - 1.0
}

/// 合成一个带肿瘤的脑部模体, 形状为 `(n, n, n)`.
///
/// 从外到内依次为脑脊液 (强度约 30), 灰质 (约 80), 白质 (约 130) 三层球壳.
/// 偏离中心处放置一个球形肿瘤: 坏死核心 (标注 1, 强度约 220), 活跃环 (标注 4, 约 420),
/// 最外层水肿 (标注 2, 约 320). 肿瘤强度远高于健康组织.
///
/// 如果 `n < 8`, 则程序 panic.
pub fn phantom(n: usize) -> (Volume, TumourMask) {
    assert!(n >= 8, "模体太小");
    let c = n as f32 / 2.0;
    let tumour_centre = (c, c + n as f32 / 8.0, c - n as f32 / 8.0);
    let tumour_radius = n as f32 / 6.0;

    let dist = |(z, h, w): (usize, usize, usize), (cz, ch, cw): (f32, f32, f32)| {
        ((z as f32 - cz).powi(2) + (h as f32 - ch).powi(2) + (w as f32 - cw).powi(2)).sqrt()
    };

    let mask = Array3::from_shape_fn((n, n, n), |p| {
        let r = dist(p, tumour_centre) / tumour_radius;
        match r {
            r if r < 0.4 => BRATS_NECROTIC,
            r if r < 0.7 => BRATS_ACTIVE,
            r if r < 1.0 => BRATS_EDEMA,
            _ => HEALTHY,
        }
    });
    let data = Array3::from_shape_fn((n, n, n), |p| {
        let base = match mask[p] {
            BRATS_NECROTIC => 220.0,
            BRATS_ACTIVE => 420.0,
            BRATS_EDEMA => 320.0,
            _ => match dist(p, (c, c, c)) / c {
                r if r < 0.45 => 130.0,
                r if r < 0.75 => 80.0,
                _ => 30.0,
            },
        };
        base + 5.0 * jitter(p)
    });

    (Volume::from_data(data), TumourMask::new(mask))
}

#[cfg(test)]
mod tests {
    use super::phantom;
    use mri_berry::consts::label::{BRATS_ACTIVE, BRATS_EDEMA, BRATS_NECROTIC};
    use mri_berry::GridAttr;

    #[test]
    fn test_phantom_has_all_compartments() {
        let (volume, mask) = phantom(32);
        assert_eq!(volume.shape(), (32, 32, 32));
        assert_eq!(mask.shape(), volume.shape());
        for label in [BRATS_NECROTIC, BRATS_ACTIVE, BRATS_EDEMA] {
            assert!(mask.count(label) > 0, "missing label {label}");
        }
        assert!(!mask.is_all_healthy());
    }
}
