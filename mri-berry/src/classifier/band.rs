//! 基线分类器: 等宽强度分带.

use ndarray::Array1;

use super::{CancelToken, LabelMap, TissueClassifier};
use crate::error::ClassifierError;
use crate::Region;

/// 确定性的基线分类器.
///
/// 将区域内有限强度的 `[min, max]` 等分为 `C` 条带, 最低的条带记为类别 1.
/// 常量区域与非有限强度的体素一律记为类别 1.
///
/// 该实现不做任何统计建模, 仅作为实验程序与测试中的参照实现.
#[derive(Copy, Clone, Debug, Default)]
pub struct BandClassifier;

impl TissueClassifier for BandClassifier {
    fn name(&self) -> &str {
        "band"
    }

    fn classify(
        &self,
        region: &Region,
        class_count: u8,
        cancel: &CancelToken,
    ) -> Result<LabelMap, ClassifierError> {
        if cancel.is_cancelled() {
            return Err(ClassifierError::Cancelled);
        }
        if class_count == 0 {
            return Err(ClassifierError::ConvergenceFailure(
                "no tissue class to assign".to_owned(),
            ));
        }

        let labels = match region.intensity_range() {
            Some((lo, hi)) if hi > lo => {
                let top = class_count as usize - 1;
                let width = (hi - lo) as f64 / class_count as f64;
                region.intensities().mapv(|v| {
                    if v.is_finite() {
                        let band = ((v - lo) as f64 / width).floor() as usize;
                        (band.min(top) + 1) as u8
                    } else {
                        1
                    }
                })
            }
            _ => Array1::from_elem(region.len(), 1),
        };
        Ok(LabelMap::new(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::BandClassifier;
    use crate::classifier::{CancelToken, TissueClassifier};
    use crate::error::ClassifierError;
    use crate::{Region, RegionKind, Volume};
    use ndarray::{array, Array3};

    fn whole(data: Array3<f32>) -> Region {
        let volume = Volume::from_data(data);
        let indices = ndarray::indices(volume.data().dim()).into_iter().collect();
        Region::gather(RegionKind::Whole, &volume, indices)
    }

    #[test]
    fn test_three_bands() {
        let region = whole(array![[[10.0, 20.0, 30.0, 12.0, f32::NAN]]]);
        let labels = BandClassifier
            .classify(&region, 3, &CancelToken::new())
            .unwrap();
        assert_eq!(labels.view(), array![1u8, 2, 3, 1, 1]);
    }

    #[test]
    fn test_constant_region_single_class() {
        let region = whole(Array3::from_elem((2, 2, 2), 7.0));
        let labels = BandClassifier
            .classify(&region, 3, &CancelToken::new())
            .unwrap();
        assert!(labels.view().iter().all(|&l| l == 1));
        assert_eq!(labels.len(), 8);
    }

    #[test]
    fn test_respects_cancellation() {
        let region = whole(Array3::zeros((1, 1, 2)));
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            BandClassifier.classify(&region, 3, &token),
            Err(ClassifierError::Cancelled)
        );
    }
}
