//! 分割运行配置.
//!
//! [`SegConfig`] 在构建时完成全部校验, 之后只读. 每次运行都显式持有一份配置,
//! 不存在进程级的全局状态.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::label::HEALTHY;
use crate::consts::{BRATS_COMPARTMENTS, DEFAULT_TARGET_RANGE, DEFAULT_TISSUE_CLASSES};

/// 分割模式. 决定分区策略与归一化策略, 在一次运行中固定不变.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Mode {
    /// 肿瘤无关: 忽略肿瘤, 整个体数据作为一个区域分割.
    Agnostic,

    /// 偏差校正: 健康组织与 (合并后的) 肿瘤分别分割, 肿瘤区域单独归一化.
    BiasCorrected,

    /// 肿瘤实体加权: 每个肿瘤子区单独成为区域并单独归一化.
    EntityWeighted,
}

impl Mode {
    /// 全部已实现的模式.
    pub const ALL: [Mode; 3] = [Mode::Agnostic, Mode::BiasCorrected, Mode::EntityWeighted];

    /// 该模式是否必须提供肿瘤标注?
    #[inline]
    pub const fn requires_mask(&self) -> bool {
        matches!(self, Mode::BiasCorrected | Mode::EntityWeighted)
    }

    /// 模式的规范名称.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Mode::Agnostic => "tumor_agnostic",
            Mode::BiasCorrected => "bias_corrected",
            Mode::EntityWeighted => "tumor_entity_weighted",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解析 [`Mode`] 失败. 参数为无法识别的输入.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown segmentation mode `{0}`, expected one of: tumor_agnostic, bias_corrected, tumor_entity_weighted")]
pub struct ParseModeError(pub String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "agnostic" | "tumor_agnostic" | "tumour_agnostic" => Ok(Mode::Agnostic),
            "bias_corrected" => Ok(Mode::BiasCorrected),
            "entity_weighted" | "tumor_entity_weighted" | "tumour_entity_weighted" => {
                Ok(Mode::EntityWeighted)
            }
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// 强度归一化方法.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NormMethod {
    /// 以区域内有限强度的最小值和最大值为源区间.
    MinMax,

    /// 以区域内强度的 `low` 和 `high` 百分位 (闭区间 \[0, 100\]) 为源区间,
    /// 区间外的强度先被截断.
    Percentile {
        /// 下百分位.
        low: f32,

        /// 上百分位.
        high: f32,
    },
}

/// 归一化策略: 方法 + 目标区间.
///
/// 反序列化同样经由 [`Normalization::new`] 校验.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "NormalizationFields")
)]
pub struct Normalization {
    method: NormMethod,
    target_range: (f32, f32),
}

/// [`Normalization`] 未经校验的字段.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct NormalizationFields {
    method: NormMethod,
    target_range: (f32, f32),
}

#[cfg(feature = "serde")]
impl TryFrom<NormalizationFields> for Normalization {
    type Error = ConfigError;

    fn try_from(raw: NormalizationFields) -> Result<Self, Self::Error> {
        let unchecked = Normalization {
            method: raw.method,
            target_range: raw.target_range,
        };
        Normalization::new(raw.method, raw.target_range)
            .ok_or(ConfigError::InvalidNormalization(unchecked))
    }
}

impl Default for Normalization {
    /// min-max 归一化到 \[1, 2\].
    fn default() -> Self {
        Self {
            method: NormMethod::MinMax,
            target_range: DEFAULT_TARGET_RANGE,
        }
    }
}

impl Normalization {
    /// 构建 min-max 归一化策略.
    ///
    /// 目标区间必须有限且 `lo < hi`, 否则返回 `None`.
    pub fn min_max(lo: f32, hi: f32) -> Option<Self> {
        Self::new(NormMethod::MinMax, (lo, hi))
    }

    /// 构建百分位截断归一化策略.
    ///
    /// 百分位必须满足 `0 <= low < high <= 100`, 目标区间必须有限且 `lo < hi`,
    /// 否则返回 `None`.
    pub fn percentile(low: f32, high: f32, lo: f32, hi: f32) -> Option<Self> {
        Self::new(NormMethod::Percentile { low, high }, (lo, hi))
    }

    /// 构建任意归一化策略. 参数不合法时返回 `None`.
    pub fn new(method: NormMethod, target_range: (f32, f32)) -> Option<Self> {
        let ans = Self {
            method,
            target_range,
        };
        ans.is_valid().then_some(ans)
    }

    /// 归一化方法.
    #[inline]
    pub fn method(&self) -> NormMethod {
        self.method
    }

    /// 目标区间 `(lo, hi)`.
    #[inline]
    pub fn target_range(&self) -> (f32, f32) {
        self.target_range
    }

    /// 参数是否合法.
    pub fn is_valid(&self) -> bool {
        let (lo, hi) = self.target_range;
        let range_ok = lo.is_finite() && hi.is_finite() && lo < hi;
        let method_ok = match self.method {
            NormMethod::MinMax => true,
            NormMethod::Percentile { low, high } => (0.0..=100.0).contains(&low)
                && (0.0..=100.0).contains(&high)
                && low < high,
        };
        range_ok && method_ok
    }
}

/// 单个分类器区域失败时的整体处理策略.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FailurePolicy {
    /// 第一个失败即取消其余区域, 整次运行失败.
    #[default]
    AbortOnFirstError,

    /// 失败区域标记为未分割, 其余区域照常完成, 结果标记为不完整.
    BestEffort,
}

/// 一个有语义的肿瘤子区: 名称 + 标注值.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Compartment {
    /// 子区名称, 如 `edema`.
    pub name: String,

    /// 子区在肿瘤标注中的值, 不为 0.
    pub label: u8,
}

/// 构建 [`SegConfig`] 错误.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// 组织类别数为 0.
    #[error("at least one tissue class is required")]
    NoTissueClass,

    /// 组织类别数超过了 `u8` 标签能表示的上限 (255).
    #[error("too many tissue classes: {0} (at most 255)")]
    TooManyClasses(usize),

    /// 归一化策略参数不合法.
    #[error("invalid normalization policy: {0:?}")]
    InvalidNormalization(Normalization),

    /// 肿瘤子区的标注值为 0 (与健康组织冲突).
    #[error("compartment `{0}` uses the healthy label 0")]
    HealthyCompartment(String),

    /// 多个肿瘤子区使用了同一个标注值.
    #[error("duplicate compartment label {0}")]
    DuplicateCompartment(u8),
}

/// 一次分割运行的不可变配置.
///
/// 只能经由 [`SegConfigBuilder::build`] 得到; 反序列化时先得到构建器再校验.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "SegConfigBuilder")
)]
pub struct SegConfig {
    mode: Mode,
    tissue_classes: Vec<String>,
    normalization: Normalization,
    compartments: Vec<Compartment>,
    failure_policy: FailurePolicy,
    workers: NonZeroUsize,
    classifier_timeout: Option<Duration>,
}

impl SegConfig {
    /// 获取以默认值初始化的构建器.
    #[inline]
    pub fn builder() -> SegConfigBuilder {
        SegConfigBuilder::default()
    }

    /// 分割模式.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 组织类别数 C. 分类器输出的标签取值于 `1..=C`.
    #[inline]
    pub fn class_count(&self) -> u8 {
        // 构建时已保证不超过 255.
        self.tissue_classes.len() as u8
    }

    /// 组织类别名称, 第 `i` 个对应标签 `i + 1`.
    #[inline]
    pub fn tissue_classes(&self) -> &[String] {
        &self.tissue_classes
    }

    /// 肿瘤区域归一化策略.
    #[inline]
    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// 预期的肿瘤子区.
    #[inline]
    pub fn compartments(&self) -> &[Compartment] {
        &self.compartments
    }

    /// 标注值 `label` 对应的子区名称. 未登记的标注值返回 `None`.
    pub fn compartment_name(&self, label: u8) -> Option<&str> {
        self.compartments
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.name.as_str())
    }

    /// 分类失败处理策略.
    #[inline]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// 工作线程数上限.
    #[inline]
    pub fn workers(&self) -> usize {
        self.workers.get()
    }

    /// 单次分类器调用的超时时长. `None` 代表不限时.
    #[inline]
    pub fn classifier_timeout(&self) -> Option<Duration> {
        self.classifier_timeout
    }

    /// 以另一个模式复制一份配置. 其余参数不变.
    pub fn with_mode(&self, mode: Mode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

/// [`SegConfig`] 构建器.
///
/// 反序列化时缺失的字段取默认值.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(default))]
pub struct SegConfigBuilder {
    mode: Mode,
    tissue_classes: Vec<String>,
    normalization: Normalization,
    compartments: Vec<Compartment>,
    failure_policy: FailurePolicy,
    workers: Option<NonZeroUsize>,
    classifier_timeout: Option<Duration>,
}

impl Default for SegConfigBuilder {
    /// 偏差校正模式, 三类脑组织, BraTS 子区映射, min-max 到 \[1, 2\],
    /// 首错即止, 工作线程数为可用并行度, 不限时.
    fn default() -> Self {
        Self {
            mode: Mode::BiasCorrected,
            tissue_classes: DEFAULT_TISSUE_CLASSES.map(String::from).to_vec(),
            normalization: Normalization::default(),
            compartments: BRATS_COMPARTMENTS
                .iter()
                .map(|(name, label)| Compartment {
                    name: name.to_string(),
                    label: *label,
                })
                .collect(),
            failure_policy: FailurePolicy::default(),
            workers: None,
            classifier_timeout: None,
        }
    }
}

impl SegConfigBuilder {
    /// 设置分割模式.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// 以名称设置组织类别. 类别数即名称个数.
    pub fn tissue_classes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tissue_classes = names.into_iter().map(Into::into).collect();
        self
    }

    /// 只设置组织类别数, 类别名称依次为 `class-1`, `class-2`, ...
    pub fn class_count(self, count: usize) -> Self {
        self.tissue_classes((1..=count).map(|i| format!("class-{i}")))
    }

    /// 设置归一化策略.
    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// 设置预期的肿瘤子区映射 (名称, 标注值).
    pub fn compartments<I, S>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        self.compartments = it
            .into_iter()
            .map(|(name, label)| Compartment {
                name: name.into(),
                label,
            })
            .collect();
        self
    }

    /// 设置分类失败处理策略.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// 设置工作线程数上限.
    pub fn workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// 设置单次分类器调用的超时时长.
    pub fn classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = Some(timeout);
        self
    }

    /// 校验并构建配置.
    pub fn build(self) -> Result<SegConfig, ConfigError> {
        match self.tissue_classes.len() {
            0 => return Err(ConfigError::NoTissueClass),
            n if n > u8::MAX as usize => return Err(ConfigError::TooManyClasses(n)),
            _ => {}
        }
        if !self.normalization.is_valid() {
            return Err(ConfigError::InvalidNormalization(self.normalization));
        }
        let mut seen = [false; 256];
        for c in self.compartments.iter() {
            if c.label == HEALTHY {
                return Err(ConfigError::HealthyCompartment(c.name.clone()));
            }
            if std::mem::replace(&mut seen[c.label as usize], true) {
                return Err(ConfigError::DuplicateCompartment(c.label));
            }
        }

        let workers = self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
        });

        Ok(SegConfig {
            mode: self.mode,
            tissue_classes: self.tissue_classes,
            normalization: self.normalization,
            compartments: self.compartments,
            failure_policy: self.failure_policy,
            workers,
            classifier_timeout: self.classifier_timeout,
        })
    }
}

impl TryFrom<SegConfigBuilder> for SegConfig {
    type Error = ConfigError;

    #[inline]
    fn try_from(builder: SegConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("tumor_agnostic".parse(), Ok(Mode::Agnostic));
        assert_eq!("Agnostic".parse(), Ok(Mode::Agnostic));
        assert_eq!("bias-corrected".parse(), Ok(Mode::BiasCorrected));
        assert_eq!("tumour_entity_weighted".parse(), Ok(Mode::EntityWeighted));
        assert!("fast".parse::<Mode>().is_err());
        for m in Mode::ALL {
            assert_eq!(m.as_str().parse(), Ok(m));
        }
        assert!(!Mode::Agnostic.requires_mask());
        assert!(Mode::EntityWeighted.requires_mask());
    }

    #[test]
    fn test_normalization_validation() {
        assert!(Normalization::min_max(0.0, 1.0).is_some());
        assert!(Normalization::min_max(1.0, 1.0).is_none());
        assert!(Normalization::min_max(0.0, f32::INFINITY).is_none());
        assert!(Normalization::percentile(2.0, 98.0, 0.0, 1.0).is_some());
        assert!(Normalization::percentile(98.0, 2.0, 0.0, 1.0).is_none());
        assert!(Normalization::percentile(-1.0, 50.0, 0.0, 1.0).is_none());
        assert!(Normalization::percentile(1.0, 101.0, 0.0, 1.0).is_none());
        assert_eq!(Normalization::default().target_range(), (1.0, 2.0));
    }

    #[test]
    fn test_config_defaults() {
        let c = SegConfig::builder().build().unwrap();
        assert_eq!(c.mode(), Mode::BiasCorrected);
        assert_eq!(c.class_count(), 3);
        assert_eq!(c.tissue_classes()[0], "cerebrospinal_fluid");
        assert_eq!(c.compartment_name(2), Some("edema"));
        assert_eq!(c.compartment_name(3), None);
        assert_eq!(c.failure_policy(), FailurePolicy::AbortOnFirstError);
        assert!(c.workers() >= 1);
        assert_eq!(c.classifier_timeout(), None);
        assert_eq!(c.with_mode(Mode::Agnostic).mode(), Mode::Agnostic);
    }

    #[test]
    fn test_config_errors() {
        let e = SegConfig::builder().class_count(0).build().unwrap_err();
        assert_eq!(e, ConfigError::NoTissueClass);

        let e = SegConfig::builder().class_count(256).build().unwrap_err();
        assert_eq!(e, ConfigError::TooManyClasses(256));

        let e = SegConfig::builder()
            .compartments([("bad", 0)])
            .build()
            .unwrap_err();
        assert_eq!(e, ConfigError::HealthyCompartment("bad".to_string()));

        let e = SegConfig::builder()
            .compartments([("a", 3), ("b", 3)])
            .build()
            .unwrap_err();
        assert_eq!(e, ConfigError::DuplicateCompartment(3));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_validates() {
        use serde_json::json;

        let c: SegConfig = serde_json::from_value(json!({
            "mode": "EntityWeighted",
            "classifier_timeout": { "secs": 2, "nanos": 0 },
        }))
        .unwrap();
        assert_eq!(c.mode(), Mode::EntityWeighted);
        assert_eq!(c.class_count(), 3);
        assert_eq!(c.classifier_timeout(), Some(Duration::from_secs(2)));

        let many: Vec<String> = (1..=256).map(|i| format!("class-{i}")).collect();
        let e = serde_json::from_value::<SegConfig>(json!({ "tissue_classes": many }));
        assert!(e.unwrap_err().to_string().contains("too many tissue classes"));

        let e = serde_json::from_value::<SegConfig>(json!({
            "compartments": [{ "name": "a", "label": 0 }, { "name": "b", "label": 0 }],
        }));
        assert!(e.unwrap_err().to_string().contains("healthy label 0"));

        let e = serde_json::from_value::<Normalization>(json!({
            "method": { "Percentile": { "low": 90.0, "high": 10.0 } },
            "target_range": [2.0, 1.0],
        }));
        assert!(e.unwrap_err().to_string().contains("invalid normalization"));

        // 序列化后再读回仍然合法.
        let text = serde_json::to_string(&c).unwrap();
        let back: SegConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.workers(), c.workers());
        assert_eq!(back.compartments(), c.compartments());
    }
}
