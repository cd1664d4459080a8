//! 通用常量.

/// 肿瘤标注与分割结果中的体素标签值.
pub mod label {
    /// 肿瘤标注中, 健康组织的体素值.
    pub const HEALTHY: u8 = 0;

    /// 全局分割中, 因分类失败而未被分割的体素值.
    ///
    /// 有效组织类别从 1 开始编号, 因此 0 不会与任何类别冲突.
    pub const UNSEGMENTED: u8 = 0;

    /// BraTS 数据集中, 坏死核心的体素值.
    pub const BRATS_NECROTIC: u8 = 1;

    /// BraTS 数据集中, 水肿的体素值.
    pub const BRATS_EDEMA: u8 = 2;

    /// BraTS 数据集中, 活跃 (增强) 肿瘤的体素值.
    pub const BRATS_ACTIVE: u8 = 4;

    /// 体素是否是健康组织?
    #[inline]
    pub const fn is_healthy(p: u8) -> bool {
        matches!(p, HEALTHY)
    }

    /// 体素是否属于任意肿瘤子区?
    #[inline]
    pub const fn is_tumour(p: u8) -> bool {
        !is_healthy(p)
    }
}

/// 默认的脑组织类别名称. 编号依次为 1, 2, 3, 按 T1 强度升序排列.
pub const DEFAULT_TISSUE_CLASSES: [&str; 3] =
    ["cerebrospinal_fluid", "gray_matter", "white_matter"];

/// 默认的 BraTS 肿瘤子区映射: (名称, 标注值).
pub const BRATS_COMPARTMENTS: [(&str, u8); 3] = [
    ("necrotic", label::BRATS_NECROTIC),
    ("edema", label::BRATS_EDEMA),
    ("active", label::BRATS_ACTIVE),
];

/// 肿瘤区域归一化的默认目标区间. 归一化后的强度落在 \[1, 2\] 内, 0 留给背景.
pub const DEFAULT_TARGET_RANGE: (f32, f32) = (1.0, 2.0);

/// 来源数组中, 尚未被任何区域写入的体素值.
pub const NO_REGION: u16 = u16::MAX;
