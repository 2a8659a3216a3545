//! 风格目录：按拍摄对象模式（商品 / 人像）划分的有序风格列表
//!
//! 每个风格对应一个不可变的 Prompt 模板（见 prompts）；批次按目录顺序为每个风格创建一个任务。

pub mod prompts;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use prompts::{build_prompt, template_for};

/// 风格标识（不透明字符串，如 HERO、HEADSHOT）
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Style(String);

impl Style {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Style {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// 拍摄对象模式：决定使用哪一套风格目录
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectMode {
    #[default]
    Product,
    Human,
}

/// 商品模式目录（顺序即调度顺序）
pub const PRODUCT_STYLES: &[&str] = &[
    "HERO",
    "LIFESTYLE",
    "FLAT_LAY",
    "MACRO_DETAIL",
    "IN_USE",
    "STUDIO_WHITE",
    "MOODY_DARK",
    "OUTDOOR_NATURAL",
    "MINIMAL_PEDESTAL",
];

/// 人像模式目录
pub const HUMAN_STYLES: &[&str] = &[
    "HEADSHOT",
    "EDITORIAL",
    "CANDID_STREET",
    "STUDIO_PORTRAIT",
    "GOLDEN_HOUR",
    "BLACK_WHITE",
    "ENVIRONMENTAL",
    "FASHION_FULL_BODY",
    "CINEMATIC",
];

impl SubjectMode {
    /// 当前模式的有序风格目录
    pub fn catalog(self) -> Vec<Style> {
        let ids = match self {
            SubjectMode::Product => PRODUCT_STYLES,
            SubjectMode::Human => HUMAN_STYLES,
        };
        ids.iter().map(|id| Style::new(*id)).collect()
    }

    /// 风格是否属于当前目录
    pub fn contains(self, style: &Style) -> bool {
        let ids = match self {
            SubjectMode::Product => PRODUCT_STYLES,
            SubjectMode::Human => HUMAN_STYLES,
        };
        ids.contains(&style.as_str())
    }

    /// 根据分析结果推荐模式
    pub fn suggested_for(is_human: bool) -> Self {
        if is_human {
            SubjectMode::Human
        } else {
            SubjectMode::Product
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubjectMode::Product => "product",
            SubjectMode::Human => "human",
        }
    }
}

impl fmt::Display for SubjectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "product" => Ok(SubjectMode::Product),
            "human" | "portrait" => Ok(SubjectMode::Human),
            other => Err(format!("unknown subject mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalogs_have_unique_styles() {
        for mode in [SubjectMode::Product, SubjectMode::Human] {
            let styles = mode.catalog();
            let unique: HashSet<_> = styles.iter().collect();
            assert_eq!(unique.len(), styles.len());
            assert_eq!(styles.len(), 9);
        }
    }

    #[test]
    fn test_catalogs_do_not_overlap() {
        let product: HashSet<_> = SubjectMode::Product.catalog().into_iter().collect();
        assert!(SubjectMode::Human
            .catalog()
            .iter()
            .all(|s| !product.contains(s)));
    }

    #[test]
    fn test_every_style_has_template() {
        for mode in [SubjectMode::Product, SubjectMode::Human] {
            for style in mode.catalog() {
                assert!(template_for(&style).is_some(), "missing template for {style}");
            }
        }
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Human".parse::<SubjectMode>().unwrap(), SubjectMode::Human);
        assert_eq!("product".parse::<SubjectMode>().unwrap(), SubjectMode::Product);
        assert!("landscape".parse::<SubjectMode>().is_err());
    }

    #[test]
    fn test_contains() {
        assert!(SubjectMode::Product.contains(&Style::from("HERO")));
        assert!(!SubjectMode::Human.contains(&Style::from("HERO")));
    }
}
