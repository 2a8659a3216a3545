//! 画幅比例：用户可选比例 → 后端支持比例的固定映射表

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 输出画幅
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[default]
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 10] = [
        AspectRatio::Square,
        AspectRatio::Portrait2x3,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait3x4,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape5x4,
        AspectRatio::Portrait9x16,
        AspectRatio::Landscape16x9,
        AspectRatio::Ultrawide21x9,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait2x3 => "2:3",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait4x5 => "4:5",
            AspectRatio::Landscape5x4 => "5:4",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
            AspectRatio::Ultrawide21x9 => "21:9",
        }
    }

    /// 后端原生支持的比例：1:1、3:4、4:3、9:16、16:9
    pub fn is_backend_supported(self) -> bool {
        matches!(
            self,
            AspectRatio::Square
                | AspectRatio::Portrait3x4
                | AspectRatio::Landscape4x3
                | AspectRatio::Portrait9x16
                | AspectRatio::Landscape16x9
        )
    }

    /// 映射到最接近的后端支持比例；已支持的原样返回
    pub fn to_backend(self) -> AspectRatio {
        match self {
            AspectRatio::Portrait2x3 | AspectRatio::Portrait4x5 => AspectRatio::Portrait3x4,
            AspectRatio::Landscape3x2 | AspectRatio::Landscape5x4 => AspectRatio::Landscape4x3,
            AspectRatio::Ultrawide21x9 => AspectRatio::Landscape16x9,
            supported => supported,
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unsupported aspect ratio: {s}"))
    }
}
