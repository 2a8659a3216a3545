//! 风格 Prompt 模板
//!
//! 模板内占位符：{name}、{description}、{category}，由批次的主体描述填充。

use crate::catalog::Style;
use crate::core::SubjectDescriptor;

/// 取风格对应的模板；不在任何目录中的风格返回 None
pub fn template_for(style: &Style) -> Option<&'static str> {
    let t = match style.as_str() {
        "HERO" => "A hero shot of {name} ({category}), centered, dramatic key light, clean gradient backdrop. {description}",
        "LIFESTYLE" => "{name} placed naturally in a bright, lived-in home scene. {description}",
        "FLAT_LAY" => "Top-down flat lay of {name} with complementary props on a textured surface. {description}",
        "MACRO_DETAIL" => "Extreme close-up of {name} showing material texture and fine details. {description}",
        "IN_USE" => "{name} being used by a person, hands visible, natural motion. {description}",
        "STUDIO_WHITE" => "{name} on a seamless pure white studio background, soft even lighting, e-commerce style.",
        "MOODY_DARK" => "{name} in a low-key dark scene with a single hard light and deep shadows. {description}",
        "OUTDOOR_NATURAL" => "{name} outdoors in natural daylight, shallow depth of field. {description}",
        "MINIMAL_PEDESTAL" => "{name} on a minimal geometric pedestal, pastel palette, soft shadows.",
        "HEADSHOT" => "Professional headshot of {name}, neutral background, soft key light, sharp eyes. {description}",
        "EDITORIAL" => "Magazine editorial portrait of {name}, styled pose, bold composition. {description}",
        "CANDID_STREET" => "Candid street photo of {name} walking in a city, natural light. {description}",
        "STUDIO_PORTRAIT" => "Classic studio portrait of {name} with Rembrandt lighting. {description}",
        "GOLDEN_HOUR" => "Portrait of {name} at golden hour, warm backlight and lens flare. {description}",
        "BLACK_WHITE" => "High-contrast black and white portrait of {name}. {description}",
        "ENVIRONMENTAL" => "Environmental portrait of {name} in a setting that reflects their work. {description}",
        "FASHION_FULL_BODY" => "Full-body fashion shot of {name}, clean backdrop, confident stance. {description}",
        "CINEMATIC" => "Cinematic still of {name}, anamorphic framing, teal and orange grade. {description}",
        _ => return None,
    };
    Some(t)
}

/// 由风格模板 + 主体描述 + 可选自定义指令拼出生成 Prompt
///
/// 未知风格退化为仅含主体描述的通用 Prompt，不报错。
pub fn build_prompt(
    style: &Style,
    subject: &SubjectDescriptor,
    custom_instruction: Option<&str>,
) -> String {
    let template = template_for(style).unwrap_or("A professional photo of {name}. {description}");
    let mut prompt = template
        .replace("{name}", &subject.name)
        .replace("{description}", &subject.description)
        .replace("{category}", &subject.category)
        .trim()
        .to_string();

    if let Some(extra) = custom_instruction.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str("\nAdditional direction: ");
        prompt.push_str(extra);
    }
    prompt
}
