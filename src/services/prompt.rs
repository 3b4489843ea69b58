use crate::core::scene::{CharacterProfile, GenerationConfig, PromptPolicy, Scene, Setting};
use std::cmp::Ordering;

/// Description keywords that mark a scene as an illustration or diagram.
const ILLUSTRATION_KEYWORDS: &[&str] = &[
    "illustration",
    "diagram",
    "3d",
    "icon",
    "infographic",
    "graphic",
    "chart",
    "visualization",
    "concept",
    "일러스트",
    "다이어그램",
    "그래픽",
    "도표",
    "아이콘",
];

const ILLUSTRATION_AVOID: &[&str] = &[
    "busy background",
    "complex background",
    "architectural background",
    "landscape background",
    "street scene",
];

const PHOTOREAL_AVOID: &[&str] = &[
    "cartoon style",
    "illustration style",
    "anachronistic clothing",
    "architecture from another era",
    "setting inconsistent with the described location",
];

const DEFAULT_LOCATION: &str = "present-day, modern setting";
const DEFAULT_ENVIRONMENT: &str = "contemporary architecture and modern interior design";
const DEFAULT_PEOPLE: &str = "people with natural features wearing modern casual clothing";
const DEFAULT_ERA: &str = "modern era (2020s), contemporary lifestyle";

/// Camera keys rendered first, in this order; the rest follow sorted.
const CAMERA_ORDER: &[&str] = &["shot", "lens", "angle", "movement", "lighting"];

/// Picks the background policy for `scene`: the scene's own `KIND`, then the
/// config-wide `PROMPT_POLICY`, then a keyword match on the description.
pub fn resolve_policy(scene: &Scene, config: &GenerationConfig) -> PromptPolicy {
    if let Some(kind) = scene.kind.or(config.prompt_policy) {
        return kind;
    }
    let description = scene.description.to_lowercase();
    if ILLUSTRATION_KEYWORDS
        .iter()
        .any(|k| description.contains(k))
    {
        PromptPolicy::Illustration
    } else {
        PromptPolicy::Photoreal
    }
}

/// Assembles the generation prompt for one scene.
///
/// Output depends only on the arguments, so retries can reuse it verbatim.
pub fn build_prompt(scene: &Scene, config: &GenerationConfig) -> String {
    let policy = resolve_policy(scene, config);
    let setting = SettingLines::new(&config.setting);
    let mut parts: Vec<String> = Vec::new();

    parts.push(aspect_preamble(config));
    parts.push(scene.description.trim().to_string());

    for name in &scene.character_refs {
        parts.push(match config.character_bible.get(name) {
            Some(profile) => character_line(name, profile),
            None => format!("{}: a person", name),
        });
    }

    match policy {
        PromptPolicy::Illustration => {
            parts.push(
                "\nBackground: Clean, minimal background with soft gradient or solid color"
                    .to_string(),
            );
            parts.push(
                "Style: Professional illustration or educational diagram with clear focus on subject"
                    .to_string(),
            );
        }
        PromptPolicy::Photoreal => {
            parts.push(format!("\nLocation: {}", setting.location));
            parts.push(format!("Environment: {}", setting.environment));
            parts.push(format!("People: {}", setting.people));
            parts.push(format!("Time period: {}", setting.era));
        }
    }

    let style = style_description(config);
    if !style.is_empty() {
        parts.push(format!("\nStyle: {}", style));
    }

    let camera = camera_description(scene);
    if !camera.is_empty() {
        parts.push(format!("\nCamera: {}", camera));
    }

    let avoid = avoid_items(config, policy);
    if !avoid.is_empty() {
        parts.push(format!("\nAvoid: {}.", avoid.join(", ")));
    }

    parts.push("\nCreate a single cohesive scene with realistic details.".to_string());
    if policy == PromptPolicy::Photoreal {
        parts.push(format!(
            "Keep every person and location consistent with: {}; {}.",
            setting.location, setting.era
        ));
    }

    parts.join("\n")
}

fn aspect_preamble(config: &GenerationConfig) -> String {
    let ratio = config.output_rules.aspect_ratio;
    let format = match ratio.width.cmp(&ratio.height) {
        Ordering::Greater => ", widescreen format",
        Ordering::Less => ", portrait format",
        Ordering::Equal => "",
    };
    format!("{} aspect ratio{}.", ratio, format)
}

fn character_line(name: &str, profile: &CharacterProfile) -> String {
    let mut fields = vec![non_empty(&profile.age).unwrap_or("adult").to_string()];
    if let Some(appearance) = non_empty(&profile.appearance) {
        fields.push(appearance.to_string());
    }
    if let Some(clothing) = non_empty(&profile.clothing) {
        fields.push(format!("wearing {}", clothing));
    }
    if let Some(description) = non_empty(&profile.description) {
        fields.push(description.to_string());
    }
    format!("{}: {}", name, fields.join(", "))
}

fn style_description(config: &GenerationConfig) -> String {
    let style = &config.style;
    let mut parts = Vec::new();

    if style.get("photorealism").is_some_and(|v| v.is_enabled()) {
        parts.push("photorealistic".to_string());
    }
    if style.get("cinematic").is_some_and(|v| v.is_enabled()) {
        parts.push("cinematic composition".to_string());
    }
    for (key, suffix) in [
        ("color_grade", "color grading"),
        ("lighting", "lighting"),
        ("depth_of_field", "depth of field"),
        ("skin_texture", "skin texture"),
        ("film_grain", "film grain"),
    ] {
        if let Some(text) = style.get(key).and_then(|v| v.text()) {
            if !text.trim().is_empty() {
                parts.push(format!("{} {}", text.trim(), suffix));
            }
        }
    }
    parts.join(", ")
}

fn camera_description(scene: &Scene) -> String {
    let mut parts = Vec::new();
    for key in CAMERA_ORDER {
        if let Some(value) = scene.camera.get(*key).filter(|v| !v.trim().is_empty()) {
            parts.push(if *key == "lens" {
                format!("{} lens", value.trim())
            } else {
                value.trim().to_string()
            });
        }
    }
    // BTreeMap iteration is already sorted.
    for (key, value) in &scene.camera {
        if !CAMERA_ORDER.contains(&key.as_str()) && !value.trim().is_empty() {
            parts.push(value.trim().to_string());
        }
    }
    parts.join(", ")
}

fn avoid_items(config: &GenerationConfig, policy: PromptPolicy) -> Vec<String> {
    let builtin = match policy {
        PromptPolicy::Illustration => ILLUSTRATION_AVOID,
        PromptPolicy::Photoreal => PHOTOREAL_AVOID,
    };
    let mut items: Vec<String> = Vec::new();
    let candidates = config
        .negative_prompts
        .iter()
        .chain(config.output_rules.disallow.iter())
        .map(|s| s.trim())
        .chain(builtin.iter().copied());
    for item in candidates {
        if !item.is_empty() && !items.iter().any(|seen| seen.eq_ignore_ascii_case(item)) {
            items.push(item.to_string());
        }
    }
    items
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

struct SettingLines<'a> {
    location: &'a str,
    environment: &'a str,
    people: &'a str,
    era: &'a str,
}

impl<'a> SettingLines<'a> {
    fn new(setting: &'a Setting) -> Self {
        Self {
            location: non_empty(&setting.location).unwrap_or(DEFAULT_LOCATION),
            environment: non_empty(&setting.environment).unwrap_or(DEFAULT_ENVIRONMENT),
            people: non_empty(&setting.people).unwrap_or(DEFAULT_PEOPLE),
            era: non_empty(&setting.era).unwrap_or(DEFAULT_ERA),
        }
    }
}
