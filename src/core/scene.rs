use crate::core::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

const DEFAULT_ASPECT_RATIO: &str = "16:9";
const DEFAULT_SIZE: &str = "1920x1080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidAspectRatio(s.to_string());
        let (w, h) = s.trim().split_once(':').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }

    pub fn value(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

fn parse_size(s: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::InvalidSize(s.to_string());
    let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputRules {
    pub aspect_ratio: AspectRatio,
    pub target_width: u32,
    pub target_height: u32,
    pub disallow: Vec<String>,
}

/// Background handling applied by the prompt builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptPolicy {
    /// Clean, minimal background for diagrams and illustrations.
    Illustration,
    /// Real-world setting taken from the config's `SETTING` block.
    Photoreal,
}

impl PromptPolicy {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "illustration" => Ok(Self::Illustration),
            "photoreal" | "photorealistic" => Ok(Self::Photoreal),
            _ => Err(ConfigError::InvalidPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum StyleValue {
    Flag(bool),
    Text(String),
    Number(serde_json::Number),
}

impl StyleValue {
    pub fn is_enabled(&self) -> bool {
        matches!(self, StyleValue::Flag(true))
    }

    /// Textual form; `None` for boolean flags.
    pub fn text(&self) -> Option<String> {
        match self {
            StyleValue::Flag(_) => None,
            StyleValue::Text(s) => Some(s.clone()),
            StyleValue::Number(n) => Some(n.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CharacterProfile {
    #[serde(default, deserialize_with = "string_or_number")]
    pub age: Option<String>,
    #[serde(default)]
    pub appearance: Option<String>,
    #[serde(default)]
    pub clothing: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Setting {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub people: Option<String>,
    #[serde(default)]
    pub era: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub index: usize,
    pub display_number: u32,
    pub title: String,
    pub description: String,
    pub character_refs: Vec<String>,
    pub camera: BTreeMap<String, String>,
    pub kind: Option<PromptPolicy>,
    file_name: String,
}

impl Scene {
    /// `scene_<NN>_<title>.png`, with the title reduced to filename-safe
    /// characters. Unique within one config: a clashing name gets the scene
    /// index appended (`scene_01_a_b_2.png`).
    pub fn output_file_name(&self) -> &str {
        &self.file_name
    }
}

fn base_file_name(display_number: u32, title: &str) -> String {
    format!("scene_{:02}_{}", display_number, sanitize_title(title))
}

/// Gives every scene a distinct file name, keeping the plain name for the
/// first scene that claims it.
fn assign_file_names(scenes: &mut [Scene]) {
    let mut taken = HashSet::new();
    for scene in scenes.iter_mut() {
        let base = base_file_name(scene.display_number, &scene.title);
        let mut name = format!("{}.png", base);
        let mut suffix = scene.index;
        while !taken.insert(name.clone()) {
            name = format!("{}_{}.png", base, suffix);
            suffix += 1;
        }
        scene.file_name = name;
    }
}

pub fn sanitize_title(title: &str) -> String {
    title
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub output_rules: OutputRules,
    pub style: BTreeMap<String, StyleValue>,
    pub negative_prompts: Vec<String>,
    pub character_bible: BTreeMap<String, CharacterProfile>,
    pub setting: Setting,
    pub prompt_policy: Option<PromptPolicy>,
    pub scenes: Vec<Scene>,
}

impl GenerationConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)?;
        raw.validate()
    }

    pub fn scene(&self, index: usize) -> Result<&Scene, ConfigError> {
        self.scenes
            .get(index)
            .ok_or(ConfigError::SceneIndexOutOfRange {
                index,
                total: self.scenes.len(),
            })
    }
}

// --- Wire format ---

#[derive(Deserialize)]
struct RawConfig {
    #[serde(rename = "OUTPUT_RULES", default)]
    output_rules: RawOutputRules,
    #[serde(rename = "STYLE", default)]
    style: BTreeMap<String, StyleValue>,
    #[serde(rename = "NEGATIVE_PROMPTS", default)]
    negative_prompts: Vec<String>,
    #[serde(rename = "CHARACTER_BIBLE", default)]
    character_bible: BTreeMap<String, CharacterProfile>,
    #[serde(rename = "SETTING", default)]
    setting: Setting,
    #[serde(rename = "PROMPT_POLICY", default)]
    prompt_policy: Option<String>,
    #[serde(rename = "RUN")]
    run: Option<RawRun>,
}

#[derive(Deserialize, Default)]
struct RawOutputRules {
    #[serde(default)]
    aspect_ratio: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    disallow: Vec<String>,
}

#[derive(Deserialize)]
struct RawRun {
    #[serde(rename = "SCENES")]
    scenes: Option<Vec<RawScene>>,
}

#[derive(Deserialize)]
struct RawScene {
    #[serde(rename = "SCENE_NUMBER", default)]
    scene_number: Option<serde_json::Value>,
    #[serde(rename = "TITLE", default)]
    title: Option<String>,
    #[serde(rename = "DESCRIPTION", default)]
    description: String,
    #[serde(rename = "CHARACTERS", default)]
    characters: Vec<String>,
    #[serde(rename = "CAMERA", default)]
    camera: BTreeMap<String, String>,
    #[serde(rename = "KIND", default)]
    kind: Option<String>,
}

impl RawConfig {
    fn validate(self) -> Result<GenerationConfig, ConfigError> {
        let aspect_ratio = AspectRatio::parse(
            self.output_rules
                .aspect_ratio
                .as_deref()
                .unwrap_or(DEFAULT_ASPECT_RATIO),
        )?;
        let (target_width, target_height) =
            parse_size(self.output_rules.size.as_deref().unwrap_or(DEFAULT_SIZE))?;

        let prompt_policy = match self.prompt_policy.as_deref() {
            None => None,
            Some(p) if p.trim().eq_ignore_ascii_case("auto") => None,
            Some(p) => Some(PromptPolicy::parse(p)?),
        };

        let raw_scenes = self
            .run
            .ok_or(ConfigError::MissingField("RUN"))?
            .scenes
            .ok_or(ConfigError::MissingField("RUN.SCENES"))?;
        if raw_scenes.is_empty() {
            return Err(ConfigError::NoScenes);
        }

        let mut scenes = raw_scenes
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.into_scene(index))
            .collect::<Result<Vec<_>, _>>()?;
        assign_file_names(&mut scenes);

        Ok(GenerationConfig {
            output_rules: OutputRules {
                aspect_ratio,
                target_width,
                target_height,
                disallow: self.output_rules.disallow,
            },
            style: self.style,
            negative_prompts: self.negative_prompts,
            character_bible: self.character_bible,
            setting: self.setting,
            prompt_policy,
            scenes,
        })
    }
}

impl RawScene {
    fn into_scene(self, index: usize) -> Result<Scene, ConfigError> {
        let fallback_number = (index + 1) as u32;
        let display_number = match &self.scene_number {
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(fallback_number),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(fallback_number),
            _ => fallback_number,
        };
        let kind = self.kind.as_deref().map(PromptPolicy::parse).transpose()?;

        Ok(Scene {
            index,
            display_number,
            title: self
                .title
                .unwrap_or_else(|| format!("Scene_{}", index + 1)),
            description: self.description,
            character_refs: self.characters,
            camera: self.camera,
            kind,
            file_name: String::new(),
        })
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "OUTPUT_RULES": { "aspect_ratio": "16:9", "size": "1280x720", "disallow": ["text"] },
        "STYLE": { "photorealism": true, "color_grade": "natural warm" },
        "NEGATIVE_PROMPTS": ["cartoon"],
        "CHARACTER_BIBLE": { "Mina": { "age": 34, "appearance": "short hair" } },
        "RUN": { "SCENES": [
            { "SCENE_NUMBER": 1, "TITLE": "Clinic room", "DESCRIPTION": "A clinic", "CHARACTERS": ["Mina"], "CAMERA": {"shot": "medium shot"} },
            { "SCENE_NUMBER": "7", "TITLE": "a/b c", "DESCRIPTION": "A chart", "KIND": "illustration" },
            { "DESCRIPTION": "Untitled" }
        ] }
    }"#;

    #[test]
    fn test_parse_full_config() {
        let cfg = GenerationConfig::from_json(SAMPLE).unwrap();
        assert_eq!(cfg.output_rules.aspect_ratio, AspectRatio { width: 16, height: 9 });
        assert_eq!((cfg.output_rules.target_width, cfg.output_rules.target_height), (1280, 720));
        assert_eq!(cfg.output_rules.disallow, vec!["text".to_string()]);
        assert_eq!(cfg.scenes.len(), 3);
        assert_eq!(cfg.character_bible["Mina"].age.as_deref(), Some("34"));
        assert!(cfg.style["photorealism"].is_enabled());

        assert_eq!(cfg.scenes[1].display_number, 7);
        assert_eq!(cfg.scenes[1].kind, Some(PromptPolicy::Illustration));
        assert_eq!(cfg.scenes[2].index, 2);
        assert_eq!(cfg.scenes[2].display_number, 3);
        assert_eq!(cfg.scenes[2].title, "Scene_3");
    }

    #[test]
    fn test_defaults_when_output_rules_absent() {
        let cfg = GenerationConfig::from_json(r#"{"RUN": {"SCENES": [{"DESCRIPTION": "x"}]}}"#)
            .unwrap();
        assert_eq!(cfg.output_rules.aspect_ratio.to_string(), "16:9");
        assert_eq!(cfg.output_rules.target_width, 1920);
        assert_eq!(cfg.output_rules.target_height, 1080);
        assert!(cfg.prompt_policy.is_none());
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(matches!(
            GenerationConfig::from_json("{ not json"),
            Err(ConfigError::InvalidJson(_))
        ));
        assert!(matches!(
            GenerationConfig::from_json(r#"{"OUTPUT_RULES": {}}"#),
            Err(ConfigError::MissingField("RUN"))
        ));
        assert!(matches!(
            GenerationConfig::from_json(r#"{"RUN": {}}"#),
            Err(ConfigError::MissingField("RUN.SCENES"))
        ));
        assert!(matches!(
            GenerationConfig::from_json(r#"{"RUN": {"SCENES": []}}"#),
            Err(ConfigError::NoScenes)
        ));
        assert!(matches!(
            GenerationConfig::from_json(
                r#"{"OUTPUT_RULES": {"size": "big"}, "RUN": {"SCENES": [{}]}}"#
            ),
            Err(ConfigError::InvalidSize(_))
        ));
        assert!(matches!(
            GenerationConfig::from_json(
                r#"{"OUTPUT_RULES": {"aspect_ratio": "16:0"}, "RUN": {"SCENES": [{}]}}"#
            ),
            Err(ConfigError::InvalidAspectRatio(_))
        ));
    }

    #[test]
    fn test_scene_lookup_out_of_range() {
        let cfg = GenerationConfig::from_json(SAMPLE).unwrap();
        assert!(cfg.scene(2).is_ok());
        assert!(matches!(
            cfg.scene(3),
            Err(ConfigError::SceneIndexOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn test_output_file_name() {
        let cfg = GenerationConfig::from_json(SAMPLE).unwrap();
        assert_eq!(cfg.scenes[0].output_file_name(), "scene_01_Clinic_room.png");
        assert_eq!(cfg.scenes[1].output_file_name(), "scene_07_a_b_c.png");
        assert_eq!(sanitize_title("병원_진료실"), "병원_진료실");
    }

    #[test]
    fn test_clashing_file_names_get_index_suffix() {
        let cfg = GenerationConfig::from_json(
            r#"{"RUN": {"SCENES": [
                {"SCENE_NUMBER": 1, "TITLE": "a/b"},
                {"SCENE_NUMBER": 1, "TITLE": "a b"},
                {"SCENE_NUMBER": 2, "TITLE": "x"},
                {"SCENE_NUMBER": 2, "TITLE": "x"},
                {"SCENE_NUMBER": 1, "TITLE": "a_b_1"}
            ]}}"#,
        )
        .unwrap();
        let names: Vec<&str> = cfg.scenes.iter().map(|s| s.output_file_name()).collect();
        assert_eq!(
            names,
            vec![
                "scene_01_a_b.png",
                "scene_01_a_b_1.png",
                "scene_02_x.png",
                "scene_02_x_3.png",
                "scene_01_a_b_1_4.png",
            ]
        );
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len());
    }
}
