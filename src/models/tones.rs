use anyhow::{Context as _, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const MAX_LABEL_LENGTH: usize = 32;
const ORIGINAL_TEXT_PLACEHOLDER: &str = "{original_text}";
const CHARACTERISTICS_PLACEHOLDER: &str = "{characteristics}";

/// Name of a tone preset, e.g. `gentle`. Lowercase ascii, digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ToneLabel(String);

impl ToneLabel {
    pub fn new(label: &str) -> anyhow::Result<Self> {
        let label = label.trim();
        if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
            bail!("tone label must be 1-{MAX_LABEL_LENGTH} characters, got {label:?}");
        }
        let valid = label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
        if !valid {
            bail!("tone label {label:?} may only contain a-z, 0-9, '_' and '-'");
        }
        Ok(Self(label.to_owned()))
    }

    /// Labels read back from the store were validated when written.
    pub(crate) fn from_stored(label: String) -> Self {
        Self(label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToneLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generated text per tone. Always produced and persisted as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ToneVariants(BTreeMap<ToneLabel, String>);

impl ToneVariants {
    pub(crate) fn from_stored(stored: BTreeMap<String, String>) -> Self {
        stored
            .into_iter()
            .map(|(label, text)| (ToneLabel::from_stored(label), text))
            .collect()
    }

    pub fn to_stored(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(label, text)| (label.as_str().to_owned(), text.clone()))
            .collect()
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(candidate, _)| candidate.as_str() == label)
            .map(|(_, text)| text.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ToneLabel, &str)> {
        self.0.iter().map(|(label, text)| (label, text.as_str()))
    }
}

impl FromIterator<(ToneLabel, String)> for ToneVariants {
    fn from_iter<I: IntoIterator<Item = (ToneLabel, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelConfig {
    pub name: String,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "claude-3-haiku-20240307".to_owned(),
            max_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToneDefinition {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub characteristics: Vec<String>,
    pub instruction_template: String,
    /// Overrides the catalog-wide model for this tone only.
    #[serde(default)]
    pub ai_model: Option<ModelConfig>,
}

impl ToneDefinition {
    fn render(&self, original_text: &str) -> String {
        let characteristics = self
            .characteristics
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.instruction_template
            .replace(CHARACTERISTICS_PLACEHOLDER, &characteristics)
            .replace(ORIGINAL_TEXT_PLACEHOLDER, original_text)
    }
}

#[derive(Deserialize)]
struct ToneConfigDocument {
    #[serde(default)]
    system_role: String,
    #[serde(default)]
    ai_model: ModelConfig,
    tones: BTreeMap<String, ToneDefinition>,
}

/// The tone vocabulary plus everything needed to build a prompt per tone.
#[derive(Debug, Clone)]
pub struct ToneConfig {
    pub system_role: String,
    pub ai_model: ModelConfig,
    pub tones: BTreeMap<ToneLabel, ToneDefinition>,
}

/// One unit of fan-out work: a fully rendered prompt for a single tone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TonePrompt {
    pub label: ToneLabel,
    pub prompt: String,
    pub model: ModelConfig,
}

impl ToneConfig {
    pub fn from_yaml(document: &str) -> anyhow::Result<Self> {
        let document: ToneConfigDocument =
            serde_yaml::from_str(document).context("failed to parse tone config")?;
        let mut tones = BTreeMap::new();
        for (label, tone) in document.tones {
            let label = ToneLabel::new(&label)?;
            if !tone.instruction_template.contains(ORIGINAL_TEXT_PLACEHOLDER) {
                bail!("instruction_template of tone `{label}` must contain {ORIGINAL_TEXT_PLACEHOLDER}");
            }
            tones.insert(label, tone);
        }
        if tones.is_empty() {
            bail!("tone config defines no tones");
        }
        Ok(Self {
            system_role: document.system_role,
            ai_model: document.ai_model,
            tones,
        })
    }

    pub fn builtin() -> Self {
        const PRESETS: [(&str, &str, &str); 3] = [
            (
                "gentle",
                "Gentle",
                "a gentle, warm tone that is as considerate of the reader's feelings as possible",
            ),
            (
                "constructive",
                "Constructive",
                "a constructive, forward-looking tone that focuses on solutions",
            ),
            (
                "casual",
                "Casual",
                "a friendly, casual tone that keeps things light",
            ),
        ];
        let tones = PRESETS
            .into_iter()
            .map(|(label, display_name, style)| {
                let tone = ToneDefinition {
                    display_name: display_name.to_owned(),
                    description: String::new(),
                    characteristics: Vec::new(),
                    instruction_template: format!(
                        "Rewrite the following message in {style}. \
                         Reply with the rewritten message only.\n\n\
                         Original message: {ORIGINAL_TEXT_PLACEHOLDER}"
                    ),
                    ai_model: None,
                };
                (ToneLabel::from_stored(label.to_owned()), tone)
            })
            .collect();
        Self {
            system_role: "You are a communication coach who helps people say difficult things kindly."
                .to_owned(),
            ai_model: ModelConfig::default(),
            tones,
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &ToneLabel> {
        self.tones.keys()
    }

    pub fn label(&self, label: &str) -> Option<&ToneLabel> {
        self.tones.keys().find(|candidate| candidate.as_str() == label)
    }

    /// Display names by label, for tone pickers.
    pub fn available_tones(&self) -> BTreeMap<String, String> {
        self.tones
            .iter()
            .map(|(label, tone)| (label.to_string(), tone.display_name.clone()))
            .collect()
    }

    pub fn prompts(&self, original_text: &str) -> Vec<TonePrompt> {
        self.tones
            .iter()
            .map(|(label, tone)| {
                let instruction = tone.render(original_text);
                let prompt = match self.system_role.is_empty() {
                    true => instruction,
                    false => format!("{}\n\n{instruction}", self.system_role),
                };
                TonePrompt {
                    label: label.clone(),
                    prompt,
                    model: tone.ai_model.clone().unwrap_or_else(|| self.ai_model.clone()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
system_role: You are a careful editor.
ai_model:
  name: claude-test
  max_tokens: 400
tones:
  gentle:
    display_name: Gentle
    characteristics:
      - warm
      - patient
    instruction_template: |
      Be {characteristics}
      Rewrite: {original_text}
  blunt-ish:
    display_name: Slightly blunt
    instruction_template: "Keep it short: {original_text}"
    ai_model:
      name: claude-small
      max_tokens: 100
"#;

    #[test]
    fn prompts_combine_preamble_characteristics_and_text() {
        let config = ToneConfig::from_yaml(DOCUMENT).unwrap();
        let prompts = config.prompts("I can't make the meeting.");
        assert_eq!(prompts.len(), 2);

        let gentle = prompts.iter().find(|p| p.label.as_str() == "gentle").unwrap();
        assert!(gentle.prompt.starts_with("You are a careful editor.\n\n"));
        assert!(gentle.prompt.contains("- warm\n- patient"));
        assert!(gentle.prompt.contains("Rewrite: I can't make the meeting."));
        assert_eq!(gentle.model.name, "claude-test");
    }

    #[test]
    fn per_tone_model_overrides_catalog_default() {
        let config = ToneConfig::from_yaml(DOCUMENT).unwrap();
        let prompts = config.prompts("x");
        let blunt = prompts.iter().find(|p| p.label.as_str() == "blunt-ish").unwrap();
        assert_eq!(blunt.model.name, "claude-small");
        assert_eq!(blunt.model.max_tokens, 100);
    }

    #[test]
    fn rejects_templates_without_the_original_text() {
        let document = r#"
tones:
  gentle:
    display_name: Gentle
    instruction_template: "Be nice."
"#;
        assert!(ToneConfig::from_yaml(document).is_err());
    }

    #[test]
    fn rejects_malformed_labels_and_empty_catalogs() {
        let document = r#"
tones:
  "Gentle Tone":
    display_name: Gentle
    instruction_template: "{original_text}"
"#;
        assert!(ToneConfig::from_yaml(document).is_err());
        assert!(ToneConfig::from_yaml("tones: {}").is_err());
    }

    #[test]
    fn builtin_catalog_has_the_three_default_tones() {
        let config = ToneConfig::builtin();
        let labels: Vec<_> = config.labels().map(ToneLabel::as_str).collect();
        assert_eq!(labels, ["casual", "constructive", "gentle"]);
        for prompt in config.prompts("hello") {
            assert!(prompt.prompt.contains("Original message: hello"));
        }
    }

    #[test]
    fn variants_lookup_by_label() {
        let variants: ToneVariants = [
            (ToneLabel::new("gentle").unwrap(), "soft".to_owned()),
            (ToneLabel::new("casual").unwrap(), "chill".to_owned()),
        ]
        .into_iter()
        .collect();
        assert_eq!(variants.get("gentle"), Some("soft"));
        assert_eq!(variants.get("constructive"), None);
        assert_eq!(variants.to_stored().len(), 2);
    }
}
