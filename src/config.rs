use crate::device::MediaKind;
use crate::draft::Author;
use crate::recording::RecordingOptions;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    Keyword,
    OpenAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    Placeholder,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub backend: ClassifierBackend,
    pub model: String,
    pub endpoint: String,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Keyword,
            model: "gpt-4.1-mini".to_string(),
            endpoint: "https://api.openai.com/v1/responses".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImageSection {
    pub backend: ImageBackend,
    pub model: String,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            backend: ImageBackend::Placeholder,
            model: "gpt-image-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecordingSection {
    #[serde(deserialize_with = "deserialize_duration")]
    pub tick: Duration,
    pub max_seconds: u32,
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_seconds: 300,
        }
    }
}

impl RecordingSection {
    pub fn options(&self, kind: MediaKind) -> RecordingOptions {
        RecordingOptions {
            kind,
            tick: self.tick,
            max_seconds: self.max_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserSection {
    pub id: String,
    pub display_name: String,
}

impl Default for UserSection {
    fn default() -> Self {
        Self {
            id: "me".to_string(),
            display_name: "Me".to_string(),
        }
    }
}

impl UserSection {
    pub fn author(&self) -> Author {
        Author {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VoicefeedConfig {
    pub classifier: ClassifierSection,
    pub image: ImageSection,
    pub recording: RecordingSection,
    pub user: UserSection,
}

impl VoicefeedConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("failed to parse config {} (expected TOML)", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        if config.recording.tick.is_zero() {
            anyhow::bail!("recording.tick must be greater than zero");
        }
        Ok(config)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Write a commented sample config to `path` unless one already exists.
pub fn ensure_sample_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create config directory {}", parent.display())
        })?;
    }

    let sample = r#"# voicefeed configuration (TOML)

[classifier]
# "keyword" works offline; "openai" needs OPENAI_API_KEY.
backend = "keyword"
model = "gpt-4.1-mini"
endpoint = "https://api.openai.com/v1/responses"

[image]
# "placeholder" or "openai".
backend = "placeholder"
model = "gpt-image-1"

[recording]
tick = "1s"
# Stop automatically after this many seconds. 0 disables the limit.
max_seconds = 300

[user]
id = "me"
display_name = "Me"
"#;

    std::fs::write(path, sample)
        .with_context(|| format!("failed to write sample config {}", path.display()))?;
    Ok(true)
}
