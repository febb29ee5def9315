// Import necessary libraries and modules for file I/O and serialization.
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};

pub const GEMINI_KEY_VAR: &str = "GEMINI_API_KEY";
pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

const GEMINI_MODELS: [&str; 4] = [
    "gemini-1.5-flash",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-pro",
];
const OPENAI_MODELS: [&str; 2] = ["gpt-4o-mini", "gpt-4o"];

// Which generative backend serves text and fallback images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    OpenAi,
}

// Define a structure to hold application settings with serialization and deserialization capabilities.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub provider: Provider,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    // Ordered candidates, fastest and cheapest first. Empty means the provider defaults.
    pub text_models: Vec<String>,
    pub utility_model: Option<String>,
    pub image_model: Option<String>,
    pub image_base_url: String,
    pub auto_save_interval: usize,
    pub save_dir: Option<PathBuf>,
    pub debug_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            provider: Provider::Gemini,
            gemini_api_key: None,
            openai_api_key: None,
            text_models: Vec::new(),
            utility_model: None,
            image_model: None,
            image_base_url: "https://pollinations.ai/p".to_string(),
            auto_save_interval: 5,
            save_dir: None,
            debug_mode: false,
        }
    }
}

/// Root of everything the game writes: `~/silverhaven/data`, or `./data` without a home.
pub fn data_dir() -> PathBuf {
    dir::home_dir()
        .map(|home| home.join("silverhaven").join("data"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

impl Settings {
    pub fn default_path() -> PathBuf {
        data_dir().join("settings.json")
    }

    // Load settings from the default path, falling back to defaults when there is no file.
    pub fn load() -> io::Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_settings_from_file(path)
    }

    pub fn load_settings_from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }

    // Environment variables win over the file.
    pub fn gemini_api_key(&self) -> Option<String> {
        key_from_env_or(GEMINI_KEY_VAR, &self.gemini_api_key)
    }

    pub fn openai_api_key(&self) -> Option<String> {
        key_from_env_or(OPENAI_KEY_VAR, &self.openai_api_key)
    }

    pub fn text_models(&self) -> Vec<String> {
        if !self.text_models.is_empty() {
            return self.text_models.clone();
        }
        let defaults: &[&str] = match self.provider {
            Provider::Gemini => &GEMINI_MODELS,
            Provider::OpenAi => &OPENAI_MODELS,
        };
        defaults.iter().map(|m| m.to_string()).collect()
    }

    pub fn utility_model(&self) -> String {
        self.utility_model
            .clone()
            .or_else(|| self.text_models().into_iter().next())
            .unwrap_or_default()
    }

    pub fn image_model(&self) -> String {
        self.image_model.clone().unwrap_or_else(|| match self.provider {
            Provider::Gemini => "gemini-2.5-flash-image".to_string(),
            Provider::OpenAi => "dall-e-3".to_string(),
        })
    }

    pub fn save_dir(&self) -> PathBuf {
        self.save_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("save"))
    }
}

fn key_from_env_or(var: &str, configured: &Option<String>) -> Option<String> {
    std::env::var(var)
        .ok()
        .or_else(|| configured.clone())
        .filter(|key| !key.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            provider: Provider::OpenAi,
            text_models: vec!["gpt-4o".into()],
            auto_save_interval: 3,
            ..Settings::default()
        };

        settings.save_to_file(&path).unwrap();
        assert_eq!(Settings::load_settings_from_file(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"provider": "openai"}"#).unwrap();
        assert_eq!(settings.auto_save_interval, 5);
        assert_eq!(settings.text_models(), vec!["gpt-4o-mini", "gpt-4o"]);
        assert_eq!(settings.utility_model(), "gpt-4o-mini");
        assert_eq!(settings.image_model(), "dall-e-3");
    }

    #[test]
    fn gemini_defaults_put_fastest_model_first() {
        let settings = Settings::default();
        assert_eq!(settings.text_models()[0], "gemini-1.5-flash");
        assert_eq!(settings.text_models().len(), 4);
        assert_eq!(settings.image_model(), "gemini-2.5-flash-image");
    }

    #[test]
    fn blank_configured_key_counts_as_missing() {
        assert_eq!(key_from_env_or("SILVERHAVEN_TEST_UNSET_VAR", &Some("  ".into())), None);
        assert_eq!(
            key_from_env_or("SILVERHAVEN_TEST_UNSET_VAR", &Some("abc".into())),
            Some("abc".to_string())
        );
    }
}
