use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::QualityTag;

fn default_start_timeout_secs() -> u64 {
    5
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StudioPreferences {
    pub engine_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub language: Option<String>,
    pub voice: Option<String>,
    #[serde(default)]
    pub quality: QualityTag,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
}

impl Default for StudioPreferences {
    fn default() -> Self {
        Self {
            engine_path: None,
            data_dir: None, // None means the per-user data directory
            language: None,
            voice: None,
            quality: QualityTag::default(),
            start_timeout_secs: default_start_timeout_secs(),
        }
    }
}

impl StudioPreferences {
    /// Last catalog voice, if one was ever chosen.
    pub fn last_voice(&self) -> Option<(&str, &str, QualityTag)> {
        match (&self.language, &self.voice) {
            (Some(language), Some(voice)) => Some((language.as_str(), voice.as_str(), self.quality)),
            _ => None,
        }
    }
}

pub struct PreferencesManager {
    preferences: Arc<RwLock<StudioPreferences>>,
    config_path: PathBuf,
}

impl PreferencesManager {
    pub fn new() -> Result<Self> {
        let project_dirs = directories::ProjectDirs::from("com", "suza", "VoiceStudio")
            .ok_or_else(|| anyhow::anyhow!("Failed to get project directories"))?;

        let config_dir = project_dirs.config_dir();
        std::fs::create_dir_all(config_dir)
            .with_context(|| format!("creating {}", config_dir.display()))?;

        Self::with_path(config_dir.join("preferences.json"))
    }

    /// Load (or start fresh) from an explicit file.
    pub fn with_path(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();

        // A corrupt file falls back to defaults rather than blocking startup
        let preferences = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable preferences {:?}: {}", config_path, e);
                StudioPreferences::default()
            })
        } else {
            StudioPreferences::default()
        };

        Ok(Self {
            preferences: Arc::new(RwLock::new(preferences)),
            config_path,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub async fn get_preferences(&self) -> StudioPreferences {
        self.preferences.read().await.clone()
    }

    pub async fn set_last_voice(&self, language: &str, voice: &str, quality: QualityTag) -> Result<()> {
        let mut prefs = self.preferences.write().await;
        prefs.language = Some(language.to_string());
        prefs.voice = Some(voice.to_string());
        prefs.quality = quality;
        self.save(&prefs).await
    }

    pub async fn set_engine_path(&self, path: Option<PathBuf>) -> Result<()> {
        let mut prefs = self.preferences.write().await;
        prefs.engine_path = path;
        self.save(&prefs).await
    }

    pub async fn set_data_dir(&self, path: Option<PathBuf>) -> Result<()> {
        let mut prefs = self.preferences.write().await;
        prefs.data_dir = path;
        self.save(&prefs).await
    }

    async fn save(&self, prefs: &StudioPreferences) -> Result<()> {
        let json = serde_json::to_string_pretty(prefs)?;
        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.config_path, json)
            .await
            .with_context(|| format!("writing {}", self.config_path.display()))?;
        debug!("Saved preferences to {:?}", self.config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_voice_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let manager = PreferencesManager::with_path(&path).unwrap();
        assert_eq!(manager.get_preferences().await, StudioPreferences::default());
        manager.set_last_voice("en_GB", "alba", QualityTag::Low).await.unwrap();
        manager.set_engine_path(Some("/opt/piper/piper".into())).await.unwrap();
        manager.set_data_dir(Some(dir.path().join("data"))).await.unwrap();

        let reloaded = PreferencesManager::with_path(&path).unwrap().get_preferences().await;
        assert_eq!(reloaded.last_voice(), Some(("en_GB", "alba", QualityTag::Low)));
        assert_eq!(reloaded.engine_path, Some(PathBuf::from("/opt/piper/piper")));
        assert_eq!(reloaded.data_dir, Some(dir.path().join("data")));
        assert_eq!(reloaded.start_timeout_secs, 5);
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "{not json").unwrap();

        let manager = PreferencesManager::with_path(&path).unwrap();
        assert_eq!(manager.get_preferences().await, StudioPreferences::default());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let prefs: StudioPreferences = serde_json::from_str(r#"{"voice": "amy"}"#).unwrap();
        assert_eq!(prefs.quality, QualityTag::Medium);
        assert_eq!(prefs.start_timeout_secs, 5);
        assert_eq!(prefs.last_voice(), None);
    }
}
