use std::collections::BTreeMap;
use std::path::Path;

use super::types::VoiceEntry;
use crate::error::{StudioError, StudioResult};

const BUILTIN_CATALOG: &str = include_str!("../../assets/voices.json");

/// Read-only voice catalog: language tag -> voice id -> entry.
#[derive(Clone, Debug, Default)]
pub struct VoiceCatalog {
    languages: BTreeMap<String, BTreeMap<String, VoiceEntry>>,
}

impl VoiceCatalog {
    /// The Piper voices shipped with the application.
    pub fn builtin() -> StudioResult<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(json: &str) -> StudioResult<Self> {
        let languages = serde_json::from_str(json)?;
        Ok(Self { languages })
    }

    pub fn load(path: &Path) -> StudioResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StudioError::file_io(path, e))?;
        Self::from_json(&content)
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    pub fn voices(&self, language: &str) -> StudioResult<impl Iterator<Item = (&str, &VoiceEntry)>> {
        let voices = self
            .languages
            .get(language)
            .ok_or_else(|| StudioError::NotFound(format!("language '{}'", language)))?;
        Ok(voices.iter().map(|(id, entry)| (id.as_str(), entry)))
    }

    pub fn voice(&self, language: &str, voice: &str) -> StudioResult<&VoiceEntry> {
        self.languages
            .get(language)
            .and_then(|voices| voices.get(voice))
            .ok_or_else(|| StudioError::NotFound(format!("voice '{}' in '{}'", voice, language)))
    }

    /// Every (language, voice id, entry) triple.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &VoiceEntry)> {
        self.languages.iter().flat_map(|(lang, voices)| {
            voices
                .iter()
                .map(move |(id, entry)| (lang.as_str(), id.as_str(), entry))
        })
    }

    pub fn len(&self) -> usize {
        self.languages.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
