use std::path::PathBuf;
use std::sync::Arc;

use super::catalog::VoiceCatalog;
use super::types::{QualityTag, QualityUrls, VoiceEntry};
use crate::error::{StudioError, StudioResult};
use crate::paths::{self, StudioPaths};

/// A catalog voice pinned to one quality and to its local file locations.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedVoice {
    pub language: String,
    pub voice: String,
    pub display_name: String,
    pub requested_quality: QualityTag,
    pub quality: QualityTag,
    pub urls: QualityUrls,
    pub model_path: PathBuf,
    pub config_path: PathBuf,
}

impl ResolvedVoice {
    /// `Some((requested, effective))` when the requested quality was not offered.
    pub fn substitution(&self) -> Option<(QualityTag, QualityTag)> {
        (self.requested_quality != self.quality).then_some((self.requested_quality, self.quality))
    }

    pub fn is_installed(&self) -> bool {
        paths::is_nonempty_file(&self.model_path) && paths::is_nonempty_file(&self.config_path)
    }
}

/// Where a voice sample can be played from.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleSource {
    Local(PathBuf),
    Remote { url: String, cache_path: PathBuf },
}

#[derive(Clone, Debug)]
pub struct InstalledVoice {
    pub language: String,
    pub voice: String,
    pub quality: QualityTag,
    pub model_path: PathBuf,
}

pub struct VoiceRegistry {
    catalog: Arc<VoiceCatalog>,
    paths: StudioPaths,
}

impl VoiceRegistry {
    pub fn new(catalog: Arc<VoiceCatalog>, paths: StudioPaths) -> Self {
        Self { catalog, paths }
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    pub fn paths(&self) -> &StudioPaths {
        &self.paths
    }

    pub fn resolve(
        &self,
        language: &str,
        voice: &str,
        requested: QualityTag,
    ) -> StudioResult<ResolvedVoice> {
        let entry = self.catalog.voice(language, voice)?;

        let (quality, urls) = match entry.qualities.get(&requested) {
            Some(urls) => (requested, urls),
            None => entry
                .qualities
                .first()
                .map(|(q, urls)| (*q, urls))
                .ok_or_else(|| {
                    StudioError::NotFound(format!("no model qualities listed for '{}'", voice))
                })?,
        };

        let model_path = self.model_path(language, voice, &urls.model_url)?;

        Ok(ResolvedVoice {
            language: language.to_string(),
            voice: voice.to_string(),
            display_name: entry.display_name.clone(),
            requested_quality: requested,
            quality,
            urls: urls.clone(),
            config_path: paths::config_path_for(&model_path),
            model_path,
        })
    }

    fn model_path(&self, language: &str, voice: &str, model_url: &str) -> StudioResult<PathBuf> {
        paths::filename_from_url(model_url)
            .and_then(|filename| self.paths.model_path(language, voice, filename))
            .ok_or_else(|| {
                StudioError::NotFound(format!(
                    "no usable model file name for '{}' in '{}' ({})",
                    voice, language, model_url
                ))
            })
    }

    /// Every catalog voice/quality whose model and config are both on disk.
    pub fn installed_voices(&self) -> Vec<InstalledVoice> {
        self.catalog
            .iter()
            .flat_map(|(lang, id, entry)| {
                entry.qualities.keys().filter_map(move |q| {
                    let resolved = self.resolve(lang, id, *q).ok()?;
                    resolved.is_installed().then(|| InstalledVoice {
                        language: resolved.language,
                        voice: resolved.voice,
                        quality: resolved.quality,
                        model_path: resolved.model_path,
                    })
                })
            })
            .collect()
    }

    /// Remove a voice's model and config. Returns whether anything was deleted.
    pub async fn delete_voice(&self, voice: &ResolvedVoice) -> StudioResult<bool> {
        let mut removed = false;
        for path in [&voice.model_path, &voice.config_path] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StudioError::file_io(path.as_path(), e)),
            }
        }
        Ok(removed)
    }

    /// Cached local sample if present, otherwise the catalog's sample URL.
    pub fn sample_source(
        &self,
        language: &str,
        voice: &str,
        quality: QualityTag,
    ) -> StudioResult<SampleSource> {
        let entry: &VoiceEntry = self.catalog.voice(language, voice)?;
        let cache_path = self.paths.sample_path(language, voice, quality).ok_or_else(|| {
            StudioError::NotFound(format!("no sample location for '{}' in '{}'", voice, language))
        })?;

        if paths::is_nonempty_file(&cache_path) {
            return Ok(SampleSource::Local(cache_path));
        }

        match &entry.sample_url {
            Some(url) => Ok(SampleSource::Remote {
                url: url.clone(),
                cache_path,
            }),
            None => Err(StudioError::NotFound(format!("no sample available for '{}'", voice))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(root: &std::path::Path) -> VoiceRegistry {
        VoiceRegistry::new(
            Arc::new(VoiceCatalog::builtin().unwrap()),
            StudioPaths::new(root),
        )
    }

    #[test]
    fn every_builtin_voice_resolves_inside_models_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let models_dir = registry.paths().models_dir();

        for (lang, id, entry) in registry.catalog().iter() {
            for quality in QualityTag::ALL {
                let resolved = registry.resolve(lang, id, quality).unwrap();
                assert!(resolved.model_path.starts_with(&models_dir));
                let expected = paths::filename_from_url(&entry.qualities[&resolved.quality].model_url).unwrap();
                assert_eq!(resolved.model_path.file_name().unwrap(), expected);
                assert!(!expected.contains('?'));
            }
        }
    }

    #[test]
    fn missing_quality_falls_back_to_first_listed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        // amy lists medium before low
        let resolved = registry.resolve("en_US", "amy", QualityTag::High).unwrap();
        assert_eq!(resolved.quality, QualityTag::Medium);
        assert_eq!(resolved.substitution(), Some((QualityTag::High, QualityTag::Medium)));
        assert!(resolved.model_path.ends_with("en_US/amy/en_US-amy-medium.onnx"));

        let exact = registry.resolve("en_US", "amy", QualityTag::Low).unwrap();
        assert_eq!(exact.substitution(), None);
        assert_eq!(
            exact.config_path.file_name().unwrap(),
            "en_US-amy-low.onnx.json"
        );
    }

    #[test]
    fn fallback_follows_catalog_order_not_tag_order() {
        let json = r#"{
            "en_US": {
                "joe": {"name": "Joe", "qualities": {
                    "high": {"url": "https://h/joe-high.onnx", "config_url": "https://h/joe-high.onnx.json"},
                    "x_low": {"url": "https://h/joe-x_low.onnx", "config_url": "https://h/joe-x_low.onnx.json"}
                }}
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let registry = VoiceRegistry::new(
            Arc::new(VoiceCatalog::from_json(json).unwrap()),
            StudioPaths::new(dir.path()),
        );

        let resolved = registry.resolve("en_US", "joe", QualityTag::Medium).unwrap();
        assert_eq!(resolved.quality, QualityTag::High);
        assert!(resolved.model_path.ends_with("joe-high.onnx"));
    }

    #[test]
    fn unknown_voice_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        assert!(matches!(
            registry.resolve("en_US", "nobody", QualityTag::Medium),
            Err(StudioError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve("fr_FR", "amy", QualityTag::Medium),
            Err(StudioError::NotFound(_))
        ));
    }

    #[test]
    fn hostile_catalog_entries_cannot_escape_models_dir() {
        let json = r#"{
            "en_US": {
                "..": {"name": "Up", "qualities": {"low": {"url": "https://h/a.onnx", "config_url": "https://h/a.onnx.json"}}},
                "evil": {"name": "Evil", "qualities": {"low": {"url": "https://h/", "config_url": "https://h/x.json"}}}
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let registry = VoiceRegistry::new(
            Arc::new(VoiceCatalog::from_json(json).unwrap()),
            StudioPaths::new(dir.path()),
        );
        assert!(matches!(registry.resolve("en_US", "..", QualityTag::Low), Err(StudioError::NotFound(_))));
        assert!(matches!(registry.resolve("en_US", "evil", QualityTag::Low), Err(StudioError::NotFound(_))));
    }

    #[test]
    fn installed_requires_model_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let resolved = registry.resolve("en_GB", "alan", QualityTag::Medium).unwrap();
        assert!(!resolved.is_installed());

        std::fs::create_dir_all(resolved.model_path.parent().unwrap()).unwrap();
        std::fs::write(&resolved.model_path, b"onnx").unwrap();
        assert!(!resolved.is_installed());

        std::fs::write(&resolved.config_path, b"{}").unwrap();
        assert!(resolved.is_installed());

        let installed = registry.installed_voices();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].voice, "alan");
    }

    #[tokio::test]
    async fn delete_voice_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let resolved = registry.resolve("en_GB", "alba", QualityTag::Medium).unwrap();
        std::fs::create_dir_all(resolved.model_path.parent().unwrap()).unwrap();
        std::fs::write(&resolved.model_path, b"onnx").unwrap();
        std::fs::write(&resolved.config_path, b"{}").unwrap();

        assert!(registry.delete_voice(&resolved).await.unwrap());
        assert!(!resolved.model_path.exists());
        assert!(!resolved.config_path.exists());
        assert!(!registry.delete_voice(&resolved).await.unwrap());
    }

    #[test]
    fn sample_prefers_local_cache() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let remote = registry.sample_source("en_US", "amy", QualityTag::Medium).unwrap();
        let cache_path = match remote {
            SampleSource::Remote { url, cache_path } => {
                assert!(url.ends_with("amy/medium.mp3"));
                cache_path
            }
            other => panic!("expected remote sample, got {:?}", other),
        };

        std::fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
        std::fs::write(&cache_path, b"mp3").unwrap();
        assert_eq!(
            registry.sample_source("en_US", "amy", QualityTag::Medium).unwrap(),
            SampleSource::Local(cache_path)
        );
    }
}
