use anyhow::Result;
use directories::ProjectDirs;
use std::path::{Component, Path, PathBuf};

use crate::models::QualityTag;

/// File name every cached voice sample is stored under.
pub const SAMPLE_FILE_NAME: &str = "speaker_0.mp3";

/// On-disk layout of the studio's data directory.
#[derive(Clone, Debug)]
pub struct StudioPaths {
    root: PathBuf,
}

impl StudioPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Per-user data directory, e.g. `~/.local/share/voicestudio` on Linux.
    pub fn default_root() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "suza", "VoiceStudio")
            .ok_or_else(|| anyhow::anyhow!("Failed to get project directories"))?;
        Ok(project_dirs.data_dir().to_path_buf())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.root.join("samples")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [self.models_dir(), self.samples_dir(), self.output_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// `models/<lang>/<voice>/<filename>`. `None` if any part would escape
    /// the models directory.
    pub fn model_path(&self, language: &str, voice: &str, filename: &str) -> Option<PathBuf> {
        if ![language, voice, filename].iter().all(|p| is_plain_segment(p)) {
            return None;
        }
        Some(self.models_dir().join(language).join(voice).join(filename))
    }

    /// `samples/<lang_prefix>/<lang>/<voice>/<quality>/samples/speaker_0.mp3`.
    pub fn sample_path(&self, language: &str, voice: &str, quality: QualityTag) -> Option<PathBuf> {
        if !is_plain_segment(language) || !is_plain_segment(voice) {
            return None;
        }
        let prefix = language.split('_').next().unwrap_or(language);
        Some(
            self.samples_dir()
                .join(prefix)
                .join(language)
                .join(voice)
                .join(quality.as_str())
                .join("samples")
                .join(SAMPLE_FILE_NAME),
        )
    }
}

/// Exactly one normal path component: no separators, `.` or `..`.
pub fn is_plain_segment(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !segment.contains(['/', '\\'])
}

/// Companion config path for a model file: `<model>.json`.
pub fn config_path_for(model_path: &Path) -> PathBuf {
    let mut name = model_path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}

/// Last path segment of a URL, with query string and fragment removed.
pub fn filename_from_url(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query.rsplit('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// True when `path` is a regular file with at least one byte.
pub fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
