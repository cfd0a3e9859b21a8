use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::DownloadError;

/// Model fidelity tier, ordered from smallest to largest model.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityTag {
    #[serde(rename = "x_low", alias = "extra_low")]
    ExtraLow,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
}

impl QualityTag {
    pub const ALL: [QualityTag; 4] = [
        QualityTag::ExtraLow,
        QualityTag::Low,
        QualityTag::Medium,
        QualityTag::High,
    ];

    /// Tag as it appears in catalog keys and model filenames.
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTag::ExtraLow => "x_low",
            QualityTag::Low => "low",
            QualityTag::Medium => "medium",
            QualityTag::High => "high",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            QualityTag::ExtraLow => "Extra Low",
            QualityTag::Low => "Low",
            QualityTag::Medium => "Medium",
            QualityTag::High => "High",
        }
    }
}

impl Default for QualityTag {
    fn default() -> Self {
        QualityTag::Medium
    }
}

impl fmt::Display for QualityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "x_low" | "extra_low" | "xlow" => Ok(QualityTag::ExtraLow),
            "low" => Ok(QualityTag::Low),
            "medium" => Ok(QualityTag::Medium),
            "high" => Ok(QualityTag::High),
            other => Err(format!(
                "unknown quality '{}', expected one of x_low, low, medium, high",
                other
            )),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QualityUrls {
    #[serde(rename = "url")]
    pub model_url: String,
    pub config_url: String,
    /// SHA-256 of the model file, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VoiceEntry {
    #[serde(rename = "name")]
    pub display_name: String,
    /// In catalog order; the first entry is the fallback quality.
    pub qualities: IndexMap<QualityTag, QualityUrls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_url: Option<String>,
}

impl VoiceEntry {
    /// First quality listed for this voice.
    pub fn first_quality(&self) -> Option<QualityTag> {
        self.qualities.keys().next().copied()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    Running,
    Cancelled,
    Done,
    Failed,
}

/// Notification sent by a running download job.
#[derive(Debug)]
pub enum DownloadEvent {
    Progress(u8),
    Done(PathBuf),
    Failed(DownloadError),
}

#[derive(Clone, Debug)]
pub struct DownloadJob {
    pub url: String,
    pub destination: PathBuf,
    pub description: String,
    pub progress: u8,
    pub state: DownloadState,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            description: description.into(),
            progress: 0,
            state: DownloadState::Pending,
        }
    }

    /// Fold an event into the job's bookkeeping.
    pub fn apply(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Progress(p) => {
                self.state = DownloadState::Running;
                self.progress = *p;
            }
            DownloadEvent::Done(_) => {
                self.state = DownloadState::Done;
                self.progress = 100;
            }
            DownloadEvent::Failed(e) if e.is_cancelled() => self.state = DownloadState::Cancelled,
            DownloadEvent::Failed(_) => self.state = DownloadState::Failed,
        }
    }
}
