pub mod catalog;
pub mod downloader;
pub mod registry;
pub mod types;

pub use catalog::VoiceCatalog;
pub use downloader::{CancelFlag, DownloadHandle, ModelDownloader};
pub use registry::{InstalledVoice, ResolvedVoice, SampleSource, VoiceRegistry};
pub use types::{DownloadEvent, DownloadJob, DownloadState, QualityTag, QualityUrls, VoiceEntry};
