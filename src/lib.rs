//! Terminal studio for the Piper text-to-speech engine: voice catalog,
//! on-demand model downloads, synthesis through the external `piper`
//! executable and playback of the result.

pub mod audio;
pub mod error;
pub mod models;
pub mod paths;
pub mod preferences;
pub mod studio;
pub mod synthesis;

pub use error::{DownloadError, StudioError, StudioResult, SynthesisError};
pub use paths::StudioPaths;
pub use studio::{ModelSelection, Studio, StudioState, StudioUpdate};
