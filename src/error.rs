use std::path::PathBuf;

/// Why a single download job ended without producing its file.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("cancelled")]
    Cancelled,

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("server returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("server returned an empty body for {url}")]
    EmptyBody { url: String },

    #[error("checksum mismatch for {path:?}: expected {expected}, got {actual}")]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

/// Failures observed after the engine process was started.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("engine exited with code {code}{}", stderr_suffix(.stderr))]
    ExitCode { code: i32, stderr: String },

    #[error("engine was terminated without an exit code{}", stderr_suffix(.stderr))]
    Terminated { stderr: String },

    #[error("engine reported success, but output file is empty ({path:?})")]
    EmptyOutput { path: PathBuf },

    #[error("engine reported success, but output file is missing ({path:?})")]
    MissingOutput { path: PathBuf },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nengine stderr: {stderr}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("download failed: {0}")]
    Network(#[from] DownloadError),

    #[error("failed to start engine {binary:?}: {message}")]
    ProcessLaunch { binary: PathBuf, message: String },

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("file error at {path:?}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("playback error: {0}")]
    Playback(String),

    #[error("no text to synthesize")]
    EmptyText,

    #[error("synthesis engine not found. Tried:\n{}", format_candidates(.tried))]
    EngineNotFound { tried: Vec<PathBuf> },

    #[error("invalid voice catalog: {0}")]
    Catalog(#[from] serde_json::Error),
}

fn format_candidates(tried: &[PathBuf]) -> String {
    tried
        .iter()
        .map(|p| format!("  - {:?}", p))
        .collect::<Vec<_>>()
        .join("\n")
}

impl StudioError {
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StudioError::FileIo {
            path: path.into(),
            source,
        }
    }
}

pub type StudioResult<T> = Result<T, StudioError>;
