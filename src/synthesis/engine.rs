use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{StudioError, StudioResult, SynthesisError};

/// How long launching the engine and handing it the text may take.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(windows)]
const ENGINE_CANDIDATES: &[&str] = &["piper_win/piper.exe", "piper/piper.exe", "piper.exe"];
#[cfg(not(windows))]
const ENGINE_CANDIDATES: &[&str] = &["piper/piper", "piper"];

/// One "Generate" action.
#[derive(Clone, Debug)]
pub struct SynthesisRequest {
    pub model_path: PathBuf,
    pub input_text: String,
    pub output_path: PathBuf,
}

/// Wrapper around the external Piper executable.
#[derive(Clone, Debug)]
pub struct PiperEngine {
    binary: PathBuf,
    start_timeout: Duration,
}

impl PiperEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Find the engine binary: the configured path if given, otherwise the
    /// usual install locations next to the executable and in the data dir.
    pub fn locate(configured: Option<&Path>, data_dir: &Path) -> StudioResult<Self> {
        let mut possible_paths: Vec<PathBuf> = Vec::new();

        if let Some(path) = configured {
            possible_paths.push(path.to_path_buf());
        } else {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf));

            for base in exe_dir.iter().map(PathBuf::as_path).chain([data_dir]) {
                for candidate in ENGINE_CANDIDATES {
                    possible_paths.push(base.join(candidate));
                }
            }
        }

        let binary = possible_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or(StudioError::EngineNotFound {
                tried: possible_paths.clone(),
            })?;

        info!("Found synthesis engine at: {:?}", binary);
        Ok(Self::new(binary))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// The engine runs from its own directory so it can find its runtime files.
    pub fn working_dir(&self) -> PathBuf {
        self.binary
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Launch the engine and start feeding it the text.
    ///
    /// Only process startup is bounded by the start timeout. The text is
    /// written in the background, so an engine that loads its model before
    /// reading input is not mistaken for one that failed to start.
    /// Completion is observed through the returned task.
    pub async fn spawn(&self, request: &SynthesisRequest) -> StudioResult<SynthesisTask> {
        let output_path = std::path::absolute(&request.output_path)
            .map_err(|e| StudioError::file_io(&request.output_path, e))?;
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StudioError::file_io(parent, e))?;
        }
        let model_path = std::path::absolute(&request.model_path)
            .map_err(|e| StudioError::file_io(&request.model_path, e))?;

        debug!(
            "Starting {:?} --model {:?} --output_file {:?} (text via stdin)",
            self.binary, model_path, output_path
        );

        let mut command = Command::new(&self.binary);
        command
            .arg("--model")
            .arg(&model_path)
            .arg("--output_file")
            .arg(&output_path)
            .current_dir(self.working_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // A late child is dropped with the blocking task and killed on drop.
        let launch = tokio::task::spawn_blocking(move || command.spawn());
        let child = match tokio::time::timeout(self.start_timeout, launch).await {
            Ok(Ok(Ok(child))) => child,
            Ok(Ok(Err(e))) => return Err(self.launch_error(e.to_string())),
            Ok(Err(e)) => return Err(self.launch_error(format!("launch task failed: {}", e))),
            Err(_) => {
                return Err(self.launch_error(format!(
                    "engine did not start within {:?}",
                    self.start_timeout
                )))
            }
        };

        info!("Engine started, generating {:?}", output_path);
        Ok(SynthesisTask {
            output_path: output_path.clone(),
            exit: tokio::spawn(wait_for_exit(
                child,
                request.input_text.clone(),
                self.binary.clone(),
                output_path,
            )),
        })
    }

    pub async fn synthesize(&self, request: &SynthesisRequest) -> StudioResult<PathBuf> {
        self.spawn(request).await?.finish().await
    }

    fn launch_error(&self, message: String) -> StudioError {
        StudioError::ProcessLaunch {
            binary: self.binary.clone(),
            message,
        }
    }
}

/// A running engine process.
pub struct SynthesisTask {
    output_path: PathBuf,
    exit: JoinHandle<StudioResult<PathBuf>>,
}

impl SynthesisTask {
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Await the engine's exit and validate what it produced.
    pub async fn finish(self) -> StudioResult<PathBuf> {
        match self.exit.await {
            Ok(result) => result,
            Err(e) => Err(StudioError::ProcessLaunch {
                binary: PathBuf::new(),
                message: format!("engine monitor task failed: {}", e),
            }),
        }
    }
}

async fn write_text(stdin: &mut tokio::process::ChildStdin, text: &str) -> std::io::Result<()> {
    stdin.write_all(text.as_bytes()).await?;
    stdin.flush().await?;
    stdin.shutdown().await
}

async fn wait_for_exit(
    mut child: Child,
    text: String,
    binary: PathBuf,
    output_path: PathBuf,
) -> StudioResult<PathBuf> {
    let writer = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            // Dropping stdin at the end closes it: end of input for the engine.
            write_text(&mut stdin, &text).await
        })
    });
    let stderr_reader = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        })
    });

    let status = child
        .wait()
        .await
        .map_err(|e| StudioError::file_io(&output_path, e))?;

    let written = match writer {
        Some(handle) => handle.await.unwrap_or_else(|e| Err(std::io::Error::other(e))),
        None => Ok(()),
    };
    let stderr = match stderr_reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

    debug!("Engine exited with {}", status);

    let result = match written {
        // Engine gone before reading everything; its exit status says why.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            warn!("Engine closed stdin early");
            check_exit(status.success(), status.code(), stderr, &output_path).map_err(StudioError::from)
        }
        Err(e) => Err(StudioError::ProcessLaunch {
            binary,
            message: format!("failed to write text: {}", e),
        }),
        Ok(()) => check_exit(status.success(), status.code(), stderr, &output_path).map_err(StudioError::from),
    };
    if result.is_err() {
        discard_output(&output_path).await;
    }
    result
}

/// Exit code alone is not trusted: success also needs a non-empty output file.
fn check_exit(
    success: bool,
    code: Option<i32>,
    stderr: String,
    output_path: &Path,
) -> Result<PathBuf, SynthesisError> {
    if !success {
        return Err(match code {
            Some(code) => SynthesisError::ExitCode { code, stderr },
            None => SynthesisError::Terminated { stderr },
        });
    }

    match std::fs::metadata(output_path) {
        Ok(meta) if meta.len() > 0 => Ok(output_path.to_path_buf()),
        Ok(_) => Err(SynthesisError::EmptyOutput {
            path: output_path.to_path_buf(),
        }),
        Err(_) => Err(SynthesisError::MissingOutput {
            path: output_path.to_path_buf(),
        }),
    }
}

async fn discard_output(path: &Path) {
    if path.exists() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not remove failed output {:?}: {}", path, e);
        }
    }
}
