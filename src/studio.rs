use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{DownloadError, StudioError, StudioResult};
use crate::models::{
    CancelFlag, DownloadEvent, DownloadJob, ModelDownloader, QualityTag, ResolvedVoice, SampleSource,
    VoiceRegistry,
};
use crate::paths;
use crate::synthesis::{artifact, OutputArtifact, PiperEngine, SynthesisRequest};

/// Which model the next Generate uses.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub enum ModelSelection {
    CatalogVoice {
        language: String,
        voice: String,
        quality: QualityTag,
    },
    CustomModel(PathBuf),
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub enum StudioState {
    Idle,
    Downloading {
        description: String,
        /// `None` while the total size is unknown.
        progress: Option<u8>,
    },
    Synthesizing,
    Ready(OutputArtifact),
    Error(String),
}

impl StudioState {
    pub fn status_line(&self) -> String {
        match self {
            StudioState::Idle => "Ready".to_string(),
            StudioState::Downloading {
                description,
                progress: Some(p),
            } => format!("Downloading {}... {}%", description, p),
            StudioState::Downloading { description, .. } => format!("Downloading {}...", description),
            StudioState::Synthesizing => "Generating speech...".to_string(),
            StudioState::Ready(_) => "Speech generated successfully".to_string(),
            StudioState::Error(message) => format!("Error: {}", message),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, StudioState::Downloading { .. } | StudioState::Synthesizing)
    }
}

/// What the front-end is told about.
#[derive(Clone, Debug, PartialEq)]
pub enum StudioUpdate {
    State(StudioState),
    Notice(String),
}

/// Sequences "model local -> synthesize -> playable" for one user.
pub struct Studio {
    registry: Arc<VoiceRegistry>,
    downloader: ModelDownloader,
    engine: Option<PiperEngine>,
    selection: ModelSelection,
    state: StudioState,
    artifact: Option<OutputArtifact>,
    cancel: CancelFlag,
    updates: Option<mpsc::UnboundedSender<StudioUpdate>>,
}

impl Studio {
    pub fn new(registry: Arc<VoiceRegistry>, downloader: ModelDownloader, selection: ModelSelection) -> Self {
        Self {
            registry,
            downloader,
            engine: None,
            selection,
            state: StudioState::Idle,
            artifact: None,
            cancel: CancelFlag::new(),
            updates: None,
        }
    }

    pub fn with_engine(mut self, engine: PiperEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<StudioUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn registry(&self) -> &VoiceRegistry {
        &self.registry
    }

    pub fn state(&self) -> &StudioState {
        &self.state
    }

    pub fn selection(&self) -> &ModelSelection {
        &self.selection
    }

    pub fn artifact(&self) -> Option<&OutputArtifact> {
        self.artifact.as_ref()
    }

    /// Setting this flag stops the download in flight, if any.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn generate_enabled(&self, text: &str) -> bool {
        !text.trim().is_empty() && !self.state.is_busy()
    }

    pub fn playback_enabled(&self) -> bool {
        self.artifact.is_some() && !self.state.is_busy()
    }

    pub fn select_catalog_voice(&mut self, language: &str, voice: &str, quality: QualityTag) -> StudioResult<()> {
        self.registry.catalog().voice(language, voice)?;
        self.selection = ModelSelection::CatalogVoice {
            language: language.to_string(),
            voice: voice.to_string(),
            quality,
        };
        Ok(())
    }

    pub fn select_custom_model(&mut self, path: impl Into<PathBuf>) {
        self.selection = ModelSelection::CustomModel(path.into());
    }

    /// Return to `Idle` after the user has seen a result.
    pub fn acknowledge(&mut self) {
        if matches!(self.state, StudioState::Ready(_) | StudioState::Error(_)) {
            self.set_state(StudioState::Idle);
        }
    }

    /// Make sure the selected voice is local, then synthesize `text` with it.
    pub async fn generate(&mut self, text: &str) -> StudioResult<OutputArtifact> {
        if text.trim().is_empty() {
            return Err(StudioError::EmptyText);
        }
        self.cancel.reset();

        match self.run_generate(text).await {
            Ok(artifact) => {
                info!("Generated {:?}", artifact.path);
                self.artifact = Some(artifact.clone());
                self.set_state(StudioState::Ready(artifact.clone()));
                Ok(artifact)
            }
            Err(e) => {
                self.artifact = None;
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_generate(&mut self, text: &str) -> StudioResult<OutputArtifact> {
        let engine = self
            .engine
            .clone()
            .ok_or(StudioError::EngineNotFound { tried: Vec::new() })?;

        let (model_path, voice_label) = match self.selection.clone() {
            ModelSelection::CatalogVoice {
                language,
                voice,
                quality,
            } => {
                let resolved = self.resolve(&language, &voice, quality)?;
                self.ensure_installed(&resolved).await?;
                (resolved.model_path, resolved.voice)
            }
            ModelSelection::CustomModel(path) => {
                if !paths::is_nonempty_file(&path) {
                    return Err(StudioError::NotFound(format!("custom model {}", path.display())));
                }
                let label = custom_model_label(&path);
                (path, label)
            }
        };

        self.set_state(StudioState::Synthesizing);
        let request = SynthesisRequest {
            model_path,
            input_text: text.to_string(),
            output_path: artifact::next_output_path(&self.registry.paths().output_dir(), &voice_label, text),
        };
        let path = engine.synthesize(&request).await?;
        Ok(OutputArtifact::new(path, voice_label))
    }

    /// Download a catalog voice without synthesizing anything.
    pub async fn download_voice(
        &mut self,
        language: &str,
        voice: &str,
        quality: QualityTag,
    ) -> StudioResult<ResolvedVoice> {
        self.cancel.reset();
        let result = self.fetch_voice(language, voice, quality).await;
        self.settle(result)
    }

    async fn fetch_voice(&mut self, language: &str, voice: &str, quality: QualityTag) -> StudioResult<ResolvedVoice> {
        let resolved = self.resolve(language, voice, quality)?;
        self.ensure_installed(&resolved).await?;
        Ok(resolved)
    }

    /// Local path of a voice sample, fetching it into the sample cache first
    /// when only the remote copy exists.
    pub async fn sample(&mut self, language: &str, voice: &str, quality: QualityTag) -> StudioResult<PathBuf> {
        self.cancel.reset();
        let result = self.fetch_sample(language, voice, quality).await;
        self.settle(result)
    }

    async fn fetch_sample(&mut self, language: &str, voice: &str, quality: QualityTag) -> StudioResult<PathBuf> {
        match self.registry.sample_source(language, voice, quality)? {
            SampleSource::Local(path) => Ok(path),
            SampleSource::Remote { url, cache_path } => {
                let description = format!("{} sample", self.registry.catalog().voice(language, voice)?.display_name);
                self.download(DownloadJob::new(url, cache_path, description), None).await
            }
        }
    }

    /// Copy the current output to `destination`. Returns bytes copied.
    pub async fn save_artifact(&self, destination: &Path) -> StudioResult<u64> {
        let artifact = self.artifact.as_ref().ok_or_else(|| {
            StudioError::file_io(
                destination,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no generated audio to save"),
            )
        })?;

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StudioError::file_io(parent, e))?;
        }
        let copied = tokio::fs::copy(&artifact.path, destination)
            .await
            .map_err(|e| StudioError::file_io(destination, e))?;
        info!("Saved {:?} to {:?}", artifact.path, destination);
        Ok(copied)
    }

    fn resolve(&mut self, language: &str, voice: &str, quality: QualityTag) -> StudioResult<ResolvedVoice> {
        let resolved = self.registry.resolve(language, voice, quality)?;
        if let Some((requested, effective)) = resolved.substitution() {
            self.notice(format!(
                "{} quality is not available for {}, using {} instead",
                requested.display_name(),
                resolved.display_name,
                effective.display_name()
            ));
        }
        Ok(resolved)
    }

    /// Fetch whichever of model and config is missing, model first.
    async fn ensure_installed(&mut self, voice: &ResolvedVoice) -> StudioResult<()> {
        if !paths::is_nonempty_file(&voice.model_path) {
            let job = DownloadJob::new(
                voice.urls.model_url.clone(),
                voice.model_path.clone(),
                voice.display_name.clone(),
            );
            self.download(job, voice.urls.sha256.clone()).await?;
        } else {
            debug!("Model already present at {:?}", voice.model_path);
        }

        if !paths::is_nonempty_file(&voice.config_path) {
            let job = DownloadJob::new(
                voice.urls.config_url.clone(),
                voice.config_path.clone(),
                format!("{} config", voice.display_name),
            );
            self.download(job, None).await?;
        }
        Ok(())
    }

    async fn download(&mut self, job: DownloadJob, checksum: Option<String>) -> StudioResult<PathBuf> {
        let description = job.description.clone();
        let url = job.url.clone();
        let mut handle = self.downloader.start(job, checksum, self.cancel.clone());

        self.set_state(StudioState::Downloading {
            description: description.clone(),
            progress: None,
        });

        while let Some(event) = handle.next_event().await {
            match event {
                DownloadEvent::Progress(p) => self.set_state(StudioState::Downloading {
                    description: description.clone(),
                    progress: Some(p),
                }),
                DownloadEvent::Done(path) => return Ok(path),
                DownloadEvent::Failed(e) => return Err(e.into()),
            }
        }

        Err(DownloadError::Network {
            url,
            message: "download task ended without a result".to_string(),
        }
        .into())
    }

    fn settle<T>(&mut self, result: StudioResult<T>) -> StudioResult<T> {
        match &result {
            Ok(_) => self.set_state(StudioState::Idle),
            Err(e) => self.fail(e),
        }
        result
    }

    fn fail(&mut self, error: &StudioError) {
        warn!("{}", error);
        self.set_state(StudioState::Error(error.to_string()));
    }

    fn set_state(&mut self, state: StudioState) {
        debug!("Studio state: {}", state.status_line());
        if let Some(updates) = &self.updates {
            let _ = updates.send(StudioUpdate::State(state.clone()));
        }
        self.state = state;
    }

    fn notice(&self, message: String) {
        info!("{}", message);
        if let Some(updates) = &self.updates {
            let _ = updates.send(StudioUpdate::Notice(message));
        }
    }
}

/// Output name prefix for a model picked from disk.
fn custom_model_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "custom".to_string())
}
