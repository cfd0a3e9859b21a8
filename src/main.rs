use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voicestudio::audio::{PlaybackController, PlaybackState};
use voicestudio::models::{CancelFlag, ModelDownloader, QualityTag, VoiceCatalog, VoiceRegistry};
use voicestudio::preferences::{PreferencesManager, StudioPreferences};
use voicestudio::synthesis::PiperEngine;
use voicestudio::{ModelSelection, Studio, StudioError, StudioPaths, StudioState, StudioUpdate};

const DEFAULT_LANGUAGE: &str = "en_US";
const DEFAULT_VOICE: &str = "amy";

#[derive(Parser)]
#[command(name = "voicestudio", version, about = "Text-to-speech studio for the Piper engine")]
struct Cli {
    /// Where models, samples and generated audio live
    #[arg(long, global = true, env = "VOICESTUDIO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to the piper executable
    #[arg(long, global = true, env = "VOICESTUDIO_ENGINE")]
    engine: Option<PathBuf>,

    /// Voice catalog JSON to use instead of the built-in one
    #[arg(long, global = true, env = "VOICESTUDIO_CATALOG")]
    catalog: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Default)]
struct VoiceArgs {
    /// Language tag, e.g. en_US
    #[arg(short, long)]
    language: Option<String>,

    /// Voice id within the language, e.g. amy
    #[arg(long)]
    voice: Option<String>,

    /// x_low, low, medium or high
    #[arg(short, long)]
    quality: Option<QualityTag>,
}

#[derive(Subcommand)]
enum Command {
    /// List catalog voices
    Voices {
        #[arg(short, long)]
        language: Option<String>,
        /// Only voices whose model and config are on disk
        #[arg(long)]
        installed: bool,
    },
    /// Download a voice model and its config
    Download(VoiceArgs),
    /// Delete a downloaded voice
    Remove(VoiceArgs),
    /// Synthesize text to a WAV file
    Generate {
        #[command(flatten)]
        voice: VoiceArgs,
        /// Text to speak; read from stdin when neither --text nor --text-file is given
        #[arg(short, long, conflicts_with = "text_file")]
        text: Option<String>,
        #[arg(long)]
        text_file: Option<PathBuf>,
        /// Use a local .onnx model instead of a catalog voice
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Copy the result here as well
        #[arg(short, long)]
        save: Option<PathBuf>,
        /// Play the result when done
        #[arg(short, long)]
        play: bool,
    },
    /// Play a voice's sample
    Sample(VoiceArgs),
    /// Play an audio file
    Play { file: PathBuf },
    /// Interactive session: type text to speak it, `:help` for commands
    Studio(VoiceArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let preferences = PreferencesManager::new()?;
    let stored = preferences.get_preferences().await;
    info!("Preferences loaded from {:?}", preferences.config_path());

    let data_dir = match cli.data_dir.clone().or_else(|| stored.data_dir.clone()) {
        Some(dir) => dir,
        None => StudioPaths::default_root()?,
    };
    if cli.data_dir.is_some() && stored.data_dir.as_ref() != Some(&data_dir) {
        preferences.set_data_dir(Some(data_dir.clone())).await?;
    }
    let paths = StudioPaths::new(data_dir);
    paths
        .ensure()
        .with_context(|| format!("creating data directory {}", paths.root().display()))?;
    info!("Data directory: {:?}", paths.root());

    let catalog = match &cli.catalog {
        Some(path) => VoiceCatalog::load(path)
            .with_context(|| format!("loading voice catalog {}", path.display()))?,
        None => VoiceCatalog::builtin()?,
    };
    let registry = Arc::new(VoiceRegistry::new(Arc::new(catalog), paths));

    match cli.command {
        Command::Voices { language, installed } => {
            list_voices(&registry, language.as_deref(), installed)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Remove(args) => {
            let (language, voice, quality) = pick_voice(&args, &stored);
            let resolved = registry.resolve(&language, &voice, quality)?;
            if registry.delete_voice(&resolved).await? {
                println!("Removed {} ({})", resolved.display_name, resolved.quality.display_name());
            } else {
                println!("{} ({}) is not installed", resolved.display_name, resolved.quality.display_name());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Play { file } => {
            let player = PlaybackController::new()?;
            play_to_end(&player, &file).await?;
            Ok(ExitCode::SUCCESS)
        }
        command => {
            let engine = match &command {
                Command::Generate { .. } | Command::Studio(_) => {
                    Some(locate_engine(cli.engine.as_deref(), &stored, &preferences, &registry).await?)
                }
                _ => None,
            };
            run_studio_command(command, registry, engine, &stored, &preferences).await
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("voicestudio={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// CLI flags win over the last stored voice, which wins over the default.
fn pick_voice(args: &VoiceArgs, stored: &StudioPreferences) -> (String, String, QualityTag) {
    let (last_language, last_voice, last_quality) = stored
        .last_voice()
        .unwrap_or((DEFAULT_LANGUAGE, DEFAULT_VOICE, stored.quality));
    (
        args.language.clone().unwrap_or_else(|| last_language.to_string()),
        args.voice.clone().unwrap_or_else(|| last_voice.to_string()),
        args.quality.unwrap_or(last_quality),
    )
}

async fn locate_engine(
    flag: Option<&Path>,
    stored: &StudioPreferences,
    preferences: &PreferencesManager,
    registry: &VoiceRegistry,
) -> Result<PiperEngine> {
    let configured = flag.or(stored.engine_path.as_deref());
    let engine = PiperEngine::locate(configured, registry.paths().root())?
        .with_start_timeout(Duration::from_secs(stored.start_timeout_secs));

    if flag.is_some() && stored.engine_path.as_deref() != Some(engine.binary()) {
        preferences.set_engine_path(Some(engine.binary().to_path_buf())).await?;
    }
    Ok(engine)
}

fn list_voices(registry: &VoiceRegistry, language: Option<&str>, installed_only: bool) -> Result<()> {
    let installed = registry.installed_voices();

    if let Some(language) = language {
        // Fail on an unknown language instead of printing nothing.
        let _ = registry.catalog().voices(language)?;
    }

    for (lang, id, entry) in registry.catalog().iter() {
        if language.is_some_and(|l| l != lang) {
            continue;
        }
        let local: Vec<&str> = installed
            .iter()
            .filter(|v| v.language == lang && v.voice == id)
            .map(|v| v.quality.as_str())
            .collect();
        if installed_only && local.is_empty() {
            continue;
        }

        let qualities: Vec<&str> = entry.qualities.keys().map(QualityTag::as_str).collect();
        let marker = if local.is_empty() {
            String::new()
        } else {
            format!("  [installed: {}]", local.join(", "))
        };
        println!(
            "{:<6} {:<18} {:<40} {}{}",
            lang,
            id,
            entry.display_name,
            qualities.join(", "),
            marker
        );
    }
    Ok(())
}

async fn run_studio_command(
    command: Command,
    registry: Arc<VoiceRegistry>,
    engine: Option<PiperEngine>,
    stored: &StudioPreferences,
    preferences: &PreferencesManager,
) -> Result<ExitCode> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_status_printer(rx);

    let start_voice = match &command {
        Command::Download(args) | Command::Sample(args) | Command::Studio(args) => pick_voice(args, stored),
        Command::Generate { voice, .. } => pick_voice(voice, stored),
        _ => pick_voice(&VoiceArgs::default(), stored),
    };
    let (language, voice, quality) = start_voice.clone();
    let selection = ModelSelection::CatalogVoice {
        language,
        voice,
        quality,
    };

    let mut studio = Studio::new(registry, ModelDownloader::new(), selection).with_updates(tx);
    if let Some(engine) = engine {
        studio = studio.with_engine(engine);
    }
    spawn_ctrl_c_handler(studio.cancel_flag());

    let (language, voice, quality) = start_voice;
    let code = match command {
        Command::Download(_) => match studio.download_voice(&language, &voice, quality).await {
            Ok(resolved) => {
                println!("{}", resolved.model_path.display());
                ExitCode::SUCCESS
            }
            Err(_) => ExitCode::FAILURE,
        },
        Command::Sample(_) => match studio.sample(&language, &voice, quality).await {
            Ok(path) => {
                let player = PlaybackController::new()?;
                play_to_end(&player, &path).await?;
                ExitCode::SUCCESS
            }
            Err(_) => ExitCode::FAILURE,
        },
        Command::Generate {
            text,
            text_file,
            model,
            save,
            play,
            ..
        } => {
            let text = read_text(text, text_file.as_deref()).await?;
            match &model {
                Some(path) => studio.select_custom_model(path),
                None => studio.select_catalog_voice(&language, &voice, quality)?,
            }

            match studio.generate(&text).await {
                Ok(artifact) => {
                    if model.is_none() {
                        preferences.set_last_voice(&language, &voice, quality).await?;
                    }
                    println!("{}", artifact.path.display());
                    if let Some(destination) = save {
                        studio.save_artifact(&destination).await?;
                        eprintln!("Saved to {}", destination.display());
                    }
                    if play {
                        let player = PlaybackController::new()?;
                        play_to_end(&player, &artifact.path).await?;
                    }
                    ExitCode::SUCCESS
                }
                Err(StudioError::EmptyText) => anyhow::bail!("no text to synthesize"),
                Err(_) => ExitCode::FAILURE,
            }
        }
        Command::Studio(_) => {
            interactive(&mut studio, preferences).await?;
            ExitCode::SUCCESS
        }
        Command::Voices { .. } | Command::Remove(_) | Command::Play { .. } => ExitCode::SUCCESS,
    };

    // Closing the update channel lets the printer drain and stop.
    drop(studio);
    let _ = printer.await;
    Ok(code)
}

async fn read_text(text: Option<String>, text_file: Option<&Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = text_file {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()));
    }
    let mut text = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::io::AsyncReadExt::read_to_string(&mut stdin, &mut text)
        .await
        .context("reading text from stdin")?;
    Ok(text)
}

/// Status lines go to stderr; download progress rewrites one line.
fn spawn_status_printer(mut updates: mpsc::UnboundedReceiver<StudioUpdate>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut inline = false;
        while let Some(update) = updates.recv().await {
            match update {
                StudioUpdate::State(state @ StudioState::Downloading { .. }) => {
                    eprint!("\r{}", state.status_line());
                    inline = true;
                }
                other => {
                    if inline {
                        eprintln!();
                        inline = false;
                    }
                    match other {
                        StudioUpdate::State(state) => eprintln!("{}", state.status_line()),
                        StudioUpdate::Notice(notice) => eprintln!("Note: {}", notice),
                    }
                }
            }
        }
        if inline {
            eprintln!();
        }
    })
}

/// First Ctrl-C cancels the download in flight, the second one exits.
fn spawn_ctrl_c_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        let mut presses = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            if presses > 1 {
                std::process::exit(130);
            }
            warn!("Interrupted, cancelling download");
            cancel.cancel();
        }
    });
}

async fn play_to_end(player: &PlaybackController, path: &Path) -> Result<()> {
    eprintln!("Playing {}", path.display());
    player.play_file(path).await?;
    player.wait_until_stopped().await;
    Ok(())
}

const STUDIO_HELP: &str = "\
Type text and press Enter to generate speech. Commands:
  :voice <language> <voice> [quality]   pick a catalog voice
  :quality <quality>                    change quality of the current voice
  :model <path>                         use a local .onnx model
  :voices                               list voices
  :sample                               play the current voice's sample
  :play  :pause  :stop  :rewind         control playback of the last result
  :seek <seconds>                       jump within the last result
  :save <path>                          copy the last result
  :help  :quit";

async fn interactive(studio: &mut Studio, preferences: &PreferencesManager) -> Result<()> {
    eprintln!("{}", STUDIO_HELP);
    eprintln!("{}", studio.state().status_line());

    let mut player: Option<PlaybackController> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("reading from stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = match line.strip_prefix(':') {
            Some(command_line) => {
                let mut parts = command_line.splitn(2, char::is_whitespace);
                (
                    parts.next().unwrap_or_default(),
                    parts.next().unwrap_or_default().trim(),
                )
            }
            None => ("", line),
        };

        let outcome: Result<()> = match command {
            "" => speak(studio, preferences, &mut player, rest).await,
            "quit" | "q" | "exit" => break,
            "help" | "h" => {
                eprintln!("{}", STUDIO_HELP);
                Ok(())
            }
            "voices" => list_voices(studio.registry(), None, false),
            "voice" => select_voice(studio, rest),
            "quality" => match (rest.parse::<QualityTag>(), studio.selection().clone()) {
                (Ok(quality), ModelSelection::CatalogVoice { language, voice, .. }) => studio
                    .select_catalog_voice(&language, &voice, quality)
                    .map_err(Into::into),
                (Ok(_), ModelSelection::CustomModel(_)) => Err(anyhow::anyhow!("a custom model has no quality")),
                (Err(e), _) => Err(anyhow::anyhow!(e)),
            },
            "model" => {
                studio.select_custom_model(rest);
                Ok(())
            }
            "sample" => play_sample(studio, &mut player).await,
            "play" | "pause" | "stop" | "rewind" | "seek" => {
                playback_command(studio, &mut player, command, rest).await
            }
            "save" if !rest.is_empty() => studio
                .save_artifact(Path::new(rest))
                .await
                .map(|_| eprintln!("Saved to {}", rest))
                .map_err(Into::into),
            other => Err(anyhow::anyhow!("unknown command ':{}', try :help", other)),
        };

        if let Err(e) = outcome {
            eprintln!("Error: {:#}", e);
        }
    }
    Ok(())
}

/// Generate `text` and play it straight away.
async fn speak(
    studio: &mut Studio,
    preferences: &PreferencesManager,
    player: &mut Option<PlaybackController>,
    text: &str,
) -> Result<()> {
    let generated = studio.generate(text).await;
    studio.acknowledge();
    // The status printer has already reported a failure.
    let Ok(artifact) = generated else {
        return Ok(());
    };

    if let ModelSelection::CatalogVoice { language, voice, quality } = studio.selection() {
        preferences.set_last_voice(language, voice, *quality).await?;
    }
    ensure_player(player)?.play_file(&artifact.path).await?;
    Ok(())
}

async fn play_sample(studio: &mut Studio, player: &mut Option<PlaybackController>) -> Result<()> {
    let ModelSelection::CatalogVoice { language, voice, quality } = studio.selection().clone() else {
        anyhow::bail!("custom models have no sample");
    };
    let sample = studio.sample(&language, &voice, quality).await;
    studio.acknowledge();
    if let Ok(path) = sample {
        ensure_player(player)?.play_file(&path).await?;
    }
    Ok(())
}

fn select_voice(studio: &mut Studio, args: &str) -> Result<()> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let (language, voice, quality) = match parts.as_slice() {
        [language, voice] => (*language, *voice, QualityTag::default()),
        [language, voice, quality] => (*language, *voice, quality.parse().map_err(anyhow::Error::msg)?),
        _ => anyhow::bail!("usage: :voice <language> <voice> [quality]"),
    };
    studio.select_catalog_voice(language, voice, quality)?;
    eprintln!("Voice: {} {} ({})", language, voice, quality.display_name());
    Ok(())
}

fn ensure_player(player: &mut Option<PlaybackController>) -> Result<&PlaybackController> {
    if player.is_none() {
        *player = Some(PlaybackController::new()?);
    }
    player
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no playback device"))
}

async fn playback_command(
    studio: &Studio,
    player: &mut Option<PlaybackController>,
    command: &str,
    arg: &str,
) -> Result<()> {
    let Some(artifact) = studio.artifact().filter(|_| studio.playback_enabled()) else {
        anyhow::bail!("nothing generated yet");
    };
    let player = ensure_player(player)?;

    match command {
        "play" => {
            if player.state() == PlaybackState::Paused {
                player.play()?;
            } else {
                player.play_file(&artifact.path).await?;
            }
        }
        "pause" => player.toggle()?,
        "stop" => player.stop()?,
        "rewind" => player.rewind().await?,
        "seek" => {
            let seconds: f64 = arg.parse().context("usage: :seek <seconds>")?;
            player.seek(Duration::from_secs_f64(seconds.max(0.0))).await?;
        }
        _ => {}
    }
    Ok(())
}
