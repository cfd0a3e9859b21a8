use rodio::{Decoder, OutputStreamBuilder, Sink};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::error::{StudioError, StudioResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

enum PlayerCommand {
    Load(PathBuf, oneshot::Sender<Result<(), String>>),
    Play,
    Pause,
    Stop,
    Seek(Duration, oneshot::Sender<Result<(), String>>),
    Position(oneshot::Sender<Duration>),
    Shutdown,
}

/// Plays one audio file at a time on the default output device.
///
/// The output stream lives on its own thread; this handle only sends
/// commands to it and watches the state it publishes.
pub struct PlaybackController {
    commands: mpsc::Sender<PlayerCommand>,
    state: watch::Receiver<PlaybackState>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PlaybackController {
    /// Open the default output device.
    pub fn new() -> StudioResult<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (state_tx, state) = watch::channel(PlaybackState::Stopped);
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || run_player(command_rx, state_tx, ready_tx))
            .map_err(|e| StudioError::Playback(format!("failed to start playback thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands,
                state,
                thread: Some(thread),
            }),
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(StudioError::Playback(message))
            }
            Err(_) => Err(StudioError::Playback(
                "playback thread exited during startup".to_string(),
            )),
        }
    }

    /// Load a file and start playing it from the beginning.
    pub async fn play_file(&self, path: &Path) -> StudioResult<()> {
        check_playable(path)?;
        let (reply, rx) = oneshot::channel();
        self.send(PlayerCommand::Load(path.to_path_buf(), reply))?;
        self.reply(rx).await?.map_err(StudioError::Playback)?;
        self.play()
    }

    pub fn play(&self) -> StudioResult<()> {
        self.send(PlayerCommand::Play)
    }

    pub fn pause(&self) -> StudioResult<()> {
        self.send(PlayerCommand::Pause)
    }

    pub fn stop(&self) -> StudioResult<()> {
        self.send(PlayerCommand::Stop)
    }

    /// Pause when playing, play otherwise.
    pub fn toggle(&self) -> StudioResult<()> {
        match self.state() {
            PlaybackState::Playing => self.pause(),
            _ => self.play(),
        }
    }

    pub async fn seek(&self, position: Duration) -> StudioResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(PlayerCommand::Seek(position, reply))?;
        self.reply(rx).await?.map_err(StudioError::Playback)
    }

    pub async fn rewind(&self) -> StudioResult<()> {
        self.seek(Duration::ZERO).await
    }

    pub async fn position(&self) -> StudioResult<Duration> {
        let (reply, rx) = oneshot::channel();
        self.send(PlayerCommand::Position(reply))?;
        self.reply(rx).await
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    /// State-change notifications.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    /// Resolve once playback has reached `Stopped`.
    pub async fn wait_until_stopped(&self) {
        let mut state = self.subscribe();
        let _ = state.wait_for(|s| *s == PlaybackState::Stopped).await;
    }

    fn send(&self, command: PlayerCommand) -> StudioResult<()> {
        self.commands
            .send(command)
            .map_err(|_| StudioError::Playback("playback thread is not running".to_string()))
    }

    async fn reply<T>(&self, rx: oneshot::Receiver<T>) -> StudioResult<T> {
        rx.await
            .map_err(|_| StudioError::Playback("playback thread is not running".to_string()))
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let _ = self.commands.send(PlayerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Only non-empty regular files are handed to the decoder.
pub fn check_playable(path: &Path) -> StudioResult<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(StudioError::Playback(format!(
            "{} is empty or not a file",
            path.display()
        ))),
        Err(e) => Err(StudioError::file_io(path, e)),
    }
}

fn run_player(
    commands: mpsc::Receiver<PlayerCommand>,
    state: watch::Sender<PlaybackState>,
    ready: mpsc::Sender<Result<(), String>>,
) {
    let stream = match OutputStreamBuilder::open_default_stream() {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(format!("no audio output device: {}", e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut sink: Option<Sink> = None;
    let mut current: Option<PathBuf> = None;

    let set_state = |next: PlaybackState| {
        state.send_if_modified(|s| {
            if *s == next {
                false
            } else {
                debug!("Playback state {:?} -> {:?}", *s, next);
                *s = next;
                true
            }
        });
    };

    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(PlayerCommand::Load(path, reply)) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                set_state(PlaybackState::Stopped);
                let result = load(&stream, &path).map(|new_sink| {
                    sink = Some(new_sink);
                    current = Some(path);
                });
                let _ = reply.send(result);
            }
            Ok(PlayerCommand::Play) => {
                // A finished track starts over from the top.
                if sink.as_ref().map_or(true, Sink::empty) {
                    if let Some(path) = &current {
                        match load(&stream, path) {
                            Ok(new_sink) => sink = Some(new_sink),
                            Err(e) => {
                                warn!("Could not reload {:?}: {}", path, e);
                                continue;
                            }
                        }
                    }
                }
                if let Some(sink) = &sink {
                    sink.play();
                    set_state(PlaybackState::Playing);
                }
            }
            Ok(PlayerCommand::Pause) => {
                if let Some(sink) = &sink {
                    sink.pause();
                    set_state(PlaybackState::Paused);
                }
            }
            Ok(PlayerCommand::Stop) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                set_state(PlaybackState::Stopped);
            }
            Ok(PlayerCommand::Seek(position, reply)) => {
                let result = match &sink {
                    Some(sink) => sink.try_seek(position).map_err(|e| e.to_string()),
                    None => Err("nothing loaded".to_string()),
                };
                let _ = reply.send(result);
            }
            Ok(PlayerCommand::Position(reply)) => {
                let _ = reply.send(sink.as_ref().map(Sink::get_pos).unwrap_or_default());
            }
            Ok(PlayerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if *state.borrow() == PlaybackState::Playing && sink.as_ref().map_or(true, Sink::empty) {
            set_state(PlaybackState::Stopped);
        }
    }
}

fn load(stream: &rodio::OutputStream, path: &Path) -> Result<Sink, String> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let source = Decoder::new(BufReader::new(file))
        .map_err(|e| format!("cannot decode {}: {}", path.display(), e))?;
    let sink = Sink::connect_new(stream.mixer());
    sink.pause();
    sink.append(source);
    Ok(sink)
}
