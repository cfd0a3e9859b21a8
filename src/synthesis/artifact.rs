use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

const EXCERPT_WORDS: usize = 3;
const EXCERPT_MAX_CHARS: usize = 30;

/// Header facts about a generated WAV file.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

/// The most recently generated audio file.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub voice_label: String,
    pub audio: Option<AudioInfo>,
}

impl OutputArtifact {
    pub fn new(path: PathBuf, voice_label: impl Into<String>) -> Self {
        let audio = inspect_wav(&path);
        Self {
            path,
            voice_label: voice_label.into(),
            audio,
        }
    }
}

/// Read the WAV header. `None` when the engine wrote something hound cannot parse.
pub fn inspect_wav(path: &Path) -> Option<AudioInfo> {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            let frames = reader.duration();
            Some(AudioInfo {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                duration_secs: if spec.sample_rate > 0 {
                    frames as f64 / spec.sample_rate as f64
                } else {
                    0.0
                },
            })
        }
        Err(e) => {
            debug!("Could not read WAV header of {:?}: {}", path, e);
            None
        }
    }
}

/// Filename-safe excerpt: first three words, lowercased, `_`-joined,
/// alphanumerics and `_` only, at most 30 characters.
pub fn text_excerpt(text: &str) -> String {
    text.split_whitespace()
        .take(EXCERPT_WORDS)
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .take(EXCERPT_MAX_CHARS)
        .collect()
}

/// `<voice>_<excerpt>_<YYYYMMDD_HHMMSS>.wav`
pub fn output_file_name(voice_label: &str, text: &str, timestamp: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}.wav",
        voice_label,
        text_excerpt(text),
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// A fresh output path in `output_dir`, suffixed `_1`, `_2`, ... if the
/// timestamped name is already taken.
pub fn next_output_path(output_dir: &Path, voice_label: &str, text: &str) -> PathBuf {
    let name = output_file_name(voice_label, text, Local::now());
    let candidate = output_dir.join(&name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = name.trim_end_matches(".wav");
    (1..)
        .map(|n| output_dir.join(format!("{}_{}.wav", stem, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn excerpt_keeps_first_three_words() {
        assert_eq!(text_excerpt("Hello world"), "hello_world");
        assert_eq!(text_excerpt("  The quick, brown fox jumps"), "the_quick_brown");
        assert_eq!(text_excerpt("Don't stop-now!"), "dont_stopnow");
    }

    #[test]
    fn excerpt_is_capped() {
        let excerpt = text_excerpt("Supercalifragilisticexpialidocious antidisestablishmentarianism");
        assert_eq!(excerpt.chars().count(), 30);
        assert!(excerpt.starts_with("supercalifragilistic"));
    }

    #[test]
    fn file_name_has_voice_excerpt_and_timestamp() {
        let ts = Local.with_ymd_and_hms(2026, 10, 18, 9, 5, 7).unwrap();
        assert_eq!(
            output_file_name("amy", "Hello world", ts),
            "amy_hello_world_20261018_090507.wav"
        );
    }

    #[test]
    fn taken_names_get_a_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = next_output_path(dir.path(), "amy", "Hello world");
        std::fs::write(&first, b"x").unwrap();
        let second = next_output_path(dir.path(), "amy", "Hello world");
        assert_ne!(first, second);
        assert!(second
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("amy_hello_world_"));
    }

    #[test]
    fn wav_header_is_inspected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..22050 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let info = inspect_wav(&path).unwrap();
        assert_eq!(info.sample_rate, 22050);
        assert!((info.duration_secs - 1.0).abs() < 1e-9);

        std::fs::write(dir.path().join("junk.wav"), b"not a wav").unwrap();
        assert!(inspect_wav(&dir.path().join("junk.wav")).is_none());
    }
}
