//! Speech-to-text through a whisper-family command line tool.
//!
//! The engine binary is resolved lazily on the first transcription and
//! forgotten on [`Transcriber::release`], so a worker that never receives a
//! job never needs the engine installed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{last_stderr_line, MediaError, MediaResult};
use crate::segment::AudioUnit;

/// Subdirectory, next to the unit audio, that receives engine output.
const ENGINE_OUTPUT_DIR: &str = "engine-output";

/// Turns one audio unit into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, unit: &AudioUnit) -> MediaResult<String>;

    /// Free engine resources. Safe to call repeatedly, and before any
    /// transcription.
    async fn release(&self) -> MediaResult<()>;
}

/// Where the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda,
}

impl ComputeDevice {
    pub fn from_force_cpu(force_cpu: bool) -> Self {
        if force_cpu {
            Self::Cpu
        } else {
            Self::Cuda
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }

    /// Numeric precision used on this device.
    pub fn compute_type(&self) -> &'static str {
        match self {
            Self::Cpu => "float32",
            Self::Cuda => "float16",
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, Self::Cuda)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine invocation settings.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    /// Binary name or path
    pub binary: String,
    pub model: String,
    pub device: ComputeDevice,
    /// Fixed language; the engine detects it when unset
    pub language: Option<String>,
}

impl TranscriberConfig {
    pub fn new(device: ComputeDevice) -> Self {
        Self {
            binary: "whisperx".to_string(),
            model: "large".to_string(),
            device,
            language: None,
        }
    }

    fn build_args(&self, audio: &Path, out_dir: &Path) -> Vec<String> {
        let mut args = vec![
            audio.to_string_lossy().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--device".to_string(),
            self.device.as_str().to_string(),
            "--compute_type".to_string(),
            self.device.compute_type().to_string(),
            "--output_format".to_string(),
            "txt".to_string(),
            "--output_dir".to_string(),
            out_dir.to_string_lossy().to_string(),
        ];
        if let Some(language) = &self.language {
            args.push("--language".to_string());
            args.push(language.clone());
        }
        args
    }
}

/// [`Transcriber`] running one engine process per unit.
#[derive(Debug)]
pub struct WhisperCliTranscriber {
    config: TranscriberConfig,
    engine: Mutex<Option<PathBuf>>,
}

impl WhisperCliTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self {
            config,
            engine: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TranscriberConfig {
        &self.config
    }

    /// Whether the engine has been resolved and not yet released.
    pub async fn is_loaded(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    async fn engine(&self) -> MediaResult<PathBuf> {
        let mut engine = self.engine.lock().await;
        if let Some(path) = engine.as_ref() {
            return Ok(path.clone());
        }

        let path = which::which(&self.config.binary)
            .map_err(|_| MediaError::TranscriberNotFound(self.config.binary.clone()))?;
        info!(
            engine = %path.display(),
            model = %self.config.model,
            device = %self.config.device,
            compute_type = self.config.device.compute_type(),
            "Loading transcription engine"
        );
        *engine = Some(path.clone());
        Ok(path)
    }
}

/// Collapse engine output into a single line of text.
fn normalize_transcript(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, unit: &AudioUnit) -> MediaResult<String> {
        if !unit.path.exists() {
            return Err(MediaError::FileNotFound(unit.path.clone()));
        }
        let engine = self.engine().await?;

        let out_dir = unit
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(ENGINE_OUTPUT_DIR);
        tokio::fs::create_dir_all(&out_dir).await?;

        if unit.index % 5 == 0 {
            info!("Transcribing segment {}...", unit.index);
        }

        let output = Command::new(&engine)
            .args(self.config.build_args(&unit.path, &out_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(MediaError::transcription_failed(format!(
                "{}: {}",
                unit.name,
                last_stderr_line(&output.stderr)
            )));
        }

        let stem = unit
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| unit.name.clone());
        let text_path = out_dir.join(format!("{stem}.txt"));
        let raw = tokio::fs::read_to_string(&text_path).await.map_err(|e| {
            MediaError::transcription_failed(format!("{}: missing output: {e}", unit.name))
        })?;
        // Removed with the working directory if this fails.
        let _ = tokio::fs::remove_file(&text_path).await;

        let text = normalize_transcript(&raw);
        debug!(segment = %unit.name, words = text.split(' ').count(), "Transcribed segment");
        Ok(text)
    }

    async fn release(&self) -> MediaResult<()> {
        if self.engine.lock().await.take().is_some() {
            info!("Released transcription engine");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_selection() {
        let cpu = ComputeDevice::from_force_cpu(true);
        assert_eq!(cpu.as_str(), "cpu");
        assert_eq!(cpu.compute_type(), "float32");
        assert!(!cpu.is_gpu());

        let gpu = ComputeDevice::from_force_cpu(false);
        assert_eq!(gpu.as_str(), "cuda");
        assert_eq!(gpu.compute_type(), "float16");
    }

    #[test]
    fn test_engine_args() {
        let mut config = TranscriberConfig::new(ComputeDevice::Cpu);
        config.language = Some("en".into());
        let args = config.build_args(Path::new("/w/segment_000.wav"), Path::new("/w/out"));

        assert_eq!(args[0], "/w/segment_000.wav");
        let joined = args.join(" ");
        assert!(joined.contains("--device cpu --compute_type float32"));
        assert!(joined.contains("--output_dir /w/out"));
        assert!(joined.ends_with("--language en"));
    }

    #[test]
    fn test_normalize_transcript() {
        assert_eq!(normalize_transcript("  Hello\n  world \n\n"), "Hello world");
        assert_eq!(normalize_transcript(""), "");
    }

    #[tokio::test]
    async fn test_missing_engine_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let unit = AudioUnit::new(0, dir.path());
        tokio::fs::write(&unit.path, b"RIFF").await.unwrap();

        let mut config = TranscriberConfig::new(ComputeDevice::Cpu);
        config.binary = "vscan-no-such-engine".into();
        let transcriber = WhisperCliTranscriber::new(config);

        let result = transcriber.transcribe(&unit).await;
        assert!(matches!(result, Err(MediaError::TranscriberNotFound(_))));
        assert!(!transcriber.is_loaded().await);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let transcriber = WhisperCliTranscriber::new(TranscriberConfig::new(ComputeDevice::Cuda));
        transcriber.release().await.unwrap();
        transcriber.release().await.unwrap();
        assert!(!transcriber.is_loaded().await);
    }
}
