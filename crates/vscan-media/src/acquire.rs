//! Audio acquisition using yt-dlp and FFmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::{check_ytdlp, FfmpegCommand, FfmpegRunner};
use crate::error::{last_stderr_line, MediaError, MediaResult};

/// Sample rate expected by the speech-to-text engine.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;

/// Stem shared by the downloaded and converted audio files.
const AUDIO_STEM: &str = "audio";

/// Fetches a source video's audio track and prepares it for transcription.
#[async_trait]
pub trait AudioAcquirer: Send + Sync {
    /// Download the audio track of `url` into `work_dir`.
    async fn download(&self, url: &str, work_dir: &Path) -> MediaResult<PathBuf>;

    /// Convert a downloaded track into mono 16 kHz PCM WAV inside `work_dir`.
    async fn convert_to_wav(&self, input: &Path, work_dir: &Path) -> MediaResult<PathBuf>;
}

/// [`AudioAcquirer`] driving the `yt-dlp` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct YtDlpAcquirer {
    format: String,
    runner: FfmpegRunner,
}

impl Default for YtDlpAcquirer {
    fn default() -> Self {
        Self {
            format: "bestaudio[ext=m4a]/bestaudio/best".to_string(),
            runner: FfmpegRunner::new(),
        }
    }
}

impl YtDlpAcquirer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the yt-dlp format selector.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    fn download_args(&self, url: &str, work_dir: &Path) -> Vec<String> {
        let template = work_dir.join(format!("{AUDIO_STEM}.%(ext)s"));
        vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "-f".to_string(),
            self.format.clone(),
            "-o".to_string(),
            template.to_string_lossy().to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            url.to_string(),
        ]
    }
}

/// Find the file yt-dlp wrote, preferring the path it printed.
async fn locate_download(stdout: &str, work_dir: &Path) -> MediaResult<PathBuf> {
    if let Some(printed) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        let path = PathBuf::from(printed);
        if path.exists() {
            return Ok(path);
        }
    }

    let mut entries = tokio::fs::read_dir(work_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_audio = path
            .file_stem()
            .map(|s| s == AUDIO_STEM)
            .unwrap_or(false);
        let is_partial = path.extension().map(|e| e == "part").unwrap_or(false);
        if is_audio && !is_partial {
            return Ok(path);
        }
    }

    Err(MediaError::download_failed("Output file not created"))
}

#[async_trait]
impl AudioAcquirer for YtDlpAcquirer {
    async fn download(&self, url: &str, work_dir: &Path) -> MediaResult<PathBuf> {
        check_ytdlp()?;
        tokio::fs::create_dir_all(work_dir).await?;

        info!(url = %url, dir = %work_dir.display(), "Downloading audio");

        let output = Command::new("yt-dlp")
            .args(self.download_args(url, work_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            debug!("yt-dlp stderr: {}", String::from_utf8_lossy(&output.stderr));
            return Err(MediaError::download_failed(format!(
                "yt-dlp failed: {}",
                last_stderr_line(&output.stderr)
            )));
        }

        let path = locate_download(&String::from_utf8_lossy(&output.stdout), work_dir).await?;
        let size = tokio::fs::metadata(&path).await?.len();
        info!(
            output = %path.display(),
            size_mb = size as f64 / (1024.0 * 1024.0),
            "Downloaded audio successfully"
        );
        Ok(path)
    }

    async fn convert_to_wav(&self, input: &Path, work_dir: &Path) -> MediaResult<PathBuf> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }

        let output = work_dir.join(format!("{AUDIO_STEM}.wav"));
        if input == output {
            return Ok(output);
        }

        let cmd = FfmpegCommand::new(input, &output)
            .no_video()
            .audio_codec("pcm_s16le")
            .sample_rate(TRANSCRIPTION_SAMPLE_RATE)
            .channels(1);
        self.runner.run(&cmd).await?;

        if !output.exists() {
            return Err(MediaError::FileNotFound(output));
        }
        debug!(output = %output.display(), "Converted audio to WAV");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_args() {
        let acquirer = YtDlpAcquirer::new().with_format("bestaudio");
        let args = acquirer.download_args("https://youtu.be/dQw4w9WgXcQ", Path::new("/tmp/job"));

        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/dQw4w9WgXcQ"));
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "bestaudio");
        assert!(args.contains(&"/tmp/job/audio.%(ext)s".to_string()));
        assert!(args.contains(&"--no-playlist".to_string()));
    }

    #[tokio::test]
    async fn test_locate_download_prefers_printed_path() {
        let dir = tempfile::tempdir().unwrap();
        let printed = dir.path().join("audio.webm");
        tokio::fs::write(&printed, b"x").await.unwrap();
        tokio::fs::write(dir.path().join("audio.m4a"), b"x").await.unwrap();

        let stdout = format!("{}\n", printed.display());
        assert_eq!(locate_download(&stdout, dir.path()).await.unwrap(), printed);
    }

    #[tokio::test]
    async fn test_locate_download_scans_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("audio.m4a.part"), b"x").await.unwrap();
        assert!(locate_download("", dir.path()).await.is_err());

        tokio::fs::write(dir.path().join("audio.m4a"), b"x").await.unwrap();
        assert_eq!(
            locate_download("", dir.path()).await.unwrap(),
            dir.path().join("audio.m4a")
        );
    }

    #[tokio::test]
    async fn test_convert_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = YtDlpAcquirer::new()
            .convert_to_wav(&dir.path().join("missing.m4a"), dir.path())
            .await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
