//! ffmpeg-backed engine runtime.
//!
//! Each runtime owns a private temporary directory that acts as its staging
//! area; ffmpeg runs with that directory as its working directory so
//! arguments can name staged files directly.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use reelkit_common::error::{ReelError, ReelResult};

use crate::runtime::{
    check_file_name, parse_frame_rate, CodecRuntime, EngineLoader, ExecObserver, ProgressParser,
    StreamInfo,
};

/// Arguments prepended to every exec.
const BASE_ARGS: [&str; 7] = [
    "-hide_banner",
    "-nostdin",
    "-y",
    "-loglevel",
    "error",
    "-progress",
    "pipe:1",
];

/// Loads ffmpeg from a binary name or path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegLoader;

#[async_trait]
impl EngineLoader for FfmpegLoader {
    async fn fetch(&self, location: &str) -> ReelResult<Arc<dyn CodecRuntime>> {
        let runtime = FfmpegRuntime::start(location).await?;
        Ok(Arc::new(runtime))
    }
}

/// A verified ffmpeg binary plus its staging directory.
#[derive(Debug)]
pub struct FfmpegRuntime {
    binary: String,
    probe_binary: String,
    version: String,
    staging: TempDir,
}

impl FfmpegRuntime {
    /// Verify `location` runs and create a fresh staging area.
    pub async fn start(location: &str) -> ReelResult<Self> {
        let output = Command::new(location)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ReelError::engine_load(format!("{location}: {e}")))?;
        if !output.status.success() {
            return Err(ReelError::engine_load(format!(
                "{location} -version exited with {}",
                output.status
            )));
        }
        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("ffmpeg (unknown version)")
            .trim()
            .to_string();

        let staging = tempfile::Builder::new()
            .prefix("reelkit-engine-")
            .tempdir()
            .map_err(|e| ReelError::engine_io(format!("Failed to create staging dir: {e}")))?;

        tracing::info!(
            location,
            version = %version,
            staging = %staging.path().display(),
            "Codec engine ready"
        );

        Ok(Self {
            binary: location.to_string(),
            probe_binary: sibling_probe(location),
            version,
            staging,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    fn path(&self, name: &str) -> ReelResult<PathBuf> {
        check_file_name(name)?;
        Ok(self.staging.path().join(name))
    }
}

#[async_trait]
impl CodecRuntime for FfmpegRuntime {
    fn describe(&self) -> String {
        format!("{} ({})", self.binary, self.version)
    }

    async fn write_file(&self, name: &str, bytes: &[u8]) -> ReelResult<()> {
        let path = self.path(name)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ReelError::engine_io(format!("write {name}: {e}")))
    }

    async fn read_file(&self, name: &str) -> ReelResult<Vec<u8>> {
        let path = self.path(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ReelError::engine_io(format!("read {name}: {e}")))
    }

    async fn delete_file(&self, name: &str) -> ReelResult<()> {
        let path = self.path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReelError::engine_io(format!("delete {name}: {e}"))),
        }
    }

    async fn list_files(&self) -> ReelResult<Vec<String>> {
        let mut dir = tokio::fs::read_dir(self.staging.path())
            .await
            .map_err(|e| ReelError::engine_io(format!("list staging: {e}")))?;
        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ReelError::engine_io(format!("list staging: {e}")))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exec(&self, args: &[String], observer: Option<ExecObserver>) -> ReelResult<()> {
        tracing::debug!(args = ?args, "Running ffmpeg");
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(self.staging.path())
            .args(BASE_ARGS)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReelError::engine_load(format!("engine binary {} is gone: {e}", self.binary))
            } else {
                ReelError::engine_exec(format!("Failed to start ffmpeg: {e}"))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReelError::engine_exec("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ReelError::engine_exec("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::new();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ReelError::engine_exec(format!("Failed reading ffmpeg progress: {e}")))?
        {
            if let (Some(snapshot), Some(observer)) = (parser.feed_line(&line), observer.as_ref()) {
                observer(snapshot);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ReelError::engine_exec(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(ReelError::engine_exec(format!(
                "ffmpeg failed (status {status}): {}",
                tail(stderr_output.trim(), 2000)
            )));
        }
        Ok(())
    }

    async fn probe(&self, name: &str) -> ReelResult<StreamInfo> {
        let path = self.path(name)?;
        let output = Command::new(&self.probe_binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate:format=duration",
                "-of",
                "json",
            ])
            .arg(&path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ReelError::engine_exec(format!("Failed to run {}: {e}", self.probe_binary)))?;
        if !output.status.success() {
            return Err(ReelError::engine_exec(format!(
                "probe of {name} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_probe_json(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse ffprobe `-of json` output for the first video stream.
pub fn parse_probe_json(raw: &str) -> ReelResult<StreamInfo> {
    let parsed: ProbeOutput = serde_json::from_str(raw)?;
    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| ReelError::engine_exec("probe found no video stream"))?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(ReelError::engine_exec("probe reported no dimensions")),
    };
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);
    let duration_secs = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);
    Ok(StreamInfo {
        width,
        height,
        fps,
        duration_secs,
    })
}

/// Whether `binary` resolves on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// `ffprobe` next to an explicit ffmpeg path, or on `PATH` otherwise.
fn sibling_probe(location: &str) -> String {
    let path = Path::new(location);
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("ffprobe").to_string_lossy().into_owned(),
        _ => "ffprobe".to_string(),
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_json() {
        let raw = r#"{
            "programs": [],
            "streams": [{"width": 1280, "height": 720, "r_frame_rate": "30/1", "avg_frame_rate": "30000/1001"}],
            "format": {"duration": "10.010000"}
        }"#;
        let info = parse_probe_json(raw).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert!((info.fps - 29.97).abs() < 0.01);
        assert!((info.duration_secs.unwrap() - 10.01).abs() < 1e-6);
    }

    #[test]
    fn test_parse_probe_json_without_video() {
        assert!(parse_probe_json(r#"{"streams": []}"#).is_err());
        assert!(parse_probe_json("not json").is_err());
    }

    #[test]
    fn test_sibling_probe() {
        assert_eq!(sibling_probe("ffmpeg"), "ffprobe");
        assert_eq!(sibling_probe("/opt/homebrew/bin/ffmpeg"), "/opt/homebrew/bin/ffprobe");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("héllo wörld", 4), "rld");
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_load() {
        let err = FfmpegLoader
            .fetch("/nonexistent/reelkit/ffmpeg")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ReelError::EngineLoad { .. }));
    }
}
