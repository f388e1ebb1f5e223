//! Scripted in-process [`MediaBackend`] for tests.
//!
//! Segments are written as one text line describing the cut, and concat
//! joins the files listed in the manifest, so tests can assert on what the
//! final output contains without ffmpeg installed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::backend::MediaBackend;
use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::probe::SourceInfo;

/// One recorded ffmpeg invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: &'static str,
    pub args: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    sources: HashMap<PathBuf, SourceInfo>,
    failing_renders: HashSet<PathBuf>,
    fail_stream_copy: bool,
    fail_reencode: bool,
    skip_concat_output: bool,
    fail_output_probe: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe a source. The file itself must exist for probing to succeed.
    pub fn with_source(mut self, path: impl Into<PathBuf>, info: SourceInfo) -> Self {
        self.sources.insert(path.into(), info);
        self
    }

    /// Make the segment encode fail for `path`.
    pub fn fail_render(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing_renders.insert(path.into());
        self
    }

    pub fn fail_stream_copy(mut self) -> Self {
        self.fail_stream_copy = true;
        self
    }

    pub fn fail_reencode(mut self) -> Self {
        self.fail_reencode = true;
        self
    }

    /// Report concat success without writing the output.
    pub fn skip_concat_output(mut self) -> Self {
        self.skip_concat_output = true;
        self
    }

    pub fn fail_output_probe(mut self) -> Self {
        self.fail_output_probe = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn operations(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.operation).collect()
    }

    fn record(&self, cmd: &FfmpegCommand) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                operation: cmd.operation_name(),
                args: cmd.build_args(),
            });
        }
    }

    async fn concat(&self, cmd: &FfmpegCommand, fail: bool) -> MediaResult<()> {
        if fail {
            // Leave a partial file behind like a crashed encoder would
            tokio::fs::write(cmd.output(), b"partial").await?;
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(format!(
                    "[concat] {}: codec parameters mismatch",
                    cmd.operation_name()
                )),
                Some(1),
            ));
        }
        if self.skip_concat_output {
            return Ok(());
        }

        let manifest = tokio::fs::read_to_string(cmd.input()).await?;
        let mut joined = Vec::new();
        for line in manifest.lines() {
            let Some(quoted) = line.strip_prefix("file '").and_then(|l| l.strip_suffix('\''))
            else {
                continue;
            };
            let path = quoted.replace(r"'\''", "'");
            joined.extend(tokio::fs::read(&path).await?);
        }
        tokio::fs::write(cmd.output(), joined).await?;
        Ok(())
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[async_trait]
impl MediaBackend for ScriptedBackend {
    async fn probe_source(&self, path: &Path) -> MediaResult<SourceInfo> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        self.sources
            .get(path)
            .cloned()
            .ok_or_else(|| MediaError::source_unreadable(format!("{}: moov atom not found", path.display())))
    }

    /// Sums the `t=` lengths of the segment lines in the file.
    async fn probe_duration(&self, path: &Path) -> MediaResult<f64> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        if self.fail_output_probe {
            return Err(MediaError::ffprobe_failed(
                "FFprobe exited with exit status: 1",
                Some("Invalid data found when processing input".to_string()),
            ));
        }
        let body = tokio::fs::read_to_string(path).await?;
        Ok(body
            .lines()
            .filter_map(|l| l.split(' ').find_map(|f| f.strip_prefix("t=")))
            .filter_map(|t| t.parse::<f64>().ok())
            .sum())
    }

    async fn run_ffmpeg(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.record(cmd);
        let args = cmd.build_args();

        match cmd.operation_name() {
            "render_segment" => {
                if self.failing_renders.contains(cmd.input()) {
                    return Err(MediaError::ffmpeg_failed(
                        "FFmpeg exited with non-zero status",
                        Some("Error while decoding stream #0:0".to_string()),
                        Some(1),
                    ));
                }
                let source = cmd
                    .input()
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let line = format!(
                    "src={} ss={} t={} vf={} r={}\n",
                    source,
                    arg_after(&args, "-ss").unwrap_or("0"),
                    arg_after(&args, "-t").unwrap_or("0"),
                    arg_after(&args, "-vf").unwrap_or(""),
                    arg_after(&args, "-r").unwrap_or(""),
                );
                tokio::fs::write(cmd.output(), line).await?;
                Ok(())
            }
            "concat_copy" => self.concat(cmd, self.fail_stream_copy).await,
            "concat_reencode" => self.concat(cmd, self.fail_reencode).await,
            _ => Ok(()),
        }
    }
}
