//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reel_media::{PipelineConfig, RenderSettings};

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Wall-clock limit for one whole render
    pub job_timeout: Duration,
    /// Wall-clock limit for one ffmpeg/ffprobe invocation
    pub ffmpeg_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Directory receiving rendered videos
    pub output_dir: PathBuf,
    /// Base for relative part locations
    pub input_root: PathBuf,
    pub video_codec: String,
    pub target_width: u32,
    pub fallback_fps: f64,
    /// Redis URL for the record store
    pub redis_url: String,
    /// Key prefix for record hashes
    pub store_key_prefix: String,
    /// Prometheus exporter port, disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let render = RenderSettings::default();
        Self {
            max_concurrent_jobs: 1,
            job_timeout: Duration::from_secs(7200), // 2 hours
            ffmpeg_timeout: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(60),
            work_dir: PathBuf::from("/tmp/reelmaker"),
            output_dir: PathBuf::from("./outputs"),
            input_root: PathBuf::from("."),
            video_codec: render.video_codec,
            target_width: render.target_width,
            fallback_fps: render.fallback_fps,
            redis_url: "redis://localhost:6379".to_string(),
            store_key_prefix: "reel".to_string(),
            metrics_port: None,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_or("WORKER_MAX_JOBS", defaults.max_concurrent_jobs).max(1),
            job_timeout: Duration::from_secs(env_or(
                "WORKER_JOB_TIMEOUT",
                defaults.job_timeout.as_secs(),
            )),
            ffmpeg_timeout: Duration::from_secs(env_or(
                "FFMPEG_TIMEOUT_SECS",
                defaults.ffmpeg_timeout.as_secs(),
            )),
            shutdown_timeout: Duration::from_secs(env_or(
                "WORKER_SHUTDOWN_TIMEOUT",
                defaults.shutdown_timeout.as_secs(),
            )),
            work_dir: env_or("WORKER_WORK_DIR", defaults.work_dir),
            output_dir: env_or("OUTPUT_FILES_LOCATION", defaults.output_dir),
            input_root: env_or("INPUT_FILES_LOCATION", defaults.input_root),
            video_codec: env_or("FFMPEG_VIDEO_CODEC", defaults.video_codec),
            target_width: env_or("TARGET_WIDTH", defaults.target_width),
            fallback_fps: env_or("FALLBACK_FPS", defaults.fallback_fps),
            redis_url: env_or("REDIS_URL", defaults.redis_url),
            store_key_prefix: env_or("STORE_KEY_PREFIX", defaults.store_key_prefix),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
        }
    }

    /// Reject render settings every job would fail on.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.target_width == 0 {
            return Err(WorkerError::config_error("TARGET_WIDTH must be positive"));
        }
        if !self.fallback_fps.is_finite() || self.fallback_fps <= 0.0 {
            return Err(WorkerError::config_error(format!(
                "FALLBACK_FPS must be a positive number, got {}",
                self.fallback_fps
            )));
        }
        if self.video_codec.trim().is_empty() {
            return Err(WorkerError::config_error("FFMPEG_VIDEO_CODEC must not be empty"));
        }
        Ok(())
    }

    /// Pipeline settings derived from this config.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            work_dir: self.work_dir.clone(),
            output_dir: self.output_dir.clone(),
            input_root: self.input_root.clone(),
            render: RenderSettings {
                target_width: self.target_width,
                fallback_fps: self.fallback_fps,
                video_codec: self.video_codec.clone(),
                ..RenderSettings::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.job_timeout, Duration::from_secs(7200));
        assert_eq!(config.target_width, 1440);
        assert_eq!(config.fallback_fps, 30.0);
        assert_eq!(config.video_codec, "libx264");
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn test_pipeline_config_carries_render_settings() {
        let config = WorkerConfig {
            target_width: 1280,
            video_codec: "libx265".to_string(),
            work_dir: PathBuf::from("/scratch"),
            ..WorkerConfig::default()
        };
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.work_dir, PathBuf::from("/scratch"));
        assert_eq!(pipeline.render.target_width, 1280);
        assert_eq!(pipeline.render.video_codec, "libx265");
        assert_eq!(pipeline.render.threads, 1);
    }

    #[test]
    fn test_validate_rejects_unusable_render_settings() {
        assert!(WorkerConfig::default().validate().is_ok());

        let zero_width = WorkerConfig {
            target_width: 0,
            ..WorkerConfig::default()
        };
        assert!(matches!(zero_width.validate(), Err(WorkerError::ConfigError(_))));

        for fps in [0.0, -30.0, f64::NAN, f64::INFINITY] {
            let config = WorkerConfig {
                fallback_fps: fps,
                ..WorkerConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("FALLBACK_FPS"), "{}", err);
        }

        let no_codec = WorkerConfig {
            video_codec: " ".to_string(),
            ..WorkerConfig::default()
        };
        assert!(no_codec.validate().is_err());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("REEL_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or("REEL_TEST_ENV_OR", 7u32), 7);
        std::env::set_var("REEL_TEST_ENV_OR", " 9 ");
        assert_eq!(env_or("REEL_TEST_ENV_OR", 7u32), 9);
        std::env::remove_var("REEL_TEST_ENV_OR");
    }
}
