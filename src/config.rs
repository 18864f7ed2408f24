//! # Configuration Management
//!
//! Loads application configuration from three sources, highest priority
//! last:
//!
//! 1. Built-in defaults (the `Default` impl below)
//! 2. `config.toml` in the working directory, if present
//! 3. Environment variables: nested `APP_*` keys plus the flat deployment
//!    variables (`MAX_CONCURRENT_SESSIONS`, `CONFIDENCE_THRESHOLD`, …)
//!    that operators actually set
//!
//! Configuration is validated once after loading; the pipeline reads it
//! through typed accessors and never re-parses the environment.

use crate::audio::emotion::LazyClassifier;
use crate::events::{MaxResolution, SessionConfigInfo};
use crate::inference::local::{weights_factory, LazyDetector};
use crate::inference::remote::RemoteConfig;
use crate::stream::audio::AudioWindowConfig;
use crate::stream::video::VideoLimits;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub inference: InferenceConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Per-frame validation and quality settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Resolution ceiling; larger frames are downscaled proportionally.
    pub max_frame_width: u32,
    pub max_frame_height: u32,
    /// Frames above this size produce `FRAME_TOO_LARGE`.
    pub max_frame_size_bytes: usize,
    /// Variance-of-Laplacian score below which a frame is flagged blurry.
    pub blur_warning_threshold: f32,
    /// Minimum detection confidence accepted for emission.
    pub confidence_threshold: f32,
    /// Inactivity window after which a session is forcibly closed.
    pub idle_timeout_sec: u64,
}

/// Detection backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Remote detection service URL; empty disables the remote leg.
    pub remote_url: String,
    /// Credential for the remote service; empty disables the remote leg.
    pub remote_api_key: String,
    pub remote_timeout_sec: u64,
    /// Whether the local fallback model participates at all.
    pub local_enabled: bool,
    pub local_weights_path: String,
}

/// Audio window batching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub window_seconds: f64,
    pub batch_size: usize,
    pub sample_rate: u32,
    pub buffer_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Above this many live sessions, `/offer` answers 503.
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            stream: StreamConfig {
                max_frame_width: 1280,
                max_frame_height: 720,
                max_frame_size_bytes: 10 * 1024 * 1024,
                blur_warning_threshold: 100.0,
                confidence_threshold: 0.5,
                idle_timeout_sec: 30,
            },
            inference: InferenceConfig {
                remote_url: String::new(),
                remote_api_key: String::new(),
                remote_timeout_sec: 10,
                local_enabled: false,
                local_weights_path: String::new(),
            },
            audio: AudioConfig {
                window_seconds: 1.0,
                batch_size: 10,
                sample_rate: 48_000,
                buffer_capacity: 1024,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

/// Flat deployment variables and the nested keys they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("MAX_CONCURRENT_SESSIONS", "performance.max_concurrent_sessions"),
    ("CONFIDENCE_THRESHOLD", "stream.confidence_threshold"),
    ("MAX_FRAME_WIDTH", "stream.max_frame_width"),
    ("MAX_FRAME_HEIGHT", "stream.max_frame_height"),
    ("IDLE_TIMEOUT_SEC", "stream.idle_timeout_sec"),
    ("MAX_FRAME_SIZE_BYTES", "stream.max_frame_size_bytes"),
    ("BLUR_WARNING_THRESHOLD", "stream.blur_warning_threshold"),
    ("INFERENCE_REMOTE_URL", "inference.remote_url"),
    ("INFERENCE_REMOTE_KEY", "inference.remote_api_key"),
    ("INFERENCE_REMOTE_TIMEOUT_SEC", "inference.remote_timeout_sec"),
    ("INFERENCE_LOCAL_ENABLED", "inference.local_enabled"),
    ("INFERENCE_LOCAL_WEIGHTS_PATH", "inference.local_weights_path"),
    ("AUDIO_WINDOW_SECONDS", "audio.window_seconds"),
    ("AUDIO_BATCH_SIZE", "audio.batch_size"),
    ("AUDIO_SAMPLE_RATE", "audio.sample_rate"),
];

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // The flat variables take priority over everything else.
        for (var, key) in ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(*key, value)?;
            }
        }

        let config: AppConfig = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly work.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server port cannot be 0");
        }
        if self.performance.max_concurrent_sessions == 0 {
            anyhow::bail!("max concurrent sessions must be greater than 0");
        }
        if self.stream.max_frame_width == 0 || self.stream.max_frame_height == 0 {
            anyhow::bail!("frame resolution ceiling must be at least 1x1");
        }
        if !(0.0..=1.0).contains(&self.stream.confidence_threshold) {
            anyhow::bail!("confidence threshold must be within [0, 1]");
        }
        if self.inference.remote_timeout_sec == 0 {
            anyhow::bail!("remote inference timeout must be greater than 0");
        }
        if self.audio.batch_size == 0 {
            anyhow::bail!("audio batch size must be greater than 0");
        }
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio sample rate must be greater than 0");
        }
        if self.audio.window_seconds <= 0.0 {
            anyhow::bail!("audio window must be greater than 0 seconds");
        }
        if self.audio.buffer_capacity == 0 {
            anyhow::bail!("audio buffer capacity must be greater than 0");
        }
        Ok(())
    }

    pub fn video_limits(&self) -> VideoLimits {
        VideoLimits {
            max_width: self.stream.max_frame_width,
            max_height: self.stream.max_frame_height,
            max_frame_bytes: self.stream.max_frame_size_bytes,
            blur_warning_threshold: self.stream.blur_warning_threshold,
        }
    }

    pub fn audio_window(&self) -> AudioWindowConfig {
        AudioWindowConfig {
            window_seconds: self.audio.window_seconds,
            batch_size: self.audio.batch_size,
            sample_rate: self.audio.sample_rate,
        }
    }

    /// Remote backend settings, or `None` when not configured.
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        let config = RemoteConfig {
            model_url: self.inference.remote_url.clone(),
            api_key: self.inference.remote_api_key.clone(),
            timeout: Duration::from_secs(self.inference.remote_timeout_sec),
        };
        config.is_configured().then_some(config)
    }

    /// Lazy local detector handle, when the fallback is enabled.
    pub fn local_detector(&self) -> Option<Arc<LazyDetector>> {
        if !self.inference.local_enabled {
            return None;
        }
        let path = PathBuf::from(&self.inference.local_weights_path);
        Some(Arc::new(LazyDetector::new(
            "local-detector",
            weights_factory(path),
        )))
    }

    /// Emotion classifier handle. None by default; deployments that embed a
    /// classifier register it here.
    pub fn emotion_classifier(&self) -> Option<Arc<LazyClassifier>> {
        None
    }

    /// Configuration block advertised to the client in `session_started`.
    pub fn started_config(&self) -> SessionConfigInfo {
        SessionConfigInfo {
            max_resolution: MaxResolution {
                width: self.stream.max_frame_width,
                height: self.stream.max_frame_height,
            },
            confidence_threshold: self.stream.confidence_threshold,
            idle_timeout_sec: self.stream.idle_timeout_sec,
            bbox_format: "absolute_px".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.stream.confidence_threshold, 0.5);
        assert_eq!(config.stream.max_frame_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.performance.max_concurrent_sessions, 10);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_config_requires_url_and_key() {
        let config = AppConfig::default();
        assert!(config.remote_config().is_none());

        let mut config = AppConfig::default();
        config.inference.remote_url = "https://detect.example.com/wounds/3".to_string();
        assert!(config.remote_config().is_none());

        config.inference.remote_api_key = "key".to_string();
        let remote = config.remote_config().unwrap();
        assert_eq!(remote.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_local_detector_gated_by_flag() {
        let config = AppConfig::default();
        assert!(config.local_detector().is_none());

        let mut config = AppConfig::default();
        config.inference.local_enabled = true;
        config.inference.local_weights_path = "weights.bin".to_string();
        assert!(config.local_detector().is_some());
    }

    #[test]
    fn test_started_config_advertises_bbox_convention() {
        let info = AppConfig::default().started_config();
        assert_eq!(info.bbox_format, "absolute_px");
        assert_eq!(info.max_resolution.width, 1280);
        assert_eq!(info.max_resolution.height, 720);
        assert_eq!(info.idle_timeout_sec, 30);
    }

    #[test]
    fn test_video_limits_mirror_stream_config() {
        let mut config = AppConfig::default();
        config.stream.max_frame_width = 640;
        config.stream.blur_warning_threshold = 55.0;
        let limits = config.video_limits();
        assert_eq!(limits.max_width, 640);
        assert_eq!(limits.blur_warning_threshold, 55.0);
    }
}
