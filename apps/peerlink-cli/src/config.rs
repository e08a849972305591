//! Client configuration.
//!
//! Stored as TOML at `$XDG_CONFIG_HOME/peerlink/config.toml`, falling back
//! to `~/.config/peerlink/config.toml`. Missing fields take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use peerlink_session::{RetryPolicy, SessionConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address `host` listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Address `join` dials.
    #[serde(default = "default_connect_addr")]
    pub connect_addr: String,

    /// Where received files are saved.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default)]
    pub session: SessionSection,
}

/// Session tunables. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub max_attempts: u32,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub liveness_timeout_ms: u64,
    pub chunk_size: usize,
    pub buffered_amount_high: u64,
    pub progress_interval_ms: u64,
    pub ack_delay_ms: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:7878".into()
}

fn default_connect_addr() -> String {
    "127.0.0.1:7878".into()
}

fn default_download_dir() -> PathBuf {
    home_dir().join("Downloads").join("peerlink")
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

impl Default for SessionSection {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            max_attempts: session.retry.max_attempts,
            connect_timeout_ms: session.retry.per_attempt_timeout.as_millis() as u64,
            heartbeat_interval_ms: session.heartbeat_interval.as_millis() as u64,
            liveness_timeout_ms: session.liveness_timeout.as_millis() as u64,
            chunk_size: session.chunk_size,
            buffered_amount_high: session.buffered_amount_high,
            progress_interval_ms: session.progress_interval.as_millis() as u64,
            ack_delay_ms: session.ack_delay.as_millis() as u64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            connect_addr: default_connect_addr(),
            download_dir: default_download_dir(),
            session: SessionSection::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location is created with defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    let config = Config::default();
                    config.save_to(&path)?;
                    Ok(config)
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Builds the session configuration. Values of zero fall back to the
    /// defaults.
    pub fn session_config(&self) -> SessionConfig {
        let base = SessionConfig::default();
        let s = &self.session;
        let ms = |value: u64, fallback: Duration| {
            if value == 0 {
                fallback
            } else {
                Duration::from_millis(value)
            }
        };

        SessionConfig {
            retry: RetryPolicy {
                max_attempts: if s.max_attempts == 0 {
                    base.retry.max_attempts
                } else {
                    s.max_attempts
                },
                per_attempt_timeout: ms(s.connect_timeout_ms, base.retry.per_attempt_timeout),
                ..base.retry.clone()
            },
            heartbeat_interval: ms(s.heartbeat_interval_ms, base.heartbeat_interval),
            liveness_timeout: ms(s.liveness_timeout_ms, base.liveness_timeout),
            chunk_size: if s.chunk_size == 0 {
                base.chunk_size
            } else {
                s.chunk_size
            },
            buffered_amount_high: if s.buffered_amount_high == 0 {
                base.buffered_amount_high
            } else {
                s.buffered_amount_high
            },
            progress_interval: ms(s.progress_interval_ms, base.progress_interval),
            ack_delay: Duration::from_millis(s.ack_delay_ms),
            ..base
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".config"));
    base.join("peerlink").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "0.0.0.0:7878");
        assert!(config.download_dir.ends_with("Downloads/peerlink"));
        assert_eq!(config.session.max_attempts, 3);
        assert_eq!(config.session.connect_timeout_ms, 8000);
        assert_eq!(config.session.heartbeat_interval_ms, 4000);
        assert_eq!(config.session_config(), SessionConfig::default());
    }

    #[test]
    fn partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            connect_addr = "192.168.1.20:9000"

            [session]
            liveness_timeout_ms = 15000
            "#,
        )
        .unwrap();
        assert_eq!(config.connect_addr, "192.168.1.20:9000");
        assert_eq!(config.listen_addr, "0.0.0.0:7878");

        let session = config.session_config();
        assert_eq!(session.liveness_timeout, Duration::from_secs(15));
        assert_eq!(session.heartbeat_interval, Duration::from_secs(4));
    }

    #[test]
    fn zero_values_fall_back() {
        let mut config = Config::default();
        config.session.chunk_size = 0;
        config.session.connect_timeout_ms = 0;
        let session = config.session_config();
        assert_eq!(session.chunk_size, SessionConfig::default().chunk_size);
        assert_eq!(
            session.retry.per_attempt_timeout,
            Duration::from_secs(8)
        );
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.download_dir = dir.path().join("inbox");
        config.session.ack_delay_ms = 250;
        config.save_to(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.session_config().ack_delay,
            Duration::from_millis(250)
        );
    }
}
