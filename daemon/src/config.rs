use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::event::DaemonEvent;
use crate::game::{GameDescriptor, LocaleChanger, PollPolicy, DEFAULT_MAX_POLL_ATTEMPTS};
use crate::translate::TranslationBackendConfig;

pub const DEFAULT_INJECTOR_PATH: &str = "TextractorCLI.exe";
pub const DEFAULT_PID_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const MIN_PID_POLL_INTERVAL_MS: u64 = 50;

/// Root configuration structure. Deserialized from `<config_dir>/hookline/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    /// Game to launch at startup. Without one the daemon only serves status.
    #[serde(default)]
    pub game: Option<GameDescriptor>,
    /// Locale changers keyed by the id a game refers to.
    #[serde(default)]
    pub locale_changers: HashMap<String, LocaleChanger>,
    #[serde(default)]
    pub apis: Vec<TranslationBackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Textractor-compatible CLI host used for injection.
    #[serde(default = "default_injector_path")]
    pub injector_path: String,
    #[serde(default = "default_true")]
    pub segmenter_enabled: bool,
    #[serde(default = "default_pid_poll_interval_ms")]
    pub pid_poll_interval_ms: u64,
    #[serde(default = "default_pid_poll_max_attempts")]
    pub pid_poll_max_attempts: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            injector_path: DEFAULT_INJECTOR_PATH.to_string(),
            segmenter_enabled: true,
            pid_poll_interval_ms: DEFAULT_PID_POLL_INTERVAL_MS,
            pid_poll_max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl GlobalConfig {
    /// Pid discovery policy. The interval is floored so a typo cannot spin
    /// the process table; at least one attempt is always made.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.pid_poll_interval_ms.max(MIN_PID_POLL_INTERVAL_MS)),
            max_attempts: self.pid_poll_max_attempts.max(1),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Watches the parent directory of `path`. Whenever the config file is created
/// or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::UnboundedSender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to create config watcher");
            return;
        }
    };

    // Editors save by write-new + rename, which only the directory sees.
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!(path = %path.display(), "config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!(dir = %watch_dir.display(), error = %e, "failed to watch config directory");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = format!("{e:#}"), "config reload failed; keeping previous"),
            }
        }
    }
}

fn default_injector_path() -> String {
    DEFAULT_INJECTOR_PATH.to_string()
}

fn default_true() -> bool {
    true
}

fn default_pid_poll_interval_ms() -> u64 {
    DEFAULT_PID_POLL_INTERVAL_MS
}

fn default_pid_poll_max_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
