use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Where the supervised game currently is in its lifecycle.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No game configured or started.
    Idle,
    /// The game was launched and its pid is being polled for.
    Waiting,
    /// The pid is known and the injector has been asked to hook it.
    Attached,
    /// The attached process went away.
    Exited,
    /// Pid discovery gave up.
    NotFound,
}

/// Runtime status written by the daemon to `<config_dir>/hookline/status.toml`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslatorStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Code of the hook whose text is being translated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_hook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_text: Option<String>,
    /// RFC 3339 time of the last change.
    pub updated_at: String,
    /// Backend name to latest translation. Kept last: TOML tables follow plain keys.
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
}

impl TranslatorStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: SessionState::Idle,
            game: None,
            pid: None,
            display_hook: None,
            last_text: None,
            updated_at: chrono::Local::now().to_rfc3339(),
            translations: BTreeMap::new(),
        }
    }

    /// Stamps `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Local::now().to_rfc3339();
    }
}

impl Default for TranslatorStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist. Failures are logged,
/// never propagated.
pub fn write_status(path: &Path, status: &TranslatorStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %e, "failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(path = %path.display(), error = %e, "failed to write status file");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TranslatorStatus::new ─────────────────────────────────────────────────

    #[test]
    fn new_starts_idle() {
        let s = TranslatorStatus::new();
        assert_eq!(s.state, SessionState::Idle);
        assert!(s.translations.is_empty());
    }

    #[test]
    fn new_has_no_optional_fields() {
        let s = TranslatorStatus::new();
        assert!(s.game.is_none());
        assert!(s.pid.is_none());
        assert!(s.display_hook.is_none());
        assert!(s.last_text.is_none());
    }

    #[test]
    fn updated_at_is_rfc3339() {
        let s = TranslatorStatus::new();
        assert!(chrono::DateTime::parse_from_rfc3339(&s.updated_at).is_ok());
    }

    // ── SessionState serialization ────────────────────────────────────────────

    #[test]
    fn state_serializes_to_snake_case() {
        let mut s = TranslatorStatus::new();
        for (state, text) in [
            (SessionState::Idle, "idle"),
            (SessionState::Waiting, "waiting"),
            (SessionState::Attached, "attached"),
            (SessionState::Exited, "exited"),
            (SessionState::NotFound, "not_found"),
        ] {
            s.state = state;
            let out = toml::to_string_pretty(&s).unwrap();
            assert!(out.contains(&format!("state = \"{text}\"")), "{out}");
        }
    }

    // ── write_status ──────────────────────────────────────────────────────────

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("status.toml");
        write_status(&path, &TranslatorStatus::new());
        assert!(path.exists());
    }

    #[test]
    fn write_status_content_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");

        let mut original = TranslatorStatus::new();
        original.state = SessionState::Attached;
        original.game = Some("Sample".to_string());
        original.pid = Some(4242);
        original.last_text = Some("こんにちは".to_string());
        original.translations.insert("baidu".into(), "你好".into());
        original.translations.insert("google".into(), "...".into());

        write_status(&path, &original);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: TranslatorStatus = toml::from_str(&content).unwrap();

        assert_eq!(parsed.state, SessionState::Attached);
        assert_eq!(parsed.pid, Some(4242));
        assert_eq!(parsed.last_text.as_deref(), Some("こんにちは"));
        assert_eq!(parsed.translations, original.translations);
    }

    #[test]
    fn write_status_omits_none_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        write_status(&path, &TranslatorStatus::new());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("game"));
        assert!(!content.contains("pid"));
        assert!(!content.contains("display_hook"));
        assert!(!content.contains("last_text"));
    }
}
