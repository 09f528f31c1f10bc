use thiserror::Error;

/// Rejected backend configuration. Raised by `configure` before anything is
/// dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("backend name must not be empty")]
    EmptyName,

    #[error("duplicate backend name '{0}'")]
    DuplicateName(String),

    #[error("backend '{backend}': unsupported HTTP method '{method}'")]
    UnsupportedMethod { backend: String, method: String },

    #[error("backend '{backend}': malformed request template: {reason}")]
    MalformedTemplate { backend: String, reason: String },

    #[error("backend '{0}': neither url nor request body contains %TEXT%")]
    MissingTextToken(String),

    #[error("backend '{backend}': malformed response rule: {reason}")]
    MalformedRule { backend: String, reason: String },

    #[error("backend '{backend}': invalid response pattern")]
    InvalidPattern {
        backend: String,
        #[source]
        source: regex::Error,
    },
}

/// Why a single backend did not contribute to a translation. Absorbed by the
/// orchestrator; only logged.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request could not be built: {0}")]
    Render(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("response could not be decoded: {0}")]
    Decode(String),

    #[error("response did not match the extraction rule")]
    Miss,
}
