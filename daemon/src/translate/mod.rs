//! Translation fan-out over declaratively configured HTTP backends.

mod backend;
mod error;
mod extract;
mod orchestrator;
mod transport;

pub use backend::{Backend, HttpMethod, HttpRequest, RequestBody, TranslationBackendConfig, TEXT_TOKEN};
pub use error::{BackendError, ConfigError};
pub use extract::{ExtractionRule, PathSegment};
pub use orchestrator::{Orchestrator, TranslationResult, PENDING_PLACEHOLDER};
pub use transport::{ReqwestTransport, Transport};
