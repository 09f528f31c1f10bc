use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use super::backend::{Backend, TranslationBackendConfig};
use super::error::{BackendError, ConfigError};
use super::transport::Transport;

/// Shown in place of a translation that has been requested but not yet received.
pub const PENDING_PLACEHOLDER: &str = "...";

/// Aggregate of one translation request, keyed by backend name.
///
/// Partial by nature: a missing key means that backend did not (or not yet)
/// contribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranslationResult {
    pub original: String,
    pub translations: BTreeMap<String, String>,
}

impl TranslationResult {
    pub fn new(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            translations: BTreeMap::new(),
        }
    }

    /// Overwrites only the keys present in `partial`; last write wins.
    pub fn merge(&mut self, partial: BTreeMap<String, String>) {
        self.translations.extend(partial);
    }

    /// Replaces every value with [`PENDING_PLACEHOLDER`], keeping the key set.
    pub fn clear(&mut self) {
        for value in self.translations.values_mut() {
            *value = PENDING_PLACEHOLDER.to_string();
        }
    }
}

/// Fans a string out to every enabled backend and collects the successes.
///
/// The backend set is swapped atomically by [`Orchestrator::configure`]; a
/// fan-out already in flight keeps the set it started with.
pub struct Orchestrator<T> {
    transport: Arc<T>,
    backends: RwLock<Arc<Vec<Backend>>>,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            backends: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Validates and installs a new backend set. On error the previous set is
    /// left untouched.
    pub fn configure(&self, configs: &[TranslationBackendConfig]) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(configs.len());
        for config in configs {
            let backend = Backend::resolve(config)?;
            if !seen.insert(backend.name().to_string()) {
                return Err(ConfigError::DuplicateName(backend.name().to_string()));
            }
            resolved.push(backend);
        }

        info!(
            total = resolved.len(),
            enabled = resolved.iter().filter(|b| b.is_enabled()).count(),
            "translation backends configured"
        );
        *self.backends.write() = Arc::new(resolved);
        Ok(())
    }

    /// Names of the enabled backends, in configuration order.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends
            .read()
            .iter()
            .filter(|b| b.is_enabled())
            .map(|b| b.name().to_string())
            .collect()
    }

    /// Translates `text` with every enabled backend and calls `callback` once,
    /// after all of them have settled. Failed backends are left out.
    pub async fn translate_all<F>(&self, text: &str, callback: F)
    where
        F: FnOnce(TranslationResult),
    {
        let result = self.translate_each(text, |_, _| {}).await;
        callback(result);
    }

    /// Like [`Orchestrator::translate_all`], but also reports each success to
    /// `on_partial` as soon as it arrives. Returns the aggregate.
    pub async fn translate_each<F>(&self, text: &str, mut on_partial: F) -> TranslationResult
    where
        F: FnMut(&str, &str),
    {
        let backends = Arc::clone(&self.backends.read());
        let mut result = TranslationResult::new(text);

        let mut pending: FuturesUnordered<_> = backends
            .iter()
            .filter(|b| b.is_enabled())
            .map(|backend| async move { (backend.name(), self.request(backend, text).await) })
            .collect();

        while let Some((name, outcome)) = pending.next().await {
            match outcome {
                Ok(translation) => {
                    on_partial(name, &translation);
                    result.translations.insert(name.to_string(), translation);
                }
                Err(e) => debug!(backend = name, error = %e, "backend dropped from result"),
            }
        }

        result
    }

    async fn request(&self, backend: &Backend, text: &str) -> Result<String, BackendError> {
        let request = backend.render(text)?;
        let body = self.transport.send(request).await?;
        backend.rule().extract(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::backend::tests::api;
    use crate::translate::backend::HttpRequest;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const TEXT: &str = "悠真くんを攻略すれば２１０円か。なるほどなぁ…";

    enum Reply {
        Body(&'static str, u64),
        Status(u16),
    }

    /// Canned responses keyed by url, with an optional delay in milliseconds.
    #[derive(Default)]
    struct FakeTransport {
        replies: HashMap<String, Reply>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeTransport {
        fn reply(mut self, backend: &str, body: &'static str, delay_ms: u64) -> Self {
            self.replies
                .insert(format!("https://{backend}.example/translate"), Reply::Body(body, delay_ms));
            self
        }

        fn status(mut self, backend: &str, status: u16) -> Self {
            self.replies
                .insert(format!("https://{backend}.example/translate"), Reply::Status(status));
            self
        }
    }

    impl Transport for FakeTransport {
        async fn send(&self, request: HttpRequest) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(&request.url) {
                Some(Reply::Body(body, delay)) => {
                    tokio::time::sleep(Duration::from_millis(*delay)).await;
                    Ok(body.to_string())
                }
                Some(Reply::Status(code)) => Err(BackendError::Status(*code)),
                None => Err(BackendError::Transport("connection refused".into())),
            }
        }
    }

    fn baidu(enable: bool) -> TranslationBackendConfig {
        api(
            "baidu",
            r#"X{"query": %TEXT%, "from": "jp", "to": "zh"}"#,
            "J%RESPONSE%.data[0].dst",
            enable,
        )
    }

    fn google(enable: bool) -> TranslationBackendConfig {
        api(
            "google",
            r#"X{"q": %TEXT%, "sl": "ja", "hl": "zh-CN"}"#,
            r#"Rclass="t0">([^<]*)<"#,
            enable,
        )
    }

    const BAIDU_BODY: &str = r#"{"data":[{"dst":"如果攻略悠真210日元吗？原来如此……"}]}"#;
    const GOOGLE_BODY: &str = r#"<div class="t0">如果你攻略悠真是210日元？我明白了</div>"#;

    async fn collect<T: Transport>(orch: &Orchestrator<T>, text: &str) -> Vec<TranslationResult> {
        let mut seen = Vec::new();
        orch.translate_all(text, |r| seen.push(r)).await;
        seen
    }

    // ── configure ─────────────────────────────────────────────────────────────

    #[test]
    fn configure_rejects_duplicate_names() {
        let orch = Orchestrator::new(FakeTransport::default());
        let err = orch.configure(&[baidu(true), baidu(false)]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "baidu"));
    }

    #[test]
    fn failed_configure_keeps_previous_set() {
        let orch = Orchestrator::new(FakeTransport::default());
        orch.configure(&[baidu(true)]).unwrap();
        let mut broken = google(true);
        broken.response_body_pattern = "nonsense".into();
        assert!(orch.configure(&[google(true), broken]).is_err());
        assert_eq!(orch.backend_names(), vec!["baidu".to_string()]);
    }

    #[test]
    fn backend_names_lists_enabled_only() {
        let orch = Orchestrator::new(FakeTransport::default());
        orch.configure(&[baidu(true), google(false)]).unwrap();
        assert_eq!(orch.backend_names(), vec!["baidu".to_string()]);
    }

    // ── translate_all ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn no_enabled_backend_yields_empty_result_once() {
        let transport = FakeTransport::default().reply("baidu", BAIDU_BODY, 0);
        let calls = Arc::clone(&transport.calls);
        let orch = Orchestrator::new(transport);
        orch.configure(&[baidu(false), google(false)]).unwrap();

        let seen = collect(&orch, TEXT).await;
        assert_eq!(seen, vec![TranslationResult::new(TEXT)]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_backend_never_appears() {
        let transport = FakeTransport::default()
            .reply("baidu", BAIDU_BODY, 0)
            .reply("google", GOOGLE_BODY, 0);
        let calls = Arc::clone(&transport.calls);
        let orch = Orchestrator::new(transport);
        orch.configure(&[baidu(true), google(false)]).unwrap();

        let seen = collect(&orch, TEXT).await;
        assert_eq!(seen.len(), 1);
        let expected: BTreeMap<String, String> =
            [("baidu".to_string(), "如果攻略悠真210日元吗？原来如此……".to_string())].into();
        assert_eq!(seen[0].original, TEXT);
        assert_eq!(seen[0].translations, expected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_backends_contribute_regardless_of_arrival_order() {
        // The first-configured backend answers last.
        let transport = FakeTransport::default()
            .reply("baidu", BAIDU_BODY, 60)
            .reply("google", GOOGLE_BODY, 0);
        let orch = Orchestrator::new(transport);
        orch.configure(&[baidu(true), google(true)]).unwrap();

        let seen = collect(&orch, TEXT).await;
        assert_eq!(seen.len(), 1);
        let t = &seen[0].translations;
        assert_eq!(t.len(), 2);
        assert_eq!(t["baidu"], "如果攻略悠真210日元吗？原来如此……");
        assert_eq!(t["google"], "如果你攻略悠真是210日元？我明白了");
    }

    #[tokio::test]
    async fn failing_backends_are_dropped_silently() {
        let transport = FakeTransport::default()
            .reply("baidu", r#"{"error":"quota"}"#, 0)
            .status("google", 503)
            .reply("deepl", r#"{"text":"ok"}"#, 0);
        let orch = Orchestrator::new(transport);
        let deepl = api("deepl", r#"J{"text": %TEXT%}"#, "J%RESPONSE%.text", true);
        let offline = api("offline", r#"J{"text": %TEXT%}"#, "J%RESPONSE%.text", true);
        orch.configure(&[baidu(true), google(true), deepl, offline]).unwrap();

        let seen = collect(&orch, TEXT).await;
        assert_eq!(seen.len(), 1);
        let keys: Vec<&String> = seen[0].translations.keys().collect();
        assert_eq!(keys, vec!["deepl"]);
    }

    // ── translate_each ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn partials_arrive_in_completion_order() {
        let transport = FakeTransport::default()
            .reply("baidu", BAIDU_BODY, 60)
            .reply("google", GOOGLE_BODY, 0);
        let orch = Orchestrator::new(transport);
        orch.configure(&[baidu(true), google(true)]).unwrap();

        let mut order = Vec::new();
        let result = orch
            .translate_each(TEXT, |name, _| order.push(name.to_string()))
            .await;
        assert_eq!(order, vec!["google".to_string(), "baidu".to_string()]);
        assert_eq!(result.translations.len(), 2);
    }

    // ── merge / clear ─────────────────────────────────────────────────────────

    #[test]
    fn merge_is_last_write_wins_per_key() {
        let mut r = TranslationResult::new("x");
        r.merge([("A".to_string(), "x".to_string())].into());
        r.merge([("B".to_string(), "y".to_string())].into());
        assert_eq!(r.translations["A"], "x");
        assert_eq!(r.translations["B"], "y");

        r.merge([("A".to_string(), "z".to_string())].into());
        assert_eq!(r.translations["A"], "z");
        assert_eq!(r.translations["B"], "y");
        assert_eq!(r.translations.len(), 2);
    }

    #[test]
    fn clear_replaces_values_but_keeps_keys() {
        let mut r = TranslationResult::new("x");
        r.merge([("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())].into());
        r.clear();
        assert_eq!(r.translations.len(), 2);
        assert!(r.translations.values().all(|v| v == PENDING_PLACEHOLDER));
    }
}
