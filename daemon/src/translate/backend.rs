use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{BackendError, ConfigError};
use super::extract::{ExtractionRule, RuleError};

/// Substituted with the source text in urls and request bodies.
pub const TEXT_TOKEN: &str = "%TEXT%";

/// One translation provider as written in `config.toml`.
///
/// `request_body_format` is a one-letter encoding tag (`X` form, `J` JSON)
/// followed by a JSON object template; `response_body_pattern` is either
/// `J%RESPONSE%<path>` or `R<regex>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationBackendConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, alias = "requestBodyFormat")]
    pub request_body_format: String,
    #[serde(alias = "responseBodyPattern")]
    pub response_body_pattern: String,
    #[serde(default = "default_enable")]
    pub enable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BodyTemplate {
    Empty,
    Form(String),
    Json(String),
}

/// Body of a rendered request, ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: RequestBody,
}

/// A validated backend: method, templates and extraction rule resolved once.
#[derive(Debug, Clone)]
pub struct Backend {
    name: String,
    enabled: bool,
    method: HttpMethod,
    url: String,
    body: BodyTemplate,
    rule: ExtractionRule,
}

impl Backend {
    pub fn resolve(config: &TranslationBackendConfig) -> Result<Self, ConfigError> {
        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let method = match config.method.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            _ => {
                return Err(ConfigError::UnsupportedMethod {
                    backend: name,
                    method: config.method.clone(),
                })
            }
        };

        let body = parse_body_template(&config.request_body_format).map_err(|reason| {
            ConfigError::MalformedTemplate {
                backend: name.clone(),
                reason,
            }
        })?;

        if !config.url.contains(TEXT_TOKEN) && !body.contains_token() {
            return Err(ConfigError::MissingTextToken(name));
        }

        let rule = ExtractionRule::parse(&config.response_body_pattern).map_err(|e| match e {
            RuleError::Malformed(reason) => ConfigError::MalformedRule {
                backend: name.clone(),
                reason,
            },
            RuleError::Pattern(source) => ConfigError::InvalidPattern {
                backend: name.clone(),
                source,
            },
        })?;

        let backend = Self {
            name,
            enabled: config.enable,
            method,
            url: config.url.clone(),
            body,
            rule,
        };

        // Dry-run the body template so a broken one fails here, not per request.
        backend
            .render("probe")
            .map_err(|e| ConfigError::MalformedTemplate {
                backend: backend.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(backend)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rule(&self) -> &ExtractionRule {
        &self.rule
    }

    /// Builds the concrete request for `text`.
    pub fn render(&self, text: &str) -> Result<HttpRequest, BackendError> {
        let encoded = utf8_percent_encode(text, NON_ALPHANUMERIC).to_string();
        let url = self.url.replace(TEXT_TOKEN, &encoded);

        let body = match &self.body {
            BodyTemplate::Empty => RequestBody::Empty,
            BodyTemplate::Form(template) => {
                let object = substitute_object(template, text)?;
                RequestBody::Form(
                    object
                        .into_iter()
                        .map(|(k, v)| match v {
                            Value::String(s) => (k, s),
                            other => (k, other.to_string()),
                        })
                        .collect(),
                )
            }
            BodyTemplate::Json(template) => {
                RequestBody::Json(Value::Object(substitute_object(template, text)?))
            }
        };

        Ok(HttpRequest {
            method: self.method,
            url,
            body,
        })
    }
}

impl BodyTemplate {
    fn contains_token(&self) -> bool {
        match self {
            BodyTemplate::Empty => false,
            BodyTemplate::Form(t) | BodyTemplate::Json(t) => t.contains(TEXT_TOKEN),
        }
    }
}

fn parse_body_template(format: &str) -> Result<BodyTemplate, String> {
    let format = format.trim();
    let mut chars = format.chars();
    match chars.next() {
        None => Ok(BodyTemplate::Empty),
        Some('X') => Ok(BodyTemplate::Form(chars.as_str().to_string())),
        Some('J') => Ok(BodyTemplate::Json(chars.as_str().to_string())),
        Some(tag) => Err(format!("unknown body tag '{tag}'")),
    }
}

/// Replaces every `%TEXT%` with the JSON-string form of `text` and parses the
/// result, which must be a JSON object.
fn substitute_object(template: &str, text: &str) -> Result<Map<String, Value>, BackendError> {
    let quoted = serde_json::to_string(text).map_err(|e| BackendError::Render(e.to_string()))?;
    let filled = template.replace(TEXT_TOKEN, &quoted);
    match serde_json::from_str::<Value>(&filled) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(BackendError::Render("body template is not a JSON object".to_string())),
        Err(e) => Err(BackendError::Render(e.to_string())),
    }
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_enable() -> bool {
    true
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn api(name: &str, body: &str, pattern: &str, enable: bool) -> TranslationBackendConfig {
        TranslationBackendConfig {
            name: name.to_string(),
            url: format!("https://{name}.example/translate"),
            method: "POST".to_string(),
            request_body_format: body.to_string(),
            response_body_pattern: pattern.to_string(),
            enable,
        }
    }

    // ── resolve ───────────────────────────────────────────────────────────────

    #[test]
    fn resolves_form_backend() {
        let cfg = api(
            "baidu",
            r#"X{"query": %TEXT%, "from": "jp", "to": "zh"}"#,
            "J%RESPONSE%.data[0].dst",
            true,
        );
        let backend = Backend::resolve(&cfg).unwrap();
        assert_eq!(backend.name(), "baidu");
        assert!(backend.is_enabled());
        assert!(matches!(backend.rule(), ExtractionRule::StructuredPath(_)));
    }

    #[test]
    fn method_is_case_insensitive_and_validated() {
        let mut cfg = api("a", r#"J{"q": %TEXT%}"#, "J%RESPONSE%.t", true);
        cfg.method = "get".into();
        assert!(Backend::resolve(&cfg).is_ok());
        cfg.method = "PATCH".into();
        assert!(matches!(
            Backend::resolve(&cfg),
            Err(ConfigError::UnsupportedMethod { .. })
        ));
    }

    #[test]
    fn rejects_unknown_body_tag_and_broken_json() {
        let cfg = api("a", r#"Q{"q": %TEXT%}"#, "J%RESPONSE%.t", true);
        assert!(matches!(
            Backend::resolve(&cfg),
            Err(ConfigError::MalformedTemplate { .. })
        ));
        let cfg = api("a", r#"X{"q": %TEXT%"#, "J%RESPONSE%.t", true);
        assert!(matches!(
            Backend::resolve(&cfg),
            Err(ConfigError::MalformedTemplate { .. })
        ));
        let cfg = api("a", r#"X[%TEXT%]"#, "J%RESPONSE%.t", true);
        assert!(matches!(
            Backend::resolve(&cfg),
            Err(ConfigError::MalformedTemplate { .. })
        ));
    }

    #[test]
    fn requires_text_token_somewhere() {
        let cfg = api("a", r#"X{"q": "fixed"}"#, "J%RESPONSE%.t", true);
        assert!(matches!(
            Backend::resolve(&cfg),
            Err(ConfigError::MissingTextToken(_))
        ));

        let mut cfg = api("a", "", "J%RESPONSE%.t", true);
        cfg.url = "https://a.example/t?q=%TEXT%".into();
        cfg.method = "GET".into();
        assert!(Backend::resolve(&cfg).is_ok());
    }

    #[test]
    fn rejects_blank_name() {
        let cfg = api("  ", r#"J{"q": %TEXT%}"#, "J%RESPONSE%.t", true);
        assert!(matches!(Backend::resolve(&cfg), Err(ConfigError::EmptyName)));
    }

    #[test]
    fn invalid_regex_is_reported_with_source() {
        let cfg = api("a", r#"J{"q": %TEXT%}"#, "R([a-", true);
        assert!(matches!(
            Backend::resolve(&cfg),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    // ── render ────────────────────────────────────────────────────────────────

    #[test]
    fn form_body_carries_raw_text_and_stringified_values() {
        let cfg = api("a", r#"X{"q": %TEXT%, "sl": "ja", "n": 3}"#, "J%RESPONSE%.t", true);
        let backend = Backend::resolve(&cfg).unwrap();
        let req = backend.render("\"引用\"\nです").unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        let RequestBody::Form(pairs) = req.body else {
            panic!("expected form body");
        };
        assert!(pairs.contains(&("q".to_string(), "\"引用\"\nです".to_string())));
        assert!(pairs.contains(&("sl".to_string(), "ja".to_string())));
        assert!(pairs.contains(&("n".to_string(), "3".to_string())));
    }

    #[test]
    fn json_body_escapes_text() {
        let cfg = api("a", r#"J{"text": %TEXT%}"#, "J%RESPONSE%.t", true);
        let backend = Backend::resolve(&cfg).unwrap();
        let req = backend.render("a\"b").unwrap();
        assert_eq!(req.body, RequestBody::Json(serde_json::json!({ "text": "a\"b" })));
    }

    #[test]
    fn url_token_is_percent_encoded() {
        let mut cfg = api("a", "", "J%RESPONSE%.t", true);
        cfg.url = "https://a.example/t?q=%TEXT%&sl=ja".into();
        let backend = Backend::resolve(&cfg).unwrap();
        let req = backend.render("a b&c").unwrap();
        assert_eq!(req.url, "https://a.example/t?q=a%20b%26c&sl=ja");
        assert_eq!(req.body, RequestBody::Empty);
    }

    // ── serde ─────────────────────────────────────────────────────────────────

    #[test]
    fn config_defaults_method_and_enable() {
        let cfg: TranslationBackendConfig = toml::from_str(
            r#"
name = "google"
url = "https://translate.example/m"
request_body_format = 'X{"q": %TEXT%}'
response_body_pattern = 'Rclass="t0">([^<]*)<'
"#,
        )
        .unwrap();
        assert_eq!(cfg.method, "POST");
        assert!(cfg.enable);
    }
}
