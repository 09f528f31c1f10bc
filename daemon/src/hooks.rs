//! Per-hook text buffers and display-hook selection.
//!
//! The store is owned by the daemon's event loop. Text arrives tagged with the
//! hook that produced it; every hook keeps the last [`MAX_STORE_COUNT`] lines
//! (and, once segmentation is detected, the matching pattern lists). New text
//! on the display hook clears the current translation and asks the
//! orchestrator for a fresh one.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::Emitter;
use crate::history::{BoundedHistory, MAX_STORE_COUNT};
use crate::segmenter::{Pattern, PatternList, Segmenter};
use crate::translate::{TranslationResult, PENDING_PLACEHOLDER};

/// Opaque handle of one text-emitting hook inside the target process.
pub type HookId = u64;

/// Monotonic id of a translation request issued by the store.
pub type RequestId = u64;

/// What the injector knows about a hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookInfo {
    pub id: HookId,
    pub name: String,
    /// Hook code, e.g. `HS-8@4A1B0:game.exe`. Matched case-insensitively
    /// against the game's saved display code.
    pub code: String,
}

/// Buffered history of one hook.
#[derive(Debug)]
pub struct HookRecord {
    info: HookInfo,
    texts: BoundedHistory<String>,
    patterns: BoundedHistory<PatternList>,
}

impl HookRecord {
    fn new(info: HookInfo) -> Self {
        Self {
            info,
            texts: BoundedHistory::new(MAX_STORE_COUNT),
            patterns: BoundedHistory::new(MAX_STORE_COUNT),
        }
    }

    pub fn info(&self) -> &HookInfo {
        &self.info
    }
}

/// Which hook drives translation, plus a hook code waiting to be matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplaySelection {
    pub active: Option<HookId>,
    pub pending_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub id: RequestId,
    pub hook: HookId,
    pub text: String,
}

/// Where the store sends translation requests.
pub trait TranslationRequester: Send + Sync {
    fn request_translation(&self, request: TranslationRequest);
}

impl TranslationRequester for mpsc::UnboundedSender<TranslationRequest> {
    fn request_translation(&self, request: TranslationRequest) {
        if self.send(request).is_err() {
            warn!("translation dispatcher is gone; request dropped");
        }
    }
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    HookRegistered(HookInfo),
    TextUpdated { hook: HookId, text: String },
    DisplayChanged(HookId),
    TranslationUpdated(TranslationResult),
}

pub struct HookStore {
    records: HashMap<HookId, HookRecord>,
    /// Registration order, for listing.
    order: Vec<HookId>,
    segmenter: Option<Box<dyn Segmenter>>,
    /// Sticky: once a segmented line is seen it stays on.
    segmentation: bool,
    display: DisplaySelection,
    translation: TranslationResult,
    next_request: RequestId,
    latest_request: Option<RequestId>,
    requester: Box<dyn TranslationRequester>,
    events: Emitter<StoreEvent>,
}

impl HookStore {
    pub fn new<R>(requester: R, segmenter: Option<Box<dyn Segmenter>>) -> Self
    where
        R: TranslationRequester + 'static,
    {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            segmenter,
            segmentation: false,
            display: DisplaySelection::default(),
            translation: TranslationResult::default(),
            next_request: 1,
            latest_request: None,
            requester: Box::new(requester),
            events: Emitter::new(),
        }
    }

    pub fn events(&self) -> &Emitter<StoreEvent> {
        &self.events
    }

    // ── hooks ─────────────────────────────────────────────────────────────────

    /// Creates empty buffers for an unseen hook. Returns `false` if the hook
    /// was already known.
    pub fn register_hook(&mut self, hook: &HookInfo) -> bool {
        if self.records.contains_key(&hook.id) {
            return false;
        }
        debug!(hook = hook.id, code = %hook.code, "hook registered");
        self.records.insert(hook.id, HookRecord::new(hook.clone()));
        self.order.push(hook.id);
        self.events.emit(&StoreEvent::HookRegistered(hook.clone()));

        let matches_pending = self
            .display
            .pending_code
            .as_deref()
            .is_some_and(|code| codes_match(code, &hook.code));
        if matches_pending {
            self.display.pending_code = None;
            self.select_display_hook(hook.id);
        }
        true
    }

    /// Remembers `code` so that the first hook registering with it (or an
    /// already known one) becomes the display hook. An empty code clears it.
    pub fn set_pending_display_code(&mut self, code: &str) {
        if code.is_empty() {
            self.display.pending_code = None;
            return;
        }
        let known = self
            .order
            .iter()
            .filter_map(|id| self.records.get(id))
            .find(|r| codes_match(&r.info.code, code))
            .map(|r| r.info.id);
        match known {
            Some(id) => {
                self.display.pending_code = None;
                self.select_display_hook(id);
            }
            None => self.display.pending_code = Some(code.to_string()),
        }
    }

    /// Makes `id` the display hook. Does not request a translation; the next
    /// line of text on that hook does.
    pub fn select_display_hook(&mut self, id: HookId) {
        if self.display.active == Some(id) {
            return;
        }
        info!(hook = id, "display hook selected");
        self.display.active = Some(id);
        self.events.emit(&StoreEvent::DisplayChanged(id));
    }

    pub fn display(&self) -> &DisplaySelection {
        &self.display
    }

    pub fn display_hook(&self) -> Option<&HookInfo> {
        self.display
            .active
            .and_then(|id| self.records.get(&id))
            .map(HookRecord::info)
    }

    /// Known hooks in registration order.
    pub fn hooks(&self) -> impl Iterator<Item = &HookInfo> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .map(HookRecord::info)
    }

    // ── text ──────────────────────────────────────────────────────────────────

    pub fn ingest_text(&mut self, hook: &HookInfo, raw: &str) {
        self.register_hook(hook);

        if !self.segmentation {
            if let Some(segmenter) = &self.segmenter {
                if segmenter.is_segmented_format(raw) {
                    info!("segmented text detected; segmentation enabled");
                    self.segmentation = true;
                }
            }
        }

        let text = match (&self.segmenter, self.segmentation) {
            (Some(segmenter), true) => {
                let patterns = segmenter.to_pattern_list(raw);
                let original = segmenter.pattern_list_to_original_text(&patterns);
                if let Some(record) = self.records.get_mut(&hook.id) {
                    record.patterns.push(patterns);
                }
                original
            }
            _ => raw.to_string(),
        };

        if let Some(record) = self.records.get_mut(&hook.id) {
            record.texts.push(text.clone());
        }
        self.events.emit(&StoreEvent::TextUpdated {
            hook: hook.id,
            text: text.clone(),
        });

        if self.display.active == Some(hook.id) {
            self.translation.original = text.clone();
            self.clear_translation();
            let id = self.next_request;
            self.next_request += 1;
            self.latest_request = Some(id);
            self.requester.request_translation(TranslationRequest {
                id,
                hook: hook.id,
                text,
            });
        }
    }

    pub fn is_segmentation_enabled(&self) -> bool {
        self.segmentation
    }

    /// Text history of `id`, oldest first. Empty for unknown hooks.
    pub fn texts(&self, id: HookId) -> Vec<&str> {
        self.records
            .get(&id)
            .map(|r| r.texts.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Latest line of `id`, or `""` if none yet.
    pub fn last_text(&self, id: HookId) -> &str {
        self.records
            .get(&id)
            .and_then(|r| r.texts.last())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Latest pattern list of `id`, or an empty slice.
    pub fn last_patterns(&self, id: HookId) -> &[Pattern] {
        self.records
            .get(&id)
            .and_then(|r| r.patterns.last())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ── translation ───────────────────────────────────────────────────────────

    pub fn translation(&self) -> &TranslationResult {
        &self.translation
    }

    /// Ensures every name has an entry, adding placeholders for new ones.
    pub fn seed_translation_keys(&mut self, names: &[String]) {
        for name in names {
            self.translation
                .translations
                .entry(name.clone())
                .or_insert_with(|| PENDING_PLACEHOLDER.to_string());
        }
    }

    /// Makes the key set exactly `names`: unknown keys are dropped, new ones
    /// get a placeholder, surviving values are kept.
    pub fn sync_translation_keys(&mut self, names: &[String]) {
        self.translation
            .translations
            .retain(|key, _| names.contains(key));
        self.seed_translation_keys(names);
        self.events
            .emit(&StoreEvent::TranslationUpdated(self.translation.clone()));
    }

    pub fn clear_translation(&mut self) {
        self.translation.clear();
        self.events
            .emit(&StoreEvent::TranslationUpdated(self.translation.clone()));
    }

    pub fn set_translation(&mut self, result: TranslationResult) {
        self.translation = result;
        self.events
            .emit(&StoreEvent::TranslationUpdated(self.translation.clone()));
    }

    pub fn merge_translation(&mut self, partial: BTreeMap<String, String>) {
        self.translation.merge(partial);
        self.events
            .emit(&StoreEvent::TranslationUpdated(self.translation.clone()));
    }

    /// Installs the final aggregate of `request`. Stale requests are ignored;
    /// returns whether the result was applied.
    pub fn apply_translation(&mut self, request: RequestId, result: TranslationResult) -> bool {
        if self.latest_request != Some(request) {
            debug!(request, "stale translation result dropped");
            return false;
        }
        self.set_translation(result);
        true
    }

    /// Merges one backend's answer for `request`, unless it is stale.
    pub fn apply_partial(&mut self, request: RequestId, backend: &str, text: &str) -> bool {
        if self.latest_request != Some(request) {
            debug!(request, backend, "stale partial translation dropped");
            return false;
        }
        self.merge_translation([(backend.to_string(), text.to_string())].into());
        true
    }
}

/// Hook codes compare case-insensitively, Unicode-aware.
fn codes_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}
