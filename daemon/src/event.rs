use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::game::SessionEvent;
use crate::hooks::RequestId;
use crate::injector::HookEvent;
use crate::translate::TranslationResult;

/// Everything the daemon's main loop reacts to.
pub enum DaemonEvent {
    /// Supervisor lifecycle: attached, not found, exited.
    Session(SessionEvent),
    /// The injector reported a line of text from one hook.
    HookText(HookEvent),
    /// One backend finished for a pending request.
    TranslationPartial {
        request: RequestId,
        backend: String,
        text: String,
    },
    /// Every backend of a request has settled.
    TranslationFinished {
        request: RequestId,
        result: TranslationResult,
    },
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C received; the daemon should write its final status and exit.
    Shutdown,
}

/// Handle returned by [`Emitter::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Typed observer registry. One instance is owned by each component that
/// publishes events; there is no process-wide emitter.
pub struct Emitter<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if `id` was not (or no longer) subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Delivers `event` to every listener in subscription order.
    ///
    /// Listeners are called outside the registry lock, so a listener may
    /// subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
