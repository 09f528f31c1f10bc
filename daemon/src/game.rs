//! Game process supervision: launch, pid discovery, injection, exit watch.
//!
//! A [`Supervisor`] owns its collaborators (launcher, process table, injector,
//! exit notifier) and publishes [`SessionEvent`]s through its own emitter.
//! `start` returns immediately; discovery runs as a background task driven by
//! the [`Discovery`] state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::Emitter;
use crate::injector::Injector;
use crate::process_monitor::{finds_pid_in, parse_pid_from, ExitNotifier, Launcher, ProcessTable};

/// Token in a locale changer's exec template replaced by the quoted game path.
pub const GAME_PATH_TOKEN: &str = "%GAME_PATH%";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 10;

/// A game as saved by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDescriptor {
    pub name: String,
    /// Hook code of the text hook chosen for display last time.
    #[serde(default)]
    pub code: String,
    pub path: String,
    /// Key into the configured locale changers; empty for none.
    #[serde(default)]
    pub locale_changer: String,
}

impl GameDescriptor {
    /// File name of the executable, used to find it in the process table.
    pub fn exe_name(&self) -> &str {
        self.path
            .rsplit(|c| c == '\\' || c == '/')
            .next()
            .unwrap_or(&self.path)
    }
}

/// A locale-adaptation wrapper, e.g. Locale Emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleChanger {
    pub name: String,
    /// Command line containing [`GAME_PATH_TOKEN`].
    pub exec: String,
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("unknown locale changer '{0}'")]
    UnknownLocaleChanger(String),

    #[error("failed to launch game")]
    Launch(#[source] anyhow::Error),
}

/// One run of a game.
#[derive(Debug)]
pub struct GameSession {
    descriptor: GameDescriptor,
    exec_string: String,
    pid: Mutex<Option<u32>>,
}

impl GameSession {
    fn new(descriptor: GameDescriptor, exec_string: String) -> Self {
        Self {
            descriptor,
            exec_string,
            pid: Mutex::new(None),
        }
    }

    pub fn descriptor(&self) -> &GameDescriptor {
        &self.descriptor
    }

    pub fn exec_string(&self) -> &str {
        &self.exec_string
    }

    /// `None` until discovered, and again after the process exits.
    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    fn set_pid(&self, pid: Option<u32>) {
        *self.pid.lock() = pid;
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Pid found and injection requested.
    Attached(Arc<GameSession>),
    /// Retry budget exhausted without seeing the process.
    NotFound(Arc<GameSession>),
    /// The attached process exited.
    Exited(Arc<GameSession>),
}

impl SessionEvent {
    pub fn session(&self) -> &Arc<GameSession> {
        match self {
            SessionEvent::Attached(s) | SessionEvent::NotFound(s) | SessionEvent::Exited(s) => s,
        }
    }
}

// ── Pid discovery ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

/// Bounded-retry pid discovery, advanced one poll response at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// `attempt` polls have missed so far.
    Polling { attempt: u32 },
    Found(u32),
    Exhausted,
}

impl Discovery {
    pub fn start() -> Self {
        Discovery::Polling { attempt: 0 }
    }

    /// Feeds one poll result. `None` stands for a failed query and counts as
    /// a miss. Terminal states absorb further input.
    pub fn advance(self, response: Option<&str>, max_attempts: u32) -> Self {
        let Discovery::Polling { attempt } = self else {
            return self;
        };
        let pid = response
            .filter(|out| finds_pid_in(out))
            .and_then(parse_pid_from);
        match pid {
            Some(pid) => Discovery::Found(pid),
            None if attempt + 1 >= max_attempts => Discovery::Exhausted,
            None => Discovery::Polling {
                attempt: attempt + 1,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Discovery::Polling { .. })
    }
}

/// Polls `table` every `policy.interval` until the discovery settles.
/// Polls are strictly sequential; a slow query delays the next one.
pub async fn discover_pid(
    table: Arc<dyn ProcessTable>,
    exe_name: &str,
    policy: PollPolicy,
) -> Option<u32> {
    let mut state = Discovery::start();
    while !state.is_terminal() {
        tokio::time::sleep(policy.interval).await;

        let query_table = Arc::clone(&table);
        let name = exe_name.to_string();
        let response = match tokio::task::spawn_blocking(move || query_table.query(&name)).await {
            Ok(Ok(out)) => Some(out),
            Ok(Err(e)) => {
                debug!(error = %e, "process table query failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "process table query panicked");
                None
            }
        };

        state = state.advance(response.as_deref(), policy.max_attempts);
        if let Discovery::Polling { attempt } = state {
            debug!(exe = exe_name, attempt, "game not found yet");
        }
    }
    match state {
        Discovery::Found(pid) => Some(pid),
        _ => None,
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

pub struct Supervisor {
    locale_changers: HashMap<String, LocaleChanger>,
    policy: PollPolicy,
    launcher: Arc<dyn Launcher>,
    table: Arc<dyn ProcessTable>,
    injector: Arc<dyn Injector>,
    exit_notifier: Arc<dyn ExitNotifier>,
    events: Arc<Emitter<SessionEvent>>,
}

impl Supervisor {
    pub fn new(
        locale_changers: HashMap<String, LocaleChanger>,
        policy: PollPolicy,
        launcher: Arc<dyn Launcher>,
        table: Arc<dyn ProcessTable>,
        injector: Arc<dyn Injector>,
        exit_notifier: Arc<dyn ExitNotifier>,
    ) -> Self {
        Self {
            locale_changers,
            policy,
            launcher,
            table,
            injector,
            exit_notifier,
            events: Arc::new(Emitter::new()),
        }
    }

    pub fn events(&self) -> &Emitter<SessionEvent> {
        &self.events
    }

    /// Builds the command line for `descriptor`: the locale changer's template
    /// with the quoted path substituted, or just the quoted path.
    pub fn exec_string(&self, descriptor: &GameDescriptor) -> Result<String, AttachError> {
        let quoted = format!("\"{}\"", descriptor.path);
        if descriptor.locale_changer.is_empty() {
            debug!("no locale changer chosen");
            return Ok(quoted);
        }
        let changer = self
            .locale_changers
            .get(&descriptor.locale_changer)
            .ok_or_else(|| AttachError::UnknownLocaleChanger(descriptor.locale_changer.clone()))?;
        debug!(changer = %changer.name, "using locale changer");
        Ok(changer.exec.replacen(GAME_PATH_TOKEN, &quoted, 1))
    }

    /// Launches the game and starts pid discovery in the background. Progress
    /// is reported through [`Supervisor::events`].
    pub fn start(&self, descriptor: GameDescriptor) -> Result<Arc<GameSession>, AttachError> {
        let exec_string = self.exec_string(&descriptor)?;
        info!(game = %descriptor.name, exec = %exec_string, "launching game");
        self.launcher
            .launch(&exec_string)
            .map_err(AttachError::Launch)?;

        let session = Arc::new(GameSession::new(descriptor, exec_string));
        tokio::spawn(attach(
            Arc::clone(&session),
            self.policy,
            Arc::clone(&self.table),
            Arc::clone(&self.injector),
            Arc::clone(&self.exit_notifier),
            Arc::clone(&self.events),
        ));
        Ok(session)
    }
}

async fn attach(
    session: Arc<GameSession>,
    policy: PollPolicy,
    table: Arc<dyn ProcessTable>,
    injector: Arc<dyn Injector>,
    exit_notifier: Arc<dyn ExitNotifier>,
    events: Arc<Emitter<SessionEvent>>,
) {
    let exe_name = session.descriptor().exe_name().to_string();
    info!(exe = %exe_name, "finding pid");

    let Some(pid) = discover_pid(table, &exe_name, policy).await else {
        warn!(exe = %exe_name, attempts = policy.max_attempts, "could not find game");
        events.emit(&SessionEvent::NotFound(session));
        return;
    };

    info!(pid, "found game");
    session.set_pid(Some(pid));
    events.emit(&SessionEvent::Attached(Arc::clone(&session)));
    injector.inject_process(pid);

    let exited = Arc::clone(&session);
    exit_notifier.on_process_exit(
        pid,
        Box::new(move || {
            info!(pid, "game exited");
            exited.set_pid(None);
            events.emit(&SessionEvent::Exited(exited));
        }),
    );
}
