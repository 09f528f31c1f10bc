use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hookline::config;
use hookline::event::DaemonEvent;
use hookline::game::{SessionEvent, Supervisor};
use hookline::hooks::{HookStore, StoreEvent, TranslationRequest};
use hookline::injector::{HookEvent, TextractorCli};
use hookline::paths;
use hookline::process_monitor::{default_process_table, ExitWatcher, ShellLauncher};
use hookline::segmenter::{MecabSegmenter, Segmenter};
use hookline::status::{self, SessionState, TranslatorStatus};
use hookline::translate::{Orchestrator, ReqwestTransport};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hookline=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false))
        .init();
}

/// Copies the store's presentable state into `status`.
fn sync_status(status: &mut TranslatorStatus, store: &HookStore) {
    status.display_hook = store.display_hook().map(|h| h.code.clone());
    status.last_text = store.display().active.map(|id| store.last_text(id).to_string());
    status.translations = store.translation().translations.clone();
    status.touch();
}

#[tokio::main]
async fn main() {
    init_logging();

    // ── App data directory ────────────────────────────────────────────────────
    let (config_path, status_path) = match (paths::config_file_path(), paths::status_file_path()) {
        (Ok(c), Ok(s)) => (c, s),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = format!("{e:#}"), "cannot locate app data directory");
            std::process::exit(1);
        }
    };
    if let Some(dir) = config_path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!(dir = %dir.display(), error = %e, "failed to create app data directory");
            std::process::exit(1);
        }
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!(error = format!("{e:#}"), "config unreadable; using defaults");
        config::Config::default()
    });

    // ── Initial status ────────────────────────────────────────────────────────
    let mut current_status = TranslatorStatus::new();
    status::write_status(&status_path, &current_status);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<DaemonEvent>();

    // ── Translation ───────────────────────────────────────────────────────────
    let transport = match ReqwestTransport::new(initial_config.global.request_timeout()) {
        Ok(t) => t,
        Err(e) => {
            error!(error = format!("{e:#}"), "failed to build http client");
            std::process::exit(1);
        }
    };
    let orchestrator = Arc::new(Orchestrator::new(transport));
    if let Err(e) = orchestrator.configure(&initial_config.apis) {
        warn!(error = %e, "translation backends rejected; translating with none");
    }

    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<TranslationRequest>();
    {
        let orchestrator = Arc::clone(&orchestrator);
        let tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let orchestrator = Arc::clone(&orchestrator);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = orchestrator
                        .translate_each(&request.text, |backend, text| {
                            let _ = tx.send(DaemonEvent::TranslationPartial {
                                request: request.id,
                                backend: backend.to_string(),
                                text: text.to_string(),
                            });
                        })
                        .await;
                    let _ = tx.send(DaemonEvent::TranslationFinished {
                        request: request.id,
                        result,
                    });
                });
            }
        });
    }

    // ── Hook store ────────────────────────────────────────────────────────────
    let segmenter = initial_config
        .global
        .segmenter_enabled
        .then(|| Box::new(MecabSegmenter) as Box<dyn Segmenter>);
    let mut store = HookStore::new(request_tx, segmenter);
    store.sync_translation_keys(&orchestrator.backend_names());
    store.events().subscribe(|event: &StoreEvent| match event {
        StoreEvent::HookRegistered(hook) => info!(hook = hook.id, code = %hook.code, "new hook"),
        StoreEvent::DisplayChanged(id) => info!(hook = id, "display hook selected"),
        StoreEvent::TextUpdated { hook, text } => debug!(hook, text = %text, "text"),
        StoreEvent::TranslationUpdated(_) => {}
    });

    // ── Supervisor ────────────────────────────────────────────────────────────
    let injector = Arc::new(TextractorCli::new(&initial_config.global.injector_path));
    {
        let tx = event_tx.clone();
        injector.events().subscribe(move |e: &HookEvent| {
            let _ = tx.send(DaemonEvent::HookText(e.clone()));
        });
    }
    let supervisor = Supervisor::new(
        initial_config.locale_changers.clone(),
        initial_config.global.poll_policy(),
        Arc::new(ShellLauncher),
        default_process_table(),
        injector,
        Arc::new(ExitWatcher),
    );
    {
        let tx = event_tx.clone();
        supervisor.events().subscribe(move |e: &SessionEvent| {
            let _ = tx.send(DaemonEvent::Session(e.clone()));
        });
    }

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));

    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown);
            }
        });
    }

    info!(version = env!("CARGO_PKG_VERSION"), "hookline started");

    match initial_config.game.clone() {
        Some(game) => {
            current_status.game = Some(game.name.clone());
            match supervisor.start(game) {
                Ok(_) => current_status.state = SessionState::Waiting,
                Err(e) => error!(error = %e, "failed to start game"),
            }
            current_status.touch();
            status::write_status(&status_path, &current_status);
        }
        None => info!("no [game] configured; waiting for Ctrl+C"),
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::Session(SessionEvent::Attached(session)) => {
                let code = &session.descriptor().code;
                if !code.is_empty() {
                    store.set_pending_display_code(code);
                }
                current_status.state = SessionState::Attached;
                current_status.pid = session.pid();
                sync_status(&mut current_status, &store);
                status::write_status(&status_path, &current_status);
            }

            DaemonEvent::Session(SessionEvent::NotFound(session)) => {
                error!(game = %session.descriptor().name, "game process never appeared");
                current_status.state = SessionState::NotFound;
                current_status.pid = None;
                current_status.touch();
                status::write_status(&status_path, &current_status);
                break;
            }

            DaemonEvent::Session(SessionEvent::Exited(session)) => {
                info!(game = %session.descriptor().name, "game exited");
                current_status.state = SessionState::Exited;
                current_status.pid = None;
                current_status.touch();
                status::write_status(&status_path, &current_status);
                break;
            }

            DaemonEvent::HookText(HookEvent { hook, text }) => {
                store.ingest_text(&hook, &text);
                if store.display().active == Some(hook.id) {
                    sync_status(&mut current_status, &store);
                    status::write_status(&status_path, &current_status);
                }
            }

            DaemonEvent::TranslationPartial { request, backend, text } => {
                if store.apply_partial(request, &backend, &text) {
                    sync_status(&mut current_status, &store);
                    status::write_status(&status_path, &current_status);
                }
            }

            DaemonEvent::TranslationFinished { request, result } => {
                // Successes were merged as partials; failed backends keep their placeholder.
                debug!(request, translated = result.translations.len(), "translation settled");
            }

            DaemonEvent::ConfigReloaded(new_config) => {
                info!("config reloaded");
                match orchestrator.configure(&new_config.apis) {
                    Ok(()) => {
                        store.sync_translation_keys(&orchestrator.backend_names());
                        sync_status(&mut current_status, &store);
                        status::write_status(&status_path, &current_status);
                    }
                    Err(e) => warn!(error = %e, "reloaded backends rejected; keeping previous"),
                }
            }

            DaemonEvent::Shutdown => {
                info!("shutting down");
                current_status.state = SessionState::Idle;
                current_status.pid = None;
                current_status.touch();
                status::write_status(&status_path, &current_status);
                break;
            }
        }
    }
}
