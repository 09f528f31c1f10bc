//! Injection into the game process and the text stream that comes back.
//!
//! The hooking itself happens out of process: [`TextractorCli`] drives a
//! Textractor-compatible command-line host, asks it to attach to a pid, and
//! turns every line it prints into a [`HookEvent`].
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::event::Emitter;
use crate::hooks::{HookId, HookInfo};

/// Handle of the host's own console thread; its lines are log output, not game text.
const CONSOLE_HANDLE: HookId = 0;

/// Asks something to hook the process `pid`. Fire-and-forget: failures are
/// logged by the implementation and not reported back.
pub trait Injector: Send + Sync {
    fn inject_process(&self, pid: u32);
}

/// One line of text captured by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEvent {
    pub hook: HookInfo,
    pub text: String,
}

/// Parses `[handle:pid:address:ctx:ctx2:name:code] text`. The handle is hex;
/// the code may itself contain colons.
pub fn parse_output_line(line: &str) -> Option<HookEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let rest = line.strip_prefix('[')?;
    let (header, text) = rest.split_once("] ")?;

    let mut fields = header.splitn(7, ':');
    let id = HookId::from_str_radix(fields.next()?, 16).ok()?;
    // pid, address, context, subcontext
    for _ in 0..4 {
        fields.next()?;
    }
    let name = fields.next()?.to_string();
    let code = fields.next()?.to_string();

    Some(HookEvent {
        hook: HookInfo { id, name, code },
        text: text.to_string(),
    })
}

pub struct TextractorCli {
    path: PathBuf,
    events: Arc<Emitter<HookEvent>>,
}

impl TextractorCli {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            events: Arc::new(Emitter::new()),
        }
    }

    /// Hook text published by every host this injector starts.
    pub fn events(&self) -> &Emitter<HookEvent> {
        &self.events
    }
}

impl Injector for TextractorCli {
    fn inject_process(&self, pid: u32) {
        let mut child = match Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to start injector host");
                return;
            }
        };
        info!(pid, host = %self.path.display(), "injecting");

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            error!("injector host has no stdio pipes");
            return;
        };
        let events = Arc::clone(&self.events);

        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(format!("attach -P{pid}\n").as_bytes()).await {
                warn!(pid, error = %e, "failed to send attach command");
                return;
            }
            // stdin stays open for the host's lifetime; closing it makes it quit.
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_output_line(&line) {
                        Some(event) if event.hook.id == CONSOLE_HANDLE => {
                            debug!(message = %event.text, "injector host");
                        }
                        Some(event) => events.emit(&event),
                        None => debug!(line = %line, "unrecognised injector output"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "injector output unreadable");
                        break;
                    }
                }
            }
            drop(stdin);
            match child.wait().await {
                Ok(status) => info!(%status, "injector host exited"),
                Err(e) => warn!(error = %e, "injector host wait failed"),
            }
        });
    }
}
