//! OS process plumbing used by the supervisor: process-table queries, exit
//! notification, and fire-and-forget launching.
//!
//! Process-table output follows the `tasklist /nh /fo csv` row format on every
//! platform: `"game.exe","1234","Console","1","10,240 K"`. A live row starts
//! with a quote; anything else (e.g. `INFO: No tasks are running ...`) means
//! the process was not found.
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ── Process table ─────────────────────────────────────────────────────────────

/// Lists processes whose image name equals `image_name`.
pub trait ProcessTable: Send + Sync {
    fn query(&self, image_name: &str) -> Result<String>;
}

/// Shells out to `tasklist`. Windows only at runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TasklistTable;

impl ProcessTable for TasklistTable {
    fn query(&self, image_name: &str) -> Result<String> {
        let output = std::process::Command::new("tasklist")
            .args(["/nh", "/fo", "csv", "/fi"])
            .arg(format!("imagename eq {image_name}"))
            .stdin(Stdio::null())
            .output()
            .context("Failed to run tasklist")?;
        if !output.status.success() {
            anyhow::bail!("tasklist exited with {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Renders tasklist-style rows from `sysinfo`, for platforms without tasklist.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoTable;

impl ProcessTable for SysinfoTable {
    fn query(&self, image_name: &str) -> Result<String> {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let target = image_name.to_lowercase();
        let mut pids: Vec<u32> = sys
            .processes()
            .iter()
            .filter(|(_, p)| p.name().to_string_lossy().to_lowercase() == target)
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();

        if pids.is_empty() {
            return Ok("INFO: No tasks are running which match the specified criteria.\n".into());
        }
        Ok(pids
            .iter()
            .map(|pid| format!("\"{image_name}\",\"{pid}\",\"Console\",\"1\",\"0 K\"\n"))
            .collect())
    }
}

/// The process table appropriate for the current platform.
pub fn default_process_table() -> Arc<dyn ProcessTable> {
    if cfg!(windows) {
        Arc::new(TasklistTable)
    } else {
        Arc::new(SysinfoTable)
    }
}

/// True when `output` starts with a live row.
pub fn finds_pid_in(output: &str) -> bool {
    output.starts_with('"')
}

/// Extracts the pid from the first live row: quotes stripped, second
/// comma-separated field.
pub fn parse_pid_from(output: &str) -> Option<u32> {
    let first_row = output.lines().next()?;
    let unquoted = first_row.replace('"', "");
    unquoted.split(',').nth(1)?.trim().parse().ok()
}

// ── Exit notification ─────────────────────────────────────────────────────────

pub type ExitCallback = Box<dyn FnOnce() + Send + 'static>;

/// Calls `callback` at most once, when `pid` exits.
pub trait ExitNotifier: Send + Sync {
    fn on_process_exit(&self, pid: u32, callback: ExitCallback);
}

/// Waits on the process handle on Windows; polls `sysinfo` elsewhere.
/// Must be used from within a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitWatcher;

impl ExitNotifier for ExitWatcher {
    fn on_process_exit(&self, pid: u32, callback: ExitCallback) {
        #[cfg(windows)]
        {
            tokio::task::spawn_blocking(move || {
                if let Err(e) = imp::wait_for_exit(pid) {
                    warn!(pid, error = %e, "process wait failed; treating as exited");
                }
                callback();
            });
        }
        #[cfg(not(windows))]
        {
            tokio::spawn(async move {
                poll_until_gone(pid).await;
                callback();
            });
        }
    }
}

#[cfg_attr(windows, allow(dead_code))]
async fn poll_until_gone(pid: u32) {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    let mut ticker = tokio::time::interval(EXIT_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if sys.process(pid).is_none() {
            debug!(pid = pid.as_u32(), "process no longer listed");
            return;
        }
    }
}

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::Win32::Foundation::{CloseHandle, WAIT_OBJECT_0};
    use windows::Win32::System::Threading::{
        OpenProcess, WaitForSingleObject, INFINITE, PROCESS_SYNCHRONIZE,
    };

    /// Blocks until the process exits.
    pub fn wait_for_exit(pid: u32) -> Result<()> {
        let handle = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, false, pid)? };
        let event = unsafe { WaitForSingleObject(handle, INFINITE) };
        unsafe {
            let _ = CloseHandle(handle);
        }
        if event != WAIT_OBJECT_0 {
            bail!("WaitForSingleObject returned {:?}", event);
        }
        Ok(())
    }
}

// ── Launching ─────────────────────────────────────────────────────────────────

/// Starts a command line without waiting for it.
pub trait Launcher: Send + Sync {
    fn launch(&self, exec_string: &str) -> Result<()>;
}

/// Runs the command line through `cmd /C` (Windows) or `sh -c`, with all
/// standard streams discarded. Must be used from within a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellLauncher;

impl Launcher for ShellLauncher {
    fn launch(&self, exec_string: &str) -> Result<()> {
        // cmd.exe does its own quote parsing, so the line is passed through verbatim.
        #[cfg(windows)]
        let mut command = {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").raw_arg(exec_string);
            c
        };
        #[cfg(not(windows))]
        let mut command = {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(exec_string);
            c
        };
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to launch: {exec_string}"))?;

        // Reap the shell in the background so it does not linger as a zombie.
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!(error = %e, "launcher shell wait failed");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── row parsing ───────────────────────────────────────────────────────────

    #[test]
    fn live_row_is_detected_and_parsed() {
        let out = "\"proc.exe\",\"1234\",\"Console\",\"1\",\"10,240 K\"\r\n";
        assert!(finds_pid_in(out));
        assert_eq!(parse_pid_from(out), Some(1234));
    }

    #[test]
    fn info_line_is_not_live() {
        let out = "INFO: No tasks are running which match the specified criteria.\r\n";
        assert!(!finds_pid_in(out));
        assert_eq!(parse_pid_from(out), None);
    }

    #[test]
    fn first_row_wins_when_several_match() {
        let out = "\"a.exe\",\"10\",\"Console\",\"1\",\"1 K\"\n\"a.exe\",\"20\",\"Console\",\"1\",\"1 K\"\n";
        assert_eq!(parse_pid_from(out), Some(10));
    }

    #[test]
    fn garbled_pid_field_is_rejected() {
        assert_eq!(parse_pid_from("\"a.exe\",\"abc\""), None);
        assert_eq!(parse_pid_from("\"a.exe\""), None);
        assert_eq!(parse_pid_from(""), None);
    }

    // ── sysinfo table ─────────────────────────────────────────────────────────

    #[test]
    fn sysinfo_table_reports_missing_process_as_not_live() {
        let out = SysinfoTable
            .query("definitely-not-running-hookline-test.exe")
            .unwrap();
        assert!(!finds_pid_in(&out));
    }

    // ── exit watcher ──────────────────────────────────────────────────────────

    #[cfg(not(windows))]
    #[tokio::test]
    async fn exit_watcher_fires_for_exited_child() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        ExitWatcher.on_process_exit(
            pid,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("exit callback did not fire")
            .unwrap();
    }
}
