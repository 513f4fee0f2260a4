//! Process supervisor - launches the pipeline and tears it down on interrupt
//!
//! Processes start in list order. An entry with a `ready_port` blocks the
//! next launch until that port accepts a TCP connection (or the readiness
//! timeout passes); otherwise `start_delay_ms` is waited. Nothing is
//! restarted: a child that exits is logged and forgotten.

use crate::infra::config::{Config, ProcessSpec, CONFIG_PATH_PLACEHOLDER};
use anyhow::Context;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Prefer a binary sitting next to the supervisor, else leave it to `PATH`
pub fn resolve_program(program: &str) -> PathBuf {
    if program.contains('/') || program.contains(std::path::MAIN_SEPARATOR) {
        return PathBuf::from(program);
    }
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let candidate = dir.join(program);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from(program)
}

/// Substitute the shared config path into process arguments.
///
/// Without a config file the placeholder argument is dropped together with
/// the flag right before it, so children fall back to their own defaults.
pub fn expand_args(args: &[String], config_file: Option<&str>) -> Vec<String> {
    if let Some(path) = config_file {
        return args.iter().map(|a| a.replace(CONFIG_PATH_PLACEHOLDER, path)).collect();
    }

    let mut expanded: Vec<String> = Vec::with_capacity(args.len());
    for arg in args {
        if arg.contains(CONFIG_PATH_PLACEHOLDER) {
            if expanded.last().is_some_and(|prev| prev.starts_with('-')) {
                expanded.pop();
            }
            continue;
        }
        expanded.push(arg.clone());
    }
    expanded
}

/// Poll `127.0.0.1:port` until it accepts or `timeout` elapses
pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        if Instant::now() + READY_POLL_INTERVAL > deadline {
            return false;
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

struct ManagedProcess {
    name: String,
    child: Child,
}

pub struct Supervisor {
    config_file: Option<String>,
    ready_timeout: Duration,
    shutdown_grace: Duration,
    children: Vec<ManagedProcess>,
}

impl Supervisor {
    pub fn new(config: &Config) -> Self {
        Self {
            config_file: config.source_file().map(str::to_string),
            ready_timeout: config.ready_timeout(),
            shutdown_grace: config.shutdown_grace(),
            children: Vec::new(),
        }
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }

    fn spawn(&self, spec: &ProcessSpec) -> anyhow::Result<Child> {
        let program = resolve_program(&spec.program);
        let mut cmd = Command::new(&program);
        cmd.args(expand_args(&spec.args, self.config_file.as_deref()))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd.spawn()
            .with_context(|| format!("failed to start {} ({})", spec.name, program.display()))
    }

    /// Launch `specs` in order, waiting for each one's readiness before the next
    pub async fn start_all(&mut self, specs: &[ProcessSpec]) -> anyhow::Result<()> {
        for spec in specs {
            let child = self.spawn(spec)?;
            info!(name = %spec.name, pid = ?child.id(), "process_started");
            self.children.push(ManagedProcess { name: spec.name.clone(), child });

            match spec.ready_port {
                Some(port) => {
                    if wait_for_port(port, self.ready_timeout).await {
                        info!(name = %spec.name, port = %port, "process_ready");
                    } else {
                        warn!(
                            name = %spec.name,
                            port = %port,
                            timeout_ms = %self.ready_timeout.as_millis(),
                            "process_ready_timeout"
                        );
                    }
                }
                None if spec.start_delay_ms > 0 => {
                    tokio::time::sleep(Duration::from_millis(spec.start_delay_ms)).await;
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Forget children that have exited on their own
    pub fn reap_exited(&mut self) -> usize {
        let before = self.children.len();
        self.children.retain_mut(|p| match p.child.try_wait() {
            Ok(Some(status)) => {
                warn!(name = %p.name, status = %status, "process_exited");
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(name = %p.name, error = %e, "process_wait_error");
                true
            }
        });
        before - self.children.len()
    }

    /// Watch children until shutdown is signalled, then stop them all
    pub async fn run_until_shutdown(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reap_exited();
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        self.shutdown().await;
    }

    /// SIGINT every child, wait out the grace period, kill survivors
    pub async fn shutdown(&mut self) {
        for p in &mut self.children {
            interrupt(&mut p.child, &p.name);
        }

        let deadline = Instant::now() + self.shutdown_grace;
        for mut p in self.children.drain(..) {
            match tokio::time::timeout_at(deadline, p.child.wait()).await {
                Ok(Ok(status)) => info!(name = %p.name, status = %status, "process_stopped"),
                Ok(Err(e)) => warn!(name = %p.name, error = %e, "process_wait_error"),
                Err(_) => {
                    warn!(name = %p.name, "process_kill_after_grace");
                    if let Err(e) = p.child.kill().await {
                        warn!(name = %p.name, error = %e, "process_kill_failed");
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child, name: &str) {
    let Some(pid) = child.id() else { return };
    // SAFETY: pid belongs to a child we spawned and have not yet reaped
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc != 0 {
        warn!(name = %name, pid = %pid, error = %std::io::Error::last_os_error(), "sigint_failed");
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child, name: &str) {
    if let Err(e) = child.start_kill() {
        warn!(name = %name, error = %e, "process_kill_failed");
    }
}
