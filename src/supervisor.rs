//! Runs the backend and the frontend side by side and shuts both down
//! together when the tool is interrupted.
//!
//! Each service runs in its own process group so that whatever it starts
//! (`npm start` forks the actual server) is signalled along with it.

use std::process::{Child, ExitStatus};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{info, warn};

use crate::command::CommandSpec;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(unix)]
mod group {
    use std::io;
    use std::os::unix::process::CommandExt;
    use std::process::{Child, Command};

    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    /// Makes the spawned process the leader of a new process group.
    pub fn isolate(command: &mut Command) {
        command.process_group(0);
    }

    fn send(child: &Child, sig: Signal) -> io::Result<()> {
        match killpg(Pid::from_raw(child.id() as i32), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    pub fn terminate(child: &mut Child) -> io::Result<()> {
        send(child, Signal::SIGTERM)
    }

    pub fn kill(child: &mut Child) -> io::Result<()> {
        send(child, Signal::SIGKILL)
    }

    /// Whether any member of the group still exists.
    pub fn alive(child: &mut Child) -> io::Result<bool> {
        match killpg(Pid::from_raw(child.id() as i32), None) {
            Ok(()) | Err(Errno::EPERM) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
}

#[cfg(not(unix))]
mod group {
    use std::io;
    use std::process::{Child, Command};

    pub fn isolate(_command: &mut Command) {}

    pub fn terminate(child: &mut Child) -> io::Result<()> {
        child.kill()
    }

    pub fn kill(child: &mut Child) -> io::Result<()> {
        child.kill()
    }

    pub fn alive(_child: &mut Child) -> io::Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Terminating,
    Exited(ExitStatus),
}

#[derive(Debug)]
struct ManagedChild {
    name: String,
    child: Child,
    state: ChildState,
    forced: bool,
}

impl ManagedChild {
    /// Records the exit status if the process has finished.
    fn poll(&mut self) -> anyhow::Result<Option<ExitStatus>> {
        if let ChildState::Exited(status) = self.state {
            return Ok(Some(status));
        }
        let status = self
            .child
            .try_wait()
            .with_context(|| format!("checking {} (pid {})", self.name, self.child.id()))?;
        if let Some(status) = status {
            self.state = ChildState::Exited(status);
        }
        Ok(status)
    }

    /// True while the process or anything left in its process group runs.
    fn is_running(&mut self) -> anyhow::Result<bool> {
        if self.poll()?.is_none() {
            return Ok(true);
        }
        group::alive(&mut self.child)
            .with_context(|| format!("checking process group of {}", self.name))
    }

    fn request_termination(&mut self) -> anyhow::Result<()> {
        if !self.is_running()? {
            return Ok(());
        }
        info!(
            "Sending termination request to {} (pid {})",
            self.name,
            self.child.id()
        );
        group::terminate(&mut self.child)
            .with_context(|| format!("terminating {} (pid {})", self.name, self.child.id()))?;
        if self.state == ChildState::Running {
            self.state = ChildState::Terminating;
        }
        Ok(())
    }

    fn force_kill(&mut self) -> anyhow::Result<()> {
        warn!(
            "{} (pid {}) did not stop in time, killing it",
            self.name,
            self.child.id()
        );
        self.forced = true;
        group::kill(&mut self.child)
            .with_context(|| format!("killing {} (pid {})", self.name, self.child.id()))?;
        if self.poll()?.is_none() {
            let status = self
                .child
                .wait()
                .with_context(|| format!("reaping {} (pid {})", self.name, self.child.id()))?;
            self.state = ChildState::Exited(status);
        }
        Ok(())
    }

    fn report(&self) -> Option<ChildReport> {
        match self.state {
            ChildState::Exited(status) => Some(ChildReport {
                name: self.name.clone(),
                status,
                forced: self.forced,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildReport {
    pub name: String,
    pub status: ExitStatus,
    /// Whether the process had to be killed after the grace period.
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Both processes exited on their own.
    Completed(Vec<ChildReport>),
    /// A shutdown request stopped both processes.
    ShutDown(Vec<ChildReport>),
}

/// Owns the backend and frontend processes.
#[derive(Debug)]
pub struct Supervisor {
    children: Vec<ManagedChild>,
    grace_period: Duration,
}

impl Supervisor {
    fn empty() -> Self {
        Supervisor {
            children: Vec::with_capacity(2),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Starts both processes with inherited standard streams.
    ///
    /// If the frontend cannot be started the backend is stopped again before
    /// the error is returned.
    pub fn launch(backend: &CommandSpec, frontend: &CommandSpec) -> anyhow::Result<Self> {
        let mut supervisor = Supervisor::empty();
        supervisor.spawn("backend", backend)?;
        supervisor.spawn("frontend", frontend)?;
        Ok(supervisor)
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().map(|c| c.child.id()).collect()
    }

    fn spawn(&mut self, name: &str, spec: &CommandSpec) -> anyhow::Result<()> {
        info!("[cmd] {}", spec.display());
        let mut command = spec.to_command();
        group::isolate(&mut command);
        let child = command
            .spawn()
            .with_context(|| format!("starting {name}: {}", spec.display()))?;
        info!("Started {name} (pid {})", child.id());
        self.children.push(ManagedChild {
            name: name.to_string(),
            child,
            state: ChildState::Running,
            forced: false,
        });
        Ok(())
    }

    /// Waits for the backend and then the frontend to exit. A message on
    /// `shutdown` at any point stops both processes instead.
    pub fn supervise(mut self, shutdown: &Receiver<()>) -> anyhow::Result<SupervisorOutcome> {
        let mut signals_open = true;

        for idx in 0..self.children.len() {
            loop {
                if let Some(status) = self.children[idx].poll()? {
                    let name = &self.children[idx].name;
                    if status.success() {
                        info!("{name} exited");
                    } else {
                        warn!("{name} exited with {status}");
                    }
                    break;
                }

                if !signals_open {
                    thread::sleep(POLL_INTERVAL);
                    continue;
                }
                match shutdown.recv_timeout(POLL_INTERVAL) {
                    Ok(()) => {
                        self.shutdown()?;
                        return Ok(SupervisorOutcome::ShutDown(self.reports()));
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => signals_open = false,
                }
            }
        }

        Ok(SupervisorOutcome::Completed(self.reports()))
    }

    /// Asks every live process group to terminate, then kills whatever is
    /// still running once the grace period has elapsed. The grace period is
    /// shared by both processes.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        info!("Stopping processes...");
        for child in &mut self.children {
            child.request_termination()?;
        }

        let deadline = Instant::now() + self.grace_period;
        for child in &mut self.children {
            loop {
                if !child.is_running()? {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    child.force_kill()?;
                    break;
                }
                thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
        }
        Ok(())
    }

    fn reports(&self) -> Vec<ChildReport> {
        self.children.iter().filter_map(ManagedChild::report).collect()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for child in &mut self.children {
            if !child.is_running().unwrap_or(false) {
                continue;
            }
            let _ = group::kill(&mut child.child);
            if matches!(child.child.try_wait(), Ok(None)) {
                let _ = child.child.kill();
                let _ = child.child.wait();
            }
        }
    }
}

/// Routes SIGINT and SIGTERM to a shutdown request channel.
///
/// Only one handler can be installed per process.
pub fn install_signal_handler() -> anyhow::Result<Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("registering signal handlers")?;
    Ok(rx)
}
