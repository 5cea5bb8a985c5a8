//! Process-group ownership for external converters.
//!
//! Pandoc and `mmdc` both spawn helpers of their own (`xelatex`, a headless
//! browser). Each converter is started as the leader of a fresh process group
//! so that a deadline can take down the whole tree, not just the direct child.

use tracing::warn;

/// Kills the process group led by a spawned child when dropped, unless the
/// child finished on its own and the guard was disarmed.
#[derive(Debug)]
pub struct ProcessGroupGuard {
    leader: Option<u32>,
}

impl ProcessGroupGuard {
    /// `leader` is the child's pid, which is also its group id when the
    /// command was built with `process_group(0)`.
    pub fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    pub fn disarm(mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(leader) = self.leader.take() {
            kill_group(leader);
        }
    }
}

#[cfg(unix)]
fn kill_group(leader: u32) {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, killpg},
        unistd::Pid,
    };

    let Ok(raw) = i32::try_from(leader) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(
            target = "infra::process",
            pgid = raw,
            error = %err,
            "Failed to kill converter process group"
        ),
    }
}

#[cfg(not(unix))]
fn kill_group(leader: u32) {
    warn!(
        target = "infra::process",
        pid = leader,
        "Process groups are unsupported on this platform; helpers may outlive the deadline"
    );
}
