//! Process groups for extractor subprocesses.
//!
//! The extractor spawns helpers of its own (ffmpeg for audio extraction).
//! Each extractor therefore leads a fresh process group, and killing means
//! killing the whole group.

use tokio::process::Command;

/// Start the command as the leader of a new process group.
#[cfg(unix)]
pub(crate) fn isolate(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
pub(crate) fn isolate(_cmd: &mut Command) {}

/// SIGKILL every process in the group led by `pid`.
///
/// Returns `false` when the group no longer exists. Only call this while the
/// leader has not been reaped, otherwise the id may already be reused.
#[cfg(unix)]
pub(crate) fn kill_group(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            tracing::debug!(pid, error = %e, "Failed to kill process group");
            false
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_group(_pid: u32) -> bool {
    false
}
