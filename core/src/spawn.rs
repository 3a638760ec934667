// Spawning of interpreter children for the command executor.
// Each child gets its own process group so a timeout can take down everything
// the command started, and on Linux a parent-death signal so nothing outlives
// the bridge.

use std::io;
use std::process::Stdio;

use tokio::process::Child;
use tokio::process::Command;

/// Spawns `program args... command_line` with stdin closed and both output
/// streams piped.
pub(crate) fn spawn_interpreter(
    program: &str,
    args: &[String],
    command_line: &str,
) -> io::Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .arg(command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(target_os = "linux")]
    {
        let parent_pid = std::process::id() as libc::pid_t;
        // SAFETY: the hook only issues async-signal-safe syscalls.
        unsafe {
            cmd.pre_exec(move || {
                set_parent_death(parent_pid);
                Ok(())
            });
        }
    }

    cmd.spawn()
}

/// Sets a death signal for the child process so it receives SIGTERM when the
/// parent exits. If the parent already died between fork and this call, the
/// child terminates itself.
#[cfg(target_os = "linux")]
fn set_parent_death(parent_pid: libc::pid_t) {
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
        if libc::getppid() != parent_pid {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
    }
}

/// Kills the child and every process in its group, then reaps the child.
/// Errors are ignored: the group may already be gone.
pub(crate) async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // The child leads its own group (see `process_group(0)` above).
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
