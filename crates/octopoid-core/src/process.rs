//! Process plumbing: liveness probes and detached agent spawning.

use std::path::Path;

use anyhow::{Context, Result};

/// Probe whether a pid is alive by sending signal 0.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // Safety: kill with signal 0 performs no action beyond the check.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

/// Launch a command as a detached child: own process group, stdin closed,
/// stdout/stderr streamed to log files. Returns the pid. The child is never
/// awaited; result collection probes the pid on later ticks.
pub fn spawn_detached(
    command: &[String],
    cwd: &Path,
    envs: &[(String, String)],
    stdout_path: &Path,
    stderr_path: &Path,
) -> Result<u32> {
    let (program, args) = command
        .split_first()
        .context("empty command for agent spawn")?;

    let stdout = std::fs::File::create(stdout_path)
        .with_context(|| format!("failed to create {}", stdout_path.display()))?;
    let stderr = std::fs::File::create(stderr_path)
        .with_context(|| format!("failed to create {}", stderr_path.display()))?;

    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(std::process::Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    for (key, value) in envs {
        cmd.env(key, value);
    }

    // Detach from the tick's process group so terminal signals (ctrl-c on an
    // interactive tick) do not take the agent down with us.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn agent {program:?} -- is it on PATH?"))?;

    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn reaped_child_pid_is_dead() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("true should spawn");
        let pid = child.id();
        child.wait().expect("true should exit");
        assert!(!pid_alive(pid));
    }

    #[test]
    fn spawn_detached_writes_logs_and_returns_live_pid() {
        let tmp = tempfile::TempDir::new().unwrap();
        let stdout = tmp.path().join("stdout.log");
        let stderr = tmp.path().join("stderr.log");

        let pid = spawn_detached(
            &["sh".to_string(), "-c".to_string(), "echo out; sleep 0.2".to_string()],
            tmp.path(),
            &[("OCTOPOID_TEST_VAR".to_string(), "1".to_string())],
            &stdout,
            &stderr,
        )
        .expect("spawn should succeed");

        assert!(pid_alive(pid), "child should still be sleeping");

        // Wait for the child to finish and flush.
        std::thread::sleep(std::time::Duration::from_millis(400));
        let out = std::fs::read_to_string(&stdout).unwrap();
        assert_eq!(out.trim(), "out");
    }

    #[test]
    fn spawn_detached_rejects_empty_command() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = spawn_detached(
            &[],
            tmp.path(),
            &[],
            &tmp.path().join("o"),
            &tmp.path().join("e"),
        );
        assert!(result.is_err());
    }
}
