//! Background runner management: pid file, detached spawn, stop and log tail.

use std::fs::OpenOptions;
use std::io::{ErrorKind, SeekFrom};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mathprompt_core::PathsConfig;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

const STOP_POLL: Duration = Duration::from_millis(200);
const FOLLOW_POLL: Duration = Duration::from_millis(500);

/// Pid recorded in the pid file, if any.
pub fn read_pid(paths: &PathsConfig) -> Result<Option<i32>> {
    let path = paths.pid_file();
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let pid = text
        .trim()
        .parse::<i32>()
        .with_context(|| format!("{} does not contain a pid", path.display()))?;
    Ok(Some(pid))
}

/// Whether a process with this pid exists.
pub fn is_alive(pid: i32) -> bool {
    pid > 0 && kill(Pid::from_raw(pid), None).is_ok()
}

/// Pid of the live background runner. A stale pid file counts as not running.
pub fn running_pid(paths: &PathsConfig) -> Result<Option<i32>> {
    Ok(read_pid(paths)?.filter(|pid| is_alive(*pid)))
}

fn remove_pid_file(paths: &PathsConfig) -> Result<()> {
    match std::fs::remove_file(paths.pid_file()) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e).context("failed to remove pid file"),
        _ => Ok(()),
    }
}

/// Launch `run` in its own process group, output appended to the runner log.
pub fn start(paths: &PathsConfig, config_path: Option<&Path>, verbose: bool) -> Result<u32> {
    if let Some(pid) = running_pid(paths)? {
        bail!("Runner already running (pid {}). Use `mathprompt stop` first.", pid);
    }

    std::fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.runner_log())
        .with_context(|| format!("failed to open {}", paths.runner_log().display()))?;

    let exe = std::env::current_exe().context("failed to locate the mathprompt executable")?;
    let mut command = Command::new(exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    if verbose {
        command.arg("--verbose");
    }
    command
        .arg("run")
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .process_group(0);

    let child = command.spawn().context("failed to spawn runner")?;
    let pid = child.id();
    std::fs::write(paths.pid_file(), pid.to_string()).context("failed to write pid file")?;
    debug!("Runner spawned with pid {}", pid);
    Ok(pid)
}

/// SIGTERM the runner, then SIGKILL once `grace` has passed.
///
/// Returns whether a live runner was found.
pub async fn stop(paths: &PathsConfig, grace: Duration) -> Result<bool> {
    let Some(pid) = read_pid(paths)? else {
        return Ok(false);
    };
    if !is_alive(pid) {
        remove_pid_file(paths)?;
        return Ok(false);
    }

    let target = Pid::from_raw(pid);
    kill(target, Signal::SIGTERM).with_context(|| format!("failed to signal pid {}", pid))?;

    let deadline = tokio::time::Instant::now() + grace;
    while is_alive(pid) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(STOP_POLL).await;
    }

    if is_alive(pid) {
        warn!("Runner ignored SIGTERM for {}s, killing", grace.as_secs());
        kill(target, Signal::SIGKILL).with_context(|| format!("failed to kill pid {}", pid))?;
    }

    remove_pid_file(paths)?;
    Ok(true)
}

/// The last `n` lines of `text`.
pub fn last_lines(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].to_vec()
}

/// Print the tail of the runner log, then keep printing appended output
/// until Ctrl-C when `follow` is set.
pub async fn tail(path: &Path, n: usize, follow: bool) -> Result<()> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            println!("No runner log yet ({}).", path.display());
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };

    for line in last_lines(&String::from_utf8_lossy(&bytes), n) {
        println!("{}", line);
    }
    if !follow {
        return Ok(());
    }

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(bytes.len() as u64)).await?;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        file.read_to_end(&mut buf).await?;
        if !buf.is_empty() {
            print!("{}", String::from_utf8_lossy(&buf));
            continue;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(FOLLOW_POLL) => {}
        }
    }
}
