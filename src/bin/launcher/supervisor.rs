use anyhow::{Context, Result};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

use crate::types::{LaunchSpec, LauncherEvent, OUTPUT_DRAIN, finished_line};

/// The one bot process the launcher may own.
struct Running {
    id: u64,
    kill: oneshot::Sender<()>,
}

type Slot = Arc<Mutex<Option<Running>>>;

fn lock(slot: &Mutex<Option<Running>>) -> MutexGuard<'_, Option<Running>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Supervisor {
    spec: LaunchSpec,
    events: broadcast::Sender<LauncherEvent>,
    slot: Slot,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(spec: LaunchSpec, events: broadcast::Sender<LauncherEvent>) -> Self {
        Self {
            spec,
            events,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Spawns the bot. Returns `false` without spawning if one is already
    /// running.
    pub fn start(&self) -> Result<bool> {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            return Ok(false);
        }

        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .current_dir(&self.spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("could not spawn {}", self.spec.program))?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, self.events.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, self.events.clone())));
        }

        let pid = child.id();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (kill, kill_rx) = oneshot::channel();
        *slot = Some(Running { id, kill });
        drop(slot);

        tracing::info!(program = %self.spec.program, ?pid, "bot process started");
        let _ = self.events.send(LauncherEvent::Started { pid });
        tokio::spawn(watch(
            child,
            kill_rx,
            readers,
            id,
            self.slot.clone(),
            self.events.clone(),
        ));
        Ok(true)
    }

    /// Kills the running bot. Returns `false` if there was none.
    pub fn stop(&self) -> bool {
        match lock(&self.slot).take() {
            Some(running) => {
                tracing::info!("stopping bot process");
                let _ = running.kill.send(());
                true
            }
            None => false,
        }
    }
}

async fn forward_lines<R>(stream: R, events: broadcast::Sender<LauncherEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "bot", "{line}");
        let _ = events.send(LauncherEvent::Log { line });
    }
}

async fn watch(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    id: u64,
    slot: Slot,
    events: broadcast::Sender<LauncherEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "kill failed");
            }
            child.wait().await
        }
    };
    // the last output lines go out before the exit notice, but a grandchild
    // holding the pipes open must not delay it
    let drain_until = Instant::now() + OUTPUT_DRAIN;
    for mut reader in readers {
        if timeout_at(drain_until, &mut reader).await.is_err() {
            tracing::debug!("output still open after exit, detaching reader");
            reader.abort();
        }
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(error = %e, "could not read bot exit status");
            None
        }
    };
    {
        // a stop followed by a fresh start may already own the slot
        let mut slot = lock(&slot);
        if slot.as_ref().is_some_and(|running| running.id == id) {
            *slot = None;
        }
    }

    tracing::info!(?code, "bot process finished");
    let _ = events.send(LauncherEvent::Log {
        line: finished_line(code),
    });
    let _ = events.send(LauncherEvent::Finished { code });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::timeout;

    fn shell(script: &str) -> (Supervisor, broadcast::Receiver<LauncherEvent>) {
        let (events, rx) = broadcast::channel(64);
        let spec = LaunchSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            workdir: PathBuf::from("."),
        };
        (Supervisor::new(spec, events), rx)
    }

    async fn until_finished(rx: &mut broadcast::Receiver<LauncherEvent>) -> Vec<LauncherEvent> {
        let mut seen = Vec::new();
        loop {
            let event = timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("bot never finished")
                .unwrap();
            let done = matches!(event, LauncherEvent::Finished { .. });
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn log_lines(events: &[LauncherEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                LauncherEvent::Log { line } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn output_is_streamed_then_the_exit_code() {
        let (supervisor, mut rx) = shell("echo farming; echo oops >&2; exit 3");
        assert!(supervisor.start().unwrap());

        let events = until_finished(&mut rx).await;
        let lines = log_lines(&events);
        assert!(matches!(events[0], LauncherEvent::Started { pid: Some(_) }));
        assert!(lines.contains(&"farming".to_string()));
        assert!(lines.contains(&"oops".to_string()));
        assert_eq!(lines.last().unwrap(), "finished (code 3)");
        assert_eq!(events.last(), Some(&LauncherEvent::Finished { code: Some(3) }));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn only_one_process_at_a_time() {
        let (supervisor, mut rx) = shell("exec sleep 30");
        assert!(supervisor.start().unwrap());
        assert!(!supervisor.start().unwrap());

        assert!(supervisor.stop());
        assert!(!supervisor.stop());
        let events = until_finished(&mut rx).await;
        assert_eq!(events.last(), Some(&LauncherEvent::Finished { code: None }));
        assert_eq!(log_lines(&events), vec!["finished (killed)".to_string()]);
    }

    #[tokio::test]
    async fn restart_right_after_stop_keeps_the_new_process() {
        let (supervisor, mut rx) = shell("exec sleep 30");
        supervisor.start().unwrap();
        supervisor.stop();
        assert!(supervisor.start().unwrap());

        // the first process's exit must not clear the second one's slot
        until_finished(&mut rx).await;
        assert!(supervisor.is_running());
        supervisor.stop();
    }

    #[tokio::test]
    async fn orphaned_children_do_not_hold_back_the_exit_notice() {
        // sh's sleep child inherits stdout and outlives the kill
        let (supervisor, mut rx) = shell("echo up; sleep 30; true");
        supervisor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(supervisor.stop());
        let events = timeout(Duration::from_secs(3), until_finished(&mut rx))
            .await
            .expect("exit notice waited on the orphaned child");
        assert_eq!(events.last(), Some(&LauncherEvent::Finished { code: None }));
        assert!(log_lines(&events).contains(&"up".to_string()));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn stop_when_idle_reports_false() {
        let (supervisor, _rx) = shell("true");
        assert!(!supervisor.stop());
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let (events, _rx) = broadcast::channel(8);
        let supervisor = Supervisor::new(
            LaunchSpec {
                program: "/nonexistent/python3".into(),
                args: vec![],
                workdir: PathBuf::from("."),
            },
            events,
        );
        assert!(supervisor.start().is_err());
        assert!(!supervisor.is_running());
    }
}
