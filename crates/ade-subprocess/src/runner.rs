use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::Interval;

use ade_core::{Event, EventLevel};

use crate::event_log::EventLog;

/// Grace period between SIGTERM and SIGKILL once the deadline has expired.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

pub type JsonEventCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type HeartbeatCallback = Arc<dyn Fn() + Send + Sync>;

/// One subprocess invocation: the environment build or the engine run.
/// Ported from `ade_worker/subprocess_runner.py`'s `SubprocessRunner`.
#[derive(Debug, Clone)]
pub struct SubprocessSpec {
    /// Prefixes the envelope and stdio-wrapper event names, e.g. `env.build`
    /// or `run.execute`.
    pub scope: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: std::path::PathBuf,
    pub env: Vec<(String, String)>,
    pub deadline: Duration,
    /// `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SubprocessOutcome {
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Runs a child process in its own process group, draining stdout/stderr
/// into an [`EventLog`] and enforcing a deadline with SIGTERM-then-SIGKILL.
pub struct SubprocessRunner {
    event_log: Arc<EventLog>,
}

impl SubprocessRunner {
    pub fn new(event_log: Arc<EventLog>) -> Self {
        Self { event_log }
    }

    pub async fn run(
        &self,
        spec: SubprocessSpec,
        correlation_context: Option<Value>,
        on_json_event: Option<JsonEventCallback>,
        on_heartbeat: Option<HeartbeatCallback>,
    ) -> ade_core::Result<SubprocessOutcome> {
        let scope = spec.scope.clone();
        let command_display = format!("{} {}", spec.program, spec.args.join(" "));
        let start = Instant::now();

        self.event_log
            .append_event(
                &Event::new(EventLevel::Info, format!("{scope}.start"), "starting subprocess")
                    .with_data(serde_json::json!({
                        "command": command_display,
                        "cwd": spec.cwd.display().to_string(),
                    })),
            )
            .await?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Its own process group so the deadline handler can signal the
            // whole tree, not just the direct child.
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|err| ade_core::Error::Internal(format!("failed to spawn subprocess: {err}")))?;
        let pid = child
            .id()
            .ok_or_else(|| ade_core::Error::Internal("subprocess exited before its pid was observed".into()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ade_core::Error::Internal("subprocess stdout was not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ade_core::Error::Internal("subprocess stderr was not piped".into()))?;

        let stdout_task = spawn_drainer(
            stdout,
            format!("{scope}.stdout"),
            self.event_log.clone(),
            correlation_context.clone(),
            on_json_event.clone(),
        );
        let stderr_task = spawn_drainer(
            stderr,
            format!("{scope}.stderr"),
            self.event_log.clone(),
            correlation_context.clone(),
            on_json_event.clone(),
        );

        let mut heartbeat_tick = spec.heartbeat_interval.map(tokio::time::interval);
        let deadline = tokio::time::sleep(spec.deadline);
        tokio::pin!(deadline);

        let mut timed_out = false;
        let exit_code = loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|err| ade_core::Error::Internal(format!("failed to wait for subprocess: {err}")))?;
                    break status.code().unwrap_or(-1);
                }
                _ = &mut deadline => {
                    timed_out = true;
                    break terminate(&mut child, pid).await;
                }
                _ = tick(&mut heartbeat_tick) => {
                    if let Some(callback) = &on_heartbeat {
                        callback();
                    }
                }
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let duration = start.elapsed();
        let exit_code = if timed_out { 124 } else { exit_code };

        self.event_log
            .append_event(
                &Event::new(EventLevel::Info, format!("{scope}.complete"), "subprocess finished")
                    .with_data(serde_json::json!({
                        "command": command_display,
                        "cwd": spec.cwd.display().to_string(),
                        "exit_code": exit_code,
                        "timed_out": timed_out,
                        "duration_seconds": duration.as_secs_f64(),
                    })),
            )
            .await?;

        Ok(SubprocessOutcome {
            exit_code,
            timed_out,
            duration,
        })
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(unix)]
async fn terminate(child: &mut tokio::process::Child, pid: u32) -> i32 {
    let pgid = Pid::from_raw(pid as i32);
    let _ = signal::killpg(pgid, Signal::SIGTERM);

    let grace = tokio::time::sleep(TERMINATION_GRACE);
    tokio::pin!(grace);
    tokio::select! {
        status = child.wait() => {
            return status.ok().and_then(|s| s.code()).unwrap_or(-1);
        }
        _ = &mut grace => {}
    }

    let _ = signal::killpg(pgid, Signal::SIGKILL);
    child
        .wait()
        .await
        .ok()
        .and_then(|s| s.code())
        .unwrap_or(-1)
}

fn spawn_drainer<R>(
    reader: R,
    stream_scope: String,
    event_log: Arc<EventLog>,
    context: Option<Value>,
    on_json_event: Option<JsonEventCallback>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    handle_line(&line, &stream_scope, &event_log, &context, &on_json_event).await;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, stream = %stream_scope, "subprocess drainer read error");
                    break;
                }
            }
        }
    })
}

/// Lines that decode to a JSON object carrying an `event` key are appended
/// verbatim (plus the caller's correlation context). Everything else is
/// wrapped as a plain `<scope>.stdout`/`<scope>.stderr` line event.
async fn handle_line(
    line: &str,
    stream_scope: &str,
    event_log: &EventLog,
    context: &Option<Value>,
    on_json_event: &Option<JsonEventCallback>,
) {
    if let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(line) {
        if object.contains_key("event") {
            if let Some(context) = context {
                object.entry("context").or_insert_with(|| context.clone());
            }
            let value = Value::Object(object);
            if let Err(err) = event_log.append_value(&value).await {
                tracing::warn!(error = %err, "failed to append engine event to log");
            }
            if let Some(callback) = on_json_event {
                callback(&value);
            }
            return;
        }
    }

    let wrapped = serde_json::json!({
        "timestamp": chrono::Utc::now(),
        "level": "info",
        "event": stream_scope,
        "message": line,
    });
    if let Err(err) = event_log.append_value(&wrapped).await {
        tracing::warn!(error = %err, "failed to append subprocess line to log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn spec(program: &str, args: &[&str], cwd: &std::path::Path, deadline: Duration) -> SubprocessSpec {
        SubprocessSpec {
            scope: "test.run".into(),
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: cwd.to_path_buf(),
            env: Vec::new(),
            deadline,
            heartbeat_interval: None,
        }
    }

    #[tokio::test]
    async fn captures_json_events_and_plain_lines() {
        let dir = tempdir().unwrap();
        let log = Arc::new(EventLog::open(dir.path().join("events.ndjson")).await.unwrap());
        let runner = SubprocessRunner::new(log.clone());

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let callback: JsonEventCallback = Arc::new(move |_value| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        });

        let script = r#"echo '{"event":"engine.run.completed","message":"ok"}'; echo "plain line" >&2"#;
        let outcome = runner
            .run(
                spec("sh", &["-c", script], dir.path(), Duration::from_secs(5)),
                None,
                Some(callback),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.timed_out);
        assert_eq!(received.load(Ordering::SeqCst), 1);

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(contents.contains("test.run.start"));
        assert!(contents.contains("engine.run.completed"));
        assert!(contents.contains("test.run.stderr"));
        assert!(contents.contains("test.run.complete"));
    }

    #[tokio::test]
    async fn enforces_deadline_with_sigterm_then_sigkill() {
        let dir = tempdir().unwrap();
        let log = Arc::new(EventLog::open(dir.path().join("events.ndjson")).await.unwrap());
        let runner = SubprocessRunner::new(log);

        let outcome = runner
            .run(
                spec("sh", &["-c", "trap '' TERM; sleep 30"], dir.path(), Duration::from_millis(200)),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, 124);
    }

    #[tokio::test]
    async fn heartbeat_fires_while_child_runs() {
        let dir = tempdir().unwrap();
        let log = Arc::new(EventLog::open(dir.path().join("events.ndjson")).await.unwrap());
        let runner = SubprocessRunner::new(log);

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();
        let heartbeat: HeartbeatCallback = Arc::new(move || {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
        });

        let mut spec = spec("sh", &["-c", "sleep 0.3"], dir.path(), Duration::from_secs(5));
        spec.heartbeat_interval = Some(Duration::from_millis(50));

        runner.run(spec, None, None, Some(heartbeat)).await.unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }
}
