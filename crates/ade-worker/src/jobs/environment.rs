use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use sqlx::PgPool;
use tokio::fs;

use ade_core::{Event, EventLevel};
use ade_queue::environment::{EnvironmentClaim, EnvironmentQueue};
use ade_storage::model::Environment;
use ade_storage::PathManager;
use ade_subprocess::{EventLog, HeartbeatCallback, JsonEventCallback, SubprocessRunner, SubprocessSpec};

use crate::settings::WorkerSettings;

/// Every subprocess this job runs shares one scope, matching the literal
/// event names `environment.start|complete|failed|versions`.
const SCOPE: &str = "environment";

/// Import/console-script name of the engine package, matching the
/// `engine config validate` / `engine process file` CLI contract.
const ENGINE_IMPORT_NAME: &str = "engine";

/// Shrinking time budget threaded through a job's sequential subprocess
/// calls, so a build that stalls on step 2 leaves less time for step 4.
struct DeadlineClock {
    start: Instant,
    total: Duration,
}

impl DeadlineClock {
    fn new(total: Duration) -> Self {
        Self {
            start: Instant::now(),
            total,
        }
    }

    fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.start.elapsed())
    }
}

#[derive(Debug, Default)]
struct VersionsProbe {
    python_interpreter: Option<String>,
    python_version: Option<String>,
    engine_version: Option<String>,
}

/// Provisions one environment row: venv creation, engine + config package
/// install, version probe, then an atomic ack. Ported from
/// `ade_worker/jobs/environment.py`.
pub struct EnvironmentJob {
    pool: PgPool,
    queue: EnvironmentQueue,
    paths: PathManager,
    settings: Arc<WorkerSettings>,
    owner: String,
}

impl EnvironmentJob {
    pub fn new(
        pool: PgPool,
        queue: EnvironmentQueue,
        paths: PathManager,
        settings: Arc<WorkerSettings>,
        owner: String,
    ) -> Self {
        Self {
            pool,
            queue,
            paths,
            settings,
            owner,
        }
    }

    /// Runs the full build described by `claim`, which must already have
    /// come back from `EnvironmentQueue::claim_next`/`claim_for_build`.
    pub async fn run(&self, claim: EnvironmentClaim) -> ade_core::Result<()> {
        let environment_id = claim.id;
        let environment = sqlx::query_as::<_, Environment>("SELECT * FROM environments WHERE id = $1")
            .bind(environment_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        let root = self.paths.environment_root(environment_id)?;
        if fs::try_exists(&root).await? {
            fs::remove_dir_all(&root).await?;
        }
        fs::create_dir_all(&root).await?;

        let event_log = Arc::new(
            EventLog::open(self.paths.environment_event_log_path(environment_id)?).await?,
        );
        let runner = SubprocessRunner::new(event_log.clone());
        let clock = DeadlineClock::new(self.settings.build_timeout);
        let heartbeat = self.heartbeat_callback(environment_id);

        let config_root = self
            .paths
            .configuration_root(environment.workspace_id, environment.configuration_id)?;
        let venv_dir = self.paths.environment_venv_dir(environment_id)?;
        let venv_python = self.paths.venv_python(environment_id)?;

        let build_result = self
            .build(
                &runner,
                &clock,
                heartbeat,
                &root,
                &venv_dir,
                &venv_python,
                &config_root,
                &environment.engine_spec,
            )
            .await;

        match build_result {
            Ok(versions) => {
                let acked = self
                    .queue
                    .ack_success(
                        environment_id,
                        &self.owner,
                        versions.engine_version.as_deref(),
                        versions.python_interpreter.as_deref(),
                        versions.python_version.as_deref(),
                    )
                    .await?;
                if !acked {
                    tracing::warn!(%environment_id, owner = %self.owner, "environment.lost_claim acking success");
                }
                Ok(())
            }
            Err(err) => {
                event_log
                    .append_event(&Event::new(EventLevel::Error, "environment.failed", err.to_string()))
                    .await?;
                let acked = self
                    .queue
                    .ack_failure(environment_id, &self.owner, &err.to_string())
                    .await?;
                if !acked {
                    tracing::warn!(%environment_id, owner = %self.owner, "environment.lost_claim acking failure");
                }
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn build(
        &self,
        runner: &SubprocessRunner,
        clock: &DeadlineClock,
        heartbeat: HeartbeatCallback,
        cwd: &Path,
        venv_dir: &Path,
        venv_python: &Path,
        config_root: &Path,
        engine_spec: &str,
    ) -> ade_core::Result<VersionsProbe> {
        let cache_dir = self.settings.pip_cache_dir.display().to_string();
        let cache_env = vec![
            ("UV_CACHE_DIR".to_string(), cache_dir.clone()),
            ("PIP_CACHE_DIR".to_string(), cache_dir),
        ];
        let venv_python_display = venv_python.display().to_string();

        // Step 3: create the interpreter venv.
        self.run_step(
            runner,
            clock,
            heartbeat.clone(),
            cwd,
            "uv",
            vec!["venv".to_string(), venv_dir.display().to_string()],
            &cache_env,
            None,
            "venv creation",
        )
        .await?;

        // Step 4: install the engine reference — editable if it resolves as
        // a local path, else as a requirement spec.
        let engine_is_local_path = fs::try_exists(engine_spec).await.unwrap_or(false);
        let engine_args = if engine_is_local_path {
            vec![
                "pip".to_string(),
                "install".to_string(),
                "--python".to_string(),
                venv_python_display.clone(),
                "-e".to_string(),
                engine_spec.to_string(),
            ]
        } else {
            vec![
                "pip".to_string(),
                "install".to_string(),
                "--python".to_string(),
                venv_python_display.clone(),
                engine_spec.to_string(),
            ]
        };
        self.run_step(
            runner,
            clock,
            heartbeat.clone(),
            cwd,
            "uv",
            engine_args,
            &cache_env,
            None,
            "engine install",
        )
        .await?;

        // Step 5: install the config package in editable mode.
        let config_args = vec![
            "pip".to_string(),
            "install".to_string(),
            "--python".to_string(),
            venv_python_display.clone(),
            "-e".to_string(),
            config_root.display().to_string(),
        ];
        self.run_step(
            runner,
            clock,
            heartbeat.clone(),
            cwd,
            "uv",
            config_args,
            &cache_env,
            None,
            "config package install",
        )
        .await?;

        // Step 6: probe python/engine versions. The probe script itself
        // prints a JSON `environment.versions` event, so the usual
        // JSON-line detection in the drainer logs it verbatim; the callback
        // below just captures the parsed data for the ack.
        let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let captured_for_cb = captured.clone();
        let on_json_event: JsonEventCallback = Arc::new(move |value| {
            if value.get("event").and_then(Value::as_str) == Some("environment.versions") {
                *captured_for_cb.lock() = Some(value.clone());
            }
        });
        self.run_step(
            runner,
            clock,
            heartbeat,
            cwd,
            &venv_python_display,
            vec!["-c".to_string(), version_probe_script()],
            &[],
            Some(on_json_event),
            "version probe",
        )
        .await?;

        let data = captured
            .lock()
            .take()
            .and_then(|event| event.get("data").cloned());
        Ok(VersionsProbe {
            python_interpreter: string_field(&data, "python_interpreter"),
            python_version: string_field(&data, "python_version"),
            engine_version: string_field(&data, "engine_version"),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        runner: &SubprocessRunner,
        clock: &DeadlineClock,
        heartbeat: HeartbeatCallback,
        cwd: &Path,
        program: &str,
        args: Vec<String>,
        env: &[(String, String)],
        on_json_event: Option<JsonEventCallback>,
        label: &str,
    ) -> ade_core::Result<()> {
        let spec = SubprocessSpec {
            scope: SCOPE.to_string(),
            program: program.to_string(),
            args,
            cwd: cwd.to_path_buf(),
            env: env.to_vec(),
            deadline: clock.remaining(),
            heartbeat_interval: Some(self.settings.heartbeat_interval()),
        };
        let outcome = runner.run(spec, None, on_json_event, Some(heartbeat)).await?;
        if outcome.exit_code != 0 {
            return Err(ade_core::Error::Internal(format!(
                "{label} failed (exit {}{})",
                outcome.exit_code,
                if outcome.timed_out { ", timed out" } else { "" }
            )));
        }
        Ok(())
    }

    fn heartbeat_callback(&self, environment_id: ade_core::EnvironmentId) -> HeartbeatCallback {
        let queue = self.queue.clone();
        let owner = self.owner.clone();
        let lease_seconds = self.settings.lease_seconds;
        Arc::new(move || {
            let queue = queue.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                match queue.heartbeat(environment_id, &owner, lease_seconds).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(%environment_id, "environment heartbeat found lease no longer held")
                    }
                    Err(err) => {
                        tracing::warn!(%environment_id, error = %err, "environment heartbeat failed")
                    }
                }
            });
        })
    }
}

fn string_field(data: &Option<Value>, key: &str) -> Option<String> {
    data.as_ref()
        .and_then(|value| value.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn version_probe_script() -> String {
    format!(
        "import json, sys\n\
try:\n    \
    import {engine} as engine_module\n    \
    engine_version = getattr(engine_module, '__version__', None)\n\
except Exception:\n    \
    engine_version = None\n\
print(json.dumps({{\n    \
    'event': 'environment.versions',\n    \
    'message': 'probed interpreter and engine versions',\n    \
    'data': {{\n        \
        'python_version': sys.version.split()[0],\n        \
        'python_interpreter': sys.executable,\n        \
        'engine_version': engine_version,\n    \
    }},\n\
}}))\n",
        engine = ENGINE_IMPORT_NAME,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_clock_shrinks_and_floors_at_zero() {
        let clock = DeadlineClock::new(Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(clock.remaining(), Duration::ZERO);
    }

    #[test]
    fn version_probe_script_names_the_engine_module() {
        let script = version_probe_script();
        assert!(script.contains("import engine as engine_module"));
        assert!(script.contains("environment.versions"));
    }

    #[test]
    fn string_field_reads_nested_data_key() {
        let data = Some(serde_json::json!({"python_version": "3.11.4"}));
        assert_eq!(string_field(&data, "python_version"), Some("3.11.4".to_string()));
        assert_eq!(string_field(&data, "missing"), None);
    }
}
