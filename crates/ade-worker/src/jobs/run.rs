use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use tokio::fs;

use ade_core::{Event, EventLevel, RunId};
use ade_queue::environment::EnvironmentQueue;
use ade_queue::run::{RunClaim, RunQueue};
use ade_storage::model::{Document, DocumentStatus, Environment, EnvironmentStatus};
use ade_storage::{BlobAdapter, PathManager};
use ade_subprocess::{EventLog, HeartbeatCallback, JsonEventCallback, SubprocessRunner, SubprocessSpec};

use crate::jobs::run_results::parse_result;
use crate::settings::WorkerSettings;

const SCOPE: &str = "run";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RunOptions {
    validate_only: bool,
    dry_run: bool,
    log_level: String,
    input_sheet_names: Vec<String>,
    active_sheet_only: bool,
    max_findings_per_sheet: Option<i64>,
    engine_args: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            validate_only: false,
            dry_run: false,
            log_level: "INFO".to_string(),
            input_sheet_names: Vec::new(),
            active_sheet_only: false,
            max_findings_per_sheet: None,
            engine_args: Vec::new(),
        }
    }
}

impl RunOptions {
    /// Malformed or oddly-shaped `run_options` JSON degrades to the
    /// all-defaults options rather than failing the run (§4.7 step 3).
    fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Binds one claimed run to its environment, stages the input, drives the
/// engine subprocess, and persists the result. Ported from
/// `ade_worker/jobs/run.py`.
pub struct RunJob {
    pool: PgPool,
    run_queue: RunQueue,
    env_queue: EnvironmentQueue,
    paths: PathManager,
    blob: Arc<dyn BlobAdapter>,
    settings: Arc<WorkerSettings>,
    owner: String,
}

impl RunJob {
    pub fn new(
        pool: PgPool,
        run_queue: RunQueue,
        env_queue: EnvironmentQueue,
        paths: PathManager,
        blob: Arc<dyn BlobAdapter>,
        settings: Arc<WorkerSettings>,
        owner: String,
    ) -> Self {
        Self {
            pool,
            run_queue,
            env_queue,
            paths,
            blob,
            settings,
            owner,
        }
    }

    pub async fn run(&self, claim: RunClaim) -> ade_core::Result<()> {
        let Some(environment_id) = claim.environment_id else {
            return self.release_for_env(claim.id).await;
        };

        let environment = sqlx::query_as::<_, Environment>("SELECT * FROM environments WHERE id = $1")
            .bind(environment_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        let Some(environment) = environment else {
            return self.release_for_env(claim.id).await;
        };
        if environment.status != EnvironmentStatus::Ready {
            return self.release_for_env(claim.id).await;
        }

        let venv_python = self.paths.venv_python(environment_id)?;
        let engine_binary = self.paths.venv_engine_binary(environment_id)?;
        if !fs::try_exists(&venv_python).await? {
            self.env_queue.requeue_for_rebuild(environment_id).await?;
            return self.release_for_env(claim.id).await;
        }
        self.env_queue.touch_last_used(environment_id).await?;

        let options = RunOptions::from_value(&claim.options);

        let run_root = self.paths.run_root(claim.workspace_id, claim.id)?;
        fs::create_dir_all(&run_root).await?;
        let event_log = Arc::new(EventLog::open(self.paths.run_event_log_path(claim.workspace_id, claim.id)?).await?);
        let runner = SubprocessRunner::new(event_log.clone());
        let heartbeat = self.heartbeat_callback(claim.id);
        let correlation = serde_json::json!({
            "run_id": claim.id.to_string(),
            "workspace_id": claim.workspace_id.to_string(),
            "configuration_id": claim.configuration_id.to_string(),
        });

        if options.dry_run {
            event_log
                .append_event(&Event::new(EventLevel::Info, "run.complete", "dry run, engine not invoked"))
                .await?;
            self.run_queue
                .ack_success(claim.id, &self.owner, None, None, Some("Dry run"))
                .await?;
            return Ok(());
        }

        let config_root = self
            .paths
            .configuration_root(claim.workspace_id, claim.configuration_id)?;

        if options.validate_only {
            let spec = SubprocessSpec {
                scope: SCOPE.to_string(),
                program: engine_binary.display().to_string(),
                args: vec![
                    "config".to_string(),
                    "validate".to_string(),
                    "--config-package".to_string(),
                    config_root.display().to_string(),
                    "--log-format".to_string(),
                    "ndjson".to_string(),
                    "--log-level".to_string(),
                    options.log_level.clone(),
                ],
                cwd: run_root.clone(),
                env: Vec::new(),
                deadline: self.settings.run_timeout,
                heartbeat_interval: Some(self.settings.heartbeat_interval()),
            };
            let outcome = runner.run(spec, Some(correlation), None, Some(heartbeat)).await?;
            if outcome.exit_code == 0 {
                self.run_queue
                    .ack_success(claim.id, &self.owner, Some(outcome.exit_code), None, None)
                    .await?;
            } else {
                let message = format!("Engine failed (exit {})", outcome.exit_code);
                self.fail_run(&claim, outcome.exit_code, &message).await?;
            }
            return Ok(());
        }

        let document = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(claim.document_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        self.set_document_status(claim.document_id, DocumentStatus::Processing).await?;

        let input_path = self
            .paths
            .run_input_path(claim.workspace_id, claim.id, &document.filename)?;
        if let Some(parent) = input_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.blob.download_to_path(&document.blob_name, &input_path).await?;

        let output_dir = self.paths.run_output_dir(claim.workspace_id, claim.id)?;
        fs::create_dir_all(&output_dir).await?;

        let mut args = vec![
            "process".to_string(),
            "file".to_string(),
            "--input".to_string(),
            input_path.display().to_string(),
            "--output-dir".to_string(),
            output_dir.display().to_string(),
            "--config-package".to_string(),
            config_root.display().to_string(),
            "--log-format".to_string(),
            "ndjson".to_string(),
            "--log-level".to_string(),
            options.log_level.clone(),
        ];
        if let Some(max) = options.max_findings_per_sheet {
            args.push("--max-findings-per-sheet".to_string());
            args.push(max.to_string());
        }
        if options.active_sheet_only {
            args.push("--active-sheet-only".to_string());
        } else {
            for name in &options.input_sheet_names {
                args.push("--input-sheet".to_string());
                args.push(name.clone());
            }
        }
        args.extend(options.engine_args.iter().cloned());

        let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let captured_for_cb = captured.clone();
        let on_json_event: JsonEventCallback = Arc::new(move |value| {
            if value.get("event").and_then(Value::as_str) == Some("engine.run.completed") {
                *captured_for_cb.lock() = Some(value.clone());
            }
        });

        let spec = SubprocessSpec {
            scope: SCOPE.to_string(),
            program: engine_binary.display().to_string(),
            args,
            cwd: run_root.clone(),
            env: Vec::new(),
            deadline: self.settings.run_timeout,
            heartbeat_interval: Some(self.settings.heartbeat_interval()),
        };
        let outcome = runner
            .run(spec, Some(correlation), Some(on_json_event), Some(heartbeat))
            .await?;

        if outcome.timed_out {
            self.set_document_status(claim.document_id, DocumentStatus::Failed).await?;
            self.fail_run(&claim, 124, "Run timed out").await?;
            return Ok(());
        }

        if outcome.exit_code != 0 {
            let retryable = claim.attempt_count < claim.max_attempts;
            if !retryable {
                self.set_document_status(claim.document_id, DocumentStatus::Failed).await?;
            }
            let message = format!("Engine failed (exit {})", outcome.exit_code);
            self.fail_run(&claim, outcome.exit_code, &message).await?;
            return Ok(());
        }

        let completed_event = captured.lock().take();
        let data = completed_event.as_ref().and_then(|event| event.get("data").cloned());

        let output_path = data
            .as_ref()
            .and_then(|d| d.get("outputs"))
            .and_then(|o| o.get("normalized"))
            .and_then(|n| n.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string);

        self.run_queue
            .ack_success(claim.id, &self.owner, Some(0), output_path.as_deref(), None)
            .await?;
        self.set_document_status(claim.document_id, DocumentStatus::Processed).await?;

        match data {
            Some(data) => {
                let parsed = parse_result(claim.id, &data);
                self.persist_result(claim.id, parsed).await?;
            }
            None => {
                tracing::warn!(run_id = %claim.id, "engine.run.completed carried no data payload, derived tables left untouched");
            }
        }

        Ok(())
    }

    async fn release_for_env(&self, run_id: RunId) -> ade_core::Result<()> {
        let acked = self.run_queue.release_for_env(run_id, &self.owner).await?;
        if !acked {
            tracing::warn!(%run_id, owner = %self.owner, "run.lost_claim releasing for environment");
        }
        Ok(())
    }

    async fn fail_run(&self, claim: &RunClaim, exit_code: i32, message: &str) -> ade_core::Result<()> {
        let acked = self
            .run_queue
            .ack_failure(claim.id, &self.owner, Some(exit_code), message)
            .await?;
        if !acked {
            tracing::warn!(run_id = %claim.id, owner = %self.owner, "run.lost_claim acking failure");
        }
        Ok(())
    }

    async fn set_document_status(&self, document_id: ade_core::DocumentId, status: DocumentStatus) -> ade_core::Result<()> {
        sqlx::query("UPDATE documents SET status = $2 WHERE id = $1")
            .bind(document_id.as_uuid())
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replaces the three derived tables for `run_id` as a unit inside one
    /// transaction, so a reader never observes a partially-updated result.
    async fn persist_result(&self, run_id: RunId, parsed: crate::jobs::run_results::ParsedResult) -> ade_core::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM run_metrics WHERE run_id = $1")
            .bind(run_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM run_fields WHERE run_id = $1")
            .bind(run_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM run_table_columns WHERE run_id = $1")
            .bind(run_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        if let Some(metrics) = &parsed.metrics {
            sqlx::query(
                r#"
                INSERT INTO run_metrics (
                    run_id, evaluation_outcome, evaluation_findings_total, evaluation_findings_info,
                    evaluation_findings_warning, evaluation_findings_error, validation_issues_total,
                    validation_issues_info, validation_issues_warning, validation_issues_error,
                    validation_max_severity, workbook_count, sheet_count, table_count, row_count_total,
                    row_count_empty, column_count_total, column_count_empty, column_count_mapped,
                    column_count_unmapped, field_count_expected, field_count_detected,
                    field_count_not_detected, cell_count_total, cell_count_non_empty
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25)
                "#,
            )
            .bind(run_id.as_uuid())
            .bind(&metrics.evaluation_outcome)
            .bind(metrics.evaluation_findings_total)
            .bind(metrics.evaluation_findings_info)
            .bind(metrics.evaluation_findings_warning)
            .bind(metrics.evaluation_findings_error)
            .bind(metrics.validation_issues_total)
            .bind(metrics.validation_issues_info)
            .bind(metrics.validation_issues_warning)
            .bind(metrics.validation_issues_error)
            .bind(&metrics.validation_max_severity)
            .bind(metrics.workbook_count)
            .bind(metrics.sheet_count)
            .bind(metrics.table_count)
            .bind(metrics.row_count_total)
            .bind(metrics.row_count_empty)
            .bind(metrics.column_count_total)
            .bind(metrics.column_count_empty)
            .bind(metrics.column_count_mapped)
            .bind(metrics.column_count_unmapped)
            .bind(metrics.field_count_expected)
            .bind(metrics.field_count_detected)
            .bind(metrics.field_count_not_detected)
            .bind(metrics.cell_count_total)
            .bind(metrics.cell_count_non_empty)
            .execute(&mut *tx)
            .await?;
        }

        for field in &parsed.fields {
            sqlx::query(
                r#"
                INSERT INTO run_fields (run_id, field, label, detected, best_mapping_score, occurrences_tables, occurrences_columns)
                VALUES ($1,$2,$3,$4,$5,$6,$7)
                "#,
            )
            .bind(run_id.as_uuid())
            .bind(&field.field)
            .bind(&field.label)
            .bind(field.detected)
            .bind(field.best_mapping_score)
            .bind(field.occurrences_tables)
            .bind(field.occurrences_columns)
            .execute(&mut *tx)
            .await?;
        }

        for column in &parsed.columns {
            sqlx::query(
                r#"
                INSERT INTO run_table_columns (
                    run_id, workbook_index, workbook_name, sheet_index, sheet_name, table_index,
                    column_index, header_raw, header_normalized, non_empty_cells, mapping_status,
                    mapped_field, mapping_score, mapping_method, unmapped_reason
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
                "#,
            )
            .bind(run_id.as_uuid())
            .bind(column.workbook_index)
            .bind(&column.workbook_name)
            .bind(column.sheet_index)
            .bind(&column.sheet_name)
            .bind(column.table_index)
            .bind(column.column_index)
            .bind(&column.header_raw)
            .bind(&column.header_normalized)
            .bind(column.non_empty_cells)
            .bind(column.mapping_status)
            .bind(&column.mapped_field)
            .bind(column.mapping_score)
            .bind(&column.mapping_method)
            .bind(&column.unmapped_reason)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    fn heartbeat_callback(&self, run_id: RunId) -> HeartbeatCallback {
        let queue = self.run_queue.clone();
        let owner = self.owner.clone();
        let lease_seconds = self.settings.lease_seconds;
        Arc::new(move || {
            let queue = queue.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                match queue.heartbeat(run_id, &owner, lease_seconds).await {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!(%run_id, "run heartbeat found lease no longer held"),
                    Err(err) => tracing::warn!(%run_id, error = %err, "run heartbeat failed"),
                }
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_info_log_level_and_no_dry_run() {
        let options = RunOptions::from_value(&serde_json::json!({}));
        assert_eq!(options.log_level, "INFO");
        assert!(!options.dry_run);
        assert!(!options.validate_only);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let options = RunOptions::from_value(&serde_json::json!({"dry_run": true, "nonsense": 1}));
        assert!(options.dry_run);
    }

    #[test]
    fn malformed_shape_degrades_to_defaults() {
        let options = RunOptions::from_value(&serde_json::json!("not-an-object"));
        assert!(!options.dry_run);
        assert_eq!(options.log_level, "INFO");
    }
}
