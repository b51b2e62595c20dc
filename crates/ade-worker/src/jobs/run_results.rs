use serde_json::Value;

use ade_core::RunId;
use ade_storage::model::{MappingStatus, RunField, RunMetrics, RunTableColumn};

const SEVERITIES: [&str; 3] = ["info", "warning", "error"];

/// Parsed projection of one `engine.run.completed` payload, ready to be
/// persisted as a unit. Ported from `ade_worker/run_results.py`.
#[derive(Debug, Default)]
pub struct ParsedResult {
    pub metrics: Option<RunMetrics>,
    pub fields: Vec<RunField>,
    pub columns: Vec<RunTableColumn>,
}

/// Parses the `data` object of an `engine.run.completed` event into the
/// three derived-table shapes. Every extraction is independently
/// defensive: a missing or malformed scalar drops just that value (for
/// metrics) or that row (for fields/columns), never the whole parse.
pub fn parse_result(run_id: RunId, data: &Value) -> ParsedResult {
    ParsedResult {
        metrics: parse_metrics(run_id, data),
        fields: parse_fields(run_id, data),
        columns: parse_columns(run_id, data),
    }
}

/// Tallies findings by `severity`, the way `_count_findings` does: unknown
/// or missing severities are skipped rather than bucketed into "other".
fn count_findings(findings: &[Value]) -> [i64; 3] {
    let mut counts = [0i64; 3];
    for item in findings {
        let Some(severity) = item.get("severity").and_then(Value::as_str) else {
            continue;
        };
        let severity = severity.to_lowercase();
        if let Some(i) = SEVERITIES.iter().position(|s| *s == severity) {
            counts[i] += 1;
        }
    }
    counts
}

fn parse_metrics(run_id: RunId, data: &Value) -> Option<RunMetrics> {
    let evaluation = data.get("evaluation");
    let findings = evaluation.and_then(|e| e.get("findings")).and_then(Value::as_array);
    let (evaluation_findings_total, evaluation_findings_info, evaluation_findings_warning, evaluation_findings_error) =
        match findings {
            Some(findings) => {
                let counts = count_findings(findings);
                (
                    Some(findings.len() as i64),
                    Some(counts[0]),
                    Some(counts[1]),
                    Some(counts[2]),
                )
            }
            None => (None, None, None, None),
        };

    let validation = data.get("validation");
    let issues_by_severity = validation.and_then(|v| v.get("issues_by_severity"));
    let counts = data.get("counts");
    let rows = counts.and_then(|c| c.get("rows"));
    let columns = counts.and_then(|c| c.get("columns"));
    let fields = counts.and_then(|c| c.get("fields"));
    let cells = counts.and_then(|c| c.get("cells"));

    let metrics = RunMetrics {
        run_id,
        evaluation_outcome: string_field(evaluation, "outcome"),
        evaluation_findings_total,
        evaluation_findings_info,
        evaluation_findings_warning,
        evaluation_findings_error,
        validation_issues_total: int_field(validation, "issues_total"),
        validation_issues_info: int_field(issues_by_severity, "info"),
        validation_issues_warning: int_field(issues_by_severity, "warning"),
        validation_issues_error: int_field(issues_by_severity, "error"),
        validation_max_severity: string_field(validation, "max_severity"),
        workbook_count: int_field(counts, "workbooks"),
        sheet_count: int_field(counts, "sheets"),
        table_count: int_field(counts, "tables"),
        row_count_total: int_field(rows, "total"),
        row_count_empty: int_field(rows, "empty"),
        column_count_total: int_field(columns, "total"),
        column_count_empty: int_field(columns, "empty"),
        column_count_mapped: int_field(columns, "mapped"),
        column_count_unmapped: int_field(columns, "unmapped"),
        field_count_expected: int_field(fields, "expected"),
        field_count_detected: int_field(fields, "detected"),
        field_count_not_detected: int_field(fields, "not_detected"),
        cell_count_total: int_field(cells, "total"),
        cell_count_non_empty: int_field(cells, "non_empty"),
    };

    if has_any_value(&metrics) {
        Some(metrics)
    } else {
        None
    }
}

/// Emits the metrics row only if at least one value is populated (§4.7.1);
/// an all-`None` row would be indistinguishable from "not parsed" and
/// would just clutter the table.
fn has_any_value(metrics: &RunMetrics) -> bool {
    metrics.evaluation_outcome.is_some()
        || metrics.evaluation_findings_total.is_some()
        || metrics.evaluation_findings_info.is_some()
        || metrics.evaluation_findings_warning.is_some()
        || metrics.evaluation_findings_error.is_some()
        || metrics.validation_issues_total.is_some()
        || metrics.validation_issues_info.is_some()
        || metrics.validation_issues_warning.is_some()
        || metrics.validation_issues_error.is_some()
        || metrics.validation_max_severity.is_some()
        || metrics.workbook_count.is_some()
        || metrics.sheet_count.is_some()
        || metrics.table_count.is_some()
        || metrics.row_count_total.is_some()
        || metrics.row_count_empty.is_some()
        || metrics.column_count_total.is_some()
        || metrics.column_count_empty.is_some()
        || metrics.column_count_mapped.is_some()
        || metrics.column_count_unmapped.is_some()
        || metrics.field_count_expected.is_some()
        || metrics.field_count_detected.is_some()
        || metrics.field_count_not_detected.is_some()
        || metrics.cell_count_total.is_some()
        || metrics.cell_count_non_empty.is_some()
}

/// One row per declared field under `data.fields[]`. Rows lacking `field`
/// or `detected` are dropped rather than aborting the whole parse.
fn parse_fields(run_id: RunId, data: &Value) -> Vec<RunField> {
    let Some(fields) = data.get("fields").and_then(Value::as_array) else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|entry| {
            let field = entry.get("field")?.as_str()?.to_string();
            let detected = entry.get("detected")?.as_bool()?;
            let occurrences = entry.get("occurrences");
            Some(RunField {
                run_id,
                field,
                label: string_field(Some(entry), "label"),
                detected,
                best_mapping_score: entry.get("best_mapping_score").and_then(Value::as_f64),
                occurrences_tables: int_field(occurrences, "tables").unwrap_or(0),
                occurrences_columns: int_field(occurrences, "columns").unwrap_or(0),
            })
        })
        .collect()
}

/// One row per column discovered under
/// `workbooks[i].locator.workbook`, `.sheets[j].locator.sheet`,
/// `.tables[k].locator.table`, and `.structure.columns[l]`. Every locator
/// index/name is read from its own nested object rather than the
/// enumeration position, matching what the engine actually emits.
fn parse_columns(run_id: RunId, data: &Value) -> Vec<RunTableColumn> {
    let Some(workbooks) = data.get("workbooks").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for workbook in workbooks {
        let workbook_locator = workbook.get("locator").and_then(|l| l.get("workbook"));
        let Some(workbook_index) = int_field(workbook_locator, "index") else {
            continue;
        };
        let Some(workbook_name) = string_field(workbook_locator, "name") else {
            continue;
        };

        let Some(sheets) = workbook.get("sheets").and_then(Value::as_array) else {
            continue;
        };
        for sheet in sheets {
            let sheet_locator = sheet.get("locator").and_then(|l| l.get("sheet"));
            let Some(sheet_index) = int_field(sheet_locator, "index") else {
                continue;
            };
            let Some(sheet_name) = string_field(sheet_locator, "name") else {
                continue;
            };

            let Some(tables) = sheet.get("tables").and_then(Value::as_array) else {
                continue;
            };
            for table in tables {
                let table_locator = table.get("locator").and_then(|l| l.get("table"));
                let Some(table_index) = int_field(table_locator, "index") else {
                    continue;
                };

                let Some(columns) = table
                    .get("structure")
                    .and_then(|s| s.get("columns"))
                    .and_then(Value::as_array)
                else {
                    continue;
                };
                for column in columns {
                    let Some(row) = parse_one_column(
                        run_id,
                        workbook_index,
                        &workbook_name,
                        sheet_index,
                        &sheet_name,
                        table_index,
                        column,
                    ) else {
                        continue;
                    };
                    out.push(row);
                }
            }
        }
    }
    out
}

fn parse_one_column(
    run_id: RunId,
    workbook_index: i64,
    workbook_name: &str,
    sheet_index: i64,
    sheet_name: &str,
    table_index: i64,
    column: &Value,
) -> Option<RunTableColumn> {
    let column_index = int_field(Some(column), "index")?;
    let mapping = column.get("mapping");
    let mapping_status = match string_field(mapping, "status")?.to_lowercase().as_str() {
        "mapped" => MappingStatus::Mapped,
        "unmapped" => MappingStatus::Unmapped,
        _ => return None,
    };
    let header = column.get("header");
    Some(RunTableColumn {
        run_id,
        workbook_index,
        workbook_name: workbook_name.to_string(),
        sheet_index,
        sheet_name: sheet_name.to_string(),
        table_index,
        column_index,
        header_raw: string_field(header, "raw"),
        header_normalized: string_field(header, "normalized"),
        non_empty_cells: int_field(Some(column), "non_empty_cells").unwrap_or(0),
        mapping_status,
        mapped_field: string_field(mapping, "field"),
        mapping_score: mapping.and_then(|m| m.get("score")).and_then(Value::as_f64),
        mapping_method: string_field(mapping, "method"),
        unmapped_reason: string_field(mapping, "unmapped_reason"),
    })
}

fn string_field(value: Option<&Value>, key: &str) -> Option<String> {
    value?.get(key)?.as_str().map(str::to_string)
}

fn int_field(value: Option<&Value>, key: &str) -> Option<i64> {
    value?.get(key)?.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_metrics_when_payload_is_empty() {
        let data = serde_json::json!({});
        assert!(parse_metrics(RunId::new(), &data).is_none());
    }

    #[test]
    fn parses_metrics_when_at_least_one_value_present() {
        let data = serde_json::json!({"counts": {"workbooks": 2}});
        let metrics = parse_metrics(RunId::new(), &data).unwrap();
        assert_eq!(metrics.workbook_count, Some(2));
        assert_eq!(metrics.sheet_count, None);
    }

    #[test]
    fn counts_findings_list_by_severity() {
        let data = serde_json::json!({"evaluation": {"outcome": "pass", "findings": [
            {"severity": "info"},
            {"severity": "warning"},
            {"severity": "warning"},
            {"severity": "error"},
            {"severity": "unknown"},
        ]}});
        let metrics = parse_metrics(RunId::new(), &data).unwrap();
        assert_eq!(metrics.evaluation_findings_total, Some(5));
        assert_eq!(metrics.evaluation_findings_info, Some(1));
        assert_eq!(metrics.evaluation_findings_warning, Some(2));
        assert_eq!(metrics.evaluation_findings_error, Some(1));
    }

    #[test]
    fn reads_nested_counts_and_validation_shapes() {
        let data = serde_json::json!({
            "validation": {
                "issues_total": 4,
                "issues_by_severity": {"info": 1, "warning": 2, "error": 1},
                "max_severity": "error",
            },
            "counts": {
                "rows": {"total": 100, "empty": 3},
                "columns": {"total": 10, "empty": 1, "mapped": 8, "unmapped": 1},
                "fields": {"expected": 12, "detected": 9, "not_detected": 3},
                "cells": {"total": 1000, "non_empty": 950},
            },
        });
        let metrics = parse_metrics(RunId::new(), &data).unwrap();
        assert_eq!(metrics.validation_issues_total, Some(4));
        assert_eq!(metrics.validation_issues_info, Some(1));
        assert_eq!(metrics.validation_issues_warning, Some(2));
        assert_eq!(metrics.validation_issues_error, Some(1));
        assert_eq!(metrics.validation_max_severity, Some("error".to_string()));
        assert_eq!(metrics.row_count_total, Some(100));
        assert_eq!(metrics.row_count_empty, Some(3));
        assert_eq!(metrics.column_count_mapped, Some(8));
        assert_eq!(metrics.field_count_expected, Some(12));
        assert_eq!(metrics.cell_count_non_empty, Some(950));
    }

    #[test]
    fn drops_field_rows_missing_required_scalars() {
        let data = serde_json::json!({"fields": [
            {"field": "invoice_number"},
            {"field": "total", "detected": true, "occurrences": {"tables": 1, "columns": 1}},
        ]});
        let fields = parse_fields(RunId::new(), &data);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field, "total");
        assert_eq!(fields[0].occurrences_tables, 1);
        assert_eq!(fields[0].occurrences_columns, 1);
    }

    #[test]
    fn walks_nested_workbook_sheet_table_column_structure() {
        let data = serde_json::json!({"workbooks": [{
            "locator": {"workbook": {"index": 0, "name": "book.xlsx"}},
            "sheets": [{
                "locator": {"sheet": {"index": 0, "name": "Sheet1"}},
                "tables": [{
                    "locator": {"table": {"index": 0}},
                    "structure": {"columns": [
                        {"index": 0, "mapping": {"status": "mapped", "field": "total"}, "header": {"raw": "Total"}},
                        {"index": 1, "mapping": {"status": "unmapped", "unmapped_reason": "no_match"}},
                    ]}
                }]
            }]
        }]});
        let columns = parse_columns(RunId::new(), &data);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].workbook_name, "book.xlsx");
        assert_eq!(columns[0].sheet_name, "Sheet1");
        assert_eq!(columns[0].column_index, 0);
        assert_eq!(columns[0].mapping_status, MappingStatus::Mapped);
        assert_eq!(columns[0].mapped_field, Some("total".to_string()));
        assert_eq!(columns[1].column_index, 1);
        assert_eq!(columns[1].mapping_status, MappingStatus::Unmapped);
        assert_eq!(columns[1].unmapped_reason, Some("no_match".to_string()));
    }

    #[test]
    fn drops_columns_with_invalid_mapping_status() {
        let data = serde_json::json!({"workbooks": [{
            "locator": {"workbook": {"index": 0, "name": "book.xlsx"}},
            "sheets": [{
                "locator": {"sheet": {"index": 0, "name": "Sheet1"}},
                "tables": [{
                    "locator": {"table": {"index": 0}},
                    "structure": {"columns": [{"index": 0, "mapping": {"status": "weird"}}]}
                }]
            }]
        }]});
        assert!(parse_columns(RunId::new(), &data).is_empty());
    }

    #[test]
    fn drops_workbook_missing_locator_index_or_name() {
        let data = serde_json::json!({"workbooks": [{
            "sheets": [{
                "locator": {"sheet": {"index": 0, "name": "Sheet1"}},
                "tables": [{"locator": {"table": {"index": 0}}, "structure": {"columns": [
                    {"index": 0, "mapping": {"status": "mapped", "field": "x"}},
                ]}}]
            }]
        }]});
        assert!(parse_columns(RunId::new(), &data).is_empty());
    }
}
