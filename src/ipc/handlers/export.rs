use std::path::PathBuf;

use serde_json::json;
use tracing::info;

use crate::export::{self, ExportMode};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, StoredExam};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_mode(req: &Request) -> Result<ExportMode, serde_json::Value> {
    match req.params.get("mode").and_then(|v| v.as_str()) {
        None => Ok(ExportMode::Detailed),
        Some(s) => ExportMode::parse(s).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "mode must be one of: detailed, per_student",
                Some(json!({ "mode": s })),
            )
        }),
    }
}

fn stored_exam<'a>(
    state: &'a AppState,
    req: &Request,
    exam_id: &str,
) -> Result<&'a StoredExam, serde_json::Value> {
    state.exams.get(exam_id).ok_or_else(|| {
        err(
            &req.id,
            "unknown_exam",
            "exam has not been graded this session",
            None,
        )
    })
}

fn handle_export_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mode = match parse_mode(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let stored = match stored_exam(state, req, &exam_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let rows = export::spreadsheet_rows(&stored.aggregate, mode);
    ok(
        &req.id,
        json!({
            "examId": exam_id,
            "mode": mode.as_str(),
            "rowCount": rows.len(),
            "rows": rows,
        }),
    )
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mode = match parse_mode(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let stored = match stored_exam(state, req, &exam_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let rows = export::spreadsheet_rows(&stored.aggregate, mode);
    let path = PathBuf::from(&out_path);
    match export::write_csv(&path, &rows) {
        Ok(summary) => {
            info!(exam_id = %exam_id, path = %out_path, rows = summary.rows, "wrote csv export");
            ok(
                &req.id,
                json!({
                    "examId": exam_id,
                    "mode": mode.as_str(),
                    "path": out_path,
                    "rows": summary.rows,
                    "sha256": summary.sha256,
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "export_failed",
            format!("csv export failed: {:#}", e),
            None,
        ),
    }
}

fn handle_export_xlsx(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mode = match parse_mode(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let stored = match stored_exam(state, req, &exam_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let rows = export::spreadsheet_rows(&stored.aggregate, mode);
    let sheet = export::sanitize_sheet_name(&stored.aggregate.exam_info.title);
    let path = PathBuf::from(&out_path);
    match export::write_xlsx(&path, &rows, &sheet) {
        Ok(summary) => {
            info!(exam_id = %exam_id, path = %out_path, rows = summary.rows, "wrote workbook export");
            ok(
                &req.id,
                json!({
                    "examId": exam_id,
                    "mode": mode.as_str(),
                    "path": out_path,
                    "rows": summary.rows,
                    "sha256": summary.sha256,
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "export_failed",
            format!("workbook export failed: {:#}", e),
            None,
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.rows" => Some(handle_export_rows(state, req)),
        "export.csv" => Some(handle_export_csv(state, req)),
        "export.xlsx" => Some(handle_export_xlsx(state, req)),
        _ => None,
    }
}
