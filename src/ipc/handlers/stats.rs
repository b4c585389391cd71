use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::stats;

const DEFAULT_TOP_K: usize = 5;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_exam_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let top_k = req
        .params
        .get("topK")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_TOP_K);
    let Some(stored) = state.exams.get(&exam_id) else {
        return err(
            &req.id,
            "unknown_exam",
            "exam has not been graded this session",
            None,
        );
    };

    let students = &stored.aggregate.students;
    let max_score = stored.aggregate.exam_info.max_score;
    ok(
        &req.id,
        json!({
            "examId": exam_id,
            "examInfo": stored.aggregate.exam_info,
            "batchId": stored.batch_id,
            "gradedAt": stored.graded_at,
            "dedupPolicy": stored.dedup_policy.as_str(),
            "studentCount": students.len(),
            "meanScore": stats::mean_score(students),
            "passFail": stats::pass_fail(students, max_score),
            "topStudents": stats::top_students(students, top_k),
            "difficulty": stats::question_difficulty(students),
            "totals": stats::answer_totals(students),
            "scores": stats::score_distribution(students),
            "warnings": stored.warnings,
        }),
    )
}

fn handle_exam_difficulty(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(stored) = state.exams.get(&exam_id) else {
        return err(
            &req.id,
            "unknown_exam",
            "exam has not been graded this session",
            None,
        );
    };

    let mut rows = stats::question_difficulty(&stored.aggregate.students);
    if let Some(limit) = req.params.get("limit").and_then(|v| v.as_u64()) {
        rows.truncate(limit as usize);
    }
    ok(
        &req.id,
        json!({
            "examId": exam_id,
            "studentCount": stored.aggregate.students.len(),
            "difficulty": rows,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exam.summary" => Some(handle_exam_summary(state, req)),
        "exam.difficulty" => Some(handle_exam_difficulty(state, req)),
        _ => None,
    }
}
