use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::backend::BackendClient;
use crate::extract;
use crate::grade::{self, DEFAULT_MAX_SCORE};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::types::{AppState, Request, StoredExam};
use crate::key;
use crate::stats::{self, DedupPolicy, ExamAggregate, ExamInfo};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn required_obj<'a>(req: &'a Request, key: &str) -> Result<&'a Value, serde_json::Value> {
    match req.params.get(key) {
        Some(v) if v.is_object() => Ok(v),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_max_score(req: &Request) -> Result<f64, serde_json::Value> {
    match req.params.get("maxScore") {
        None => Ok(DEFAULT_MAX_SCORE),
        Some(v) if v.is_null() => Ok(DEFAULT_MAX_SCORE),
        Some(v) => match v.as_f64() {
            Some(m) if m.is_finite() && m > 0.0 => Ok(m),
            _ => Err(err(
                &req.id,
                "bad_params",
                "maxScore must be a positive number",
                None,
            )),
        },
    }
}

fn parse_dedup_policy(req: &Request) -> Result<DedupPolicy, serde_json::Value> {
    match req.params.get("dedupPolicy").and_then(|v| v.as_str()) {
        None => Ok(DedupPolicy::FirstScan),
        Some(s) => DedupPolicy::parse(s).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "dedupPolicy must be one of: first_scan, last_scan, highest_score",
                Some(json!({ "dedupPolicy": s })),
            )
        }),
    }
}

fn backend_client<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a BackendClient, serde_json::Value> {
    state
        .backend
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_backend", "configure the backend first", None))
}

/// The full pipeline behind both grading entry points: answer key from the
/// quiz, normalize the batch, grade each student, dedup, store the
/// aggregate for this session under its exam id.
fn grade_and_store(
    state: &mut AppState,
    quiz: &Value,
    extraction: &Value,
    exam_id_override: Option<String>,
    max_score: f64,
    policy: DedupPolicy,
) -> Result<serde_json::Value, grade::GradeError> {
    let (answer_key, mut warnings) = key::build_answer_key(quiz)?;
    let exam_id = exam_id_override.unwrap_or_else(|| answer_key.exam_id.clone());
    let batch = extract::normalize_batch(extraction, Some(exam_id.as_str()))?;
    warnings.extend(batch.warnings);

    let mut graded = Vec::with_capacity(batch.submissions.len());
    for submission in &batch.submissions {
        match grade::grade_submission(submission, &answer_key, max_score) {
            Ok(result) => graded.push(result),
            // An empty sheet is excluded from the aggregate, not fatal.
            Err(e) if e.code == "empty_submission" => warnings.push(json!({
                "code": "empty_submission",
                "message": e.message,
                "cin": submission.identity.cin,
                "name": submission.identity.name,
            })),
            Err(e) => return Err(e),
        }
    }
    let records_scanned = batch.submissions.len();
    let students_graded = graded.len();
    let (students, dedup_warnings) = stats::dedupe(graded, policy);
    warnings.extend(dedup_warnings);

    let stored = StoredExam {
        aggregate: ExamAggregate {
            exam_info: ExamInfo {
                title: answer_key.title.clone(),
                exam_id: exam_id.clone(),
                max_score,
            },
            students,
        },
        warnings,
        dedup_policy: policy,
        batch_id: Uuid::new_v4().to_string(),
        graded_at: chrono::Utc::now().to_rfc3339(),
    };
    info!(
        exam_id = %exam_id,
        records_scanned,
        students_kept = stored.aggregate.students.len(),
        "graded batch"
    );

    let result = json!({
        "examId": exam_id,
        "batchId": stored.batch_id,
        "gradedAt": stored.graded_at,
        "dedupPolicy": policy.as_str(),
        "maxScore": max_score,
        "recordsScanned": records_scanned,
        "studentsGraded": students_graded,
        "studentsKept": stored.aggregate.students.len(),
        "aggregate": &stored.aggregate,
        "warnings": &stored.warnings,
    });
    state.exams.insert(exam_id, stored);
    Ok(result)
}

fn handle_key_build(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let quiz = match required_obj(req, "quiz") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match key::build_answer_key(quiz) {
        Ok((answer_key, warnings)) => ok(
            &req.id,
            json!({
                "answerKey": answer_key,
                "questionCount": answer_key.questions.len(),
                "warnings": warnings,
            }),
        ),
        Err(e) => fail(&req.id, e),
    }
}

fn handle_submissions_normalize(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let extraction = match required_obj(req, "extraction") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = optional_str(req, "examId");
    match extract::normalize_batch(extraction, exam_id.as_deref()) {
        Ok(batch) => ok(
            &req.id,
            json!({
                "examId": batch.exam_id,
                "students": batch.submissions,
                "studentCount": batch.submissions.len(),
                "warnings": batch.warnings,
            }),
        ),
        Err(e) => fail(&req.id, e),
    }
}

fn handle_grade_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let quiz = match required_obj(req, "quiz") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let extraction = match required_obj(req, "extraction") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_score = match parse_max_score(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match parse_dedup_policy(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = optional_str(req, "examId");

    match grade_and_store(state, quiz, extraction, exam_id, max_score, policy) {
        Ok(result) => ok(&req.id, result),
        Err(e) => fail(&req.id, e),
    }
}

fn handle_grading_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let quiz_id = match required_str(req, "quizId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_score = match parse_max_score(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match parse_dedup_policy(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id_param = optional_str(req, "examId");

    // The extraction fetch needs the exam id the quiz names, so the two
    // requests run in order and a failed fetch cancels the whole pass.
    let (quiz, extraction, exam_id) = {
        let client = match backend_client(state, req) {
            Ok(c) => c,
            Err(e) => return e,
        };
        let quiz = match client.fetch_quiz(&quiz_id) {
            Ok(v) => v,
            Err(e) => return fail(&req.id, e),
        };
        let exam_id = match exam_id_param.or_else(|| {
            quiz.get("exam_id")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }) {
            Some(v) => v,
            None => return err(&req.id, "missing_exam_id", "quiz has no exam identifier", None),
        };
        let extraction = match client.fetch_extraction(&exam_id) {
            Ok(v) => v,
            Err(e) => return fail(&req.id, e),
        };
        (quiz, extraction, exam_id)
    };

    match grade_and_store(state, &quiz, &extraction, Some(exam_id), max_score, policy) {
        Ok(result) => ok(&req.id, result),
        Err(e) => fail(&req.id, e),
    }
}

fn handle_grading_rescore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_score = match req.params.get("maxScore").and_then(|v| v.as_f64()) {
        Some(m) if m.is_finite() && m > 0.0 => m,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "maxScore must be a positive number",
                None,
            )
        }
    };
    let Some(stored) = state.exams.get_mut(&exam_id) else {
        return err(
            &req.id,
            "unknown_exam",
            "exam has not been graded this session",
            None,
        );
    };

    // Pure rescale from the stored counts; letter matching is not re-run
    // and the surviving record set does not change.
    for student in &mut stored.aggregate.students {
        grade::rescore(student, max_score);
    }
    stored.aggregate.exam_info.max_score = max_score;
    info!(exam_id = %exam_id, max_score, "rescored exam");

    ok(
        &req.id,
        json!({
            "examId": exam_id,
            "maxScore": max_score,
            "studentCount": stored.aggregate.students.len(),
            "aggregate": &stored.aggregate,
        }),
    )
}

fn handle_grading_save(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let client = match backend_client(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let students = json!(&stored.aggregate.students);
    match client.save_results(&exam_id, students) {
        Ok(status) => {
            info!(exam_id = %exam_id, status, "saved graded results");
            ok(
                &req.id,
                json!({
                    "examId": exam_id,
                    "saved": true,
                    "status": status,
                    "studentCount": stored.aggregate.students.len(),
                }),
            )
        }
        Err(e) => fail(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "key.build" => Some(handle_key_build(state, req)),
        "submissions.normalize" => Some(handle_submissions_normalize(state, req)),
        "grading.gradeBatch" => Some(handle_grade_batch(state, req)),
        "grading.run" => Some(handle_grading_run(state, req)),
        "grading.rescore" => Some(handle_grading_rescore(state, req)),
        "grading.save" => Some(handle_grading_save(state, req)),
        _ => None,
    }
}
