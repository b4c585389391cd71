use std::collections::HashMap;

use serde::Deserialize;

use crate::backend::BackendClient;
use crate::stats::{DedupPolicy, ExamAggregate};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One graded batch as kept for the session, keyed by exam id in
/// `AppState`. Re-grading the exam replaces the whole entry.
pub struct StoredExam {
    pub aggregate: ExamAggregate,
    pub warnings: Vec<serde_json::Value>,
    pub dedup_policy: DedupPolicy,
    pub batch_id: String,
    pub graded_at: String,
}

pub struct AppState {
    pub backend: Option<BackendClient>,
    pub exams: HashMap<String, StoredExam>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            backend: None,
            exams: HashMap::new(),
        }
    }
}
