use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::grade::GradeError;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
const RETRY_BASE_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

/// Blocking client for the exam backend. Grading passes are strictly
/// sequential (quiz before extraction before save), so every call runs on
/// the request thread with a timeout and a bounded retry.
pub struct BackendClient {
    cfg: BackendConfig,
    http: reqwest::blocking::Client,
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_BASE_MS << (attempt - 1).min(4))
}

impl BackendClient {
    pub fn new(mut cfg: BackendConfig) -> Result<BackendClient, GradeError> {
        while cfg.base_url.ends_with('/') {
            cfg.base_url.pop();
        }
        if cfg.base_url.is_empty() {
            return Err(GradeError::new("bad_params", "backend baseUrl is empty"));
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| {
                GradeError::new("bad_params", format!("failed to build http client: {}", e))
            })?;
        Ok(BackendClient { cfg, http })
    }

    pub fn base_url(&self) -> &str {
        &self.cfg.base_url
    }

    pub fn timeout_ms(&self) -> u64 {
        self.cfg.timeout_ms
    }

    pub fn max_retries(&self) -> u32 {
        self.cfg.max_retries
    }

    pub fn has_token(&self) -> bool {
        self.cfg.token.is_some()
    }

    /// Fetches quiz metadata and its question list (two sequential calls,
    /// the backend serves them separately) and merges them into the single
    /// quiz document the answer-key builder expects.
    pub fn fetch_quiz(&self, quiz_id: &str) -> Result<Value, GradeError> {
        let meta_url = format!("{}/api/quizzes/{}", self.cfg.base_url, quiz_id);
        let mut meta = self.get_json(&meta_url, "answer_key_fetch_failed")?;
        let questions_url = format!("{}/questions", meta_url);
        let questions = self.get_json(&questions_url, "answer_key_fetch_failed")?;
        let questions = match questions {
            Value::Object(mut obj) => obj
                .remove("questions")
                .unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        if let Some(obj) = meta.as_object_mut() {
            obj.insert("questions".to_string(), questions);
        }
        Ok(meta)
    }

    pub fn fetch_extraction(&self, exam_id: &str) -> Result<Value, GradeError> {
        let url = format!("{}/api/extractions/{}", self.cfg.base_url, exam_id);
        self.get_json(&url, "extraction_fetch_failed")
    }

    /// Persists graded results; returns the backend's HTTP status.
    pub fn save_results(&self, exam_id: &str, students: Value) -> Result<u16, GradeError> {
        let url = format!("{}/api/exam-results", self.cfg.base_url);
        let body = json!({ "examId": exam_id, "students": students });
        self.post_json(&url, &body, "save_failed")
    }

    fn get_json(&self, url: &str, code: &str) -> Result<Value, GradeError> {
        let mut last_err = None;
        for attempt in 0..=self.cfg.max_retries {
            if attempt > 0 {
                warn!(url, attempt, "retrying backend call");
                std::thread::sleep(backoff_delay(attempt));
            }
            debug!(url, "backend GET");
            let mut req = self.http.get(url);
            if let Some(token) = &self.cfg.token {
                req = req.bearer_auth(token);
            }
            match req.send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<Value>().map_err(|e| {
                            GradeError::new(code, "backend returned invalid json")
                                .with_details(json!({ "url": url, "error": e.to_string() }))
                        });
                    }
                    let err = Self::status_error(code, status.as_u16(), url);
                    if status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(
                        GradeError::new(code, "network error")
                            .with_details(json!({ "url": url, "error": e.to_string() })),
                    );
                }
            }
        }
        Err(last_err.unwrap_or_else(|| GradeError::new(code, "network error")))
    }

    fn post_json(&self, url: &str, body: &Value, code: &str) -> Result<u16, GradeError> {
        let mut last_err = None;
        for attempt in 0..=self.cfg.max_retries {
            if attempt > 0 {
                warn!(url, attempt, "retrying backend call");
                std::thread::sleep(backoff_delay(attempt));
            }
            debug!(url, "backend POST");
            let mut req = self.http.post(url).json(body);
            if let Some(token) = &self.cfg.token {
                req = req.bearer_auth(token);
            }
            match req.send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(status.as_u16());
                    }
                    let err = Self::status_error(code, status.as_u16(), url);
                    if status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(
                        GradeError::new(code, "network error")
                            .with_details(json!({ "url": url, "error": e.to_string() })),
                    );
                }
            }
        }
        Err(last_err.unwrap_or_else(|| GradeError::new(code, "network error")))
    }

    // 404 means the exam/quiz is unknown; 5xx is the backend's problem.
    // Both keep the status in details for the UI.
    fn status_error(code: &str, status: u16, url: &str) -> GradeError {
        let message = if status == 404 {
            "exam not found"
        } else if status >= 500 {
            "server error"
        } else {
            "unexpected backend response"
        };
        GradeError::new(code, message).with_details(json!({ "status": status, "url": url }))
    }
}
