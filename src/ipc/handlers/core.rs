use crate::backend::{BackendClient, BackendConfig, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS};
use crate::ipc::error::{err, fail, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backendUrl": state.backend.as_ref().map(|b| b.base_url().to_string()),
            "gradedExams": state.exams.len(),
        }),
    )
}

fn handle_backend_configure(state: &mut AppState, req: &Request) -> serde_json::Value {
    let base_url = req
        .params
        .get("baseUrl")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let Some(base_url) = base_url else {
        return err(&req.id, "bad_params", "missing params.baseUrl", None);
    };
    let token = req
        .params
        .get("token")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty());
    let timeout_ms = req
        .params
        .get("timeoutMs")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    let max_retries = req
        .params
        .get("maxRetries")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_MAX_RETRIES as u64) as u32;

    let client = match BackendClient::new(BackendConfig {
        base_url,
        token,
        timeout_ms,
        max_retries,
    }) {
        Ok(c) => c,
        Err(e) => return fail(&req.id, e),
    };
    info!(base_url = client.base_url(), "backend configured");
    let summary = json!({
        "baseUrl": client.base_url(),
        "timeoutMs": client.timeout_ms(),
        "maxRetries": client.max_retries(),
        "authConfigured": client.has_token(),
    });
    state.backend = Some(client);
    ok(&req.id, summary)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "backend.configure" => Some(handle_backend_configure(state, req)),
        _ => None,
    }
}
