//! REST endpoints: generation, email processing, CRM, notifications, cache.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CompletionKey, ResponseCache};
use crate::error::StoreError;
use crate::llm::{FallbackInvoker, GenerateRequest};
use crate::notifications::{DEFAULT_LIST_LIMIT, NotificationCenter, NotificationKind};
use crate::pipeline::sender::extract_sender_name;
use crate::pipeline::{EmailPayload, EmailProcessor};
use crate::store::{LeadStore, SenderLog, leads::HISTORY_LIMIT};

/// Fields every email payload must carry.
const REQUIRED_EMAIL_FIELDS: [&str; 4] = ["from", "name", "subject", "Email_Content"];

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub invoker: Arc<FallbackInvoker>,
    pub cache: Arc<ResponseCache>,
    pub leads: Arc<LeadStore>,
    pub sender_log: Arc<SenderLog>,
    pub notifications: Arc<NotificationCenter>,
    pub processor: Arc<EmailProcessor>,
}

/// Build the full router with CORS and request tracing.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/email/reply", post(email_reply))
        .route("/api/email/extract-sender", post(extract_sender))
        .route("/api/email/process", post(process_email))
        .route("/api/email/process-simple", post(process_simple))
        .route("/api/batch/process", post(batch_process))
        .route("/api/models", get(models))
        .route("/api/providers/health", get(providers_health))
        .route("/api/crm/leads", get(crm_leads))
        .route("/api/crm/history", get(crm_history))
        .route("/api/crm/promote", post(crm_promote))
        .route("/api/outbox", get(outbox))
        .route("/api/logs/senders", get(sender_logs))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache", delete(clear_cache))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"success": false, "error": message.into()}))).into_response()
}

fn bad_json(rejection: JsonRejection) -> Response {
    error_response(StatusCode::BAD_REQUEST, rejection.body_text())
}

// ── Health / models ─────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let info = state.invoker.registry().info();
    Json(json!({
        "status": "healthy",
        "service": "lead-responder",
        "models": info.available_models,
        "model_count": info.model_count,
    }))
}

async fn models(State(state): State<AppState>) -> impl IntoResponse {
    let info = state.invoker.registry().info();
    Json(json!({
        "success": true,
        "models": info.available_models,
        "model_count": info.model_count,
        "model_order": info.model_order,
    }))
}

async fn providers_health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.invoker.health().await;
    Json(json!({"success": true, "providers": report}))
}

// ── Generation ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GenerateBody {
    prompt: String,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    preferred_model: Option<String>,
    #[serde(default = "default_true")]
    use_cache: bool,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// POST /api/generate
///
/// Successful results are cached unless `use_cache` is false or sampling
/// overrides are given.
async fn generate(State(state): State<AppState>, body: Result<Json<GenerateBody>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };

    let cacheable = body.use_cache && body.temperature.is_none() && body.max_tokens.is_none();
    let key = CompletionKey::new("generate", body.prompt.clone())
        .provider(body.preferred_model.clone())
        .system_prompt(body.system_prompt.clone());

    if cacheable && let Some(mut cached) = state.cache.get(&key).await {
        cached["cached"] = json!(true);
        return Json(cached).into_response();
    }

    let mut request = GenerateRequest::new(body.prompt).prefer(body.preferred_model);
    if let Some(system) = body.system_prompt {
        request = request.with_system(system);
    }
    if let Some(t) = body.temperature {
        request = request.with_temperature(t);
    }
    if let Some(n) = body.max_tokens {
        request = request.with_max_tokens(n);
    }

    let generation = state.invoker.generate(request).await;
    let mut value = serde_json::to_value(&generation).unwrap_or_default();
    if cacheable && generation.success {
        state.cache.set(key, value.clone(), None).await;
    }
    value["cached"] = json!(false);
    Json(value).into_response()
}

#[derive(Deserialize)]
struct ReplyBody {
    sender_name: String,
    email_content: String,
    #[serde(default)]
    preferred_model: Option<String>,
}

/// POST /api/email/reply
async fn email_reply(State(state): State<AppState>, body: Result<Json<ReplyBody>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    let reply = state
        .processor
        .replies()
        .quick_reply(&body.sender_name, &body.email_content, body.preferred_model)
        .await;
    Json(json!({
        "success": true,
        "sender_name": body.sender_name,
        "reply": reply,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct ContentBody {
    email_content: String,
    #[serde(default)]
    preferred_model: Option<String>,
}

/// POST /api/email/extract-sender
async fn extract_sender(State(state): State<AppState>, body: Result<Json<ContentBody>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    let sender_name = extract_sender_name(&state.invoker, &body.email_content, body.preferred_model).await;
    Json(json!({"success": true, "sender_name": sender_name})).into_response()
}

/// POST /api/email/process-simple
///
/// Sender name plus a plain reply; no CRM or delivery.
async fn process_simple(State(state): State<AppState>, body: Result<Json<ContentBody>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };

    let sender_name =
        extract_sender_name(&state.invoker, &body.email_content, body.preferred_model.clone()).await;
    let reply = state
        .processor
        .replies()
        .quick_reply(
            sender_name.as_deref().unwrap_or("there"),
            &body.email_content,
            body.preferred_model,
        )
        .await;

    if let Err(e) = state
        .sender_log
        .record(sender_name.as_deref().unwrap_or("Unknown"), &body.email_content, &reply)
        .await
    {
        warn!(error = %e, "Failed to append sender log");
    }

    Json(json!({
        "success": true,
        "sender_name": sender_name,
        "reply": reply,
    }))
    .into_response()
}

// ── Full pipeline ───────────────────────────────────────────────────────

/// Validate an `{from, name, subject, Email_Content}` object.
fn parse_email_object(email: &Value) -> Result<EmailPayload, String> {
    let Some(object) = email.as_object() else {
        return Err("'email' must be an object".to_string());
    };
    if let Some(missing) = REQUIRED_EMAIL_FIELDS.iter().find(|f| !object.contains_key(**f)) {
        return Err(format!("Missing required field: {missing}"));
    }
    serde_json::from_value(email.clone()).map_err(|e| format!("Invalid email payload: {e}"))
}

/// POST /api/email/process
async fn process_email(State(state): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    let Some(email) = body.get("email") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'email' field in payload");
    };
    let payload = match parse_email_object(email) {
        Ok(payload) => payload,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let processed = state.processor.respond(&payload).await;
    let status = if processed.degraded { "degraded" } else { "processed" };

    let mut value = serde_json::to_value(&processed).unwrap_or_default();
    value["success"] = json!(true);
    value["status"] = json!(status);
    value["to"] = json!(payload.from);
    value["processed_at"] = json!(Utc::now());
    Json(value).into_response()
}

#[derive(Deserialize)]
struct BatchBody {
    emails: Vec<Value>,
}

/// POST /api/batch/process
///
/// Malformed items are reported at their index without stopping the rest.
async fn batch_process(State(state): State<AppState>, body: Result<Json<BatchBody>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };

    let total = body.emails.len();
    let mut results: Vec<Value> = vec![Value::Null; total];
    let mut valid = Vec::new();
    let mut positions = Vec::new();

    for (index, email) in body.emails.iter().enumerate() {
        match parse_email_object(email) {
            Ok(payload) => {
                positions.push(index);
                valid.push(payload);
            }
            Err(message) => {
                results[index] = json!({"index": index, "success": false, "error": message});
            }
        }
    }

    for (item, index) in state.processor.process_batch(valid).await.into_iter().zip(positions) {
        let mut value = serde_json::to_value(&item).unwrap_or_default();
        value["index"] = json!(index);
        results[index] = value;
    }

    let successful = results
        .iter()
        .filter(|r| r.get("success").and_then(Value::as_bool).unwrap_or(false))
        .count();
    info!(total, successful, "Batch processed");

    Json(json!({
        "success": true,
        "results": results,
        "total_processed": total,
        "successful": successful,
    }))
    .into_response()
}

// ── CRM ─────────────────────────────────────────────────────────────────

async fn crm_leads(State(state): State<AppState>) -> impl IntoResponse {
    let leads = state.leads.all_leads().await;
    let stats = state.leads.stats().await;
    Json(json!({
        "success": true,
        "leads": leads,
        "total_count": stats.total_leads,
        "new_leads": stats.new_leads,
        "existing_leads": stats.existing_leads,
    }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    email: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn crm_history(State(state): State<AppState>, query: Result<Query<HistoryQuery>, QueryRejection>) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let history = state
        .leads
        .lead_history(&query.email, query.limit.unwrap_or(HISTORY_LIMIT))
        .await;
    Json(json!({
        "success": true,
        "email": query.email,
        "history": history,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct PromoteBody {
    email: String,
}

async fn crm_promote(State(state): State<AppState>, body: Result<Json<PromoteBody>, JsonRejection>) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_json(rejection),
    };
    match state.leads.promote_lead(&body.email).await {
        Ok(lead) => Json(json!({"success": true, "lead": lead})).into_response(),
        Err(StoreError::LeadNotFound(email)) => {
            error_response(StatusCode::NOT_FOUND, format!("No new lead with address {email}"))
        }
        Err(e) => {
            state.notifications.notify_error("promote_lead", &e.to_string()).await;
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn outbox(State(state): State<AppState>) -> impl IntoResponse {
    let entries = state.leads.outbox().await;
    Json(json!({"success": true, "count": entries.len(), "outbox": entries}))
}

async fn sender_logs(State(state): State<AppState>) -> impl IntoResponse {
    let records = state.sender_log.processed_emails().await;
    Json(json!({"success": true, "count": records.len(), "records": records}))
}

// ── Notifications ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NotificationQuery {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    unread_only: bool,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_notifications(
    State(state): State<AppState>,
    query: Result<Query<NotificationQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let kind = match query.kind.as_deref().map(str::parse::<NotificationKind>) {
        None => None,
        Some(Ok(kind)) => Some(kind),
        Some(Err(message)) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    let items = state
        .notifications
        .list(kind, query.unread_only, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await;
    let unread_count = state.notifications.unread_count().await;
    Json(json!({
        "success": true,
        "notifications": items,
        "unread_count": unread_count,
    }))
    .into_response()
}

async fn mark_notification_read(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid notification ID");
    };
    if state.notifications.mark_read(id).await {
        Json(json!({"success": true})).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Notification not found")
    }
}

// ── Cache ───────────────────────────────────────────────────────────────

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"success": true, "stats": state.cache.stats().await}))
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.cache.len().await;
    state.cache.clear().await;
    info!(cleared, "Response cache cleared");
    Json(json!({"success": true, "cleared": cleared}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::DryRunMailer;
    use crate::config::{CompanyProfile, NotificationConfig};
    use crate::llm::testing::{ScriptedLlm, registry_of};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(provider: Arc<ScriptedLlm>) -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let invoker = Arc::new(FallbackInvoker::new(
            Arc::new(registry_of(vec![("openai", provider)])),
            Duration::from_secs(5),
        ));
        let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(60)));
        let leads = Arc::new(LeadStore::open(dir.path()).await.unwrap());
        let sender_log = Arc::new(SenderLog::new(dir.path()));
        let notifications = NotificationCenter::new(&NotificationConfig::default());
        let processor = Arc::new(EmailProcessor::new(
            Arc::clone(&invoker),
            Arc::clone(&cache),
            Arc::clone(&leads),
            Arc::clone(&sender_log),
            Arc::new(DryRunMailer),
            Arc::clone(&notifications),
            CompanyProfile::default(),
        ));
        let state = AppState {
            invoker,
            cache,
            leads,
            sender_log,
            notifications,
            processor,
        };
        (dir, api_routes(state))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_lists_models() {
        let (_dir, app) = app(ScriptedLlm::ok("gpt", "hi")).await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_count"], 1);
    }

    #[tokio::test]
    async fn process_rejects_missing_field() {
        let (_dir, app) = app(ScriptedLlm::ok("gpt", "hi")).await;
        let payload = json!({"email": {"from": "a@example.com", "name": "A", "subject": "S"}});
        let (status, body) = call(&app, "POST", "/api/email/process", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Missing required field: Email_Content");

        let (status, _) = call(&app, "POST", "/api/email/process", Some(json!({"nope": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generate_caches_successes() {
        let provider = ScriptedLlm::ok("gpt", "hello there");
        let (_dir, app) = app(provider.clone()).await;

        let (_, first) = call(&app, "POST", "/api/generate", Some(json!({"prompt": "hi"}))).await;
        let (_, second) = call(&app, "POST", "/api/generate", Some(json!({"prompt": "hi"}))).await;

        assert_eq!(first["response"], "hello there");
        assert_eq!(first["cached"], false);
        assert_eq!(second["cached"], true);
        assert_eq!(provider.calls(), 1);

        let (_, stats) = call(&app, "GET", "/api/cache/stats", None).await;
        assert_eq!(stats["stats"]["total_entries"], 1);
        let (_, cleared) = call(&app, "DELETE", "/api/cache", None).await;
        assert_eq!(cleared["cleared"], 1);
    }

    #[tokio::test]
    async fn promote_unknown_lead_is_404() {
        let (_dir, app) = app(ScriptedLlm::ok("gpt", "hi")).await;
        let (status, _) = call(&app, "POST", "/api/crm/promote", Some(json!({"email": "x@example.com"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn notification_read_flow() {
        let (_dir, app) = app(ScriptedLlm::failing("gpt")).await;
        let payload = json!({"email": {
            "from": "ann@example.com", "name": "Ann", "subject": "Hi", "Email_Content": "hello"
        }});
        let (status, processed) = call(&app, "POST", "/api/email/process", Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(processed["is_new_lead"], true);

        let (_, list) = call(&app, "GET", "/api/notifications?type=new_lead", None).await;
        assert_eq!(list["unread_count"], 1);
        let id = list["notifications"][0]["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "POST", &format!("/api/notifications/{id}/read"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, list) = call(&app, "GET", "/api/notifications?unread_only=true", None).await;
        assert_eq!(list["unread_count"], 0);

        let (status, _) = call(&app, "POST", "/api/notifications/not-a-uuid/read", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_notification_query_is_json_error() {
        let (_dir, app) = app(ScriptedLlm::ok("gpt", "hi")).await;
        let (status, body) = call(&app, "GET", "/api/notifications?unread_only=foo", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }
}
