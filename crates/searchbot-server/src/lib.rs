use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use searchbot_config::Config;
use searchbot_contracts::{
    AdminMutationResponse, AdminUserView, AdminUsersResponse, ErrorBody, ErrorResponse,
    JobCallback, UserId,
};
use searchbot_kernel::{Clock, SystemClock};
use serde_json::{json, Value};
use tokio::time::sleep;

pub mod audit;
pub mod auth;
pub mod backend;
pub mod bot;
pub mod conversation;
pub mod jobs;
pub mod stats;
pub mod store;
pub mod telegram;
pub mod transport;

pub use audit::verify_audit_chain;
pub use bot::Bot;
pub use jobs::{DropReason, Resolution};
pub use telegram::{parse_update, TelegramTransport};
pub use transport::{ChatTransport, TransportError};

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
const POLL_RETRY: Duration = Duration::from_secs(5);

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let telegram = Arc::new(TelegramTransport::new(&cfg.telegram)?);
    let state = AppState::new(&cfg, telegram.clone(), Arc::new(SystemClock)).await?;
    if cfg.telegram.mode == "polling" {
        tokio::spawn(poll_updates(
            state.bot.clone(),
            telegram,
            cfg.telegram.poll_timeout_secs,
        ));
    }
    tracing::info!(%addr, mode = %cfg.telegram.mode, "searchbot listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let telegram = Arc::new(TelegramTransport::new(&cfg.telegram)?);
    build_app_with(cfg, telegram, Arc::new(SystemClock)).await
}

/// Builds the router over a caller-supplied transport and clock.
pub async fn build_app_with(
    cfg: Config,
    transport: Arc<dyn ChatTransport>,
    clock: Arc<dyn Clock>,
) -> Result<Router, String> {
    let state = AppState::new(&cfg, transport, clock).await?;
    Ok(router(state))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/telegram/webhook", post(telegram_webhook))
        .route("/v1/job-callback", post(job_callback))
        .route("/admin/users", get(admin_users))
        .route(
            "/admin/users/{user_id}",
            post(admin_add_user).delete(admin_remove_user),
        )
        .route("/admin/stats", get(admin_stats))
        .with_state(state)
}

#[derive(Clone)]
struct AppState {
    bot: Arc<Bot>,
    webhook_secret: Option<String>,
}

impl AppState {
    async fn new(
        cfg: &Config,
        transport: Arc<dyn ChatTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, String> {
        Ok(Self {
            bot: Arc::new(Bot::new(cfg, transport, clock).await?),
            webhook_secret: cfg
                .telegram
                .webhook_secret
                .clone()
                .filter(|s| !s.is_empty()),
        })
    }

    /// Resolves the bearer token to an admin user id.
    fn require_admin(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token"))?;
        let claims = self.bot.auth().verify_token(token).map_err(|e| {
            tracing::warn!(error = %e, "admin token rejected");
            error(StatusCode::UNAUTHORIZED, "unauthorized", &e.to_string())
        })?;
        let user_id = claims
            .user_id()
            .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid subject"))?;
        if !self.bot.auth().is_admin(user_id) {
            tracing::warn!(user_id, "admin api call from non-admin");
            return Err(error(StatusCode::FORBIDDEN, "forbidden", "admin required"));
        }
        Ok(user_id)
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, code: &str, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }),
    )
}

async fn poll_updates(bot: Arc<Bot>, telegram: Arc<TelegramTransport>, timeout_secs: u64) {
    let mut offset: Option<i64> = None;
    loop {
        let updates = match telegram.get_updates(offset, timeout_secs).await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(error = %err, "getUpdates failed, retrying");
                sleep(POLL_RETRY).await;
                continue;
            }
        };
        for update in updates {
            if let Some(id) = update.get("update_id").and_then(Value::as_i64) {
                offset = Some(id + 1);
            }
            dispatch_update(&bot, &update);
        }
    }
}

fn dispatch_update(bot: &Arc<Bot>, update: &Value) {
    match parse_update(update) {
        Some(event) => {
            let bot = bot.clone();
            let user_id = event.user.id;
            tokio::spawn(async move {
                let handled = tokio::spawn(async move { bot.handle(event).await }).await;
                if let Err(err) = handled {
                    tracing::error!(user_id, error = %err, "update task aborted");
                }
            });
        }
        None => tracing::debug!("ignoring unsupported update"),
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if let Some(secret) = &state.webhook_secret {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(secret.as_str()) {
            tracing::warn!("webhook call with bad secret token");
            return Err(error(StatusCode::UNAUTHORIZED, "unauthorized", "bad secret token"));
        }
    }
    dispatch_update(&state.bot, &update);
    Ok(Json(json!({"status": "ok"})))
}

async fn job_callback(
    State(state): State<AppState>,
    Json(callback): Json<JobCallback>,
) -> Result<Json<Value>, ApiError> {
    if callback.job_id.trim().is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "job_id is required",
        ));
    }
    let body = match state.bot.jobs().resolve(&callback).await {
        Resolution::Delivered => json!({"status": "delivered"}),
        Resolution::Dropped(reason) => json!({"status": "dropped", "reason": reason.as_str()}),
    };
    Ok(Json(body))
}

async fn admin_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminUsersResponse>, ApiError> {
    state.require_admin(&headers)?;
    let auth = state.bot.auth();
    let admins = auth.admin_users();
    let users = auth
        .allowed_users()
        .into_iter()
        .map(|user_id| AdminUserView {
            user_id,
            is_admin: admins.contains(&user_id),
        })
        .collect();
    Ok(Json(AdminUsersResponse {
        allow_all: auth.allow_all(),
        users,
    }))
}

async fn admin_add_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
) -> Result<Json<AdminMutationResponse>, ApiError> {
    let admin_id = state.require_admin(&headers)?;
    let added = state.bot.auth().add_user(user_id);
    state
        .bot
        .audit_admin(admin_id, "admin_add_user", user_id, added)
        .await;
    let message = if added {
        format!("User {user_id} added")
    } else {
        format!("User {user_id} is already authorized")
    };
    Ok(Json(AdminMutationResponse {
        success: added,
        message,
    }))
}

async fn admin_remove_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
) -> Result<Json<AdminMutationResponse>, ApiError> {
    let admin_id = state.require_admin(&headers)?;
    let removed = state.bot.auth().remove_user(user_id);
    state
        .bot
        .audit_admin(admin_id, "admin_remove_user", user_id, removed)
        .await;
    let message = if removed {
        format!("User {user_id} removed")
    } else if state.bot.auth().is_admin(user_id) {
        format!("User {user_id} is an admin and cannot be removed")
    } else {
        format!("User {user_id} was not authorized")
    };
    Ok(Json(AdminMutationResponse {
        success: removed,
        message,
    }))
}

async fn admin_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state.require_admin(&headers)?;
    let auth = state.bot.auth();
    Ok(Json(json!({
        "authorized_users": auth.allowed_users().len(),
        "admin_users": auth.admin_users().len(),
        "allow_all": auth.allow_all(),
        "counters": state.bot.stats().snapshot(),
    })))
}
