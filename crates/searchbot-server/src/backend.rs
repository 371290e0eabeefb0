use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use searchbot_config::Backend;
use searchbot_contracts::{Platform, UserId};
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AuthGate;

/// Classified failure of a backend call. Every call yields exactly one
/// `Outcome`; nothing is retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("authentication failed")]
    AuthFailed,
    #[error("endpoint not found")]
    NotFound,
    #[error("request timed out")]
    Timeout,
    #[error("request failed with status {status}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
}

impl BackendError {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::AuthFailed => "auth_failed",
            BackendError::NotFound => "not_found",
            BackendError::Timeout => "timeout",
            BackendError::Http { .. } => "http_error",
            BackendError::Transport(_) => "transport_error",
        }
    }
}

pub type Outcome = Result<Value, BackendError>;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: Option<u32>,
    pub source_filters: Vec<String>,
    pub include_citations: Option<bool>,
}

pub struct BackendClient {
    http: Client,
    base_url: String,
    api_key: String,
    token_ttl_minutes: i64,
    default_top_k: u32,
    auth: Arc<AuthGate>,
}

impl BackendClient {
    pub fn new(cfg: &Backend, default_top_k: u32, auth: Arc<AuthGate>) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| format!("failed to build backend http client: {e}"))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            token_ttl_minutes: cfg.token_ttl_minutes,
            default_top_k,
            auth,
        })
    }

    pub async fn call(
        &self,
        method: Method,
        path: &str,
        acting_user: UserId,
        body: Option<&Value>,
        query: &[(&str, String)],
        attachment: Option<Attachment>,
    ) -> Outcome {
        let token = self
            .auth
            .issue_token(acting_user, self.token_ttl_minutes)
            .map_err(|e| BackendError::Transport(format!("token issue failed: {e}")))?;

        let mut req = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("X-Bot-User-ID", acting_user.to_string())
            .header("X-API-Key", &self.api_key);
        if !query.is_empty() {
            req = req.query(query);
        }
        req = match (attachment, body) {
            (Some(file), body) => req.multipart(multipart_form(file, body)?),
            (None, Some(body)) => req.json(body),
            (None, None) => req,
        };

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) if err.is_timeout() => {
                tracing::error!(%method, path, user_id = acting_user, "backend request timed out");
                return Err(BackendError::Timeout);
            }
            Err(err) => {
                tracing::error!(%method, path, user_id = acting_user, error = %err, "backend request failed");
                return Err(BackendError::Transport(err.to_string()));
            }
        };

        let status = resp.status();
        tracing::info!(%method, path, user_id = acting_user, status = status.as_u16(), "backend request");
        let text = match resp.text().await {
            Ok(text) => text,
            Err(err) if err.is_timeout() => return Err(BackendError::Timeout),
            Err(err) => return Err(BackendError::Transport(err.to_string())),
        };

        match status {
            StatusCode::OK if text.trim().is_empty() => Ok(json!({})),
            StatusCode::OK => serde_json::from_str(&text).map_err(|e| {
                tracing::error!(path, error = %e, "backend returned malformed JSON");
                BackendError::Transport(format!("malformed response body: {e}"))
            }),
            StatusCode::UNAUTHORIZED => {
                tracing::warn!(path, user_id = acting_user, "backend authentication failed");
                Err(BackendError::AuthFailed)
            }
            StatusCode::NOT_FOUND => {
                tracing::warn!(path, "backend endpoint not found");
                Err(BackendError::NotFound)
            }
            other => {
                tracing::error!(path, status = other.as_u16(), body = %text, "backend request rejected");
                Err(BackendError::Http {
                    status: other.as_u16(),
                    body: text,
                })
            }
        }
    }

    pub async fn connect_platform(&self, user_id: UserId, platform: Platform, params: Value) -> Outcome {
        let body = json!({
            "user_id": user_id,
            "platform": platform.as_str(),
            "params": non_null_object(params),
        });
        self.call(Method::POST, "/api/connect", user_id, Some(&body), &[], None)
            .await
    }

    pub async fn get_sources(&self, user_id: UserId) -> Outcome {
        self.call(Method::GET, "/api/sources", user_id, None, &[], None)
            .await
    }

    pub async fn fetch_documents(
        &self,
        user_id: UserId,
        source_id: &str,
        filters: &[(&str, String)],
    ) -> Outcome {
        let mut query = vec![
            ("source_id", source_id.to_string()),
            ("user_id", user_id.to_string()),
        ];
        query.extend(filters.iter().cloned());
        self.call(Method::GET, "/api/fetch", user_id, None, &query, None)
            .await
    }

    pub async fn upload_file(&self, user_id: UserId, file: Attachment, metadata: Value) -> Outcome {
        let body = json!({
            "user_id": user_id,
            "metadata": non_null_object(metadata),
        });
        self.call(Method::POST, "/api/upload", user_id, Some(&body), &[], Some(file))
            .await
    }

    pub async fn process_document(
        &self,
        user_id: UserId,
        document_id: &str,
        operations: Option<Vec<String>>,
    ) -> Outcome {
        let operations = operations.unwrap_or_else(|| {
            ["extract", "index", "vectorize"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        });
        let body = json!({ "document_id": document_id, "operations": operations });
        self.call(Method::POST, "/api/process-document", user_id, Some(&body), &[], None)
            .await
    }

    /// An empty id list asks the backend to process everything pending.
    pub async fn process_documents(&self, user_id: UserId, document_ids: Vec<String>) -> Outcome {
        let body = json!({ "user_id": user_id, "document_ids": document_ids });
        self.call(Method::POST, "/api/process-documents", user_id, Some(&body), &[], None)
            .await
    }

    pub async fn sync_source(&self, user_id: UserId, source_id: &str, mode: &str) -> Outcome {
        let body = json!({ "source_id": source_id, "mode": mode });
        self.call(Method::POST, "/api/sync", user_id, Some(&body), &[], None)
            .await
    }

    pub async fn fetch_from_source(&self, user_id: UserId, source_name: &str, sync_mode: &str) -> Outcome {
        let body = json!({
            "source_name": source_name,
            "sync_mode": sync_mode,
            "user_id": user_id,
        });
        self.call(Method::POST, "/api/fetch-source", user_id, Some(&body), &[], None)
            .await
    }

    pub async fn search(&self, user_id: UserId, query: &str, opts: SearchOptions) -> Outcome {
        let body = json!({
            "user_id": user_id,
            "query": query,
            "top_k": opts.top_k.unwrap_or(self.default_top_k),
            "source_filters": opts.source_filters,
            "include_citations": opts.include_citations.unwrap_or(true),
        });
        self.call(Method::POST, "/api/search", user_id, Some(&body), &[], None)
            .await
    }

    pub async fn get_job_status(&self, user_id: UserId, job_id: &str) -> Outcome {
        self.call(
            Method::GET,
            "/api/job-status",
            user_id,
            None,
            &[("job_id", job_id.to_string())],
            None,
        )
        .await
    }

    /// Acts as the smallest configured admin id, or 0 when there is none.
    pub async fn get_system_status(&self) -> Outcome {
        let acting = self.auth.first_admin().unwrap_or(0);
        self.call(Method::GET, "/api/system-status", acting, None, &[], None)
            .await
    }

    pub async fn get_user_status(&self, user_id: UserId) -> Outcome {
        self.call(Method::GET, "/api/user-status", user_id, None, &[], None)
            .await
    }
}

fn non_null_object(value: Value) -> Value {
    if value.is_null() {
        json!({})
    } else {
        value
    }
}

fn multipart_form(file: Attachment, body: Option<&Value>) -> Result<Form, BackendError> {
    let mut part = Part::bytes(file.bytes).file_name(file.file_name);
    if let Some(mime) = file.mime_type.as_deref() {
        part = part
            .mime_str(mime)
            .map_err(|e| BackendError::Transport(format!("invalid mime type: {e}")))?;
    }
    let mut form = Form::new().part("file", part);
    if let Some(Value::Object(fields)) = body {
        for (name, value) in fields {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            form = form.text(name.clone(), text);
        }
    }
    Ok(form)
}
