#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use parking_lot::Mutex;
use searchbot_config::{
    Audit, Auth, Backend, Config, Jobs, Limits, Logging, Server, Session, Store, Telegram,
};
use searchbot_contracts::{ChatUser, EventKind, FileAttachment, InboundEvent, OutgoingMessage};
use searchbot_server::{ChatTransport, TransportError};
use serde_json::{json, Value};

pub const MEMBER: i64 = 1001;
pub const ADMIN: i64 = 1;
pub const STRANGER: i64 = 666;

pub fn temp_path(prefix: &str, ext: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("searchbot-{prefix}-{nanos}.{ext}"))
        .to_string_lossy()
        .to_string()
}

pub fn test_config(backend_url: &str) -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        telegram: Telegram {
            bot_token: "123:test".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            webhook_secret: Some("hook-secret".to_string()),
            mode: "webhook".to_string(),
            poll_timeout_secs: 1,
        },
        backend: Backend {
            base_url: backend_url.to_string(),
            api_key: "test-api-key".to_string(),
            jwt_secret: "test-jwt-secret".to_string(),
            timeout_ms: 300,
            token_ttl_minutes: 60,
        },
        store: Store {
            kind: "memory".to_string(),
            sqlite_path: None,
        },
        auth: Auth {
            allowed_user_ids: vec![ADMIN, MEMBER],
            admin_user_ids: vec![ADMIN],
        },
        session: Session::default(),
        limits: Limits::default(),
        jobs: Jobs::default(),
        audit: Audit {
            jsonl_path: temp_path("audit", "jsonl"),
        },
        logging: Logging::default(),
    }
}

/// Chat transport that keeps every outgoing message and acknowledgement.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub answered: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<String>>,
    /// Bytes served by `download_file`; a small PDF when unset.
    pub file_bytes: Mutex<Option<Vec<u8>>>,
}

impl RecordingTransport {
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.text.clone()).collect()
    }

    pub fn last(&self) -> OutgoingMessage {
        self.sent.lock().last().cloned().expect("no message sent")
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn answer_button(&self, callback_id: &str) -> Result<(), TransportError> {
        self.answered.lock().push(callback_id.to_string());
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        self.downloads.lock().push(file_id.to_string());
        Ok(self
            .file_bytes
            .lock()
            .clone()
            .unwrap_or_else(|| b"%PDF-1.4 test".to_vec()))
    }
}

#[derive(Debug, Clone)]
pub struct BackendCall {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub bot_user: Option<String>,
    pub api_key: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

impl BackendCall {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Scripted search backend. Search queries containing `trigger-401`,
/// `trigger-404`, `trigger-503` or `trigger-slow` produce those outcomes.
#[derive(Clone, Default)]
pub struct MockBackend {
    pub calls: Arc<Mutex<Vec<BackendCall>>>,
}

impl MockBackend {
    pub async fn start() -> (Self, String) {
        let mock = MockBackend::default();
        let app = Router::new().fallback(mock_handler).with_state(mock.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock backend serve");
        });
        (mock, format!("http://{addr}"))
    }

    pub fn calls_to(&self, path: &str) -> Vec<BackendCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

async fn mock_handler(
    State(mock): State<MockBackend>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let body = String::from_utf8_lossy(&body).to_string();
    let path = uri.path().to_string();
    mock.calls.lock().push(BackendCall {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        bot_user: header("x-bot-user-id"),
        api_key: header("x-api-key"),
        authorization: header("authorization"),
        body: body.clone(),
    });

    let ok = |value: Value| (StatusCode::OK, value.to_string());
    match path.as_str() {
        "/api/search" => {
            if body.contains("trigger-401") {
                (StatusCode::UNAUTHORIZED, "bad token".to_string())
            } else if body.contains("trigger-404") {
                (StatusCode::NOT_FOUND, "missing".to_string())
            } else if body.contains("trigger-503") {
                (StatusCode::SERVICE_UNAVAILABLE, "maintenance".to_string())
            } else if body.contains("trigger-slow") {
                tokio::time::sleep(Duration::from_secs(2)).await;
                ok(json!({}))
            } else {
                ok(json!({
                    "job_id": "job-search-1",
                    "answer": "Revenue grew 12% in Q3.",
                    "citations": [
                        {"title": "Q3 report", "snippet": "Revenue grew 12% quarter over quarter."}
                    ],
                    "total_results": 1,
                    "search_time_ms": 42
                }))
            }
        }
        "/api/upload" => ok(json!({"job_id": "job-upload-1", "document_id": "doc-77"})),
        "/api/connect" => ok(json!({
            "job_id": "job-connect-1",
            "oauth_url": "https://auth.example.org/authorize"
        })),
        "/api/sources" => ok(json!({
            "sources": [
                {"id": "src-1", "name": "Team Drive", "status": "active", "documents_count": 12},
                {"id": "src-2", "name": "Old Wiki", "status": "paused", "documents_count": 3}
            ]
        })),
        "/api/fetch" => ok(json!({
            "documents": (0..7)
                .map(|i| json!({"id": format!("doc-{i}"), "title": format!("Doc {i}")}))
                .collect::<Vec<_>>()
        })),
        "/api/sync" => ok(json!({"job_id": "job-sync-1", "items_retrieved": 4, "sync_status": "running"})),
        "/api/job-status" => ok(json!({"status": "running", "progress": 40})),
        "/api/system-status" => ok(json!({"status": "healthy", "services": {"search": "up"}})),
        "/api/user-status" => ok(json!({"sources_count": 2, "documents_count": 15})),
        "/api/process-document" | "/api/process-documents" | "/api/fetch-source" => {
            ok(json!({"job_id": "job-process-1"}))
        }
        _ => (StatusCode::NOT_FOUND, "no such endpoint".to_string()),
    }
}

pub fn user(id: i64) -> ChatUser {
    ChatUser {
        id,
        username: None,
        first_name: Some("Ada".to_string()),
    }
}

pub fn command(user_id: i64, name: &str, args: &[&str]) -> InboundEvent {
    InboundEvent {
        user: user(user_id),
        chat_id: user_id * 10,
        kind: EventKind::Command {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        },
    }
}

pub fn text(user_id: i64, text: &str) -> InboundEvent {
    InboundEvent {
        user: user(user_id),
        chat_id: user_id * 10,
        kind: EventKind::Text {
            text: text.to_string(),
        },
    }
}

pub fn button(user_id: i64, payload: &str) -> InboundEvent {
    InboundEvent {
        user: user(user_id),
        chat_id: user_id * 10,
        kind: EventKind::Button {
            payload: payload.to_string(),
            message_id: None,
            callback_id: Some(format!("cb-{user_id}-{payload}")),
        },
    }
}

pub fn file(user_id: i64, name: &str, size_bytes: u64) -> InboundEvent {
    sized_file(user_id, name, Some(size_bytes))
}

pub fn sized_file(user_id: i64, name: &str, size_bytes: Option<u64>) -> InboundEvent {
    InboundEvent {
        user: user(user_id),
        chat_id: user_id * 10,
        kind: EventKind::File {
            attachment: FileAttachment {
                file_id: format!("file-{name}"),
                file_name: Some(name.to_string()),
                size_bytes,
                mime_type: Some("application/pdf".to_string()),
                caption: None,
            },
        },
    }
}
