mod common;

use std::sync::Arc;

use common::{
    button, command, file, sized_file, test_config, text, MockBackend, RecordingTransport, ADMIN,
    MEMBER, STRANGER,
};
use searchbot_contracts::{ButtonTarget, JobCallback, JobKind};
use searchbot_kernel::messages;
use searchbot_kernel::{Flow, ManualClock};
use searchbot_server::auth::AuthGate;
use searchbot_server::backend::{BackendClient, BackendError, SearchOptions};
use searchbot_server::{Bot, DropReason, Resolution};
use serde_json::json;

async fn setup() -> (Bot, Arc<RecordingTransport>, MockBackend, String) {
    let (mock, url) = MockBackend::start().await;
    let cfg = test_config(&url);
    let audit_path = cfg.audit.jsonl_path.clone();
    let transport = Arc::new(RecordingTransport::default());
    let bot = Bot::new(&cfg, transport.clone(), Arc::new(ManualClock::default()))
        .await
        .unwrap();
    (bot, transport, mock, audit_path)
}

fn callback(job_id: &str, status: &str) -> JobCallback {
    JobCallback {
        job_id: job_id.to_string(),
        status: status.to_string(),
        result: Some(json!({"documents": 1})),
        error: None,
    }
}

#[tokio::test]
async fn search_sends_credentials_and_records_job() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(text(MEMBER, "quarterly revenue")).await;

    let calls = mock.calls_to("/api/search");
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.bot_user.as_deref(), Some("1001"));
    assert_eq!(call.api_key.as_deref(), Some("test-api-key"));
    assert!(call
        .authorization
        .as_deref()
        .is_some_and(|v| v.starts_with("Bearer ")));
    assert_eq!(call.json()["query"], "quarterly revenue");
    assert_eq!(call.json()["top_k"], 10);

    let reply = transport.last();
    assert_eq!(reply.chat_id, MEMBER * 10);
    assert!(reply.text.contains("Revenue grew 12% in Q3."), "{}", reply.text);
    assert_eq!(
        reply.keyboard.unwrap().payloads(),
        vec!["refine_search".to_string(), "related_search".to_string()]
    );

    let record = bot.jobs().lookup("job-search-1").await.unwrap();
    assert_eq!(record.user_id, MEMBER);
    assert_eq!(record.chat_id, MEMBER * 10);
    assert_eq!(record.kind, JobKind::Search);

    let state = bot.conversations().get_state(MEMBER).await;
    assert_eq!(state.get("last_query"), Some(&json!("quarterly revenue")));
}

#[tokio::test]
async fn backend_statuses_are_classified() {
    let (mock, url) = MockBackend::start().await;
    let cfg = test_config(&url);
    let auth = Arc::new(AuthGate::new(
        &cfg.auth,
        &cfg.backend.jwt_secret,
        Arc::new(ManualClock::default()),
    ));
    let client = BackendClient::new(&cfg.backend, 10, auth).unwrap();
    let opts = SearchOptions::default;

    assert!(matches!(
        client.search(MEMBER, "trigger-401", opts()).await,
        Err(BackendError::AuthFailed)
    ));
    assert!(matches!(
        client.search(MEMBER, "trigger-404", opts()).await,
        Err(BackendError::NotFound)
    ));
    assert!(matches!(
        client.search(MEMBER, "trigger-503", opts()).await,
        Err(BackendError::Http { status: 503, ref body }) if body == "maintenance"
    ));
    assert!(matches!(
        client.search(MEMBER, "trigger-slow", opts()).await,
        Err(BackendError::Timeout)
    ));
    assert!(client.search(MEMBER, "plain query", opts()).await.is_ok());
    assert!(matches!(
        client.get_sources(MEMBER).await,
        Ok(v) if v["sources"].as_array().map(Vec::len) == Some(2)
    ));
    assert_eq!(mock.total_calls(), 6);
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_failure() {
    let cfg = test_config("http://127.0.0.1:1");
    let auth = Arc::new(AuthGate::new(
        &cfg.auth,
        &cfg.backend.jwt_secret,
        Arc::new(ManualClock::default()),
    ));
    let client = BackendClient::new(&cfg.backend, 10, auth).unwrap();
    let err = client
        .search(MEMBER, "quarterly revenue", SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)), "{err:?}");

    let transport = Arc::new(RecordingTransport::default());
    let bot = Bot::new(&cfg, transport.clone(), Arc::new(ManualClock::default()))
        .await
        .unwrap();
    bot.handle(text(MEMBER, "quarterly revenue")).await;
    assert_eq!(
        transport.last().text,
        messages::backend_failure("run the search", "the backend could not be reached")
    );
    assert_eq!(bot.stats().snapshot().searches, 0);
}

#[tokio::test]
async fn backend_failures_reach_the_user_with_a_reason() {
    let (bot, transport, _, _) = setup().await;
    let cases = [
        ("trigger-401", "rejected the bot's credentials"),
        ("trigger-404", "not found"),
        ("trigger-503", "status 503"),
        ("trigger-slow", "in time"),
    ];
    for (query, reason) in cases {
        bot.handle(text(MEMBER, query)).await;
        let reply = transport.last().text;
        assert!(reply.starts_with("Could not run the search"), "{reply}");
        assert!(reply.contains(reason), "{reply}");
    }
    assert!(bot.jobs().lookup("job-search-1").await.is_none());
}

#[tokio::test]
async fn job_completion_reaches_only_its_owner_once() {
    let (bot, transport, _, _) = setup().await;
    bot.handle(text(MEMBER, "quarterly revenue")).await;
    let before = transport.count();

    assert_eq!(
        bot.jobs().resolve(&callback("job-search-1", "completed")).await,
        Resolution::Delivered
    );
    let note = transport.last();
    assert_eq!(note.chat_id, MEMBER * 10);
    assert!(note.text.contains("Job completed"));
    assert!(note.text.contains("job-search-1"));

    assert_eq!(
        bot.jobs().resolve(&callback("job-search-1", "completed")).await,
        Resolution::Dropped(DropReason::UnknownJob)
    );
    assert_eq!(
        bot.jobs().resolve(&callback("job-from-before-restart", "completed")).await,
        Resolution::Dropped(DropReason::UnknownJob)
    );
    assert_eq!(transport.count(), before + 1);
    assert_eq!(bot.stats().snapshot().jobs_dropped, 2);
}

#[tokio::test]
async fn upload_flow_reminds_on_text_and_rejects_oversized_files() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(command(MEMBER, "upload", &[])).await;
    assert_eq!(bot.conversations().get_flow(MEMBER).await, Some(Flow::UploadFile));

    bot.handle(text(MEMBER, "here it comes")).await;
    assert_eq!(transport.last().text, messages::UPLOAD_REMINDER);
    assert!(mock.calls_to("/api/search").is_empty());

    bot.handle(file(MEMBER, "huge.pdf", 60 * 1024 * 1024)).await;
    let reply = transport.last().text;
    assert!(reply.contains("Maximum allowed size is 50 MB"), "{reply}");
    assert!(mock.calls_to("/api/upload").is_empty());
    assert!(transport.downloads.lock().is_empty());
    assert_eq!(bot.conversations().get_flow(MEMBER).await, Some(Flow::UploadFile));

    bot.handle(file(MEMBER, "notes.exe", 1024)).await;
    assert!(transport.last().text.contains("Unsupported file type .exe"));
    assert!(mock.calls_to("/api/upload").is_empty());
}

#[tokio::test]
async fn upload_without_reported_size_is_checked_after_download() {
    let (mock, url) = MockBackend::start().await;
    let mut cfg = test_config(&url);
    cfg.limits.max_file_size_mb = 1;
    let transport = Arc::new(RecordingTransport::default());
    *transport.file_bytes.lock() = Some(vec![0u8; 2 * 1024 * 1024]);
    let bot = Bot::new(&cfg, transport.clone(), Arc::new(ManualClock::default()))
        .await
        .unwrap();

    bot.handle(command(MEMBER, "upload", &[])).await;
    bot.handle(sized_file(MEMBER, "scan.pdf", None)).await;
    let reply = transport.last().text;
    assert!(reply.contains("Maximum allowed size is 1 MB"), "{reply}");
    assert_eq!(transport.downloads.lock().len(), 1);
    assert!(mock.calls_to("/api/upload").is_empty());
    assert_eq!(bot.conversations().get_flow(MEMBER).await, Some(Flow::UploadFile));

    *transport.file_bytes.lock() = None;
    bot.handle(sized_file(MEMBER, "scan.pdf", None)).await;
    assert_eq!(mock.calls_to("/api/upload").len(), 1);
    assert_eq!(bot.conversations().get_flow(MEMBER).await, None);
}

#[tokio::test]
async fn accepted_upload_clears_flow_and_tracks_job() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(file(MEMBER, "report.pdf", 2048)).await;
    assert_eq!(transport.last().text, messages::UPLOAD_FIRST);

    bot.handle(button(MEMBER, "upload_file")).await;
    bot.handle(file(MEMBER, "report.pdf", 2048)).await;

    assert_eq!(mock.calls_to("/api/upload").len(), 1);
    assert_eq!(transport.downloads.lock().as_slice(), ["file-report.pdf".to_string()]);
    assert_eq!(bot.conversations().get_flow(MEMBER).await, None);

    let state = bot.conversations().get_state(MEMBER).await;
    assert_eq!(state.get("last_upload_job"), Some(&json!("job-upload-1")));
    assert_eq!(state.get("last_upload_file"), Some(&json!("report.pdf")));
    assert_eq!(state.get("last_upload_document_id"), Some(&json!("doc-77")));

    let reply = transport.last();
    assert!(reply.text.contains("job-upload-1"));
    assert_eq!(
        reply.keyboard.unwrap().payloads(),
        vec!["check_job:job-upload-1".to_string()]
    );
    assert_eq!(
        bot.jobs().lookup("job-upload-1").await.unwrap().kind,
        JobKind::Upload
    );
    assert_eq!(bot.stats().snapshot().uploads, 1);
}

#[tokio::test]
async fn strangers_get_one_rejection_and_nothing_else() {
    let (bot, transport, mock, audit_path) = setup().await;
    let events = [
        command(STRANGER, "search", &["secret", "plans"]),
        text(STRANGER, "quarterly revenue"),
        button(STRANGER, "connect_platform:slack"),
        file(STRANGER, "report.pdf", 10),
    ];
    for (i, event) in events.into_iter().enumerate() {
        bot.handle(event).await;
        assert_eq!(transport.count(), i + 1);
        assert_eq!(transport.last().text, messages::not_authorized(STRANGER));
    }

    assert_eq!(mock.total_calls(), 0);
    assert!(transport.downloads.lock().is_empty());
    assert!(bot.conversations().get_state(STRANGER).await.is_empty());
    assert_eq!(bot.stats().snapshot().rejections, 4);
    assert_eq!(bot.stats().snapshot().searches, 0);

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    let lines: Vec<&str> = audit.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[2].contains("button:connect_platform"));
    searchbot_server::verify_audit_chain(&audit_path).unwrap();
}

#[tokio::test]
async fn admin_commands_are_gated_and_audited() {
    let (bot, transport, _, audit_path) = setup().await;

    bot.handle(command(MEMBER, "admin", &["add_user", "555"])).await;
    assert_eq!(transport.last().text, messages::ADMIN_REQUIRED);
    assert!(!bot.auth().is_allowed(555));

    bot.handle(command(ADMIN, "admin", &["add_user", "555"])).await;
    assert!(bot.auth().is_allowed(555));
    assert_eq!(transport.last().text, "User 555 added.");

    bot.handle(command(ADMIN, "admin", &["remove_user", "1"])).await;
    assert!(bot.auth().is_allowed(ADMIN));
    assert!(transport.last().text.contains("cannot be removed"));

    bot.handle(command(ADMIN, "admin", &["add_user"])).await;
    assert!(transport.last().text.contains(messages::ADMIN_HELP));

    bot.handle(command(ADMIN, "admin", &["stats"])).await;
    assert!(transport.last().text.contains("Authorized users"));

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    assert!(audit.contains("\"reason_code\":\"not_admin\""));
    assert!(audit.contains("\"target_user_id\":555"));
}

#[tokio::test]
async fn refine_then_related_search_reuse_last_query() {
    let (bot, transport, mock, _) = setup().await;

    bot.handle(button(MEMBER, "related_search")).await;
    assert!(transport.last().text.starts_with(messages::NO_PREVIOUS_QUERY));
    assert!(mock.calls_to("/api/search").is_empty());

    bot.handle(button(MEMBER, "refine_search")).await;
    assert_eq!(bot.conversations().get_flow(MEMBER).await, Some(Flow::RefineSearch));
    bot.handle(text(MEMBER, "revenue by region")).await;
    assert_eq!(bot.conversations().get_flow(MEMBER).await, None);

    bot.handle(button(MEMBER, "related_search")).await;
    let searches = mock.calls_to("/api/search");
    assert_eq!(searches.len(), 2);
    assert_eq!(searches[0].json()["top_k"], 15);
    assert_eq!(searches[1].json()["query"], "related to revenue by region");
}

#[tokio::test]
async fn short_queries_and_greetings_stay_local() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(text(MEMBER, "hi")).await;
    assert_eq!(transport.last().text, messages::query_too_short(3));
    bot.handle(text(MEMBER, "thanks")).await;
    assert_eq!(transport.last().text, messages::GREETING_REPLY);
    bot.handle(command(MEMBER, "search", &[])).await;
    assert_eq!(transport.last().text, messages::SEARCH_USAGE);
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn connect_flow_offers_oauth_and_completes() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(command(MEMBER, "connect", &[])).await;
    assert_eq!(
        bot.conversations().get_flow(MEMBER).await,
        Some(Flow::ConnectPlatform)
    );

    bot.handle(button(MEMBER, "connect_platform:slack")).await;
    assert_eq!(mock.calls_to("/api/connect")[0].json()["platform"], "slack");
    assert_eq!(bot.conversations().get_flow(MEMBER).await, Some(Flow::Connecting));
    assert_eq!(
        bot.conversations().get_flow_data(MEMBER).await.get("platform"),
        Some(&json!("slack"))
    );
    let keyboard = transport.last().keyboard.unwrap();
    assert_eq!(
        keyboard.rows[0][0].target,
        ButtonTarget::Url {
            url: "https://auth.example.org/authorize".to_string()
        }
    );

    bot.handle(text(MEMBER, "done?")).await;
    assert_eq!(transport.last().text, messages::CONNECT_REMINDER);

    bot.handle(button(MEMBER, "auth_complete:slack")).await;
    assert_eq!(bot.conversations().get_flow(MEMBER).await, None);
    assert!(transport.last().text.contains("Slack authorization recorded"));
}

#[tokio::test]
async fn cancel_clears_everything() {
    let (bot, transport, _, _) = setup().await;
    bot.handle(text(MEMBER, "quarterly revenue")).await;
    bot.handle(command(MEMBER, "upload", &[])).await;
    bot.handle(command(MEMBER, "cancel", &[])).await;
    assert_eq!(transport.last().text, messages::CANCELLED);
    assert!(bot.conversations().get_state(MEMBER).await.is_empty());
}

#[tokio::test]
async fn documents_are_paged() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(button(MEMBER, "fetch_docs:src-1")).await;
    let fetch = &mock.calls_to("/api/fetch")[0];
    assert!(fetch
        .query
        .as_deref()
        .is_some_and(|q| q.contains("source_id=src-1")));

    let first = transport.last().keyboard.unwrap().payloads();
    assert_eq!(first.iter().filter(|p| p.starts_with("process_doc:")).count(), 5);
    assert!(first.contains(&"fetch_page:1:src-1".to_string()));
    assert!(!first.iter().any(|p| p == "fetch_page:0:src-1"));

    bot.handle(button(MEMBER, "fetch_page:1:src-1")).await;
    let second = transport.last().keyboard.unwrap().payloads();
    assert_eq!(second.iter().filter(|p| p.starts_with("process_doc:")).count(), 2);
    assert!(second.contains(&"fetch_page:0:src-1".to_string()));
    assert!(second.contains(&"process_doc:doc-6".to_string()));
}

#[tokio::test]
async fn sync_all_only_touches_active_sources() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(button(MEMBER, "sync_all")).await;
    let syncs = mock.calls_to("/api/sync");
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].json()["source_id"], "src-1");
    assert!(transport.last().text.contains("Team Drive"));
    assert!(bot.jobs().lookup("job-sync-1").await.is_some());
}

#[tokio::test]
async fn unknown_commands_and_payloads_get_corrective_replies() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(command(MEMBER, "frobnicate", &[])).await;
    assert_eq!(transport.last().text, messages::unknown_command("frobnicate"));
    bot.handle(button(MEMBER, "self_destruct")).await;
    assert_eq!(transport.last().text, messages::UNKNOWN_ACTION);
    bot.handle(button(MEMBER, "demo_search:99")).await;
    assert_eq!(transport.last().text, messages::UNKNOWN_ACTION);
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn button_presses_are_acknowledged_before_handling() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(button(MEMBER, "fetch_sources")).await;
    bot.handle(button(MEMBER, "no_such_action")).await;
    bot.handle(button(STRANGER, "sync_all")).await;

    assert_eq!(
        transport.answered.lock().as_slice(),
        [
            "cb-1001-fetch_sources".to_string(),
            "cb-1001-no_such_action".to_string(),
            "cb-666-sync_all".to_string(),
        ]
    );
    assert_eq!(transport.last().text, messages::not_authorized(STRANGER));
    assert!(mock.calls_to("/api/sync").is_empty());

    bot.handle(text(MEMBER, "quarterly revenue")).await;
    assert_eq!(transport.answered.lock().len(), 3);
}

#[tokio::test]
async fn start_resets_any_flow() {
    let (bot, transport, mock, _) = setup().await;
    bot.handle(command(MEMBER, "upload", &[])).await;
    assert_eq!(bot.conversations().get_flow(MEMBER).await, Some(Flow::UploadFile));

    bot.handle(command(MEMBER, "start", &[])).await;
    assert!(transport.last().text.starts_with("Welcome, Ada!"));
    assert!(bot.conversations().get_state(MEMBER).await.is_empty());

    bot.handle(text(MEMBER, "quarterly revenue")).await;
    assert_eq!(mock.calls_to("/api/search").len(), 1);
    assert_ne!(transport.last().text, messages::UPLOAD_REMINDER);
}

#[tokio::test]
async fn unrecognised_flow_falls_back_to_search() {
    let (bot, _, mock, _) = setup().await;
    bot.conversations()
        .set_flow(MEMBER, &Flow::Other("wizard_v0".to_string()), None)
        .await;
    assert_eq!(
        bot.conversations().get_flow(MEMBER).await,
        Some(Flow::Other("wizard_v0".to_string()))
    );

    bot.handle(text(MEMBER, "quarterly revenue")).await;
    let calls = mock.calls_to("/api/search");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].json()["query"], "quarterly revenue");
    assert_eq!(bot.conversations().get_flow(MEMBER).await, None);
}
