use std::future::Future;
use std::sync::Arc;

use searchbot_config::{Config, Limits};
use searchbot_contracts::{
    AdminCommand, ButtonAction, ChatId, Command, CommandError, EventKind, FileAttachment,
    InboundEvent, InlineButton, InlineKeyboard, JobKind, OutgoingMessage, PayloadError, Platform,
    UserId,
};
use searchbot_kernel::messages::{self, DEMO_QUERIES, RELATED_QUERIES_START};
use searchbot_kernel::upload::validate_upload;
use searchbot_kernel::{classify_query, extract_job_id, Clock, Flow, QueryCheck};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::audit::{AuditJsonl, AuditRecord};
use crate::auth::{AuthGate, Capability};
use crate::backend::{Attachment, BackendClient, BackendError, SearchOptions};
use crate::conversation::{ConversationState, State};
use crate::jobs::JobCorrelator;
use crate::stats::{Counter, UsageStats};
use crate::store::SessionStore;
use crate::transport::{ChatTransport, TransportError};

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// An inbound event after its command or button payload has been decoded.
enum Action {
    Command {
        name: String,
        parsed: Result<Command, CommandError>,
    },
    Text(String),
    Button {
        payload: String,
        action: Result<ButtonAction, PayloadError>,
        message_id: Option<i64>,
    },
    File(FileAttachment),
}

impl Action {
    fn from_event(kind: &EventKind) -> Self {
        match kind {
            EventKind::Command { name, args } => Action::Command {
                name: name.clone(),
                parsed: Command::parse(name, args),
            },
            EventKind::Text { text } => Action::Text(text.clone()),
            EventKind::Button {
                payload,
                message_id,
                ..
            } => Action::Button {
                payload: payload.clone(),
                action: ButtonAction::decode(payload),
                message_id: *message_id,
            },
            EventKind::File { attachment } => Action::File(attachment.clone()),
        }
    }

    fn capability(&self) -> Capability {
        match self {
            Action::Command {
                parsed: Ok(cmd), ..
            } if cmd.requires_admin() => Capability::Admin,
            Action::Command {
                parsed: Err(CommandError::InvalidAdmin(_)),
                ..
            } => Capability::Admin,
            _ => Capability::User,
        }
    }

    fn audit_name(&self) -> String {
        match self {
            Action::Command { name, .. } => {
                let bare = name.trim_start_matches('/');
                format!("command:{}", bare.split('@').next().unwrap_or(bare))
            }
            Action::Text(_) => "text".to_string(),
            Action::Button {
                action: Ok(action), ..
            } => format!("button:{}", action.tag()),
            Action::Button { .. } => "button:invalid".to_string(),
            Action::File(_) => "file".to_string(),
        }
    }
}

/// Dispatches chat events: guard, consult the conversation, call the
/// backend, reply.
pub struct Bot {
    auth: Arc<AuthGate>,
    conversations: Arc<ConversationState>,
    backend: Arc<BackendClient>,
    jobs: Arc<JobCorrelator>,
    transport: Arc<dyn ChatTransport>,
    audit: Arc<AuditJsonl>,
    stats: Arc<UsageStats>,
    limits: Limits,
}

impl Bot {
    pub async fn new(
        cfg: &Config,
        transport: Arc<dyn ChatTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, String> {
        let store = Arc::new(
            SessionStore::open(&cfg.store, clock.clone()).map_err(|e| e.to_string())?,
        );
        let auth = Arc::new(AuthGate::new(
            &cfg.auth,
            &cfg.backend.jwt_secret,
            clock.clone(),
        ));
        let stats = Arc::new(UsageStats::default());
        let backend = Arc::new(BackendClient::new(
            &cfg.backend,
            cfg.limits.search_results_limit,
            auth.clone(),
        )?);
        let conversations = Arc::new(ConversationState::new(
            store.clone(),
            clock.clone(),
            cfg.session.namespace.clone(),
            cfg.session.timeout_minutes,
        ));
        let jobs = Arc::new(JobCorrelator::new(
            store,
            clock.clone(),
            cfg.jobs.retention_minutes,
            transport.clone(),
            stats.clone(),
        ));
        let audit = Arc::new(AuditJsonl::new(&cfg.audit.jsonl_path, clock).await?);
        tracing::info!(
            transport = transport.name(),
            store = %cfg.store.kind,
            allow_all = auth.allow_all(),
            "bot initialised"
        );
        Ok(Self {
            auth,
            conversations,
            backend,
            jobs,
            transport,
            audit,
            stats,
            limits: cfg.limits.clone(),
        })
    }

    pub fn auth(&self) -> &Arc<AuthGate> {
        &self.auth
    }

    pub fn conversations(&self) -> &Arc<ConversationState> {
        &self.conversations
    }

    pub fn jobs(&self) -> &Arc<JobCorrelator> {
        &self.jobs
    }

    pub fn stats(&self) -> &Arc<UsageStats> {
        &self.stats
    }

    /// Handles one event end to end. Never returns an error: failures are
    /// logged and turned into a generic reply, leaving the flow untouched.
    pub async fn handle(&self, event: InboundEvent) {
        self.acknowledge(&event).await;
        let action = Action::from_event(&event.kind);
        let capability = action.capability();
        let name = action.audit_name();
        let result = self
            .guarded(&event, &name, capability, || self.dispatch(&event, action))
            .await;
        if let Err(err) = result {
            tracing::error!(user_id = event.user.id, action = %name, error = %err, "handler failed");
            if let Err(err) = self
                .transport
                .send(&OutgoingMessage::text(event.chat_id, messages::GENERIC_FAILURE))
                .await
            {
                tracing::error!(user_id = event.user.id, error = %err, "failure notice not delivered");
            }
        }
    }

    /// Answers a button press before anything else runs, including for
    /// rejected users, so the client never keeps spinning.
    async fn acknowledge(&self, event: &InboundEvent) {
        let EventKind::Button {
            callback_id: Some(callback_id),
            ..
        } = &event.kind
        else {
            return;
        };
        if let Err(err) = self.transport.answer_button(callback_id).await {
            tracing::warn!(user_id = event.user.id, error = %err, "button press not acknowledged");
        }
    }

    /// Runs `handler` only if the user holds `capability`. A rejection sends
    /// exactly one message and touches nothing else.
    async fn guarded<F, Fut>(
        &self,
        event: &InboundEvent,
        action: &str,
        capability: Capability,
        handler: F,
    ) -> Result<(), BotError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), BotError>>,
    {
        let user_id = event.user.id;
        if self.auth.check(user_id, capability) {
            return handler().await;
        }

        let (reason, text) = if self.auth.is_allowed(user_id) {
            ("not_admin", messages::ADMIN_REQUIRED.to_string())
        } else {
            ("not_allowed", messages::not_authorized(user_id))
        };
        tracing::warn!(user_id, action, capability = capability.as_str(), reason, "access rejected");
        self.stats.incr(Counter::Rejections);
        self.audit
            .append(AuditRecord::new(user_id, action, "rejected", reason))
            .await;
        self.send(event.chat_id, text, None).await
    }

    async fn dispatch(&self, event: &InboundEvent, action: Action) -> Result<(), BotError> {
        match action {
            Action::Command { name, parsed } => match parsed {
                Ok(cmd) => self.on_command(event, cmd).await,
                Err(CommandError::Unknown(_)) => {
                    tracing::debug!(user_id = event.user.id, command = %name, "unknown command");
                    self.send(event.chat_id, messages::unknown_command(name.trim_start_matches('/')), None)
                        .await
                }
                Err(CommandError::InvalidAdmin(reason)) => {
                    tracing::debug!(user_id = event.user.id, %reason, "malformed admin command");
                    self.send(
                        event.chat_id,
                        format!("{reason}\n\n{}", messages::ADMIN_HELP),
                        None,
                    )
                    .await
                }
            },
            Action::Text(text) => self.on_text(event, &text).await,
            Action::Button {
                payload,
                action,
                message_id,
            } => match action {
                Ok(action) => self.on_button(event, action, message_id).await,
                Err(err) => {
                    tracing::debug!(user_id = event.user.id, %payload, error = %err, "undecodable button payload");
                    self.send(event.chat_id, messages::UNKNOWN_ACTION, None).await
                }
            },
            Action::File(attachment) => self.on_file(event, attachment).await,
        }
    }

    async fn on_command(&self, event: &InboundEvent, cmd: Command) -> Result<(), BotError> {
        let user_id = event.user.id;
        let chat_id = event.chat_id;
        match cmd {
            Command::Start => {
                self.conversations.clear_state(user_id).await;
                self.send(
                    chat_id,
                    messages::welcome(&event.user.display_name()),
                    Some(main_menu()),
                )
                .await
            }
            Command::Help => self.show_help(event, None).await,
            Command::Connect => self.start_connect(event, None).await,
            Command::Search(query) if query.is_empty() => {
                self.send(chat_id, messages::SEARCH_USAGE, None).await
            }
            Command::Search(query) => {
                self.run_search(event, &query, self.limits.search_results_limit)
                    .await
            }
            Command::Upload => self.start_upload(event, None).await,
            Command::Sources => self.show_sources(event, None).await,
            Command::Fetch(None) => self.show_sources(event, None).await,
            Command::Fetch(Some(source_name)) => {
                let outcome = self
                    .backend
                    .fetch_from_source(user_id, &source_name, "incremental")
                    .await;
                self.report_job_outcome(event, None, outcome, JobKind::Fetch, "fetch from source")
                    .await
            }
            Command::Process(Some(document_id)) => {
                let outcome = self
                    .backend
                    .process_document(user_id, &document_id, None)
                    .await;
                self.report_job_outcome(event, None, outcome, JobKind::Process, "process document")
                    .await
            }
            Command::Process(None) => {
                let outcome = self.backend.process_documents(user_id, Vec::new()).await;
                self.report_job_outcome(event, None, outcome, JobKind::Process, "process documents")
                    .await
            }
            Command::Status(Some(job_id)) => self.show_job(event, &job_id, None).await,
            Command::Status(None) => self.show_status(event, None).await,
            Command::Cancel => self.cancel(event, None).await,
            Command::Admin(admin) => self.on_admin(event, admin).await,
        }
    }

    async fn on_admin(&self, event: &InboundEvent, cmd: AdminCommand) -> Result<(), BotError> {
        let admin_id = event.user.id;
        let text = match cmd {
            AdminCommand::Help => messages::ADMIN_HELP.to_string(),
            AdminCommand::Stats => self.stats_text(),
            AdminCommand::Users => {
                let admins = self.auth.admin_users();
                let mut text = if self.auth.allow_all() {
                    "Allow-all mode is on: every user may use the bot.\n".to_string()
                } else {
                    String::new()
                };
                text.push_str("Authorized users:");
                for id in self.auth.allowed_users() {
                    let role = if admins.contains(&id) { " (admin)" } else { "" };
                    text.push_str(&format!("\n- {id}{role}"));
                }
                text
            }
            AdminCommand::AddUser(target) => {
                let added = self.auth.add_user(target);
                self.audit_admin(admin_id, "admin_add_user", target, added).await;
                if added {
                    format!("User {target} added.")
                } else {
                    format!("User {target} is already authorized.")
                }
            }
            AdminCommand::RemoveUser(target) => {
                let removed = self.auth.remove_user(target);
                self.audit_admin(admin_id, "admin_remove_user", target, removed)
                    .await;
                if removed {
                    format!("User {target} removed.")
                } else if self.auth.is_admin(target) {
                    format!("User {target} is an admin and cannot be removed.")
                } else {
                    format!("User {target} was not authorized.")
                }
            }
        };
        self.send(event.chat_id, text, None).await
    }

    pub(crate) async fn audit_admin(&self, admin_id: UserId, action: &str, target: UserId, changed: bool) {
        let (result, reason) = if changed {
            ("ok", "changed")
        } else {
            ("noop", "unchanged")
        };
        self.audit
            .append(AuditRecord::new(admin_id, action, result, reason).targeting(target))
            .await;
    }

    fn stats_text(&self) -> String {
        let snap = self.stats.snapshot();
        messages::format_stats(&[
            ("Authorized users", self.auth.allowed_users().len().to_string()),
            ("Admins", self.auth.admin_users().len().to_string()),
            ("Allow-all mode", self.auth.allow_all().to_string()),
            ("Searches", snap.searches.to_string()),
            ("Uploads", snap.uploads.to_string()),
            ("Connections", snap.connections.to_string()),
            ("Rejections", snap.rejections.to_string()),
            ("Jobs recorded", snap.jobs_recorded.to_string()),
            ("Jobs notified", snap.jobs_notified.to_string()),
            ("Jobs dropped", snap.jobs_dropped.to_string()),
        ])
    }

    async fn on_text(&self, event: &InboundEvent, text: &str) -> Result<(), BotError> {
        let user_id = event.user.id;
        match self.conversations.get_flow(user_id).await {
            Some(Flow::RefineSearch) => {
                self.conversations.end_flow(user_id).await;
                self.run_search(event, text, self.limits.refined_search_results_limit)
                    .await
            }
            Some(Flow::UploadFile) => {
                self.send(event.chat_id, messages::UPLOAD_REMINDER, Some(cancel_menu()))
                    .await
            }
            Some(Flow::ConnectPlatform | Flow::Connecting) => {
                self.send(event.chat_id, messages::CONNECT_REMINDER, Some(cancel_menu()))
                    .await
            }
            Some(Flow::Other(name)) => {
                tracing::debug!(user_id, flow = %name, "unrecognised flow, treating text as search");
                self.conversations.end_flow(user_id).await;
                self.run_search(event, text, self.limits.search_results_limit)
                    .await
            }
            None => {
                self.run_search(event, text, self.limits.search_results_limit)
                    .await
            }
        }
    }

    async fn on_button(
        &self,
        event: &InboundEvent,
        action: ButtonAction,
        message_id: Option<i64>,
    ) -> Result<(), BotError> {
        let user_id = event.user.id;
        match action {
            ButtonAction::Connect => self.start_connect(event, message_id).await,
            ButtonAction::ConnectPlatform(platform) => {
                self.connect(event, platform, message_id).await
            }
            ButtonAction::AuthComplete(platform) => {
                self.conversations.end_flow(user_id).await;
                self.respond(
                    event.chat_id,
                    message_id,
                    messages::auth_completed(platform.display_name()),
                    Some(InlineKeyboard::new().row(vec![InlineButton::action(
                        "My sources",
                        &ButtonAction::FetchSources,
                    )])),
                )
                .await
            }
            ButtonAction::SearchDemo => {
                self.respond(
                    event.chat_id,
                    message_id,
                    messages::SEARCH_DEMO_PROMPT,
                    Some(suggestions(0..RELATED_QUERIES_START)),
                )
                .await
            }
            ButtonAction::DemoSearch(index) => match DEMO_QUERIES.get(index) {
                Some(query) => {
                    self.run_search(event, query, self.limits.search_results_limit)
                        .await
                }
                None => self.send(event.chat_id, messages::UNKNOWN_ACTION, None).await,
            },
            ButtonAction::Help => self.show_help(event, message_id).await,
            ButtonAction::Cancel => self.cancel(event, message_id).await,
            ButtonAction::FetchSources => self.show_sources(event, message_id).await,
            ButtonAction::FetchDocs { source_id } => {
                self.show_documents(event, &source_id, 0, message_id).await
            }
            ButtonAction::FetchPage { page, source_id } => {
                self.show_documents(event, &source_id, page, message_id)
                    .await
            }
            ButtonAction::ProcessDoc { document_id } => {
                let outcome = self
                    .backend
                    .process_document(user_id, &document_id, None)
                    .await;
                self.report_job_outcome(event, message_id, outcome, JobKind::Process, "process document")
                    .await
            }
            ButtonAction::CheckJob { job_id } => self.show_job(event, &job_id, message_id).await,
            ButtonAction::UploadFile => self.start_upload(event, message_id).await,
            ButtonAction::RefineSearch => {
                self.conversations
                    .set_flow(user_id, &Flow::RefineSearch, Some(State::new()))
                    .await;
                self.respond(event.chat_id, message_id, messages::REFINE_PROMPT, Some(cancel_menu()))
                    .await
            }
            ButtonAction::RelatedSearch => {
                let last_query = self
                    .conversations
                    .get_state(user_id)
                    .await
                    .get("last_query")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match last_query {
                    Some(query) => {
                        self.run_search(
                            event,
                            &messages::related_query(&query),
                            self.limits.search_results_limit,
                        )
                        .await
                    }
                    None => {
                        self.respond(
                            event.chat_id,
                            message_id,
                            format!("{}\n\n{}", messages::NO_PREVIOUS_QUERY, messages::RELATED_PROMPT),
                            Some(suggestions(RELATED_QUERIES_START..DEMO_QUERIES.len())),
                        )
                        .await
                    }
                }
            }
            ButtonAction::SyncSource { source_id } => {
                match self.backend.sync_source(user_id, &source_id, "incremental").await {
                    Ok(payload) => {
                        let job = self.track_job(event, &payload, JobKind::Sync).await;
                        self.respond(
                            event.chat_id,
                            message_id,
                            messages::format_sync_result(&payload),
                            job.map(|job_id| job_menu(&job_id)),
                        )
                        .await
                    }
                    Err(err) => self.report_failure(event, "sync the source", &err).await,
                }
            }
            ButtonAction::SyncAll => self.sync_all(event, message_id).await,
            ButtonAction::RefreshStatus => self.show_status(event, message_id).await,
        }
    }

    async fn on_file(&self, event: &InboundEvent, file: FileAttachment) -> Result<(), BotError> {
        let user_id = event.user.id;
        if self.conversations.get_flow(user_id).await != Some(Flow::UploadFile) {
            return self.send(event.chat_id, messages::UPLOAD_FIRST, None).await;
        }

        let file_name = file
            .file_name
            .clone()
            .unwrap_or_else(|| format!("upload_{}", file.file_id));
        // unknown sizes pass here and are checked again once downloaded
        if let Err(rejection) = validate_upload(
            &file_name,
            file.size_bytes.unwrap_or(0),
            self.limits.max_file_size_mb,
        ) {
            tracing::debug!(user_id, file = %file_name, size = ?file.size_bytes, %rejection, "upload rejected");
            return self.send(event.chat_id, rejection.to_string(), None).await;
        }

        let bytes = self.transport.download_file(&file.file_id).await?;
        let size_bytes = bytes.len() as u64;
        if file.size_bytes.is_none() {
            if let Err(rejection) =
                validate_upload(&file_name, size_bytes, self.limits.max_file_size_mb)
            {
                tracing::debug!(user_id, file = %file_name, size = size_bytes, %rejection, "downloaded upload rejected");
                return self.send(event.chat_id, rejection.to_string(), None).await;
            }
        }
        self.stats.incr(Counter::Uploads);
        let metadata = json!({
            "file_name": file_name,
            "mime_type": file.mime_type,
            "caption": file.caption,
            "size_bytes": size_bytes,
        });
        let outcome = self
            .backend
            .upload_file(
                user_id,
                Attachment {
                    file_name: file_name.clone(),
                    bytes,
                    mime_type: file.mime_type.clone(),
                },
                metadata,
            )
            .await;
        match outcome {
            Ok(payload) => {
                self.conversations.end_flow(user_id).await;
                let job = self.track_job(event, &payload, JobKind::Upload).await;
                if let Some(job_id) = &job {
                    let mut partial = State::new();
                    partial.insert("last_upload_job".to_string(), json!(job_id));
                    partial.insert("last_upload_file".to_string(), json!(file_name));
                    if let Some(doc) = payload.get("document_id") {
                        partial.insert("last_upload_document_id".to_string(), doc.clone());
                    }
                    self.conversations.update_state(user_id, partial).await;
                }
                self.send(
                    event.chat_id,
                    messages::upload_accepted(&file_name, job.as_deref()),
                    job.as_deref().map(job_menu),
                )
                .await
            }
            Err(err) => self.report_failure(event, "upload the file", &err).await,
        }
    }

    async fn run_search(&self, event: &InboundEvent, text: &str, limit: u32) -> Result<(), BotError> {
        let user_id = event.user.id;
        let query = match classify_query(text, self.limits.min_query_chars) {
            QueryCheck::TooShort => {
                tracing::debug!(user_id, "query below minimum length");
                return self
                    .send(event.chat_id, messages::query_too_short(self.limits.min_query_chars), None)
                    .await;
            }
            QueryCheck::Greeting => {
                return self.send(event.chat_id, messages::GREETING_REPLY, None).await;
            }
            QueryCheck::Search(query) => query,
        };

        self.stats.incr(Counter::Searches);
        let outcome = self
            .backend
            .search(
                user_id,
                &query,
                SearchOptions {
                    top_k: Some(limit),
                    ..SearchOptions::default()
                },
            )
            .await;
        match outcome {
            Ok(payload) => {
                self.track_job(event, &payload, JobKind::Search).await;
                let mut partial = State::new();
                partial.insert("last_query".to_string(), json!(query));
                self.conversations.update_state(user_id, partial).await;
                self.send(
                    event.chat_id,
                    messages::format_search_response(&payload, &query),
                    Some(search_menu()),
                )
                .await
            }
            Err(err) => self.report_failure(event, "run the search", &err).await,
        }
    }

    async fn start_connect(&self, event: &InboundEvent, message_id: Option<i64>) -> Result<(), BotError> {
        self.conversations
            .set_flow(event.user.id, &Flow::ConnectPlatform, Some(State::new()))
            .await;
        let mut keyboard = InlineKeyboard::new();
        for platform in Platform::ALL {
            keyboard = keyboard.row(vec![InlineButton::action(
                platform.display_name(),
                &ButtonAction::ConnectPlatform(platform),
            )]);
        }
        keyboard = keyboard.row(vec![InlineButton::action("Cancel", &ButtonAction::Cancel)]);
        self.respond(event.chat_id, message_id, messages::CONNECT_PROMPT, Some(keyboard))
            .await
    }

    async fn connect(
        &self,
        event: &InboundEvent,
        platform: Platform,
        message_id: Option<i64>,
    ) -> Result<(), BotError> {
        let user_id = event.user.id;
        let mut data = Map::new();
        data.insert("platform".to_string(), json!(platform.as_str()));
        self.conversations
            .set_flow(user_id, &Flow::Connecting, Some(data))
            .await;
        self.stats.incr(Counter::Connections);

        match self.backend.connect_platform(user_id, platform, json!({})).await {
            Ok(payload) => {
                self.track_job(event, &payload, JobKind::Connect).await;
                let oauth_url = payload
                    .get("oauth_url")
                    .and_then(Value::as_str)
                    .filter(|url| !url.is_empty());
                match oauth_url {
                    Some(url) => {
                        let keyboard = InlineKeyboard::new()
                            .row(vec![InlineButton::url(
                                format!("Authorize {}", platform.display_name()),
                                url,
                            )])
                            .row(vec![InlineButton::action(
                                "I've authorized",
                                &ButtonAction::AuthComplete(platform),
                            )])
                            .row(vec![InlineButton::action("Cancel", &ButtonAction::Cancel)]);
                        self.respond(
                            event.chat_id,
                            message_id,
                            messages::connect_started(platform.display_name(), true),
                            Some(keyboard),
                        )
                        .await
                    }
                    None => {
                        self.conversations.end_flow(user_id).await;
                        self.respond(
                            event.chat_id,
                            message_id,
                            messages::connect_started(platform.display_name(), false),
                            None,
                        )
                        .await
                    }
                }
            }
            Err(err) => {
                self.conversations.end_flow(user_id).await;
                self.report_failure(event, "connect the platform", &err).await
            }
        }
    }

    async fn start_upload(&self, event: &InboundEvent, message_id: Option<i64>) -> Result<(), BotError> {
        self.conversations
            .set_flow(event.user.id, &Flow::UploadFile, Some(State::new()))
            .await;
        self.respond(event.chat_id, message_id, messages::UPLOAD_PROMPT, Some(cancel_menu()))
            .await
    }

    async fn cancel(&self, event: &InboundEvent, message_id: Option<i64>) -> Result<(), BotError> {
        self.conversations.clear_state(event.user.id).await;
        self.respond(event.chat_id, message_id, messages::CANCELLED, None)
            .await
    }

    async fn show_help(&self, event: &InboundEvent, message_id: Option<i64>) -> Result<(), BotError> {
        let text = if self.auth.is_admin(event.user.id) {
            format!("{}\n\n{}", messages::HELP, messages::ADMIN_HELP)
        } else {
            messages::HELP.to_string()
        };
        self.respond(event.chat_id, message_id, text, None).await
    }

    async fn show_sources(&self, event: &InboundEvent, message_id: Option<i64>) -> Result<(), BotError> {
        let payload = match self.backend.get_sources(event.user.id).await {
            Ok(payload) => payload,
            Err(err) => return self.report_failure(event, "load your sources", &err).await,
        };
        let sources = list_field(&payload, "sources");
        let mut keyboard = InlineKeyboard::new();
        for source in &sources {
            let Some(id) = source.get("id").map(id_text) else {
                continue;
            };
            let name = source
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(id.as_str())
                .to_string();
            keyboard = keyboard.row(vec![
                InlineButton::action(
                    name,
                    &ButtonAction::FetchDocs {
                        source_id: id.clone(),
                    },
                ),
                InlineButton::action("Sync", &ButtonAction::SyncSource { source_id: id }),
            ]);
        }
        let mut bottom = vec![InlineButton::action("Connect new", &ButtonAction::Connect)];
        if !sources.is_empty() {
            bottom.insert(0, InlineButton::action("Sync all", &ButtonAction::SyncAll));
        }
        keyboard = keyboard.row(bottom);
        self.respond(
            event.chat_id,
            message_id,
            messages::format_sources(&sources),
            Some(keyboard),
        )
        .await
    }

    async fn show_documents(
        &self,
        event: &InboundEvent,
        source_id: &str,
        page: usize,
        message_id: Option<i64>,
    ) -> Result<(), BotError> {
        let payload = match self.backend.fetch_documents(event.user.id, source_id, &[]).await {
            Ok(payload) => payload,
            Err(err) => return self.report_failure(event, "fetch documents", &err).await,
        };
        self.track_job(event, &payload, JobKind::Fetch).await;

        let docs = list_field(&payload, "documents");
        let size = self.limits.page_size.max(1);
        let start = page.saturating_mul(size).min(docs.len());
        let end = (start + size).min(docs.len());
        let shown = &docs[start..end];

        let mut keyboard = InlineKeyboard::new();
        for doc in shown {
            if let Some(id) = doc.get("id").map(id_text) {
                let title = doc.get("title").and_then(Value::as_str).unwrap_or("Untitled");
                keyboard = keyboard.row(vec![InlineButton::action(
                    format!("Process {title}"),
                    &ButtonAction::ProcessDoc { document_id: id },
                )]);
            }
        }
        let mut nav = Vec::new();
        if page > 0 {
            nav.push(InlineButton::action(
                "Previous",
                &ButtonAction::FetchPage {
                    page: page - 1,
                    source_id: source_id.to_string(),
                },
            ));
        }
        let has_more = end < docs.len();
        if has_more {
            nav.push(InlineButton::action(
                "Next",
                &ButtonAction::FetchPage {
                    page: page + 1,
                    source_id: source_id.to_string(),
                },
            ));
        }
        if !nav.is_empty() {
            keyboard = keyboard.row(nav);
        }
        keyboard = keyboard.row(vec![InlineButton::action("Back to sources", &ButtonAction::FetchSources)]);

        self.respond(
            event.chat_id,
            message_id,
            messages::format_documents_page(source_id, shown, page, has_more),
            Some(keyboard),
        )
        .await
    }

    async fn show_job(&self, event: &InboundEvent, job_id: &str, message_id: Option<i64>) -> Result<(), BotError> {
        match self.backend.get_job_status(event.user.id, job_id).await {
            Ok(payload) => {
                self.respond(
                    event.chat_id,
                    message_id,
                    messages::format_job_status(job_id, &payload),
                    Some(job_menu(job_id)),
                )
                .await
            }
            Err(err) => self.report_failure(event, "check the job", &err).await,
        }
    }

    async fn show_status(&self, event: &InboundEvent, message_id: Option<i64>) -> Result<(), BotError> {
        let mut payload = match self.backend.get_system_status().await {
            Ok(payload) => payload,
            Err(err) => return self.report_failure(event, "load system status", &err).await,
        };
        match self.backend.get_user_status(event.user.id).await {
            Ok(user) => {
                if let Value::Object(map) = &mut payload {
                    map.insert("user".to_string(), user);
                }
            }
            Err(err) => {
                tracing::warn!(user_id = event.user.id, kind = err.kind(), "user status unavailable");
            }
        }
        let keyboard = InlineKeyboard::new().row(vec![InlineButton::action(
            "Refresh",
            &ButtonAction::RefreshStatus,
        )]);
        self.respond(
            event.chat_id,
            message_id,
            messages::format_system_status(&payload),
            Some(keyboard),
        )
        .await
    }

    async fn sync_all(&self, event: &InboundEvent, message_id: Option<i64>) -> Result<(), BotError> {
        let user_id = event.user.id;
        let payload = match self.backend.get_sources(user_id).await {
            Ok(payload) => payload,
            Err(err) => return self.report_failure(event, "load your sources", &err).await,
        };
        let active: Vec<Value> = list_field(&payload, "sources")
            .into_iter()
            .filter(|s| s.get("status").and_then(Value::as_str) == Some("active"))
            .collect();
        if active.is_empty() {
            return self
                .respond(event.chat_id, message_id, messages::NO_SOURCES, None)
                .await;
        }

        let mut succeeded = 0usize;
        let mut lines = Vec::with_capacity(active.len());
        for source in &active {
            let Some(id) = source.get("id").map(id_text) else {
                continue;
            };
            let name = source
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(id.as_str())
                .to_string();
            match self.backend.sync_source(user_id, &id, "incremental").await {
                Ok(result) => {
                    succeeded += 1;
                    self.track_job(event, &result, JobKind::Sync).await;
                    lines.push(format!("[ok] {name}"));
                }
                Err(err) => lines.push(format!("[failed] {name}: {}", describe(&err))),
            }
        }
        self.respond(
            event.chat_id,
            message_id,
            messages::format_sync_all(succeeded, active.len(), &lines),
            None,
        )
        .await
    }

    async fn report_job_outcome(
        &self,
        event: &InboundEvent,
        message_id: Option<i64>,
        outcome: crate::backend::Outcome,
        kind: JobKind,
        action: &str,
    ) -> Result<(), BotError> {
        match outcome {
            Ok(payload) => match self.track_job(event, &payload, kind).await {
                Some(job_id) => {
                    self.respond(
                        event.chat_id,
                        message_id,
                        messages::job_started(job_label(kind), &job_id),
                        Some(job_menu(&job_id)),
                    )
                    .await
                }
                None => {
                    let text = payload
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{} requested.", job_label(kind)));
                    self.respond(event.chat_id, message_id, text, None).await
                }
            },
            Err(err) => self.report_failure(event, action, &err).await,
        }
    }

    /// Records the payload's job id, if any, against the acting user.
    async fn track_job(&self, event: &InboundEvent, payload: &Value, kind: JobKind) -> Option<String> {
        let job_id = extract_job_id(payload)?;
        self.jobs
            .record(&job_id, event.user.id, event.chat_id, kind)
            .await;
        Some(job_id)
    }

    async fn report_failure(&self, event: &InboundEvent, action: &str, err: &BackendError) -> Result<(), BotError> {
        tracing::warn!(user_id = event.user.id, action, kind = err.kind(), error = %err, "backend call failed");
        self.send(event.chat_id, messages::backend_failure(action, &describe(err)), None)
            .await
    }

    /// Edits the pressed button's message when there is one and the text fits,
    /// otherwise sends new messages.
    async fn respond(
        &self,
        chat_id: ChatId,
        message_id: Option<i64>,
        text: impl Into<String>,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<(), BotError> {
        let text = text.into();
        match message_id {
            Some(id) if text.chars().count() <= self.limits.message_chunk_chars => {
                let msg = OutgoingMessage::text(chat_id, text)
                    .editing(Some(id))
                    .with_keyboard(keyboard);
                self.transport.send(&msg).await?;
                Ok(())
            }
            _ => self.send(chat_id, text, keyboard).await,
        }
    }

    /// Sends `text` split into chunks; the keyboard rides on the last one.
    async fn send(
        &self,
        chat_id: ChatId,
        text: impl Into<String>,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<(), BotError> {
        let chunks = messages::split_long_message(&text.into(), self.limits.message_chunk_chars);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let attached = if i == last { keyboard.clone() } else { None };
            let msg = OutgoingMessage::text(chat_id, chunk).with_keyboard(attached);
            self.transport.send(&msg).await?;
        }
        Ok(())
    }
}

fn describe(err: &BackendError) -> String {
    match err {
        BackendError::AuthFailed => "the backend rejected the bot's credentials".to_string(),
        BackendError::NotFound => "the requested resource was not found".to_string(),
        BackendError::Timeout => "the backend did not respond in time, please try again".to_string(),
        BackendError::Http { status, .. } => format!("the backend returned status {status}"),
        BackendError::Transport(_) => "the backend could not be reached".to_string(),
    }
}

fn job_label(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Search => "Search",
        JobKind::Upload => "Upload",
        JobKind::Process => "Processing",
        JobKind::Sync => "Sync",
        JobKind::Fetch => "Fetch",
        JobKind::Connect => "Connection",
    }
}

fn list_field(payload: &Value, key: &str) -> Vec<Value> {
    match payload.get(key).or(Some(payload)) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn main_menu() -> InlineKeyboard {
    InlineKeyboard::new()
        .row(vec![
            InlineButton::action("Connect source", &ButtonAction::Connect),
            InlineButton::action("Try a search", &ButtonAction::SearchDemo),
        ])
        .row(vec![
            InlineButton::action("Upload file", &ButtonAction::UploadFile),
            InlineButton::action("My sources", &ButtonAction::FetchSources),
        ])
        .row(vec![InlineButton::action("Help", &ButtonAction::Help)])
}

fn search_menu() -> InlineKeyboard {
    InlineKeyboard::new().row(vec![
        InlineButton::action("Refine search", &ButtonAction::RefineSearch),
        InlineButton::action("Related", &ButtonAction::RelatedSearch),
    ])
}

fn cancel_menu() -> InlineKeyboard {
    InlineKeyboard::new().row(vec![InlineButton::action("Cancel", &ButtonAction::Cancel)])
}

fn job_menu(job_id: &str) -> InlineKeyboard {
    InlineKeyboard::new().row(vec![InlineButton::action(
        "Check status",
        &ButtonAction::CheckJob {
            job_id: job_id.to_string(),
        },
    )])
}

fn suggestions(range: std::ops::Range<usize>) -> InlineKeyboard {
    let mut keyboard = InlineKeyboard::new();
    for index in range {
        if let Some(query) = DEMO_QUERIES.get(index) {
            keyboard = keyboard.row(vec![InlineButton::action(
                *query,
                &ButtonAction::DemoSearch(index),
            )]);
        }
    }
    keyboard.row(vec![InlineButton::action("Cancel", &ButtonAction::Cancel)])
}
