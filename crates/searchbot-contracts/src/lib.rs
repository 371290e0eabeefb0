use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type UserId = i64;
pub type ChatId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatUser {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl ChatUser {
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAttachment {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Absent when the platform does not report a size up front.
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Command { name: String, args: Vec<String> },
    Text { text: String },
    Button {
        payload: String,
        #[serde(default)]
        message_id: Option<i64>,
        /// Platform id of the press, used to acknowledge it.
        #[serde(default)]
        callback_id: Option<String>,
    },
    File { attachment: FileAttachment },
}

/// One update from the chat transport, already stripped of platform detail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundEvent {
    pub user: ChatUser,
    pub chat_id: ChatId,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ButtonTarget {
    Callback { payload: String },
    Url { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub target: ButtonTarget,
}

impl InlineButton {
    pub fn action(label: impl Into<String>, action: &ButtonAction) -> Self {
        Self {
            label: label.into(),
            target: ButtonTarget::Callback {
                payload: action.encode(),
            },
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: ButtonTarget::Url { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<InlineButton>) -> Self {
        self.rows.push(buttons);
        self
    }

    pub fn payloads(&self) -> Vec<String> {
        self.rows
            .iter()
            .flatten()
            .filter_map(|b| match &b.target {
                ButtonTarget::Callback { payload } => Some(payload.clone()),
                ButtonTarget::Url { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub text: String,
    #[serde(default)]
    pub keyboard: Option<InlineKeyboard>,
    /// When set, the transport edits this message instead of sending a new one.
    #[serde(default)]
    pub edit_message_id: Option<i64>,
}

impl OutgoingMessage {
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            keyboard: None,
            edit_message_id: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Option<InlineKeyboard>) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn editing(mut self, message_id: Option<i64>) -> Self {
        self.edit_message_id = message_id;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Drive,
    Slack,
    Notion,
    Custom,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Drive,
        Platform::Slack,
        Platform::Notion,
        Platform::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Drive => "drive",
            Platform::Slack => "slack",
            Platform::Notion => "notion",
            Platform::Custom => "custom",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Drive => "Google Drive",
            Platform::Slack => "Slack",
            Platform::Notion => "Notion",
            Platform::Custom => "Custom URL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Platform::ALL.into_iter().find(|p| p.as_str() == raw)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("empty button payload")]
    Empty,
    #[error("unknown button action: {0}")]
    UnknownAction(String),
    #[error("button action {action} is missing parameter {param}")]
    MissingParam {
        action: &'static str,
        param: &'static str,
    },
    #[error("button action {action} has invalid parameter: {value}")]
    InvalidParam { action: &'static str, value: String },
}

/// Every action a button can carry. Payloads are `tag` or `tag:param`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Connect,
    ConnectPlatform(Platform),
    AuthComplete(Platform),
    SearchDemo,
    DemoSearch(usize),
    Help,
    Cancel,
    FetchSources,
    FetchDocs { source_id: String },
    FetchPage { page: usize, source_id: String },
    ProcessDoc { document_id: String },
    CheckJob { job_id: String },
    UploadFile,
    RefineSearch,
    RelatedSearch,
    SyncSource { source_id: String },
    SyncAll,
    RefreshStatus,
}

impl ButtonAction {
    pub fn tag(&self) -> &'static str {
        match self {
            ButtonAction::Connect => "connect",
            ButtonAction::ConnectPlatform(_) => "connect_platform",
            ButtonAction::AuthComplete(_) => "auth_complete",
            ButtonAction::SearchDemo => "search_demo",
            ButtonAction::DemoSearch(_) => "demo_search",
            ButtonAction::Help => "help",
            ButtonAction::Cancel => "cancel",
            ButtonAction::FetchSources => "fetch_sources",
            ButtonAction::FetchDocs { .. } => "fetch_docs",
            ButtonAction::FetchPage { .. } => "fetch_page",
            ButtonAction::ProcessDoc { .. } => "process_doc",
            ButtonAction::CheckJob { .. } => "check_job",
            ButtonAction::UploadFile => "upload_file",
            ButtonAction::RefineSearch => "refine_search",
            ButtonAction::RelatedSearch => "related_search",
            ButtonAction::SyncSource { .. } => "sync_source",
            ButtonAction::SyncAll => "sync_all",
            ButtonAction::RefreshStatus => "refresh_status",
        }
    }

    pub fn encode(&self) -> String {
        let tag = self.tag();
        match self {
            ButtonAction::ConnectPlatform(p) | ButtonAction::AuthComplete(p) => {
                format!("{tag}:{}", p.as_str())
            }
            ButtonAction::DemoSearch(i) => format!("{tag}:{i}"),
            ButtonAction::FetchDocs { source_id } | ButtonAction::SyncSource { source_id } => {
                format!("{tag}:{source_id}")
            }
            ButtonAction::FetchPage { page, source_id } => format!("{tag}:{page}:{source_id}"),
            ButtonAction::ProcessDoc { document_id } => format!("{tag}:{document_id}"),
            ButtonAction::CheckJob { job_id } => format!("{tag}:{job_id}"),
            _ => tag.to_string(),
        }
    }

    pub fn decode(payload: &str) -> Result<Self, PayloadError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(PayloadError::Empty);
        }
        let (tag, param) = match payload.split_once(':') {
            Some((tag, param)) => (tag, Some(param)),
            None => (payload, None),
        };

        let action = match tag {
            "connect" => ButtonAction::Connect,
            "connect_platform" => {
                ButtonAction::ConnectPlatform(platform_param("connect_platform", param)?)
            }
            "auth_complete" => ButtonAction::AuthComplete(platform_param("auth_complete", param)?),
            "search_demo" => ButtonAction::SearchDemo,
            "demo_search" => {
                let raw = required("demo_search", "index", param)?;
                ButtonAction::DemoSearch(raw.parse().map_err(|_| PayloadError::InvalidParam {
                    action: "demo_search",
                    value: raw.to_string(),
                })?)
            }
            "help" => ButtonAction::Help,
            "cancel" => ButtonAction::Cancel,
            "fetch_sources" => ButtonAction::FetchSources,
            "fetch_docs" => ButtonAction::FetchDocs {
                source_id: required("fetch_docs", "source_id", param)?.to_string(),
            },
            "fetch_page" => {
                let raw = required("fetch_page", "page", param)?;
                let (page, source_id) =
                    raw.split_once(':').ok_or(PayloadError::MissingParam {
                        action: "fetch_page",
                        param: "source_id",
                    })?;
                ButtonAction::FetchPage {
                    page: page.parse().map_err(|_| PayloadError::InvalidParam {
                        action: "fetch_page",
                        value: page.to_string(),
                    })?,
                    source_id: non_empty("fetch_page", "source_id", source_id)?.to_string(),
                }
            }
            "process_doc" => ButtonAction::ProcessDoc {
                document_id: required("process_doc", "document_id", param)?.to_string(),
            },
            "check_job" => ButtonAction::CheckJob {
                job_id: required("check_job", "job_id", param)?.to_string(),
            },
            "upload_file" => ButtonAction::UploadFile,
            "refine_search" => ButtonAction::RefineSearch,
            "related_search" => ButtonAction::RelatedSearch,
            "sync_source" => ButtonAction::SyncSource {
                source_id: required("sync_source", "source_id", param)?.to_string(),
            },
            "sync_all" => ButtonAction::SyncAll,
            "refresh_status" => ButtonAction::RefreshStatus,
            other => return Err(PayloadError::UnknownAction(other.to_string())),
        };
        Ok(action)
    }
}

fn required<'a>(
    action: &'static str,
    param: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, PayloadError> {
    non_empty(
        action,
        param,
        value.ok_or(PayloadError::MissingParam { action, param })?,
    )
}

fn non_empty<'a>(
    action: &'static str,
    param: &'static str,
    value: &'a str,
) -> Result<&'a str, PayloadError> {
    if value.trim().is_empty() {
        return Err(PayloadError::MissingParam { action, param });
    }
    Ok(value)
}

fn platform_param(action: &'static str, value: Option<&str>) -> Result<Platform, PayloadError> {
    let raw = required(action, "platform", value)?;
    Platform::parse(raw).ok_or_else(|| PayloadError::InvalidParam {
        action,
        value: raw.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    Stats,
    Users,
    AddUser(UserId),
    RemoveUser(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Connect,
    Search(String),
    Upload,
    Sources,
    Fetch(Option<String>),
    Process(Option<String>),
    Status(Option<String>),
    Cancel,
    Admin(AdminCommand),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command /{0}")]
    Unknown(String),
    #[error("invalid admin command: {0}")]
    InvalidAdmin(String),
}

impl Command {
    pub fn parse(name: &str, args: &[String]) -> Result<Self, CommandError> {
        let name = name.trim_start_matches('/');
        let name = name.split('@').next().unwrap_or(name).to_ascii_lowercase();
        let first = args.first().cloned();
        let cmd = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "connect" => Command::Connect,
            "search" => Command::Search(args.join(" ").trim().to_string()),
            "upload" => Command::Upload,
            "sources" => Command::Sources,
            "fetch" => Command::Fetch(if args.is_empty() {
                None
            } else {
                Some(args.join(" "))
            }),
            "process" => Command::Process(first),
            "status" => Command::Status(first),
            "cancel" => Command::Cancel,
            "admin" => Command::Admin(AdminCommand::parse(args)?),
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, Command::Admin(_))
    }
}

impl AdminCommand {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        let Some(sub) = args.first() else {
            return Ok(AdminCommand::Help);
        };
        let target = || -> Result<UserId, CommandError> {
            let raw = args
                .get(1)
                .ok_or_else(|| CommandError::InvalidAdmin(format!("{sub} requires a user id")))?;
            raw.parse()
                .map_err(|_| CommandError::InvalidAdmin(format!("not a user id: {raw}")))
        };
        match sub.to_ascii_lowercase().as_str() {
            "stats" => Ok(AdminCommand::Stats),
            "users" => Ok(AdminCommand::Users),
            "add_user" => Ok(AdminCommand::AddUser(target()?)),
            "remove_user" => Ok(AdminCommand::RemoveUser(target()?)),
            other => Err(CommandError::InvalidAdmin(format!("unknown subcommand {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Search,
    Upload,
    Process,
    Sync,
    Fetch,
    Connect,
}

/// Backend-reported job status. Anything not recognised is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" | "canceled" => JobStatus::Cancelled,
            other => JobStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Other(v) => v.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Other(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCallback {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobCallback {
    pub fn status(&self) -> JobStatus {
        JobStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub created_at: String,
    pub kind: JobKind,
    #[serde(default)]
    pub last_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUserView {
    pub user_id: UserId,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUsersResponse {
    pub allow_all: bool,
    pub users: Vec<AdminUserView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminMutationResponse {
    pub success: bool,
    pub message: String,
}
