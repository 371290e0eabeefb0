//! User-facing text. Everything is plain text; transports send it unparsed.

use searchbot_contracts::JobStatus;
use serde_json::Value;

pub const DEMO_QUERIES: [&str; 10] = [
    "quarterly revenue growth",
    "team meeting notes",
    "project documentation",
    "company policies",
    "customer feedback",
    "related documents",
    "similar content",
    "follow up information",
    "additional context",
    "supplementary materials",
];

/// Index of the first suggestion offered by the related-search menu.
pub const RELATED_QUERIES_START: usize = 5;

pub fn welcome(name: &str) -> String {
    format!(
        "Welcome, {name}!\n\n\
         I search across your connected sources and uploaded files.\n\n\
         Just type a question to search, or pick an action below."
    )
}

pub const HELP: &str = "Available commands:\n\
/start - welcome message\n\
/help - this help\n\
/connect - connect a data source\n\
/search <query> - search your documents\n\
/upload - upload a file for indexing\n\
/sources - list connected sources\n\
/fetch [source] - fetch new documents from a source\n\
/process [document_id] - process documents\n\
/status [job_id] - system or job status\n\
/cancel - cancel the current operation\n\n\
You can also type a question directly to search.";

pub const ADMIN_HELP: &str = "Admin commands:\n\
/admin stats - usage statistics\n\
/admin users - list authorized users\n\
/admin add_user <id> - authorize a user\n\
/admin remove_user <id> - revoke a user";

pub const CONNECT_PROMPT: &str = "Choose a platform to connect:";

pub const UPLOAD_PROMPT: &str = "Send me a file to upload for indexing.\n\
Supported: PDF, Word, text, spreadsheets, images, audio, markdown, HTML, XML, JSON.\n\n\
Use /cancel to abort.";

pub const SEARCH_DEMO_PROMPT: &str = "Try one of these searches:";
pub const RELATED_PROMPT: &str = "Related searches you could try:";
pub const REFINE_PROMPT: &str = "Send a more specific query and I'll search again with more results.";
pub const CANCELLED: &str = "Operation cancelled.";
pub const ADMIN_REQUIRED: &str = "This command requires admin privileges.";
pub const GENERIC_FAILURE: &str = "Something went wrong while handling that. Please try again.";
pub const UNKNOWN_ACTION: &str = "Unknown action. Please use the buttons from the latest message.";
pub const UPLOAD_FIRST: &str = "To upload a file, run /upload first and then send the file.";
pub const UPLOAD_REMINDER: &str = "I'm waiting for a file. Send a document, or /cancel to stop the upload.";
pub const CONNECT_REMINDER: &str = "Please choose a platform with the buttons above, or /cancel.";
pub const SEARCH_USAGE: &str = "Usage: /search <query>";
pub const GREETING_REPLY: &str = "Hi! Ask me a question about your documents and I'll search for it.";
pub const NO_PREVIOUS_QUERY: &str = "There is no previous search yet. Type a question to search.";
pub const NO_SOURCES: &str = "No sources connected yet. Use /connect to add one.";

pub fn not_authorized(user_id: i64) -> String {
    format!(
        "Unauthorized access. Please contact an administrator to request access.\n\nYour user ID: {user_id}"
    )
}

pub fn related_query(last_query: &str) -> String {
    format!("related to {last_query}")
}

pub fn query_too_short(min_chars: usize) -> String {
    format!("Please enter at least {min_chars} characters to search.")
}

pub fn unknown_command(name: &str) -> String {
    format!("Unknown command /{name}. Use /help to see what I can do.")
}

pub fn backend_failure(action: &str, reason: &str) -> String {
    format!("Could not {action}: {reason}")
}

pub fn connect_started(platform: &str, oauth: bool) -> String {
    if oauth {
        format!("Open the link below to authorize {platform}, then press \"I've authorized\".")
    } else {
        format!("{platform} connected.")
    }
}

pub fn auth_completed(platform: &str) -> String {
    format!("{platform} authorization recorded. Your documents will be indexed shortly.")
}

pub fn upload_accepted(file_name: &str, job_id: Option<&str>) -> String {
    match job_id {
        Some(job) => format!("Uploaded {file_name}. Processing job {job} started; I'll tell you when it finishes."),
        None => format!("Uploaded {file_name}."),
    }
}

pub fn job_started(what: &str, job_id: &str) -> String {
    format!("{what} started (job {job_id}). I'll notify you when it finishes.")
}

pub fn format_search_response(result: &Value, query: &str) -> String {
    let answer = result.get("answer").and_then(Value::as_str).unwrap_or("");
    let citations = array(result, "citations");
    let results = array(result, "results");

    if answer.is_empty() && results.is_empty() {
        return "No results found for your query.\n\n\
                Try different keywords, connect more sources, or check that your sources are synced."
            .to_string();
    }

    let mut out = format!("Search results for \"{query}\"\n\n");
    if !answer.is_empty() {
        out.push_str(answer);
        out.push_str("\n\n");
    }

    if !citations.is_empty() {
        out.push_str("Sources:\n");
        for (i, citation) in citations.iter().enumerate() {
            let n = i + 1;
            let id = citation
                .get("id")
                .map(scalar_text)
                .unwrap_or_else(|| n.to_string());
            let title = str_or(citation, "title", &format!("Document {n}"));
            out.push_str(&format!("[{id}] {}\n", linked(&title, citation)));
            out.push_str(&format!("    {}", str_or(citation, "source", "Unknown")));
            if let Some(snippet) = snippet(citation, 100) {
                out.push_str(&format!(" | {snippet}"));
            }
            out.push_str("\n\n");
        }
    } else if !results.is_empty() {
        out.push_str("Found documents:\n");
        for (i, item) in results.iter().take(5).enumerate() {
            let n = i + 1;
            let title = str_or(item, "title", &format!("Document {n}"));
            out.push_str(&format!("{n}. {}\n", linked(&title, item)));
            out.push_str(&format!("   {}", str_or(item, "source", "Unknown")));
            if let Some(snippet) = snippet(item, 80) {
                out.push_str(&format!(" - {snippet}"));
            }
            out.push_str("\n\n");
        }
    }

    let total = if results.is_empty() {
        citations.len()
    } else {
        results.len()
    };
    if total > 0 {
        out.push_str(&format!(
            "Found {total} result{}",
            if total == 1 { "" } else { "s" }
        ));
        if let Some(ms) = result.get("search_time").filter(|v| !v.is_null()) {
            out.push_str(&format!(" in {}ms", scalar_text(ms)));
        }
    }
    out.trim_end().to_string()
}

/// Splits on line boundaries into chunks of at most `max` characters. A
/// single line longer than `max` is hard-split.
pub fn split_long_message(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    if text.chars().count() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        if line_len > max {
            if current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        let needed = if current_len == 0 { line_len } else { line_len + 1 };
        if current_len + needed > max {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if current_len > 0 {
        chunks.push(current);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

pub fn format_job_notification(
    job_id: &str,
    status: &JobStatus,
    result: Option<&Value>,
    error: Option<&str>,
) -> String {
    match status {
        JobStatus::Completed => {
            let mut msg = format!("Job completed\n\nJob ID: {job_id}");
            if result.is_some_and(|r| !r.is_null()) {
                msg.push_str("\nResult: processing successful.");
            }
            msg
        }
        JobStatus::Failed => {
            let mut msg = format!("Job failed\n\nJob ID: {job_id}");
            if let Some(err) = error.filter(|e| !e.is_empty()) {
                msg.push_str(&format!("\nError: {err}"));
            }
            msg
        }
        JobStatus::Cancelled => format!("Job cancelled\n\nJob ID: {job_id}"),
        JobStatus::Other(raw) => format!("Job status update\n\nJob ID: {job_id}\nStatus: {raw}"),
    }
}

pub fn format_job_status(job_id: &str, payload: &Value) -> String {
    let raw = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let progress = payload
        .get("progress")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);
    let marker = match JobStatus::parse(raw) {
        JobStatus::Completed => "[done]",
        JobStatus::Failed => "[failed]",
        JobStatus::Cancelled => "[cancelled]",
        JobStatus::Other(ref s) if s == "running" => "[running]",
        JobStatus::Other(_) => "[pending]",
    };
    let mut out = format!(
        "Job {job_id}\n{marker} Status: {}\nProgress: {} {:.0}%",
        title_case(raw),
        progress_bar(progress, 10),
        progress
    );
    if let Some(err) = payload.get("error").and_then(Value::as_str) {
        out.push_str(&format!("\nError: {err}"));
    }
    out
}

pub fn format_system_status(payload: &Value) -> String {
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let mut out = format!("System status: {}", title_case(status));
    if let Some(services) = payload.get("services").and_then(Value::as_object) {
        for (name, state) in services {
            out.push_str(&format!("\n- {name}: {}", scalar_text(state)));
        }
    }
    if let Some(user) = payload.get("user") {
        if let Some(sources) = user.get("sources_count") {
            out.push_str(&format!("\nYour sources: {}", scalar_text(sources)));
        }
        if let Some(docs) = user.get("documents_count") {
            out.push_str(&format!("\nYour documents: {}", scalar_text(docs)));
        }
    }
    out
}

pub fn format_sources(sources: &[Value]) -> String {
    if sources.is_empty() {
        return NO_SOURCES.to_string();
    }
    let mut out = String::from("Connected sources:\n");
    for source in sources {
        let name = str_or(source, "name", "Unnamed source");
        let status = str_or(source, "status", "unknown");
        out.push_str(&format!("\n- {name} ({status})"));
        if let Some(count) = source.get("documents_count") {
            out.push_str(&format!(", {} documents", scalar_text(count)));
        }
    }
    out
}

pub fn format_documents_page(source_id: &str, docs: &[Value], page: usize, has_more: bool) -> String {
    if docs.is_empty() {
        return format!("No documents found in source {source_id}.");
    }
    let mut out = format!("Documents in {source_id} (page {}):\n", page + 1);
    for doc in docs {
        out.push_str(&format!("\n- {}", str_or(doc, "title", "Untitled")));
    }
    if has_more {
        out.push_str("\n\nMore documents are available.");
    }
    out
}

pub fn format_sync_result(payload: &Value) -> String {
    let items = payload
        .get("items_retrieved")
        .map(scalar_text)
        .unwrap_or_else(|| "0".to_string());
    let status = str_or(payload, "sync_status", "started");
    format!("Sync {status}. Items retrieved: {items}.")
}

pub fn format_sync_all(succeeded: usize, total: usize, lines: &[String]) -> String {
    let mut out = format!("Synced {succeeded} of {total} active sources.");
    for line in lines {
        out.push('\n');
        out.push_str(line);
    }
    out
}

pub fn format_stats(lines: &[(&str, String)]) -> String {
    let mut out = String::from("Bot statistics:");
    for (label, value) in lines {
        out.push_str(&format!("\n- {label}: {value}"));
    }
    out
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_or(value: &Value, key: &str, fallback: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn linked(title: &str, item: &Value) -> String {
    match item.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) {
        Some(url) => format!("{title} ({url})"),
        None => title.to_string(),
    }
}

fn snippet(item: &Value, max_chars: usize) -> Option<String> {
    let raw = item.get("snippet").and_then(Value::as_str)?;
    let clean = raw.replace('\n', " ");
    let clean = clean.trim();
    if clean.is_empty() {
        return None;
    }
    if clean.chars().count() > max_chars {
        Some(format!("{}...", clean.chars().take(max_chars).collect::<String>()))
    } else {
        Some(clean.to_string())
    }
}

fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

fn title_case(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
