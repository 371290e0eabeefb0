pub mod clock;
pub mod flow;
pub mod messages;
pub mod upload;

pub use clock::{saturating_minutes, Clock, ManualClock, SystemClock};
pub use flow::Flow;

use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn jcs_sha256_hex(value: &Value) -> Result<String, String> {
    let canonical = serde_jcs::to_string(value)
        .map_err(|err| format!("failed to canonicalize JSON via JCS: {err}"))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn conversation_key(user_id: i64, namespace: &str) -> String {
    format!("conversation:{user_id}:{namespace}")
}

pub fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

/// Pulls a non-empty string `job_id` out of a backend success payload.
pub fn extract_job_id(payload: &Value) -> Option<String> {
    match payload.get("job_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCheck {
    TooShort,
    Greeting,
    Search(String),
}

const GREETINGS: &[&str] = &[
    "hello", "hi", "hey", "thanks", "thank you", "ok", "okay", "yes", "no", "sure", "fine",
    "good", "great", "nice",
];

pub fn classify_query(text: &str, min_chars: usize) -> QueryCheck {
    let trimmed = text.trim();
    if trimmed.chars().count() < min_chars {
        return QueryCheck::TooShort;
    }
    if GREETINGS.contains(&trimmed.to_lowercase().as_str()) {
        return QueryCheck::Greeting;
    }
    QueryCheck::Search(trimmed.to_string())
}
