use std::sync::Arc;

use searchbot_contracts::UserId;
use searchbot_kernel::{jcs_sha256_hex, Clock};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only JSON-lines audit file. Each record links to the previous one
/// through `prev_hash`; write failures are swallowed.
pub struct AuditJsonl {
    file: Arc<Mutex<tokio::fs::File>>,
    last_hash: Arc<Mutex<Option<String>>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuditRecord {
    pub audit_id: String,
    pub user_id: UserId,
    pub action: String,
    pub result: String,
    pub reason_code: String,
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub record_hash: String,
}

impl AuditRecord {
    pub fn new(user_id: UserId, action: &str, result: &str, reason_code: &str) -> Self {
        Self {
            audit_id: format!("audit_{}", uuid::Uuid::new_v4().as_simple()),
            user_id,
            action: action.to_string(),
            result: result.to_string(),
            reason_code: reason_code.to_string(),
            // stamped by `AuditJsonl::append`
            ts: String::new(),
            target_user_id: None,
            prev_hash: None,
            record_hash: String::new(),
        }
    }

    pub fn targeting(mut self, target: UserId) -> Self {
        self.target_user_id = Some(target);
        self
    }

    fn compute_hash(&self) -> Result<String, String> {
        let mut seeded = self.clone();
        seeded.record_hash.clear();
        let value = serde_json::to_value(&seeded).map_err(|e| e.to_string())?;
        jcs_sha256_hex(&value)
    }
}

impl AuditJsonl {
    pub async fn new(path: &str, clock: Arc<dyn Clock>) -> Result<Self, String> {
        let last_hash = std::fs::read_to_string(path).ok().and_then(|text| {
            text.lines().rev().find_map(|line| {
                serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|v| v.get("record_hash")?.as_str().map(str::to_string))
            })
        });

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| format!("failed to open audit log {path}: {e}"))?;

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            last_hash: Arc::new(Mutex::new(last_hash)),
            clock,
        })
    }

    pub async fn append(&self, mut rec: AuditRecord) {
        // hold the chain head for the whole write so links stay ordered
        let mut last_hash = self.last_hash.lock().await;
        rec.ts = self.clock.now().to_rfc3339();
        rec.prev_hash = last_hash.clone();
        rec.record_hash = match rec.compute_hash() {
            Ok(hash) => hash,
            Err(err) => {
                tracing::error!(error = %err, action = %rec.action, "audit hash failed");
                return;
            }
        };
        let line = match serde_json::to_string(&rec) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "audit record encode failed");
                return;
            }
        };

        let mut file = self.file.lock().await;
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await
        }
        .await;
        match written {
            Ok(()) => *last_hash = Some(rec.record_hash),
            Err(err) => tracing::error!(error = %err, "audit write failed"),
        }
    }
}

pub fn verify_audit_chain(path: &str) -> Result<String, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut prev: Option<String> = None;
    let mut count = 0usize;

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let rec: AuditRecord = serde_json::from_str(line)
            .map_err(|e| format!("line {} parse failed: {e}", idx + 1))?;
        if count > 0 && rec.prev_hash != prev {
            return Err(format!(
                "line {} prev_hash mismatch: expected {:?}, got {:?}",
                idx + 1,
                prev,
                rec.prev_hash
            ));
        }
        let expected = rec
            .compute_hash()
            .map_err(|e| format!("line {} hash failed: {e}", idx + 1))?;
        if rec.record_hash != expected {
            return Err(format!(
                "line {} record_hash mismatch: expected {}, got {}",
                idx + 1,
                expected,
                rec.record_hash
            ));
        }
        prev = Some(rec.record_hash);
        count += 1;
    }

    Ok(format!("audit chain verified: {count} records"))
}
