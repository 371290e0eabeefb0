use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use searchbot_config::Auth;
use searchbot_contracts::UserId;
use searchbot_kernel::Clock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_TYPE: &str = "bot_user";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("unexpected token type")]
    WrongType,
    #[error("token lifetime out of range")]
    Lifetime,
    #[error("signing key rejected")]
    Key,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl Claims {
    pub fn user_id(&self) -> Option<UserId> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    User,
    Admin,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::User => "user",
            Capability::Admin => "admin",
        }
    }
}

/// Allow-list and admin set, plus the signed credentials presented to the
/// backend on a user's behalf.
///
/// Allow-all mode is decided once at startup from an empty allow-list and
/// stays fixed; adding users afterwards does not switch it off. Mutations
/// live in process memory only.
pub struct AuthGate {
    allowed: RwLock<BTreeSet<UserId>>,
    admins: RwLock<BTreeSet<UserId>>,
    allow_all: bool,
    secret: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl AuthGate {
    pub fn new(cfg: &Auth, jwt_secret: &str, clock: Arc<dyn Clock>) -> Self {
        let allowed: BTreeSet<UserId> = cfg.allowed_user_ids.iter().copied().collect();
        Self {
            allow_all: allowed.is_empty(),
            allowed: RwLock::new(allowed),
            admins: RwLock::new(cfg.admin_user_ids.iter().copied().collect()),
            secret: jwt_secret.as_bytes().to_vec(),
            clock,
        }
    }

    pub fn allow_all(&self) -> bool {
        self.allow_all
    }

    pub fn is_allowed(&self, user_id: UserId) -> bool {
        self.allow_all || self.allowed.read().contains(&user_id)
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.read().contains(&user_id)
    }

    pub fn check(&self, user_id: UserId, capability: Capability) -> bool {
        match capability {
            Capability::User => self.is_allowed(user_id),
            Capability::Admin => self.is_allowed(user_id) && self.is_admin(user_id),
        }
    }

    pub fn add_user(&self, user_id: UserId) -> bool {
        let added = self.allowed.write().insert(user_id);
        if added {
            tracing::info!(user_id, "user added to allow-list");
        }
        added
    }

    /// Admins cannot be removed through this path.
    pub fn remove_user(&self, user_id: UserId) -> bool {
        if self.is_admin(user_id) {
            tracing::warn!(user_id, "refusing to remove admin from allow-list");
            return false;
        }
        let removed = self.allowed.write().remove(&user_id);
        if removed {
            tracing::info!(user_id, "user removed from allow-list");
        }
        removed
    }

    pub fn allowed_users(&self) -> Vec<UserId> {
        self.allowed.read().iter().copied().collect()
    }

    pub fn admin_users(&self) -> Vec<UserId> {
        self.admins.read().iter().copied().collect()
    }

    /// Smallest admin id, used as the acting user for system-wide calls.
    pub fn first_admin(&self) -> Option<UserId> {
        self.admins.read().iter().next().copied()
    }

    pub fn issue_token(&self, user_id: UserId, ttl_minutes: i64) -> Result<String, TokenError> {
        let now = self.clock.now();
        let expires_at = Duration::try_minutes(ttl_minutes)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(TokenError::Lifetime)?;
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            token_type: TOKEN_TYPE.to_string(),
        };
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed)?);
        let signing_input = format!("{header}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        Ok(format!("{signing_input}.{signature}"))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_token_at(token, self.clock.now())
    }

    pub fn verify_token_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let (signing_input, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let mut parts = signing_input.split('.');
        let (Some(header), Some(payload), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(TokenError::Malformed);
        };

        let header: serde_json::Value = URL_SAFE_NO_PAD
            .decode(header)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(TokenError::Malformed)?;
        if header.get("alg").and_then(|v| v.as_str()) != Some("HS256") {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Key)?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .ok_or(TokenError::Malformed)?;
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        if claims.token_type != TOKEN_TYPE {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Key)?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
