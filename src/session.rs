//! Session records carried in the auth cookie.
//!
//! The cookie value is a JSON object such as
//! `{"subjectId":"u1","role":"provider","timestamp":1718000000000}`.
//! Extraction is total: anything unreadable becomes [`SessionCheck::Invalid`]
//! with a reason, never an error.

use crate::role::Role;
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sessions older than this are expired
pub const DEFAULT_MAX_SESSION_AGE_MS: i64 = 24 * 60 * 60 * 1000;

static WALLET_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("valid regex"));

/// Check that an address looks like a base58 Solana public key
pub fn is_valid_wallet_address(address: &str) -> bool {
    WALLET_ADDRESS.is_match(address)
}

/// An authenticated identity read from the cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub subject_id: String,
    pub role: Role,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

impl Session {
    /// Issue a fresh session stamped at `now_ms`
    pub fn issue(subject_id: &str, role: Role, now_ms: i64) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            role,
            timestamp: now_ms,
            wallet_address: None,
        }
    }

    pub fn with_wallet(mut self, address: &str) -> Self {
        self.wallet_address = Some(address.to_string());
        self
    }

    /// Age of the session at `now_ms`. Negative when stamped in the future.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// JSON payload as stored in the cookie
    pub fn to_cookie_value(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Percent-encoded payload, safe to paste into a `Cookie:` header
    pub fn to_encoded_cookie_value(&self) -> serde_json::Result<String> {
        let json = self.to_cookie_value()?;
        Ok(utf8_percent_encode(&json, NON_ALPHANUMERIC).to_string())
    }
}

/// Why a cookie did not yield a usable session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    Missing,
    Malformed,
    MissingField(&'static str),
    UnknownRole(String),
    BadWalletAddress,
    Expired,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::UnknownRole(_) => "unknown_role",
            Self::BadWalletAddress => "bad_wallet_address",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "no session cookie"),
            Self::Malformed => write!(f, "session cookie is not a JSON object"),
            Self::MissingField(field) => write!(f, "session is missing '{}'", field),
            Self::UnknownRole(role) => write!(f, "unknown role '{}'", role),
            Self::BadWalletAddress => write!(f, "wallet address is not base58"),
            Self::Expired => write!(f, "session expired"),
        }
    }
}

/// Outcome of reading the session cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    Valid(Session),
    Invalid(InvalidReason),
}

impl SessionCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionCheck::Valid(_))
    }

    /// The session's role if valid, otherwise guest
    pub fn role(&self) -> Role {
        match self {
            SessionCheck::Valid(session) => session.role,
            SessionCheck::Invalid(_) => Role::Guest,
        }
    }
}

/// Wire shape; every field optional so missing ones can be reported by name
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSession {
    #[serde(default, alias = "uid")]
    subject_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    wallet_address: Option<String>,
}

/// Parse and validate a cookie value at `now_ms`
pub fn extract_session(cookie: Option<&str>, now_ms: i64, max_age_ms: i64) -> SessionCheck {
    let Some(raw) = cookie.map(str::trim).filter(|c| !c.is_empty()) else {
        return SessionCheck::Invalid(InvalidReason::Missing);
    };

    // A JSON array would otherwise deserialize positionally into the struct
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v @ serde_json::Value::Object(_)) => v,
        _ => return SessionCheck::Invalid(InvalidReason::Malformed),
    };
    let Ok(raw) = serde_json::from_value::<RawSession>(value) else {
        return SessionCheck::Invalid(InvalidReason::Malformed);
    };

    let Some(subject_id) = raw.subject_id.filter(|s| !s.is_empty()) else {
        return SessionCheck::Invalid(InvalidReason::MissingField("subjectId"));
    };
    let Some(role_label) = raw.role.filter(|r| !r.is_empty()) else {
        return SessionCheck::Invalid(InvalidReason::MissingField("role"));
    };
    // A label outside the closed set cannot be echoed as `current`, so it fails to login
    let Some(role) = Role::from_label(&role_label) else {
        return SessionCheck::Invalid(InvalidReason::UnknownRole(role_label));
    };
    let Some(timestamp) = raw.timestamp else {
        return SessionCheck::Invalid(InvalidReason::MissingField("timestamp"));
    };
    if let Some(address) = &raw.wallet_address {
        if !is_valid_wallet_address(address) {
            return SessionCheck::Invalid(InvalidReason::BadWalletAddress);
        }
    }

    let session = Session {
        subject_id,
        role,
        timestamp: timestamp as i64,
        wallet_address: raw.wallet_address,
    };

    if session.age_ms(now_ms) >= max_age_ms {
        return SessionCheck::Invalid(InvalidReason::Expired);
    }

    SessionCheck::Valid(session)
}

/// Role of the caller: the session's role when valid, guest otherwise
pub fn resolve_role(check: &SessionCheck) -> Role {
    check.role()
}
