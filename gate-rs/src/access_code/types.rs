use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::config::MAX_DURATION_MINUTES;
use crate::error::{GateError, Result};
use crate::quota::DataMb;
use crate::session::QuotaCeiling;

const GENERATED_CODE_LEN: usize = 8;

/// Internal reason an access code was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeRejection {
    NotFound,
    Inactive,
    Expired,
    Exhausted,
}

impl CodeRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeRejection::NotFound => "not_found",
            CodeRejection::Inactive => "inactive",
            CodeRejection::Expired => "expired",
            CodeRejection::Exhausted => "exhausted",
        }
    }
}

/// Shareable credential redeemable into a bounded guest session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessCode {
    pub code: String,
    pub data_quota: DataMb,
    pub time_quota_minutes: i64,
    pub max_uses: u32,
    pub uses_remaining: u32,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AccessCode {
    /// First failed check, in redemption order
    pub fn rejection(&self, now: DateTime<Utc>) -> Option<CodeRejection> {
        if !self.is_active {
            Some(CodeRejection::Inactive)
        } else if self.expires_at <= now {
            Some(CodeRejection::Expired)
        } else if self.uses_remaining == 0 {
            Some(CodeRejection::Exhausted)
        } else {
            None
        }
    }

    pub fn ceiling(&self) -> QuotaCeiling {
        QuotaCeiling {
            data_mb: self.data_quota,
            time_minutes: self.time_quota_minutes,
        }
    }

    /// Masked form for logs
    pub fn redacted(code: &str) -> String {
        let visible: String = code.chars().take(2).collect();
        format!("{}***", visible)
    }
}

/// Admin request to mint a code
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccessCode {
    /// Explicit code; generated when absent
    pub code: Option<String>,
    pub data_quota_mb: f64,
    pub time_quota_minutes: i64,
    pub max_uses: u32,
    pub valid_for_minutes: i64,
}

impl NewAccessCode {
    pub fn build(&self, now: DateTime<Utc>) -> Result<AccessCode> {
        if !self.data_quota_mb.is_finite() {
            return Err(GateError::Validation(
                "Access code data quota must be a number".to_string(),
            ));
        }
        if self.data_quota_mb < 0.0 || self.time_quota_minutes < 0 {
            return Err(GateError::Validation(
                "Access code quotas cannot be negative".to_string(),
            ));
        }
        if self.max_uses == 0 {
            return Err(GateError::Validation(
                "Access code needs at least one use".to_string(),
            ));
        }
        if self.valid_for_minutes <= 0 {
            return Err(GateError::Validation(
                "Access code validity must be positive".to_string(),
            ));
        }
        if self.valid_for_minutes > MAX_DURATION_MINUTES {
            return Err(GateError::Validation(
                "Access code validity cannot exceed ten years".to_string(),
            ));
        }
        let expires_at = Duration::try_minutes(self.valid_for_minutes)
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or_else(|| GateError::Validation("Access code validity is out of range".to_string()))?;
        let code = match &self.code {
            Some(c) if c.trim().is_empty() => {
                return Err(GateError::Validation("Access code cannot be blank".to_string()))
            }
            Some(c) => c.trim().to_string(),
            None => generate_code(),
        };

        Ok(AccessCode {
            code,
            data_quota: DataMb::from_mb(self.data_quota_mb),
            time_quota_minutes: self.time_quota_minutes,
            max_uses: self.max_uses,
            uses_remaining: self.max_uses,
            expires_at,
            is_active: true,
            created_at: now,
        })
    }
}

fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_CODE_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect()
}
