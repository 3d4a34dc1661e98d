//! Configuration for gate-rs

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{GateError, Result};
use crate::principal::PrincipalKind;
use crate::quota::{DataMb, QuotaLimits, WindowType};

/// Upper bound for every configured or requested duration (ten years)
pub const MAX_DURATION_MINUTES: i64 = 10 * 366 * 24 * 60;

/// `minutes` as a duration, clamped to `0..=MAX_DURATION_MINUTES`
pub fn bounded_minutes(minutes: i64) -> Duration {
    Duration::minutes(minutes.clamp(0, MAX_DURATION_MINUTES))
}

/// `seconds` as a duration, clamped to the same range
pub fn bounded_seconds(seconds: i64) -> Duration {
    Duration::seconds(seconds.clamp(0, MAX_DURATION_MINUTES * 60))
}

/// Main engine configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub roles: RolesConfig,
    /// Seed identities for the built-in directory
    #[serde(default)]
    pub users: Vec<UserSeed>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Seconds between cache sweeps and lock pruning
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    /// Signing secret for access tokens
    pub access_secret: String,
    /// Signing secret for refresh tokens, must differ from the access secret
    pub refresh_secret: String,
    #[serde(default = "default_user_access_ttl")]
    pub user_access_ttl_minutes: i64,
    #[serde(default = "default_guest_access_ttl")]
    pub guest_access_ttl_minutes: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_minutes: i64,
}

/// What happens when a principal with a live session starts another one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateStart {
    /// Hand back the existing live session
    Reuse,
    /// Fail with a conflict
    Reject,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_session")]
    pub user_max_minutes: i64,
    #[serde(default = "default_max_session")]
    pub guest_max_minutes: i64,
    #[serde(default = "default_duplicate_start")]
    pub duplicate_start: DuplicateStart,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: i64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: i64,
}

/// Limits for one window; absent values mean unlimited
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LimitConfig {
    pub data_mb: Option<f64>,
    pub time_minutes: Option<i64>,
}

impl LimitConfig {
    pub fn to_limits(&self) -> QuotaLimits {
        QuotaLimits {
            data: self.data_mb.map(DataMb::from_mb),
            minutes: self.time_minutes,
        }
    }
}

/// Default rolling-window limits for registered users
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub daily: LimitConfig,
    #[serde(default)]
    pub weekly: LimitConfig,
    #[serde(default)]
    pub monthly: LimitConfig,
}

impl QuotaConfig {
    pub fn limits_for(&self, window: WindowType) -> QuotaLimits {
        match window {
            WindowType::Daily => self.daily.to_limits(),
            WindowType::Weekly => self.weekly.to_limits(),
            WindowType::Monthly => self.monthly.to_limits(),
        }
    }
}

impl TokenConfig {
    pub fn access_ttl(&self, kind: PrincipalKind) -> Duration {
        match kind {
            PrincipalKind::User => bounded_minutes(self.user_access_ttl_minutes),
            PrincipalKind::Guest => bounded_minutes(self.guest_access_ttl_minutes),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        bounded_minutes(self.refresh_ttl_minutes)
    }
}

impl SessionConfig {
    /// Longest a session of `kind` may run
    pub fn max_duration(&self, kind: PrincipalKind) -> Duration {
        match kind {
            PrincipalKind::User => bounded_minutes(self.user_max_minutes),
            PrincipalKind::Guest => bounded_minutes(self.guest_max_minutes),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        bounded_seconds(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        bounded_seconds(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RolesConfig {
    /// Role that bypasses permission resolution entirely
    pub super_role: String,
    /// Role used to resolve permissions for guests
    pub guest_role: String,
    #[serde(default)]
    pub permissions: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserSeed {
    pub id: String,
    pub role: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

fn default_maintenance_interval() -> u64 {
    60
}

fn default_user_access_ttl() -> i64 {
    15
}

fn default_guest_access_ttl() -> i64 {
    480
}

fn default_refresh_ttl() -> i64 {
    24 * 60
}

fn default_max_session() -> i64 {
    480
}

fn default_duplicate_start() -> DuplicateStart {
    DuplicateStart::Reuse
}

fn default_cache_ttl() -> i64 {
    300
}

fn default_sweep_interval() -> i64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8088".to_string(),
            maintenance_interval_seconds: default_maintenance_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://gate.db".to_string(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_secret: "change-me-access".to_string(),
            refresh_secret: "change-me-refresh".to_string(),
            user_access_ttl_minutes: default_user_access_ttl(),
            guest_access_ttl_minutes: default_guest_access_ttl(),
            refresh_ttl_minutes: default_refresh_ttl(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_max_minutes: default_max_session(),
            guest_max_minutes: default_max_session(),
            duplicate_start: default_duplicate_start(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily: LimitConfig {
                data_mb: Some(1000.0),
                time_minutes: Some(600),
            },
            weekly: LimitConfig {
                data_mb: Some(5000.0),
                time_minutes: None,
            },
            monthly: LimitConfig {
                data_mb: Some(15000.0),
                time_minutes: None,
            },
        }
    }
}

impl Default for RolesConfig {
    fn default() -> Self {
        let mut permissions = HashMap::new();
        permissions.insert(
            "guest".to_string(),
            vec!["internet:access".to_string()],
        );
        permissions.insert(
            "user".to_string(),
            vec!["internet:access".to_string(), "quota:read".to_string()],
        );
        permissions.insert(
            "operator".to_string(),
            vec![
                "internet:access".to_string(),
                "quota:read".to_string(),
                "gate:admin".to_string(),
                "usage:report".to_string(),
            ],
        );
        Self {
            super_role: "superadmin".to_string(),
            guest_role: "guest".to_string(),
            permissions,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl GateConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("Failed to read config file: {}", e)))?;

        let config: GateConfig = toml::from_str(&content)
            .map_err(|e| GateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.tokens.access_secret.is_empty() || self.tokens.refresh_secret.is_empty() {
            return Err(GateError::Config("Token secrets must not be empty".to_string()));
        }
        if self.tokens.access_secret == self.tokens.refresh_secret {
            return Err(GateError::Config(
                "Access and refresh tokens need distinct secrets".to_string(),
            ));
        }
        let minutes = [
            self.tokens.user_access_ttl_minutes,
            self.tokens.guest_access_ttl_minutes,
            self.tokens.refresh_ttl_minutes,
            self.sessions.user_max_minutes,
            self.sessions.guest_max_minutes,
        ];
        let seconds = [self.cache.ttl_seconds, self.cache.sweep_interval_seconds];
        if minutes.iter().chain(seconds.iter()).any(|t| *t <= 0) {
            return Err(GateError::Config(
                "Durations must be positive".to_string(),
            ));
        }
        if minutes.iter().any(|m| *m > MAX_DURATION_MINUTES)
            || seconds.iter().any(|s| *s > MAX_DURATION_MINUTES * 60)
        {
            return Err(GateError::Config(
                "Durations cannot exceed ten years".to_string(),
            ));
        }
        for window in WindowType::ALL {
            self.quota.limits_for(window).validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.sessions.user_max_minutes, 480);
        assert_eq!(config.sessions.duplicate_start, DuplicateStart::Reuse);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[tokens]
access_secret = "a-secret"
refresh_secret = "r-secret"
user_access_ttl_minutes = 5

[sessions]
user_max_minutes = 120
duplicate_start = "reject"

[quota.daily]
data_mb = 250.5

[[users]]
id = "alice"
role = "user"
"#;
        let config: GateConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.tokens.user_access_ttl_minutes, 5);
        assert_eq!(config.tokens.refresh_ttl_minutes, 24 * 60);
        assert_eq!(config.sessions.duplicate_start, DuplicateStart::Reject);
        assert_eq!(
            config.quota.limits_for(WindowType::Daily).data,
            Some(DataMb::from_centi(25050))
        );
        assert_eq!(config.quota.limits_for(WindowType::Daily).minutes, None);
        assert_eq!(config.users.len(), 1);
        assert!(config.users[0].active);
    }

    #[test]
    fn test_shared_secret_rejected() {
        let mut config = GateConfig::default();
        config.tokens.refresh_secret = config.tokens.access_secret.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let mut config = GateConfig::default();
        config.tokens.refresh_ttl_minutes = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = GateConfig::default();
        config.cache.ttl_seconds = i64::MAX;
        assert!(config.validate().is_err());

        // Unvalidated values are clamped instead of overflowing
        assert_eq!(
            config.cache.ttl(),
            Duration::minutes(MAX_DURATION_MINUTES)
        );
        config.sessions.user_max_minutes = i64::MAX;
        assert_eq!(
            config.sessions.max_duration(PrincipalKind::User),
            Duration::minutes(MAX_DURATION_MINUTES)
        );
    }

    #[test]
    fn test_negative_limit_rejected() {
        let mut config = GateConfig::default();
        config.quota.weekly.data_mb = Some(-1.0);
        assert!(config.validate().is_err());
    }
}
