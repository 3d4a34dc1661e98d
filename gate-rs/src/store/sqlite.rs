//! SQLite persistence
//!
//! # Usage
//! ```no_run
//! use gate_rs::store::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::connect("sqlite://gate.db").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{AccessCodeStore, LiveInsert, QuotaStore, SessionStore};
use crate::access_code::{AccessCode, CodeRejection};
use crate::error::{GateError, Result};
use crate::principal::{PrincipalId, PrincipalKind};
use crate::quota::{DataMb, QuotaLimits, QuotaWindow, WindowType};
use crate::session::{AccessSession, QuotaCeiling, SessionStatus};

const SESSION_COLUMNS: &str = "id, principal_id, kind, access_code, status, started_at, ended_at, \
     data_used_centi, time_used_minutes, last_active_at, accrued_until, \
     ceiling_data_centi, ceiling_minutes";

/// All three stores over one pool
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open (creating if missing) and initialize the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { db };
        store.init_db().await?;
        info!(database_url, "SQLite store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_windows (
                principal_id TEXT NOT NULL,
                window_type TEXT NOT NULL,
                limit_data_centi INTEGER,
                limit_minutes INTEGER,
                consumed_data_centi INTEGER NOT NULL DEFAULT 0,
                consumed_minutes INTEGER NOT NULL DEFAULT 0,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                PRIMARY KEY (principal_id, window_type)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_sessions (
                id TEXT PRIMARY KEY,
                principal_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                access_code TEXT,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                data_used_centi INTEGER NOT NULL DEFAULT 0,
                time_used_minutes INTEGER NOT NULL DEFAULT 0,
                last_active_at TEXT NOT NULL,
                accrued_until TEXT NOT NULL,
                ceiling_data_centi INTEGER,
                ceiling_minutes INTEGER
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_codes (
                code TEXT PRIMARY KEY,
                data_quota_centi INTEGER NOT NULL,
                time_quota_minutes INTEGER NOT NULL,
                max_uses INTEGER NOT NULL,
                uses_remaining INTEGER NOT NULL CHECK (uses_remaining >= 0),
                expires_at TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        // Create indexes
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_principal_status ON access_sessions(principal_id, status)",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_live ON access_sessions(principal_id) \
             WHERE status IN ('active', 'paused')",
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_code ON access_sessions(access_code)")
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Health check - verify database connectivity
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

fn corrupt(what: &str, value: &str) -> GateError {
    GateError::Storage(format!("Invalid {} in database: {}", what, value))
}

fn window_from_row(row: &SqliteRow) -> Result<QuotaWindow> {
    let window_type: String = row.try_get("window_type")?;
    Ok(QuotaWindow {
        principal_id: PrincipalId::new(row.try_get::<String, _>("principal_id")?),
        window_type: WindowType::from_str(&window_type)
            .ok_or_else(|| corrupt("window type", &window_type))?,
        limits: QuotaLimits {
            data: row
                .try_get::<Option<i64>, _>("limit_data_centi")?
                .map(DataMb::from_centi),
            minutes: row.try_get("limit_minutes")?,
        },
        consumed_data: DataMb::from_centi(row.try_get("consumed_data_centi")?),
        consumed_minutes: row.try_get("consumed_minutes")?,
        window_start: row.try_get("window_start")?,
        window_end: row.try_get("window_end")?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<AccessSession> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let ceiling_data: Option<i64> = row.try_get("ceiling_data_centi")?;
    let ceiling_minutes: Option<i64> = row.try_get("ceiling_minutes")?;

    Ok(AccessSession {
        id: Uuid::parse_str(&id).map_err(|_| corrupt("session id", &id))?,
        principal_id: PrincipalId::new(row.try_get::<String, _>("principal_id")?),
        kind: PrincipalKind::from_str(&kind).ok_or_else(|| corrupt("principal kind", &kind))?,
        access_code: row.try_get("access_code")?,
        status: SessionStatus::from_str(&status)
            .ok_or_else(|| corrupt("session status", &status))?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        data_used: DataMb::from_centi(row.try_get("data_used_centi")?),
        time_used_minutes: row.try_get("time_used_minutes")?,
        last_active_at: row.try_get("last_active_at")?,
        accrued_until: row.try_get("accrued_until")?,
        ceiling: match (ceiling_data, ceiling_minutes) {
            (Some(data), Some(minutes)) => Some(QuotaCeiling {
                data_mb: DataMb::from_centi(data),
                time_minutes: minutes,
            }),
            _ => None,
        },
    })
}

fn code_from_row(row: &SqliteRow) -> Result<AccessCode> {
    let code: String = row.try_get("code")?;
    let max_uses: i64 = row.try_get("max_uses")?;
    let uses_remaining: i64 = row.try_get("uses_remaining")?;

    Ok(AccessCode {
        data_quota: DataMb::from_centi(row.try_get("data_quota_centi")?),
        time_quota_minutes: row.try_get("time_quota_minutes")?,
        max_uses: u32::try_from(max_uses).map_err(|_| corrupt("max_uses", &code))?,
        uses_remaining: u32::try_from(uses_remaining)
            .map_err(|_| corrupt("uses_remaining", &code))?,
        expires_at: row.try_get("expires_at")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        code,
    })
}

#[async_trait]
impl QuotaStore for SqliteStore {
    async fn load_windows(&self, principal: &PrincipalId) -> Result<Vec<QuotaWindow>> {
        let rows = sqlx::query(
            r#"
            SELECT principal_id, window_type, limit_data_centi, limit_minutes,
                   consumed_data_centi, consumed_minutes, window_start, window_end
            FROM quota_windows
            WHERE principal_id = ?
            "#,
        )
        .bind(principal.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(window_from_row).collect()
    }

    async fn save_windows(&self, windows: &[QuotaWindow]) -> Result<()> {
        let mut tx = self.db.begin().await?;
        for w in windows {
            sqlx::query(
                r#"
                INSERT INTO quota_windows (
                    principal_id, window_type, limit_data_centi, limit_minutes,
                    consumed_data_centi, consumed_minutes, window_start, window_end
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(principal_id, window_type) DO UPDATE SET
                    limit_data_centi = excluded.limit_data_centi,
                    limit_minutes = excluded.limit_minutes,
                    consumed_data_centi = excluded.consumed_data_centi,
                    consumed_minutes = excluded.consumed_minutes,
                    window_start = excluded.window_start,
                    window_end = excluded.window_end
                "#,
            )
            .bind(w.principal_id.as_str())
            .bind(w.window_type.as_str())
            .bind(w.limits.data.map(|d| d.centi()))
            .bind(w.limits.minutes)
            .bind(w.consumed_data.centi())
            .bind(w.consumed_minutes)
            .bind(w.window_start)
            .bind(w.window_end)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_live(&self, session: &AccessSession) -> Result<LiveInsert> {
        let result = sqlx::query(
            r#"
            INSERT INTO access_sessions (
                id, principal_id, kind, access_code, status, started_at, ended_at,
                data_used_centi, time_used_minutes, last_active_at, accrued_until,
                ceiling_data_centi, ceiling_minutes
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.principal_id.as_str())
        .bind(session.kind.as_str())
        .bind(session.access_code.as_deref())
        .bind(session.status.as_str())
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(session.data_used.centi())
        .bind(session.time_used_minutes)
        .bind(session.last_active_at)
        .bind(session.accrued_until)
        .bind(session.ceiling.map(|c| c.data_mb.centi()))
        .bind(session.ceiling.map(|c| c.time_minutes))
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(LiveInsert::Inserted),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!(principal = %session.principal_id, "Live session slot already taken");
                match self.find_live(&session.principal_id).await? {
                    Some(existing) => Ok(LiveInsert::Existing(existing)),
                    None => Err(GateError::Conflict(
                        "Live session slot is contended".to_string(),
                    )),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<AccessSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM access_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_live(&self, principal: &PrincipalId) -> Result<Option<AccessSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM access_sessions WHERE principal_id = ? AND status IN ('active', 'paused')",
            SESSION_COLUMNS
        ))
        .bind(principal.as_str())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_live(&self, session: &AccessSession) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE access_sessions
            SET status = ?, ended_at = ?, data_used_centi = ?, time_used_minutes = ?,
                last_active_at = ?, accrued_until = ?
            WHERE id = ? AND status IN ('active', 'paused')
            "#,
        )
        .bind(session.status.as_str())
        .bind(session.ended_at)
        .bind(session.data_used.centi())
        .bind(session.time_used_minutes)
        .bind(session.last_active_at)
        .bind(session.accrued_until)
        .bind(session.id.to_string())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match SessionStore::get(self, session.id).await? {
            Some(_) => Ok(false),
            None => Err(GateError::NotFound(format!("session {}", session.id))),
        }
    }

    async fn live_for_code(&self, code: &str) -> Result<Vec<AccessSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM access_sessions WHERE access_code = ? AND status IN ('active', 'paused')",
            SESSION_COLUMNS
        ))
        .bind(code)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn list(&self, principal: Option<&PrincipalId>) -> Result<Vec<AccessSession>> {
        let rows = match principal {
            Some(p) => {
                sqlx::query(&format!(
                    "SELECT {} FROM access_sessions WHERE principal_id = ? ORDER BY started_at DESC",
                    SESSION_COLUMNS
                ))
                .bind(p.as_str())
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM access_sessions ORDER BY started_at DESC",
                    SESSION_COLUMNS
                ))
                .fetch_all(&self.db)
                .await?
            }
        };

        rows.iter().map(session_from_row).collect()
    }
}

#[async_trait]
impl AccessCodeStore for SqliteStore {
    async fn insert(&self, code: &AccessCode) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO access_codes (
                code, data_quota_centi, time_quota_minutes, max_uses, uses_remaining,
                expires_at, is_active, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&code.code)
        .bind(code.data_quota.centi())
        .bind(code.time_quota_minutes)
        .bind(i64::from(code.max_uses))
        .bind(i64::from(code.uses_remaining))
        .bind(code.expires_at)
        .bind(code.is_active)
        .bind(code.created_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(GateError::Conflict(
                "access code already exists".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, code: &str) -> Result<Option<AccessCode>> {
        let row = sqlx::query(
            r#"
            SELECT code, data_quota_centi, time_quota_minutes, max_uses, uses_remaining,
                   expires_at, is_active, created_at
            FROM access_codes
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(code_from_row).transpose()
    }

    async fn take_use(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<AccessCode, CodeRejection>> {
        let Some(current) = AccessCodeStore::get(self, code).await? else {
            return Ok(Err(CodeRejection::NotFound));
        };
        if let Some(rejection) = current.rejection(now) {
            return Ok(Err(rejection));
        }

        let result = sqlx::query(
            r#"
            UPDATE access_codes
            SET uses_remaining = uses_remaining - 1
            WHERE code = ? AND is_active = 1 AND uses_remaining > 0
            "#,
        )
        .bind(code)
        .execute(&self.db)
        .await?;

        let latest = AccessCodeStore::get(self, code).await?;
        if result.rows_affected() == 0 {
            // Lost the last use to a concurrent redeemer, or deactivated meanwhile
            let rejection = latest
                .and_then(|c| c.rejection(now))
                .unwrap_or(CodeRejection::Exhausted);
            return Ok(Err(rejection));
        }

        latest
            .map(Ok)
            .ok_or_else(|| GateError::NotFound("access code".to_string()))
    }

    async fn restore_use(&self, code: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE access_codes
            SET uses_remaining = uses_remaining + 1
            WHERE code = ? AND uses_remaining < max_uses
            "#,
        )
        .bind(code)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn deactivate(&self, code: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE access_codes SET is_active = 0 WHERE code = ?")
            .bind(code)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(&self) -> Result<Vec<AccessCode>> {
        let rows = sqlx::query(
            r#"
            SELECT code, data_quota_centi, time_quota_minutes, max_uses, uses_remaining,
                   expires_at, is_active, created_at
            FROM access_codes
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(code_from_row).collect()
    }
}
