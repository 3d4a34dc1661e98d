//! CLI tool for administering the gate
//!
//! Works directly against the gate database, so it can be used while the
//! service is stopped.
//!
//! # Usage
//!
//! ```bash
//! # Mint a code for five guests, 500 MB / 2 hours each, valid one day
//! gate-admin create-code --data-mb 500 --minutes 120 --max-uses 5 --valid-minutes 1440
//!
//! # Lower alice's daily data limit
//! gate-admin adjust-quota alice daily --data-mb 750 --minutes 600
//!
//! # Show alice's windows
//! gate-admin show-quota alice
//!
//! # End a session
//! gate-admin terminate 6f1c2d0e-8a4b-4c1e-9d55-0b8f7e2a9c11
//! ```

use clap::{Parser, Subcommand};
use gate_rs::access_code::NewAccessCode;
use gate_rs::principal::PrincipalId;
use gate_rs::quota::{DataMb, QuotaLimits, WindowType};
use gate_rs::store::{SqliteStore, Stores};
use gate_rs::{Engine, GateConfig};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "gate-admin")]
#[command(about = "Administer access codes, quotas and sessions", long_about = None)]
struct Cli {
    /// Configuration file (defaults are used when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL, overriding the configuration (e.g., sqlite://gate.db)
    #[arg(short, long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a new access code
    CreateCode {
        /// Explicit code; generated when omitted
        #[arg(long)]
        code: Option<String>,
        /// Data allowance per guest session in MB
        #[arg(long)]
        data_mb: f64,
        /// Time allowance per guest session in minutes
        #[arg(long)]
        minutes: i64,
        /// Number of redemptions
        #[arg(long, default_value_t = 1)]
        max_uses: u32,
        /// Validity from now in minutes
        #[arg(long, default_value_t = 24 * 60)]
        valid_minutes: i64,
    },
    /// List all access codes
    ListCodes,
    /// Deactivate a code and end its live sessions
    RevokeCode {
        code: String,
    },
    /// Replace the limits of one window
    AdjustQuota {
        principal: String,
        /// daily, weekly or monthly
        window: String,
        /// Data limit in MB; unlimited when omitted
        #[arg(long)]
        data_mb: Option<f64>,
        /// Time limit in minutes; unlimited when omitted
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Show all windows of a principal
    ShowQuota {
        principal: String,
    },
    /// Terminate a session
    Terminate {
        session_id: Uuid,
    },
    /// List sessions
    Sessions {
        #[arg(long)]
        principal: Option<String>,
    },
}

fn fmt_limit<T: std::fmt::Display>(limit: Option<T>) -> String {
    limit
        .map(|l| l.to_string())
        .unwrap_or_else(|| "unlimited".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GateConfig::from_file(path)?,
        None => GateConfig::default(),
    };
    if let Some(db) = cli.db {
        config.storage.database_url = db;
    }

    let store = SqliteStore::connect(&config.storage.database_url).await?;
    let engine = Engine::from_config(&config, Stores::sqlite(store));

    match cli.command {
        Commands::CreateCode {
            code,
            data_mb,
            minutes,
            max_uses,
            valid_minutes,
        } => {
            let created = engine
                .create_access_code(&NewAccessCode {
                    code,
                    data_quota_mb: data_mb,
                    time_quota_minutes: minutes,
                    max_uses,
                    valid_for_minutes: valid_minutes,
                })
                .await?;
            println!("✓ Access code {} created", created.code);
            println!(
                "  {} / {} min, {} use(s), expires {}",
                created.data_quota, created.time_quota_minutes, created.max_uses, created.expires_at
            );
        }
        Commands::ListCodes => {
            let codes = engine.list_access_codes().await?;
            if codes.is_empty() {
                println!("No access codes found.");
            } else {
                println!(
                    "{:<12} {:>12} {:>8} {:>10} {:<8} {:<25}",
                    "Code", "Data", "Minutes", "Uses left", "Active", "Expires"
                );
                println!("{:-<80}", "");
                for c in &codes {
                    println!(
                        "{:<12} {:>12} {:>8} {:>6}/{:<3} {:<8} {:<25}",
                        c.code,
                        c.data_quota.to_string(),
                        c.time_quota_minutes,
                        c.uses_remaining,
                        c.max_uses,
                        c.is_active,
                        c.expires_at.to_rfc3339()
                    );
                }
                println!("\nTotal: {} code(s)", codes.len());
            }
        }
        Commands::RevokeCode { code } => {
            let ended = engine.revoke_access_code(&code).await?;
            println!("✓ Code {} revoked, {} session(s) ended", code, ended);
        }
        Commands::AdjustQuota {
            principal,
            window,
            data_mb,
            minutes,
        } => {
            let Some(window_type) = WindowType::from_str(&window) else {
                eprintln!("Error: unknown window type {}", window);
                std::process::exit(1);
            };
            let limits = QuotaLimits {
                data: data_mb.map(DataMb::from_mb),
                minutes,
            };
            let updated = engine
                .adjust_quota(&PrincipalId::new(principal.clone()), window_type, limits)
                .await?;
            println!(
                "✓ {} {} limits: data {}, time {}",
                principal,
                window_type,
                fmt_limit(updated.limits.data),
                fmt_limit(updated.limits.minutes)
            );
        }
        Commands::ShowQuota { principal } => {
            let windows = engine.quota_snapshot(&PrincipalId::new(principal)).await?;
            println!(
                "{:<8} {:>14} {:>14} {:>10} {:>10} {:<25}",
                "Window", "Data used", "Data limit", "Minutes", "Limit", "Resets"
            );
            println!("{:-<86}", "");
            for w in &windows {
                println!(
                    "{:<8} {:>14} {:>14} {:>10} {:>10} {:<25}",
                    w.window_type.to_string(),
                    w.consumed_data.to_string(),
                    fmt_limit(w.limits.data),
                    w.consumed_minutes,
                    fmt_limit(w.limits.minutes),
                    w.window_end.to_rfc3339()
                );
            }
        }
        Commands::Terminate { session_id } => {
            let session = engine.force_terminate(session_id).await?;
            println!("✓ Session {} is {}", session.id, session.status);
        }
        Commands::Sessions { principal } => {
            let principal = principal.map(PrincipalId::new);
            let sessions = engine.list_sessions(principal.as_ref()).await?;
            if sessions.is_empty() {
                println!("No sessions found.");
            } else {
                println!(
                    "{:<38} {:<44} {:<15} {:>12} {:>8}",
                    "Session", "Principal", "Status", "Data", "Minutes"
                );
                println!("{:-<121}", "");
                for s in &sessions {
                    println!(
                        "{:<38} {:<44} {:<15} {:>12} {:>8}",
                        s.id.to_string(),
                        s.principal_id.to_string(),
                        s.status.to_string(),
                        s.data_used.to_string(),
                        s.time_used_minutes
                    );
                }
                println!("\nTotal: {} session(s)", sessions.len());
            }
        }
    }

    Ok(())
}
