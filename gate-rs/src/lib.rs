//! gate-rs: Quota accounting and session authorization engine
//!
//! The engine behind a network-access manager: it authenticates users and
//! time-boxed guests and gates their continued access behind data and
//! connected-time quotas.
//!
//! # Features
//!
//! - **Quota Ledger**: daily, weekly and monthly windows with lazy rollover
//! - **Sessions**: `Active`/`Paused` lifecycle with sticky terminal states
//! - **Tokens**: HS256 access and refresh tokens bound to a session
//! - **Authorization Cache**: TTL-bounded permission sets with a super-role bypass
//! - **Access Codes**: atomic redemption into guest sessions with one-shot quotas
//!
//! # Example
//!
//! ```no_run
//! use gate_rs::config::GateConfig;
//! use gate_rs::engine::Engine;
//! use gate_rs::store::{SqliteStore, Stores};
//! use gate_rs::principal::PrincipalId;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GateConfig::default();
//!     let store = SqliteStore::connect(&config.storage.database_url).await?;
//!     let engine = Engine::from_config(&config, Stores::sqlite(store));
//!
//!     let login = engine.open_user_session(&PrincipalId::new("alice")).await?;
//!     let authorized = engine.authorize(&login.tokens.access.token, None).await?;
//!     println!("{} may proceed", authorized.principal.id());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`quota`]: Rolling-window ledger and quota policies
//! - [`session`]: Session state machine
//! - [`token`]: Token issuance and validation
//! - [`authz`]: Permission sets and the permission cache
//! - [`access_code`]: Guest onboarding through access codes
//! - [`store`]: In-memory and SQLite persistence
//! - [`engine`]: The operations exposed to gating and admin tooling
//! - [`api`]: HTTP gating adapter

pub mod access_code;
pub mod api;
pub mod authz;
pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod locks;
pub mod logging;
pub mod principal;
pub mod quota;
pub mod session;
pub mod store;
pub mod token;

// Re-export commonly used types
pub use config::GateConfig;
pub use engine::{Authorized, Engine};
pub use error::{GateError, Result};
