//! # SiteKeeper Configuration
//!
//! Configuration for the master-side orchestration engine:
//! [`SiteKeeperConfig::load`] builds a layered [`config::Config`] from a
//! base file plus an optional environment-specific file and
//! environment-variable overrides (`SITEKEEPER__` prefix, `__` as the
//! nesting separator).
//!
//! Per §6, the core only *functionally* reads the JWT and refresh-token
//! fields' presence — it never validates or issues tokens itself (that's
//! the external HTTP/auth surface's job) — so they are carried here as
//! opaque passthrough values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the orchestration engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteKeeperConfig {
    /// Deployment environment name (e.g. "development", "production").
    pub environment_name: String,
    /// Root path the external journal serializer would persist under.
    /// The core never touches the filesystem itself; this is carried
    /// through so a real `JournalService` implementation can read it.
    pub journal_root_path: String,
    /// How often agents are expected to send a heartbeat.
    pub heartbeat_interval_seconds: u64,
    /// How long since the last heartbeat before an agent is marked Offline.
    /// Per §9 open question 2, this must be >= 3x heartbeat_interval_seconds.
    pub offline_threshold_seconds: u64,
    /// Coordinator tunables (§4.4, §9: "configuration-overridable, not hardcoded").
    pub coordinator: CoordinatorTimeouts,
    /// Maximum number of recent log lines retained per MasterAction (§9 bounded buffer).
    pub log_buffer_capacity: usize,
    /// Opaque JWT settings. Never interpreted by the core.
    pub jwt: JwtPassthroughConfig,
    /// Refresh token lifetime in days. Opaque passthrough, same as `jwt`.
    pub refresh_token_expiration_days: u32,
}

impl Default for SiteKeeperConfig {
    fn default() -> Self {
        Self {
            environment_name: "development".to_string(),
            journal_root_path: "./journal".to_string(),
            heartbeat_interval_seconds: 5,
            offline_threshold_seconds: 60,
            coordinator: CoordinatorTimeouts::default(),
            log_buffer_capacity: 1000,
            jwt: JwtPassthroughConfig::default(),
            refresh_token_expiration_days: 30,
        }
    }
}

impl SiteKeeperConfig {
    /// Load configuration by layering a base TOML file, an optional
    /// per-environment override file, and `SITEKEEPER__*` environment
    /// variables on top of [`SiteKeeperConfig::default`].
    ///
    /// Mirrors `tasker_shared::config`'s base + environment-overlay
    /// loading strategy, minus the database/queue sections this core
    /// doesn't own.
    pub fn load(base_path: &str, environment: &str) -> Result<Self, crate::error::SiteKeeperError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default()).map_err(|e| {
                crate::error::SiteKeeperError::Config(format!("default config invalid: {e}"))
            })?);

        builder = builder.add_source(config::File::with_name(base_path).required(false));
        let env_path = format!("{base_path}.{environment}");
        builder = builder.add_source(config::File::with_name(&env_path).required(false));
        builder = builder.add_source(
            config::Environment::with_prefix("SITEKEEPER")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| crate::error::SiteKeeperError::Config(e.to_string()))?;
        built
            .try_deserialize()
            .map_err(|e| crate::error::SiteKeeperError::Config(e.to_string()))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(self.offline_threshold_seconds)
    }
}

/// Readiness, cancellation-grace, and flush timeouts for the coordinator.
///
/// Defaults match §4.4 / §4.3 exactly (30s readiness, 15s cancellation grace,
/// 30s flush barrier).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorTimeouts {
    pub readiness_timeout_seconds: u64,
    pub cancellation_grace_seconds: u64,
    pub flush_timeout_seconds: u64,
}

impl Default for CoordinatorTimeouts {
    fn default() -> Self {
        Self {
            readiness_timeout_seconds: 30,
            cancellation_grace_seconds: 15,
            flush_timeout_seconds: 30,
        }
    }
}

impl CoordinatorTimeouts {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_seconds)
    }

    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_secs(self.cancellation_grace_seconds)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_seconds)
    }
}

/// JWT settings the core carries but never interprets (§6: "the core only
/// reads the last six functionally" — issuance/verification belongs to the
/// external HTTP/auth surface).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtPassthroughConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
    pub expiry_minutes: u32,
}

impl Default for JwtPassthroughConfig {
    fn default() -> Self {
        Self {
            issuer: "sitekeeper".to_string(),
            audience: "sitekeeper-agents".to_string(),
            secret: String::new(),
            expiry_minutes: 60,
        }
    }
}
