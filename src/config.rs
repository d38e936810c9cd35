use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "Carebook";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hosted identity (user) service.
pub const DEFAULT_IDENTITY_URL: &str = "https://appointment-system-user-service.vercel.app";
/// Doctor directory (`/api/auth/doctors`), served by the local user service.
pub const DEFAULT_DIRECTORY_URL: &str = "http://localhost:5001";
/// Appointment service.
pub const DEFAULT_APPOINTMENT_URL: &str = "http://localhost:5002";
/// Notification service. Also hosts the realtime gateway.
pub const DEFAULT_NOTIFICATION_URL: &str = "http://localhost:5003";
/// Realtime gateway WebSocket endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "ws://localhost:5003/ws";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "carebook=info,carebook_lib=info,warn"
}

// ═══════════════════════════════════════════════════════════
// Endpoints
// ═══════════════════════════════════════════════════════════

/// Base URLs of every collaborator the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub identity_url: String,
    pub directory_url: String,
    pub appointment_url: String,
    pub notification_url: String,
    pub gateway_url: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            appointment_url: DEFAULT_APPOINTMENT_URL.to_string(),
            notification_url: DEFAULT_NOTIFICATION_URL.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }
}

impl ServiceEndpoints {
    /// Defaults overridden by `CAREBOOK_*_URL` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let pick = |key: &str, fallback: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| normalize_base_url(&v))
                .unwrap_or(fallback)
        };
        Self {
            identity_url: pick("CAREBOOK_IDENTITY_URL", defaults.identity_url),
            directory_url: pick("CAREBOOK_DIRECTORY_URL", defaults.directory_url),
            appointment_url: pick("CAREBOOK_APPOINTMENT_URL", defaults.appointment_url),
            notification_url: pick("CAREBOOK_NOTIFICATION_URL", defaults.notification_url),
            gateway_url: pick("CAREBOOK_GATEWAY_URL", defaults.gateway_url),
        }
    }

    /// Point every service at one host, e.g. an in-process test server.
    pub fn all_at(base_url: &str) -> Self {
        let base = normalize_base_url(base_url);
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}/ws")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}/ws")
        } else {
            format!("{base}/ws")
        };
        Self {
            identity_url: base.clone(),
            directory_url: base.clone(),
            appointment_url: base.clone(),
            notification_url: base,
            gateway_url: ws,
        }
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

// ═══════════════════════════════════════════════════════════
// Reconnection & engine behaviour
// ═══════════════════════════════════════════════════════════

/// Backoff parameters for realtime channel reconnection.
///
/// `delay = min(initial_delay_ms * 2^attempt, max_delay_ms) + random_jitter`.
/// `max_retries == 0` means retry forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectionPolicy {
    /// Initial delay before first reconnection attempt (ms).
    pub initial_delay_ms: u32,
    /// Maximum delay cap (ms).
    pub max_delay_ms: u32,
    /// Maximum number of consecutive failed attempts before giving up.
    pub max_retries: u32,
    /// Maximum random jitter added to each delay (ms).
    pub jitter_ms: u32,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries: 10,
            jitter_ms: 500,
        }
    }
}

/// Switches for the two merge behaviours where the observed client and the
/// stronger-consistency variant differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Drop pushed notifications whose id is already held locally.
    /// `false` reproduces the append-always inbox.
    pub dedupe_notifications: bool,
    /// Revert optimistic read flags when the service rejects the write.
    /// `false` keeps the fire-and-forget behaviour.
    pub rollback_failed_reads: bool,
    /// Capacity of the presentation update broadcast.
    pub update_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedupe_notifications: true,
            rollback_failed_reads: true,
            update_buffer: 64,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ClientConfig
// ═══════════════════════════════════════════════════════════

/// Everything needed to build the service clients and the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoints: ServiceEndpoints,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectionPolicy,
    pub engine: EngineConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: ServiceEndpoints::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            reconnect: ReconnectionPolicy::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            endpoints: ServiceEndpoints::from_env(),
            ..Self::default()
        };
        if let Some(secs) = std::env::var("CAREBOOK_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }
}
