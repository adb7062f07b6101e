use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Remote connection mode. `Direct` talks straight to the remote database's
/// data-plane endpoints; `Gateway` proxies through its gateway, which is
/// friendlier to restrictive networks and is the development default. Sent
/// on every request as the `x-connection-mode` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Direct,
    Gateway,
}

/// Client-construction knobs for the remote store adapter. Bulk execution is
/// deliberately not a field: token-based auth is incompatible with the
/// remote database's batch/transactional-batch modes, so it is always
/// disabled rather than configurable.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub connection_mode: ConnectionMode,
    pub max_retry_attempts: u32,
    pub max_retry_wait: Duration,
    pub request_timeout: Duration,
}

impl RemoteOptions {
    pub fn for_env(development: bool) -> Self {
        if development {
            Self {
                connection_mode: ConnectionMode::Gateway,
                max_retry_attempts: 5,
                max_retry_wait: Duration::from_secs(60),
                request_timeout: Duration::from_secs(60),
            }
        } else {
            Self {
                connection_mode: ConnectionMode::Direct,
                max_retry_attempts: 3,
                max_retry_wait: Duration::from_secs(30),
                request_timeout: Duration::from_secs(60),
            }
        }
    }
}

/// Environment-sourced configuration surface. Constructed via
/// [`SyncConfig::from_env`] in production, or directly for tests.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub remote_endpoint: String,
    pub token_endpoint: String,
    pub current_user_id: String,
    pub local_db_path: String,
    pub development: bool,
    pub token_safety_buffer: Duration,
}

impl SyncConfig {
    /// Reads the environment keys below, applying the stated defaults.
    /// Fails fast with `InvalidArgument` on unparseable values rather than
    /// silently falling back to a default that might mask a typo.
    pub fn from_env() -> SyncResult<Self> {
        let remote_endpoint = require_env("SYNC_REMOTE_ENDPOINT")?;
        let token_endpoint = require_env("SYNC_TOKEN_ENDPOINT")?;
        let current_user_id =
            std::env::var("SYNC_CURRENT_USER_ID").unwrap_or_else(|_| "user1".to_string());
        let local_db_path =
            std::env::var("SYNC_LOCAL_DB_PATH").unwrap_or_else(|_| "sync.db".to_string());
        let development = std::env::var("SYNC_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);
        let token_safety_buffer = match std::env::var("SYNC_TOKEN_SAFETY_BUFFER_SECONDS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    SyncError::InvalidArgument(format!(
                        "SYNC_TOKEN_SAFETY_BUFFER_SECONDS must be an integer, got {raw:?}"
                    ))
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(300),
        };

        Ok(Self {
            remote_endpoint,
            token_endpoint,
            current_user_id,
            local_db_path,
            development,
            token_safety_buffer,
        })
    }

    pub fn remote_options(&self) -> RemoteOptions {
        RemoteOptions::for_env(self.development)
    }
}

fn require_env(key: &str) -> SyncResult<String> {
    std::env::var(key)
        .map_err(|_| SyncError::InvalidArgument(format!("missing required environment variable {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_options_default_to_direct_outside_development() {
        let opts = RemoteOptions::for_env(false);
        assert_eq!(opts.connection_mode, ConnectionMode::Direct);
        assert_eq!(opts.max_retry_attempts, 3);
    }

    #[test]
    fn remote_options_default_to_gateway_in_development() {
        let opts = RemoteOptions::for_env(true);
        assert_eq!(opts.connection_mode, ConnectionMode::Gateway);
    }
}
