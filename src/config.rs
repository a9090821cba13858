//! Application-level configuration loading: matchmaking, session, export and auth settings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::dao::models::GameType;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CHESS_ARENA_CONFIG_PATH";
/// Environment variable holding the token signing secret; wins over the file.
const JWT_SECRET_ENV: &str = "JWT_SECRET";

const DEFAULT_TIME_CONTROL: &str = "10+0";
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;
const DEFAULT_ABANDON_GRACE_MS: u64 = 600_000;
const DEFAULT_EXPORT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_EXPORT_CONCURRENCY: usize = 4;
const DEFAULT_EXPORT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_EXPORT_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_EXPORT_MAX_BACKOFF_MS: u64 = 10_000;
const DEFAULT_RATING_DELTA: i32 = 16;

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub matchmaking: MatchmakingConfig,
    pub session: SessionConfig,
    pub export: ExportConfig,
    pub auth: AuthConfig,
}

/// Queue defaults and liveness sweep cadence.
#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    /// Used when the client sends no (or a blank) time control.
    pub default_time_control: String,
    /// Used when the client sends no (or a blank) game type.
    pub default_game_type: GameType,
    pub sweep_interval: Duration,
}

/// Live game settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a non-terminal game may have no connection before it is abandoned.
    pub abandon_grace: Duration,
}

/// Completed-game export worker settings.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Downstream endpoint; `None` selects the log-only exporter.
    pub endpoint: Option<String>,
    pub queue_capacity: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Fixed rating change granted to the winner and taken from the loser.
    pub rating_delta: i32,
}

/// Token verification settings.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded configuration file");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        if let Some(secret) = env::var(JWT_SECRET_ENV).ok().filter(|s| !s.is_empty()) {
            config.auth.jwt_secret = Some(secret);
        }

        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    matchmaking: RawMatchmaking,
    session: RawSession,
    export: RawExport,
    auth: RawAuth,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMatchmaking {
    default_time_control: Option<String>,
    default_game_type: Option<String>,
    sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSession {
    abandon_grace_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawExport {
    endpoint: Option<String>,
    queue_capacity: Option<usize>,
    concurrency: Option<usize>,
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    rating_delta: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAuth {
    jwt_secret: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let RawConfig {
            matchmaking,
            session,
            export,
            auth,
        } = value;

        let default_game_type = match matchmaking.default_game_type.as_deref() {
            None => GameType::Standard,
            Some(tag) => tag.parse().unwrap_or_else(|_| {
                warn!(tag, "unknown default game type in config; using STANDARD");
                GameType::Standard
            }),
        };

        Self {
            matchmaking: MatchmakingConfig {
                default_time_control: matchmaking
                    .default_time_control
                    .filter(|tc| !tc.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_TIME_CONTROL.to_owned()),
                default_game_type,
                sweep_interval: Duration::from_millis(
                    matchmaking
                        .sweep_interval_ms
                        .unwrap_or(DEFAULT_SWEEP_INTERVAL_MS)
                        .max(1),
                ),
            },
            session: SessionConfig {
                abandon_grace: Duration::from_millis(
                    session.abandon_grace_ms.unwrap_or(DEFAULT_ABANDON_GRACE_MS),
                ),
            },
            export: ExportConfig {
                endpoint: export.endpoint.filter(|url| !url.trim().is_empty()),
                queue_capacity: export
                    .queue_capacity
                    .unwrap_or(DEFAULT_EXPORT_QUEUE_CAPACITY)
                    .max(1),
                concurrency: export
                    .concurrency
                    .unwrap_or(DEFAULT_EXPORT_CONCURRENCY)
                    .max(1),
                max_attempts: export
                    .max_attempts
                    .unwrap_or(DEFAULT_EXPORT_MAX_ATTEMPTS)
                    .max(1),
                initial_backoff: Duration::from_millis(
                    export
                        .initial_backoff_ms
                        .unwrap_or(DEFAULT_EXPORT_INITIAL_BACKOFF_MS),
                ),
                max_backoff: Duration::from_millis(
                    export.max_backoff_ms.unwrap_or(DEFAULT_EXPORT_MAX_BACKOFF_MS),
                ),
                rating_delta: export.rating_delta.unwrap_or(DEFAULT_RATING_DELTA),
            },
            auth: AuthConfig {
                jwt_secret: auth.jwt_secret.filter(|s| !s.is_empty()),
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let config = AppConfig::default();
        assert_eq!(config.matchmaking.default_time_control, "10+0");
        assert_eq!(config.matchmaking.default_game_type, GameType::Standard);
        assert_eq!(config.matchmaking.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.export.rating_delta, 16);
        assert!(config.export.endpoint.is_none());
        assert!(config.auth.jwt_secret.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"matchmaking": {"default_game_type": "voice", "sweep_interval_ms": 250},
                "export": {"endpoint": "http://history.local/games", "max_attempts": 0}}"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.matchmaking.default_game_type, GameType::Voice);
        assert_eq!(
            config.matchmaking.sweep_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.matchmaking.default_time_control, "10+0");
        assert_eq!(
            config.export.endpoint.as_deref(),
            Some("http://history.local/games")
        );
        assert_eq!(config.export.max_attempts, 1);
    }

    #[test]
    fn debug_output_hides_secret() {
        let auth = AuthConfig {
            jwt_secret: Some("hunter2".into()),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
