use feedsync_common::{
    identity::{IdentityKey, MemoryIdentityStore},
    model::auth::ApiToken,
    util::{NonPositiveDurationError, PositiveDuration},
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const ENV_PREFIX: &str = "FEEDSYNC_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("{name}: {source}")]
    Duration {
        name: &'static str,
        #[source]
        source: NonPositiveDurationError,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Everything the engine reads from `FEEDSYNC_*` environment variables.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct FeedConfig {
    pub api_base_url: Url,
    pub push_url: Url,
    #[serde(default)]
    pub api_token: Option<ApiToken>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_cached_posts")]
    pub max_cached_posts: usize,
    #[serde(default = "default_upload_confirmation_timeout_secs")]
    pub upload_confirmation_timeout_secs: u64,
    #[serde(default = "default_new_content_debounce_ms")]
    pub new_content_debounce_ms: u64,
    #[serde(default = "default_new_content_auto_hide_secs")]
    pub new_content_auto_hide_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_push_reconnect_attempts")]
    pub push_reconnect_attempts: u32,
    #[serde(default = "default_push_reconnect_base_delay_ms")]
    pub push_reconnect_base_delay_ms: u64,
}

fn default_role() -> String {
    "member".into()
}

fn default_page_size() -> u32 {
    10
}

fn default_max_cached_posts() -> usize {
    100
}

fn default_upload_confirmation_timeout_secs() -> u64 {
    60
}

fn default_new_content_debounce_ms() -> u64 {
    1_500
}

fn default_new_content_auto_hide_secs() -> u64 {
    8
}

fn default_progress_interval_ms() -> u64 {
    100
}

fn default_push_reconnect_attempts() -> u32 {
    8
}

fn default_push_reconnect_base_delay_ms() -> u64 {
    500
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct FeedSettings {
    pub role: String,
    pub page_size: u32,
    pub max_cached_posts: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            role: default_role(),
            page_size: default_page_size(),
            max_cached_posts: default_max_cached_posts(),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct UploadSettings {
    pub confirmation_timeout: PositiveDuration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout: PositiveDuration::new_unchecked(Duration::from_secs(
                default_upload_confirmation_timeout_secs(),
            )),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct RealtimeSettings {
    pub debounce: PositiveDuration,
    pub auto_hide: PositiveDuration,
    pub reconnect_attempts: u32,
    pub reconnect_base_delay: PositiveDuration,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            debounce: PositiveDuration::new_unchecked(Duration::from_millis(
                default_new_content_debounce_ms(),
            )),
            auto_hide: PositiveDuration::new_unchecked(Duration::from_secs(
                default_new_content_auto_hide_secs(),
            )),
            reconnect_attempts: default_push_reconnect_attempts(),
            reconnect_base_delay: PositiveDuration::new_unchecked(Duration::from_millis(
                default_push_reconnect_base_delay_ms(),
            )),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct PlaybackSettings {
    pub progress_interval: PositiveDuration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            progress_interval: PositiveDuration::new_unchecked(Duration::from_millis(
                default_progress_interval_ms(),
            )),
        }
    }
}

fn positive(name: &'static str, duration: Duration) -> Result<PositiveDuration, ConfigError> {
    PositiveDuration::try_from(duration).map_err(|source| ConfigError::Duration { name, source })
}

impl FeedConfig {
    /// Reads an optional `.env` file and then the prefixed environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if e.not_found() {
                debug!("No .env file found");
            } else {
                return Err(e.into());
            }
        }

        Ok(envy::prefixed(ENV_PREFIX).from_env()?)
    }

    pub fn feed_settings(&self) -> Result<FeedSettings, ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Zero("page_size"));
        }
        if self.max_cached_posts == 0 {
            return Err(ConfigError::Zero("max_cached_posts"));
        }

        Ok(FeedSettings {
            role: self.role.clone(),
            page_size: self.page_size,
            max_cached_posts: self.max_cached_posts,
        })
    }

    pub fn upload_settings(&self) -> Result<UploadSettings, ConfigError> {
        Ok(UploadSettings {
            confirmation_timeout: positive(
                "upload_confirmation_timeout_secs",
                Duration::from_secs(self.upload_confirmation_timeout_secs),
            )?,
        })
    }

    pub fn realtime_settings(&self) -> Result<RealtimeSettings, ConfigError> {
        Ok(RealtimeSettings {
            debounce: positive(
                "new_content_debounce_ms",
                Duration::from_millis(self.new_content_debounce_ms),
            )?,
            auto_hide: positive(
                "new_content_auto_hide_secs",
                Duration::from_secs(self.new_content_auto_hide_secs),
            )?,
            reconnect_attempts: self.push_reconnect_attempts,
            reconnect_base_delay: positive(
                "push_reconnect_base_delay_ms",
                Duration::from_millis(self.push_reconnect_base_delay_ms),
            )?,
        })
    }

    pub fn playback_settings(&self) -> Result<PlaybackSettings, ConfigError> {
        Ok(PlaybackSettings {
            progress_interval: positive(
                "progress_interval_ms",
                Duration::from_millis(self.progress_interval_ms),
            )?,
        })
    }

    /// Identity store seeded from `FEEDSYNC_USER_ID` / `FEEDSYNC_WORKSPACE_ID`.
    #[must_use]
    pub fn identity_store(&self) -> MemoryIdentityStore {
        let store = MemoryIdentityStore::new();
        if let Some(user_id) = &self.user_id {
            store.set(IdentityKey::CurrentUserId, user_id.clone());
        }
        if let Some(workspace_id) = &self.workspace_id {
            store.set(IdentityKey::WorkspaceId, workspace_id.clone());
        }
        store
    }
}
