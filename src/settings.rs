use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use strum::Display;

static SETTINGS: OnceLock<Settings> = OnceLock::new();

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub feed: Feed,
    pub store: Store,
    pub rest: Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Feed {
    pub fetch_limit: usize,
    pub max_post_length: usize,
    pub max_comment_length: usize,
    pub on_aux_failure: AuxFailurePolicy,
}

/// What a feed load does when the like/comment reads fail but posts arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxFailurePolicy {
    #[default]
    #[strum(serialize = "abort")]
    Abort,
    #[strum(serialize = "zero-counts")]
    ZeroCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub request_timeout_ms: u64,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rest {
    pub schema_path: String,
}

impl Default for Feed {
    fn default() -> Self {
        Self {
            fetch_limit: 50,
            max_post_length: 500,
            max_comment_length: 500,
            on_aux_failure: AuxFailurePolicy::Abort,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            pool_size: 5,
            busy_timeout_ms: 2000,
        }
    }
}

impl Default for Rest {
    fn default() -> Self {
        Self {
            schema_path: "rest/v1".to_string(),
        }
    }
}

impl Store {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Settings {
    pub fn load() -> &'static Settings {
        SETTINGS.get_or_init(Self::load_from_files)
    }

    fn load_from_files() -> Settings {
        let default_path = Path::new("settings.default.ron");
        let override_path = Path::new("settings.ron");

        let mut settings = if default_path.exists() {
            fs::read_to_string(default_path)
                .ok()
                .and_then(|content| ron::from_str(&content).ok())
                .unwrap_or_default()
        } else {
            Settings::default()
        };

        if override_path.exists() {
            if let Ok(content) = fs::read_to_string(override_path) {
                if let Ok(overrides) = ron::from_str::<Settings>(&content) {
                    settings = overrides;
                }
            }
        }

        settings
    }
}

pub fn settings() -> &'static Settings {
    Settings::load()
}
