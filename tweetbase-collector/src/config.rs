use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "tweetbase.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    pub rest_base_url: String,
    pub stream_base_url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    pub timeout_secs: u64,
}

/// Quota and pacing knobs for the REST client
#[derive(Debug, Clone, Deserialize)]
pub struct RestSettings {
    /// Calls are held back once fewer than this many remain in the window
    pub safety_margin: u32,
    pub pacing_millis: u64,
}

impl RestSettings {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_millis)
    }
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            safety_margin: 5,
            pacing_millis: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    /// Longest silence tolerated on an open stream before it counts as a network fault
    pub stall_timeout_secs: u64,
}

impl StreamSettings {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub api: ApiSettings,
    pub rest: RestSettings,
    pub stream: StreamSettings,
}

impl Settings {
    /// Defaults, then `tweetbase.toml` in the working directory, then environment
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file(PathBuf::from(CONFIG_FILE_NAME))
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("database.path", "tweets.db")?
            .set_default("api.rest_base_url", "https://api.twitter.com/1.1")?
            .set_default("api.stream_base_url", "https://stream.twitter.com/1.1")?
            .set_default("api.timeout_secs", 30)?
            .set_default("rest.safety_margin", 5)?
            .set_default("rest.pacing_millis", 1000)?
            .set_default("stream.stall_timeout_secs", 90)?;

        if path.exists() {
            builder = builder.add_source(File::from(path).required(false));
        }

        if let Ok(db_path) = std::env::var("DATABASE_PATH") {
            builder = builder.set_override("database.path", db_path)?;
        }
        if let Ok(token) = std::env::var("TWEETBASE_TOKEN") {
            builder = builder.set_override("api.bearer_token", token)?;
        }

        builder.build()?.try_deserialize()
    }
}
