use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::search::DEFAULT_DEBOUNCE;
use crate::store::StoreOptions;
use crate::telemetry::AppwriteConfig;

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_api_key: String,
    pub data_dir: PathBuf,
    pub search_debounce: Duration,
    pub store: StoreOptions,
    pub appwrite: Option<AppwriteConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let tmdb_api_key = env::var("TMDB_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("Missing required environment variable: TMDB_API_KEY"))?;

        let data_dir = env::var("CINELIST_DATA_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let search_debounce = match env::var("SEARCH_DEBOUNCE_MS") {
            Ok(raw) => parse_millis(&raw).context("Invalid SEARCH_DEBOUNCE_MS")?,
            Err(_) => DEFAULT_DEBOUNCE,
        };

        let require_favorite_for_watched = match env::var("REQUIRE_FAVORITE_FOR_WATCHED") {
            Ok(raw) => parse_flag(&raw).context("Invalid REQUIRE_FAVORITE_FOR_WATCHED")?,
            Err(_) => false,
        };

        let appwrite = AppwriteConfig::from_env();
        if appwrite.is_some() {
            info!("Search telemetry enabled (Appwrite)");
        } else {
            info!("Search telemetry disabled: Appwrite variables not set");
        }

        Ok(Self {
            tmdb_api_key,
            data_dir,
            search_debounce,
            store: StoreOptions {
                require_favorite_for_watched,
            },
            appwrite,
        })
    }
}

fn parse_millis(raw: &str) -> Result<Duration> {
    let ms: u64 = raw.trim().parse()?;
    if ms == 0 {
        return Err(anyhow!("debounce must be positive"));
    }
    Ok(Duration::from_millis(ms))
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{}'", other)),
    }
}
