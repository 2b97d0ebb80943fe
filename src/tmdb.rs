use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::{Movie, MovieDetail};

const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const POSTER_BASE: &str = "https://image.tmdb.org/t/p/w500";

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn search_movies(&self, query: &str) -> Result<Vec<Movie>>;
    async fn popular_movies(&self) -> Result<Vec<Movie>>;
    async fn movie_details(&self, id: i32) -> Result<MovieDetail>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MovieList {
    #[serde(default)]
    results: Vec<Movie>,
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let user_agent = format!("cinelist/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: TMDB_BASE.to_string(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
        Self::new(api_key)
    }

    /// Points the client at another host, e.g. a local mock.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let res = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .with_context(|| format!("TMDB request failed: {}", redact(url)))?;
        let status = res.status();
        let bytes = res.bytes().await.context("Failed to read TMDB body")?;
        decode_response(status, &bytes)
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search/movie?api_key={}&query={}&language=en-US",
            self.base_url,
            self.api_key,
            urlencoding::encode(query.trim())
        )
    }

    fn popular_url(&self) -> String {
        format!(
            "{}/discover/movie?api_key={}&sort_by=popularity.desc&language=en-US",
            self.base_url, self.api_key
        )
    }

    fn details_url(&self, id: i32) -> String {
        format!(
            "{}/movie/{id}?api_key={}&language=en-US",
            self.base_url, self.api_key
        )
    }
}

fn decode_response<T: for<'de> Deserialize<'de>>(status: StatusCode, bytes: &[u8]) -> Result<T> {
    if !status.is_success() {
        return Err(anyhow!(
            "TMDB HTTP error (status {}): {}",
            status,
            String::from_utf8_lossy(bytes)
        ));
    }
    serde_json::from_slice(bytes).context("Failed to parse TMDB JSON")
}

#[async_trait]
impl CatalogApi for TmdbClient {
    async fn search_movies(&self, query: &str) -> Result<Vec<Movie>> {
        let data: MovieList = self.get_json(&self.search_url(query)).await?;
        Ok(data.results)
    }

    async fn popular_movies(&self) -> Result<Vec<Movie>> {
        let data: MovieList = self.get_json(&self.popular_url()).await?;
        Ok(data.results)
    }

    async fn movie_details(&self, id: i32) -> Result<MovieDetail> {
        self.get_json(&self.details_url(id))
            .await
            .with_context(|| format!("Failed to fetch TMDB movie {id}"))
    }
}

pub fn poster_url(path: Option<&str>) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("{POSTER_BASE}{p}"))
}

/// Accepts a bare TMDB id or a themoviedb.org movie URL.
pub fn parse_tmdb_id(input: &str) -> Option<i32> {
    let trimmed = input.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse().ok();
    }
    let rest = trimmed.split("/movie/").nth(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn redact(url: &str) -> String {
    match url.split_once("api_key=") {
        Some((head, tail)) => {
            let rest = tail.split_once('&').map(|(_, r)| r).unwrap_or("");
            if rest.is_empty() {
                format!("{head}api_key=***")
            } else {
                format!("{head}api_key=***&{rest}")
            }
        }
        None => url.to_string(),
    }
}
