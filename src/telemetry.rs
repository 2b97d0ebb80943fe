//! Search-count telemetry. Each search term maps to one remote document whose
//! `count` is bumped every time a search for it returns results.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

use crate::models::Movie;
use crate::tmdb::poster_url;

#[async_trait]
pub trait SearchTelemetry: Send + Sync {
    async fn record_search(&self, query: &str, top_result: &Movie) -> Result<()>;
    async fn trending(&self, limit: usize) -> Result<Vec<TrendingSearch>>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrendingSearch {
    #[serde(rename = "searchTerm")]
    pub search_term: String,
    pub movie_id: i32,
    pub title: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub poster_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

#[async_trait]
impl SearchTelemetry for NoopTelemetry {
    async fn record_search(&self, _query: &str, _top_result: &Movie) -> Result<()> {
        Ok(())
    }

    async fn trending(&self, _limit: usize) -> Result<Vec<TrendingSearch>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct AppwriteConfig {
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub collection_id: String,
    pub api_key: String,
}

impl AppwriteConfig {
    /// `None` unless every Appwrite variable is set and non-empty.
    pub fn from_env() -> Option<Self> {
        let var = |k: &str| env::var(k).ok().filter(|v| !v.trim().is_empty());
        Some(Self {
            endpoint: var("APPWRITE_ENDPOINT")?,
            project_id: var("APPWRITE_PROJECT_ID")?,
            database_id: var("APPWRITE_DATABASE_ID")?,
            collection_id: var("APPWRITE_COLLECTION_ID")?,
            api_key: var("APPWRITE_API_KEY")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppwriteTelemetry {
    client: Client,
    config: AppwriteConfig,
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<Value>,
}

impl AppwriteTelemetry {
    pub fn new(config: AppwriteConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build Appwrite HTTP client")?;
        Ok(Self { client, config })
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.config.endpoint.trim_end_matches('/'),
            self.config.database_id,
            self.config.collection_id
        )
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("X-Appwrite-Project", &self.config.project_id)
            .header("X-Appwrite-Key", &self.config.api_key)
    }

    async fn send_json(&self, req: RequestBuilder, what: &str) -> Result<Value> {
        let res = self
            .authed(req)
            .send()
            .await
            .with_context(|| format!("Appwrite {what} request failed"))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .with_context(|| format!("Failed to read Appwrite {what} body"))?;
        if !status.is_success() {
            return Err(anyhow!(
                "Appwrite {} HTTP error (status {}): {}",
                what,
                status,
                String::from_utf8_lossy(&bytes)
            ));
        }
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse Appwrite {what} JSON"))
    }

    async fn list(&self, queries: &[Value]) -> Result<Vec<Value>> {
        let params: Vec<(&str, String)> = queries
            .iter()
            .map(|q| ("queries[]", q.to_string()))
            .collect();
        let req = self.client.get(self.documents_url()).query(&params);
        let value = self.send_json(req, "list").await?;
        let list: DocumentList =
            serde_json::from_value(value).context("Unexpected Appwrite list shape")?;
        Ok(list.documents)
    }
}

#[async_trait]
impl SearchTelemetry for AppwriteTelemetry {
    async fn record_search(&self, query: &str, top_result: &Movie) -> Result<()> {
        let existing = self.list(&[equal_query("searchTerm", query)]).await?;
        match next_count(existing.first())? {
            Some((doc_id, count)) => {
                let req = self
                    .client
                    .patch(format!("{}/{}", self.documents_url(), doc_id))
                    .json(&json!({ "data": { "count": count } }));
                self.send_json(req, "update").await?;
                tracing::debug!("Search '{}' count now {}", query, count);
            }
            None => {
                let req = self
                    .client
                    .post(self.documents_url())
                    .json(&new_document(query, top_result));
                self.send_json(req, "create").await?;
                tracing::debug!("Recorded first search for '{}'", query);
            }
        }
        Ok(())
    }

    async fn trending(&self, limit: usize) -> Result<Vec<TrendingSearch>> {
        let docs = self
            .list(&[
                json!({ "method": "limit", "values": [limit] }),
                json!({ "method": "orderDesc", "attribute": "count" }),
            ])
            .await?;
        docs.into_iter()
            .map(|d| serde_json::from_value(d).context("Unexpected trending document shape"))
            .collect()
    }
}

/// Document id and bumped count for an existing search-term document, or
/// `None` when a new document has to be created.
fn next_count(existing: Option<&Value>) -> Result<Option<(String, u64)>> {
    let Some(doc) = existing else {
        return Ok(None);
    };
    let doc_id = doc
        .get("$id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Appwrite document without $id"))?;
    let count = doc.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
    Ok(Some((doc_id.to_string(), count + 1)))
}

fn equal_query(attribute: &str, value: &str) -> Value {
    json!({ "method": "equal", "attribute": attribute, "values": [value] })
}

fn new_document(query: &str, top_result: &Movie) -> Value {
    json!({
        "documentId": "unique()",
        "data": {
            "searchTerm": query,
            "movie_id": top_result.id,
            "title": top_result.title,
            "count": 1,
            "poster_url": poster_url(top_result.poster_path.as_deref()),
        }
    })
}
