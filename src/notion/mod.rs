use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config;

pub mod blocks;
pub mod http;

pub use http::RetryingClient;

pub const NOTION_API_BASE: &str = "https://api.notion.com/";

/// Descriptor of a created database. Stored verbatim as the database marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Database {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Descriptor of a created page. Stored verbatim as the object marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[async_trait]
pub trait NotionApi: Send + Sync {
    async fn create_database(&self, body: &Value) -> Result<Database>;

    async fn create_page(&self, body: &Value) -> Result<Page>;
}

/// Builds an authenticated API handle for a stored access token.
pub trait NotionConnector: Send + Sync {
    fn connect(&self, token: &str) -> Arc<dyn NotionApi>;
}

#[derive(Clone)]
pub struct NotionClient {
    http: RetryingClient,
    base_url: Url,
    token: String,
    version: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn new(http: RetryingClient, base_url: Url, token: String, version: String) -> Self {
        Self {
            http,
            base_url,
            token,
            version,
        }
    }

    pub fn build_request(&self, path: &str, body: &Value) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid Notion base URL")?;
        self.http
            .inner()
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version)
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build Notion request")
    }

    async fn execute_create(&self, path: &str, body: &Value) -> Result<CreatedObject> {
        let request = self.build_request(path, body)?;
        debug!(url = %request.url(), payload = %body, "notion request");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Notion")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by Notion: {}", body);
            return Err(anyhow!("received 429 from Notion: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "Notion API error");
            return Err(anyhow!("notion error {}: {}", status, body));
        }

        let response_body = res.text().await.context("failed to read Notion response")?;
        let created: CreatedObject =
            serde_json::from_str(&response_body).context("invalid Notion response JSON")?;
        debug!(id = %created.id, "notion object created");
        Ok(created)
    }
}

#[async_trait]
impl NotionApi for NotionClient {
    async fn create_database(&self, body: &Value) -> Result<Database> {
        let created = self.execute_create("v1/databases", body).await?;
        Ok(Database {
            id: created.id,
            url: created.url,
        })
    }

    async fn create_page(&self, body: &Value) -> Result<Page> {
        let created = self.execute_create("v1/pages", body).await?;
        Ok(Page {
            id: created.id,
            url: created.url,
        })
    }
}

/// Hands out [`NotionClient`]s that share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: RetryingClient,
    base_url: Url,
    version: String,
}

impl HttpConnector {
    pub fn new(http: RetryingClient, base_url: Url, version: String) -> Self {
        Self {
            http,
            base_url,
            version,
        }
    }

    pub fn from_config(notion: &config::Notion, http: &config::Http) -> Result<Self> {
        let base_url = Url::parse(&notion.api_base).context("invalid notion.api_base")?;
        Ok(Self::new(
            RetryingClient::from_config(http)?,
            base_url,
            notion.version.clone(),
        ))
    }
}

impl NotionConnector for HttpConnector {
    fn connect(&self, token: &str) -> Arc<dyn NotionApi> {
        Arc::new(NotionClient::new(
            self.http.clone(),
            self.base_url.clone(),
            token.to_string(),
            self.version.clone(),
        ))
    }
}

#[derive(Deserialize)]
struct CreatedObject {
    id: String,
    #[serde(default)]
    url: Option<String>,
}
