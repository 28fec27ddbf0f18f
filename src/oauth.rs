//! Notion OAuth: authorize link and authorization-code exchange.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::config;

pub const AUTHORIZE_URL: &str = "https://api.notion.com/v1/oauth/authorize";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint returned {0}: {1}")]
    Status(u16, String),
    #[error("token response is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("token response carried no access token")]
    MissingToken,
    #[error("token response carried no bot id")]
    MissingBotId,
    #[error("no parent page: share a page with the integration or configure notion.default_parent_page_id")]
    MissingParentPage,
}

/// Link that starts the OAuth flow for the configured integration.
pub fn authorize_url(client_id: &str, redirect_uri: &str) -> String {
    Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("owner", "user"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
        ],
    )
    .map(String::from)
    .unwrap_or_else(|_| AUTHORIZE_URL.to_string())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OAuthGrant<'a> {
    pub grant_type: &'a str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
}

impl<'a> OAuthGrant<'a> {
    pub fn authorization_code(code: &'a str, redirect_uri: &'a str) -> Self {
        Self {
            grant_type: "authorization_code",
            code,
            redirect_uri,
        }
    }
}

#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
pub struct OAuthAccessToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub workspace_name: Option<String>,
    #[serde(default)]
    pub workspace_icon: Option<String>,
    #[serde(default)]
    pub bot_id: String,
    #[serde(default)]
    pub duplicated_template_id: Option<String>,
}

impl fmt::Debug for OAuthAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthAccessToken")
            .field("workspace_id", &self.workspace_id)
            .field("workspace_name", &self.workspace_name)
            .field("bot_id", &self.bot_id)
            .field("duplicated_template_id", &self.duplicated_template_id)
            .finish_non_exhaustive()
    }
}

impl OAuthAccessToken {
    /// Reject responses the rest of the flow cannot use.
    pub fn validate(self) -> Result<Self, OAuthError> {
        if self.access_token.is_empty() {
            return Err(OAuthError::MissingToken);
        }
        if self.bot_id.is_empty() {
            return Err(OAuthError::MissingBotId);
        }
        Ok(self)
    }
}

/// The page that receives the databases: the template page Notion duplicated
/// during authorization, else the configured fallback.
pub fn resolve_parent_page(
    token: &OAuthAccessToken,
    fallback: Option<&str>,
) -> Result<String, OAuthError> {
    token
        .duplicated_template_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or(fallback.filter(|id| !id.is_empty()))
        .map(str::to_string)
        .ok_or(OAuthError::MissingParentPage)
}

#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, code: &str) -> Result<OAuthAccessToken, OAuthError>;
}

#[derive(Clone)]
pub struct NotionOAuth {
    http: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl fmt::Debug for NotionOAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionOAuth")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl NotionOAuth {
    pub fn new(http: Client, cfg: &config::Notion) -> anyhow::Result<Self> {
        let token_url = Url::parse(&cfg.api_base)?.join("v1/oauth/token")?;
        Ok(Self {
            http,
            token_url,
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            redirect_uri: cfg.redirect_uri.clone(),
        })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    pub fn build_request(&self, code: &str) -> Result<reqwest::Request, OAuthError> {
        let grant = OAuthGrant::authorization_code(code, &self.redirect_uri);
        Ok(self
            .http
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json")
            .json(&grant)
            .build()?)
    }
}

#[async_trait]
impl TokenExchange for NotionOAuth {
    async fn exchange(&self, code: &str) -> Result<OAuthAccessToken, OAuthError> {
        let request = self.build_request(code)?;
        info!("requesting token from Notion");
        let res = self.http.execute(request).await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            warn!(%status, %body, "token exchange rejected");
            return Err(OAuthError::Status(status.as_u16(), body));
        }
        let token: OAuthAccessToken = serde_json::from_str(&body).map_err(OAuthError::Decode)?;
        let token = token.validate()?;
        info!(bot_id = %token.bot_id, workspace = ?token.workspace_name, "token received from Notion");
        Ok(token)
    }
}
