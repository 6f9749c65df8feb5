use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use octofhir_realtime::{AuthError, TokenProvider};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Stored credentials: a fixed bearer token or an OAuth client registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoredCredentials {
    #[serde(rename = "bearer")]
    Bearer {
        endpoint: String,
        access_token: String,
    },
    #[serde(rename = "client_credentials")]
    ClientCredentials {
        endpoint: String,
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
    },
}

impl StoredCredentials {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Bearer { endpoint, .. } | Self::ClientCredentials { endpoint, .. } => endpoint,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            Self::Bearer { access_token, .. } => Some(access_token),
            Self::ClientCredentials { access_token, .. } => access_token.as_deref(),
        }
    }

    /// Provider able to mint new tokens, if these credentials allow it.
    pub fn token_provider(&self) -> Option<ClientCredentialsProvider> {
        match self {
            Self::Bearer { .. } => None,
            Self::ClientCredentials {
                token_url,
                client_id,
                client_secret,
                ..
            } => Some(ClientCredentialsProvider::new(
                token_url.clone(),
                client_id.clone(),
                client_secret.clone(),
            )),
        }
    }
}

fn creds_path(profile: &str) -> Result<PathBuf> {
    Ok(crate::config::config_dir()?.join(format!("live-credentials.{profile}.json")))
}

pub fn load_credentials(profile: &str) -> Result<Option<StoredCredentials>> {
    let path = creds_path(profile)?;
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let creds: StoredCredentials = serde_json::from_str(&content)
        .with_context(|| format!("Invalid credentials file {}", path.display()))?;
    Ok(Some(creds))
}

pub fn save_credentials(profile: &str, creds: &StoredCredentials) -> Result<()> {
    let path = creds_path(profile)?;
    let content = serde_json::to_string_pretty(creds)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn remove_credentials(profile: &str) -> Result<bool> {
    let path = creds_path(profile)?;
    if path.exists() {
        fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// First and last characters of a token, for display.
pub fn token_preview(token: &str) -> String {
    if token.len() > 20 && token.is_ascii() {
        format!("{}...{}", &token[..8], &token[token.len() - 8..])
    } else {
        "*".repeat(token.chars().count().min(8))
    }
}

// --- OAuth client_credentials grant ---

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Token provider backed by the OAuth `client_credentials` grant.
///
/// Used both by `login` and by the realtime client when the server reports
/// `AUTH_FAILED` or `TOKEN_EXPIRED`.
pub struct ClientCredentialsProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentialsProvider {
    pub fn new(token_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url,
            client_id,
            client_secret,
        }
    }

    pub async fn request_token(&self) -> Result<TokenResponse> {
        let resp = self
            .http
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(client_credentials_body(&self.client_id, &self.client_secret))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OAuth token request failed (HTTP {status}): {body}");
        }

        resp.json().await.context("Failed to parse token response")
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn fetch_token(&self) -> Result<String, AuthError> {
        debug!(token_url = %self.token_url, "Requesting access token");
        match self.request_token().await {
            Ok(resp) => Ok(resp.access_token),
            Err(e) => {
                warn!(error = %e, "Access token request failed");
                Err(AuthError::provider(format!("{e:#}")))
            }
        }
    }
}

fn client_credentials_body(client_id: &str, client_secret: &str) -> String {
    format!(
        "grant_type=client_credentials&client_id={}&client_secret={}",
        urlencoding(client_id),
        urlencoding(client_secret),
    )
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
