//! Usage HTTP client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::error::{UsageError, UsageResult};
use super::types::{SubscriptionUsage, normalize_windows};

/// Client for the subscription usage API.
#[derive(Debug, Clone)]
pub struct UsageClient {
    client: Client,
    api_url: String,
    credentials_path: PathBuf,
}

/// Shape of the credentials file on disk.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    oauth: Option<OauthCredentials>,
}

#[derive(Debug, Deserialize)]
struct OauthCredentials {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

impl UsageClient {
    pub fn new(api_url: impl Into<String>, credentials_path: impl Into<PathBuf>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_url: api_url.into(),
            credentials_path: credentials_path.into(),
        }
    }

    /// Fetch and normalize the account's usage windows.
    pub async fn fetch(&self) -> UsageResult<SubscriptionUsage> {
        let token = read_access_token(&self.credentials_path).await?;

        let response = self
            .client
            .get(&self.api_url)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UsageError::ApiStatus(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| UsageError::Parse(e.to_string()))?;
        Ok(normalize_windows(&body))
    }
}

/// Read the OAuth access token from the credentials file.
async fn read_access_token(path: &Path) -> UsageResult<String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| UsageError::Credentials(format!("{}: {e}", path.display())))?;

    let parsed: CredentialsFile = serde_json::from_str(&contents)
        .map_err(|e| UsageError::Credentials(format!("invalid credentials file: {e}")))?;

    parsed
        .oauth
        .and_then(|o| o.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| UsageError::Credentials("no access token in credentials file".to_string()))
}
