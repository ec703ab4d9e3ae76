use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::LookupConfig;

/// Profile returned by the user-lookup service
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LookupRecord {
    #[serde(default)]
    pub uid: Option<serde_json::Value>,
    #[serde(default)]
    pub name: Option<String>,
    /// Public profile handle on the service
    #[serde(default)]
    pub grub: Option<String>,
    #[serde(default)]
    pub tariff: Option<String>,
}

#[derive(Serialize)]
struct LookupRequest {
    telegram: u64,
}

/// Client for the external user-lookup HTTP service
pub struct UserLookup {
    client: reqwest::Client,
    config: LookupConfig,
}

impl UserLookup {
    pub fn new(config: LookupConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build lookup HTTP client")?;
        info!("User lookup configured: url={}", config.url);
        Ok(Self { client, config })
    }

    /// `Ok(None)` means the service does not know this user
    pub async fn lookup(&self, user_id: u64) -> Result<Option<LookupRecord>> {
        let response = self
            .client
            .post(&self.config.url)
            .header("X-Support-Secret", &self.config.secret)
            .json(&LookupRequest { telegram: user_id })
            .send()
            .await
            .context("Lookup request failed")?;

        match response.status() {
            StatusCode::OK => {
                let record: LookupRecord = response
                    .json()
                    .await
                    .context("Failed to parse lookup response")?;
                info!(
                    user_id,
                    uid = %display_uid(&record),
                    grub = record.grub.as_deref().unwrap_or(""),
                    "Lookup found user"
                );
                Ok(Some(record))
            }
            StatusCode::NOT_FOUND => {
                info!(user_id, "Lookup: user not found");
                Ok(None)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Lookup service returned {}: {}", status, body)
            }
        }
    }

    pub fn profile_base_url(&self) -> &str {
        self.config.profile_base_url.trim_end_matches('/')
    }
}

fn display_uid(record: &LookupRecord) -> String {
    match &record.uid {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "—".to_string(),
    }
}

/// Text of the info card posted at the top of a new topic
pub fn format_user_card(
    record: Option<&LookupRecord>,
    username: Option<&str>,
    profile_base_url: &str,
) -> String {
    let username = username.filter(|u| !u.is_empty());

    let Some(record) = record else {
        let mut parts = vec!["⚠️ USER NOT FOUND IN LOOKUP SERVICE".to_string()];
        if let Some(username) = username {
            parts.push(format!("@{username}"));
        }
        return parts.join("\n");
    };

    let uid = display_uid(record);
    let mut lines = vec![
        format!("UID: {uid}"),
        record.name.clone().unwrap_or_else(|| "—".to_string()),
    ];
    if let Some(username) = username {
        lines.push(format!("@{username}"));
    }
    if let Some(grub) = record.grub.as_deref().filter(|g| !g.is_empty()) {
        lines.push(format!("{profile_base_url}/{grub}"));
        lines.push(format!("{profile_base_url}/app?as_user={uid}"));
    }
    lines.push(format!(
        "Tariff: {}",
        record.tariff.as_deref().unwrap_or("—")
    ));
    lines.join("\n")
}
