// ABOUTME: HTTP client for the destination provider's management API
// ABOUTME: Lists the projects the authenticated account can migrate into

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::models::{ApiError, Project};
use crate::error::{MigratorError, Result};

pub struct ManagementClient {
    client: Client,
    api_base_url: String,
    access_token: String,
}

impl ManagementClient {
    pub fn new(api_base_url: &str, access_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MigratorError::Api(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let url = format!("{}/v1/projects", self.api_base_url);
        debug!("Listing projects from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| {
                MigratorError::Api(format!(
                    "failed to list projects: {}. The management API may be unavailable",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(body);
            return Err(MigratorError::Api(format!(
                "listing projects failed with status {}: {}",
                status, message
            )));
        }

        let projects: Vec<Project> = response
            .json()
            .await
            .map_err(|e| MigratorError::Api(format!("failed to parse project list: {}", e)))?;

        Ok(projects)
    }
}
