// ABOUTME: Runtime settings loaded from an optional TOML file
// ABOUTME: Every field has a default matching the hosted Supabase/PlanetScale setup

use serde::Deserialize;
use std::path::Path;

use crate::error::{MigratorError, Result};

pub const DEFAULT_WEBSITE_URL: &str = "https://supamigrate.vercel.app";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the hosted relay that brokers the OAuth redirect.
    pub website_url: Option<String>,
    pub destination: DestinationRules,
    pub oauth: OAuthSettings,
    pub container: ContainerSettings,
    pub options: BatchSettings,
}

/// Rules the destination URI must satisfy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DestinationRules {
    pub pooler_domain: String,
    pub pooled_port: u16,
    pub direct_port: u16,
    pub schema: String,
}

impl Default for DestinationRules {
    fn default() -> Self {
        Self {
            pooler_domain: "pooler.supabase.com".to_string(),
            pooled_port: 6543,
            direct_port: 5432,
            schema: "public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// The hosted website exchanges the code and forwards tokens to the listener.
    #[default]
    Relay,
    /// The CLI exchanges the code itself using its PKCE verifier.
    Direct,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub mode: AuthMode,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub api_url: String,
    pub scope: String,
    pub callback_port: u16,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            mode: AuthMode::Relay,
            client_id: String::new(),
            client_secret: None,
            authorize_url: "https://api.supabase.com/v1/oauth/authorize".to_string(),
            token_url: "https://api.supabase.com/v1/oauth/token".to_string(),
            api_url: "https://api.supabase.com".to_string(),
            scope: "all".to_string(),
            callback_port: 3434,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    pub runtime: String,
    pub image: String,
    pub platform: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "ghcr.io/dimitri/pgloader:latest".to_string(),
            platform: "linux/amd64".to_string(),
        }
    }
}

/// Optional pgloader batching controls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub batch_rows: Option<u64>,
    /// pgloader size literal, e.g. `20MB`.
    pub batch_size: Option<String>,
    pub prefetch_rows: Option<u64>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MigratorError::Settings(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| MigratorError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Explicit override wins over the file, the file wins over the default.
    pub fn with_website_url(mut self, url: Option<String>) -> Self {
        if url.is_some() {
            self.website_url = url;
        }
        self
    }

    pub fn website_url(&self) -> &str {
        self.website_url.as_deref().unwrap_or(DEFAULT_WEBSITE_URL)
    }

    fn validate(&self) -> Result<()> {
        if self.destination.pooler_domain.is_empty() {
            return Err(MigratorError::Settings(
                "destination.pooler_domain must not be empty".to_string(),
            ));
        }
        if self.oauth.mode == AuthMode::Direct && self.oauth.client_id.is_empty() {
            return Err(MigratorError::Settings(
                "oauth.client_id is required when oauth.mode = \"direct\"".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.website_url(), DEFAULT_WEBSITE_URL);
        assert_eq!(settings.destination.pooled_port, 6543);
        assert_eq!(settings.destination.direct_port, 5432);
        assert_eq!(settings.oauth.callback_port, 3434);
        assert_eq!(settings.oauth.mode, AuthMode::Relay);
        assert_eq!(settings.container.platform, "linux/amd64");
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::from_toml(
            r#"
            website_url = "http://localhost:3000"

            [destination]
            pooler_domain = "pooler.example.com"

            [options]
            batch_rows = 5000
            "#,
        )
        .unwrap();
        assert_eq!(settings.website_url(), "http://localhost:3000");
        assert_eq!(settings.destination.pooler_domain, "pooler.example.com");
        assert_eq!(settings.destination.schema, "public");
        assert_eq!(settings.options.batch_rows, Some(5000));
    }

    #[test]
    fn test_cli_override_wins() {
        let settings = Settings::from_toml("website_url = \"http://file\"")
            .unwrap()
            .with_website_url(Some("http://flag".to_string()));
        assert_eq!(settings.website_url(), "http://flag");

        let settings = Settings::default().with_website_url(None);
        assert_eq!(settings.website_url(), DEFAULT_WEBSITE_URL);
    }

    #[test]
    fn test_direct_mode_requires_client_id() {
        let result = Settings::from_toml("[oauth]\nmode = \"direct\"");
        assert!(matches!(result, Err(MigratorError::Settings(_))));
    }
}
