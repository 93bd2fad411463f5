// ABOUTME: Sequences a migration run from input validation to RLS hardening
// ABOUTME: Steps are strictly sequential and every failure aborts the run

use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{MigratorError, Result};
use crate::harden;
use crate::job::MigrationJobSpec;
use crate::migrate;
use crate::oauth::Authenticator;
use crate::process::ProcessRunner;
use crate::prompt::{ask, Prompter};
use crate::remote::ManagementClient;
use crate::select::{destination_uri, password_prompt, select_project};
use crate::settings::Settings;
use crate::uri::{normalize, ConnectionEndpoint, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub project_ref: Option<String>,
    pub dashboard_url: Option<String>,
}

pub struct Orchestrator {
    settings: Settings,
    prompter: Arc<dyn Prompter>,
    cancel: CancellationToken,
    runner: ProcessRunner,
    login: bool,
}

impl Orchestrator {
    /// `login` obtains the destination through OAuth instead of asking for a URI.
    pub fn new(
        settings: Settings,
        prompter: Arc<dyn Prompter>,
        cancel: CancellationToken,
        login: bool,
    ) -> Self {
        let runner = ProcessRunner::new(cancel.clone());
        Self {
            settings,
            prompter,
            cancel,
            runner,
            login,
        }
    }

    pub async fn run(&self) -> Result<MigrationReport> {
        migrate::ensure_available(&self.runner, &self.settings.container.runtime).await?;

        let source = self.source().await?;
        let destination = self.destination().await?;

        let spec = MigrationJobSpec::builder(source, destination)
            .schema_rename_target(self.settings.destination.schema.clone())
            .batching(&self.settings.options)
            .build();

        info!("Migrating data from PlanetScale to Supabase...");
        if !migrate::run_migration(&self.runner, &self.settings.container, &spec).await? {
            return Err(MigratorError::Interrupted);
        }

        harden::enable_row_level_security(spec.destination(), &self.settings.destination.schema)
            .await?;

        let project_ref = spec.destination().project_ref().map(str::to_string);
        let dashboard_url = project_ref
            .as_ref()
            .map(|r| format!("https://supabase.com/dashboard/project/{}/editor", r));
        Ok(MigrationReport {
            project_ref,
            dashboard_url,
        })
    }

    async fn source(&self) -> Result<ConnectionEndpoint> {
        let raw = ask(&self.prompter, &self.cancel, |p| {
            p.text("What is your PlanetScale connection URI?", "mysql://")
        })
        .await?;
        let endpoint = normalize(&raw, Role::Source, &self.settings.destination)?;
        info!("Source: {}", endpoint.redacted());
        Ok(endpoint)
    }

    async fn destination(&self) -> Result<ConnectionEndpoint> {
        let raw = if self.login {
            self.destination_via_oauth().await?
        } else {
            ask(&self.prompter, &self.cancel, |p| {
                p.text("What is your Supabase connection URI?", "postgres://")
            })
            .await?
        };
        let endpoint = normalize(&raw, Role::Destination, &self.settings.destination)?;
        info!("Destination: {}", endpoint.redacted());
        Ok(endpoint)
    }

    async fn destination_via_oauth(&self) -> Result<String> {
        let authenticator =
            Authenticator::new(self.settings.oauth.clone(), self.settings.website_url())?;

        let spinner = ProgressBar::new_spinner();
        let tokens = authenticator
            .authenticate(&self.cancel, |url| {
                spinner.println(format!("Go to {} to authenticate with Supabase", url));
                spinner.set_message("Waiting for authorization...");
                spinner.enable_steady_tick(Duration::from_millis(100));
            })
            .await;
        spinner.finish_and_clear();
        let tokens = tokens?;

        let client = ManagementClient::new(&self.settings.oauth.api_url, &tokens.access_token)?;
        let projects = client.list_projects().await?;
        let project = ask(&self.prompter, &self.cancel, move |p| select_project(p, &projects)).await?;

        let message = password_prompt(&project);
        let password = ask(&self.prompter, &self.cancel, move |p| p.password(&message)).await?;

        destination_uri(&project, &password, &self.settings.destination)
    }
}
