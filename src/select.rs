// ABOUTME: Destination project selection for the OAuth path
// ABOUTME: Resolves exactly one project and synthesizes its pooler connection URI

use url::Url;

use crate::error::{MigratorError, Result};
use crate::prompt::Prompter;
use crate::remote::Project;
use crate::settings::DestinationRules;
use crate::uri::DESTINATION_SSL_FLAG;

/// Picks the migration target. One project needs confirmation, several need
/// a choice; backing out of either aborts the run.
pub fn select_project(prompter: &dyn Prompter, projects: &[Project]) -> Result<Project> {
    match projects {
        [] => Err(MigratorError::NoProjectsFound),
        [only] => {
            let message = format!(
                "Data will be migrated to ({}). Are you sure?",
                only.name
            );
            if prompter.confirm(&message)? {
                Ok(only.clone())
            } else {
                Err(MigratorError::Cancelled)
            }
        }
        many => {
            let labels: Vec<String> = many.iter().map(|p| p.name.clone()).collect();
            let index = prompter.select(
                "Select a project. Data will be migrated to this database.",
                &labels,
            )?;
            many.get(index)
                .cloned()
                .ok_or(MigratorError::Cancelled)
        }
    }
}

/// `postgres://postgres.<ref>:<password>@aws-0-<region>.<pooler>:<pooled port>/postgres?sslmode=disable`
pub fn destination_uri(project: &Project, password: &str, rules: &DestinationRules) -> Result<String> {
    let base = format!(
        "postgres://aws-0-{}.{}:{}/postgres",
        project.region, rules.pooler_domain, rules.pooled_port
    );
    let mut url = Url::parse(&base)
        .map_err(|e| MigratorError::InvalidUri(format!("project region '{}': {}", project.region, e)))?;
    let username = format!("postgres.{}", project.id);
    url.set_username(&username)
        .and_then(|_| url.set_password(Some(password)))
        .map_err(|_| MigratorError::InvalidUri("cannot embed credentials".to_string()))?;
    url.query_pairs_mut()
        .append_pair(DESTINATION_SSL_FLAG.0, DESTINATION_SSL_FLAG.1);
    Ok(url.to_string())
}

pub fn password_prompt(project: &Project) -> String {
    format!(
        "What is your Supabase database password? You can reset it at https://supabase.com/dashboard/project/{}/settings/database",
        project.id
    )
}
