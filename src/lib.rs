// ABOUTME: Library root for the PlanetScale to Supabase migrator
// ABOUTME: Exposes URI normalization, pgloader job synthesis, process supervision and OAuth

pub mod error;
pub mod harden;
pub mod job;
pub mod migrate;
pub mod oauth;
pub mod orchestrator;
pub mod process;
pub mod prompt;
pub mod remote;
pub mod select;
pub mod settings;
pub mod signals;
pub mod uri;

pub use error::{MigratorError, Result};
pub use orchestrator::{MigrationReport, Orchestrator};
pub use settings::Settings;
