// ABOUTME: pgloader job description built from two normalized endpoints
// ABOUTME: Renders the four-clause LOAD DATABASE command file

use std::collections::BTreeMap;
use std::fmt;

use crate::settings::BatchSettings;
use crate::uri::ConnectionEndpoint;

/// pgloader `WITH` behaviors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MigrationOption {
    IncludeDrop,
    CreateTables,
    CreateIndexes,
    ResetSequences,
    QuoteIdentifiers,
    BatchRows(u64),
    BatchSize(String),
    PrefetchRows(u64),
}

impl MigrationOption {
    /// Rendering position; options of the same kind share it, so the job
    /// holds at most one of each.
    fn rank(&self) -> u8 {
        match self {
            MigrationOption::IncludeDrop => 0,
            MigrationOption::CreateTables => 1,
            MigrationOption::CreateIndexes => 2,
            MigrationOption::ResetSequences => 3,
            MigrationOption::QuoteIdentifiers => 4,
            MigrationOption::BatchRows(_) => 5,
            MigrationOption::BatchSize(_) => 6,
            MigrationOption::PrefetchRows(_) => 7,
        }
    }
}

impl fmt::Display for MigrationOption {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MigrationOption::IncludeDrop => f.write_str("include drop"),
            MigrationOption::CreateTables => f.write_str("create tables"),
            MigrationOption::CreateIndexes => f.write_str("create indexes"),
            MigrationOption::ResetSequences => f.write_str("reset sequences"),
            MigrationOption::QuoteIdentifiers => f.write_str("quote identifiers"),
            MigrationOption::BatchRows(rows) => write!(f, "batch rows = {}", rows),
            MigrationOption::BatchSize(size) => write!(f, "batch size = {}", size),
            MigrationOption::PrefetchRows(rows) => write!(f, "prefetch rows = {}", rows),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationJobSpec {
    source: ConnectionEndpoint,
    destination: ConnectionEndpoint,
    schema_rename_target: String,
    options: BTreeMap<u8, MigrationOption>,
}

impl MigrationJobSpec {
    pub fn builder(
        source: ConnectionEndpoint,
        destination: ConnectionEndpoint,
    ) -> MigrationJobSpecBuilder {
        MigrationJobSpecBuilder {
            source,
            destination,
            schema_rename_target: "public".to_string(),
            options: default_options(),
        }
    }

    pub fn source(&self) -> &ConnectionEndpoint {
        &self.source
    }

    pub fn destination(&self) -> &ConnectionEndpoint {
        &self.destination
    }

    pub fn schema_rename_target(&self) -> &str {
        &self.schema_rename_target
    }

    pub fn options(&self) -> impl Iterator<Item = &MigrationOption> {
        self.options.values()
    }

    /// MySQL exposes the database as a schema; this is its name.
    pub fn source_schema(&self) -> &str {
        self.source.database()
    }
}

pub struct MigrationJobSpecBuilder {
    source: ConnectionEndpoint,
    destination: ConnectionEndpoint,
    schema_rename_target: String,
    options: BTreeMap<u8, MigrationOption>,
}

impl MigrationJobSpecBuilder {
    pub fn schema_rename_target(mut self, schema: impl Into<String>) -> Self {
        self.schema_rename_target = schema.into();
        self
    }

    /// Adds `option`, replacing any earlier option of the same kind.
    pub fn option(mut self, option: MigrationOption) -> Self {
        self.options.insert(option.rank(), option);
        self
    }

    pub fn batching(mut self, batch: &BatchSettings) -> Self {
        if let Some(rows) = batch.batch_rows {
            self = self.option(MigrationOption::BatchRows(rows));
        }
        if let Some(size) = &batch.batch_size {
            self = self.option(MigrationOption::BatchSize(size.clone()));
        }
        if let Some(rows) = batch.prefetch_rows {
            self = self.option(MigrationOption::PrefetchRows(rows));
        }
        self
    }

    pub fn build(self) -> MigrationJobSpec {
        MigrationJobSpec {
            source: self.source,
            destination: self.destination,
            schema_rename_target: self.schema_rename_target,
            options: self.options,
        }
    }
}

fn default_options() -> BTreeMap<u8, MigrationOption> {
    [
        MigrationOption::IncludeDrop,
        MigrationOption::CreateTables,
        MigrationOption::CreateIndexes,
        MigrationOption::ResetSequences,
        MigrationOption::QuoteIdentifiers,
    ]
    .into_iter()
    .map(|option| (option.rank(), option))
    .collect()
}

/// Renders the pgloader command file.
pub fn build_config(spec: &MigrationJobSpec) -> String {
    let with = spec
        .options()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "LOAD DATABASE\n    FROM      {}\n    INTO      {}\n\nWITH {}\n\nALTER SCHEMA '{}' RENAME TO '{}'\n;\n",
        spec.source(),
        spec.destination(),
        with,
        spec.source_schema(),
        spec.schema_rename_target(),
    )
}
