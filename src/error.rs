// ABOUTME: Error taxonomy for the migrator
// ABOUTME: Each variant carries an actionable, human-readable message

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigratorError>;

#[derive(Debug, Error)]
pub enum MigratorError {
    #[error("{0} is not installed or not on PATH")]
    DependencyMissing(String),

    #[error("Invalid connection URI: {0}")]
    InvalidUri(String),

    #[error("Invalid {role} connection URI: expected scheme {expected}, got '{found}'")]
    WrongScheme {
        role: &'static str,
        expected: String,
        found: String,
    },

    #[error("Invalid destination connection URI, host '{host}' should include {marker}")]
    UnexpectedHost { host: String, marker: String },

    #[error("Could not run '{command}': {}", describe_exit(.exit_code))]
    ProcessFailed {
        command: String,
        exit_code: Option<i32>,
    },

    #[error("Port {0} is already in use. Free it and try again")]
    PortInUse(u16),

    #[error("Authentication finished without an access token")]
    NoAccessToken,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Authorization state mismatch: the redirect did not originate from this session")]
    StateMismatch,

    #[error("No projects found in the destination account")]
    NoProjectsFound,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Interrupted")]
    Interrupted,

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Management API error: {0}")]
    Api(String),

    #[error("Failed to enable row level security: {0}")]
    Hardening(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl MigratorError {
    /// Backing out of a prompt is a clean exit, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MigratorError::Cancelled)
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            MigratorError::Cancelled => 0,
            MigratorError::Interrupted => 130,
            _ => 1,
        }
    }
}

impl From<reqwest::Error> for MigratorError {
    fn from(error: reqwest::Error) -> Self {
        MigratorError::Api(error.to_string())
    }
}

impl From<dialoguer::Error> for MigratorError {
    fn from(error: dialoguer::Error) -> Self {
        match error {
            dialoguer::Error::IO(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                MigratorError::Cancelled
            }
            dialoguer::Error::IO(e) => MigratorError::Prompt(e.to_string()),
        }
    }
}
