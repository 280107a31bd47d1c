use std::io;
use std::path::PathBuf;

/// Top-level error for startup and storage failures
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Malformed or incomplete push notification data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("Could not find payload variable `ref`")]
    MissingRef,

    #[error("Could not find payload variable `{0}`")]
    MissingField(&'static str),
}

/// Signature verification failures. The messages are returned verbatim to
/// the HTTP caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication signature not found")]
    SignatureMissing,

    #[error("Request signature failed to authenticate")]
    SignatureMismatch,

    #[error("No token configured for {0}")]
    NoTokenForBranch(String),
}

/// Anything that goes wrong while running a single deploy
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Command `{command}` failed ({status})\n{output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("Command `{command}` timed out after {timeout_secs}s")]
    CommandTimedOut { command: String, timeout_secs: u64 },

    #[error("Could not locate a `deploy.yml` file in {}", dir.display())]
    ConfigNotFound { dir: PathBuf },

    #[error("Found both deploy.yml and deploy.yaml in {}; delete one and try again", dir.display())]
    ConfigAmbiguous { dir: PathBuf },

    #[error("Deployment file {} appears to be empty", path.display())]
    ConfigEmpty { path: PathBuf },

    #[error("Deployment file {} is invalid: {message}", path.display())]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Deployment file {} is missing `clone` directive", path.display())]
    ConfigMissingClone { path: PathBuf },

    #[error("Repository name '{0}' is not a single path component")]
    InvalidRepoName(String),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),
}

impl WorkerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WorkerError::Io {
            path: path.into(),
            source,
        }
    }
}
