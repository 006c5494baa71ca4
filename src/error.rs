use thiserror::Error;

/// Everything that can abort a session run.
///
/// Timeouts and an already existing results file are deliberately absent:
/// both are normal control flow (see `ResponseOutcome::Timeout` and
/// `CreateOutcome::AlreadyExists`).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{source_name}:{line}: {reason}")]
    MalformedInput {
        source_name: String,
        line: u64,
        reason: String,
    },

    #[error("instruction screen '{reference}' not found in {source_name}")]
    InstructionNotFound {
        source_name: String,
        reference: String,
    },

    #[error("results file already holds {logged} rows but the procedure only has {trials}")]
    ResumeOutOfRange { logged: usize, trials: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    pub fn malformed(source_name: &str, line: u64, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            source_name: source_name.to_string(),
            line,
            reason: reason.into(),
        }
    }
}
