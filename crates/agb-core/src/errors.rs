/// Core error type for the scheduling engine.
///
/// Adapter crates (storage, channels) should map their specific errors into
/// this type so the conversation layer can decide uniformly what becomes a
/// clarifying prompt and what is terminal for an operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Unparseable user input: date expression, service, phone, name.
    #[error("validation error: {0}")]
    Validation(String),

    /// Request is well-formed but the tenant's booking policy forbids it.
    #[error("policy violation: {0}")]
    Policy(String),

    /// The slot was lost to a race or overlaps an existing appointment.
    #[error("booking conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors the conversation recovers from by re-prompting the user.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Policy(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
