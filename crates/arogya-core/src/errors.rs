/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the dispatcher
/// can log failures consistently and turn them into a fixed user-facing reply.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("analysis service returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// True when the external service answered with a 4xx status.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Backend { status, .. } if (400..500).contains(status))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
