use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("input file does not exist: {0}")]
    InputNotFound(PathBuf),

    #[error("could not read source metadata: {0}")]
    ProbeFailed(String),

    #[error("encoder failed:\n{0}")]
    EncoderFailed(String),

    #[error("decoder failed:\n{0}")]
    DecoderFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("could not launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{self}")
    }
}
