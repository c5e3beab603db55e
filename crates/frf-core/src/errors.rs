/// Core error type for the forwarder.
///
/// Adapter crates should map their specific errors into this type so the
/// core can handle failures consistently. The two config variants are
/// startup-only and map to distinct process exit codes in the binary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("config incomplete: missing {0}")]
    ConfigIncomplete(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
