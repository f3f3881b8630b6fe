use thiserror::Error;

/// Startup-path error currency. Recoverable event-loop conditions never
/// travel through here; they surface as [`crate::http::connection::Advance`]
/// variants instead.
#[derive(Debug, Error)]
pub enum LisoError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),

    #[error("invalid {what}: {value}")]
    BadArg { what: &'static str, value: String },

    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),

    #[error("tls: {0}")]
    TlsSetup(String),

    #[error("lock: {0}")]
    Lock(String),

    #[error("log: {0}")]
    Logger(#[from] log::SetLoggerError),
}

pub type Result<T> = std::result::Result<T, LisoError>;
