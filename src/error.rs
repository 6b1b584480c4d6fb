use thiserror::Error;

/// Scan error taxonomy. Variants map to the subsystem that failed so
/// user-visible messages carry a stable prefix.
#[derive(Debug, Error)]
pub enum Error {
    /// No driver is registered for the detected OS family. Callers
    /// typically downgrade this to a warning and keep going.
    #[error("unsupported os: {0}")]
    UnsupportedOs(String),

    #[error("walk filesystem: {0}")]
    Walk(String),

    #[error("analyze error: {0}")]
    Analysis(String),

    #[error("post analysis error: {0}")]
    PostAnalysis(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("advisory source error: {0}")]
    AdvisorySource(String),

    #[error("failed detection: {0}")]
    Detection(String),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("VEX error: {0}")]
    Vex(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("remote SBOM fetching error: {0}")]
    RemoteSbom(String),

    #[error("scan canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("db error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
