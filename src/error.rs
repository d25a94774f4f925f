use thiserror::Error;

/// Errors surfaced by the analyzer. Decode problems inside the journal are
/// never reported through this type: a malformed block is skipped and
/// counted, only open-time and configuration failures abort a run.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("cannot open image '{path}': {reason}")]
    ImageOpen { path: String, reason: String },

    #[error("read of {len} bytes at offset {offset} failed: {reason}")]
    Read {
        offset: u64,
        len: usize,
        reason: String,
    },

    #[error("not an EXT filesystem: {0}")]
    InvalidFilesystem(String),

    #[error("journal not found: {0}")]
    JournalNotFound(String),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
