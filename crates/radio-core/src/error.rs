use thiserror::Error;

#[derive(Debug, Error)]
pub enum RadioError {
    /// Descriptor could not be decoded: unknown `source.kind`, unknown
    /// preset, or a required field missing.
    #[error("invalid station descriptor: {0}")]
    InvalidStation(#[from] serde_json::Error),

    /// A `file` station was played without supplying its bytes.
    #[error("station `{station}` needs media bytes but none were supplied")]
    MissingMedia { station: String },

    #[error("audio backend failed during {op}: {message}")]
    Backend { op: &'static str, message: String },

    #[error("unknown audio node {0}")]
    UnknownNode(u32),
}

impl RadioError {
    pub fn backend(op: &'static str, message: impl Into<String>) -> Self {
        RadioError::Backend {
            op,
            message: message.into(),
        }
    }
}

pub type Result<T, E = RadioError> = std::result::Result<T, E>;
