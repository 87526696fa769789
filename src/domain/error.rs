//! Domain error types.

/// Top-level error type for signalfuse.
#[derive(Debug, thiserror::Error)]
pub enum SignalfuseError {
    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data for {symbol} ({timeframe})")]
    DataUnavailable { symbol: String, timeframe: String },

    #[error("insufficient data for {context}: have {available}, need {minimum}")]
    InsufficientData {
        context: String,
        available: usize,
        minimum: usize,
    },

    #[error("regime model has not been fitted")]
    ModelNotFitted,

    #[error("episode finished at step {step}; call reset before stepping again")]
    EpisodeFinished { step: usize },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("export failed for {path}: {reason}")]
    Export { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SignalfuseError {
    pub(crate) fn data(reason: impl Into<String>) -> Self {
        SignalfuseError::Data {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        SignalfuseError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&SignalfuseError> for std::process::ExitCode {
    fn from(err: &SignalfuseError) -> Self {
        let code: u8 = match err {
            SignalfuseError::Io(_) | SignalfuseError::Export { .. } => 1,
            SignalfuseError::ConfigParse { .. }
            | SignalfuseError::ConfigMissing { .. }
            | SignalfuseError::ConfigInvalid { .. } => 2,
            SignalfuseError::Data { .. } | SignalfuseError::DataUnavailable { .. } => 3,
            SignalfuseError::InsufficientData { .. } => 4,
            SignalfuseError::ModelNotFitted | SignalfuseError::EpisodeFinished { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
