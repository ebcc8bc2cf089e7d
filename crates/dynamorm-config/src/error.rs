//! Errors raised while reading environment-sourced runtime configuration.

/// A malformed environment value was encountered. The default for that knob
/// is used for the call that needed it; this error exists so a caller can
/// surface the diagnostic instead of silently running on the default.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {var} has invalid value {value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
