//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Why a [`SocketryConfig`](crate::SocketryConfig) could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required config file does not exist.
    #[error("config file {path} does not exist")]
    FileNotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read config file {path}")]
    ReadError {
        /// The file that failed.
        path: PathBuf,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax error, unknown key or wrong type.
    #[error("invalid TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON syntax error, unknown key or wrong type.
    #[error("invalid JSON config: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A `.env` file could not be parsed.
    #[error("cannot load .env: {0}")]
    DotenvError(#[from] dotenvy::Error),

    /// A field holds a value the server cannot use.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field, e.g. `server.addr`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An override variable did not parse into its field's type.
    #[error("environment variable {var}: {reason}")]
    EnvParseError {
        /// Full variable name, prefix included.
        var: String,
        /// What was expected.
        reason: String,
    },

    /// Cross-field checks failed after loading.
    #[error("config rejected: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// A missing file.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// An unreadable file.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// A bad value for `field`.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// An override variable that does not parse.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// A failed cross-field check.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_found_error() {
        let err = ConfigError::file_not_found("/path/to/socketry.toml");
        assert!(err.to_string().contains("/path/to/socketry.toml"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value("server.addr", "not a valid address");
        assert!(err.to_string().contains("server.addr"));
        assert!(err.to_string().contains("not a valid address"));
    }

    #[test]
    fn test_env_parse_error() {
        let err = ConfigError::env_parse_error("SOCKETRY__SERVER__WORKER_THREADS", "expected integer");
        assert!(err.to_string().contains("SOCKETRY__SERVER__WORKER_THREADS"));
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn test_read_error_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ConfigError::read_error("/etc/socketry.toml", io);
        assert!(err.source().is_some());
    }
}
