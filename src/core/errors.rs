//! SSW-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SweepError>;

/// Top-level error type for SymbolSweep.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("[SSW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SSW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SSW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SSW-1004] invalid settings: {details}")]
    InvalidSettings { details: String },

    #[error("[SSW-2003] safety veto for {path}: {reason}")]
    SafetyVeto { path: PathBuf, reason: String },

    #[error("[SSW-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SSW-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[SSW-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[SSW-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SSW-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SSW-3004] failed to persist {path}: {details}")]
    Persistence { path: PathBuf, details: String },

    #[error("[SSW-3101] a clean operation is already in progress")]
    CleanInProgress,

    #[error("[SSW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SweepError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SSW-1001",
            Self::MissingConfig { .. } => "SSW-1002",
            Self::ConfigParse { .. } => "SSW-1003",
            Self::InvalidSettings { .. } => "SSW-1004",
            Self::SafetyVeto { .. } => "SSW-2003",
            Self::Serialization { .. } => "SSW-2101",
            Self::Sql { .. } => "SSW-2102",
            Self::PermissionDenied { .. } => "SSW-3001",
            Self::Io { .. } => "SSW-3002",
            Self::ChannelClosed { .. } => "SSW-3003",
            Self::Persistence { .. } => "SSW-3004",
            Self::CleanInProgress => "SSW-3101",
            Self::Runtime { .. } => "SSW-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// A busy executor is retryable: the caller may try again once the running
    /// clean has finished.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Persistence { .. }
                | Self::CleanInProgress
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// `PermissionDenied` IO errors are mapped to the dedicated variant.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied { path };
        }
        Self::Io { path, source }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SweepError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for SweepError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SweepError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_variant() -> Vec<SweepError> {
        vec![
            SweepError::InvalidConfig {
                details: String::new(),
            },
            SweepError::MissingConfig {
                path: PathBuf::new(),
            },
            SweepError::ConfigParse {
                context: "",
                details: String::new(),
            },
            SweepError::InvalidSettings {
                details: String::new(),
            },
            SweepError::SafetyVeto {
                path: PathBuf::new(),
                reason: String::new(),
            },
            SweepError::Serialization {
                context: "",
                details: String::new(),
            },
            SweepError::Sql {
                context: "",
                details: String::new(),
            },
            SweepError::PermissionDenied {
                path: PathBuf::new(),
            },
            SweepError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            SweepError::ChannelClosed { component: "" },
            SweepError::Persistence {
                path: PathBuf::new(),
                details: String::new(),
            },
            SweepError::CleanInProgress,
            SweepError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = every_variant();
        let codes: Vec<&str> = errors.iter().map(SweepError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn every_code_has_prefix_and_appears_in_display() {
        for err in every_variant() {
            assert!(err.code().starts_with("SSW-"), "bad code {}", err.code());
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
        }
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(SweepError::CleanInProgress.is_retryable());
        assert!(SweepError::ChannelClosed { component: "test" }.is_retryable());
        assert!(
            SweepError::Persistence {
                path: PathBuf::new(),
                details: String::new()
            }
            .is_retryable()
        );

        assert!(
            !SweepError::InvalidSettings {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !SweepError::SafetyVeto {
                path: PathBuf::new(),
                reason: String::new()
            }
            .is_retryable()
        );
        assert!(
            !SweepError::PermissionDenied {
                path: PathBuf::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = SweepError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "SSW-3002");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn io_constructor_maps_permission_denied() {
        let err = SweepError::io(
            "/locked",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(err.code(), "SSW-3001");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn from_rusqlite_error() {
        let sql_err =
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some("test".to_string()));
        let err: SweepError = sql_err.into();
        assert_eq!(err.code(), "SSW-2102");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SweepError = json_err.into();
        assert_eq!(err.code(), "SSW-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: SweepError = toml_err.into();
        assert_eq!(err.code(), "SSW-1003");
    }
}
