//! Error types for configuration loading and validation.

use kairos_diagnostics::{Category, Diagnostic, DiagnosticCode};

/// Errors that can occur when loading or validating a `kairos.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A required field is missing from the configuration.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Returns the stable diagnostic code for this error.
    pub fn code(&self) -> DiagnosticCode {
        let number = match self {
            ConfigError::IoError(_) => 1,
            ConfigError::ParseError(_) => 2,
            ConfigError::MissingField(_) => 3,
            ConfigError::ValidationError(_) => 4,
        };
        DiagnosticCode::new(Category::Config, number)
    }

    /// Converts the error into an error-severity diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.code(), self.to_string());
        match self {
            ConfigError::IoError(_) => diag.with_help(format!(
                "create a {} in the run directory",
                crate::CONFIG_FILE_NAME
            )),
            ConfigError::MissingField(field) => diag.with_subject(field.clone()),
            ConfigError::ParseError(_) | ConfigError::ValidationError(_) => diag,
        }
    }
}
