use std::path::PathBuf;
use thiserror::Error;

/// Invalid settings detected while building the run's components.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("service '{0}' needs at least one polling attempt")]
    NoAttempts(String),

    #[error("service '{0}' needs a non-zero polling interval")]
    ZeroPollInterval(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version '{0}' is not in major.minor.build form")]
    Malformed(String),

    #[error("version component '{component}' of '{version}' is not a number")]
    NotANumber { version: String, component: String },
}

/// Reasons an installer package is refused before anything is touched.
#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("the file path {} does not exist or is not a file", .0.display())]
    NotAFile(PathBuf),

    #[error("installer file name '{name}' must start with '{prefix}' and end with '{extension}'")]
    UnsupportedName {
        name: String,
        prefix: String,
        extension: String,
    },

    #[error("cannot determine the installer version from '{0}'")]
    MissingVersion(String),

    #[error(transparent)]
    Version(#[from] VersionError),
}
