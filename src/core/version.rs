//! Server versions and installer package validation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{InstallerError, VersionError};

/// A `major.minor.build` server version.
///
/// Ordering is lexicographic over the fields in declaration order, so a
/// higher minor always dominates the build number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }
}

impl FromStr for ServerVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::Malformed(trimmed.to_string()));
        }

        let number = |component: &str| {
            component
                .parse::<u32>()
                .map_err(|_| VersionError::NotANumber {
                    version: trimmed.to_string(),
                    component: component.to_string(),
                })
        };

        Ok(Self::new(
            number(parts[0])?,
            number(parts[1])?,
            number(parts[2])?,
        ))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// A validated installer executable and the version it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerPackage {
    pub path: PathBuf,
    pub version: ServerVersion,
}

impl InstallerPackage {
    /// Validate an installer path: it must be an existing file named
    /// `<prefix>...-<version><extension>`.
    pub fn from_path(path: &Path, prefix: &str, extension: &str) -> Result<Self, InstallerError> {
        if !path.is_file() {
            return Err(InstallerError::NotAFile(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        if !name.starts_with(prefix) || !name.ends_with(extension) {
            return Err(InstallerError::UnsupportedName {
                name: name.to_string(),
                prefix: prefix.to_string(),
                extension: extension.to_string(),
            });
        }

        let version = version_from_file_name(name)
            .ok_or_else(|| InstallerError::MissingVersion(name.to_string()))?
            .parse()?;

        Ok(Self {
            path: path.to_path_buf(),
            version,
        })
    }
}

/// The text between the last `-` and the last `.` of an installer file name,
/// e.g. `9.0.22` for `apache-tomcat-9.0.22.exe`.
pub fn version_from_file_name(name: &str) -> Option<&str> {
    let start = name.rfind('-')? + 1;
    let end = name.rfind('.')?;
    (end > start).then(|| &name[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use tempfile::tempdir;

    #[test]
    fn higher_build_is_greater() {
        let a = ServerVersion::new(9, 0, 22);
        let b = ServerVersion::new(9, 0, 10);
        assert_eq!(a.cmp(&b), Ordering::Greater);
    }

    #[test]
    fn equal_versions_compare_equal() {
        let a: ServerVersion = "9.0.10".parse().unwrap();
        assert_eq!(a.cmp(&ServerVersion::new(9, 0, 10)), Ordering::Equal);
    }

    #[test]
    fn minor_dominates_build() {
        assert_eq!(
            ServerVersion::new(9, 1, 0).cmp(&ServerVersion::new(9, 0, 99)),
            Ordering::Greater
        );
        assert_eq!(
            ServerVersion::new(8, 9, 99).cmp(&ServerVersion::new(9, 0, 0)),
            Ordering::Less
        );
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!(matches!(
            "9.0".parse::<ServerVersion>(),
            Err(VersionError::Malformed(_))
        ));
        assert!(matches!(
            "9.0.x".parse::<ServerVersion>(),
            Err(VersionError::NotANumber { .. })
        ));
    }

    #[test]
    fn extracts_version_from_installer_name() {
        assert_eq!(
            version_from_file_name("apache-tomcat-9.0.22.exe"),
            Some("9.0.22")
        );
        assert_eq!(version_from_file_name("installer.exe"), None);
        assert_eq!(version_from_file_name("tomcat-.exe"), None);
    }

    #[test]
    fn validates_installer_package() {
        let temp = tempdir().unwrap();
        let installer = temp.path().join("apache-tomcat-9.0.85.exe");
        std::fs::write(&installer, b"MZ").unwrap();

        let package = InstallerPackage::from_path(&installer, "apache-tomcat-9.0", ".exe").unwrap();
        assert_eq!(package.version, ServerVersion::new(9, 0, 85));
    }

    #[test]
    fn refuses_missing_or_misnamed_installer() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("apache-tomcat-9.0.85.exe");
        assert!(matches!(
            InstallerPackage::from_path(&missing, "apache-tomcat-9.0", ".exe"),
            Err(InstallerError::NotAFile(_))
        ));

        let wrong = temp.path().join("apache-tomcat-10.1.2.exe");
        std::fs::write(&wrong, b"MZ").unwrap();
        assert!(matches!(
            InstallerPackage::from_path(&wrong, "apache-tomcat-9.0", ".exe"),
            Err(InstallerError::UnsupportedName { .. })
        ));
    }
}
