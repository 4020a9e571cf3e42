use std::path::{Path, PathBuf};

/// Well-known locations of a product installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    icm_root: PathBuf,
}

impl InstallLayout {
    pub fn new(icm_root: impl Into<PathBuf>) -> Self {
        Self {
            icm_root: icm_root.into(),
        }
    }

    /// `<drive>:\icm` for a drive letter as stored in the settings store.
    pub fn from_drive(drive: &str) -> Self {
        let letter = drive.trim().trim_end_matches(['\\', '/']).trim_end_matches(':');
        Self::new(format!("{letter}:\\icm"))
    }

    pub fn icm_root(&self) -> &Path {
        &self.icm_root
    }

    /// Default application server directory.
    pub fn tomcat_dir(&self) -> PathBuf {
        self.icm_root.join("tomcat")
    }

    /// Installation media: archives, WAR files and web.config.
    pub fn install_dir(&self) -> PathBuf {
        self.icm_root.join("install")
    }

    /// Product binaries: JAR files, configuration templates and scripts.
    pub fn bin_dir(&self) -> PathBuf {
        self.icm_root.join("bin")
    }

    pub fn installer_config(&self) -> PathBuf {
        self.install_dir().join("tomcatConfig.ini")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_letter_forms_are_normalised() {
        for drive in ["C", "C:", "C:\\", " C "] {
            assert_eq!(InstallLayout::from_drive(drive).icm_root(), Path::new("C:\\icm"));
        }
    }

    #[test]
    fn derived_directories() {
        let layout = InstallLayout::new("/opt/icm");
        assert_eq!(layout.tomcat_dir(), PathBuf::from("/opt/icm/tomcat"));
        assert_eq!(
            layout.installer_config(),
            PathBuf::from("/opt/icm/install/tomcatConfig.ini")
        );
    }
}
