use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::adapters::command;
use crate::core::platform::PackageInstaller;

const UNINSTALLER: &str = "Uninstall.exe";
const SERVICE_BINARY: &str = "tomcat9.exe";

/// Runs the installer, uninstaller and service registration executables.
#[derive(Debug, Clone)]
pub struct ProcessInstaller {
    service_name: String,
}

impl ProcessInstaller {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn script_host() -> PathBuf {
        // The connector script drives 32-bit COM objects.
        let windir = std::env::var("windir").unwrap_or_else(|_| "C:\\Windows".to_string());
        Path::new(&windir).join("SysWOW64").join("cscript.exe")
    }
}

#[async_trait]
impl PackageInstaller for ProcessInstaller {
    async fn run_installer(
        &self,
        installer: &Path,
        config: &Path,
        target_dir: &Path,
    ) -> Result<i32> {
        // `/D=` has to be the last argument.
        let args = [
            format!("/C={}", config.display()),
            "/S".to_string(),
            format!("/D={}", target_dir.display()),
        ];
        info!(installer = %installer.display(), ?args, "Starting silent installer");
        command::status(installer, args).await
    }

    async fn run_uninstaller(&self, target_dir: &Path) -> Result<i32> {
        let uninstaller = target_dir.join(UNINSTALLER);
        let args = ["/S".to_string(), format!("-ServiceName={}", self.service_name)];
        command::status(&uninstaller, args).await
    }

    async fn register_service(&self, target_dir: &Path) -> Result<i32> {
        let binary = target_dir.join("bin").join(SERVICE_BINARY);
        let args = [
            format!("//US//{}", self.service_name),
            "--Startup=auto".to_string(),
            format!("--DisplayName=Apache {}", self.service_name),
        ];
        command::status(&binary, args).await
    }

    async fn run_connector_installer(
        &self,
        script: &Path,
        connector_dir: &Path,
        target_dir: &Path,
    ) -> Result<i32> {
        let output = command::run(
            &Self::script_host().to_string_lossy(),
            [
                script.as_os_str(),
                connector_dir.as_os_str(),
                target_dir.as_os_str(),
            ],
        )
        .await?;
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            info!(output = %line.trim(), "Connector installer");
        }
        Ok(output.code)
    }
}
