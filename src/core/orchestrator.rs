//! Top-level reinstall workflow.
//!
//! Detect the installed version, run the install phase for a fresh install or
//! an upgrade, run the post-install repair sequence and bring the services
//! back up. Every outcome is collected into a [`RunReport`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::context::AppContext;
use crate::core::files::clean_directory;
use crate::core::files::write_installer_config;
use crate::core::layout::InstallLayout;
use crate::core::sequencer::{SequenceOutcome, Step, StepSequencer};
use crate::core::service::ServiceController;
use crate::core::steps::PostInstall;
use crate::core::transfer::{BulkDirectoryTransfer, TransferDirection, TransferJob};
use crate::core::version::{InstallerPackage, ServerVersion};
use crate::error::ConfigError;

pub const REPORT_FILE: &str = "install-report.json";
pub const VERSION_FILE: &str = "tomcat_version.txt";

/// Directories under the installation that survive cleanup.
const PRESERVED_DIRECTORIES: [&str; 1] = ["logs"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallKind {
    Fresh,
    Upgrade { previous_version: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// The product installation root could not be determined.
    LayoutUnavailable,
    InstallAborted { step: String },
    PostInstallDegraded { failed: Vec<String> },
    LogonChangeFailed,
    ServicesNotStarted { services: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub installer_version: ServerVersion,
    pub install_kind: InstallKind,
    pub target_dir: Option<PathBuf>,
    pub install: Option<SequenceOutcome>,
    pub post_install: Option<SequenceOutcome>,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Serialise the report as `install-report.json` under `dir`.
    pub async fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

pub struct InstallationOrchestrator {
    ctx: AppContext,
    tomcat: ServiceController,
    web: ServiceController,
}

impl InstallationOrchestrator {
    pub fn new(ctx: AppContext) -> Result<Self, ConfigError> {
        let config = &ctx.config;
        let services = ctx.platform.services.clone();

        let tomcat = ServiceController::new(config.tomcat_descriptor()?, services.clone())
            .with_settle_delay(config.settle_delay());
        let web = ServiceController::new(config.web_descriptor()?, services)
            .with_settle_delay(config.settle_delay());

        Ok(Self { ctx, tomcat, web })
    }

    pub fn tomcat(&self) -> &ServiceController {
        &self.tomcat
    }

    pub fn web(&self) -> &ServiceController {
        &self.web
    }

    /// Fresh install when no version is recorded, upgrade otherwise. A store
    /// that cannot be read is treated as holding no version.
    pub async fn detect(&self) -> InstallKind {
        match self.ctx.platform.settings.read_version().await {
            Ok(Some(version)) if !version.trim().is_empty() => InstallKind::Upgrade {
                previous_version: version.trim().to_string(),
            },
            Ok(_) => InstallKind::Fresh,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(error = %message, "Cannot read installed version, assuming fresh install");
                InstallKind::Fresh
            }
        }
    }

    pub async fn resolve_layout(&self) -> Option<InstallLayout> {
        if let Some(root) = &self.ctx.config.icm_root {
            return Some(InstallLayout::new(root));
        }

        match self.ctx.platform.settings.read_install_root_drive().await {
            Ok(drive) if !drive.trim().is_empty() => Some(InstallLayout::from_drive(&drive)),
            Ok(_) => {
                error!("Installation drive is not recorded");
                None
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "Cannot read installation drive");
                None
            }
        }
    }

    /// Directory recorded by the previous installer, if any.
    async fn recorded_install_path(&self) -> Option<PathBuf> {
        match self.ctx.platform.settings.read_install_path().await {
            Ok(Some(path)) if !path.trim().is_empty() => Some(PathBuf::from(path.trim())),
            Ok(_) => None,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(error = %message, "Cannot read recorded installation directory");
                None
            }
        }
    }

    pub async fn run(&self, package: &InstallerPackage) -> RunReport {
        let span = info_span!("reinstall", version = %package.version);
        self.run_inner(package).instrument(span).await
    }

    async fn run_inner(&self, package: &InstallerPackage) -> RunReport {
        info!(installer = %package.path.display(), "Starting installation");

        let kind = self.detect().await;
        let mut report = RunReport {
            installer_version: package.version,
            install_kind: kind.clone(),
            target_dir: None,
            install: None,
            post_install: None,
            outcome: RunOutcome::LayoutUnavailable,
            started_at: Utc::now(),
            finished_at: None,
        };

        let Some(layout) = self.resolve_layout().await else {
            self.finish(&mut report);
            return report;
        };

        let (target, recorded) = match &kind {
            InstallKind::Fresh => {
                info!("No installed version found, performing fresh install");
                (layout.tomcat_dir(), false)
            }
            InstallKind::Upgrade { previous_version } => {
                info!(previous = %previous_version, "Installed version found, performing upgrade");
                match self.recorded_install_path().await {
                    Some(path) => (path, true),
                    None => (layout.tomcat_dir(), false),
                }
            }
        };
        report.target_dir = Some(target.clone());

        let steps = self.install_steps(&kind, &layout, &target, package, recorded);
        let install = StepSequencer::new("install").run(steps).await;
        let aborted_at = install.aborted_at.clone();
        report.install = Some(install);

        if let Some(step) = aborted_at {
            report.outcome = RunOutcome::InstallAborted { step };
            self.finish(&mut report);
            return report;
        }

        let post_install = PostInstall::new(&self.ctx, &layout, &target);
        let outcome = StepSequencer::new("post-install")
            .run(post_install.steps())
            .await;
        let degraded = !outcome.succeeded();
        let failed = outcome
            .failed_steps()
            .into_iter()
            .map(str::to_string)
            .collect();
        report.post_install = Some(outcome);

        report.outcome = if degraded {
            RunOutcome::PostInstallDegraded { failed }
        } else {
            info!("Post installation completed successfully");
            self.finalize().await
        };

        self.finish(&mut report);
        report
    }

    /// The install phase for `kind`, in execution order.
    ///
    /// On a fresh install a web service that will not stop is recorded but
    /// does not abort. The uninstaller only runs when the previous installer
    /// recorded where it installed to.
    fn install_steps<'a>(
        &'a self,
        kind: &'a InstallKind,
        layout: &'a InstallLayout,
        target: &'a Path,
        package: &'a InstallerPackage,
        recorded: bool,
    ) -> Vec<Step<'a>> {
        let mut steps = Vec::new();

        match kind {
            InstallKind::Fresh => {
                steps.push(Step::new("stop-web-service", move || {
                    self.web.stop_and_verify()
                }));
            }
            InstallKind::Upgrade { previous_version } => {
                steps.push(Step::fatal("stop-tomcat-service", move || {
                    self.tomcat.stop_and_verify()
                }));
                steps.push(Step::fatal("stop-web-service", move || {
                    self.web.stop_and_verify()
                }));
                if let Some(dir) = self.ctx.config.backup_directory.as_deref() {
                    steps.push(Step::fatal("backup-installation", move || {
                        self.backup(target, dir, previous_version)
                    }));
                }
                if recorded {
                    steps.push(Step::new("uninstall-previous", move || {
                        self.uninstall(target)
                    }));
                }
            }
        }

        steps.push(Step::new("clean-target-directory", move || {
            clean_directory(target, &PRESERVED_DIRECTORIES)
        }));
        steps.push(Step::fatal("run-installer", move || {
            self.install_package(package, layout, target)
        }));

        steps
    }

    async fn backup(&self, target: &Path, dir: &Path, previous_version: &str) -> bool {
        let destination = dir.join(previous_version);
        let transfer = BulkDirectoryTransfer::new(self.ctx.platform.fs.clone())
            .with_sample_interval(self.ctx.config.progress_interval());
        let job = TransferJob::tree(target, &destination, TransferDirection::Backup);

        if !transfer.run(&job).await {
            return false;
        }

        let version_file = destination.join(VERSION_FILE);
        match tokio::fs::write(&version_file, previous_version).await {
            Ok(()) => true,
            Err(e) => {
                error!(path = %version_file.display(), error = %e, "Failed to record backed up version");
                false
            }
        }
    }

    async fn uninstall(&self, target: &Path) -> bool {
        info!(dir = %target.display(), "Running uninstaller");
        match self.ctx.platform.installer.run_uninstaller(target).await {
            Ok(0) => {
                info!("Uninstaller completed");
                sleep(self.ctx.config.uninstall_settle()).await;
                true
            }
            Ok(code) => {
                warn!(exit_code = code, "Uninstaller failed, continuing");
                false
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!(error = %message, "Cannot run uninstaller, continuing");
                false
            }
        }
    }

    async fn install_package(
        &self,
        package: &InstallerPackage,
        layout: &InstallLayout,
        target: &Path,
    ) -> bool {
        let installer = &self.ctx.platform.installer;
        let config_file = layout.installer_config();

        match self.ctx.config.resolved_java_home() {
            Some(java_home) => {
                if let Err(e) = write_installer_config(&config_file, &java_home).await {
                    let message = format!("{e:#}");
                    error!(error = %message, "Cannot prepare installer configuration");
                    return false;
                }
            }
            None => warn!("Java home is not configured, installer configuration left as is"),
        }

        info!(installer = %package.path.display(), dir = %target.display(), "Running installer");
        let code = match installer
            .run_installer(&package.path, &config_file, target)
            .await
        {
            Ok(code) => code,
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "Cannot run installer");
                return false;
            }
        };
        if code != 0 {
            error!(exit_code = code, "Installer failed");
            return false;
        }

        info!("Installer completed, waiting for it to settle");
        sleep(self.ctx.config.installer_settle()).await;

        match installer.register_service(target).await {
            Ok(0) => info!(service = %self.tomcat.name(), "Service registration updated"),
            Ok(code) => warn!(exit_code = code, "Service registration update failed"),
            Err(e) => {
                let message = format!("{e:#}");
                warn!(error = %message, "Cannot update service registration");
            }
        }

        self.check_installed_version(package.version).await;
        true
    }

    /// Compare the recorded version with the installer's. A mismatch is only
    /// reported, and the installer's version is recorded in its place.
    async fn check_installed_version(&self, expected: ServerVersion) {
        let settings = &self.ctx.platform.settings;
        let recorded = match settings.read_version().await {
            Ok(version) => version,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(error = %message, "Cannot read installed version");
                return;
            }
        };

        let installed = recorded.as_deref().map(str::parse::<ServerVersion>);
        match installed {
            Some(Ok(installed)) if installed == expected => {
                debug!(version = %installed, "Recorded version matches installer");
                return;
            }
            Some(Ok(installed)) => {
                warn!(recorded = %installed, expected = %expected, "Recorded version differs from installer");
            }
            Some(Err(e)) => warn!(error = %e, "Recorded version is not valid"),
            None => warn!(expected = %expected, "No version recorded after install"),
        }

        if let Err(e) = settings.write_version(&expected.to_string()).await {
            let message = format!("{e:#}");
            warn!(error = %message, "Cannot record installed version");
        }
    }

    async fn finalize(&self) -> RunOutcome {
        let account = &self.ctx.config.logon_account;
        let service = self.tomcat.name();

        if let Err(e) = self
            .ctx
            .platform
            .services
            .set_logon_account(service, account)
            .await
        {
            let message = format!("{e:#}");
            error!(
                service = %service,
                account = %account,
                error = %message,
                "Cannot change the service logon account, start the service manually"
            );
            return RunOutcome::LogonChangeFailed;
        }
        info!(service = %service, account = %account, "Service logon account updated");

        let mut not_started = Vec::new();
        for controller in [&self.web, &self.tomcat] {
            if controller.start_and_verify().await {
                info!(service = %controller.name(), "Service started");
            } else {
                error!(service = %controller.name(), "Service did not start");
                not_started.push(controller.name().to_string());
            }
        }

        if not_started.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::ServicesNotStarted {
                services: not_started,
            }
        }
    }

    fn finish(&self, report: &mut RunReport) {
        report.finished_at = Some(Utc::now());
        let results = self.ctx.config.results_directory.display();
        if report.succeeded() {
            info!("Installation completed successfully");
        } else {
            error!(
                outcome = ?report.outcome,
                "Installation finished with errors, check the logs in {results}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serialises_with_status_tag() {
        let outcome = RunOutcome::InstallAborted {
            step: "run-installer".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "install_aborted");
        assert_eq!(json["step"], "run-installer");
    }

    #[test]
    fn upgrade_kind_carries_previous_version() {
        let kind = InstallKind::Upgrade {
            previous_version: "9.0.10".to_string(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "upgrade");
        assert_eq!(json["previous_version"], "9.0.10");
    }
}
