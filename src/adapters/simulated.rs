//! An in-process stand-in for every host capability.
//!
//! Services, installers, the settings store, access control and the web
//! server configuration are simulated in memory. File operations go to the
//! real file system so the post-install steps have something to act on;
//! point `icm_root` at a scratch directory and seed it with
//! [`seed_product_media`].

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::adapters::LocalFileSystem;
use crate::core::platform::{
    AccessControl, AccessEntry, CopyOptions, EntryKind, FileSystem, PackageInstaller, Platform,
    ServiceControl, SettingsStore, WebServerConfig,
};
use crate::core::service::ServiceState;
use crate::core::version::version_from_file_name;

#[derive(Debug, Clone)]
struct SimService {
    state: ServiceState,
    /// State reached once `remaining_polls` queries have been answered.
    pending: Option<ServiceState>,
    remaining_polls: u32,
    unresponsive: bool,
    logon_account: Option<String>,
}

impl SimService {
    fn new(state: ServiceState) -> Self {
        Self {
            state,
            pending: None,
            remaining_polls: 0,
            unresponsive: false,
            logon_account: None,
        }
    }
}

#[derive(Debug)]
struct SimState {
    services: HashMap<String, SimService>,
    settle_polls: u32,

    version: Option<String>,
    install_path: Option<String>,
    options: Vec<String>,
    heap_size_mb: Option<u32>,
    install_drive: String,
    run_entries: Vec<String>,

    installer_exit_code: i32,
    installer_spawn_fails: bool,
    uninstaller_exit_code: i32,
    connector_exit_code: i32,
    logon_change_fails: bool,

    acl_entries: Vec<AccessEntry>,
    isapi_filter_present: bool,

    calls: Vec<String>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            services: HashMap::new(),
            settle_polls: 2,
            version: None,
            install_path: None,
            options: vec!["-Dcatalina.home=C:\\icm\\tomcat".to_string()],
            heap_size_mb: None,
            install_drive: "C".to_string(),
            run_entries: vec!["ApacheTomcatMonitor9.0_Tomcat9".to_string()],
            installer_exit_code: 0,
            installer_spawn_fails: false,
            uninstaller_exit_code: 0,
            connector_exit_code: 0,
            logon_change_fails: false,
            acl_entries: vec![AccessEntry {
                principal: "BUILTIN\\Users".to_string(),
                rights: "(RX)".to_string(),
            }],
            isapi_filter_present: true,
            calls: Vec::new(),
        }
    }
}

fn state_code(state: ServiceState) -> u32 {
    match state {
        ServiceState::Unknown => 0,
        ServiceState::Stopped => 1,
        ServiceState::StartPending => 2,
        ServiceState::StopPending => 3,
        ServiceState::Running => 4,
    }
}

/// Status text in the layout `sc query` prints.
fn sc_output(name: &str, state: ServiceState) -> String {
    format!(
        "\nSERVICE_NAME: {name}\n        TYPE               : 10  WIN32_OWN_PROCESS\n        STATE              : {}  {}\n        WIN32_EXIT_CODE    : 0  (0x0)\n",
        state_code(state),
        state.as_str()
    )
}

fn service_missing(name: &str) -> String {
    format!("[SC] EnumQueryServicesStatus:OpenService FAILED 1060:\n\nThe specified service {name} does not exist as an installed service.\n")
}

pub struct SimulatedPlatform {
    state: Mutex<SimState>,
    fs: LocalFileSystem,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            fs: LocalFileSystem::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: impl Into<String>) {
        self.lock().calls.push(call.into());
    }

    pub fn with_service(self, name: &str, state: ServiceState) -> Self {
        self.lock()
            .services
            .insert(name.to_string(), SimService::new(state));
        self
    }

    /// Services that never leave their current state.
    pub fn with_unresponsive_service(self, name: &str, state: ServiceState) -> Self {
        let mut service = SimService::new(state);
        service.unresponsive = true;
        self.lock().services.insert(name.to_string(), service);
        self
    }

    /// Queries answered before a start or stop completes.
    pub fn with_settle_polls(self, polls: u32) -> Self {
        self.lock().settle_polls = polls;
        self
    }

    pub fn with_installed_version(self, version: &str, install_path: Option<&Path>) -> Self {
        {
            let mut state = self.lock();
            state.version = Some(version.to_string());
            state.install_path = install_path.map(|p| p.display().to_string());
        }
        self
    }

    pub fn with_install_drive(self, drive: &str) -> Self {
        self.lock().install_drive = drive.to_string();
        self
    }

    pub fn with_options(self, options: &[&str]) -> Self {
        self.lock().options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn with_installer_exit_code(self, code: i32) -> Self {
        self.lock().installer_exit_code = code;
        self
    }

    pub fn with_installer_spawn_failure(self) -> Self {
        self.lock().installer_spawn_fails = true;
        self
    }

    pub fn with_uninstaller_exit_code(self, code: i32) -> Self {
        self.lock().uninstaller_exit_code = code;
        self
    }

    pub fn with_connector_exit_code(self, code: i32) -> Self {
        self.lock().connector_exit_code = code;
        self
    }

    pub fn with_logon_change_failure(self) -> Self {
        self.lock().logon_change_fails = true;
        self
    }

    pub fn with_acl_entries(self, entries: Vec<AccessEntry>) -> Self {
        self.lock().acl_entries = entries;
        self
    }

    pub fn with_isapi_filter(self, present: bool) -> Self {
        self.lock().isapi_filter_present = present;
        self
    }

    /// Wrap every capability around one shared simulator.
    pub fn into_platform(self) -> (Arc<Self>, Platform) {
        let sim = Arc::new(self);
        let platform = Platform {
            services: sim.clone(),
            installer: sim.clone(),
            settings: sim.clone(),
            fs: sim.clone(),
            acl: sim.clone(),
            web_config: sim.clone(),
        };
        (sim, platform)
    }

    /// Every capability call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.lock().services.get(name).map(|s| s.state)
    }

    pub fn logon_account(&self, name: &str) -> Option<String> {
        self.lock()
            .services
            .get(name)
            .and_then(|s| s.logon_account.clone())
    }

    pub fn recorded_version(&self) -> Option<String> {
        self.lock().version.clone()
    }

    pub fn options(&self) -> Vec<String> {
        self.lock().options.clone()
    }

    pub fn heap_size_mb(&self) -> Option<u32> {
        self.lock().heap_size_mb
    }

    pub fn run_entries(&self) -> Vec<String> {
        self.lock().run_entries.clone()
    }

    fn transition(&self, verb: &str, name: &str, target: ServiceState) -> String {
        let mut state = self.lock();
        state.calls.push(format!("sc {verb} {name}"));
        let settle_polls = state.settle_polls;

        let Some(service) = state.services.get_mut(name) else {
            return service_missing(name);
        };
        if service.unresponsive || service.state == target {
            return sc_output(name, service.state);
        }

        if settle_polls == 0 {
            service.state = target;
        } else {
            service.state = match target {
                ServiceState::Running => ServiceState::StartPending,
                _ => ServiceState::StopPending,
            };
            service.pending = Some(target);
            service.remaining_polls = settle_polls;
        }
        sc_output(name, service.state)
    }
}

#[async_trait]
impl ServiceControl for SimulatedPlatform {
    async fn query(&self, name: &str) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(format!("sc query {name}"));

        let Some(service) = state.services.get_mut(name) else {
            return Ok(service_missing(name));
        };
        if let Some(target) = service.pending {
            service.remaining_polls = service.remaining_polls.saturating_sub(1);
            if service.remaining_polls == 0 {
                service.state = target;
                service.pending = None;
            }
        }
        Ok(sc_output(name, service.state))
    }

    async fn start(&self, name: &str) -> Result<String> {
        Ok(self.transition("start", name, ServiceState::Running))
    }

    async fn stop(&self, name: &str) -> Result<String> {
        Ok(self.transition("stop", name, ServiceState::Stopped))
    }

    async fn set_logon_account(&self, name: &str, account: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("sc config {name} obj= {account}"));
        if state.logon_change_fails {
            bail!("[SC] ChangeServiceConfig FAILED 5: Access is denied.");
        }
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| anyhow!("Service {name} does not exist"))?;
        service.logon_account = Some(account.to_string());
        Ok(())
    }
}

#[async_trait]
impl PackageInstaller for SimulatedPlatform {
    async fn run_installer(
        &self,
        installer: &Path,
        config: &Path,
        target_dir: &Path,
    ) -> Result<i32> {
        let (code, spawn_fails) = {
            let mut state = self.lock();
            state.calls.push(format!(
                "install {} /C={} /D={}",
                installer.display(),
                config.display(),
                target_dir.display()
            ));
            (state.installer_exit_code, state.installer_spawn_fails)
        };
        if spawn_fails {
            bail!("Failed to run {}: file not found", installer.display());
        }
        if code != 0 {
            return Ok(code);
        }

        for dir in ["bin", "conf", "lib", "logs", "webapps/ROOT", "webapps/manager", "webapps/docs"] {
            fs::create_dir_all(target_dir.join(dir))?;
        }
        fs::write(target_dir.join("Uninstall.exe"), b"")?;

        let version = installer
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(version_from_file_name)
            .unwrap_or("9.0.0")
            .to_string();
        info!(version = %version, dir = %target_dir.display(), "(Simulated) Installed");

        let mut state = self.lock();
        state.version = Some(version);
        state.install_path = Some(target_dir.display().to_string());
        Ok(0)
    }

    async fn run_uninstaller(&self, target_dir: &Path) -> Result<i32> {
        let mut state = self.lock();
        state
            .calls
            .push(format!("uninstall {}", target_dir.display()));
        if state.uninstaller_exit_code == 0 {
            state.version = None;
        }
        Ok(state.uninstaller_exit_code)
    }

    async fn register_service(&self, target_dir: &Path) -> Result<i32> {
        self.record(format!("register-service {}", target_dir.display()));
        Ok(0)
    }

    async fn run_connector_installer(
        &self,
        script: &Path,
        connector_dir: &Path,
        target_dir: &Path,
    ) -> Result<i32> {
        let mut state = self.lock();
        state.calls.push(format!(
            "cscript {} {} {}",
            script.display(),
            connector_dir.display(),
            target_dir.display()
        ));
        Ok(state.connector_exit_code)
    }
}

#[async_trait]
impl SettingsStore for SimulatedPlatform {
    async fn read_version(&self) -> Result<Option<String>> {
        Ok(self.lock().version.clone())
    }

    async fn write_version(&self, version: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("settings write-version {version}"));
        state.version = Some(version.to_string());
        Ok(())
    }

    async fn read_install_path(&self) -> Result<Option<String>> {
        Ok(self.lock().install_path.clone())
    }

    async fn read_options(&self) -> Result<Vec<String>> {
        Ok(self.lock().options.clone())
    }

    async fn write_options(&self, options: &[String]) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("settings write-options".to_string());
        state.options = options.to_vec();
        Ok(())
    }

    async fn write_heap_size(&self, megabytes: u32) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("settings write-heap {megabytes}"));
        state.heap_size_mb = Some(megabytes);
        Ok(())
    }

    async fn read_install_root_drive(&self) -> Result<String> {
        Ok(self.lock().install_drive.clone())
    }

    async fn remove_run_entry(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("settings remove-run-entry {name}"));
        state.run_entries.retain(|entry| entry != name);
        Ok(())
    }
}

#[async_trait]
impl FileSystem for SimulatedPlatform {
    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()> {
        self.record(format!("copy {}", source.display()));
        self.fs.copy_file(source, destination).await
    }

    async fn copy_directory(
        &self,
        source: &Path,
        destination: &Path,
        options: &CopyOptions,
    ) -> Result<()> {
        self.record(format!("copy-dir {}", source.display()));
        self.fs.copy_directory(source, destination, options).await
    }

    async fn delete_directory(&self, path: &Path) -> Result<()> {
        self.record(format!("delete {}", path.display()));
        self.fs.delete_directory(path).await
    }

    async fn unzip(&self, archive: &Path, destination: &Path) -> Result<()> {
        self.record(format!("unzip {}", archive.display()));
        self.fs.unzip(archive, destination).await
    }
}

#[async_trait]
impl AccessControl for SimulatedPlatform {
    async fn read_entries(&self, path: &Path) -> Result<Vec<AccessEntry>> {
        let mut state = self.lock();
        state.calls.push(format!("acl read {}", path.display()));
        Ok(state.acl_entries.clone())
    }

    async fn read_first_file_entries(&self, path: &Path) -> Result<Vec<AccessEntry>> {
        let mut state = self.lock();
        state.calls.push(format!("acl read-first-file {}", path.display()));
        Ok(state.acl_entries.clone())
    }

    async fn apply_entries(
        &self,
        root: &Path,
        kind: EntryKind,
        entries: &[AccessEntry],
    ) -> Result<()> {
        self.record(format!("acl apply {kind:?} {}", root.display()));
        if entries.is_empty() {
            bail!("No access control entries to apply on {}", root.display());
        }
        Ok(())
    }
}

#[async_trait]
impl WebServerConfig for SimulatedPlatform {
    async fn remove_isapi_filter(&self, config_path: &Path, filter_name: &str) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push(format!(
            "iis remove-filter {filter_name} {}",
            config_path.display()
        ));
        Ok(std::mem::replace(&mut state.isapi_filter_present, false))
    }
}

fn write_assembly(path: &Path, entry: &str) -> Result<()> {
    use std::io::Write;

    let mut zip = zip::ZipWriter::new(fs::File::create(path)?);
    zip.start_file(entry, zip::write::SimpleFileOptions::default())?;
    zip.write_all(b"simulated")?;
    zip.finish()?;
    Ok(())
}

/// Lay out the product media the post-install steps restore from under
/// `icm_root`: `bin` and `install` with every expected file.
pub fn seed_product_media(icm_root: &Path) -> Result<()> {
    let bin = icm_root.join("bin");
    let install = icm_root.join("install");
    fs::create_dir_all(&bin)?;
    fs::create_dir_all(&install)?;

    for file in [
        "icm-websetup-shared.jar",
        "jntservices.jar",
        "catalina-jmx-remote.jar",
        "registry.jar",
        "web.xml",
        "server.xml.IIS.custom",
        "catalina.properties",
        "isapi_redirect.dll",
        "install4iis.js",
        "cceadmin.war",
        "unifiedconfig.war",
        "setup.war",
    ] {
        fs::write(bin.join(file), file.as_bytes())?;
    }

    fs::write(install.join("web.config"), b"<configuration/>")?;
    fs::write(install.join("ccbu-common-shindig-server.war"), b"shindig")?;
    write_assembly(
        &install.join("unifiedconfig-realm-assembly.zip"),
        "unifiedconfig-realm.jar",
    )?;
    write_assembly(
        &install.join("shindig-cache-assembly.zip"),
        "shindig-cache.jar",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::service::parse_status;

    #[tokio::test]
    async fn stop_completes_after_settle_polls() {
        let (sim, platform) = SimulatedPlatform::new()
            .with_service("Tomcat9", ServiceState::Running)
            .with_settle_polls(2)
            .into_platform();

        let reply = platform.services.stop("Tomcat9").await.unwrap();
        assert_eq!(parse_status(&reply), ServiceState::StopPending);

        let first = platform.services.query("Tomcat9").await.unwrap();
        assert_eq!(parse_status(&first), ServiceState::StopPending);
        let second = platform.services.query("Tomcat9").await.unwrap();
        assert_eq!(parse_status(&second), ServiceState::Stopped);
        assert_eq!(sim.service_state("Tomcat9"), Some(ServiceState::Stopped));
    }

    #[tokio::test]
    async fn unknown_service_parses_as_unknown() {
        let (_sim, platform) = SimulatedPlatform::new().into_platform();
        let reply = platform.services.query("Missing").await.unwrap();
        assert_eq!(parse_status(&reply), ServiceState::Unknown);
    }

    #[tokio::test]
    async fn filter_is_only_found_once() {
        let (_sim, platform) = SimulatedPlatform::new().into_platform();
        let path = Path::new("applicationHost.config");
        assert!(platform.web_config.remove_isapi_filter(path, "Jakarta").await.unwrap());
        assert!(!platform.web_config.remove_isapi_filter(path, "Jakarta").await.unwrap());
    }

    #[test]
    fn seeded_media_contains_assemblies() {
        let temp = tempfile::tempdir().unwrap();
        seed_product_media(temp.path()).unwrap();
        assert!(temp.path().join("install/shindig-cache-assembly.zip").is_file());
        assert!(temp.path().join("bin/server.xml.IIS.custom").is_file());
    }
}
