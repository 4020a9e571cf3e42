//! The post-install repair sequence.
//!
//! Every step reports a plain success flag and none of them is fatal: a
//! failure is logged and the next step still runs, so independent
//! remediation (restoring different files) always gets its chance.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::core::files::{LINE_ENDING, write_if_absent};
use crate::core::layout::InstallLayout;
use crate::core::platform::{CopyOptions, EntryKind};
use crate::core::sequencer::Step;
use crate::core::transfer::{BulkDirectoryTransfer, TransferDirection, TransferJob};

const DEFAULT_WEBAPPS: [&str; 3] = ["ROOT", "manager", "docs"];
const ASSEMBLIES: [&str; 2] = [
    "unifiedconfig-realm-assembly.zip",
    "shindig-cache-assembly.zip",
];
const LIBRARY_JARS: [&str; 4] = [
    "icm-websetup-shared.jar",
    "jntservices.jar",
    "catalina-jmx-remote.jar",
    "registry.jar",
];
const SHINDIG_WAR: &str = "ccbu-common-shindig-server.war";
const CONNECTOR_DIR: &str = "i386";
const CONNECTOR_SCRIPT: &str = "install4iis.js";

/// `(source under bin, destination under conf)`
const CONFIGURATION_FILES: [(&str, &str); 3] = [
    ("web.xml", "web.xml"),
    ("server.xml.IIS.custom", "server.xml"),
    ("catalina.properties", "catalina.properties"),
];

/// Runtime options every installation carries, keyed on the text before `=`.
pub fn baseline_options(icm_root: &Path) -> Vec<String> {
    vec![
        format!("-DICM_ROOT={}", icm_root.display()),
        "-Dcom.sun.management.jmxremote.ssl.need.client.auth=false".to_string(),
        "-Dcom.sun.management.jmxremote.authenticate=false".to_string(),
        "-Dcom.sun.management.jmxremote.ssl=false".to_string(),
        "-XX:MaxPermSize=128m".to_string(),
        "-Dfile.encoding=UTF8".to_string(),
        "-Dclient.encoding.override=UTF-8".to_string(),
    ]
}

fn option_key(option: &str) -> &str {
    option
        .split_once('=')
        .map_or(option, |(key, _)| key)
        .trim()
}

/// Keep the installer's own options, drop blanks and anything the baseline
/// redefines, then append the baseline.
pub fn merge_options(current: &[String], baseline: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = current
        .iter()
        .filter(|option| !option.trim().is_empty())
        .filter(|option| {
            let key = option_key(option);
            !baseline.iter().any(|b| option_key(b) == key)
        })
        .cloned()
        .collect();
    merged.extend(baseline.iter().cloned());
    merged
}

pub fn workers_properties() -> String {
    [
        "worker.list=worker.tomcat",
        "",
        "# Define a worker to redirect requests to Tomcat",
        "worker.tomcat.type=ajp13",
        "worker.tomcat.host=127.0.0.1",
        "worker.tomcat.port=8009",
        "",
    ]
    .join(LINE_ENDING)
}

pub fn uri_worker_map() -> String {
    let contexts = ["setup", "unifiedconfig", "cceadmin", "cceadminnew", "gadgets"];
    contexts
        .iter()
        .map(|ctx| format!("/{ctx}=worker.tomcat{LINE_ENDING}/{ctx}/*=worker.tomcat{LINE_ENDING}"))
        .collect::<Vec<_>>()
        .join(LINE_ENDING)
}

/// Location of IIS `applicationHost.config`. A 32-bit process has to go
/// through `Sysnative` to see the real System32.
pub fn default_web_server_config() -> PathBuf {
    let windir = std::env::var("windir").unwrap_or_else(|_| "C:\\Windows".to_string());
    let system = if cfg!(target_pointer_width = "32") {
        "Sysnative"
    } else {
        "System32"
    };
    Path::new(&windir)
        .join(system)
        .join("inetsrv")
        .join("config")
        .join("applicationHost.config")
}

pub struct PostInstall<'a> {
    ctx: &'a AppContext,
    layout: &'a InstallLayout,
    target: PathBuf,
    transfer: BulkDirectoryTransfer,
}

impl<'a> PostInstall<'a> {
    pub fn new(ctx: &'a AppContext, layout: &'a InstallLayout, target: &Path) -> Self {
        let transfer = BulkDirectoryTransfer::new(ctx.platform.fs.clone())
            .with_sample_interval(ctx.config.progress_interval());
        Self {
            ctx,
            layout,
            target: target.to_path_buf(),
            transfer,
        }
    }

    /// The repair steps, in execution order.
    pub fn steps(&'a self) -> Vec<Step<'a>> {
        vec![
            Step::new("remove-default-webapps", move || self.remove_default_webapps()),
            Step::new("extract-assemblies", move || self.extract_assemblies()),
            Step::new("restore-war-files", move || self.restore_war_files()),
            Step::new("restore-jar-files", move || self.restore_jar_files()),
            Step::new("install-connector-files", move || self.install_connector_files()),
            Step::new("restore-configuration", move || self.restore_configuration()),
            Step::new("write-worker-files", move || self.write_worker_files()),
            Step::new("restore-runtime-options", move || self.restore_runtime_options()),
            Step::new("install-iis-connector", move || self.install_iis_connector()),
            Step::new("apply-permissions", move || self.apply_permissions()),
            Step::new("remove-isapi-filter", move || self.remove_isapi_filter()),
        ]
    }

    fn webapps(&self) -> PathBuf {
        self.target.join("webapps")
    }

    fn connector_dir(&self) -> PathBuf {
        self.target.join("bin").join(CONNECTOR_DIR)
    }

    async fn copy(&self, source: &Path, destination: &Path) -> bool {
        match self.ctx.platform.fs.copy_file(source, destination).await {
            Ok(()) => {
                info!(source = %source.display(), destination = %destination.display(), "Restored");
                true
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(
                    source = %source.display(),
                    destination = %destination.display(),
                    error = %message,
                    "Copy failed"
                );
                false
            }
        }
    }

    async fn remove_default_webapps(&self) -> bool {
        let mut success = true;
        for app in DEFAULT_WEBAPPS {
            let path = self.webapps().join(app);
            match self.ctx.platform.fs.delete_directory(&path).await {
                Ok(()) => info!(path = %path.display(), "Removed default web application"),
                Err(e) => {
                    let message = format!("{e:#}");
                    error!(path = %path.display(), error = %message, "Failed to remove");
                    success = false;
                }
            }
        }
        success
    }

    async fn extract_assemblies(&self) -> bool {
        let lib = self.target.join("lib");
        let mut success = true;
        for archive in ASSEMBLIES {
            let archive = self.layout.install_dir().join(archive);
            if let Err(e) = self.ctx.platform.fs.unzip(&archive, &lib).await {
                let message = format!("{e:#}");
                warn!(
                    archive = %archive.display(),
                    destination = %lib.display(),
                    error = %message,
                    "Extraction failed, unzip manually"
                );
                success = false;
            }
        }
        success
    }

    async fn restore_war_files(&self) -> bool {
        let install = self.layout.install_dir();
        let webapps = self.webapps();
        let wars = CopyOptions::flat_with_extension("war");

        let staged = self
            .transfer
            .run(
                &TransferJob::tree(&self.layout.bin_dir(), &install, TransferDirection::Restore)
                    .with_options(wars.clone()),
            )
            .await;
        if !staged {
            warn!(
                source = %self.layout.bin_dir().display(),
                destination = %install.display(),
                "WAR files not restored, copy them manually"
            );
            return false;
        }

        let deployed = self
            .transfer
            .run(
                &TransferJob::tree(&install, &webapps, TransferDirection::Restore).with_options(wars),
            )
            .await;
        if !deployed {
            warn!(
                source = %install.display(),
                destination = %webapps.display(),
                "WAR files not restored, copy them manually"
            );
            return false;
        }

        let root = self
            .copy(&install.join(SHINDIG_WAR), &webapps.join("ROOT.war"))
            .await;

        let duplicate = webapps.join(SHINDIG_WAR);
        let removed = match tokio::fs::remove_file(&duplicate).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                error!(path = %duplicate.display(), error = %e, "Failed to delete");
                false
            }
        };

        root && removed
    }

    async fn restore_jar_files(&self) -> bool {
        let bin = self.layout.bin_dir();
        let lib = self.target.join("lib");
        let mut success = true;
        for jar in LIBRARY_JARS {
            success &= self.copy(&bin.join(jar), &lib.join(jar)).await;
        }
        success
    }

    async fn install_connector_files(&self) -> bool {
        let dir = self.connector_dir();
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!(path = %dir.display(), error = %e, "Failed to create connector directory");
            return false;
        }

        self.copy(
            &self.layout.install_dir().join("web.config"),
            &dir.join("web.config"),
        )
        .await
            && self
                .copy(
                    &self.layout.bin_dir().join("isapi_redirect.dll"),
                    &dir.join("isapi_redirect.dll"),
                )
                .await
    }

    async fn restore_configuration(&self) -> bool {
        let bin = self.layout.bin_dir();
        let conf = self.target.join("conf");
        let mut success = true;
        for (source, destination) in CONFIGURATION_FILES {
            success &= self.copy(&bin.join(source), &conf.join(destination)).await;
        }
        success
    }

    async fn write_worker_files(&self) -> bool {
        let conf = self.target.join("conf");
        let files = [
            (conf.join("uriworkermap.properties"), uri_worker_map()),
            (conf.join("workers.properties"), workers_properties()),
        ];

        let mut success = true;
        for (path, contents) in files {
            match write_if_absent(&path, &contents).await {
                Ok(true) => info!(path = %path.display(), "Created"),
                Ok(false) => info!(path = %path.display(), "Already exists, left untouched"),
                Err(e) => {
                    let message = format!("{e:#}");
                    error!(error = %message, "Failed to write worker file");
                    success = false;
                }
            }
        }
        success
    }

    async fn restore_runtime_options(&self) -> bool {
        let settings = &self.ctx.platform.settings;
        let mut success = true;

        let options: Result<()> = async {
            let current = settings.read_options().await?;
            let merged = merge_options(&current, &baseline_options(self.layout.icm_root()));
            settings.write_options(&merged).await
        }
        .await;
        match options {
            Ok(()) => info!("Runtime options restored"),
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "Failed to restore runtime options");
                success = false;
            }
        }

        let heap = self.ctx.config.heap_size_mb;
        match settings.write_heap_size(heap).await {
            Ok(()) => info!(megabytes = heap, "JVM heap size restored"),
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "Failed to restore JVM heap size");
                success = false;
            }
        }

        let entry = &self.ctx.config.run_key_entry;
        match settings.remove_run_entry(entry).await {
            Ok(()) => info!(entry = %entry, "Removed startup entry"),
            Err(e) => {
                let message = format!("{e:#}");
                error!(entry = %entry, error = %message, "Failed to remove startup entry");
                success = false;
            }
        }

        success
    }

    async fn install_iis_connector(&self) -> bool {
        let script = self.layout.bin_dir().join(CONNECTOR_SCRIPT);
        let result = self
            .ctx
            .platform
            .installer
            .run_connector_installer(&script, &self.connector_dir(), &self.target)
            .await;
        match result {
            Ok(0) => {
                info!("IIS connector installed");
                true
            }
            Ok(code) => {
                warn!(exit_code = code, script = %script.display(), "IIS connector installer reported an error");
                true
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(script = %script.display(), error = %message, "Failed to run IIS connector installer");
                false
            }
        }
    }

    async fn apply_permissions(&self) -> bool {
        let Some(parent) = self.target.parent() else {
            error!(dir = %self.target.display(), "Installation directory has no parent");
            return false;
        };
        let acl = &self.ctx.platform.acl;
        info!(dir = %self.target.display(), "Applying permissions");

        let applied: Result<()> = async {
            let directories = acl.read_entries(parent).await?;
            acl.apply_entries(&self.target, EntryKind::Directories, &directories)
                .await?;
            let files = acl.read_first_file_entries(parent).await?;
            acl.apply_entries(&self.target, EntryKind::Files, &files)
                .await
        }
        .await;

        match applied {
            Ok(()) => {
                info!(dir = %self.target.display(), "Permissions applied");
                true
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "Failed to apply permissions");
                false
            }
        }
    }

    async fn remove_isapi_filter(&self) -> bool {
        let path = self
            .ctx
            .config
            .web_server_config
            .clone()
            .unwrap_or_else(default_web_server_config);
        let name = &self.ctx.config.isapi_filter_name;

        match self.ctx.platform.web_config.remove_isapi_filter(&path, name).await {
            Ok(true) => {
                info!(filter = %name, "ISAPI filter removed");
                true
            }
            Ok(false) => {
                warn!(filter = %name, config = %path.display(), "ISAPI filter not found");
                false
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(filter = %name, error = %message, "Failed to remove ISAPI filter");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn merge_keeps_custom_options_and_replaces_baseline_keys() {
        let current = strings(&[
            "-Dcatalina.home=C:\\icm\\tomcat",
            "-Dfile.encoding=Cp1252",
            "  ",
            "-Djava.io.tmpdir=C:\\icm\\tomcat\\temp",
        ]);
        let baseline = baseline_options(Path::new("D:\\icm"));

        let merged = merge_options(&current, &baseline);

        assert_eq!(merged[0], "-Dcatalina.home=C:\\icm\\tomcat");
        assert_eq!(merged[1], "-Djava.io.tmpdir=C:\\icm\\tomcat\\temp");
        assert_eq!(&merged[2..], baseline.as_slice());
        assert!(!merged.contains(&"-Dfile.encoding=Cp1252".to_string()));
        assert_eq!(merged[2], "-DICM_ROOT=D:\\icm");
    }

    #[test]
    fn merge_is_stable_when_applied_twice() {
        let baseline = baseline_options(Path::new("C:\\icm"));
        let once = merge_options(&strings(&["-Xss1m"]), &baseline);
        assert_eq!(merge_options(&once, &baseline), once);
    }

    #[test]
    fn worker_files_route_every_context() {
        let map = uri_worker_map();
        for ctx in ["setup", "unifiedconfig", "cceadmin", "cceadminnew", "gadgets"] {
            assert!(map.contains(&format!("/{ctx}=worker.tomcat")));
            assert!(map.contains(&format!("/{ctx}/*=worker.tomcat")));
        }
        let workers = workers_properties();
        assert!(workers.starts_with("worker.list=worker.tomcat"));
        assert!(workers.contains("worker.tomcat.port=8009"));
    }

    #[test]
    fn web_server_config_ends_in_application_host() {
        assert!(default_web_server_config().ends_with("applicationHost.config"));
    }
}
