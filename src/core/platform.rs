//! Capabilities the orchestration core consumes from the host.
//!
//! Every trait here is a narrow contract over something the core does not own:
//! the service control manager, installer processes, the persisted settings
//! store, bulk file operations, access control lists and the web server
//! configuration. Implementations live in `crate::adapters`.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Raw access to the OS service control utility.
///
/// `query`, `start` and `stop` return the utility's textual output unparsed;
/// `core::service::parse_status` turns it into a `ServiceState`.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn query(&self, name: &str) -> Result<String>;
    async fn start(&self, name: &str) -> Result<String>;
    async fn stop(&self, name: &str) -> Result<String>;

    /// Change the account a service logs on as.
    async fn set_logon_account(&self, name: &str, account: &str) -> Result<()>;
}

/// External installer processes. Each call blocks until the process exits
/// and yields its exit code; 0 is success.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn run_installer(&self, installer: &Path, config: &Path, target_dir: &Path)
    -> Result<i32>;

    async fn run_uninstaller(&self, target_dir: &Path) -> Result<i32>;

    /// Re-register the installed service with its expected name, display
    /// name and automatic startup.
    async fn register_service(&self, target_dir: &Path) -> Result<i32>;

    /// Run the script based web server connector installer.
    async fn run_connector_installer(
        &self,
        script: &Path,
        connector_dir: &Path,
        target_dir: &Path,
    ) -> Result<i32>;
}

/// Durable key/value settings for version and runtime option bookkeeping.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Installed server version, `None` when nothing is recorded.
    async fn read_version(&self) -> Result<Option<String>>;
    async fn write_version(&self, version: &str) -> Result<()>;

    /// Installation directory recorded by the previous installer run.
    async fn read_install_path(&self) -> Result<Option<String>>;

    async fn read_options(&self) -> Result<Vec<String>>;
    async fn write_options(&self, options: &[String]) -> Result<()>;

    /// Set both the maximum and the initial JVM heap, in megabytes.
    async fn write_heap_size(&self, megabytes: u32) -> Result<()>;

    /// Drive letter of the product installation, without the colon.
    async fn read_install_root_drive(&self) -> Result<String>;

    /// Remove a value from the current user's Run key.
    async fn remove_run_entry(&self, name: &str) -> Result<()>;
}

/// How `FileSystem::copy_directory` walks the source tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Descend into subdirectories (empty ones included). When false only
    /// the files directly under the source are copied.
    pub recursive: bool,
    /// Only copy files with this extension (compared case-insensitively,
    /// without the leading dot).
    pub extension: Option<String>,
}

impl CopyOptions {
    pub fn tree() -> Self {
        Self {
            recursive: true,
            extension: None,
        }
    }

    pub fn flat_with_extension(extension: &str) -> Self {
        Self {
            recursive: false,
            extension: Some(extension.to_string()),
        }
    }

    /// Whether a file name passes the extension filter.
    pub fn accepts(&self, path: &Path) -> bool {
        match &self.extension {
            None => true,
            Some(wanted) => path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted)),
        }
    }
}

/// Bulk file operations.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Copy one file, creating the destination's parent directories.
    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()>;

    async fn copy_directory(
        &self,
        source: &Path,
        destination: &Path,
        options: &CopyOptions,
    ) -> Result<()>;

    async fn delete_directory(&self, path: &Path) -> Result<()>;

    async fn unzip(&self, archive: &Path, destination: &Path) -> Result<()>;
}

/// Which entries of a tree an ACL is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directories,
    Files,
}

/// One access control entry: a principal and its rights, in the notation of
/// the platform tooling (for example `BUILTIN\Users` and `(OI)(CI)(RX)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub principal: String,
    pub rights: String,
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn read_entries(&self, path: &Path) -> Result<Vec<AccessEntry>>;

    /// Entries of the first regular file found under `path`, depth first.
    async fn read_first_file_entries(&self, path: &Path) -> Result<Vec<AccessEntry>>;

    /// Apply `entries` to every entry of `kind` under `root` (root included
    /// when it matches).
    async fn apply_entries(
        &self,
        root: &Path,
        kind: EntryKind,
        entries: &[AccessEntry],
    ) -> Result<()>;
}

/// Structured edits of the web server configuration.
#[async_trait]
pub trait WebServerConfig: Send + Sync {
    /// Remove the named ISAPI filter. Returns whether any occurrence was found.
    async fn remove_isapi_filter(&self, config_path: &Path, filter_name: &str) -> Result<bool>;
}

/// The full set of host capabilities one orchestration run works against.
#[derive(Clone)]
pub struct Platform {
    pub services: Arc<dyn ServiceControl>,
    pub installer: Arc<dyn PackageInstaller>,
    pub settings: Arc<dyn SettingsStore>,
    pub fs: Arc<dyn FileSystem>,
    pub acl: Arc<dyn AccessControl>,
    pub web_config: Arc<dyn WebServerConfig>,
}
