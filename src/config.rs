//! Runtime configuration.
//!
//! Resolved in layers: built-in defaults, an optional TOML file, environment
//! variables prefixed `TOMCAT_REINSTALL_`, then command line overrides.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::service::ServiceDescriptor;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "tomcat-reinstall.toml";
pub const ENV_PREFIX: &str = "TOMCAT_REINSTALL_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application server service being reinstalled.
    pub tomcat_service: String,
    /// Web front-end service holding locks on the connector files.
    pub web_service: String,
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
    pub settle_delay_secs: u64,
    pub progress_interval_secs: u64,
    pub installer_settle_secs: u64,
    pub uninstall_settle_secs: u64,

    pub logon_account: String,
    pub heap_size_mb: u32,
    pub isapi_filter_name: String,
    pub run_key_entry: String,

    pub installer_prefix: String,
    pub installer_extension: String,

    /// Overrides `<install drive>:\icm`.
    pub icm_root: Option<PathBuf>,
    /// Falls back to `CCE_JAVA_HOME`.
    pub java_home: Option<String>,
    /// Overrides the IIS `applicationHost.config` location.
    pub web_server_config: Option<PathBuf>,
    /// When set, upgrades back up the existing installation here first.
    pub backup_directory: Option<PathBuf>,

    pub results_directory: PathBuf,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tomcat_service: "Tomcat9".to_string(),
            web_service: "W3SVC".to_string(),
            max_attempts: 60,
            poll_interval_ms: 5000,
            settle_delay_secs: 10,
            progress_interval_secs: 10,
            installer_settle_secs: 30,
            uninstall_settle_secs: 40,
            logon_account: "LocalSystem".to_string(),
            heap_size_mb: 512,
            isapi_filter_name: "Jakarta".to_string(),
            run_key_entry: "ApacheTomcatMonitor9.0_Tomcat9".to_string(),
            installer_prefix: "apache-tomcat-9.0".to_string(),
            installer_extension: ".exe".to_string(),
            icm_root: None,
            java_home: None,
            web_server_config: None,
            backup_directory: None,
            results_directory: PathBuf::from("InstallTomcatResults"),
            simulation: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Resolve the layered configuration. `overrides` is merged last; fields
    /// it leaves out (e.g. `None` with `skip_serializing_if`) keep the value
    /// from the lower layers.
    pub fn load<T: Serialize>(
        config_file: Option<&Path>,
        overrides: Option<&T>,
    ) -> Result<Self, figment::Error> {
        let file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment.extract()
    }

    pub fn tomcat_descriptor(&self) -> Result<ServiceDescriptor, ConfigError> {
        ServiceDescriptor::new(&self.tomcat_service, self.max_attempts, self.poll_interval())
    }

    pub fn web_descriptor(&self) -> Result<ServiceDescriptor, ConfigError> {
        ServiceDescriptor::new(&self.web_service, self.max_attempts, self.poll_interval())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn installer_settle(&self) -> Duration {
        Duration::from_secs(self.installer_settle_secs)
    }

    pub fn uninstall_settle(&self) -> Duration {
        Duration::from_secs(self.uninstall_settle_secs)
    }

    /// How long a service transition is polled for, in seconds.
    pub fn service_budget_secs(&self) -> u64 {
        self.poll_interval_ms * u64::from(self.max_attempts) / 1000
    }

    pub fn resolved_java_home(&self) -> Option<String> {
        self.java_home
            .clone()
            .or_else(|| std::env::var("CCE_JAVA_HOME").ok())
            .filter(|home| !home.trim().is_empty())
    }
}
