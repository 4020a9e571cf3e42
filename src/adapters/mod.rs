//! Concrete host capabilities.
//!
//! The Windows adapters shell out to the stock system utilities (`sc.exe`,
//! `reg.exe`, `icacls.exe`, the installers themselves). The simulated
//! platform stands in for all of them during dry runs and tests.

mod acl;
mod command;
mod filesystem;
mod iis;
mod process;
mod registry;
mod sc;
pub mod simulated;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::platform::Platform;
use crate::core::service::ServiceState;

pub use acl::{IcaclsAccessControl, parse_icacls};
pub use command::CommandOutput;
pub use filesystem::LocalFileSystem;
pub use iis::{FilterRemoval, FilterScope, IisConfigFile, remove_filter};
pub use process::ProcessInstaller;
pub use registry::{RegistrySettingsStore, parse_query_value};
pub use sc::ScServiceControl;
pub use simulated::{SimulatedPlatform, seed_product_media};

/// The platform a run works against.
pub fn get_platform(config: &AppConfig) -> Platform {
    if config.simulation {
        let (_sim, platform) = SimulatedPlatform::new()
            .with_service(&config.tomcat_service, ServiceState::Running)
            .with_service(&config.web_service, ServiceState::Running)
            .into_platform();
        return platform;
    }

    Platform {
        services: Arc::new(ScServiceControl),
        installer: Arc::new(ProcessInstaller::new(&config.tomcat_service)),
        settings: Arc::new(RegistrySettingsStore),
        fs: Arc::new(LocalFileSystem::default()),
        acl: Arc::new(IcaclsAccessControl),
        web_config: Arc::new(IisConfigFile),
    }
}
