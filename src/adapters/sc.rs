use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::debug;

use crate::adapters::command;
use crate::core::platform::ServiceControl;

const SC: &str = "sc.exe";

/// Service control through the `sc.exe` utility.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScServiceControl;

impl ScServiceControl {
    /// `sc` reports most failures (service already started, access denied)
    /// through its exit code while still printing the status block, so the
    /// output is returned either way and left to the state parser.
    async fn exec(&self, verb: &str, name: &str) -> Result<String> {
        let output = command::run(SC, [verb, name]).await?;
        if !output.success() {
            debug!(
                verb,
                service = name,
                exit_code = output.code,
                stderr = %output.stderr.trim(),
                "sc reported an error"
            );
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ServiceControl for ScServiceControl {
    async fn query(&self, name: &str) -> Result<String> {
        self.exec("query", name).await
    }

    async fn start(&self, name: &str) -> Result<String> {
        self.exec("start", name).await
    }

    async fn stop(&self, name: &str) -> Result<String> {
        self.exec("stop", name).await
    }

    async fn set_logon_account(&self, name: &str, account: &str) -> Result<()> {
        // `obj=` and its value are separate arguments to sc.
        let output = command::run(SC, ["config", name, "obj=", account]).await?;
        if !output.success() {
            bail!(
                "sc config {name} obj= {account} failed with exit code {}: {}",
                output.code,
                output.stdout.trim()
            );
        }
        Ok(())
    }
}
