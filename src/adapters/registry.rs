//! Persisted settings stored in the Windows registry, accessed through
//! `reg.exe`.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::adapters::command;
use crate::core::platform::SettingsStore;

const REG: &str = "reg.exe";

const VERSION_KEY: &str =
    "HKLM\\SOFTWARE\\WOW6432Node\\Apache Software Foundation\\Tomcat\\9.0\\Tomcat9";
const JAVA_KEY: &str =
    "HKLM\\SOFTWARE\\WOW6432Node\\Apache Software Foundation\\Procrun 2.0\\Tomcat9\\Parameters\\Java";
const SYSTEM_SETTINGS_KEY: &str = "HKLM\\SOFTWARE\\Cisco Systems, Inc.\\ICM\\SystemSettings";
const RUN_KEY: &str = "HKCU\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run";

/// `    <name>    <REG_TYPE>    <data>` as printed by `reg query`.
static VALUE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(?P<name>.+?)\s{4}(?P<kind>REG_[A-Z_]+)(?:\s{4}(?P<data>.*))?$")
        .expect("value line pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValue {
    pub kind: String,
    pub data: String,
}

/// Find `name` in `reg query` output. Value names compare case-insensitively.
pub fn parse_query_value(output: &str, name: &str) -> Option<RegistryValue> {
    output.lines().find_map(|line| {
        let caps = VALUE_LINE.captures(line.trim_end_matches('\r'))?;
        if !caps["name"].eq_ignore_ascii_case(name) {
            return None;
        }
        Some(RegistryValue {
            kind: caps["kind"].to_string(),
            data: caps
                .name("data")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
    })
}

/// Split `REG_MULTI_SZ` data as printed by `reg query` (`\0` separated).
pub fn split_multi_string(data: &str) -> Vec<String> {
    data.split("\\0")
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Settings store backed by `reg.exe` against the 64-bit registry view.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistrySettingsStore;

impl RegistrySettingsStore {
    async fn query(&self, key: &str, name: &str) -> Result<Option<RegistryValue>> {
        let output = command::run(REG, ["query", key, "/v", name, "/reg:64"]).await?;
        if !output.success() {
            // reg exits 1 both for a missing value and a missing key.
            debug!(key, name, stderr = %output.stderr.trim(), "Registry value not found");
            return Ok(None);
        }
        Ok(parse_query_value(&output.stdout, name))
    }

    async fn query_string(&self, key: &str, name: &str) -> Result<Option<String>> {
        Ok(self.query(key, name).await?.map(|value| value.data))
    }

    async fn add(&self, key: &str, name: &str, kind: &str, data: &str) -> Result<()> {
        let output = command::run(
            REG,
            ["add", key, "/v", name, "/t", kind, "/d", data, "/f", "/reg:64"],
        )
        .await?;
        if !output.success() {
            bail!(
                "reg add {key} /v {name} failed with exit code {}: {}",
                output.code,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for RegistrySettingsStore {
    async fn read_version(&self) -> Result<Option<String>> {
        self.query_string(VERSION_KEY, "Version").await
    }

    async fn write_version(&self, version: &str) -> Result<()> {
        self.add(VERSION_KEY, "Version", "REG_SZ", version).await
    }

    async fn read_install_path(&self) -> Result<Option<String>> {
        self.query_string(VERSION_KEY, "InstallPath").await
    }

    async fn read_options(&self) -> Result<Vec<String>> {
        let value = self
            .query(JAVA_KEY, "Options")
            .await?
            .ok_or_else(|| anyhow!("No Options value under {JAVA_KEY}"))?;
        Ok(split_multi_string(&value.data))
    }

    async fn write_options(&self, options: &[String]) -> Result<()> {
        self.add(JAVA_KEY, "Options", "REG_MULTI_SZ", &options.join("\\0"))
            .await
            .context("Failed to write runtime options")
    }

    async fn write_heap_size(&self, megabytes: u32) -> Result<()> {
        let data = megabytes.to_string();
        self.add(JAVA_KEY, "JvmMx", "REG_DWORD", &data).await?;
        self.add(JAVA_KEY, "JvmMs", "REG_DWORD", &data).await
    }

    async fn read_install_root_drive(&self) -> Result<String> {
        self.query_string(SYSTEM_SETTINGS_KEY, "InstallDrive")
            .await?
            .ok_or_else(|| anyhow!("No InstallDrive value under {SYSTEM_SETTINGS_KEY}"))
    }

    async fn remove_run_entry(&self, name: &str) -> Result<()> {
        if self.query(RUN_KEY, name).await?.is_none() {
            debug!(name, "Run entry already absent");
            return Ok(());
        }

        let output = command::run(REG, ["delete", RUN_KEY, "/v", name, "/f"]).await?;
        if !output.success() {
            bail!(
                "reg delete {RUN_KEY} /v {name} failed with exit code {}: {}",
                output.code,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY_OUTPUT: &str = concat!(
        "\r\n",
        "HKEY_LOCAL_MACHINE\\SOFTWARE\\WOW6432Node\\Apache Software Foundation\\Tomcat\\9.0\\Tomcat9\r\n",
        "    InstallPath    REG_SZ    C:\\icm\\tomcat\r\n",
        "    Version    REG_SZ    9.0.62\r\n",
        "    Options    REG_MULTI_SZ    -Dcatalina.home=C:\\icm\\tomcat\\0-Dfile.encoding=UTF8\r\n",
        "    JvmMx    REG_DWORD    0x200\r\n",
        "    Empty    REG_SZ\r\n",
        "\r\n",
    );

    #[test]
    fn string_values_are_found_by_name() {
        let version = parse_query_value(QUERY_OUTPUT, "version").unwrap();
        assert_eq!(version.kind, "REG_SZ");
        assert_eq!(version.data, "9.0.62");
        assert_eq!(
            parse_query_value(QUERY_OUTPUT, "InstallPath").unwrap().data,
            "C:\\icm\\tomcat"
        );
    }

    #[test]
    fn multi_string_values_are_split() {
        let options = parse_query_value(QUERY_OUTPUT, "Options").unwrap();
        assert_eq!(options.kind, "REG_MULTI_SZ");
        assert_eq!(
            split_multi_string(&options.data),
            vec!["-Dcatalina.home=C:\\icm\\tomcat", "-Dfile.encoding=UTF8"]
        );
    }

    #[test]
    fn empty_and_missing_values() {
        assert_eq!(parse_query_value(QUERY_OUTPUT, "Empty").unwrap().data, "");
        assert!(parse_query_value(QUERY_OUTPUT, "Missing").is_none());
        // The key line itself is not a value.
        assert!(parse_query_value(QUERY_OUTPUT, "HKEY_LOCAL_MACHINE").is_none());
    }
}
