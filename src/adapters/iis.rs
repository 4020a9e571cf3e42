//! Edits of the IIS `applicationHost.config` file.
//!
//! The file is edited as text so comments, ordering and formatting of
//! everything else survive untouched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::core::platform::WebServerConfig;

static FILTER_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<isapiFilters>.*?</isapiFilters>").expect("filter block pattern is valid")
});

static LOCATION_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<location\s+path="([^"]*)""#).expect("location pattern is valid")
});

/// Where an `<isapiFilters>` block applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterScope {
    Global,
    Site(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRemoval {
    pub contents: String,
    /// Scopes a filter was removed from, in file order.
    pub removed: Vec<FilterScope>,
}

impl FilterRemoval {
    pub fn found(&self) -> bool {
        !self.removed.is_empty()
    }
}

fn filter_pattern(filter_name: &str) -> Result<Regex> {
    let pattern = format!(
        r#"(?s)[ \t]*<filter\b[^>]*?\bname="(?i:{})"[^>]*?(?:/>|>.*?</filter>)[ \t]*(?:\r?\n)?"#,
        regex::escape(filter_name)
    );
    Regex::new(&pattern).context("Invalid filter pattern")
}

/// Scope of a block starting after `preceding`: inside the last `<location>`
/// opened and not yet closed, otherwise global.
fn scope_of(preceding: &str) -> FilterScope {
    let last_open = LOCATION_OPEN.captures_iter(preceding).last();
    let last_close = preceding.rfind("</location>");

    match last_open {
        Some(caps) => {
            let start = caps.get(0).map_or(0, |m| m.start());
            if last_close.is_none_or(|close| close < start) {
                FilterScope::Site(caps[1].to_string())
            } else {
                FilterScope::Global
            }
        }
        None => FilterScope::Global,
    }
}

/// Remove at most one filter named `filter_name` from every `<isapiFilters>`
/// block in `contents`.
pub fn remove_filter(contents: &str, filter_name: &str) -> Result<FilterRemoval> {
    let filter = filter_pattern(filter_name)?;
    let mut output = String::with_capacity(contents.len());
    let mut removed = Vec::new();
    let mut last = 0;

    for block in FILTER_BLOCK.find_iter(contents) {
        output.push_str(&contents[last..block.start()]);
        last = block.end();

        let text = block.as_str();
        match filter.find(text) {
            Some(found) => {
                output.push_str(&text[..found.start()]);
                output.push_str(&text[found.end()..]);
                removed.push(scope_of(&contents[..block.start()]));
            }
            None => output.push_str(text),
        }
    }
    output.push_str(&contents[last..]);

    Ok(FilterRemoval {
        contents: output,
        removed,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IisConfigFile;

#[async_trait]
impl WebServerConfig for IisConfigFile {
    async fn remove_isapi_filter(&self, config_path: &Path, filter_name: &str) -> Result<bool> {
        let contents = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let removal = remove_filter(&contents, filter_name)?;
        if !removal.found() {
            debug!(filter = filter_name, "Filter not present in any scope");
            return Ok(false);
        }

        for scope in &removal.removed {
            match scope {
                FilterScope::Global => info!(filter = filter_name, "Removed global ISAPI filter"),
                FilterScope::Site(site) => {
                    info!(filter = filter_name, site = %site, "Removed site ISAPI filter")
                }
            }
        }

        tokio::fs::write(config_path, removal.contents)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONFIG: &str = r#"<configuration>
    <system.webServer>
        <isapiFilters>
            <filter name="Jakarta" path="C:\icm\tomcat\bin\i386\isapi_redirect.dll" />
            <filter name="Other" path="C:\other.dll" />
        </isapiFilters>
    </system.webServer>
    <location path="Default Web Site">
        <system.webServer>
            <isapiFilters>
                <filter name="jakarta" path="C:\icm\tomcat\bin\i386\isapi_redirect.dll" enabled="true">
                </filter>
                <filter name="Jakarta" path="C:\duplicate.dll" />
            </isapiFilters>
        </system.webServer>
    </location>
</configuration>
"#;

    #[test]
    fn removes_one_match_per_block_in_both_scopes() {
        let removal = remove_filter(CONFIG, "Jakarta").unwrap();

        assert_eq!(
            removal.removed,
            vec![
                FilterScope::Global,
                FilterScope::Site("Default Web Site".to_string())
            ]
        );
        assert!(removal.contents.contains(r#"<filter name="Other""#));
        // The second match in the site block is left for a later run.
        assert_eq!(removal.contents.matches("isapi_redirect.dll").count(), 0);
        assert!(removal.contents.contains("C:\\duplicate.dll"));
    }

    #[test]
    fn removal_keeps_the_surrounding_lines() {
        let removal = remove_filter(CONFIG, "Other").unwrap();
        assert_eq!(removal.removed, vec![FilterScope::Global]);
        assert_eq!(removal.contents.lines().count(), CONFIG.lines().count() - 1);
    }

    #[test]
    fn missing_filter_reports_not_found() {
        let removal = remove_filter(CONFIG, "Rewrite").unwrap();
        assert!(!removal.found());
        assert_eq!(removal.contents, CONFIG);
    }

    #[test]
    fn block_after_closed_location_is_global() {
        let preceding = r#"<location path="Site"></location><system.webServer>"#;
        assert_eq!(scope_of(preceding), FilterScope::Global);
        assert_eq!(
            scope_of(r#"<location path="Site"><system.webServer>"#),
            FilterScope::Site("Site".to_string())
        );
    }

    #[tokio::test]
    async fn file_is_only_written_when_something_was_removed() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("applicationHost.config");
        std::fs::write(&path, CONFIG).unwrap();

        assert!(!IisConfigFile.remove_isapi_filter(&path, "Rewrite").await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), CONFIG);

        assert!(IisConfigFile.remove_isapi_filter(&path, "Jakarta").await.unwrap());
        let updated = std::fs::read_to_string(&path).unwrap();
        assert!(!updated.contains("isapi_redirect.dll"));
    }
}
