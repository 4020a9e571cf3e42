//! Access control through `icacls`.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::adapters::command;
use crate::core::platform::{AccessControl, AccessEntry, EntryKind};

const ICACLS: &str = "icacls.exe";
/// Marks an entry inherited from the parent; it cannot be granted as is.
const INHERITED: &str = "(I)";

/// Parse the entries `icacls <path>` prints for a single path.
///
/// The first entry shares its line with the path itself; the listing ends at
/// the first blank line or the processing summary.
pub fn parse_icacls(output: &str, path: &str) -> Vec<AccessEntry> {
    let mut entries = Vec::new();

    for (index, line) in output.lines().enumerate() {
        let mut line = line.trim_end();
        if index == 0 {
            line = line.strip_prefix(path).unwrap_or(line);
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with("Successfully processed") {
            if index == 0 {
                continue;
            }
            break;
        }

        if let Some(split) = line.find(":(") {
            entries.push(AccessEntry {
                principal: line[..split].to_string(),
                rights: line[split + 1..].to_string(),
            });
        }
    }

    entries
}

/// The grant form of an entry, without the inheritance marker.
pub fn grant_argument(entry: &AccessEntry) -> String {
    format!("{}:{}", entry.principal, entry.rights.replace(INHERITED, ""))
}

fn collect(root: &Path, kind: EntryKind, out: &mut Vec<PathBuf>) -> Result<()> {
    let metadata = root
        .symlink_metadata()
        .with_context(|| format!("Failed to read {}", root.display()))?;

    match kind {
        EntryKind::Directories if metadata.is_dir() => out.push(root.to_path_buf()),
        EntryKind::Files if metadata.is_file() => out.push(root.to_path_buf()),
        _ => {}
    }

    if metadata.is_dir() {
        for entry in fs::read_dir(root)? {
            collect(&entry?.path(), kind, out)?;
        }
    }
    Ok(())
}

fn first_file(root: &Path) -> Result<Option<PathBuf>> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let metadata = path.symlink_metadata()?;
        if metadata.is_file() {
            return Ok(Some(path));
        }
        if metadata.is_dir() {
            if let Some(found) = first_file(&path)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IcaclsAccessControl;

#[async_trait]
impl AccessControl for IcaclsAccessControl {
    async fn read_entries(&self, path: &Path) -> Result<Vec<AccessEntry>> {
        let output = command::run(ICACLS, [path.as_os_str()]).await?;
        if !output.success() {
            bail!(
                "icacls {} failed with exit code {}: {}",
                path.display(),
                output.code,
                output.stderr.trim()
            );
        }
        Ok(parse_icacls(&output.stdout, &path.to_string_lossy()))
    }

    async fn read_first_file_entries(&self, path: &Path) -> Result<Vec<AccessEntry>> {
        let root = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || first_file(&root))
            .await
            .context("File search task panicked")??
            .ok_or_else(|| anyhow!("No file found under {}", path.display()))?;
        debug!(file = %file.display(), "Using file permissions as template");
        self.read_entries(&file).await
    }

    async fn apply_entries(
        &self,
        root: &Path,
        kind: EntryKind,
        entries: &[AccessEntry],
    ) -> Result<()> {
        if entries.is_empty() {
            bail!("No access control entries to apply on {}", root.display());
        }

        let start = root.to_path_buf();
        let targets = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            collect(&start, kind, &mut out).map(|_| out)
        })
        .await
        .context("Directory walk task panicked")??;

        let grants: Vec<String> = entries.iter().map(grant_argument).collect();
        for target in &targets {
            let mut args = vec![
                target.as_os_str().to_owned(),
                "/inheritance:r".into(),
                "/grant:r".into(),
            ];
            args.extend(grants.iter().map(Into::into));

            let output = command::run(ICACLS, &args).await?;
            if !output.success() {
                bail!(
                    "icacls failed on {} with exit code {}: {}",
                    target.display(),
                    output.code,
                    output.stdout.trim()
                );
            }
        }

        info!(root = %root.display(), kind = ?kind, count = targets.len(), "Permissions applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const OUTPUT: &str = "C:\\icm BUILTIN\\Administrators:(OI)(CI)(F)\r\n       NT AUTHORITY\\SYSTEM:(I)(OI)(CI)(F)\r\n       BUILTIN\\Users:(OI)(CI)(RX)\r\n\r\nSuccessfully processed 1 files; Failed processing 0 files\r\n";

    #[test]
    fn parses_every_entry() {
        let entries = parse_icacls(OUTPUT, "C:\\icm");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].principal, "BUILTIN\\Administrators");
        assert_eq!(entries[0].rights, "(OI)(CI)(F)");
        assert_eq!(entries[2].principal, "BUILTIN\\Users");
    }

    #[test]
    fn grant_drops_inheritance_marker() {
        let entries = parse_icacls(OUTPUT, "C:\\icm");
        assert_eq!(grant_argument(&entries[1]), "NT AUTHORITY\\SYSTEM:(OI)(CI)(F)");
    }

    #[test]
    fn walk_separates_directories_and_files() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("tomcat");
        fs::create_dir_all(root.join("conf")).unwrap();
        fs::write(root.join("conf/server.xml"), b"x").unwrap();

        let mut dirs = Vec::new();
        collect(&root, EntryKind::Directories, &mut dirs).unwrap();
        let mut files = Vec::new();
        collect(&root, EntryKind::Files, &mut files).unwrap();

        assert_eq!(dirs, vec![root.clone(), root.join("conf")]);
        assert_eq!(files, vec![root.join("conf/server.xml")]);
        assert_eq!(first_file(&root).unwrap(), Some(root.join("conf/server.xml")));
    }

    #[tokio::test]
    async fn empty_entry_list_is_rejected() {
        let temp = tempdir().unwrap();
        let result = IcaclsAccessControl
            .apply_entries(temp.path(), EntryKind::Files, &[])
            .await;
        assert!(result.is_err());
    }
}
