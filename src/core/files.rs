//! Small file edits performed directly by the core.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

/// Delete every entry directly under `dir`, except directories whose name is
/// in `preserved`.
///
/// A missing directory counts as clean. Entries that cannot be deleted are
/// logged, the rest are still processed, and the result is `false`.
pub async fn clean_directory(dir: &Path, preserved: &[&str]) -> bool {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return true,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list directory for cleanup");
            return false;
        }
    };

    let mut success = true;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                success = false;
                break;
            }
        };

        let path = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        let name = entry.file_name();
        let keep = is_dir && preserved.iter().any(|p| name.to_str() == Some(*p));

        if keep {
            info!(path = %path.display(), "Preserving");
            continue;
        }

        info!(path = %path.display(), "Deleting");
        let removed = if is_dir {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        if let Err(e) = removed {
            error!(path = %path.display(), error = %e, "Failed to delete");
            success = false;
        }
    }

    success
}

/// Create `path` with `contents` unless it already exists.
///
/// Returns whether the file was written. Existing content is never touched.
pub async fn write_if_absent(path: &Path, contents: &str) -> Result<bool> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;

    let mut file = match file {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("Failed to create {}", path.display())),
    };

    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.flush().await?;
    Ok(true)
}

/// Replace every `JavaHome=` assignment with `java_home`, keeping all other
/// lines.
pub fn rewrite_java_home(contents: &str, java_home: &str) -> String {
    let mut out = String::with_capacity(contents.len());
    for line in contents.lines() {
        let trimmed = line.trim_start();
        let is_assignment = trimmed
            .strip_prefix("JavaHome=")
            .is_some_and(|value| value.starts_with(|c: char| !c.is_whitespace()));

        if is_assignment {
            out.push_str("JavaHome=");
            out.push_str(java_home);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Make the installer's configuration file point at `java_home`: create it
/// when missing, otherwise update its `JavaHome=` line.
pub async fn write_installer_config(path: &Path, java_home: &str) -> Result<()> {
    match fs::read_to_string(path).await {
        Ok(existing) => {
            info!(path = %path.display(), "Installer configuration exists, updating JavaHome");
            fs::write(path, rewrite_java_home(&existing, java_home))
                .await
                .with_context(|| format!("Failed to update {}", path.display()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "Creating installer configuration");
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, format!("JavaHome={java_home}"))
                .await
                .with_context(|| format!("Failed to create {}", path.display()))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn cleanup_preserves_logs_directory_only() {
        let temp = tempdir().unwrap();
        let dir = temp.path();
        std::fs::create_dir_all(dir.join("logs")).unwrap();
        std::fs::write(dir.join("logs/catalina.log"), b"kept").unwrap();
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        std::fs::create_dir_all(dir.join("webapps/ROOT")).unwrap();
        // A plain file named like a preserved directory is still removed.
        std::fs::write(dir.join("README"), b"x").unwrap();

        assert!(clean_directory(dir, &["logs"]).await);

        let remaining: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(remaining, vec!["logs".to_string()]);
        assert!(dir.join("logs/catalina.log").exists());
    }

    #[tokio::test]
    async fn cleanup_of_missing_directory_succeeds() {
        let temp = tempdir().unwrap();
        assert!(clean_directory(&temp.path().join("tomcat"), &["logs"]).await);
    }

    #[tokio::test]
    async fn write_if_absent_never_overwrites() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("workers.properties");

        assert!(write_if_absent(&path, "first").await.unwrap());
        assert!(!write_if_absent(&path, "second").await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn java_home_line_is_replaced() {
        let input = "Foo=bar\n  JavaHome=C:\\old\\jre\nJavaHome=\n";
        let output = rewrite_java_home(input, "C:\\Program Files\\OpenJDK");
        assert_eq!(
            output,
            "Foo=bar\nJavaHome=C:\\Program Files\\OpenJDK\nJavaHome=\n"
        );
    }

    #[tokio::test]
    async fn installer_config_is_created_then_updated() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("install/tomcatConfig.ini");

        write_installer_config(&path, "C:\\jre1").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "JavaHome=C:\\jre1");

        write_installer_config(&path, "C:\\jre2").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "JavaHome=C:\\jre2\n");
    }
}
