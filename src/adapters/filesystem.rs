//! Local file system operations.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::platform::{CopyOptions, FileSystem};
use crate::logging::LogThrottle;

/// Buffer size for file I/O operations (128KB)
const BUFFER_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    /// Minimum gap between per-file debug lines during directory copies
    pub log_interval: Duration,
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self {
            log_interval: Duration::from_millis(500),
        }
    }
}

/// Files and directories a copy will create, relative to the source.
#[derive(Default)]
struct ScanResult {
    /// Parents before children
    directories: Vec<PathBuf>,
    files: Vec<PathBuf>,
    total_bytes: u64,
}

fn scan(source: &Path, options: &CopyOptions) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    scan_recursive(source, source, options, &mut result)?;
    Ok(result)
}

fn scan_recursive(
    base: &Path,
    current: &Path,
    options: &CopyOptions,
    result: &mut ScanResult,
) -> Result<()> {
    let entries = fs::read_dir(current)
        .with_context(|| format!("Failed to read directory {}", current.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("Failed to read entry in {}", current.display()))?;
        let path = entry.path();

        // symlink_metadata so links are never followed
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let relative = path
            .strip_prefix(base)
            .map_err(|_| anyhow!("{} is outside {}", path.display(), base.display()))?
            .to_path_buf();

        if metadata.is_dir() {
            if options.recursive {
                result.directories.push(relative);
                scan_recursive(base, &path, options, result)?;
            }
        } else if metadata.is_file() && options.accepts(&path) {
            result.total_bytes += metadata.len();
            result.files.push(relative);
        }
    }

    Ok(())
}

fn copy_single_file(source: &Path, dest: &Path) -> Result<u64> {
    let reader = File::open(source)
        .with_context(|| format!("Failed to open source file {}", source.display()))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, reader);

    let writer = File::create(dest)
        .with_context(|| format!("Failed to create destination file {}", dest.display()))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, writer);

    let bytes = io::copy(&mut reader, &mut writer)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;
    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush {}: {}", dest.display(), e.error()))?;

    if let Err(e) = preserve_timestamps(source, dest) {
        debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
    }

    Ok(bytes)
}

fn preserve_timestamps(source: &Path, dest: &Path) -> Result<()> {
    let metadata = fs::metadata(source)?;
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(dest, atime, mtime)?;
    Ok(())
}

fn copy_tree(
    source: &Path,
    destination: &Path,
    options: &CopyOptions,
    throttle: &mut LogThrottle,
) -> Result<u64> {
    if !source.is_dir() {
        bail!("Source directory {} does not exist", source.display());
    }

    let scan = scan(source, options)?;
    debug!(
        files = scan.files.len(),
        directories = scan.directories.len(),
        total_bytes = scan.total_bytes,
        "Scan complete"
    );

    fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create {}", destination.display()))?;
    for dir in &scan.directories {
        let target = destination.join(dir);
        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
    }

    let mut copied = 0;
    for file in &scan.files {
        if throttle.should_log() {
            debug!(file = %file.display(), copied, total = scan.total_bytes, "Copying");
        }
        copied += copy_single_file(&source.join(file), &destination.join(file))?;
    }

    Ok(copied)
}

/// Extract every entry of a zip archive under `destination`, overwriting
/// existing files. Entries escaping the destination are rejected.
fn extract_zip(archive: &Path, destination: &Path) -> Result<usize> {
    let file =
        File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("{} is not a valid zip archive", archive.display()))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            bail!("Archive entry {} escapes the destination", entry.name());
        };
        let out_path = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::with_capacity(BUFFER_SIZE, File::create(&out_path)?);
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract {}", out_path.display()))?;
    }

    Ok(zip.len())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("File system task panicked")?
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()> {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        blocking(move || {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            copy_single_file(&source, &destination).map(|_| ())
        })
        .await
    }

    async fn copy_directory(
        &self,
        source: &Path,
        destination: &Path,
        options: &CopyOptions,
    ) -> Result<()> {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        let options = options.clone();
        let mut throttle = LogThrottle::new(self.log_interval);

        let bytes =
            blocking(move || copy_tree(&source, &destination, &options, &mut throttle)).await?;
        debug!(bytes, "Directory copy complete");
        Ok(())
    }

    async fn delete_directory(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Nothing to delete");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    async fn unzip(&self, archive: &Path, destination: &Path) -> Result<()> {
        let archive = archive.to_path_buf();
        let destination = destination.to_path_buf();
        let entries = blocking({
            let archive = archive.clone();
            move || extract_zip(&archive, &destination)
        })
        .await?;
        info!(archive = %archive.display(), entries, "Archive extracted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn flat_copy_filters_by_extension() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("bin");
        let dest = temp.path().join("install");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("setup.war"), b"war").unwrap();
        fs::write(source.join("Admin.WAR"), b"war").unwrap();
        fs::write(source.join("registry.jar"), b"jar").unwrap();
        fs::write(source.join("nested/inner.war"), b"war").unwrap();

        LocalFileSystem::default()
            .copy_directory(&source, &dest, &CopyOptions::flat_with_extension("war"))
            .await
            .unwrap();

        assert!(dest.join("setup.war").is_file());
        assert!(dest.join("Admin.WAR").is_file());
        assert!(!dest.join("registry.jar").exists());
        assert!(!dest.join("nested").exists());
    }

    #[tokio::test]
    async fn missing_source_directory_is_an_error() {
        let temp = tempdir().unwrap();
        let result = LocalFileSystem::default()
            .copy_directory(
                &temp.path().join("absent"),
                &temp.path().join("dest"),
                &CopyOptions::tree(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn copy_file_creates_parent_directories() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("web.config");
        fs::write(&source, b"<configuration/>").unwrap();
        let dest = temp.path().join("tomcat/bin/i386/web.config");

        LocalFileSystem::default().copy_file(&source, &dest).await.unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"<configuration/>");
    }

    #[tokio::test]
    async fn deleting_missing_directory_succeeds() {
        let temp = tempdir().unwrap();
        LocalFileSystem::default()
            .delete_directory(&temp.path().join("webapps/docs"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unzip_extracts_nested_entries() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("realm.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::SimpleFileOptions::default();
            zip.add_directory("realm/", options).unwrap();
            zip.start_file("realm/realm.jar", options).unwrap();
            zip.write_all(b"jar bytes").unwrap();
            zip.finish().unwrap();
        }
        let lib = temp.path().join("lib");

        LocalFileSystem::default().unzip(&archive, &lib).await.unwrap();

        assert_eq!(fs::read(lib.join("realm/realm.jar")).unwrap(), b"jar bytes");
    }

    #[tokio::test]
    async fn unzip_rejects_garbage() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("broken.zip");
        fs::write(&archive, b"not a zip").unwrap();
        assert!(
            LocalFileSystem::default()
                .unzip(&archive, &temp.path().join("lib"))
                .await
                .is_err()
        );
    }
}
