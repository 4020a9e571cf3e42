//! Logging and tracing initialization.
//!
//! Console output is either human readable or JSON. When a results directory
//! is given, every event is also written without colours to
//! `install-tomcat.log` inside it, which is where the operator is pointed
//! after a failed run.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const RESULTS_LOG_FILE: &str = "install-tomcat.log";

/// Where and how events are written.
#[derive(Default)]
pub struct LogConfig {
    /// JSON lines on the console instead of the human readable format
    pub json: bool,
    /// Default level DEBUG instead of INFO
    pub verbose: bool,
    /// Directory receiving the results log file
    pub results_dir: Option<PathBuf>,
}

fn open_results_log(dir: &Path) -> Result<File> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results directory {}", dir.display()))?;
    let path = dir.join(RESULTS_LOG_FILE);
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
pub fn init(config: LogConfig) -> Result<()> {
    let level = if config.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tomcat_reinstall={}",
            level.as_str().to_lowercase()
        ))
    });

    let file_layer = match &config.results_dir {
        Some(dir) => {
            let file = open_results_log(dir)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let (json_layer, pretty_layer) = if config.json {
        let layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true);
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Lets a per-item log line through at most once per interval.
///
/// Owned by the loop doing the work; the first call always logs.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn should_log(&mut self) -> bool {
        self.should_log_at(Instant::now())
    }

    fn should_log_at(&mut self, now: Instant) -> bool {
        let due = self
            .last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_line_always_logs() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
    }

    #[test]
    fn logs_again_once_interval_elapsed() {
        let mut throttle = LogThrottle::new(Duration::from_millis(500));
        let start = Instant::now();
        assert!(throttle.should_log_at(start));
        assert!(!throttle.should_log_at(start + Duration::from_millis(499)));
        assert!(throttle.should_log_at(start + Duration::from_millis(500)));
        assert!(!throttle.should_log_at(start + Duration::from_millis(600)));
    }

    #[test]
    fn results_log_is_created_in_new_directory() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("InstallTomcatResults");
        open_results_log(&dir).unwrap();
        assert!(dir.join(RESULTS_LOG_FILE).is_file());
    }
}
