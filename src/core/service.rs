//! Drives a named OS service through start/stop transitions.
//!
//! A transition only counts once a poll observes the terminal state. Errors
//! from the service control utility never escape: they are logged and read
//! as `ServiceState::Unknown`, and polling carries on until the attempt
//! budget is spent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::core::platform::ServiceControl;
use crate::error::ConfigError;

/// Wait after a verified stop so the OS releases file handles held by the
/// service.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum ServiceState {
    #[default]
    Unknown,
    Stopped,
    StartPending,
    StopPending,
    Running,
}

impl ServiceState {
    /// Map a service control state code. Anything unmapped is `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Stopped,
            2 => Self::StartPending,
            3 => Self::StopPending,
            4 => Self::Running,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Stopped => "STOPPED",
            Self::StartPending => "START_PENDING",
            Self::StopPending => "STOP_PENDING",
            Self::Running => "RUNNING",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the service state from service control output.
///
/// Looks for a line carrying the ` STATE ` marker followed by ` : ` and a
/// single digit code. The last such line wins; no marker, or a code outside
/// the enumeration, yields `Unknown`.
pub fn parse_status(output: &str) -> ServiceState {
    let mut state = ServiceState::Unknown;

    for line in output.lines() {
        // Pad so a marker at the very start of a trimmed line still matches.
        let padded = format!(" {line}");
        let Some(marker) = padded.find(" STATE ") else {
            continue;
        };
        let Some(separator) = padded[marker..].find(" : ") else {
            continue;
        };
        let code_start = marker + separator + 3;

        state = padded[code_start..]
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))
            .map(ServiceState::from_code)
            .unwrap_or(ServiceState::Unknown);
    }

    state
}

/// Identity and polling budget for one controlled service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    max_attempts: u32,
    poll_interval: Duration,
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>,
        max_attempts: u32,
        poll_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if max_attempts == 0 {
            return Err(ConfigError::NoAttempts(name));
        }
        if poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval(name));
        }
        Ok(Self {
            name,
            max_attempts,
            poll_interval,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Upper bound on how long a transition is polled for.
    pub fn budget(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

pub struct ServiceController {
    descriptor: ServiceDescriptor,
    control: Arc<dyn ServiceControl>,
    settle_delay: Duration,
}

#[derive(Clone, Copy)]
enum Command {
    Query,
    Start,
    Stop,
}

impl Command {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl ServiceController {
    pub fn new(descriptor: ServiceDescriptor, control: Arc<dyn ServiceControl>) -> Self {
        Self {
            descriptor,
            control,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub async fn query_state(&self) -> ServiceState {
        self.exec(Command::Query).await
    }

    /// Stop the service and wait until it is observed stopped.
    ///
    /// Already stopped is an immediate success without polling. A stop that
    /// is only confirmed by polling is followed by the settle delay.
    pub async fn stop_and_verify(&self) -> bool {
        if self.query_state().await == ServiceState::Stopped {
            debug!(service = %self.name(), "Service already stopped");
            return true;
        }

        if self.exec(Command::Stop).await == ServiceState::Stopped {
            return true;
        }

        if !self.poll_until(ServiceState::Stopped).await {
            return false;
        }

        if !self.settle_delay.is_zero() {
            debug!(
                service = %self.name(),
                settle_secs = self.settle_delay.as_secs(),
                "Waiting for service handles to be released"
            );
            sleep(self.settle_delay).await;
        }
        true
    }

    /// Start the service and wait until it is observed running.
    pub async fn start_and_verify(&self) -> bool {
        if self.query_state().await == ServiceState::Running {
            debug!(service = %self.name(), "Service already running");
            return true;
        }

        if self.exec(Command::Start).await == ServiceState::Running {
            return true;
        }

        self.poll_until(ServiceState::Running).await
    }

    async fn poll_until(&self, target: ServiceState) -> bool {
        let attempts = self.descriptor.max_attempts;

        for attempt in 1..=attempts {
            let state = self.query_state().await;
            if state == target {
                debug!(service = %self.name(), attempt, state = %state, "Target state reached");
                return true;
            }

            debug!(service = %self.name(), attempt, state = %state, target = %target, "Waiting for service");
            if attempt < attempts {
                sleep(self.descriptor.poll_interval).await;
            }
        }

        info!(
            service = %self.name(),
            target = %target,
            attempts,
            "Service did not reach target state"
        );
        false
    }

    async fn exec(&self, command: Command) -> ServiceState {
        let name = self.name();
        let result = match command {
            Command::Query => self.control.query(name).await,
            Command::Start => self.control.start(name).await,
            Command::Stop => self.control.stop(name).await,
        };

        match result {
            Ok(output) => parse_status(&output),
            Err(e) => {
                warn!(
                    service = %name,
                    command = command.as_str(),
                    error = %e,
                    "Service control call failed"
                );
                ServiceState::Unknown
            }
        }
    }
}
