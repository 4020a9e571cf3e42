//! Ordered execution of named steps with failure aggregation.
//!
//! Steps are declared up front as `{name, action, fatal}` records. A failing
//! non-fatal step marks the phase as degraded but the remaining steps still
//! run; a failing fatal step stops the phase and the rest are skipped.

use std::future::Future;
use std::pin::Pin;
use tracing::{error, info, warn};

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

type StepAction<'a> = Box<dyn FnOnce() -> StepFuture<'a> + Send + 'a>;

pub struct Step<'a> {
    name: String,
    fatal: bool,
    action: StepAction<'a>,
}

impl<'a> Step<'a> {
    /// A step whose failure is recorded but does not stop the phase.
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = bool> + Send + 'a,
    {
        Self {
            name: name.into(),
            fatal: false,
            action: Box::new(move || Box::pin(action())),
        }
    }

    /// A step whose failure aborts the phase.
    pub fn fatal<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = bool> + Send + 'a,
    {
        Self {
            fatal: true,
            ..Self::new(name, action)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StepResult {
    pub step_name: String,
    pub succeeded: bool,
    pub fatal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SequenceOutcome {
    pub phase: String,
    /// Results of the steps that ran, in order.
    pub results: Vec<StepResult>,
    /// Steps never started because a fatal step failed.
    pub skipped: Vec<String>,
    /// Name of the fatal step that stopped the phase.
    pub aborted_at: Option<String>,
}

impl SequenceOutcome {
    pub fn is_aborted(&self) -> bool {
        self.aborted_at.is_some()
    }

    /// Logical AND of every step outcome; false on abort.
    pub fn succeeded(&self) -> bool {
        !self.is_aborted() && self.results.iter().all(|r| r.succeeded)
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.succeeded)
            .map(|r| r.step_name.as_str())
            .collect()
    }
}

pub struct StepSequencer {
    phase: String,
}

impl StepSequencer {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
        }
    }

    pub async fn run(&self, steps: Vec<Step<'_>>) -> SequenceOutcome {
        let mut outcome = SequenceOutcome {
            phase: self.phase.clone(),
            ..Default::default()
        };
        let total = steps.len();
        let mut steps = steps.into_iter();

        info!(phase = %self.phase, steps = total, "Starting phase");

        while let Some(step) = steps.next() {
            let Step {
                name,
                fatal,
                action,
            } = step;

            info!(phase = %self.phase, step = %name, "Running step");
            let succeeded = action().await;

            outcome.results.push(StepResult {
                step_name: name.clone(),
                succeeded,
                fatal,
            });

            if succeeded {
                continue;
            }

            if fatal {
                error!(phase = %self.phase, step = %name, "Fatal step failed, skipping the rest of the phase");
                outcome.skipped = steps.by_ref().map(|s| s.name).collect();
                outcome.aborted_at = Some(name);
                break;
            }

            warn!(phase = %self.phase, step = %name, "Step failed, continuing");
        }

        if outcome.succeeded() {
            info!(phase = %self.phase, "Phase completed");
        } else if !outcome.is_aborted() {
            warn!(
                phase = %self.phase,
                failed = ?outcome.failed_steps(),
                "Phase completed with errors"
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(name: &str, result: bool, fatal: bool, runs: &Arc<AtomicUsize>) -> Step<'static> {
        let runs = runs.clone();
        let action = move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            result
        };
        if fatal {
            Step::fatal(name, action)
        } else {
            Step::new(name, action)
        }
    }

    #[tokio::test]
    async fn non_fatal_failure_runs_every_step() {
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = vec![
            counted("one", true, false, &runs),
            counted("two", false, false, &runs),
            counted("three", true, false, &runs),
        ];

        let outcome = StepSequencer::new("post-install").run(steps).await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(!outcome.succeeded());
        assert!(!outcome.is_aborted());
        assert_eq!(outcome.failed_steps(), vec!["two"]);
    }

    #[tokio::test]
    async fn fatal_failure_skips_the_rest() {
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = vec![
            counted("one", true, false, &runs),
            counted("two", false, true, &runs),
            counted("three", true, false, &runs),
        ];

        let outcome = StepSequencer::new("install").run(steps).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.aborted_at.as_deref(), Some("two"));
        assert_eq!(outcome.skipped, vec!["three".to_string()]);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn passing_fatal_step_does_not_abort() {
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = vec![
            counted("stop", true, true, &runs),
            counted("install", true, true, &runs),
        ];

        let outcome = StepSequencer::new("install").run(steps).await;
        assert!(outcome.succeeded());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_phase_succeeds() {
        let outcome = StepSequencer::new("noop").run(Vec::new()).await;
        assert!(outcome.succeeded());
    }
}
