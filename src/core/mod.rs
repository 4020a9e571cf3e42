pub mod files;
pub mod layout;
pub mod orchestrator;
pub mod platform;
pub mod progress;
pub mod sequencer;
pub mod service;
pub mod steps;
pub mod transfer;
pub mod version;

pub use layout::InstallLayout;
pub use orchestrator::{InstallKind, InstallationOrchestrator, RunOutcome, RunReport};
pub use platform::Platform;
pub use progress::{ProgressMonitor, ProgressReport};
pub use sequencer::{SequenceOutcome, Step, StepResult, StepSequencer};
pub use service::{ServiceController, ServiceDescriptor, ServiceState};
pub use transfer::{BulkDirectoryTransfer, TransferDirection, TransferJob};
pub use version::{InstallerPackage, ServerVersion};
