//! Deploy and teardown pipelines for the workshop kit.
//!
//! The apply path is Prober → Orphan Reconciler → Idempotent Operator →
//! Step Runner (sequential layers) → Cross-Account Fan-Out → verification.
//! The destroy path is the Teardown Sequencer's dependency-ordered phases,
//! parallel within each phase, followed by a polling monitor and a final
//! sweep of whatever remains.

pub mod deploy;
pub mod ensure;
pub mod fanout;
pub mod orphan;
pub mod step_runner;
pub mod sweep;
pub mod teardown;

pub use deploy::{DeployOutcome, Deployer};
pub use ensure::{EnsureOutcome, Ensurer};
pub use fanout::{FanOut, FanOutReport};
pub use orphan::OrphanReconciler;
pub use step_runner::{Mode, StepOutcome, StepRunner};
pub use sweep::sweep_remaining;
pub use teardown::TeardownSequencer;
