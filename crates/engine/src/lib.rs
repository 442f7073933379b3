//! stepwise-engine: drives visitors through multi-step processes.
//!
//! Components, leaves first:
//!
//! - [`DefinitionStore`]: owner-scoped and public lookups of processes,
//!   ordered steps and forms.
//! - [`ProgressRepository`]: one run per (process, session) with one
//!   completion record per step, created together.
//! - [`Reorderer`]: two-phase renumbering that never trips the
//!   (process, order_index) uniqueness constraint.
//! - [`ExecutionService`]: the progress state machine.
//! - [`AccessGate`]: short-lived per-visitor grants for private processes.
//!
//! [`ProcessManager`] is the owner-side surface that creates processes and
//! moves steps around; [`IdleSweeper`] abandons stale runs.
//!
//! Everything is generic over [`stepwise_storage::ProcessStorage`]; each
//! operation runs inside one storage snapshot.

mod clock;
mod config;
mod definitions;
mod error;
mod gate;
mod manager;
mod observer;
mod password;
mod progress;
mod reorder;
mod service;
mod sweeper;
mod txn;
mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, HashingParams};
pub use definitions::DefinitionStore;
pub use error::EngineError;
pub use gate::AccessGate;
pub use manager::{NewProcess, NewStep, ProcessManager};
pub use observer::{ObserverError, ProgressEvent, ProgressObserver, TracingObserver};
pub use password::{HashError, SecretHasher};
pub use progress::ProgressRepository;
pub use reorder::{order_after_move, validate_full_order, Reorderer};
pub use service::ExecutionService;
pub use sweeper::{IdleSweeper, SweepReport};
pub use view::{
    CompletionEntry, CurrentStep, ProcessCompletionOutcome, ProcessStructure, ProgressView,
    StartOutcome, StepCompletionOutcome, StepForm, StepSummary,
};
