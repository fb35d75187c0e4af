//! Load phases and their orchestration.
//!
//! ```text
//! ImportScheduler ─→ index creation ─→ PatchDispatcher (background)
//!         │                                   │
//!         └──── IndexConvergenceWaiter ───────┘
//! ```

pub mod convergence;
pub mod disk;
pub mod error;
pub mod import;
pub mod patch;
pub mod runner;

pub use convergence::{ConvergenceOutcome, ConvergenceState, IndexConvergenceWaiter, PollPolicy};
pub use disk::{DiskBenchmark, DiskBenchmarkOutcome};
pub use error::{ConvergenceError, HarnessError, ImportError, PatchError};
pub use import::{plan_round, ImportOutcome, ImportScheduler, RoundPlan};
pub use patch::{
    parse_processed_count, payments_below, PatchDispatcher, PatchOutcome, PatchSummary, PatchTask,
};
pub use runner::{build_store, run, run_with_store, RunOutcome};
