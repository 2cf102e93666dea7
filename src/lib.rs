//! retort - closed-loop optimization of chemical procedures
//!
//! A batch-iterative optimizer: propose parameter sets, bind them into a
//! procedure, execute on a bench, score the measured signals, feed the
//! results back, repeat until the budget runs out or the target is hit.
//!
//! # Architecture
//!
//! ```text
//! Propose → Bind → Execute → Score → Update
//!    ↓        ↓        ↓        ↓       ↓
//! algorithms procedure executor scoring  state
//! (random,   (steps +  (trait + (peaks,  (snapshot,
//!  lhs,      binding)  simulated novelty, resume,
//!  reproduce)           bench)   dispatch) CSV)
//! ```
//!
//! # Determinism
//!
//! Every random decision derives a fresh RNG from the campaign seed and a
//! persisted counter, so a resumed run replays the exact campaign the
//! uninterrupted run would have produced. The simulated bench is a pure
//! function of the batch values for the same reason.

pub mod algorithms;
pub mod codec;
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod executor;
pub mod procedure;
pub mod scoring;
pub mod signal;
pub mod state;
pub mod types;

// Re-export core types
pub use error::{OptimizerError, Result};
pub use types::{
    Batch, ConstrainedParameter, IterationRecord, Objective, ObjectiveKind, ParameterSpec,
    Phase, SignalKind,
};

// Re-export the loop surface
pub use config::OptimizerConfig;
pub use controller::{IterationController, RunSummary};
pub use executor::{ExecutionOutcome, Executor, SimulatedExecutor};
pub use signal::{Signal, SignalStore};
