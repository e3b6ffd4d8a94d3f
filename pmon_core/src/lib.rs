#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Print telemetry aggregation core (transport-agnostic).
//!
//! Turns a stream of partial, unreliable status snapshots from one 3D printer
//! into a coherent job-level picture. All I/O goes through the
//! `pmon_traits` collaborator traits.
//!
//! ## Architecture
//!
//! - **Merge**: per-field resolution of fresh, nulled and stored values (`merge`)
//! - **Lifecycle**: job identity, provisional jobs, reconciliation (`lifecycle`)
//! - **Timers**: preparation, first-layer check, pause, completion (`timers`)
//! - **Estimator**: gated remaining-time prediction (`estimator`)
//! - **Milestones**: one-shot threshold notices, stall and runout (`milestones`)
//! - **Transitions**: lifecycle and fault notices (`transitions`)
//! - **Ledger**: spool reserve / accumulate / finalize (`ledger`)
//! - **Persistence**: namespaced key-value bridge (`persistence`)
//!
//! `AggregatorContext` wires them together and `runner` drives one context
//! from a dedicated thread.

pub mod atomic;
pub mod builder;
pub mod config;
pub mod context;
pub mod conversions;
pub mod error;
pub mod estimator;
pub mod ledger;
pub mod lifecycle;
pub mod merge;
pub mod milestones;
pub mod mocks;
pub mod persistence;
pub mod runner;
pub mod snapshot;
pub mod timers;
pub mod transitions;
pub mod util;

pub use builder::MonitorBuilder;
pub use config::{MaterialCfg, MilestoneCfg, MonitorCfg, RunnerCfg, StallCfg};
pub use context::{AggregatorContext, Anchors, IngestReport};
pub use error::{BuildError, LedgerError, MonitorError, Report, Result};
pub use estimator::{Basis, EstimateOutcome, Prediction};
pub use ledger::{FinalizeOutcome, MaterialLedger, NewSpool, Spool};
pub use lifecycle::LifecycleEvent;
pub use snapshot::{JobState, Snapshot};
