//! Lapse Import Engine
//!
//! Imports photos from an asset source into the photo store while adapting
//! to memory pressure.
//!
//! # Architecture
//!
//! ```text
//!   SourceAssetRef[] ──► AdaptiveImportScheduler ──► PhotoStore
//!                          │   ▲          │
//!              BatchPolicy │   │ level    │ failures
//!                          ▼   │          ▼
//!                   AssetSource  MemoryPressureMonitor   RetryQueue
//! ```
//!
//! After an import, [`QualityUpgrader`] can re-fetch every photo at full
//! quality. [`ImportService`] runs both as registered operations.

pub mod policy;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod upgrade;

pub use policy::{pacing_delay, BatchPlan, BatchPolicy, PacingKind};
pub use retry::{RetryEntry, RetryQueue};
pub use scheduler::*;
pub use service::*;
pub use source::*;
pub use upgrade::*;
