//! Lapse Common Utilities
//!
//! Shared infrastructure for all Lapse crates:
//! - Error types and result aliases
//! - Cooperative cancellation, the operation registry and task handles
//! - Memory pressure monitoring
//! - Presentation-time helpers
//! - Progress reporting
//! - Tracing/logging initialization
//! - Configuration loading

pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod handle;
pub mod logging;
pub mod memory;
pub mod progress;

pub use cancel::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use handle::*;
pub use memory::*;
pub use progress::*;
