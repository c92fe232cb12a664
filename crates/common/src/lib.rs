//! ReelKit Common Utilities
//!
//! Shared infrastructure for all ReelKit crates:
//! - Error taxonomy and result aliases
//! - Timeouts, stall detection and frame pacing
//! - Weighted progress coordination
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod progress;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use progress::*;
