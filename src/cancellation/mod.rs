//! Cooperative cancellation for the build pipeline.
//!
//! This module provides:
//! - A token carrying a classified cancellation cause
//! - A hub multiplexing the independent cancellation sources

mod hub;
mod token;

pub use hub::{CancellationHub, Signal};
pub use token::{CancelSource, CancelToken, CancellationCause};
