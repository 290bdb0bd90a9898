//! Utility functions and helpers for hoopguard.
//!
//! This module provides cross-cutting concerns like the injectable time
//! source, structured logging, credential sanitization, and retry logic with
//! backoff.
//!
//! # Submodules
//!
//! - `clock`: Wall-clock abstraction so window resets and TTLs are testable.
//! - `logging`: Tracing and logging initialization with security filters.
//! - `retry`: Retry helper that respects server-provided delay hints.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod clock;
pub mod logging;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
