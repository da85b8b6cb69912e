//! Utility functions and helpers
//!
//! This module contains timestamp utilities and atomic file writes.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, atomic_write_with, cleanup_temp_files};
pub use time::now;
