//! Pre-append validation
//!
//! Checks an argument snapshot against the indices before the event that
//! carries it is built, so events never reference missing entities.

mod references;

pub use references::{FailureReason, ReferenceValidator, ValidationFailure};
