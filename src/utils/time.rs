//! Time and timestamp utilities

use chrono::{DateTime, SubsecRound, Utc};

/// Current time, truncated to milliseconds
///
/// Event timestamps travel through JSON; millisecond precision keeps a
/// replayed timestamp equal to the one that was applied before persisting.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
