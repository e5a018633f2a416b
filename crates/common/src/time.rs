//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::{ElytraError, Result};

/// Current wall-clock time as unix epoch milliseconds.
pub fn now_ms() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| ElytraError::Internal(format!("system clock before epoch: {e}")))
}
