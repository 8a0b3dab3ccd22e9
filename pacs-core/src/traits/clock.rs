//! Clock abstraction.
//!
//! The index never reads wall-clock time directly; stability
//! promotion and change timestamps go through this trait so that
//! tests can drive time by hand.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Current time as Unix seconds.
    fn unix_seconds(&self) -> i64;
}

/// Wall-clock implementation used by production hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn unix_seconds(&self) -> i64 {
        (**self).unix_seconds()
    }
}
