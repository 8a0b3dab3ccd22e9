//! Change observers.

use std::sync::Arc;

use crate::errors::IndexError;
use crate::types::change::Change;

/// Observer of the change journal.
///
/// Delivery happens on a dedicated thread after the originating
/// transaction has committed, in journal order, at-least-once per
/// observer between process restarts. Observers must therefore be
/// idempotent. A failing observer is logged and skipped; it never
/// blocks commit nor the other observers.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, change: &Change) -> Result<(), IndexError>;
}

impl<T: ChangeListener + ?Sized> ChangeListener for Arc<T> {
    fn on_change(&self, change: &Change) -> Result<(), IndexError> {
        (**self).on_change(change)
    }
}
