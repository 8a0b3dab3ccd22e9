//! Typed identifiers.

use std::fmt;

/// Opaque 64-bit row identifier used for joins inside the database
/// wrapper. Never exposed outside the index; hosts only ever see the
/// stable public id string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub i64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
