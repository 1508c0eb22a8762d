//! Identifier types.
//!
//! Wire identifiers exchanged with external reader processes are signed
//! 64-bit integers restricted to the non-negative range, so every id fits
//! in 63 random bits.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Draws 63 random bits from a v4 UUID.
fn random_63() -> i64 {
    let (high, _) = Uuid::new_v4().as_u64_pair();
    (high >> 1) as i64
}

/// Identifies one evaluation session towards external reader processes.
///
/// A single reader process may serve several sessions; the id lets it
/// keep per-session state apart.
///
/// # Example
///
/// ```
/// use tessera_types::EvaluatorId;
///
/// let a = EvaluatorId::new();
/// let b = EvaluatorId::new();
/// assert_ne!(a, b);
/// assert!(a.get() >= 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluatorId(i64);

impl EvaluatorId {
    /// Creates a random evaluator id.
    #[must_use]
    pub fn new() -> Self {
        Self(random_63())
    }

    /// Wraps a known id (for example one received over the wire).
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl Default for EvaluatorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EvaluatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluator:{}", self.0)
    }
}

/// Correlates a request with its response on the external reader channel.
///
/// Deliberately has no `Default`: every request must get a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(i64);

impl RequestId {
    /// Creates a random request id.
    #[must_use]
    pub fn new() -> Self {
        Self(random_63())
    }

    /// Wraps a known id.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_non_negative() {
        for _ in 0..256 {
            assert!(RequestId::new().get() >= 0);
            assert!(EvaluatorId::new().get() >= 0);
        }
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(RequestId::from_raw(7).to_string(), "req:7");
        assert_eq!(EvaluatorId::from_raw(3).to_string(), "evaluator:3");
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&RequestId::from_raw(42)).expect("should serialize id");
        assert_eq!(json, "42");
        let back: RequestId = serde_json::from_str(&json).expect("should deserialize id");
        assert_eq!(back.get(), 42);
    }
}
