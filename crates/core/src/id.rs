//! Identifiers for optimizer sessions.

use serde::{Deserialize, Serialize};

/// Identifier of one optimizer session.
///
/// Session ids are plain increasing integers so that a restarted process can
/// resume numbering from the largest id found in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// The first session of a fresh run.
    pub const FIRST: SessionId = SessionId(1);

    /// Wrap a raw session number.
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    /// The raw session number.
    pub fn get(self) -> u64 {
        self.0
    }

    /// The session that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::FIRST
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_serializes_as_number() {
        let json = serde_json::to_string(&SessionId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: SessionId = serde_json::from_str("7").unwrap();
        assert_eq!(back.get(), 7);
    }

    #[test]
    fn test_session_id_next() {
        assert_eq!(SessionId::FIRST.next(), SessionId::new(2));
        assert_eq!("12".parse::<SessionId>().unwrap(), SessionId::new(12));
    }
}
