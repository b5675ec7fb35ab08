//! Processor identifiers.

use std::{
    fmt,
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};
use thiserror::Error;

/// Processor id decode error.
#[derive(Error, Debug)]
#[error("invalid processor id: {0}")]
pub struct InvalidProcessorId(String);

/// Identifies a processor in the network.
///
/// Processor ids are the dense range `[1..n]` and double as polynomial abscissas: processor `i`
/// always evaluates shares at `x = i`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessorId(u32);

impl ProcessorId {
    /// Constructs a processor id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The numeric value of this id.
    pub fn as_inner(&self) -> u32 {
        self.0
    }
}

impl FromStr for ProcessorId {
    type Err = InvalidProcessorId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u32 = s.parse().map_err(|_| InvalidProcessorId(s.to_string()))?;
        if id == 0 {
            return Err(InvalidProcessorId(s.to_string()));
        }
        Ok(Self(id))
    }
}

impl Display for ProcessorId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for ProcessorId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "ProcessorId({})", self.0)
    }
}

impl From<u32> for ProcessorId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let id: ProcessorId = "3".parse().unwrap();
        assert_eq!(id, ProcessorId::new(3));
        assert_eq!(id.to_string(), "3");
    }

    #[test]
    fn zero_is_rejected() {
        assert!("0".parse::<ProcessorId>().is_err());
        assert!("nope".parse::<ProcessorId>().is_err());
    }

    #[test]
    fn ordering_follows_inner() {
        assert!(ProcessorId::new(1) < ProcessorId::new(2));
    }
}
