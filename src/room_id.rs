//! Room ID generation and management
//!
//! This module provides functionality for generating unique room IDs
//! that identify a single two-player match. Room IDs are displayed in
//! octal format to make them easier to communicate verbally.

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

/// Minimum value for generated room IDs (in octal: 10000)
const MIN_VALUE: u16 = 0o10_000;
/// Maximum value for generated room IDs (in octal: 100000)
const MAX_VALUE: u16 = 0o100_000;

/// A unique identifier for a match room
///
/// Room IDs are generated randomly within a specific range and displayed
/// in octal format. The octal format reduces confusion when sharing room
/// IDs verbally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoomId(u16);

impl RoomId {
    /// Creates a new random room ID
    ///
    /// The ID is generated within the valid range to ensure it displays
    /// as a 5-digit octal number.
    pub fn new() -> Self {
        Self(fastrand::u16(MIN_VALUE..MAX_VALUE))
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RoomId {
    /// Formats the room ID as a 5-digit octal number
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:05o}", self.0)
    }
}

impl Serialize for RoomId {
    /// Serializes the room ID as an octal string
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RoomId {
    /// Deserializes a room ID from an octal string
    fn deserialize<D>(deserializer: D) -> Result<RoomId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RoomId::from_str(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

impl FromStr for RoomId {
    type Err = ParseIntError;

    /// Parses a room ID from an octal string representation
    ///
    /// # Errors
    ///
    /// Returns a `ParseIntError` if the string cannot be parsed as a valid
    /// octal number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(u16::from_str_radix(s, 8)?))
    }
}
