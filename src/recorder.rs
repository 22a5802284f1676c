//! Persistence collaborator boundary
//!
//! Finished matches and visit analytics are handed to a host-provided
//! recorder. Recording is fire-and-forget: a failure is logged at the
//! call site and never affects in-memory result delivery.

use serde::Serialize;
use thiserror::Error;

use crate::{registry::Id, room_id::RoomId};

/// An error reported by a recorder implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct Error(String);

impl Error {
    /// Creates a recorder error with the given reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// One player's final standing in a completed match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerResult {
    /// The player's connection ID
    pub id: Id,
    /// The player's display name at match end
    pub name: String,
    /// The player's final score
    pub score: u64,
}

/// The summary of a completed match, as handed to the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    /// The room the match was played in
    pub room: RoomId,
    /// The challenger's final standing
    pub player_one: PlayerResult,
    /// The challenged player's final standing
    pub player_two: PlayerResult,
    /// The winner's display name, or `None` on a tie
    pub winner_name: Option<String>,
}

/// A page-visit event, unrelated to match logic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitRecord {
    /// The visitor's IP address as reported by the transport
    pub ip: String,
    /// The visitor's user agent string
    pub user_agent: String,
    /// The requested path
    pub path: String,
}

/// Host-provided persistence for match results and visit analytics
///
/// Implementations must not block: the engine calls these from its
/// single sequencer and discards errors after logging them.
pub trait MatchRecorder {
    /// Persists a completed match summary
    ///
    /// # Errors
    ///
    /// Implementations report storage failures; the engine logs and
    /// ignores them.
    fn record_match(&self, record: &MatchRecord) -> Result<(), Error>;

    /// Persists a visit event
    ///
    /// # Errors
    ///
    /// Implementations report storage failures; the engine logs and
    /// ignores them.
    fn record_visit(&self, visit: &VisitRecord) -> Result<(), Error>;
}

/// A recorder that drops everything, for hosts without persistence
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl MatchRecorder for NullRecorder {
    fn record_match(&self, _record: &MatchRecord) -> Result<(), Error> {
        Ok(())
    }

    fn record_visit(&self, _visit: &VisitRecord) -> Result<(), Error> {
        Ok(())
    }
}
