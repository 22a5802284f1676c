//! # Quizduel Game Library
//!
//! This library provides the core orchestration engine for head-to-head
//! trivia duels. It pairs two connected players through a
//! challenge/accept negotiation, runs the timed question/answer/scoring
//! state machine for each match room, and adjudicates results in real
//! time. Transport, rendering, and persistence are host concerns,
//! abstracted behind the [`session::Tunnel`] trait, an injected timer
//! closure, and the [`recorder::MatchRecorder`] trait.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

use derive_where::derive_where;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub mod constants;

pub mod duel;
pub mod matchmaking;
pub mod orchestrator;
pub mod question;
pub mod recorder;
pub mod registry;
pub mod room_id;
pub mod scoring;
pub mod session;

/// Messages sent to synchronize a connecting client with current state
///
/// This enum represents all possible synchronization messages that can
/// be sent to bring a client's view in line with the engine's state.
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum SyncMessage {
    /// Lobby synchronization messages
    Registry(registry::SyncMessage),
    /// Live match synchronization messages
    Duel(duel::SyncMessage),
}

impl SyncMessage {
    /// Converts the sync message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Messages sent to update clients about state changes
///
/// Update messages notify clients about changes that affect their local
/// view: roster updates, challenge traffic, questions, and results.
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum UpdateMessage {
    /// Registration and roster updates
    Registry(registry::UpdateMessage),
    /// Challenge negotiation updates
    Matchmaking(matchmaking::UpdateMessage),
    /// Match room updates
    Duel(duel::UpdateMessage),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Alarm messages for timed events
///
/// The host schedules these through the `schedule_message` closure it
/// passes into the engine and feeds them back through
/// [`orchestrator::Orchestrator::receive_alarm`] when their delay
/// elapses. Each alarm carries enough identity that a stale delivery is
/// recognized and ignored.
#[derive(Debug, Clone, derive_more::From, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Challenge expiry alarms
    Matchmaking(matchmaking::AlarmMessage),
    /// Match room alarms
    Duel(duel::AlarmMessage),
}

/// A truncated vector that maintains the exact count while limiting displayed items
///
/// This structure is useful for displaying a limited number of items while
/// still showing the total count. For example, showing "60 players" but only
/// listing the first 50 names.
#[derive(Debug, Clone, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// The exact total count of items
    exact_count: usize,
    /// The truncated list of items (up to the limit)
    items: Vec<T>,
}

impl<T: Clone> TruncatedVec<T> {
    /// Creates a new truncated vector from an iterator
    ///
    /// # Arguments
    ///
    /// * `list` - An iterator over items to include
    /// * `limit` - Maximum number of items to include in the truncated vector
    /// * `exact_count` - The exact total count of items (may be larger than limit)
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Maps a function over the items in the truncated vector
    pub fn map<F, U>(self, f: F) -> TruncatedVec<U>
    where
        F: Fn(T) -> U,
    {
        TruncatedVec {
            exact_count: self.exact_count,
            items: self.items.into_iter().map(f).collect_vec(),
        }
    }

    /// Returns the exact count of items
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// Returns the truncated items
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_vec_new() {
        let data = vec![1, 2, 3, 4, 5];
        let truncated = TruncatedVec::new(data.into_iter(), 3, 5);

        assert_eq!(truncated.exact_count(), 5);
        assert_eq!(truncated.items(), &[1, 2, 3]);
    }

    #[test]
    fn test_truncated_vec_new_limit_larger_than_items() {
        let data = vec![1, 2, 3];
        let truncated = TruncatedVec::new(data.into_iter(), 5, 3);

        assert_eq!(truncated.exact_count(), 3);
        assert_eq!(truncated.items(), &[1, 2, 3]);
    }

    #[test]
    fn test_truncated_vec_map() {
        let data = vec![1, 2, 3];
        let truncated = TruncatedVec::new(data.into_iter(), 3, 5);
        let mapped = truncated.map(|x| x * 2);

        assert_eq!(mapped.exact_count(), 5);
        assert_eq!(mapped.items(), &[2, 4, 6]);
    }

    #[test]
    fn test_update_message_to_message() {
        let entry = registry::PlayerEntry {
            id: registry::Id::new(),
            name: "Player1".to_owned(),
        };
        let roster = TruncatedVec::new(std::iter::once(entry), 10, 1);
        let update_msg = UpdateMessage::Registry(registry::UpdateMessage::PlayersList(roster));
        let json = update_msg.to_message();

        assert!(json.contains("Registry"));
        assert!(json.contains("PlayersList"));
        assert!(json.contains("Player1"));
    }

    #[test]
    fn test_alarm_message_round_trip() {
        let alarm: AlarmMessage = matchmaking::AlarmMessage::ChallengeExpired {
            challenger: registry::Id::new(),
            target: registry::Id::new(),
            seq: 7,
        }
        .into();
        let json = serde_json::to_string(&alarm).unwrap();
        let restored: AlarmMessage = serde_json::from_str(&json).unwrap();

        assert!(matches!(
            restored,
            AlarmMessage::Matchmaking(matchmaking::AlarmMessage::ChallengeExpired {
                seq: 7,
                ..
            })
        ));
    }
}
