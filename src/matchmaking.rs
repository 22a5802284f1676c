//! Challenge negotiation between idle players
//!
//! A challenge is an offer from one idle player to another. It stays
//! pending until the target accepts or rejects it, or until its expiry
//! timer fires. At most one challenge is outstanding per challenger; a
//! newer one replaces the older and bumps a sequence number, so the
//! superseded expiry alarm fails its re-check and does nothing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

use crate::{
    registry::{Id, PlayerEntry},
    room_id::RoomId,
};

/// An outstanding challenge from one player to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChallenge {
    /// The player who issued the challenge
    pub challenger: Id,
    /// The player being challenged
    pub target: Id,
    /// Sequence number distinguishing this challenge from replaced ones
    pub seq: u64,
    /// When the challenge was issued
    pub issued_at: SystemTime,
}

/// Errors that can occur while settling a challenge
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No live challenge matches the given (challenger, target) pair,
    /// either because it expired, was withdrawn, or was never issued
    #[error("no matching challenge is pending")]
    NoSuchChallenge,
}

/// Update messages originating from challenge negotiation
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// Tells the target who is challenging them
    ChallengeRequest(PlayerEntry),
    /// Tells both players their match room is ready
    ChallengeAccepted {
        /// The room the new match will be played in
        room: RoomId,
    },
    /// Tells the challenger who turned them down
    ChallengeRejected(PlayerEntry),
    /// Tells the challenger the named player did not respond
    ChallengeExpired {
        /// Display name of the unresponsive player
        name: String,
    },
}

/// Alarm messages for challenge expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// The expiry window of a challenge has elapsed
    ChallengeExpired {
        /// The player who issued the challenge
        challenger: Id,
        /// The player who was challenged
        target: Id,
        /// Sequence number of the challenge the alarm was armed for
        seq: u64,
    },
}

/// Tracks outstanding challenges, keyed by challenger
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Matchmaker {
    pending: HashMap<Id, PendingChallenge>,
    next_seq: u64,
}

impl Matchmaker {
    /// Issues a challenge, replacing any outstanding one by the same challenger
    pub fn issue(&mut self, challenger: Id, target: Id) -> PendingChallenge {
        let seq = self.next_seq;
        self.next_seq += 1;
        let challenge = PendingChallenge {
            challenger,
            target,
            seq,
            issued_at: SystemTime::now(),
        };
        self.pending.insert(challenger, challenge);
        challenge
    }

    /// Settles the challenge matching the exact (challenger, target) pair
    ///
    /// Used for both accept and reject: only the pending pair itself
    /// may be settled, which prevents acting on a stale or unrelated
    /// challenge.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoSuchChallenge` if no live challenge matches.
    pub fn take(&mut self, target: Id, challenger: Id) -> Result<PendingChallenge, Error> {
        if self
            .pending
            .get(&challenger)
            .is_some_and(|c| c.target == target)
        {
            self.pending.remove(&challenger).ok_or(Error::NoSuchChallenge)
        } else {
            Err(Error::NoSuchChallenge)
        }
    }

    /// Removes the challenge an expiry alarm was armed for
    ///
    /// Returns `None` when the challenge was already settled or
    /// replaced (the sequence number no longer matches); the stale
    /// alarm must then do nothing.
    pub fn expire(&mut self, challenger: Id, target: Id, seq: u64) -> Option<PendingChallenge> {
        if self
            .pending
            .get(&challenger)
            .is_some_and(|c| c.target == target && c.seq == seq)
        {
            self.pending.remove(&challenger)
        } else {
            None
        }
    }

    /// Invalidates every challenge involving a departed player
    ///
    /// Returns the cancelled challenges so the caller can notify the
    /// counterparties.
    pub fn cancel_involving(&mut self, id: Id) -> Vec<PendingChallenge> {
        let mut cancelled = Vec::new();
        self.pending.retain(|_, challenge| {
            if challenge.challenger == id || challenge.target == id {
                cancelled.push(*challenge);
                false
            } else {
                true
            }
        });
        cancelled
    }

    /// The outstanding challenge issued by the given player, if any
    pub fn pending_for(&self, challenger: Id) -> Option<&PendingChallenge> {
        self.pending.get(&challenger)
    }

    /// The number of outstanding challenges
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Checks whether no challenges are outstanding
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_take() {
        let mut matchmaker = Matchmaker::default();
        let (challenger, target) = (Id::new(), Id::new());

        matchmaker.issue(challenger, target);
        let challenge = matchmaker.take(target, challenger).unwrap();
        assert_eq!(challenge.challenger, challenger);
        assert_eq!(challenge.target, target);
        assert!(matchmaker.is_empty());
    }

    #[test]
    fn test_take_requires_exact_pair() {
        let mut matchmaker = Matchmaker::default();
        let (challenger, target, other) = (Id::new(), Id::new(), Id::new());

        matchmaker.issue(challenger, target);
        assert_eq!(
            matchmaker.take(other, challenger),
            Err(Error::NoSuchChallenge)
        );
        assert_eq!(
            matchmaker.take(target, other),
            Err(Error::NoSuchChallenge)
        );
        assert_eq!(matchmaker.len(), 1);
    }

    #[test]
    fn test_replacement_invalidates_old_expiry() {
        let mut matchmaker = Matchmaker::default();
        let (challenger, first_target, second_target) = (Id::new(), Id::new(), Id::new());

        let first = matchmaker.issue(challenger, first_target);
        let second = matchmaker.issue(challenger, second_target);
        assert_ne!(first.seq, second.seq);
        assert_eq!(matchmaker.len(), 1);

        // the superseded alarm finds nothing to expire
        assert!(matchmaker.expire(challenger, first_target, first.seq).is_none());
        // the live one does
        assert!(matchmaker
            .expire(challenger, second_target, second.seq)
            .is_some());
        assert!(matchmaker.is_empty());
    }

    #[test]
    fn test_expired_challenge_cannot_be_taken() {
        let mut matchmaker = Matchmaker::default();
        let (challenger, target) = (Id::new(), Id::new());

        let challenge = matchmaker.issue(challenger, target);
        matchmaker.expire(challenger, target, challenge.seq).unwrap();
        assert_eq!(
            matchmaker.take(target, challenger),
            Err(Error::NoSuchChallenge)
        );
    }

    #[test]
    fn test_rechallenge_same_target_resets_window() {
        let mut matchmaker = Matchmaker::default();
        let (challenger, target) = (Id::new(), Id::new());

        let first = matchmaker.issue(challenger, target);
        let second = matchmaker.issue(challenger, target);

        // the first alarm no longer matches, the challenge stays live
        assert!(matchmaker.expire(challenger, target, first.seq).is_none());
        assert!(matchmaker.take(target, challenger).is_ok());
        assert!(second.seq > first.seq);
    }

    #[test]
    fn test_cancel_involving_either_side() {
        let mut matchmaker = Matchmaker::default();
        let (a, b, c) = (Id::new(), Id::new(), Id::new());

        matchmaker.issue(a, b);
        matchmaker.issue(c, a);

        let cancelled = matchmaker.cancel_involving(a);
        assert_eq!(cancelled.len(), 2);
        assert!(matchmaker.is_empty());
    }
}
