//! Answer records and the round scoring rule
//!
//! Scoring is a pure function from a completed pair of answers to a
//! pair of point deltas, with no access to timers or networking. Two
//! awards exist per round:
//!
//! * the correctness award (2): earned by a correct answer that beat
//!   the opponent, either because the opponent was wrong or because
//!   both were correct and this answer was strictly faster; an exact
//!   elapsed-time tie between two correct answers earns neither side
//!   anything
//! * the opponent-wrong bonus (1): earned by a player who actually
//!   answered while the opponent's answer was wrong, where a timeout
//!   counts as wrong; a correct answer against a plain wrong answer
//!   does not collect it on top of the correctness award, but a
//!   correct answer against a timeout does
//!
//! Totals are accumulated per match in a [`ScoreBoard`], which keeps
//! the per-round deltas so scores are non-decreasing by construction.

use std::{cmp::Ordering, collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    constants::scoring::{CORRECT_POINTS, OPPONENT_WRONG_BONUS},
    registry::Id,
};

/// One player's answer to one question
///
/// Immutable once recorded. At most one answer exists per question and
/// player; late or duplicate submissions are never recorded.
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// The answering player
    pub player: Id,
    /// The selected option index, or `None` if the player never answered
    pub choice: Option<usize>,
    /// Whether the selected option was the correct one
    pub is_correct: bool,
    /// Time from question broadcast to this answer
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub elapsed: Duration,
    /// Whether this answer was synthesized when the answer window closed
    pub timed_out: bool,
}

impl Answer {
    /// An answer actually submitted by a player
    pub fn submitted(player: Id, choice: usize, is_correct: bool, elapsed: Duration) -> Self {
        Self {
            player,
            choice: Some(choice),
            is_correct,
            elapsed,
            timed_out: false,
        }
    }

    /// The synthesized answer for a player who let the window close
    ///
    /// Recorded as incorrect with the full window as its elapsed time,
    /// so scoring always observes a complete pair.
    pub fn expired(player: Id, window: Duration) -> Self {
        Self {
            player,
            choice: None,
            is_correct: false,
            elapsed: window,
            timed_out: true,
        }
    }
}

/// Computes the point deltas for one completed pair of answers
///
/// Symmetric under swapping the arguments: if `score(a, b)` is
/// `(x, y)` then `score(b, a)` is `(y, x)`.
pub fn score(a: &Answer, b: &Answer) -> (u64, u64) {
    (delta(a, b), delta(b, a))
}

/// The points one answer earns against its opponent
fn delta(answer: &Answer, opponent: &Answer) -> u64 {
    let mut points = 0;

    if answer.is_correct {
        let beats = if opponent.is_correct {
            answer.elapsed < opponent.elapsed
        } else {
            true
        };
        if beats {
            points += CORRECT_POINTS;
        }
    }

    if !answer.timed_out && !opponent.is_correct {
        // a correct answer already covers a plain wrong opponent
        let covered = answer.is_correct && !opponent.timed_out;
        if !covered {
            points += OPPONENT_WRONG_BONUS;
        }
    }

    points
}

/// Cumulative scores for the two players of one match
///
/// Stores the per-round deltas in player order; totals are sums over
/// the rounds, so they can only grow as rounds resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBoard {
    players: [Id; 2],
    rounds: Vec<(u64, u64)>,
}

impl ScoreBoard {
    /// Creates an empty score board for the given pair
    pub fn new(players: [Id; 2]) -> Self {
        Self {
            players,
            rounds: Vec::new(),
        }
    }

    /// Appends one round's deltas, in player order
    pub fn apply(&mut self, deltas: (u64, u64)) {
        self.rounds.push(deltas);
    }

    /// The per-round deltas recorded so far
    pub fn rounds(&self) -> &[(u64, u64)] {
        &self.rounds
    }

    /// The cumulative totals, in player order
    pub fn pair(&self) -> (u64, u64) {
        self.rounds
            .iter()
            .fold((0, 0), |(a, b), (da, db)| (a + da, b + db))
    }

    /// The cumulative total for one player (zero for unknown IDs)
    pub fn total(&self, player: Id) -> u64 {
        let (first, second) = self.pair();
        if player == self.players[0] {
            first
        } else if player == self.players[1] {
            second
        } else {
            0
        }
    }

    /// The cumulative totals keyed by player ID, for client messages
    pub fn totals(&self) -> HashMap<Id, u64> {
        let (first, second) = self.pair();
        HashMap::from([(self.players[0], first), (self.players[1], second)])
    }

    /// The player with the strictly greater total, or `None` on a tie
    pub fn winner(&self) -> Option<Id> {
        let (first, second) = self.pair();
        match first.cmp(&second) {
            Ordering::Greater => Some(self.players[0]),
            Ordering::Less => Some(self.players[1]),
            Ordering::Equal => None,
        }
    }
}
