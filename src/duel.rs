//! Match (room) state machine
//!
//! This module owns the lifecycle of one two-player match: the start
//! grace period, question cycling, answer collection, timeout-driven
//! resolution, and the end-of-match summary. Every timed transition is
//! scheduled through the injected `schedule_message` closure, and every
//! alarm is re-checked against current state before it acts, so a round
//! is resolved exactly once no matter whether the last answer or the
//! answer timer arrives first.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;
use web_time::SystemTime;

use crate::{
    constants,
    question::{Question, QuestionBank},
    recorder::{MatchRecord, PlayerResult},
    registry::{Id, Registry},
    room_id::RoomId,
    scoring::{self, Answer, ScoreBoard},
    session::Tunnel,
};

/// The lifecycle phase of a match
///
/// A match moves strictly forward through these phases; `QuestionActive`
/// and `Scoring` alternate once per question until the match finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    /// Just created, start alarm not yet armed
    #[default]
    Created,
    /// Waiting out the grace period before the first question
    Starting,
    /// A question is open for answers
    QuestionActive,
    /// The current question is resolved, result on screen
    Scoring,
    /// All questions played, or the match was torn down
    Finished,
}

/// The currently open question and when it was asked
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActiveQuestion {
    question: Question,
    asked_at: SystemTime,
}

/// Update messages sent to the two players of a match
#[serde_with::serde_as]
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// A new question is open for answers
    NewQuestion {
        /// 1-based index of this question
        index: usize,
        /// Total number of questions in the match
        total: usize,
        /// The question text
        text: String,
        /// The ordered answer options
        options: Vec<String>,
        /// Duration the question stays open
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        time_limit: Duration,
    },
    /// The result of a resolved question
    QuestionResult {
        /// 1-based index of the resolved question
        index: usize,
        /// Total number of questions in the match
        total: usize,
        /// Index of the correct option
        correct_option: usize,
        /// Both recorded answers, in player order
        answers: Vec<Answer>,
        /// Updated cumulative scores
        scores: HashMap<Id, u64>,
    },
    /// The final result of the match
    GameOver {
        /// Final cumulative scores
        scores: HashMap<Id, u64>,
        /// The winning player, or `None` on a tie
        winner: Option<Id>,
        /// Whether the match ended in a tie
        is_tie: bool,
        /// The challenger's final standing
        player_one: PlayerResult,
        /// The challenged player's final standing
        player_two: PlayerResult,
    },
    /// The other player disconnected and the match was discarded
    OpponentLeft {
        /// Display name of the player who left
        name: String,
    },
}

/// Sync messages for a client reconnecting into a live match
#[serde_with::serde_as]
#[derive(Debug, Serialize, Clone)]
pub enum SyncMessage {
    /// The currently open question with its remaining time
    Question {
        /// 1-based index of the open question
        index: usize,
        /// Total number of questions in the match
        total: usize,
        /// The question text
        text: String,
        /// The ordered answer options
        options: Vec<String>,
        /// Time left before the answer window closes
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        remaining: Duration,
    },
}

/// Alarm messages for timed match transitions
///
/// Every alarm carries the room ID and the match serial so that a
/// stale callback, firing after the room was finished or its ID
/// reused, fails its re-check and does nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Ask the first question after the start grace period
    Begin {
        /// The room the alarm belongs to
        room: RoomId,
        /// The serial of the match the alarm was armed for
        serial: u64,
    },
    /// Close the answer window of the given question
    AnswerTimeout {
        /// The room the alarm belongs to
        room: RoomId,
        /// The serial of the match the alarm was armed for
        serial: u64,
        /// 1-based index of the question the window was armed for
        index: usize,
    },
    /// Move past the result screen of the given question
    Advance {
        /// The room the alarm belongs to
        room: RoomId,
        /// The serial of the match the alarm was armed for
        serial: u64,
        /// 1-based index of the question whose result is on screen
        index: usize,
    },
}

impl AlarmMessage {
    /// The room this alarm was armed for
    pub fn room(&self) -> RoomId {
        match self {
            Self::Begin { room, .. }
            | Self::AnswerTimeout { room, .. }
            | Self::Advance { room, .. } => *room,
        }
    }

    /// The match serial this alarm was armed for
    pub fn serial(&self) -> u64 {
        match self {
            Self::Begin { serial, .. }
            | Self::AnswerTimeout { serial, .. }
            | Self::Advance { serial, .. } => *serial,
        }
    }
}

/// One two-player match and all of its state
///
/// Owned exclusively by the orchestrator's room table; players hold
/// only the room ID for routing. No two matches share mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Duel {
    id: RoomId,
    serial: u64,
    players: [Id; 2],
    board: ScoreBoard,
    total_questions: usize,
    /// 1-based index of the current question, 0 before the first
    index: usize,
    current: Option<ActiveQuestion>,
    answers: HashMap<usize, HashMap<Id, Answer>>,
    phase: Phase,
}

impl Duel {
    /// Creates a match for the given pair
    ///
    /// The player order is fixed at creation: the challenger first,
    /// then the challenged player. Winner and tie reporting depend on
    /// this order staying stable.
    pub fn new(id: RoomId, serial: u64, players: [Id; 2]) -> Self {
        Self {
            id,
            serial,
            players,
            board: ScoreBoard::new(players),
            total_questions: constants::duel::TOTAL_QUESTIONS,
            index: 0,
            current: None,
            answers: HashMap::new(),
            phase: Phase::Created,
        }
    }

    /// The room ID of this match
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// The serial stamped into this match's alarms
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The two players, challenger first
    pub fn players(&self) -> [Id; 2] {
        self.players
    }

    /// The current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 1-based index of the current question, 0 before the first
    pub fn question_index(&self) -> usize {
        self.index
    }

    /// The cumulative score board
    pub fn scores(&self) -> &ScoreBoard {
        &self.board
    }

    /// Checks whether the given player belongs to this match
    pub fn contains(&self, player: Id) -> bool {
        self.players.contains(&player)
    }

    /// The other player of the match, if `player` is one of the two
    pub fn opponent_of(&self, player: Id) -> Option<Id> {
        match self.players {
            [a, b] if a == player => Some(b),
            [a, b] if b == player => Some(a),
            _ => None,
        }
    }

    /// Attempts to transition from one phase to another
    ///
    /// The transition succeeds only if the current phase matches the
    /// expected `before` phase. This is the resolution guard: both the
    /// last-answer path and the timer path funnel through it, and only
    /// the first one to arrive proceeds.
    fn change_state(&mut self, before: Phase, after: Phase) -> bool {
        if self.phase == before {
            self.phase = after;
            true
        } else {
            false
        }
    }

    /// Sends an update message to both players
    fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &super::UpdateMessage,
        tunnel_finder: F,
    ) {
        for id in self.players {
            if let Some(tunnel) = tunnel_finder(id) {
                tunnel.send_message(message);
            }
        }
    }

    /// Arms the start alarm for the grace period before the first question
    pub fn start<S: FnMut(super::AlarmMessage, Duration)>(&mut self, mut schedule_message: S) {
        if self.change_state(Phase::Created, Phase::Starting) {
            schedule_message(
                AlarmMessage::Begin {
                    room: self.id,
                    serial: self.serial,
                }
                .into(),
                Duration::from_secs(constants::duel::START_DELAY_SECONDS),
            );
        }
    }

    /// Asks the first question once the grace period has elapsed
    pub fn begin<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(super::AlarmMessage, Duration)>(
        &mut self,
        bank: &QuestionBank,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        if self.change_state(Phase::Starting, Phase::QuestionActive) {
            self.ask_next(bank, schedule_message, tunnel_finder);
        } else {
            debug!(room = %self.id, "start alarm ignored, match is not starting");
        }
    }

    /// Draws and broadcasts the next question, arming its answer timer
    fn ask_next<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(super::AlarmMessage, Duration)>(
        &mut self,
        bank: &QuestionBank,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        let question = bank.draw().clone();
        self.index += 1;
        let time_limit = Duration::from_secs(constants::duel::ANSWER_WINDOW_SECONDS);

        self.announce(
            &UpdateMessage::NewQuestion {
                index: self.index,
                total: self.total_questions,
                text: question.text().to_owned(),
                options: question.options().to_vec(),
                time_limit,
            }
            .into(),
            tunnel_finder,
        );

        schedule_message(
            AlarmMessage::AnswerTimeout {
                room: self.id,
                serial: self.serial,
                index: self.index,
            }
            .into(),
            time_limit,
        );

        self.current = Some(ActiveQuestion {
            question,
            asked_at: SystemTime::now(),
        });
    }

    /// Records one player's answer to the open question
    ///
    /// Ignored (with a log line, no state change) if no question is
    /// open, the index does not match the open question, the sender is
    /// not one of the match's players, the option does not exist, or
    /// the player already answered. If this completes the pair, the
    /// question is resolved immediately.
    pub fn submit_answer<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(super::AlarmMessage, Duration),
    >(
        &mut self,
        player: Id,
        question_index: usize,
        option_index: usize,
        elapsed: Duration,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        if self.phase != Phase::QuestionActive {
            debug!(room = %self.id, %player, "answer ignored, no question is open");
            return;
        }
        if question_index != self.index {
            debug!(
                room = %self.id,
                question_index,
                current = self.index,
                "answer ignored, not the open question"
            );
            return;
        }
        if !self.contains(player) {
            debug!(room = %self.id, %player, "answer ignored, sender is not in this match");
            return;
        }
        let (is_correct, valid_option) = match &self.current {
            Some(active) => (
                active.question.is_correct(option_index),
                active.question.has_option(option_index),
            ),
            None => return,
        };
        if !valid_option {
            debug!(room = %self.id, %player, option_index, "answer ignored, no such option");
            return;
        }

        let window = Duration::from_secs(constants::duel::ANSWER_WINDOW_SECONDS);
        let completed = {
            let recorded = self.answers.entry(question_index).or_default();
            if recorded.contains_key(&player) {
                debug!(room = %self.id, %player, "duplicate answer ignored");
                return;
            }
            recorded.insert(
                player,
                Answer::submitted(player, option_index, is_correct, elapsed.min(window)),
            );
            self.players.iter().all(|p| recorded.contains_key(p))
        };

        if completed {
            self.resolve(schedule_message, tunnel_finder);
        }
    }

    /// Closes the answer window of the given question
    ///
    /// Called when the answer timer fires. A no-op if the question was
    /// already resolved by a completed answer pair.
    pub fn handle_timeout<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(super::AlarmMessage, Duration),
    >(
        &mut self,
        question_index: usize,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        if self.phase != Phase::QuestionActive || question_index != self.index {
            debug!(
                room = %self.id,
                question_index,
                "answer timer ignored, question already resolved"
            );
            return;
        }
        self.resolve(schedule_message, tunnel_finder);
    }

    /// Resolves the open question exactly once
    ///
    /// Synthesizes timed-out answers for any player without a recorded
    /// one, applies the scoring rule, broadcasts the round result, and
    /// arms the advance alarm.
    fn resolve<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(super::AlarmMessage, Duration)>(
        &mut self,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if !self.change_state(Phase::QuestionActive, Phase::Scoring) {
            debug!(room = %self.id, index = self.index, "question already resolved");
            return;
        }
        let Some(correct_option) = self.current.as_ref().map(|a| a.question.correct_option())
        else {
            return;
        };

        let window = Duration::from_secs(constants::duel::ANSWER_WINDOW_SECONDS);
        let [first, second] = self.players;
        let (a, b) = {
            let recorded = self.answers.entry(self.index).or_default();
            for player in [first, second] {
                recorded
                    .entry(player)
                    .or_insert_with(|| Answer::expired(player, window));
            }
            (recorded[&first].clone(), recorded[&second].clone())
        };

        self.board.apply(scoring::score(&a, &b));

        self.announce(
            &UpdateMessage::QuestionResult {
                index: self.index,
                total: self.total_questions,
                correct_option,
                answers: vec![a, b],
                scores: self.board.totals(),
            }
            .into(),
            tunnel_finder,
        );

        schedule_message(
            AlarmMessage::Advance {
                room: self.id,
                serial: self.serial,
                index: self.index,
            }
            .into(),
            Duration::from_secs(constants::duel::RESULT_DELAY_SECONDS),
        );
    }

    /// Moves past the result screen of the given question
    ///
    /// Asks the next question if any remain; otherwise finishes the
    /// match and returns its record for the persistence collaborator.
    /// The caller frees the players and releases the room when a record
    /// is returned.
    pub fn advance<T: Tunnel, F: Fn(Id) -> Option<T>, S: FnMut(super::AlarmMessage, Duration)>(
        &mut self,
        question_index: usize,
        bank: &QuestionBank,
        registry: &Registry,
        schedule_message: S,
        tunnel_finder: F,
    ) -> Option<MatchRecord> {
        if self.phase != Phase::Scoring || question_index != self.index {
            debug!(
                room = %self.id,
                question_index,
                "advance alarm ignored, match has moved on"
            );
            return None;
        }
        if self.index < self.total_questions {
            if self.change_state(Phase::Scoring, Phase::QuestionActive) {
                self.ask_next(bank, schedule_message, tunnel_finder);
            }
            None
        } else {
            self.finish(registry, tunnel_finder)
        }
    }

    /// Finishes the match, broadcasting the final result
    fn finish<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        registry: &Registry,
        tunnel_finder: F,
    ) -> Option<MatchRecord> {
        if !self.change_state(Phase::Scoring, Phase::Finished) {
            return None;
        }

        let [first, second] = self.players;
        let name_of = |id: Id| registry.name(id).unwrap_or_else(|| "Unknown".to_owned());
        let player_one = PlayerResult {
            id: first,
            name: name_of(first),
            score: self.board.total(first),
        };
        let player_two = PlayerResult {
            id: second,
            name: name_of(second),
            score: self.board.total(second),
        };
        let winner = self.board.winner();

        self.announce(
            &UpdateMessage::GameOver {
                scores: self.board.totals(),
                winner,
                is_tie: winner.is_none(),
                player_one: player_one.clone(),
                player_two: player_two.clone(),
            }
            .into(),
            tunnel_finder,
        );

        let winner_name = winner.map(name_of);
        Some(MatchRecord {
            room: self.id,
            player_one,
            player_two,
            winner_name,
        })
    }

    /// The sync view of the open question for a reconnecting client
    pub fn state_message(&self) -> Option<super::SyncMessage> {
        if self.phase != Phase::QuestionActive {
            return None;
        }
        let active = self.current.as_ref()?;
        let window = Duration::from_secs(constants::duel::ANSWER_WINDOW_SECONDS);
        Some(
            SyncMessage::Question {
                index: self.index,
                total: self.total_questions,
                text: active.question.text().to_owned(),
                options: active.question.options().to_vec(),
                remaining: window.saturating_sub(active.asked_at.elapsed().unwrap_or_default()),
            }
            .into(),
        )
    }
}
