//! The composition root of the engine
//!
//! The orchestrator owns the player registry, the matchmaker, the room
//! table, the question bank, and the persistence collaborator, and
//! routes every inbound message, timer expiry, and disconnect to the
//! component that handles it. All of this state is explicitly owned
//! and injected; there are no process-wide globals.
//!
//! The host drives it from a single logical sequencer: one call at a
//! time, each short and non-blocking. Timer callbacks re-enter through
//! [`Orchestrator::receive_alarm`], where every alarm is checked
//! against current state before it acts.

use std::{collections::HashMap, time::Duration};

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::{
    constants,
    duel::{self, Duel},
    matchmaking::{self, Matchmaker},
    question::QuestionBank,
    recorder::{MatchRecord, MatchRecorder, VisitRecord},
    registry::{self, Id, PlayerEntry, Registry, Status},
    room_id::RoomId,
    session::Tunnel,
};

/// Messages received from connected clients
#[serde_with::serde_as]
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingMessage {
    /// Register a player for this connection under the given name
    Register(String),
    /// Challenge the given idle player
    Challenge(Id),
    /// Accept the challenge issued by the given player
    AcceptChallenge(Id),
    /// Reject the challenge issued by the given player
    RejectChallenge(Id),
    /// Answer the open question of a match
    SubmitAnswer {
        /// The room the answer belongs to
        room: RoomId,
        /// 1-based index of the question being answered
        question_index: usize,
        /// The selected option
        option_index: usize,
        /// Client-measured time from question display to selection
        #[serde_as(as = "serde_with::DurationSecondsWithFrac<f64>")]
        elapsed: Duration,
    },
}

/// The match orchestration engine
///
/// Generic over the persistence collaborator so hosts can plug in
/// their own storage; see [`crate::recorder::NullRecorder`] for the
/// storage-free variant.
pub struct Orchestrator<R> {
    registry: Registry,
    matchmaker: Matchmaker,
    rooms: HashMap<RoomId, Duel>,
    bank: QuestionBank,
    recorder: R,
    next_serial: u64,
}

impl<R: MatchRecorder> Orchestrator<R> {
    /// Creates an engine with the given question pool and recorder
    pub fn new(bank: QuestionBank, recorder: R) -> Self {
        Self {
            registry: Registry::default(),
            matchmaker: Matchmaker::default(),
            rooms: HashMap::new(),
            bank,
            recorder,
            next_serial: 0,
        }
    }

    /// The player registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The match in the given room, if it is live
    pub fn room(&self, room: RoomId) -> Option<&Duel> {
        self.rooms.get(&room)
    }

    /// The number of live matches
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// The persistence collaborator
    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Handles one inbound message from a connection
    ///
    /// # Arguments
    ///
    /// * `sender` - The connection the message arrived on
    /// * `message` - The parsed message
    /// * `schedule_message` - Function to schedule delayed alarm messages
    /// * `tunnel_finder` - Function to find communication tunnels for connections
    pub fn receive_message<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(super::AlarmMessage, Duration),
    >(
        &mut self,
        sender: Id,
        message: IncomingMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        match message {
            IncomingMessage::Register(name) => self.handle_register(sender, &name, tunnel_finder),
            IncomingMessage::Challenge(target) => {
                self.handle_challenge(sender, target, schedule_message, tunnel_finder);
            }
            IncomingMessage::AcceptChallenge(challenger) => {
                self.handle_accept(sender, challenger, schedule_message, tunnel_finder);
            }
            IncomingMessage::RejectChallenge(challenger) => {
                self.handle_reject(sender, challenger, tunnel_finder);
            }
            IncomingMessage::SubmitAnswer {
                room,
                question_index,
                option_index,
                elapsed,
            } => {
                self.handle_answer(
                    sender,
                    room,
                    question_index,
                    option_index,
                    elapsed,
                    schedule_message,
                    tunnel_finder,
                );
            }
        }
    }

    /// Handles a timer expiry
    ///
    /// Every alarm re-checks the state it depends on before acting: a
    /// challenge expiry checks the live (pair, seq); a match alarm
    /// checks the room still exists and its serial still matches. A
    /// stale alarm is a logged no-op.
    pub fn receive_alarm<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(super::AlarmMessage, Duration),
    >(
        &mut self,
        message: super::AlarmMessage,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        match message {
            super::AlarmMessage::Matchmaking(matchmaking::AlarmMessage::ChallengeExpired {
                challenger,
                target,
                seq,
            }) => self.handle_challenge_expiry(challenger, target, seq, tunnel_finder),
            super::AlarmMessage::Duel(alarm) => {
                self.handle_duel_alarm(alarm, schedule_message, tunnel_finder);
            }
        }
    }

    /// Handles a dropped connection
    ///
    /// Removes the player, tears down any match they were in (the
    /// in-flight question is not scored), invalidates any challenge
    /// involving them, and re-broadcasts the roster.
    pub fn remove_connection<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(player) = self.registry.remove(id) else {
            debug!(%id, "disconnect of unregistered connection");
            return;
        };

        if let Status::InMatch(room) = player.status() {
            if let Some(duel) = self.rooms.remove(&room) {
                if let Some(opponent) = duel.opponent_of(id) {
                    self.registry.send_message(
                        &duel::UpdateMessage::OpponentLeft {
                            name: player.name().to_owned(),
                        }
                        .into(),
                        opponent,
                        &tunnel_finder,
                    );
                    self.registry.mark_idle(opponent);
                }
            }
        }

        for challenge in self.matchmaker.cancel_involving(id) {
            if challenge.target == id {
                // the challenger is still waiting; treat it as a non-response
                if matches!(
                    self.registry.status(challenge.challenger),
                    Some(Status::Challenging)
                ) {
                    self.registry.mark_idle(challenge.challenger);
                }
                self.registry.send_message(
                    &matchmaking::UpdateMessage::ChallengeExpired {
                        name: player.name().to_owned(),
                    }
                    .into(),
                    challenge.challenger,
                    &tunnel_finder,
                );
            }
        }

        self.registry.broadcast_roster(&tunnel_finder);
    }

    /// Synchronizes a (re)connecting client with the current state
    ///
    /// A player in a match receives the open question; anyone else
    /// registered receives the lobby roster.
    pub fn sync_connection<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, id: Id, tunnel_finder: F) {
        let state = match self.registry.status(id) {
            Some(Status::InMatch(room)) => self.rooms.get(&room).and_then(Duel::state_message),
            Some(_) => Some(registry::SyncMessage::Lobby(self.registry.roster()).into()),
            None => None,
        };
        if let Some(state) = state {
            self.registry.send_state(&state, id, tunnel_finder);
        }
    }

    /// Forwards a visit event to the recorder, isolating failures
    pub fn record_visit(&self, visit: &VisitRecord) {
        if let Err(e) = self.recorder.record_visit(visit) {
            error!(%e, "failed to persist visit");
        }
    }

    fn handle_register<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        sender: Id,
        name: &str,
        tunnel_finder: F,
    ) {
        match self.registry.register(sender, name) {
            Ok(entry) => {
                self.registry.send_message(
                    &registry::UpdateMessage::Registered(entry).into(),
                    sender,
                    &tunnel_finder,
                );
                self.registry.broadcast_roster(&tunnel_finder);
            }
            Err(registry::Error::InvalidName(e)) => {
                warn!(%sender, %e, "registration rejected");
                self.registry.send_message(
                    &registry::UpdateMessage::NameError(e).into(),
                    sender,
                    &tunnel_finder,
                );
            }
            Err(e) => {
                warn!(%sender, %e, "registration ignored");
            }
        }
    }

    fn handle_challenge<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(super::AlarmMessage, Duration),
    >(
        &mut self,
        challenger: Id,
        target: Id,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        if challenger == target {
            debug!(%challenger, "self-challenge ignored");
            return;
        }
        let Some(challenger_entry) = self.registry.entry(challenger) else {
            debug!(%challenger, "challenge from unregistered connection ignored");
            return;
        };
        if !self.registry.is_idle(target) {
            debug!(%challenger, %target, "challenge ignored, target is not idle");
            return;
        }
        if matches!(self.registry.status(challenger), Some(Status::InMatch(_))) {
            debug!(%challenger, "challenge ignored, challenger is in a match");
            return;
        }

        let challenge = self.matchmaker.issue(challenger, target);
        self.registry.mark_challenging(challenger);
        self.registry.send_message(
            &matchmaking::UpdateMessage::ChallengeRequest(challenger_entry).into(),
            target,
            &tunnel_finder,
        );
        self.registry.broadcast_roster(&tunnel_finder);
        schedule_message(
            matchmaking::AlarmMessage::ChallengeExpired {
                challenger,
                target,
                seq: challenge.seq,
            }
            .into(),
            Duration::from_secs(constants::challenge::EXPIRY_SECONDS),
        );
    }

    fn handle_accept<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(super::AlarmMessage, Duration),
    >(
        &mut self,
        target: Id,
        challenger: Id,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        match self.matchmaker.take(target, challenger) {
            Err(e) => {
                debug!(%target, %challenger, %e, "accept ignored");
                self.notify_challenge_gone(target, challenger, &tunnel_finder);
            }
            Ok(_challenge) => {
                let room = self.fresh_room_id();
                let serial = self.next_serial;
                self.next_serial += 1;

                // challenger first: winner and tie reporting rely on this order
                let mut match_up = Duel::new(room, serial, [challenger, target]);
                self.registry.mark_in_match(challenger, room);
                self.registry.mark_in_match(target, room);

                let accepted: super::UpdateMessage =
                    matchmaking::UpdateMessage::ChallengeAccepted { room }.into();
                self.registry
                    .send_message(&accepted, challenger, &tunnel_finder);
                self.registry.send_message(&accepted, target, &tunnel_finder);
                self.registry.broadcast_roster(&tunnel_finder);

                match_up.start(&mut schedule_message);
                self.rooms.insert(room, match_up);
            }
        }
    }

    fn handle_reject<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        target: Id,
        challenger: Id,
        tunnel_finder: F,
    ) {
        match self.matchmaker.take(target, challenger) {
            Err(e) => {
                debug!(%target, %challenger, %e, "reject ignored");
                self.notify_challenge_gone(target, challenger, &tunnel_finder);
            }
            Ok(challenge) => {
                self.registry.mark_idle(challenge.challenger);
                let target_entry = self.registry.entry(target).unwrap_or(PlayerEntry {
                    id: target,
                    name: "Unknown".to_owned(),
                });
                self.registry.send_message(
                    &matchmaking::UpdateMessage::ChallengeRejected(target_entry).into(),
                    challenger,
                    &tunnel_finder,
                );
                self.registry.broadcast_roster(&tunnel_finder);
            }
        }
    }

    /// Tells a player the challenge they tried to settle no longer stands
    fn notify_challenge_gone<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        player: Id,
        challenger: Id,
        tunnel_finder: F,
    ) {
        let name = self
            .registry
            .name(challenger)
            .unwrap_or_else(|| "Unknown".to_owned());
        self.registry.send_message(
            &matchmaking::UpdateMessage::ChallengeExpired { name }.into(),
            player,
            tunnel_finder,
        );
    }

    fn handle_answer<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(super::AlarmMessage, Duration),
    >(
        &mut self,
        sender: Id,
        room: RoomId,
        question_index: usize,
        option_index: usize,
        elapsed: Duration,
        schedule_message: S,
        tunnel_finder: F,
    ) {
        let Some(match_up) = self.rooms.get_mut(&room) else {
            debug!(%room, %sender, "answer ignored, no such room");
            return;
        };
        match_up.submit_answer(
            sender,
            question_index,
            option_index,
            elapsed,
            schedule_message,
            tunnel_finder,
        );
    }

    fn handle_challenge_expiry<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        challenger: Id,
        target: Id,
        seq: u64,
        tunnel_finder: F,
    ) {
        if self.matchmaker.expire(challenger, target, seq).is_none() {
            debug!(%challenger, %target, "expiry alarm ignored, challenge already settled");
            return;
        }
        if matches!(self.registry.status(challenger), Some(Status::Challenging)) {
            self.registry.mark_idle(challenger);
        }
        let name = self
            .registry
            .name(target)
            .unwrap_or_else(|| "Unknown".to_owned());
        self.registry.send_message(
            &matchmaking::UpdateMessage::ChallengeExpired { name }.into(),
            challenger,
            &tunnel_finder,
        );
        self.registry.broadcast_roster(&tunnel_finder);
    }

    fn handle_duel_alarm<
        T: Tunnel,
        F: Fn(Id) -> Option<T>,
        S: FnMut(super::AlarmMessage, Duration),
    >(
        &mut self,
        alarm: duel::AlarmMessage,
        mut schedule_message: S,
        tunnel_finder: F,
    ) {
        let room = alarm.room();
        let Some(match_up) = self.rooms.get_mut(&room) else {
            debug!(%room, "alarm ignored, room is gone");
            return;
        };
        if match_up.serial() != alarm.serial() {
            debug!(%room, "alarm ignored, room id was reused");
            return;
        }

        let record = match alarm {
            duel::AlarmMessage::Begin { .. } => {
                match_up.begin(&self.bank, &mut schedule_message, &tunnel_finder);
                None
            }
            duel::AlarmMessage::AnswerTimeout { index, .. } => {
                match_up.handle_timeout(index, &mut schedule_message, &tunnel_finder);
                None
            }
            duel::AlarmMessage::Advance { index, .. } => match_up.advance(
                index,
                &self.bank,
                &self.registry,
                &mut schedule_message,
                &tunnel_finder,
            ),
        };

        if let Some(record) = record {
            self.finish_match(record, &tunnel_finder);
        }
    }

    /// Releases a finished match: persists it, frees the players, drops the room
    fn finish_match<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        record: MatchRecord,
        tunnel_finder: F,
    ) {
        if let Err(e) = self.recorder.record_match(&record) {
            error!(room = %record.room, %e, "failed to persist match result");
        }
        self.rooms.remove(&record.room);
        self.registry.mark_idle(record.player_one.id);
        self.registry.mark_idle(record.player_two.id);
        self.registry.broadcast_roster(&tunnel_finder);
    }

    /// Picks a room ID not currently in use
    fn fresh_room_id(&self) -> RoomId {
        loop {
            let id = RoomId::new();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::{duel::Phase, question::Question, recorder};

    #[derive(Debug, Clone, Default)]
    struct MockTunnel {
        messages: Arc<Mutex<Vec<crate::UpdateMessage>>>,
        states: Arc<Mutex<Vec<crate::SyncMessage>>>,
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &crate::UpdateMessage) {
            self.messages.lock().unwrap().push(message.clone());
        }

        fn send_state(&self, state: &crate::SyncMessage) {
            self.states.lock().unwrap().push(state.clone());
        }

        fn close(self) {}
    }

    #[derive(Debug, Default)]
    struct RecordingRecorder {
        matches: RefCell<Vec<MatchRecord>>,
        visits: RefCell<Vec<VisitRecord>>,
        fail: bool,
    }

    impl MatchRecorder for RecordingRecorder {
        fn record_match(&self, record: &MatchRecord) -> Result<(), recorder::Error> {
            if self.fail {
                return Err(recorder::Error::new("storage offline"));
            }
            self.matches.borrow_mut().push(record.clone());
            Ok(())
        }

        fn record_visit(&self, visit: &VisitRecord) -> Result<(), recorder::Error> {
            if self.fail {
                return Err(recorder::Error::new("storage offline"));
            }
            self.visits.borrow_mut().push(visit.clone());
            Ok(())
        }
    }

    type Alarms = RefCell<Vec<(crate::AlarmMessage, Duration)>>;

    fn finder(tunnels: &HashMap<Id, MockTunnel>) -> impl Fn(Id) -> Option<MockTunnel> + '_ {
        |id| tunnels.get(&id).cloned()
    }

    fn schedule(alarms: &Alarms) -> impl FnMut(crate::AlarmMessage, Duration) + '_ {
        |message, after| alarms.borrow_mut().push((message, after))
    }

    fn messages_for(tunnels: &HashMap<Id, MockTunnel>, player: Id) -> Vec<crate::UpdateMessage> {
        tunnels[&player].messages.lock().unwrap().clone()
    }

    /// A bank with a single known question so draws are deterministic
    fn single_question_bank() -> QuestionBank {
        QuestionBank::new(vec![
            Question::new(
                "Which planet is closest to the sun?".to_owned(),
                vec![
                    "Mercury".to_owned(),
                    "Venus".to_owned(),
                    "Earth".to_owned(),
                ],
                0,
            )
            .unwrap(),
        ])
        .unwrap()
    }

    fn fixture(
        names: &[&str],
    ) -> (
        Orchestrator<RecordingRecorder>,
        Vec<Id>,
        HashMap<Id, MockTunnel>,
        Alarms,
    ) {
        let mut orchestrator =
            Orchestrator::new(single_question_bank(), RecordingRecorder::default());
        let ids: Vec<Id> = names.iter().map(|_| Id::new()).collect();
        let tunnels: HashMap<Id, MockTunnel> = ids
            .iter()
            .map(|id| (*id, MockTunnel::default()))
            .collect();
        let alarms = RefCell::new(Vec::new());
        for (id, name) in ids.iter().zip(names) {
            orchestrator.receive_message(
                *id,
                IncomingMessage::Register((*name).to_owned()),
                schedule(&alarms),
                finder(&tunnels),
            );
        }
        (orchestrator, ids, tunnels, alarms)
    }

    fn accepted_room(tunnels: &HashMap<Id, MockTunnel>, player: Id) -> RoomId {
        messages_for(tunnels, player)
            .iter()
            .find_map(|m| match m {
                crate::UpdateMessage::Matchmaking(
                    matchmaking::UpdateMessage::ChallengeAccepted { room },
                ) => Some(*room),
                _ => None,
            })
            .expect("no ChallengeAccepted message")
    }

    #[test]
    fn test_register_confirms_and_broadcasts() {
        let (orchestrator, ids, tunnels, _) = fixture(&["Alice", "Bob"]);

        assert_eq!(orchestrator.registry().list_idle().len(), 2);
        let messages = messages_for(&tunnels, ids[0]);
        assert!(messages.iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Registry(registry::UpdateMessage::Registered(entry))
                if entry.name == "Alice"
        )));
        // Alice saw the roster again when Bob joined
        let rosters = messages
            .iter()
            .filter(|m| {
                matches!(
                    m,
                    crate::UpdateMessage::Registry(registry::UpdateMessage::PlayersList(_))
                )
            })
            .count();
        assert_eq!(rosters, 2);
    }

    #[test]
    fn test_register_invalid_name_is_user_visible() {
        let (mut orchestrator, _, _, alarms) = fixture(&[]);
        let id = Id::new();
        let tunnels = HashMap::from([(id, MockTunnel::default())]);

        orchestrator.receive_message(
            id,
            IncomingMessage::Register("   ".to_owned()),
            schedule(&alarms),
            finder(&tunnels),
        );

        assert!(orchestrator.registry().is_empty());
        assert!(messages_for(&tunnels, id).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Registry(registry::UpdateMessage::NameError(
                registry::NameError::Empty
            ))
        )));
    }

    #[test]
    fn test_challenge_notifies_target_and_arms_expiry() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );

        assert_eq!(orchestrator.registry().status(a), Some(Status::Challenging));
        // the target is never marked
        assert_eq!(orchestrator.registry().status(b), Some(Status::Idle));
        assert!(messages_for(&tunnels, b).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Matchmaking(matchmaking::UpdateMessage::ChallengeRequest(
                entry
            )) if entry.id == a
        )));
        let alarms = alarms.borrow();
        assert_eq!(
            alarms.last().unwrap().1,
            Duration::from_secs(constants::challenge::EXPIRY_SECONDS)
        );
    }

    #[test]
    fn test_challenge_no_ops() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        // self-challenge
        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        // unknown target
        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(Id::new()),
            schedule(&alarms),
            finder(&tunnels),
        );
        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
        assert!(alarms.borrow().is_empty());

        // non-idle target: B is now challenging someone
        orchestrator.receive_message(
            b,
            IncomingMessage::Challenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
    }

    #[test]
    fn test_accept_creates_room_with_challenger_first() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        orchestrator.receive_message(
            b,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );

        let room = accepted_room(&tunnels, a);
        assert_eq!(accepted_room(&tunnels, b), room);
        let match_up = orchestrator.room(room).unwrap();
        assert_eq!(match_up.players(), [a, b]);
        assert_eq!(match_up.phase(), Phase::Starting);
        assert_eq!(
            orchestrator.registry().status(a),
            Some(Status::InMatch(room))
        );
        assert_eq!(
            orchestrator.registry().status(b),
            Some(Status::InMatch(room))
        );
        assert!(orchestrator.registry().list_idle().is_empty());
        assert_eq!(
            alarms.borrow().last().unwrap().1,
            Duration::from_secs(constants::duel::START_DELAY_SECONDS)
        );
    }

    #[test]
    fn test_accept_without_challenge_is_user_visible_no_op() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.receive_message(
            b,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );

        assert_eq!(orchestrator.room_count(), 0);
        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
        assert!(messages_for(&tunnels, b).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Matchmaking(matchmaking::UpdateMessage::ChallengeExpired {
                name
            }) if name == "Alice"
        )));
    }

    #[test]
    fn test_replaced_challenge_cannot_be_accepted() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob", "Carol"]);
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        // a newer challenge replaces the outstanding one
        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(c),
            schedule(&alarms),
            finder(&tunnels),
        );

        orchestrator.receive_message(
            b,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        assert_eq!(orchestrator.room_count(), 0);

        orchestrator.receive_message(
            c,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        assert_eq!(orchestrator.room_count(), 1);
        assert_eq!(
            orchestrator.room(accepted_room(&tunnels, c)).unwrap().players(),
            [a, c]
        );
    }

    #[test]
    fn test_reject_frees_challenger() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        orchestrator.receive_message(
            b,
            IncomingMessage::RejectChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );

        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
        assert_eq!(orchestrator.registry().status(b), Some(Status::Idle));
        assert!(messages_for(&tunnels, a).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Matchmaking(matchmaking::UpdateMessage::ChallengeRejected(
                entry
            )) if entry.id == b
        )));
    }

    #[test]
    fn test_unanswered_challenge_expires() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        assert_eq!(orchestrator.registry().status(b), Some(Status::Idle));

        let expiry = { alarms.borrow()[0].0.clone() };
        orchestrator.receive_alarm(expiry.clone(), schedule(&alarms), finder(&tunnels));

        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
        assert_eq!(orchestrator.registry().status(b), Some(Status::Idle));
        assert!(messages_for(&tunnels, a).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Matchmaking(matchmaking::UpdateMessage::ChallengeExpired {
                name
            }) if name == "Bob"
        )));

        // the expired challenge can no longer be accepted
        orchestrator.receive_message(
            b,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        assert_eq!(orchestrator.room_count(), 0);

        // a second delivery of the same alarm is harmless
        orchestrator.receive_alarm(expiry, schedule(&alarms), finder(&tunnels));
    }

    #[test]
    fn test_full_match_flow() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        orchestrator.receive_message(
            b,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        let room = accepted_room(&tunnels, a);

        // deliver every alarm in order; answer each question as it opens
        let mut cursor = 0;
        let mut answered = 0;
        while cursor < alarms.borrow().len() {
            let alarm = { alarms.borrow()[cursor].0.clone() };
            cursor += 1;
            orchestrator.receive_alarm(alarm, schedule(&alarms), finder(&tunnels));

            let open = orchestrator
                .room(room)
                .map(|d| (d.phase(), d.question_index()));
            if let Some((Phase::QuestionActive, index)) = open {
                if index > answered {
                    answered = index;
                    orchestrator.receive_message(
                        a,
                        IncomingMessage::SubmitAnswer {
                            room,
                            question_index: index,
                            option_index: 0,
                            elapsed: Duration::from_secs(2),
                        },
                        schedule(&alarms),
                        finder(&tunnels),
                    );
                    orchestrator.receive_message(
                        b,
                        IncomingMessage::SubmitAnswer {
                            room,
                            question_index: index,
                            option_index: 1,
                            elapsed: Duration::from_secs(3),
                        },
                        schedule(&alarms),
                        finder(&tunnels),
                    );
                }
            }
        }

        assert_eq!(answered, constants::duel::TOTAL_QUESTIONS);
        assert_eq!(orchestrator.room_count(), 0);
        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
        assert_eq!(orchestrator.registry().status(b), Some(Status::Idle));
        assert_eq!(orchestrator.registry().list_idle().len(), 2);

        let records = orchestrator.recorder().matches.borrow();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].player_one.name, "Alice");
        assert_eq!(records[0].player_one.score, 10);
        assert_eq!(records[0].player_two.score, 0);
        assert_eq!(records[0].winner_name, Some("Alice".to_owned()));
        drop(records);

        // exactly one result broadcast per question, despite the timers
        let results = messages_for(&tunnels, a)
            .iter()
            .filter(|m| {
                matches!(
                    m,
                    crate::UpdateMessage::Duel(duel::UpdateMessage::QuestionResult { .. })
                )
            })
            .count();
        assert_eq!(results, constants::duel::TOTAL_QUESTIONS);
        assert!(messages_for(&tunnels, b).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Duel(duel::UpdateMessage::GameOver {
                winner: Some(w),
                is_tie: false,
                ..
            }) if *w == a
        )));
    }

    #[test]
    fn test_recorder_failure_does_not_block_result_delivery() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);
        orchestrator.recorder.fail = true;

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        orchestrator.receive_message(
            b,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        let room = accepted_room(&tunnels, a);

        let mut cursor = 0;
        while cursor < alarms.borrow().len() {
            let alarm = { alarms.borrow()[cursor].0.clone() };
            cursor += 1;
            orchestrator.receive_alarm(alarm, schedule(&alarms), finder(&tunnels));
        }

        // every question timed out, the match still completed and was torn down
        assert_eq!(orchestrator.room_count(), 0);
        assert!(orchestrator.room(room).is_none());
        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
        assert!(messages_for(&tunnels, a).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Duel(duel::UpdateMessage::GameOver { is_tie: true, .. })
        )));
        assert!(orchestrator.recorder().matches.borrow().is_empty());
    }

    #[test]
    fn test_mid_match_disconnect() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        orchestrator.receive_message(
            b,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        let room = accepted_room(&tunnels, a);
        // open the first question
        let begin = { alarms.borrow()[1].0.clone() };
        orchestrator.receive_alarm(begin, schedule(&alarms), finder(&tunnels));

        orchestrator.remove_connection(b, finder(&tunnels));

        assert!(orchestrator.room(room).is_none());
        assert!(!orchestrator.registry().contains(b));
        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
        assert!(messages_for(&tunnels, a).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Duel(duel::UpdateMessage::OpponentLeft { name }) if name == "Bob"
        )));
        // no record is written for an abandoned match
        assert!(orchestrator.recorder().matches.borrow().is_empty());

        // the question timer for the discarded room fires late and is ignored
        let timer = { alarms.borrow().last().unwrap().0.clone() };
        orchestrator.receive_alarm(timer, schedule(&alarms), finder(&tunnels));
        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
    }

    #[test]
    fn test_disconnect_of_challenge_target_frees_challenger() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        orchestrator.remove_connection(b, finder(&tunnels));

        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
        assert!(messages_for(&tunnels, a).iter().any(|m| matches!(
            m,
            crate::UpdateMessage::Matchmaking(matchmaking::UpdateMessage::ChallengeExpired {
                name
            }) if name == "Bob"
        )));

        // the expiry alarm finds nothing left to do
        let expiry = { alarms.borrow()[0].0.clone() };
        orchestrator.receive_alarm(expiry, schedule(&alarms), finder(&tunnels));
        assert_eq!(orchestrator.registry().status(a), Some(Status::Idle));
    }

    #[test]
    fn test_answer_for_unknown_room_is_ignored() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice"]);

        orchestrator.receive_message(
            ids[0],
            IncomingMessage::SubmitAnswer {
                room: RoomId::new(),
                question_index: 1,
                option_index: 0,
                elapsed: Duration::from_secs(1),
            },
            schedule(&alarms),
            finder(&tunnels),
        );

        assert_eq!(orchestrator.registry().status(ids[0]), Some(Status::Idle));
        assert!(alarms.borrow().is_empty());
    }

    #[test]
    fn test_sync_connection_views() {
        let (mut orchestrator, ids, tunnels, alarms) = fixture(&["Alice", "Bob"]);
        let (a, b) = (ids[0], ids[1]);

        orchestrator.sync_connection(a, finder(&tunnels));
        assert!(matches!(
            tunnels[&a].states.lock().unwrap().last().unwrap(),
            crate::SyncMessage::Registry(registry::SyncMessage::Lobby(_))
        ));

        orchestrator.receive_message(
            a,
            IncomingMessage::Challenge(b),
            schedule(&alarms),
            finder(&tunnels),
        );
        orchestrator.receive_message(
            b,
            IncomingMessage::AcceptChallenge(a),
            schedule(&alarms),
            finder(&tunnels),
        );
        let begin = { alarms.borrow()[1].0.clone() };
        orchestrator.receive_alarm(begin, schedule(&alarms), finder(&tunnels));

        orchestrator.sync_connection(b, finder(&tunnels));
        assert!(matches!(
            tunnels[&b].states.lock().unwrap().last().unwrap(),
            crate::SyncMessage::Duel(duel::SyncMessage::Question { index: 1, .. })
        ));
    }

    #[test]
    fn test_record_visit_is_forwarded() {
        let (orchestrator, _, _, _) = fixture(&[]);
        orchestrator.record_visit(&VisitRecord {
            ip: "127.0.0.1".to_owned(),
            user_agent: "test".to_owned(),
            path: "/".to_owned(),
        });
        assert_eq!(orchestrator.recorder().visits.borrow().len(), 1);
    }
}
