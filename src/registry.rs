//! Connected player management
//!
//! This module tracks every connected player, their display name, and
//! their availability status. It is the sole owner of player records:
//! matches and challenges hold only player IDs and route messages
//! through the registry's helpers. Status mutations are single-step
//! updates; the registry never holds a lock across operations.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use super::{TruncatedVec, room_id::RoomId, session::Tunnel};

/// A unique identifier for a connection and its player
///
/// The transport layer assigns one ID per connection; it stays stable
/// for the connection's lifetime and identifies the player everywhere
/// in the engine.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    /// Formats the ID as a UUID string
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    /// Parses an ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The availability status of a registered player
///
/// A player is always in exactly one of these states; `InMatch` carries
/// the room the player belongs to, so status and room membership cannot
/// drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Connected and available to challenge or be challenged
    Idle,
    /// Waiting on an outstanding challenge they issued
    Challenging,
    /// Playing in the given room
    InMatch(RoomId),
}

/// The kind of status without associated data
///
/// Used as the index of the registry's reverse mapping, so that
/// players can be filtered by status without inspecting each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum StatusKind {
    /// An idle player
    Idle,
    /// A player with an outstanding challenge
    Challenging,
    /// A player currently in a match
    InMatch,
}

impl Status {
    /// Returns the kind of this status without the associated data
    pub fn kind(&self) -> StatusKind {
        match self {
            Status::Idle => StatusKind::Idle,
            Status::Challenging => StatusKind::Challenging,
            Status::InMatch(_) => StatusKind::InMatch,
        }
    }

    /// Returns the room the player is in, if any
    pub fn room(&self) -> Option<RoomId> {
        match self {
            Status::InMatch(room) => Some(*room),
            _ => None,
        }
    }
}

/// A registered player record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    name: String,
    status: Status,
}

impl Player {
    /// The player's display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The player's current availability status
    pub fn status(&self) -> Status {
        self.status
    }
}

/// A player's public identity, as sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerEntry {
    /// The player's connection ID
    pub id: Id,
    /// The player's display name
    pub name: String,
}

/// Errors that can occur while validating a display name
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    /// The name is empty or contains only whitespace
    #[error("name cannot be empty")]
    Empty,
    /// The name exceeds the maximum allowed length
    #[error("name is too long")]
    TooLong,
    /// The name contains inappropriate content
    #[error("name is inappropriate")]
    Sinful,
}

/// Errors that can occur when registering a player
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested display name failed validation
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),
    /// The connection already has a registered player
    #[error("connection is already registered")]
    AlreadyRegistered,
    /// The registry has reached the maximum number of players
    #[error("maximum number of players reached")]
    MaximumPlayers,
}

/// Update messages originating from the registry
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// Confirms a successful registration to the new player
    Registered(PlayerEntry),
    /// The current list of idle players, sent to every connection
    PlayersList(TruncatedVec<PlayerEntry>),
    /// Reports a rejected display name to its sender
    NameError(NameError),
}

/// Sync messages originating from the registry
#[derive(Debug, Serialize, Clone)]
pub enum SyncMessage {
    /// The lobby view: the current list of idle players
    Lobby(TruncatedVec<PlayerEntry>),
}

/// Serialization helper for the Registry struct
#[derive(Deserialize)]
struct RegistrySerde {
    mapping: HashMap<Id, Player>,
}

/// Tracks all registered players and their status
///
/// The primary mapping holds one record per connection; the reverse
/// mapping indexes players by status kind so that idle-roster snapshots
/// do not scan every record.
#[derive(Default, Serialize, Deserialize)]
#[serde(from = "RegistrySerde")]
pub struct Registry {
    /// Primary mapping from connection ID to player record
    mapping: HashMap<Id, Player>,

    /// Reverse mapping organized by status kind
    #[serde(skip_serializing)]
    reverse_mapping: EnumMap<StatusKind, HashSet<Id>>,
}

impl From<RegistrySerde> for Registry {
    /// Reconstructs the registry from serialized data
    ///
    /// Rebuilds the reverse mapping from the primary mapping, which is
    /// necessary since the reverse mapping is not serialized.
    fn from(serde: RegistrySerde) -> Self {
        let RegistrySerde { mapping } = serde;
        let mut reverse_mapping: EnumMap<StatusKind, HashSet<Id>> = EnumMap::default();
        for (id, player) in &mapping {
            reverse_mapping[player.status.kind()].insert(*id);
        }
        Self {
            mapping,
            reverse_mapping,
        }
    }
}

/// Validates and cleans a requested display name
///
/// # Errors
///
/// * `NameError::TooLong` - name exceeds the maximum length
/// * `NameError::Empty` - name is empty after trimming whitespace
/// * `NameError::Sinful` - name contains inappropriate content
fn clean_name(name: &str) -> Result<String, NameError> {
    if name.len() > crate::constants::registry::MAX_NAME_LENGTH {
        return Err(NameError::TooLong);
    }
    let name = rustrict::trim_whitespace(name);
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.is_inappropriate() {
        return Err(NameError::Sinful);
    }
    Ok(name.to_owned())
}

impl Registry {
    /// Registers a new idle player for a connection
    ///
    /// # Arguments
    ///
    /// * `id` - The connection ID assigned by the transport layer
    /// * `name` - The requested display name (validated and trimmed)
    ///
    /// # Returns
    ///
    /// The public entry of the newly registered player
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidName` if the name fails validation,
    /// `Error::AlreadyRegistered` if the connection already has a
    /// player, or `Error::MaximumPlayers` if the registry is full.
    pub fn register(&mut self, id: Id, name: &str) -> Result<PlayerEntry, Error> {
        if self.mapping.len() >= crate::constants::registry::MAX_PLAYER_COUNT {
            return Err(Error::MaximumPlayers);
        }
        if self.mapping.contains_key(&id) {
            return Err(Error::AlreadyRegistered);
        }
        let name = clean_name(name)?;
        self.mapping.insert(
            id,
            Player {
                name: name.clone(),
                status: Status::Idle,
            },
        );
        self.reverse_mapping[StatusKind::Idle].insert(id);
        Ok(PlayerEntry { id, name })
    }

    /// Updates the status of an existing player
    ///
    /// Keeps the reverse mapping consistent when the player moves
    /// between status kinds. Unknown IDs are ignored.
    fn set_status(&mut self, id: Id, status: Status) {
        let Some(player) = self.mapping.get_mut(&id) else {
            return;
        };
        let old_kind = player.status.kind();
        let new_kind = status.kind();
        player.status = status;
        if old_kind != new_kind {
            self.reverse_mapping[old_kind].remove(&id);
            self.reverse_mapping[new_kind].insert(id);
        }
    }

    /// Marks a player as being in the given room
    pub fn mark_in_match(&mut self, id: Id, room: RoomId) {
        self.set_status(id, Status::InMatch(room));
    }

    /// Marks a player as waiting on a challenge they issued
    pub fn mark_challenging(&mut self, id: Id) {
        self.set_status(id, Status::Challenging);
    }

    /// Returns a player to the idle pool, clearing any room reference
    pub fn mark_idle(&mut self, id: Id) {
        self.set_status(id, Status::Idle);
    }

    /// Removes a player record, returning it if it existed
    ///
    /// Called on disconnect. The caller is responsible for unwinding
    /// any match or challenge the player was involved in.
    pub fn remove(&mut self, id: Id) -> Option<Player> {
        let player = self.mapping.remove(&id)?;
        self.reverse_mapping[player.status.kind()].remove(&id);
        Some(player)
    }

    /// Gets the record of a specific player
    pub fn get(&self, id: Id) -> Option<&Player> {
        self.mapping.get(&id)
    }

    /// Gets the status of a specific player
    pub fn status(&self, id: Id) -> Option<Status> {
        self.mapping.get(&id).map(|p| p.status)
    }

    /// Checks whether the connection has a registered player
    pub fn contains(&self, id: Id) -> bool {
        self.mapping.contains_key(&id)
    }

    /// Checks whether a player exists and is idle
    pub fn is_idle(&self, id: Id) -> bool {
        matches!(self.status(id), Some(Status::Idle))
    }

    /// Gets the display name of a player
    pub fn name(&self, id: Id) -> Option<String> {
        self.mapping.get(&id).map(|p| p.name.clone())
    }

    /// Gets the public entry of a player
    pub fn entry(&self, id: Id) -> Option<PlayerEntry> {
        self.mapping.get(&id).map(|p| PlayerEntry {
            id,
            name: p.name.clone(),
        })
    }

    /// Returns the number of registered players
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Checks whether the registry has no players
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Returns a snapshot of all idle players
    ///
    /// The snapshot is sorted by player ID so that repeated calls over
    /// unchanged state produce identical output.
    pub fn list_idle(&self) -> Vec<PlayerEntry> {
        self.reverse_mapping[StatusKind::Idle]
            .iter()
            .sorted()
            .filter_map(|id| self.entry(*id))
            .collect_vec()
    }

    /// Builds the roster message payload from the idle snapshot
    pub fn roster(&self) -> TruncatedVec<PlayerEntry> {
        let idle = self.list_idle();
        let count = idle.len();
        TruncatedVec::new(
            idle.into_iter(),
            crate::constants::registry::ROSTER_LIMIT,
            count,
        )
    }

    /// Sends an update message to a specific connection
    ///
    /// # Arguments
    ///
    /// * `message` - The update message to send
    /// * `id` - The connection to send to
    /// * `tunnel_finder` - Function to retrieve the tunnel for a connection
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &super::UpdateMessage,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(id) else {
            return;
        };

        session.send_message(message);
    }

    /// Sends a state synchronization message to a specific connection
    pub fn send_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &super::SyncMessage,
        id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(id) else {
            return;
        };

        session.send_state(message);
    }

    /// Broadcasts an update message to every registered connection
    pub fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &super::UpdateMessage,
        tunnel_finder: F,
    ) {
        for id in self.mapping.keys() {
            if let Some(session) = tunnel_finder(*id) {
                session.send_message(message);
            }
        }
    }

    /// Broadcasts the current idle roster to every registered connection
    ///
    /// Called after each registry mutation so all clients observe the
    /// same availability view.
    pub fn broadcast_roster<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) {
        self.announce(
            &UpdateMessage::PlayersList(self.roster()).into(),
            tunnel_finder,
        );
    }
}
