//! Hosting many rooms behind one listener.
//!
//! The registry decides which room each connection lives in. A plain join
//! fills the lowest-numbered open room of the default template and opens a
//! fresh one when every such room is full; clients may also enter a listed
//! room or open their own from a configured template. A connection stays in
//! one room until it disconnects, and a room is closed as soon as its last
//! connection is gone.
//!
//! All rooms share one outbound channel. The registry answers lobby
//! requests itself and hands everything else to the owning room.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;

use glade_config::{LobbyConfig, RoomConfig};
use glade_net::ConnectionId;

use crate::authority::AuthoritativeRoom;
use crate::protocol::{ClientMessage, RoomId, RoomListing, ServerMessage};
use crate::runtime::{Outgoing, Recipients, RoomHandle, spawn_room_into};

/// Longest room name a client may choose, in characters.
pub const MAX_ROOM_NAME_LENGTH: usize = 32;

/// Why a connection could not be placed in a room.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    /// No template with this id is configured.
    #[error("unknown room template {0:?}")]
    UnknownTemplate(String),
    /// The room was never opened or has closed.
    #[error("{0} does not exist")]
    UnknownRoom(RoomId),
    /// The room is at capacity.
    #[error("{0} is full")]
    RoomFull(RoomId),
    /// The requested room name is too long.
    #[error("room name is longer than {max} characters")]
    NameTooLong {
        /// Allowed length.
        max: usize,
    },
    /// The server hosts as many rooms as it may.
    #[error("no more rooms can be opened ({0} open)")]
    TooManyRooms(usize),
}

type RoomFactory = Box<dyn Fn(RoomConfig) -> AuthoritativeRoom + Send + Sync>;

struct HostedRoom {
    name: String,
    template: String,
    max_clients: usize,
    clients: usize,
    handle: RoomHandle,
}

impl HostedRoom {
    fn listing(&self, id: RoomId) -> RoomListing {
        RoomListing {
            id,
            name: self.name.clone(),
            template: self.template.clone(),
            clients: self.clients,
            max_clients: self.max_clients,
        }
    }

    fn has_space(&self) -> bool {
        self.clients < self.max_clients
    }
}

/// Every room the server hosts, and which connection is in which.
pub struct RoomRegistry {
    base: RoomConfig,
    lobby: LobbyConfig,
    rooms: BTreeMap<RoomId, HostedRoom>,
    members: HashMap<ConnectionId, RoomId>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    make_room: RoomFactory,
    next_id: u32,
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.rooms.len())
            .field("members", &self.members.len())
            .finish_non_exhaustive()
    }
}

impl RoomRegistry {
    /// Creates an empty registry. Rooms start from `base` with the template
    /// overrides in `lobby`, and send their messages to `outgoing`.
    pub fn new(
        base: RoomConfig,
        lobby: LobbyConfig,
        outgoing: mpsc::UnboundedSender<Outgoing>,
    ) -> Self {
        Self {
            base,
            lobby,
            rooms: BTreeMap::new(),
            members: HashMap::new(),
            outgoing,
            make_room: Box::new(AuthoritativeRoom::new),
            next_id: 0,
        }
    }

    /// Replaces how rooms are built from their rules.
    pub fn with_room_factory(
        mut self,
        make_room: impl Fn(RoomConfig) -> AuthoritativeRoom + Send + Sync + 'static,
    ) -> Self {
        self.make_room = Box::new(make_room);
        self
    }

    /// Open rooms, ordered by id.
    pub fn listings(&self) -> Vec<RoomListing> {
        self.rooms.iter().map(|(id, room)| room.listing(*id)).collect()
    }

    /// The room `id` was placed in.
    pub fn room_of(&self, id: ConnectionId) -> Option<RoomId> {
        self.members.get(&id).copied()
    }

    /// Number of open rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Handles one decoded message from `id`. Returns the reply the caller
    /// must deliver to `id` before anything the rooms send afterwards.
    pub fn route(&mut self, id: ConnectionId, message: ClientMessage) -> Option<ServerMessage> {
        if message == ClientMessage::ListRooms {
            return Some(ServerMessage::RoomList(self.listings()));
        }
        if let Some(room) = self.room_of(id) {
            self.forward(room, id, message);
            return None;
        }

        let placement = match &message {
            ClientMessage::Join { .. } => self.join_or_open(),
            ClientMessage::JoinRoom { room, .. } => self.open_slot(*room),
            ClientMessage::CreateRoom { template, name, .. } => self.open_room(template, name),
            _ => {
                tracing::trace!("Dropping message from {id}, which is in no room");
                return None;
            }
        };
        match placement {
            Ok(room) => self.place(id, room, message),
            Err(err) => {
                tracing::info!("Join from {id} rejected: {err}");
                Some(ServerMessage::JoinRejected {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Takes `id` out of its room, closing the room if it is now empty.
    pub fn leave(&mut self, id: ConnectionId) {
        let Some(room_id) = self.members.remove(&id) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        if room.handle.leave(id).is_err() {
            tracing::trace!("{room_id} already stopped");
        }
        room.clients = room.clients.saturating_sub(1);
        if room.clients == 0 {
            tracing::info!("{room_id} ({}) is empty, closing it", room.name);
            self.rooms.remove(&room_id);
        }
    }

    /// Looks at a message on its way out. A room turning a join away frees
    /// the slot the registry held for it.
    pub fn observe(&mut self, out: &Outgoing) {
        if let (Recipients::One(id), ServerMessage::JoinRejected { .. }) = (&out.to, &out.message)
        {
            self.leave(*id);
        }
    }

    fn join_or_open(&mut self) -> Result<RoomId, LobbyError> {
        let template = self.lobby.default_template.clone();
        let open = self
            .rooms
            .iter()
            .find(|(_, room)| room.template == template && room.has_space())
            .map(|(id, _)| *id);
        match open {
            Some(id) => Ok(id),
            None => self.open_room(&template, ""),
        }
    }

    fn open_slot(&self, id: RoomId) -> Result<RoomId, LobbyError> {
        let room = self.rooms.get(&id).ok_or(LobbyError::UnknownRoom(id))?;
        if room.has_space() {
            Ok(id)
        } else {
            Err(LobbyError::RoomFull(id))
        }
    }

    fn open_room(&mut self, template_id: &str, name: &str) -> Result<RoomId, LobbyError> {
        let template = self
            .lobby
            .template(template_id)
            .ok_or_else(|| LobbyError::UnknownTemplate(template_id.to_owned()))?;
        let name = match name.trim() {
            "" => template.name.clone(),
            chosen if chosen.chars().count() > MAX_ROOM_NAME_LENGTH => {
                return Err(LobbyError::NameTooLong {
                    max: MAX_ROOM_NAME_LENGTH,
                });
            }
            chosen => chosen.to_owned(),
        };
        if self.rooms.len() >= self.lobby.max_rooms {
            return Err(LobbyError::TooManyRooms(self.rooms.len()));
        }
        let config = self
            .lobby
            .room_config(&self.base, template_id)
            .ok_or_else(|| LobbyError::UnknownTemplate(template_id.to_owned()))?;

        self.next_id += 1;
        let id = RoomId(self.next_id);
        let max_clients = config.max_participants;
        let (handle, _task) = spawn_room_into((self.make_room)(config), self.outgoing.clone());
        tracing::info!("Opened {id} \"{name}\" from template {template_id}");
        self.rooms.insert(
            id,
            HostedRoom {
                name,
                template: template_id.to_owned(),
                max_clients,
                clients: 0,
                handle,
            },
        );
        Ok(id)
    }

    fn place(
        &mut self,
        id: ConnectionId,
        room_id: RoomId,
        message: ClientMessage,
    ) -> Option<ServerMessage> {
        let room = self.rooms.get_mut(&room_id)?;
        room.clients += 1;
        let listing = room.listing(room_id);
        self.members.insert(id, room_id);
        tracing::debug!("Placed {id} in {room_id}");
        self.forward(room_id, id, message);
        Some(ServerMessage::Placed(listing))
    }

    fn forward(&mut self, room_id: RoomId, id: ConnectionId, message: ClientMessage) {
        let Some(room) = self.rooms.get(&room_id) else {
            return;
        };
        if room.handle.submit(id, message).is_err() {
            tracing::warn!("{room_id} stopped unexpectedly, closing it");
            self.rooms.remove(&room_id);
            self.members.retain(|_, room| *room != room_id);
        }
    }
}
