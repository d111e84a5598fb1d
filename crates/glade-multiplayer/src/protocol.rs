//! Messages exchanged between clients and the room.
//!
//! Every message travels inside a versioned postcard envelope
//! ([`glade_net::encode`]) carried by one length-prefixed frame.

use std::fmt;

use serde::{Deserialize, Serialize};

use glade_net::{ConnectionId, EnvelopeError};

use crate::authority::RoomCommand;
use crate::chat::ChatMessage;
use crate::movement::Position;
use crate::progression::{SkillType, Skills};
use crate::resource::{NodeId, NodeState, ResourceNode};

// ---------------------------------------------------------------------------
// Shared views
// ---------------------------------------------------------------------------

/// The last thing a participant said, shown above their avatar for a while.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBubble {
    /// Message text.
    pub text: String,
    /// Server timestamp of the message (Unix milliseconds).
    pub timestamp: u64,
}

/// Everything other participants may know about one avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Connection the avatar belongs to.
    pub id: ConnectionId,
    /// Display name, fixed at join.
    pub name: String,
    /// Current position.
    pub position: Position,
    /// Facing in radians.
    pub facing: f64,
    /// Most recent chat line, if any.
    pub last_chat: Option<ChatBubble>,
}

/// Full authoritative view of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Side length of the play area.
    pub grid_size: f64,
    /// Time a gather takes.
    pub gather_duration_ms: u64,
    /// Maximum distance from which a node can be gathered.
    pub interaction_radius: f64,
    /// Everyone in the room, ordered by connection id.
    pub participants: Vec<ParticipantInfo>,
    /// Every resource node, ordered by id.
    pub nodes: Vec<ResourceNode>,
    /// Chat backlog, oldest first.
    pub chat: Vec<ChatMessage>,
}

/// Sent once to a participant whose join succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    /// The joiner's own connection id.
    pub you: ConnectionId,
    /// The joiner's skills.
    pub skills: Skills,
    /// Room state at the moment of joining.
    pub room: RoomSnapshot,
}

/// Identifies one hosted room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(pub u32);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room-{}", self.0)
    }
}

/// One row of the room browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomListing {
    /// Room to ask for in [`ClientMessage::JoinRoom`].
    pub id: RoomId,
    /// Name given when the room was opened.
    pub name: String,
    /// Template the room was opened from.
    pub template: String,
    /// Connections placed in the room.
    pub clients: usize,
    /// Capacity.
    pub max_clients: usize,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// How a gather finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatherEnd {
    /// The gatherer cancelled or left.
    Cancelled,
    /// The roll failed; the node is available again.
    Failed,
    /// The roll succeeded; the node is depleted.
    Succeeded,
}

/// One authoritative state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoomEvent {
    /// Someone entered the room.
    ParticipantJoined(ParticipantInfo),
    /// Someone left the room.
    ParticipantLeft {
        /// Who left.
        id: ConnectionId,
    },
    /// A move was accepted.
    ParticipantMoved {
        /// Who moved.
        id: ConnectionId,
        /// New position.
        position: Position,
        /// New facing in radians.
        facing: f64,
        /// Sequence number of the move that caused this.
        seq: u32,
    },
    /// A chat line was accepted.
    ChatPosted {
        /// Author, or `None` for room announcements.
        from: Option<ConnectionId>,
        /// The stored message.
        message: ChatMessage,
    },
    /// A node changed state.
    NodeChanged {
        /// Which node.
        node: NodeId,
        /// Its new state.
        state: NodeState,
    },
    /// A participant started gathering.
    GatherStarted {
        /// Who gathers.
        id: ConnectionId,
        /// Which node.
        node: NodeId,
        /// Time until the gather resolves.
        duration_ms: u64,
    },
    /// A gather resolved or was abandoned.
    GatherEnded {
        /// Who gathered.
        id: ConnectionId,
        /// Which node.
        node: NodeId,
        /// How it ended.
        end: GatherEnd,
    },
    /// Sent only to the participant who earned it.
    ExperienceGained {
        /// Skill credited.
        skill: SkillType,
        /// Experience awarded.
        amount: u64,
        /// New total experience.
        experience: u64,
        /// Level after the award.
        level: u8,
        /// Whether the award crossed a level boundary.
        leveled_up: bool,
    },
}

// ---------------------------------------------------------------------------
// Top-level messages
// ---------------------------------------------------------------------------

/// Client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Enter an open room of the default template, opening one if all
    /// are full.
    Join {
        /// Requested display name.
        username: String,
    },
    /// Enter a specific room.
    JoinRoom {
        /// Room from a listing.
        room: RoomId,
        /// Requested display name.
        username: String,
    },
    /// Open a new room from a template and enter it.
    CreateRoom {
        /// Template id, e.g. `"cafe"`.
        template: String,
        /// Room name; blank uses the template's name.
        name: String,
        /// Requested display name.
        username: String,
    },
    /// Ask for the current room listings.
    ListRooms,
    /// Move the avatar to a point.
    Move {
        /// Target x.
        x: f64,
        /// Target y.
        y: f64,
        /// Increases by one per move; echoed in [`RoomEvent::ParticipantMoved`].
        seq: u32,
    },
    /// Say something.
    Chat {
        /// Raw text.
        content: String,
    },
    /// Start gathering a node.
    BeginGather {
        /// Target node.
        node: NodeId,
    },
    /// Abandon the current gather.
    CancelGather,
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Join accepted.
    Welcome(Welcome),
    /// Join refused; the connection stays out of the room.
    JoinRejected {
        /// Human-readable reason.
        reason: String,
    },
    /// A state change.
    Event(RoomEvent),
    /// Answer to [`ClientMessage::ListRooms`].
    RoomList(Vec<RoomListing>),
    /// The room a join was routed to; the welcome or rejection follows.
    Placed(RoomListing),
}

/// Errors while moving messages across the wire.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The envelope could not be built or parsed.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl ClientMessage {
    /// The room command this message asks for on behalf of `id`, or `None`
    /// for requests answered outside any room.
    pub fn into_command(self, id: ConnectionId) -> Option<RoomCommand> {
        let command = match self {
            ClientMessage::Join { username }
            | ClientMessage::JoinRoom { username, .. }
            | ClientMessage::CreateRoom { username, .. } => RoomCommand::Join { id, username },
            ClientMessage::ListRooms => return None,
            ClientMessage::Move { x, y, seq } => RoomCommand::Move { id, x, y, seq },
            ClientMessage::Chat { content } => RoomCommand::Chat { id, content },
            ClientMessage::BeginGather { node } => RoomCommand::BeginGather { id, node },
            ClientMessage::CancelGather => RoomCommand::CancelGather { id },
        };
        Some(command)
    }

    /// Encodes into an envelope payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(glade_net::encode(self)?)
    }

    /// Decodes an envelope payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(glade_net::decode(bytes)?)
    }
}

impl ServerMessage {
    /// Encodes into an envelope payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(glade_net::encode(self)?)
    }

    /// Decodes an envelope payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(glade_net::decode(bytes)?)
    }
}
