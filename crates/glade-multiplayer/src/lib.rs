//! Authoritative shared-space multiplayer: the room that owns participant
//! state, the movement rule shared with clients, chat, resource gathering,
//! progression, client-side prediction, and the registry that hosts many
//! rooms behind one server.

pub mod authority;
pub mod chat;
pub mod lobby;
pub mod movement;
pub mod prediction;
pub mod progression;
pub mod protocol;
pub mod resource;
pub mod runtime;

pub use authority::{
    AuthoritativeRoom, Participant, RoomCommand, RoomEffect, RoomError, TimerId,
};
pub use chat::{ChatConfig, ChatLog, ChatMessage, ChatRejection, SYSTEM_SENDER};
pub use lobby::{LobbyError, MAX_ROOM_NAME_LENGTH, RoomRegistry};
pub use movement::{MoveOutcome, MoveRejection, Position, validate_move};
pub use prediction::{ClientWorld, ConnectionStatus, MovementKeys, Shadow, XpPopup};
pub use progression::{LevelChange, Skill, SkillType, Skills};
pub use protocol::{
    ChatBubble, ClientMessage, GatherEnd, ParticipantInfo, ProtocolError, RoomEvent, RoomId,
    RoomListing, RoomSnapshot, ServerMessage, Welcome,
};
pub use resource::{
    FixedRoll, GatherOutcome, GatherRejection, GatherRoll, NodeId, NodeState, RandomRoll,
    ResourceNode, ResourceType,
};
pub use runtime::{Outgoing, Recipients, RoomClosed, RoomHandle, spawn_room, spawn_room_into};
