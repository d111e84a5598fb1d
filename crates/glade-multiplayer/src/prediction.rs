//! Client-side prediction and interpolation.
//!
//! [`ClientWorld`] keeps a local shadow of the room. Local moves are checked
//! with the same validator the room uses and rendered immediately; the
//! resulting intent is sent to the room, which has the final word. Every
//! avatar carries a rendered position and an authoritative target, and
//! [`ClientWorld::interpolate`] closes the gap a fraction per frame.
//!
//! Each predicted move carries a sequence number that the room echoes back.
//! Our own echoes only move the target once every later move has been
//! echoed too, so a slow round trip never drags the avatar backwards.

use std::collections::{BTreeMap, VecDeque};

use glade_config::ClientConfig;
use glade_net::ConnectionId;

use crate::chat::{ChatConfig, ChatLog};
use crate::movement::{MoveOutcome, Position, validate_move};
use crate::progression::{Skill, SkillType, Skills};
use crate::protocol::{
    ChatBubble, ClientMessage, ParticipantInfo, RoomEvent, RoomId, RoomListing, ServerMessage,
    Welcome,
};
use crate::resource::{GatherRejection, NodeId, NodeState, ResourceNode};

/// Changes smaller than this on both axes are not sent.
pub const MOVE_EPSILON: f64 = 0.001;

/// Speed factor applied to each axis of a diagonal step.
pub const DIAGONAL_FACTOR: f64 = 0.707;

/// Most moves kept waiting for their echo; the oldest is dropped beyond it.
pub const PENDING_MOVE_LIMIT: usize = 128;

/// How long past the gather duration a local gather waits for the room to
/// resolve it before giving up.
pub const GATHER_GRACE_MS: u64 = 2_000;

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Where the client stands with the room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not connected.
    #[default]
    Disconnected,
    /// Join sent, waiting for the welcome.
    Connecting,
    /// In the room.
    Connected,
    /// The join or the connection failed; the reason is shown to the user.
    Failed(String),
}

// ---------------------------------------------------------------------------
// Held keys
// ---------------------------------------------------------------------------

/// Direction keys held during the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementKeys {
    /// Towards negative y.
    pub up: bool,
    /// Towards positive y.
    pub down: bool,
    /// Towards negative x.
    pub left: bool,
    /// Towards positive x.
    pub right: bool,
}

impl MovementKeys {
    /// Unit-axis step for the held keys, with diagonals scaled down.
    /// Opposing keys cancel out.
    pub fn direction(&self) -> (f64, f64) {
        let dx = f64::from(i8::from(self.right) - i8::from(self.left));
        let dy = f64::from(i8::from(self.down) - i8::from(self.up));
        if dx != 0.0 && dy != 0.0 {
            (dx * DIAGONAL_FACTOR, dy * DIAGONAL_FACTOR)
        } else {
            (dx, dy)
        }
    }
}

// ---------------------------------------------------------------------------
// Shadow state
// ---------------------------------------------------------------------------

/// Local copy of one avatar.
#[derive(Debug, Clone, PartialEq)]
pub struct Shadow {
    /// Last known public state; `info.position` is the latest target.
    pub info: ParticipantInfo,
    /// Where the avatar is drawn this frame.
    pub render: Position,
}

impl Shadow {
    fn new(info: ParticipantInfo) -> Self {
        Self {
            render: info.position,
            info,
        }
    }

    /// Authoritative (or locally predicted) position the render chases.
    pub fn target(&self) -> Position {
        self.info.position
    }
}

/// Experience notice waiting to be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpPopup {
    /// Skill credited.
    pub skill: SkillType,
    /// Experience gained.
    pub amount: u64,
    /// New level, when the gain crossed a boundary.
    pub level_up: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
struct LocalGather {
    node: NodeId,
    started_ms: u64,
}

/// Predicted moves the room has not echoed yet, oldest first.
#[derive(Debug, Default)]
struct PendingMoves {
    moves: VecDeque<(u32, Position)>,
}

impl PendingMoves {
    fn push(&mut self, seq: u32, target: Position) {
        if self.moves.len() >= PENDING_MOVE_LIMIT {
            self.moves.pop_front();
        }
        self.moves.push_back((seq, target));
    }

    /// Forgets `seq` and everything sent before it.
    fn acknowledge(&mut self, seq: u32) {
        while self.moves.front().is_some_and(|&(pending, _)| pending <= seq) {
            self.moves.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.moves.len()
    }

    fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    fn clear(&mut self) {
        self.moves.clear();
    }
}

// ---------------------------------------------------------------------------
// ClientWorld
// ---------------------------------------------------------------------------

/// A client's view of the room.
#[derive(Debug)]
pub struct ClientWorld {
    config: ClientConfig,
    status: ConnectionStatus,
    you: Option<ConnectionId>,
    grid_size: f64,
    gather_duration_ms: u64,
    interaction_radius: f64,
    participants: BTreeMap<ConnectionId, Shadow>,
    nodes: Vec<ResourceNode>,
    chat: ChatLog,
    skills: Skills,
    gather: Option<LocalGather>,
    popups: VecDeque<XpPopup>,
    next_seq: u32,
    pending: PendingMoves,
    rooms: Vec<RoomListing>,
    room: Option<RoomListing>,
}

impl ClientWorld {
    /// An empty, disconnected world.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            status: ConnectionStatus::Disconnected,
            you: None,
            grid_size: 0.0,
            gather_duration_ms: 0,
            interaction_radius: 0.0,
            participants: BTreeMap::new(),
            nodes: Vec::new(),
            chat: ChatLog::new(ChatConfig::default()),
            skills: Skills::default(),
            gather: None,
            popups: VecDeque::new(),
            next_seq: 0,
            pending: PendingMoves::default(),
            rooms: Vec::new(),
            room: None,
        }
    }

    // -- accessors ----------------------------------------------------------

    /// Current connection status.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Our own connection id once welcomed.
    pub fn you(&self) -> Option<ConnectionId> {
        self.you
    }

    /// One avatar's shadow.
    pub fn participant(&self, id: ConnectionId) -> Option<&Shadow> {
        self.participants.get(&id)
    }

    /// Every shadow, ordered by connection id.
    pub fn participants(&self) -> impl Iterator<Item = &Shadow> {
        self.participants.values()
    }

    /// Our own avatar.
    pub fn own(&self) -> Option<&Shadow> {
        self.you.and_then(|id| self.participants.get(&id))
    }

    /// Local copy of the nodes.
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Local chat backlog.
    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Our skills as last reported by the room.
    pub fn skills(&self) -> &Skills {
        &self.skills
    }

    /// Moves sent that the room has not echoed yet.
    pub fn pending_moves(&self) -> usize {
        self.pending.len()
    }

    /// Rooms from the latest listing.
    pub fn available_rooms(&self) -> &[RoomListing] {
        &self.rooms
    }

    /// The room our join was routed to.
    pub fn current_room(&self) -> Option<&RoomListing> {
        self.room.as_ref()
    }

    // -- connection ---------------------------------------------------------

    /// Starts joining under `username`; returns the message to send.
    pub fn connect(&mut self, username: &str) -> ClientMessage {
        self.status = ConnectionStatus::Connecting;
        ClientMessage::Join {
            username: username.to_owned(),
        }
    }

    /// Starts joining a room picked from the listing.
    pub fn join_room(&mut self, room: RoomId, username: &str) -> ClientMessage {
        self.status = ConnectionStatus::Connecting;
        ClientMessage::JoinRoom {
            room,
            username: username.to_owned(),
        }
    }

    /// Starts opening a room from `template` and joining it.
    pub fn create_room(&mut self, template: &str, name: &str, username: &str) -> ClientMessage {
        self.status = ConnectionStatus::Connecting;
        ClientMessage::CreateRoom {
            template: template.to_owned(),
            name: name.to_owned(),
            username: username.to_owned(),
        }
    }

    /// Seeds the shadow from the room's welcome.
    pub fn apply_welcome(&mut self, welcome: Welcome) {
        let room = welcome.room;
        self.status = ConnectionStatus::Connected;
        self.you = Some(welcome.you);
        self.skills = welcome.skills;
        self.grid_size = room.grid_size;
        self.gather_duration_ms = room.gather_duration_ms;
        self.interaction_radius = room.interaction_radius;
        self.participants = room
            .participants
            .into_iter()
            .map(|info| (info.id, Shadow::new(info)))
            .collect();
        self.nodes = room.nodes;
        self.chat.replace(room.chat);
        self.gather = None;
        self.popups.clear();
        self.pending.clear();
    }

    /// Applies any message from the room.
    pub fn apply_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome(welcome) => self.apply_welcome(welcome),
            ServerMessage::JoinRejected { reason } => self.connection_failed(reason),
            ServerMessage::Event(event) => self.apply_event(event),
            ServerMessage::RoomList(rooms) => self.rooms = rooms,
            ServerMessage::Placed(listing) => {
                tracing::debug!("Placed in {} ({})", listing.id, listing.name);
                self.room = Some(listing);
            }
        }
    }

    /// Leaves the client disconnected with an empty world and a reason to
    /// show.
    pub fn connection_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Connection failed: {reason}");
        self.reset();
        self.status = ConnectionStatus::Failed(reason);
    }

    /// Drops the local world after a deliberate disconnect.
    pub fn disconnect(&mut self) {
        self.reset();
        self.status = ConnectionStatus::Disconnected;
    }

    fn reset(&mut self) {
        self.you = None;
        self.participants.clear();
        self.chat.clear();
        self.gather = None;
        self.popups.clear();
        self.pending.clear();
        self.room = None;
    }

    // -- movement -----------------------------------------------------------

    /// Predicts a move to `(x, y)`. On acceptance the avatar moves locally
    /// at once and the intent to send is returned.
    pub fn predict_move(&mut self, x: f64, y: f64) -> Option<ClientMessage> {
        if self.status != ConnectionStatus::Connected {
            return None;
        }
        let you = self.you?;
        let own = self.participants.get(&you)?;
        let current = own.target();
        let others = self
            .participants
            .values()
            .filter(|s| s.info.id != you)
            .map(Shadow::target);
        let nodes = self.nodes.iter().map(|n| n.position);

        let MoveOutcome::Accepted { position, facing } = validate_move(
            current,
            own.info.facing,
            x,
            y,
            self.grid_size,
            others,
            nodes,
        ) else {
            return None;
        };
        if (position.x - current.x).abs() < MOVE_EPSILON
            && (position.y - current.y).abs() < MOVE_EPSILON
        {
            return None;
        }

        let own = self.participants.get_mut(&you)?;
        own.info.position = position;
        own.info.facing = facing;
        own.render = position;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.push(self.next_seq, position);
        Some(ClientMessage::Move {
            x: position.x,
            y: position.y,
            seq: self.next_seq,
        })
    }

    /// Polls held keys once per frame and predicts the resulting step.
    pub fn step_movement(&mut self, keys: MovementKeys) -> Option<ClientMessage> {
        let (dx, dy) = keys.direction();
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        let current = self.own()?.target();
        let speed = self.config.move_speed;
        self.predict_move(current.x + dx * speed, current.y + dy * speed)
    }

    /// Moves every rendered avatar a fraction of the way to its target,
    /// snapping once close enough.
    pub fn interpolate(&mut self) {
        let factor = self.config.interpolation_factor;
        let snap = self.config.snap_distance;
        for shadow in self.participants.values_mut() {
            let target = shadow.target();
            if shadow.render.distance(target) < snap {
                shadow.render = target;
            } else {
                shadow.render.x += (target.x - shadow.render.x) * factor;
                shadow.render.y += (target.y - shadow.render.y) * factor;
            }
        }
    }

    // -- events -------------------------------------------------------------

    /// Applies one authoritative change.
    pub fn apply_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::ParticipantJoined(info) => {
                match self.participants.get_mut(&info.id) {
                    Some(shadow) => shadow.info = info,
                    None => {
                        self.participants.insert(info.id, Shadow::new(info));
                    }
                }
            }
            RoomEvent::ParticipantLeft { id } => {
                self.participants.remove(&id);
            }
            RoomEvent::ParticipantMoved {
                id,
                position,
                facing,
                seq,
            } => {
                if Some(id) == self.you {
                    self.pending.acknowledge(seq);
                    if !self.pending.is_empty() {
                        return;
                    }
                }
                if let Some(shadow) = self.participants.get_mut(&id) {
                    shadow.info.position = position;
                    shadow.info.facing = facing;
                }
            }
            RoomEvent::ChatPosted { from, message } => {
                if let Some(shadow) = from.and_then(|id| self.participants.get_mut(&id)) {
                    shadow.info.last_chat = Some(ChatBubble {
                        text: message.content.clone(),
                        timestamp: message.timestamp,
                    });
                }
                self.chat.record(message);
            }
            RoomEvent::NodeChanged { node, state } => {
                if let Some(local) = self.nodes.get_mut(usize::from(node.0)) {
                    local.state = state;
                }
                let ours = self
                    .you
                    .is_some_and(|you| state == NodeState::Gathering { by: you });
                if self.gather.is_some_and(|g| g.node == node)
                    && !ours
                    && state != NodeState::Available
                {
                    // The room gave the node to someone else before our
                    // request arrived, so no end event will follow.
                    tracing::debug!("{node} went to another gatherer, dropping local gather");
                    self.gather = None;
                }
            }
            RoomEvent::GatherStarted { .. } => {}
            RoomEvent::GatherEnded { id, node, .. } => {
                if Some(id) == self.you && self.gather.is_some_and(|g| g.node == node) {
                    self.gather = None;
                }
            }
            RoomEvent::ExperienceGained {
                skill,
                amount,
                experience,
                level,
                leveled_up,
            } => {
                self.skills.set(skill, Skill::with_experience(experience));
                self.popups.push_back(XpPopup {
                    skill,
                    amount,
                    level_up: leveled_up.then_some(level),
                });
            }
        }
    }

    /// Drains experience notices in arrival order.
    pub fn take_popups(&mut self) -> Vec<XpPopup> {
        self.popups.drain(..).collect()
    }

    // -- chat ---------------------------------------------------------------

    /// Builds a chat message, or `None` for blank input.
    pub fn compose_chat(&self, content: &str) -> Option<ClientMessage> {
        let trimmed = content.trim();
        (self.status == ConnectionStatus::Connected && !trimmed.is_empty()).then(|| {
            ClientMessage::Chat {
                content: trimmed.to_owned(),
            }
        })
    }

    /// Text shown above an avatar at `now_ms`, if its last message is recent.
    pub fn chat_bubble(&self, id: ConnectionId, now_ms: u64) -> Option<&str> {
        let bubble = self.participants.get(&id)?.info.last_chat.as_ref()?;
        (now_ms.saturating_sub(bubble.timestamp) < self.config.chat_bubble_ms)
            .then_some(bubble.text.as_str())
    }

    // -- gathering ----------------------------------------------------------

    /// Starts a local gather if the node looks available and in reach.
    pub fn begin_gather(
        &mut self,
        node: NodeId,
        now_ms: u64,
    ) -> Result<ClientMessage, GatherRejection> {
        if let Some(gather) = self.gather {
            if !self.gather_expired(gather, now_ms) {
                return Err(GatherRejection::AlreadyGathering);
            }
            tracing::debug!("Local gather on {} never resolved, dropping it", gather.node);
            self.gather = None;
        }
        let from = self
            .own()
            .map(Shadow::target)
            .ok_or(GatherRejection::NotAvailable)?;
        let target = self
            .nodes
            .get(usize::from(node.0))
            .ok_or(GatherRejection::UnknownNode)?;
        if !target.is_available() {
            return Err(GatherRejection::NotAvailable);
        }
        let distance = from.distance(target.position);
        if distance > self.interaction_radius {
            return Err(GatherRejection::TooFar {
                distance,
                max: self.interaction_radius,
            });
        }
        self.gather = Some(LocalGather {
            node,
            started_ms: now_ms,
        });
        Ok(ClientMessage::BeginGather { node })
    }

    /// Abandons the local gather at once; returns the message to send.
    pub fn cancel_gather(&mut self) -> Option<ClientMessage> {
        self.gather.take().map(|_| ClientMessage::CancelGather)
    }

    /// Node being gathered locally.
    pub fn gathering(&self) -> Option<NodeId> {
        self.gather.map(|g| g.node)
    }

    /// Progress bar value in `[0, 1]`, or `None` once the room has had
    /// [`GATHER_GRACE_MS`] past the duration to resolve it.
    pub fn gather_progress(&self, now_ms: u64) -> Option<f64> {
        let gather = self.gather.filter(|&g| !self.gather_expired(g, now_ms))?;
        if self.gather_duration_ms == 0 {
            return Some(1.0);
        }
        let elapsed = now_ms.saturating_sub(gather.started_ms) as f64;
        Some((elapsed / self.gather_duration_ms as f64).clamp(0.0, 1.0))
    }

    fn gather_expired(&self, gather: LocalGather, now_ms: u64) -> bool {
        now_ms.saturating_sub(gather.started_ms) > self.gather_duration_ms + GATHER_GRACE_MS
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
