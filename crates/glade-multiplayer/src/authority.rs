//! Server-authoritative room state and intent handling.
//!
//! The room owns the canonical state of one shared space. Every client intent
//! and every timer expiry arrives as a [`RoomCommand`]; [`AuthoritativeRoom::handle`]
//! validates it against current state, mutates, and returns the
//! [`RoomEffect`]s the caller must carry out: messages to deliver and timers
//! to start or stop. The room itself never touches the network or a clock.
//!
//! Timers are identified by [`TimerId`]. A timer command whose id no longer
//! matches the live state (the gather was cancelled, the participant left)
//! is ignored, so late expiries can never grant a reward.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use glade_config::RoomConfig;
use glade_net::ConnectionId;

use crate::chat::{ChatConfig, ChatLog};
use crate::movement::{MoveOutcome, Position, validate_move};
use crate::progression::Skills;
use crate::protocol::{
    ChatBubble, GatherEnd, ParticipantInfo, RoomEvent, RoomSnapshot, ServerMessage, Welcome,
};
use crate::resource::{
    GatherOutcome, GatherRejection, GatherRoll, NodeId, NodeState, RandomRoll, ResourceNode,
    default_layout,
};

/// Display name used when a joiner supplies a blank one.
pub const DEFAULT_USERNAME: &str = "Player";

// ---------------------------------------------------------------------------
// Commands and effects
// ---------------------------------------------------------------------------

/// Identifies one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Everything that can change a room, processed strictly one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomCommand {
    /// A connection asks to enter.
    Join {
        /// Transport connection.
        id: ConnectionId,
        /// Requested display name.
        username: String,
    },
    /// A connection went away.
    Leave {
        /// Transport connection.
        id: ConnectionId,
    },
    /// Move intent.
    Move {
        /// Mover.
        id: ConnectionId,
        /// Proposed x.
        x: f64,
        /// Proposed y.
        y: f64,
        /// Client sequence number, echoed back on acceptance.
        seq: u32,
    },
    /// Chat intent.
    Chat {
        /// Author.
        id: ConnectionId,
        /// Raw text.
        content: String,
    },
    /// Gather intent.
    BeginGather {
        /// Gatherer.
        id: ConnectionId,
        /// Target node.
        node: NodeId,
    },
    /// Abandon the current gather.
    CancelGather {
        /// Gatherer.
        id: ConnectionId,
    },
    /// A gather timer ran out.
    GatherElapsed {
        /// Gatherer.
        id: ConnectionId,
        /// Node being gathered.
        node: NodeId,
        /// Timer that fired.
        timer: TimerId,
    },
    /// A respawn timer ran out.
    RespawnElapsed {
        /// Depleted node.
        node: NodeId,
        /// Timer that fired.
        timer: TimerId,
    },
}

/// Work the room asks its driver to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEffect {
    /// Deliver to one connection.
    Send {
        /// Recipient.
        to: ConnectionId,
        /// Message.
        message: ServerMessage,
    },
    /// Deliver to every participant in the room.
    Broadcast(RoomEvent),
    /// Feed `command` back into the room after `delay`.
    Schedule {
        /// Handle for cancellation.
        timer: TimerId,
        /// Time until the command fires.
        delay: Duration,
        /// Command to feed back.
        command: RoomCommand,
    },
    /// Stop a scheduled timer if it has not fired.
    Cancel(TimerId),
}

/// Why a join was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The room is at capacity.
    #[error("room is full ({0} participants)")]
    RoomFull(usize),
    /// The connection is already in the room.
    #[error("{0} already joined")]
    AlreadyJoined(ConnectionId),
    /// No free spot exists to place a new avatar.
    #[error("no free space to spawn")]
    NoFreeSpace,
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveGather {
    node: NodeId,
    timer: TimerId,
}

/// Server-side state of one connected participant.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Publicly visible state.
    pub info: ParticipantInfo,
    /// The participant's own progression.
    pub skills: Skills,
    gather: Option<ActiveGather>,
}

impl Participant {
    /// Node the participant is gathering, if any.
    pub fn gathering(&self) -> Option<NodeId> {
        self.gather.map(|g| g.node)
    }
}

// ---------------------------------------------------------------------------
// AuthoritativeRoom
// ---------------------------------------------------------------------------

/// Canonical state of one room.
pub struct AuthoritativeRoom {
    config: RoomConfig,
    participants: BTreeMap<ConnectionId, Participant>,
    nodes: Vec<ResourceNode>,
    respawn_timers: HashMap<NodeId, TimerId>,
    chat: ChatLog,
    roll: Box<dyn GatherRoll>,
    next_timer: u64,
}

impl std::fmt::Debug for AuthoritativeRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritativeRoom")
            .field("participants", &self.participants.len())
            .field("nodes", &self.nodes.len())
            .field("chat", &self.chat.len())
            .finish_non_exhaustive()
    }
}

impl AuthoritativeRoom {
    /// Creates a room with the default layout and OS-seeded gather rolls.
    pub fn new(config: RoomConfig) -> Self {
        Self::with_roll(config, Box::new(RandomRoll::from_os()))
    }

    /// Creates a room whose gather outcomes come from `roll`.
    pub fn with_roll(config: RoomConfig, roll: Box<dyn GatherRoll>) -> Self {
        let chat = ChatLog::new(ChatConfig {
            max_message_length: config.max_chat_length,
            history_limit: config.chat_history,
        });
        Self {
            config,
            participants: BTreeMap::new(),
            nodes: default_layout(),
            respawn_timers: HashMap::new(),
            chat,
            roll,
            next_timer: 0,
        }
    }

    /// Room rules.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// A participant by connection id.
    pub fn participant(&self, id: ConnectionId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// Connection ids of everyone in the room, ascending.
    pub fn participant_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.participants.keys().copied()
    }

    /// Number of participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// A node by id.
    pub fn node(&self, id: NodeId) -> Option<&ResourceNode> {
        self.nodes.get(usize::from(id.0))
    }

    /// Every node, ordered by id.
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// The chat backlog.
    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    /// Full authoritative view.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            grid_size: self.config.grid_size,
            gather_duration_ms: self.config.gather_duration_ms,
            interaction_radius: self.config.interaction_radius,
            participants: self.participants.values().map(|p| p.info.clone()).collect(),
            nodes: self.nodes.clone(),
            chat: self.chat.history().cloned().collect(),
        }
    }

    /// Applies one command at wall-clock `now_ms`.
    pub fn handle(&mut self, command: RoomCommand, now_ms: u64) -> Vec<RoomEffect> {
        match command {
            RoomCommand::Join { id, username } => match self.join(id, &username, now_ms) {
                Ok(effects) => effects,
                Err(RoomError::AlreadyJoined(_)) => {
                    tracing::debug!("Ignoring repeated join from {id}");
                    Vec::new()
                }
                Err(err) => {
                    tracing::info!("Join from {id} rejected: {err}");
                    vec![RoomEffect::Send {
                        to: id,
                        message: ServerMessage::JoinRejected {
                            reason: err.to_string(),
                        },
                    }]
                }
            },
            RoomCommand::Leave { id } => self.leave(id, now_ms),
            RoomCommand::Move { id, x, y, seq } => self.move_participant(id, x, y, seq),
            RoomCommand::Chat { id, content } => self.chat_from(id, &content, now_ms),
            RoomCommand::BeginGather { id, node } => match self.begin_gather(id, node) {
                Ok(effects) => effects,
                Err(rejection) => {
                    tracing::debug!("Gather by {id} on {node} rejected: {rejection}");
                    Vec::new()
                }
            },
            RoomCommand::CancelGather { id } => self.cancel_gather(id, GatherEnd::Cancelled),
            RoomCommand::GatherElapsed { id, node, timer } => {
                self.finish_gather(id, node, timer, now_ms)
            }
            RoomCommand::RespawnElapsed { node, timer } => self.respawn(node, timer, now_ms),
        }
    }

    // -- join / leave -------------------------------------------------------

    fn join(
        &mut self,
        id: ConnectionId,
        username: &str,
        now_ms: u64,
    ) -> Result<Vec<RoomEffect>, RoomError> {
        if self.participants.contains_key(&id) {
            return Err(RoomError::AlreadyJoined(id));
        }
        if self.participants.len() >= self.config.max_participants {
            return Err(RoomError::RoomFull(self.config.max_participants));
        }
        let position = self.spawn_point().ok_or(RoomError::NoFreeSpace)?;
        let name = match username.trim() {
            "" => DEFAULT_USERNAME.to_owned(),
            trimmed => trimmed.to_owned(),
        };

        let participant = Participant {
            info: ParticipantInfo {
                id,
                name,
                position,
                facing: 0.0,
                last_chat: None,
            },
            skills: Skills::default(),
            gather: None,
        };
        let info = participant.info.clone();
        let skills = participant.skills.clone();
        self.participants.insert(id, participant);
        tracing::info!(
            "{} joined as {id} at ({:.1}, {:.1}), {} in room",
            info.name,
            position.x,
            position.y,
            self.participants.len()
        );

        let welcome = Welcome {
            you: id,
            skills,
            room: self.snapshot(),
        };
        let notice = self.chat.post_system(format!("{} joined the room", info.name), now_ms);
        Ok(vec![
            RoomEffect::Send {
                to: id,
                message: ServerMessage::Welcome(welcome),
            },
            RoomEffect::Broadcast(RoomEvent::ParticipantJoined(info)),
            RoomEffect::Broadcast(RoomEvent::ChatPosted {
                from: None,
                message: notice,
            }),
        ])
    }

    fn leave(&mut self, id: ConnectionId, now_ms: u64) -> Vec<RoomEffect> {
        let mut effects = self.cancel_gather(id, GatherEnd::Cancelled);
        let Some(participant) = self.participants.remove(&id) else {
            return effects;
        };
        tracing::info!(
            "{} ({id}) left, {} in room",
            participant.info.name,
            self.participants.len()
        );
        let notice = self
            .chat
            .post_system(format!("{} left the room", participant.info.name), now_ms);
        effects.push(RoomEffect::Broadcast(RoomEvent::ParticipantLeft { id }));
        effects.push(RoomEffect::Broadcast(RoomEvent::ChatPosted {
            from: None,
            message: notice,
        }));
        effects
    }

    /// The fixed spawn point, or the nearest free cell centre when it is
    /// taken. Ties go to the lowest column, then the lowest row.
    fn spawn_point(&self) -> Option<Position> {
        let grid = self.config.grid_size;
        let spawn = Position::new(grid / 2.0 + 0.5, grid / 2.0 + 0.5);
        if self.is_free(spawn) {
            return Some(spawn);
        }
        let cells = grid.floor() as i64;
        if cells <= 0 {
            return None;
        }
        let centre = |v: f64| (v.floor() as i64).clamp(0, cells - 1);
        let (cx, cy) = (centre(spawn.x), centre(spawn.y));
        let inside = |v: i64| (0..cells).contains(&v);

        let mut best: Option<(f64, i64, i64)> = None;
        for ring in 0..=cells {
            // Every cell on this ring is at least ring - 0.5 from the spawn.
            if best.is_some_and(|(d, _, _)| d < ring as f64 - 0.5) {
                break;
            }
            for i in (cx - ring)..=(cx + ring) {
                let edge = ring == 0 || i == cx - ring || i == cx + ring;
                let step = if edge { 1 } else { (2 * ring) as usize };
                for j in ((cy - ring)..=(cy + ring)).step_by(step) {
                    if !inside(i) || !inside(j) {
                        continue;
                    }
                    let spot = Position::new(i as f64 + 0.5, j as f64 + 0.5);
                    let candidate = (spot.distance(spawn), i, j);
                    if best.is_some_and(|b| candidate >= b) || !self.is_free(spot) {
                        continue;
                    }
                    best = Some(candidate);
                }
            }
        }
        best.map(|(_, i, j)| Position::new(i as f64 + 0.5, j as f64 + 0.5))
    }

    fn is_free(&self, spot: Position) -> bool {
        let others = self.participants.values().map(|p| p.info.position);
        let nodes = self.nodes.iter().map(|n| n.position);
        match validate_move(spot, 0.0, spot.x, spot.y, self.config.grid_size, others, nodes) {
            MoveOutcome::Accepted { position, .. } => position == spot,
            MoveOutcome::Rejected(_) => false,
        }
    }

    // -- movement / chat ----------------------------------------------------

    fn move_participant(&mut self, id: ConnectionId, x: f64, y: f64, seq: u32) -> Vec<RoomEffect> {
        let Some(mover) = self.participants.get(&id) else {
            return Vec::new();
        };
        let others = self
            .participants
            .values()
            .filter(|p| p.info.id != id)
            .map(|p| p.info.position);
        let nodes = self.nodes.iter().map(|n| n.position);
        let outcome = validate_move(
            mover.info.position,
            mover.info.facing,
            x,
            y,
            self.config.grid_size,
            others,
            nodes,
        );

        match outcome {
            MoveOutcome::Accepted { position, facing } => {
                let Some(mover) = self.participants.get_mut(&id) else {
                    return Vec::new();
                };
                mover.info.position = position;
                mover.info.facing = facing;
                vec![RoomEffect::Broadcast(RoomEvent::ParticipantMoved {
                    id,
                    position,
                    facing,
                    seq,
                })]
            }
            MoveOutcome::Rejected(why) => {
                tracing::debug!("Move by {id} to ({x}, {y}) rejected: {why:?}");
                Vec::new()
            }
        }
    }

    fn chat_from(&mut self, id: ConnectionId, content: &str, now_ms: u64) -> Vec<RoomEffect> {
        let Some(author) = self.participants.get_mut(&id) else {
            return Vec::new();
        };
        match self.chat.post(&author.info.name, content, now_ms) {
            Ok(message) => {
                author.info.last_chat = Some(ChatBubble {
                    text: message.content.clone(),
                    timestamp: message.timestamp,
                });
                vec![RoomEffect::Broadcast(RoomEvent::ChatPosted {
                    from: Some(id),
                    message,
                })]
            }
            Err(rejection) => {
                tracing::debug!("Chat from {id} dropped: {rejection}");
                Vec::new()
            }
        }
    }

    // -- gathering ----------------------------------------------------------

    fn allocate_timer(&mut self) -> TimerId {
        self.next_timer += 1;
        TimerId(self.next_timer)
    }

    fn begin_gather(
        &mut self,
        id: ConnectionId,
        node_id: NodeId,
    ) -> Result<Vec<RoomEffect>, GatherRejection> {
        let Some(gatherer) = self.participants.get(&id) else {
            return Ok(Vec::new());
        };
        if gatherer.gather.is_some() {
            return Err(GatherRejection::AlreadyGathering);
        }
        let from = gatherer.info.position;
        let node = self
            .nodes
            .get_mut(usize::from(node_id.0))
            .ok_or(GatherRejection::UnknownNode)?;
        node.begin_gather(id, from, self.config.interaction_radius)?;
        let state = node.state;

        let timer = self.allocate_timer();
        if let Some(gatherer) = self.participants.get_mut(&id) {
            gatherer.gather = Some(ActiveGather {
                node: node_id,
                timer,
            });
        }
        tracing::debug!("{id} started gathering {node_id}");

        let duration_ms = self.config.gather_duration_ms;
        Ok(vec![
            RoomEffect::Schedule {
                timer,
                delay: Duration::from_millis(duration_ms),
                command: RoomCommand::GatherElapsed {
                    id,
                    node: node_id,
                    timer,
                },
            },
            RoomEffect::Broadcast(RoomEvent::NodeChanged {
                node: node_id,
                state,
            }),
            RoomEffect::Broadcast(RoomEvent::GatherStarted {
                id,
                node: node_id,
                duration_ms,
            }),
        ])
    }

    fn cancel_gather(&mut self, id: ConnectionId, end: GatherEnd) -> Vec<RoomEffect> {
        let Some(active) = self
            .participants
            .get_mut(&id)
            .and_then(|p| p.gather.take())
        else {
            return Vec::new();
        };
        let mut effects = vec![RoomEffect::Cancel(active.timer)];
        if let Some(node) = self.nodes.get_mut(usize::from(active.node.0))
            && node.cancel_gather()
        {
            effects.push(RoomEffect::Broadcast(RoomEvent::NodeChanged {
                node: active.node,
                state: node.state,
            }));
        }
        effects.push(RoomEffect::Broadcast(RoomEvent::GatherEnded {
            id,
            node: active.node,
            end,
        }));
        tracing::debug!("{id} stopped gathering {}", active.node);
        effects
    }

    fn finish_gather(
        &mut self,
        id: ConnectionId,
        node_id: NodeId,
        timer: TimerId,
        now_ms: u64,
    ) -> Vec<RoomEffect> {
        let expected = Some(ActiveGather {
            node: node_id,
            timer,
        });
        let Some(gatherer) = self.participants.get_mut(&id) else {
            return Vec::new();
        };
        if gatherer.gather != expected {
            tracing::trace!("Ignoring stale gather timer {timer:?} for {id}");
            return Vec::new();
        }
        gatherer.gather = None;
        let Some(node) = self.nodes.get_mut(usize::from(node_id.0)) else {
            return Vec::new();
        };

        let level = gatherer.skills.level(node.kind.skill());
        let respawn_ms = self.config.respawn_duration_ms;
        let Some(outcome) = node.complete_gather(level, self.roll.as_mut(), now_ms, respawn_ms)
        else {
            return Vec::new();
        };
        let state = node.state;

        let mut effects = Vec::new();
        let end = match outcome {
            GatherOutcome::Success { skill, amount } => {
                let change = gatherer.skills.add_experience(skill, amount);
                let total = gatherer.skills.get(skill).experience();
                tracing::info!(
                    "{} gathered {node_id}: +{amount} {skill:?} xp (level {})",
                    gatherer.info.name,
                    change.new_level
                );
                effects.push(RoomEffect::Send {
                    to: id,
                    message: ServerMessage::Event(RoomEvent::ExperienceGained {
                        skill,
                        amount,
                        experience: total,
                        level: change.new_level,
                        leveled_up: change.leveled_up(),
                    }),
                });

                GatherEnd::Succeeded
            }
            GatherOutcome::Failure => {
                tracing::debug!("{id} failed to gather {node_id}");
                GatherEnd::Failed
            }
        };

        if end == GatherEnd::Succeeded {
            let respawn_timer = self.allocate_timer();
            self.respawn_timers.insert(node_id, respawn_timer);
            effects.push(RoomEffect::Schedule {
                timer: respawn_timer,
                delay: Duration::from_millis(respawn_ms),
                command: RoomCommand::RespawnElapsed {
                    node: node_id,
                    timer: respawn_timer,
                },
            });
        }
        effects.push(RoomEffect::Broadcast(RoomEvent::NodeChanged {
            node: node_id,
            state,
        }));
        effects.push(RoomEffect::Broadcast(RoomEvent::GatherEnded {
            id,
            node: node_id,
            end,
        }));
        effects
    }

    fn respawn(&mut self, node_id: NodeId, timer: TimerId, now_ms: u64) -> Vec<RoomEffect> {
        if self.respawn_timers.get(&node_id) != Some(&timer) {
            return Vec::new();
        }
        let Some(node) = self.nodes.get_mut(usize::from(node_id.0)) else {
            return Vec::new();
        };
        if node.respawn(now_ms) {
            self.respawn_timers.remove(&node_id);
            tracing::debug!("{node_id} respawned");
            return vec![RoomEffect::Broadcast(RoomEvent::NodeChanged {
                node: node_id,
                state: node.state,
            })];
        }
        match node.state {
            // Fired ahead of the deadline; wait out the remainder.
            NodeState::Depleted { respawn_at_ms } => vec![RoomEffect::Schedule {
                timer,
                delay: Duration::from_millis(respawn_at_ms - now_ms),
                command: RoomCommand::RespawnElapsed {
                    node: node_id,
                    timer,
                },
            }],
            _ => {
                self.respawn_timers.remove(&node_id);
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
