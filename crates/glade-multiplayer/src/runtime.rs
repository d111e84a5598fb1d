//! Tokio driver for one [`AuthoritativeRoom`].
//!
//! A single task owns the room and drains an unbounded command queue, so
//! every join, leave, intent, and timer expiry is applied strictly in
//! order. Scheduled timers are short tasks that sleep and then push their
//! command back onto the same queue through a weak sender; cancelling a
//! timer aborts its task. Outbound messages leave on a separate channel and
//! are never awaited while the room is being mutated.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use glade_net::ConnectionId;

use crate::authority::{AuthoritativeRoom, RoomCommand, RoomEffect, TimerId};
use crate::protocol::{ClientMessage, ServerMessage};

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Who a message is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// A single connection.
    One(ConnectionId),
    /// Everyone in the room when the message was produced.
    Many(Vec<ConnectionId>),
}

impl Recipients {
    /// Iterates the addressed connections.
    pub fn iter(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        match self {
            Recipients::One(id) => std::slice::from_ref(id).iter().copied(),
            Recipients::Many(ids) => ids.iter().copied(),
        }
    }
}

/// A message the room wants delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    /// Addressees.
    pub to: Recipients,
    /// Payload.
    pub message: ServerMessage,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// The room task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("room is no longer running")]
pub struct RoomClosed;

/// Cloneable entry point for submitting commands to a running room. The
/// room stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    commands: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    /// Queues a command.
    pub fn send(&self, command: RoomCommand) -> Result<(), RoomClosed> {
        self.commands.send(command).map_err(|_| RoomClosed)
    }

    /// Queues a decoded client message from `id`.
    pub fn submit(&self, id: ConnectionId, message: ClientMessage) -> Result<(), RoomClosed> {
        match message.into_command(id) {
            Some(command) => self.send(command),
            None => Ok(()),
        }
    }

    /// Queues the departure of `id`.
    pub fn leave(&self, id: ConnectionId) -> Result<(), RoomClosed> {
        self.send(RoomCommand::Leave { id })
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall-clock milliseconds that advance with tokio's clock, so timestamps
/// and deadlines stay consistent when time is paused in tests.
struct RoomClock {
    wall_at_start: u64,
    start: Instant,
}

impl RoomClock {
    fn start() -> Self {
        let wall_at_start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            wall_at_start,
            start: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.wall_at_start + self.start.elapsed().as_millis() as u64
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Starts the room on the current tokio runtime.
///
/// Returns the command handle, the stream of outbound messages, and the
/// task handle, which completes after the last [`RoomHandle`] is dropped.
pub fn spawn_room(
    room: AuthoritativeRoom,
) -> (
    RoomHandle,
    mpsc::UnboundedReceiver<Outgoing>,
    JoinHandle<()>,
) {
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (handle, task) = spawn_room_into(room, outgoing_tx);
    (handle, outgoing_rx, task)
}

/// Starts the room with its outbound messages going to `outgoing`, which
/// several rooms may share.
pub fn spawn_room_into(
    room: AuthoritativeRoom,
    outgoing: mpsc::UnboundedSender<Outgoing>,
) -> (RoomHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let driver = RoomDriver {
        room,
        clock: RoomClock::start(),
        timers: HashMap::new(),
        requeue: command_tx.downgrade(),
        outgoing,
    };
    let task = tokio::spawn(driver.run(command_rx));
    (
        RoomHandle {
            commands: command_tx,
        },
        task,
    )
}

struct RoomDriver {
    room: AuthoritativeRoom,
    clock: RoomClock,
    timers: HashMap<TimerId, AbortHandle>,
    requeue: mpsc::WeakUnboundedSender<RoomCommand>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl RoomDriver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RoomCommand>) {
        tracing::info!("Room started");
        while let Some(command) = commands.recv().await {
            if let Some(timer) = fired_timer(&command) {
                self.timers.remove(&timer);
            }
            let effects = self.room.handle(command, self.clock.now_ms());
            for effect in effects {
                self.apply(effect);
            }
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        tracing::info!("Room stopped");
    }

    fn apply(&mut self, effect: RoomEffect) {
        match effect {
            RoomEffect::Send { to, message } => self.emit(Recipients::One(to), message),
            RoomEffect::Broadcast(event) => {
                let everyone: Vec<_> = self.room.participant_ids().collect();
                if !everyone.is_empty() {
                    self.emit(Recipients::Many(everyone), ServerMessage::Event(event));
                }
            }
            RoomEffect::Schedule {
                timer,
                delay,
                command,
            } => {
                let requeue = self.requeue.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(commands) = requeue.upgrade() {
                        let _ = commands.send(command);
                    }
                });
                if let Some(previous) = self.timers.insert(timer, task.abort_handle()) {
                    previous.abort();
                }
            }
            RoomEffect::Cancel(timer) => {
                if let Some(task) = self.timers.remove(&timer) {
                    task.abort();
                }
            }
        }
    }

    fn emit(&self, to: Recipients, message: ServerMessage) {
        if self.outgoing.send(Outgoing { to, message }).is_err() {
            tracing::trace!("Outbound channel closed, dropping message");
        }
    }
}

fn fired_timer(command: &RoomCommand) -> Option<TimerId> {
    match command {
        RoomCommand::GatherElapsed { timer, .. } | RoomCommand::RespawnElapsed { timer, .. } => {
            Some(*timer)
        }
        _ => None,
    }
}
