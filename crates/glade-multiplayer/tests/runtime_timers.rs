//! Room runtime timing under a paused tokio clock.

use std::time::Duration;

use glade_config::RoomConfig;
use glade_multiplayer::{
    AuthoritativeRoom, ClientMessage, FixedRoll, GatherEnd, NodeId, NodeState, Outgoing,
    RoomEvent, RoomHandle, ServerMessage, spawn_room,
};
use glade_net::ConnectionId;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

const ALICE: ConnectionId = ConnectionId(1);
const ROCK: NodeId = NodeId(13);

async fn next_event(outgoing: &mut UnboundedReceiver<Outgoing>) -> RoomEvent {
    loop {
        let out = outgoing.recv().await.expect("room still running");
        if let ServerMessage::Event(event) = out.message {
            return event;
        }
    }
}

async fn wait_for(
    outgoing: &mut UnboundedReceiver<Outgoing>,
    mut matches: impl FnMut(&RoomEvent) -> bool,
) -> RoomEvent {
    loop {
        let event = next_event(outgoing).await;
        if matches(&event) {
            return event;
        }
    }
}

fn assert_within_a_tick(elapsed: Duration, expected: Duration) {
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(1),
        "elapsed {elapsed:?}, expected {expected:?}"
    );
}

fn start(roll: f64) -> (RoomHandle, UnboundedReceiver<Outgoing>) {
    let room = AuthoritativeRoom::with_roll(RoomConfig::default(), Box::new(FixedRoll(roll)));
    let (handle, outgoing, _task) = spawn_room(room);
    (handle, outgoing)
}

async fn join_next_to_rock(handle: &RoomHandle, outgoing: &mut UnboundedReceiver<Outgoing>) {
    handle
        .submit(
            ALICE,
            ClientMessage::Join {
                username: "Alice".into(),
            },
        )
        .unwrap();
    handle
        .submit(
            ALICE,
            ClientMessage::Move {
                x: 10.5,
                y: 13.5,
                seq: 1,
            },
        )
        .unwrap();
    wait_for(outgoing, |e| matches!(e, RoomEvent::ParticipantMoved { .. })).await;
}

#[tokio::test(start_paused = true)]
async fn gather_completes_then_node_respawns() {
    let (handle, mut outgoing) = start(0.0);
    join_next_to_rock(&handle, &mut outgoing).await;

    let began = Instant::now();
    handle
        .submit(ALICE, ClientMessage::BeginGather { node: ROCK })
        .unwrap();
    wait_for(&mut outgoing, |e| matches!(e, RoomEvent::GatherStarted { .. })).await;

    let gained = wait_for(&mut outgoing, |e| {
        matches!(e, RoomEvent::ExperienceGained { .. })
    })
    .await;
    let finished = Instant::now();
    assert_within_a_tick(finished - began, Duration::from_millis(2_000));
    assert!(matches!(
        gained,
        RoomEvent::ExperienceGained { amount: 50, .. }
    ));

    wait_for(&mut outgoing, |e| {
        matches!(
            e,
            RoomEvent::NodeChanged {
                state: NodeState::Available,
                ..
            }
        )
    })
    .await;
    assert_within_a_tick(Instant::now() - finished, Duration::from_millis(10_000));
}

#[tokio::test(start_paused = true)]
async fn cancelled_gather_never_completes() {
    let (handle, mut outgoing) = start(0.0);
    join_next_to_rock(&handle, &mut outgoing).await;

    handle
        .submit(ALICE, ClientMessage::BeginGather { node: ROCK })
        .unwrap();
    wait_for(&mut outgoing, |e| matches!(e, RoomEvent::GatherStarted { .. })).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.submit(ALICE, ClientMessage::CancelGather).unwrap();
    let ended = wait_for(&mut outgoing, |e| matches!(e, RoomEvent::GatherEnded { .. })).await;
    assert!(matches!(
        ended,
        RoomEvent::GatherEnded {
            end: GatherEnd::Cancelled,
            ..
        }
    ));

    // Well past the original deadline nothing else arrives.
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert!(outgoing.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn leaving_mid_gather_discards_the_timer() {
    let (handle, mut outgoing) = start(0.0);
    join_next_to_rock(&handle, &mut outgoing).await;

    handle
        .submit(ALICE, ClientMessage::BeginGather { node: ROCK })
        .unwrap();
    wait_for(&mut outgoing, |e| matches!(e, RoomEvent::GatherStarted { .. })).await;
    handle.leave(ALICE).unwrap();

    tokio::time::sleep(Duration::from_millis(3_000)).await;
    while let Ok(out) = outgoing.try_recv() {
        assert!(!matches!(
            out.message,
            ServerMessage::Event(RoomEvent::ExperienceGained { .. })
        ));
    }
}
