//! Glue between the TCP transport and the hosted rooms.
//!
//! Inbound frames are decoded into [`ClientMessage`]s and routed by the
//! [`RoomRegistry`], whose direct replies go out at once; disconnects become
//! leaves. Outbound room messages are encoded once and pushed onto each
//! addressee's connection queue.

use std::sync::Arc;

use tokio::sync::mpsc;

use glade_multiplayer::{ClientMessage, Outgoing, Recipients, RoomRegistry};
use glade_net::{ConnectionMap, TransportEvent};

/// Routes traffic between the rooms and the transport.
pub struct Bridge {
    rooms: RoomRegistry,
    connections: Arc<ConnectionMap>,
}

impl Bridge {
    /// Routes through `rooms` and delivers on `connections`.
    pub fn new(rooms: RoomRegistry, connections: Arc<ConnectionMap>) -> Self {
        Self { rooms, connections }
    }

    /// Pumps both directions until the transport closes. Dropping the
    /// bridge drops the registry, which stops every room.
    pub async fn run(
        mut self,
        mut transport: mpsc::Receiver<TransportEvent>,
        mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    ) {
        loop {
            tokio::select! {
                event = transport.recv() => match event {
                    Some(event) => self.on_transport(event).await,
                    None => return,
                },
                Some(out) = outgoing.recv() => {
                    self.rooms.observe(&out);
                    self.deliver(out).await;
                }
            }
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(id, peer) => {
                tracing::debug!("{id} connected from {peer}, awaiting join");
            }
            TransportEvent::Frame(id, bytes) => match ClientMessage::decode(&bytes) {
                Ok(message) => {
                    if let Some(reply) = self.rooms.route(id, message) {
                        let to = Recipients::One(id);
                        self.deliver(Outgoing { to, message: reply }).await;
                    }
                }
                Err(err) => tracing::warn!("Dropping malformed frame from {id}: {err}"),
            },
            TransportEvent::Disconnected(id) => self.rooms.leave(id),
        }
    }

    async fn deliver(&self, out: Outgoing) {
        let payload = match out.message.encode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("Failed to encode outbound message: {err}");
                return;
            }
        };
        for id in out.to.iter() {
            if !self.connections.send_to(id, payload.clone()).await {
                tracing::trace!("{id} is gone, skipping delivery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use glade_config::{LobbyConfig, RoomConfig};
    use glade_multiplayer::{AuthoritativeRoom, FixedRoll, RoomEvent, RoomId, ServerMessage};
    use glade_net::{
        FrameLimits, TransportConfig, TransportServer, read_message, write_frame, write_message,
    };
    use tokio::net::{TcpListener, TcpStream};

    async fn start_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(TransportServer::new(TransportConfig::new(addr), events_tx));

        let (outgoing_tx, outgoing) = mpsc::unbounded_channel();
        let rooms = RoomRegistry::new(RoomConfig::default(), LobbyConfig::default(), outgoing_tx)
            .with_room_factory(|config| {
                AuthoritativeRoom::with_roll(config, Box::new(FixedRoll(0.0)))
            });
        let bridge = Bridge::new(rooms, transport.connections());

        let srv = Arc::clone(&transport);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });
        tokio::spawn(bridge.run(events_rx, outgoing));
        addr
    }

    async fn recv(stream: &mut TcpStream) -> ServerMessage {
        tokio::time::timeout(
            Duration::from_secs(2),
            read_message(stream, &FrameLimits::default()),
        )
        .await
        .expect("message within timeout")
        .expect("valid message")
    }

    async fn send(stream: &mut TcpStream, message: &ClientMessage) {
        write_message(stream, message, &FrameLimits::default())
            .await
            .unwrap();
    }

    async fn join(addr: SocketAddr, name: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let join = ClientMessage::Join {
            username: name.into(),
        };
        send(&mut stream, &join).await;
        stream
    }

    /// Reads the placement notice and the welcome that follows it.
    async fn welcomed(stream: &mut TcpStream) -> glade_multiplayer::Welcome {
        assert!(matches!(recv(stream).await, ServerMessage::Placed(_)));
        match recv(stream).await {
            ServerMessage::Welcome(welcome) => welcome,
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_over_tcp_gets_welcome() {
        let addr = start_server().await;
        let mut alice = join(addr, "Alice").await;

        let ServerMessage::Placed(listing) = recv(&mut alice).await else {
            panic!("expected placement first");
        };
        assert_eq!(listing.id, RoomId(1));
        assert_eq!(listing.name, "Lobby");
        let ServerMessage::Welcome(welcome) = recv(&mut alice).await else {
            panic!("expected welcome");
        };
        assert_eq!(welcome.room.participants.len(), 1);
        assert_eq!(welcome.room.participants[0].name, "Alice");
        assert!(matches!(
            recv(&mut alice).await,
            ServerMessage::Event(RoomEvent::ParticipantJoined(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_and_connection_survives() {
        let addr = start_server().await;
        let mut alice = join(addr, "Alice").await;
        welcomed(&mut alice).await;

        write_frame(&mut alice, b"\x07garbage", &FrameLimits::default())
            .await
            .unwrap();
        let chat = ClientMessage::Chat {
            content: "still here".into(),
        };
        send(&mut alice, &chat).await;

        loop {
            if let ServerMessage::Event(RoomEvent::ChatPosted { from: Some(_), message }) =
                recv(&mut alice).await
            {
                assert_eq!(message.content, "still here");
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_announced_to_others() {
        let addr = start_server().await;
        let mut alice = join(addr, "Alice").await;
        let welcome = welcomed(&mut alice).await;
        let bob = join(addr, "Bob").await;

        let bob_id = loop {
            if let ServerMessage::Event(RoomEvent::ParticipantJoined(info)) = recv(&mut alice).await
                && info.id != welcome.you
            {
                break info.id;
            }
        };
        drop(bob);

        loop {
            if let ServerMessage::Event(RoomEvent::ParticipantLeft { id }) = recv(&mut alice).await
            {
                assert_eq!(id, bob_id);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_rooms_listed_and_created_over_tcp() {
        let addr = start_server().await;
        let mut alice = join(addr, "Alice").await;
        welcomed(&mut alice).await;

        let mut bob = TcpStream::connect(addr).await.unwrap();
        send(&mut bob, &ClientMessage::ListRooms).await;
        let ServerMessage::RoomList(rooms) = recv(&mut bob).await else {
            panic!("expected room list");
        };
        assert_eq!(rooms.len(), 1);
        assert_eq!((rooms[0].clients, rooms[0].template.as_str()), (1, "lobby"));

        let create = ClientMessage::CreateRoom {
            template: "cafe".into(),
            name: "Back Room".into(),
            username: "Bob".into(),
        };
        send(&mut bob, &create).await;
        let welcome = welcomed(&mut bob).await;
        assert_eq!(welcome.room.participants.len(), 1);
        assert_eq!(welcome.room.participants[0].name, "Bob");

        send(&mut bob, &ClientMessage::ListRooms).await;
        let rooms = loop {
            if let ServerMessage::RoomList(rooms) = recv(&mut bob).await {
                break rooms;
            }
        };
        let names: Vec<_> = rooms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Lobby", "Back Room"]);
    }
}
