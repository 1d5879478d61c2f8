use playhost_proto::protocol::{Broadcast, ErrorKind, Message, Request, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::publisher::DaemonEvent;
use crate::router::{CommandRouter, DispatchOutcome};

pub fn start_server(
    bind_address: String,
    port: u16,
    router: CommandRouter,
    events: broadcast::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, router, events).await;
    })
}

pub async fn serve(
    listener: TcpListener,
    router: CommandRouter,
    events: broadcast::Sender<DaemonEvent>,
) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let router = router.clone();
                let events_rx = events.subscribe();
                tokio::spawn(async move {
                    handle_client(stream, router, id, events_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    router: CommandRouter,
    client_id: usize,
    mut events_rx: broadcast::Receiver<DaemonEvent>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Hello carries the session snapshot so clients can render immediately
    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        status: router.status().await,
    };
    if send(&mut write_half, hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            match Message::decode(&read_buf) {
                                Ok((Message::Request(req), consumed)) => {
                                    read_buf.drain(..consumed);
                                    debug!("Client {} sent {:?}", client_id, req);
                                    let reply = respond(&router, req).await;
                                    if send(&mut write_half, reply).await.is_err() {
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                    let reply = Broadcast::Error {
                                        kind: ErrorKind::Invalid,
                                        message: "expected a request".to_string(),
                                    };
                                    if send(&mut write_half, reply).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    // A complete frame that does not parse is dropped;
                                    // a partial one waits for more bytes.
                                    let Some(len) = frame_len(&read_buf) else { break };
                                    if read_buf.len() < len { break; }
                                    warn!("Client {} sent a malformed request: {}", client_id, e);
                                    read_buf.drain(..len);
                                    let reply = Broadcast::Error {
                                        kind: ErrorKind::Invalid,
                                        message: e.to_string(),
                                    };
                                    if send(&mut write_half, reply).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            event = events_rx.recv() => {
                match event {
                    Ok(event) => {
                        if send(&mut write_half, relay(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        let status = Broadcast::Status { status: router.status().await };
                        if send(&mut write_half, status).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

fn frame_len(buf: &[u8]) -> Option<usize> {
    let header: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(4 + u32::from_be_bytes(header) as usize)
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, broadcast: Broadcast) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Map a daemon event onto its wire broadcast.
fn relay(event: DaemonEvent) -> Broadcast {
    match event {
        DaemonEvent::MediaInfo(info) => Broadcast::MediaInfo { info },
        DaemonEvent::PlayerToPoll(backend) => Broadcast::PlayerToPoll { backend },
        DaemonEvent::Log(message) => Broadcast::Log { message },
    }
}

/// Execute one client request and build its reply.
pub async fn respond(router: &CommandRouter, request: Request) -> Broadcast {
    match request {
        Request::Control { command } => match router.dispatch(command).await {
            Ok(DispatchOutcome::Applied) => Broadcast::Ack { applied: true },
            Ok(DispatchOutcome::Dropped) => Broadcast::Ack { applied: false },
            Ok(DispatchOutcome::Failed(message)) => Broadcast::Error {
                kind: ErrorKind::Backend,
                message,
            },
            Err(e) => Broadcast::Error {
                kind: e.kind(),
                message: e.to_string(),
            },
        },
        Request::Launch { source } => match router.launch(source).await {
            Ok(()) => Broadcast::Ack { applied: true },
            Err(e) => Broadcast::Error {
                kind: e.kind(),
                message: e.to_string(),
            },
        },
        Request::GetVolume => Broadcast::Volume {
            percent: router.volume().await,
        },
        Request::GetStatus => Broadcast::Status {
            status: router.status().await,
        },
        Request::ListJukeboxPlaylists => Broadcast::Playlists {
            names: router.jukebox_playlists().await,
        },
        Request::ListJukeboxTracks { playlist } => {
            let tracks = router.jukebox_tracks(&playlist).await;
            Broadcast::Tracks { playlist, tracks }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptValue;
    use crate::testing::{fake_selector, music_dir};
    use playhost_proto::config::Config;
    use playhost_proto::media::{BackendKind, FileInfo, FileKind, MediaSource};
    use playhost_proto::protocol::Command;
    use std::time::Duration;

    fn router() -> CommandRouter {
        let (_provider, selector, _rx) = fake_selector(&Config::default());
        CommandRouter::new(selector)
    }

    #[tokio::test]
    async fn control_without_session_is_acked_unapplied() {
        let reply = respond(
            &router(),
            Request::Control {
                command: Command::Play,
            },
        )
        .await;
        assert!(matches!(reply, Broadcast::Ack { applied: false }));
    }

    #[tokio::test]
    async fn unsupported_command_maps_to_error_kind() {
        let router = router();
        let dir = music_dir(&["a.m3u"]);
        let reply = respond(
            &router,
            Request::Launch {
                source: MediaSource::File(FileInfo::new(
                    dir.path().join("a.m3u").to_string_lossy(),
                    FileKind::Playlist,
                )),
            },
        )
        .await;
        assert!(matches!(reply, Broadcast::Ack { applied: true }));

        let reply = respond(
            &router,
            Request::Control {
                command: Command::FullScreen,
            },
        )
        .await;
        match reply {
            Broadcast::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::Unsupported);
                assert!(message.contains("playlist"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_launch_is_reported_as_launch_error() {
        let reply = respond(
            &router(),
            Request::Launch {
                source: MediaSource::File(FileInfo::new(
                    "/does/not/exist/track.mp3",
                    FileKind::Music,
                )),
            },
        )
        .await;
        assert!(matches!(
            reply,
            Broadcast::Error {
                kind: ErrorKind::Launch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn jukebox_listing_echoes_playlist() {
        let (provider, selector, _rx) = fake_selector(&Config::default());
        provider.bridge.respond(
            "every track",
            Ok(ScriptValue::List(vec!["One".into(), "Two".into()])),
        );
        let router = CommandRouter::new(selector);
        let reply = respond(
            &router,
            Request::ListJukeboxTracks {
                playlist: "Mix".into(),
            },
        )
        .await;
        match reply {
            Broadcast::Tracks { playlist, tracks } => {
                assert_eq!(playlist, "Mix");
                assert_eq!(tracks, vec!["One", "Two"]);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn events_map_to_broadcasts() {
        assert!(matches!(
            relay(DaemonEvent::PlayerToPoll(Some(BackendKind::Jukebox))),
            Broadcast::PlayerToPoll {
                backend: Some(BackendKind::Jukebox)
            }
        ));
        assert!(matches!(
            relay(DaemonEvent::MediaInfo(None)),
            Broadcast::MediaInfo { info: None }
        ));
    }

    async fn read_message(stream: &mut TcpStream) -> Broadcast {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&body);
        match Message::decode(&frame).unwrap().0 {
            Message::Broadcast(b) => b,
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn client_gets_hello_replies_and_events() {
        let (_provider, selector, _rx) = fake_selector(&Config::default());
        let events = selector.lock().await.publisher().events();
        let router = CommandRouter::new(selector);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, router, events.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        match read_message(&mut client).await {
            Broadcast::Hello {
                protocol_version,
                status,
            } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(status.backend, None);
            }
            other => panic!("unexpected first message {:?}", other),
        }

        let request = Message::Request(Request::GetVolume).encode().unwrap();
        client.write_all(&request).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), read_message(&mut client))
            .await
            .unwrap();
        assert!(matches!(reply, Broadcast::Volume { percent: 50 }));

        events.send(DaemonEvent::Log("hello".into())).unwrap();
        let relayed = tokio::time::timeout(Duration::from_secs(5), read_message(&mut client))
            .await
            .unwrap();
        assert!(matches!(relayed, Broadcast::Log { message } if message == "hello"));
    }
}
