use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stream_core::events::StreamEvent;
use stream_core::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::AppContext;

pub fn start_server(bind_address: String, port: u16, ctx: AppContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind player socket {}: {}", addr, e);
                return;
            }
        };
        info!("Player socket listening at {}", addr);
        serve(listener, ctx).await;
    })
}

async fn serve(listener: TcpListener, ctx: AppContext) {
    let connected = Arc::new(AtomicUsize::new(0));
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                let count = connected.fetch_add(1, Ordering::SeqCst) + 1;
                info!("Player {} connected from {} ({} connected)", id, peer, count);

                let ctx = ctx.clone();
                let events = ctx.events.subscribe();
                let connected = connected.clone();
                tokio::spawn(async move {
                    handle_client(stream, ctx, id, events).await;
                    let count = connected.fetch_sub(1, Ordering::SeqCst) - 1;
                    info!("Player {} disconnected ({} connected)", id, count);
                });
            }
            Err(e) => {
                error!("Failed to accept player connection: {}", e);
            }
        }
    }
}

async fn send(write_half: &mut OwnedWriteHalf, broadcast: Broadcast) -> bool {
    match Message::Broadcast(broadcast).encode() {
        Ok(encoded) => write_half.write_all(&encoded).await.is_ok(),
        Err(e) => {
            error!("Failed to encode broadcast: {}", e);
            true
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    ctx: AppContext,
    client_id: usize,
    mut events: broadcast::Receiver<StreamEvent>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        status: ctx.monitor.get_health_status(),
    };
    if !send(&mut write_half, hello).await {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        loop {
                            match Message::decode(&read_buf) {
                                Ok(Some((Message::Command(cmd), consumed))) => {
                                    read_buf.drain(..consumed);
                                    debug!("Player {} sent {:?}", client_id, cmd);
                                    let reply = handle_command(&ctx, cmd).await;
                                    for b in reply {
                                        if !send(&mut write_half, b).await {
                                            return;
                                        }
                                    }
                                }
                                Ok(Some((_, consumed))) => {
                                    read_buf.drain(..consumed);
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!("Player {} sent an unreadable frame: {}", client_id, e);
                                    let _ = send(&mut write_half, Broadcast::Error { message: e.to_string() }).await;
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from player {}: {}", client_id, e);
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send(&mut write_half, Broadcast::Event { event }).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Player {} missed {} events", client_id, n);
                        let status = ctx.monitor.get_health_status();
                        if !send(&mut write_half, Broadcast::Health { status }).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn handle_command(ctx: &AppContext, cmd: Command) -> Vec<Broadcast> {
    match cmd {
        Command::GetHealth => vec![Broadcast::Health {
            status: ctx.monitor.get_health_status(),
        }],
        Command::ForceCheck => vec![Broadcast::Health {
            status: ctx.monitor.force_health_check().await,
        }],
        Command::GetStreamUrl => vec![Broadcast::StreamUrl {
            url: ctx.fallback.get_fallback_url(None).await,
        }],
        Command::ReportFailure { url } => {
            let next = ctx.fallback.rotate_to_next_fallback(&url, None).await;
            match next {
                Some(_) => vec![Broadcast::StreamUrl { url: next }],
                None => vec![
                    Broadcast::Error {
                        message: format!("no working stream left after {}", url),
                    },
                    Broadcast::StreamUrl { url: None },
                ],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_core::config::Config;
    use stream_core::events::EventBus;
    use stream_core::store::MemorySettingsStore;
    use stream_core::testing::ScriptedProber;

    const A: &str = "https://a.example/live";
    const B: &str = "https://b.example/live";

    async fn read_broadcast(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Broadcast {
        let mut tmp = [0u8; 4096];
        loop {
            if let Some((msg, used)) = Message::decode(buf).unwrap() {
                buf.drain(..used);
                match msg {
                    Message::Broadcast(b) => return b,
                    other => panic!("unexpected {:?}", other),
                }
            }
            let n = stream.read(&mut tmp).await.unwrap();
            assert!(n > 0, "server closed the connection");
            buf.extend_from_slice(&tmp[..n]);
        }
    }

    async fn connect() -> (TcpStream, Arc<ScriptedProber>) {
        let prober = Arc::new(ScriptedProber::new());
        let mut config = Config::default();
        config.sources.primary_url = Some(A.into());
        config.sources.backup_url = Some(B.into());
        config.sources.default_urls.clear();
        let ctx = AppContext::new(
            &config,
            Arc::new(MemorySettingsStore::new()),
            prober.clone(),
            EventBus::new(16),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, ctx));
        (TcpStream::connect(addr).await.unwrap(), prober)
    }

    #[tokio::test]
    async fn hello_then_failure_report_rotates() {
        let (mut stream, prober) = connect().await;
        prober.set_ok(B, 25);
        let mut buf = Vec::new();

        match read_broadcast(&mut stream, &mut buf).await {
            Broadcast::Hello { protocol_version, .. } => assert_eq!(protocol_version, PROTOCOL_VERSION),
            other => panic!("expected Hello, got {:?}", other),
        }

        let frame = Message::Command(Command::ReportFailure { url: A.into() })
            .encode()
            .unwrap();
        stream.write_all(&frame).await.unwrap();
        assert_eq!(
            read_broadcast(&mut stream, &mut buf).await,
            Broadcast::StreamUrl { url: Some(B.into()) }
        );
    }

    #[tokio::test]
    async fn exhausted_rotation_reports_an_error() {
        let (mut stream, _prober) = connect().await;
        let mut buf = Vec::new();
        read_broadcast(&mut stream, &mut buf).await;

        let frame = Message::Command(Command::ReportFailure { url: A.into() })
            .encode()
            .unwrap();
        stream.write_all(&frame).await.unwrap();
        assert!(matches!(
            read_broadcast(&mut stream, &mut buf).await,
            Broadcast::Error { .. }
        ));
        assert_eq!(
            read_broadcast(&mut stream, &mut buf).await,
            Broadcast::StreamUrl { url: None }
        );
    }
}
