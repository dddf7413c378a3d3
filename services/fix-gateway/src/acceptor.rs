//! TCP acceptor and per-connection driver.
//!
//! Each connection gets its own task: read bytes, split frames, decode,
//! hand to the session, write whatever comes back. The same loop drains
//! the reply channel (reports routed from other sessions) and runs the
//! heartbeat clock: send one when we have been quiet for an interval,
//! drop the peer when it has been silent for two.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{info, warn};

use fix::FrameBuffer;
use matching_engine::events::ExchangeEvent;
use matching_engine::CancelOutcome;
use types::order::OrderStatus;

use crate::error::SessionEnd;
use crate::session::{OutboundMessage, Session};
use crate::state::Gateway;

pub struct Acceptor {
    listener: TcpListener,
    gateway: Arc<Gateway>,
}

impl Acceptor {
    pub async fn bind(gateway: Arc<Gateway>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&gateway.config.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "FIX gateway listening");
        Ok(Self { listener, gateway })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; spawns one task per client.
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!(%peer, "client connected");
            let gateway = Arc::clone(&self.gateway);
            tokio::spawn(handle_connection(gateway, stream, peer.to_string()));
        }
    }
}

async fn handle_connection(gateway: Arc<Gateway>, stream: TcpStream, peer: String) {
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(&gateway.config, peer.clone(), reply_tx);

    let end = drive(&gateway, stream, &mut session, reply_rx).await;
    match &end {
        SessionEnd::PeerClosed | SessionEnd::Logout => {
            info!(%peer, reason = %end, "session ended")
        }
        other => warn!(%peer, reason = %other, "session ended"),
    }

    release_session(&gateway, &session);
}

async fn drive(
    gateway: &Gateway,
    stream: TcpStream,
    session: &mut Session,
    mut reply_rx: mpsc::UnboundedReceiver<OutboundMessage>,
) -> SessionEnd {
    let (mut reader, mut writer) = stream.into_split();
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 4096];
    let mut last_recv = Instant::now();
    let mut last_sent = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => return SessionEnd::PeerClosed,
                    Ok(n) => n,
                    Err(err) => return SessionEnd::Transport(err),
                };
                last_recv = Instant::now();
                if let Err(err) = frames.push(&buf[..n]) {
                    return SessionEnd::Overflow(err);
                }

                while let Some(frame) = frames.next_frame() {
                    let outbound = match fix::decode(&frame) {
                        Ok(msg) => session.handle(&msg, gateway),
                        Err(err) => session.on_protocol_error(&err).into_iter().collect(),
                    };
                    for message in outbound {
                        if let Err(end) =
                            send(&mut writer, session, &message, gateway.config.write_timeout).await
                        {
                            return end;
                        }
                        last_sent = Instant::now();
                    }
                    if session.is_closing() {
                        return SessionEnd::Logout;
                    }
                }
            }

            routed = reply_rx.recv() => {
                // The session holds a sender clone, so the channel stays open.
                let Some(message) = routed else { continue };
                if let Err(end) =
                    send(&mut writer, session, &message, gateway.config.write_timeout).await
                {
                    return end;
                }
                last_sent = Instant::now();
            }

            _ = ticker.tick() => {
                // Pre-logon peers run against the configured default
                // interval, so an idle half-open connection still dies.
                let interval = Duration::from_secs(session.heartbeat_secs().max(1));
                if last_recv.elapsed() >= interval * 2 {
                    return SessionEnd::HeartbeatTimeout;
                }
                if session.is_logged_in() && last_sent.elapsed() >= interval {
                    let message = session.make_heartbeat();
                    if let Err(end) =
                        send(&mut writer, session, &message, gateway.config.write_timeout).await
                    {
                        return end;
                    }
                    last_sent = Instant::now();
                }
            }
        }
    }
}

async fn send(
    writer: &mut OwnedWriteHalf,
    session: &mut Session,
    message: &OutboundMessage,
    write_timeout: Duration,
) -> Result<(), SessionEnd> {
    let bytes = session.seal(message);
    match timeout(write_timeout, writer.write_all(&bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(SessionEnd::Transport(err)),
        Err(_) => Err(SessionEnd::WriteTimeout),
    }
}

/// Post-disconnect cleanup. Resting orders stay in the book unless
/// cancel-on-disconnect is switched on.
fn release_session(gateway: &Gateway, session: &Session) {
    for (order_id, symbol) in session.owned_orders() {
        gateway.router.unregister(order_id);
        if gateway.config.cancel_on_disconnect {
            if let CancelOutcome::Canceled(order) = gateway.engine.cancel(&symbol, order_id) {
                info!(
                    peer = %session.peer(),
                    order = %order_id,
                    "canceled on disconnect"
                );
                gateway.persist_order(&order);
                gateway.bus.publish(ExchangeEvent::CancelOrder {
                    order_id,
                    status: OrderStatus::Canceled,
                });
            }
        }
    }
}
