//! Per-peer read/write loop.
//!
//! Each connection runs in its own task. The task owns the socket and the
//! [`PeerSession`], and multiplexes four sources with `select!`: socket
//! reads, commands from the coordinator, the idle timer and, once the
//! handshake is done, the heartbeat interval. Leaving the loop drops both
//! timers.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::P2pConfig;
use crate::error::{P2pError, P2pResult};
use crate::peer::extension::{ApplicationProtocol, PeerSession};
use crate::peer::info::PeerId;
use crate::peer::session::SessionEvent;
use crate::protocol::{unix_now, Command, HostAddr, LineCodec};

/// Commands from the coordinator to a peer task.
#[derive(Debug)]
pub enum PeerCommand {
    /// Send a command to the peer.
    Send(Command),
    /// Close the connection.
    Disconnect,
}

/// Events from a peer task to the coordinator.
#[derive(Debug)]
pub enum PeerEvent {
    /// Handshake finished.
    HandshakeComplete {
        peer_id: PeerId,
        label: String,
        advertised: Option<HostAddr>,
    },
    /// A validated command for the coordinator.
    Message {
        peer_id: PeerId,
        command: Box<Command>,
    },
    /// The connection is gone. Sent exactly once per task.
    Disconnected { peer_id: PeerId, reason: String },
}

/// Spawn the task driving one connection.
///
/// Returns the command channel into the task and its handle.
pub fn spawn_peer_connection<A: ApplicationProtocol>(
    peer: PeerSession<A>,
    stream: TcpStream,
    event_tx: mpsc::Sender<PeerEvent>,
    config: Arc<P2pConfig>,
) -> (mpsc::UnboundedSender<PeerCommand>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let peer_id = peer.session().id();

    let handle = tokio::spawn(async move {
        let reason = match run_connection(peer, stream, command_rx, event_tx.clone(), config).await
        {
            Ok(reason) => reason.to_string(),
            Err(e) => e.to_string(),
        };
        tracing::debug!(peer = %peer_id, reason = %reason, "Connection closed");
        let _ = event_tx
            .send(PeerEvent::Disconnected { peer_id, reason })
            .await;
    });

    (command_tx, handle)
}

/// Drive one connection until it closes. `Ok` carries a graceful reason.
async fn run_connection<A: ApplicationProtocol>(
    mut peer: PeerSession<A>,
    stream: TcpStream,
    mut command_rx: mpsc::UnboundedReceiver<PeerCommand>,
    event_tx: mpsc::Sender<PeerEvent>,
    config: Arc<P2pConfig>,
) -> P2pResult<&'static str> {
    let (mut reader, writer) = stream.into_split();
    let mut out = Outgoing {
        writer,
        codec: LineCodec::new(),
        buf: BytesMut::new(),
        verbose: config.verbose,
    };
    let mut codec = LineCodec::new();
    let mut read_buf = BytesMut::with_capacity(4096);

    peer.start();
    out.flush(&mut peer).await?;

    let idle = sleep(config.idle_timeout);
    tokio::pin!(idle);
    let mut heartbeat: Option<Interval> = None;

    let reason = loop {
        tokio::select! {
            result = reader.read_buf(&mut read_buf) => {
                if result? == 0 {
                    break "Connection closed by peer";
                }
                idle.as_mut().reset(Instant::now() + config.idle_timeout);

                // Every complete line in the buffer, in order.
                while let Some(line) = codec.decode(&mut read_buf)? {
                    log_line(config.verbose, &peer.session().label(), "->", &line);
                    let events = peer.handle_line(&line, unix_now());
                    out.flush(&mut peer).await?;

                    for event in events {
                        match event {
                            SessionEvent::HandshakeComplete => {
                                let mut timer = interval_at(
                                    Instant::now() + config.ping_interval,
                                    config.ping_interval,
                                );
                                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                                heartbeat = Some(timer);

                                let info = peer.session().info();
                                emit(&event_tx, PeerEvent::HandshakeComplete {
                                    peer_id: info.id,
                                    label: info.label(),
                                    advertised: info.advertised,
                                }).await?;
                            }
                            SessionEvent::Forward(command) => {
                                emit(&event_tx, PeerEvent::Message {
                                    peer_id: peer.session().id(),
                                    command: Box::new(command),
                                }).await?;
                            }
                            SessionEvent::Rejected(_) => {}
                        }
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(PeerCommand::Send(command)) => {
                        peer.session_mut().send(command);
                        out.flush(&mut peer).await?;
                    }
                    Some(PeerCommand::Disconnect) => break "Disconnect requested",
                    None => break "Coordinator gone",
                }
            }

            _ = &mut idle => {
                tracing::info!(peer = %peer.session().id(), "Closing idle connection");
                break "Idle timeout";
            }

            _ = async {
                match heartbeat.as_mut() {
                    Some(timer) => { timer.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                peer.heartbeat();
                out.flush(&mut peer).await?;
            }
        }
    };

    let _ = out.writer.shutdown().await;
    Ok(reason)
}

/// Write half plus its encoder.
struct Outgoing {
    writer: OwnedWriteHalf,
    codec: LineCodec,
    buf: BytesMut,
    verbose: bool,
}

impl Outgoing {
    /// Write everything the session has queued.
    async fn flush<A: ApplicationProtocol>(&mut self, peer: &mut PeerSession<A>) -> P2pResult<()> {
        let commands = peer.take_outgoing();
        if commands.is_empty() {
            return Ok(());
        }

        let label = peer.session().label();
        for command in commands {
            log_line(self.verbose, &label, "<-", &command.to_string());
            self.codec.encode(command, &mut self.buf)?;
        }
        self.writer.write_all(&self.buf).await?;
        self.buf.clear();
        Ok(())
    }
}

async fn emit(event_tx: &mpsc::Sender<PeerEvent>, event: PeerEvent) -> P2pResult<()> {
    event_tx
        .send(event)
        .await
        .map_err(|_| P2pError::Shutdown)
}

fn log_line(verbose: bool, label: &str, arrow: &str, line: &str) {
    if verbose {
        tracing::info!("{} {} {}", label, arrow, line);
    } else {
        tracing::trace!("{} {} {}", label, arrow, line);
    }
}
