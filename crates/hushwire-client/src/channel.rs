//! Persistent websocket channels with automatic reconnection.
//!
//! One task per channel owns the socket. The task dials, forwards parsed
//! frames and state changes to the owner through an event queue, and on
//! connection loss walks the exponential backoff schedule. When the
//! schedule is exhausted the channel parks in [`ChannelState::Closed`]
//! until the owner asks for a retry, so a dead relay cannot produce an
//! unbounded reconnect storm.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hushwire_core::{
    conversation::UserId,
    env::Environment,
    reconnect::{DEFAULT_BASE_DELAY, ReconnectPolicy},
};
use hushwire_proto::{InboundFrame, OutboundFrame};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, connect_async, tungstenite::Message};

/// Which relay endpoint a channel speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    /// Account-wide `/ws/global/` connection.
    Global,
    /// `/ws/chat/{local}/{peer}/` connection bound to one peer.
    Conversation {
        /// Peer on the other end.
        peer: UserId,
    },
}

/// Why a channel reached [`ChannelState::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner asked for the close.
    Requested,
    /// Every scheduled reconnect failed; the channel is parked until
    /// [`ChannelHandle::retry`].
    ReconnectExhausted {
        /// Consecutive failures before giving up.
        attempts: u32,
    },
}

/// Connection state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Dialing the relay.
    Connecting,
    /// Connected and exchanging frames.
    Open,
    /// Connection lost; the next attempt is scheduled.
    Disconnected,
    /// No further attempts without outside intervention.
    Closed(CloseReason),
}

/// What a channel reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connection state changed.
    State(ChannelState),
    /// A well-formed frame arrived.
    Frame(InboundFrame),
}

/// Reconnection tuning shared by all channels of a client.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// First backoff delay; doubles per consecutive failure.
    pub base_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { base_delay: DEFAULT_BASE_DELAY }
    }
}

/// The channel task is gone; no more frames can be queued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("channel closed")]
pub struct ChannelClosed;

enum Command {
    Send(String),
    Retry,
    Close,
}

/// Handle to a running channel task.
///
/// Dropping the handle closes the channel on its next poll.
pub struct ChannelHandle {
    scope: ChannelScope,
    commands: mpsc::Sender<Command>,
}

impl ChannelHandle {
    /// Which endpoint this handle controls.
    pub fn scope(&self) -> ChannelScope {
        self.scope
    }

    /// Queue a frame for the relay.
    ///
    /// # Errors
    /// Returns [`ChannelClosed`] when the channel task has exited.
    pub async fn send(&self, frame: &OutboundFrame) -> Result<(), ChannelClosed> {
        self.commands.send(Command::Send(frame.encode())).await.map_err(|_| ChannelClosed)
    }

    /// Re-arm a parked channel (or shortcut a pending backoff delay).
    ///
    /// # Errors
    /// Returns [`ChannelClosed`] when the channel task has exited.
    pub async fn retry(&self) -> Result<(), ChannelClosed> {
        self.commands.send(Command::Retry).await.map_err(|_| ChannelClosed)
    }

    /// Close the socket and stop the task.
    pub async fn close(&self) {
        // An already-gone task is an acceptable close.
        let _ = self.commands.send(Command::Close).await;
    }
}

/// Spawn a channel task for `url`; events arrive tagged with `scope`.
///
/// # Panics
/// Panics when called outside a tokio runtime.
pub fn open_channel<E: Environment>(
    env: E,
    scope: ChannelScope,
    url: String,
    config: ChannelConfig,
    events: mpsc::UnboundedSender<(ChannelScope, ChannelEvent)>,
) -> ChannelHandle {
    let (commands_tx, commands_rx) = mpsc::channel(32);
    tokio::spawn(run(env, scope, url, config, commands_rx, events));
    ChannelHandle { scope, commands: commands_tx }
}

/// Outcome of one connected stretch.
enum SocketExit {
    /// The owner asked for the close.
    Requested,
    /// The connection dropped out from under us.
    Dropped(String),
}

async fn run<E: Environment>(
    env: E,
    scope: ChannelScope,
    url: String,
    config: ChannelConfig,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<(ChannelScope, ChannelEvent)>,
) {
    let mut policy = ReconnectPolicy::with_base(config.base_delay);
    'outer: loop {
        emit(&events, scope, ChannelEvent::State(ChannelState::Connecting));
        match connect_async(&url).await {
            Ok((socket, _response)) => {
                policy.reset();
                emit(&events, scope, ChannelEvent::State(ChannelState::Open));
                let opened_at = env.now();
                match drive_socket(socket, scope, &mut commands, &events).await {
                    SocketExit::Requested => {
                        emit(
                            &events,
                            scope,
                            ChannelEvent::State(ChannelState::Closed(CloseReason::Requested)),
                        );
                        return;
                    }
                    SocketExit::Dropped(reason) => {
                        let uptime = env.now() - opened_at;
                        tracing::debug!(?scope, ?uptime, "channel dropped: {reason}");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(?scope, "connect failed: {err}");
            }
        }

        match policy.next_delay() {
            Ok(delay) => {
                emit(&events, scope, ChannelEvent::State(ChannelState::Disconnected));
                let started = env.now();
                loop {
                    let remaining = delay.saturating_sub(env.now() - started);
                    if remaining.is_zero() {
                        break;
                    }
                    tokio::select! {
                        () = env.sleep(remaining) => break,
                        command = commands.recv() => match command {
                            Some(Command::Retry) => {
                                policy.reset();
                                break;
                            }
                            Some(Command::Send(_)) => {
                                tracing::debug!(?scope, "dropping frame while disconnected");
                            }
                            Some(Command::Close) | None => {
                                emit(
                                    &events,
                                    scope,
                                    ChannelEvent::State(ChannelState::Closed(
                                        CloseReason::Requested,
                                    )),
                                );
                                return;
                            }
                        },
                    }
                }
            }
            Err(exhausted) => {
                tracing::warn!(?scope, "reconnect exhausted: {exhausted}");
                emit(
                    &events,
                    scope,
                    ChannelEvent::State(ChannelState::Closed(CloseReason::ReconnectExhausted {
                        attempts: exhausted.attempts,
                    })),
                );
                // Parked: only a retry or close wakes the channel.
                loop {
                    match commands.recv().await {
                        Some(Command::Retry) => {
                            policy.reset();
                            continue 'outer;
                        }
                        Some(Command::Send(_)) => {
                            tracing::debug!(?scope, "dropping frame while parked");
                        }
                        Some(Command::Close) | None => return,
                    }
                }
            }
        }
    }
}

async fn drive_socket<S>(
    socket: WebSocketStream<S>,
    scope: ChannelScope,
    commands: &mut mpsc::Receiver<Command>,
    events: &mpsc::UnboundedSender<(ChannelScope, ChannelEvent)>,
) -> SocketExit
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = socket.split();

    // A conversation socket pulls stored history on every (re)connect.
    if matches!(scope, ChannelScope::Conversation { .. }) {
        let request = OutboundFrame::FetchMessages.encode();
        if let Err(err) = sink.send(Message::text(request)).await {
            return SocketExit::Dropped(format!("history request failed: {err}"));
        }
    }

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => match InboundFrame::parse(text.as_str()) {
                    Ok(frame) => emit(events, scope, ChannelEvent::Frame(frame)),
                    // One malformed frame never takes the channel down.
                    Err(err) => tracing::warn!(?scope, "dropping malformed frame: {err}"),
                },
                Some(Ok(Message::Close(_))) => {
                    return SocketExit::Dropped("relay closed the connection".to_string());
                }
                Some(Ok(other)) => {
                    tracing::debug!(?scope, "ignoring non-text frame: {other:?}");
                }
                Some(Err(err)) => return SocketExit::Dropped(err.to_string()),
                None => return SocketExit::Dropped("connection ended".to_string()),
            },
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(err) = sink.send(Message::text(text)).await {
                        return SocketExit::Dropped(format!("send failed: {err}"));
                    }
                }
                Some(Command::Retry) => {}
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SocketExit::Requested;
                }
            },
        }
    }
}

fn emit(
    events: &mpsc::UnboundedSender<(ChannelScope, ChannelEvent)>,
    scope: ChannelScope,
    event: ChannelEvent,
) {
    // The owner dropping its receiver is not the channel's problem.
    let _ = events.send((scope, event));
}
