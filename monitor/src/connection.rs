use crate::errors::{Error, Result};
use crate::metrics::{
    CONNECTION_ATTEMPTS_TOTAL, CONNECTION_OPEN, FRAMES_TOTAL, RECONNECTS_SCHEDULED_TOTAL,
    SEND_FAILURES_TOTAL,
};
use crate::model::Command;
use crate::page::SharedPage;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Closed, with exactly one reconnect timer pending.
    RetryPending,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::RetryPending => write!(f, "disconnected (retry pending)"),
        }
    }
}

/// WebSocket URL for a device host, e.g. `ws://192.168.4.1/ws`.
pub fn gateway_url(host: &str, path: &str) -> String {
    format!("ws://{}/{}", host, path.trim_start_matches('/'))
}

/// Connection lifecycle decisions, free of any I/O.
///
/// The reconnect delay is fixed and retries never give up.
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    reconnect_delay: Duration,
    post_connect: Option<Command>,
    attempts: u64,
}

impl ConnectionManager {
    pub fn new(reconnect_delay: Duration, post_connect: Option<Command>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_delay,
            post_connect,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Starts an attempt. Refused while one is already live.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::RetryPending => {
                self.state = ConnectionState::Connecting;
                self.attempts += 1;
                true
            }
            ConnectionState::Connecting | ConnectionState::Open => false,
        }
    }

    /// Returns the command to run right after the connection opens.
    pub fn on_open(&mut self) -> Option<Command> {
        self.state = ConnectionState::Open;
        self.post_connect.clone()
    }

    /// Whether an inbound frame should reach the dispatcher.
    pub fn on_message(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Handles a close, error or failed connect. Returns the delay of the
    /// reconnect timer to start, or `None` when one is already pending.
    pub fn on_close(&mut self) -> Option<Duration> {
        if self.state == ConnectionState::RetryPending {
            return None;
        }
        self.state = ConnectionState::RetryPending;
        Some(self.reconnect_delay)
    }

    /// Manual reconnect: true when a pending timer should fire now.
    pub fn on_reconnect_requested(&self) -> bool {
        self.state == ConnectionState::RetryPending
    }

    pub fn on_shutdown(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

pub struct ConnectionOptions {
    pub url: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub post_connect: Option<Command>,
    pub command_capacity: usize,
}

/// Cloneable front of a running connection: sends commands, requests
/// reconnects and observes the state.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    reconnect: mpsc::Sender<()>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Queues a command for the open connection. Fails fast with
    /// `NotConnected` in any other state; nothing is queued for later.
    pub fn send(&self, command: Command) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Open {
            SEND_FAILURES_TOTAL.inc();
            warn!("Cannot send {:?}: connection is {}", command, state);
            return Err(Error::NotConnected(state));
        }

        self.commands.try_send(command).map_err(|e| {
            SEND_FAILURES_TOTAL.inc();
            warn!("Command queue rejected {:?}", e.into_inner());
            Error::ChannelSend
        })
    }

    /// Cuts a pending reconnect wait short. Ignored while a connection is
    /// open or an attempt is in flight.
    pub fn reconnect(&self) {
        if self.reconnect.try_send(()).is_err() {
            debug!("Reconnect already requested");
        }
    }
}

enum Closed {
    Remote(Option<String>),
    Failed(Error),
    Shutdown,
}

/// Owns the transport and runs the connect / serve / wait-and-retry loop.
pub struct ConnectionDriver {
    url: String,
    connect_timeout: Duration,
    manager: ConnectionManager,
    page: SharedPage,
    commands: mpsc::Receiver<Command>,
    reconnect: mpsc::Receiver<()>,
    state: watch::Sender<ConnectionState>,
}

pub fn connection(
    options: ConnectionOptions,
    page: SharedPage,
) -> (ConnectionHandle, ConnectionDriver) {
    let (commands_tx, commands_rx) = mpsc::channel(options.command_capacity.max(1));
    let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let handle = ConnectionHandle {
        commands: commands_tx,
        reconnect: reconnect_tx,
        state: state_rx,
    };
    let driver = ConnectionDriver {
        url: options.url,
        connect_timeout: options.connect_timeout,
        manager: ConnectionManager::new(options.reconnect_delay, options.post_connect),
        page,
        commands: commands_rx,
        reconnect: reconnect_rx,
        state: state_tx,
    };
    (handle, driver)
}

impl ConnectionDriver {
    /// Runs until every `ConnectionHandle` has been dropped.
    pub async fn run(mut self) {
        info!("Starting connection manager for {}", self.url);

        loop {
            if !self.manager.begin_connect() {
                error!("Connection attempt refused in state {}", self.manager.state());
                return;
            }
            self.publish();
            CONNECTION_ATTEMPTS_TOTAL.inc();
            info!(
                "Trying to open a WebSocket connection to {} (attempt {})",
                self.url,
                self.manager.attempts()
            );

            let attempt = timeout(self.connect_timeout, connect_async(self.url.as_str())).await;
            let closed = match attempt {
                Ok(Ok((stream, _))) => self.serve(stream).await,
                Ok(Err(e)) => Closed::Failed(Error::TransportUnavailable(e.to_string())),
                Err(_) => Closed::Failed(Error::TransportUnavailable(format!(
                    "no answer within {:?}",
                    self.connect_timeout
                ))),
            };
            CONNECTION_OPEN.set(0.0);

            match closed {
                Closed::Remote(reason) => info!(
                    "Connection closed by device: {}",
                    reason.unwrap_or_else(|| "no reason given".to_string())
                ),
                Closed::Failed(e) => warn!("Connection closed: {}", e),
                Closed::Shutdown => {
                    self.manager.on_shutdown();
                    self.publish();
                    info!("Connection manager stopped");
                    return;
                }
            }
            if let Some(delay) = self.close() {
                RECONNECTS_SCHEDULED_TOTAL.inc();
                if !self.wait_for_retry(delay).await {
                    info!("Connection manager stopped");
                    return;
                }
            }
        }
    }

    async fn serve(&mut self, stream: WsStream) -> Closed {
        let (mut sink, mut source) = stream.split();

        let post_connect = self.manager.on_open();
        self.discard_queued();
        self.publish();
        CONNECTION_OPEN.set(1.0);
        info!("Connection opened");

        if let Some(command) = post_connect {
            if let Err(e) = transmit(&mut sink, &command).await {
                return Closed::Failed(e);
            }
        }

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if self.manager.on_message() {
                            FRAMES_TOTAL.inc();
                            self.page.write().await.handle_frame(&text);
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        debug!("Ignoring {} byte binary frame", data.len());
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = sink.send(WsMessage::Pong(data)).await {
                            return Closed::Failed(e.into());
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        return Closed::Remote(frame.map(|f| f.reason.to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Closed::Failed(e.into()),
                    None => return Closed::Remote(None),
                },
                command = self.commands.recv() => match command {
                    Some(command) => match transmit(&mut sink, &command).await {
                        Ok(()) => {}
                        Err(e @ Error::Transport(_)) => return Closed::Failed(e),
                        Err(e) => {
                            SEND_FAILURES_TOTAL.inc();
                            error!("Failed to encode {:?}: {}", command, e);
                        }
                    },
                    None => {
                        let _ = sink.close().await;
                        return Closed::Shutdown;
                    }
                },
                request = self.reconnect.recv() => match request {
                    Some(()) => debug!("Reconnect requested while open, keeping the current connection"),
                    None => {
                        let _ = sink.close().await;
                        return Closed::Shutdown;
                    }
                },
            }
        }
    }

    /// Sleeps out the reconnect delay. Returns false when the handles are
    /// gone and the loop should stop.
    async fn wait_for_retry(&mut self, delay: Duration) -> bool {
        info!("Reconnecting in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            request = self.reconnect.recv() => match request {
                Some(()) if self.manager.on_reconnect_requested() => {
                    info!("Manual reconnect, cancelling the pending timer");
                    true
                }
                Some(()) => true,
                None => {
                    self.manager.on_shutdown();
                    self.publish();
                    false
                }
            },
        }
    }

    /// Leaves the open or connecting state. Reconnect requests made before
    /// the close are dropped so the full delay applies, and the closed state
    /// is published before the command queue is drained.
    fn close(&mut self) -> Option<Duration> {
        let delay = self.manager.on_close();
        while self.reconnect.try_recv().is_ok() {
            debug!("Dropping reconnect request made before the close");
        }
        self.publish();
        self.discard_queued();
        delay
    }

    fn discard_queued(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            SEND_FAILURES_TOTAL.inc();
            warn!("Discarding {:?} queued outside an open connection", command);
        }
    }

    fn publish(&self) {
        self.state.send_replace(self.manager.state());
    }
}

async fn transmit(sink: &mut WsSink, command: &Command) -> Result<()> {
    let frame = command.to_frame()?;
    debug!("Sending {}", frame);
    sink.send(WsMessage::Text(frame)).await?;
    Ok(())
}
