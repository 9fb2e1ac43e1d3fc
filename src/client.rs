//! Connection builder, client API and receive loop.
//!
//! The [`ConnectionBuilder`] collects settings and takes over an already
//! connected byte stream. The resulting [`Connection`] owns two tasks:
//! 1. A writer task that serializes every outbound frame
//! 2. A receive loop that parses inbound frames and resolves pending requests
//!
//! # Example
//!
//! ```ignore
//! use serialwire_client::Connection;
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = TcpStream::connect("192.168.1.20:7000").await?;
//!     let conn = Connection::builder().connect(stream)?;
//!
//!     if conn.open_port("COM5", 115_200).await? {
//!         conn.write("COM5", b"AT\r\n").await?;
//!         conn.close_port("COM5").await?;
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{millis, ConnectionConfig};
use crate::error::{OperationKind, RemoteError, Result, SerialWireError};
use crate::protocol::{payload, Frame, FrameBuffer, OpCode};
use crate::tracking::{
    lock, ConnectionState, Delivery, PendingReply, Registration, SharedState,
};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Callback for ERROR frames not tied to a pending request or open port.
pub type RemoteErrorCallback = Arc<dyn Fn(&RemoteError) + Send + Sync>;

/// Builder for configuring and creating a [`Connection`].
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    on_remote_error: Option<RemoteErrorCallback>,
}

impl ConnectionBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::from_config(ConnectionConfig::default())
    }

    /// Create a builder from a loaded configuration.
    pub fn from_config(config: ConnectionConfig) -> Self {
        Self {
            config,
            on_remote_error: None,
        }
    }

    /// Set the deadline for OPEN and CLOSE replies.
    ///
    /// Default: 1 second
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout_ms = millis(timeout);
        self
    }

    /// Set the deadline for TX_CONFIRM.
    ///
    /// Default: 5 seconds
    pub fn confirm_timeout(mut self, timeout: Duration) -> Self {
        self.config.confirm_timeout_ms = millis(timeout);
        self
    }

    /// Whether inbound STREAM frames are answered with RX_CONFIRM.
    ///
    /// Default: true
    pub fn confirm_inbound(mut self, enabled: bool) -> Self {
        self.config.confirm_inbound = enabled;
        self
    }

    /// Set the largest inbound payload accepted before the connection is
    /// considered corrupt.
    ///
    /// Default: 16 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.backpressure_timeout_ms = millis(timeout);
        self
    }

    /// Register a callback for connection-level ERROR frames.
    pub fn on_remote_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RemoteError) + Send + Sync + 'static,
    {
        self.on_remote_error = Some(Arc::new(callback));
        self
    }

    /// Take over `stream` and start the writer task and receive loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect<S>(self, stream: S) -> Result<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.config.validate()?;
        Ok(Connection::start(stream, self.config, self.on_remote_error))
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("config", &self.config)
            .field("on_remote_error", &self.on_remote_error.is_some())
            .finish()
    }
}

/// A client connection multiplexing any number of remote serial ports.
///
/// All methods take `&self`; share the connection behind an `Arc` to use it
/// from several tasks.
pub struct Connection {
    state: SharedState,
    writer: Option<WriterHandle>,
    config: ConnectionConfig,
    shutdown_rx: watch::Receiver<bool>,
    read_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<Result<()>>>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    fn start<S>(
        stream: S,
        config: ConnectionConfig,
        on_remote_error: Option<RemoteErrorCallback>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer_config());

        let state: SharedState = Arc::new(Mutex::new(ConnectionState::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher {
            state: Arc::clone(&state),
            writer: writer.clone(),
            confirm_inbound: config.confirm_inbound,
            on_remote_error,
        };
        let max_payload_size = config.max_payload_size;

        let read_task = tokio::spawn(async move {
            match read_loop(reader, &dispatcher, max_payload_size).await {
                Ok(()) => tracing::debug!("Connection closed by peer"),
                Err(e) => tracing::error!("Read loop error: {}", e),
            }
            let failed = lock(&dispatcher.state).teardown();
            if failed > 0 {
                tracing::debug!("Failed {} outstanding requests", failed);
            }
            let _ = shutdown_tx.send(true);
        });

        Connection {
            state,
            writer: Some(writer),
            config,
            shutdown_rx,
            read_task: Some(read_task),
            writer_task: Some(writer_task),
        }
    }

    /// Send OPEN for `port` and return a handle to the reply.
    ///
    /// Resolves to `true` without any I/O if the port is already open.
    pub async fn request_open(&self, port: &str, baud: u32) -> Result<PendingReply<bool>> {
        validate_port_name(port)?;
        let frame = Frame::open(port, baud)?;

        let (id, rx) = {
            let mut state = lock(&self.state);
            if !state.is_alive() {
                return Err(SerialWireError::ConnectionClosed);
            }
            if state.ports.is_open(port) {
                return Ok(PendingReply::resolved(true));
            }
            let id = state.next_registration_id();
            (id, state.pending.opens.register(port, id)?)
        };

        let reply = PendingReply::new(
            rx,
            self.config.reply_timeout(),
            Registration::handshake(&self.state, OperationKind::Open, port, id),
        );
        // Dropping `reply` on failure withdraws the registration
        self.send(frame).await?;
        Ok(reply)
    }

    /// Open `port` at `baud`.
    ///
    /// Returns `true` on OPENED and `false` if the server answered with an
    /// ERROR for this port.
    pub async fn open_port(&self, port: &str, baud: u32) -> Result<bool> {
        self.request_open(port, baud).await?.wait().await
    }

    /// Send CLOSE for `port` and return a handle to the reply.
    ///
    /// Resolves immediately without any I/O if the port is not open.
    pub async fn request_close(&self, port: &str) -> Result<PendingReply<()>> {
        validate_port_name(port)?;
        let frame = Frame::close(port)?;

        let (id, rx) = {
            let mut state = lock(&self.state);
            if !state.is_alive() {
                return Err(SerialWireError::ConnectionClosed);
            }
            if !state.ports.is_open(port) {
                return Ok(PendingReply::resolved(()));
            }
            let id = state.next_registration_id();
            (id, state.pending.closes.register(port, id)?)
        };

        let reply = PendingReply::new(
            rx,
            self.config.reply_timeout(),
            Registration::handshake(&self.state, OperationKind::Close, port, id),
        );
        self.send(frame).await?;
        Ok(reply)
    }

    /// Close `port`.
    pub async fn close_port(&self, port: &str) -> Result<()> {
        self.request_close(port).await?.wait().await
    }

    /// Whether `port` is currently open.
    pub fn is_open(&self, port: &str) -> bool {
        lock(&self.state).ports.is_open(port)
    }

    /// Sorted names of all open ports.
    pub fn open_ports(&self) -> Vec<String> {
        lock(&self.state).ports.open_ports()
    }

    /// Send `data` to an open port and return a handle to its confirmation.
    pub async fn request_write(&self, port: &str, data: &[u8]) -> Result<PendingReply<Delivery>> {
        let (id, registered) = {
            let mut state = lock(&self.state);
            if !state.is_alive() {
                return Err(SerialWireError::ConnectionClosed);
            }
            if !state.ports.is_open(port) {
                return Err(SerialWireError::PortNotOpen(port.to_string()));
            }
            let id = state.next_registration_id();
            (id, state.transmissions.register(port, data.len(), id)?)
        };

        let reply = PendingReply::new(
            registered.rx,
            self.config.confirm_timeout(),
            Registration::transmission(&self.state, port, registered.txid, id),
        );
        self.send(Frame::stream(port, registered.txid, data)?).await?;
        Ok(reply)
    }

    /// Write `data` to an open port and wait for TX_CONFIRM.
    pub async fn write(&self, port: &str, data: &[u8]) -> Result<Delivery> {
        self.request_write(port, data).await?.wait().await
    }

    /// Send an empty STREAM frame to keep the port's session alive.
    pub async fn keep_alive(&self, port: &str) -> Result<Delivery> {
        self.write(port, &[]).await
    }

    /// Drain the asynchronous errors the server reported for `port`.
    pub fn take_stream_errors(&self, port: &str) -> Vec<RemoteError> {
        lock(&self.state).ports.take_errors(port)
    }

    /// Number of undrained stream errors for `port`.
    pub fn stream_error_count(&self, port: &str) -> usize {
        lock(&self.state).ports.error_count(port)
    }

    /// Take the receiver of data the server streams for `port`.
    ///
    /// Available once per open session; `None` if the port is not open or
    /// the receiver was already taken. The receiver ends when the port
    /// closes.
    pub fn take_incoming(&self, port: &str) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        lock(&self.state).ports.take_incoming(port)
    }

    /// Number of writes to `port` still waiting for TX_CONFIRM.
    pub fn pending_transmissions(&self, port: &str) -> usize {
        lock(&self.state).transmissions.pending_count(port)
    }

    /// Number of OPEN and CLOSE requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Get the current backpressure status.
    pub fn is_backpressure_active(&self) -> bool {
        self.writer
            .as_ref()
            .is_some_and(WriterHandle::is_backpressure_active)
    }

    /// Get the current pending frame count.
    pub fn pending_frames(&self) -> usize {
        self.writer.as_ref().map_or(0, WriterHandle::pending_count)
    }

    /// False once the connection has failed or been closed.
    pub fn is_alive(&self) -> bool {
        lock(&self.state).is_alive()
    }

    /// Wait until the receive loop has stopped.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Shut the connection down.
    ///
    /// Every pending request fails with `ConnectionClosed`. Frames already
    /// queued are still written before the write half is shut down.
    pub async fn close(mut self) {
        let failed = lock(&self.state).teardown();
        if failed > 0 {
            tracing::debug!("Failed {} outstanding requests on close", failed);
        }

        if let Some(task) = self.read_task.take() {
            task.abort();
            let _ = task.await;
        }

        // Last handle gone, the writer drains its queue and exits
        self.writer = None;
        if let Some(task) = self.writer_task.take() {
            if let Ok(Err(e)) = task.await {
                tracing::debug!("Writer stopped with error: {}", e);
            }
        }
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.send_frame(frame).await,
            None => Err(SerialWireError::ConnectionClosed),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        lock(&self.state).teardown();
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("alive", &self.is_alive())
            .field("open_ports", &self.open_ports())
            .finish()
    }
}

fn validate_port_name(port: &str) -> Result<()> {
    if port.is_empty() {
        return Err(SerialWireError::InvalidPortName);
    }
    Ok(())
}

/// Main read loop - reads frames and dispatches them.
///
/// Returns `Ok(())` on a clean EOF between frames.
async fn read_loop<R>(mut reader: R, dispatcher: &Dispatcher, max_payload_size: u32) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) if frame_buffer.has_partial_frame() => {
                tracing::debug!(
                    "EOF with {} bytes of an incomplete frame buffered",
                    frame_buffer.len()
                );
                return Err(SerialWireError::ConnectionClosed);
            }
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(SerialWireError::Io(e)),
        };

        for frame in frame_buffer.push(&buf[..n])? {
            dispatcher.dispatch(frame)?;
        }
    }
}

/// Routes inbound frames to the tracking tables.
struct Dispatcher {
    state: SharedState,
    writer: WriterHandle,
    confirm_inbound: bool,
    on_remote_error: Option<RemoteErrorCallback>,
}

impl Dispatcher {
    /// Handle one frame. An error ends the connection.
    fn dispatch(&self, frame: Frame) -> Result<()> {
        tracing::debug!("Received {} ({} bytes)", frame.opcode, frame.payload.len());

        match frame.opcode {
            OpCode::Error => self.on_error(payload::parse_error(frame.payload)?),
            OpCode::Opened => self.on_opened(&payload::parse_port_name(frame.payload)?),
            OpCode::Closed => self.on_closed(&payload::parse_port_name(frame.payload)?),
            OpCode::TxConfirm => {
                let confirm = payload::parse_confirm(frame.payload)?;
                if !lock(&self.state)
                    .transmissions
                    .confirm_tx(&confirm.port, confirm.txid)
                {
                    tracing::debug!(
                        "Stray TX_CONFIRM for {} transaction {}",
                        confirm.port,
                        confirm.txid
                    );
                }
            }
            OpCode::RxConfirm => {
                let confirm = payload::parse_confirm(frame.payload)?;
                if !lock(&self.state)
                    .transmissions
                    .confirm_rx(&confirm.port, confirm.txid)
                {
                    tracing::debug!(
                        "Stray RX_CONFIRM for {} transaction {}",
                        confirm.port,
                        confirm.txid
                    );
                }
            }
            OpCode::Stream => self.on_stream(payload::parse_stream(frame.payload)?)?,
            OpCode::Open | OpCode::Close => {
                return Err(SerialWireError::Protocol(format!(
                    "Unexpected {} frame from server",
                    frame.opcode
                )));
            }
        }
        Ok(())
    }

    fn on_error(&self, error: RemoteError) {
        let global = {
            let mut state = lock(&self.state);
            match error.port.as_deref() {
                Some(port) if state.pending.opens.contains(port) => {
                    tracing::debug!("OPEN {} rejected: {}", port, error.message);
                    state.pending.opens.resolve(port, Ok(false));
                    false
                }
                Some(port) if state.pending.closes.contains(port) => {
                    tracing::debug!("CLOSE {} rejected: {}", port, error.message);
                    state
                        .pending
                        .closes
                        .resolve(port, Err(SerialWireError::Remote(error.clone())));
                    false
                }
                Some(port) => !state.ports.push_error(port, error.clone()),
                None => true,
            }
        };

        if global {
            tracing::warn!("Remote error: {}", error);
            if let Some(callback) = &self.on_remote_error {
                callback(&error);
            }
        }
    }

    fn on_opened(&self, port: &str) {
        let mut state = lock(&self.state);
        if state.pending.opens.resolve(port, Ok(true)) {
            state.ports.mark_open(port);
        } else {
            tracing::warn!("OPENED for {} without a pending OPEN", port);
        }
    }

    fn on_closed(&self, port: &str) {
        let mut state = lock(&self.state);
        if state.pending.closes.resolve(port, Ok(())) {
            state.ports.mark_closed(port);
            let failed = state.transmissions.fail_port(port);
            if failed > 0 {
                tracing::debug!("{} closed with {} unconfirmed writes", port, failed);
            }
        } else {
            tracing::warn!("CLOSED for {} without a pending CLOSE", port);
        }
    }

    fn on_stream(&self, stream: payload::StreamData) -> Result<()> {
        let delivered = lock(&self.state)
            .ports
            .deliver(&stream.port, stream.data);
        if !delivered {
            tracing::warn!("STREAM for {} which is not open, dropped", stream.port);
            return Ok(());
        }
        if !self.confirm_inbound {
            return Ok(());
        }

        // Never wait on a full queue here, it would stall every inbound frame
        match self
            .writer
            .try_send_frame(Frame::rx_confirm(&stream.port, stream.txid)?)
        {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(
                    "Dropped RX_CONFIRM for {} transaction {}: {}",
                    stream.port,
                    stream.txid,
                    e
                );
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}
