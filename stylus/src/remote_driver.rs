//! `remote_driver`
//!
//! The driver for a plotter that lives behind a server: a persistent
//! WebSocket channel carries lifecycle notifications down and lightweight
//! commands up, while the heavyweight operations (submitting a plan,
//! cancel, pause, resume) travel as individual HTTP requests. The channel
//! reconnects on a fixed delay, indefinitely, until the driver is closed.

use std::{
    net::TcpStream,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

use tungstenite::{stream::MaybeTlsStream, WebSocket};

use crate::{
    driver::{Driver, DriverError, EventHandlers},
    messages::{CancelRequest, ClientMessage, ServerMessage},
    planning::Plan,
};

/// How often the keepalive ping is sent while connected.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait before attempting to reconnect a lost channel.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Granularity at which blocking waits re-check the shutdown flag.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// State shared between the driver handle and its connection-manager
/// thread.
struct RemoteShared {
    /// Whether the channel is currently open.
    connected: AtomicBool,
    /// Set once the driver has been closed; the manager exits when it sees
    /// this.
    shutdown: AtomicBool,
    /// Sender for lightweight outbound commands, present only while the
    /// channel is open.
    outbound: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    /// Registered event handlers.
    handlers: EventHandlers,
}

/// A [`Driver`] that mirrors the driver contract over a connection to a
/// remote plot server.
pub struct RemoteDriver {
    /// Base URL of the server, e.g. `http://127.0.0.1:1789`.
    base_url: String,
    /// HTTP client for the request-style operations.
    http: reqwest::blocking::Client,
    /// State shared with the connection manager.
    shared: Arc<RemoteShared>,
    /// The connection-manager thread, joined on close.
    manager: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RemoteDriver {
    /// Connects to a plot server.
    ///
    /// The returned driver starts connecting immediately and keeps
    /// reconnecting on a fixed delay for as long as it lives; a server that
    /// is down when this is called is picked up on a later attempt.
    ///
    /// # Arguments
    /// * `base_url`: Base URL of the server, e.g. `http://127.0.0.1:1789`.
    ///
    /// # Returns
    /// The driver handle.
    pub fn connect(base_url: &str) -> RemoteDriver {
        let shared = Arc::new(RemoteShared {
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            outbound: Mutex::new(None),
            handlers: EventHandlers::new(),
        });

        let ws_url = websocket_url(base_url);
        let manager_shared = shared.clone();
        let manager = thread::Builder::new()
            .name("stylus-remote".to_string())
            .spawn(move || connection_manager(&manager_shared, &ws_url))
            .ok();

        RemoteDriver {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::blocking::Client::new(),
            shared,
            manager: Mutex::new(manager),
        }
    }

    /// Whether the channel is currently open.
    ///
    /// # Returns
    /// `true` while the WebSocket channel is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Sends a keepalive ping.
    ///
    /// # Returns
    /// `Ok(())` once queued; [`DriverError::NotConnected`] if the channel is
    /// down.
    pub fn ping(&self) -> Result<(), DriverError> {
        self.send(ClientMessage::Ping)
    }

    /// Queues a lightweight command on the channel.
    ///
    /// Commands are never queued across a disconnect: if the channel is not
    /// currently open this fails immediately.
    ///
    /// # Arguments
    /// * `message`: The command to send.
    ///
    /// # Returns
    /// `Ok(())` once queued; [`DriverError::NotConnected`] if the channel is
    /// down.
    fn send(&self, message: ClientMessage) -> Result<(), DriverError> {
        let outbound = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(sender) => sender
                .send(message)
                .map_err(|_| DriverError::NotConnected),
            None => Err(DriverError::NotConnected),
        }
    }

    /// Issues one of the request-style operations.
    ///
    /// These go over HTTP rather than the channel, so they do not depend on
    /// the channel being up; their effects arrive back asynchronously as
    /// channel messages.
    ///
    /// # Arguments
    /// * `path`: Request path, e.g. `/plot`.
    /// * `body`: Optional JSON body.
    ///
    /// # Returns
    /// `Ok(())` if the server accepted the request.
    fn request<T: serde::Serialize>(
        &self,
        path: &str,
        body: Option<&T>,
    ) -> Result<(), DriverError> {
        let mut request = self.http.post(format!("{}{path}", self.base_url));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().map_err(DriverError::Http)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.as_u16() == 409 {
            Err(DriverError::Busy)
        } else {
            Err(DriverError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

impl Driver for RemoteDriver {
    fn handlers(&self) -> &EventHandlers {
        &self.shared.handlers
    }

    fn plot(&self, plan: Plan) -> Result<(), DriverError> {
        self.request("/plot", Some(&plan))
    }

    fn cancel(&self, immediate: bool) -> Result<(), DriverError> {
        self.request("/cancel", Some(&CancelRequest { immediate }))
    }

    fn pause(&self) -> Result<(), DriverError> {
        self.request::<()>("/pause", None)
    }

    fn resume(&self) -> Result<(), DriverError> {
        self.request::<()>("/resume", None)
    }

    fn set_pen_height(&self, height: u32, rate: u32) -> Result<(), DriverError> {
        self.send(ClientMessage::SetPenHeight { height, rate })
    }

    fn limp(&self) -> Result<(), DriverError> {
        self.send(ClientMessage::Limp)
    }

    fn go_home(
        &self,
        pen_up_height: Option<u32>,
        pen_up_rate: Option<u32>,
    ) -> Result<(), DriverError> {
        self.send(ClientMessage::GoHome {
            pen_up_height,
            pen_up_rate,
        })
    }

    fn name(&self) -> String {
        format!("scribe ({})", self.base_url)
    }

    fn close(&self) -> Result<(), DriverError> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let handle = self
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        Ok(())
    }
}

/// Derives the channel endpoint from a server base URL.
///
/// # Arguments
/// * `base_url`: Base URL of the server, e.g. `http://127.0.0.1:1789`.
///
/// # Returns
/// The WebSocket URL of the server's channel endpoint.
fn websocket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    match base.strip_prefix("http") {
        Some(rest) => format!("ws{rest}/ws"),
        None => format!("{base}/ws"),
    }
}

/// Owns the channel for the lifetime of a driver: connect, run the session,
/// reconnect after the fixed delay, forever, until shutdown.
///
/// # Arguments
/// * `shared`: State shared with the driver handle.
/// * `ws_url`: The channel endpoint.
fn connection_manager(shared: &Arc<RemoteShared>, ws_url: &str) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        match tungstenite::connect(ws_url) {
            Ok((socket, _response)) => {
                log::info!("connected to plot server");
                run_session(shared, socket);
            }
            Err(err) => log::warn!("could not reach the plot server: {err}"),
        }

        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        log::info!(
            "reconnecting in {} seconds",
            RECONNECT_DELAY.as_secs()
        );
        interruptible_sleep(shared, RECONNECT_DELAY);
    }
}

/// Sleeps for `duration`, waking early if the driver shuts down.
///
/// # Arguments
/// * `shared`: State shared with the driver handle.
/// * `duration`: How long to sleep.
fn interruptible_sleep(shared: &RemoteShared, duration: Duration) {
    let mut remaining = duration;
    while remaining > Duration::ZERO && !shared.shutdown.load(Ordering::SeqCst) {
        let step = remaining.min(SHUTDOWN_POLL_INTERVAL);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

/// Services one connected channel until it drops: dispatches inbound
/// messages, writes queued outbound commands, and runs the keepalive loop.
///
/// # Arguments
/// * `shared`: State shared with the driver handle.
/// * `socket`: The freshly opened channel.
fn run_session(shared: &Arc<RemoteShared>, mut socket: WebSocket<MaybeTlsStream<TcpStream>>) {
    // The session loop is the socket's only owner, so reads are given a
    // short timeout to let queued outbound commands interleave with them.
    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        if let Err(err) = stream.set_read_timeout(Some(SHUTDOWN_POLL_INTERVAL)) {
            log::warn!("could not set the channel read timeout: {err}");
        }
    }

    let (outbound_tx, outbound_rx) = mpsc::channel::<ClientMessage>();
    *shared
        .outbound
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(outbound_tx.clone());
    shared.connected.store(true, Ordering::SeqCst);
    shared.handlers.emit_connection_change(true);

    // Exactly one keepalive loop per connection lifetime; the stop channel
    // below ends it when the session does.
    let (keepalive_stop_tx, keepalive_stop_rx) = mpsc::channel::<()>();
    let keepalive = thread::Builder::new()
        .name("stylus-keepalive".to_string())
        .spawn(move || keepalive_loop(&outbound_tx, &keepalive_stop_rx))
        .ok();

    'session: loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            let _ = socket.close(None);
            break 'session;
        }

        while let Ok(message) = outbound_rx.try_recv() {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if let Err(err) = socket.send(tungstenite::Message::Text(json)) {
                        log::warn!("channel write failed: {err}");
                        break 'session;
                    }
                }
                Err(err) => log::warn!("could not serialize outbound message: {err}"),
            }
        }

        match socket.read() {
            Ok(tungstenite::Message::Text(text)) => dispatch(shared, &text),
            Ok(tungstenite::Message::Close(_)) => {
                log::info!("plot server closed the channel");
                break 'session;
            }
            Ok(_) => {
                // Binary and control frames carry nothing for us.
            }
            Err(tungstenite::Error::Io(err))
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Just the read timeout; loop around to service the queue.
            }
            Err(err) => {
                log::warn!("channel read failed: {err}");
                break 'session;
            }
        }
    }

    let _ = keepalive_stop_tx.send(());
    if let Some(handle) = keepalive {
        let _ = handle.join();
    }
    *shared
        .outbound
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
    shared.connected.store(false, Ordering::SeqCst);
    shared.handlers.emit_connection_change(false);
}

/// Sends a keepalive ping at a fixed interval until told to stop.
///
/// # Arguments
/// * `outbound`: Where pings are queued.
/// * `stop`: Signalled when the session ends.
fn keepalive_loop(outbound: &mpsc::Sender<ClientMessage>, stop: &mpsc::Receiver<()>) {
    loop {
        match stop.recv_timeout(KEEPALIVE_INTERVAL) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if outbound.send(ClientMessage::Ping).is_err() {
                    return;
                }
            }
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Dispatches one inbound channel message to the matching handler.
///
/// Unrecognised messages are logged and dropped; they are never an error.
///
/// # Arguments
/// * `shared`: State shared with the driver handle.
/// * `text`: The raw message text.
fn dispatch(shared: &RemoteShared, text: &str) {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::Pong) => {
            // Keepalive acknowledgement; nothing to do.
        }
        Ok(ServerMessage::Progress { motion_idx }) => {
            shared.handlers.emit_progress(motion_idx);
        }
        Ok(ServerMessage::Cancelled) => shared.handlers.emit_cancelled(),
        Ok(ServerMessage::Finished) => shared.handlers.emit_finished(),
        Ok(ServerMessage::Dev(info)) => shared.handlers.emit_dev_info(info),
        Ok(ServerMessage::Pause { paused }) => shared.handlers.emit_pause(paused),
        Ok(ServerMessage::Plan { plan }) => shared.handlers.emit_plan(plan),
        Err(err) => log::warn!("unrecognised message from server ({err}): {text}"),
    }
}
