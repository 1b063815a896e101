//! `scribe`
//!
//! The plot server: owns the plotter (or the simulator), accepts plans and
//! control requests over HTTP, and pushes lifecycle events to every
//! connected client over a WebSocket channel.

use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::broadcast;

use stylus::{
    device::Device,
    driver::{DeviceInfo, DriverError},
    ebb::Ebb,
    link::SerialLink,
    messages::{CancelRequest, ClientMessage, ServerMessage},
    planning::Plan,
    plotter::{
        initial_pen_height, run_plot, EbbPlotter, PlotController, PlotEvents, Plotter,
        ResumeOutcome, SimPlotter, SERVO_POWER_TIMEOUT_MS,
    },
};

/// How many broadcast events may be buffered per lagging client before it
/// starts missing them.
const EVENT_BUFFER: usize = 64;

/// The execution side of the server: the plotter backend, the shared
/// plotting controller, and (when real hardware is attached) the protocol
/// client used for direct pen and motor commands.
pub struct PlotService {
    /// Shared plotting control state.
    controller: Arc<PlotController>,
    /// The execution backend plots run through.
    plotter: Arc<dyn Plotter>,
    /// The protocol client, present only with real hardware.
    ebb: Option<Arc<Mutex<Ebb>>>,
    /// Profile of the connected plotter.
    device: Device,
    /// Identity of the attached device, if any.
    device_info: Option<DeviceInfo>,
}

impl PlotService {
    /// Creates a service driving real hardware at the given device node.
    ///
    /// # Arguments
    /// * `path`: Path to the serial device node.
    ///
    /// # Returns
    /// The service, or the error from opening the device node.
    pub fn with_hardware(path: impl AsRef<Path>) -> Result<PlotService, DriverError> {
        let path = path.as_ref();
        let link = Arc::new(SerialLink::open(path).map_err(DriverError::Io)?);
        let device = Device::default();
        let ebb = Arc::new(Mutex::new(Ebb::new(link.clone(), device)));
        let plotter = Arc::new(EbbPlotter::new(ebb.clone(), link, device));
        Ok(PlotService {
            controller: Arc::new(PlotController::new()),
            plotter,
            ebb: Some(ebb),
            device,
            device_info: Some(DeviceInfo {
                path: path.to_string_lossy().into_owned(),
            }),
        })
    }

    /// Creates a service with no hardware: motions are simulated by waiting
    /// out their planned durations.
    ///
    /// # Returns
    /// The simulated service.
    pub fn simulated() -> PlotService {
        PlotService {
            controller: Arc::new(PlotController::new()),
            plotter: Arc::new(SimPlotter::new()),
            ebb: None,
            device: Device::default(),
            device_info: None,
        }
    }

    /// Moves the pen servo, arming the servo power timeout when the
    /// firmware supports it. Best-effort: failures are logged.
    ///
    /// # Arguments
    /// * `height`: Target position in raw actuator units.
    /// * `rate`: Slew rate in actuator units per 24 ms servo update.
    fn set_pen_height(&self, height: u32, rate: u32) {
        let Some(ebb) = &self.ebb else {
            log::info!("simulated pen move to {height}");
            return;
        };
        let mut ebb = ebb.lock().unwrap_or_else(PoisonError::into_inner);
        let result = (|| {
            if ebb.supports_sr()? {
                ebb.set_servo_power_timeout(SERVO_POWER_TIMEOUT_MS, Some(true))?;
            }
            ebb.set_pen_height(height, rate, None)
        })();
        if let Err(err) = result {
            log::warn!("pen move failed: {err}");
        }
    }

    /// Returns the toolhead home, optionally raising the pen first.
    /// Best-effort: failures are logged.
    ///
    /// # Arguments
    /// * `pen_up_height`: Height to raise the pen to first, in raw actuator
    ///   units. Only honored when `pen_up_rate` is also given.
    /// * `pen_up_rate`: Rate for the pen raise.
    fn go_home(&self, pen_up_height: Option<u32>, pen_up_rate: Option<u32>) {
        if let (Some(height), Some(rate)) = (pen_up_height, pen_up_rate) {
            self.set_pen_height(height, rate);
        }
        let Some(ebb) = &self.ebb else {
            log::info!("simulated toolhead sent home");
            return;
        };
        let mut ebb = ebb.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = ebb.go_home() {
            log::warn!("go home failed: {err}");
        }
    }

    /// Drops the motors' holding torque. Best-effort: failures are logged.
    fn limp(&self) {
        let Some(ebb) = &self.ebb else {
            log::info!("simulated motors disengaged");
            return;
        };
        let mut ebb = ebb.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = ebb.disable_motors() {
            log::warn!("disabling motors failed: {err}");
        }
    }
}

/// Shared state behind every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Fan-out of lifecycle events to every connected channel.
    events: broadcast::Sender<ServerMessage>,
    /// The execution side of the server.
    service: Arc<PlotService>,
}

impl AppState {
    /// Creates the shared state around a plot service.
    ///
    /// # Arguments
    /// * `service`: The execution side of the server.
    ///
    /// # Returns
    /// The shared state.
    pub fn new(service: PlotService) -> AppState {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        AppState {
            events,
            service: Arc::new(service),
        }
    }
}

/// Delivers plotting-loop notifications into the broadcast channel.
struct BroadcastEvents {
    /// The channel every connected client subscribes to.
    events: broadcast::Sender<ServerMessage>,
}

impl PlotEvents for BroadcastEvents {
    fn progress(&self, motion_idx: usize) {
        let _ = self.events.send(ServerMessage::Progress { motion_idx });
    }

    fn pause_changed(&self, paused: bool) {
        let _ = self.events.send(ServerMessage::Pause { paused });
    }

    fn cancelled(&self) {
        let _ = self.events.send(ServerMessage::Cancelled);
    }

    fn finished(&self) {
        let _ = self.events.send(ServerMessage::Finished);
    }
}

/// Builds the server's router.
///
/// # Arguments
/// * `state`: The shared state handlers operate on.
///
/// # Returns
/// The router, ready to serve.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get("scribe is listening; bring me a plan and I shall draw it"),
        )
        .route("/plot", post(submit_plot))
        .route("/cancel", post(cancel_plot))
        .route("/pause", post(pause_plot))
        .route("/resume", post(resume_plot))
        .route("/ws", get(open_channel))
        .with_state(state)
}

/// Starts a plot on a worker thread.
///
/// # Arguments
/// * `state`: The shared state.
/// * `plan`: The plan to execute.
///
/// # Returns
/// `Ok(())` once the plot has been accepted; [`DriverError::Busy`] if one is
/// already in progress.
fn start_plot(state: &AppState, plan: Plan) -> Result<(), DriverError> {
    state.service.controller.begin_plot()?;

    // Push the plan to every client so they can all display what is about
    // to be drawn, whoever submitted it.
    let _ = state.events.send(ServerMessage::Plan { plan: plan.clone() });

    let events = BroadcastEvents {
        events: state.events.clone(),
    };
    let controller = state.service.controller.clone();
    let plotter = state.service.plotter.clone();
    let height = initial_pen_height(&plan, &state.service.device);
    let spawned = thread::Builder::new()
        .name("scribe-plot".to_string())
        .spawn(move || {
            if let Err(err) = run_plot(&plan, plotter.as_ref(), &controller, &events, height) {
                log::error!("plot failed: {err}");
            }
        });
    if let Err(err) = spawned {
        state.service.controller.end_plot();
        return Err(DriverError::Io(err));
    }
    Ok(())
}

/// Handles plan submission.
async fn submit_plot(State(state): State<AppState>, Json(plan): Json<Plan>) -> impl IntoResponse {
    match start_plot(&state, plan) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(DriverError::Busy) => {
            (StatusCode::CONFLICT, "a plot is already in progress").into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Handles cancellation requests.
async fn cancel_plot(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> StatusCode {
    state.service.controller.request_cancel(request.immediate);
    if let Err(err) = state.service.plotter.pre_cancel(request.immediate) {
        log::warn!("hardware stop failed: {err}");
    }
    StatusCode::OK
}

/// Handles pause requests. The pause takes effect at the next pen-up
/// boundary; the state change is pushed over the channel.
async fn pause_plot(State(state): State<AppState>) -> StatusCode {
    if state.service.controller.pause() {
        let _ = state.events.send(ServerMessage::Pause { paused: true });
    }
    StatusCode::OK
}

/// Handles resume requests. When the plotting loop was already blocked it
/// reports the state change itself as it wakes; otherwise it is pushed here.
async fn resume_plot(State(state): State<AppState>) -> StatusCode {
    if state.service.controller.resume() == ResumeOutcome::ReleasedIdle {
        let _ = state.events.send(ServerMessage::Pause { paused: false });
    }
    StatusCode::OK
}

/// Upgrades a request into a channel session.
async fn open_channel(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

/// Services one connected client: pushes broadcast events down and
/// dispatches the client's lightweight commands.
///
/// # Arguments
/// * `socket`: The upgraded channel.
/// * `state`: The shared state.
async fn client_session(mut socket: WebSocket, state: AppState) {
    let mut events = state.events.subscribe();

    if let Some(info) = &state.service.device_info {
        if send_message(&mut socket, &ServerMessage::Dev(info.clone()))
            .await
            .is_err()
        {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, &mut socket, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary and control frames carry nothing for us.
                    }
                    Some(Err(err)) => {
                        log::debug!("channel read failed: {err}");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(message) => {
                        if send_message(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("client fell behind, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Sends one message down a channel as JSON.
///
/// # Arguments
/// * `socket`: The channel to write to.
/// * `message`: The message to send.
///
/// # Returns
/// `Ok(())` if the message was written (or skipped as unserializable).
async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(err) => {
            log::warn!("could not serialize event: {err}");
            Ok(())
        }
    }
}

/// Dispatches one lightweight command from a client.
///
/// Unrecognised messages are logged and dropped; they are never an error.
///
/// # Arguments
/// * `state`: The shared state.
/// * `socket`: The channel the command arrived on, for the pong reply.
/// * `text`: The raw message text.
async fn handle_client_message(state: &AppState, socket: &mut WebSocket, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => {
            // Pong goes back to the pinging client only, not the broadcast.
            let _ = send_message(socket, &ServerMessage::Pong).await;
        }
        Ok(ClientMessage::SetPenHeight { height, rate }) => {
            state.service.set_pen_height(height, rate);
        }
        Ok(ClientMessage::GoHome {
            pen_up_height,
            pen_up_rate,
        }) => {
            state.service.go_home(pen_up_height, pen_up_rate);
        }
        Ok(ClientMessage::Limp) => state.service.limp(),
        Err(err) => log::warn!("unrecognised message from client ({err}): {text}"),
    }
}
