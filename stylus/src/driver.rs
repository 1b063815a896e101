//! `driver`
//!
//! The public control surface shared by every way of reaching a plotter:
//! plot/pause/resume/cancel plus the direct pen and motor operations, and
//! the event-handler registry that lifecycle notifications are delivered
//! through. Two implementations exist: [`crate::serial_driver::SerialDriver`]
//! over a locally attached board and [`crate::remote_driver::RemoteDriver`]
//! over a server connection.

use std::{fmt, io, sync::Mutex, sync::PoisonError};

use serde::{Deserialize, Serialize};

use crate::{ebb::EbbError, planning::Plan};

/// Identifies the physical device behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Path of the device node the board is attached at.
    pub path: String,
}

/// Errors that can occur when operating a driver.
#[derive(Debug)]
pub enum DriverError {
    /// A plot is already in progress; the new plot was rejected without side
    /// effects.
    Busy,
    /// The remote channel is not currently connected; the operation was not
    /// queued.
    NotConnected,
    /// The device reported or caused an error.
    Device(EbbError),
    /// Opening or using the local connection failed.
    Io(io::Error),
    /// A request to the remote server could not be sent.
    Http(reqwest::Error),
    /// The remote server rejected a request.
    Rejected {
        /// The HTTP status code the server answered with.
        status: u16,
    },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Busy => write!(f, "a plot is already in progress"),
            DriverError::NotConnected => write!(f, "not connected"),
            DriverError::Device(err) => write!(f, "device error: {err}"),
            DriverError::Io(err) => write!(f, "I/O error: {err}"),
            DriverError::Http(err) => write!(f, "request failed: {err}"),
            DriverError::Rejected { status } => {
                write!(f, "server rejected the request with status {status}")
            }
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Device(err) => Some(err),
            DriverError::Io(err) => Some(err),
            DriverError::Http(err) => Some(err),
            DriverError::Busy | DriverError::NotConnected | DriverError::Rejected { .. } => None,
        }
    }
}

/// Takes the lock on a handler slot, recovering from a poisoned mutex.
///
/// Slots are held under a mutex so that registration can race with
/// delivery; handlers must not re-register themselves from inside a
/// notification.
fn slot<'a, T: ?Sized>(
    slot: &'a Mutex<Option<Box<T>>>,
) -> std::sync::MutexGuard<'a, Option<Box<T>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The registry of lifecycle notifications a driver can deliver.
///
/// Each event has a single replaceable handler slot; the driver machinery is
/// the sole invoker. Exactly one of the terminal notifications (`cancelled`,
/// `finished`) fires per plot.
#[derive(Default)]
pub struct EventHandlers {
    /// Called with the motion index before each motion executes.
    progress: Mutex<Option<Box<dyn Fn(usize) + Send>>>,
    /// Called once when a plot exits early due to cancellation.
    cancelled: Mutex<Option<Box<dyn Fn() + Send>>>,
    /// Called once when a plot runs to natural completion.
    finished: Mutex<Option<Box<dyn Fn() + Send>>>,
    /// Called when the identity of the connected device becomes known.
    dev_info: Mutex<Option<Box<dyn Fn(DeviceInfo) + Send>>>,
    /// Called when the pause state changes.
    pause: Mutex<Option<Box<dyn Fn(bool) + Send>>>,
    /// Called when the connection state changes.
    connection_change: Mutex<Option<Box<dyn Fn(bool) + Send>>>,
    /// Called when a plan is pushed from elsewhere (e.g. another client
    /// submitted it to the shared server).
    plan: Mutex<Option<Box<dyn Fn(Plan) + Send>>>,
}

impl EventHandlers {
    /// Creates a registry with every slot empty.
    ///
    /// # Returns
    /// A new, empty registry.
    pub fn new() -> EventHandlers {
        EventHandlers::default()
    }

    /// Registers the progress handler, replacing any previous one.
    ///
    /// # Arguments
    /// * `handler`: Called with the motion index before each motion.
    pub fn set_on_progress(&self, handler: impl Fn(usize) + Send + 'static) {
        *slot(&self.progress) = Some(Box::new(handler));
    }

    /// Clears the progress handler.
    pub fn clear_on_progress(&self) {
        *slot(&self.progress) = None;
    }

    /// Registers the cancelled handler, replacing any previous one.
    ///
    /// # Arguments
    /// * `handler`: Called once when a plot is cancelled.
    pub fn set_on_cancelled(&self, handler: impl Fn() + Send + 'static) {
        *slot(&self.cancelled) = Some(Box::new(handler));
    }

    /// Clears the cancelled handler.
    pub fn clear_on_cancelled(&self) {
        *slot(&self.cancelled) = None;
    }

    /// Registers the finished handler, replacing any previous one.
    ///
    /// # Arguments
    /// * `handler`: Called once when a plot completes.
    pub fn set_on_finished(&self, handler: impl Fn() + Send + 'static) {
        *slot(&self.finished) = Some(Box::new(handler));
    }

    /// Clears the finished handler.
    pub fn clear_on_finished(&self) {
        *slot(&self.finished) = None;
    }

    /// Registers the device-info handler, replacing any previous one.
    ///
    /// # Arguments
    /// * `handler`: Called with the identity of the connected device.
    pub fn set_on_dev_info(&self, handler: impl Fn(DeviceInfo) + Send + 'static) {
        *slot(&self.dev_info) = Some(Box::new(handler));
    }

    /// Clears the device-info handler.
    pub fn clear_on_dev_info(&self) {
        *slot(&self.dev_info) = None;
    }

    /// Registers the pause handler, replacing any previous one.
    ///
    /// # Arguments
    /// * `handler`: Called with the new pause state.
    pub fn set_on_pause(&self, handler: impl Fn(bool) + Send + 'static) {
        *slot(&self.pause) = Some(Box::new(handler));
    }

    /// Clears the pause handler.
    pub fn clear_on_pause(&self) {
        *slot(&self.pause) = None;
    }

    /// Registers the connection-change handler, replacing any previous one.
    ///
    /// # Arguments
    /// * `handler`: Called with the new connection state.
    pub fn set_on_connection_change(&self, handler: impl Fn(bool) + Send + 'static) {
        *slot(&self.connection_change) = Some(Box::new(handler));
    }

    /// Clears the connection-change handler.
    pub fn clear_on_connection_change(&self) {
        *slot(&self.connection_change) = None;
    }

    /// Registers the plan handler, replacing any previous one.
    ///
    /// # Arguments
    /// * `handler`: Called with plans pushed from elsewhere.
    pub fn set_on_plan(&self, handler: impl Fn(Plan) + Send + 'static) {
        *slot(&self.plan) = Some(Box::new(handler));
    }

    /// Clears the plan handler.
    pub fn clear_on_plan(&self) {
        *slot(&self.plan) = None;
    }

    /// Delivers a progress notification.
    pub(crate) fn emit_progress(&self, motion_idx: usize) {
        if let Some(handler) = slot(&self.progress).as_ref() {
            handler(motion_idx);
        }
    }

    /// Delivers the cancelled notification.
    pub(crate) fn emit_cancelled(&self) {
        if let Some(handler) = slot(&self.cancelled).as_ref() {
            handler();
        }
    }

    /// Delivers the finished notification.
    pub(crate) fn emit_finished(&self) {
        if let Some(handler) = slot(&self.finished).as_ref() {
            handler();
        }
    }

    /// Delivers a device-info notification.
    pub(crate) fn emit_dev_info(&self, info: DeviceInfo) {
        if let Some(handler) = slot(&self.dev_info).as_ref() {
            handler(info);
        }
    }

    /// Delivers a pause-state notification.
    pub(crate) fn emit_pause(&self, paused: bool) {
        if let Some(handler) = slot(&self.pause).as_ref() {
            handler(paused);
        }
    }

    /// Delivers a connection-state notification.
    pub(crate) fn emit_connection_change(&self, connected: bool) {
        if let Some(handler) = slot(&self.connection_change).as_ref() {
            handler(connected);
        }
    }

    /// Delivers a pushed-plan notification.
    pub(crate) fn emit_plan(&self, plan: Plan) {
        if let Some(handler) = slot(&self.plan).as_ref() {
            handler(plan);
        }
    }
}

/// The operations every plotter connection supports.
///
/// All methods take `&self`: a driver is shared between the thread that owns
/// the UI or CLI and its own worker threads, and synchronizes internally.
pub trait Driver {
    /// The handler registry notifications are delivered through.
    ///
    /// # Returns
    /// The registry; register handlers on it before starting a plot.
    fn handlers(&self) -> &EventHandlers;

    /// Starts plotting a plan.
    ///
    /// # Arguments
    /// * `plan`: The plan to execute.
    ///
    /// # Returns
    /// `Ok(())` once the plot has been accepted;
    /// [`DriverError::Busy`] if a plot is already in progress.
    fn plot(&self, plan: Plan) -> Result<(), DriverError>;

    /// Requests cancellation of the in-progress plot.
    ///
    /// # Arguments
    /// * `immediate`: If `true`, the current motion is physically aborted
    ///   with a hardware stop; otherwise it is allowed to finish.
    ///
    /// # Returns
    /// `Ok(())` once the request has been issued.
    fn cancel(&self, immediate: bool) -> Result<(), DriverError>;

    /// Requests a pause at the next pen-up boundary.
    ///
    /// # Returns
    /// `Ok(())` once the request has been issued.
    fn pause(&self) -> Result<(), DriverError>;

    /// Releases a pending pause.
    ///
    /// # Returns
    /// `Ok(())` once the request has been issued.
    fn resume(&self) -> Result<(), DriverError>;

    /// Moves the pen servo, usable whether or not a plot is active.
    ///
    /// # Arguments
    /// * `height`: Target position in raw actuator units.
    /// * `rate`: Slew rate in actuator units per 24 ms servo update.
    ///
    /// # Returns
    /// `Ok(())` once the move has been issued.
    fn set_pen_height(&self, height: u32, rate: u32) -> Result<(), DriverError>;

    /// Drops the motors' holding torque without resetting position state.
    ///
    /// # Returns
    /// `Ok(())` once the command has been issued.
    fn limp(&self) -> Result<(), DriverError>;

    /// Returns the toolhead to its home position, optionally raising the pen
    /// first.
    ///
    /// # Arguments
    /// * `pen_up_height`: Height to raise the pen to first, in raw actuator
    ///   units. Only honored when `pen_up_rate` is also given.
    /// * `pen_up_rate`: Rate for the pen raise.
    ///
    /// # Returns
    /// `Ok(())` once the command has been issued.
    fn go_home(&self, pen_up_height: Option<u32>, pen_up_rate: Option<u32>)
        -> Result<(), DriverError>;

    /// A human-readable name for this connection.
    ///
    /// # Returns
    /// The name.
    fn name(&self) -> String;

    /// Shuts the connection down.
    ///
    /// # Returns
    /// `Ok(())` once the connection has been released.
    fn close(&self) -> Result<(), DriverError>;
}
