//! `serial_driver`
//!
//! The driver for a locally attached board: one protocol client over the
//! opened serial device node, with the plotting loop running on a worker
//! thread. There is no reconnect logic here; if the physical connection is
//! lost the driver is dead until the caller opens a new one.

use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use crate::{
    device::Device,
    driver::{DeviceInfo, Driver, DriverError, EventHandlers},
    ebb::Ebb,
    link::{EbbTransport, SerialLink},
    planning::Plan,
    plotter::{
        initial_pen_height, run_plot, EbbPlotter, PlotController, Plotter, ResumeOutcome,
        SERVO_POWER_TIMEOUT_MS,
    },
};

/// A [`Driver`] that owns a protocol client over a direct hardware
/// connection.
pub struct SerialDriver {
    /// Identity of the connected device.
    device_info: DeviceInfo,
    /// Profile of the connected plotter.
    device: Device,
    /// The shared protocol client.
    ebb: Arc<Mutex<Ebb>>,
    /// The execution backend plots run through.
    plotter: Arc<EbbPlotter>,
    /// Shared plotting control state.
    controller: Arc<PlotController>,
    /// Registered event handlers.
    handlers: Arc<EventHandlers>,
}

impl SerialDriver {
    /// Opens the board at the given serial device node.
    ///
    /// # Arguments
    /// * `path`: Path to the device node, e.g.
    ///   [`crate::link::DEFAULT_SERIAL_DEVICE`].
    ///
    /// # Returns
    /// The connected driver, or the error from opening the device node.
    pub fn open(path: impl AsRef<Path>) -> Result<SerialDriver, DriverError> {
        let path = path.as_ref();
        let link = SerialLink::open(path).map_err(DriverError::Io)?;
        let name = path.to_string_lossy().into_owned();
        Ok(SerialDriver::with_transport(Arc::new(link), name))
    }

    /// Creates a driver over an already-open transport.
    ///
    /// # Arguments
    /// * `link`: The byte transport to the board.
    /// * `path`: Device identity to report, normally the device node path.
    ///
    /// # Returns
    /// The connected driver.
    pub fn with_transport(link: Arc<dyn EbbTransport>, path: String) -> SerialDriver {
        let device = Device::default();
        let ebb = Arc::new(Mutex::new(Ebb::new(link.clone(), device)));
        let plotter = Arc::new(EbbPlotter::new(ebb.clone(), link, device));
        SerialDriver {
            device_info: DeviceInfo { path },
            device,
            ebb,
            plotter,
            controller: Arc::new(PlotController::new()),
            handlers: Arc::new(EventHandlers::new()),
        }
    }

    /// Identity of the connected device.
    ///
    /// # Returns
    /// The device info reported through the handler registry at plot time.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Queries the firmware version string of the connected board.
    ///
    /// # Returns
    /// The version line exactly as the device reported it.
    pub fn firmware_version(&self) -> Result<String, DriverError> {
        self.ebb
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .firmware_version()
            .map_err(DriverError::Device)
    }
}

impl Driver for SerialDriver {
    fn handlers(&self) -> &EventHandlers {
        &self.handlers
    }

    fn plot(&self, plan: Plan) -> Result<(), DriverError> {
        self.controller.begin_plot()?;
        self.handlers.emit_dev_info(self.device_info.clone());

        let plotter = self.plotter.clone();
        let controller = self.controller.clone();
        let handlers = self.handlers.clone();
        let height = initial_pen_height(&plan, &self.device);
        let spawned = thread::Builder::new()
            .name("stylus-plot".to_string())
            .spawn(move || {
                if let Err(err) = run_plot(
                    &plan,
                    plotter.as_ref(),
                    &controller,
                    handlers.as_ref(),
                    height,
                ) {
                    log::error!("plot failed: {err}");
                }
            });
        if let Err(err) = spawned {
            self.controller.end_plot();
            return Err(DriverError::Io(err));
        }
        Ok(())
    }

    fn cancel(&self, immediate: bool) -> Result<(), DriverError> {
        self.controller.request_cancel(immediate);
        self.plotter
            .pre_cancel(immediate)
            .map_err(DriverError::Device)
    }

    fn pause(&self) -> Result<(), DriverError> {
        if self.controller.pause() {
            self.handlers.emit_pause(true);
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), DriverError> {
        if self.controller.resume() == ResumeOutcome::ReleasedIdle {
            // The loop never blocked, so it will not report the change.
            self.handlers.emit_pause(false);
        }
        Ok(())
    }

    fn set_pen_height(&self, height: u32, rate: u32) -> Result<(), DriverError> {
        let mut ebb = self.ebb.lock().unwrap_or_else(PoisonError::into_inner);
        if ebb.supports_sr().map_err(DriverError::Device)? {
            ebb.set_servo_power_timeout(SERVO_POWER_TIMEOUT_MS, Some(true))
                .map_err(DriverError::Device)?;
        }
        ebb.set_pen_height(height, rate, None)
            .map_err(DriverError::Device)
    }

    fn limp(&self) -> Result<(), DriverError> {
        self.ebb
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .disable_motors()
            .map_err(DriverError::Device)
    }

    fn go_home(
        &self,
        pen_up_height: Option<u32>,
        pen_up_rate: Option<u32>,
    ) -> Result<(), DriverError> {
        if let (Some(height), Some(rate)) = (pen_up_height, pen_up_rate) {
            self.set_pen_height(height, rate)?;
        }
        self.ebb
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .go_home()
            .map_err(DriverError::Device)
    }

    fn name(&self) -> String {
        format!("EBB ({})", self.device_info.path)
    }

    fn close(&self) -> Result<(), DriverError> {
        self.ebb
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close()
            .map_err(DriverError::Device)
    }
}
