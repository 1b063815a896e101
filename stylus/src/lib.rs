//! `stylus`
//!
//! A library for driving EBB-based pen plotters (such as the AxiDraw)
//! through a planned sequence of motions, either over a directly attached
//! serial device or through a remote plot server, with pause, resume, and
//! cancellation that never leave the pen or the motors in a bad state.

pub mod device;
pub mod driver;
pub mod ebb;
pub mod link;
pub mod messages;
pub mod planning;
pub mod plotter;
pub mod remote_driver;
pub mod serial_driver;

pub use device::{Device, AXIDRAW};
pub use driver::{DeviceInfo, Driver, DriverError, EventHandlers};
pub use ebb::{Ebb, EbbError};
pub use link::{EbbTransport, SerialLink, DEFAULT_SERIAL_DEVICE};
pub use planning::{Motion, PenMotion, Plan, XyMotion};
pub use plotter::{
    run_plot, EbbPlotter, PlotController, PlotEvents, PlotOutcome, Plotter, SimPlotter,
};
pub use remote_driver::RemoteDriver;
pub use serial_driver::SerialDriver;
