//! `device`
//!
//! Fixed conversion profiles for the plotters we know how to drive.
//! A profile maps the units used by the planner and the UI (mm, pen-height
//! percentages) onto the raw units the EBB firmware wants (motor steps,
//! servo actuator positions).

/// Default pen-up height used when nothing more specific is configured, as a
/// percentage of the pen travel.
pub const DEFAULT_PEN_UP_PCT: f64 = 50.0;
/// Default pen-down height used when nothing more specific is configured, as
/// a percentage of the pen travel.
pub const DEFAULT_PEN_DOWN_PCT: f64 = 60.0;

/// Conversion constants for a given plotter model.
///
/// Read-only and process-wide; every layer that needs to translate between
/// planner units and device units shares the same profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Device {
    /// Motor steps per mm of toolhead travel, at the microstepping mode the
    /// driver configures.
    pub steps_per_mm: f64,
    /// Lowest pen servo position the hardware should ever be asked for, in
    /// raw actuator units. This is the pen fully *down*.
    pub pen_servo_min: u32,
    /// Highest pen servo position the hardware should ever be asked for, in
    /// raw actuator units. This is the pen fully *up*.
    pub pen_servo_max: u32,
}

/// Profile for the [AxiDraw](https://axidraw.com/) pen plotter.
pub const AXIDRAW: Device = Device {
    steps_per_mm: 5.0,
    pen_servo_min: 7500,
    pen_servo_max: 28000,
};

impl Device {
    /// Converts a pen-height percentage into a raw servo actuator position.
    ///
    /// 0 % is the pen fully up ([`Device::pen_servo_max`]) and 100 % is the
    /// pen fully down ([`Device::pen_servo_min`]). Values outside [0, 100]
    /// are clamped to the nearest bound rather than wrapped.
    ///
    /// # Arguments
    /// * `pct`: Pen height as a percentage, nominally in [0, 100].
    ///
    /// # Returns
    /// The servo position in raw actuator units.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    pub fn pen_pct_to_pos(&self, pct: f64) -> u32 {
        let t = pct.clamp(0.0, 100.0) / 100.0;
        let range = f64::from(self.pen_servo_max - self.pen_servo_min);
        (f64::from(self.pen_servo_max) - t * range).round() as u32
    }
}

impl Default for Device {
    fn default() -> Self {
        AXIDRAW
    }
}
