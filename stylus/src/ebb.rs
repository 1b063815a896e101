//! `ebb`
//!
//! A client for the EBB (EiBotBoard) ASCII line protocol. Commands are sent
//! as printable ASCII terminated by a single carriage return; responses come
//! back as CR/LF-terminated lines, with control commands acknowledged by a
//! literal `OK`. The client translates typed operations (enable motors, set
//! pen height, execute a planned motion, ...) into that wire format and
//! parses the results; it never recomputes velocity profiles, it only
//! replays what the planner produced.

use std::{fmt, io, sync::Arc, thread, time::Duration};

use crate::{
    device::Device,
    link::EbbTransport,
    planning::{Motion, PenMotion, XyMotion},
};

/// Interval between motor-status polls while waiting for the device to go
/// idle.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Step frequency passed to the home command, in steps per second.
const HOME_STEP_FREQUENCY: u32 = 10_000;

/// The pen servo updates its target position once per 24 ms; rates on the
/// wire are expressed in actuator units per update.
const SERVO_UPDATE_INTERVAL_S: f64 = 0.024;

/// The abort-motion command, framed and ready to write.
const STOP_COMMAND: &[u8] = b"ES\r";

/// Errors that can occur while talking to an EBB board.
#[derive(Debug)]
pub enum EbbError {
    /// The device answered with something other than the expected
    /// acknowledgement or response format.
    Protocol {
        /// The command that was sent.
        command: String,
        /// The response line that did not match.
        response: String,
    },
    /// The firmware reported an error (a response line starting with `!`).
    Firmware {
        /// The command that was sent.
        command: String,
        /// The error message from the firmware.
        message: String,
    },
    /// The underlying transport failed; the connection should be considered
    /// lost.
    Connection(io::Error),
}

impl fmt::Display for EbbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EbbError::Protocol { command, response } => {
                write!(f, "unexpected response to '{command}': '{response}'")
            }
            EbbError::Firmware { command, message } => {
                write!(f, "firmware rejected '{command}': {message}")
            }
            EbbError::Connection(err) => write!(f, "connection to device lost: {err}"),
        }
    }
}

impl std::error::Error for EbbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EbbError::Connection(err) => Some(err),
            EbbError::Protocol { .. } | EbbError::Firmware { .. } => None,
        }
    }
}

/// A parsed firmware version, ordered so that capability thresholds can be
/// compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
}

/// The firmware version from which the servo-power-timeout command (`SR`) is
/// available.
const SERVO_POWER_TIMEOUT_VERSION: FirmwareVersion = FirmwareVersion {
    major: 2,
    minor: 6,
    patch: 0,
};

/// The state of the stepper motors as reported by a motor-status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorStatus {
    /// Whether a command is currently executing.
    pub command_active: bool,
    /// Whether motor 1 is currently moving.
    pub motor1_moving: bool,
    /// Whether motor 2 is currently moving.
    pub motor2_moving: bool,
    /// Whether the motion FIFO holds a pending command.
    pub fifo_pending: bool,
}

impl MotorStatus {
    /// Whether both motors have stopped moving.
    ///
    /// # Returns
    /// `true` when neither motor is moving.
    pub fn is_idle(&self) -> bool {
        !self.motor1_moving && !self.motor2_moving
    }
}

/// A protocol client bound to one EBB board.
///
/// All exchanges are serialized through `&mut self`; the one exception is
/// [`Ebb::stop`], which writes the abort-motion command through the
/// transport's thread-safe write path so that it can overtake an exchange
/// blocked on a long motion.
pub struct Ebb {
    /// The byte transport to the board.
    link: Arc<dyn EbbTransport>,
    /// Conversion profile for the connected plotter.
    device: Device,
    /// Response bytes received but not yet consumed as a line.
    buffer: Vec<u8>,
    /// Firmware version, probed at most once per connection.
    firmware: Option<FirmwareVersion>,
}

impl Ebb {
    /// Creates a client over an open transport.
    ///
    /// # Arguments
    /// * `link`: The byte transport to the board.
    /// * `device`: Conversion profile for the connected plotter.
    ///
    /// # Returns
    /// A new client with an empty capability cache.
    pub fn new(link: Arc<dyn EbbTransport>, device: Device) -> Ebb {
        Ebb {
            link,
            device,
            buffer: Vec::new(),
            firmware: None,
        }
    }

    /// Writes a command, framed with the trailing carriage return.
    ///
    /// # Arguments
    /// * `command`: The command without its terminator.
    ///
    /// # Returns
    /// `Ok(())` once written, otherwise a connection error.
    fn write_command(&self, command: &str) -> Result<(), EbbError> {
        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(b'\r');
        self.link.send(&bytes).map_err(EbbError::Connection)
    }

    /// Reads one response line, stripping the CR/LF terminator.
    ///
    /// The firmware terminates most lines with `\r\n` but some queries answer
    /// with `\n\r`; both orders are accepted and blank lines are skipped.
    ///
    /// # Returns
    /// The response line without its terminator.
    fn read_line(&mut self) -> Result<String, EbbError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&byte| byte == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw)
                    .trim_matches(|c| c == '\r' || c == '\n')
                    .to_string();
                if line.is_empty() {
                    continue;
                }
                return Ok(line);
            }

            let mut chunk = [0_u8; 64];
            let read = self.link.recv(&mut chunk).map_err(EbbError::Connection)?;
            if read == 0 {
                return Err(EbbError::Connection(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "device closed the connection",
                )));
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// Sends a control command and checks for the `OK` acknowledgement.
    ///
    /// # Arguments
    /// * `command`: The command without its terminator.
    ///
    /// # Returns
    /// `Ok(())` on acknowledgement; a protocol error if the device answered
    /// with anything else.
    fn command(&mut self, command: &str) -> Result<(), EbbError> {
        self.write_command(command)?;
        let line = self.read_line()?;
        if line == "OK" {
            Ok(())
        } else if let Some(message) = line.strip_prefix('!') {
            Err(EbbError::Firmware {
                command: command.to_string(),
                message: message.trim().to_string(),
            })
        } else {
            Err(EbbError::Protocol {
                command: command.to_string(),
                response: line,
            })
        }
    }

    /// Sends a query command and returns its first response line.
    ///
    /// # Arguments
    /// * `command`: The command without its terminator.
    ///
    /// # Returns
    /// The response payload with the terminator stripped.
    fn query(&mut self, command: &str) -> Result<String, EbbError> {
        self.write_command(command)?;
        let line = self.read_line()?;
        if let Some(message) = line.strip_prefix('!') {
            Err(EbbError::Firmware {
                command: command.to_string(),
                message: message.trim().to_string(),
            })
        } else {
            Ok(line)
        }
    }

    /// Queries the firmware version string.
    ///
    /// # Returns
    /// The version line exactly as the device reported it.
    pub fn firmware_version(&mut self) -> Result<String, EbbError> {
        self.query("V")
    }

    /// The parsed firmware version, probed once per connection and cached.
    ///
    /// # Returns
    /// The numeric version, or a protocol error if the version line does not
    /// end in a `major.minor.patch` token.
    pub fn firmware_version_number(&mut self) -> Result<FirmwareVersion, EbbError> {
        if let Some(version) = self.firmware {
            return Ok(version);
        }

        let line = self.firmware_version()?;
        let version = parse_version(&line).ok_or_else(|| EbbError::Protocol {
            command: "V".to_string(),
            response: line,
        })?;
        self.firmware = Some(version);
        Ok(version)
    }

    /// Whether the firmware supports the servo-power-timeout command.
    ///
    /// # Returns
    /// `true` from firmware 2.6.0 onwards.
    pub fn supports_sr(&mut self) -> Result<bool, EbbError> {
        Ok(self.firmware_version_number()? >= SERVO_POWER_TIMEOUT_VERSION)
    }

    /// Enables both stepper motors at the given microstepping mode, then
    /// probes the firmware version so that capability checks made during the
    /// plot do not need another round-trip.
    ///
    /// # Arguments
    /// * `microstepping_mode`: Microstepping mode for both axes (1 = 16x
    ///   down to 5 = full step).
    ///
    /// # Returns
    /// `Ok(())` once the enable command is acknowledged and the capability
    /// probe has completed.
    pub fn enable_motors(&mut self, microstepping_mode: u8) -> Result<(), EbbError> {
        self.command(&format!(
            "EM,{microstepping_mode},{microstepping_mode}"
        ))?;
        let _ = self.firmware_version_number()?;
        Ok(())
    }

    /// Disables both stepper motors, dropping their holding torque.
    ///
    /// # Returns
    /// `Ok(())` on acknowledgement.
    pub fn disable_motors(&mut self) -> Result<(), EbbError> {
        self.command("EM,0,0")
    }

    /// Moves the pen servo to a position.
    ///
    /// # Arguments
    /// * `height`: Target position in raw actuator units.
    /// * `rate`: Slew rate in actuator units per 24 ms servo update; `0`
    ///   jumps immediately.
    /// * `delay_ms`: Optional delay before the next command executes, in ms.
    ///
    /// # Returns
    /// `Ok(())` on acknowledgement.
    pub fn set_pen_height(
        &mut self,
        height: u32,
        rate: u32,
        delay_ms: Option<u32>,
    ) -> Result<(), EbbError> {
        let delay = delay_ms.unwrap_or(0);
        self.command(&format!("S2,{height},4,{rate},{delay}"))
    }

    /// Configures the servo power timeout, so the pen servo is not held
    /// energized indefinitely. Only available from firmware 2.6.0; check
    /// [`Ebb::supports_sr`] first.
    ///
    /// # Arguments
    /// * `timeout_ms`: How long after the last servo motion power is kept
    ///   on, in ms.
    /// * `power`: Optionally switch servo power on or off right now.
    ///
    /// # Returns
    /// `Ok(())` on acknowledgement.
    pub fn set_servo_power_timeout(
        &mut self,
        timeout_ms: u32,
        power: Option<bool>,
    ) -> Result<(), EbbError> {
        match power {
            Some(on) => self.command(&format!("SR,{timeout_ms},{}", u8::from(on))),
            None => self.command(&format!("SR,{timeout_ms}")),
        }
    }

    /// Executes one planned motion.
    ///
    /// # Arguments
    /// * `motion`: The motion to execute.
    ///
    /// # Returns
    /// `Ok(())` once every segment of the motion has been acknowledged. The
    /// device may still be physically moving; use
    /// [`Ebb::wait_until_motors_idle`] to wait that out.
    pub fn execute_motion(&mut self, motion: &Motion) -> Result<(), EbbError> {
        match motion {
            Motion::Xy(xy) => self.execute_xy_motion(xy),
            Motion::Pen(pen) => self.execute_pen_motion(pen),
        }
    }

    /// Replays a planned XY motion as one stepper segment per block.
    ///
    /// Steps are derived from the cumulative step position rather than per
    /// block, so rounding never drifts more than one step from the planned
    /// path.
    ///
    /// # Arguments
    /// * `motion`: The XY motion to replay.
    ///
    /// # Returns
    /// `Ok(())` once every segment is acknowledged.
    #[allow(clippy::cast_possible_truncation)]
    fn execute_xy_motion(&mut self, motion: &XyMotion) -> Result<(), EbbError> {
        let steps_per_mm = self.device.steps_per_mm;
        let Some(first) = motion.blocks().first() else {
            return Ok(());
        };

        let mut x_steps = (first.start.x * steps_per_mm).round() as i64;
        let mut y_steps = (first.start.y * steps_per_mm).round() as i64;
        for block in motion.blocks() {
            let duration_ms = (block.duration * 1000.0).round() as u64;
            let target_x = (block.end.x * steps_per_mm).round() as i64;
            let target_y = (block.end.y * steps_per_mm).round() as i64;
            let dx = target_x - x_steps;
            let dy = target_y - y_steps;
            if duration_ms == 0 || (dx == 0 && dy == 0) {
                continue;
            }

            self.command(&format!("XM,{duration_ms},{dx},{dy}"))?;
            x_steps = target_x;
            y_steps = target_y;
        }

        Ok(())
    }

    /// Executes a planned pen motion as a servo move at the planned rate.
    ///
    /// # Arguments
    /// * `motion`: The pen motion to execute.
    ///
    /// # Returns
    /// `Ok(())` on acknowledgement.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn execute_pen_motion(&mut self, motion: &PenMotion) -> Result<(), EbbError> {
        let rate = if motion.duration > 0.0 {
            let travel = f64::from(motion.final_pos.abs_diff(motion.initial_pos));
            (travel * SERVO_UPDATE_INTERVAL_S / motion.duration).round() as u32
        } else {
            0
        };
        self.set_pen_height(motion.final_pos, rate, None)
    }

    /// Queries the current motor status.
    ///
    /// # Returns
    /// The parsed status, or a protocol error if the response does not look
    /// like a motor-status line.
    pub fn query_motor_status(&mut self) -> Result<MotorStatus, EbbError> {
        let line = self.query("QM")?;
        parse_motor_status(&line).ok_or_else(|| EbbError::Protocol {
            command: "QM".to_string(),
            response: line,
        })
    }

    /// Polls the motor status until both motors report idle.
    ///
    /// This is how the plotting loop knows it is safe to disable the motors
    /// after the final motion has been queued.
    ///
    /// # Returns
    /// `Ok(())` once both motors are idle.
    pub fn wait_until_motors_idle(&mut self) -> Result<(), EbbError> {
        loop {
            let status = self.query_motor_status()?;
            if status.is_idle() {
                return Ok(());
            }
            log::debug!("motors still moving, polling again");
            thread::sleep(IDLE_POLL_INTERVAL);
        }
    }

    /// Immediately aborts any in-progress motion.
    ///
    /// The command is written straight to the transport without waiting for
    /// a response, so it can be issued while another exchange is blocked on
    /// a long-running motion. Any response lines it produces are absorbed as
    /// stray input by the next exchange.
    ///
    /// # Returns
    /// `Ok(())` once the abort command has been written.
    pub fn stop(&self) -> Result<(), EbbError> {
        emergency_stop(self.link.as_ref())
    }

    /// Returns the toolhead to its home position.
    ///
    /// # Returns
    /// `Ok(())` on acknowledgement. The move itself completes asynchronously;
    /// wait for idle to know when it lands.
    pub fn go_home(&mut self) -> Result<(), EbbError> {
        self.command(&format!("HM,{HOME_STEP_FREQUENCY}"))
    }

    /// Releases the underlying transport.
    ///
    /// Subsequent operations fail with a connection error.
    ///
    /// # Returns
    /// `Ok(())` once the transport is released.
    pub fn close(&mut self) -> Result<(), EbbError> {
        self.link.close().map_err(EbbError::Connection)
    }
}

/// Writes the abort-motion command directly to a transport.
///
/// Used by [`Ebb::stop`] and by cancellation paths that hold the transport
/// but not the client itself.
///
/// # Arguments
/// * `link`: The transport to write through.
///
/// # Returns
/// `Ok(())` once the abort command has been written.
pub fn emergency_stop(link: &dyn EbbTransport) -> Result<(), EbbError> {
    link.send(STOP_COMMAND).map_err(EbbError::Connection)
}

/// Parses the trailing `major.minor.patch` token out of a firmware version
/// line.
///
/// # Arguments
/// * `line`: The full version line, e.g.
///   `EBBv13_and_above EB Firmware Version 2.5.3`.
///
/// # Returns
/// The parsed version, or `None` if the line does not end in a version
/// token.
fn parse_version(line: &str) -> Option<FirmwareVersion> {
    let token = line.split_whitespace().last()?;
    let mut parts = token.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(FirmwareVersion {
        major,
        minor,
        patch,
    })
}

/// Parses a motor-status response line.
///
/// # Arguments
/// * `line`: The response line, e.g. `QM,0,0,0,0`. Firmware older than
///   2.4.4 omits the FIFO field.
///
/// # Returns
/// The parsed status, or `None` if the line is not a motor-status response.
fn parse_motor_status(line: &str) -> Option<MotorStatus> {
    let mut fields = line.split(',');
    if fields.next()? != "QM" {
        return None;
    }
    let command_active = fields.next()? != "0";
    let motor1_moving = fields.next()? != "0";
    let motor2_moving = fields.next()? != "0";
    let fifo_pending = fields.next().is_some_and(|field| field != "0");
    Some(MotorStatus {
        command_active,
        motor1_moving,
        motor2_moving,
        fifo_pending,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::device::AXIDRAW;
    use crate::planning::{Block, Point};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::PoisonError;

    /// A scripted in-memory device: records everything the client writes and
    /// feeds back one canned response per write.
    pub(crate) struct MockLink {
        /// Everything the client has written, in order.
        sent: Mutex<Vec<u8>>,
        /// Canned responses, consumed one per `send`.
        responses: Mutex<VecDeque<Vec<u8>>>,
        /// Response bytes waiting to be read.
        inbound: Mutex<VecDeque<u8>>,
        /// Whether the link has been closed.
        closed: Mutex<bool>,
    }

    impl MockLink {
        /// Creates a link that answers each write with the next response in
        /// `responses`.
        pub(crate) fn scripted(responses: &[&[u8]]) -> MockLink {
            MockLink {
                sent: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.iter().map(|r| r.to_vec()).collect()),
                inbound: Mutex::new(VecDeque::new()),
                closed: Mutex::new(false),
            }
        }

        /// Creates a link with response bytes already waiting to be read.
        pub(crate) fn preloaded(inbound: &[u8]) -> MockLink {
            MockLink {
                sent: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
                inbound: Mutex::new(inbound.iter().copied().collect()),
                closed: Mutex::new(false),
            }
        }

        /// Everything the client has written so far.
        pub(crate) fn recorded(&self) -> Vec<u8> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl EbbTransport for MockLink {
        fn send(&self, bytes: &[u8]) -> io::Result<()> {
            if *self.closed.lock().unwrap_or_else(PoisonError::into_inner) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed"));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(bytes);
            if let Some(response) = self
                .responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            {
                self.inbound
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(response);
            }
            Ok(())
        }

        fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            if *self.closed.lock().unwrap_or_else(PoisonError::into_inner) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed"));
            }
            let mut inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
            if inbound.is_empty() {
                // A correctly-scripted test never reads more than it wrote;
                // fail fast instead of hanging the test.
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "mock device has no more response bytes",
                ));
            }
            let mut read = 0;
            while read < buf.len() {
                match inbound.pop_front() {
                    Some(byte) => {
                        buf[read] = byte;
                        read += 1;
                    }
                    None => break,
                }
            }
            Ok(read)
        }

        fn close(&self) -> io::Result<()> {
            *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
            Ok(())
        }
    }

    /// Creates a client over the given link with the AxiDraw profile.
    fn client(link: Arc<MockLink>) -> Ebb {
        Ebb::new(link, AXIDRAW)
    }

    #[test]
    fn test_firmware_version() {
        let link = Arc::new(MockLink::preloaded(b"aoeu\r\n"));
        let mut ebb = client(link.clone());

        let version = ebb.firmware_version().expect("version query should succeed");
        assert_eq!(version, "aoeu", "terminator should be stripped");
        assert_eq!(link.recorded(), b"V\r", "exactly one version query sent");
    }

    #[test]
    fn test_enable_motors_probes_firmware_version() {
        let link = Arc::new(MockLink::scripted(&[b"OK\r\n", b"test 2.5.3\r\n"]));
        let mut ebb = client(link.clone());

        ebb.enable_motors(2).expect("enable motors should succeed");
        assert_eq!(
            link.recorded(),
            b"EM,2,2\rV\r",
            "enable command should be followed by the version probe"
        );
    }

    #[test]
    fn test_capability_probe_is_cached_per_connection() {
        let link = Arc::new(MockLink::scripted(&[b"OK\r\n", b"test 2.5.3\r\n"]));
        let mut ebb = client(link.clone());

        ebb.enable_motors(2).expect("enable motors should succeed");
        let supports = ebb.supports_sr().expect("capability check should succeed");

        assert!(!supports, "2.5.3 predates the servo power timeout command");
        assert_eq!(
            link.recorded(),
            b"EM,2,2\rV\r",
            "the cached probe should not be repeated"
        );
    }

    #[test]
    fn test_supports_sr_from_2_6_0() {
        let link = Arc::new(MockLink::preloaded(b"EBBv13 2.6.2\r\n"));
        let mut ebb = client(link);

        assert!(
            ebb.supports_sr().expect("capability check should succeed"),
            "2.6.2 supports the servo power timeout command"
        );
    }

    #[test]
    fn test_execute_pen_motion_frames_servo_move() {
        let link = Arc::new(MockLink::scripted(&[b"OK\r\n"]));
        let mut ebb = client(link.clone());

        // 5000 units in half a second is 240 units per 24ms update.
        let motion = Motion::Pen(PenMotion {
            initial_pos: 20000,
            final_pos: 25000,
            duration: 0.5,
        });
        ebb.execute_motion(&motion).expect("pen move should succeed");
        assert_eq!(
            link.recorded(),
            b"S2,25000,4,240,0\r",
            "servo move should target the final position at the planned rate"
        );
    }

    #[test]
    fn test_execute_xy_motion_replays_blocks_as_segments() {
        let link = Arc::new(MockLink::scripted(&[b"OK\r\n", b"OK\r\n"]));
        let mut ebb = client(link.clone());

        let motion = Motion::Xy(XyMotion::new(vec![
            Block {
                start: Point { x: 0.0, y: 0.0 },
                end: Point { x: 10.0, y: 0.0 },
                v_initial: 0.0,
                v_final: 40.0,
                duration: 0.5,
            },
            Block {
                start: Point { x: 10.0, y: 0.0 },
                end: Point { x: 10.0, y: 10.0 },
                v_initial: 40.0,
                v_final: 0.0,
                duration: 0.25,
            },
        ]));
        ebb.execute_motion(&motion).expect("XY move should succeed");
        assert_eq!(
            link.recorded(),
            b"XM,500,50,0\rXM,250,0,50\r",
            "one stepper segment per planned block, at 5 steps/mm"
        );
    }

    #[test]
    fn test_wait_until_motors_idle_polls_until_idle() {
        let link = Arc::new(MockLink::scripted(&[
            b"QM,0,1,1,1\n\r",
            b"QM,0,0,0,0\n\r",
        ]));
        let mut ebb = client(link.clone());

        ebb.wait_until_motors_idle()
            .expect("idle wait should succeed");
        assert_eq!(
            link.recorded(),
            b"QM\rQM\r",
            "should poll until both motors report idle"
        );
    }

    #[test]
    fn test_stop_writes_without_reading() {
        let link = Arc::new(MockLink::preloaded(b""));
        let ebb = client(link.clone());

        ebb.stop().expect("stop should succeed");
        assert_eq!(
            link.recorded(),
            b"ES\r",
            "abort command should be written immediately"
        );
    }

    #[test]
    fn test_unexpected_response_is_a_protocol_error() {
        let link = Arc::new(MockLink::scripted(&[b"NOPE\r\n"]));
        let mut ebb = client(link);

        let err = ebb
            .disable_motors()
            .expect_err("non-OK response should fail");
        assert!(
            matches!(err, EbbError::Protocol { .. }),
            "expected a protocol error, got: {err:?}"
        );
    }

    #[test]
    fn test_firmware_error_line_is_surfaced() {
        let link = Arc::new(MockLink::scripted(&[b"!8 Err: Unknown command\r\n"]));
        let mut ebb = client(link);

        let err = ebb
            .disable_motors()
            .expect_err("firmware error should fail");
        match err {
            EbbError::Firmware { message, .. } => {
                assert_eq!(
                    message, "8 Err: Unknown command",
                    "firmware message should be carried in the error"
                );
            }
            other => panic!("expected a firmware error, got: {other:?}"),
        }
    }

    #[test]
    fn test_operations_fail_after_close() {
        let link = Arc::new(MockLink::preloaded(b""));
        let mut ebb = client(link);

        ebb.close().expect("close should succeed");
        let err = ebb
            .disable_motors()
            .expect_err("commands after close should fail");
        assert!(
            matches!(err, EbbError::Connection(_)),
            "expected a connection error, got: {err:?}"
        );
    }

    #[test]
    fn test_parse_version_handles_real_version_lines() {
        assert_eq!(
            parse_version("EBBv13_and_above EB Firmware Version 2.5.3"),
            Some(FirmwareVersion {
                major: 2,
                minor: 5,
                patch: 3
            }),
            "full version banner"
        );
        assert_eq!(parse_version("aoeu"), None, "no version token");
    }
}
