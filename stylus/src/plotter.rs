//! `plotter`
//!
//! The execution abstraction behind a plot, and the state machine that walks
//! a plan through it. [`EbbPlotter`] drives real hardware through the
//! protocol client; [`SimPlotter`] waits out each motion's planned duration
//! instead, so everything above it can run without a board attached. Both
//! sit under [`run_plot`], the single plotting loop shared by the
//! direct-serial driver and the server.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use crate::{
    device::Device,
    driver::DriverError,
    ebb::{emergency_stop, Ebb, EbbError},
    link::EbbTransport,
    planning::{Motion, Plan},
};

/// Microstepping mode used when enabling the motors for a plot.
pub const MICROSTEPPING_MODE: u8 = 2;

/// Rate used for pen moves the driver issues on its own (initial height,
/// cancellation raise), in actuator units per 24 ms servo update.
pub const PEN_RATE: u32 = 1000;

/// How long the servo stays powered after its last motion, when the
/// firmware supports a timeout.
pub const SERVO_POWER_TIMEOUT_MS: u32 = 10_000;

/// How a plot ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotOutcome {
    /// Every motion was executed.
    Finished,
    /// The plot exited early due to cancellation.
    Cancelled,
}

/// The side of a plot that executes individual motions.
///
/// Methods take `&self`: [`Plotter::pre_cancel`] must be invokable from
/// another thread while the plotting loop is blocked inside
/// [`Plotter::execute_motion`].
pub trait Plotter: Send + Sync {
    /// Prepares the device for a plot.
    ///
    /// # Arguments
    /// * `initial_pen_height`: Pen position to start from, in raw actuator
    ///   units.
    ///
    /// # Returns
    /// `Ok(())` once the device is ready.
    fn pre_plot(&self, initial_pen_height: u32) -> Result<(), EbbError>;

    /// Executes one motion to completion.
    ///
    /// # Arguments
    /// * `motion`: The motion to execute.
    /// * `progress`: This motion's index and the total motion count.
    ///
    /// # Returns
    /// `Ok(())` once the motion has completed (or been aborted).
    fn execute_motion(&self, motion: &Motion, progress: (usize, usize)) -> Result<(), EbbError>;

    /// Reacts to a cancellation request, before the loop has exited.
    ///
    /// # Arguments
    /// * `immediate`: Whether the current motion should be physically
    ///   aborted.
    ///
    /// # Returns
    /// `Ok(())` once the request has been handled.
    fn pre_cancel(&self, immediate: bool) -> Result<(), EbbError>;

    /// Puts the device into a safe state after a cancelled plot.
    ///
    /// # Arguments
    /// * `immediate`: Whether the cancellation was immediate.
    ///
    /// # Returns
    /// `Ok(())` once the device is safe.
    fn post_cancel(&self, immediate: bool) -> Result<(), EbbError>;

    /// Tears the device down after a plot, whichever way it ended.
    ///
    /// # Returns
    /// `Ok(())` once teardown is complete.
    fn post_plot(&self) -> Result<(), EbbError>;
}

/// The pause gate: a one-shot signal installed by `pause` and released
/// exactly once by `resume`.
#[derive(Default)]
struct PauseGate {
    /// Receiver the plotting loop blocks on at the next pen-up boundary.
    receiver: Option<oneshot::Receiver<()>>,
    /// Sender that releases the blocked loop.
    signal: Option<oneshot::Sender<()>>,
}

/// What a resume request found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The loop was blocked on the gate and has been released; it reports
    /// the pause-state change itself once it is running again.
    ReleasedBlocked,
    /// A pause was pending but the loop had not reached a pen-up boundary
    /// yet; the gate was removed without the loop ever blocking.
    ReleasedIdle,
    /// No pause was pending.
    NotPaused,
}

/// Shared control state for one plotting loop: the busy flag, the
/// cancellation flags, and the pause gate.
///
/// Mutated by the control surface (`pause`/`resume`/`cancel` calls) and
/// read at the loop's safe points; all cancellation is cooperative apart
/// from the hardware stop issued by [`Plotter::pre_cancel`].
#[derive(Default)]
pub struct PlotController {
    /// Whether a plot is currently in progress.
    plotting: AtomicBool,
    /// Whether cancellation has been requested.
    cancel_requested: AtomicBool,
    /// Whether the cancellation, if any, was immediate.
    immediate: AtomicBool,
    /// Whether a pause is pending or active.
    paused: AtomicBool,
    /// The installed pause gate, if any.
    gate: Mutex<PauseGate>,
}

impl PlotController {
    /// Creates a controller with no plot in progress.
    ///
    /// # Returns
    /// A new controller.
    pub fn new() -> PlotController {
        PlotController::default()
    }

    /// Claims the controller for a new plot, resetting the pause and
    /// cancellation state.
    ///
    /// # Returns
    /// `Ok(())` if no plot was in progress; [`DriverError::Busy`] otherwise,
    /// with no state changed.
    pub fn begin_plot(&self) -> Result<(), DriverError> {
        if self
            .plotting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DriverError::Busy);
        }
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.immediate.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = PauseGate::default();
        Ok(())
    }

    /// Releases the controller at the end of a plot.
    pub fn end_plot(&self) {
        self.plotting.store(false, Ordering::SeqCst);
    }

    /// Whether a plot is currently in progress.
    ///
    /// # Returns
    /// `true` while a plotting loop is running.
    pub fn is_plotting(&self) -> bool {
        self.plotting.load(Ordering::SeqCst)
    }

    /// Whether a pause is pending or active.
    ///
    /// # Returns
    /// `true` between a pause request and the matching resume.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Records a cancellation request, checked by the loop at its next safe
    /// point.
    ///
    /// # Arguments
    /// * `immediate`: Whether the current motion is being physically
    ///   aborted.
    pub fn request_cancel(&self, immediate: bool) {
        if immediate {
            self.immediate.store(true, Ordering::SeqCst);
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    ///
    /// # Returns
    /// `true` once [`PlotController::request_cancel`] has been called.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Whether the requested cancellation was immediate.
    ///
    /// # Returns
    /// `true` if any cancellation request asked for a hardware stop.
    pub fn immediate_cancel(&self) -> bool {
        self.immediate.load(Ordering::SeqCst)
    }

    /// Installs the pause gate.
    ///
    /// At most one gate exists at a time; a second pause request while one
    /// is pending changes nothing.
    ///
    /// # Returns
    /// `true` if a new gate was installed (the caller should report the
    /// pause-state change), `false` if a pause was already pending.
    pub fn pause(&self) -> bool {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.paused.load(Ordering::SeqCst) {
            return false;
        }
        let (sender, receiver) = oneshot::channel();
        gate.receiver = Some(receiver);
        gate.signal = Some(sender);
        self.paused.store(true, Ordering::SeqCst);
        true
    }

    /// Releases the pause gate, signalling it exactly once.
    ///
    /// # Returns
    /// What the resume found; see [`ResumeOutcome`]. When the outcome is
    /// [`ResumeOutcome::ReleasedIdle`] the caller reports the pause-state
    /// change itself, because the loop never blocked.
    pub fn resume(&self) -> ResumeOutcome {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        match (gate.receiver.take(), gate.signal.take()) {
            (Some(_receiver), Some(_sender)) => {
                // The loop never reached a pen-up boundary; dropping both
                // ends uninstalls the gate without waking anyone.
                self.paused.store(false, Ordering::SeqCst);
                ResumeOutcome::ReleasedIdle
            }
            (None, Some(sender)) => {
                let _ = sender.send(());
                ResumeOutcome::ReleasedBlocked
            }
            _ => ResumeOutcome::NotPaused,
        }
    }

    /// Takes the gate receiver for the loop to block on, leaving the signal
    /// half in place for `resume`.
    ///
    /// # Returns
    /// The receiver, if a pause is pending.
    fn take_gate(&self) -> Option<oneshot::Receiver<()>> {
        self.gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .receiver
            .take()
    }

    /// Clears the pause state once the loop has resumed.
    fn finish_resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

/// The notifications a plotting loop delivers while it runs.
///
/// Implemented over the driver's handler registry locally and over the
/// server's broadcast channel remotely.
pub trait PlotEvents: Send + Sync {
    /// A motion is about to execute.
    ///
    /// # Arguments
    /// * `motion_idx`: Index of the motion within the plan.
    fn progress(&self, motion_idx: usize);

    /// The pause state changed.
    ///
    /// # Arguments
    /// * `paused`: The new pause state.
    fn pause_changed(&self, paused: bool);

    /// The plot exited early due to cancellation.
    fn cancelled(&self);

    /// The plot ran to natural completion.
    fn finished(&self);
}

impl PlotEvents for crate::driver::EventHandlers {
    fn progress(&self, motion_idx: usize) {
        self.emit_progress(motion_idx);
    }

    fn pause_changed(&self, paused: bool) {
        self.emit_pause(paused);
    }

    fn cancelled(&self) {
        self.emit_cancelled();
    }

    fn finished(&self) {
        self.emit_finished();
    }
}

/// Picks the pen height a plot should start from.
///
/// # Arguments
/// * `plan`: The plan about to be executed.
/// * `device`: Profile of the connected plotter.
///
/// # Returns
/// The first motion's starting pen position when the plan begins with a pen
/// motion, otherwise the profile's fully-up position.
pub fn initial_pen_height(plan: &Plan, device: &Device) -> u32 {
    match plan.motions().first() {
        Some(Motion::Pen(pen)) => pen.initial_pos,
        _ => device.pen_pct_to_pos(0.0),
    }
}

/// Walks a plan through a plotter, honoring pause and cancellation.
///
/// This is the plotting state machine: progress is reported before each
/// motion; the pen state is tracked across pen motions; a pending pause
/// takes effect only at a pen-up boundary; cancellation is checked once per
/// completed motion, after pause handling. Whichever way the loop exits,
/// the plotter's teardown ([`Plotter::post_plot`]) still runs.
///
/// # Arguments
/// * `plan`: The plan to execute.
/// * `plotter`: The execution backend.
/// * `controller`: Shared control state; must have been claimed with
///   [`PlotController::begin_plot`].
/// * `events`: Where lifecycle notifications are delivered.
/// * `initial_pen_height`: Pen position to start from, in raw actuator
///   units.
///
/// # Returns
/// How the plot ended, or the first error the plotter reported. Errors are
/// reported as a cancelled plot to the event sink, after teardown has run.
pub fn run_plot(
    plan: &Plan,
    plotter: &dyn Plotter,
    controller: &PlotController,
    events: &dyn PlotEvents,
    initial_pen_height: u32,
) -> Result<PlotOutcome, EbbError> {
    let total = plan.len();
    let result = execute_plan(plan, plotter, controller, events, initial_pen_height, total);

    // Teardown below is unconditional and best-effort: each step runs
    // regardless of whether an earlier one (or the plot itself) failed.
    match &result {
        Ok(PlotOutcome::Finished) => events.finished(),
        Ok(PlotOutcome::Cancelled) | Err(_) => {
            if let Err(err) = plotter.post_cancel(controller.immediate_cancel()) {
                log::warn!("post-cancel pen raise failed: {err}");
            }
            events.cancelled();
        }
    }
    if let Err(err) = plotter.post_plot() {
        log::warn!("plot teardown failed: {err}");
    }
    controller.end_plot();

    result
}

/// The fallible part of a plot: preparation and the motion loop.
///
/// # Arguments
/// See [`run_plot`]; `total` is the motion count.
///
/// # Returns
/// How the loop exited, or the first plotter error.
fn execute_plan(
    plan: &Plan,
    plotter: &dyn Plotter,
    controller: &PlotController,
    events: &dyn PlotEvents,
    initial_pen_height: u32,
    total: usize,
) -> Result<PlotOutcome, EbbError> {
    plotter.pre_plot(initial_pen_height)?;

    let mut pen_is_up = true;
    for (motion_idx, motion) in plan.motions().iter().enumerate() {
        events.progress(motion_idx);
        plotter.execute_motion(motion, (motion_idx, total))?;

        if let Motion::Pen(pen) = motion {
            pen_is_up = pen.raises_pen();
        }

        // A pause only takes effect here, with the pen up: pausing must
        // never leave the pen resting on the page or split a stroke.
        if pen_is_up {
            if let Some(gate) = controller.take_gate() {
                let _ = gate.recv();
                controller.finish_resume();
                events.pause_changed(false);
            }
        }

        if controller.cancel_requested() {
            return Ok(PlotOutcome::Cancelled);
        }
    }

    Ok(PlotOutcome::Finished)
}

/// A plotter backed by real hardware through the protocol client.
pub struct EbbPlotter {
    /// The shared protocol client; every exchange takes this lock.
    ebb: Arc<Mutex<Ebb>>,
    /// The raw transport, used to race the hardware stop past the lock.
    link: Arc<dyn EbbTransport>,
    /// Profile of the connected plotter.
    device: Device,
}

impl EbbPlotter {
    /// Creates a hardware plotter.
    ///
    /// # Arguments
    /// * `ebb`: The shared protocol client.
    /// * `link`: The transport underneath it, for the raced stop command.
    /// * `device`: Profile of the connected plotter.
    ///
    /// # Returns
    /// A new hardware plotter.
    pub fn new(ebb: Arc<Mutex<Ebb>>, link: Arc<dyn EbbTransport>, device: Device) -> EbbPlotter {
        EbbPlotter { ebb, link, device }
    }
}

impl Plotter for EbbPlotter {
    fn pre_plot(&self, initial_pen_height: u32) -> Result<(), EbbError> {
        let mut ebb = self.ebb.lock().unwrap_or_else(PoisonError::into_inner);
        ebb.enable_motors(MICROSTEPPING_MODE)?;
        ebb.set_pen_height(initial_pen_height, PEN_RATE, Some(1000))
    }

    fn execute_motion(&self, motion: &Motion, _progress: (usize, usize)) -> Result<(), EbbError> {
        self.ebb
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .execute_motion(motion)
    }

    fn pre_cancel(&self, immediate: bool) -> Result<(), EbbError> {
        if immediate {
            // Written through the transport directly: the plotting loop may
            // be holding the client lock, blocked on a long motion.
            emergency_stop(self.link.as_ref())?;
        }
        Ok(())
    }

    fn post_cancel(&self, _immediate: bool) -> Result<(), EbbError> {
        let mut ebb = self.ebb.lock().unwrap_or_else(PoisonError::into_inner);
        let pen_up = self.device.pen_pct_to_pos(0.0);
        ebb.set_pen_height(pen_up, PEN_RATE, None)
    }

    fn post_plot(&self) -> Result<(), EbbError> {
        let mut ebb = self.ebb.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = ebb.go_home() {
            log::warn!("failed to return home: {err}");
        }
        if let Err(err) = ebb.wait_until_motors_idle() {
            log::warn!("failed to wait for idle motors: {err}");
        }
        ebb.disable_motors()
    }
}

/// A plotter with no hardware: each motion takes its planned duration on an
/// abortable timer. Used for running the full stack without a board
/// attached.
#[derive(Default)]
pub struct SimPlotter {
    /// Abort signal for the motion currently being waited out.
    abort: Mutex<Option<oneshot::Sender<()>>>,
}

impl SimPlotter {
    /// Creates a simulated plotter.
    ///
    /// # Returns
    /// A new simulated plotter.
    pub fn new() -> SimPlotter {
        SimPlotter::default()
    }
}

impl Plotter for SimPlotter {
    fn pre_plot(&self, _initial_pen_height: u32) -> Result<(), EbbError> {
        Ok(())
    }

    fn execute_motion(&self, motion: &Motion, progress: (usize, usize)) -> Result<(), EbbError> {
        log::info!("motion {}/{}", progress.0 + 1, progress.1);

        let (sender, receiver) = oneshot::channel();
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);

        let duration = Duration::from_secs_f64(motion.duration().max(0.0));
        match receiver.recv_timeout(duration) {
            Ok(()) => log::info!("simulated motion aborted"),
            Err(_) => {
                // Timed out: the motion ran its full planned duration.
            }
        }
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn pre_cancel(&self, immediate: bool) -> Result<(), EbbError> {
        if immediate {
            if let Some(sender) = self
                .abort
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                let _ = sender.send(());
            }
        } else {
            log::info!("cancelling simulated plot after the current motion");
        }
        Ok(())
    }

    fn post_cancel(&self, _immediate: bool) -> Result<(), EbbError> {
        Ok(())
    }

    fn post_plot(&self) -> Result<(), EbbError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AXIDRAW;
    use crate::planning::{Block, PenMotion, Point, XyMotion};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    /// What a plotting loop reported, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        /// A progress notification.
        Progress(usize),
        /// A pause-state notification.
        Pause(bool),
        /// The cancelled notification.
        Cancelled,
        /// The finished notification.
        Finished,
    }

    /// Records every notification and forwards it over a channel so tests
    /// can wait for specific events.
    struct Recorder {
        /// Everything reported so far.
        events: Mutex<Vec<Event>>,
        /// Live feed of the same events.
        feed: mpsc::Sender<Event>,
    }

    impl Recorder {
        /// Creates a recorder and the receiving end of its live feed.
        fn new() -> (Arc<Recorder>, mpsc::Receiver<Event>) {
            let (feed, rx) = mpsc::channel();
            (
                Arc::new(Recorder {
                    events: Mutex::new(Vec::new()),
                    feed,
                }),
                rx,
            )
        }

        /// Snapshot of everything recorded so far.
        fn recorded(&self) -> Vec<Event> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Records one event.
        fn push(&self, event: Event) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
            let _ = self.feed.send(event);
        }
    }

    impl PlotEvents for Recorder {
        fn progress(&self, motion_idx: usize) {
            self.push(Event::Progress(motion_idx));
        }

        fn pause_changed(&self, paused: bool) {
            self.push(Event::Pause(paused));
        }

        fn cancelled(&self) {
            self.push(Event::Cancelled);
        }

        fn finished(&self) {
            self.push(Event::Finished);
        }
    }

    /// An XY motion taking `seconds` to execute.
    fn xy_motion(seconds: f64) -> Motion {
        Motion::Xy(XyMotion::new(vec![Block {
            start: Point { x: 0.0, y: 0.0 },
            end: Point { x: 10.0, y: 0.0 },
            v_initial: 10.0,
            v_final: 10.0,
            duration: seconds,
        }]))
    }

    /// A quick pen drop.
    fn pen_down() -> Motion {
        Motion::Pen(PenMotion {
            initial_pos: 28000,
            final_pos: 7500,
            duration: 0.01,
        })
    }

    /// A quick pen raise.
    fn pen_up() -> Motion {
        Motion::Pen(PenMotion {
            initial_pos: 7500,
            final_pos: 28000,
            duration: 0.01,
        })
    }

    /// Waits for a specific event on the feed, ignoring everything before
    /// it.
    fn wait_for(rx: &mpsc::Receiver<Event>, wanted: &Event) {
        let deadline = Duration::from_secs(5);
        loop {
            let event = rx
                .recv_timeout(deadline)
                .expect("timed out waiting for an event");
            if &event == wanted {
                return;
            }
        }
    }

    /// Runs a plan on its own thread against a simulated plotter.
    fn spawn_plot(
        plan: Plan,
        plotter: Arc<SimPlotter>,
        controller: Arc<PlotController>,
        recorder: Arc<Recorder>,
    ) -> thread::JoinHandle<Result<PlotOutcome, EbbError>> {
        controller.begin_plot().expect("controller should be free");
        thread::spawn(move || {
            let height = initial_pen_height(&plan, &AXIDRAW);
            run_plot(&plan, plotter.as_ref(), &controller, recorder.as_ref(), height)
        })
    }

    #[test]
    fn test_completed_plot_finishes_exactly_once() {
        let plan = Plan::new(vec![pen_down(), xy_motion(0.01), pen_up()]);
        let (recorder, _rx) = Recorder::new();
        let controller = Arc::new(PlotController::new());

        let handle = spawn_plot(plan, Arc::new(SimPlotter::new()), controller.clone(), recorder.clone());
        let outcome = handle
            .join()
            .expect("plot thread should not panic")
            .expect("plot should succeed");

        assert_eq!(outcome, PlotOutcome::Finished, "plot should finish");
        assert_eq!(
            recorder.recorded(),
            vec![
                Event::Progress(0),
                Event::Progress(1),
                Event::Progress(2),
                Event::Finished,
            ],
            "finished fires exactly once and cancelled never fires"
        );
        assert!(!controller.is_plotting(), "controller should be released");
    }

    #[test]
    fn test_graceful_cancel_stops_after_current_motion() {
        let plan = Plan::new(vec![xy_motion(0.05); 20]);
        let (recorder, rx) = Recorder::new();
        let controller = Arc::new(PlotController::new());
        let plotter = Arc::new(SimPlotter::new());

        let handle = spawn_plot(plan, plotter.clone(), controller.clone(), recorder.clone());
        wait_for(&rx, &Event::Progress(0));
        controller.request_cancel(false);
        plotter.pre_cancel(false).expect("pre-cancel should succeed");

        let outcome = handle
            .join()
            .expect("plot thread should not panic")
            .expect("plot should succeed");
        assert_eq!(outcome, PlotOutcome::Cancelled, "plot should cancel");

        let events = recorder.recorded();
        assert!(
            events.contains(&Event::Cancelled),
            "cancelled should fire: {events:?}"
        );
        assert!(
            !events.contains(&Event::Finished),
            "finished should not fire on a cancelled plot: {events:?}"
        );
        assert!(
            events.len() < 22,
            "the loop should exit well before the last motion: {events:?}"
        );
    }

    #[test]
    fn test_immediate_cancel_aborts_the_current_motion() {
        let plan = Plan::new(vec![xy_motion(30.0)]);
        let (recorder, rx) = Recorder::new();
        let controller = Arc::new(PlotController::new());
        let plotter = Arc::new(SimPlotter::new());

        let started = Instant::now();
        let handle = spawn_plot(plan, plotter.clone(), controller.clone(), recorder.clone());
        wait_for(&rx, &Event::Progress(0));
        // Give the loop a moment to start waiting out the motion.
        thread::sleep(Duration::from_millis(50));
        controller.request_cancel(true);
        plotter.pre_cancel(true).expect("pre-cancel should succeed");

        let outcome = handle
            .join()
            .expect("plot thread should not panic")
            .expect("plot should succeed");
        assert_eq!(outcome, PlotOutcome::Cancelled, "plot should cancel");
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "the 30s motion should have been aborted, not waited out"
        );
        assert!(
            recorder.recorded().contains(&Event::Cancelled),
            "cancelled should fire"
        );
    }

    #[test]
    fn test_pause_waits_for_a_pen_up_boundary() {
        // Pen goes down, a stroke is drawn, pen comes up, another stroke.
        let plan = Plan::new(vec![pen_down(), xy_motion(0.2), pen_up(), xy_motion(0.2)]);
        let (recorder, rx) = Recorder::new();
        let controller = Arc::new(PlotController::new());
        let plotter = Arc::new(SimPlotter::new());

        let handle = spawn_plot(plan, plotter, controller.clone(), recorder.clone());
        wait_for(&rx, &Event::Progress(0));
        assert!(controller.pause(), "pause should install a gate");
        assert!(controller.is_paused(), "controller should be paused");
        assert!(!controller.pause(), "a second pause changes nothing");

        // The pen-down stroke must complete and the pen-up transition must
        // be reached before the loop blocks.
        wait_for(&rx, &Event::Progress(2));
        thread::sleep(Duration::from_millis(200));
        let during_pause = recorder.recorded();
        assert!(
            !during_pause.contains(&Event::Progress(3)),
            "the loop should be blocked at the pen-up boundary: {during_pause:?}"
        );
        assert!(
            !during_pause.contains(&Event::Finished),
            "a paused plot must not finish: {during_pause:?}"
        );

        assert_eq!(
            controller.resume(),
            ResumeOutcome::ReleasedBlocked,
            "resume should release the blocked loop"
        );
        wait_for(&rx, &Event::Pause(false));
        assert_eq!(
            controller.resume(),
            ResumeOutcome::NotPaused,
            "a second resume finds nothing to release"
        );

        let outcome = handle
            .join()
            .expect("plot thread should not panic")
            .expect("plot should succeed");
        assert_eq!(outcome, PlotOutcome::Finished, "plot should finish");

        let events = recorder.recorded();
        let false_count = events
            .iter()
            .filter(|event| **event == Event::Pause(false))
            .count();
        assert_eq!(false_count, 1, "the gate resolves exactly once: {events:?}");
    }

    #[test]
    fn test_resume_before_the_boundary_uninstalls_the_gate() {
        let controller = PlotController::new();
        assert!(controller.pause(), "pause should install a gate");
        assert_eq!(
            controller.resume(),
            ResumeOutcome::ReleasedIdle,
            "resume before the loop blocks just removes the gate"
        );
        assert!(!controller.is_paused(), "pause state should be cleared");
    }

    #[test]
    fn test_concurrent_plots_are_rejected() {
        let controller = PlotController::new();
        controller.begin_plot().expect("first plot should begin");
        let err = controller
            .begin_plot()
            .expect_err("second plot should be rejected");
        assert!(
            matches!(err, DriverError::Busy),
            "expected Busy, got: {err:?}"
        );
        controller.end_plot();
        controller
            .begin_plot()
            .expect("plotting again after the first plot ends should work");
    }

    #[test]
    fn test_initial_pen_height_prefers_the_plans_first_pen_motion() {
        let plan = Plan::new(vec![Motion::Pen(PenMotion {
            initial_pos: 21000,
            final_pos: 7500,
            duration: 0.2,
        })]);
        assert_eq!(
            initial_pen_height(&plan, &AXIDRAW),
            21000,
            "a leading pen motion supplies the starting height"
        );

        let plan = Plan::new(vec![xy_motion(0.1)]);
        assert_eq!(
            initial_pen_height(&plan, &AXIDRAW),
            AXIDRAW.pen_servo_max,
            "otherwise the pen starts fully up"
        );
    }
}
