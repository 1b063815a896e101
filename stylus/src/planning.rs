//! `planning`
//!
//! The data model produced by the motion planner: an ordered [`Plan`] of
//! [`Motion`]s with pre-computed velocity profiles. The planner itself lives
//! upstream; this module only provides the consumption contract (indexing,
//! duration queries, progress sampling) and the wire representation used
//! when a plan is submitted to or pushed from a server.

use serde::{Deserialize, Serialize};

/// A position on the plot surface, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal axis position.
    pub x: f64,
    /// Vertical axis position.
    pub y: f64,
}

/// One constant-acceleration segment of an XY motion.
///
/// Blocks are produced by the planner; the protocol client replays them as
/// stepper segments without recomputing the velocity profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Where the toolhead is when the block starts, in mm.
    pub start: Point,
    /// Where the toolhead is when the block ends, in mm.
    pub end: Point,
    /// Velocity at the start of the block, in mm/s.
    pub v_initial: f64,
    /// Velocity at the end of the block, in mm/s.
    pub v_final: f64,
    /// How long the block takes, in seconds.
    pub duration: f64,
}

impl Block {
    /// The distance covered by this block, in mm.
    ///
    /// # Returns
    /// The distance travelled along the segment, derived from the velocity
    /// profile rather than the endpoints so that it stays consistent with
    /// the planned timing.
    pub fn distance(&self) -> f64 {
        (self.v_initial + self.v_final) / 2.0 * self.duration
    }

    /// Samples the toolhead position `dt` seconds into this block.
    ///
    /// # Arguments
    /// * `dt`: Time since the start of the block, in seconds.
    ///
    /// # Returns
    /// The interpolated position, clamped to the block's endpoints.
    fn instant(&self, dt: f64) -> Point {
        let distance = self.distance();
        if distance <= f64::EPSILON || self.duration <= f64::EPSILON {
            return self.start;
        }

        let acceleration = (self.v_final - self.v_initial) / self.duration;
        let travelled = self.v_initial * dt + 0.5 * acceleration * dt * dt;
        let fraction = (travelled / distance).clamp(0.0, 1.0);
        Point {
            x: self.start.x + (self.end.x - self.start.x) * fraction,
            y: self.start.y + (self.end.y - self.start.y) * fraction,
        }
    }
}

/// A planned movement of the XY stepper axes, as a sequence of
/// constant-acceleration blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XyMotion {
    /// The blocks making up the motion, in execution order.
    blocks: Vec<Block>,
}

impl XyMotion {
    /// Creates a new XY motion from planned blocks.
    ///
    /// # Arguments
    /// * `blocks`: The constant-acceleration segments, in execution order.
    ///
    /// # Returns
    /// A new [`XyMotion`].
    pub fn new(blocks: Vec<Block>) -> Self {
        XyMotion { blocks }
    }

    /// Gets the blocks making up the motion.
    ///
    /// # Returns
    /// The blocks, in execution order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// How long the motion takes, in seconds.
    ///
    /// # Returns
    /// The sum of the block durations.
    pub fn duration(&self) -> f64 {
        self.blocks.iter().map(|block| block.duration).sum()
    }

    /// Samples the toolhead position `t` seconds into the motion.
    ///
    /// Used for progress display while the motion executes.
    ///
    /// # Arguments
    /// * `t`: Time since the start of the motion, in seconds. Values before
    ///   the start or past the end clamp to the first/last position.
    ///
    /// # Returns
    /// The interpolated position.
    pub fn instant(&self, t: f64) -> Point {
        let mut remaining = t.max(0.0);
        for block in &self.blocks {
            if remaining <= block.duration {
                return block.instant(remaining);
            }
            remaining -= block.duration;
        }

        self.blocks
            .last()
            .map_or(Point { x: 0.0, y: 0.0 }, |block| block.end)
    }
}

/// A planned movement of the pen servo between two actuator positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenMotion {
    /// Servo position when the motion starts, in raw actuator units.
    pub initial_pos: u32,
    /// Servo position when the motion ends, in raw actuator units.
    pub final_pos: u32,
    /// How long the motion takes, in seconds.
    pub duration: f64,
}

impl PenMotion {
    /// How long the motion takes, in seconds.
    ///
    /// # Returns
    /// The planned duration.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Whether the pen is raised once this motion completes.
    ///
    /// Larger actuator values raise the pen on this device, so the pen is up
    /// after any motion that increased the servo position.
    ///
    /// # Returns
    /// `true` if the motion ends with the pen up.
    pub fn raises_pen(&self) -> bool {
        self.final_pos > self.initial_pos
    }
}

/// One planned movement segment: either an XY stepper move or a pen servo
/// move. Consumed strictly in sequence; never reordered at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum Motion {
    /// A movement of the XY stepper axes.
    Xy(XyMotion),
    /// A movement of the pen servo.
    Pen(PenMotion),
}

impl Motion {
    /// How long the motion takes, in seconds.
    ///
    /// # Returns
    /// The planned duration.
    pub fn duration(&self) -> f64 {
        match self {
            Motion::Xy(motion) => motion.duration(),
            Motion::Pen(motion) => motion.duration(),
        }
    }
}

/// An ordered, immutable-once-built sequence of motions.
///
/// Produced by the planner or deserialized from a remote message; a driver
/// only holds one for the duration of a single plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// The motions making up the plan, in execution order.
    motions: Vec<Motion>,
}

impl Plan {
    /// Creates a new plan.
    ///
    /// # Arguments
    /// * `motions`: The motions, in execution order.
    ///
    /// # Returns
    /// A new [`Plan`].
    pub fn new(motions: Vec<Motion>) -> Self {
        Plan { motions }
    }

    /// Gets the motions making up the plan.
    ///
    /// # Returns
    /// The motions, in execution order.
    pub fn motions(&self) -> &[Motion] {
        &self.motions
    }

    /// Gets the motion at the given index.
    ///
    /// # Arguments
    /// * `index`: Position of the motion within the plan.
    ///
    /// # Returns
    /// The motion, or `None` if the index is past the end of the plan.
    pub fn motion(&self, index: usize) -> Option<&Motion> {
        self.motions.get(index)
    }

    /// The number of motions in the plan.
    ///
    /// # Returns
    /// The number of motions.
    pub fn len(&self) -> usize {
        self.motions.len()
    }

    /// Whether the plan contains no motions.
    ///
    /// # Returns
    /// `true` if the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.motions.is_empty()
    }

    /// How long the remainder of the plan takes, in seconds.
    ///
    /// # Arguments
    /// * `from_index`: Index of the first motion to include. Pass `0` for
    ///   the duration of the whole plan.
    ///
    /// # Returns
    /// The summed duration of the motions from `from_index` onwards.
    pub fn duration(&self, from_index: usize) -> f64 {
        self.motions
            .iter()
            .skip(from_index)
            .map(Motion::duration)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A block moving right along the x axis at a constant 10 mm/s for one
    /// second.
    fn constant_block() -> Block {
        Block {
            start: Point { x: 0.0, y: 0.0 },
            end: Point { x: 10.0, y: 0.0 },
            v_initial: 10.0,
            v_final: 10.0,
            duration: 1.0,
        }
    }

    #[test]
    fn test_plan_duration() {
        let plan = Plan::new(vec![
            Motion::Pen(PenMotion {
                initial_pos: 28000,
                final_pos: 7500,
                duration: 0.5,
            }),
            Motion::Xy(XyMotion::new(vec![constant_block()])),
            Motion::Pen(PenMotion {
                initial_pos: 7500,
                final_pos: 28000,
                duration: 0.25,
            }),
        ]);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.duration(0), 1.75, "whole plan");
        assert_eq!(plan.duration(1), 1.25, "skipping the first motion");
        assert_eq!(plan.duration(3), 0.0, "past the end");
    }

    #[test]
    fn test_xy_motion_instant() {
        let motion = XyMotion::new(vec![constant_block()]);

        assert_eq!(
            motion.instant(0.0),
            Point { x: 0.0, y: 0.0 },
            "start of the motion"
        );
        assert_eq!(
            motion.instant(0.5),
            Point { x: 5.0, y: 0.0 },
            "halfway through a constant-velocity block"
        );
        assert_eq!(
            motion.instant(1.0),
            Point { x: 10.0, y: 0.0 },
            "end of the motion"
        );
        assert_eq!(
            motion.instant(100.0),
            Point { x: 10.0, y: 0.0 },
            "sampling past the end clamps to the final position"
        );
        assert_eq!(
            motion.instant(-1.0),
            Point { x: 0.0, y: 0.0 },
            "sampling before the start clamps to the first position"
        );
    }

    #[test]
    fn test_pen_motion_raises_pen() {
        let raise = PenMotion {
            initial_pos: 7500,
            final_pos: 28000,
            duration: 0.5,
        };
        let lower = PenMotion {
            initial_pos: 28000,
            final_pos: 7500,
            duration: 0.5,
        };

        assert!(raise.raises_pen(), "increasing position raises the pen");
        assert!(!lower.raises_pen(), "decreasing position lowers the pen");
    }

    #[test]
    fn test_plan_round_trips_through_json() {
        let plan = Plan::new(vec![
            Motion::Xy(XyMotion::new(vec![constant_block()])),
            Motion::Pen(PenMotion {
                initial_pos: 7500,
                final_pos: 28000,
                duration: 0.25,
            }),
        ]);

        let json = serde_json::to_string(&plan).expect("plan should serialize");
        let restored: Plan = serde_json::from_str(&json).expect("plan should deserialize");
        assert_eq!(restored, plan, "round trip should preserve the plan");
    }
}
