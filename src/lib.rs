// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! # armctl
//! armctl is a client library for driving 7-degree-of-freedom
//! torque-controlled robot arms over a LAN.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT HAND WHILE COMMANDING THE ARM!**
//!
//! ## Design
//! The library multiplexes a reliable TCP command channel with an
//! unreliable 1 kHz UDP state/command channel. A user program installs a
//! real-time callback producing joint positions, joint velocities, a
//! Cartesian pose, a Cartesian velocity or joint torques; the library
//! invokes it once per robot state sample and streams the resulting
//! commands back, enforcing that every state tick is answered by at most
//! one command and that a lost or out-of-order packet ends in a
//! deterministic stop.
//!
//! Everything lives in the [`robot`] module; the [`Robot`] type is the
//! session handle.
//!
//! # Example:
//! ```no_run
//! use std::f64::consts::PI;
//! use armctl::{ArmResult, Finishable, JointPositions, Robot};
//!
//! fn main() -> ArmResult<()> {
//!     let mut robot = Robot::new("robot.local", None, None)?;
//!     let mut initial_position = [0.; 7];
//!     let mut time = 0.;
//!     robot.control_joint_positions(
//!         |state, period| {
//!             if time == 0. {
//!                 initial_position = state.q_d;
//!             }
//!             time += period.as_secs_f64();
//!             let delta = PI / 8. * (1. - f64::cos(PI / 2.5 * time));
//!             let mut out = JointPositions::new(initial_position);
//!             out.q[3] += delta;
//!             out.q[4] += delta;
//!             out.q[6] += delta;
//!             if time >= 5.0 {
//!                 return out.motion_finished();
//!             }
//!             out
//!         },
//!         None,
//!         None,
//!         None,
//!     )
//! }
//! ```
//!
//! The callback receives the newest [`RobotState`] and the elapsed time
//! since its previous invocation (zero on the first call). Returning a
//! value flagged with [`Finishable::motion_finished`] ends the loop and
//! stops the motion on the robot.
//!
//! Applications that want to own the tick cadence themselves use
//! [`Robot::start_motion`] together with [`Robot::update`] instead; both
//! shapes share the same one-tick cycle.

pub mod exception;
mod network;
pub mod robot;

pub use exception::{
    ArmException, ArmResult, CommandError, ControlError, NetworkError, ProtocolError,
};
pub use robot::control_types::{
    CartesianPose, CartesianVelocities, Finishable, JointPositions, JointVelocities, Torques,
};
pub use robot::low_pass_filter::{DEFAULT_CUTOFF_FREQUENCY, MAX_CUTOFF_FREQUENCY};
pub use robot::robot_impl::DEFAULT_NETWORK_TIMEOUT;
pub use robot::robot_state::RobotState;
pub use robot::service_types::{
    MoveControllerMode, MoveDeviation, MoveMotionGeneratorMode, COMMAND_PORT, RI_VERSION,
};
pub use robot::types::{
    ControllerCommand, ControllerMode, MotionGeneratorCommand, MotionGeneratorMode,
};
pub use robot::Robot;
