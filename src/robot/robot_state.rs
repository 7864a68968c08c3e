// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Contains the RobotState type.

use crate::robot::types::{ControllerMode, MotionGeneratorMode, RobotStateIntern};

/// Describes the robot state sampled at one tick. Immutable once received.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(non_snake_case)]
pub struct RobotState {
    /// Measured joint position. Unit: \[rad\]
    pub q: [f64; 7],
    /// Desired joint position. Unit: \[rad\]
    pub q_d: [f64; 7],
    /// Joint position at the start of the current motion. Unit: \[rad\]
    pub q_start: [f64; 7],
    /// Measured joint velocity. Unit: \[rad/s\]
    pub dq: [f64; 7],
    /// Measured link-side joint torque sensor signals. Unit: \[Nm\]
    pub tau_J: [f64; 7],
    /// Derivative of measured link-side joint torque sensor signals.
    /// Unit: \[Nm/s\]
    pub dtau_J: [f64; 7],
    /// Filtered external torque. Unit: \[Nm\]
    pub tau_ext_hat_filtered: [f64; 7],
    /// End effector pose in base frame at the start of the current motion.
    /// Represented as a 4x4 matrix in column-major format.
    pub O_T_EE_start: [f64; 16],
    /// Elbow configuration at the start of the current motion.
    ///
    /// The values of the array are:
    ///  - \[0\] Position of the 3rd joint in \[rad\].
    ///  - \[1\] Sign of the 4th joint. Can be +1 or -1.
    pub elbow_start: [f64; 2],
    /// Estimated external wrench (force, torque) acting on the end effector,
    /// expressed relative to the base frame. Unit: \[N,N,N,Nm,Nm,Nm\]
    pub O_F_ext_hat_EE: [f64; 6],
    /// Estimated external wrench (force, torque) acting on the end effector,
    /// expressed relative to the end effector frame. Unit: \[N,N,N,Nm,Nm,Nm\]
    pub EE_F_ext_hat_EE: [f64; 6],
    /// Which contact level is activated in which joint. After contact
    /// disappears, the value turns to zero.
    pub joint_contact: [f64; 7],
    /// Which contact level is activated in which Cartesian dimension
    /// (x, y, z, R, P, Y). After contact disappears, the value turns to zero.
    pub cartesian_contact: [f64; 6],
    /// Which contact level is activated in which joint. After contact
    /// disappears, the value stays the same until the robot is reset.
    pub joint_collision: [f64; 7],
    /// Which contact level is activated in which Cartesian dimension
    /// (x, y, z, R, P, Y). After contact disappears, the value stays the
    /// same until the robot is reset.
    pub cartesian_collision: [f64; 6],
    /// Tick counter of this sample. Increases strictly monotonically at
    /// 1 kHz; the command answering this state echoes it.
    pub message_id: u32,
    /// Current mode of the motion generator.
    pub motion_generator_mode: MotionGeneratorMode,
    /// Current mode of the controller.
    pub controller_mode: ControllerMode,
}

impl From<RobotStateIntern> for RobotState {
    fn from(state: RobotStateIntern) -> Self {
        RobotState {
            q: state.q,
            q_d: state.q_d,
            q_start: state.q_start,
            dq: state.dq,
            tau_J: state.tau_J,
            dtau_J: state.dtau_J,
            tau_ext_hat_filtered: state.tau_ext_hat_filtered,
            O_T_EE_start: state.O_T_EE_start,
            elbow_start: state.elbow_start,
            O_F_ext_hat_EE: state.O_F_ext_hat_EE,
            EE_F_ext_hat_EE: state.EE_F_ext_hat_EE,
            joint_contact: state.joint_contact,
            cartesian_contact: state.cartesian_contact,
            joint_collision: state.joint_collision,
            cartesian_collision: state.cartesian_collision,
            message_id: state.message_id,
            motion_generator_mode: state.motion_generator_mode,
            controller_mode: state.controller_mode,
        }
    }
}
