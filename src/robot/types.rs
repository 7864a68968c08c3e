// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Wire records of the UDP state/command channel.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::network::WireRecord;

/// Mode of the robot-side motion generator, as reported in every state
/// record.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Default)]
#[repr(u8)]
pub enum MotionGeneratorMode {
    #[default]
    Idle,
    JointPosition,
    JointVelocity,
    CartesianPosition,
    CartesianVelocity,
}

/// Mode of the robot-side controller, as reported in every state record.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Default)]
#[repr(u8)]
pub enum ControllerMode {
    JointImpedance,
    CartesianImpedance,
    ExternalController,
    MotorPd,
    JointPosition,
    JointVelocity,
    CartesianPosition,
    CartesianVelocity,
    #[default]
    Other,
}

/// One robot state sample as it travels over the wire. The robot emits one
/// of these per tick; the freshest one wins.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct RobotStateIntern {
    pub message_id: u32,
    pub motion_generator_mode: MotionGeneratorMode,
    pub controller_mode: ControllerMode,
    pub q: [f64; 7],
    pub q_d: [f64; 7],
    pub q_start: [f64; 7],
    pub dq: [f64; 7],
    pub tau_J: [f64; 7],
    pub dtau_J: [f64; 7],
    pub tau_ext_hat_filtered: [f64; 7],
    pub O_T_EE_start: [f64; 16],
    pub elbow_start: [f64; 2],
    pub O_F_ext_hat_EE: [f64; 6],
    pub EE_F_ext_hat_EE: [f64; 6],
    pub joint_contact: [f64; 7],
    pub cartesian_contact: [f64; 6],
    pub joint_collision: [f64; 7],
    pub cartesian_collision: [f64; 6],
}

impl WireRecord for RobotStateIntern {
    // message_id + 2 mode bytes + 105 doubles
    const WIRE_SIZE: usize = 4 + 2 + (7 * 7 + 16 + 2 + 6 + 6 + 7 + 6 + 7 + 6) * 8;
}

const _: () = assert!(RobotStateIntern::WIRE_SIZE == 846);

impl RobotStateIntern {
    pub fn dummy() -> Self {
        RobotStateIntern {
            message_id: 0,
            motion_generator_mode: MotionGeneratorMode::Idle,
            controller_mode: ControllerMode::Other,
            q: [0.; 7],
            q_d: [0.; 7],
            q_start: [0.; 7],
            dq: [0.; 7],
            tau_J: [0.; 7],
            dtau_J: [0.; 7],
            tau_ext_hat_filtered: [0.; 7],
            O_T_EE_start: [0.; 16],
            elbow_start: [0.; 2],
            O_F_ext_hat_EE: [0.; 6],
            EE_F_ext_hat_EE: [0.; 6],
            joint_contact: [0.; 7],
            cartesian_contact: [0.; 6],
            joint_collision: [0.; 7],
            cartesian_collision: [0.; 6],
        }
    }
}

/// Motion half of an outgoing command. Only the payload matching the
/// running motion generator mode is interpreted by the robot; the other
/// payloads stay zeroed.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct MotionGeneratorCommand {
    /// Commanded joint angles in \[rad\].
    pub q_c: [f64; 7],
    /// Commanded joint velocities in \[rad/s\].
    pub dq_c: [f64; 7],
    /// Commanded end effector pose in base frame, column major.
    pub O_T_EE_c: [f64; 16],
    /// Commanded end effector velocity in base frame.
    pub O_dP_EE_c: [f64; 6],
    /// Commanded elbow configuration.
    pub elbow_c: [f64; 2],
    /// Whether `elbow_c` is to be interpreted.
    pub valid_elbow: bool,
    /// Marks the last command of a motion. After a command with this flag
    /// has been sent, no further motion bytes are emitted for the motion.
    pub motion_generation_finished: bool,
}

impl MotionGeneratorCommand {
    pub fn new(
        q_c: [f64; 7],
        dq_c: [f64; 7],
        O_T_EE_c: [f64; 16],
        O_dP_EE_c: [f64; 6],
        elbow_c: [f64; 2],
    ) -> Self {
        MotionGeneratorCommand {
            q_c,
            dq_c,
            O_T_EE_c,
            O_dP_EE_c,
            elbow_c,
            valid_elbow: false,
            motion_generation_finished: false,
        }
    }

    pub fn zero() -> Self {
        MotionGeneratorCommand::new([0.; 7], [0.; 7], [0.; 16], [0.; 6], [0.; 2])
    }
}

/// Controller half of an outgoing command.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct ControllerCommand {
    /// Commanded joint torques in \[Nm\].
    pub tau_J_d: [f64; 7],
}

impl ControllerCommand {
    pub fn zero() -> Self {
        ControllerCommand { tau_J_d: [0.; 7] }
    }
}

/// One command record as it travels over the wire. `message_id` echoes the
/// id of the state the command answers.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct RobotCommand {
    pub message_id: u32,
    pub motion: MotionGeneratorCommand,
    pub control: ControllerCommand,
}

impl WireRecord for RobotCommand {
    // message_id + 38 motion doubles + 2 flag bytes + 7 torque doubles
    const WIRE_SIZE: usize = 4 + (7 + 7 + 16 + 6 + 2) * 8 + 2 + 7 * 8;
}

const _: () = assert!(RobotCommand::WIRE_SIZE == 366);
