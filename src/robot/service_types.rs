// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Wire records of the TCP command channel.
//!
//! Every record is a fixed-layout, little-endian struct. There is no length
//! field on the wire: a frame is identified by the [`Function`] tag in its
//! first four bytes, and both sides know the byte count of every record for
//! every tag.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::network::WireRecord;
use crate::robot::types::{ControllerMode, MotionGeneratorMode};

/// Version of the wire protocol this library speaks.
pub static RI_VERSION: u16 = 1;
/// TCP port on which the robot accepts command connections.
pub static COMMAND_PORT: u16 = 1337;

const FUNCTION_SIZE: usize = 4;
const STATUS_SIZE: usize = 1;

/// Identifies a command-plane exchange. Requests carry the tag in their
/// header, replies echo it.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Function {
    Connect,
    Move,
    StopMove,
    SetControllerMode,
}

// the TCP reader decodes the bare tag before it knows which record follows
impl WireRecord for Function {
    const WIRE_SIZE: usize = FUNCTION_SIZE;
}

/// Byte count of the reply record for the given function tag, including the
/// tag itself. The TCP reader refuses to dispatch a frame until this many
/// bytes are available.
pub(crate) fn reply_wire_size(function: Function) -> usize {
    match function {
        Function::Connect => ConnectReply::WIRE_SIZE,
        Function::Move => MoveReply::WIRE_SIZE,
        Function::StopMove => StopMoveReply::WIRE_SIZE,
        Function::SetControllerMode => SetControllerModeReply::WIRE_SIZE,
    }
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum ConnectStatus {
    Success,
    IncompatibleLibraryVersion,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct ConnectRequest {
    pub function: Function,
    pub version: u16,
    pub udp_port: u16,
}

impl ConnectRequest {
    pub fn new(udp_port: u16) -> Self {
        ConnectRequest {
            function: Function::Connect,
            version: RI_VERSION,
            udp_port,
        }
    }
}

impl WireRecord for ConnectRequest {
    const WIRE_SIZE: usize = FUNCTION_SIZE + 2 + 2;
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct ConnectReply {
    pub function: Function,
    pub status: ConnectStatus,
    pub version: u16,
}

impl WireRecord for ConnectReply {
    const WIRE_SIZE: usize = FUNCTION_SIZE + STATUS_SIZE + 2;
}

/// Controller selection for `Move` and `SetControllerMode` requests.
///
/// Unlike the robot-reported [`ControllerMode`], a request can never name
/// `Other`.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u32)]
pub enum MoveControllerMode {
    JointImpedance,
    CartesianImpedance,
    ExternalController,
    MotorPd,
    JointPosition,
    JointVelocity,
    CartesianPosition,
    CartesianVelocity,
}

impl From<MoveControllerMode> for ControllerMode {
    fn from(mode: MoveControllerMode) -> Self {
        match mode {
            MoveControllerMode::JointImpedance => ControllerMode::JointImpedance,
            MoveControllerMode::CartesianImpedance => ControllerMode::CartesianImpedance,
            MoveControllerMode::ExternalController => ControllerMode::ExternalController,
            MoveControllerMode::MotorPd => ControllerMode::MotorPd,
            MoveControllerMode::JointPosition => ControllerMode::JointPosition,
            MoveControllerMode::JointVelocity => ControllerMode::JointVelocity,
            MoveControllerMode::CartesianPosition => ControllerMode::CartesianPosition,
            MoveControllerMode::CartesianVelocity => ControllerMode::CartesianVelocity,
        }
    }
}

/// Motion generator selection for `Move` requests. `Idle` cannot be
/// requested, which is why this is not [`MotionGeneratorMode`].
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u32)]
pub enum MoveMotionGeneratorMode {
    JointPosition,
    JointVelocity,
    CartesianPosition,
    CartesianVelocity,
}

impl From<MoveMotionGeneratorMode> for MotionGeneratorMode {
    fn from(mode: MoveMotionGeneratorMode) -> Self {
        match mode {
            MoveMotionGeneratorMode::JointPosition => MotionGeneratorMode::JointPosition,
            MoveMotionGeneratorMode::JointVelocity => MotionGeneratorMode::JointVelocity,
            MoveMotionGeneratorMode::CartesianPosition => MotionGeneratorMode::CartesianPosition,
            MoveMotionGeneratorMode::CartesianVelocity => MotionGeneratorMode::CartesianVelocity,
        }
    }
}

/// Allowed deviation between the commanded and the actual path or goal.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct MoveDeviation {
    pub translation: f64,
    pub rotation: f64,
    pub elbow: f64,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum MoveStatus {
    MotionStarted,
    Success,
    Rejected,
    Aborted,
    Preempted,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct MoveRequest {
    pub function: Function,
    pub controller_mode: MoveControllerMode,
    pub motion_generator_mode: MoveMotionGeneratorMode,
    pub maximum_path_deviation: MoveDeviation,
    pub maximum_goal_pose_deviation: MoveDeviation,
}

impl MoveRequest {
    pub fn new(
        controller_mode: MoveControllerMode,
        motion_generator_mode: MoveMotionGeneratorMode,
        maximum_path_deviation: MoveDeviation,
        maximum_goal_pose_deviation: MoveDeviation,
    ) -> Self {
        MoveRequest {
            function: Function::Move,
            controller_mode,
            motion_generator_mode,
            maximum_path_deviation,
            maximum_goal_pose_deviation,
        }
    }
}

impl WireRecord for MoveRequest {
    const WIRE_SIZE: usize = FUNCTION_SIZE + 4 + 4 + 2 * 3 * 8;
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct MoveReply {
    pub function: Function,
    pub status: MoveStatus,
}

impl WireRecord for MoveReply {
    const WIRE_SIZE: usize = FUNCTION_SIZE + STATUS_SIZE;
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum StopMoveStatus {
    Success,
    Rejected,
    Aborted,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct StopMoveRequest {
    pub function: Function,
}

impl StopMoveRequest {
    pub fn new() -> Self {
        StopMoveRequest {
            function: Function::StopMove,
        }
    }
}

impl WireRecord for StopMoveRequest {
    const WIRE_SIZE: usize = FUNCTION_SIZE;
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct StopMoveReply {
    pub function: Function,
    pub status: StopMoveStatus,
}

impl WireRecord for StopMoveReply {
    const WIRE_SIZE: usize = FUNCTION_SIZE + STATUS_SIZE;
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum SetControllerModeStatus {
    Success,
    Rejected,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct SetControllerModeRequest {
    pub function: Function,
    pub mode: MoveControllerMode,
}

impl SetControllerModeRequest {
    pub fn new(mode: MoveControllerMode) -> Self {
        SetControllerModeRequest {
            function: Function::SetControllerMode,
            mode,
        }
    }
}

impl WireRecord for SetControllerModeRequest {
    const WIRE_SIZE: usize = FUNCTION_SIZE + 4;
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct SetControllerModeReply {
    pub function: Function,
    pub status: SetControllerModeStatus,
}

impl WireRecord for SetControllerModeReply {
    const WIRE_SIZE: usize = FUNCTION_SIZE + STATUS_SIZE;
}

const _: () = {
    assert!(ConnectRequest::WIRE_SIZE == 8);
    assert!(ConnectReply::WIRE_SIZE == 7);
    assert!(MoveRequest::WIRE_SIZE == 60);
    assert!(MoveReply::WIRE_SIZE == 5);
    assert!(StopMoveRequest::WIRE_SIZE == 4);
    assert!(StopMoveReply::WIRE_SIZE == 5);
    assert!(SetControllerModeRequest::WIRE_SIZE == 8);
    assert!(SetControllerModeReply::WIRE_SIZE == 5);
};
