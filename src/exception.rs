// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Contains the error and Result definitions.

use std::io;

use thiserror::Error;

use crate::robot::service_types::{Function, MoveStatus, SetControllerModeStatus};

/// Errors of the socket layer. All of them are fatal to the session: after a
/// network error only a best-effort shutdown can be attempted.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The robot closed the command connection.
    #[error("connection closed by the robot")]
    Closed,
    /// A receive deadline expired.
    #[error("network operation timed out")]
    Timeout,
    /// The local UDP socket could not be bound.
    #[error("cannot bind local socket: {source}")]
    BindFailed { source: io::Error },
    /// The robot could not be reached, or a socket operation failed with an
    /// OS error other than a timeout.
    #[error("robot is unreachable: {source}")]
    Unreachable { source: io::Error },
}

/// Errors of the wire protocol itself: malformed records or a peer that does
/// not speak our dialect.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The robot rejected the handshake because it speaks a different
    /// protocol version.
    #[error("incompatible protocol version: robot speaks version {remote}, this library speaks {local}")]
    IncompatibleVersion { remote: u16, local: u16 },
    /// A record did not have its declared wire length.
    #[error("record of {got} bytes does not match the declared {expected} byte layout")]
    BadLength { expected: usize, got: usize },
    /// A record carried an enum discriminant outside its declared range.
    #[error("malformed {record} record: unknown enum value")]
    BadEnum { record: &'static str },
    /// A command was sent but its reply did not arrive within the deadline.
    /// When issued by a motion or controller start while the robot state
    /// does not yet reflect the new mode, the caller may retry once per
    /// tick window.
    #[error("no reply to {function:?} within the deadline")]
    Timeout { function: Function },
}

/// Errors of the control session invariants. The session survives them:
/// further commands, in particular `stop_motion` and `stop_controller`, may
/// still be attempted.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The supplied command parts do not match the running motion generator
    /// and controller.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: &'static str },
    /// A motion generator or external controller is already running.
    #[error("a motion generator or controller is already running")]
    AlreadyRunning,
    /// No motion generator or external controller is running.
    #[error("no motion generator or controller is running")]
    NotRunning,
    /// The robot did not accept a `Move` command.
    #[error("motion could not be started: {status:?}")]
    MotionStartFailed { status: MoveStatus },
    /// A running motion ended with a terminal status other than success.
    #[error("motion aborted by the robot: {status:?}")]
    MotionAborted { status: MoveStatus },
    /// The robot did not accept a controller switch.
    #[error("controller switch failed: {status:?}")]
    ControllerChangeFailed { status: SetControllerModeStatus },
}

/// Errors of command-plane helpers layered on top of the session core.
/// The core itself never produces this kind; it exists so that higher
/// layers propagate their failures through the same [`ArmException`].
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command rejected by the robot: {message}")]
    Rejected { message: &'static str },
}

/// All errors this library reports, grouped by kind.
#[derive(Error, Debug)]
pub enum ArmException {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Result type which can have [`ArmException`] as error.
pub type ArmResult<T> = Result<T, ArmException>;
