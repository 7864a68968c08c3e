// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Contains the Robot type, the public handle for one session.

use std::fmt::Debug;
use std::time::Duration;

use crate::exception::ArmResult;
use crate::robot::control_loop::ControlLoop;
use crate::robot::control_types::{
    CartesianPose, CartesianVelocities, ConvertMotion, Finishable, JointPositions,
    JointVelocities, Torques,
};
use crate::robot::low_pass_filter::DEFAULT_CUTOFF_FREQUENCY;
use crate::robot::motion_generator_traits::MotionGeneratorTrait;
use crate::robot::robot_impl::{RobotImpl, DEFAULT_NETWORK_TIMEOUT};
use crate::robot::robot_state::RobotState;
use crate::robot::service_types::{
    MoveControllerMode, MoveDeviation, MoveMotionGeneratorMode, COMMAND_PORT,
};
use crate::robot::types::{ControllerCommand, MotionGeneratorCommand};

/// Maintains a network connection to the robot, provides the current robot
/// state, gives access to the command plane and pumps real-time control
/// loops at 1 kHz.
///
/// A `Robot` is a plain value owning its implementation; dropping it stops
/// a still-running motion best-effort and closes both sockets.
///
/// **ALWAYS HAVE THE USER STOP BUTTON AT HAND WHILE COMMANDING THE ARM!**
pub struct Robot {
    robot_impl: RobotImpl,
}

impl Robot {
    /// Establishes a connection with the robot.
    ///
    /// # Arguments
    /// * `address` - IP address or hostname of the robot.
    /// * `command_port` - Command port, [`COMMAND_PORT`] if `None`.
    /// * `network_timeout` - Deadline for every blocking receive and
    ///   synchronous command, one second if `None`.
    ///
    /// # Errors
    /// * [`NetworkError`](`crate::exception::NetworkError`) if the
    ///   connection cannot be established.
    /// * [`ProtocolError`](`crate::exception::ProtocolError`) if the robot
    ///   speaks an incompatible protocol version.
    pub fn new(
        address: &str,
        command_port: Option<u16>,
        network_timeout: Option<Duration>,
    ) -> ArmResult<Robot> {
        let robot_impl = RobotImpl::new(
            address,
            command_port.unwrap_or(COMMAND_PORT),
            network_timeout.unwrap_or(DEFAULT_NETWORK_TIMEOUT),
        )?;
        Ok(Robot { robot_impl })
    }

    /// Protocol version reported by the robot during the handshake.
    pub fn server_version(&self) -> u16 {
        self.robot_impl.server_version()
    }

    /// Whether the most recent state reported a running motion generator.
    pub fn motion_generator_running(&self) -> bool {
        self.robot_impl.motion_generator_running()
    }

    /// Whether the most recent state reported the external controller.
    pub fn controller_running(&self) -> bool {
        self.robot_impl.controller_running()
    }

    /// The most recently received robot state, if any state has been
    /// received yet.
    pub fn last_state(&self) -> Option<&RobotState> {
        self.robot_impl.last_state()
    }

    /// Executes one tick: receives the freshest robot state and answers it
    /// with the given command parts.
    ///
    /// Which parts must be present depends on what is running: a motion
    /// needs the motion part, the external controller needs the control
    /// part, both running need both. A call without any part is a pure
    /// state poll and is always allowed.
    ///
    /// # Errors
    /// * [`ControlError::InvalidOperation`](`crate::exception::ControlError::InvalidOperation`)
    ///   if the supplied parts do not match what is running; nothing is
    ///   sent in that case.
    /// * [`ControlError::MotionAborted`](`crate::exception::ControlError::MotionAborted`)
    ///   if the robot terminated the running motion.
    /// * [`NetworkError`](`crate::exception::NetworkError`) on socket
    ///   failure or receive timeout.
    pub fn update(
        &mut self,
        motion_command: Option<&MotionGeneratorCommand>,
        control_command: Option<&ControllerCommand>,
    ) -> ArmResult<RobotState> {
        self.robot_impl.update(motion_command, control_command)
    }

    /// Waits for a fresh robot state and returns it without commanding
    /// anything.
    pub fn read_once(&mut self) -> ArmResult<RobotState> {
        self.robot_impl.read_once()
    }

    /// Streams robot states to the callback until it returns `false`.
    ///
    /// ```no_run
    /// # use armctl::{Robot, ArmResult};
    /// # fn main() -> ArmResult<()> {
    /// # let mut robot = Robot::new("robot.local", None, None)?;
    /// let mut count = 0;
    /// robot.read(|state| {
    ///     println!("{:?}", state.q);
    ///     count += 1;
    ///     count < 100
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn read<F: FnMut(&RobotState) -> bool>(&mut self, mut callback: F) -> ArmResult<()> {
        loop {
            let state = self.robot_impl.update(None, None)?;
            if !callback(&state) {
                return Ok(());
            }
        }
    }

    /// Starts a motion generator, optionally together with the external
    /// controller. Afterwards the matching command part must be supplied on
    /// every [`update`](`Self::update`) tick.
    ///
    /// # Errors
    /// * [`ControlError::AlreadyRunning`](`crate::exception::ControlError::AlreadyRunning`)
    ///   if a motion or controller is already running; no `Move` is sent
    ///   then.
    /// * [`ControlError::MotionStartFailed`](`crate::exception::ControlError::MotionStartFailed`)
    ///   if the robot rejects the motion.
    pub fn start_motion(
        &mut self,
        controller_mode: MoveControllerMode,
        motion_generator_mode: MoveMotionGeneratorMode,
        maximum_path_deviation: &MoveDeviation,
        maximum_goal_pose_deviation: &MoveDeviation,
    ) -> ArmResult<()> {
        self.robot_impl.start_motion(
            controller_mode,
            motion_generator_mode,
            maximum_path_deviation,
            maximum_goal_pose_deviation,
        )
    }

    /// Stops the running motion. Emits one final command flagged as
    /// finished, then waits until the robot reports an idle motion
    /// generator and delivers the terminal `Move` reply. An external
    /// controller started with the motion keeps running.
    pub fn stop_motion(&mut self) -> ArmResult<()> {
        self.robot_impl.stop_motion()
    }

    /// Switches the robot to the external controller. Afterwards every
    /// [`update`](`Self::update`) tick must supply the control part.
    pub fn start_controller(&mut self) -> ArmResult<()> {
        self.robot_impl.start_controller()
    }

    /// Switches the robot back to its internal default controller.
    pub fn stop_controller(&mut self) -> ArmResult<()> {
        self.robot_impl.stop_controller()
    }

    /// Runs a torque control loop: the callback is invoked once per robot
    /// state and its torques are streamed back, until it flags the motion
    /// as finished.
    ///
    /// # Arguments
    /// * `control_callback` - Callback producing the joint-level torques.
    /// * `limit_rate` - Whether the torque rate limiter runs, `true` if
    ///   `None`.
    /// * `cutoff_frequency` - Low-pass cutoff applied to the commanded
    ///   torques, [`DEFAULT_CUTOFF_FREQUENCY`] if `None`. Pass
    ///   [`MAX_CUTOFF_FREQUENCY`](`crate::MAX_CUTOFF_FREQUENCY`) to disable
    ///   filtering.
    pub fn control_torques<T: FnMut(&RobotState, &Duration) -> Torques>(
        &mut self,
        mut control_callback: T,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        let motion_generator_callback =
            |_state: &RobotState, _period: &Duration| JointVelocities::new([0.; 7]);
        self.control_torques_intern(
            motion_generator_callback,
            &mut control_callback,
            limit_rate,
            cutoff_frequency,
        )
    }

    /// Runs a torque control loop alongside a joint position motion
    /// generator. See [`control_torques`](`Self::control_torques`).
    pub fn control_torques_and_joint_positions<
        F: FnMut(&RobotState, &Duration) -> JointPositions,
        T: FnMut(&RobotState, &Duration) -> Torques,
    >(
        &mut self,
        mut control_callback: T,
        motion_generator_callback: F,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        self.control_torques_intern(
            motion_generator_callback,
            &mut control_callback,
            limit_rate,
            cutoff_frequency,
        )
    }

    /// Runs a torque control loop alongside a joint velocity motion
    /// generator. See [`control_torques`](`Self::control_torques`).
    pub fn control_torques_and_joint_velocities<
        F: FnMut(&RobotState, &Duration) -> JointVelocities,
        T: FnMut(&RobotState, &Duration) -> Torques,
    >(
        &mut self,
        mut control_callback: T,
        motion_generator_callback: F,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        self.control_torques_intern(
            motion_generator_callback,
            &mut control_callback,
            limit_rate,
            cutoff_frequency,
        )
    }

    /// Runs a torque control loop alongside a Cartesian pose motion
    /// generator. See [`control_torques`](`Self::control_torques`).
    pub fn control_torques_and_cartesian_pose<
        F: FnMut(&RobotState, &Duration) -> CartesianPose,
        T: FnMut(&RobotState, &Duration) -> Torques,
    >(
        &mut self,
        mut control_callback: T,
        motion_generator_callback: F,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        self.control_torques_intern(
            motion_generator_callback,
            &mut control_callback,
            limit_rate,
            cutoff_frequency,
        )
    }

    /// Runs a torque control loop alongside a Cartesian velocity motion
    /// generator. See [`control_torques`](`Self::control_torques`).
    pub fn control_torques_and_cartesian_velocities<
        F: FnMut(&RobotState, &Duration) -> CartesianVelocities,
        T: FnMut(&RobotState, &Duration) -> Torques,
    >(
        &mut self,
        mut control_callback: T,
        motion_generator_callback: F,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        self.control_torques_intern(
            motion_generator_callback,
            &mut control_callback,
            limit_rate,
            cutoff_frequency,
        )
    }

    /// Runs a joint position motion generator under one of the internal
    /// controllers.
    ///
    /// # Arguments
    /// * `motion_generator_callback` - Callback producing the joint
    ///   positions.
    /// * `controller_mode` - Internal controller to use,
    ///   [`MoveControllerMode::JointImpedance`] if `None`. The external
    ///   controller cannot be selected here; use
    ///   [`control_torques_and_joint_positions`](`Self::control_torques_and_joint_positions`)
    ///   instead.
    /// * `limit_rate`, `cutoff_frequency` - See
    ///   [`control_torques`](`Self::control_torques`).
    pub fn control_joint_positions<F: FnMut(&RobotState, &Duration) -> JointPositions>(
        &mut self,
        motion_generator_callback: F,
        controller_mode: Option<MoveControllerMode>,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        self.control_motion_intern(
            motion_generator_callback,
            controller_mode,
            limit_rate,
            cutoff_frequency,
        )
    }

    /// Runs a joint velocity motion generator under one of the internal
    /// controllers. See
    /// [`control_joint_positions`](`Self::control_joint_positions`).
    pub fn control_joint_velocities<F: FnMut(&RobotState, &Duration) -> JointVelocities>(
        &mut self,
        motion_generator_callback: F,
        controller_mode: Option<MoveControllerMode>,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        self.control_motion_intern(
            motion_generator_callback,
            controller_mode,
            limit_rate,
            cutoff_frequency,
        )
    }

    /// Runs a Cartesian pose motion generator under one of the internal
    /// controllers. See
    /// [`control_joint_positions`](`Self::control_joint_positions`).
    pub fn control_cartesian_pose<F: FnMut(&RobotState, &Duration) -> CartesianPose>(
        &mut self,
        motion_generator_callback: F,
        controller_mode: Option<MoveControllerMode>,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        self.control_motion_intern(
            motion_generator_callback,
            controller_mode,
            limit_rate,
            cutoff_frequency,
        )
    }

    /// Runs a Cartesian velocity motion generator under one of the internal
    /// controllers. See
    /// [`control_joint_positions`](`Self::control_joint_positions`).
    pub fn control_cartesian_velocities<F: FnMut(&RobotState, &Duration) -> CartesianVelocities>(
        &mut self,
        motion_generator_callback: F,
        controller_mode: Option<MoveControllerMode>,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()> {
        self.control_motion_intern(
            motion_generator_callback,
            controller_mode,
            limit_rate,
            cutoff_frequency,
        )
    }

    fn control_motion_intern<F, U>(
        &mut self,
        motion_generator_callback: F,
        controller_mode: Option<MoveControllerMode>,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()>
    where
        F: FnMut(&RobotState, &Duration) -> U,
        U: ConvertMotion + Debug + MotionGeneratorTrait + Finishable,
    {
        let controller_mode = controller_mode.unwrap_or(MoveControllerMode::JointImpedance);
        let limit_rate = limit_rate.unwrap_or(true);
        let cutoff_frequency = cutoff_frequency.unwrap_or(DEFAULT_CUTOFF_FREQUENCY);
        let mut control_loop = ControlLoop::from_control_mode(
            &mut self.robot_impl,
            controller_mode,
            motion_generator_callback,
            limit_rate,
            cutoff_frequency,
        )?;
        control_loop.run()
    }

    fn control_torques_intern<F, U>(
        &mut self,
        motion_generator_callback: F,
        control_callback: &mut dyn FnMut(&RobotState, &Duration) -> Torques,
        limit_rate: Option<bool>,
        cutoff_frequency: Option<f64>,
    ) -> ArmResult<()>
    where
        F: FnMut(&RobotState, &Duration) -> U,
        U: ConvertMotion + Debug + MotionGeneratorTrait + Finishable,
    {
        let limit_rate = limit_rate.unwrap_or(true);
        let cutoff_frequency = cutoff_frequency.unwrap_or(DEFAULT_CUTOFF_FREQUENCY);
        let mut control_loop = ControlLoop::new(
            &mut self.robot_impl,
            control_callback,
            motion_generator_callback,
            limit_rate,
            cutoff_frequency,
        )?;
        control_loop.run()
    }
}
