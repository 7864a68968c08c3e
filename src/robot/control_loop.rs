// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! The callback-driven real-time loop.

use std::fmt::Debug;
use std::time::Duration;

use crate::exception::{ArmResult, ControlError};
use crate::robot::control_types::{ConvertMotion, Finishable, MotionMemory, Torques};
use crate::robot::low_pass_filter::{low_pass_filter, MAX_CUTOFF_FREQUENCY};
use crate::robot::motion_generator_traits::MotionGeneratorTrait;
use crate::robot::rate_limiting::{limit_rate_torques, DELTA_T, MAX_TORQUE_RATE};
use crate::robot::robot_impl::RobotImpl;
use crate::robot::robot_state::RobotState;
use crate::robot::service_types::{MoveControllerMode, MoveDeviation};
use crate::robot::types::{ControllerCommand, MotionGeneratorCommand};

type ControlCallback<'b> = &'b mut dyn FnMut(&RobotState, &Duration) -> Torques;

/// Pumps one tick per robot state: callback, signal conditioning, command.
/// The application drives it synchronously; the loop owns no thread.
pub(crate) struct ControlLoop<'a, 'b, U, F>
where
    U: ConvertMotion + Debug + MotionGeneratorTrait + Finishable,
    F: FnMut(&RobotState, &Duration) -> U,
{
    pub default_deviation: MoveDeviation,
    robot: &'a mut RobotImpl,
    motion_callback: F,
    control_callback: Option<ControlCallback<'b>>,
    limit_rate: bool,
    cutoff_frequency: f64,
}

impl<'a, 'b, U, F> ControlLoop<'a, 'b, U, F>
where
    U: ConvertMotion + Debug + MotionGeneratorTrait + Finishable,
    F: FnMut(&RobotState, &Duration) -> U,
{
    /// Starts a motion whose torques are produced by the given control
    /// callback, running the external controller.
    pub fn new(
        robot: &'a mut RobotImpl,
        control_callback: ControlCallback<'b>,
        motion_callback: F,
        limit_rate: bool,
        cutoff_frequency: f64,
    ) -> ArmResult<Self> {
        let mut control_loop = ControlLoop::new_intern(
            robot,
            motion_callback,
            Some(control_callback),
            limit_rate,
            cutoff_frequency,
        );
        control_loop.robot.start_motion(
            MoveControllerMode::ExternalController,
            U::get_motion_generator_mode(),
            &control_loop.default_deviation,
            &control_loop.default_deviation,
        )?;
        Ok(control_loop)
    }

    /// Starts a motion under one of the robot's internal controllers.
    pub fn from_control_mode(
        robot: &'a mut RobotImpl,
        controller_mode: MoveControllerMode,
        motion_callback: F,
        limit_rate: bool,
        cutoff_frequency: f64,
    ) -> ArmResult<Self> {
        if controller_mode == MoveControllerMode::ExternalController {
            return Err(ControlError::InvalidOperation {
                message: "the external controller needs a torque callback",
            }
            .into());
        }
        let mut control_loop =
            ControlLoop::new_intern(robot, motion_callback, None, limit_rate, cutoff_frequency);
        control_loop.robot.start_motion(
            controller_mode,
            U::get_motion_generator_mode(),
            &control_loop.default_deviation,
            &control_loop.default_deviation,
        )?;
        Ok(control_loop)
    }

    fn new_intern(
        robot: &'a mut RobotImpl,
        motion_callback: F,
        control_callback: Option<ControlCallback<'b>>,
        limit_rate: bool,
        cutoff_frequency: f64,
    ) -> Self {
        ControlLoop {
            default_deviation: MoveDeviation {
                translation: 10.,
                rotation: 3.12,
                elbow: 2. * std::f64::consts::PI,
            },
            robot,
            motion_callback,
            control_callback,
            limit_rate,
            cutoff_frequency,
        }
    }

    pub fn run(&mut self) -> ArmResult<()> {
        match self.do_loop() {
            Ok(_) => Ok(()),
            Err(error) => {
                self.robot.cancel_motion();
                Err(error)
            }
        }
    }

    fn do_loop(&mut self) -> ArmResult<()> {
        let mut robot_state = self.robot.update(None, None)?;
        self.robot.throw_on_motion_error(&robot_state)?;
        let mut memory = MotionMemory::new(&robot_state);
        let mut previous_message_id = robot_state.message_id;
        let mut motion_command = MotionGeneratorCommand::zero();
        if self.control_callback.is_some() {
            let mut control_command = ControllerCommand::zero();
            while self.spin_motion(
                &robot_state,
                &tick_period(previous_message_id, robot_state.message_id),
                &mut memory,
                &mut motion_command,
            ) && self.spin_control(
                &robot_state,
                &tick_period(previous_message_id, robot_state.message_id),
                &mut memory,
                &mut control_command,
            ) {
                previous_message_id = robot_state.message_id;
                robot_state = self
                    .robot
                    .update(Some(&motion_command), Some(&control_command))?;
                self.robot.throw_on_motion_error(&robot_state)?;
            }
            self.robot
                .finish_motion(Some(&motion_command), Some(&control_command))
        } else {
            while self.spin_motion(
                &robot_state,
                &tick_period(previous_message_id, robot_state.message_id),
                &mut memory,
                &mut motion_command,
            ) {
                previous_message_id = robot_state.message_id;
                robot_state = self.robot.update(Some(&motion_command), None)?;
                self.robot.throw_on_motion_error(&robot_state)?;
            }
            self.robot.finish_motion(Some(&motion_command), None)
        }
    }

    fn spin_motion(
        &mut self,
        robot_state: &RobotState,
        period: &Duration,
        memory: &mut MotionMemory,
        command: &mut MotionGeneratorCommand,
    ) -> bool {
        let motion_output = (self.motion_callback)(robot_state, period);
        motion_output.convert_motion(memory, command, self.cutoff_frequency, self.limit_rate);
        !motion_output.is_finished()
    }

    fn spin_control(
        &mut self,
        robot_state: &RobotState,
        period: &Duration,
        memory: &mut MotionMemory,
        command: &mut ControllerCommand,
    ) -> bool {
        let mut control_output =
            (self.control_callback.as_mut().unwrap())(robot_state, period);
        if self.cutoff_frequency < MAX_CUTOFF_FREQUENCY {
            for i in 0..7 {
                control_output.tau_J[i] = low_pass_filter(
                    DELTA_T,
                    control_output.tau_J[i],
                    memory.tau_J_c[i],
                    self.cutoff_frequency,
                );
            }
        }
        if self.limit_rate {
            control_output.tau_J =
                limit_rate_torques(&MAX_TORQUE_RATE, &control_output.tau_J, &memory.tau_J_c);
        }
        control_output.tau_J.iter().for_each(|x| assert!(x.is_finite()));
        memory.tau_J_c = control_output.tau_J;
        command.tau_J_d = control_output.tau_J;
        !control_output.is_finished()
    }
}

/// One tick is one millisecond; a gap in message ids means lost ticks.
fn tick_period(previous_message_id: u32, message_id: u32) -> Duration {
    Duration::from_millis(u64::from(message_id.saturating_sub(previous_message_id)))
}
