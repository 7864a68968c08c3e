// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Helper types for returning motion generation and joint-level torque
//! commands from control callbacks.

use crate::robot::control_tools::is_homogeneous_transformation;
use crate::robot::low_pass_filter::{
    cartesian_low_pass_filter, low_pass_filter, MAX_CUTOFF_FREQUENCY,
};
use crate::robot::motion_generator_traits::MotionGeneratorTrait;
use crate::robot::rate_limiting::{
    limit_rate_cartesian_pose, limit_rate_cartesian_velocity, limit_rate_joint_positions,
    limit_rate_joint_velocities, limit_rate_position, DELTA_T, MAX_ELBOW_ACCELERATION,
    MAX_ELBOW_JERK, MAX_ELBOW_VELOCITY, MAX_JOINT_ACCELERATION, MAX_JOINT_JERK,
    MAX_JOINT_VELOCITY, MAX_ROTATIONAL_ACCELERATION, MAX_ROTATIONAL_JERK,
    MAX_ROTATIONAL_VELOCITY, MAX_TRANSLATIONAL_ACCELERATION, MAX_TRANSLATIONAL_JERK,
    MAX_TRANSLATIONAL_VELOCITY,
};
use crate::robot::robot_state::RobotState;
use crate::robot::service_types::MoveMotionGeneratorMode;
use crate::robot::types::MotionGeneratorCommand;

/// Remembers the previously commanded signals of the running motion,
/// together with finite-difference estimates of their derivatives. The
/// state stream of the robot only carries measured values, so filtering and
/// rate limiting reference this client-side memory instead.
#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub(crate) struct MotionMemory {
    pub q_c: [f64; 7],
    pub dq_c: [f64; 7],
    pub ddq_c: [f64; 7],
    pub O_T_EE_c: [f64; 16],
    pub O_dP_EE_c: [f64; 6],
    pub O_ddP_EE_c: [f64; 6],
    pub elbow_c: [f64; 2],
    pub delbow_c: f64,
    pub ddelbow_c: f64,
    pub tau_J_c: [f64; 7],
}

impl MotionMemory {
    /// Seeds the memory at motion start from the last robot state.
    pub fn new(state: &RobotState) -> Self {
        MotionMemory {
            q_c: state.q_d,
            dq_c: [0.; 7],
            ddq_c: [0.; 7],
            O_T_EE_c: state.O_T_EE_start,
            O_dP_EE_c: [0.; 6],
            O_ddP_EE_c: [0.; 6],
            elbow_c: state.elbow_start,
            delbow_c: 0.,
            ddelbow_c: 0.,
            tau_J_c: [0.; 7],
        }
    }
}

/// Used to decide whether to terminate a loop after the control callback
/// has returned.
pub trait Finishable {
    /// Determines whether to finish a currently running motion.
    fn is_finished(&self) -> bool;
    /// Sets the attribute which decides if the currently running motion
    /// should be finished.
    fn set_motion_finished(&mut self, finished: bool);
    /// Helper method to indicate that a motion should stop after processing
    /// the given command.
    fn motion_finished(self) -> Self;
}

/// Converts a callback return type into the motion half of a wire command,
/// applying low-pass filtering and rate limiting against the remembered
/// previous commands.
pub(crate) trait ConvertMotion {
    fn convert_motion(
        &self,
        memory: &mut MotionMemory,
        command: &mut MotionGeneratorCommand,
        cutoff_frequency: f64,
        limit_rate: bool,
    );
}

/// Stores joint-level torque commands without gravity and friction.
#[derive(Debug, Copy, Clone)]
#[allow(non_snake_case)]
pub struct Torques {
    motion_finished: bool,
    /// Desired torques in \[Nm\].
    pub tau_J: [f64; 7],
}

impl Torques {
    /// Creates a new Torques instance.
    /// # Arguments
    /// * `torques` - Desired joint-level torques without gravity and
    ///   friction in \[Nm\].
    pub fn new(torques: [f64; 7]) -> Self {
        Torques {
            tau_J: torques,
            motion_finished: false,
        }
    }
}

impl Finishable for Torques {
    fn is_finished(&self) -> bool {
        self.motion_finished
    }
    fn set_motion_finished(&mut self, finished: bool) {
        self.motion_finished = finished;
    }
    fn motion_finished(mut self) -> Self {
        self.set_motion_finished(true);
        self
    }
}

/// Stores values for joint position motion generation.
#[derive(Debug, Copy, Clone)]
pub struct JointPositions {
    motion_finished: bool,
    /// Desired joint angles in \[rad\].
    pub q: [f64; 7],
}

impl JointPositions {
    /// Creates a new JointPositions instance.
    /// # Arguments
    /// * `joint_positions` - Desired joint angles in \[rad\].
    pub fn new(joint_positions: [f64; 7]) -> Self {
        JointPositions {
            q: joint_positions,
            motion_finished: false,
        }
    }
}

impl Finishable for JointPositions {
    fn is_finished(&self) -> bool {
        self.motion_finished
    }
    fn set_motion_finished(&mut self, finished: bool) {
        self.motion_finished = finished;
    }
    fn motion_finished(mut self) -> Self {
        self.set_motion_finished(true);
        self
    }
}

impl ConvertMotion for JointPositions {
    fn convert_motion(
        &self,
        memory: &mut MotionMemory,
        command: &mut MotionGeneratorCommand,
        cutoff_frequency: f64,
        limit_rate: bool,
    ) {
        command.q_c = self.q;
        if cutoff_frequency < MAX_CUTOFF_FREQUENCY {
            for i in 0..7 {
                command.q_c[i] =
                    low_pass_filter(DELTA_T, command.q_c[i], memory.q_c[i], cutoff_frequency);
            }
        }
        if limit_rate {
            command.q_c = limit_rate_joint_positions(
                &MAX_JOINT_VELOCITY,
                &MAX_JOINT_ACCELERATION,
                &MAX_JOINT_JERK,
                &command.q_c,
                &memory.q_c,
                &memory.dq_c,
                &memory.ddq_c,
            );
        }
        command.q_c.iter().for_each(|x| assert!(x.is_finite()));
        let mut velocities = [0.; 7];
        for i in 0..7 {
            velocities[i] = (command.q_c[i] - memory.q_c[i]) / DELTA_T;
            memory.ddq_c[i] = (velocities[i] - memory.dq_c[i]) / DELTA_T;
        }
        memory.dq_c = velocities;
        memory.q_c = command.q_c;
    }
}

impl MotionGeneratorTrait for JointPositions {
    fn get_motion_generator_mode() -> MoveMotionGeneratorMode {
        MoveMotionGeneratorMode::JointPosition
    }
}

/// Stores values for joint velocity motion generation.
#[derive(Debug, Copy, Clone)]
pub struct JointVelocities {
    motion_finished: bool,
    /// Desired joint velocities in \[rad/s\].
    pub dq: [f64; 7],
}

impl JointVelocities {
    /// Creates a new JointVelocities instance.
    /// # Arguments
    /// * `joint_velocities` - Desired joint velocities in \[rad/s\].
    pub fn new(joint_velocities: [f64; 7]) -> Self {
        JointVelocities {
            dq: joint_velocities,
            motion_finished: false,
        }
    }
}

impl Finishable for JointVelocities {
    fn is_finished(&self) -> bool {
        self.motion_finished
    }
    fn set_motion_finished(&mut self, finished: bool) {
        self.motion_finished = finished;
    }
    fn motion_finished(mut self) -> Self {
        self.set_motion_finished(true);
        self
    }
}

impl ConvertMotion for JointVelocities {
    fn convert_motion(
        &self,
        memory: &mut MotionMemory,
        command: &mut MotionGeneratorCommand,
        cutoff_frequency: f64,
        limit_rate: bool,
    ) {
        command.dq_c = self.dq;
        if cutoff_frequency < MAX_CUTOFF_FREQUENCY {
            for i in 0..7 {
                command.dq_c[i] =
                    low_pass_filter(DELTA_T, command.dq_c[i], memory.dq_c[i], cutoff_frequency);
            }
        }
        if limit_rate {
            command.dq_c = limit_rate_joint_velocities(
                &MAX_JOINT_VELOCITY,
                &MAX_JOINT_ACCELERATION,
                &MAX_JOINT_JERK,
                &command.dq_c,
                &memory.dq_c,
                &memory.ddq_c,
            );
        }
        command.dq_c.iter().for_each(|x| assert!(x.is_finite()));
        for i in 0..7 {
            memory.ddq_c[i] = (command.dq_c[i] - memory.dq_c[i]) / DELTA_T;
        }
        memory.dq_c = command.dq_c;
    }
}

impl MotionGeneratorTrait for JointVelocities {
    fn get_motion_generator_mode() -> MoveMotionGeneratorMode {
        MoveMotionGeneratorMode::JointVelocity
    }
}

/// Stores values for Cartesian pose motion generation.
#[derive(Debug, Copy, Clone)]
#[allow(non_snake_case)]
pub struct CartesianPose {
    motion_finished: bool,
    /// Desired end effector pose in base frame, as a 4x4 matrix in
    /// column-major format.
    pub O_T_EE: [f64; 16],
    /// Elbow configuration.
    ///
    /// If `None` the elbow will be controlled by the robot.
    ///
    /// The values of the array are:
    ///  - \[0\] Position of the 3rd joint in \[rad\].
    ///  - \[1\] Sign of the 4th joint. Can be +1 or -1.
    pub elbow: Option<[f64; 2]>,
}

impl From<[f64; 16]> for CartesianPose {
    fn from(array: [f64; 16]) -> Self {
        CartesianPose::new(array, None)
    }
}

impl CartesianPose {
    /// Creates a new CartesianPose instance.
    /// # Arguments
    /// * `cartesian_pose` - Desired end effector pose in base frame, as a
    ///   column-major homogeneous transformation matrix.
    /// * `elbow` - Elbow configuration. See [elbow](`Self::elbow`)
    pub fn new(cartesian_pose: [f64; 16], elbow: Option<[f64; 2]>) -> Self {
        CartesianPose {
            O_T_EE: cartesian_pose,
            motion_finished: false,
            elbow,
        }
    }
    /// Determines whether there is a stored elbow configuration.
    pub fn has_elbow(&self) -> bool {
        self.elbow.is_some()
    }
    /// Asserts that the elbow configuration is valid and finite.
    pub fn check_elbow(elbow: &[f64; 2]) {
        elbow.iter().for_each(|x| assert!(x.is_finite()));
        assert!(CartesianPose::is_valid_elbow(elbow));
    }
    /// Determines whether the given elbow configuration is valid.
    #[allow(clippy::float_cmp)]
    pub fn is_valid_elbow(elbow: &[f64; 2]) -> bool {
        elbow[1].abs() == 1.
    }
}

impl Finishable for CartesianPose {
    fn is_finished(&self) -> bool {
        self.motion_finished
    }
    fn set_motion_finished(&mut self, finished: bool) {
        self.motion_finished = finished;
    }
    fn motion_finished(mut self) -> Self {
        self.set_motion_finished(true);
        self
    }
}

impl ConvertMotion for CartesianPose {
    fn convert_motion(
        &self,
        memory: &mut MotionMemory,
        command: &mut MotionGeneratorCommand,
        cutoff_frequency: f64,
        limit_rate: bool,
    ) {
        command.O_T_EE_c = self.O_T_EE;
        if cutoff_frequency < MAX_CUTOFF_FREQUENCY {
            command.O_T_EE_c = cartesian_low_pass_filter(
                DELTA_T,
                &command.O_T_EE_c,
                &memory.O_T_EE_c,
                cutoff_frequency,
            );
        }
        if limit_rate {
            command.O_T_EE_c = limit_rate_cartesian_pose(
                MAX_TRANSLATIONAL_VELOCITY,
                MAX_TRANSLATIONAL_ACCELERATION,
                MAX_TRANSLATIONAL_JERK,
                MAX_ROTATIONAL_VELOCITY,
                MAX_ROTATIONAL_ACCELERATION,
                MAX_ROTATIONAL_JERK,
                &command.O_T_EE_c,
                &memory.O_T_EE_c,
                &memory.O_dP_EE_c,
                &memory.O_ddP_EE_c,
            );
        }
        check_matrix(&command.O_T_EE_c);
        update_cartesian_memory(memory, &command.O_T_EE_c);

        convert_elbow(
            self.elbow.as_ref(),
            memory,
            command,
            cutoff_frequency,
            limit_rate,
        );
    }
}

impl MotionGeneratorTrait for CartesianPose {
    fn get_motion_generator_mode() -> MoveMotionGeneratorMode {
        MoveMotionGeneratorMode::CartesianPosition
    }
}

/// Stores values for Cartesian velocity motion generation.
#[derive(Debug, Copy, Clone)]
#[allow(non_snake_case)]
pub struct CartesianVelocities {
    motion_finished: bool,
    /// Desired Cartesian velocity w.r.t. the base frame
    /// {dx, dy, dz in \[m/s\], omegax, omegay, omegaz in \[rad/s\]}.
    pub O_dP_EE: [f64; 6],
    /// Elbow configuration, see [`CartesianPose::elbow`].
    pub elbow: Option<[f64; 2]>,
}

impl CartesianVelocities {
    /// Creates a new CartesianVelocities instance.
    /// # Arguments
    /// * `cartesian_velocities` - Desired Cartesian velocity w.r.t. the
    ///   base frame {dx, dy, dz in \[m/s\], omegax, omegay, omegaz in
    ///   \[rad/s\]}.
    /// * `elbow` - Elbow configuration. See [`CartesianPose::elbow`]
    pub fn new(cartesian_velocities: [f64; 6], elbow: Option<[f64; 2]>) -> Self {
        CartesianVelocities {
            O_dP_EE: cartesian_velocities,
            motion_finished: false,
            elbow,
        }
    }
    /// Determines whether there is a stored elbow configuration.
    pub fn has_elbow(&self) -> bool {
        self.elbow.is_some()
    }
}

impl Finishable for CartesianVelocities {
    fn is_finished(&self) -> bool {
        self.motion_finished
    }
    fn set_motion_finished(&mut self, finished: bool) {
        self.motion_finished = finished;
    }
    fn motion_finished(mut self) -> Self {
        self.set_motion_finished(true);
        self
    }
}

impl ConvertMotion for CartesianVelocities {
    fn convert_motion(
        &self,
        memory: &mut MotionMemory,
        command: &mut MotionGeneratorCommand,
        cutoff_frequency: f64,
        limit_rate: bool,
    ) {
        command.O_dP_EE_c = self.O_dP_EE;
        if cutoff_frequency < MAX_CUTOFF_FREQUENCY {
            for i in 0..6 {
                command.O_dP_EE_c[i] = low_pass_filter(
                    DELTA_T,
                    command.O_dP_EE_c[i],
                    memory.O_dP_EE_c[i],
                    cutoff_frequency,
                );
            }
        }
        if limit_rate {
            command.O_dP_EE_c = limit_rate_cartesian_velocity(
                MAX_TRANSLATIONAL_VELOCITY,
                MAX_TRANSLATIONAL_ACCELERATION,
                MAX_TRANSLATIONAL_JERK,
                MAX_ROTATIONAL_VELOCITY,
                MAX_ROTATIONAL_ACCELERATION,
                MAX_ROTATIONAL_JERK,
                &command.O_dP_EE_c,
                &memory.O_dP_EE_c,
                &memory.O_ddP_EE_c,
            );
        }
        command
            .O_dP_EE_c
            .iter()
            .for_each(|x| assert!(x.is_finite()));
        for i in 0..6 {
            memory.O_ddP_EE_c[i] = (command.O_dP_EE_c[i] - memory.O_dP_EE_c[i]) / DELTA_T;
        }
        memory.O_dP_EE_c = command.O_dP_EE_c;

        convert_elbow(
            self.elbow.as_ref(),
            memory,
            command,
            cutoff_frequency,
            limit_rate,
        );
    }
}

impl MotionGeneratorTrait for CartesianVelocities {
    fn get_motion_generator_mode() -> MoveMotionGeneratorMode {
        MoveMotionGeneratorMode::CartesianVelocity
    }
}

fn convert_elbow(
    elbow: Option<&[f64; 2]>,
    memory: &mut MotionMemory,
    command: &mut MotionGeneratorCommand,
    cutoff_frequency: f64,
    limit_rate: bool,
) {
    match elbow {
        Some(elbow) => {
            command.valid_elbow = true;
            command.elbow_c = *elbow;
            if cutoff_frequency < MAX_CUTOFF_FREQUENCY {
                command.elbow_c[0] = low_pass_filter(
                    DELTA_T,
                    command.elbow_c[0],
                    memory.elbow_c[0],
                    cutoff_frequency,
                );
            }
            if limit_rate {
                command.elbow_c[0] = limit_rate_position(
                    MAX_ELBOW_VELOCITY,
                    MAX_ELBOW_ACCELERATION,
                    MAX_ELBOW_JERK,
                    command.elbow_c[0],
                    memory.elbow_c[0],
                    memory.delbow_c,
                    memory.ddelbow_c,
                );
            }
            CartesianPose::check_elbow(&command.elbow_c);
            let velocity = (command.elbow_c[0] - memory.elbow_c[0]) / DELTA_T;
            memory.ddelbow_c = (velocity - memory.delbow_c) / DELTA_T;
            memory.delbow_c = velocity;
            memory.elbow_c = command.elbow_c;
        }
        None => {
            command.valid_elbow = false;
            command.elbow_c = [0.; 2];
        }
    }
}

fn update_cartesian_memory(memory: &mut MotionMemory, commanded_pose: &[f64; 16]) {
    use crate::robot::control_tools::array_to_isometry;
    let commanded = array_to_isometry(commanded_pose);
    let last = array_to_isometry(&memory.O_T_EE_c);
    let translational_velocity =
        (commanded.translation.vector - last.translation.vector) / DELTA_T;
    let rotational_velocity =
        (commanded.rotation * last.rotation.inverse()).scaled_axis() / DELTA_T;
    let twist = [
        translational_velocity[0],
        translational_velocity[1],
        translational_velocity[2],
        rotational_velocity[0],
        rotational_velocity[1],
        rotational_velocity[2],
    ];
    for i in 0..6 {
        memory.O_ddP_EE_c[i] = (twist[i] - memory.O_dP_EE_c[i]) / DELTA_T;
    }
    memory.O_dP_EE_c = twist;
    memory.O_T_EE_c = *commanded_pose;
}

fn check_matrix(transform: &[f64; 16]) {
    transform.iter().for_each(|x| assert!(x.is_finite()));
    assert!(is_homogeneous_transformation(transform));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_finished_flag_round_trip() {
        let positions = JointPositions::new([0.; 7]);
        assert!(!positions.is_finished());
        assert!(positions.motion_finished().is_finished());
    }

    #[test]
    fn joint_positions_pass_through_without_conditioning() {
        let state = RobotState {
            q_d: [0.1; 7],
            ..RobotState::default()
        };
        let mut memory = MotionMemory::new(&state);
        let mut command = crate::robot::types::MotionGeneratorCommand::zero();
        let positions = JointPositions::new([0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1]);
        positions.convert_motion(&mut memory, &mut command, MAX_CUTOFF_FREQUENCY, false);
        assert_eq!(command.q_c, positions.q);
    }

    #[test]
    fn joint_position_jump_is_rate_limited() {
        let state = RobotState::default();
        let mut memory = MotionMemory::new(&state);
        let mut command = crate::robot::types::MotionGeneratorCommand::zero();
        let positions = JointPositions::new([1.; 7]);
        positions.convert_motion(&mut memory, &mut command, MAX_CUTOFF_FREQUENCY, true);
        for value in command.q_c.iter() {
            assert!(*value < 0.01);
        }
    }

    #[test]
    #[should_panic]
    fn invalid_elbow_sign_panics() {
        let state = RobotState::default();
        let mut memory = MotionMemory::new(&state);
        let mut command = crate::robot::types::MotionGeneratorCommand::zero();
        let velocities = CartesianVelocities::new([0.; 6], Some([0.3, 0.5]));
        velocities.convert_motion(&mut memory, &mut command, MAX_CUTOFF_FREQUENCY, false);
    }
}
