// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Tracks the robot-reported motion generator and controller mode.

use crate::robot::types::{ControllerMode, MotionGeneratorMode, RobotStateIntern};

/// What one state sample changed relative to the previous one. The session
/// accumulates these to decide when a pending `Move` or `SetControllerMode`
/// is reflected by the robot.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub(crate) struct ModeTransition {
    pub motion_started: bool,
    pub motion_stopped: bool,
    pub controller_started: bool,
    pub controller_stopped: bool,
}

impl ModeTransition {
    /// Folds the transitions of one more sample into an accumulated record.
    pub fn merge(&mut self, other: ModeTransition) {
        self.motion_started |= other.motion_started;
        self.motion_stopped |= other.motion_stopped;
        self.controller_started |= other.controller_started;
        self.controller_stopped |= other.controller_stopped;
    }
}

/// Consumes every decoded state record and remembers the authoritative mode
/// of the robot. Before the first state arrives both modes are unknown and
/// nothing counts as running.
#[derive(Debug, Default)]
pub(crate) struct ModeTracker {
    motion_generator_mode: Option<MotionGeneratorMode>,
    controller_mode: Option<ControllerMode>,
    message_id: u32,
}

impl ModeTracker {
    pub fn new() -> Self {
        ModeTracker::default()
    }

    /// Records one state sample and reports the mode transitions it caused.
    /// Before the first sample the tracker assumes an idle motion generator
    /// and an internal controller, so the very first state can already
    /// report a start transition.
    pub fn observe(&mut self, state: &RobotStateIntern) -> ModeTransition {
        let previous_motion = self
            .motion_generator_mode
            .unwrap_or(MotionGeneratorMode::Idle);
        let previous_controller = self.controller_mode.unwrap_or(ControllerMode::Other);
        let transition = ModeTransition {
            motion_started: previous_motion == MotionGeneratorMode::Idle
                && state.motion_generator_mode != MotionGeneratorMode::Idle,
            motion_stopped: previous_motion != MotionGeneratorMode::Idle
                && state.motion_generator_mode == MotionGeneratorMode::Idle,
            controller_started: previous_controller != ControllerMode::ExternalController
                && state.controller_mode == ControllerMode::ExternalController,
            controller_stopped: previous_controller == ControllerMode::ExternalController
                && state.controller_mode != ControllerMode::ExternalController,
        };
        self.motion_generator_mode = Some(state.motion_generator_mode);
        self.controller_mode = Some(state.controller_mode);
        self.message_id = state.message_id;
        transition
    }

    /// Id of the most recently observed state. Zero until the first state
    /// arrives; the robot starts counting at one.
    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    /// Whether the last state reported a running motion generator.
    pub fn motion_generator_running(&self) -> bool {
        self.motion_generator_mode
            .map_or(false, |mode| mode != MotionGeneratorMode::Idle)
    }

    /// Whether the last state reported the external controller.
    pub fn controller_running(&self) -> bool {
        self.controller_mode == Some(ControllerMode::ExternalController)
    }
}
