// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! The session core: handshake, the one-tick update cycle and the
//! command-plane coordination for motions and controllers.

use std::time::{Duration, Instant};

use crate::exception::{ArmResult, ControlError, NetworkError, ProtocolError};
use crate::network::Network;
use crate::robot::mode::{ModeTracker, ModeTransition};
use crate::robot::robot_state::RobotState;
use crate::robot::service_types::{
    ConnectReply, ConnectRequest, ConnectStatus, Function, MoveControllerMode, MoveDeviation,
    MoveMotionGeneratorMode, MoveReply, MoveRequest, MoveStatus, SetControllerModeReply,
    SetControllerModeRequest, SetControllerModeStatus, StopMoveReply, StopMoveRequest, RI_VERSION,
};
use crate::robot::types::{
    ControllerCommand, ControllerMode, MotionGeneratorCommand, MotionGeneratorMode, RobotCommand,
    RobotStateIntern,
};

/// Deadline applied to every blocking receive and synchronous command when
/// the user does not configure one.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(1);

/// One live connection to a robot, together with all in-flight protocol
/// state. All operations run on the caller's thread; the only suspension
/// points are the bounded UDP receive of a tick and the blocking TCP reads
/// inside the synchronous command calls.
pub(crate) struct RobotImpl {
    pub network: Network,
    mode: ModeTracker,
    /// Mode transitions observed on the state stream since the in-flight
    /// command-plane operation started; they decide when that operation is
    /// reflected by the robot.
    observed_transitions: ModeTransition,
    network_timeout: Duration,
    ri_version: u16,
    /// Motion generator mode requested by the running `Move`, `Idle` while
    /// no motion is in flight.
    move_motion_generator_mode: MotionGeneratorMode,
    /// Controller mode requested by the running `Move`.
    move_controller_mode: Option<ControllerMode>,
    /// Whether the external controller is active for this session. Survives
    /// the end of a motion; only `stop_controller` clears it.
    external_controller: bool,
    /// Set once a command with `motion_generation_finished` went out. From
    /// then on no further motion bytes are emitted for this motion.
    motion_finished_sent: bool,
    /// A terminal `Move` success that arrived before the state stream
    /// reported idle. Held until the second signal is observed.
    deferred_move_status: Option<MoveStatus>,
    last_motion_command: Option<MotionGeneratorCommand>,
    last_state: Option<RobotState>,
}

impl RobotImpl {
    /// Performs the version handshake and returns a live session.
    pub fn new(address: &str, port: u16, network_timeout: Duration) -> ArmResult<Self> {
        let mut network = Network::new(address, port)?;
        let udp_port = network.get_udp_port();
        network.tcp_send_request(&ConnectRequest::new(udp_port))?;
        let reply: ConnectReply = network.tcp_blocking_receive(Function::Connect, network_timeout)?;
        match reply.status {
            ConnectStatus::Success => {}
            ConnectStatus::IncompatibleLibraryVersion => {
                return Err(ProtocolError::IncompatibleVersion {
                    remote: reply.version,
                    local: RI_VERSION,
                }
                .into());
            }
        }
        Ok(RobotImpl {
            network,
            mode: ModeTracker::new(),
            observed_transitions: ModeTransition::default(),
            network_timeout,
            ri_version: reply.version,
            move_motion_generator_mode: MotionGeneratorMode::Idle,
            move_controller_mode: None,
            external_controller: false,
            motion_finished_sent: false,
            deferred_move_status: None,
            last_motion_command: None,
            last_state: None,
        })
    }

    pub fn server_version(&self) -> u16 {
        self.ri_version
    }

    /// Whether the most recent state reported a running motion generator.
    pub fn motion_generator_running(&self) -> bool {
        self.mode.motion_generator_running()
    }

    /// Whether the most recent state reported the external controller.
    pub fn controller_running(&self) -> bool {
        self.mode.controller_running()
    }

    pub fn last_state(&self) -> Option<&RobotState> {
        self.last_state.as_ref()
    }

    /// One tick: receive the freshest state, validate the supplied command
    /// parts, drain asynchronous command replies, then answer the state
    /// with at most one command datagram carrying its `message_id`.
    pub fn update(
        &mut self,
        motion_command: Option<&MotionGeneratorCommand>,
        control_command: Option<&ControllerCommand>,
    ) -> ArmResult<RobotState> {
        let state = self.receive_robot_state()?;
        self.check_command_shape(motion_command, control_command)?;
        self.process_async_replies()?;
        self.send_robot_command(motion_command, control_command)?;
        let state = RobotState::from(state);
        self.last_state = Some(state.clone());
        Ok(state)
    }

    /// Waits for one state sample that is fresher than everything received
    /// so far and returns it without commanding anything.
    pub fn read_once(&mut self) -> ArmResult<RobotState> {
        while self.network.udp_receive::<RobotStateIntern>()?.is_some() {}
        let state = RobotState::from(self.receive_robot_state()?);
        self.last_state = Some(state.clone());
        Ok(state)
    }

    /// Starts a motion generator, optionally together with the external
    /// controller, and returns once the robot both acknowledged the `Move`
    /// and reports the requested modes on the state stream.
    pub fn start_motion(
        &mut self,
        controller_mode: MoveControllerMode,
        motion_generator_mode: MoveMotionGeneratorMode,
        maximum_path_deviation: &MoveDeviation,
        maximum_goal_pose_deviation: &MoveDeviation,
    ) -> ArmResult<()> {
        if self.move_motion_generator_mode != MotionGeneratorMode::Idle
            || self.external_controller
            || self.mode.motion_generator_running()
            || self.mode.controller_running()
        {
            return Err(ControlError::AlreadyRunning.into());
        }
        self.move_motion_generator_mode = motion_generator_mode.into();
        self.move_controller_mode = Some(controller_mode.into());
        self.observed_transitions = ModeTransition::default();

        let request = MoveRequest::new(
            controller_mode,
            motion_generator_mode,
            *maximum_path_deviation,
            *maximum_goal_pose_deviation,
        );
        if let Err(error) = self.network.tcp_send_request(&request) {
            self.reset_motion_state();
            return Err(error);
        }
        let reply: MoveReply = match self
            .network
            .tcp_blocking_receive(Function::Move, self.network_timeout)
        {
            Ok(reply) => reply,
            Err(error) => {
                self.reset_motion_state();
                return Err(error);
            }
        };
        if reply.status != MoveStatus::MotionStarted {
            self.reset_motion_state();
            return Err(ControlError::MotionStartFailed {
                status: reply.status,
            }
            .into());
        }

        let deadline = Instant::now() + self.network_timeout;
        while !self.observed_transitions.motion_started
            || (controller_mode == MoveControllerMode::ExternalController
                && !self.observed_transitions.controller_started)
        {
            if Instant::now() >= deadline {
                self.reset_motion_state();
                return Err(ProtocolError::Timeout {
                    function: Function::Move,
                }
                .into());
            }
            if let Err(error) = self.update(None, None) {
                self.reset_motion_state();
                return Err(error);
            }
        }
        if controller_mode == MoveControllerMode::ExternalController {
            self.external_controller = true;
        }
        Ok(())
    }

    /// Stops the running motion: emits one final command with
    /// `motion_generation_finished`, then polls until the robot reports an
    /// idle motion generator and the deferred terminal `Move` reply has
    /// arrived. The external controller, if any, keeps running.
    pub fn stop_motion(&mut self) -> ArmResult<()> {
        self.finish_motion(None, None)
    }

    /// Like [`stop_motion`](`Self::stop_motion`), but finishing with the
    /// caller's last commands instead of the remembered ones.
    pub fn finish_motion(
        &mut self,
        motion_command: Option<&MotionGeneratorCommand>,
        control_command: Option<&ControllerCommand>,
    ) -> ArmResult<()> {
        if self.move_motion_generator_mode == MotionGeneratorMode::Idle {
            return Err(ControlError::NotRunning.into());
        }
        if !self.motion_finished_sent {
            let mut finished = motion_command
                .copied()
                .or(self.last_motion_command)
                .unwrap_or_else(MotionGeneratorCommand::zero);
            finished.motion_generation_finished = true;
            let control = if self.external_controller {
                Some(control_command.copied().unwrap_or_else(ControllerCommand::zero))
            } else {
                None
            };
            if let Err(error) = self.update(Some(&finished), control.as_ref()) {
                self.reset_motion_state();
                return Err(error);
            }
        }

        // the motion only concludes once the state stream has reported the
        // stop transition and the terminal reply is in, in either order
        let deadline = Instant::now() + self.network_timeout;
        while !self.observed_transitions.motion_stopped {
            if Instant::now() >= deadline {
                self.reset_motion_state();
                return Err(ProtocolError::Timeout {
                    function: Function::Move,
                }
                .into());
            }
            if let Err(error) = self.update(None, None) {
                self.reset_motion_state();
                return Err(error);
            }
        }
        let status = match self.deferred_move_status.take() {
            Some(status) => status,
            None => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self
                    .network
                    .tcp_blocking_receive::<MoveReply>(Function::Move, remaining)
                {
                    Ok(reply) => reply.status,
                    Err(error) => {
                        self.reset_motion_state();
                        return Err(error);
                    }
                }
            }
        };
        self.reset_motion_state();
        if status != MoveStatus::Success {
            return Err(ControlError::MotionAborted { status }.into());
        }
        Ok(())
    }

    /// Best-effort shutdown of a motion after an error: issues `StopMove`,
    /// drains states until the robot is idle and swallows the stale replies.
    /// The session is already unwinding, so failures here are ignored.
    pub fn cancel_motion(&mut self) {
        if self.move_motion_generator_mode == MotionGeneratorMode::Idle {
            return;
        }
        let _ = self.network.tcp_send_request(&StopMoveRequest::new());
        let deadline = Instant::now() + self.network_timeout;
        while self.mode.motion_generator_running() && Instant::now() < deadline {
            if self.receive_robot_state().is_err() {
                break;
            }
        }
        let _ = self
            .network
            .tcp_receive_response::<StopMoveReply>(Function::StopMove);
        let _ = self.network.tcp_receive_response::<MoveReply>(Function::Move);
        self.reset_motion_state();
    }

    /// Switches the robot to the external controller and returns once the
    /// state stream confirms it.
    pub fn start_controller(&mut self) -> ArmResult<()> {
        if self.external_controller
            || self.mode.controller_running()
            || self.move_motion_generator_mode != MotionGeneratorMode::Idle
            || self.mode.motion_generator_running()
        {
            return Err(ControlError::AlreadyRunning.into());
        }
        self.observed_transitions = ModeTransition::default();
        self.set_controller_mode(MoveControllerMode::ExternalController)?;
        let deadline = Instant::now() + self.network_timeout;
        while !self.observed_transitions.controller_started {
            if Instant::now() >= deadline {
                return Err(ProtocolError::Timeout {
                    function: Function::SetControllerMode,
                }
                .into());
            }
            self.update(None, None)?;
        }
        self.external_controller = true;
        Ok(())
    }

    /// Switches the robot back to the internal default controller and
    /// returns once the state stream confirms it.
    pub fn stop_controller(&mut self) -> ArmResult<()> {
        if !self.external_controller {
            return Err(ControlError::NotRunning.into());
        }
        if self.move_motion_generator_mode != MotionGeneratorMode::Idle {
            return Err(ControlError::InvalidOperation {
                message: "cannot stop the controller while a motion is running",
            }
            .into());
        }
        self.observed_transitions = ModeTransition::default();
        self.set_controller_mode(MoveControllerMode::JointImpedance)?;
        let deadline = Instant::now() + self.network_timeout;
        while !self.observed_transitions.controller_stopped {
            if Instant::now() >= deadline {
                return Err(ProtocolError::Timeout {
                    function: Function::SetControllerMode,
                }
                .into());
            }
            self.update(None, None)?;
        }
        self.external_controller = false;
        Ok(())
    }

    /// Raises an error when the state stream no longer matches the running
    /// motion; the terminal `Move` reply then carries the reason.
    pub fn throw_on_motion_error(&mut self, state: &RobotState) -> ArmResult<()> {
        if self.move_motion_generator_mode == MotionGeneratorMode::Idle {
            return Ok(());
        }
        if state.motion_generator_mode != self.move_motion_generator_mode
            || Some(state.controller_mode) != self.move_controller_mode
        {
            let reply: MoveReply = self
                .network
                .tcp_blocking_receive(Function::Move, self.network_timeout)?;
            self.reset_motion_state();
            return Err(ControlError::MotionAborted {
                status: reply.status,
            }
            .into());
        }
        Ok(())
    }

    /// Takes the freshest queued state, or blocks until a state newer than
    /// everything seen so far arrives. Older queued datagrams are discarded.
    fn receive_robot_state(&mut self) -> ArmResult<RobotStateIntern> {
        let mut latest: Option<RobotStateIntern> = None;
        while let Some(state) = self.network.udp_receive::<RobotStateIntern>()? {
            let newest_so_far = latest.map_or(self.mode.message_id(), |s| s.message_id);
            if state.message_id > newest_so_far {
                latest = Some(state);
            }
        }
        let deadline = Instant::now() + self.network_timeout;
        let state = loop {
            if let Some(state) = latest {
                break state;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(NetworkError::Timeout.into());
            }
            let state = self
                .network
                .udp_blocking_receive::<RobotStateIntern>(deadline - now)?;
            if state.message_id > self.mode.message_id() {
                latest = Some(state);
            }
        };
        let transition = self.mode.observe(&state);
        self.observed_transitions.merge(transition);
        Ok(state)
    }

    /// Rejects command parts that do not match what is running. A call with
    /// neither part is a pure state poll and always allowed.
    fn check_command_shape(
        &self,
        motion_command: Option<&MotionGeneratorCommand>,
        control_command: Option<&ControllerCommand>,
    ) -> ArmResult<()> {
        if motion_command.is_none() && control_command.is_none() {
            return Ok(());
        }
        let motion_active = self.move_motion_generator_mode != MotionGeneratorMode::Idle;
        if motion_command.is_some() && !motion_active {
            return Err(ControlError::InvalidOperation {
                message: "no motion generator running",
            }
            .into());
        }
        if motion_command.is_some() && self.motion_finished_sent {
            return Err(ControlError::InvalidOperation {
                message: "motion is already finishing",
            }
            .into());
        }
        if control_command.is_some() && !self.external_controller {
            return Err(ControlError::InvalidOperation {
                message: "no external controller running",
            }
            .into());
        }
        if motion_active
            && self.external_controller
            && (motion_command.is_none() || control_command.is_none())
        {
            return Err(ControlError::InvalidOperation {
                message: "motion and controller command must both be given",
            }
            .into());
        }
        Ok(())
    }

    /// Routes an asynchronous terminal `Move` reply. A failure status aborts
    /// the tick; a success is held until the state stream reports idle.
    fn process_async_replies(&mut self) -> ArmResult<()> {
        if self.move_motion_generator_mode == MotionGeneratorMode::Idle
            || self.deferred_move_status.is_some()
        {
            return Ok(());
        }
        if let Some(reply) = self.network.tcp_receive_response::<MoveReply>(Function::Move)? {
            if reply.status == MoveStatus::Success && self.motion_finished_sent {
                self.deferred_move_status = Some(reply.status);
            } else {
                self.reset_motion_state();
                return Err(ControlError::MotionAborted {
                    status: reply.status,
                }
                .into());
            }
        }
        Ok(())
    }

    fn send_robot_command(
        &mut self,
        motion_command: Option<&MotionGeneratorCommand>,
        control_command: Option<&ControllerCommand>,
    ) -> ArmResult<()> {
        if motion_command.is_none() && control_command.is_none() {
            return Ok(());
        }
        let command = RobotCommand {
            message_id: self.mode.message_id(),
            motion: motion_command
                .copied()
                .unwrap_or_else(MotionGeneratorCommand::zero),
            control: control_command.copied().unwrap_or_else(ControllerCommand::zero),
        };
        self.network.udp_send(&command)?;
        if let Some(motion) = motion_command {
            self.last_motion_command = Some(*motion);
            if motion.motion_generation_finished {
                self.motion_finished_sent = true;
            }
        }
        Ok(())
    }

    fn set_controller_mode(&mut self, mode: MoveControllerMode) -> ArmResult<()> {
        self.network
            .tcp_send_request(&SetControllerModeRequest::new(mode))?;
        let reply: SetControllerModeReply = self
            .network
            .tcp_blocking_receive(Function::SetControllerMode, self.network_timeout)?;
        if reply.status != SetControllerModeStatus::Success {
            return Err(ControlError::ControllerChangeFailed {
                status: reply.status,
            }
            .into());
        }
        Ok(())
    }

    fn reset_motion_state(&mut self) {
        self.move_motion_generator_mode = MotionGeneratorMode::Idle;
        self.move_controller_mode = None;
        self.motion_finished_sent = false;
        self.deferred_move_status = None;
        self.last_motion_command = None;
        self.observed_transitions = ModeTransition::default();
    }
}

impl Drop for RobotImpl {
    fn drop(&mut self) {
        if self.move_motion_generator_mode != MotionGeneratorMode::Idle {
            let _ = self.network.tcp_send_request(&StopMoveRequest::new());
        }
    }
}
