// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Contains everything needed for controlling the robot.

mod control_loop;
mod control_tools;
pub mod control_types;
pub mod low_pass_filter;
mod mode;
mod motion_generator_traits;
pub mod rate_limiting;
#[allow(clippy::module_inception)]
mod robot;
pub(crate) mod robot_impl;
pub mod robot_state;
pub mod service_types;
pub mod types;

pub use robot::Robot;

#[cfg(test)]
mod tests {
    use mockall::automock;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::exception::{ArmException, ControlError, NetworkError, ProtocolError};
    use crate::network::{deserialize, serialize, WireRecord};
    use crate::robot::service_types::{
        ConnectReply, ConnectRequest, ConnectStatus, Function, MoveControllerMode, MoveDeviation,
        MoveMotionGeneratorMode, MoveReply, MoveRequest, MoveStatus, SetControllerModeReply,
        SetControllerModeRequest, SetControllerModeStatus, RI_VERSION,
    };
    use crate::robot::types::{
        ControllerCommand, ControllerMode, MotionGeneratorCommand, MotionGeneratorMode,
        RobotCommand, RobotStateIntern,
    };
    use crate::robot::Robot;
    use crate::{Finishable, JointPositions};

    type StateTemplate = Arc<Mutex<RobotStateIntern>>;
    type CommandLog = Arc<Mutex<Vec<RobotCommand>>>;
    type CommandReaction =
        Box<dyn FnMut(&RobotCommand, &mut RobotStateIntern) -> Option<Vec<u8>> + Send>;

    pub struct ServerReaction {}

    #[automock]
    #[allow(unused)]
    impl ServerReaction {
        fn process_received_bytes(&self, bytes: &mut Vec<u8>) -> Vec<u8> {
            Vec::new()
        }
        fn number_of_reactions(&self) -> usize {
            0
        }
    }

    struct RobotMockServer {
        server_version: u16,
    }

    impl RobotMockServer {
        pub fn new(server_version: u16) -> Self {
            RobotMockServer { server_version }
        }

        /// Accepts one client, answers its handshake, then streams states
        /// from the template at a millisecond cadence while recording every
        /// received command. TCP requests are answered by the scripted
        /// reaction; `on_command` may mutate the template and push
        /// unsolicited TCP frames, like a robot ending a motion.
        pub fn server_thread(
            &mut self,
            port: u16,
            reaction: &mut MockServerReaction,
            states: Option<StateTemplate>,
            command_log: CommandLog,
            mut on_command: Option<CommandReaction>,
            window: Duration,
        ) {
            let address = format!("127.0.0.1:{}", port)
                .to_socket_addrs()
                .unwrap()
                .next()
                .unwrap();
            let listener = TcpListener::bind(address).unwrap();
            let (tcp_socket, _remote_address) = listener.accept().unwrap();
            tcp_socket.set_nodelay(true).unwrap();
            let tcp_socket = Arc::new(Mutex::new(tcp_socket));

            let request = Self::receive_connect_request(&tcp_socket);
            let status = match request.version == self.server_version {
                true => ConnectStatus::Success,
                false => ConnectStatus::IncompatibleLibraryVersion,
            };
            let reply = ConnectReply {
                function: Function::Connect,
                status,
                version: self.server_version,
            };
            tcp_socket
                .lock()
                .unwrap()
                .write_all(&serialize(&reply))
                .unwrap();
            if status != ConnectStatus::Success {
                return;
            }

            let udp_thread = {
                let tcp_for_pushes = tcp_socket.clone();
                let udp_port = request.udp_port;
                let states = states.clone();
                let command_log = command_log.clone();
                thread::spawn(move || {
                    let udp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
                    udp_socket
                        .connect(format!("127.0.0.1:{}", udp_port))
                        .unwrap();
                    udp_socket.set_nonblocking(true).unwrap();
                    let mut counter: u32 = 1;
                    let start = Instant::now();
                    while start.elapsed() < window {
                        if let Some(template) = &states {
                            let mut state = *template.lock().unwrap();
                            state.message_id = counter;
                            counter += 1;
                            let _ = udp_socket.send(&serialize(&state));
                        }
                        let mut buffer = [0_u8; 512];
                        while let Ok(received) = udp_socket.recv(&mut buffer) {
                            assert_eq!(received, RobotCommand::WIRE_SIZE);
                            let command: RobotCommand =
                                deserialize(&buffer[..received]).unwrap();
                            command_log.lock().unwrap().push(command);
                            if let (Some(react), Some(template)) =
                                (on_command.as_mut(), states.as_ref())
                            {
                                let push = {
                                    let mut template = template.lock().unwrap();
                                    react(&command, &mut template)
                                };
                                if let Some(bytes) = push {
                                    tcp_for_pushes
                                        .lock()
                                        .unwrap()
                                        .write_all(&bytes)
                                        .unwrap();
                                }
                            }
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                })
            };

            for _ in 0..reaction.number_of_reactions() {
                self.handle_receive(&tcp_socket, reaction);
            }
            udp_thread.join().unwrap();
        }

        fn handle_receive(
            &self,
            tcp_socket: &Arc<Mutex<TcpStream>>,
            reaction: &mut MockServerReaction,
        ) {
            loop {
                let mut buffer = vec![0_u8; 128];
                let read = {
                    let socket = tcp_socket.lock().unwrap();
                    socket
                        .set_read_timeout(Some(Duration::from_millis(5)))
                        .unwrap();
                    let mut socket = &*socket;
                    match socket.read(&mut buffer) {
                        Ok(n) => n,
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            0
                        }
                        Err(e) => panic!("mock server read failed: {}", e),
                    }
                };
                if read > 0 {
                    buffer.truncate(read);
                    let response = reaction.process_received_bytes(&mut buffer);
                    if !response.is_empty() {
                        tcp_socket.lock().unwrap().write_all(&response).unwrap();
                    }
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn receive_connect_request(tcp_socket: &Arc<Mutex<TcpStream>>) -> ConnectRequest {
            let mut bytes = vec![0_u8; ConnectRequest::WIRE_SIZE];
            let socket = tcp_socket.lock().unwrap();
            let mut socket = &*socket;
            socket.read_exact(&mut bytes).unwrap();
            deserialize(&bytes).unwrap()
        }
    }

    fn template_with(
        motion_generator_mode: MotionGeneratorMode,
        controller_mode: ControllerMode,
    ) -> StateTemplate {
        let mut state = RobotStateIntern::dummy();
        state.motion_generator_mode = motion_generator_mode;
        state.controller_mode = controller_mode;
        Arc::new(Mutex::new(state))
    }

    fn deviation_pair() -> (MoveDeviation, MoveDeviation) {
        (
            MoveDeviation {
                translation: 0.,
                rotation: 1.,
                elbow: 2.,
            },
            MoveDeviation {
                translation: 3.,
                rotation: 4.,
                elbow: 5.,
            },
        )
    }

    fn move_started_reaction(
        expected_controller_mode: MoveControllerMode,
        expected_motion_generator_mode: MoveMotionGeneratorMode,
    ) -> MockServerReaction {
        let mut mock = MockServerReaction::default();
        mock.expect_process_received_bytes()
            .returning(move |bytes: &mut Vec<u8>| -> Vec<u8> {
                assert_eq!(bytes.len(), MoveRequest::WIRE_SIZE);
                let request: MoveRequest = deserialize(bytes).unwrap();
                assert_eq!(request.controller_mode, expected_controller_mode);
                assert_eq!(
                    request.motion_generator_mode,
                    expected_motion_generator_mode
                );
                let (path, goal) = deviation_pair();
                assert_eq!(request.maximum_path_deviation, path);
                assert_eq!(request.maximum_goal_pose_deviation, goal);
                serialize(&MoveReply {
                    function: Function::Move,
                    status: MoveStatus::MotionStarted,
                })
            })
            .times(1);
        mock.expect_number_of_reactions().return_const(1_usize);
        mock
    }

    #[test]
    fn can_receive_robot_state() {
        const PORT: u16 = 4820;
        let template = template_with(MotionGeneratorMode::Idle, ControllerMode::Other);
        template.lock().unwrap().q = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|_bytes| Vec::new());
            mock.expect_number_of_reactions().return_const(0_usize);
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                None,
                Duration::from_millis(300),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            let state = robot.read_once().unwrap();
            assert_eq!(state.q, [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
            assert!(state.message_id > 0);
            assert_eq!(robot.last_state().unwrap().q, state.q);
        }
        thread.join().unwrap();
        assert!(command_log.lock().unwrap().is_empty());
    }

    #[test]
    fn update_times_out_without_states() {
        const PORT: u16 = 4821;
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|_bytes| Vec::new());
            mock.expect_number_of_reactions().return_const(0_usize);
            server.server_thread(
                PORT,
                &mut mock,
                None,
                server_log,
                None,
                Duration::from_millis(500),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new(
                "127.0.0.1",
                Some(PORT),
                Some(Duration::from_millis(200)),
            )
            .expect("connect failure");
            let start = Instant::now();
            match robot.update(None, None) {
                Err(ArmException::Network(NetworkError::Timeout)) => {}
                other => panic!("expected a timeout, got {:?}", other.map(|_| ())),
            }
            assert!(start.elapsed() >= Duration::from_millis(200));
        }
        thread.join().unwrap();
    }

    #[test]
    fn incompatible_version_is_rejected() {
        const PORT: u16 = 4822;
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION + 1);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|_bytes| Vec::new());
            mock.expect_number_of_reactions().return_const(0_usize);
            server.server_thread(
                PORT,
                &mut mock,
                None,
                server_log,
                None,
                Duration::from_millis(100),
            );
        });
        thread::sleep(Duration::from_millis(10));
        let result = Robot::new("127.0.0.1", Some(PORT), None);
        thread.join().unwrap();
        match result {
            Err(ArmException::Protocol(ProtocolError::IncompatibleVersion { remote, local })) => {
                assert_eq!(remote, RI_VERSION + 1);
                assert_eq!(local, RI_VERSION);
            }
            _ => panic!("expected an incompatible version error"),
        }
    }

    #[test]
    fn can_start_motion() {
        const PORT: u16 = 4823;
        let template = template_with(
            MotionGeneratorMode::JointPosition,
            ControllerMode::JointImpedance,
        );
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = move_started_reaction(
                MoveControllerMode::JointImpedance,
                MoveMotionGeneratorMode::JointPosition,
            );
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                None,
                Duration::from_millis(500),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            let (path, goal) = deviation_pair();
            robot
                .start_motion(
                    MoveControllerMode::JointImpedance,
                    MoveMotionGeneratorMode::JointPosition,
                    &path,
                    &goal,
                )
                .unwrap();
            assert!(robot.motion_generator_running());
            assert!(!robot.controller_running());

            let motion = MotionGeneratorCommand::zero();
            let control = ControllerCommand::zero();
            match robot.update(None, Some(&control)) {
                Err(ArmException::Control(ControlError::InvalidOperation { .. })) => {}
                other => panic!("expected an invalid operation, got {:?}", other.map(|_| ())),
            }
            match robot.update(Some(&motion), Some(&control)) {
                Err(ArmException::Control(ControlError::InvalidOperation { .. })) => {}
                other => panic!("expected an invalid operation, got {:?}", other.map(|_| ())),
            }
            robot.update(Some(&motion), None).unwrap();
            robot.update(None, None).unwrap();
        }
        thread.join().unwrap();
        // the two rejected calls must not have produced a datagram
        assert_eq!(command_log.lock().unwrap().len(), 1);
    }

    #[test]
    fn can_start_controller_and_echo_commands() {
        const PORT: u16 = 4824;
        let template = template_with(
            MotionGeneratorMode::Idle,
            ControllerMode::ExternalController,
        );
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|bytes: &mut Vec<u8>| -> Vec<u8> {
                    assert_eq!(bytes.len(), SetControllerModeRequest::WIRE_SIZE);
                    let request: SetControllerModeRequest = deserialize(bytes).unwrap();
                    assert_eq!(request.mode, MoveControllerMode::ExternalController);
                    serialize(&SetControllerModeReply {
                        function: Function::SetControllerMode,
                        status: SetControllerModeStatus::Success,
                    })
                })
                .times(1);
            mock.expect_number_of_reactions().return_const(1_usize);
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                None,
                Duration::from_millis(500),
            );
        });
        let sent_state = {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            robot.start_controller().unwrap();
            assert!(robot.controller_running());
            assert!(!robot.motion_generator_running());

            let motion = MotionGeneratorCommand::zero();
            match robot.update(Some(&motion), None) {
                Err(ArmException::Control(ControlError::InvalidOperation { .. })) => {}
                other => panic!("expected an invalid operation, got {:?}", other.map(|_| ())),
            }
            let control = ControllerCommand {
                tau_J_d: [0.5, -0.5, 1.5, -1.5, 2.5, -2.5, 3.5],
            };
            robot.update(None, Some(&control)).unwrap()
        };
        thread.join().unwrap();
        let log = command_log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].control.tau_J_d, [0.5, -0.5, 1.5, -1.5, 2.5, -2.5, 3.5]);
        assert_eq!(log[0].message_id, sent_state.message_id);
    }

    #[test]
    fn motion_abort_is_reported() {
        const PORT: u16 = 4825;
        let template = template_with(
            MotionGeneratorMode::CartesianVelocity,
            ControllerMode::MotorPd,
        );
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = move_started_reaction(
                MoveControllerMode::MotorPd,
                MoveMotionGeneratorMode::CartesianVelocity,
            );
            let mut commands_seen = 0;
            let on_command: CommandReaction = Box::new(move |_command, template| {
                commands_seen += 1;
                if commands_seen == 2 {
                    template.motion_generator_mode = MotionGeneratorMode::Idle;
                    template.controller_mode = ControllerMode::CartesianImpedance;
                    return Some(serialize(&MoveReply {
                        function: Function::Move,
                        status: MoveStatus::Rejected,
                    }));
                }
                None
            });
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                Some(on_command),
                Duration::from_millis(800),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            let (path, goal) = deviation_pair();
            robot
                .start_motion(
                    MoveControllerMode::MotorPd,
                    MoveMotionGeneratorMode::CartesianVelocity,
                    &path,
                    &goal,
                )
                .unwrap();
            assert!(robot.motion_generator_running());

            let motion = MotionGeneratorCommand::zero();
            let error = (0..200)
                .find_map(|_| robot.update(Some(&motion), None).err())
                .expect("the aborted motion never surfaced");
            match error {
                ArmException::Control(ControlError::MotionAborted {
                    status: MoveStatus::Rejected,
                }) => {}
                other => panic!("expected a motion abort, got {:?}", other),
            }
            assert!(!robot.motion_generator_running());
        }
        thread.join().unwrap();
    }

    #[test]
    fn can_stop_motion_under_external_controller() {
        const PORT: u16 = 4826;
        let template = template_with(
            MotionGeneratorMode::CartesianVelocity,
            ControllerMode::ExternalController,
        );
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = move_started_reaction(
                MoveControllerMode::ExternalController,
                MoveMotionGeneratorMode::CartesianVelocity,
            );
            let on_command: CommandReaction = Box::new(|command, template| {
                if command.motion.motion_generation_finished {
                    template.motion_generator_mode = MotionGeneratorMode::Idle;
                    return Some(serialize(&MoveReply {
                        function: Function::Move,
                        status: MoveStatus::Success,
                    }));
                }
                None
            });
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                Some(on_command),
                Duration::from_millis(800),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            let (path, goal) = deviation_pair();
            robot
                .start_motion(
                    MoveControllerMode::ExternalController,
                    MoveMotionGeneratorMode::CartesianVelocity,
                    &path,
                    &goal,
                )
                .unwrap();
            assert!(robot.motion_generator_running());
            assert!(robot.controller_running());

            let motion = MotionGeneratorCommand::zero();
            let control = ControllerCommand::zero();
            robot.update(Some(&motion), Some(&control)).unwrap();

            robot.stop_motion().unwrap();
            assert!(!robot.motion_generator_running());
            assert!(robot.controller_running());
        }
        thread.join().unwrap();
        let log = command_log.lock().unwrap();
        let finished: Vec<_> = log
            .iter()
            .filter(|command| command.motion.motion_generation_finished)
            .collect();
        assert_eq!(finished.len(), 1);
    }

    #[test]
    fn cannot_start_multiple_motions() {
        const PORT: u16 = 4827;
        let template = template_with(
            MotionGeneratorMode::JointVelocity,
            ControllerMode::JointImpedance,
        );
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = move_started_reaction(
                MoveControllerMode::JointImpedance,
                MoveMotionGeneratorMode::JointVelocity,
            );
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                None,
                Duration::from_millis(400),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            let (path, goal) = deviation_pair();
            robot
                .start_motion(
                    MoveControllerMode::JointImpedance,
                    MoveMotionGeneratorMode::JointVelocity,
                    &path,
                    &goal,
                )
                .unwrap();
            // the reaction script accepts exactly one Move: a second one on
            // the wire would fail the mock expectations
            match robot.start_motion(
                MoveControllerMode::JointPosition,
                MoveMotionGeneratorMode::JointPosition,
                &path,
                &goal,
            ) {
                Err(ArmException::Control(ControlError::AlreadyRunning)) => {}
                _ => panic!("expected an already running error"),
            }
        }
        thread.join().unwrap();
    }

    #[test]
    fn cannot_start_multiple_controllers() {
        const PORT: u16 = 4828;
        let template = template_with(
            MotionGeneratorMode::Idle,
            ControllerMode::ExternalController,
        );
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|bytes: &mut Vec<u8>| -> Vec<u8> {
                    let request: SetControllerModeRequest = deserialize(bytes).unwrap();
                    assert_eq!(request.mode, MoveControllerMode::ExternalController);
                    serialize(&SetControllerModeReply {
                        function: Function::SetControllerMode,
                        status: SetControllerModeStatus::Success,
                    })
                })
                .times(1);
            mock.expect_number_of_reactions().return_const(1_usize);
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                None,
                Duration::from_millis(400),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            robot.start_controller().unwrap();
            match robot.start_controller() {
                Err(ArmException::Control(ControlError::AlreadyRunning)) => {}
                _ => panic!("expected an already running error"),
            }
        }
        thread.join().unwrap();
    }

    #[test]
    fn rejected_move_fails_the_start() {
        const PORT: u16 = 4829;
        let template = template_with(MotionGeneratorMode::Idle, ControllerMode::JointImpedance);
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|bytes: &mut Vec<u8>| -> Vec<u8> {
                    let _request: MoveRequest = deserialize(bytes).unwrap();
                    serialize(&MoveReply {
                        function: Function::Move,
                        status: MoveStatus::Rejected,
                    })
                })
                .times(1);
            mock.expect_number_of_reactions().return_const(1_usize);
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                None,
                Duration::from_millis(400),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            let (path, goal) = deviation_pair();
            match robot.start_motion(
                MoveControllerMode::JointImpedance,
                MoveMotionGeneratorMode::JointPosition,
                &path,
                &goal,
            ) {
                Err(ArmException::Control(ControlError::MotionStartFailed {
                    status: MoveStatus::Rejected,
                })) => {}
                _ => panic!("expected a failed motion start"),
            }
            assert!(!robot.motion_generator_running());
        }
        thread.join().unwrap();
    }

    #[test]
    fn joint_position_control_loop_runs_to_completion() {
        const PORT: u16 = 4830;
        let template = template_with(
            MotionGeneratorMode::JointPosition,
            ControllerMode::JointImpedance,
        );
        let command_log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let server_template = template.clone();
        let server_log = command_log.clone();
        let thread = thread::spawn(move || {
            let mut server = RobotMockServer::new(RI_VERSION);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|bytes: &mut Vec<u8>| -> Vec<u8> {
                    let request: MoveRequest = deserialize(bytes).unwrap();
                    assert_eq!(
                        request.motion_generator_mode,
                        MoveMotionGeneratorMode::JointPosition
                    );
                    assert_eq!(request.controller_mode, MoveControllerMode::JointImpedance);
                    serialize(&MoveReply {
                        function: Function::Move,
                        status: MoveStatus::MotionStarted,
                    })
                })
                .times(1);
            mock.expect_number_of_reactions().return_const(1_usize);
            let on_command: CommandReaction = Box::new(|command, template| {
                if command.motion.motion_generation_finished {
                    template.motion_generator_mode = MotionGeneratorMode::Idle;
                    return Some(serialize(&MoveReply {
                        function: Function::Move,
                        status: MoveStatus::Success,
                    }));
                }
                None
            });
            server.server_thread(
                PORT,
                &mut mock,
                Some(server_template),
                server_log,
                Some(on_command),
                Duration::from_millis(800),
            );
        });
        {
            thread::sleep(Duration::from_millis(10));
            let mut robot = Robot::new("127.0.0.1", Some(PORT), None).expect("connect failure");
            let mut ticks = 0;
            robot
                .control_joint_positions(
                    |state, _period| {
                        ticks += 1;
                        let output = JointPositions::new(state.q_d);
                        if ticks > 3 {
                            return output.motion_finished();
                        }
                        output
                    },
                    None,
                    None,
                    None,
                )
                .unwrap();
            assert!(!robot.motion_generator_running());
        }
        thread.join().unwrap();
        let log = command_log.lock().unwrap();
        assert!(log
            .iter()
            .any(|command| command.motion.motion_generation_finished));
    }
}
