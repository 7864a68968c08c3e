// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! Socket plumbing shared by the command and the state channel.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::mem::take;
use std::net::TcpStream as StdTcpStream;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mio::net::{TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};

use nix::sys::socket::setsockopt;
use nix::sys::socket::sockopt::{KeepAlive, TcpKeepCount, TcpKeepIdle, TcpKeepInterval};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::exception::{ArmResult, NetworkError, ProtocolError};
use crate::robot::service_types::{reply_wire_size, Function};

const CLIENT: Token = Token(1);

/// Granularity of the polling loop inside blocking TCP receives.
const TCP_POLL_SLICE: Duration = Duration::from_millis(10);

/// A fixed-layout record with a declared wire byte count.
///
/// The declared size is the byte count of the bincode little-endian
/// encoding, which for these plain-old-data records is the packed C layout.
/// Decode refuses any buffer that does not have exactly this length.
pub(crate) trait WireRecord {
    const WIRE_SIZE: usize;
}

/// Owns the two sockets of a session: the reliable TCP command channel and
/// the unreliable 1 kHz UDP state/command channel.
///
/// TCP frames carry no length field. The reader peeks the four-byte
/// [`Function`] tag, looks up the reply size for that tag and buffers until
/// the full record is available, then files it into the per-tag registry.
/// This is what allows an unsolicited terminal `Move` reply to interleave
/// with the reply to another request.
pub(crate) struct Network {
    tcp_socket: TcpStream,
    udp_socket: UdpSocket,
    udp_server_address: Option<SocketAddr>,
    udp_port: u16,
    pending_reply: Vec<u8>,
    pending_function: Option<Function>,
    received_replies: Mutex<HashMap<Function, VecDeque<Vec<u8>>>>,
    // reused by the tick path so that steady-state operation stays
    // allocation-free
    udp_receive_scratch: Vec<u8>,
    udp_send_scratch: Vec<u8>,
    poll_tcp: Poll,
    events_tcp: Events,
    poll_udp: Poll,
    events_udp: Events,
}

impl Network {
    /// Connects to the robot's command port and binds the local UDP socket
    /// on an ephemeral port.
    pub fn new(robot_address: &str, robot_port: u16) -> ArmResult<Network> {
        let address_str = format!("{}:{}", robot_address, robot_port);
        let sock_address = address_str
            .to_socket_addrs()
            .map_err(|e| NetworkError::Unreachable { source: e })?
            .next()
            .ok_or_else(|| NetworkError::Unreachable {
                source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"),
            })?;
        let std_tcp_socket = StdTcpStream::connect(sock_address)
            .map_err(|e| NetworkError::Unreachable { source: e })?;
        std_tcp_socket
            .set_nonblocking(true)
            .map_err(|e| NetworkError::Unreachable { source: e })?;
        let mut tcp_socket = TcpStream::from_std(std_tcp_socket);
        let fd = tcp_socket.as_raw_fd();

        setsockopt(fd, KeepAlive, &true).map_err(into_io_unreachable)?;
        setsockopt(fd, TcpKeepIdle, &1).map_err(into_io_unreachable)?;
        setsockopt(fd, TcpKeepCount, &3).map_err(into_io_unreachable)?;
        setsockopt(fd, TcpKeepInterval, &1).map_err(into_io_unreachable)?;

        let ip_addr = IpAddr::from_str("0.0.0.0").unwrap();
        let mut udp_socket = UdpSocket::bind(SocketAddr::new(ip_addr, 0))
            .map_err(|e| NetworkError::BindFailed { source: e })?;
        let udp_port = udp_socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed { source: e })?
            .port();

        let poll_tcp = Poll::new().map_err(|e| NetworkError::Unreachable { source: e })?;
        poll_tcp
            .registry()
            .register(&mut tcp_socket, CLIENT, Interest::READABLE)
            .map_err(|e| NetworkError::Unreachable { source: e })?;
        let poll_udp = Poll::new().map_err(|e| NetworkError::Unreachable { source: e })?;
        poll_udp
            .registry()
            .register(&mut udp_socket, CLIENT, Interest::READABLE)
            .map_err(|e| NetworkError::Unreachable { source: e })?;

        Ok(Network {
            tcp_socket,
            udp_socket,
            udp_server_address: None,
            udp_port,
            pending_reply: Vec::new(),
            pending_function: None,
            received_replies: Mutex::new(HashMap::new()),
            udp_receive_scratch: Vec::new(),
            udp_send_scratch: Vec::new(),
            poll_tcp,
            events_tcp: Events::with_capacity(128),
            poll_udp,
            events_udp: Events::with_capacity(1),
        })
    }

    pub fn get_udp_port(&self) -> u16 {
        self.udp_port
    }

    /// Sends one request record. Partial writes are retried until the whole
    /// record is on the wire or the socket fails.
    pub fn tcp_send_request<T: Serialize + WireRecord>(&mut self, request: &T) -> ArmResult<()> {
        let bytes = serialize(request);
        let mut written = 0;
        while written < bytes.len() {
            match self.tcp_socket.write(&bytes[written..]) {
                Ok(0) => return Err(NetworkError::Closed.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(tcp_io_error(e).into()),
            }
        }
        Ok(())
    }

    /// Tries to take a reply for the given function tag without blocking.
    pub fn tcp_receive_response<T: DeserializeOwned + WireRecord>(
        &mut self,
        function: Function,
    ) -> ArmResult<Option<T>> {
        self.tcp_read_from_buffer(Duration::ZERO)?;
        let frame = self
            .received_replies
            .lock()
            .unwrap()
            .get_mut(&function)
            .and_then(VecDeque::pop_front);
        match frame {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Blocks until a reply for the given function tag has been received or
    /// the deadline expires.
    pub fn tcp_blocking_receive<T: DeserializeOwned + WireRecord>(
        &mut self,
        function: Function,
        timeout: Duration,
    ) -> ArmResult<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(reply) = self.tcp_receive_response(function)? {
                return Ok(reply);
            }
            if Instant::now() >= deadline {
                return Err(ProtocolError::Timeout { function }.into());
            }
            self.tcp_read_from_buffer(TCP_POLL_SLICE)?;
        }
    }

    /// Drains whatever the command socket has buffered into the per-tag
    /// registry. Returns without error when nothing (more) is available.
    fn tcp_read_from_buffer(&mut self, timeout: Duration) -> ArmResult<()> {
        self.poll_tcp
            .poll(&mut self.events_tcp, Some(timeout))
            .map_err(|e| NetworkError::Unreachable { source: e })?;
        loop {
            if self.pending_function.is_none() {
                let mut tag_bytes = [0_u8; 4];
                let available = match self.tcp_socket.peek(&mut tag_bytes) {
                    Ok(0) => return Err(NetworkError::Closed.into()),
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(tcp_io_error(e).into()),
                };
                if available < tag_bytes.len() {
                    return Ok(());
                }
                self.tcp_socket
                    .read_exact(&mut tag_bytes)
                    .map_err(tcp_io_error)?;
                let function: Function = deserialize(&tag_bytes)?;
                self.pending_reply.clear();
                self.pending_reply.extend_from_slice(&tag_bytes);
                self.pending_function = Some(function);
            }
            let function = self.pending_function.unwrap();
            let expected = reply_wire_size(function);
            while self.pending_reply.len() < expected {
                let mut chunk = vec![0_u8; expected - self.pending_reply.len()];
                match self.tcp_socket.read(&mut chunk) {
                    Ok(0) => return Err(NetworkError::Closed.into()),
                    Ok(n) => self.pending_reply.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(tcp_io_error(e).into()),
                }
            }
            let frame = take(&mut self.pending_reply);
            self.pending_function = None;
            self.received_replies
                .lock()
                .unwrap()
                .entry(function)
                .or_default()
                .push_back(frame);
        }
    }

    /// Tries to take one queued state datagram without blocking.
    pub fn udp_receive<T: DeserializeOwned + WireRecord>(&mut self) -> ArmResult<Option<T>> {
        self.udp_receive_scratch.resize(T::WIRE_SIZE, 0);
        match self.udp_socket.recv_from(&mut self.udp_receive_scratch) {
            Ok((read_bytes, address)) => {
                self.udp_server_address = Some(address);
                if read_bytes != T::WIRE_SIZE {
                    return Err(ProtocolError::BadLength {
                        expected: T::WIRE_SIZE,
                        got: read_bytes,
                    }
                    .into());
                }
                Ok(Some(deserialize(&self.udp_receive_scratch)?))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(NetworkError::Unreachable { source: e }.into()),
        }
    }

    /// Blocks until a state datagram arrives or the timeout expires. If
    /// several datagrams are queued, all are read and the most recent one is
    /// returned: freshness beats completeness on a 1 kHz feed.
    pub fn udp_blocking_receive<T: DeserializeOwned + WireRecord>(
        &mut self,
        timeout: Duration,
    ) -> ArmResult<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(NetworkError::Timeout.into());
            }
            self.poll_udp
                .poll(&mut self.events_udp, Some(deadline - now))
                .map_err(|e| NetworkError::Unreachable { source: e })?;
            let mut latest: Option<T> = None;
            while let Some(record) = self.udp_receive()? {
                latest = Some(record);
            }
            if let Some(record) = latest {
                return Ok(record);
            }
        }
    }

    /// Sends one command datagram. A would-block is treated as a drop: the
    /// robot expects at most one command per tick, so a retry would arrive
    /// too late to be meaningful.
    pub fn udp_send<T: Serialize + WireRecord>(&mut self, data: &T) -> ArmResult<()> {
        let address = self
            .udp_server_address
            .ok_or_else(|| NetworkError::Unreachable {
                source: io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no robot state received yet",
                ),
            })?;
        self.udp_send_scratch.clear();
        bincode::serialize_into(&mut self.udp_send_scratch, data).unwrap();
        match self.udp_socket.send_to(&self.udp_send_scratch, address) {
            Ok(sent) if sent == T::WIRE_SIZE => Ok(()),
            Ok(sent) => Err(ProtocolError::BadLength {
                expected: T::WIRE_SIZE,
                got: sent,
            }
            .into()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(NetworkError::Unreachable { source: e }.into()),
        }
    }
}

fn tcp_io_error(e: io::Error) -> NetworkError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => NetworkError::Closed,
        _ => NetworkError::Unreachable { source: e },
    }
}

fn into_io_unreachable(e: nix::Error) -> NetworkError {
    NetworkError::Unreachable {
        source: io::Error::from_raw_os_error(e as i32),
    }
}

pub(crate) fn serialize<T: Serialize>(record: &T) -> Vec<u8> {
    bincode::serialize(record).unwrap()
}

pub(crate) fn deserialize<T: DeserializeOwned + WireRecord>(encoded: &[u8]) -> ArmResult<T> {
    if encoded.len() != T::WIRE_SIZE {
        return Err(ProtocolError::BadLength {
            expected: T::WIRE_SIZE,
            got: encoded.len(),
        }
        .into());
    }
    bincode::deserialize(encoded).map_err(|_| {
        ProtocolError::BadEnum {
            record: std::any::type_name::<T>(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use crate::exception::{ArmException, ProtocolError};
    use crate::network::{deserialize, serialize, WireRecord};
    use crate::robot::service_types::{
        ConnectReply, ConnectRequest, MoveDeviation, MoveControllerMode, MoveMotionGeneratorMode,
        MoveReply, MoveRequest, SetControllerModeReply, SetControllerModeRequest, StopMoveReply,
        StopMoveRequest,
    };
    use crate::robot::types::{RobotCommand, RobotStateIntern};

    fn wire_size_matches<T: serde::Serialize + WireRecord>(record: &T) {
        assert_eq!(
            bincode::serialized_size(record).unwrap() as usize,
            T::WIRE_SIZE
        );
    }

    #[test]
    fn declared_wire_sizes_match_encoding() {
        wire_size_matches(&crate::robot::service_types::Function::Connect);
        wire_size_matches(&RobotStateIntern::dummy());
        wire_size_matches(&RobotCommand {
            message_id: 0,
            motion: crate::robot::types::MotionGeneratorCommand::zero(),
            control: crate::robot::types::ControllerCommand::zero(),
        });
        wire_size_matches(&ConnectRequest::new(4712));
        wire_size_matches(&ConnectReply {
            function: crate::robot::service_types::Function::Connect,
            status: crate::robot::service_types::ConnectStatus::Success,
            version: 1,
        });
        wire_size_matches(&MoveRequest::new(
            MoveControllerMode::JointImpedance,
            MoveMotionGeneratorMode::JointPosition,
            MoveDeviation {
                translation: 1.,
                rotation: 2.,
                elbow: 3.,
            },
            MoveDeviation {
                translation: 4.,
                rotation: 5.,
                elbow: 6.,
            },
        ));
        wire_size_matches(&MoveReply {
            function: crate::robot::service_types::Function::Move,
            status: crate::robot::service_types::MoveStatus::Success,
        });
        wire_size_matches(&StopMoveRequest::new());
        wire_size_matches(&StopMoveReply {
            function: crate::robot::service_types::Function::StopMove,
            status: crate::robot::service_types::StopMoveStatus::Success,
        });
        wire_size_matches(&SetControllerModeRequest::new(
            MoveControllerMode::ExternalController,
        ));
        wire_size_matches(&SetControllerModeReply {
            function: crate::robot::service_types::Function::SetControllerMode,
            status: crate::robot::service_types::SetControllerModeStatus::Success,
        });
    }

    #[test]
    fn can_serialize_and_deserialize() {
        let mut state = RobotStateIntern::dummy();
        state.message_id = 539;
        state.q = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        state.O_T_EE_start[5] = -2.25;
        let state2: RobotStateIntern = deserialize(&serialize(&state)).unwrap();
        assert_eq!(state, state2);
    }

    #[test]
    fn deserialize_rejects_wrong_length() {
        let bytes = serialize(&RobotStateIntern::dummy());
        let result: Result<RobotStateIntern, _> = deserialize(&bytes[..bytes.len() - 1]);
        match result {
            Err(ArmException::Protocol(ProtocolError::BadLength { expected, got })) => {
                assert_eq!(expected, RobotStateIntern::WIRE_SIZE);
                assert_eq!(got, RobotStateIntern::WIRE_SIZE - 1);
            }
            _ => panic!("expected a length error"),
        }
    }

    #[test]
    fn deserialize_rejects_unknown_enum_value() {
        let mut bytes = serialize(&RobotStateIntern::dummy());
        // motion_generator_mode is the fifth byte on the wire
        bytes[4] = 0xff;
        let result: Result<RobotStateIntern, _> = deserialize(&bytes);
        match result {
            Err(ArmException::Protocol(ProtocolError::BadEnum { .. })) => {}
            _ => panic!("expected an enum error"),
        }
    }
}
