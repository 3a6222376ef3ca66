//! Synchronous command channel to a target driver process.
//!
//! One `CommandChannelClient` owns one TCP connection to a driver's command
//! port. Traffic is strictly request/response: the caller blocks until the
//! driver answers on the same connection, and requests on one channel are
//! never pipelined. `&mut self` on [`CommandChannelClient::send`] is the
//! per-client exclusive lock; mirrors that share a connection hold it as a
//! [`SharedChannel`] and serialize through the mutex.

use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tether_common::proto::{self, Bits, DriverKind, Request, Response, ResponseCode};
use tether_common::{TetherError, TetherResult};
use tracing::{debug, warn};

/// A command channel shared between mirrors.
///
/// The registry entry that created the channel decides when it closes; the
/// `Arc` keeps it alive while any mirror still references it, and the mutex
/// keeps requests on it single-file.
pub type SharedChannel = Arc<Mutex<CommandChannelClient>>;

/// One TCP connection to a driver process's command port.
pub struct CommandChannelClient {
    stream: TcpStream,
    endpoint: String,
    callback_port: Option<u16>,
}

impl CommandChannelClient {
    /// Establish a command connection to `host:command_port`.
    ///
    /// If `callback_port` is given, it is transmitted to the driver before
    /// this returns, so the driver knows where to deliver asynchronous
    /// results.
    ///
    /// # Errors
    /// `Connection` if the command port is unreachable; `RemoteOperation`
    /// if the driver refuses the callback port registration.
    pub fn connect(
        host: &str,
        command_port: u16,
        callback_port: Option<u16>,
    ) -> TetherResult<Self> {
        let endpoint = format!("{host}:{command_port}");
        let stream = TcpStream::connect(&endpoint).map_err(|source| TetherError::Connection {
            endpoint: endpoint.clone(),
            source,
        })?;
        // Small request/response frames; latency matters more than batching.
        let _ = stream.set_nodelay(true);
        debug!("command channel connected to {endpoint}");

        let mut client = Self {
            stream,
            endpoint,
            callback_port,
        };
        if let Some(port) = callback_port {
            client.send(&Request::SetCallbackPort { port })?;
            debug!("driver informed of callback port {port}");
        }
        Ok(client)
    }

    /// Like [`connect`](Self::connect), wrapped for sharing between mirrors.
    pub fn connect_shared(
        host: &str,
        command_port: u16,
        callback_port: Option<u16>,
    ) -> TetherResult<SharedChannel> {
        Ok(Arc::new(Mutex::new(Self::connect(
            host,
            command_port,
            callback_port,
        )?)))
    }

    /// Write one request and block for exactly one response.
    ///
    /// No interpretation of the response code; callers that treat a failure
    /// verdict as an expected outcome (driver launching) use this directly.
    pub fn exchange(&mut self, request: &Request) -> TetherResult<Response> {
        proto::write_frame(&mut self.stream, request)?;
        let response = proto::read_frame(&mut self.stream)?;
        Ok(response)
    }

    /// Write one request, block for the response, and surface a failure
    /// verdict as a `RemoteOperation` error.
    pub fn send(&mut self, request: &Request) -> TetherResult<Response> {
        let response = self.exchange(request)?;
        if response.code == ResponseCode::Failure {
            let reason = response
                .message
                .unwrap_or_else(|| "driver returned failure without a reason".to_string());
            return Err(TetherError::RemoteOperation(reason));
        }
        Ok(response)
    }

    /// Ask the target to spawn a driver process.
    ///
    /// Launch refusal is a common, expected outcome (missing binary, bad
    /// bitness for the device), so it is reported as `Ok(false)` for the
    /// caller to check, not as an error.
    pub fn launch_driver_service(
        &mut self,
        kind: DriverKind,
        service_name: &str,
        bits: Bits,
    ) -> TetherResult<bool> {
        debug!("launching {kind:?} driver service '{service_name}' ({bits}-bit)");
        let response = self.exchange(&Request::LaunchDriver {
            kind,
            service_name: service_name.to_string(),
            bits,
        })?;
        Ok(response.code == ResponseCode::Success)
    }

    /// Apply a read/write timeout to the underlying transport.
    ///
    /// `None` restores indefinite blocking.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> TetherResult<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Ask the driver process to exit, best effort.
    pub fn disconnect(&mut self) {
        if let Err(e) = self.exchange(&Request::Exit) {
            warn!("driver at {} did not acknowledge exit: {e}", self.endpoint);
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    /// The `host:port` this channel is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The callback port this channel announced to the driver, if any.
    pub fn callback_port(&self) -> Option<u16> {
        self.callback_port
    }

    /// Protocol version this channel speaks.
    pub fn protocol_version(&self) -> u32 {
        proto::PROTOCOL_VERSION
    }
}

impl std::fmt::Debug for CommandChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannelClient")
            .field("endpoint", &self.endpoint)
            .field("callback_port", &self.callback_port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn connect_to_unreachable_port_is_a_connection_error() {
        let port = free_port();
        let result = CommandChannelClient::connect("127.0.0.1", port, None);
        assert!(matches!(result, Err(TetherError::Connection { .. })));
    }

    #[test]
    fn send_maps_failure_verdict_to_remote_operation() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _request: Request = proto::read_frame(&mut stream).unwrap();
            proto::write_frame(&mut stream, &Response::failure("queue is gone")).unwrap();
        });

        let mut client = CommandChannelClient::connect("127.0.0.1", port, None).unwrap();
        let result = client.send(&Request::FmqRead {
            queue_id: 3,
            count: 1,
        });
        match result {
            Err(TetherError::RemoteOperation(reason)) => assert!(reason.contains("queue is gone")),
            other => panic!("expected RemoteOperation, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn launch_refusal_is_false_not_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request: Request = proto::read_frame(&mut stream).unwrap();
            assert!(matches!(request, Request::LaunchDriver { .. }));
            proto::write_frame(&mut stream, &Response::failure("no such binary")).unwrap();
        });

        let mut client = CommandChannelClient::connect("127.0.0.1", port, None).unwrap();
        let launched = client
            .launch_driver_service(DriverKind::Shell, "shell_t1", Bits::Bits32)
            .unwrap();
        assert!(!launched);
        server.join().unwrap();
    }

    #[test]
    fn callback_port_is_announced_during_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request: Request = proto::read_frame(&mut stream).unwrap();
            match request {
                Request::SetCallbackPort { port } => assert_eq!(port, 6001),
                other => panic!("expected SetCallbackPort, got {other:?}"),
            }
            proto::write_frame(&mut stream, &Response::success()).unwrap();
        });

        let client = CommandChannelClient::connect("127.0.0.1", port, Some(6001)).unwrap();
        assert_eq!(client.callback_port(), Some(6001));
        server.join().unwrap();
    }
}
