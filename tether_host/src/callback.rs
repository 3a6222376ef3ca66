//! Host-side listener for asynchronous driver callbacks.
//!
//! Target drivers deliver asynchronous results by connecting back to the
//! host on the callback port and sending [`CallbackMessage`] frames. The
//! server acks each frame immediately and runs the matching handler on its
//! own thread, so a slow handler stalls neither the accept loop nor later
//! callbacks on the same connection.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tether_common::proto::{self, CallbackMessage, Response};
use tether_common::{TetherError, TetherResult};
use tracing::{debug, warn};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handler invoked for one inbound callback message.
pub type CallbackHandler = Arc<dyn Fn(CallbackMessage) + Send + Sync>;

type HandlerTable = Arc<RwLock<HashMap<String, CallbackHandler>>>;

/// Registration handle onto a running [`CallbackServer`]'s dispatch table.
///
/// HAL mirrors hold one of these so they can register expectations without
/// owning the server.
#[derive(Clone)]
pub struct CallbackRegistrar {
    handlers: HandlerTable,
}

impl CallbackRegistrar {
    /// Register a handler under a callback identifier, replacing any
    /// previous handler for that identifier.
    pub fn register<F>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(CallbackMessage) + Send + Sync + 'static,
    {
        self.handlers.write().insert(id.into(), Arc::new(handler));
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.handlers.write().remove(id).is_some()
    }
}

/// Accepts inbound driver connections and dispatches callback messages.
///
/// At most one per registry. Started once; starting a running server is an
/// error because the driver side was already told a specific port.
pub struct CallbackServer {
    handlers: HandlerTable,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl CallbackServer {
    /// Create a server that is not yet listening.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
            local_addr: None,
        }
    }

    /// Bind the listening socket and start the accept loop.
    ///
    /// With `preferred_port`, the bound port must equal it: the registry has
    /// already promised that port to drivers, so a mismatch is fatal. With
    /// `None`, any OS-assigned port is accepted.
    ///
    /// # Errors
    /// `ComponentLoading` if already running or the bound port mismatches;
    /// `Connection` if the bind itself fails.
    pub fn start(&mut self, preferred_port: Option<u16>) -> TetherResult<(SocketAddr, u16)> {
        if self.running.load(Ordering::SeqCst) {
            return Err(TetherError::ComponentLoading(
                "callback server is already running".to_string(),
            ));
        }

        let bind_addr = format!("0.0.0.0:{}", preferred_port.unwrap_or(0));
        let listener = TcpListener::bind(&bind_addr).map_err(|source| TetherError::Connection {
            endpoint: bind_addr,
            source,
        })?;
        let local_addr = listener.local_addr()?;

        if let Some(port) = preferred_port {
            if local_addr.port() != port {
                return Err(TetherError::ComponentLoading(format!(
                    "callback server bound to port {} instead of requested {port}",
                    local_addr.port()
                )));
            }
        }

        // Non-blocking accept so stop() can interrupt the loop.
        listener.set_nonblocking(true)?;
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let handlers = Arc::clone(&self.handlers);
        self.accept_thread = Some(
            thread::Builder::new()
                .name("callback-accept".to_string())
                .spawn(move || accept_loop(listener, running, handlers))
                .map_err(|source| TetherError::Io { source })?,
        );
        self.local_addr = Some(local_addr);

        debug!("callback server listening on {local_addr}");
        Ok((local_addr, local_addr.port()))
    }

    /// Stop listening. Idempotent; connection threads drain on their own
    /// when the peers hang up.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                warn!("callback accept thread panicked");
            }
        }
        self.local_addr = None;
        debug!("callback server stopped");
    }

    /// Whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The bound port while running.
    pub fn local_port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    /// Handle for registering callback handlers.
    pub fn registrar(&self) -> CallbackRegistrar {
        CallbackRegistrar {
            handlers: Arc::clone(&self.handlers),
        }
    }

    /// Register a handler under a callback identifier.
    pub fn register<F>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(CallbackMessage) + Send + Sync + 'static,
    {
        self.registrar().register(id, handler);
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.registrar().unregister(id)
    }
}

impl Default for CallbackServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, running: Arc<AtomicBool>, handlers: HandlerTable) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("callback connection from {peer}");
                let handlers = Arc::clone(&handlers);
                let spawned = thread::Builder::new()
                    .name("callback-conn".to_string())
                    .spawn(move || serve_connection(stream, handlers));
                if let Err(e) = spawned {
                    warn!("could not spawn callback connection thread: {e}");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!("callback accept failed: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn serve_connection(stream: TcpStream, handlers: HandlerTable) {
    // The listener is non-blocking; the accepted stream must not be.
    if let Err(e) = stream.set_nonblocking(false) {
        warn!("callback connection setup failed: {e}");
        return;
    }
    let mut stream = stream;
    loop {
        let message: CallbackMessage = match proto::read_frame(&mut stream) {
            Ok(message) => message,
            Err(e) => {
                // EOF is the normal end of a callback session.
                debug!("callback connection closed: {e}");
                return;
            }
        };

        // Ack before dispatch so the driver is never held up by a handler.
        if let Err(e) = proto::write_frame(&mut stream, &Response::success()) {
            warn!("callback ack failed: {e}");
            return;
        }

        let handler = handlers.read().get(&message.id).cloned();
        match handler {
            Some(handler) => {
                let spawned = thread::Builder::new()
                    .name("callback-dispatch".to_string())
                    .spawn(move || handler(message));
                if let Err(e) = spawned {
                    warn!("could not spawn callback handler thread: {e}");
                }
            }
            None => warn!("no handler registered for callback id '{}'", message.id),
        }
    }
}
