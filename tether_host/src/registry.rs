//! Process-wide tracker for remote-resource mirrors.
//!
//! One `MirrorRegistry` per test session owns every mirror created against
//! one target, keyed by a unique name. It obtains or creates the command
//! channels mirrors talk through, launches driver processes on demand, runs
//! at most one callback server, and owns teardown ordering: the remote
//! resource is always released before the local proxy is discarded.

use crate::callback::CallbackServer;
use crate::channel::{CommandChannelClient, SharedChannel};
use crate::mirror::{
    FmqMirror, HalMirror, HandleMirror, LibMirror, MemoryMirror, Mirror, RemoteId, ShellMirror,
    shell::CommandResults,
};
use crate::version;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tether_common::config::TargetConfig;
use tether_common::consts::{
    DEFAULT_DRIVER_BITS, DEFAULT_HWBINDER_SERVICE, DEFAULT_SHELL_BITS, DEFAULT_SHELL_NAME,
    DEFAULT_TARGET_BASE_PATHS,
};
use tether_common::proto::{Bits, DriverKind};
use tether_common::{TetherError, TetherResult};
use tracing::{debug, error, info};

/// Which HAL service to bring up on the target.
#[derive(Debug, Clone)]
pub struct HalTarget {
    /// Target type name (e.g. `light`, `camera`)
    pub target_type: String,
    /// Single-float version form (older calling convention)
    pub version: Option<f32>,
    /// Major version component
    pub version_major: Option<u32>,
    /// Minor version component
    pub version_minor: Option<u32>,
    /// Package name of the HAL interface
    pub package: String,
    /// Component name within the package
    pub component_name: String,
    /// hwbinder service instance name
    pub hwbinder_service_name: String,
    /// Driver process bit-width, 32 or 64
    pub bits: u32,
    /// Whether the service is brought up purely for testing
    pub is_test_hal: bool,
    /// Registry name for the mirror; the target type by default
    pub handler_name: Option<String>,
}

impl HalTarget {
    /// A target with defaults for everything but the type name.
    pub fn new(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            version: None,
            version_major: None,
            version_minor: None,
            package: String::new(),
            component_name: String::new(),
            hwbinder_service_name: DEFAULT_HWBINDER_SERVICE.to_string(),
            bits: DEFAULT_DRIVER_BITS,
            is_test_hal: false,
            handler_name: None,
        }
    }
}

/// Which shared library to bring up on the target.
#[derive(Debug, Clone)]
pub struct LibTarget {
    /// Target type name
    pub target_type: String,
    /// Single-float version form (older calling convention)
    pub version: Option<f32>,
    /// Major version component
    pub version_major: Option<u32>,
    /// Minor version component
    pub version_minor: Option<u32>,
    /// Package name of the library interface
    pub package: String,
    /// Library file name (e.g. `libm.so`)
    pub file_name: String,
    /// Directories searched for the library on the target
    pub search_paths: Vec<String>,
    /// Driver process bit-width, 32 or 64
    pub bits: u32,
    /// Registry name for the mirror; the target type by default
    pub handler_name: Option<String>,
}

impl LibTarget {
    /// A target with defaults for everything but the type name.
    pub fn new(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            version: None,
            version_major: None,
            version_minor: None,
            package: String::new(),
            file_name: String::new(),
            search_paths: DEFAULT_TARGET_BASE_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            bits: DEFAULT_DRIVER_BITS,
            handler_name: None,
        }
    }
}

/// Parameters for creating a fast message queue mirror.
#[derive(Debug, Clone)]
pub struct FmqParams {
    /// Element data-type tag
    pub data_type: String,
    /// Synchronized queue (single reader)
    pub sync: bool,
    /// Queue capacity in elements (ignored when deriving)
    pub queue_size: u64,
    /// Enable blocking reads/writes
    pub blocking: bool,
    /// Reset read/write pointers when deriving from an existing queue
    pub reset_pointers: bool,
    /// Registry name for the new queue; generated when absent
    pub queue_name: Option<String>,
    /// Reuse this command channel instead of opening a new one
    pub client: Option<SharedChannel>,
}

impl Default for FmqParams {
    fn default() -> Self {
        Self {
            data_type: "uint16_t".to_string(),
            sync: true,
            queue_size: 0,
            blocking: false,
            reset_pointers: true,
            queue_name: None,
            client: None,
        }
    }
}

/// An existing queue to derive a new queue object from.
///
/// The element data type, synchronization flag, and remote queue id are
/// copied from the source.
#[derive(Debug, Clone)]
pub enum FmqSource {
    /// Look the source up by its registry name
    Name(String),
    /// Source described directly (taken from a mirror)
    Descriptor {
        /// Element data-type tag of the source
        data_type: String,
        /// Synchronization flag of the source
        sync: bool,
        /// Remote id of the source queue
        queue_id: RemoteId,
    },
}

impl From<&FmqMirror> for FmqSource {
    fn from(mirror: &FmqMirror) -> Self {
        FmqSource::Descriptor {
            data_type: mirror.data_type().to_string(),
            sync: mirror.is_synchronized(),
            queue_id: mirror.queue_id(),
        }
    }
}

/// Tracks every mirror created against one target.
pub struct MirrorRegistry {
    host: String,
    command_port: u16,
    callback_port: Option<u16>,
    callback_server: Option<CallbackServer>,
    mirrors: HashMap<String, Mirror>,
}

impl MirrorRegistry {
    /// Create a registry for a target reachable at `host:command_port`.
    pub fn new(host: impl Into<String>, command_port: u16, callback_port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            command_port,
            callback_port,
            callback_server: None,
            mirrors: HashMap::new(),
        }
    }

    /// Build a registry from a loaded [`TargetConfig`], honoring the
    /// callback-server autostart flag.
    pub fn from_config(config: &TargetConfig) -> TetherResult<Self> {
        let mut registry = Self::new(config.host.clone(), config.command_port, config.callback_port);
        if config.start_callback_server {
            registry.start_callback_server()?;
        }
        Ok(registry)
    }

    /// Start the callback server on the configured callback port.
    ///
    /// Without a configured port, the OS picks one and the registry adopts
    /// it for every channel opened afterwards.
    ///
    /// # Errors
    /// `ComponentLoading` if a server is already running or the bound port
    /// differs from the configured one.
    pub fn start_callback_server(&mut self) -> TetherResult<(SocketAddr, u16)> {
        if self.callback_server.is_some() {
            return Err(TetherError::ComponentLoading(
                "callback server was already started for this registry".to_string(),
            ));
        }
        let mut server = CallbackServer::new();
        let (addr, port) = server.start(self.callback_port)?;
        self.callback_port = Some(port);
        self.callback_server = Some(server);
        info!("callback server ready on {addr}");
        Ok((addr, port))
    }

    /// Initialize a fast message queue and register its mirror.
    ///
    /// A fresh queue is allocated unless `existing` names a source to
    /// derive from. Creation failure, a duplicate name, or an unknown
    /// source name yields `Ok(None)` with nothing registered; the caller
    /// decides what that means for the test.
    pub fn init_fmq(
        &mut self,
        existing: Option<FmqSource>,
        params: FmqParams,
    ) -> TetherResult<Option<&FmqMirror>> {
        let mut data_type = params.data_type;
        let mut sync = params.sync;
        let mut existing_id = None;

        match existing {
            Some(FmqSource::Name(source_name)) => {
                match self.mirrors.get(&source_name).and_then(Mirror::as_fmq) {
                    Some(source) => {
                        data_type = source.data_type().to_string();
                        sync = source.is_synchronized();
                        existing_id = Some(source.queue_id());
                    }
                    None => {
                        error!("no message queue registered under '{source_name}'");
                        return Ok(None);
                    }
                }
            }
            Some(FmqSource::Descriptor {
                data_type: source_type,
                sync: source_sync,
                queue_id,
            }) => {
                data_type = source_type;
                sync = source_sync;
                existing_id = Some(queue_id);
            }
            None => {}
        }

        let channel = match params.client {
            Some(channel) => channel,
            None => self.new_channel(true)?,
        };
        let Some(mirror) = FmqMirror::create(
            channel,
            &data_type,
            sync,
            params.queue_size,
            params.blocking,
            existing_id,
            params.reset_pointers,
        )?
        else {
            return Ok(None);
        };

        let name = params
            .queue_name
            .unwrap_or_else(|| format!("queue_id_{}", mirror.queue_id()));
        Ok(self
            .register(name, Mirror::Fmq(mirror))
            .and_then(Mirror::as_fmq))
    }

    /// Allocate a shared memory region and register its mirror.
    ///
    /// Creation failure or a duplicate name yields `Ok(None)` with nothing
    /// registered.
    pub fn init_shared_memory(
        &mut self,
        size: u64,
        mem_name: Option<&str>,
        client: Option<SharedChannel>,
    ) -> TetherResult<Option<&MemoryMirror>> {
        let channel = match client {
            Some(channel) => channel,
            None => self.new_channel(true)?,
        };
        let Some(mirror) = MemoryMirror::create(channel, size)? else {
            return Ok(None);
        };

        let name = mem_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("mem_id_{}", mirror.mem_id()));
        Ok(self
            .register(name, Mirror::Memory(mirror))
            .and_then(Mirror::as_memory))
    }

    /// Create a file handle wrapping a single file and register its mirror.
    ///
    /// Creation failure or a duplicate name yields `Ok(None)` with nothing
    /// registered.
    pub fn init_file_handle(
        &mut self,
        filepath: &str,
        mode: &str,
        ints: &[i32],
        handle_name: Option<&str>,
        client: Option<SharedChannel>,
    ) -> TetherResult<Option<&HandleMirror>> {
        let channel = match client {
            Some(channel) => channel,
            None => self.new_channel(true)?,
        };
        let Some(mirror) = HandleMirror::create(channel, filepath, mode, ints)? else {
            return Ok(None);
        };

        let name = handle_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("handle_id_{}", mirror.handle_id()));
        Ok(self
            .register(name, Mirror::Handle(mirror))
            .and_then(Mirror::as_handle))
    }

    /// Bring up a HAL service on the target and register its mirror under
    /// `handler_name` (the target type by default).
    ///
    /// Always opens a fresh command channel; the callback port, if known,
    /// is announced so the service can deliver asynchronous results.
    ///
    /// # Errors
    /// `UserInput` for missing version information, `AlreadyRegistered`
    /// for a name collision, `ComponentLoading` if the driver service
    /// cannot be launched or the service cannot be loaded.
    pub fn init_hal(&mut self, target: HalTarget) -> TetherResult<&HalMirror> {
        let resolved =
            version::resolve(target.version, target.version_major, target.version_minor)?;
        let bits = Bits::try_from(target.bits).map_err(TetherError::ComponentLoading)?;
        let handler_name = target
            .handler_name
            .unwrap_or_else(|| target.target_type.clone());
        if self.mirrors.contains_key(&handler_name) {
            return Err(TetherError::AlreadyRegistered(handler_name));
        }

        let channel = self.new_channel(true)?;
        let service_name = format!("hal_{}", target.target_type);
        let launched =
            channel
                .lock()
                .launch_driver_service(DriverKind::HalService, &service_name, bits)?;
        if !launched {
            return Err(TetherError::ComponentLoading(format!(
                "failed to launch HAL driver service '{service_name}'"
            )));
        }

        let callbacks = self.callback_server.as_ref().map(CallbackServer::registrar);
        let mirror = HalMirror::create(
            channel,
            &target.target_type,
            resolved,
            &target.package,
            &target.component_name,
            &target.hwbinder_service_name,
            bits,
            target.is_test_hal,
            callbacks,
        )?;

        info!(
            "registered HAL mirror '{handler_name}' ({}@{resolved})",
            target.target_type
        );
        Ok(self
            .mirrors
            .entry(handler_name)
            .or_insert(Mirror::Hal(mirror))
            .as_hal()
            .expect("freshly inserted HAL mirror"))
    }

    /// Bring up a shared library on the target and register its mirror
    /// under `handler_name` (the target type by default).
    ///
    /// Library drivers never call back into the host, so the channel is
    /// opened without a callback port.
    ///
    /// # Errors
    /// As [`init_hal`](Self::init_hal).
    pub fn init_shared_lib(&mut self, target: LibTarget) -> TetherResult<&LibMirror> {
        let resolved =
            version::resolve(target.version, target.version_major, target.version_minor)?;
        let bits = Bits::try_from(target.bits).map_err(TetherError::ComponentLoading)?;
        let handler_name = target
            .handler_name
            .unwrap_or_else(|| target.target_type.clone());
        if self.mirrors.contains_key(&handler_name) {
            return Err(TetherError::AlreadyRegistered(handler_name));
        }

        let channel = self.new_channel(false)?;
        let service_name = format!("lib_{}", target.target_type);
        let launched = channel.lock().launch_driver_service(
            DriverKind::SharedLibrary,
            &service_name,
            bits,
        )?;
        if !launched {
            return Err(TetherError::ComponentLoading(format!(
                "failed to launch library driver service '{service_name}'"
            )));
        }

        let mirror = LibMirror::create(
            channel,
            &target.target_type,
            resolved,
            &target.package,
            &target.file_name,
            &target.search_paths,
            bits,
        )?;

        info!(
            "registered library mirror '{handler_name}' ({})",
            target.file_name
        );
        Ok(self
            .mirrors
            .entry(handler_name)
            .or_insert(Mirror::SharedLib(mirror))
            .as_shared_lib()
            .expect("freshly inserted library mirror"))
    }

    /// Bring up a shell terminal on the target and register its mirror
    /// under `instance_name`.
    ///
    /// # Errors
    /// `ComponentLoading` for an empty instance name, a bit-width other
    /// than 32/64, or a driver-refused launch; `AlreadyRegistered` for a
    /// name collision.
    pub fn invoke_terminal(&mut self, instance_name: &str, bits: u32) -> TetherResult<&ShellMirror> {
        if instance_name.is_empty() {
            return Err(TetherError::ComponentLoading(
                "shell instance name is empty".to_string(),
            ));
        }
        let bits = Bits::try_from(bits).map_err(TetherError::ComponentLoading)?;
        if self.mirrors.contains_key(instance_name) {
            return Err(TetherError::AlreadyRegistered(instance_name.to_string()));
        }

        let channel = self.new_channel(false)?;
        debug!("launching shell driver service for '{instance_name}'");
        let service_name = format!("shell_{instance_name}");
        let launched =
            channel
                .lock()
                .launch_driver_service(DriverKind::Shell, &service_name, bits)?;
        if !launched {
            return Err(TetherError::ComponentLoading(format!(
                "failed to launch shell driver service '{instance_name}'"
            )));
        }

        let mirror = ShellMirror::new(channel, instance_name, bits);
        info!("registered shell mirror '{instance_name}'");
        Ok(self
            .mirrors
            .entry(instance_name.to_string())
            .or_insert(Mirror::Shell(mirror))
            .as_shell()
            .expect("freshly inserted shell mirror"))
    }

    /// Run one command on the default shell terminal, creating the
    /// terminal on first use.
    ///
    /// With `no_except`, any failure is absorbed into a result with exit
    /// code `-1` and the error text on stderr, so test logic can make its
    /// own pass/fail/skip decision.
    pub fn execute(&mut self, command: &str, no_except: bool) -> TetherResult<CommandResults> {
        match self.execute_on_default(command) {
            Ok(results) => Ok(results),
            Err(e) if no_except => {
                error!("shell execution failed: {e}");
                Ok(CommandResults {
                    stdouts: vec![String::new()],
                    stderrs: vec![e.to_string()],
                    exit_codes: vec![-1],
                })
            }
            Err(e) => Err(e),
        }
    }

    fn execute_on_default(&mut self, command: &str) -> TetherResult<CommandResults> {
        self.ensure_default_terminal()?;
        let shell = self
            .mirrors
            .get(DEFAULT_SHELL_NAME)
            .and_then(Mirror::as_shell)
            .ok_or_else(|| {
                TetherError::UserInput(format!(
                    "'{DEFAULT_SHELL_NAME}' is registered but is not a shell terminal"
                ))
            })?;
        shell.execute(&[command.to_string()])
    }

    /// Apply a TCP connection timeout to the default shell terminal,
    /// creating the terminal on first use.
    pub fn set_conn_timeout(&mut self, timeout: Duration) -> TetherResult<()> {
        self.ensure_default_terminal()?;
        let shell = self
            .mirrors
            .get_mut(DEFAULT_SHELL_NAME)
            .and_then(Mirror::as_shell_mut)
            .ok_or_else(|| {
                TetherError::UserInput(format!(
                    "'{DEFAULT_SHELL_NAME}' is registered but is not a shell terminal"
                ))
            })?;
        shell.set_conn_timeout(Some(timeout))
    }

    fn ensure_default_terminal(&mut self) -> TetherResult<()> {
        if !self.mirrors.contains_key(DEFAULT_SHELL_NAME) {
            self.invoke_terminal(DEFAULT_SHELL_NAME, DEFAULT_SHELL_BITS)?;
        }
        Ok(())
    }

    /// Disable every registered shell terminal.
    pub fn disable_shell(&mut self) {
        for mirror in self.mirrors.values_mut() {
            if let Some(shell) = mirror.as_shell_mut() {
                shell.set_enabled(false);
            }
        }
    }

    /// Tear down one mirror's remote resource and drop its entry.
    ///
    /// # Errors
    /// `NotRegistered` if no mirror exists under `name`.
    pub fn remove_mirror(&mut self, name: &str) -> TetherResult<()> {
        match self.mirrors.remove(name) {
            Some(mirror) => {
                mirror.clean_up();
                info!("removed mirror '{name}'");
                Ok(())
            }
            None => Err(TetherError::NotRegistered(name.to_string())),
        }
    }

    /// Tear down every mirror and stop the callback server.
    ///
    /// Mirrors are independent resources, so teardown order across them is
    /// unspecified. Safe to call repeatedly; also invoked when the
    /// registry is dropped.
    pub fn clean_up(&mut self) {
        for (name, mirror) in self.mirrors.drain() {
            debug!("tearing down mirror '{name}'");
            mirror.clean_up();
        }
        if let Some(mut server) = self.callback_server.take() {
            server.stop();
        }
    }

    /// Look up a mirror by name. A miss is logged, not an error: callers
    /// commonly probe before creating.
    pub fn get(&self, name: &str) -> Option<&Mirror> {
        let mirror = self.mirrors.get(name);
        if mirror.is_none() {
            debug!("no mirror registered under '{name}'");
        }
        mirror
    }

    /// The command channel backing a named mirror, for session reuse.
    pub fn get_channel(&self, name: &str) -> Option<SharedChannel> {
        self.get(name).map(|mirror| mirror.channel().clone())
    }

    /// Typed lookup of a HAL mirror.
    pub fn hal(&self, name: &str) -> Option<&HalMirror> {
        self.get(name).and_then(Mirror::as_hal)
    }

    /// Typed lookup of a shared-library mirror.
    pub fn shared_lib(&self, name: &str) -> Option<&LibMirror> {
        self.get(name).and_then(Mirror::as_shared_lib)
    }

    /// Typed lookup of a shell mirror.
    pub fn shell(&self, name: &str) -> Option<&ShellMirror> {
        self.get(name).and_then(Mirror::as_shell)
    }

    /// Typed lookup of a message-queue mirror.
    pub fn fmq(&self, name: &str) -> Option<&FmqMirror> {
        self.get(name).and_then(Mirror::as_fmq)
    }

    /// Typed lookup of a shared-memory mirror.
    pub fn memory(&self, name: &str) -> Option<&MemoryMirror> {
        self.get(name).and_then(Mirror::as_memory)
    }

    /// Typed lookup of a file-handle mirror.
    pub fn file_handle(&self, name: &str) -> Option<&HandleMirror> {
        self.get(name).and_then(Mirror::as_handle)
    }

    /// Whether a mirror is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.mirrors.contains_key(name)
    }

    /// Number of registered mirrors.
    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }

    /// The callback server, while started.
    pub fn callback_server(&self) -> Option<&CallbackServer> {
        self.callback_server.as_ref()
    }

    /// The callback port channels announce to drivers, if any.
    pub fn callback_port(&self) -> Option<u16> {
        self.callback_port
    }

    fn new_channel(&self, with_callback: bool) -> TetherResult<SharedChannel> {
        let callback_port = if with_callback { self.callback_port } else { None };
        CommandChannelClient::connect_shared(&self.host, self.command_port, callback_port)
    }

    /// Register under a unique name; a collision is logged and nothing is
    /// inserted.
    fn register(&mut self, name: String, mirror: Mirror) -> Option<&Mirror> {
        if self.mirrors.contains_key(&name) {
            error!("mirror name '{name}' already registered; nothing inserted");
            return None;
        }
        info!("registered {:?} mirror '{name}'", mirror.kind());
        Some(self.mirrors.entry(name).or_insert(mirror))
    }
}

impl Drop for MirrorRegistry {
    fn drop(&mut self) {
        self.clean_up();
    }
}

impl std::fmt::Debug for MirrorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorRegistry")
            .field("host", &self.host)
            .field("command_port", &self.command_port)
            .field("callback_port", &self.callback_port)
            .field("mirrors", &self.mirrors.keys().collect::<Vec<_>>())
            .finish()
    }
}
