//! Host-side proxies for resources living in target driver processes.
//!
//! A mirror wraps one driver-assigned resource handle together with the
//! command channel it was created through; every post-creation operation is
//! a fresh request/response exchange on that channel. Mirrors are created
//! and tracked by the registry, never free-standing.

pub mod hal;
pub mod resource;
pub mod shared_lib;
pub mod shell;

pub use hal::HalMirror;
pub use resource::{FmqMirror, HandleMirror, MemoryMirror};
pub use shared_lib::LibMirror;
pub use shell::{CommandResults, ShellMirror};

use crate::channel::SharedChannel;
use tracing::warn;

/// Driver-assigned handle for one remote resource.
///
/// The wire carries a signed integer where any negative value means "not
/// created"; [`RemoteId::from_wire`] is the only way in, so a mirror can
/// only ever hold a valid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteId(i64);

impl RemoteId {
    /// Interpret a wire-level id. Negative values mean the driver did not
    /// create the resource.
    pub fn from_wire(raw: i64) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    /// The wire-level representation.
    pub fn raw(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which resource family a mirror proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorKind {
    /// HAL service driver
    HalService,
    /// Shared library driver
    SharedLibrary,
    /// Shell terminal driver
    ShellTerminal,
    /// Fast message queue
    Fmq,
    /// Shared memory region
    SharedMemory,
    /// File handle
    FileHandle,
}

/// One registered remote-resource proxy.
#[derive(Debug)]
pub enum Mirror {
    /// HAL service driver proxy
    Hal(HalMirror),
    /// Shared library driver proxy
    SharedLib(LibMirror),
    /// Shell terminal proxy
    Shell(ShellMirror),
    /// Fast message queue proxy
    Fmq(FmqMirror),
    /// Shared memory region proxy
    Memory(MemoryMirror),
    /// File handle proxy
    Handle(HandleMirror),
}

impl Mirror {
    /// The resource family this mirror proxies.
    pub fn kind(&self) -> MirrorKind {
        match self {
            Mirror::Hal(_) => MirrorKind::HalService,
            Mirror::SharedLib(_) => MirrorKind::SharedLibrary,
            Mirror::Shell(_) => MirrorKind::ShellTerminal,
            Mirror::Fmq(_) => MirrorKind::Fmq,
            Mirror::Memory(_) => MirrorKind::SharedMemory,
            Mirror::Handle(_) => MirrorKind::FileHandle,
        }
    }

    /// The command channel this mirror forwards operations over.
    pub fn channel(&self) -> &SharedChannel {
        match self {
            Mirror::Hal(m) => m.channel(),
            Mirror::SharedLib(m) => m.channel(),
            Mirror::Shell(m) => m.channel(),
            Mirror::Fmq(m) => m.channel(),
            Mirror::Memory(m) => m.channel(),
            Mirror::Handle(m) => m.channel(),
        }
    }

    /// Release the remote resource backing this mirror, best effort.
    ///
    /// Driver-backed mirrors (HAL, library, shell) ask their driver process
    /// to exit; allocation-backed mirrors (queue, memory, handle) release
    /// just their resource, since their channel may be shared.
    pub(crate) fn clean_up(&self) {
        match self {
            Mirror::Hal(m) => m.channel().lock().disconnect(),
            Mirror::SharedLib(m) => m.channel().lock().disconnect(),
            Mirror::Shell(m) => m.channel().lock().disconnect(),
            Mirror::Fmq(m) => {
                if let Err(e) = m.release() {
                    warn!("queue {} release failed: {e}", m.queue_id());
                }
            }
            Mirror::Memory(m) => {
                if let Err(e) = m.release() {
                    warn!("memory region {} release failed: {e}", m.mem_id());
                }
            }
            Mirror::Handle(m) => {
                if let Err(e) = m.release() {
                    warn!("file handle {} release failed: {e}", m.handle_id());
                }
            }
        }
    }

    /// Downcast to a HAL mirror.
    pub fn as_hal(&self) -> Option<&HalMirror> {
        match self {
            Mirror::Hal(m) => Some(m),
            _ => None,
        }
    }

    /// Downcast to a shared-library mirror.
    pub fn as_shared_lib(&self) -> Option<&LibMirror> {
        match self {
            Mirror::SharedLib(m) => Some(m),
            _ => None,
        }
    }

    /// Downcast to a shell mirror.
    pub fn as_shell(&self) -> Option<&ShellMirror> {
        match self {
            Mirror::Shell(m) => Some(m),
            _ => None,
        }
    }

    /// Downcast to a mutable shell mirror.
    pub fn as_shell_mut(&mut self) -> Option<&mut ShellMirror> {
        match self {
            Mirror::Shell(m) => Some(m),
            _ => None,
        }
    }

    /// Downcast to a message-queue mirror.
    pub fn as_fmq(&self) -> Option<&FmqMirror> {
        match self {
            Mirror::Fmq(m) => Some(m),
            _ => None,
        }
    }

    /// Downcast to a shared-memory mirror.
    pub fn as_memory(&self) -> Option<&MemoryMirror> {
        match self {
            Mirror::Memory(m) => Some(m),
            _ => None,
        }
    }

    /// Downcast to a file-handle mirror.
    pub fn as_handle(&self) -> Option<&HandleMirror> {
        match self {
            Mirror::Handle(m) => Some(m),
            _ => None,
        }
    }
}
