//! # Tether Host
//!
//! Host-side machinery for driving HAL implementations, shared libraries,
//! and shell sessions that live inside driver processes on a remote target.
//! The code under test runs out-of-process (often on a different
//! instruction set), so host test logic never calls it directly: it asks the
//! [`registry::MirrorRegistry`] for a named proxy ("mirror") and every
//! subsequent operation is forwarded over a TCP command channel.
//!
//! ## Components
//!
//! - [`channel`] - `CommandChannelClient`: one blocking request/response
//!   connection per driver process, plus driver-service launching
//! - [`callback`] - `CallbackServer`: background listener for asynchronous
//!   invocations the target sends back to the host
//! - [`mirror`] - the typed proxy family: HAL service, shared library,
//!   shell terminal, fast message queue, shared memory, file handle
//! - [`registry`] - `MirrorRegistry`: creates, tracks, and tears down
//!   mirrors under unique names
//! - [`version`] - HAL version argument resolution

pub mod callback;
pub mod channel;
pub mod mirror;
pub mod registry;
pub mod version;

pub use callback::{CallbackRegistrar, CallbackServer};
pub use channel::{CommandChannelClient, SharedChannel};
pub use mirror::{Mirror, MirrorKind, RemoteId};
pub use registry::{FmqParams, FmqSource, HalTarget, LibTarget, MirrorRegistry};
pub use version::HalVersion;
