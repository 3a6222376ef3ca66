//! Error types for host-to-driver operations.

use thiserror::Error;

/// Errors produced while driving remote driver processes.
///
/// Environmental failures the caller is expected to check for (a remote
/// allocation that did not happen, a queue name nobody registered) are not
/// errors: those surface as absent results at the call site. Everything in
/// this enum is either a broken precondition or a broken session.
#[derive(Debug, Error)]
pub enum TetherError {
    /// A command or callback endpoint could not be reached.
    #[error("cannot reach {endpoint}: {source}")]
    Connection {
        /// The `host:port` endpoint that failed
        endpoint: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// A driver service or the callback server failed to come up, or a
    /// structural precondition (instance name, bit-width, bound port) was
    /// violated.
    #[error("component loading failed: {0}")]
    ComponentLoading(String),

    /// The caller supplied inconsistent or missing arguments.
    #[error("invalid input: {0}")]
    UserInput(String),

    /// The driver answered with a failure response.
    #[error("driver reported failure: {0}")]
    RemoteOperation(String),

    /// A mirror is already registered under this name.
    #[error("mirror name already registered: {0}")]
    AlreadyRegistered(String),

    /// No mirror is registered under this name.
    #[error("no mirror registered under name: {0}")]
    NotRegistered(String),

    /// Wire-level framing or codec failure.
    #[error(transparent)]
    Proto(#[from] crate::proto::ProtoError),

    /// Transport-level I/O failure outside of framing.
    #[error("I/O error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

/// Result type for host-to-driver operations.
pub type TetherResult<T> = Result<T, TetherError>;
