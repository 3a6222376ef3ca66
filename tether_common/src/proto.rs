//! Wire messages and frame codec for driver-control sessions.
//!
//! Every host-to-driver session exchanges length-prefixed JSON frames:
//! a 4-byte big-endian payload length followed by one serialized message.
//! The command channel carries [`Request`]/[`Response`] pairs; the callback
//! channel carries [`CallbackMessage`] frames from the target, each acked
//! with a [`Response`].
//!
//! Operation payloads (HAL call arguments, queue elements, memory contents)
//! are opaque structured data as far as this layer is concerned; they travel
//! as plain JSON values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

/// Version of the driver-control protocol spoken by this workspace.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame payload.
///
/// Guards the host against allocating from a corrupt length prefix.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Wire-level framing and codec errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Declared frame length exceeds [`MAX_FRAME_LEN`]
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared payload length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Socket read/write failed (includes connection closed mid-frame)
    #[error("I/O error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Payload did not decode as the expected message
    #[error("malformed message: {source}")]
    Codec {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },
}

/// Processor bit-width of a driver process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Bits {
    /// 32-bit driver binary
    Bits32,
    /// 64-bit driver binary
    Bits64,
}

impl TryFrom<u32> for Bits {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            32 => Ok(Bits::Bits32),
            64 => Ok(Bits::Bits64),
            other => Err(format!("invalid bit-width: {other} (expected 32 or 64)")),
        }
    }
}

impl From<Bits> for u32 {
    fn from(bits: Bits) -> Self {
        match bits {
            Bits::Bits32 => 32,
            Bits::Bits64 => 64,
        }
    }
}

impl std::fmt::Display for Bits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// Kind of driver process the target is asked to spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Hosts one HAL service instance
    HalService,
    /// Hosts one loaded shared library
    SharedLibrary,
    /// Hosts one shell session
    Shell,
}

/// Kind of remotely allocated resource, for release requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Fast message queue
    Fmq,
    /// Shared memory region
    Memory,
    /// File handle
    Handle,
}

/// Queue state queries that do not move data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FmqQuery {
    /// Free element slots
    AvailableToWrite,
    /// Readable element count
    AvailableToRead,
    /// Whether the queue object is usable
    IsValid,
}

/// One command sent host-to-driver on the command channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Tell the driver where asynchronous results should be delivered.
    SetCallbackPort { port: u16 },

    /// Ask the target to spawn a driver process for a resource type.
    LaunchDriver {
        kind: DriverKind,
        service_name: String,
        bits: Bits,
    },

    /// Load a HAL service into an already launched HAL driver process.
    LoadHal {
        target_type: String,
        version_major: u32,
        version_minor: u32,
        package: String,
        component_name: String,
        hwbinder_service_name: String,
        is_test_hal: bool,
    },

    /// Load a shared library into an already launched library driver process.
    LoadLib {
        target_type: String,
        version_major: u32,
        version_minor: u32,
        package: String,
        file_name: String,
        search_paths: Vec<String>,
        bits: Bits,
    },

    /// Invoke an API on a loaded HAL service.
    HalCall {
        driver_id: i64,
        api: String,
        args: Vec<serde_json::Value>,
    },

    /// Invoke a function in a loaded shared library.
    LibCall {
        driver_id: i64,
        api: String,
        args: Vec<serde_json::Value>,
    },

    /// Run commands in the driver's shell session.
    ExecuteShell { commands: Vec<String> },

    /// Allocate a message queue, or derive one from an existing queue.
    FmqCreate {
        data_type: String,
        sync: bool,
        queue_size: u64,
        blocking: bool,
        /// Derive from this queue instead of allocating a fresh one
        existing_queue_id: Option<i64>,
        /// Reset read/write pointers when deriving
        reset_pointers: bool,
    },

    /// Append elements to a queue.
    FmqWrite {
        queue_id: i64,
        data: Vec<serde_json::Value>,
    },

    /// Pop elements from a queue.
    FmqRead { queue_id: i64, count: u64 },

    /// Query queue state.
    FmqState { queue_id: i64, query: FmqQuery },

    /// Allocate a shared memory region.
    MemAllocate { size: u64 },

    /// Read a byte range from a shared memory region.
    MemRead { mem_id: i64, start: u64, len: u64 },

    /// Overwrite a byte range of a shared memory region.
    MemWrite {
        mem_id: i64,
        start: u64,
        data: Vec<u8>,
    },

    /// Create a file handle wrapping a single file.
    HandleCreate {
        path: String,
        mode: String,
        ints: Vec<i32>,
    },

    /// Read through a file handle.
    HandleRead { handle_id: i64, len: u64 },

    /// Write through a file handle.
    HandleWrite { handle_id: i64, data: Vec<u8> },

    /// Release one remotely allocated resource.
    ReleaseResource { kind: ResourceKind, id: i64 },

    /// Ask the driver process to exit.
    Exit,
}

/// Driver verdict on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    /// Request handled
    Success,
    /// Request refused or failed on the target
    Failure,
}

/// One driver-to-host answer on the command channel.
///
/// A single shape covers every request kind, mirroring the driver-control
/// response of the target protocol: a verdict, an optional message, an
/// optional resource id for creation requests (negative means the driver
/// could not allocate), an opaque payload for data-moving operations, and
/// the output vectors of shell executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Verdict
    pub code: ResponseCode,
    /// Failure reason or informational text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Driver-assigned id for creation requests; negative = not created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<i64>,
    /// Operation-specific structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Per-command standard output of a shell execution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdout: Vec<String>,
    /// Per-command standard error of a shell execution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr: Vec<String>,
    /// Per-command exit codes of a shell execution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_code: Vec<i32>,
}

impl Response {
    /// A bare success response.
    pub fn success() -> Self {
        Self {
            code: ResponseCode::Success,
            message: None,
            resource_id: None,
            payload: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: Vec::new(),
        }
    }

    /// A failure response carrying a reason.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Failure,
            message: Some(message.into()),
            ..Self::success()
        }
    }

    /// Attach a driver-assigned resource id.
    pub fn with_resource_id(mut self, id: i64) -> Self {
        self.resource_id = Some(id);
        self
    }

    /// Attach an operation payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// One asynchronous invocation sent target-to-host on the callback channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackMessage {
    /// Callback identifier the handler was registered under
    pub id: String,
    /// Name of the invoked callback function
    pub name: String,
    /// Invocation arguments
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// Write one message as a length-prefixed JSON frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), ProtoError> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed JSON frame and decode it.
///
/// Blocks until a full frame arrives. A peer that closes the connection
/// between frames surfaces as an `UnexpectedEof` I/O error.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, ProtoError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn request_frame_survives_codec() {
        let request = Request::LaunchDriver {
            kind: DriverKind::Shell,
            service_name: "shell_t1".to_string(),
            bits: Bits::Bits64,
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &request).unwrap();

        // 4-byte length prefix, big endian
        let declared = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, buf.len() - 4);

        let decoded: Request = read_frame(&mut Cursor::new(buf)).unwrap();
        match decoded {
            Request::LaunchDriver {
                kind, service_name, ..
            } => {
                assert_eq!(kind, DriverKind::Shell);
                assert_eq!(service_name, "shell_t1");
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        buf.extend_from_slice(b"junk");

        let result: Result<Response, _> = read_frame(&mut Cursor::new(buf));
        assert!(matches!(result, Err(ProtoError::FrameTooLarge { .. })));
    }

    #[test]
    fn truncated_frame_is_an_io_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Response::success()).unwrap();
        buf.truncate(buf.len() - 2);

        let result: Result<Response, _> = read_frame(&mut Cursor::new(buf));
        assert!(matches!(result, Err(ProtoError::Io { .. })));
    }

    #[test]
    fn invalid_bit_width_fails_to_decode() {
        assert!(Bits::try_from(32).is_ok());
        assert!(Bits::try_from(64).is_ok());
        assert!(Bits::try_from(16).is_err());
        assert!(serde_json::from_str::<Bits>("48").is_err());
    }

    #[test]
    fn response_defaults_fill_missing_fields() {
        // A minimal driver answer decodes with empty output vectors.
        let decoded: Response = serde_json::from_str(r#"{"code":"success"}"#).unwrap();
        assert_eq!(decoded.code, ResponseCode::Success);
        assert!(decoded.resource_id.is_none());
        assert!(decoded.stdout.is_empty());
        assert!(decoded.exit_code.is_empty());
    }
}
