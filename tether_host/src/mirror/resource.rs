//! Proxies for driver-allocated resources: fast message queues, shared
//! memory regions, and file handles.
//!
//! Unlike the driver-backed mirrors, these may share a command channel with
//! other mirrors; creation failures are an expected environmental outcome
//! and surface as an absent mirror rather than an error.

use crate::channel::SharedChannel;
use crate::mirror::RemoteId;
use tether_common::TetherResult;
use tether_common::proto::{FmqQuery, Request, ResourceKind};
use tracing::warn;

/// Host-side proxy for one fast message queue on the target.
pub struct FmqMirror {
    data_type: String,
    sync: bool,
    queue_id: RemoteId,
    channel: SharedChannel,
}

impl FmqMirror {
    /// Allocate a queue, or derive one from an existing queue's id.
    ///
    /// Returns `Ok(None)` when the driver reports the queue was not
    /// created.
    pub(crate) fn create(
        channel: SharedChannel,
        data_type: &str,
        sync: bool,
        queue_size: u64,
        blocking: bool,
        existing_queue_id: Option<RemoteId>,
        reset_pointers: bool,
    ) -> TetherResult<Option<Self>> {
        let response = channel.lock().send(&Request::FmqCreate {
            data_type: data_type.to_string(),
            sync,
            queue_size,
            blocking,
            existing_queue_id: existing_queue_id.map(RemoteId::raw),
            reset_pointers,
        })?;

        let Some(queue_id) = response.resource_id.and_then(RemoteId::from_wire) else {
            warn!("target failed to allocate a {data_type} message queue");
            return Ok(None);
        };

        Ok(Some(Self {
            data_type: data_type.to_string(),
            sync,
            queue_id,
            channel,
        }))
    }

    /// Append elements to the queue. Returns whether the write fit.
    pub fn write(&self, data: &[serde_json::Value]) -> TetherResult<bool> {
        let response = self.channel.lock().send(&Request::FmqWrite {
            queue_id: self.queue_id.raw(),
            data: data.to_vec(),
        })?;
        Ok(response
            .payload
            .and_then(|p| p.as_bool())
            .unwrap_or(false))
    }

    /// Pop up to `count` elements. Returns `None` when the queue holds
    /// fewer elements than requested.
    pub fn read(&self, count: u64) -> TetherResult<Option<Vec<serde_json::Value>>> {
        let response = self.channel.lock().send(&Request::FmqRead {
            queue_id: self.queue_id.raw(),
            count,
        })?;
        match response.payload {
            Some(serde_json::Value::Array(items)) => Ok(Some(items)),
            _ => Ok(None),
        }
    }

    /// Free element slots in the queue.
    pub fn available_to_write(&self) -> TetherResult<u64> {
        self.query_count(FmqQuery::AvailableToWrite)
    }

    /// Readable element count in the queue.
    pub fn available_to_read(&self) -> TetherResult<u64> {
        self.query_count(FmqQuery::AvailableToRead)
    }

    /// Whether the remote queue object is usable.
    pub fn is_valid(&self) -> TetherResult<bool> {
        let response = self.channel.lock().send(&Request::FmqState {
            queue_id: self.queue_id.raw(),
            query: FmqQuery::IsValid,
        })?;
        Ok(response
            .payload
            .and_then(|p| p.as_bool())
            .unwrap_or(false))
    }

    fn query_count(&self, query: FmqQuery) -> TetherResult<u64> {
        let response = self.channel.lock().send(&Request::FmqState {
            queue_id: self.queue_id.raw(),
            query,
        })?;
        Ok(response
            .payload
            .and_then(|p| p.as_u64())
            .unwrap_or(0))
    }

    pub(crate) fn release(&self) -> TetherResult<()> {
        self.channel.lock().send(&Request::ReleaseResource {
            kind: ResourceKind::Fmq,
            id: self.queue_id.raw(),
        })?;
        Ok(())
    }

    /// Element data-type tag of the queue.
    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Whether the queue is synchronized (single reader).
    pub fn is_synchronized(&self) -> bool {
        self.sync
    }

    /// Driver-assigned queue id.
    pub fn queue_id(&self) -> RemoteId {
        self.queue_id
    }

    /// The command channel backing this mirror.
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }
}

impl std::fmt::Debug for FmqMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FmqMirror")
            .field("data_type", &self.data_type)
            .field("sync", &self.sync)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}

/// Host-side proxy for one shared memory region on the target.
pub struct MemoryMirror {
    size: u64,
    mem_id: RemoteId,
    channel: SharedChannel,
}

impl MemoryMirror {
    /// Allocate a region of `size` bytes.
    ///
    /// Returns `Ok(None)` when the driver reports the region was not
    /// allocated.
    pub(crate) fn create(channel: SharedChannel, size: u64) -> TetherResult<Option<Self>> {
        let response = channel.lock().send(&Request::MemAllocate { size })?;

        let Some(mem_id) = response.resource_id.and_then(RemoteId::from_wire) else {
            warn!("target failed to allocate a {size}-byte memory region");
            return Ok(None);
        };

        Ok(Some(Self {
            size,
            mem_id,
            channel,
        }))
    }

    /// Read `len` bytes starting at `start`.
    pub fn read_bytes(&self, start: u64, len: u64) -> TetherResult<Vec<u8>> {
        let response = self.channel.lock().send(&Request::MemRead {
            mem_id: self.mem_id.raw(),
            start,
            len,
        })?;
        match response.payload {
            Some(payload) => Ok(serde_json::from_value(payload)
                .map_err(tether_common::proto::ProtoError::from)?),
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite the region starting at `start` with `data`.
    pub fn update_bytes(&self, start: u64, data: &[u8]) -> TetherResult<()> {
        self.channel.lock().send(&Request::MemWrite {
            mem_id: self.mem_id.raw(),
            start,
            data: data.to_vec(),
        })?;
        Ok(())
    }

    pub(crate) fn release(&self) -> TetherResult<()> {
        self.channel.lock().send(&Request::ReleaseResource {
            kind: ResourceKind::Memory,
            id: self.mem_id.raw(),
        })?;
        Ok(())
    }

    /// Requested region size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Driver-assigned memory id.
    pub fn mem_id(&self) -> RemoteId {
        self.mem_id
    }

    /// The command channel backing this mirror.
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }
}

impl std::fmt::Debug for MemoryMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMirror")
            .field("size", &self.size)
            .field("mem_id", &self.mem_id)
            .finish()
    }
}

/// Host-side proxy for one file handle on the target.
///
/// Currently wraps a single file path plus an auxiliary integer list.
pub struct HandleMirror {
    path: String,
    mode: String,
    handle_id: RemoteId,
    channel: SharedChannel,
}

impl HandleMirror {
    /// Create a handle wrapping one file.
    ///
    /// Returns `Ok(None)` when the driver reports the handle was not
    /// created (missing file, bad mode).
    pub(crate) fn create(
        channel: SharedChannel,
        path: &str,
        mode: &str,
        ints: &[i32],
    ) -> TetherResult<Option<Self>> {
        let response = channel.lock().send(&Request::HandleCreate {
            path: path.to_string(),
            mode: mode.to_string(),
            ints: ints.to_vec(),
        })?;

        let Some(handle_id) = response.resource_id.and_then(RemoteId::from_wire) else {
            warn!("target failed to create a handle for {path}");
            return Ok(None);
        };

        Ok(Some(Self {
            path: path.to_string(),
            mode: mode.to_string(),
            handle_id,
            channel,
        }))
    }

    /// Read up to `len` bytes through the handle.
    pub fn read_file(&self, len: u64) -> TetherResult<Vec<u8>> {
        let response = self.channel.lock().send(&Request::HandleRead {
            handle_id: self.handle_id.raw(),
            len,
        })?;
        match response.payload {
            Some(payload) => Ok(serde_json::from_value(payload)
                .map_err(tether_common::proto::ProtoError::from)?),
            None => Ok(Vec::new()),
        }
    }

    /// Write `data` through the handle. Returns the byte count written.
    pub fn write_file(&self, data: &[u8]) -> TetherResult<u64> {
        let response = self.channel.lock().send(&Request::HandleWrite {
            handle_id: self.handle_id.raw(),
            data: data.to_vec(),
        })?;
        Ok(response
            .payload
            .and_then(|p| p.as_u64())
            .unwrap_or(0))
    }

    pub(crate) fn release(&self) -> TetherResult<()> {
        self.channel.lock().send(&Request::ReleaseResource {
            kind: ResourceKind::Handle,
            id: self.handle_id.raw(),
        })?;
        Ok(())
    }

    /// Path of the wrapped file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mode the file was opened with.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Driver-assigned handle id.
    pub fn handle_id(&self) -> RemoteId {
        self.handle_id
    }

    /// The command channel backing this mirror.
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }
}

impl std::fmt::Debug for HandleMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleMirror")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("handle_id", &self.handle_id)
            .finish()
    }
}
